//! VM exits delivered by the kernel

/// VMX basic exit reasons the VMM handles
pub const EXIT_REASON_CPUID: u64 = 10;
pub const EXIT_REASON_HLT: u64 = 12;
pub const EXIT_REASON_IO_INSTRUCTION: u64 = 30;
pub const EXIT_REASON_RDMSR: u64 = 31;
pub const EXIT_REASON_WRMSR: u64 = 32;
pub const EXIT_REASON_EPT_VIOLATION: u64 = 48;

/// EPT violation qualification bits
pub const EPT_QUAL_READ: u64 = 1 << 0;
pub const EPT_QUAL_WRITE: u64 = 1 << 1;
pub const EPT_QUAL_FETCH: u64 = 1 << 2;

/// A VM exit. `len` is the VM-exit instruction length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum X86Fault {
    Cpuid { len: u64 },
    Rdmsr { len: u64 },
    Wrmsr { len: u64 },
    Hlt { len: u64 },
    EptViolation { gpa: u64, qualification: u64, ip: u64, len: u64 },
    IoInstruction { qualification: u64, len: u64 },
    Unknown { reason: u64 },
}

impl X86Fault {
    /// Build from the raw exit fields of the VMX exit message.
    pub fn from_exit(reason: u64, qualification: u64, gpa: u64, ip: u64, len: u64) -> Self {
        match reason & 0xffff {
            EXIT_REASON_CPUID => X86Fault::Cpuid { len },
            EXIT_REASON_HLT => X86Fault::Hlt { len },
            EXIT_REASON_IO_INSTRUCTION => X86Fault::IoInstruction { qualification, len },
            EXIT_REASON_RDMSR => X86Fault::Rdmsr { len },
            EXIT_REASON_WRMSR => X86Fault::Wrmsr { len },
            EXIT_REASON_EPT_VIOLATION => X86Fault::EptViolation { gpa, qualification, ip, len },
            reason => X86Fault::Unknown { reason },
        }
    }
}

/// Name of an exit reason for diagnostics.
pub fn exit_reason_name(reason: u64) -> &'static str {
    match reason {
        0 => "exception or NMI",
        1 => "external interrupt",
        2 => "triple fault",
        7 => "interrupt window",
        EXIT_REASON_CPUID => "CPUID",
        EXIT_REASON_HLT => "HLT",
        18 => "VMCALL",
        28 => "control register access",
        EXIT_REASON_IO_INSTRUCTION => "I/O instruction",
        EXIT_REASON_RDMSR => "RDMSR",
        EXIT_REASON_WRMSR => "WRMSR",
        EXIT_REASON_EPT_VIOLATION => "EPT violation",
        49 => "EPT misconfiguration",
        _ => "unknown",
    }
}
