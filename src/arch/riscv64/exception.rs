//! RISC-V trap messages

/// `scause` values the VMM sees for a vCPU
pub const CAUSE_ECALL_VS: u64 = 10;
pub const CAUSE_GUEST_INSN_PAGE_FAULT: u64 = 20;
pub const CAUSE_GUEST_LOAD_PAGE_FAULT: u64 = 21;
pub const CAUSE_GUEST_STORE_PAGE_FAULT: u64 = 23;

/// A trap delivered for a vCPU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiscvFault {
    /// Guest page fault. `htinst` holds the transformed trapping
    /// instruction, or zero when the hardware did not provide one.
    VmFault {
        addr: u64,
        cause: u64,
        htinst: u64,
        ip: u64,
    },
    /// Trapped instruction (SBI ecall), described by `cause`
    VcpuFault { cause: u64 },
    /// Anything else, reported by label
    Unknown { label: u64 },
}

pub fn cause_name(cause: u64) -> &'static str {
    match cause {
        CAUSE_ECALL_VS => "environment call from VS-mode",
        CAUSE_GUEST_INSN_PAGE_FAULT => "guest instruction page fault",
        CAUSE_GUEST_LOAD_PAGE_FAULT => "guest load page fault",
        CAUSE_GUEST_STORE_PAGE_FAULT => "guest store/AMO page fault",
        _ => "unhandled cause",
    }
}
