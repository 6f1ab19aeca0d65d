//! ARM64 trap messages
//!
//! The kinds of fault the microkernel delivers for an ARM vCPU, already
//! split out of the kernel's message registers by the embedding binding.

use super::defs::*;

/// Microkernel syscall numbers a guest may issue from EL1.
pub const SYSCALL_PA_TO_IPA: u64 = 65;
pub const SYSCALL_NOP: u64 = 67;

/// A trap delivered for a vCPU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmFault {
    /// Stage-2 translation fault
    VmFault {
        addr: u64,
        fsr: u64,
        ip: u64,
        prefetch: bool,
    },
    /// The guest issued a syscall the kernel does not know
    UnknownSyscall { syscall: u64, ip: u64 },
    /// Exception taken to the VMM while the vCPU ran at EL0
    UserException { ip: u64, number: u64 },
    /// A list register was completed; `idx` is the LR that fired
    VgicMaintenance { idx: usize },
    /// Trapped instruction, described by HSR
    VcpuFault { hsr: u64 },
    /// Virtual PPI (architected timer) fired
    VppiEvent { irq: u32 },
    /// Anything else, reported by name
    Unknown { label: u64 },
}

/// Exception class of an HSR value.
pub fn hsr_ec(hsr: u64) -> u64 {
    (hsr >> ESR_EC_SHIFT) & ESR_EC_MASK
}

/// Instruction specific syndrome of an HSR value.
pub fn hsr_iss(hsr: u64) -> u32 {
    (hsr & ESR_ISS_MASK) as u32
}

/// Name of an exception class, for diagnostics.
pub fn ec_name(ec: u64) -> &'static str {
    match ec {
        EC_UNKNOWN => "unknown reason",
        EC_WFI_WFE => "WFI/WFE",
        EC_HVC64 => "HVC (AArch64)",
        EC_SMC64 => "SMC (AArch64)",
        EC_MSR_MRS => "MSR/MRS (AArch64)",
        EC_IABT_LOWER => "instruction abort (lower EL)",
        EC_DABT_LOWER => "data abort (lower EL)",
        _ => "unhandled exception class",
    }
}

/// Whether a data abort was caused by a write.
pub fn fsr_is_write(fsr: u64) -> bool {
    fsr as u32 & ISS_WNR != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hsr_fields() {
        let hsr = (EC_SMC64 << 26) | 0x1234;
        assert_eq!(hsr_ec(hsr), EC_SMC64);
        assert_eq!(hsr_iss(hsr), 0x1234);
        assert_eq!(ec_name(hsr_ec(hsr)), "SMC (AArch64)");
    }
}
