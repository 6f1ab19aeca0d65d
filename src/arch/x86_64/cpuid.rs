//! CPUID emulation
//!
//! The guest sees a fixed, conservative Intel feature set. Leaves outside
//! the table read as zero.

use bitflags::bitflags;

pub const CPUID_MAX_BASIC_LEAF: u32 = 0xd;
pub const CPUID_MAX_EXT_LEAF: u32 = 0x8000_0008;

/// "GenuineIntel" split across EBX, EDX, ECX
const VENDOR_EBX: u32 = 0x756e_6547;
const VENDOR_EDX: u32 = 0x4965_6e69;
const VENDOR_ECX: u32 = 0x6c65_746e;

/// Family 6, model 0x8e, stepping 0xa
const CPUID_SIGNATURE: u32 = 0x0008_06ea;

bitflags! {
    /// CPUID.01H:ECX
    pub struct Leaf1Ecx: u32 {
        const SSE3 = 1 << 0;
        const PCLMULQDQ = 1 << 1;
        const SSSE3 = 1 << 9;
        const CX16 = 1 << 13;
        const SSE4_1 = 1 << 19;
        const SSE4_2 = 1 << 20;
        const MOVBE = 1 << 22;
        const POPCNT = 1 << 23;
        const AES = 1 << 25;
        const XSAVE = 1 << 26;
        const HYPERVISOR = 1 << 31;
    }
}

bitflags! {
    /// CPUID.01H:EDX
    pub struct Leaf1Edx: u32 {
        const FPU = 1 << 0;
        const DE = 1 << 2;
        const PSE = 1 << 3;
        const TSC = 1 << 4;
        const MSR = 1 << 5;
        const PAE = 1 << 6;
        const MCE = 1 << 7;
        const CX8 = 1 << 8;
        const APIC = 1 << 9;
        const SEP = 1 << 11;
        const MTRR = 1 << 12;
        const PGE = 1 << 13;
        const MCA = 1 << 14;
        const CMOV = 1 << 15;
        const PAT = 1 << 16;
        const PSE36 = 1 << 17;
        const CLFSH = 1 << 19;
        const MMX = 1 << 23;
        const FXSR = 1 << 24;
        const SSE = 1 << 25;
        const SSE2 = 1 << 26;
    }
}

bitflags! {
    /// CPUID.80000001H:EDX
    pub struct ExtLeaf1Edx: u32 {
        const SYSCALL = 1 << 11;
        const NX = 1 << 20;
        const PDPE1GB = 1 << 26;
        const RDTSCP = 1 << 27;
        const LM = 1 << 29;
    }
}

/// EAX, EBX, ECX, EDX of one leaf
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuidResult {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
}

/// CPUID output for `leaf`/`subleaf` on the vCPU with APIC ID `apic_id`.
pub fn cpuid(leaf: u32, subleaf: u32, apic_id: u8) -> CpuidResult {
    let r = |eax, ebx, ecx, edx| CpuidResult { eax, ebx, ecx, edx };
    match leaf {
        0 => r(CPUID_MAX_BASIC_LEAF, VENDOR_EBX, VENDOR_ECX, VENDOR_EDX),
        1 => {
            let ecx = Leaf1Ecx::SSE3
                | Leaf1Ecx::PCLMULQDQ
                | Leaf1Ecx::SSSE3
                | Leaf1Ecx::CX16
                | Leaf1Ecx::SSE4_1
                | Leaf1Ecx::SSE4_2
                | Leaf1Ecx::MOVBE
                | Leaf1Ecx::POPCNT
                | Leaf1Ecx::AES
                | Leaf1Ecx::HYPERVISOR;
            let edx = Leaf1Edx::all();
            // APIC ID, one logical processor, 64-byte CLFLUSH line
            let ebx = ((apic_id as u32) << 24) | (1 << 16) | (8 << 8);
            r(CPUID_SIGNATURE, ebx, ecx.bits(), edx.bits())
        }
        // Deterministic cache parameters: none reported
        4 => r(0, 0, 0, 0),
        7 if subleaf == 0 => r(0, 0, 0, 0),
        0xb => r(0, 0, subleaf & 0xff, apic_id as u32),
        0x8000_0000 => r(CPUID_MAX_EXT_LEAF, 0, 0, 0),
        // LAHF/SAHF in long mode
        0x8000_0001 => {
            let edx = ExtLeaf1Edx::SYSCALL | ExtLeaf1Edx::NX | ExtLeaf1Edx::RDTSCP | ExtLeaf1Edx::LM;
            r(0, 0, 1, edx.bits())
        }
        // 39 physical, 48 linear address bits
        0x8000_0008 => r(0x3027, 0, 0, 0),
        _ => {
            log::debug!("CPUID leaf 0x{:x}.{:x} reads as zero", leaf, subleaf);
            r(0, 0, 0, 0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vendor_string() {
        let res = cpuid(0, 0, 0);
        let mut vendor = [0u8; 12];
        vendor[..4].copy_from_slice(&res.ebx.to_le_bytes());
        vendor[4..8].copy_from_slice(&res.edx.to_le_bytes());
        vendor[8..].copy_from_slice(&res.ecx.to_le_bytes());
        assert_eq!(&vendor, b"GenuineIntel");
    }

    #[test]
    fn test_leaf1_reports_apic_id_and_hypervisor() {
        let res = cpuid(1, 0, 3);
        assert_eq!(res.ebx >> 24, 3);
        assert!(Leaf1Ecx::from_bits_truncate(res.ecx).contains(Leaf1Ecx::HYPERVISOR));
        assert!(Leaf1Edx::from_bits_truncate(res.edx).contains(Leaf1Edx::APIC));
    }

    #[test]
    fn test_long_mode_and_unknown_leaf() {
        assert_ne!(cpuid(0x8000_0001, 0, 0).edx & ExtLeaf1Edx::LM.bits(), 0);
        assert_eq!(cpuid(0x4000_0000, 0, 0), CpuidResult::default());
    }
}
