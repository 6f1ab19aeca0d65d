//! Model-specific register emulation

use super::kernel::X86Kernel;
use super::regs::VmcsField;
use crate::platform::{BOOT_VCPU_ID, LAPIC_GPA};

pub const MSR_TEST_CTRL: u32 = 0x33;
pub const MSR_PLATFORM_ID: u32 = 0x17;
pub const MSR_APIC_BASE: u32 = 0x1b;
pub const MSR_BIOS_SIGN_ID: u32 = 0x8b;
pub const MSR_PLATFORM_INFO_ALIAS: u32 = 0xcf;
pub const MSR_MISC_ENABLE: u32 = 0x1a0;
pub const MSR_EFER: u32 = 0xc000_0080;
pub const MSR_STAR: u32 = 0xc000_0081;
pub const MSR_LSTAR: u32 = 0xc000_0082;
pub const MSR_CSTAR: u32 = 0xc000_0083;
pub const MSR_SFMASK: u32 = 0xc000_0084;

const APIC_BASE_BSP: u64 = 1 << 8;
const APIC_BASE_ENABLE: u64 = 1 << 11;

/// MSRs with no guest-visible state
const READ_AS_ZERO: [u32; 5] = [
    MSR_PLATFORM_ID,
    MSR_PLATFORM_INFO_ALIAS,
    MSR_MISC_ENABLE,
    MSR_BIOS_SIGN_ID,
    MSR_TEST_CTRL,
];

fn is_syscall_msr(msr: u32) -> bool {
    matches!(msr, MSR_STAR | MSR_LSTAR | MSR_CSTAR | MSR_SFMASK)
}

/// RDMSR. Returns `None` for MSRs that are not emulated.
pub fn read<K: X86Kernel>(kernel: &mut K, vcpu: usize, msr: u32) -> Option<u64> {
    match msr {
        MSR_EFER => Some(kernel.vmcs_read(vcpu, VmcsField::GuestEfer)),
        MSR_APIC_BASE => {
            let bsp = if vcpu == BOOT_VCPU_ID { APIC_BASE_BSP } else { 0 };
            Some(LAPIC_GPA | APIC_BASE_ENABLE | bsp)
        }
        m if is_syscall_msr(m) => Some(kernel.read_msr(vcpu, m)),
        m if READ_AS_ZERO.contains(&m) => Some(0),
        _ => None,
    }
}

/// WRMSR. Returns `false` for MSRs that are not emulated.
pub fn write<K: X86Kernel>(kernel: &mut K, vcpu: usize, msr: u32, value: u64) -> bool {
    match msr {
        MSR_EFER => kernel.vmcs_write(vcpu, VmcsField::GuestEfer, value),
        MSR_APIC_BASE if value & !0xfff == LAPIC_GPA => {}
        m if is_syscall_msr(m) => kernel.write_msr(vcpu, m, value),
        // Microcode update trigger and friends
        m if READ_AS_ZERO.contains(&m) => log::debug!("WRMSR 0x{:x} <- 0x{:x} ignored", m, value),
        _ => return false,
    }
    true
}
