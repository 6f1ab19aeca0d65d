//! x86_64 microkernel calls

use super::regs::{VmcsField, X86Regs};
use crate::kernel::Microkernel;

/// Register, VMCS, MSR and timer plumbing of an x86 host kernel.
pub trait X86Kernel: Microkernel {
    fn read_regs(&mut self, vcpu: usize) -> X86Regs;

    fn write_regs(&mut self, vcpu: usize, regs: &X86Regs);

    fn vmcs_read(&mut self, vcpu: usize, field: VmcsField) -> u64;

    fn vmcs_write(&mut self, vcpu: usize, field: VmcsField, value: u64);

    /// Read an MSR the kernel context-switches for the guest.
    fn read_msr(&mut self, vcpu: usize, msr: u32) -> u64;

    /// Write an MSR the kernel context-switches for the guest.
    fn write_msr(&mut self, vcpu: usize, msr: u32, value: u64);

    /// Queue external interrupt `vector` for the next VM entry. Returns
    /// `false` if the kernel could not accept it.
    fn inject_vector(&mut self, vcpu: usize, vector: u8) -> bool;

    /// Arm the one-shot VMM timer, `ns` nanoseconds from now.
    fn timer_set_timeout(&mut self, ns: u64);
}
