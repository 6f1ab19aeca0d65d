//! AArch64 microkernel calls

use super::regs::{UserContext, VcpuReg};
use crate::kernel::Microkernel;

/// Register, list register and virtual PPI plumbing of an ARM host kernel.
pub trait ArmKernel: Microkernel {
    /// Read the saved thread context of `vcpu`.
    fn read_regs(&mut self, vcpu: usize) -> UserContext;

    /// Overwrite the saved thread context of `vcpu`.
    fn write_regs(&mut self, vcpu: usize, regs: &UserContext);

    /// Write list register `lr_index` of `vcpu`. Returns `false` if the
    /// kernel refused the write.
    fn inject_irq(&mut self, vcpu: usize, virq: u16, priority: u8, group: u8, lr_index: u8) -> bool;

    /// Re-enable delivery of the virtual PPI `irq` on `vcpu`.
    fn ack_vppi(&mut self, vcpu: usize, irq: u32);

    fn read_vcpu_reg(&mut self, vcpu: usize, reg: VcpuReg) -> u64;

    fn write_vcpu_reg(&mut self, vcpu: usize, reg: VcpuReg, value: u64);
}
