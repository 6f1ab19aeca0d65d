//! RISC-V microkernel calls

use super::regs::{RiscvRegs, RiscvVcpuReg};
use crate::kernel::Microkernel;

/// Register and CSR plumbing of a RISC-V host kernel with the H extension.
pub trait RiscvKernel: Microkernel {
    fn read_regs(&mut self, vcpu: usize) -> RiscvRegs;

    fn write_regs(&mut self, vcpu: usize, regs: &RiscvRegs);

    fn read_vcpu_reg(&mut self, vcpu: usize, reg: RiscvVcpuReg) -> u64;

    fn write_vcpu_reg(&mut self, vcpu: usize, reg: RiscvVcpuReg, value: u64);

    /// Current value of the `time` CSR.
    fn current_time(&mut self) -> u64;
}
