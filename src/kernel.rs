//! Microkernel interface
//!
//! The VMM never touches capabilities directly. Every call into the host
//! kernel goes through these traits so that the fault engine can be driven
//! by a real kernel binding or by a recording mock in tests.
//!
//! [`Microkernel`] holds the calls every architecture needs; each back end
//! extends it with its own register and interrupt plumbing
//! (`ArmKernel`, `RiscvKernel`, `X86Kernel`).

pub trait Microkernel {
    /// Acknowledge the hardware IRQ delivered on notification `channel`.
    fn irq_ack(&mut self, channel: u32);

    /// Resume `vcpu` at `pc`. The saved register file is left as is.
    fn vcpu_restart(&mut self, vcpu: usize, pc: u64);

    /// Suspend `vcpu` until it is restarted.
    fn vcpu_stop(&mut self, vcpu: usize);
}
