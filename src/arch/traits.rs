//! Architecture-Portable Trait Definitions
//!
//! Every back end exposes the same VMM surface through [`Vmm`]; the one
//! matching the build target is re-exported as `arch::NativeVmm`.

use crate::devices::MmioDevice;
use crate::error::Result;
use crate::platform::BOOT_VCPU_ID;
use crate::virq::VirqAck;

/// Architecture-specific vCPU register file operations
pub trait VcpuContextOps {
    fn pc(&self) -> u64;
    fn set_pc(&mut self, val: u64);
    fn sp(&self) -> u64;
    fn set_sp(&mut self, val: u64);
    fn get_reg(&self, n: u8) -> u64;
    fn set_reg(&mut self, n: u8, val: u64);
    /// Step over the trapping instruction of `len` bytes.
    fn advance_pc(&mut self, len: u64);
}

/// The VMM core of one architecture.
///
/// Setup calls (`controller_init`, registrations, `guest_start`) report
/// configuration errors and are expected to be treated as fatal by the
/// caller. [`Vmm::fault_handle`] is the per-trap entry point: it returns
/// `true` when the guest may be resumed and `false` when the vCPU must stay
/// halted (a diagnostic has already been logged).
pub trait Vmm {
    /// Trap message delivered by the microkernel.
    type Fault;
    /// Consumer device model type routed through the fault region registry.
    type Device: MmioDevice;

    /// Set up the virtual interrupt controller, register its MMIO ranges
    /// and pre-register the architecture-reserved interrupts.
    fn controller_init(&mut self) -> Result<()>;

    /// Route `[base, base + size)` to `device`.
    fn register_region(&mut self, base: u64, size: u64, device: Self::Device) -> Result<usize>;

    /// Register `irq` on `vcpu` with the given acknowledge action.
    fn virq_register(&mut self, vcpu: usize, irq: u32, ack: VirqAck) -> Result<()>;

    /// Mark `irq` pending on `vcpu` and deliver it when possible.
    fn virq_inject(&mut self, vcpu: usize, irq: u32) -> Result<()>;

    /// Inject on the boot vCPU.
    fn virq_inject_boot(&mut self, irq: u32) -> Result<()> {
        self.virq_inject(BOOT_VCPU_ID, irq)
    }

    /// Forward the hardware IRQ arriving on `channel` to `irq` on `vcpu`.
    fn register_passthrough(&mut self, vcpu: usize, irq: u32, channel: u32) -> Result<()>;

    /// Inject the IRQ bound to `channel`.
    fn handle_passthrough(&mut self, channel: u32) -> Result<()>;

    /// Load the boot registers of `vcpu` and resume it at `pc`.
    fn guest_start(&mut self, vcpu: usize, pc: u64, dtb: u64, initrd: u64) -> Result<()>;

    fn guest_stop(&mut self, vcpu: usize);

    /// Stop `vcpu`, zero guest RAM and reset the vCPU. Reloading the boot
    /// images and calling `guest_start` again is up to the caller.
    fn guest_restart(&mut self, vcpu: usize, ram_gpa: u64, ram_size: u64) -> Result<()>;

    /// Handle one trap from `vcpu`.
    fn fault_handle(&mut self, vcpu: usize, fault: &Self::Fault) -> bool;
}
