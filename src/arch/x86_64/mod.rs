//! x86_64 architecture support
//!
//! VMX exit handling on top of a kernel that owns the VMCS:
//! - Guest page table walks and MMIO instruction decoding
//! - Virtual LAPIC and IOAPIC
//! - Legacy port devices (CMOS, serial, PIT, fw_cfg, PCI probe)
//! - CPUID and MSR emulation

pub mod apic;
pub mod cpuid;
pub mod decode;
pub mod exit;
pub mod ioports;
pub mod kernel;
pub mod msr;
pub mod regs;
pub mod translate;
pub mod vmm;

pub use decode::DecodedInstruction;
pub use exit::X86Fault;
pub use kernel::X86Kernel;
pub use regs::{Gpr, VmcsField, X86Regs};
pub use vmm::X86Vmm;
