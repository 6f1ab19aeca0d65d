#![cfg_attr(not(test), no_std)]

//! Fault dispatch and device emulation core of a microkernel-hosted VMM.
//!
//! One VMM context per guest owns the fault region registry, the virtual
//! interrupt controller of its architecture and the passthrough table.
//! The microkernel is reached only through the traits in [`kernel`] and
//! the per-architecture kernel traits.

pub mod arch;
pub mod devices;
pub mod dtb;
pub mod error;
pub mod fault;
pub mod guest_loader;
pub mod kernel;
pub mod memory;
pub mod platform;
pub mod util;
pub mod vcpu;
pub mod virq;

pub use arch::{VcpuContextOps, Vmm};
pub use devices::{MmioDevice, NoDevice};
pub use error::{Result, VmmError};
pub use fault::{FaultRegistry, RegionHandler, MAX_FAULT_REGIONS};
pub use kernel::Microkernel;
pub use memory::{GuestMemoryMap, GuestRegion};
pub use vcpu::{VcpuRunState, VcpuTable};
pub use virq::{PassthroughMap, VirqAck, MAX_PASSTHROUGH_CHANNELS};
