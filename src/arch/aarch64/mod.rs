//! ARM64/AArch64 architecture support
//!
//! This module contains the ARM64 VMM back end:
//! - Register definitions and the kernel interface
//! - Data abort and system register trap decoding
//! - Virtual GIC (v2 and v3)
//! - SMC/PSCI emulation

pub mod decode;
pub mod defs;
pub mod exception;
pub mod kernel;
pub mod psci;
pub mod regs;
pub mod sysreg;
pub mod vgic;
pub mod vmm;

pub use exception::ArmFault;
pub use kernel::ArmKernel;
pub use regs::{UserContext, VcpuReg};
pub use vmm::ArmVmm;
