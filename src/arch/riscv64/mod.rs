//! RISC-V (RV64 with the H extension) architecture support
//!
//! - Register definitions and the kernel interface
//! - Guest page fault decoding from `htinst`
//! - PLIC emulation
//! - SBI v2.0 emulation

pub mod decode;
pub mod exception;
pub mod kernel;
pub mod plic;
pub mod regs;
pub mod sbi;
pub mod vmm;

pub use decode::DecodedInstruction;
pub use exception::RiscvFault;
pub use kernel::RiscvKernel;
pub use regs::{RiscvRegs, RiscvVcpuReg};
pub use vmm::RiscvVmm;
