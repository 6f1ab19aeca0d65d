//! Architecture-specific code
//!
//! All three back ends build on every host so they can be tested
//! anywhere; `NativeVmm` picks the one matching the target.

pub mod traits;

pub mod aarch64;
pub mod riscv64;
pub mod x86_64;

pub use traits::{VcpuContextOps, Vmm};

#[cfg(target_arch = "aarch64")]
pub type NativeVmm<K, D> = aarch64::ArmVmm<K, D>;

#[cfg(target_arch = "riscv64")]
pub type NativeVmm<K, D> = riscv64::RiscvVmm<K, D>;

#[cfg(target_arch = "x86_64")]
pub type NativeVmm<K, D> = x86_64::X86Vmm<K, D>;
