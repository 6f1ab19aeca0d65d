//! Virtual CPU (vCPU) bookkeeping
//!
//! The register context of each vCPU lives in the microkernel; the VMM
//! only tracks whether a vCPU is powered on and why it is waiting.

use crate::error::{Result, VmmError};
use crate::platform::MAX_VCPUS;

/// Virtual CPU run state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VcpuRunState {
    /// vCPU is executing guest code
    Running,

    /// Parked on WFI until the next virtual IRQ
    WaitingForIrq,
}

/// Per-vCPU power and run state.
pub struct VcpuTable {
    num_vcpus: usize,
    on: [bool; MAX_VCPUS],
    run: [VcpuRunState; MAX_VCPUS],
}

impl VcpuTable {
    /// Create a table for `num_vcpus` vCPUs, all powered off.
    pub fn new(num_vcpus: usize) -> Result<Self> {
        if num_vcpus == 0 || num_vcpus > MAX_VCPUS {
            return Err(VmmError::InvalidVcpu(num_vcpus));
        }
        Ok(Self {
            num_vcpus,
            on: [false; MAX_VCPUS],
            run: [VcpuRunState::Running; MAX_VCPUS],
        })
    }

    pub fn num_vcpus(&self) -> usize {
        self.num_vcpus
    }

    /// Fail if `vcpu` is not a configured vCPU.
    pub fn check(&self, vcpu: usize) -> Result<()> {
        if vcpu < self.num_vcpus {
            Ok(())
        } else {
            Err(VmmError::InvalidVcpu(vcpu))
        }
    }

    pub fn is_on(&self, vcpu: usize) -> bool {
        vcpu < self.num_vcpus && self.on[vcpu]
    }

    pub fn set_on(&mut self, vcpu: usize, on: bool) {
        if vcpu < self.num_vcpus {
            self.on[vcpu] = on;
            if on {
                self.run[vcpu] = VcpuRunState::Running;
            }
        }
    }

    pub fn run_state(&self, vcpu: usize) -> Option<VcpuRunState> {
        self.run[..self.num_vcpus].get(vcpu).copied()
    }

    pub fn set_run_state(&mut self, vcpu: usize, state: VcpuRunState) {
        if vcpu < self.num_vcpus {
            self.run[vcpu] = state;
        }
    }
}

impl core::fmt::Debug for VcpuTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("VcpuTable")
            .field("num_vcpus", &self.num_vcpus)
            .field("on", &&self.on[..self.num_vcpus])
            .field("run", &&self.run[..self.num_vcpus])
            .finish()
    }
}
