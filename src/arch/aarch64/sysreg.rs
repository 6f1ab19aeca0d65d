//! Trapped system register accesses and vCPU system register state

use super::kernel::ArmKernel;
use super::regs::VcpuReg;
use crate::error::{Result, VmmError};
use crate::vcpu::VcpuTable;

/// Decoded ISS of an MSR/MRS trap (EC 0x18)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SysRegAccess {
    pub read: bool,
    pub op0: u8,
    pub op1: u8,
    pub crn: u8,
    pub crm: u8,
    pub op2: u8,
    pub rt: u8,
}

impl SysRegAccess {
    pub fn from_iss(iss: u32) -> Self {
        Self {
            read: iss & 1 != 0,
            crm: ((iss >> 1) & 0xf) as u8,
            rt: ((iss >> 5) & 0x1f) as u8,
            crn: ((iss >> 10) & 0xf) as u8,
            op1: ((iss >> 14) & 0x7) as u8,
            op2: ((iss >> 17) & 0x7) as u8,
            op0: ((iss >> 20) & 0x3) as u8,
        }
    }

    fn is(&self, op0: u8, op1: u8, crn: u8, crm: u8, op2: u8) -> bool {
        (self.op0, self.op1, self.crn, self.crm, self.op2) == (op0, op1, crn, crm, op2)
    }

    /// ICC_SGI1R_EL1: op0=3 op1=0 CRn=12 CRm=11 op2=5
    pub fn is_icc_sgi1r(&self) -> bool {
        self.is(3, 0, 12, 11, 5)
    }
}

/// ICC_SGI1R_EL1 fields
const SGI1R_TARGET_LIST_MASK: u64 = 0xffff;
const SGI1R_AFF1_SHIFT: u64 = 16;
const SGI1R_INTID_SHIFT: u64 = 24;
const SGI1R_AFF2_SHIFT: u64 = 32;
const SGI1R_IRM: u64 = 1 << 40;
const SGI1R_AFF3_SHIFT: u64 = 48;

/// Decode an ICC_SGI1R_EL1 write into (INTID, target vCPU bitmap).
///
/// Only vCPUs that are powered on are targeted. Affinity levels above 0
/// are not modelled, so a target list is limited to 16 vCPUs.
pub fn sgi1r_targets(value: u64, self_vcpu: usize, vcpus: &VcpuTable) -> Result<(u32, u32)> {
    let intid = ((value >> SGI1R_INTID_SHIFT) & 0xf) as u32;
    let on = (0..vcpus.num_vcpus()).filter(|&v| vcpus.is_on(v));

    if value & SGI1R_IRM != 0 {
        let targets = on.filter(|&v| v != self_vcpu).fold(0, |acc, v| acc | (1 << v));
        return Ok((intid, targets));
    }

    let aff = ((value >> SGI1R_AFF1_SHIFT) & 0xff)
        | ((value >> SGI1R_AFF2_SHIFT) & 0xff)
        | ((value >> SGI1R_AFF3_SHIFT) & 0xff);
    if aff != 0 {
        log::error!("ICC_SGI1R_EL1 with non-zero affinity (0x{:x}) is not supported", value);
        return Err(VmmError::Unsupported("SGI affinity routing beyond Aff0"));
    }

    let list = (value & SGI1R_TARGET_LIST_MASK) as u32;
    let targets = on.filter(|&v| v < 16 && list & (1 << v) != 0).fold(0, |acc, v| acc | (1 << v));
    Ok((intid, targets))
}

/// Write the reset value of every banked EL1 register of `vcpu`.
pub fn reset_vcpu_regs<K: ArmKernel>(kernel: &mut K, vcpu: usize) {
    for reg in VcpuReg::ALL {
        kernel.write_vcpu_reg(vcpu, reg, reg.reset_value(vcpu));
    }
}

/// Log every banked EL1 register of `vcpu` at error level.
pub fn dump_vcpu_regs<K: ArmKernel>(kernel: &mut K, vcpu: usize) {
    log::error!("vCPU {} system registers:", vcpu);
    for reg in VcpuReg::ALL {
        log::error!("    {:<12} 0x{:016x}", reg.name(), kernel.read_vcpu_reg(vcpu, reg));
    }
}
