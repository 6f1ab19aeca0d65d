/// Virtual GICv3 Redistributor (GICR)
///
/// One 128KiB frame pair per vCPU: RD_base (control, identification,
/// wake) followed by SGI_base (banked SGI/PPI configuration). SGI_base
/// registers operate on the distributor's banked state of the vCPU that
/// owns the frame, not of the vCPU performing the access.
use super::distributor::{BitReg, DistAction, Distributor, GIC_COMPONENT_ID};
use crate::platform::GIC_REDIST_FRAME_SIZE;

// RD_base frame
pub const GICR_CTLR: u64 = 0x0000;
pub const GICR_IIDR: u64 = 0x0004;
pub const GICR_TYPER_LO: u64 = 0x0008;
pub const GICR_TYPER_HI: u64 = 0x000C;
pub const GICR_WAKER: u64 = 0x0014;
pub const GICR_PIDR_BASE: u64 = 0xFFD0;
pub const GICR_PIDR_END: u64 = 0xFFEC;
pub const GICR_CIDR_BASE: u64 = 0xFFF0;
pub const GICR_CIDR_END: u64 = 0xFFFC;

// SGI_base frame (RD_base + 64KiB)
pub const GICR_SGI_BASE: u64 = 0x1_0000;
pub const GICR_IGROUPR0: u64 = GICR_SGI_BASE + 0x080;
pub const GICR_ISENABLER0: u64 = GICR_SGI_BASE + 0x100;
pub const GICR_ICENABLER0: u64 = GICR_SGI_BASE + 0x180;
pub const GICR_ISPENDR0: u64 = GICR_SGI_BASE + 0x200;
pub const GICR_ICPENDR0: u64 = GICR_SGI_BASE + 0x280;
pub const GICR_ISACTIVER0: u64 = GICR_SGI_BASE + 0x300;
pub const GICR_ICACTIVER0: u64 = GICR_SGI_BASE + 0x380;
pub const GICR_IPRIORITYR_BASE: u64 = GICR_SGI_BASE + 0x400;
pub const GICR_IPRIORITYR_END: u64 = GICR_SGI_BASE + 0x41C;
pub const GICR_ICFGR0: u64 = GICR_SGI_BASE + 0xC00;
pub const GICR_ICFGR1: u64 = GICR_SGI_BASE + 0xC04;

const GICR_IIDR_VALUE: u32 = 0x0001_143B;
/// PIDR4..7 then PIDR0..3
const GICR_PIDR: [u32; 8] = [0x44, 0, 0, 0, 0x93, 0xB4, 0x3B, 0];
/// TYPER.Last
const GICR_TYPER_LAST: u32 = 1 << 4;

/// Redistributor frames of all vCPUs
#[derive(Debug)]
pub struct Redistributor {
    num_vcpus: usize,
}

impl Redistributor {
    pub fn new(num_vcpus: usize) -> Self {
        Self { num_vcpus }
    }

    /// Size of the MMIO window covering every frame
    pub fn region_size(&self) -> u64 {
        GIC_REDIST_FRAME_SIZE * self.num_vcpus as u64
    }

    /// Split a region offset into (owning vCPU, offset within its frame).
    pub fn frame(&self, offset: u64) -> Option<(usize, u64)> {
        let vcpu = (offset / GIC_REDIST_FRAME_SIZE) as usize;
        if vcpu >= self.num_vcpus {
            return None;
        }
        Some((vcpu, (offset % GIC_REDIST_FRAME_SIZE) & !0x3))
    }

    fn bit_reg_at(offset: u64) -> Option<BitReg> {
        match offset {
            GICR_IGROUPR0 => Some(BitReg::Group),
            GICR_ISENABLER0 => Some(BitReg::SetEnable),
            GICR_ICENABLER0 => Some(BitReg::ClearEnable),
            GICR_ISPENDR0 => Some(BitReg::SetPending),
            GICR_ICPENDR0 => Some(BitReg::ClearPending),
            GICR_ISACTIVER0 => Some(BitReg::SetActive),
            GICR_ICACTIVER0 => Some(BitReg::ClearActive),
            _ => None,
        }
    }

    pub fn read(&self, dist: &Distributor, offset: u64) -> Option<u32> {
        let (vcpu, off) = self.frame(offset)?;
        if let Some(reg) = Self::bit_reg_at(off) {
            return Some(dist.bit_read(reg, vcpu, 0));
        }
        let value = match off {
            GICR_CTLR => 0,
            GICR_IIDR => GICR_IIDR_VALUE,
            GICR_TYPER_LO => {
                let last = if vcpu + 1 == self.num_vcpus { GICR_TYPER_LAST } else { 0 };
                ((vcpu as u32) << 8) | last
            }
            // Affinity: Aff0 = vCPU id
            GICR_TYPER_HI => vcpu as u32,
            // ProcessorSleep and ChildrenAsleep clear: always awake
            GICR_WAKER => 0,
            GICR_PIDR_BASE..=GICR_PIDR_END => GICR_PIDR[((off - GICR_PIDR_BASE) / 4) as usize],
            GICR_CIDR_BASE..=GICR_CIDR_END => GIC_COMPONENT_ID[((off - GICR_CIDR_BASE) / 4) as usize],
            GICR_IPRIORITYR_BASE..=GICR_IPRIORITYR_END => {
                dist.priority_read(vcpu, ((off - GICR_IPRIORITYR_BASE) / 4) as usize)
            }
            GICR_ICFGR0 => dist.config_read(0),
            GICR_ICFGR1 => dist.config_read(1),
            _ => return None,
        };
        Some(value)
    }

    pub fn write(&self, dist: &mut Distributor, offset: u64, data: u64, mask: u64) -> Option<DistAction> {
        let (vcpu, off) = self.frame(offset)?;
        if let Some(reg) = Self::bit_reg_at(off) {
            return Some(dist.bit_write(reg, vcpu, 0, data, mask));
        }
        match off {
            GICR_CTLR | GICR_IIDR | GICR_TYPER_LO | GICR_TYPER_HI => {}
            GICR_WAKER => log::trace!("vGIC: ignoring GICR_WAKER write on vCPU {}", vcpu),
            GICR_PIDR_BASE..=GICR_PIDR_END | GICR_CIDR_BASE..=GICR_CIDR_END => {}
            GICR_IPRIORITYR_BASE..=GICR_IPRIORITYR_END => {
                dist.priority_write(vcpu, ((off - GICR_IPRIORITYR_BASE) / 4) as usize, data, mask);
            }
            // SGI configuration is fixed
            GICR_ICFGR0 => {}
            GICR_ICFGR1 => dist.config_write(1, data, mask),
            _ => return None,
        }
        Some(DistAction::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::aarch64::vgic::distributor::GicVersion;

    #[test]
    fn test_typer_per_frame() {
        let dist = Distributor::new(GicVersion::V3, 2);
        let rd = Redistributor::new(2);
        assert_eq!(rd.read(&dist, GICR_TYPER_LO), Some(0));
        assert_eq!(rd.read(&dist, GIC_REDIST_FRAME_SIZE + GICR_TYPER_LO), Some((1 << 8) | GICR_TYPER_LAST));
        assert_eq!(rd.read(&dist, GIC_REDIST_FRAME_SIZE + GICR_TYPER_HI), Some(1));
        assert_eq!(rd.read(&dist, 2 * GIC_REDIST_FRAME_SIZE), None);
        assert_eq!(rd.region_size(), 2 * GIC_REDIST_FRAME_SIZE);
    }

    #[test]
    fn test_sgi_frame_targets_owner() {
        let mut dist = Distributor::new(GicVersion::V3, 2);
        let rd = Redistributor::new(2);
        let action = rd.write(&mut dist, GIC_REDIST_FRAME_SIZE + GICR_ISENABLER0, 1 << 27, 0xffff_ffff);
        assert_eq!(
            action,
            Some(DistAction::Enable { vcpu: 1, first_irq: 0, bits: 1 << 27 })
        );
        assert_eq!(rd.read(&dist, 0xFFE0), Some(0x93));
    }
}
