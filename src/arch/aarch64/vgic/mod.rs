//! Virtual GIC
//!
//! Tracks which virtual IRQs exist, which are pending and which sit in the
//! vCPU's list registers. The register models live in [`distributor`] and
//! [`redistributor`]; this module applies their side effects and talks to
//! the kernel's list register interface.
//!
//! An injected IRQ is marked pending and appended to the vCPU's overflow
//! queue; the head of the queue is moved into a list register whenever
//! one is free. A maintenance interrupt retires a list register, clears the
//! pending bit, runs the IRQ's ack and refills the freed register from the
//! queue, so an IRQ waiting in the queue is never lost.

pub mod distributor;
pub mod redistributor;
pub mod virq;

use distributor::{DistAction, Distributor, GicVersion, NUM_IRQS};
use redistributor::Redistributor;
use virq::{VgicVcpu, VirqHandle, NUM_LIST_REGS, NUM_LOCAL_VIRQS, NUM_VSPIS};

use super::decode::Lane;
use super::kernel::ArmKernel;
use crate::error::{Result, VmmError};
use crate::platform::MAX_VCPUS;
use crate::util::freelist::Freelist;
use crate::virq::VirqAck;

/// Version selected by the cargo features; `gic_v3` wins over `gic_v2`.
pub fn configured_version() -> GicVersion {
    if cfg!(feature = "gic_v3") {
        GicVersion::V3
    } else {
        GicVersion::V2
    }
}

/// Virtual GIC state for all vCPUs
pub struct Vgic {
    num_vcpus: usize,
    dist: Distributor,
    redist: Redistributor,
    vcpus: [VgicVcpu; MAX_VCPUS],
    vspis: [Option<VirqHandle>; NUM_VSPIS],
    spi_slots: Freelist<NUM_VSPIS>,
}

impl Vgic {
    pub fn new(version: GicVersion, num_vcpus: usize) -> Result<Self> {
        if num_vcpus == 0 || num_vcpus > MAX_VCPUS {
            return Err(VmmError::InvalidVcpu(num_vcpus));
        }
        Ok(Self {
            num_vcpus,
            dist: Distributor::new(version, num_vcpus),
            redist: Redistributor::new(num_vcpus),
            vcpus: core::array::from_fn(|_| VgicVcpu::new()),
            vspis: [None; NUM_VSPIS],
            spi_slots: Freelist::new(),
        })
    }

    pub fn version(&self) -> GicVersion {
        self.dist.version()
    }

    pub fn dist(&self) -> &Distributor {
        &self.dist
    }

    pub fn redist(&self) -> &Redistributor {
        &self.redist
    }

    /// Per-vCPU list register and queue state.
    pub fn vcpu(&self, vcpu: usize) -> Option<&VgicVcpu> {
        self.vcpus[..self.num_vcpus].get(vcpu)
    }

    fn check_vcpu(&self, vcpu: usize) -> Result<()> {
        if vcpu < self.num_vcpus {
            Ok(())
        } else {
            Err(VmmError::InvalidVcpu(vcpu))
        }
    }

    /// Reset distributor state and drop everything queued or in flight.
    /// Registered IRQs survive.
    pub fn reset(&mut self) {
        self.dist.reset();
        for vcpu in self.vcpus.iter_mut() {
            vcpu.lr_shadow = [None; NUM_LIST_REGS];
            while vcpu.irq_queue.dequeue().is_some() {}
        }
    }

    /// Register `irq` on `vcpu`. SPIs are global; `vcpu` only selects the
    /// banked slot of SGIs and PPIs.
    pub fn register(&mut self, vcpu: usize, irq: u32, ack: VirqAck) -> Result<()> {
        self.check_vcpu(vcpu)?;
        let handle = VirqHandle { virq: irq, ack };

        if (irq as usize) < NUM_LOCAL_VIRQS {
            let slot = &mut self.vcpus[vcpu].local_virqs[irq as usize];
            if slot.is_some() {
                return Err(VmmError::IrqAlreadyRegistered(irq));
            }
            *slot = Some(handle);
            return Ok(());
        }

        if irq as usize >= NUM_IRQS {
            return Err(VmmError::InvalidIrq(irq));
        }
        if self.vspis.iter().flatten().any(|h| h.virq == irq) {
            return Err(VmmError::IrqAlreadyRegistered(irq));
        }
        let Some(idx) = self.spi_slots.alloc() else {
            log::error!("vGIC: no free SPI slot for IRQ {}", irq);
            return Err(VmmError::InvalidIrq(irq));
        };
        self.vspis[idx] = Some(handle);
        Ok(())
    }

    fn handle(&self, vcpu: usize, irq: u32) -> Option<VirqHandle> {
        if (irq as usize) < NUM_LOCAL_VIRQS {
            self.vcpus.get(vcpu)?.local_virqs[irq as usize]
        } else {
            self.vspis.iter().flatten().find(|h| h.virq == irq).copied()
        }
    }

    pub fn is_registered(&self, vcpu: usize, irq: u32) -> bool {
        self.handle(vcpu, irq).is_some()
    }

    /// Make `irq` pending on `vcpu` and present it to the guest as soon as
    /// a list register is free.
    pub fn inject<K: ArmKernel>(&mut self, kernel: &mut K, vcpu: usize, irq: u32) -> Result<()> {
        self.check_vcpu(vcpu)?;
        let handle = self.handle(vcpu, irq).ok_or(VmmError::IrqNotRegistered(irq))?;
        if !self.dist.enabled() || !self.dist.is_enabled(vcpu, irq) {
            return Err(VmmError::IrqNotEnabled(irq));
        }
        if self.dist.is_pending(vcpu, irq) {
            return Ok(());
        }

        self.dist.set_pending(vcpu, irq, true);
        if !self.vcpus[vcpu].irq_queue.enqueue(handle) {
            self.dist.set_pending(vcpu, irq, false);
            log::error!("vGIC: IRQ queue of vCPU {} full, dropping IRQ {}", vcpu, irq);
            return Err(VmmError::IrqQueueFull(irq));
        }

        if let Some(idx) = self.vcpus[vcpu].free_lr() {
            if let Some(next) = self.vcpus[vcpu].irq_queue.dequeue() {
                self.load_lr(kernel, vcpu, idx, next)?;
            }
        }
        Ok(())
    }

    fn load_lr<K: ArmKernel>(&mut self, kernel: &mut K, vcpu: usize, idx: usize, handle: VirqHandle) -> Result<()> {
        let group = match self.dist.version() {
            GicVersion::V2 => 0,
            GicVersion::V3 => 1,
        };
        log::trace!("vGIC: IRQ {} -> vCPU {} LR {}", handle.virq, vcpu, idx);
        if !kernel.inject_irq(vcpu, handle.virq as u16, 0, group, idx as u8) {
            log::error!("vGIC: kernel rejected IRQ {} in LR {} of vCPU {}", handle.virq, idx, vcpu);
            return Err(VmmError::Unsupported("list register write rejected by the kernel"));
        }
        self.vcpus[vcpu].lr_shadow[idx] = Some(handle);
        Ok(())
    }

    fn run_ack<K: ArmKernel>(kernel: &mut K, vcpu: usize, handle: VirqHandle) {
        match handle.ack {
            VirqAck::Nop => {}
            VirqAck::Vppi => kernel.ack_vppi(vcpu, handle.virq),
            VirqAck::Passthrough(channel) => kernel.irq_ack(channel),
        }
    }

    /// The guest completed the IRQ in list register `idx`.
    pub fn maintenance<K: ArmKernel>(&mut self, kernel: &mut K, vcpu: usize, idx: usize) -> Result<()> {
        self.check_vcpu(vcpu)?;
        let slot = self.vcpus[vcpu]
            .lr_shadow
            .get_mut(idx)
            .ok_or(VmmError::Unsupported("maintenance for a list register out of range"))?;
        let Some(handle) = slot.take() else {
            log::error!("vGIC: maintenance for empty LR {} on vCPU {}", idx, vcpu);
            return Err(VmmError::Unsupported("maintenance for an empty list register"));
        };

        // Clear pending before the ack so a re-injection from the ack
        // sees the IRQ as free.
        self.dist.set_pending(vcpu, handle.virq, false);
        Self::run_ack(kernel, vcpu, handle);

        if let Some(next) = self.vcpus[vcpu].irq_queue.dequeue() {
            self.load_lr(kernel, vcpu, idx, next)?;
        }
        Ok(())
    }

    fn enable_irq<K: ArmKernel>(&mut self, kernel: &mut K, vcpu: usize, irq: u32) {
        log::debug!("vGIC: enabling IRQ {} on vCPU {}", irq, vcpu);
        self.dist.set_enabled(vcpu, irq, true);
        if let Some(handle) = self.handle(vcpu, irq) {
            if !self.dist.is_pending(vcpu, irq) {
                Self::run_ack(kernel, vcpu, handle);
            }
        }
    }

    fn disable_irq(&mut self, vcpu: usize, irq: u32) {
        // SGIs cannot be disabled
        if irq < 16 {
            return;
        }
        log::debug!("vGIC: disabling IRQ {} on vCPU {}", irq, vcpu);
        self.dist.set_enabled(vcpu, irq, false);
    }

    /// Apply a register side effect. SGIs only reach vCPUs in `online`.
    fn apply<K: ArmKernel>(&mut self, kernel: &mut K, action: DistAction, online: u32) -> bool {
        match action {
            DistAction::Done => {}
            DistAction::Enable { vcpu, first_irq, bits } => {
                for irq in set_bits(first_irq, bits) {
                    self.enable_irq(kernel, vcpu, irq);
                }
            }
            DistAction::Disable { vcpu, first_irq, bits } => {
                for irq in set_bits(first_irq, bits) {
                    self.disable_irq(vcpu, irq);
                }
            }
            DistAction::SetPending { vcpu, first_irq, bits } => {
                for irq in set_bits(first_irq, bits) {
                    if let Err(e) = self.inject(kernel, vcpu, irq) {
                        log::warn!("vGIC: ISPENDR for IRQ {} on vCPU {}: {}", irq, vcpu, e);
                    }
                }
            }
            DistAction::Sgi { intid, targets } => {
                let targets = targets & online;
                for target in (0..self.num_vcpus).filter(|v| targets & (1 << v) != 0) {
                    if let Err(e) = self.inject(kernel, target, intid) {
                        log::warn!("vGIC: SGI {} to vCPU {}: {}", intid, target, e);
                    }
                }
            }
        }
        true
    }

    /// Emulate a distributor load. `size` of 8 is only valid for IROUTER.
    pub fn dist_read(&self, vcpu: usize, offset: u64, size: u8) -> Option<u64> {
        if size == 8 {
            return self.dist.irouter_read(offset);
        }
        let lane = Lane::new(offset, size);
        self.dist
            .read(vcpu, offset)
            .map(|word| lane.load_value(u64::from(word)))
    }

    /// Emulate a distributor store of the register value `value`.
    /// `online` is the bitmap of powered-on vCPUs.
    pub fn dist_write<K: ArmKernel>(
        &mut self,
        kernel: &mut K,
        vcpu: usize,
        offset: u64,
        value: u64,
        size: u8,
        online: u32,
    ) -> bool {
        if size == 8 {
            return self.dist.irouter_write(offset, value);
        }
        let lane = Lane::new(offset, size);
        match self.dist.write(vcpu, offset, lane.store_data(value), lane.mask) {
            Some(action) => self.apply(kernel, action, online),
            None => {
                log::warn!("vGIC: write to unknown distributor register 0x{:x}", offset);
                false
            }
        }
    }

    pub fn redist_read(&self, offset: u64, size: u8) -> Option<u64> {
        if size > 4 {
            return None;
        }
        let lane = Lane::new(offset, size);
        self.redist
            .read(&self.dist, offset)
            .map(|word| lane.load_value(u64::from(word)))
    }

    pub fn redist_write<K: ArmKernel>(&mut self, kernel: &mut K, offset: u64, value: u64, size: u8) -> bool {
        if size > 4 {
            return false;
        }
        let lane = Lane::new(offset, size);
        match self.redist.write(&mut self.dist, offset, lane.store_data(value), lane.mask) {
            Some(action) => self.apply(kernel, action, u32::MAX),
            None => {
                log::warn!("vGIC: write to unknown redistributor register 0x{:x}", offset);
                false
            }
        }
    }
}

/// IRQ numbers of the set bits in a 32-bit register word.
fn set_bits(first_irq: u32, bits: u32) -> impl Iterator<Item = u32> {
    (0..32).filter(move |b| bits & (1 << b) != 0).map(move |b| first_irq + b)
}
