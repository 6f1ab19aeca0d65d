//! AArch64 VMM core
//!
//! Owns the guest memory map, the fault region registry, the vGIC and the
//! passthrough table of one guest, and turns every trap the kernel
//! delivers into emulation.

use super::decode::{width_mask, MmioAccess};
use super::defs::*;
use super::exception::{ec_name, fsr_is_write, hsr_ec, hsr_iss, ArmFault, SYSCALL_NOP, SYSCALL_PA_TO_IPA};
use super::kernel::ArmKernel;
use super::psci::{self, PsciOutcome, SMC_SERVICE_MASK, SMC_SERVICE_SHIFT, SMC_SERVICE_STD};
use super::regs::UserContext;
use super::sysreg::{self, SysRegAccess};
use super::vgic::distributor::GicVersion;
use super::vgic::{self, Vgic};
use crate::arch::traits::{VcpuContextOps, Vmm};
use crate::devices::{self, MmioDevice};
use crate::error::Result;
use crate::fault::{FaultRegistry, RegionHandler};
use crate::memory::GuestMemoryMap;
use crate::platform::{GIC_DIST_PADDR, GIC_REDIST_PADDR, GIC_V2_DIST_SIZE, GIC_V3_DIST_SIZE};
use crate::vcpu::{VcpuRunState, VcpuTable};
use crate::virq::{PassthroughMap, VirqAck};

/// VMM context of an ARM guest
pub struct ArmVmm<K: ArmKernel, D: MmioDevice> {
    kernel: K,
    mem: GuestMemoryMap,
    vcpus: VcpuTable,
    vgic: Vgic,
    regions: FaultRegistry<RegionHandler<D>>,
    passthrough: PassthroughMap,
}

impl<K: ArmKernel, D: MmioDevice> ArmVmm<K, D> {
    /// Create a VMM using the GIC version selected by the cargo features.
    pub fn new(kernel: K, mem: GuestMemoryMap, num_vcpus: usize) -> Result<Self> {
        Self::with_gic_version(kernel, mem, num_vcpus, vgic::configured_version())
    }

    pub fn with_gic_version(kernel: K, mem: GuestMemoryMap, num_vcpus: usize, version: GicVersion) -> Result<Self> {
        Ok(Self {
            kernel,
            mem,
            vcpus: VcpuTable::new(num_vcpus)?,
            vgic: Vgic::new(version, num_vcpus)?,
            regions: FaultRegistry::new(),
            passthrough: PassthroughMap::new(),
        })
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    pub fn kernel_mut(&mut self) -> &mut K {
        &mut self.kernel
    }

    pub fn memory(&self) -> &GuestMemoryMap {
        &self.mem
    }

    pub fn vcpus(&self) -> &VcpuTable {
        &self.vcpus
    }

    pub fn vgic(&self) -> &Vgic {
        &self.vgic
    }

    pub fn regions(&self) -> &FaultRegistry<RegionHandler<D>> {
        &self.regions
    }

    /// Emulate a stage-2 data abort through the fault region registry.
    fn handle_vm_fault(&mut self, vcpu: usize, addr: u64, fsr: u64, ip: u64, prefetch: bool) -> bool {
        let mut regs = self.kernel.read_regs(vcpu);
        if !prefetch {
            if let Some(access) = MmioAccess::from_iss(fsr as u32) {
                if self.emulate_access(vcpu, addr, access, &mut regs) {
                    regs.advance_pc(AARCH64_INSN_SIZE);
                    self.kernel.write_regs(vcpu, &regs);
                    return true;
                }
            } else {
                log::error!("data abort at 0x{:x} without a valid syndrome (fsr 0x{:x})", addr, fsr);
            }
        }

        log::error!(
            "unhandled VM fault on vCPU {}: addr 0x{:x}, fsr 0x{:x}, ip 0x{:x}, {}, {}",
            vcpu,
            addr,
            fsr,
            ip,
            if prefetch { "prefetch" } else { "data" },
            if fsr_is_write(fsr) { "write" } else { "read" }
        );
        self.dump_vcpu(vcpu, &regs);
        false
    }

    fn emulate_access(&mut self, vcpu: usize, addr: u64, access: MmioAccess, regs: &mut UserContext) -> bool {
        let online = (0..self.vcpus.num_vcpus())
            .filter(|&v| self.vcpus.is_on(v))
            .fold(0u32, |acc, v| acc | (1 << v));
        let Self {
            kernel,
            vgic,
            regions,
            ..
        } = self;
        let size = access.size();
        let store = match access {
            MmioAccess::Store { reg, .. } => Some(regs.get_reg(reg) & width_mask(size)),
            MmioAccess::Load { .. } => None,
        };

        let Some((offset, handler)) = regions.lookup_mut(addr) else {
            return false;
        };

        let value = match handler {
            RegionHandler::VgicDist => match store {
                Some(v) => vgic.dist_write(kernel, vcpu, offset, v, size, online).then_some(0),
                None => vgic.dist_read(vcpu, offset, size),
            },
            RegionHandler::VgicRedist => match store {
                Some(v) => vgic.redist_write(kernel, offset, v, size).then_some(0),
                None => vgic.redist_read(offset, size),
            },
            RegionHandler::Device(dev) => match devices::access(dev, vcpu, offset, size, store) {
                Some((value, irq)) => {
                    if let Some(irq) = irq {
                        let target = if irq < 32 { vcpu } else { vgic.dist().route_spi(irq) };
                        if let Err(e) = vgic.inject(kernel, target, irq) {
                            log::warn!("device IRQ {} not delivered: {}", irq, e);
                        }
                        dev.ack_irq();
                    }
                    Some(value)
                }
                None => None,
            },
            RegionHandler::Plic | RegionHandler::Lapic | RegionHandler::Ioapic => {
                log::error!("interrupt controller region at 0x{:x} does not belong to this architecture", addr);
                None
            }
        };

        let Some(value) = value else {
            return false;
        };
        if let MmioAccess::Load { reg, .. } = access {
            regs.set_reg(reg, access.extend(value));
        }
        true
    }

    fn handle_vcpu_fault(&mut self, vcpu: usize, hsr: u64) -> bool {
        let ec = hsr_ec(hsr);
        match ec {
            EC_SMC64 => self.handle_smc(vcpu),
            EC_WFI_WFE => {
                self.vcpus.set_run_state(vcpu, VcpuRunState::WaitingForIrq);
                true
            }
            EC_MSR_MRS => self.handle_sysreg(vcpu, hsr_iss(hsr)),
            _ => {
                log::error!("unhandled vCPU fault on vCPU {}: HSR 0x{:x} ({})", vcpu, hsr, ec_name(ec));
                let regs = self.kernel.read_regs(vcpu);
                self.dump_vcpu(vcpu, &regs);
                false
            }
        }
    }

    fn handle_smc(&mut self, vcpu: usize) -> bool {
        let mut regs = self.kernel.read_regs(vcpu);
        let service = (regs.gpr.x0 >> SMC_SERVICE_SHIFT) & SMC_SERVICE_MASK;
        if service != SMC_SERVICE_STD {
            log::error!("unhandled SMC service {} (function ID 0x{:x}) from vCPU {}", service, regs.gpr.x0, vcpu);
            self.dump_vcpu(vcpu, &regs);
            return false;
        }

        match psci::handle_psci(&mut self.kernel, &mut self.vcpus, vcpu, &mut regs) {
            PsciOutcome::Resume => {
                regs.advance_pc(AARCH64_INSN_SIZE);
                self.kernel.write_regs(vcpu, &regs);
                true
            }
            PsciOutcome::SystemOff => {
                self.guest_stop(vcpu);
                true
            }
            PsciOutcome::Unhandled => {
                self.dump_vcpu(vcpu, &regs);
                false
            }
        }
    }

    fn handle_sysreg(&mut self, vcpu: usize, iss: u32) -> bool {
        let access = SysRegAccess::from_iss(iss);
        let mut regs = self.kernel.read_regs(vcpu);
        if !access.read && access.is_icc_sgi1r() {
            match sysreg::sgi1r_targets(regs.get_reg(access.rt), vcpu, &self.vcpus) {
                Ok((intid, targets)) => {
                    for target in (0..self.vcpus.num_vcpus()).filter(|v| targets & (1 << v) != 0) {
                        if let Err(e) = self.virq_inject(target, intid) {
                            log::warn!("SGI {} to vCPU {}: {}", intid, target, e);
                        }
                    }
                    regs.advance_pc(AARCH64_INSN_SIZE);
                    self.kernel.write_regs(vcpu, &regs);
                    return true;
                }
                Err(e) => log::error!("ICC_SGI1R_EL1 write from vCPU {}: {}", vcpu, e),
            }
        }

        log::error!(
            "unhandled system register {} on vCPU {}: op0 {} op1 {} CRn {} CRm {} op2 {} (x{})",
            if access.read { "read" } else { "write" },
            vcpu,
            access.op0,
            access.op1,
            access.crn,
            access.crm,
            access.op2,
            access.rt
        );
        self.dump_vcpu(vcpu, &regs);
        false
    }

    fn handle_unknown_syscall(&mut self, vcpu: usize, syscall: u64, ip: u64) -> bool {
        match syscall {
            SYSCALL_PA_TO_IPA | SYSCALL_NOP => {
                let mut regs = self.kernel.read_regs(vcpu);
                regs.advance_pc(AARCH64_INSN_SIZE);
                self.kernel.write_regs(vcpu, &regs);
                true
            }
            _ => {
                log::error!("unknown syscall {} from vCPU {} at ip 0x{:x}", syscall, vcpu, ip);
                let regs = self.kernel.read_regs(vcpu);
                self.dump_vcpu(vcpu, &regs);
                false
            }
        }
    }

    fn dump_vcpu(&mut self, vcpu: usize, regs: &UserContext) {
        regs.dump(vcpu);
        sysreg::dump_vcpu_regs(&mut self.kernel, vcpu);
    }
}

impl<K: ArmKernel, D: MmioDevice> Vmm for ArmVmm<K, D> {
    type Fault = ArmFault;
    type Device = D;

    fn controller_init(&mut self) -> Result<()> {
        for vcpu in 0..self.vcpus.num_vcpus() {
            self.vgic.register(vcpu, PPI_VTIMER_IRQ, VirqAck::Vppi)?;
            self.vgic.register(vcpu, SGI_RESCHEDULE_IRQ, VirqAck::Nop)?;
            self.vgic.register(vcpu, SGI_FUNC_CALL, VirqAck::Nop)?;
        }

        match self.vgic.version() {
            GicVersion::V2 => {
                self.regions.register(GIC_DIST_PADDR, GIC_V2_DIST_SIZE, RegionHandler::VgicDist)?;
            }
            GicVersion::V3 => {
                self.regions.register(GIC_DIST_PADDR, GIC_V3_DIST_SIZE, RegionHandler::VgicDist)?;
                let size = self.vgic.redist().region_size();
                self.regions.register(GIC_REDIST_PADDR, size, RegionHandler::VgicRedist)?;
            }
        }
        log::info!("vGIC ({:?}) initialised for {} vCPU(s)", self.vgic.version(), self.vcpus.num_vcpus());
        Ok(())
    }

    fn register_region(&mut self, base: u64, size: u64, device: D) -> Result<usize> {
        self.regions.register(base, size, RegionHandler::Device(device))
    }

    fn virq_register(&mut self, vcpu: usize, irq: u32, ack: VirqAck) -> Result<()> {
        self.vgic.register(vcpu, irq, ack)
    }

    fn virq_inject(&mut self, vcpu: usize, irq: u32) -> Result<()> {
        self.vgic.inject(&mut self.kernel, vcpu, irq)?;
        if self.vcpus.run_state(vcpu) != Some(VcpuRunState::Running) {
            self.vcpus.set_run_state(vcpu, VcpuRunState::Running);
        }
        Ok(())
    }

    fn register_passthrough(&mut self, vcpu: usize, irq: u32, channel: u32) -> Result<()> {
        self.vcpus.check(vcpu)?;
        self.passthrough.check_free(channel)?;
        self.vgic.register(vcpu, irq, VirqAck::Passthrough(channel))?;
        self.passthrough.bind(channel, vcpu, irq)
    }

    fn handle_passthrough(&mut self, channel: u32) -> Result<()> {
        let entry = self.passthrough.lookup(channel)?;
        self.virq_inject(entry.vcpu, entry.irq)
    }

    fn guest_start(&mut self, vcpu: usize, pc: u64, dtb: u64, initrd: u64) -> Result<()> {
        self.vcpus.check(vcpu)?;
        log::info!(
            "starting guest on vCPU {} at 0x{:x}, DTB 0x{:x}, initrd 0x{:x}",
            vcpu, pc, dtb, initrd
        );
        let ctx = UserContext::linux_boot(pc, dtb);
        self.kernel.write_regs(vcpu, &ctx);
        self.vcpus.set_on(vcpu, true);
        self.kernel.vcpu_restart(vcpu, pc);
        Ok(())
    }

    fn guest_stop(&mut self, vcpu: usize) {
        log::info!("stopping guest vCPU {}", vcpu);
        self.kernel.vcpu_stop(vcpu);
        self.vcpus.set_on(vcpu, false);
    }

    fn guest_restart(&mut self, vcpu: usize, ram_gpa: u64, ram_size: u64) -> Result<()> {
        self.vcpus.check(vcpu)?;
        log::info!("restarting guest vCPU {}", vcpu);
        self.guest_stop(vcpu);
        self.mem.zero(ram_gpa, ram_size)?;
        sysreg::reset_vcpu_regs(&mut self.kernel, vcpu);
        self.kernel.write_regs(vcpu, &UserContext::default());
        self.vgic.reset();
        Ok(())
    }

    fn fault_handle(&mut self, vcpu: usize, fault: &ArmFault) -> bool {
        if let Err(e) = self.vcpus.check(vcpu) {
            log::error!("fault for {}", e);
            return false;
        }
        match *fault {
            // vCPU exceptions
            ArmFault::VcpuFault { hsr } => self.handle_vcpu_fault(vcpu, hsr),
            ArmFault::UnknownSyscall { syscall, ip } => self.handle_unknown_syscall(vcpu, syscall, ip),
            ArmFault::UserException { ip, number } => {
                log::error!("user exception {} on vCPU {} at ip 0x{:x}", number, vcpu, ip);
                let regs = self.kernel.read_regs(vcpu);
                self.dump_vcpu(vcpu, &regs);
                true
            }
            // virtual interrupt events
            ArmFault::VppiEvent { irq } => {
                if let Err(e) = self.virq_inject(vcpu, irq) {
                    log::error!("VPPI {} on vCPU {} not injected: {}", irq, vcpu, e);
                    self.kernel.ack_vppi(vcpu, irq);
                }
                true
            }
            ArmFault::VgicMaintenance { idx } => match self.vgic.maintenance(&mut self.kernel, vcpu, idx) {
                Ok(()) => true,
                Err(e) => {
                    log::error!("vGIC maintenance on vCPU {} LR {} failed: {}", vcpu, idx, e);
                    false
                }
            },
            // memory accesses
            ArmFault::VmFault { addr, fsr, ip, prefetch } => self.handle_vm_fault(vcpu, addr, fsr, ip, prefetch),
            ArmFault::Unknown { label } => {
                log::error!("unknown fault label {} on vCPU {}", label, vcpu);
                false
            }
        }
    }
}

impl<K: ArmKernel, D: MmioDevice> core::fmt::Debug for ArmVmm<K, D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ArmVmm")
            .field("vcpus", &self.vcpus)
            .field("gic", &self.vgic.version())
            .field("regions", &self.regions.len())
            .finish()
    }
}

