//! RISC-V VMM core
//!
//! Owns the guest memory map, the fault region registry, the PLIC and the
//! passthrough table of one guest. Guest page faults are emulated from the
//! transformed instruction in `htinst`; ecalls are SBI calls (see
//! [`super::sbi`]).

use super::decode::{decode_htinst, extend_load, DecodedInstruction};
use super::exception::{
    cause_name, RiscvFault, CAUSE_ECALL_VS, CAUSE_GUEST_INSN_PAGE_FAULT, CAUSE_GUEST_LOAD_PAGE_FAULT,
    CAUSE_GUEST_STORE_PAGE_FAULT,
};
use super::kernel::RiscvKernel;
use super::plic::{Plic, PlicAction, PLIC_NUM_SOURCES};
use super::regs::{RiscvRegs, RiscvVcpuReg, SIP_SEIP};
use crate::arch::traits::{VcpuContextOps, Vmm};
use crate::devices::{self, MmioDevice};
use crate::error::{Result, VmmError};
use crate::fault::{FaultRegistry, RegionHandler};
use crate::memory::GuestMemoryMap;
use crate::platform::{MAX_VCPUS, PLIC_PADDR, PLIC_SIZE};
use crate::util::LineBuffer;
use crate::vcpu::VcpuTable;
use crate::virq::{PassthroughMap, VirqAck};

/// A registered PLIC source
#[derive(Debug, Clone, Copy)]
struct SourceRoute {
    vcpu: usize,
    ack: VirqAck,
}

/// VMM context of a RISC-V guest
pub struct RiscvVmm<K: RiscvKernel, D: MmioDevice> {
    pub(super) kernel: K,
    pub(super) mem: GuestMemoryMap,
    pub(super) vcpus: VcpuTable,
    regions: FaultRegistry<RegionHandler<D>>,
    passthrough: PassthroughMap,
    plic: Plic,
    sources: [Option<SourceRoute>; PLIC_NUM_SOURCES],
    /// SBI console output
    pub(super) console: LineBuffer,
    /// Harts with an armed SBI timer
    pub(super) timer_waiting: [bool; MAX_VCPUS],
}

impl<K: RiscvKernel, D: MmioDevice> RiscvVmm<K, D> {
    pub fn new(kernel: K, mem: GuestMemoryMap, num_vcpus: usize) -> Result<Self> {
        Ok(Self {
            kernel,
            mem,
            vcpus: VcpuTable::new(num_vcpus)?,
            regions: FaultRegistry::new(),
            passthrough: PassthroughMap::new(),
            plic: Plic::new(),
            sources: [None; PLIC_NUM_SOURCES],
            console: LineBuffer::new("SBI"),
            timer_waiting: [false; MAX_VCPUS],
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

    pub fn plic(&self) -> &Plic {
        &self.plic
    }

    pub fn regions(&self) -> &FaultRegistry<RegionHandler<D>> {
        &self.regions
    }

    /// Set and clear bits of the virtual SIP of `hart`.
    pub(super) fn update_sip(&mut self, hart: usize, set: u64, clear: u64) {
        let old = self.kernel.read_vcpu_reg(hart, RiscvVcpuReg::Sip);
        let new = (old & !clear) | set;
        if new != old {
            self.kernel.write_vcpu_reg(hart, RiscvVcpuReg::Sip, new);
        }
    }

    /// Reflect the PLIC output of every hart in its SEIP bit.
    fn sync_eip(&mut self) {
        for hart in 0..self.vcpus.num_vcpus() {
            if self.plic.eip(hart) {
                self.update_sip(hart, SIP_SEIP, 0);
            } else {
                self.update_sip(hart, 0, SIP_SEIP);
            }
        }
    }

    pub(super) fn reset_vcpu_regs(&mut self, vcpu: usize) {
        for reg in RiscvVcpuReg::ALL {
            self.kernel.write_vcpu_reg(vcpu, reg, reg.reset_value());
        }
    }

    fn run_ack(&mut self, source: u32) {
        let Some(route) = self.sources.get(source as usize).copied().flatten() else {
            return;
        };
        match route.ack {
            VirqAck::Nop => {}
            VirqAck::Passthrough(channel) => self.kernel.irq_ack(channel),
            VirqAck::Vppi => log::warn!("PLIC source {} has a VPPI ack, ignored", source),
        }
    }

    /// Emulate a guest page fault through the fault region registry.
    fn handle_vm_fault(&mut self, vcpu: usize, addr: u64, cause: u64, htinst: u64, ip: u64) -> bool {
        let mut regs = self.kernel.read_regs(vcpu);
        let store = cause == CAUSE_GUEST_STORE_PAGE_FAULT;
        let decoded = decode_htinst(htinst);

        let consistent = match decoded {
            DecodedInstruction::Load { .. } => cause == CAUSE_GUEST_LOAD_PAGE_FAULT,
            DecodedInstruction::Store { .. } => store,
            DecodedInstruction::DecodeFail => false,
        };
        if cause != CAUSE_GUEST_INSN_PAGE_FAULT && consistent && self.emulate_access(vcpu, addr, decoded, &mut regs) {
            regs.advance_pc(u64::from(decoded.len()));
            self.kernel.write_regs(vcpu, &regs);
            return true;
        }

        log::error!(
            "unhandled VM fault on vCPU {}: addr 0x{:x}, cause {} ({}), htinst 0x{:x}, ip 0x{:x}, {}, {:?}",
            vcpu,
            addr,
            cause,
            cause_name(cause),
            htinst,
            ip,
            if store { "write" } else { "read" },
            decoded
        );
        self.dump_vcpu(vcpu, &regs);
        false
    }

    fn emulate_access(&mut self, vcpu: usize, addr: u64, decoded: DecodedInstruction, regs: &mut RiscvRegs) -> bool {
        let width = decoded.width();
        let store = match decoded {
            DecodedInstruction::Store { rs2, .. } => Some(regs.get_reg(rs2)),
            _ => None,
        };

        let Some(value) = self.mmio_access(vcpu, addr, width, store) else {
            return false;
        };
        if let DecodedInstruction::Load { rd, width, sign_extend, .. } = decoded {
            regs.set_reg(rd, extend_load(value, width, sign_extend));
        }
        true
    }

    /// One MMIO access of `width` bytes. `store` carries the value for
    /// writes. Returns the loaded value (zero for stores).
    fn mmio_access(&mut self, vcpu: usize, addr: u64, width: u8, store: Option<u64>) -> Option<u64> {
        let offset = match self.regions.lookup_mut(addr)? {
            (offset, RegionHandler::Plic) => offset,
            (offset, RegionHandler::Device(dev)) => {
                let (value, irq) = devices::access(dev, vcpu, offset, width, store)?;
                if let Some(irq) = irq {
                    if let Err(e) = self.virq_inject(vcpu, irq) {
                        log::warn!("device IRQ {} not delivered: {}", irq, e);
                    }
                    if let Some((_, RegionHandler::Device(dev))) = self.regions.lookup_mut(addr) {
                        dev.ack_irq();
                    }
                }
                return Some(value);
            }
            (_, RegionHandler::VgicDist | RegionHandler::VgicRedist | RegionHandler::Lapic | RegionHandler::Ioapic) => {
                log::error!("interrupt controller region at 0x{:x} does not belong to this architecture", addr);
                return None;
            }
        };

        if width != 4 {
            log::error!("{}-byte access to PLIC register at 0x{:x}", width, addr);
            return None;
        }
        let value = match store {
            None => u64::from(self.plic.read(offset)?),
            Some(value) => {
                if let PlicAction::Complete(source) = self.plic.write(offset, value as u32)? {
                    self.run_ack(source);
                }
                0
            }
        };
        // Claims, completions, enables and thresholds all move EIP
        self.sync_eip();
        Some(value)
    }

    fn handle_vcpu_fault(&mut self, vcpu: usize, cause: u64) -> bool {
        match cause {
            CAUSE_ECALL_VS => self.handle_sbi(vcpu),
            _ => {
                log::error!("unhandled vCPU fault on vCPU {}: cause {} ({})", vcpu, cause, cause_name(cause));
                let regs = self.kernel.read_regs(vcpu);
                self.dump_vcpu(vcpu, &regs);
                false
            }
        }
    }

    fn dump_vcpu(&mut self, vcpu: usize, regs: &RiscvRegs) {
        regs.dump(vcpu);
        for reg in RiscvVcpuReg::ALL {
            log::error!("    {:<8} 0x{:016x}", reg.name(), self.kernel.read_vcpu_reg(vcpu, reg));
        }
    }
}

impl<K: RiscvKernel, D: MmioDevice> Vmm for RiscvVmm<K, D> {
    type Fault = RiscvFault;
    type Device = D;

    fn controller_init(&mut self) -> Result<()> {
        self.regions.register(PLIC_PADDR, PLIC_SIZE, RegionHandler::Plic)?;
        log::info!("PLIC initialised for {} hart(s)", self.vcpus.num_vcpus());
        Ok(())
    }

    fn register_region(&mut self, base: u64, size: u64, device: D) -> Result<usize> {
        self.regions.register(base, size, RegionHandler::Device(device))
    }

    /// `irq` is a PLIC source. Which hart takes it is up to the guest's
    /// enable bits; `vcpu` is kept for diagnostics.
    fn virq_register(&mut self, vcpu: usize, irq: u32, ack: VirqAck) -> Result<()> {
        self.vcpus.check(vcpu)?;
        if !Plic::is_valid_source(irq) {
            return Err(VmmError::InvalidIrq(irq));
        }
        let slot = &mut self.sources[irq as usize];
        if slot.is_some() {
            return Err(VmmError::IrqAlreadyRegistered(irq));
        }
        *slot = Some(SourceRoute { vcpu, ack });
        Ok(())
    }

    fn virq_inject(&mut self, vcpu: usize, irq: u32) -> Result<()> {
        self.vcpus.check(vcpu)?;
        match self.sources.get(irq as usize) {
            Some(Some(route)) => {
                if route.vcpu != vcpu {
                    log::debug!("PLIC source {} registered on vCPU {}, raised from vCPU {}", irq, route.vcpu, vcpu);
                }
            }
            Some(None) if irq != 0 => return Err(VmmError::IrqNotRegistered(irq)),
            _ => return Err(VmmError::InvalidIrq(irq)),
        }
        self.plic.set_pending(irq);
        self.sync_eip();
        Ok(())
    }

    fn register_passthrough(&mut self, vcpu: usize, irq: u32, channel: u32) -> Result<()> {
        self.vcpus.check(vcpu)?;
        self.passthrough.check_free(channel)?;
        self.virq_register(vcpu, irq, VirqAck::Passthrough(channel))?;
        self.passthrough.bind(channel, vcpu, irq)
    }

    fn handle_passthrough(&mut self, channel: u32) -> Result<()> {
        let entry = self.passthrough.lookup(channel)?;
        self.virq_inject(entry.vcpu, entry.irq)
    }

    /// Linux boot protocol: hart id in a0, DTB in a1.
    fn guest_start(&mut self, vcpu: usize, pc: u64, dtb: u64, initrd: u64) -> Result<()> {
        self.vcpus.check(vcpu)?;
        log::info!(
            "starting guest on vCPU {} at 0x{:x}, DTB 0x{:x}, initrd 0x{:x}",
            vcpu, pc, dtb, initrd
        );
        let regs = RiscvRegs::linux_boot(pc, vcpu, dtb);
        self.kernel.write_regs(vcpu, &regs);
        self.vcpus.set_on(vcpu, true);
        self.kernel.vcpu_restart(vcpu, pc);
        Ok(())
    }

    fn guest_stop(&mut self, vcpu: usize) {
        log::info!("stopping guest vCPU {}", vcpu);
        self.kernel.vcpu_stop(vcpu);
        self.vcpus.set_on(vcpu, false);
        if let Some(waiting) = self.timer_waiting.get_mut(vcpu) {
            *waiting = false;
        }
    }

    fn guest_restart(&mut self, vcpu: usize, ram_gpa: u64, ram_size: u64) -> Result<()> {
        self.vcpus.check(vcpu)?;
        log::info!("restarting guest vCPU {}", vcpu);
        self.guest_stop(vcpu);
        self.console.flush();
        self.mem.zero(ram_gpa, ram_size)?;
        self.reset_vcpu_regs(vcpu);
        self.kernel.write_regs(vcpu, &RiscvRegs::default());
        self.plic.reset();
        Ok(())
    }

    fn fault_handle(&mut self, vcpu: usize, fault: &RiscvFault) -> bool {
        if let Err(e) = self.vcpus.check(vcpu) {
            log::error!("fault for {}", e);
            return false;
        }
        match *fault {
            // vCPU exceptions
            RiscvFault::VcpuFault { cause } => self.handle_vcpu_fault(vcpu, cause),
            // memory accesses
            RiscvFault::VmFault { addr, cause, htinst, ip } => self.handle_vm_fault(vcpu, addr, cause, htinst, ip),
            RiscvFault::Unknown { label } => {
                log::error!("unknown fault label {} on vCPU {}", label, vcpu);
                let regs = self.kernel.read_regs(vcpu);
                self.dump_vcpu(vcpu, &regs);
                false
            }
        }
    }
}

impl<K: RiscvKernel, D: MmioDevice> core::fmt::Debug for RiscvVmm<K, D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RiscvVmm")
            .field("vcpus", &self.vcpus)
            .field("regions", &self.regions.len())
            .field("timer_waiting", &&self.timer_waiting[..self.vcpus.num_vcpus()])
            .finish()
    }
}
