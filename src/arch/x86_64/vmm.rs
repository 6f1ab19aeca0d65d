//! x86_64 VMM core
//!
//! Owns the guest memory map, the fault region registry, the local and I/O
//! APICs, the legacy port devices and the passthrough table of one guest.
//! EPT violations are emulated by decoding the faulting instruction, port
//! I/O exits from the exit qualification alone.

use super::apic::{IpiDest, Ioapic, Lapic, LapicAction, IOAPIC_NUM_PINS};
use super::cpuid;
use super::decode::{decode_instruction, DecodedInstruction, MAX_INSN_LEN};
use super::exit::{X86Fault, EPT_QUAL_FETCH, EPT_QUAL_WRITE};
use super::ioports::fw_cfg::{FwCfg, FW_CFG_PORT_DATA};
use super::ioports::{IoAccess, PortDevices, PortEffect};
use super::kernel::X86Kernel;
use super::msr;
use super::regs::{Gpr, Rflags, VmcsField, X86Regs};
use super::translate;
use crate::arch::traits::{VcpuContextOps, Vmm};
use crate::devices::{self, MmioDevice};
use crate::error::{Result, VmmError};
use crate::fault::{FaultRegistry, RegionHandler};
use crate::memory::GuestMemoryMap;
use crate::platform::{BOOT_VCPU_ID, IOAPIC_GPA, IOAPIC_SIZE, LAPIC_GPA, LAPIC_SIZE, MAX_VCPUS};
use crate::vcpu::{VcpuRunState, VcpuTable};
use crate::virq::{PassthroughMap, VirqAck};

/// Chunk size for `rep ins` copies into guest memory
const STRING_IO_CHUNK: usize = 64;

/// A registered IOAPIC pin
#[derive(Debug, Clone, Copy)]
struct PinRoute {
    vcpu: usize,
    ack: VirqAck,
}

/// Which APIC a trapped access landed in
enum ApicRegion {
    Lapic,
    Ioapic,
}

/// VMM context of an x86 guest
pub struct X86Vmm<K: X86Kernel, D: MmioDevice> {
    kernel: K,
    mem: GuestMemoryMap,
    vcpus: VcpuTable,
    regions: FaultRegistry<RegionHandler<D>>,
    passthrough: PassthroughMap,
    lapics: [Lapic; MAX_VCPUS],
    ioapic: Ioapic,
    pins: [Option<PinRoute>; IOAPIC_NUM_PINS],
    ports: PortDevices,
}

impl<K: X86Kernel, D: MmioDevice> X86Vmm<K, D> {
    pub fn new(kernel: K, mem: GuestMemoryMap, num_vcpus: usize) -> Result<Self> {
        let fw_cfg = FwCfg::new(num_vcpus as u16);
        Self::with_fw_cfg(kernel, mem, num_vcpus, fw_cfg)
    }

    /// Create a VMM whose fw_cfg interface exposes `fw_cfg`'s items.
    pub fn with_fw_cfg(kernel: K, mem: GuestMemoryMap, num_vcpus: usize, fw_cfg: FwCfg) -> Result<Self> {
        Ok(Self {
            kernel,
            mem,
            vcpus: VcpuTable::new(num_vcpus)?,
            regions: FaultRegistry::new(),
            passthrough: PassthroughMap::new(),
            lapics: core::array::from_fn(|id| Lapic::new(id as u8)),
            ioapic: Ioapic::new(),
            pins: [None; IOAPIC_NUM_PINS],
            ports: PortDevices::new(fw_cfg),
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

    pub fn regions(&self) -> &FaultRegistry<RegionHandler<D>> {
        &self.regions
    }

    pub fn lapic(&self, vcpu: usize) -> Option<&Lapic> {
        self.lapics[..self.vcpus.num_vcpus()].get(vcpu)
    }

    pub fn ioapic(&self) -> &Ioapic {
        &self.ioapic
    }

    pub fn ports(&self) -> &PortDevices {
        &self.ports
    }

    /// Translate a guest virtual address of `vcpu` using its current CR0
    /// and CR3. Returns the GPA and the bytes left in its page.
    pub fn gva_to_gpa(&mut self, vcpu: usize, gva: u64) -> Result<(u64, u64)> {
        self.vcpus.check(vcpu)?;
        let cr0 = self.kernel.vmcs_read(vcpu, VmcsField::GuestCr0);
        let cr3 = self.kernel.vmcs_read(vcpu, VmcsField::GuestCr3);
        translate::gva_to_gpa(&self.mem, cr0, cr3, gva)
    }

    /// Latch `vector` in the local APIC of `vcpu` and deliver it when it
    /// has priority.
    pub fn inject_vector(&mut self, vcpu: usize, vector: u8) -> Result<()> {
        self.vcpus.check(vcpu)?;
        if !self.lapics[vcpu].accept(vector) {
            return Err(VmmError::InvalidIrq(vector as u32));
        }
        self.deliver(vcpu);
        Ok(())
    }

    /// Expiry of the PIT timeout: re-arm it and raise LINT0 on the boot
    /// vCPU unless the guest masked it.
    pub fn handle_timer(&mut self) -> Result<()> {
        let Some(ns) = self.ports.pit().tick() else {
            log::warn!("timer notification while the PIT is not ticking");
            return Err(VmmError::Unsupported("PIT is not running"));
        };
        self.kernel.timer_set_timeout(ns);
        match self.lapics[BOOT_VCPU_ID].lint0_vector() {
            Some(vector) => self.inject_vector(BOOT_VCPU_ID, vector),
            None => Ok(()),
        }
    }

    /// Hand the highest deliverable vector of `vcpu` to the kernel and wake
    /// the vCPU if it is halted.
    fn deliver(&mut self, vcpu: usize) {
        let Some(vector) = self.lapics[vcpu].next_delivery() else {
            return;
        };
        if !self.kernel.inject_vector(vcpu, vector) {
            log::warn!("kernel refused vector 0x{:x} for vCPU {}, kept pending", vector, vcpu);
            self.lapics[vcpu].requeue(vector);
            return;
        }
        if self.vcpus.run_state(vcpu) == Some(VcpuRunState::WaitingForIrq) {
            self.vcpus.set_run_state(vcpu, VcpuRunState::Running);
            let rip = self.kernel.read_regs(vcpu).rip;
            self.kernel.vcpu_restart(vcpu, rip);
        }
    }

    /// Raise IOAPIC `pin` and route it to the LAPIC of its vCPU.
    fn assert_pin(&mut self, pin: usize, vcpu: usize) {
        match self.ioapic.assert(pin) {
            Some((vector, _dest)) => {
                if let Err(e) = self.inject_vector(vcpu, vector) {
                    log::warn!("IOAPIC pin {} (vector 0x{:x}) not delivered: {}", pin, vector, e);
                }
            }
            None => log::debug!("IOAPIC pin {} is masked, latched", pin),
        }
    }

    fn apply_lapic(&mut self, vcpu: usize, action: LapicAction) {
        match action {
            LapicAction::Done => {}
            LapicAction::Eoi(retired) => {
                if let Some(vector) = retired {
                    let pins = self.ioapic.eoi(vector);
                    for pin in (0..IOAPIC_NUM_PINS).filter(|p| pins & (1 << p) != 0) {
                        if let Some(route) = self.pins[pin] {
                            self.run_ack(route.ack, pin);
                        }
                    }
                }
                self.deliver(vcpu);
            }
            LapicAction::Ipi { vector, dest } => {
                for target in 0..self.vcpus.num_vcpus() {
                    let hit = self.vcpus.is_on(target)
                        && match dest {
                            IpiDest::Apic(id) => self.lapics[target].id() == id,
                            IpiDest::SelfOnly => target == vcpu,
                            IpiDest::All => true,
                            IpiDest::AllExcludingSelf => target != vcpu,
                        };
                    if hit {
                        if let Err(e) = self.inject_vector(target, vector) {
                            log::warn!("IPI 0x{:x} to vCPU {}: {}", vector, target, e);
                        }
                    }
                }
            }
        }
    }

    fn run_ack(&mut self, ack: VirqAck, pin: usize) {
        match ack {
            VirqAck::Nop => {}
            VirqAck::Passthrough(channel) => self.kernel.irq_ack(channel),
            VirqAck::Vppi => log::warn!("IOAPIC pin {} has a VPPI ack, ignored", pin),
        }
    }

    /// Deliver pins that were asserted while masked and are now unmasked.
    fn flush_unmasked_pins(&mut self) {
        let ready = self.ioapic.take_unmasked_pending();
        for pin in (0..IOAPIC_NUM_PINS).filter(|p| ready & (1 << p) != 0) {
            let vcpu = self.pins[pin].map_or(BOOT_VCPU_ID, |r| r.vcpu);
            self.assert_pin(pin, vcpu);
        }
    }

    /// Emulate one MMIO access of `width` bytes. `store` carries the value
    /// for writes. Returns the loaded value (zero for stores).
    fn mmio_access(&mut self, vcpu: usize, gpa: u64, width: u8, store: Option<u64>) -> Option<u64> {
        let (offset, region) = match self.regions.lookup_mut(gpa)? {
            (offset, RegionHandler::Lapic) => (offset, ApicRegion::Lapic),
            (offset, RegionHandler::Ioapic) => (offset, ApicRegion::Ioapic),
            (offset, RegionHandler::Device(dev)) => {
                let (value, irq) = devices::access(dev, vcpu, offset, width, store)?;
                if let Some(irq) = irq {
                    if let Err(e) = self.virq_inject(vcpu, irq) {
                        log::warn!("device IRQ {} not delivered: {}", irq, e);
                    }
                    if let Some((_, RegionHandler::Device(dev))) = self.regions.lookup_mut(gpa) {
                        dev.ack_irq();
                    }
                }
                return Some(value);
            }
            (_, RegionHandler::VgicDist | RegionHandler::VgicRedist | RegionHandler::Plic) => {
                log::error!("interrupt controller region at 0x{:x} does not belong to this architecture", gpa);
                return None;
            }
        };

        if width != 4 {
            log::error!("{}-byte access to APIC register at 0x{:x}", width, gpa);
            return None;
        }
        match (region, store) {
            (ApicRegion::Lapic, None) => self.lapics[vcpu].read(offset).map(u64::from),
            (ApicRegion::Lapic, Some(value)) => {
                let action = self.lapics[vcpu].write(offset, value as u32)?;
                self.apply_lapic(vcpu, action);
                Some(0)
            }
            (ApicRegion::Ioapic, None) => self.ioapic.read(offset).map(u64::from),
            (ApicRegion::Ioapic, Some(value)) => {
                if !self.ioapic.write(offset, value as u32) {
                    return None;
                }
                self.flush_unmasked_pins();
                Some(0)
            }
        }
    }

    /// Copy the instruction bytes at `rip`, following the guest page
    /// tables across a page boundary if needed.
    fn fetch_instruction(&mut self, vcpu: usize, rip: u64) -> Result<([u8; MAX_INSN_LEN], usize)> {
        let mut bytes = [0u8; MAX_INSN_LEN];
        let (gpa, room) = self.gva_to_gpa(vcpu, rip)?;
        let first = (room as usize).min(MAX_INSN_LEN);
        self.mem.read_bytes(gpa, &mut bytes[..first])?;
        if first == MAX_INSN_LEN {
            return Ok((bytes, MAX_INSN_LEN));
        }
        // The tail may sit on an unmapped page; decode what we have then.
        match self.gva_to_gpa(vcpu, rip.wrapping_add(first as u64)) {
            Ok((next, _)) => {
                self.mem.read_bytes(next, &mut bytes[first..])?;
                Ok((bytes, MAX_INSN_LEN))
            }
            Err(_) => Ok((bytes, first)),
        }
    }

    fn handle_ept_violation(&mut self, vcpu: usize, gpa: u64, qualification: u64, ip: u64, len: u64) -> bool {
        let mut regs = self.kernel.read_regs(vcpu);
        let write = qualification & EPT_QUAL_WRITE != 0;
        let mut decoded = DecodedInstruction::DecodeFail;

        if qualification & EPT_QUAL_FETCH == 0 {
            match self.fetch_instruction(vcpu, regs.rip) {
                Ok((bytes, n)) => {
                    decoded = decode_instruction(&bytes[..n], regs.rip);
                    if self.emulate_mmio(vcpu, gpa, write, decoded, &mut regs) {
                        regs.advance_pc(len);
                        self.kernel.write_regs(vcpu, &regs);
                        return true;
                    }
                }
                Err(e) => log::error!("cannot fetch instruction at 0x{:x}: {}", regs.rip, e),
            }
        }

        log::error!(
            "unhandled EPT violation on vCPU {}: gpa 0x{:x}, qualification 0x{:x}, ip 0x{:x}, {}, {:?}",
            vcpu,
            gpa,
            qualification,
            ip,
            if write { "write" } else { "read" },
            decoded
        );
        self.dump_vcpu(vcpu, &regs);
        false
    }

    fn emulate_mmio(&mut self, vcpu: usize, gpa: u64, write: bool, decoded: DecodedInstruction, regs: &mut X86Regs) -> bool {
        match decoded {
            DecodedInstruction::DecodeFail => false,
            DecodedInstruction::Memory { reg, width, reg_width, .. } => {
                if write {
                    let value = regs.get(reg) & width_mask(width);
                    self.mmio_access(vcpu, gpa, width, Some(value)).is_some()
                } else {
                    match self.mmio_access(vcpu, gpa, width, None) {
                        Some(value) => {
                            regs.write_sized(reg, reg_width, value & width_mask(width));
                            true
                        }
                        None => false,
                    }
                }
            }
            DecodedInstruction::WriteImm { value, width, .. } => {
                write && self.mmio_access(vcpu, gpa, width, Some(value & width_mask(width))).is_some()
            }
        }
    }

    fn handle_io(&mut self, vcpu: usize, qualification: u64, len: u64) -> bool {
        let mut regs = self.kernel.read_regs(vcpu);
        let Some(access) = IoAccess::from_qualification(qualification) else {
            log::error!("malformed I/O exit qualification 0x{:x} on vCPU {}", qualification, vcpu);
            self.dump_vcpu(vcpu, &regs);
            return false;
        };

        let result = if access.string {
            self.string_io(vcpu, &access, &mut regs)
        } else if access.input {
            self.ports
                .read(access.port, access.width)
                .map(|value| regs.write_sized(Gpr::Rax, access.width, value as u64))
        } else {
            let value = regs.rax as u32 & access.mask();
            match self.ports.write(access.port, access.width, value) {
                Ok(PortEffect::ArmTimer(ns)) => {
                    self.kernel.timer_set_timeout(ns);
                    Ok(())
                }
                Ok(PortEffect::None) => Ok(()),
                Err(e) => Err(e),
            }
        };

        match result {
            Ok(()) => {
                regs.advance_pc(len);
                self.kernel.write_regs(vcpu, &regs);
                true
            }
            Err(e) => {
                // Keep RDI/RCX progress of a partial string copy
                self.kernel.write_regs(vcpu, &regs);
                log::error!(
                    "unhandled port I/O on vCPU {}: {} port 0x{:x}, {} byte(s){}{}, rip 0x{:x}: {}",
                    vcpu,
                    if access.input { "in" } else { "out" },
                    access.port,
                    access.width,
                    if access.string { ", string" } else { "" },
                    if access.rep { ", rep" } else { "" },
                    regs.rip,
                    e
                );
                self.dump_vcpu(vcpu, &regs);
                false
            }
        }
    }

    /// `ins` from the fw_cfg data port into guest memory at RDI. RDI moves
    /// by the byte count in the direction given by RFLAGS.DF; a `rep`
    /// prefix consumes RCX.
    ///
    /// A destination that does not translate stops the copy before any
    /// fw_cfg byte is consumed for it; RDI and RCX then reflect the bytes
    /// already stored.
    fn string_io(&mut self, vcpu: usize, access: &IoAccess, regs: &mut X86Regs) -> Result<()> {
        if !access.input || access.port != FW_CFG_PORT_DATA || access.width != 1 {
            return Err(VmmError::Unsupported("string I/O on this port"));
        }

        let count = if access.rep { regs.rcx } else { 1 };
        let rflags = Rflags::from_bits_truncate(self.kernel.vmcs_read(vcpu, VmcsField::GuestRflags));
        let backward = rflags.contains(Rflags::DF);

        let mut done = 0u64;
        let result = self.fw_cfg_to_guest(vcpu, regs.rdi, count, backward, &mut done);

        regs.rdi = if backward { regs.rdi.wrapping_sub(done) } else { regs.rdi.wrapping_add(done) };
        if access.rep {
            regs.rcx -= done;
        }
        result
    }

    fn fw_cfg_to_guest(&mut self, vcpu: usize, rdi: u64, count: u64, backward: bool, done: &mut u64) -> Result<()> {
        let mut buf = [0u8; STRING_IO_CHUNK];
        while *done < count {
            let gva = if backward { rdi.wrapping_sub(*done) } else { rdi.wrapping_add(*done) };
            let (gpa, room) = self.gva_to_gpa(vcpu, gva)?;
            let chunk = if backward {
                1
            } else {
                (count - *done).min(room).min(STRING_IO_CHUNK as u64) as usize
            };
            if !self.mem.is_mapped(gpa, chunk as u64) {
                return Err(VmmError::AddressOutOfRange(gpa));
            }
            for byte in buf[..chunk].iter_mut() {
                *byte = self.ports.fw_cfg_mut().read_byte()?;
            }
            self.mem.write_bytes(gpa, &buf[..chunk])?;
            *done += chunk as u64;
        }
        Ok(())
    }

    fn handle_cpuid(&mut self, vcpu: usize, len: u64) -> bool {
        let mut regs = self.kernel.read_regs(vcpu);
        let res = cpuid::cpuid(regs.rax as u32, regs.rcx as u32, self.lapics[vcpu].id());
        regs.write_sized(Gpr::Rax, 4, res.eax as u64);
        regs.write_sized(Gpr::Rbx, 4, res.ebx as u64);
        regs.write_sized(Gpr::Rcx, 4, res.ecx as u64);
        regs.write_sized(Gpr::Rdx, 4, res.edx as u64);
        regs.advance_pc(len);
        self.kernel.write_regs(vcpu, &regs);
        true
    }

    fn handle_rdmsr(&mut self, vcpu: usize, len: u64) -> bool {
        let mut regs = self.kernel.read_regs(vcpu);
        let msr = regs.rcx as u32;
        let Some(value) = msr::read(&mut self.kernel, vcpu, msr) else {
            log::error!("unhandled RDMSR 0x{:x} on vCPU {} at rip 0x{:x}", msr, vcpu, regs.rip);
            self.dump_vcpu(vcpu, &regs);
            return false;
        };
        regs.write_sized(Gpr::Rax, 4, value);
        regs.write_sized(Gpr::Rdx, 4, value >> 32);
        regs.advance_pc(len);
        self.kernel.write_regs(vcpu, &regs);
        true
    }

    fn handle_wrmsr(&mut self, vcpu: usize, len: u64) -> bool {
        let mut regs = self.kernel.read_regs(vcpu);
        let msr = regs.rcx as u32;
        let value = (regs.rdx << 32) | (regs.rax & 0xffff_ffff);
        if !msr::write(&mut self.kernel, vcpu, msr, value) {
            log::error!("unhandled WRMSR 0x{:x} <- 0x{:x} on vCPU {} at rip 0x{:x}", msr, value, vcpu, regs.rip);
            self.dump_vcpu(vcpu, &regs);
            return false;
        }
        regs.advance_pc(len);
        self.kernel.write_regs(vcpu, &regs);
        true
    }

    /// Park the vCPU until an interrupt is delivered to it.
    fn handle_hlt(&mut self, vcpu: usize, len: u64) -> bool {
        let mut regs = self.kernel.read_regs(vcpu);
        regs.advance_pc(len);
        self.kernel.write_regs(vcpu, &regs);
        if self.lapics[vcpu].has_pending() {
            self.deliver(vcpu);
        } else {
            self.vcpus.set_run_state(vcpu, VcpuRunState::WaitingForIrq);
            self.kernel.vcpu_stop(vcpu);
        }
        true
    }

    fn dump_vcpu(&mut self, vcpu: usize, regs: &X86Regs) {
        regs.dump(vcpu);
        for field in VmcsField::DUMP {
            log::error!("    {:<16} 0x{:016x}", field_name(field), self.kernel.vmcs_read(vcpu, field));
        }
    }
}

fn width_mask(width: u8) -> u64 {
    match width {
        1 => 0xff,
        2 => 0xffff,
        4 => 0xffff_ffff,
        _ => u64::MAX,
    }
}

fn field_name(field: VmcsField) -> &'static str {
    match field {
        VmcsField::GuestCr0 => "cr0",
        VmcsField::GuestCr3 => "cr3",
        VmcsField::GuestCr4 => "cr4",
        VmcsField::GuestRflags => "rflags",
        VmcsField::GuestEfer => "efer",
        VmcsField::GuestCsSelector => "cs",
        VmcsField::GuestCsBase => "cs base",
        VmcsField::GuestGdtrBase => "gdtr base",
        VmcsField::GuestIdtrBase => "idtr base",
    }
}

impl<K: X86Kernel, D: MmioDevice> Vmm for X86Vmm<K, D> {
    type Fault = X86Fault;
    type Device = D;

    fn controller_init(&mut self) -> Result<()> {
        self.regions.register(LAPIC_GPA, LAPIC_SIZE, RegionHandler::Lapic)?;
        self.regions.register(IOAPIC_GPA, IOAPIC_SIZE, RegionHandler::Ioapic)?;
        log::info!("LAPIC and IOAPIC initialised for {} vCPU(s)", self.vcpus.num_vcpus());
        Ok(())
    }

    fn register_region(&mut self, base: u64, size: u64, device: D) -> Result<usize> {
        self.regions.register(base, size, RegionHandler::Device(device))
    }

    /// `irq` is an IOAPIC pin.
    fn virq_register(&mut self, vcpu: usize, irq: u32, ack: VirqAck) -> Result<()> {
        self.vcpus.check(vcpu)?;
        let Some(slot) = self.pins.get_mut(irq as usize) else {
            return Err(VmmError::InvalidIrq(irq));
        };
        if slot.is_some() {
            return Err(VmmError::IrqAlreadyRegistered(irq));
        }
        *slot = Some(PinRoute { vcpu, ack });
        Ok(())
    }

    fn virq_inject(&mut self, vcpu: usize, irq: u32) -> Result<()> {
        self.vcpus.check(vcpu)?;
        let pin = irq as usize;
        match self.pins.get(pin) {
            None => Err(VmmError::InvalidIrq(irq)),
            Some(None) => Err(VmmError::IrqNotRegistered(irq)),
            Some(Some(_)) => {
                self.assert_pin(pin, vcpu);
                Ok(())
            }
        }
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

    /// `dtb` carries the guest physical address of the boot parameter
    /// block, passed in RSI.
    fn guest_start(&mut self, vcpu: usize, pc: u64, dtb: u64, initrd: u64) -> Result<()> {
        self.vcpus.check(vcpu)?;
        log::info!(
            "starting guest on vCPU {} at 0x{:x}, boot params 0x{:x}, initrd 0x{:x}",
            vcpu, pc, dtb, initrd
        );
        let regs = X86Regs {
            rip: pc,
            rsi: dtb,
            ..Default::default()
        };
        self.kernel.write_regs(vcpu, &regs);
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
        self.kernel.write_regs(vcpu, &X86Regs::default());
        self.lapics[vcpu].reset();
        self.ioapic.reset();
        self.ports.reset();
        Ok(())
    }

    fn fault_handle(&mut self, vcpu: usize, fault: &X86Fault) -> bool {
        if let Err(e) = self.vcpus.check(vcpu) {
            log::error!("fault for {}", e);
            return false;
        }
        match *fault {
            // privileged instructions
            X86Fault::Cpuid { len } => self.handle_cpuid(vcpu, len),
            X86Fault::Rdmsr { len } => self.handle_rdmsr(vcpu, len),
            X86Fault::Wrmsr { len } => self.handle_wrmsr(vcpu, len),
            X86Fault::Hlt { len } => self.handle_hlt(vcpu, len),
            // memory and port accesses
            X86Fault::EptViolation { gpa, qualification, ip, len } => {
                self.handle_ept_violation(vcpu, gpa, qualification, ip, len)
            }
            X86Fault::IoInstruction { qualification, len } => self.handle_io(vcpu, qualification, len),
            X86Fault::Unknown { reason } => {
                log::error!(
                    "unhandled VM exit {} ({}) on vCPU {}",
                    reason,
                    super::exit::exit_reason_name(reason),
                    vcpu
                );
                let regs = self.kernel.read_regs(vcpu);
                self.dump_vcpu(vcpu, &regs);
                false
            }
        }
    }
}

impl<K: X86Kernel, D: MmioDevice> core::fmt::Debug for X86Vmm<K, D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("X86Vmm")
            .field("vcpus", &self.vcpus)
            .field("regions", &self.regions.len())
            .field("pit", &self.ports.pit().state())
            .finish()
    }
}
