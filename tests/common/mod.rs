//! Recording microkernel used by the integration tests
//!
//! Implements the kernel trait of every architecture. Register files and
//! banked vCPU registers are plain per-vCPU stores; every side-effecting
//! call is appended to `calls` so tests can assert on exactly what the VMM
//! asked the kernel to do.

#![allow(dead_code)]

use microvmm::arch::aarch64::vgic::distributor::{GICD_CTLR, GICD_ISENABLER_BASE};
use microvmm::arch::aarch64::{ArmFault, ArmKernel, ArmVmm, UserContext, VcpuReg};
use microvmm::arch::riscv64::exception::{CAUSE_GUEST_LOAD_PAGE_FAULT, CAUSE_GUEST_STORE_PAGE_FAULT};
use microvmm::arch::riscv64::plic::{s_context, PLIC_ENABLE_BASE, PLIC_ENABLE_STRIDE};
use microvmm::arch::riscv64::{RiscvFault, RiscvKernel, RiscvRegs, RiscvVcpuReg, RiscvVmm};
use microvmm::arch::x86_64::exit::EPT_QUAL_WRITE;
use microvmm::arch::x86_64::translate::PteFlags;
use microvmm::arch::x86_64::{VmcsField, X86Fault, X86Kernel, X86Regs, X86Vmm};
use microvmm::kernel::Microkernel;
use microvmm::memory::{GuestMemoryMap, GuestRegion};
use microvmm::devices::MmioDevice;
use microvmm::platform::{GIC_DIST_PADDR, MAX_VCPUS, PLIC_PADDR};
use microvmm::Vmm;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    IrqAck(u32),
    VcpuRestart { vcpu: usize, pc: u64 },
    VcpuStop(usize),
    InjectIrq { vcpu: usize, irq: u16, lr: u8 },
    AckVppi { vcpu: usize, irq: u32 },
    InjectVector { vcpu: usize, vector: u8 },
    TimerSetTimeout(u64),
}

/// Banked register store keyed by vCPU and register
#[derive(Debug)]
pub struct RegStore<R> {
    entries: Vec<(usize, R, u64)>,
}

impl<R> Default for RegStore<R> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<R: Copy + PartialEq> RegStore<R> {
    pub fn get(&self, vcpu: usize, reg: R) -> u64 {
        self.entries
            .iter()
            .find(|(v, r, _)| *v == vcpu && *r == reg)
            .map_or(0, |(_, _, value)| *value)
    }

    pub fn set(&mut self, vcpu: usize, reg: R, value: u64) {
        match self.entries.iter_mut().find(|(v, r, _)| *v == vcpu && *r == reg) {
            Some(entry) => entry.2 = value,
            None => self.entries.push((vcpu, reg, value)),
        }
    }
}

#[derive(Debug, Default)]
pub struct MockKernel {
    pub calls: Vec<Call>,
    pub arm_regs: [UserContext; MAX_VCPUS],
    pub arm_vcpu_regs: RegStore<VcpuReg>,
    pub x86_regs: [X86Regs; MAX_VCPUS],
    pub vmcs: RegStore<VmcsField>,
    pub msrs: RegStore<u32>,
    pub riscv_regs: [RiscvRegs; MAX_VCPUS],
    pub riscv_vcpu_regs: RegStore<RiscvVcpuReg>,
    /// Value returned by `current_time`
    pub time: u64,
    /// Make `inject_vector` fail
    pub refuse_vectors: bool,
}

impl MockKernel {
    pub fn new() -> Self {
        Self::default()
    }

    /// IRQs written to list registers, in order.
    pub fn injected_irqs(&self) -> Vec<(usize, u16)> {
        self.calls
            .iter()
            .filter_map(|c| match *c {
                Call::InjectIrq { vcpu, irq, .. } => Some((vcpu, irq)),
                _ => None,
            })
            .collect()
    }

    pub fn injected_vectors(&self) -> Vec<(usize, u8)> {
        self.calls
            .iter()
            .filter_map(|c| match *c {
                Call::InjectVector { vcpu, vector } => Some((vcpu, vector)),
                _ => None,
            })
            .collect()
    }

    pub fn irq_acks(&self) -> Vec<u32> {
        self.calls
            .iter()
            .filter_map(|c| match *c {
                Call::IrqAck(channel) => Some(channel),
                _ => None,
            })
            .collect()
    }

    pub fn sip(&self, hart: usize) -> u64 {
        self.riscv_vcpu_regs.get(hart, RiscvVcpuReg::Sip)
    }
}

impl Microkernel for MockKernel {
    fn irq_ack(&mut self, channel: u32) {
        self.calls.push(Call::IrqAck(channel));
    }

    fn vcpu_restart(&mut self, vcpu: usize, pc: u64) {
        self.calls.push(Call::VcpuRestart { vcpu, pc });
    }

    fn vcpu_stop(&mut self, vcpu: usize) {
        self.calls.push(Call::VcpuStop(vcpu));
    }
}

impl ArmKernel for MockKernel {
    fn read_regs(&mut self, vcpu: usize) -> UserContext {
        self.arm_regs[vcpu]
    }

    fn write_regs(&mut self, vcpu: usize, regs: &UserContext) {
        self.arm_regs[vcpu] = *regs;
    }

    fn inject_irq(&mut self, vcpu: usize, virq: u16, _priority: u8, _group: u8, lr_index: u8) -> bool {
        self.calls.push(Call::InjectIrq { vcpu, irq: virq, lr: lr_index });
        true
    }

    fn ack_vppi(&mut self, vcpu: usize, irq: u32) {
        self.calls.push(Call::AckVppi { vcpu, irq });
    }

    fn read_vcpu_reg(&mut self, vcpu: usize, reg: VcpuReg) -> u64 {
        self.arm_vcpu_regs.get(vcpu, reg)
    }

    fn write_vcpu_reg(&mut self, vcpu: usize, reg: VcpuReg, value: u64) {
        self.arm_vcpu_regs.set(vcpu, reg, value);
    }
}

impl X86Kernel for MockKernel {
    fn read_regs(&mut self, vcpu: usize) -> X86Regs {
        self.x86_regs[vcpu]
    }

    fn write_regs(&mut self, vcpu: usize, regs: &X86Regs) {
        self.x86_regs[vcpu] = *regs;
    }

    fn vmcs_read(&mut self, vcpu: usize, field: VmcsField) -> u64 {
        self.vmcs.get(vcpu, field)
    }

    fn vmcs_write(&mut self, vcpu: usize, field: VmcsField, value: u64) {
        self.vmcs.set(vcpu, field, value);
    }

    fn read_msr(&mut self, vcpu: usize, msr: u32) -> u64 {
        self.msrs.get(vcpu, msr)
    }

    fn write_msr(&mut self, vcpu: usize, msr: u32, value: u64) {
        self.msrs.set(vcpu, msr, value);
    }

    fn inject_vector(&mut self, vcpu: usize, vector: u8) -> bool {
        if self.refuse_vectors {
            return false;
        }
        self.calls.push(Call::InjectVector { vcpu, vector });
        true
    }

    fn timer_set_timeout(&mut self, ns: u64) {
        self.calls.push(Call::TimerSetTimeout(ns));
    }
}

impl RiscvKernel for MockKernel {
    fn read_regs(&mut self, vcpu: usize) -> RiscvRegs {
        self.riscv_regs[vcpu]
    }

    fn write_regs(&mut self, vcpu: usize, regs: &RiscvRegs) {
        self.riscv_regs[vcpu] = *regs;
    }

    fn read_vcpu_reg(&mut self, vcpu: usize, reg: RiscvVcpuReg) -> u64 {
        self.riscv_vcpu_regs.get(vcpu, reg)
    }

    fn write_vcpu_reg(&mut self, vcpu: usize, reg: RiscvVcpuReg, value: u64) {
        self.riscv_vcpu_regs.set(vcpu, reg, value);
    }

    fn current_time(&mut self) -> u64 {
        self.time
    }
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Host memory standing in for guest RAM at `gpa`.
pub struct GuestRam {
    backing: Vec<u64>,
    gpa: u64,
}

impl GuestRam {
    pub fn new(gpa: u64, size: usize) -> Self {
        Self {
            backing: vec![0u64; size / 8],
            gpa,
        }
    }

    pub fn map(&mut self) -> GuestMemoryMap {
        let region = GuestRegion {
            gpa: self.gpa,
            size: (self.backing.len() * 8) as u64,
            vaddr: self.backing.as_mut_ptr() as usize,
            pa: self.gpa,
        };
        // SAFETY: the backing vector outlives every map handed out by the
        // tests and is only accessed through the map.
        unsafe { GuestMemoryMap::new(region) }
    }
}

/// ISS of a 32-bit data abort through w<reg>
pub fn iss(reg: u64, write: bool) -> u64 {
    (1 << 24) | (2 << 22) | (reg << 16) | if write { 1 << 6 } else { 0 }
}

/// Emulate `str w1, [addr]` from `vcpu` with x1 = `value`.
pub fn arm_store<D: MmioDevice>(vmm: &mut ArmVmm<MockKernel, D>, vcpu: usize, addr: u64, value: u64) -> bool {
    let ip = vmm.kernel().arm_regs[vcpu].pc;
    vmm.kernel_mut().arm_regs[vcpu].gpr.x1 = value;
    let fault = ArmFault::VmFault { addr, fsr: iss(1, true), ip, prefetch: false };
    vmm.fault_handle(vcpu, &fault)
}

/// Emulate `ldr w1, [addr]` from `vcpu` and return x1.
pub fn arm_load<D: MmioDevice>(vmm: &mut ArmVmm<MockKernel, D>, vcpu: usize, addr: u64) -> Option<u64> {
    let ip = vmm.kernel().arm_regs[vcpu].pc;
    let fault = ArmFault::VmFault { addr, fsr: iss(1, false), ip, prefetch: false };
    vmm.fault_handle(vcpu, &fault).then(|| vmm.kernel().arm_regs[vcpu].gpr.x1)
}

/// Guest side of GIC bring-up: switch the distributor on and set the
/// enable bit of every IRQ in `irqs` from `vcpu`.
pub fn arm_enable_irqs<D: MmioDevice>(vmm: &mut ArmVmm<MockKernel, D>, vcpu: usize, irqs: &[u32]) {
    assert!(arm_store(vmm, vcpu, GIC_DIST_PADDR + GICD_CTLR, 1));
    for &irq in irqs {
        let reg = GIC_DIST_PADDR + GICD_ISENABLER_BASE + u64::from(irq / 32) * 4;
        assert!(arm_store(vmm, vcpu, reg, 1 << (irq % 32)));
    }
}

// x86 guest page tables used by the paged fixture
pub const PML4: u64 = 0x1000;
pub const PDPT: u64 = 0x2000;
pub const PD: u64 = 0x3000;
pub const PT: u64 = 0x4000;
/// Code page: GVA 0x400000 maps to GPA 0x80000.
pub const CODE_GVA: u64 = 0x40_0000;
pub const CODE_GPA: u64 = 0x8_0000;
pub const CR0_PE: u64 = 1 << 0;
pub const CR0_PG: u64 = 1 << 31;

fn pte(addr: u64) -> u64 {
    addr | (PteFlags::PRESENT | PteFlags::WRITABLE).bits()
}

/// x86 VMM over `ram` (at GPA 0, at least 4 MiB) with long-mode paging on:
/// 0x400000 -> 0x80000 through a 4 KiB page and 0x600000 -> 0x200000
/// through a 2 MiB page.
pub fn x86_paged_vmm<D: MmioDevice>(ram: &mut GuestRam, num_vcpus: usize) -> X86Vmm<MockKernel, D> {
    let mut vmm = X86Vmm::new(MockKernel::new(), ram.map(), num_vcpus).unwrap();
    let mem = vmm.memory();
    for (gpa, value) in [
        (PML4, pte(PDPT)),
        (PDPT, pte(PD)),
        (PD + 2 * 8, pte(PT)),
        (PD + 3 * 8, pte(0x20_0000) | PteFlags::PAGE_SIZE.bits()),
        (PT, pte(CODE_GPA)),
    ] {
        mem.write_bytes(gpa, &value.to_le_bytes()).unwrap();
    }
    for vcpu in 0..num_vcpus {
        vmm.kernel_mut().vmcs.set(vcpu, VmcsField::GuestCr0, CR0_PG | CR0_PE);
        vmm.kernel_mut().vmcs.set(vcpu, VmcsField::GuestCr3, PML4);
    }
    vmm
}

/// Run `insn` at CODE_GVA on `vcpu` and report it as an EPT violation at
/// `gpa`.
pub fn x86_mmio<D: MmioDevice>(vmm: &mut X86Vmm<MockKernel, D>, vcpu: usize, gpa: u64, insn: &[u8], write: bool) -> bool {
    vmm.memory().write_bytes(CODE_GPA, insn).unwrap();
    vmm.kernel_mut().x86_regs[vcpu].rip = CODE_GVA;
    let qualification = if write { EPT_QUAL_WRITE } else { 1 };
    let fault = X86Fault::EptViolation { gpa, qualification, ip: CODE_GVA, len: insn.len() as u64 };
    vmm.fault_handle(vcpu, &fault)
}

/// `mov dword [rax], ecx` with ecx = `value`.
pub fn x86_store32<D: MmioDevice>(vmm: &mut X86Vmm<MockKernel, D>, vcpu: usize, gpa: u64, value: u32) -> bool {
    vmm.kernel_mut().x86_regs[vcpu].rcx = u64::from(value);
    x86_mmio(vmm, vcpu, gpa, &[0x89, 0x08], true)
}

/// `mov ecx, dword [rax]`, returning ecx.
pub fn x86_load32<D: MmioDevice>(vmm: &mut X86Vmm<MockKernel, D>, vcpu: usize, gpa: u64) -> Option<u32> {
    x86_mmio(vmm, vcpu, gpa, &[0x8b, 0x08], false).then(|| vmm.kernel().x86_regs[vcpu].rcx as u32)
}

/// `sw a5, 0(zero)` as reported in htinst
pub const HTINST_SW_A5: u64 = 0x00f0_2023;
/// `lw a5, 0(zero)` as reported in htinst
pub const HTINST_LW_A5: u64 = 0x0000_2783;
const REG_A5: usize = 15;

/// Emulate `sw a5` to `addr` from `hart` with a5 = `value`.
pub fn riscv_store<D: MmioDevice>(vmm: &mut RiscvVmm<MockKernel, D>, hart: usize, addr: u64, value: u32) -> bool {
    vmm.kernel_mut().riscv_regs[hart].x[REG_A5] = u64::from(value);
    let ip = vmm.kernel().riscv_regs[hart].pc;
    let fault = RiscvFault::VmFault { addr, cause: CAUSE_GUEST_STORE_PAGE_FAULT, htinst: HTINST_SW_A5, ip };
    vmm.fault_handle(hart, &fault)
}

/// Emulate `lw a5` from `addr` on `hart` and return a5.
pub fn riscv_load<D: MmioDevice>(vmm: &mut RiscvVmm<MockKernel, D>, hart: usize, addr: u64) -> Option<u64> {
    let ip = vmm.kernel().riscv_regs[hart].pc;
    let fault = RiscvFault::VmFault { addr, cause: CAUSE_GUEST_LOAD_PAGE_FAULT, htinst: HTINST_LW_A5, ip };
    vmm.fault_handle(hart, &fault).then(|| vmm.kernel().riscv_regs[hart].x[REG_A5])
}

/// Guest side of PLIC bring-up: priority 1 for `source` and enable it in
/// the S-mode context of `hart`.
pub fn plic_enable<D: MmioDevice>(vmm: &mut RiscvVmm<MockKernel, D>, hart: usize, source: u32) {
    assert!(riscv_store(vmm, hart, PLIC_PADDR + 4 * u64::from(source), 1));
    let word = PLIC_PADDR + PLIC_ENABLE_BASE + PLIC_ENABLE_STRIDE * s_context(hart) as u64 + 4 * u64::from(source / 32);
    assert!(riscv_store(vmm, hart, word, 1 << (source % 32)));
}
