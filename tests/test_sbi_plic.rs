//! RISC-V SBI and PLIC tests
//!
//! Ecalls are raised as VS-mode environment calls with the extension in
//! a7 and the function in a6, the way Linux issues them.

mod common;

use common::{init_logger, plic_enable, riscv_load, riscv_store, Call, GuestRam, MockKernel};
use microvmm::arch::riscv64::exception::CAUSE_ECALL_VS;
use microvmm::arch::riscv64::plic::{s_context, PLIC_CONTEXT_BASE, PLIC_CONTEXT_CLAIM, PLIC_CONTEXT_STRIDE, PLIC_CONTEXT_THRESHOLD};
use microvmm::arch::riscv64::regs::{REG_A0, REG_A6, REG_A7, SIP_SEIP, SIP_SSIP, SIP_STIP};
use microvmm::arch::riscv64::sbi::*;
use microvmm::arch::riscv64::{RiscvFault, RiscvRegs, RiscvVcpuReg, RiscvVmm};
use microvmm::platform::PLIC_PADDR;
use microvmm::{NoDevice, Vmm, VirqAck};

const RAM_GPA: u64 = 0x8000_0000;
const NOT_SUPPORTED: u64 = -2i64 as u64;
const INVALID_PARAM: u64 = -3i64 as u64;

type TestVmm = RiscvVmm<MockKernel, NoDevice>;

fn vmm(ram: &mut GuestRam, harts: usize) -> TestVmm {
    let mut vmm = RiscvVmm::new(MockKernel::new(), ram.map(), harts).unwrap();
    vmm.controller_init().unwrap();
    vmm.guest_start(0, RAM_GPA, RAM_GPA + 0x20_0000, 0).unwrap();
    vmm.kernel_mut().calls.clear();
    vmm
}

/// Issue an ecall from `hart` and return (a0, a1).
fn ecall(vmm: &mut TestVmm, hart: usize, eid: u64, fid: u64, args: &[u64]) -> (u64, u64) {
    let regs = &mut vmm.kernel_mut().riscv_regs[hart];
    regs.x[REG_A7 as usize] = eid;
    regs.x[REG_A6 as usize] = fid;
    for (i, &arg) in args.iter().enumerate() {
        regs.x[REG_A0 as usize + i] = arg;
    }
    assert!(vmm.fault_handle(hart, &RiscvFault::VcpuFault { cause: CAUSE_ECALL_VS }));
    let regs = vmm.kernel().riscv_regs[hart];
    (regs.a(0), regs.a(1))
}

#[test]
fn test_base_extension() {
    init_logger();
    let mut ram = GuestRam::new(RAM_GPA, 0x1000);
    let mut vmm = vmm(&mut ram, 1);

    assert_eq!(ecall(&mut vmm, 0, SBI_EXT_BASE, SBI_BASE_GET_SPEC_VERSION, &[]), (0, SBI_SPEC_VERSION));
    assert_eq!(ecall(&mut vmm, 0, SBI_EXT_BASE, SBI_BASE_PROBE_EXTENSION, &[SBI_EXT_HSM]), (0, 1));
    assert_eq!(ecall(&mut vmm, 0, SBI_EXT_BASE, SBI_BASE_PROBE_EXTENSION, &[SBI_EXT_PMU]).0, NOT_SUPPORTED);
    assert_eq!(ecall(&mut vmm, 0, SBI_EXT_BASE, 0x99, &[]).0, NOT_SUPPORTED);
    // Every call stepped over its ecall
    assert_eq!(vmm.kernel().riscv_regs[0].pc, RAM_GPA + 16);
}

#[test]
fn test_unknown_extension_resumes() {
    let mut ram = GuestRam::new(RAM_GPA, 0x1000);
    let mut vmm = vmm(&mut ram, 1);
    assert_eq!(ecall(&mut vmm, 0, SBI_EXT_PMU, 0, &[]).0, NOT_SUPPORTED);
    assert_eq!(ecall(&mut vmm, 0, 0x0a00_0000, 0, &[]).0, NOT_SUPPORTED);
    assert_eq!(vmm.kernel().riscv_regs[0].pc, RAM_GPA + 8);
}

#[test]
fn test_timer_extension() {
    init_logger();
    let mut ram = GuestRam::new(RAM_GPA, 0x1000);
    let mut vmm = vmm(&mut ram, 1);
    vmm.kernel_mut().time = 1000;

    // Test 1: future deadline arms the vCPU timer
    assert_eq!(ecall(&mut vmm, 0, SBI_EXT_TIMER, SBI_TIMER_SET_TIMER, &[5000]).0, 0);
    assert_eq!(vmm.kernel().riscv_vcpu_regs.get(0, RiscvVcpuReg::Timer), 5000);
    assert!(vmm.timer_pending(0));
    assert_eq!(vmm.kernel().sip(0) & SIP_STIP, 0);

    // Test 2: expiry raises STIP once
    vmm.handle_timer();
    assert_ne!(vmm.kernel().sip(0) & SIP_STIP, 0);
    assert!(!vmm.timer_pending(0));

    // Test 3: re-arming clears STIP; a past deadline sets it right away
    ecall(&mut vmm, 0, SBI_EXT_TIMER, SBI_TIMER_SET_TIMER, &[9000]);
    assert_eq!(vmm.kernel().sip(0) & SIP_STIP, 0);
    ecall(&mut vmm, 0, SBI_EXT_TIMER, SBI_TIMER_SET_TIMER, &[10]);
    assert_ne!(vmm.kernel().sip(0) & SIP_STIP, 0);
    assert!(!vmm.timer_pending(0));
}

#[test]
fn test_ipi_and_rfence() {
    let mut ram = GuestRam::new(RAM_GPA, 0x1000);
    let mut vmm = vmm(&mut ram, 3);

    assert_eq!(ecall(&mut vmm, 0, SBI_EXT_IPI, SBI_IPI_SEND_IPI, &[0b10, 0]).0, 0);
    assert_eq!(vmm.kernel().sip(0) & SIP_SSIP, 0);
    assert_ne!(vmm.kernel().sip(1) & SIP_SSIP, 0);
    assert_eq!(vmm.kernel().sip(2) & SIP_SSIP, 0);

    // Mask relative to base 2
    assert_eq!(ecall(&mut vmm, 0, SBI_EXT_RFENCE, SBI_RFENCE_FENCE_I, &[0b1, 2]).0, 0);
    assert_ne!(vmm.kernel().sip(2) & SIP_SSIP, 0);

    assert_eq!(ecall(&mut vmm, 0, SBI_EXT_IPI, SBI_IPI_SEND_IPI, &[0, SBI_HART_MASK_BASE_ALL]).0, 0);
    assert_ne!(vmm.kernel().sip(0) & SIP_SSIP, 0);

    // Hart 3 does not exist
    assert_eq!(ecall(&mut vmm, 0, SBI_EXT_IPI, SBI_IPI_SEND_IPI, &[0b1000, 0]).0, INVALID_PARAM);
}

#[test]
fn test_hart_state_management() {
    init_logger();
    let mut ram = GuestRam::new(RAM_GPA, 0x1000);
    let mut vmm = vmm(&mut ram, 2);

    // Test 1: status, then start hart 1 with an opaque value in a1
    assert_eq!(ecall(&mut vmm, 0, SBI_EXT_HSM, SBI_HSM_HART_GET_STATUS, &[1]), (0, SBI_HSM_STATE_STOPPED));
    let (err, _) = ecall(&mut vmm, 0, SBI_EXT_HSM, SBI_HSM_HART_START, &[1, 0x8020_0000, 0xfeed]);
    assert_eq!(err, 0);
    assert_eq!(vmm.kernel().calls, vec![Call::VcpuRestart { vcpu: 1, pc: 0x8020_0000 }]);
    let hart1: RiscvRegs = vmm.kernel().riscv_regs[1];
    assert_eq!((hart1.pc, hart1.a(0), hart1.a(1)), (0x8020_0000, 1, 0xfeed));

    // Test 2: starting it again fails
    let (err, _) = ecall(&mut vmm, 0, SBI_EXT_HSM, SBI_HSM_HART_START, &[1, 0x8020_0000, 0]);
    assert_eq!(err, -6i64 as u64);
    assert_eq!(ecall(&mut vmm, 0, SBI_EXT_HSM, SBI_HSM_HART_GET_STATUS, &[1]), (0, SBI_HSM_STATE_STARTED));
    assert_eq!(ecall(&mut vmm, 0, SBI_EXT_HSM, SBI_HSM_HART_GET_STATUS, &[7]).0, INVALID_PARAM);

    // Test 3: hart 1 stops itself and is not resumed
    vmm.kernel_mut().calls.clear();
    let pc = vmm.kernel().riscv_regs[1].pc;
    ecall(&mut vmm, 1, SBI_EXT_HSM, SBI_HSM_HART_STOP, &[]);
    assert_eq!(vmm.kernel().calls, vec![Call::VcpuStop(1)]);
    assert_eq!(vmm.kernel().riscv_regs[1].pc, pc);
    assert!(!vmm.vcpus().is_on(1));
}

#[test]
fn test_system_reset() {
    let mut ram = GuestRam::new(RAM_GPA, 0x1000);
    let mut vmm = vmm(&mut ram, 2);

    // Cold reboot is not offered
    assert_eq!(ecall(&mut vmm, 0, SBI_EXT_SRST, SBI_SRST_SYSTEM_RESET, &[1, 0]).0, NOT_SUPPORTED);
    assert!(vmm.kernel().calls.is_empty());

    ecall(&mut vmm, 0, SBI_EXT_SRST, SBI_SRST_SYSTEM_RESET, &[SBI_SRST_TYPE_SHUTDOWN, 0]);
    assert_eq!(vmm.kernel().calls, vec![Call::VcpuStop(0), Call::VcpuStop(1)]);
}

#[test]
fn test_debug_console() {
    init_logger();
    let mut ram = GuestRam::new(RAM_GPA, 0x1000);
    let mut vmm = vmm(&mut ram, 1);
    vmm.memory().write_bytes(RAM_GPA + 0x800, b"hello\n").unwrap();

    assert_eq!(ecall(&mut vmm, 0, SBI_EXT_DBCN, SBI_DBCN_WRITE, &[6, RAM_GPA + 0x800, 0]), (0, 6));
    assert_eq!(ecall(&mut vmm, 0, SBI_EXT_DBCN, SBI_DBCN_READ, &[16, RAM_GPA, 0]), (0, 0));
    assert_eq!(ecall(&mut vmm, 0, SBI_EXT_DBCN, SBI_DBCN_WRITE_BYTE, &[b'!' as u64]).0, 0);
    // Buffer outside guest RAM
    assert_eq!(ecall(&mut vmm, 0, SBI_EXT_DBCN, SBI_DBCN_WRITE, &[4, 0x1000, 0]).0, INVALID_PARAM);
}

#[test]
fn test_plic_routes_by_enable_bits() {
    init_logger();
    let mut ram = GuestRam::new(RAM_GPA, 0x1000);
    let mut vmm = vmm(&mut ram, 2);
    // Registered against hart 0, enabled by the guest on hart 1 only
    vmm.virq_register(0, 7, VirqAck::Nop).unwrap();
    plic_enable(&mut vmm, 1, 7);

    vmm.virq_inject(0, 7).unwrap();
    assert_eq!(vmm.kernel().sip(0) & SIP_SEIP, 0);
    assert_ne!(vmm.kernel().sip(1) & SIP_SEIP, 0);

    // Hart 0 has nothing to claim
    let claim0 = PLIC_PADDR + PLIC_CONTEXT_BASE + PLIC_CONTEXT_STRIDE * s_context(0) as u64 + PLIC_CONTEXT_CLAIM;
    assert_eq!(riscv_load(&mut vmm, 0, claim0), Some(0));
    let claim1 = PLIC_PADDR + PLIC_CONTEXT_BASE + PLIC_CONTEXT_STRIDE * s_context(1) as u64 + PLIC_CONTEXT_CLAIM;
    assert_eq!(riscv_load(&mut vmm, 1, claim1), Some(7));
    assert_eq!(vmm.kernel().sip(1) & SIP_SEIP, 0);
    assert!(riscv_store(&mut vmm, 1, claim1, 7));
}

#[test]
fn test_plic_threshold_masks_source() {
    let mut ram = GuestRam::new(RAM_GPA, 0x1000);
    let mut vmm = vmm(&mut ram, 1);
    vmm.register_passthrough(0, 9, 2).unwrap();
    plic_enable(&mut vmm, 0, 9);

    let threshold = PLIC_PADDR + PLIC_CONTEXT_BASE + PLIC_CONTEXT_STRIDE * s_context(0) as u64 + PLIC_CONTEXT_THRESHOLD;
    assert!(riscv_store(&mut vmm, 0, threshold, 1));
    vmm.handle_passthrough(2).unwrap();
    assert!(vmm.plic().is_pending(9));
    assert_eq!(vmm.kernel().sip(0) & SIP_SEIP, 0);

    // Lowering the threshold releases it
    assert!(riscv_store(&mut vmm, 0, threshold, 0));
    assert_ne!(vmm.kernel().sip(0) & SIP_SEIP, 0);
}

#[test]
fn test_unclaimed_guest_fault_is_fatal() {
    let mut ram = GuestRam::new(RAM_GPA, 0x1000);
    let mut vmm = vmm(&mut ram, 1);
    assert!(!riscv_store(&mut vmm, 0, 0x1000_0000, 1));
    assert_eq!(riscv_load(&mut vmm, 0, 0x1000_0000), None);
}
