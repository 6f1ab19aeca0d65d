//! End-to-end boot and lifecycle tests
//!
//! Bring a single-vCPU guest up the way a VMM protection domain does at
//! init, forward a hardware interrupt into it, then drive the power
//! lifecycle through PSCI and restart.

mod common;

use common::{arm_enable_irqs, init_logger, Call, GuestRam, MockKernel};
use microvmm::arch::aarch64::defs::{EC_SMC64, EC_WFI_WFE, ESR_EC_SHIFT, SPSR_EL1H};
use microvmm::arch::aarch64::{ArmFault, ArmVmm, UserContext};
use microvmm::arch::riscv64::regs::{REG_A0, REG_A1};
use microvmm::arch::riscv64::RiscvVmm;
use microvmm::platform::GUEST_RAM_BASE;
use microvmm::{NoDevice, VcpuRunState, Vmm, VmmError};

const RAM_SIZE: usize = 0x1_0000;

fn smc(vmm: &mut ArmVmm<MockKernel, NoDevice>, vcpu: usize, args: [u64; 4]) -> bool {
    let regs = &mut vmm.kernel_mut().arm_regs[vcpu];
    regs.gpr.x0 = args[0];
    regs.gpr.x1 = args[1];
    regs.gpr.x2 = args[2];
    regs.gpr.x3 = args[3];
    vmm.fault_handle(vcpu, &ArmFault::VcpuFault { hsr: EC_SMC64 << ESR_EC_SHIFT })
}

#[test]
fn test_boot_and_forward_interrupt() {
    init_logger();
    let mut ram = GuestRam::new(GUEST_RAM_BASE, RAM_SIZE);
    let mut vmm: ArmVmm<MockKernel, NoDevice> = ArmVmm::new(MockKernel::new(), ram.map(), 1).unwrap();

    vmm.controller_init().unwrap();
    vmm.register_passthrough(0, 222, 1).unwrap();
    vmm.guest_start(0, 0x8_0000, 0x47f0_0000, 0x4700_0000).unwrap();

    // Entry state is in place before the vCPU is resumed
    assert_eq!(vmm.kernel().calls, vec![Call::VcpuRestart { vcpu: 0, pc: 0x8_0000 }]);
    let regs = vmm.kernel().arm_regs[0];
    assert_eq!(regs.pc, 0x8_0000);
    assert_eq!(regs.gpr.x0, 0x47f0_0000);
    assert_eq!(regs.spsr, SPSR_EL1H);
    assert!(vmm.vcpus().is_on(0));

    // Guest Linux brings up its GIC driver
    arm_enable_irqs(&mut vmm, 0, &[222]);
    vmm.kernel_mut().calls.clear();

    vmm.handle_passthrough(1).unwrap();
    assert_eq!(vmm.kernel().injected_irqs(), vec![(0, 222)]);
}

#[test]
fn test_interrupt_before_guest_enables_it() {
    let mut ram = GuestRam::new(GUEST_RAM_BASE, RAM_SIZE);
    let mut vmm: ArmVmm<MockKernel, NoDevice> = ArmVmm::new(MockKernel::new(), ram.map(), 1).unwrap();
    vmm.controller_init().unwrap();
    vmm.register_passthrough(0, 222, 1).unwrap();
    vmm.guest_start(0, 0x8_0000, 0x47f0_0000, 0).unwrap();

    assert_eq!(vmm.handle_passthrough(1), Err(VmmError::IrqNotEnabled(222)));
    assert!(vmm.kernel().injected_irqs().is_empty());
}

#[test]
fn test_wfi_waits_until_interrupt() {
    let mut ram = GuestRam::new(GUEST_RAM_BASE, RAM_SIZE);
    let mut vmm: ArmVmm<MockKernel, NoDevice> = ArmVmm::new(MockKernel::new(), ram.map(), 1).unwrap();
    vmm.controller_init().unwrap();
    vmm.register_passthrough(0, 222, 1).unwrap();
    vmm.guest_start(0, 0x8_0000, 0x47f0_0000, 0).unwrap();
    arm_enable_irqs(&mut vmm, 0, &[222]);
    assert_eq!(vmm.vcpus().run_state(0), Some(VcpuRunState::Running));

    assert!(vmm.fault_handle(0, &ArmFault::VcpuFault { hsr: EC_WFI_WFE << ESR_EC_SHIFT }));
    assert_eq!(vmm.vcpus().run_state(0), Some(VcpuRunState::WaitingForIrq));

    vmm.handle_passthrough(1).unwrap();
    assert_eq!(vmm.vcpus().run_state(0), Some(VcpuRunState::Running));
}

#[test]
fn test_psci_cpu_on_and_system_off() {
    init_logger();
    let mut ram = GuestRam::new(GUEST_RAM_BASE, RAM_SIZE);
    let mut vmm: ArmVmm<MockKernel, NoDevice> = ArmVmm::new(MockKernel::new(), ram.map(), 2).unwrap();
    vmm.controller_init().unwrap();
    vmm.guest_start(0, 0x4008_0000, 0x4800_0000, 0).unwrap();
    vmm.kernel_mut().calls.clear();

    // Test 1: CPU_ON for vCPU 1
    assert!(smc(&mut vmm, 0, [0xc400_0003, 1, 0x4008_1000, 0x55]));
    assert_eq!(vmm.kernel().calls, vec![Call::VcpuRestart { vcpu: 1, pc: 0x4008_1000 }]);
    assert_eq!(vmm.kernel().arm_regs[0].gpr.x0, 0);
    assert_eq!(vmm.kernel().arm_regs[0].pc, 0x4008_0004);
    assert_eq!(vmm.kernel().arm_regs[1].gpr.x0, 0x55);
    assert!(vmm.vcpus().is_on(1));

    // Test 2: a second CPU_ON reports ALREADY_ON
    assert!(smc(&mut vmm, 0, [0xc400_0003, 1, 0x4008_1000, 0]));
    assert_eq!(vmm.kernel().arm_regs[0].gpr.x0, -4i64 as u64);

    // Test 3: SYSTEM_OFF stops the caller
    vmm.kernel_mut().calls.clear();
    assert!(smc(&mut vmm, 1, [0x8400_0008, 0, 0, 0]));
    assert_eq!(vmm.kernel().calls, vec![Call::VcpuStop(1)]);
    assert!(!vmm.vcpus().is_on(1));
    assert!(vmm.vcpus().is_on(0));
}

#[test]
fn test_unknown_smc_service_is_fatal() {
    let mut ram = GuestRam::new(GUEST_RAM_BASE, RAM_SIZE);
    let mut vmm: ArmVmm<MockKernel, NoDevice> = ArmVmm::new(MockKernel::new(), ram.map(), 1).unwrap();
    vmm.controller_init().unwrap();
    // SiP service call
    assert!(!smc(&mut vmm, 0, [0xc200_0001, 0, 0, 0]));
}

#[test]
fn test_restart_clears_guest_state() {
    init_logger();
    let mut ram = GuestRam::new(GUEST_RAM_BASE, RAM_SIZE);
    let mut vmm: ArmVmm<MockKernel, NoDevice> = ArmVmm::new(MockKernel::new(), ram.map(), 1).unwrap();
    vmm.controller_init().unwrap();
    vmm.register_passthrough(0, 222, 1).unwrap();
    vmm.guest_start(0, 0x4008_0000, 0x4000_8000, 0).unwrap();
    arm_enable_irqs(&mut vmm, 0, &[222]);
    vmm.memory().write_bytes(GUEST_RAM_BASE + 0x100, &[0xa5; 64]).unwrap();
    vmm.kernel_mut().calls.clear();

    vmm.guest_restart(0, GUEST_RAM_BASE, RAM_SIZE as u64).unwrap();
    assert_eq!(vmm.kernel().calls.first(), Some(&Call::VcpuStop(0)));
    assert!(!vmm.vcpus().is_on(0));
    assert_eq!(vmm.kernel().arm_regs[0], UserContext::default());

    let mut buf = [0xffu8; 64];
    vmm.memory().read_bytes(GUEST_RAM_BASE + 0x100, &mut buf).unwrap();
    assert_eq!(buf, [0u8; 64]);

    // The distributor is back to reset: the guest has to enable the IRQ
    // again, but the binding survives
    assert_eq!(vmm.handle_passthrough(1), Err(VmmError::IrqNotEnabled(222)));
    vmm.guest_start(0, 0x4008_0000, 0x4000_8000, 0).unwrap();
    arm_enable_irqs(&mut vmm, 0, &[222]);
    vmm.handle_passthrough(1).unwrap();
    assert_eq!(vmm.kernel().injected_irqs(), vec![(0, 222)]);
}

#[test]
fn test_restart_rejects_range_outside_ram() {
    let mut ram = GuestRam::new(GUEST_RAM_BASE, RAM_SIZE);
    let mut vmm: ArmVmm<MockKernel, NoDevice> = ArmVmm::new(MockKernel::new(), ram.map(), 1).unwrap();
    assert!(vmm.guest_restart(0, GUEST_RAM_BASE, 2 * RAM_SIZE as u64).is_err());
    assert_eq!(vmm.guest_restart(1, GUEST_RAM_BASE, 0x1000), Err(VmmError::InvalidVcpu(1)));
}

#[test]
fn test_riscv_boot_registers() {
    let mut ram = GuestRam::new(0x8000_0000, RAM_SIZE);
    let mut vmm: RiscvVmm<MockKernel, NoDevice> = RiscvVmm::new(MockKernel::new(), ram.map(), 2).unwrap();
    vmm.controller_init().unwrap();
    vmm.guest_start(1, 0x8020_0000, 0x8220_0000, 0).unwrap();

    let regs = vmm.kernel().riscv_regs[1];
    assert_eq!(regs.pc, 0x8020_0000);
    assert_eq!(regs.x[REG_A0 as usize], 1);
    assert_eq!(regs.x[REG_A1 as usize], 0x8220_0000);
    assert_eq!(vmm.kernel().calls, vec![Call::VcpuRestart { vcpu: 1, pc: 0x8020_0000 }]);
}
