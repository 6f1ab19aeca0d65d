//! Virtual GIC tests
//!
//! List register allocation, the overflow queue behind it, maintenance
//! handling and SGI delivery, driven through guest MMIO like a real guest
//! would.

mod common;

use common::{arm_enable_irqs, arm_load, arm_store, init_logger, Call, GuestRam, MockKernel};
use microvmm::arch::aarch64::vgic::distributor::{GicVersion, GICD_CTLR, GICD_ICENABLER_BASE, GICD_SGIR};
use microvmm::arch::aarch64::{ArmFault, ArmVmm};
use microvmm::platform::{GIC_DIST_PADDR, GUEST_RAM_BASE};
use microvmm::{NoDevice, Vmm, VmmError};

type TestVmm = ArmVmm<MockKernel, NoDevice>;

fn vmm(ram: &mut GuestRam, num_vcpus: usize, version: GicVersion) -> TestVmm {
    let mut vmm = ArmVmm::with_gic_version(MockKernel::new(), ram.map(), num_vcpus, version).unwrap();
    vmm.controller_init().unwrap();
    vmm
}

#[test]
fn test_overflow_queue_drains_through_maintenance() {
    init_logger();
    let mut ram = GuestRam::new(GUEST_RAM_BASE, 0x1000);
    let mut vmm = vmm(&mut ram, 1, GicVersion::V2);

    // IRQs 40..46 forwarded from channels 10..16
    let irqs: Vec<u32> = (40..46).collect();
    for (i, &irq) in irqs.iter().enumerate() {
        vmm.register_passthrough(0, irq, 10 + i as u32).unwrap();
    }
    arm_enable_irqs(&mut vmm, 0, &irqs);
    // Enabling a passthrough IRQ acks any interrupt that arrived before
    assert_eq!(vmm.kernel().irq_acks(), vec![10, 11, 12, 13, 14, 15]);
    vmm.kernel_mut().calls.clear();

    // Test 1: six injections, only four list registers
    for &irq in &irqs {
        vmm.virq_inject(0, irq).unwrap();
    }
    let loaded: Vec<Call> = vmm.kernel().calls.clone();
    assert_eq!(
        loaded,
        vec![
            Call::InjectIrq { vcpu: 0, irq: 40, lr: 0 },
            Call::InjectIrq { vcpu: 0, irq: 41, lr: 1 },
            Call::InjectIrq { vcpu: 0, irq: 42, lr: 2 },
            Call::InjectIrq { vcpu: 0, irq: 43, lr: 3 },
        ]
    );
    assert_eq!(vmm.vgic().vcpu(0).unwrap().irq_queue.len(), 2);

    // Test 2: completing LR0 and LR1 pulls the queued IRQs in
    for idx in [0, 1] {
        assert!(vmm.fault_handle(0, &ArmFault::VgicMaintenance { idx }));
    }
    assert_eq!(
        &vmm.kernel().calls[4..],
        &[
            Call::IrqAck(10),
            Call::InjectIrq { vcpu: 0, irq: 44, lr: 0 },
            Call::IrqAck(11),
            Call::InjectIrq { vcpu: 0, irq: 45, lr: 1 },
        ]
    );

    // Test 3: the rest completes in LR order 2, 3, 0, 1
    for idx in [2, 3, 0, 1] {
        assert!(vmm.fault_handle(0, &ArmFault::VgicMaintenance { idx }));
    }
    assert_eq!(vmm.kernel().irq_acks(), vec![10, 11, 12, 13, 14, 15]);
    assert_eq!(vmm.kernel().injected_irqs().len(), 6);
    assert!(vmm.vgic().vcpu(0).unwrap().irq_queue.is_empty());
    for &irq in &irqs {
        assert!(!vmm.vgic().dist().is_pending(0, irq));
    }
}

#[test]
fn test_maintenance_on_empty_lr_fails() {
    let mut ram = GuestRam::new(GUEST_RAM_BASE, 0x1000);
    let mut vmm = vmm(&mut ram, 1, GicVersion::V2);
    assert!(!vmm.fault_handle(0, &ArmFault::VgicMaintenance { idx: 0 }));
    assert!(!vmm.fault_handle(0, &ArmFault::VgicMaintenance { idx: 7 }));
}

#[test]
fn test_inject_requires_registration_and_enable() {
    init_logger();
    let mut ram = GuestRam::new(GUEST_RAM_BASE, 0x1000);
    let mut vmm = vmm(&mut ram, 1, GicVersion::V2);

    assert_eq!(vmm.virq_inject(0, 50), Err(VmmError::IrqNotRegistered(50)));
    assert_eq!(vmm.virq_inject(3, 27), Err(VmmError::InvalidVcpu(3)));

    vmm.virq_register(0, 50, microvmm::VirqAck::Nop).unwrap();
    assert_eq!(vmm.virq_register(0, 50, microvmm::VirqAck::Nop), Err(VmmError::IrqAlreadyRegistered(50)));
    // Distributor still off
    assert_eq!(vmm.virq_inject(0, 50), Err(VmmError::IrqNotEnabled(50)));

    arm_enable_irqs(&mut vmm, 0, &[50]);
    vmm.virq_inject(0, 50).unwrap();
    // Already pending: no second list register
    vmm.virq_inject(0, 50).unwrap();
    assert_eq!(vmm.kernel().injected_irqs(), vec![(0, 50)]);

    // Disabled again by the guest
    assert!(vmm.fault_handle(0, &ArmFault::VgicMaintenance { idx: 0 }));
    assert!(arm_store(&mut vmm, 0, GIC_DIST_PADDR + GICD_ICENABLER_BASE + 4, 1 << 18));
    assert_eq!(vmm.virq_inject(0, 50), Err(VmmError::IrqNotEnabled(50)));
}

#[test]
fn test_distributor_registers_read_back() {
    let mut ram = GuestRam::new(GUEST_RAM_BASE, 0x1000);
    let mut vmm = vmm(&mut ram, 2, GicVersion::V2);

    assert_eq!(arm_load(&mut vmm, 0, GIC_DIST_PADDR + GICD_CTLR), Some(0));
    arm_enable_irqs(&mut vmm, 0, &[33]);
    assert_eq!(arm_load(&mut vmm, 0, GIC_DIST_PADDR + GICD_CTLR), Some(1));
    // ISENABLER1 shows the enabled SPI, ISENABLER0 the always-on SGIs
    assert_eq!(arm_load(&mut vmm, 0, GIC_DIST_PADDR + 0x104), Some(0b10));
    assert_eq!(arm_load(&mut vmm, 1, GIC_DIST_PADDR + 0x100), Some(0xffff));
    // Component ID
    assert_eq!(arm_load(&mut vmm, 0, GIC_DIST_PADDR + 0xffc), Some(0xb1));
}

#[test]
fn test_sgir_reaches_powered_on_vcpus_only() {
    init_logger();
    let mut ram = GuestRam::new(GUEST_RAM_BASE, 0x1000);
    let mut vmm = vmm(&mut ram, 2, GicVersion::V2);
    vmm.guest_start(0, 0x4008_0000, 0, 0).unwrap();
    arm_enable_irqs(&mut vmm, 0, &[]);
    vmm.kernel_mut().calls.clear();

    // Test 1: SGI 1 to target list {vCPU 1}, which is still off
    let sgir = (0b10 << 16) | 1;
    assert!(arm_store(&mut vmm, 0, GIC_DIST_PADDR + GICD_SGIR, sgir));
    assert!(vmm.kernel().injected_irqs().is_empty());

    // Test 2: same SGI once vCPU 1 is running
    vmm.guest_start(1, 0x4008_0000, 0, 0).unwrap();
    assert!(arm_store(&mut vmm, 0, GIC_DIST_PADDR + GICD_SGIR, sgir));
    assert_eq!(vmm.kernel().injected_irqs(), vec![(1, 1)]);

    // Test 3: "all but self" from vCPU 1 hits vCPU 0
    assert!(arm_store(&mut vmm, 1, GIC_DIST_PADDR + GICD_SGIR, 1 << 24));
    assert_eq!(vmm.kernel().injected_irqs(), vec![(1, 1), (0, 0)]);
}

#[test]
fn test_gicv3_distributor_enable() {
    init_logger();
    let mut ram = GuestRam::new(GUEST_RAM_BASE, 0x1000);
    let mut vmm = vmm(&mut ram, 1, GicVersion::V3);
    vmm.virq_register(0, 64, microvmm::VirqAck::Nop).unwrap();

    assert_eq!(vmm.virq_inject(0, 64), Err(VmmError::IrqNotEnabled(64)));
    arm_enable_irqs(&mut vmm, 0, &[64]);
    vmm.virq_inject(0, 64).unwrap();
    assert_eq!(vmm.kernel().injected_irqs(), vec![(0, 64)]);
}

#[test]
fn test_virtual_timer_ppi_rearms_on_failure() {
    let mut ram = GuestRam::new(GUEST_RAM_BASE, 0x1000);
    let mut vmm = vmm(&mut ram, 1, GicVersion::V2);

    // PPI 27 is pre-registered but the guest never enabled it
    assert!(vmm.fault_handle(0, &ArmFault::VppiEvent { irq: 27 }));
    assert_eq!(vmm.kernel().calls, vec![Call::AckVppi { vcpu: 0, irq: 27 }]);
}
