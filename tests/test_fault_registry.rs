//! Fault region registry tests
//!
//! Registration overlap rules, offset computation on dispatch and the
//! not-handled result for unclaimed addresses, both on the bare registry
//! and through a full ARM data abort.

mod common;

use common::{init_logger, iss, GuestRam, MockKernel};
use microvmm::arch::aarch64::{ArmFault, ArmVmm};
use microvmm::devices::MmioDevice;
use microvmm::error::VmmError;
use microvmm::fault::{FaultRegistry, MAX_FAULT_REGIONS};
use microvmm::platform::GUEST_RAM_BASE;
use microvmm::Vmm;

/// Device that remembers the last offset it saw
#[derive(Debug, Default)]
struct Probe {
    last_read: Option<u64>,
    last_write: Option<(u64, u64)>,
}

impl MmioDevice for Probe {
    fn read(&mut self, _vcpu_id: usize, offset: u64, _size: u8) -> Option<u64> {
        self.last_read = Some(offset);
        Some(0xabcd)
    }

    fn write(&mut self, _vcpu_id: usize, offset: u64, value: u64, _size: u8) -> bool {
        self.last_write = Some((offset, value));
        true
    }
}

#[test]
fn test_overlapping_registration_fails() {
    init_logger();
    let mut reg: FaultRegistry<u32> = FaultRegistry::new();

    // Test 1: [0x1000, 0x2000) then [0x1800, 0x2800)
    assert_eq!(reg.register(0x1000, 0x1000, 1), Ok(0));
    assert_eq!(
        reg.register(0x1800, 0x1000, 2),
        Err(VmmError::RegionOverlap { base: 0x1800, end: 0x2800 })
    );

    // Test 2: containing and contained ranges fail too
    assert!(reg.register(0x0, 0x10000, 3).is_err());
    assert!(reg.register(0x1100, 0x10, 4).is_err());
    assert_eq!(reg.len(), 1);

    // Test 3: every accepted range is disjoint from all others
    let ranges: Vec<(u64, u64)> = reg.iter().map(|r| (r.base, r.end)).collect();
    assert_eq!(ranges, vec![(0x1000, 0x2000)]);
}

#[test]
fn test_zero_size_and_capacity() {
    let mut reg: FaultRegistry<usize> = FaultRegistry::new();
    assert_eq!(reg.register(0x1000, 0, 0), Err(VmmError::ZeroSizedRegion));

    for i in 0..MAX_FAULT_REGIONS {
        assert_eq!(reg.register(0x1000 * i as u64, 0x1000, i), Ok(i));
    }
    assert_eq!(reg.register(0x100_0000, 0x1000, 99), Err(VmmError::RegistryFull));
}

#[test]
fn test_dispatch_passes_offset() {
    let mut reg: FaultRegistry<&'static str> = FaultRegistry::new();
    reg.register(0x5000, 0x1000, "uart").unwrap();
    reg.register(0x9000, 0x100, "rtc").unwrap();

    let mut seen = None;
    let handled = reg.dispatch(0x5040, |offset, name| {
        seen = Some((offset, *name));
        true
    });
    assert!(handled);
    assert_eq!(seen, Some((0x40, "uart")));

    // Last byte of a region still belongs to it
    let handled = reg.dispatch(0x90ff, |offset, name| offset == 0xff && *name == "rtc");
    assert!(handled);
}

#[test]
fn test_dispatch_miss_is_not_handled() {
    let mut reg: FaultRegistry<u32> = FaultRegistry::new();
    reg.register(0x5000, 0x1000, 0).unwrap();

    let mut called = false;
    assert!(!reg.dispatch(0xDEAD_0000, |_, _| {
        called = true;
        true
    }));
    assert!(!called);
    assert!(!reg.dispatch(0x6000, |_, _| true));
}

#[test]
fn test_data_abort_reaches_device_at_offset() {
    init_logger();
    let mut ram = GuestRam::new(GUEST_RAM_BASE, 0x1000);
    let mut vmm: ArmVmm<MockKernel, Probe> = ArmVmm::new(MockKernel::new(), ram.map(), 1).unwrap();
    vmm.controller_init().unwrap();
    vmm.register_region(0x0a00_0000, 0x1000, Probe::default()).unwrap();

    vmm.kernel_mut().arm_regs[0].pc = 0x4008_0000;
    vmm.kernel_mut().arm_regs[0].gpr.x3 = 0x1234_5678;

    // Test 1: str w3, [x?] at base + 0x40
    let store = ArmFault::VmFault { addr: 0x0a00_0040, fsr: iss(3, true), ip: 0x4008_0000, prefetch: false };
    assert!(vmm.fault_handle(0, &store));
    assert_eq!(vmm.kernel().arm_regs[0].pc, 0x4008_0004);

    // Test 2: ldr w5 at base + 0x10 loads the device value
    let load = ArmFault::VmFault { addr: 0x0a00_0010, fsr: iss(5, false), ip: 0x4008_0004, prefetch: false };
    assert!(vmm.fault_handle(0, &load));
    assert_eq!(vmm.kernel().arm_regs[0].gpr.x5, 0xabcd);
    assert_eq!(vmm.kernel().arm_regs[0].pc, 0x4008_0008);

    let probe = vmm
        .regions()
        .iter()
        .find(|r| r.base == 0x0a00_0000)
        .map(|r| match &r.handler {
            microvmm::RegionHandler::Device(p) => (p.last_read, p.last_write),
            _ => (None, None),
        });
    assert_eq!(probe, Some((Some(0x10), Some((0x40, 0x1234_5678)))));
}

#[test]
fn test_unclaimed_abort_fails_stop() {
    init_logger();
    let mut ram = GuestRam::new(GUEST_RAM_BASE, 0x1000);
    let mut vmm: ArmVmm<MockKernel, Probe> = ArmVmm::new(MockKernel::new(), ram.map(), 1).unwrap();
    vmm.controller_init().unwrap();
    vmm.kernel_mut().arm_regs[0].pc = 0x4008_0000;

    let fault = ArmFault::VmFault { addr: 0xDEAD_0000, fsr: iss(1, false), ip: 0x4008_0000, prefetch: false };
    assert!(!vmm.fault_handle(0, &fault));
    // Not resumed: PC untouched
    assert_eq!(vmm.kernel().arm_regs[0].pc, 0x4008_0000);

    // No syndrome: cannot be emulated even inside a region
    let fault = ArmFault::VmFault { addr: 0x0800_0000, fsr: 0, ip: 0x4008_0000, prefetch: false };
    assert!(!vmm.fault_handle(0, &fault));
}
