//! Device Emulation Framework
//!
//! Consumer device models (virtio transports, platform devices) plug into
//! the fault region registry through [`MmioDevice`]. Each model is routed
//! by its registered range, so it only ever sees offsets relative to its
//! own base.

/// Trait for MMIO-accessible devices
///
/// - `read()`/`write()` receive offsets relative to the registered base
/// - `size` parameter indicates access width (1, 2, 4, or 8 bytes)
/// - Return `None`/`false` for invalid offsets; the access then fails
///   the same way an unclaimed address does
pub trait MmioDevice {
    fn read(&mut self, vcpu_id: usize, offset: u64, size: u8) -> Option<u64>;
    fn write(&mut self, vcpu_id: usize, offset: u64, value: u64, size: u8) -> bool;

    /// Return a pending IRQ number if the device wants to assert an interrupt.
    fn pending_irq(&self) -> Option<u32> {
        None
    }

    /// Acknowledge/clear the device-side interrupt.
    fn ack_irq(&mut self) {}
}

/// Placeholder device type for a VMM with no consumer devices.
///
/// Uninhabited, so `RegionHandler::Device` can never be constructed.
#[derive(Debug)]
pub enum NoDevice {}

impl MmioDevice for NoDevice {
    fn read(&mut self, _vcpu_id: usize, _offset: u64, _size: u8) -> Option<u64> {
        match *self {}
    }

    fn write(&mut self, _vcpu_id: usize, _offset: u64, _value: u64, _size: u8) -> bool {
        match *self {}
    }
}

/// Perform one trapped access against `dev`.
///
/// `write` carries the value for a store. Returns the value for a load
/// (0 for a store) together with the device's pending IRQ, which the
/// caller injects before calling [`MmioDevice::ack_irq`].
pub fn access<D: MmioDevice>(
    dev: &mut D,
    vcpu_id: usize,
    offset: u64,
    size: u8,
    write: Option<u64>,
) -> Option<(u64, Option<u32>)> {
    let value = match write {
        Some(value) => {
            if !dev.write(vcpu_id, offset, value, size) {
                log::warn!("device rejected {}-byte write at offset 0x{:x}", size, offset);
                return None;
            }
            0
        }
        None => match dev.read(vcpu_id, offset, size) {
            Some(value) => value,
            None => {
                log::warn!("device rejected {}-byte read at offset 0x{:x}", size, offset);
                return None;
            }
        },
    };
    Some((value, dev.pending_irq()))
}
