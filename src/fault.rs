//! Fault Region Registry
//!
//! A fixed table of disjoint guest-physical ranges. Each range owns one
//! handler; a trapped access is routed to the first range containing the
//! faulting address together with its offset from the range base.
//!
//! Ranges are half-open (`[base, end)`) and checked for overlap when they
//! are registered, so at most one handler ever sees a given byte.

use crate::error::{Result, VmmError};

/// Registry capacity.
pub const MAX_FAULT_REGIONS: usize = 16;

/// Which emulation a registered range is routed to.
///
/// The interrupt controller variants carry no data: their state lives in
/// the architecture's VMM context. `Device` carries a consumer device
/// model (see [`crate::devices::MmioDevice`]).
#[derive(Debug)]
pub enum RegionHandler<D> {
    /// GIC distributor (AArch64)
    VgicDist,
    /// GICv3 redistributors (AArch64)
    VgicRedist,
    /// PLIC (RISC-V)
    Plic,
    /// Local APIC (x86_64)
    Lapic,
    /// I/O APIC (x86_64)
    Ioapic,
    /// Device model supplied by the VMM user
    Device(D),
}

/// A registered range.
#[derive(Debug)]
pub struct FaultRegion<H> {
    pub base: u64,
    pub end: u64,
    pub handler: H,
}

impl<H> FaultRegion<H> {
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr < self.end
    }

    fn overlaps(&self, base: u64, end: u64) -> bool {
        !(base >= self.end || end <= self.base)
    }
}

/// Fixed-capacity fault region table.
pub struct FaultRegistry<H> {
    regions: [Option<FaultRegion<H>>; MAX_FAULT_REGIONS],
    count: usize,
}

impl<H> FaultRegistry<H> {
    pub fn new() -> Self {
        Self {
            regions: core::array::from_fn(|_| None),
            count: 0,
        }
    }

    /// Register `[base, base + size)`. Returns the slot index.
    ///
    /// Fails on a zero size, on a range that wraps the address space, on
    /// overlap with any registered range, and when the table is full.
    pub fn register(&mut self, base: u64, size: u64, handler: H) -> Result<usize> {
        if size == 0 {
            return Err(VmmError::ZeroSizedRegion);
        }
        let end = base
            .checked_add(size)
            .ok_or(VmmError::RegionOverlap { base, end: u64::MAX })?;

        for region in self.regions[..self.count].iter().flatten() {
            if region.overlaps(base, end) {
                log::error!(
                    "fault region [0x{:x}, 0x{:x}) overlaps [0x{:x}, 0x{:x})",
                    base, end, region.base, region.end
                );
                return Err(VmmError::RegionOverlap { base, end });
            }
        }

        if self.count >= MAX_FAULT_REGIONS {
            log::error!("no free fault region slot for [0x{:x}, 0x{:x})", base, end);
            return Err(VmmError::RegistryFull);
        }

        let idx = self.count;
        self.regions[idx] = Some(FaultRegion { base, end, handler });
        self.count += 1;
        log::debug!("registered fault region {} at [0x{:x}, 0x{:x})", idx, base, end);
        Ok(idx)
    }

    /// Route an access at `addr` to the owning handler.
    ///
    /// `f` receives the offset from the region base. Returns `false` when
    /// no region contains `addr`, otherwise whatever `f` returns.
    pub fn dispatch<F>(&mut self, addr: u64, f: F) -> bool
    where
        F: FnOnce(u64, &mut H) -> bool,
    {
        match self.lookup_mut(addr) {
            Some((offset, handler)) => f(offset, handler),
            None => false,
        }
    }

    /// Find the region containing `addr`.
    pub fn lookup_mut(&mut self, addr: u64) -> Option<(u64, &mut H)> {
        self.regions[..self.count]
            .iter_mut()
            .flatten()
            .find(|r| r.contains(addr))
            .map(|r| (addr - r.base, &mut r.handler))
    }

    /// Number of registered regions.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &FaultRegion<H>> {
        self.regions[..self.count].iter().flatten()
    }
}

impl<H> Default for FaultRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}
