//! Guest physical memory as seen by the VMM
//!
//! Guest RAM is mapped into the VMM's address space by the system
//! description. A [`GuestMemoryMap`] records where each guest region lives
//! (VMM virtual address and host physical address) and performs every
//! access the emulation layer makes into guest memory.
//!
//! Addresses outside the known regions are never guessed at: lookups
//! return `None` and accessors return [`VmmError::AddressOutOfRange`].

use crate::error::{Result, VmmError};

/// One contiguous guest-physical region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestRegion {
    /// Guest physical base
    pub gpa: u64,
    /// Size in bytes
    pub size: u64,
    /// Where the region is mapped in the VMM
    pub vaddr: usize,
    /// Host physical base
    pub pa: u64,
}

impl GuestRegion {
    fn contains(&self, gpa: u64, len: u64) -> bool {
        gpa >= self.gpa
            && gpa
                .checked_add(len)
                .is_some_and(|end| end <= self.gpa.saturating_add(self.size))
    }
}

/// Low RAM plus the optional firmware flash and high RAM windows.
#[derive(Debug, Clone, Copy)]
pub struct GuestMemoryMap {
    ram: GuestRegion,
    flash: Option<GuestRegion>,
    high_ram: Option<GuestRegion>,
}

impl GuestMemoryMap {
    /// # Safety
    ///
    /// `ram.vaddr .. ram.vaddr + ram.size` must be mapped read/write in
    /// this address space for as long as the map is used, and must not be
    /// accessed through Rust references elsewhere while the map is in use.
    pub unsafe fn new(ram: GuestRegion) -> Self {
        Self {
            ram,
            flash: None,
            high_ram: None,
        }
    }

    /// # Safety
    ///
    /// Same contract as [`GuestMemoryMap::new`] for `flash`.
    pub unsafe fn with_flash(mut self, flash: GuestRegion) -> Self {
        self.flash = Some(flash);
        self
    }

    /// # Safety
    ///
    /// Same contract as [`GuestMemoryMap::new`] for `high_ram`.
    pub unsafe fn with_high_ram(mut self, high_ram: GuestRegion) -> Self {
        self.high_ram = Some(high_ram);
        self
    }

    pub fn ram(&self) -> &GuestRegion {
        &self.ram
    }

    fn region(&self, gpa: u64, len: u64) -> Option<&GuestRegion> {
        core::iter::once(&self.ram)
            .chain(self.flash.as_ref())
            .chain(self.high_ram.as_ref())
            .find(|r| r.contains(gpa, len.max(1)))
    }

    /// VMM virtual address backing `gpa`.
    pub fn gpa_to_vaddr(&self, gpa: u64) -> Option<usize> {
        self.region(gpa, 1)
            .map(|r| r.vaddr + (gpa - r.gpa) as usize)
    }

    /// Whether `[gpa, gpa + len)` is backed by a single region.
    pub fn is_mapped(&self, gpa: u64, len: u64) -> bool {
        self.region(gpa, len).is_some()
    }

    /// Host physical address backing `gpa`.
    pub fn gpa_to_pa(&self, gpa: u64) -> Option<u64> {
        self.region(gpa, 1).map(|r| r.pa + (gpa - r.gpa))
    }

    fn vaddr_range(&self, gpa: u64, len: usize) -> Result<usize> {
        self.region(gpa, len as u64)
            .map(|r| r.vaddr + (gpa - r.gpa) as usize)
            .ok_or(VmmError::AddressOutOfRange(gpa))
    }

    /// Read an 8-byte little-endian value (page table entries).
    pub fn read_u64(&self, gpa: u64) -> Result<u64> {
        let vaddr = self.vaddr_range(gpa, 8)?;
        // SAFETY: range checked against a region the constructor vouched for.
        Ok(unsafe { core::ptr::read_volatile(vaddr as *const u64) })
    }

    pub fn read_bytes(&self, gpa: u64, buf: &mut [u8]) -> Result<()> {
        let vaddr = self.vaddr_range(gpa, buf.len())?;
        // SAFETY: as above.
        unsafe {
            core::ptr::copy_nonoverlapping(vaddr as *const u8, buf.as_mut_ptr(), buf.len());
        }
        Ok(())
    }

    pub fn write_bytes(&self, gpa: u64, data: &[u8]) -> Result<()> {
        let vaddr = self.vaddr_range(gpa, data.len())?;
        // SAFETY: as above.
        unsafe {
            core::ptr::copy_nonoverlapping(data.as_ptr(), vaddr as *mut u8, data.len());
        }
        Ok(())
    }

    /// Zero `[gpa, gpa + size)`.
    pub fn zero(&self, gpa: u64, size: u64) -> Result<()> {
        let vaddr = self.vaddr_range(gpa, size as usize)?;
        // SAFETY: as above.
        unsafe {
            core::ptr::write_bytes(vaddr as *mut u8, 0, size as usize);
        }
        Ok(())
    }
}
