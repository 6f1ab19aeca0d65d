//! Guest virtual to guest physical translation
//!
//! Walks the guest's 4-level page table directly out of guest RAM. Only
//! long-mode paging is handled; 2 MiB pages are accepted at the page
//! directory level.

use bitflags::bitflags;

use super::regs::Cr0;
use crate::error::{Result, VmmError};
use crate::memory::GuestMemoryMap;

pub const PAGE_SIZE: u64 = 0x1000;
pub const LARGE_PAGE_SIZE: u64 = 0x20_0000;

/// Physical address bits of a table entry
const PTE_ADDR_MASK: u64 = 0x000f_ffff_ffff_f000;
const PTE_LARGE_ADDR_MASK: u64 = 0x000f_ffff_ffe0_0000;

const PAGE_LEVELS: u8 = 4;
const PD_LEVEL: u8 = 2;

bitflags! {
    /// Page table entry flags
    pub struct PteFlags: u64 {
        const PRESENT = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER = 1 << 2;
        const ACCESSED = 1 << 5;
        const DIRTY = 1 << 6;
        const PAGE_SIZE = 1 << 7;
        const NO_EXECUTE = 1 << 63;
    }
}

/// Translate `gva` using the paging state in `cr0` and `cr3`.
///
/// Returns the guest physical address and the number of bytes left before
/// the end of the page that contains it.
pub fn gva_to_gpa(mem: &GuestMemoryMap, cr0: u64, cr3: u64, gva: u64) -> Result<(u64, u64)> {
    if !Cr0::from_bits_truncate(cr0).contains(Cr0::PG) {
        return Err(VmmError::PagingDisabled);
    }

    let mut table = cr3 & PTE_ADDR_MASK;
    for level in (PD_LEVEL..=PAGE_LEVELS).rev() {
        let entry = read_entry(mem, table, gva, level)?;
        if entry & PteFlags::PAGE_SIZE.bits() != 0 {
            if level != PD_LEVEL {
                return Err(VmmError::Unsupported("1 GiB guest pages"));
            }
            let offset = gva & (LARGE_PAGE_SIZE - 1);
            return Ok(((entry & PTE_LARGE_ADDR_MASK) | offset, LARGE_PAGE_SIZE - offset));
        }
        table = entry & PTE_ADDR_MASK;
    }

    let entry = read_entry(mem, table, gva, 1)?;
    let offset = gva & (PAGE_SIZE - 1);
    Ok(((entry & PTE_ADDR_MASK) | offset, PAGE_SIZE - offset))
}

/// Read the entry for `gva` from the table at `table`, failing if it is
/// not present.
fn read_entry(mem: &GuestMemoryMap, table: u64, gva: u64, level: u8) -> Result<u64> {
    let index = (gva >> (12 + 9 * (level as u64 - 1))) & 0x1ff;
    let entry = mem.read_u64(table + index * 8)?;
    if PteFlags::from_bits_truncate(entry).contains(PteFlags::PRESENT) {
        Ok(entry)
    } else {
        Err(VmmError::PageNotPresent { gva, level })
    }
}
