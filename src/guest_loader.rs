//! Guest Loader Module
//!
//! Places a Linux kernel, its device tree and an initial RAM disk into
//! guest RAM before the boot vCPU is started. Placement follows the arm64
//! boot protocol:
//!
//! - the kernel goes at `text_offset` from a 2MiB aligned RAM base
//! - the DTB is at most 2MiB and 8-byte aligned
//! - every image lies inside RAM and no two images overlap

use crate::dtb;
use crate::error::{Result, VmmError};
use crate::memory::GuestMemoryMap;

/// "ARM\x64" little-endian, at offset 0x38 of the Image header
pub const LINUX_IMAGE_MAGIC: u32 = 0x644d_5241;
/// Largest DTB Linux accepts
pub const LINUX_DTB_MAX_SIZE: usize = 1 << 21;
/// Alignment the kernel's RAM base must have
pub const LINUX_RAM_ALIGN: u64 = 1 << 21;

const HEADER_SIZE: usize = 0x40;

/// Linux ARM64 Image header format:
/// - Offset 0x00: MZ magic (for UEFI) or branch instruction
/// - Offset 0x08: text_offset (kernel offset from a 2MiB aligned base)
/// - Offset 0x10: image_size (effective size, 0 on old kernels)
/// - Offset 0x18: flags
/// - Offset 0x38: "ARM\x64" magic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinuxImageHeader {
    pub text_offset: u64,
    pub image_size: u64,
    pub flags: u64,
}

fn le_u64(bytes: &[u8], off: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[off..off + 8]);
    u64::from_le_bytes(raw)
}

impl LinuxImageHeader {
    pub fn parse(image: &[u8]) -> Result<Self> {
        if image.len() < HEADER_SIZE {
            return Err(VmmError::InvalidImage("kernel image shorter than its header"));
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&image[0x38..0x3c]);
        if u32::from_le_bytes(magic) != LINUX_IMAGE_MAGIC {
            log::error!("Linux kernel image magic check failed");
            return Err(VmmError::InvalidImage("bad arm64 Image magic"));
        }
        Ok(Self {
            text_offset: le_u64(image, 0x08),
            image_size: le_u64(image, 0x10),
            flags: le_u64(image, 0x18),
        })
    }
}

/// A guest-physical destination range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestRange {
    pub start: u64,
    pub size: u64,
}

impl GuestRange {
    pub const fn new(start: u64, size: u64) -> Self {
        Self { start, size }
    }

    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.size)
    }

    fn within(&self, outer: &GuestRange) -> bool {
        self.start >= outer.start && self.end() <= outer.end()
    }

    fn overlaps(&self, other: &GuestRange) -> bool {
        !(other.start >= self.end() || other.end() <= self.start)
    }
}

/// Check that kernel, DTB and initrd all reside in RAM and pairwise do
/// not overlap.
pub fn validate_image_locations(
    ram: GuestRange,
    kernel: GuestRange,
    dtb: GuestRange,
    initrd: GuestRange,
) -> Result<()> {
    let in_ram = [
        (kernel, "kernel image"),
        (dtb, "DTB"),
        (initrd, "initial RAM disk"),
    ];
    for (range, what) in in_ram {
        if !range.within(&ram) {
            log::error!(
                "{} [0x{:x}..0x{:x}) does not reside within RAM [0x{:x}, 0x{:x})",
                what, range.start, range.end(), ram.start, ram.end()
            );
            return Err(VmmError::ImageLayout("image outside guest RAM"));
        }
    }

    let pairs = [
        (kernel, dtb, "kernel image", "DTB"),
        (kernel, initrd, "kernel image", "initial RAM disk"),
        (dtb, initrd, "DTB", "initial RAM disk"),
    ];
    for (a, b, a_name, b_name) in pairs {
        if a.overlaps(&b) {
            log::error!(
                "{} [0x{:x}..0x{:x}) overlaps with the destination of the {} [0x{:x}, 0x{:x})",
                a_name, a.start, a.end(), b_name, b.start, b.end()
            );
            return Err(VmmError::ImageLayout("overlapping guest images"));
        }
    }
    Ok(())
}

/// Where the boot vCPU should start and what to hand it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinuxBoot {
    pub kernel_pc: u64,
    pub dtb: u64,
    pub initrd: u64,
}

/// Validate and copy the boot images into guest RAM.
///
/// The kernel lands at `ram.gpa + text_offset`, which is also its entry
/// point.
pub fn linux_setup_images(
    mem: &GuestMemoryMap,
    kernel: &[u8],
    dtb_blob: &[u8],
    dtb_dest: u64,
    initrd: &[u8],
    initrd_dest: u64,
) -> Result<LinuxBoot> {
    let header = LinuxImageHeader::parse(kernel)?;
    let ram = *mem.ram();

    if ram.gpa % LINUX_RAM_ALIGN != 0 {
        log::error!("guest RAM base 0x{:x} is not 2MiB aligned", ram.gpa);
        return Err(VmmError::ImageLayout("RAM base not 2MiB aligned"));
    }
    let kernel_dest = ram.gpa + header.text_offset;

    if dtb_blob.len() > LINUX_DTB_MAX_SIZE {
        log::error!(
            "Linux expects size of DTB to be less than 2MB, DTB size is 0x{:x} bytes",
            dtb_blob.len()
        );
        return Err(VmmError::ImageLayout("DTB larger than 2MiB"));
    }
    if dtb_dest % 8 != 0 {
        log::error!(
            "Linux expects DTB address to be on an 8-byte boundary, DTB address is 0x{:x}",
            dtb_dest
        );
        return Err(VmmError::ImageLayout("DTB not 8-byte aligned"));
    }
    if !dtb::check_magic(dtb_blob) {
        return Err(VmmError::InvalidImage("device tree magic mismatch"));
    }

    let kernel_size = (kernel.len() as u64).max(header.image_size);
    validate_image_locations(
        GuestRange::new(ram.gpa, ram.size),
        GuestRange::new(kernel_dest, kernel_size),
        GuestRange::new(dtb_dest, dtb_blob.len() as u64),
        GuestRange::new(initrd_dest, initrd.len() as u64),
    )?;

    log::info!("copying guest kernel image to 0x{:x} (0x{:x} bytes)", kernel_dest, kernel.len());
    mem.write_bytes(kernel_dest, kernel)?;
    log::info!("copying guest DTB to 0x{:x} (0x{:x} bytes)", dtb_dest, dtb_blob.len());
    mem.write_bytes(dtb_dest, dtb_blob)?;
    log::info!("copying guest initial RAM disk to 0x{:x} (0x{:x} bytes)", initrd_dest, initrd.len());
    mem.write_bytes(initrd_dest, initrd)?;

    Ok(LinuxBoot {
        kernel_pc: kernel_dest,
        dtb: dtb_dest,
        initrd: initrd_dest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjacent_ranges_do_not_overlap() {
        let a = GuestRange::new(0x1000, 0x1000);
        let b = GuestRange::new(0x2000, 0x10);
        assert!(!a.overlaps(&b));
        assert!(!b.overlaps(&a));
        assert!(a.overlaps(&GuestRange::new(0x1fff, 1)));
    }

    #[test]
    fn test_header_rejects_short_image() {
        assert_eq!(
            LinuxImageHeader::parse(&[0u8; 0x20]),
            Err(VmmError::InvalidImage("kernel image shorter than its header"))
        );
    }
}
