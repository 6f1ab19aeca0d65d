//! Guest DTB (Device Tree Blob) parsing
//!
//! Reads the guest device tree the VMM is about to hand to Linux and
//! extracts what the VMM itself needs: RAM, CPU count, the initrd window
//! from `/chosen`, and the interrupt controller base addresses.
//!
//! The `fdt` crate does zero-copy parsing, no heap allocation needed.
//! Nodes that are missing keep the QEMU virt defaults from
//! `platform.rs`.

use crate::error::{Result, VmmError};
use crate::platform;

/// FDT header magic (big-endian on the wire)
pub const DTB_MAGIC: u32 = 0xD00D_FEED;

/// What the VMM learns from a guest device tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestDtbInfo {
    /// RAM base address
    pub ram_base: u64,
    /// RAM size in bytes
    pub ram_size: u64,
    /// Number of CPUs discovered from /cpus node
    pub num_cpus: usize,
    /// `[start, end)` of the initial RAM disk from /chosen
    pub initrd: Option<(u64, u64)>,
    /// GIC distributor base address
    pub gic_dist: u64,
    /// GICv3 redistributor base (first frame)
    pub gic_redist: Option<u64>,
    /// PLIC base address
    pub plic: Option<u64>,
    /// Total size of the blob
    pub total_size: usize,
}

impl Default for GuestDtbInfo {
    fn default() -> Self {
        Self {
            ram_base: platform::GUEST_RAM_BASE,
            ram_size: platform::LINUX_MEM_SIZE,
            num_cpus: 1,
            initrd: None,
            gic_dist: platform::GIC_DIST_PADDR,
            gic_redist: None,
            plic: None,
            total_size: 0,
        }
    }
}

/// Check the FDT magic at the start of `bytes`.
pub fn check_magic(bytes: &[u8]) -> bool {
    bytes
        .get(..4)
        .and_then(|m| m.try_into().ok())
        .map(u32::from_be_bytes)
        == Some(DTB_MAGIC)
}

/// Parse a guest DTB.
pub fn parse(blob: &[u8]) -> Result<GuestDtbInfo> {
    if !check_magic(blob) {
        return Err(VmmError::InvalidImage("device tree magic mismatch"));
    }
    let fdt = fdt::Fdt::new(blob).map_err(|e| {
        log::error!("failed to parse guest device tree: {:?}", e);
        VmmError::InvalidImage("malformed device tree")
    })?;

    let mut info = GuestDtbInfo {
        total_size: fdt.total_size(),
        ..GuestDtbInfo::default()
    };

    let root = fdt
        .find_node("/")
        .ok_or(VmmError::InvalidImage("device tree has no root node"))?;

    // 1. /memory
    if let Some(memory) = root.children().find(|n| node_is(n.name, "memory")) {
        if let Some(region) = memory.reg().and_then(|mut r| r.next()) {
            info.ram_base = region.starting_address as u64;
            if let Some(size) = region.size {
                info.ram_size = size as u64;
            }
        }
    }

    // 2. Count CPUs
    if let Some(cpus) = root.children().find(|n| n.name == "cpus") {
        let count = cpus.children().filter(|n| node_is(n.name, "cpu")).count();
        if count > 0 {
            info.num_cpus = count;
        }
    }

    // 3. /chosen initrd window
    if let Some(chosen) = root.children().find(|n| n.name == "chosen") {
        let start = chosen
            .property("linux,initrd-start")
            .and_then(|p| p.as_usize());
        let end = chosen
            .property("linux,initrd-end")
            .and_then(|p| p.as_usize());
        if let (Some(start), Some(end)) = (start, end) {
            info.initrd = Some((start as u64, end as u64));
        }
    }

    // 4. Interrupt controller
    // GICv3: reg = <GICD_base GICD_size GICR_base GICR_size>
    if let Some(gic) = fdt.find_compatible(&["arm,gic-v3"]) {
        if let Some(mut regs) = gic.reg() {
            if let Some(dist) = regs.next() {
                info.gic_dist = dist.starting_address as u64;
            }
            info.gic_redist = regs.next().map(|r| r.starting_address as u64);
        }
    } else if let Some(gic) = fdt.find_compatible(&["arm,cortex-a15-gic", "arm,gic-400"]) {
        if let Some(dist) = gic.reg().and_then(|mut r| r.next()) {
            info.gic_dist = dist.starting_address as u64;
        }
    }
    if let Some(plic) = fdt.find_compatible(&["riscv,plic0", "sifive,plic-1.0.0"]) {
        info.plic = plic
            .reg()
            .and_then(|mut r| r.next())
            .map(|r| r.starting_address as u64);
    }

    log::debug!("guest device tree: {:x?}", info);
    Ok(info)
}

fn node_is(name: &str, base: &str) -> bool {
    name.split('@').next() == Some(base)
}
