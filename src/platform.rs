//! Platform/Board Constants (QEMU virt machines)
//!
//! All board-specific addresses and sizes live here so they can be
//! changed in one place when targeting a different platform.

// ── vCPUs ────────────────────────────────────────────────────────────
pub const MAX_VCPUS: usize = 4;
pub const BOOT_VCPU_ID: usize = 0;

// ── GIC (aarch64) ────────────────────────────────────────────────────
pub const GIC_DIST_PADDR: u64 = 0x0800_0000;
pub const GIC_V2_DIST_SIZE: u64 = 0x1000;
pub const GIC_V3_DIST_SIZE: u64 = 0x1_0000;
pub const GIC_REDIST_PADDR: u64 = 0x080A_0000;
/// One RD_base + SGI_base frame pair per vCPU
pub const GIC_REDIST_FRAME_SIZE: u64 = 0x2_0000;

// ── PLIC (riscv64) ───────────────────────────────────────────────────
pub const PLIC_PADDR: u64 = 0x0c00_0000;
pub const PLIC_SIZE: u64 = 0x0400_0000;

// ── APIC (x86_64) ────────────────────────────────────────────────────
pub const LAPIC_GPA: u64 = 0xfee0_0000;
pub const LAPIC_SIZE: u64 = 0x1000;
pub const IOAPIC_GPA: u64 = 0xfec0_0000;
pub const IOAPIC_SIZE: u64 = 0x1000;

// ── Guest memory layout (aarch64 Linux) ──────────────────────────────
pub const GUEST_RAM_BASE: u64 = 0x4000_0000;
pub const LINUX_MEM_SIZE: u64 = 0x1000_0000;
pub const LINUX_DTB_ADDR: u64 = 0x47f0_0000;
pub const LINUX_INITRD_ADDR: u64 = 0x4700_0000;
