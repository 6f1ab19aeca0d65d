//! ARM64 Architecture Constants
//!
//! Named constants for syndrome fields, exception classes and EL1 reset
//! values. Eliminates magic numbers throughout the back end.

// ── HSR / ESR_EL2 (Exception Syndrome Register) ─────────────────────
pub const ESR_EC_SHIFT: u32 = 26;
pub const ESR_EC_MASK: u64 = 0x3F;
pub const ESR_ISS_MASK: u64 = 0x1FF_FFFF;

// ── Exception Class (EC) values ──────────────────────────────────────
pub const EC_UNKNOWN: u64 = 0x00;
pub const EC_WFI_WFE: u64 = 0x01;
pub const EC_HVC64: u64 = 0x16;
pub const EC_SMC64: u64 = 0x17;
pub const EC_MSR_MRS: u64 = 0x18;
pub const EC_IABT_LOWER: u64 = 0x20;
pub const EC_DABT_LOWER: u64 = 0x24;

// ── Data abort ISS fields ────────────────────────────────────────────
pub const ISS_ISV: u32 = 1 << 24;
pub const ISS_SAS_SHIFT: u32 = 22;
pub const ISS_SAS_MASK: u32 = 0x3;
pub const ISS_SSE: u32 = 1 << 21;
pub const ISS_SRT_SHIFT: u32 = 16;
pub const ISS_SRT_MASK: u32 = 0x1F;
pub const ISS_WNR: u32 = 1 << 6;

// ── SPSR defaults ────────────────────────────────────────────────────
/// EL1 using SP_EL1
pub const SPSR_EL1H: u64 = 0b0101;

// ── SCTLR_EL1 ────────────────────────────────────────────────────────
/// RES1 bits for ARMv8-A
pub const SCTLR_EL1_RES1: u64 = 0x30D0_0800;
pub const SCTLR_EL1_CP15BEN: u64 = 1 << 5;
pub const SCTLR_EL1_UCT: u64 = 1 << 15;
pub const SCTLR_EL1_NTWI: u64 = 1 << 16;
pub const SCTLR_EL1_NTWE: u64 = 1 << 18;
/// MMU and caches off, WFI/WFE executed natively
pub const SCTLR_EL1_DEFAULT: u64 =
    SCTLR_EL1_RES1 | SCTLR_EL1_CP15BEN | SCTLR_EL1_UCT | SCTLR_EL1_NTWI | SCTLR_EL1_NTWE;

// ── MPIDR ────────────────────────────────────────────────────────────
pub const MPIDR_RES1: u64 = 1 << 31;

// ── Interrupt numbers ────────────────────────────────────────────────
pub const NUM_SGI_VIRQS: u32 = 16;
pub const NUM_PPI_VIRQS: u32 = 16;
/// EL1 virtual timer PPI
pub const PPI_VTIMER_IRQ: u32 = 27;
/// SGIs Linux uses for IPI reschedule and call-function
pub const SGI_RESCHEDULE_IRQ: u32 = 0;
pub const SGI_FUNC_CALL: u32 = 1;

// ── ARM64 instruction width ──────────────────────────────────────────
pub const AARCH64_INSN_SIZE: u64 = 4;
