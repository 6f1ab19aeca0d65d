//! Crate error type
//!
//! Setup-time failures (registration, image placement, guest start) are
//! reported through [`VmmError`]. Fault handlers keep a plain `bool`
//! contract and log the error they swallowed.

use core::fmt;

/// Errors raised by the VMM core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmmError {
    /// A fault region was registered with size 0.
    ZeroSizedRegion,
    /// The new region `[base, end)` intersects an existing one.
    RegionOverlap { base: u64, end: u64 },
    /// All fault region slots are taken.
    RegistryFull,
    /// IRQ number is out of range for the controller.
    InvalidIrq(u32),
    /// A handle for this IRQ already exists.
    IrqAlreadyRegistered(u32),
    /// No handle was registered for this IRQ.
    IrqNotRegistered(u32),
    /// The guest has not enabled this IRQ (or the distributor).
    IrqNotEnabled(u32),
    /// The per-vCPU overflow queue is full.
    IrqQueueFull(u32),
    /// Notification channel outside the passthrough table.
    InvalidChannel(u32),
    /// No IRQ is bound to this channel.
    ChannelUnbound(u32),
    /// The channel already forwards another IRQ.
    ChannelInUse(u32),
    /// vCPU id beyond the configured vCPU count.
    InvalidVcpu(usize),
    /// Guest paging is off, GVA translation is not possible.
    PagingDisabled,
    /// Page table walk hit a non-present entry at `level` (4 = PML4).
    PageNotPresent { gva: u64, level: u8 },
    /// Guest physical address outside every known guest memory region.
    AddressOutOfRange(u64),
    /// Kernel image header is malformed.
    InvalidImage(&'static str),
    /// Image destinations violate the placement rules.
    ImageLayout(&'static str),
    /// Recognised but deliberately unimplemented behaviour.
    Unsupported(&'static str),
}

/// Crate result alias.
pub type Result<T> = core::result::Result<T, VmmError>;

impl fmt::Display for VmmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmmError::ZeroSizedRegion => write!(f, "fault region has zero size"),
            VmmError::RegionOverlap { base, end } => {
                write!(f, "fault region [0x{:x}, 0x{:x}) overlaps an existing region", base, end)
            }
            VmmError::RegistryFull => write!(f, "fault region registry is full"),
            VmmError::InvalidIrq(irq) => write!(f, "invalid IRQ {}", irq),
            VmmError::IrqAlreadyRegistered(irq) => write!(f, "IRQ {} is already registered", irq),
            VmmError::IrqNotRegistered(irq) => write!(f, "IRQ {} is not registered", irq),
            VmmError::IrqNotEnabled(irq) => write!(f, "IRQ {} is not enabled by the guest", irq),
            VmmError::IrqQueueFull(irq) => write!(f, "overflow queue full while injecting IRQ {}", irq),
            VmmError::InvalidChannel(ch) => write!(f, "invalid notification channel {}", ch),
            VmmError::ChannelUnbound(ch) => write!(f, "no passthrough IRQ bound to channel {}", ch),
            VmmError::ChannelInUse(ch) => write!(f, "channel {} already forwards an IRQ", ch),
            VmmError::InvalidVcpu(id) => write!(f, "invalid vCPU {}", id),
            VmmError::PagingDisabled => write!(f, "guest paging is disabled"),
            VmmError::PageNotPresent { gva, level } => {
                write!(f, "GVA 0x{:x} not mapped (level {} entry not present)", gva, level)
            }
            VmmError::AddressOutOfRange(gpa) => {
                write!(f, "GPA 0x{:x} is outside guest memory", gpa)
            }
            VmmError::InvalidImage(why) => write!(f, "invalid kernel image: {}", why),
            VmmError::ImageLayout(why) => write!(f, "invalid image layout: {}", why),
            VmmError::Unsupported(what) => write!(f, "unsupported: {}", what),
        }
    }
}
