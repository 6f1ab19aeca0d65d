//! Virtual IRQ bookkeeping shared by every interrupt controller model
//!
//! [`VirqAck`] says what happens once the guest has consumed an injected
//! interrupt; [`PassthroughMap`] forwards microkernel notification channels
//! to virtual IRQs.

use crate::error::{Result, VmmError};

/// Number of notification channels that can forward a hardware IRQ.
pub const MAX_PASSTHROUGH_CHANNELS: usize = 62;

/// Action run when a virtual IRQ is acknowledged by the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirqAck {
    /// Nothing to do (SGIs, emulated device interrupts).
    Nop,
    /// Re-arm the virtual PPI at the microkernel (ARM virtual timer).
    Vppi,
    /// Acknowledge the real IRQ delivered on this notification channel.
    Passthrough(u32),
}

/// A hardware IRQ forwarded into the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassthroughIrq {
    pub vcpu: usize,
    pub irq: u32,
}

/// Channel -> (vCPU, IRQ) table.
pub struct PassthroughMap {
    entries: [Option<PassthroughIrq>; MAX_PASSTHROUGH_CHANNELS],
}

impl PassthroughMap {
    pub const fn new() -> Self {
        Self {
            entries: [None; MAX_PASSTHROUGH_CHANNELS],
        }
    }

    /// Fail unless `channel` is in range and unbound.
    pub fn check_free(&self, channel: u32) -> Result<()> {
        match self.entries.get(channel as usize) {
            None => Err(VmmError::InvalidChannel(channel)),
            Some(Some(_)) => Err(VmmError::ChannelInUse(channel)),
            Some(None) => Ok(()),
        }
    }

    pub fn bind(&mut self, channel: u32, vcpu: usize, irq: u32) -> Result<()> {
        self.check_free(channel)?;
        self.entries[channel as usize] = Some(PassthroughIrq { vcpu, irq });
        log::debug!("channel {} forwards IRQ {} to vCPU {}", channel, irq, vcpu);
        Ok(())
    }

    pub fn lookup(&self, channel: u32) -> Result<PassthroughIrq> {
        match self.entries.get(channel as usize) {
            None => Err(VmmError::InvalidChannel(channel)),
            Some(None) => Err(VmmError::ChannelUnbound(channel)),
            Some(Some(entry)) => Ok(*entry),
        }
    }
}

impl Default for PassthroughMap {
    fn default() -> Self {
        Self::new()
    }
}
