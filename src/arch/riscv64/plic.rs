//! Platform-Level Interrupt Controller
//!
//! Register model of the SiFive PLIC as laid out on QEMU virt. Each hart
//! has two contexts: `2 * hart` (M-mode, never used by a guest) and
//! `2 * hart + 1` (S-mode). A source that is pending, enabled for the
//! S-mode context of a hart and above that context's threshold raises the
//! hart's supervisor external interrupt.

use crate::platform::MAX_VCPUS;

/// Interrupt sources, source 0 is reserved
pub const PLIC_NUM_SOURCES: usize = 96;
pub const PLIC_NUM_CONTEXTS: usize = 2 * MAX_VCPUS;
pub const PLIC_MAX_PRIORITY: u32 = 7;

const WORDS: usize = PLIC_NUM_SOURCES / 32;

// Register layout
pub const PLIC_PRIORITY_BASE: u64 = 0x0;
pub const PLIC_PENDING_BASE: u64 = 0x1000;
pub const PLIC_ENABLE_BASE: u64 = 0x2000;
pub const PLIC_ENABLE_STRIDE: u64 = 0x80;
pub const PLIC_CONTEXT_BASE: u64 = 0x20_0000;
pub const PLIC_CONTEXT_STRIDE: u64 = 0x1000;
pub const PLIC_CONTEXT_THRESHOLD: u64 = 0x0;
pub const PLIC_CONTEXT_CLAIM: u64 = 0x4;

/// S-mode context of `hart`
pub const fn s_context(hart: usize) -> usize {
    2 * hart + 1
}

/// Follow-up the VMM performs after a PLIC write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlicAction {
    Done,
    /// The guest completed `source`; run its ack.
    Complete(u32),
}

#[derive(Debug, Clone, Copy, Default)]
struct Bitmap([u32; WORDS]);

impl Bitmap {
    fn get(&self, bit: usize) -> bool {
        self.0[bit / 32] & (1 << (bit % 32)) != 0
    }

    fn set(&mut self, bit: usize, on: bool) {
        if on {
            self.0[bit / 32] |= 1 << (bit % 32);
        } else {
            self.0[bit / 32] &= !(1 << (bit % 32));
        }
    }
}

#[derive(Debug, Clone)]
pub struct Plic {
    priority: [u32; PLIC_NUM_SOURCES],
    pending: Bitmap,
    /// Claimed and not yet completed
    claimed: Bitmap,
    enable: [Bitmap; PLIC_NUM_CONTEXTS],
    threshold: [u32; PLIC_NUM_CONTEXTS],
}

impl Default for Plic {
    fn default() -> Self {
        Self::new()
    }
}

impl Plic {
    pub fn new() -> Self {
        Self {
            priority: [0; PLIC_NUM_SOURCES],
            pending: Bitmap::default(),
            claimed: Bitmap::default(),
            enable: [Bitmap::default(); PLIC_NUM_CONTEXTS],
            threshold: [0; PLIC_NUM_CONTEXTS],
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn is_valid_source(source: u32) -> bool {
        source != 0 && (source as usize) < PLIC_NUM_SOURCES
    }

    pub fn is_pending(&self, source: u32) -> bool {
        Self::is_valid_source(source) && self.pending.get(source as usize)
    }

    pub fn is_enabled(&self, context: usize, source: u32) -> bool {
        Self::is_valid_source(source) && self.enable.get(context).is_some_and(|e| e.get(source as usize))
    }

    /// Latch `source` as pending. A source that is claimed and not yet
    /// completed is not latched again.
    pub fn set_pending(&mut self, source: u32) -> bool {
        if !Self::is_valid_source(source) {
            return false;
        }
        if !self.claimed.get(source as usize) {
            self.pending.set(source as usize, true);
        }
        true
    }

    /// Best source `context` could claim right now.
    pub fn best(&self, context: usize) -> Option<u32> {
        let enable = self.enable.get(context)?;
        let threshold = self.threshold[context];
        let mut best: Option<(u32, u32)> = None;
        for source in 1..PLIC_NUM_SOURCES {
            let prio = self.priority[source];
            if !self.pending.get(source) || !enable.get(source) || prio <= threshold {
                continue;
            }
            // Strictly greater keeps the lowest id among equal priorities
            if best.map_or(true, |(_, p)| prio > p) {
                best = Some((source as u32, prio));
            }
        }
        best.map(|(source, _)| source)
    }

    /// Whether `hart` should see its supervisor external interrupt.
    pub fn eip(&self, hart: usize) -> bool {
        self.best(s_context(hart)).is_some()
    }

    /// Claim the best source for `context`. Zero when none is available.
    pub fn claim(&mut self, context: usize) -> u32 {
        match self.best(context) {
            Some(source) => {
                self.pending.set(source as usize, false);
                self.claimed.set(source as usize, true);
                log::trace!("PLIC context {} claimed source {}", context, source);
                source
            }
            None => 0,
        }
    }

    /// Complete `source` on `context`. Returns the source when it was in
    /// service and enabled for the context.
    pub fn complete(&mut self, context: usize, source: u32) -> Option<u32> {
        if !self.is_enabled(context, source) || !self.claimed.get(source as usize) {
            log::debug!("PLIC context {} completed source {} that is not in service", context, source);
            return None;
        }
        self.claimed.set(source as usize, false);
        Some(source)
    }

    /// 32-bit register read. Reading the claim register claims.
    pub fn read(&mut self, offset: u64) -> Option<u32> {
        let value = match offset {
            o if o < PLIC_PENDING_BASE => {
                let source = (o / 4) as usize;
                *self.priority.get(source)?
            }
            o if o < PLIC_ENABLE_BASE => *self.pending.0.get(((o - PLIC_PENDING_BASE) / 4) as usize)?,
            o if o < PLIC_CONTEXT_BASE => {
                let (context, word) = enable_index(o)?;
                self.enable[context].0[word]
            }
            o => {
                let (context, reg) = context_index(o)?;
                match reg {
                    PLIC_CONTEXT_THRESHOLD => self.threshold[context],
                    PLIC_CONTEXT_CLAIM => self.claim(context),
                    _ => return None,
                }
            }
        };
        log::trace!("PLIC read 0x{:x} -> 0x{:x}", offset, value);
        Some(value)
    }

    /// 32-bit register write. `None` for offsets that do not exist or are
    /// read-only.
    pub fn write(&mut self, offset: u64, value: u32) -> Option<PlicAction> {
        log::trace!("PLIC write 0x{:x} <- 0x{:x}", offset, value);
        match offset {
            o if o < PLIC_PENDING_BASE => {
                let source = (o / 4) as usize;
                let prio = self.priority.get_mut(source)?;
                if source != 0 {
                    *prio = value.min(PLIC_MAX_PRIORITY);
                }
            }
            o if o < PLIC_ENABLE_BASE => {
                log::warn!("write to read-only PLIC pending register 0x{:x}", o);
                return None;
            }
            o if o < PLIC_CONTEXT_BASE => {
                let (context, word) = enable_index(o)?;
                // Source 0 does not exist
                let mask = if word == 0 { !1 } else { u32::MAX };
                self.enable[context].0[word] = value & mask;
            }
            o => {
                let (context, reg) = context_index(o)?;
                match reg {
                    PLIC_CONTEXT_THRESHOLD => self.threshold[context] = value.min(PLIC_MAX_PRIORITY),
                    PLIC_CONTEXT_CLAIM => {
                        return Some(match self.complete(context, value) {
                            Some(source) => PlicAction::Complete(source),
                            None => PlicAction::Done,
                        })
                    }
                    _ => return None,
                }
            }
        }
        Some(PlicAction::Done)
    }
}

fn enable_index(offset: u64) -> Option<(usize, usize)> {
    let rel = offset - PLIC_ENABLE_BASE;
    let context = (rel / PLIC_ENABLE_STRIDE) as usize;
    let word = ((rel % PLIC_ENABLE_STRIDE) / 4) as usize;
    (context < PLIC_NUM_CONTEXTS && word < WORDS).then_some((context, word))
}

fn context_index(offset: u64) -> Option<(usize, u64)> {
    let rel = offset - PLIC_CONTEXT_BASE;
    let context = (rel / PLIC_CONTEXT_STRIDE) as usize;
    (context < PLIC_NUM_CONTEXTS).then_some((context, rel % PLIC_CONTEXT_STRIDE))
}
