//! Virtual local APIC and I/O APIC
//!
//! Both are pure register models. Interrupt delivery goes through the
//! kernel, so operations with side effects hand back what to do next and
//! the VMM applies it.

// Local APIC register offsets
pub const LAPIC_ID: u64 = 0x20;
pub const LAPIC_VERSION: u64 = 0x30;
pub const LAPIC_TPR: u64 = 0x80;
pub const LAPIC_APR: u64 = 0x90;
pub const LAPIC_PPR: u64 = 0xA0;
pub const LAPIC_EOI: u64 = 0xB0;
pub const LAPIC_LDR: u64 = 0xD0;
pub const LAPIC_DFR: u64 = 0xE0;
pub const LAPIC_SVR: u64 = 0xF0;
pub const LAPIC_ISR: u64 = 0x100;
pub const LAPIC_TMR: u64 = 0x180;
pub const LAPIC_IRR: u64 = 0x200;
pub const LAPIC_ESR: u64 = 0x280;
pub const LAPIC_ICR_LOW: u64 = 0x300;
pub const LAPIC_ICR_HIGH: u64 = 0x310;
pub const LAPIC_LVT_TIMER: u64 = 0x320;
pub const LAPIC_LVT_THERMAL: u64 = 0x330;
pub const LAPIC_LVT_PERF: u64 = 0x340;
pub const LAPIC_LVT_LINT0: u64 = 0x350;
pub const LAPIC_LVT_LINT1: u64 = 0x360;
pub const LAPIC_LVT_ERROR: u64 = 0x370;
pub const LAPIC_TIMER_INIT_COUNT: u64 = 0x380;
pub const LAPIC_TIMER_CUR_COUNT: u64 = 0x390;
pub const LAPIC_TIMER_DCR: u64 = 0x3E0;

/// Version 0x10 (integrated APIC), 6 LVT entries
pub const LAPIC_VERSION_VALUE: u32 = 0x10 | (6 << 16);
pub const LAPIC_SVR_RESET: u32 = 0xff;
pub const LAPIC_SVR_ENABLE: u32 = 1 << 8;
pub const LVT_MASKED: u32 = 1 << 16;

const ICR_DELIVERY_MODE_SHIFT: u32 = 8;
const ICR_DELIVERY_STATUS: u32 = 1 << 12;
const ICR_SHORTHAND_SHIFT: u32 = 18;
const ICR_DEST_SHIFT: u32 = 24;

const DELIVERY_FIXED: u32 = 0;
const DELIVERY_LOWEST: u32 = 1;
const DELIVERY_INIT: u32 = 5;
const DELIVERY_STARTUP: u32 = 6;

/// First vector that may carry an external interrupt
pub const FIRST_EXTERNAL_VECTOR: u8 = 16;

/// Destination of an inter-processor interrupt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpiDest {
    /// Physical APIC ID from ICR high
    Apic(u8),
    SelfOnly,
    All,
    AllExcludingSelf,
}

/// Side effect of a local APIC register write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LapicAction {
    Done,
    /// In-service vector retired; deliver the next one.
    Eoi(Option<u8>),
    /// Fixed IPI to send.
    Ipi { vector: u8, dest: IpiDest },
}

/// 256-bit vector bitmap as eight 32-bit registers
#[derive(Debug, Clone, Copy, Default)]
struct VectorSet([u32; 8]);

impl VectorSet {
    fn set(&mut self, v: u8) {
        self.0[v as usize / 32] |= 1 << (v % 32);
    }

    fn clear(&mut self, v: u8) {
        self.0[v as usize / 32] &= !(1 << (v % 32));
    }

    fn highest(&self) -> Option<u8> {
        (0..8)
            .rev()
            .find(|&i| self.0[i] != 0)
            .map(|i| (i * 32 + 31 - self.0[i].leading_zeros() as usize) as u8)
    }
}

/// Local APIC of one vCPU
#[derive(Debug, Clone)]
pub struct Lapic {
    id: u8,
    tpr: u32,
    ldr: u32,
    dfr: u32,
    svr: u32,
    isr: VectorSet,
    irr: VectorSet,
    esr: u32,
    icr_low: u32,
    icr_high: u32,
    lvt_timer: u32,
    lvt_thermal: u32,
    lvt_perf: u32,
    lvt_lint0: u32,
    lvt_lint1: u32,
    lvt_error: u32,
    timer_init_count: u32,
    timer_dcr: u32,
}

impl Lapic {
    pub fn new(id: u8) -> Self {
        Self {
            id,
            tpr: 0,
            ldr: 0,
            dfr: 0xffff_ffff,
            svr: LAPIC_SVR_RESET,
            isr: VectorSet::default(),
            irr: VectorSet::default(),
            esr: 0,
            icr_low: 0,
            icr_high: 0,
            lvt_timer: LVT_MASKED,
            lvt_thermal: LVT_MASKED,
            lvt_perf: LVT_MASKED,
            lvt_lint0: LVT_MASKED,
            lvt_lint1: LVT_MASKED,
            lvt_error: LVT_MASKED,
            timer_init_count: 0,
            timer_dcr: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.id);
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    /// LINT0 vector, if the entry is unmasked.
    pub fn lint0_vector(&self) -> Option<u8> {
        (self.lvt_lint0 & LVT_MASKED == 0).then_some(self.lvt_lint0 as u8)
    }

    pub fn is_pending(&self, vector: u8) -> bool {
        self.irr.0[vector as usize / 32] & (1 << (vector % 32)) != 0
    }

    pub fn in_service(&self, vector: u8) -> bool {
        self.isr.0[vector as usize / 32] & (1 << (vector % 32)) != 0
    }

    /// Some vector is waiting in IRR.
    pub fn has_pending(&self) -> bool {
        self.irr.highest().is_some()
    }

    /// Latch `vector` in IRR. Vectors below 16 are reserved and dropped.
    pub fn accept(&mut self, vector: u8) -> bool {
        if vector < FIRST_EXTERNAL_VECTOR {
            log::warn!("LAPIC {}: reserved vector {} dropped", self.id, vector);
            return false;
        }
        self.irr.set(vector);
        true
    }

    /// Move the highest requested vector to ISR if it outranks everything
    /// in service, and return it for injection.
    pub fn next_delivery(&mut self) -> Option<u8> {
        let vector = self.irr.highest()?;
        if self.isr.highest().is_some_and(|busy| busy >= vector) {
            return None;
        }
        self.irr.clear(vector);
        self.isr.set(vector);
        Some(vector)
    }

    /// Undo [`Lapic::next_delivery`] when the kernel refused the vector.
    pub fn requeue(&mut self, vector: u8) {
        self.isr.clear(vector);
        self.irr.set(vector);
    }

    pub fn read(&self, offset: u64) -> Option<u32> {
        let value = match offset {
            LAPIC_ID => (self.id as u32) << 24,
            LAPIC_VERSION => LAPIC_VERSION_VALUE,
            LAPIC_TPR => self.tpr,
            LAPIC_APR => 0,
            LAPIC_PPR => self.tpr,
            LAPIC_EOI => 0,
            LAPIC_LDR => self.ldr,
            LAPIC_DFR => self.dfr,
            LAPIC_SVR => self.svr,
            o if (LAPIC_ISR..LAPIC_TMR).contains(&o) && o % 0x10 == 0 => self.isr.0[((o - LAPIC_ISR) / 0x10) as usize],
            o if (LAPIC_TMR..LAPIC_IRR).contains(&o) && o % 0x10 == 0 => 0,
            o if (LAPIC_IRR..LAPIC_ESR).contains(&o) && o % 0x10 == 0 => self.irr.0[((o - LAPIC_IRR) / 0x10) as usize],
            LAPIC_ESR => self.esr,
            LAPIC_ICR_LOW => self.icr_low,
            LAPIC_ICR_HIGH => self.icr_high,
            LAPIC_LVT_TIMER => self.lvt_timer,
            LAPIC_LVT_THERMAL => self.lvt_thermal,
            LAPIC_LVT_PERF => self.lvt_perf,
            LAPIC_LVT_LINT0 => self.lvt_lint0,
            LAPIC_LVT_LINT1 => self.lvt_lint1,
            LAPIC_LVT_ERROR => self.lvt_error,
            LAPIC_TIMER_INIT_COUNT => self.timer_init_count,
            LAPIC_TIMER_CUR_COUNT => 0,
            LAPIC_TIMER_DCR => self.timer_dcr,
            _ => {
                log::error!("LAPIC {}: read of unknown register 0x{:x}", self.id, offset);
                return None;
            }
        };
        Some(value)
    }

    pub fn write(&mut self, offset: u64, value: u32) -> Option<LapicAction> {
        match offset {
            LAPIC_ID => self.id = (value >> 24) as u8,
            LAPIC_TPR => self.tpr = value & 0xff,
            LAPIC_EOI => {
                let retired = self.isr.highest();
                if let Some(v) = retired {
                    self.isr.clear(v);
                }
                return Some(LapicAction::Eoi(retired));
            }
            LAPIC_LDR => self.ldr = value & 0xff00_0000,
            LAPIC_DFR => self.dfr = value | 0x0fff_ffff,
            LAPIC_SVR => self.svr = value & 0x3ff,
            LAPIC_ESR => self.esr = 0,
            LAPIC_ICR_LOW => {
                self.icr_low = value & !ICR_DELIVERY_STATUS;
                return self.send_ipi();
            }
            LAPIC_ICR_HIGH => self.icr_high = value & 0xff00_0000,
            LAPIC_LVT_TIMER => self.lvt_timer = value,
            LAPIC_LVT_THERMAL => self.lvt_thermal = value,
            LAPIC_LVT_PERF => self.lvt_perf = value,
            LAPIC_LVT_LINT0 => self.lvt_lint0 = value,
            LAPIC_LVT_LINT1 => self.lvt_lint1 = value,
            LAPIC_LVT_ERROR => self.lvt_error = value,
            LAPIC_TIMER_INIT_COUNT => self.timer_init_count = value,
            LAPIC_TIMER_DCR => self.timer_dcr = value & 0xb,
            _ => {
                log::error!("LAPIC {}: write 0x{:x} to read-only or unknown register 0x{:x}", self.id, value, offset);
                return None;
            }
        }
        Some(LapicAction::Done)
    }

    fn send_ipi(&self) -> Option<LapicAction> {
        let vector = self.icr_low as u8;
        let mode = (self.icr_low >> ICR_DELIVERY_MODE_SHIFT) & 0x7;
        let dest = match (self.icr_low >> ICR_SHORTHAND_SHIFT) & 0x3 {
            0 => IpiDest::Apic((self.icr_high >> ICR_DEST_SHIFT) as u8),
            1 => IpiDest::SelfOnly,
            2 => IpiDest::All,
            _ => IpiDest::AllExcludingSelf,
        };
        match mode {
            DELIVERY_FIXED | DELIVERY_LOWEST => Some(LapicAction::Ipi { vector, dest }),
            DELIVERY_INIT | DELIVERY_STARTUP => {
                log::warn!("LAPIC {}: INIT/SIPI to {:?} ignored, secondary vCPUs are not started this way", self.id, dest);
                Some(LapicAction::Done)
            }
            _ => {
                log::error!("LAPIC {}: IPI delivery mode {} is not supported", self.id, mode);
                None
            }
        }
    }
}

// I/O APIC
pub const IOAPIC_IOREGSEL: u64 = 0x00;
pub const IOAPIC_IOWIN: u64 = 0x10;

const IOAPIC_REG_ID: u32 = 0x00;
const IOAPIC_REG_VERSION: u32 = 0x01;
const IOAPIC_REG_ARB: u32 = 0x02;
const IOAPIC_REG_REDTBL: u32 = 0x10;

pub const IOAPIC_NUM_PINS: usize = 24;
/// Version 0x11, maximum redirection entry 23
pub const IOAPIC_VERSION_VALUE: u32 = 0x11 | (((IOAPIC_NUM_PINS as u32) - 1) << 16);
/// First vector assigned to pin 0 at reset
pub const IOAPIC_VECTOR_BASE: u8 = 0x20;

const REDIR_MASKED: u64 = 1 << 16;
const REDIR_LEVEL: u64 = 1 << 15;
const REDIR_REMOTE_IRR: u64 = 1 << 14;
const REDIR_DEST_SHIFT: u64 = 56;

/// I/O APIC with 24 redirection entries
#[derive(Debug, Clone)]
pub struct Ioapic {
    id: u32,
    ioregsel: u32,
    redirection: [u64; IOAPIC_NUM_PINS],
    /// Asserted while masked
    pending: u32,
    /// Delivered and not yet retired by an EOI
    in_service: u32,
}

impl Ioapic {
    pub fn new() -> Self {
        let mut redirection = [0; IOAPIC_NUM_PINS];
        for (pin, entry) in redirection.iter_mut().enumerate() {
            *entry = REDIR_MASKED | (IOAPIC_VECTOR_BASE as u64 + pin as u64);
        }
        Self {
            id: 0,
            ioregsel: 0,
            redirection,
            pending: 0,
            in_service: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn redirection(&self, pin: usize) -> Option<u64> {
        self.redirection.get(pin).copied()
    }

    pub fn is_masked(&self, pin: usize) -> bool {
        self.redirection.get(pin).map_or(true, |e| e & REDIR_MASKED != 0)
    }

    /// Raise `pin`. Returns `(vector, destination APIC ID)` to deliver, or
    /// `None` when the pin is masked and the assertion is latched instead.
    pub fn assert(&mut self, pin: usize) -> Option<(u8, u8)> {
        let entry = *self.redirection.get(pin)?;
        if entry & REDIR_MASKED != 0 {
            self.pending |= 1 << pin;
            return None;
        }
        self.pending &= !(1 << pin);
        self.in_service |= 1 << pin;
        if entry & REDIR_LEVEL != 0 {
            self.redirection[pin] |= REDIR_REMOTE_IRR;
        }
        Some((entry as u8, (entry >> REDIR_DEST_SHIFT) as u8))
    }

    /// Pins latched while masked that are now unmasked.
    pub fn take_unmasked_pending(&mut self) -> u32 {
        let ready = (0..IOAPIC_NUM_PINS)
            .filter(|&pin| self.pending & (1 << pin) != 0 && !self.is_masked(pin))
            .fold(0, |acc, pin| acc | (1 << pin));
        self.pending &= !ready;
        ready
    }

    /// Retire every in-service pin routed to `vector`. Returns the pins.
    pub fn eoi(&mut self, vector: u8) -> u32 {
        let mut retired = 0;
        for pin in 0..IOAPIC_NUM_PINS {
            if self.in_service & (1 << pin) != 0 && self.redirection[pin] as u8 == vector {
                self.redirection[pin] &= !REDIR_REMOTE_IRR;
                retired |= 1 << pin;
            }
        }
        self.in_service &= !retired;
        retired
    }

    pub fn read(&self, offset: u64) -> Option<u32> {
        match offset {
            IOAPIC_IOREGSEL => Some(self.ioregsel),
            IOAPIC_IOWIN => self.window_read(),
            _ => {
                log::error!("IOAPIC: read of unknown register 0x{:x}", offset);
                None
            }
        }
    }

    pub fn write(&mut self, offset: u64, value: u32) -> bool {
        match offset {
            IOAPIC_IOREGSEL => {
                self.ioregsel = value & 0xff;
                true
            }
            IOAPIC_IOWIN => self.window_write(value),
            _ => {
                log::error!("IOAPIC: write 0x{:x} to unknown register 0x{:x}", value, offset);
                false
            }
        }
    }

    fn redirection_slot(&self) -> Option<(usize, bool)> {
        let index = self.ioregsel.checked_sub(IOAPIC_REG_REDTBL)? as usize;
        (index / 2 < IOAPIC_NUM_PINS).then_some((index / 2, index % 2 == 1))
    }

    fn window_read(&self) -> Option<u32> {
        match self.ioregsel {
            IOAPIC_REG_ID | IOAPIC_REG_ARB => Some(self.id << 24),
            IOAPIC_REG_VERSION => Some(IOAPIC_VERSION_VALUE),
            _ => match self.redirection_slot() {
                Some((pin, true)) => Some((self.redirection[pin] >> 32) as u32),
                Some((pin, false)) => Some(self.redirection[pin] as u32),
                None => {
                    log::error!("IOAPIC: read of unknown indirect register 0x{:x}", self.ioregsel);
                    None
                }
            },
        }
    }

    fn window_write(&mut self, value: u32) -> bool {
        match self.ioregsel {
            IOAPIC_REG_ID => self.id = (value >> 24) & 0xf,
            IOAPIC_REG_VERSION | IOAPIC_REG_ARB => {}
            _ => match self.redirection_slot() {
                Some((pin, true)) => {
                    let entry = &mut self.redirection[pin];
                    *entry = (*entry & 0xffff_ffff) | ((value as u64) << 32);
                }
                Some((pin, false)) => {
                    let entry = &mut self.redirection[pin];
                    let keep = *entry & (0xffff_ffff_0000_0000 | REDIR_REMOTE_IRR);
                    *entry = keep | (value as u64 & !REDIR_REMOTE_IRR);
                }
                None => {
                    log::error!("IOAPIC: write 0x{:x} to unknown indirect register 0x{:x}", value, self.ioregsel);
                    return false;
                }
            },
        }
        true
    }
}

impl Default for Ioapic {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lapic_reset_values() {
        let lapic = Lapic::new(2);
        assert_eq!(lapic.read(LAPIC_ID), Some(2 << 24));
        assert_eq!(lapic.read(LAPIC_VERSION), Some(0x0006_0010));
        assert_eq!(lapic.read(LAPIC_SVR), Some(0xff));
        assert_eq!(lapic.read(LAPIC_LVT_LINT0), Some(LVT_MASKED));
        assert_eq!(lapic.read(0x3f0), None);
    }

    #[test]
    fn test_lapic_priority_order() {
        let mut lapic = Lapic::new(0);
        assert!(lapic.accept(0x30));
        assert!(lapic.accept(0x50));
        assert_eq!(lapic.next_delivery(), Some(0x50));
        // 0x30 waits behind the in-service 0x50
        assert_eq!(lapic.next_delivery(), None);
        assert_eq!(lapic.read(LAPIC_ISR + 0x20), Some(1 << 0x10));
        assert_eq!(lapic.write(LAPIC_EOI, 0), Some(LapicAction::Eoi(Some(0x50))));
        assert_eq!(lapic.next_delivery(), Some(0x30));
    }

    #[test]
    fn test_lapic_icr_fixed_ipi() {
        let mut lapic = Lapic::new(0);
        lapic.write(LAPIC_ICR_HIGH, 1 << 24);
        assert_eq!(
            lapic.write(LAPIC_ICR_LOW, 0xfd),
            Some(LapicAction::Ipi { vector: 0xfd, dest: IpiDest::Apic(1) })
        );
        assert_eq!(
            lapic.write(LAPIC_ICR_LOW, (3 << 18) | 0xfc),
            Some(LapicAction::Ipi { vector: 0xfc, dest: IpiDest::AllExcludingSelf })
        );
    }

    #[test]
    fn test_ioapic_masked_pin_latches() {
        let mut ioapic = Ioapic::new();
        assert_eq!(ioapic.redirection(4), Some(REDIR_MASKED | 0x24));
        assert_eq!(ioapic.assert(4), None);

        ioapic.write(IOAPIC_IOREGSEL, 0x10 + 2 * 4);
        ioapic.write(IOAPIC_IOWIN, 0x41);
        assert_eq!(ioapic.take_unmasked_pending(), 1 << 4);
        assert_eq!(ioapic.assert(4), Some((0x41, 0)));
        assert_eq!(ioapic.eoi(0x41), 1 << 4);
        assert_eq!(ioapic.eoi(0x41), 0);
    }

    #[test]
    fn test_ioapic_version() {
        let mut ioapic = Ioapic::new();
        ioapic.write(IOAPIC_IOREGSEL, 1);
        assert_eq!(ioapic.read(IOAPIC_IOWIN), Some(0x0017_0011));
    }
}
