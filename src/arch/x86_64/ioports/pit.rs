//! 8254 Programmable Interval Timer
//!
//! Only channel 0 in mode 2 (rate generator) is modelled, which is what
//! firmware and Linux use for the legacy timer tick. The tick is a kernel
//! timeout re-armed on every expiry.

use crate::error::{Result, VmmError};

pub const PIT_CH0_PORT: u16 = 0x40;
pub const PIT_CH1_PORT: u16 = 0x41;
pub const PIT_CH2_PORT: u16 = 0x42;
pub const PIT_CMD_PORT: u16 = 0x43;

/// Input clock in Hz
pub const PIT_FREQUENCY_HZ: u64 = 1_193_182;
/// The guest sees the tick slowed down by this factor.
pub const PIT_TICK_SCALE: u64 = 10;

const NS_PER_SEC: u64 = 1_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PitState {
    Reset,
    WaitingLow,
    WaitingHigh,
    Ticking,
}

#[derive(Debug, Clone)]
pub struct Pit {
    state: PitState,
    reload: u16,
}

impl Pit {
    pub fn new() -> Self {
        Self {
            state: PitState::Reset,
            reload: 0,
        }
    }

    pub fn state(&self) -> PitState {
        self.state
    }

    /// Tick period in nanoseconds. A reload value of 0 counts 65536.
    pub fn period_ns(&self) -> u64 {
        let count = if self.reload == 0 { 0x1_0000 } else { self.reload as u64 };
        count * NS_PER_SEC * PIT_TICK_SCALE / PIT_FREQUENCY_HZ
    }

    /// Returns the timeout to arm once the reload value is complete.
    pub fn write(&mut self, port: u16, value: u8) -> Result<Option<u64>> {
        match port {
            PIT_CMD_PORT => self.command(value).map(|_| None),
            PIT_CH0_PORT => match self.state {
                PitState::WaitingLow => {
                    self.reload = value as u16;
                    self.state = PitState::WaitingHigh;
                    Ok(None)
                }
                PitState::WaitingHigh => {
                    self.reload |= (value as u16) << 8;
                    if self.reload == 1 {
                        log::error!("PIT: reload value 1 is invalid in mode 2");
                        return Err(VmmError::Unsupported("PIT reload value 1 in mode 2"));
                    }
                    self.state = PitState::Ticking;
                    log::info!("PIT: channel 0 mode 2, reload 0x{:x}", self.reload);
                    Ok(Some(self.period_ns()))
                }
                state => {
                    log::error!("PIT: channel 0 data write in state {:?}", state);
                    Err(VmmError::Unsupported("PIT channel 0 write outside mode 2 setup"))
                }
            },
            _ => {
                log::error!("PIT: write 0x{:x} to unemulated port 0x{:x}", value, port);
                Err(VmmError::Unsupported("PIT channel"))
            }
        }
    }

    pub fn read(&mut self, port: u16) -> Result<u8> {
        log::error!("PIT: read of port 0x{:x} is not supported", port);
        Err(VmmError::Unsupported("PIT counter read"))
    }

    fn command(&mut self, cmd: u8) -> Result<()> {
        let channel = cmd >> 6;
        let mode = (cmd >> 1) & 0x7;
        if channel == 3 {
            log::error!("PIT: read-back command 0x{:x} is not supported", cmd);
            return Err(VmmError::Unsupported("PIT read-back command"));
        }
        if cmd & 1 != 0 {
            log::error!("PIT: BCD counting is not supported");
            return Err(VmmError::Unsupported("PIT BCD mode"));
        }
        if channel == 0 && mode == 2 {
            self.state = PitState::WaitingLow;
            return Ok(());
        }
        log::error!("PIT: channel {} mode {} is not supported", channel, mode);
        Err(VmmError::Unsupported("PIT channel or mode"))
    }

    /// Timer expiry. Returns the timeout to re-arm, if ticking.
    pub fn tick(&self) -> Option<u64> {
        (self.state == PitState::Ticking).then(|| self.period_ns())
    }
}

impl Default for Pit {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode2_programming() {
        let mut pit = Pit::new();
        // channel 0, lobyte/hibyte, mode 2, binary
        assert_eq!(pit.write(PIT_CMD_PORT, 0x34), Ok(None));
        assert_eq!(pit.state(), PitState::WaitingLow);
        assert_eq!(pit.write(PIT_CH0_PORT, 0x9c), Ok(None));
        // 0x2e9c = 11932 counts, about 10 ms before scaling
        assert_eq!(pit.write(PIT_CH0_PORT, 0x2e), Ok(Some(100_001_508)));
        assert_eq!(pit.state(), PitState::Ticking);
        assert_eq!(pit.tick(), Some(100_001_508));
    }

    #[test]
    fn test_rejected_commands() {
        let mut pit = Pit::new();
        assert!(pit.write(PIT_CMD_PORT, 0xc2).is_err());
        assert!(pit.write(PIT_CMD_PORT, 0x35).is_err());
        assert!(pit.write(PIT_CH0_PORT, 0).is_err());
        assert_eq!(pit.tick(), None);
    }

    #[test]
    fn test_reload_of_one_rejected() {
        let mut pit = Pit::new();
        pit.write(PIT_CMD_PORT, 0x34).unwrap();
        pit.write(PIT_CH0_PORT, 1).unwrap();
        assert!(pit.write(PIT_CH0_PORT, 0).is_err());
    }
}
