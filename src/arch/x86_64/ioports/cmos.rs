//! CMOS/RTC index and data ports
//!
//! Only the four RTC status registers carry state. Register C is cleared
//! on read, as on real hardware, and register D always reports a valid
//! battery.

use crate::error::{Result, VmmError};

pub const CMOS_INDEX_PORT: u16 = 0x70;
pub const CMOS_DATA_PORT: u16 = 0x71;

const RTC_STATUS_A: u8 = 0x0a;
const RTC_STATUS_B: u8 = 0x0b;
const RTC_STATUS_C: u8 = 0x0c;
const RTC_STATUS_D: u8 = 0x0d;

/// Valid RAM and time
const RTC_STATUS_D_VRT: u8 = 0x80;

/// Bit 7 of the index port gates NMIs and is not part of the index.
const CMOS_INDEX_MASK: u8 = 0x7f;

#[derive(Debug, Clone, Default)]
pub struct Cmos {
    index: u8,
    status_a: u8,
    status_b: u8,
    status_c: u8,
}

impl Cmos {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&mut self, port: u16) -> Result<u8> {
        match port {
            CMOS_INDEX_PORT => Ok(self.index),
            CMOS_DATA_PORT => Ok(match self.index {
                RTC_STATUS_A => self.status_a,
                RTC_STATUS_B => self.status_b,
                RTC_STATUS_C => core::mem::take(&mut self.status_c),
                RTC_STATUS_D => RTC_STATUS_D_VRT,
                index => {
                    log::debug!("CMOS register 0x{:x} reads as zero", index);
                    0
                }
            }),
            _ => Err(VmmError::Unsupported("CMOS port")),
        }
    }

    pub fn write(&mut self, port: u16, value: u8) -> Result<()> {
        match port {
            CMOS_INDEX_PORT => self.index = value & CMOS_INDEX_MASK,
            CMOS_DATA_PORT => match self.index {
                RTC_STATUS_A => self.status_a = value,
                RTC_STATUS_B => self.status_b = value,
                RTC_STATUS_C => self.status_c = value,
                RTC_STATUS_D => {}
                index => log::debug!("CMOS register 0x{:x} <- 0x{:x} ignored", index, value),
            },
            _ => return Err(VmmError::Unsupported("CMOS port")),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_c_clears_on_read() {
        let mut cmos = Cmos::new();
        cmos.write(CMOS_INDEX_PORT, 0x80 | RTC_STATUS_C).unwrap();
        assert_eq!(cmos.read(CMOS_INDEX_PORT), Ok(RTC_STATUS_C));
        cmos.write(CMOS_DATA_PORT, 0x40).unwrap();
        assert_eq!(cmos.read(CMOS_DATA_PORT), Ok(0x40));
        assert_eq!(cmos.read(CMOS_DATA_PORT), Ok(0));
    }

    #[test]
    fn test_status_d_read_only() {
        let mut cmos = Cmos::new();
        cmos.write(CMOS_INDEX_PORT, RTC_STATUS_D).unwrap();
        cmos.write(CMOS_DATA_PORT, 0).unwrap();
        assert_eq!(cmos.read(CMOS_DATA_PORT), Ok(0x80));
    }
}
