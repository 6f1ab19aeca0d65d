/// ARM64 data abort decoder for MMIO emulation
///
/// This module turns the Instruction Specific Syndrome of a stage-2 data
/// abort into a tagged access description and implements the byte-lane
/// arithmetic used to merge a narrow access into a 32-bit register.
use super::defs::*;

/// Decoded load/store access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmioAccess {
    /// Load instruction: LDR, LDRB, LDRSH, etc.
    Load {
        reg: u8,  // Destination register (0-30, 31 = XZR)
        size: u8, // Access size in bytes (1, 2, 4, 8)
        sign_extend: bool,
    },
    /// Store instruction: STR, STRB, STRH, etc.
    Store {
        reg: u8,  // Source register (0-30, 31 = XZR)
        size: u8, // Access size in bytes (1, 2, 4, 8)
    },
}

impl MmioAccess {
    /// Decode the ISS of a data abort
    ///
    /// # Returns
    /// * `Some(MmioAccess)` if the syndrome is valid (ISV set)
    /// * `None` otherwise; the access can then not be emulated
    pub fn from_iss(iss: u32) -> Option<Self> {
        if iss & ISS_ISV == 0 {
            return None;
        }

        let size = 1u8 << ((iss >> ISS_SAS_SHIFT) & ISS_SAS_MASK);
        let reg = ((iss >> ISS_SRT_SHIFT) & ISS_SRT_MASK) as u8;

        if iss & ISS_WNR != 0 {
            Some(MmioAccess::Store { reg, size })
        } else {
            Some(MmioAccess::Load {
                reg,
                size,
                sign_extend: iss & ISS_SSE != 0,
            })
        }
    }

    /// Get the register number
    pub fn reg(&self) -> u8 {
        match self {
            MmioAccess::Load { reg, .. } => *reg,
            MmioAccess::Store { reg, .. } => *reg,
        }
    }

    /// Get the access size in bytes
    pub fn size(&self) -> u8 {
        match self {
            MmioAccess::Load { size, .. } => *size,
            MmioAccess::Store { size, .. } => *size,
        }
    }

    /// Check if this is a store instruction
    pub fn is_store(&self) -> bool {
        matches!(self, MmioAccess::Store { .. })
    }

    /// Byte lane of the access within its 32-bit word. 8-byte accesses
    /// cover the whole doubleword.
    pub fn lane(&self, addr: u64) -> Lane {
        Lane::new(addr, self.size())
    }

    /// Extend a raw device value to register width.
    pub fn extend(&self, value: u64) -> u64 {
        let bits = u32::from(self.size()) * 8;
        let value = value & width_mask(self.size());
        match self {
            MmioAccess::Load { sign_extend: true, .. } if bits < 64 => {
                let shift = 64 - bits;
                (((value << shift) as i64) >> shift) as u64
            }
            _ => value,
        }
    }
}

/// All-ones mask of an access width.
pub fn width_mask(size: u8) -> u64 {
    match size {
        1 => 0xff,
        2 => 0xffff,
        4 => 0xffff_ffff,
        _ => u64::MAX,
    }
}

/// Shift and mask placing a narrow access at its byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lane {
    pub shift: u32,
    pub mask: u64,
}

impl Lane {
    pub fn new(addr: u64, size: u8) -> Self {
        let shift = if size >= 8 { 0 } else { ((addr & 3) * 8) as u32 };
        Self {
            shift,
            mask: width_mask(size) << shift,
        }
    }

    /// Register value of a store, moved into its byte lane.
    pub fn store_data(&self, rt: u64) -> u64 {
        (rt << self.shift) & self.mask
    }

    /// Bytes of `reg_value` selected by a load, moved down to bit 0.
    pub fn load_value(&self, reg_value: u64) -> u64 {
        (reg_value & self.mask) >> self.shift
    }

    /// Merge a store into the current register contents.
    pub fn merge(&self, old: u32, data: u64) -> u32 {
        ((u64::from(old) & !self.mask) | (data & self.mask)) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ISV: u32 = 1 << 24;

    #[test]
    fn test_decode_word_store() {
        // STR w3, sas = 2, wnr = 1
        let iss = ISV | (2 << 22) | (3 << 16) | (1 << 6);
        assert_eq!(MmioAccess::from_iss(iss), Some(MmioAccess::Store { reg: 3, size: 4 }));
    }

    #[test]
    fn test_decode_signed_halfword_load() {
        let iss = ISV | (1 << 22) | (1 << 21) | (7 << 16);
        let access = MmioAccess::from_iss(iss).unwrap();
        assert_eq!(access, MmioAccess::Load { reg: 7, size: 2, sign_extend: true });
        assert_eq!(access.extend(0x8001), 0xffff_ffff_ffff_8001);
    }

    #[test]
    fn test_invalid_syndrome() {
        assert_eq!(MmioAccess::from_iss(2 << 22), None);
    }

    #[test]
    fn test_byte_lane_mask() {
        let lane = Lane::new(0x1003, 1);
        assert_eq!(lane.shift, 24);
        assert_eq!(lane.mask, 0xff00_0000);
        assert_eq!(lane.store_data(0x1ab), 0xab00_0000);
        assert_eq!(lane.load_value(0x1234_5678), 0x12);
        assert_eq!(lane.merge(0x1122_3344, 0xab00_0000), 0xab22_3344);
    }

    #[test]
    fn test_doubleword_lane() {
        let lane = Lane::new(0x6100, 8);
        assert_eq!(lane.shift, 0);
        assert_eq!(lane.mask, u64::MAX);
    }
}
