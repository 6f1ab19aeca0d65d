//! Decoding of the trapped load/store from `htinst`
//!
//! On a guest page fault the hardware reports a transformed copy of the
//! faulting instruction. A compressed instruction is reported with bit 1
//! cleared; setting it again gives a standard encoding riscv-decode knows.

use riscv_decode::{decode, Instruction};

/// What the faulting instruction did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodedInstruction {
    DecodeFail,
    Load {
        rd: u8,
        /// Access size in bytes
        width: u8,
        sign_extend: bool,
        /// Instruction length, 2 or 4
        len: u8,
    },
    Store { rs2: u8, width: u8, len: u8 },
}

impl DecodedInstruction {
    pub fn len(&self) -> u8 {
        match self {
            DecodedInstruction::DecodeFail => 0,
            DecodedInstruction::Load { len, .. } | DecodedInstruction::Store { len, .. } => *len,
        }
    }

    pub fn width(&self) -> u8 {
        match self {
            DecodedInstruction::DecodeFail => 0,
            DecodedInstruction::Load { width, .. } | DecodedInstruction::Store { width, .. } => *width,
        }
    }
}

pub fn decode_htinst(htinst: u64) -> DecodedInstruction {
    if htinst == 0 {
        return DecodedInstruction::DecodeFail;
    }
    let mut raw = htinst as u32;
    let len = if raw & 0b11 == 0b11 { 4 } else { 2 };
    raw |= 0b10;

    let load = |rd: u32, width, sign_extend| DecodedInstruction::Load {
        rd: rd as u8,
        width,
        sign_extend,
        len,
    };
    let store = |rs2: u32, width| DecodedInstruction::Store {
        rs2: rs2 as u8,
        width,
        len,
    };

    match decode(raw) {
        Ok(Instruction::Lb(i)) => load(i.rd(), 1, true),
        Ok(Instruction::Lh(i)) => load(i.rd(), 2, true),
        Ok(Instruction::Lw(i)) => load(i.rd(), 4, true),
        Ok(Instruction::Ld(i)) => load(i.rd(), 8, false),
        Ok(Instruction::Lbu(i)) => load(i.rd(), 1, false),
        Ok(Instruction::Lhu(i)) => load(i.rd(), 2, false),
        Ok(Instruction::Lwu(i)) => load(i.rd(), 4, false),
        Ok(Instruction::Sb(s)) => store(s.rs2(), 1),
        Ok(Instruction::Sh(s)) => store(s.rs2(), 2),
        Ok(Instruction::Sw(s)) => store(s.rs2(), 4),
        Ok(Instruction::Sd(s)) => store(s.rs2(), 8),
        Ok(other) => {
            log::debug!("htinst 0x{:x} is not a load/store: {:?}", htinst, other);
            DecodedInstruction::DecodeFail
        }
        Err(e) => {
            log::debug!("cannot decode htinst 0x{:x}: {:?}", htinst, e);
            DecodedInstruction::DecodeFail
        }
    }
}

/// Value written to the destination register of a load.
pub fn extend_load(value: u64, width: u8, sign_extend: bool) -> u64 {
    let bits = u32::from(width) * 8;
    if bits >= 64 {
        return value;
    }
    let value = value & ((1u64 << bits) - 1);
    if sign_extend {
        let shift = 64 - bits;
        (((value << shift) as i64) >> shift) as u64
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transformed_word_load() {
        // lw a5, 0(zero)
        assert_eq!(
            decode_htinst(0x0000_2783),
            DecodedInstruction::Load { rd: 15, width: 4, sign_extend: true, len: 4 }
        );
    }

    #[test]
    fn test_transformed_store_double() {
        // sd a1, 0(zero)
        assert_eq!(decode_htinst(0x00b0_3023), DecodedInstruction::Store { rs2: 11, width: 8, len: 4 });
    }

    #[test]
    fn test_compressed_form_has_length_two() {
        // c.sw reported as sw a4, 0(zero) with bit 1 cleared
        let decoded = decode_htinst(0x00e0_2021);
        assert_eq!(decoded, DecodedInstruction::Store { rs2: 14, width: 4, len: 2 });
    }

    #[test]
    fn test_zero_and_non_memory() {
        assert_eq!(decode_htinst(0), DecodedInstruction::DecodeFail);
        // addi a0, a0, 1
        assert_eq!(decode_htinst(0x0015_0513), DecodedInstruction::DecodeFail);
    }

    #[test]
    fn test_extend_load() {
        assert_eq!(extend_load(0x80, 1, true), 0xffff_ffff_ffff_ff80);
        assert_eq!(extend_load(0x1_8000, 2, false), 0x8000);
        assert_eq!(extend_load(0x8000_0000, 4, true), 0xffff_ffff_8000_0000);
        assert_eq!(extend_load(u64::MAX, 8, false), u64::MAX);
    }
}
