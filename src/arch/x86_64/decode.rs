//! Decoding of instructions that fault on emulated MMIO
//!
//! EPT violations report the faulting address but not the operand, so the
//! instruction bytes at RIP are fetched and decoded. Only the `mov` and
//! `movzx` forms compilers emit for device register accesses are
//! recognised.

use iced_x86::{Code, Decoder, DecoderOptions, Instruction, OpKind, Register};

use super::regs::Gpr;

/// Longest legal x86 instruction
pub const MAX_INSN_LEN: usize = 15;

/// Result of decoding a faulting instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodedInstruction {
    /// Bytes could not be decoded, or the instruction is not one the MMIO
    /// path emulates.
    DecodeFail,
    /// Move between `reg` and memory. `width` is the memory operand size;
    /// `reg_width` is the register operand size, larger for `movzx`.
    Memory { reg: Gpr, width: u8, reg_width: u8, len: u8 },
    /// Store of an immediate to memory.
    WriteImm { value: u64, width: u8, len: u8 },
}

impl DecodedInstruction {
    pub fn len(&self) -> Option<u8> {
        match *self {
            DecodedInstruction::DecodeFail => None,
            DecodedInstruction::Memory { len, .. } | DecodedInstruction::WriteImm { len, .. } => Some(len),
        }
    }
}

/// Decode the instruction at the start of `bytes` as 64-bit code.
pub fn decode_instruction(bytes: &[u8], ip: u64) -> DecodedInstruction {
    let mut decoder = Decoder::with_ip(64, bytes, ip, DecoderOptions::NONE);
    let instr = decoder.decode();
    if instr.code() == Code::INVALID {
        log::debug!("undecodable instruction at 0x{:x}: {:02x?}", ip, bytes);
        return DecodedInstruction::DecodeFail;
    }
    let len = instr.len() as u8;

    let decoded = match instr.code() {
        // mov m, r
        Code::Mov_rm8_r8 | Code::Mov_rm16_r16 | Code::Mov_rm32_r32 | Code::Mov_rm64_r64
            if instr.op0_kind() == OpKind::Memory =>
        {
            let width = store_width(instr.code());
            gpr(instr.op1_register()).map(|reg| DecodedInstruction::Memory { reg, width, reg_width: width, len })
        }
        // mov r, m
        Code::Mov_r8_rm8 | Code::Mov_r16_rm16 | Code::Mov_r32_rm32 | Code::Mov_r64_rm64
            if instr.op1_kind() == OpKind::Memory =>
        {
            let width = load_width(instr.code());
            gpr(instr.op0_register()).map(|reg| DecodedInstruction::Memory { reg, width, reg_width: width, len })
        }
        // mov m, imm
        Code::Mov_rm8_imm8 | Code::Mov_rm16_imm16 | Code::Mov_rm32_imm32 | Code::Mov_rm64_imm32
            if instr.op0_kind() == OpKind::Memory =>
        {
            let width = store_width(instr.code());
            Some(DecodedInstruction::WriteImm { value: immediate(&instr), width, len })
        }
        // movzx r, m
        Code::Movzx_r16_rm8
        | Code::Movzx_r32_rm8
        | Code::Movzx_r64_rm8
        | Code::Movzx_r16_rm16
        | Code::Movzx_r32_rm16
        | Code::Movzx_r64_rm16
            if instr.op1_kind() == OpKind::Memory =>
        {
            let (width, reg_width) = movzx_widths(instr.code());
            gpr(instr.op0_register()).map(|reg| DecodedInstruction::Memory { reg, width, reg_width, len })
        }
        code => {
            log::debug!("instruction {:?} at 0x{:x} is not emulated for MMIO", code, ip);
            None
        }
    };

    decoded.unwrap_or(DecodedInstruction::DecodeFail)
}

fn store_width(code: Code) -> u8 {
    match code {
        Code::Mov_rm8_r8 | Code::Mov_rm8_imm8 => 1,
        Code::Mov_rm16_r16 | Code::Mov_rm16_imm16 => 2,
        Code::Mov_rm32_r32 | Code::Mov_rm32_imm32 => 4,
        _ => 8,
    }
}

fn load_width(code: Code) -> u8 {
    match code {
        Code::Mov_r8_rm8 => 1,
        Code::Mov_r16_rm16 => 2,
        Code::Mov_r32_rm32 => 4,
        _ => 8,
    }
}

fn movzx_widths(code: Code) -> (u8, u8) {
    match code {
        Code::Movzx_r16_rm8 => (1, 2),
        Code::Movzx_r32_rm8 => (1, 4),
        Code::Movzx_r64_rm8 => (1, 8),
        Code::Movzx_r16_rm16 => (2, 2),
        Code::Movzx_r32_rm16 => (2, 4),
        _ => (2, 8),
    }
}

fn immediate(instr: &Instruction) -> u64 {
    match instr.op1_kind() {
        OpKind::Immediate8 => instr.immediate8() as u64,
        OpKind::Immediate16 => instr.immediate16() as u64,
        OpKind::Immediate32 => instr.immediate32() as u64,
        OpKind::Immediate32to64 => instr.immediate32to64() as u64,
        _ => instr.immediate64(),
    }
}

/// Map an operand register to the GPR it lives in. The legacy high-byte
/// registers (AH, BH, CH, DH) have no slot and are rejected.
fn gpr(reg: Register) -> Option<Gpr> {
    use Register::*;
    Some(match reg {
        AL | AX | EAX | RAX => Gpr::Rax,
        CL | CX | ECX | RCX => Gpr::Rcx,
        DL | DX | EDX | RDX => Gpr::Rdx,
        BL | BX | EBX | RBX => Gpr::Rbx,
        SPL | SP | ESP | RSP => Gpr::Rsp,
        BPL | BP | EBP | RBP => Gpr::Rbp,
        SIL | SI | ESI | RSI => Gpr::Rsi,
        DIL | DI | EDI | RDI => Gpr::Rdi,
        R8L | R8W | R8D | R8 => Gpr::R8,
        R9L | R9W | R9D | R9 => Gpr::R9,
        R10L | R10W | R10D | R10 => Gpr::R10,
        R11L | R11W | R11D | R11 => Gpr::R11,
        R12L | R12W | R12D | R12 => Gpr::R12,
        R13L | R13W | R13D | R13 => Gpr::R13,
        R14L | R14W | R14D | R14 => Gpr::R14,
        R15L | R15W | R15D | R15 => Gpr::R15,
        _ => {
            log::debug!("operand register {:?} is not emulated", reg);
            return Option::None;
        }
    })
}
