//! x86_64 Register Definitions

use bitflags::bitflags;

use crate::arch::traits::VcpuContextOps;

/// General purpose registers of a vCPU as saved by the kernel, plus RIP
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct X86Regs {
    pub rip: u64,
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub rsp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
}

/// General purpose register names, in encoding order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Gpr {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Gpr {
    pub fn from_index(n: u8) -> Option<Self> {
        Some(match n {
            0 => Gpr::Rax,
            1 => Gpr::Rcx,
            2 => Gpr::Rdx,
            3 => Gpr::Rbx,
            4 => Gpr::Rsp,
            5 => Gpr::Rbp,
            6 => Gpr::Rsi,
            7 => Gpr::Rdi,
            8 => Gpr::R8,
            9 => Gpr::R9,
            10 => Gpr::R10,
            11 => Gpr::R11,
            12 => Gpr::R12,
            13 => Gpr::R13,
            14 => Gpr::R14,
            15 => Gpr::R15,
            _ => return None,
        })
    }
}

impl X86Regs {
    pub fn get(&self, reg: Gpr) -> u64 {
        match reg {
            Gpr::Rax => self.rax,
            Gpr::Rcx => self.rcx,
            Gpr::Rdx => self.rdx,
            Gpr::Rbx => self.rbx,
            Gpr::Rsp => self.rsp,
            Gpr::Rbp => self.rbp,
            Gpr::Rsi => self.rsi,
            Gpr::Rdi => self.rdi,
            Gpr::R8 => self.r8,
            Gpr::R9 => self.r9,
            Gpr::R10 => self.r10,
            Gpr::R11 => self.r11,
            Gpr::R12 => self.r12,
            Gpr::R13 => self.r13,
            Gpr::R14 => self.r14,
            Gpr::R15 => self.r15,
        }
    }

    pub fn get_mut(&mut self, reg: Gpr) -> &mut u64 {
        match reg {
            Gpr::Rax => &mut self.rax,
            Gpr::Rcx => &mut self.rcx,
            Gpr::Rdx => &mut self.rdx,
            Gpr::Rbx => &mut self.rbx,
            Gpr::Rsp => &mut self.rsp,
            Gpr::Rbp => &mut self.rbp,
            Gpr::Rsi => &mut self.rsi,
            Gpr::Rdi => &mut self.rdi,
            Gpr::R8 => &mut self.r8,
            Gpr::R9 => &mut self.r9,
            Gpr::R10 => &mut self.r10,
            Gpr::R11 => &mut self.r11,
            Gpr::R12 => &mut self.r12,
            Gpr::R13 => &mut self.r13,
            Gpr::R14 => &mut self.r14,
            Gpr::R15 => &mut self.r15,
        }
    }

    /// Write `value` as an operand of `width` bytes.
    ///
    /// 32-bit writes zero the upper half; 8- and 16-bit writes leave the
    /// remaining bits untouched.
    pub fn write_sized(&mut self, reg: Gpr, width: u8, value: u64) {
        let slot = self.get_mut(reg);
        *slot = match width {
            1 => (*slot & !0xff) | (value & 0xff),
            2 => (*slot & !0xffff) | (value & 0xffff),
            4 => value & 0xffff_ffff,
            _ => value,
        };
    }

    /// Log the full register file at error level.
    pub fn dump(&self, vcpu_id: usize) {
        log::error!("vCPU {} registers:", vcpu_id);
        log::error!("    rip: 0x{:016x}", self.rip);
        log::error!("    rax: 0x{:016x}    rbx: 0x{:016x}", self.rax, self.rbx);
        log::error!("    rcx: 0x{:016x}    rdx: 0x{:016x}", self.rcx, self.rdx);
        log::error!("    rsi: 0x{:016x}    rdi: 0x{:016x}", self.rsi, self.rdi);
        log::error!("    rbp: 0x{:016x}    rsp: 0x{:016x}", self.rbp, self.rsp);
        log::error!("    r8:  0x{:016x}    r9:  0x{:016x}", self.r8, self.r9);
        log::error!("    r10: 0x{:016x}    r11: 0x{:016x}", self.r10, self.r11);
        log::error!("    r12: 0x{:016x}    r13: 0x{:016x}", self.r12, self.r13);
        log::error!("    r14: 0x{:016x}    r15: 0x{:016x}", self.r14, self.r15);
    }
}

impl VcpuContextOps for X86Regs {
    fn pc(&self) -> u64 {
        self.rip
    }

    fn set_pc(&mut self, val: u64) {
        self.rip = val;
    }

    fn sp(&self) -> u64 {
        self.rsp
    }

    fn set_sp(&mut self, val: u64) {
        self.rsp = val;
    }

    fn get_reg(&self, n: u8) -> u64 {
        Gpr::from_index(n).map_or(0, |r| self.get(r))
    }

    fn set_reg(&mut self, n: u8, val: u64) {
        if let Some(r) = Gpr::from_index(n) {
            *self.get_mut(r) = val;
        }
    }

    fn advance_pc(&mut self, len: u64) {
        self.rip = self.rip.wrapping_add(len);
    }
}

/// VMCS guest-state fields the VMM reads or writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmcsField {
    GuestCr0,
    GuestCr3,
    GuestCr4,
    GuestRflags,
    GuestEfer,
    GuestCsSelector,
    GuestCsBase,
    GuestGdtrBase,
    GuestIdtrBase,
}

impl VmcsField {
    pub const DUMP: [VmcsField; 9] = [
        VmcsField::GuestCr0,
        VmcsField::GuestCr3,
        VmcsField::GuestCr4,
        VmcsField::GuestRflags,
        VmcsField::GuestEfer,
        VmcsField::GuestCsSelector,
        VmcsField::GuestCsBase,
        VmcsField::GuestGdtrBase,
        VmcsField::GuestIdtrBase,
    ];

    /// Architectural VMCS encoding
    pub fn encoding(self) -> u32 {
        match self {
            VmcsField::GuestCr0 => 0x6800,
            VmcsField::GuestCr3 => 0x6802,
            VmcsField::GuestCr4 => 0x6804,
            VmcsField::GuestRflags => 0x6820,
            VmcsField::GuestEfer => 0x2806,
            VmcsField::GuestCsSelector => 0x0802,
            VmcsField::GuestCsBase => 0x6808,
            VmcsField::GuestGdtrBase => 0x6816,
            VmcsField::GuestIdtrBase => 0x6818,
        }
    }
}

bitflags! {
    /// CR0 bits
    pub struct Cr0: u64 {
        const PE = 1 << 0;
        const WP = 1 << 16;
        const PG = 1 << 31;
    }
}

bitflags! {
    /// RFLAGS bits
    pub struct Rflags: u64 {
        const CF = 1 << 0;
        const IF = 1 << 9;
        const DF = 1 << 10;
    }
}
