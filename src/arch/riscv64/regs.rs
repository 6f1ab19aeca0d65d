//! RISC-V Register Definitions

use crate::arch::traits::VcpuContextOps;

// ABI register numbers
pub const REG_ZERO: u8 = 0;
pub const REG_RA: u8 = 1;
pub const REG_SP: u8 = 2;
pub const REG_A0: u8 = 10;
pub const REG_A1: u8 = 11;
pub const REG_A2: u8 = 12;
pub const REG_A6: u8 = 16;
pub const REG_A7: u8 = 17;

/// Supervisor interrupt pending bits
pub const SIP_SSIP: u64 = 1 << 1;
pub const SIP_STIP: u64 = 1 << 5;
pub const SIP_SEIP: u64 = 1 << 9;

/// Integer register file of a hart plus its PC. `x[0]` is always zero.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RiscvRegs {
    pub pc: u64,
    pub x: [u64; 32],
}

impl RiscvRegs {
    /// Register state for entering a Linux kernel on `hart`.
    pub fn linux_boot(pc: u64, hart: usize, dtb: u64) -> Self {
        let mut regs = Self { pc, ..Default::default() };
        regs.set_reg(REG_A0, hart as u64);
        regs.set_reg(REG_A1, dtb);
        regs
    }

    pub fn a(&self, n: u8) -> u64 {
        self.get_reg(REG_A0 + n)
    }

    pub fn set_a(&mut self, n: u8, val: u64) {
        self.set_reg(REG_A0 + n, val);
    }

    /// Log the register file at error level.
    pub fn dump(&self, vcpu_id: usize) {
        const NAMES: [&str; 32] = [
            "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "s1", "a0", "a1", "a2", "a3", "a4", "a5",
            "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "t3", "t4", "t5", "t6",
        ];
        log::error!("vCPU {} registers:", vcpu_id);
        log::error!("    pc:   0x{:016x}", self.pc);
        for (pair, names) in self.x.chunks(2).zip(NAMES.chunks(2)) {
            log::error!("    {:<4}: 0x{:016x}    {:<4}: 0x{:016x}", names[0], pair[0], names[1], pair[1]);
        }
    }
}

impl VcpuContextOps for RiscvRegs {
    fn pc(&self) -> u64 {
        self.pc
    }

    fn set_pc(&mut self, val: u64) {
        self.pc = val;
    }

    fn sp(&self) -> u64 {
        self.x[REG_SP as usize]
    }

    fn set_sp(&mut self, val: u64) {
        self.x[REG_SP as usize] = val;
    }

    fn get_reg(&self, n: u8) -> u64 {
        self.x.get(n as usize).copied().unwrap_or(0)
    }

    fn set_reg(&mut self, n: u8, val: u64) {
        if n != REG_ZERO {
            if let Some(r) = self.x.get_mut(n as usize) {
                *r = val;
            }
        }
    }

    fn advance_pc(&mut self, len: u64) {
        self.pc = self.pc.wrapping_add(len);
    }
}

/// VS-mode CSRs held by the kernel for each vCPU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiscvVcpuReg {
    Sstatus,
    Sie,
    Stvec,
    Sscratch,
    Sepc,
    Scause,
    Stval,
    Sip,
    Satp,
    /// Virtual supervisor timer compare value
    Timer,
}

impl RiscvVcpuReg {
    pub const ALL: [RiscvVcpuReg; 10] = [
        RiscvVcpuReg::Sstatus,
        RiscvVcpuReg::Sie,
        RiscvVcpuReg::Stvec,
        RiscvVcpuReg::Sscratch,
        RiscvVcpuReg::Sepc,
        RiscvVcpuReg::Scause,
        RiscvVcpuReg::Stval,
        RiscvVcpuReg::Sip,
        RiscvVcpuReg::Satp,
        RiscvVcpuReg::Timer,
    ];

    pub fn name(self) -> &'static str {
        match self {
            RiscvVcpuReg::Sstatus => "sstatus",
            RiscvVcpuReg::Sie => "sie",
            RiscvVcpuReg::Stvec => "stvec",
            RiscvVcpuReg::Sscratch => "sscratch",
            RiscvVcpuReg::Sepc => "sepc",
            RiscvVcpuReg::Scause => "scause",
            RiscvVcpuReg::Stval => "stval",
            RiscvVcpuReg::Sip => "sip",
            RiscvVcpuReg::Satp => "satp",
            RiscvVcpuReg::Timer => "timer",
        }
    }

    /// Value on reset. The timer compare starts at "never".
    pub fn reset_value(self) -> u64 {
        match self {
            RiscvVcpuReg::Timer => u64::MAX,
            _ => 0,
        }
    }
}
