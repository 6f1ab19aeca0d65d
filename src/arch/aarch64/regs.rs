//! ARM64 Register Definitions
//!
//! The register context the microkernel saves for a vCPU thread, plus the
//! banked EL1 system registers held in the kernel's VCPU object.

use super::defs::*;
use crate::arch::traits::VcpuContextOps;

/// General Purpose Registers (x0-x30)
///
/// In ARM64, we have 31 general purpose registers:
/// - x0-x30: General purpose registers
/// - x29: Frame Pointer (FP)
/// - x30: Link Register (LR)
/// - register number 31 encodes XZR in load/store syndromes
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GeneralPurposeRegs {
    pub x0: u64,
    pub x1: u64,
    pub x2: u64,
    pub x3: u64,
    pub x4: u64,
    pub x5: u64,
    pub x6: u64,
    pub x7: u64,
    pub x8: u64,
    pub x9: u64,
    pub x10: u64,
    pub x11: u64,
    pub x12: u64,
    pub x13: u64,
    pub x14: u64,
    pub x15: u64,
    pub x16: u64,
    pub x17: u64,
    pub x18: u64,
    pub x19: u64,
    pub x20: u64,
    pub x21: u64,
    pub x22: u64,
    pub x23: u64,
    pub x24: u64,
    pub x25: u64,
    pub x26: u64,
    pub x27: u64,
    pub x28: u64,
    pub x29: u64, // FP
    pub x30: u64, // LR
}

impl GeneralPurposeRegs {
    /// Get value of a general purpose register
    ///
    /// # Arguments
    /// * `reg` - Register number (0-30; 31 reads as zero)
    pub fn get_reg(&self, reg: u8) -> u64 {
        match reg {
            0 => self.x0,
            1 => self.x1,
            2 => self.x2,
            3 => self.x3,
            4 => self.x4,
            5 => self.x5,
            6 => self.x6,
            7 => self.x7,
            8 => self.x8,
            9 => self.x9,
            10 => self.x10,
            11 => self.x11,
            12 => self.x12,
            13 => self.x13,
            14 => self.x14,
            15 => self.x15,
            16 => self.x16,
            17 => self.x17,
            18 => self.x18,
            19 => self.x19,
            20 => self.x20,
            21 => self.x21,
            22 => self.x22,
            23 => self.x23,
            24 => self.x24,
            25 => self.x25,
            26 => self.x26,
            27 => self.x27,
            28 => self.x28,
            29 => self.x29,
            30 => self.x30,
            _ => 0, // XZR
        }
    }

    /// Set value of a general purpose register
    ///
    /// # Arguments
    /// * `reg` - Register number (0-30; writes to 31 are discarded)
    /// * `value` - Value to set
    pub fn set_reg(&mut self, reg: u8, value: u64) {
        match reg {
            0 => self.x0 = value,
            1 => self.x1 = value,
            2 => self.x2 = value,
            3 => self.x3 = value,
            4 => self.x4 = value,
            5 => self.x5 = value,
            6 => self.x6 = value,
            7 => self.x7 = value,
            8 => self.x8 = value,
            9 => self.x9 = value,
            10 => self.x10 = value,
            11 => self.x11 = value,
            12 => self.x12 = value,
            13 => self.x13 = value,
            14 => self.x14 = value,
            15 => self.x15 = value,
            16 => self.x16 = value,
            17 => self.x17 = value,
            18 => self.x18 = value,
            19 => self.x19 = value,
            20 => self.x20 = value,
            21 => self.x21 = value,
            22 => self.x22 = value,
            23 => self.x23 = value,
            24 => self.x24 = value,
            25 => self.x25 = value,
            26 => self.x26 = value,
            27 => self.x27 = value,
            28 => self.x28 = value,
            29 => self.x29 = value,
            30 => self.x30 = value,
            _ => {} // XZR
        }
    }
}

/// Saved thread context of a vCPU
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserContext {
    /// Program counter, where to resume execution
    pub pc: u64,
    /// Stack pointer (SP_EL0)
    pub sp: u64,
    /// Saved Program Status Register, guest PSTATE on trap
    pub spsr: u64,
    /// General purpose registers
    pub gpr: GeneralPurposeRegs,
    pub tpidr_el0: u64,
    pub tpidrro_el0: u64,
}

impl UserContext {
    /// Boot register state of the Linux arm64 protocol: x0 holds the DTB
    /// address and the vCPU enters EL1h with all exceptions masked off.
    pub fn linux_boot(pc: u64, dtb: u64) -> Self {
        let mut ctx = Self::default();
        ctx.pc = pc;
        ctx.spsr = SPSR_EL1H;
        ctx.gpr.x0 = dtb;
        ctx
    }

    /// Log the full register file at error level.
    pub fn dump(&self, vcpu_id: usize) {
        log::error!("vCPU {} registers:", vcpu_id);
        log::error!("    pc:   0x{:016x}", self.pc);
        log::error!("    sp:   0x{:016x}", self.sp);
        log::error!("    spsr: 0x{:016x}", self.spsr);
        for i in (0..31u8).step_by(2) {
            if i == 30 {
                log::error!("    x30:  0x{:016x}", self.gpr.get_reg(30));
            } else {
                log::error!(
                    "    x{:<2}:  0x{:016x}    x{:<2}: 0x{:016x}",
                    i, self.gpr.get_reg(i), i + 1, self.gpr.get_reg(i + 1)
                );
            }
        }
        log::error!("    tpidr_el0:   0x{:016x}", self.tpidr_el0);
        log::error!("    tpidrro_el0: 0x{:016x}", self.tpidrro_el0);
    }
}

impl VcpuContextOps for UserContext {
    fn pc(&self) -> u64 {
        self.pc
    }

    fn set_pc(&mut self, val: u64) {
        self.pc = val;
    }

    fn sp(&self) -> u64 {
        self.sp
    }

    fn set_sp(&mut self, val: u64) {
        self.sp = val;
    }

    fn get_reg(&self, n: u8) -> u64 {
        self.gpr.get_reg(n)
    }

    fn set_reg(&mut self, n: u8, val: u64) {
        self.gpr.set_reg(n, val);
    }

    fn advance_pc(&mut self, len: u64) {
        self.pc = self.pc.wrapping_add(len);
    }
}

/// EL1 system registers banked in the kernel's VCPU object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VcpuReg {
    Sctlr,
    Ttbr0,
    Ttbr1,
    Tcr,
    Mair,
    Amair,
    Cidr,
    Actlr,
    Cpacr,
    Afsr0,
    Afsr1,
    Esr,
    Far,
    Isr,
    Vbar,
    TpidrEl1,
    VmpidrEl2,
    SpEl1,
    ElrEl1,
    SpsrEl1,
    CntvCtl,
    CntvCval,
    CntvOff,
    CntkctlEl1,
}

impl VcpuReg {
    pub const ALL: [VcpuReg; 24] = [
        VcpuReg::Sctlr,
        VcpuReg::Ttbr0,
        VcpuReg::Ttbr1,
        VcpuReg::Tcr,
        VcpuReg::Mair,
        VcpuReg::Amair,
        VcpuReg::Cidr,
        VcpuReg::Actlr,
        VcpuReg::Cpacr,
        VcpuReg::Afsr0,
        VcpuReg::Afsr1,
        VcpuReg::Esr,
        VcpuReg::Far,
        VcpuReg::Isr,
        VcpuReg::Vbar,
        VcpuReg::TpidrEl1,
        VcpuReg::VmpidrEl2,
        VcpuReg::SpEl1,
        VcpuReg::ElrEl1,
        VcpuReg::SpsrEl1,
        VcpuReg::CntvCtl,
        VcpuReg::CntvCval,
        VcpuReg::CntvOff,
        VcpuReg::CntkctlEl1,
    ];

    /// Value written on vCPU reset.
    pub fn reset_value(self, vcpu_id: usize) -> u64 {
        match self {
            VcpuReg::Sctlr => SCTLR_EL1_DEFAULT,
            VcpuReg::VmpidrEl2 => MPIDR_RES1 | vcpu_id as u64,
            _ => 0,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            VcpuReg::Sctlr => "SCTLR",
            VcpuReg::Ttbr0 => "TTBR0",
            VcpuReg::Ttbr1 => "TTBR1",
            VcpuReg::Tcr => "TCR",
            VcpuReg::Mair => "MAIR",
            VcpuReg::Amair => "AMAIR",
            VcpuReg::Cidr => "CIDR",
            VcpuReg::Actlr => "ACTLR",
            VcpuReg::Cpacr => "CPACR",
            VcpuReg::Afsr0 => "AFSR0",
            VcpuReg::Afsr1 => "AFSR1",
            VcpuReg::Esr => "ESR",
            VcpuReg::Far => "FAR",
            VcpuReg::Isr => "ISR",
            VcpuReg::Vbar => "VBAR",
            VcpuReg::TpidrEl1 => "TPIDR_EL1",
            VcpuReg::VmpidrEl2 => "VMPIDR_EL2",
            VcpuReg::SpEl1 => "SP_EL1",
            VcpuReg::ElrEl1 => "ELR_EL1",
            VcpuReg::SpsrEl1 => "SPSR_EL1",
            VcpuReg::CntvCtl => "CNTV_CTL",
            VcpuReg::CntvCval => "CNTV_CVAL",
            VcpuReg::CntvOff => "CNTVOFF",
            VcpuReg::CntkctlEl1 => "CNTKCTL_EL1",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xzr_reads_zero_and_ignores_writes() {
        let mut regs = GeneralPurposeRegs::default();
        regs.set_reg(31, 0x1234);
        assert_eq!(regs.get_reg(31), 0);
        regs.set_reg(30, 0x55);
        assert_eq!(regs.x30, 0x55);
    }

    #[test]
    fn test_linux_boot_context() {
        let ctx = UserContext::linux_boot(0x4020_0000, 0x47f0_0000);
        assert_eq!(ctx.pc, 0x4020_0000);
        assert_eq!(ctx.gpr.x0, 0x47f0_0000);
        assert_eq!(ctx.spsr, SPSR_EL1H);
    }
}
