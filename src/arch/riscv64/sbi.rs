//! SBI emulation
//!
//! The guest kernel runs in VS-mode and reaches "firmware" through ecall.
//! The VMM answers as an SBI v2.0 implementation: extension id in a7,
//! function id in a6, arguments from a0, error code returned in a0 and
//! value in a1.

use super::kernel::RiscvKernel;
use super::regs::{RiscvRegs, RiscvVcpuReg, REG_A6, REG_A7, SIP_SSIP, SIP_STIP};
use super::vmm::RiscvVmm;
use crate::arch::traits::{VcpuContextOps, Vmm};
use crate::devices::MmioDevice;

/// ecall is never compressed
pub const ECALL_INSN_SIZE: u64 = 4;

/// SBI v2.0
pub const SBI_SPEC_VERSION: u64 = 2 << 24;

pub const SBI_MACHINE_VENDOR_ID: u64 = 0;
pub const SBI_MACHINE_ARCH_ID: u64 = 0;
pub const SBI_MACHINE_IMPL_ID: u64 = 0;

// Extension ids
pub const SBI_EXT_LEGACY_PUTCHAR: u64 = 0x1;
pub const SBI_EXT_LEGACY_GETCHAR: u64 = 0x2;
pub const SBI_EXT_BASE: u64 = 0x10;
pub const SBI_EXT_TIMER: u64 = 0x5449_4d45;
pub const SBI_EXT_IPI: u64 = 0x0073_5049;
pub const SBI_EXT_RFENCE: u64 = 0x5246_4e43;
pub const SBI_EXT_HSM: u64 = 0x0048_534d;
pub const SBI_EXT_SRST: u64 = 0x5352_5354;
pub const SBI_EXT_PMU: u64 = 0x0050_4d55;
pub const SBI_EXT_DBCN: u64 = 0x4442_434e;
pub const SBI_EXT_SUSP: u64 = 0x5355_5350;
pub const SBI_EXT_CPPC: u64 = 0x4350_5043;

// BASE functions
pub const SBI_BASE_GET_SPEC_VERSION: u64 = 0;
pub const SBI_BASE_GET_IMPL_ID: u64 = 1;
pub const SBI_BASE_GET_IMPL_VERSION: u64 = 2;
pub const SBI_BASE_PROBE_EXTENSION: u64 = 3;
pub const SBI_BASE_GET_MVENDORID: u64 = 4;
pub const SBI_BASE_GET_MARCHID: u64 = 5;
pub const SBI_BASE_GET_MIMPID: u64 = 6;

pub const SBI_TIMER_SET_TIMER: u64 = 0;
pub const SBI_IPI_SEND_IPI: u64 = 0;

// RFENCE functions forwarded as IPIs
pub const SBI_RFENCE_FENCE_I: u64 = 0;
pub const SBI_RFENCE_SFENCE_VMA: u64 = 1;
pub const SBI_RFENCE_SFENCE_VMA_ASID: u64 = 2;

pub const SBI_HSM_HART_START: u64 = 0;
pub const SBI_HSM_HART_STOP: u64 = 1;
pub const SBI_HSM_HART_GET_STATUS: u64 = 2;

pub const SBI_HSM_STATE_STARTED: u64 = 0;
pub const SBI_HSM_STATE_STOPPED: u64 = 1;

pub const SBI_SRST_SYSTEM_RESET: u64 = 0;
pub const SBI_SRST_TYPE_SHUTDOWN: u64 = 0;

pub const SBI_DBCN_WRITE: u64 = 0;
pub const SBI_DBCN_READ: u64 = 1;
pub const SBI_DBCN_WRITE_BYTE: u64 = 2;

/// A `hart_mask_base` of all ones selects every hart
pub const SBI_HART_MASK_BASE_ALL: u64 = u64::MAX;

/// Extensions answered by this implementation
const SUPPORTED_EXTENSIONS: [u64; 7] = [
    SBI_EXT_BASE,
    SBI_EXT_TIMER,
    SBI_EXT_IPI,
    SBI_EXT_RFENCE,
    SBI_EXT_HSM,
    SBI_EXT_SRST,
    SBI_EXT_DBCN,
];

/// Guest memory is copied to the console in chunks of this size
const DBCN_CHUNK: usize = 64;

/// SBI return codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum SbiError {
    Success = 0,
    Failed = -1,
    NotSupported = -2,
    InvalidParam = -3,
    Denied = -4,
    InvalidAddress = -5,
    AlreadyAvailable = -6,
    AlreadyStarted = -7,
    AlreadyStopped = -8,
    NoShmem = -9,
}

impl SbiError {
    /// Value the guest sees in a0.
    pub fn to_reg(self) -> u64 {
        self as i64 as u64
    }
}

/// How to continue after an ecall
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SbiOutcome {
    /// a0/a1 hold the result; step over the ecall and resume
    Resume,
    /// The calling hart was stopped
    Stopped,
}

pub fn extension_name(eid: u64) -> &'static str {
    match eid {
        SBI_EXT_LEGACY_PUTCHAR => "console putchar",
        SBI_EXT_LEGACY_GETCHAR => "console getchar",
        SBI_EXT_BASE => "base",
        SBI_EXT_TIMER => "timer",
        SBI_EXT_IPI => "IPI",
        SBI_EXT_RFENCE => "RFENCE",
        SBI_EXT_HSM => "HSM",
        SBI_EXT_SRST => "system reset",
        SBI_EXT_PMU => "PMU",
        SBI_EXT_DBCN => "debug console",
        SBI_EXT_SUSP => "system suspend",
        SBI_EXT_CPPC => "CPPC",
        _ => "unknown extension",
    }
}

fn ret(regs: &mut RiscvRegs, error: SbiError, value: u64) {
    regs.set_a(0, error.to_reg());
    regs.set_a(1, value);
}

fn fail(regs: &mut RiscvRegs, error: SbiError) {
    regs.set_a(0, error.to_reg());
}

impl<K: RiscvKernel, D: MmioDevice> RiscvVmm<K, D> {
    /// Service the ecall `vcpu` trapped on.
    pub(super) fn handle_sbi(&mut self, vcpu: usize) -> bool {
        let mut regs = self.kernel.read_regs(vcpu);
        let eid = regs.get_reg(REG_A7);
        let fid = regs.get_reg(REG_A6);
        log::trace!("SBI {} (0x{:x}) fid 0x{:x} from vCPU {}", extension_name(eid), eid, fid, vcpu);

        let outcome = match eid {
            SBI_EXT_BASE => self.sbi_base(vcpu, fid, &mut regs),
            SBI_EXT_TIMER => self.sbi_timer(vcpu, fid, &mut regs),
            SBI_EXT_IPI => self.sbi_ipi(fid, &mut regs),
            SBI_EXT_RFENCE => self.sbi_rfence(fid, &mut regs),
            SBI_EXT_HSM => self.sbi_hsm(vcpu, fid, &mut regs),
            SBI_EXT_SRST => self.sbi_srst(vcpu, fid, &mut regs),
            SBI_EXT_DBCN => self.sbi_dbcn(fid, &mut regs),
            SBI_EXT_LEGACY_PUTCHAR => {
                self.console.put(regs.a(0) as u8);
                fail(&mut regs, SbiError::Success);
                SbiOutcome::Resume
            }
            SBI_EXT_LEGACY_GETCHAR => {
                // No input; legacy calls report failure as -1
                regs.set_a(0, u64::MAX);
                SbiOutcome::Resume
            }
            _ => {
                log::warn!(
                    "unhandled SBI extension {} (0x{:x}) fid 0x{:x} from vCPU {}",
                    extension_name(eid),
                    eid,
                    fid,
                    vcpu
                );
                fail(&mut regs, SbiError::NotSupported);
                SbiOutcome::Resume
            }
        };

        match outcome {
            SbiOutcome::Resume => {
                regs.advance_pc(ECALL_INSN_SIZE);
                self.kernel.write_regs(vcpu, &regs);
            }
            SbiOutcome::Stopped => {}
        }
        true
    }

    fn sbi_base(&mut self, vcpu: usize, fid: u64, regs: &mut RiscvRegs) -> SbiOutcome {
        match fid {
            SBI_BASE_GET_SPEC_VERSION => ret(regs, SbiError::Success, SBI_SPEC_VERSION),
            // No particular implementation is emulated
            SBI_BASE_GET_IMPL_ID | SBI_BASE_GET_IMPL_VERSION => fail(regs, SbiError::NotSupported),
            SBI_BASE_PROBE_EXTENSION => {
                let probed = regs.a(0);
                if SUPPORTED_EXTENSIONS.contains(&probed) {
                    ret(regs, SbiError::Success, 1);
                } else {
                    log::info!(
                        "vCPU {} probed unsupported SBI extension {} (0x{:x})",
                        vcpu,
                        extension_name(probed),
                        probed
                    );
                    fail(regs, SbiError::NotSupported);
                }
            }
            SBI_BASE_GET_MVENDORID => ret(regs, SbiError::Success, SBI_MACHINE_VENDOR_ID),
            SBI_BASE_GET_MARCHID => ret(regs, SbiError::Success, SBI_MACHINE_ARCH_ID),
            SBI_BASE_GET_MIMPID => ret(regs, SbiError::Success, SBI_MACHINE_IMPL_ID),
            _ => {
                log::warn!("invalid SBI base fid 0x{:x}", fid);
                fail(regs, SbiError::NotSupported);
            }
        }
        SbiOutcome::Resume
    }

    /// Program the next timer event. A deadline already in the past
    /// raises the timer interrupt immediately.
    fn sbi_timer(&mut self, vcpu: usize, fid: u64, regs: &mut RiscvRegs) -> SbiOutcome {
        if fid != SBI_TIMER_SET_TIMER {
            log::warn!("invalid SBI timer fid 0x{:x}", fid);
            fail(regs, SbiError::NotSupported);
            return SbiOutcome::Resume;
        }

        let deadline = regs.a(0);
        self.update_sip(vcpu, 0, SIP_STIP);
        let now = self.kernel.current_time();
        if now >= deadline {
            self.update_sip(vcpu, SIP_STIP, 0);
            self.timer_waiting[vcpu] = false;
        } else {
            self.kernel.write_vcpu_reg(vcpu, RiscvVcpuReg::Timer, deadline);
            self.timer_waiting[vcpu] = true;
        }
        fail(regs, SbiError::Success);
        SbiOutcome::Resume
    }

    fn sbi_ipi(&mut self, fid: u64, regs: &mut RiscvRegs) -> SbiOutcome {
        if fid != SBI_IPI_SEND_IPI {
            log::warn!("invalid SBI IPI fid 0x{:x}", fid);
            fail(regs, SbiError::NotSupported);
            return SbiOutcome::Resume;
        }
        let error = self.send_ipi(regs.a(0), regs.a(1));
        fail(regs, error);
        SbiOutcome::Resume
    }

    /// Remote fences are delivered as software interrupts; the guest's
    /// IPI handler performs the fence on the target hart.
    fn sbi_rfence(&mut self, fid: u64, regs: &mut RiscvRegs) -> SbiOutcome {
        match fid {
            SBI_RFENCE_FENCE_I | SBI_RFENCE_SFENCE_VMA | SBI_RFENCE_SFENCE_VMA_ASID => {
                let error = self.send_ipi(regs.a(0), regs.a(1));
                fail(regs, error);
            }
            _ => {
                log::warn!("invalid SBI RFENCE fid 0x{:x}", fid);
                fail(regs, SbiError::NotSupported);
            }
        }
        SbiOutcome::Resume
    }

    /// Set SSIP on every hart selected by `mask` relative to `base`.
    fn send_ipi(&mut self, mask: u64, base: u64) -> SbiError {
        let num = self.vcpus.num_vcpus();
        let targets = if base == SBI_HART_MASK_BASE_ALL {
            (1u64 << num) - 1
        } else {
            let mut targets = 0u64;
            for bit in (0..64).filter(|b| mask & (1 << b) != 0) {
                match base.checked_add(bit) {
                    Some(hart) if hart < num as u64 => targets |= 1 << hart,
                    _ => {
                        log::warn!("IPI to invalid hart, mask 0x{:x} base {}", mask, base);
                        return SbiError::InvalidParam;
                    }
                }
            }
            targets
        };

        for hart in (0..num).filter(|h| targets & (1 << h) != 0) {
            self.update_sip(hart, SIP_SSIP, 0);
        }
        SbiError::Success
    }

    fn sbi_hsm(&mut self, vcpu: usize, fid: u64, regs: &mut RiscvRegs) -> SbiOutcome {
        match fid {
            SBI_HSM_HART_START => {
                let error = self.hart_start(regs.a(0), regs.a(1), regs.a(2));
                fail(regs, error);
            }
            SBI_HSM_HART_STOP => {
                self.guest_stop(vcpu);
                return SbiOutcome::Stopped;
            }
            SBI_HSM_HART_GET_STATUS => {
                let hart = regs.a(0);
                if hart >= self.vcpus.num_vcpus() as u64 {
                    fail(regs, SbiError::InvalidParam);
                } else if self.vcpus.is_on(hart as usize) {
                    ret(regs, SbiError::Success, SBI_HSM_STATE_STARTED);
                } else {
                    ret(regs, SbiError::Success, SBI_HSM_STATE_STOPPED);
                }
            }
            _ => {
                log::warn!("invalid SBI HSM fid 0x{:x}", fid);
                fail(regs, SbiError::NotSupported);
            }
        }
        SbiOutcome::Resume
    }

    /// Start a stopped hart at `start` with its id in a0 and `opaque` in a1.
    fn hart_start(&mut self, hart: u64, start: u64, opaque: u64) -> SbiError {
        if hart >= self.vcpus.num_vcpus() as u64 {
            log::warn!("SBI hart_start for unknown hart {}", hart);
            return SbiError::InvalidParam;
        }
        let target = hart as usize;
        if self.vcpus.is_on(target) {
            return SbiError::AlreadyAvailable;
        }

        log::info!("SBI hart_start: starting hart {} at 0x{:x}", target, start);
        let regs = RiscvRegs::linux_boot(start, target, opaque);
        self.reset_vcpu_regs(target);
        self.kernel.write_regs(target, &regs);
        self.vcpus.set_on(target, true);
        self.kernel.vcpu_restart(target, start);
        SbiError::Success
    }

    fn sbi_srst(&mut self, vcpu: usize, fid: u64, regs: &mut RiscvRegs) -> SbiOutcome {
        if fid != SBI_SRST_SYSTEM_RESET {
            log::warn!("invalid SBI system reset fid 0x{:x}", fid);
            fail(regs, SbiError::NotSupported);
            return SbiOutcome::Resume;
        }

        let reset_type = regs.a(0) as u32 as u64;
        let reason = regs.a(1) as u32;
        if reset_type != SBI_SRST_TYPE_SHUTDOWN {
            log::warn!("unsupported SBI system reset type 0x{:x} (reason 0x{:x})", reset_type, reason);
            fail(regs, SbiError::NotSupported);
            return SbiOutcome::Resume;
        }

        log::info!("guest requested shutdown from vCPU {} (reason 0x{:x})", vcpu, reason);
        self.console.flush();
        for hart in 0..self.vcpus.num_vcpus() {
            self.guest_stop(hart);
        }
        SbiOutcome::Stopped
    }

    fn sbi_dbcn(&mut self, fid: u64, regs: &mut RiscvRegs) -> SbiOutcome {
        match fid {
            SBI_DBCN_WRITE => {
                let len = regs.a(0);
                let gpa = regs.a(1) | (regs.a(2) << 32);
                let mut buf = [0u8; DBCN_CHUNK];
                let mut done = 0u64;
                while done < len {
                    let chunk = (len - done).min(DBCN_CHUNK as u64) as usize;
                    if let Err(e) = self.mem.read_bytes(gpa.wrapping_add(done), &mut buf[..chunk]) {
                        log::warn!("SBI debug console write from 0x{:x}: {}", gpa, e);
                        fail(regs, SbiError::InvalidParam);
                        return SbiOutcome::Resume;
                    }
                    self.console.write(&buf[..chunk]);
                    done += chunk as u64;
                }
                ret(regs, SbiError::Success, len);
            }
            // No input is ever available
            SBI_DBCN_READ => ret(regs, SbiError::Success, 0),
            SBI_DBCN_WRITE_BYTE => {
                self.console.put(regs.a(0) as u8);
                fail(regs, SbiError::Success);
            }
            _ => {
                log::warn!("invalid SBI debug console fid 0x{:x}", fid);
                fail(regs, SbiError::NotSupported);
            }
        }
        SbiOutcome::Resume
    }

    /// Expiry of the vCPU timer: raise STIP on every hart that armed it.
    pub fn handle_timer(&mut self) {
        for hart in 0..self.vcpus.num_vcpus() {
            if self.timer_waiting[hart] {
                self.timer_waiting[hart] = false;
                self.update_sip(hart, SIP_STIP, 0);
            }
        }
    }

    /// Whether `hart` armed a timer that has not fired yet.
    pub fn timer_pending(&self, hart: usize) -> bool {
        self.timer_waiting.get(hart).copied().unwrap_or(false)
    }
}
