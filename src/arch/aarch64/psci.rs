//! SMC and PSCI emulation
//!
//! The guest reaches firmware services through SMC; only the standard
//! service (PSCI) is emulated.

use bitflags::bitflags;

use super::defs::SPSR_EL1H;
use super::kernel::ArmKernel;
use super::regs::UserContext;
use super::sysreg;
use crate::vcpu::VcpuTable;

/// SMC Calling Convention function ID fields
pub const SMC_SERVICE_SHIFT: u64 = 24;
pub const SMC_SERVICE_MASK: u64 = 0x3F;
pub const SMC_FUNC_MASK: u64 = 0xFFFF;

/// Owning entity numbers
pub const SMC_SERVICE_ARCH: u64 = 0;
pub const SMC_SERVICE_CPU: u64 = 1;
pub const SMC_SERVICE_SIP: u64 = 2;
pub const SMC_SERVICE_OEM: u64 = 3;
pub const SMC_SERVICE_STD: u64 = 4;
pub const SMC_SERVICE_STD_HYP: u64 = 5;

/// PSCI function numbers (low 16 bits of the function ID)
pub const PSCI_VERSION: u64 = 0x0;
pub const PSCI_CPU_SUSPEND: u64 = 0x1;
pub const PSCI_CPU_OFF: u64 = 0x2;
pub const PSCI_CPU_ON: u64 = 0x3;
pub const PSCI_AFFINITY_INFO: u64 = 0x4;
pub const PSCI_MIGRATE: u64 = 0x5;
pub const PSCI_MIGRATE_INFO_TYPE: u64 = 0x6;
pub const PSCI_MIGRATE_INFO_UP_CPU: u64 = 0x7;
pub const PSCI_SYSTEM_OFF: u64 = 0x8;
pub const PSCI_SYSTEM_RESET: u64 = 0x9;
pub const PSCI_FEATURES: u64 = 0xA;

/// PSCI 1.2
pub const PSCI_VERSION_VALUE: u64 = (1 << 16) | 2;
/// Trusted OS is not present or does not require migration
pub const PSCI_MIGRATE_NOT_REQUIRED: u64 = 2;

bitflags! {
    /// SMC function ID flag bits
    pub struct SmcFunctionId: u64 {
        /// Fast call (as opposed to yielding)
        const FAST_CALL = 1 << 31;
        /// SMC64 calling convention
        const SMC64 = 1 << 30;
    }
}

/// PSCI return codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum PsciError {
    Success = 0,
    NotSupported = -1,
    InvalidParameters = -2,
    Denied = -3,
    AlreadyOn = -4,
    OnPending = -5,
    InternalFailure = -6,
    NotPresent = -7,
    Disabled = -8,
    InvalidAddress = -9,
}

impl PsciError {
    /// Value the guest sees in x0.
    pub fn to_reg(self) -> u64 {
        self as i64 as u64
    }
}

/// How to continue after a PSCI call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PsciOutcome {
    /// x0 holds the result; step over the SMC and resume
    Resume,
    /// The guest asked to power off; leave it stopped
    SystemOff,
    /// Not emulated
    Unhandled,
}

/// Service a PSCI call from `vcpu` whose registers are in `regs`.
pub fn handle_psci<K: ArmKernel>(
    kernel: &mut K,
    vcpus: &mut VcpuTable,
    vcpu: usize,
    regs: &mut UserContext,
) -> PsciOutcome {
    let func = regs.gpr.x0 & SMC_FUNC_MASK;
    match func {
        PSCI_VERSION => {
            regs.gpr.x0 = PSCI_VERSION_VALUE;
        }
        PSCI_CPU_ON => {
            let target = (regs.gpr.x1 & 0xff) as usize;
            let entry = regs.gpr.x2;
            let context_id = regs.gpr.x3;
            regs.gpr.x0 = cpu_on(kernel, vcpus, target, entry, context_id).to_reg();
        }
        PSCI_MIGRATE_INFO_TYPE => {
            regs.gpr.x0 = PSCI_MIGRATE_NOT_REQUIRED;
        }
        PSCI_FEATURES => {
            regs.gpr.x0 = PsciError::NotSupported.to_reg();
        }
        PSCI_SYSTEM_OFF => {
            log::info!("vCPU {} requested PSCI SYSTEM_OFF", vcpu);
            return PsciOutcome::SystemOff;
        }
        PSCI_SYSTEM_RESET => {
            log::info!("vCPU {} requested PSCI SYSTEM_RESET", vcpu);
        }
        _ => {
            log::error!("unhandled PSCI function 0x{:x} from vCPU {}", func, vcpu);
            return PsciOutcome::Unhandled;
        }
    }
    PsciOutcome::Resume
}

/// Power on a secondary vCPU at `entry` with `context_id` in x0.
fn cpu_on<K: ArmKernel>(
    kernel: &mut K,
    vcpus: &mut VcpuTable,
    target: usize,
    entry: u64,
    context_id: u64,
) -> PsciError {
    if vcpus.check(target).is_err() {
        log::warn!("PSCI CPU_ON for unknown vCPU {}", target);
        return PsciError::InvalidParameters;
    }
    if vcpus.is_on(target) {
        return PsciError::AlreadyOn;
    }

    log::info!("PSCI CPU_ON: starting vCPU {} at 0x{:x}", target, entry);
    let mut ctx = UserContext::default();
    ctx.pc = entry;
    ctx.spsr = SPSR_EL1H;
    ctx.gpr.x0 = context_id;
    sysreg::reset_vcpu_regs(kernel, target);
    kernel.write_regs(target, &ctx);
    vcpus.set_on(target, true);
    kernel.vcpu_restart(target, entry);
    PsciError::Success
}
