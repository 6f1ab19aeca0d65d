/// Virtual GIC Distributor (GICD)
///
/// Register model of the GICv2 and GICv3 distributors. Handles CTLR,
/// TYPER, IIDR, IGROUPR, ISENABLER/ICENABLER, ISPENDR/ICPENDR,
/// ISACTIVER/ICACTIVER, IPRIORITYR, ITARGETSR (v2), ICFGR, SGIR (v2),
/// IROUTER (v3) and the ID registers.
///
/// State for interrupts 0-31 is banked per vCPU. Writes whose effect
/// reaches beyond register storage (enabling, pending, SGIs) are returned
/// to the caller as a [`DistAction`].
use crate::arch::aarch64::decode::Lane;
use crate::platform::MAX_VCPUS;

/// Interrupt IDs modelled (SGIs, PPIs and 224 SPIs)
pub const NUM_IRQS: usize = 256;
const NUM_WORDS: usize = NUM_IRQS / 32;

/// GIC architecture version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GicVersion {
    V2,
    V3,
}

/// GICD register offsets
pub const GICD_CTLR: u64 = 0x000;
pub const GICD_TYPER: u64 = 0x004;
pub const GICD_IIDR: u64 = 0x008;
// IGROUPR: 0x080..0x0FC (1 bit per interrupt)
pub const GICD_IGROUPR_BASE: u64 = 0x080;
pub const GICD_IGROUPR_END: u64 = 0x0FC;
// ISENABLER: 0x100..0x17C
pub const GICD_ISENABLER_BASE: u64 = 0x100;
pub const GICD_ISENABLER_END: u64 = 0x17C;
// ICENABLER: 0x180..0x1FC
pub const GICD_ICENABLER_BASE: u64 = 0x180;
pub const GICD_ICENABLER_END: u64 = 0x1FC;
// ISPENDR: 0x200..0x27C
pub const GICD_ISPENDR_BASE: u64 = 0x200;
pub const GICD_ISPENDR_END: u64 = 0x27C;
// ICPENDR: 0x280..0x2FC
pub const GICD_ICPENDR_BASE: u64 = 0x280;
pub const GICD_ICPENDR_END: u64 = 0x2FC;
// ISACTIVER: 0x300..0x37C
pub const GICD_ISACTIVER_BASE: u64 = 0x300;
pub const GICD_ISACTIVER_END: u64 = 0x37C;
// ICACTIVER: 0x380..0x3FC
pub const GICD_ICACTIVER_BASE: u64 = 0x380;
pub const GICD_ICACTIVER_END: u64 = 0x3FC;
// IPRIORITYR: 0x400..0x7F8 (1 byte per interrupt)
pub const GICD_IPRIORITYR_BASE: u64 = 0x400;
pub const GICD_IPRIORITYR_END: u64 = 0x7F8;
// ITARGETSR: 0x800..0xBF8 (v2, 1 byte per interrupt)
pub const GICD_ITARGETSR_BASE: u64 = 0x800;
pub const GICD_ITARGETSR_END: u64 = 0xBF8;
// ICFGR: 0xC00..0xCFC (2 bits per interrupt)
pub const GICD_ICFGR_BASE: u64 = 0xC00;
pub const GICD_ICFGR_END: u64 = 0xCFC;
pub const GICD_SGIR: u64 = 0xF00;
pub const GICD_CPENDSGIR_BASE: u64 = 0xF10;
pub const GICD_CPENDSGIR_END: u64 = 0xF1C;
pub const GICD_SPENDSGIR_BASE: u64 = 0xF20;
pub const GICD_SPENDSGIR_END: u64 = 0xF2C;
// v2 ID registers
pub const GICD_PERIPH_ID_BASE: u64 = 0xFC0;
pub const GICD_PERIPH_ID_END: u64 = 0xFEC;
pub const GICD_COMPONENT_ID_BASE: u64 = 0xFF0;
pub const GICD_COMPONENT_ID_END: u64 = 0xFFC;
// IROUTER: 0x6100..0x7FD8 (v3, 64-bit per SPI)
pub const GICD_IROUTER_BASE: u64 = 0x6100;
pub const GICD_IROUTER_END: u64 = 0x7FD8;
// v3 ID registers
pub const GICD_PIDR_BASE: u64 = 0xFFD0;
pub const GICD_PIDR_END: u64 = 0xFFEC;
pub const GICD_CIDR_BASE: u64 = 0xFFF0;
pub const GICD_CIDR_END: u64 = 0xFFFC;

/// GICv2 CTLR enable
pub const GICD_CTLR_ENABLE: u32 = 1 << 0;
/// GICv3 CTLR bits (single security state view)
pub const GICD_CTLR_ENABLE_G1: u32 = 1 << 0;
pub const GICD_CTLR_ENABLE_G1A: u32 = 1 << 1;
pub const GICD_CTLR_ARE: u32 = 1 << 4;

const GICD_V2_TYPER: u32 = 0xfce7;
const GICD_V2_IIDR: u32 = 0x0200_043b;
const GICD_V3_TYPER: u32 = 0x7B_04B0;
const GICD_V3_IIDR: u32 = 0x0001_043B;

const V2_PERIPH_ID: [u32; 12] = [0, 0, 0, 0, 0x04, 0, 0, 0, 0x90, 0xb4, 0x2b, 0];
const V3_PIDR: [u32; 8] = [0x44, 0, 0, 0, 0x92, 0xB4, 0x3B, 0];
/// CoreLink component ID, shared by distributor and redistributor
pub const GIC_COMPONENT_ID: [u32; 4] = [0x0d, 0xf0, 0x05, 0xb1];

/// Effect of a distributor write beyond register storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistAction {
    /// Nothing further to do
    Done,
    /// Enable each IRQ `first_irq + bit` of `bits`
    Enable { vcpu: usize, first_irq: u32, bits: u32 },
    /// Disable each IRQ `first_irq + bit` of `bits`
    Disable { vcpu: usize, first_irq: u32, bits: u32 },
    /// Make each IRQ `first_irq + bit` of `bits` pending
    SetPending { vcpu: usize, first_irq: u32, bits: u32 },
    /// Deliver SGI `intid` to every vCPU in the `targets` bitmap
    Sgi { intid: u32, targets: u32 },
}

/// One-bit-per-interrupt register family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitReg {
    Group,
    SetEnable,
    ClearEnable,
    SetPending,
    ClearPending,
    SetActive,
    ClearActive,
}

/// A bitmap with the first word banked per vCPU
#[derive(Debug, Clone, Copy)]
struct Bitmap {
    banked: [u32; MAX_VCPUS],
    shared: [u32; NUM_WORDS],
}

impl Bitmap {
    const fn new() -> Self {
        Self {
            banked: [0; MAX_VCPUS],
            shared: [0; NUM_WORDS],
        }
    }

    fn word(&self, vcpu: usize, idx: usize) -> u32 {
        match idx {
            0 => self.banked.get(vcpu).copied().unwrap_or(0),
            _ => self.shared.get(idx).copied().unwrap_or(0),
        }
    }

    fn word_mut(&mut self, vcpu: usize, idx: usize) -> Option<&mut u32> {
        match idx {
            0 => self.banked.get_mut(vcpu),
            _ => self.shared.get_mut(idx),
        }
    }

    fn get(&self, vcpu: usize, irq: u32) -> bool {
        self.word(vcpu, irq as usize / 32) & (1 << (irq % 32)) != 0
    }

    fn set(&mut self, vcpu: usize, irq: u32, on: bool) {
        if let Some(word) = self.word_mut(vcpu, irq as usize / 32) {
            if on {
                *word |= 1 << (irq % 32);
            } else {
                *word &= !(1 << (irq % 32));
            }
        }
    }
}

/// Byte-per-interrupt registers (priority, targets), first 8 words banked
#[derive(Debug, Clone, Copy)]
struct ByteRegs {
    banked: [[u32; 8]; MAX_VCPUS],
    shared: [u32; NUM_IRQS / 4],
}

impl ByteRegs {
    const fn new() -> Self {
        Self {
            banked: [[0; 8]; MAX_VCPUS],
            shared: [0; NUM_IRQS / 4],
        }
    }

    fn word(&self, vcpu: usize, idx: usize) -> Option<u32> {
        if idx < 8 {
            self.banked.get(vcpu).map(|b| b[idx])
        } else {
            self.shared.get(idx).copied()
        }
    }

    fn word_mut(&mut self, vcpu: usize, idx: usize) -> Option<&mut u32> {
        if idx < 8 {
            self.banked.get_mut(vcpu).map(|b| &mut b[idx])
        } else {
            self.shared.get_mut(idx)
        }
    }
}

/// Virtual GICD
pub struct Distributor {
    version: GicVersion,
    num_vcpus: usize,
    ctlr: u32,
    typer: u32,
    iidr: u32,
    group: Bitmap,
    enable: Bitmap,
    pending: Bitmap,
    active: Bitmap,
    priority: ByteRegs,
    targets: ByteRegs,
    /// Interrupt configuration (2 bits per interrupt)
    config: [u32; NUM_IRQS / 16],
    /// SPI routing (64-bit affinity per SPI)
    irouter: [u64; NUM_IRQS - 32],
}

impl Distributor {
    fn blank(version: GicVersion, num_vcpus: usize) -> Self {
        Self {
            version,
            num_vcpus,
            ctlr: 0,
            typer: 0,
            iidr: 0,
            group: Bitmap::new(),
            enable: Bitmap::new(),
            pending: Bitmap::new(),
            active: Bitmap::new(),
            priority: ByteRegs::new(),
            targets: ByteRegs::new(),
            config: [0x5555_5555; NUM_IRQS / 16],
            irouter: [0; NUM_IRQS - 32],
        }
    }

    /// Create a distributor in its reset state
    pub fn new(version: GicVersion, num_vcpus: usize) -> Self {
        let mut dist = Self::blank(version, num_vcpus);
        dist.reset();
        dist
    }

    /// Put every register back to its reset value.
    pub fn reset(&mut self) {
        *self = Self::blank(self.version, self.num_vcpus);
        self.config[0] = 0xaaaa_aaaa;
        // SGIs are always enabled
        self.enable.banked = [0xffff; MAX_VCPUS];
        match self.version {
            GicVersion::V2 => {
                let cpus = (self.num_vcpus.max(1) as u32 - 1) & 0x7;
                self.typer = (GICD_V2_TYPER & !(0x7 << 5)) | (cpus << 5);
                self.iidr = GICD_V2_IIDR;
                self.config[1] = 0x5554_0000;
                for (vcpu, banked) in self.targets.banked.iter_mut().enumerate() {
                    *banked = [0x0101_0101u32 << vcpu; 8];
                }
                self.targets.shared = [0x0101_0101; NUM_IRQS / 4];
            }
            GicVersion::V3 => {
                self.typer = GICD_V3_TYPER;
                self.iidr = GICD_V3_IIDR;
            }
        }
    }

    pub fn version(&self) -> GicVersion {
        self.version
    }

    /// Whether the guest has switched the distributor on
    pub fn enabled(&self) -> bool {
        match self.version {
            GicVersion::V2 => self.ctlr & GICD_CTLR_ENABLE != 0,
            GicVersion::V3 => self.ctlr & GICD_CTLR_ENABLE_G1A != 0,
        }
    }

    pub fn is_enabled(&self, vcpu: usize, irq: u32) -> bool {
        self.enable.get(vcpu, irq)
    }

    pub fn set_enabled(&mut self, vcpu: usize, irq: u32, on: bool) {
        self.enable.set(vcpu, irq, on);
    }

    pub fn is_pending(&self, vcpu: usize, irq: u32) -> bool {
        self.pending.get(vcpu, irq)
    }

    pub fn set_pending(&mut self, vcpu: usize, irq: u32, on: bool) {
        self.pending.set(vcpu, irq, on);
    }

    pub fn is_active(&self, vcpu: usize, irq: u32) -> bool {
        self.active.get(vcpu, irq)
    }

    /// Priority byte of `irq` as seen by `vcpu`.
    pub fn priority(&self, vcpu: usize, irq: u32) -> u8 {
        let word = self.priority.word(vcpu, irq as usize / 4).unwrap_or(0);
        (word >> ((irq % 4) * 8)) as u8
    }

    /// Read a bit-per-interrupt register word.
    pub fn bit_read(&self, reg: BitReg, vcpu: usize, word: usize) -> u32 {
        let map = match reg {
            BitReg::Group => &self.group,
            BitReg::SetEnable | BitReg::ClearEnable => &self.enable,
            BitReg::SetPending | BitReg::ClearPending => &self.pending,
            BitReg::SetActive | BitReg::ClearActive => &self.active,
        };
        map.word(vcpu, word)
    }

    /// Write a bit-per-interrupt register word.
    pub fn bit_write(&mut self, reg: BitReg, vcpu: usize, word: usize, data: u64, mask: u64) -> DistAction {
        let bits = (data & mask) as u32;
        let first_irq = (word * 32) as u32;
        match reg {
            BitReg::Group => {
                let lane = Lane { shift: 0, mask };
                if let Some(w) = self.group.word_mut(vcpu, word) {
                    *w = lane.merge(*w, data);
                }
                DistAction::Done
            }
            BitReg::SetEnable => DistAction::Enable { vcpu, first_irq, bits },
            BitReg::ClearEnable => DistAction::Disable { vcpu, first_irq, bits },
            BitReg::SetPending => DistAction::SetPending { vcpu, first_irq, bits },
            BitReg::ClearPending => {
                if let Some(w) = self.pending.word_mut(vcpu, word) {
                    *w &= !bits;
                }
                DistAction::Done
            }
            BitReg::SetActive => {
                if let Some(w) = self.active.word_mut(vcpu, word) {
                    *w |= bits;
                }
                DistAction::Done
            }
            BitReg::ClearActive => {
                if let Some(w) = self.active.word_mut(vcpu, word) {
                    *w &= !bits;
                }
                DistAction::Done
            }
        }
    }

    pub fn priority_read(&self, vcpu: usize, word: usize) -> u32 {
        self.priority.word(vcpu, word).unwrap_or(0)
    }

    pub fn priority_write(&mut self, vcpu: usize, word: usize, data: u64, mask: u64) {
        if let Some(w) = self.priority.word_mut(vcpu, word) {
            *w = Lane { shift: 0, mask }.merge(*w, data);
        }
    }

    pub fn config_read(&self, word: usize) -> u32 {
        self.config.get(word).copied().unwrap_or(0)
    }

    pub fn config_write(&mut self, word: usize, data: u64, mask: u64) {
        // SGI configuration is fixed
        if word == 0 {
            return;
        }
        if let Some(w) = self.config.get_mut(word) {
            *w = Lane { shift: 0, mask }.merge(*w, data);
        }
    }

    fn bit_reg_at(offset: u64) -> Option<(BitReg, u64)> {
        match offset {
            GICD_IGROUPR_BASE..=GICD_IGROUPR_END => Some((BitReg::Group, GICD_IGROUPR_BASE)),
            GICD_ISENABLER_BASE..=GICD_ISENABLER_END => Some((BitReg::SetEnable, GICD_ISENABLER_BASE)),
            GICD_ICENABLER_BASE..=GICD_ICENABLER_END => Some((BitReg::ClearEnable, GICD_ICENABLER_BASE)),
            GICD_ISPENDR_BASE..=GICD_ISPENDR_END => Some((BitReg::SetPending, GICD_ISPENDR_BASE)),
            GICD_ICPENDR_BASE..=GICD_ICPENDR_END => Some((BitReg::ClearPending, GICD_ICPENDR_BASE)),
            GICD_ISACTIVER_BASE..=GICD_ISACTIVER_END => Some((BitReg::SetActive, GICD_ISACTIVER_BASE)),
            GICD_ICACTIVER_BASE..=GICD_ICACTIVER_END => Some((BitReg::ClearActive, GICD_ICACTIVER_BASE)),
            _ => None,
        }
    }

    /// Read the 32-bit register containing `offset` on behalf of `vcpu`.
    ///
    /// Returns `None` for offsets that are not distributor registers.
    pub fn read(&self, vcpu: usize, offset: u64) -> Option<u32> {
        let offset = offset & !0x3;
        if let Some((reg, base)) = Self::bit_reg_at(offset) {
            return Some(self.bit_read(reg, vcpu, ((offset - base) / 4) as usize));
        }
        let v2 = self.version == GicVersion::V2;
        let value = match offset {
            GICD_CTLR => self.ctlr,
            GICD_TYPER => self.typer,
            GICD_IIDR => self.iidr,
            GICD_IPRIORITYR_BASE..=GICD_IPRIORITYR_END => {
                self.priority_read(vcpu, ((offset - GICD_IPRIORITYR_BASE) / 4) as usize)
            }
            GICD_ITARGETSR_BASE..=GICD_ITARGETSR_END if v2 => {
                let idx = ((offset - GICD_ITARGETSR_BASE) / 4) as usize;
                self.targets.word(vcpu, idx).unwrap_or(0)
            }
            GICD_ICFGR_BASE..=GICD_ICFGR_END => {
                self.config_read(((offset - GICD_ICFGR_BASE) / 4) as usize)
            }
            // SGIR is write-only, pending SGI state is not tracked per source
            GICD_SGIR if v2 => 0,
            GICD_CPENDSGIR_BASE..=GICD_CPENDSGIR_END if v2 => 0,
            GICD_SPENDSGIR_BASE..=GICD_SPENDSGIR_END if v2 => 0,
            GICD_PERIPH_ID_BASE..=GICD_PERIPH_ID_END if v2 => {
                V2_PERIPH_ID[((offset - GICD_PERIPH_ID_BASE) / 4) as usize]
            }
            GICD_COMPONENT_ID_BASE..=GICD_COMPONENT_ID_END => {
                GIC_COMPONENT_ID[((offset - GICD_COMPONENT_ID_BASE) / 4) as usize]
            }
            GICD_IROUTER_BASE..=GICD_IROUTER_END if !v2 => {
                let irouter = self.irouter_read(offset & !0x7)?;
                if offset & 0x4 != 0 {
                    (irouter >> 32) as u32
                } else {
                    irouter as u32
                }
            }
            GICD_PIDR_BASE..=GICD_PIDR_END if !v2 => V3_PIDR[((offset - GICD_PIDR_BASE) / 4) as usize],
            GICD_CIDR_BASE..=GICD_CIDR_END if !v2 => {
                GIC_COMPONENT_ID[((offset - GICD_CIDR_BASE) / 4) as usize]
            }
            _ => return None,
        };
        Some(value)
    }

    /// Write the 32-bit register containing `offset` on behalf of `vcpu`.
    ///
    /// `data` is already shifted into the byte lane selected by `mask`.
    /// Returns `None` for offsets that are not distributor registers.
    pub fn write(&mut self, vcpu: usize, offset: u64, data: u64, mask: u64) -> Option<DistAction> {
        let offset = offset & !0x3;
        if let Some((reg, base)) = Self::bit_reg_at(offset) {
            return Some(self.bit_write(reg, vcpu, ((offset - base) / 4) as usize, data, mask));
        }
        let v2 = self.version == GicVersion::V2;
        match offset {
            GICD_CTLR => {
                let ctlr = Lane { shift: 0, mask }.merge(self.ctlr, data);
                self.ctlr = match self.version {
                    GicVersion::V2 => ctlr & GICD_CTLR_ENABLE,
                    GicVersion::V3 => {
                        if ctlr & (GICD_CTLR_ENABLE_G1 | GICD_CTLR_ENABLE_G1A) != 0 {
                            GICD_CTLR_ENABLE_G1A | GICD_CTLR_ARE
                        } else {
                            GICD_CTLR_ARE
                        }
                    }
                };
                log::debug!("vGIC distributor {}", if self.enabled() { "enabled" } else { "disabled" });
            }
            // Read-only
            GICD_TYPER | GICD_IIDR => {}
            GICD_IPRIORITYR_BASE..=GICD_IPRIORITYR_END => {
                let idx = ((offset - GICD_IPRIORITYR_BASE) / 4) as usize;
                self.priority_write(vcpu, idx, data, mask);
            }
            GICD_ITARGETSR_BASE..=GICD_ITARGETSR_END if v2 => {
                let idx = ((offset - GICD_ITARGETSR_BASE) / 4) as usize;
                // SGI/PPI targets are read-only
                if idx >= 8 {
                    if let Some(w) = self.targets.word_mut(vcpu, idx) {
                        *w = Lane { shift: 0, mask }.merge(*w, data);
                    }
                }
            }
            GICD_ICFGR_BASE..=GICD_ICFGR_END => {
                self.config_write(((offset - GICD_ICFGR_BASE) / 4) as usize, data, mask);
            }
            GICD_SGIR if v2 => {
                let sgir = (data & mask) as u32;
                return Some(DistAction::Sgi {
                    intid: sgir & 0xf,
                    targets: self.sgir_targets(vcpu, sgir),
                });
            }
            GICD_CPENDSGIR_BASE..=GICD_CPENDSGIR_END if v2 => {
                log::debug!("vGIC: ignoring write to GICD_CPENDSGIR (0x{:x})", offset);
            }
            GICD_SPENDSGIR_BASE..=GICD_SPENDSGIR_END if v2 => {
                log::debug!("vGIC: ignoring write to GICD_SPENDSGIR (0x{:x})", offset);
            }
            GICD_PERIPH_ID_BASE..=GICD_PERIPH_ID_END if v2 => {}
            GICD_COMPONENT_ID_BASE..=GICD_COMPONENT_ID_END => {}
            GICD_IROUTER_BASE..=GICD_IROUTER_END if !v2 => {
                let aligned = offset & !0x7;
                let old = self.irouter_read(aligned)?;
                let (data, mask) = if offset & 0x4 != 0 {
                    (data << 32, mask << 32)
                } else {
                    (data, mask)
                };
                self.irouter_write(aligned, (old & !mask) | (data & mask));
            }
            GICD_PIDR_BASE..=GICD_PIDR_END if !v2 => {}
            GICD_CIDR_BASE..=GICD_CIDR_END if !v2 => {}
            _ => return None,
        }
        Some(DistAction::Done)
    }

    /// Target vCPU bitmap of a GICD_SGIR write.
    fn sgir_targets(&self, vcpu: usize, sgir: u32) -> u32 {
        let all = (1u32 << self.num_vcpus) - 1;
        match (sgir >> 24) & 0x3 {
            0 => (sgir >> 16) & 0xff & all,
            1 => all & !(1 << vcpu),
            2 => 1 << vcpu,
            _ => 0,
        }
    }

    /// Handle a 64-bit IROUTER read (aligned offset)
    pub fn irouter_read(&self, offset: u64) -> Option<u64> {
        if !(GICD_IROUTER_BASE..=GICD_IROUTER_END).contains(&offset) || offset & 0x7 != 0 {
            return None;
        }
        let idx = ((offset - GICD_IROUTER_BASE) / 8) as usize;
        Some(self.irouter.get(idx).copied().unwrap_or(0))
    }

    /// Handle a 64-bit IROUTER write (aligned offset)
    pub fn irouter_write(&mut self, offset: u64, value: u64) -> bool {
        if !(GICD_IROUTER_BASE..=GICD_IROUTER_END).contains(&offset) || offset & 0x7 != 0 {
            return false;
        }
        let idx = ((offset - GICD_IROUTER_BASE) / 8) as usize;
        if let Some(slot) = self.irouter.get_mut(idx) {
            *slot = value;
        }
        true
    }

    /// Look up the target vCPU for an SPI via IROUTER (v3) or ITARGETSR
    /// (v2). Returns the boot vCPU for SGIs/PPIs.
    pub fn route_spi(&self, intid: u32) -> usize {
        if intid < 32 || intid as usize >= NUM_IRQS {
            return 0;
        }
        match self.version {
            GicVersion::V3 => (self.irouter[intid as usize - 32] & 0xff) as usize,
            GicVersion::V2 => {
                let word = self.targets.word(0, intid as usize / 4).unwrap_or(0);
                let byte = (word >> ((intid % 4) * 8)) & 0xff;
                if byte == 0 {
                    0
                } else {
                    byte.trailing_zeros() as usize
                }
            }
        }
    }
}
