//! Port I/O emulation
//!
//! Legacy devices live at fixed ports, so dispatch is a compiled-in match
//! on the port number rather than a registry. String (`ins`/`outs`)
//! accesses are only emulated for the fw_cfg data port and are driven by
//! the VMM, which owns guest memory.

pub mod cmos;
pub mod com;
pub mod fw_cfg;
pub mod pit;

use cmos::{Cmos, CMOS_DATA_PORT, CMOS_INDEX_PORT};
use com::{Uart16550, COM1_BASE, COM2_BASE, COM_PORT_COUNT};
use fw_cfg::{FwCfg, FW_CFG_PORT_DATA, FW_CFG_PORT_DMA, FW_CFG_PORT_DMA_END, FW_CFG_PORT_SEL};
use pit::{Pit, PIT_CH0_PORT, PIT_CMD_PORT};

use crate::error::{Result, VmmError};

pub const PCI_CONFIG_ADDRESS: u16 = 0xcf8;
pub const PCI_CONFIG_DATA: u16 = 0xcfc;
pub const PCI_CONFIG_DATA_END: u16 = 0xcff;

// I/O instruction exit qualification
const IO_QUAL_SIZE_MASK: u64 = 0x7;
const IO_QUAL_IN: u64 = 1 << 3;
const IO_QUAL_STRING: u64 = 1 << 4;
const IO_QUAL_REP: u64 = 1 << 5;
const IO_QUAL_IMM: u64 = 1 << 6;
const IO_QUAL_PORT_SHIFT: u64 = 16;

/// Decoded I/O instruction exit qualification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoAccess {
    pub port: u16,
    /// Access size in bytes
    pub width: u8,
    /// `in`/`ins` rather than `out`/`outs`
    pub input: bool,
    pub string: bool,
    pub rep: bool,
    /// Port given as an immediate operand
    pub imm: bool,
}

impl IoAccess {
    pub fn from_qualification(qual: u64) -> Option<Self> {
        let width = match qual & IO_QUAL_SIZE_MASK {
            0 => 1,
            1 => 2,
            3 => 4,
            _ => return None,
        };
        Some(Self {
            port: (qual >> IO_QUAL_PORT_SHIFT) as u16,
            width,
            input: qual & IO_QUAL_IN != 0,
            string: qual & IO_QUAL_STRING != 0,
            rep: qual & IO_QUAL_REP != 0,
            imm: qual & IO_QUAL_IMM != 0,
        })
    }

    pub fn mask(&self) -> u32 {
        match self.width {
            1 => 0xff,
            2 => 0xffff,
            _ => 0xffff_ffff,
        }
    }
}

/// Follow-up the VMM performs after a port write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortEffect {
    None,
    /// Arm the periodic timer for the PIT.
    ArmTimer(u64),
}

/// All legacy port devices of one guest
#[derive(Debug, Clone)]
pub struct PortDevices {
    cmos: Cmos,
    com1: Uart16550,
    com2: Uart16550,
    pit: Pit,
    fw_cfg: FwCfg,
    pci_address: u32,
}

fn byte_only(width: u8, what: &'static str) -> Result<()> {
    if width == 1 {
        Ok(())
    } else {
        log::error!("{}: {}-byte access, only byte accesses are emulated", what, width);
        Err(VmmError::Unsupported("wide access to byte port"))
    }
}

impl PortDevices {
    pub fn new(fw_cfg: FwCfg) -> Self {
        Self {
            cmos: Cmos::new(),
            com1: Uart16550::new("COM1"),
            com2: Uart16550::new("COM2"),
            pit: Pit::new(),
            fw_cfg,
            pci_address: 0,
        }
    }

    /// Return every device to its power-on state. fw_cfg items are kept.
    pub fn reset(&mut self) {
        self.com1.flush();
        self.com2.flush();
        self.cmos = Cmos::new();
        self.com1 = Uart16550::new("COM1");
        self.com2 = Uart16550::new("COM2");
        self.pit = Pit::new();
        self.fw_cfg.select(fw_cfg::FW_CFG_SIGNATURE);
        self.pci_address = 0;
    }

    pub fn pit(&self) -> &Pit {
        &self.pit
    }

    pub fn fw_cfg_mut(&mut self) -> &mut FwCfg {
        &mut self.fw_cfg
    }

    pub fn com1(&self) -> &Uart16550 {
        &self.com1
    }

    pub fn read(&mut self, port: u16, width: u8) -> Result<u32> {
        match port {
            CMOS_INDEX_PORT | CMOS_DATA_PORT => {
                byte_only(width, "CMOS")?;
                self.cmos.read(port).map(u32::from)
            }
            p if (COM1_BASE..COM1_BASE + COM_PORT_COUNT).contains(&p) => {
                byte_only(width, "COM1")?;
                self.com1.read(p - COM1_BASE).map(u32::from)
            }
            p if (COM2_BASE..COM2_BASE + COM_PORT_COUNT).contains(&p) => {
                byte_only(width, "COM2")?;
                self.com2.read(p - COM2_BASE).map(u32::from)
            }
            PIT_CH0_PORT..=PIT_CMD_PORT => self.pit.read(port).map(u32::from),
            FW_CFG_PORT_SEL | FW_CFG_PORT_DATA | FW_CFG_PORT_DMA..=FW_CFG_PORT_DMA_END => {
                byte_only(width, "fw_cfg data")?;
                self.fw_cfg.read(port).map(u32::from)
            }
            PCI_CONFIG_ADDRESS => Ok(self.pci_address),
            // No device answers on the PCI bus
            PCI_CONFIG_DATA..=PCI_CONFIG_DATA_END => Ok(u32::MAX),
            _ => Err(VmmError::Unsupported("unemulated I/O port")),
        }
    }

    pub fn write(&mut self, port: u16, width: u8, value: u32) -> Result<PortEffect> {
        match port {
            CMOS_INDEX_PORT | CMOS_DATA_PORT => {
                byte_only(width, "CMOS")?;
                self.cmos.write(port, value as u8)?;
            }
            p if (COM1_BASE..COM1_BASE + COM_PORT_COUNT).contains(&p) => {
                byte_only(width, "COM1")?;
                self.com1.write(p - COM1_BASE, value as u8)?;
            }
            p if (COM2_BASE..COM2_BASE + COM_PORT_COUNT).contains(&p) => {
                byte_only(width, "COM2")?;
                self.com2.write(p - COM2_BASE, value as u8)?;
            }
            PIT_CH0_PORT..=PIT_CMD_PORT => {
                byte_only(width, "PIT")?;
                if let Some(ns) = self.pit.write(port, value as u8)? {
                    return Ok(PortEffect::ArmTimer(ns));
                }
            }
            FW_CFG_PORT_SEL | FW_CFG_PORT_DATA | FW_CFG_PORT_DMA..=FW_CFG_PORT_DMA_END => {
                self.fw_cfg.write(port, value as u16)?;
            }
            PCI_CONFIG_ADDRESS => self.pci_address = value,
            PCI_CONFIG_DATA..=PCI_CONFIG_DATA_END => {}
            _ => return Err(VmmError::Unsupported("unemulated I/O port")),
        }
        Ok(PortEffect::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualification_decode() {
        // in al, dx from 0x71
        let access = IoAccess::from_qualification((0x71 << 16) | IO_QUAL_IN).unwrap();
        assert_eq!(access.port, 0x71);
        assert_eq!(access.width, 1);
        assert!(access.input && !access.string);

        // rep insb from 0x511
        let access = IoAccess::from_qualification((0x511 << 16) | IO_QUAL_IN | IO_QUAL_STRING | IO_QUAL_REP).unwrap();
        assert!(access.string && access.rep);

        // out 0x80, eax (immediate)
        let access = IoAccess::from_qualification((0x80 << 16) | IO_QUAL_IMM | 3).unwrap();
        assert_eq!(access.width, 4);
        assert!(access.imm && !access.input);

        assert_eq!(IoAccess::from_qualification(2), None);
    }

    #[test]
    fn test_pci_bus_is_empty() {
        let mut ports = PortDevices::new(FwCfg::new(1));
        assert_eq!(ports.write(PCI_CONFIG_ADDRESS, 4, 0x8000_0000), Ok(PortEffect::None));
        assert_eq!(ports.read(PCI_CONFIG_DATA, 4), Ok(u32::MAX));
        assert_eq!(ports.read(0xcfe, 2), Ok(u32::MAX));
    }

    #[test]
    fn test_unknown_port_fails() {
        let mut ports = PortDevices::new(FwCfg::new(1));
        assert!(ports.read(0x60, 1).is_err());
        assert!(ports.write(0x80, 1, 0).is_err());
        assert!(ports.write(COM1_BASE, 2, 0).is_err());
    }
}
