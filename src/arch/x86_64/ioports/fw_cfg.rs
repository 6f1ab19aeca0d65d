//! QEMU firmware configuration interface, traditional I/O port access
//!
//! The guest writes an item selector to the selector port and then reads
//! the item a byte at a time from the data port, usually with `rep insb`.

use crate::error::{Result, VmmError};

pub const FW_CFG_PORT_SEL: u16 = 0x510;
pub const FW_CFG_PORT_DATA: u16 = 0x511;
pub const FW_CFG_PORT_DMA: u16 = 0x514;
pub const FW_CFG_PORT_DMA_END: u16 = 0x51b;

pub const FW_CFG_SIGNATURE: u16 = 0x00;
pub const FW_CFG_ID: u16 = 0x01;
pub const FW_CFG_NB_CPUS: u16 = 0x05;
pub const FW_CFG_BOOT_MENU: u16 = 0x0e;
pub const FW_CFG_FILE_DIR: u16 = 0x19;
pub const FW_CFG_E820: u16 = 0x20;

const SIGNATURE: &[u8] = b"QEMU";
/// Traditional interface only, no DMA
const ID_TRADITIONAL: [u8; 4] = 1u32.to_le_bytes();
const BOOT_MENU_OFF: [u8; 2] = [0, 0];

#[derive(Debug, Clone)]
pub struct FwCfg {
    selector: u16,
    offset: usize,
    nb_cpus: [u8; 2],
    file_dir: Option<&'static [u8]>,
    e820: Option<&'static [u8]>,
}

impl FwCfg {
    pub fn new(nb_cpus: u16) -> Self {
        Self {
            selector: FW_CFG_SIGNATURE,
            offset: 0,
            nb_cpus: nb_cpus.to_le_bytes(),
            file_dir: None,
            e820: None,
        }
    }

    /// Expose a prebuilt `FW_CFG_FILE_DIR` blob.
    pub fn with_file_dir(mut self, blob: &'static [u8]) -> Self {
        self.file_dir = Some(blob);
        self
    }

    /// Expose a prebuilt E820 table.
    pub fn with_e820(mut self, blob: &'static [u8]) -> Self {
        self.e820 = Some(blob);
        self
    }

    fn item(&self) -> Option<&[u8]> {
        match self.selector {
            FW_CFG_SIGNATURE => Some(SIGNATURE),
            FW_CFG_ID => Some(&ID_TRADITIONAL),
            FW_CFG_NB_CPUS => Some(&self.nb_cpus),
            FW_CFG_BOOT_MENU => Some(&BOOT_MENU_OFF),
            FW_CFG_FILE_DIR => self.file_dir,
            FW_CFG_E820 => self.e820,
            _ => None,
        }
    }

    pub fn select(&mut self, selector: u16) {
        log::debug!("fw_cfg: select 0x{:x}", selector);
        self.selector = selector;
        self.offset = 0;
    }

    /// Next byte of the selected item. Reads past the end return zero.
    pub fn read_byte(&mut self) -> Result<u8> {
        let Some(item) = self.item() else {
            log::error!("fw_cfg: read of unknown item 0x{:x}", self.selector);
            return Err(VmmError::Unsupported("fw_cfg item"));
        };
        let byte = item.get(self.offset).copied().unwrap_or(0);
        self.offset = self.offset.saturating_add(1);
        Ok(byte)
    }

    pub fn read(&mut self, port: u16) -> Result<u8> {
        match port {
            FW_CFG_PORT_DATA => self.read_byte(),
            FW_CFG_PORT_SEL => Err(VmmError::Unsupported("fw_cfg selector is write-only")),
            _ => Err(VmmError::Unsupported("fw_cfg DMA interface")),
        }
    }

    pub fn write(&mut self, port: u16, value: u16) -> Result<()> {
        match port {
            FW_CFG_PORT_SEL => {
                self.select(value);
                Ok(())
            }
            FW_CFG_PORT_DATA => Err(VmmError::Unsupported("fw_cfg data port is read-only")),
            _ => Err(VmmError::Unsupported("fw_cfg DMA interface")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_then_zero() {
        let mut fw = FwCfg::new(1);
        fw.write(FW_CFG_PORT_SEL, FW_CFG_SIGNATURE).unwrap();
        let mut sig = [0u8; 5];
        for b in sig.iter_mut() {
            *b = fw.read(FW_CFG_PORT_DATA).unwrap();
        }
        assert_eq!(&sig, b"QEMU\0");
    }

    #[test]
    fn test_select_resets_offset() {
        let mut fw = FwCfg::new(2);
        fw.select(FW_CFG_NB_CPUS);
        assert_eq!(fw.read_byte(), Ok(2));
        fw.select(FW_CFG_NB_CPUS);
        assert_eq!(fw.read_byte(), Ok(2));
        assert_eq!(fw.read_byte(), Ok(0));
    }

    #[test]
    fn test_port_directions_and_unknown_item() {
        let mut fw = FwCfg::new(1);
        assert!(fw.read(FW_CFG_PORT_SEL).is_err());
        assert!(fw.write(FW_CFG_PORT_DATA, 0).is_err());
        assert!(fw.read(FW_CFG_PORT_DMA).is_err());
        fw.select(FW_CFG_FILE_DIR);
        assert!(fw.read_byte().is_err());
        let mut fw = fw.with_file_dir(&[0, 0, 0, 0]);
        assert_eq!(fw.read_byte(), Ok(0));
    }
}
