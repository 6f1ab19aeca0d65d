//! Legacy 16550 serial ports
//!
//! Enough of the register file for firmware and early kernel consoles:
//! the transmitter is always empty, nothing is ever received and output
//! is logged a line at a time.

use crate::error::{Result, VmmError};
use crate::util::LineBuffer;

pub const COM1_BASE: u16 = 0x3f8;
pub const COM2_BASE: u16 = 0x2f8;
pub const COM_PORT_COUNT: u16 = 8;

// Register offsets
const UART_THR: u16 = 0;
const UART_IER: u16 = 1;
const UART_IIR_FCR: u16 = 2;
const UART_LCR: u16 = 3;
const UART_MCR: u16 = 4;
const UART_LSR: u16 = 5;
const UART_MSR: u16 = 6;
const UART_SCR: u16 = 7;

/// Transmit holding register empty, transmitter empty
const LSR_THRE: u8 = 1 << 5;
const LSR_TEMT: u8 = 1 << 6;
const LCR_DLAB: u8 = 1 << 7;

#[derive(Debug, Clone)]
pub struct Uart16550 {
    name: &'static str,
    ier: u8,
    scratch: u8,
    out: LineBuffer,
}

impl Uart16550 {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            ier: 0,
            scratch: 0,
            out: LineBuffer::new(name),
        }
    }

    pub fn read(&mut self, offset: u16) -> Result<u8> {
        Ok(match offset {
            UART_THR => 0,
            UART_IER => self.ier,
            UART_IIR_FCR => 0,
            UART_LCR => LCR_DLAB,
            UART_MCR | UART_MSR => 0,
            UART_LSR => LSR_THRE | LSR_TEMT,
            UART_SCR => self.scratch,
            _ => return Err(VmmError::Unsupported("serial port register")),
        })
    }

    pub fn write(&mut self, offset: u16, value: u8) -> Result<()> {
        match offset {
            UART_THR => self.out.put(value),
            UART_IER => self.ier = value & 0x0f,
            UART_IIR_FCR => log::debug!("{}: FCR <- 0x{:x}", self.name, value),
            UART_LCR => log::debug!("{}: LCR <- 0x{:x}", self.name, value),
            UART_MCR | UART_MSR => {}
            UART_SCR => self.scratch = value,
            _ => {
                log::error!("{}: write 0x{:x} to read-only register {}", self.name, value, offset);
                return Err(VmmError::Unsupported("serial port register"));
            }
        }
        Ok(())
    }

    /// Log any buffered partial line.
    pub fn flush(&mut self) {
        self.out.flush();
    }

    pub fn pending_output(&self) -> &[u8] {
        self.out.pending()
    }
}
