//! Line-buffered guest console output
//!
//! Guests write their console a byte at a time. Bytes are collected until
//! a newline (or a full buffer) and then logged under the `guest` target.

pub const LINE_CAPACITY: usize = 128;

#[derive(Debug, Clone)]
pub struct LineBuffer {
    name: &'static str,
    line: [u8; LINE_CAPACITY],
    len: usize,
}

impl LineBuffer {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            line: [0; LINE_CAPACITY],
            len: 0,
        }
    }

    pub fn put(&mut self, c: u8) {
        match c {
            b'\r' => {}
            b'\n' => self.emit(),
            _ => {
                self.line[self.len] = c;
                self.len += 1;
                if self.len == LINE_CAPACITY {
                    self.emit();
                }
            }
        }
    }

    pub fn write(&mut self, bytes: &[u8]) {
        for &c in bytes {
            self.put(c);
        }
    }

    /// Log the buffered partial line, if any.
    pub fn flush(&mut self) {
        if self.len > 0 {
            self.emit();
        }
    }

    fn emit(&mut self) {
        let line = &self.line[..self.len];
        match core::str::from_utf8(line) {
            Ok(s) => log::info!(target: "guest", "{}: {}", self.name, s),
            Err(_) => log::info!(target: "guest", "{}: {:02x?}", self.name, line),
        }
        self.len = 0;
    }

    pub fn pending(&self) -> &[u8] {
        &self.line[..self.len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flush_on_newline_and_full() {
        let mut out = LineBuffer::new("test");
        out.write(b"ab\r\ncd");
        assert_eq!(out.pending(), b"cd");

        let mut out = LineBuffer::new("test");
        out.write(&[b'x'; LINE_CAPACITY + 3]);
        assert_eq!(out.pending(), b"xxx");
    }
}
