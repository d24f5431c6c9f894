// src/device/transport.rs - Byte link between the driver and a controller
use async_trait::async_trait;
use std::io;

/// Counters kept by every link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub lines_sent: u64,
    pub lines_received: u64,
}

/// A line-oriented duplex link to a GRBL controller.
///
/// `read_line` must be cancel safe: the driver wraps it in a timeout, and a
/// partially received line has to survive the cancellation.
#[async_trait]
pub trait Transport: Send {
    /// Send one command; the newline is appended by the transport.
    async fn write_line(&mut self, line: &str) -> io::Result<()>;

    /// Send a single realtime byte (`?`, soft reset).
    async fn write_realtime(&mut self, byte: u8) -> io::Result<()>;

    /// Next line without its terminator. `Ok(None)` means the link closed.
    async fn read_line(&mut self) -> io::Result<Option<String>>;

    /// Drop anything buffered but not yet read.
    fn discard_input(&mut self) -> io::Result<()>;

    fn stats(&self) -> LinkStats {
        LinkStats::default()
    }
}

/// Opens links; the driver reconnects through this.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, port: &str, baud: u32) -> io::Result<Box<dyn Transport>>;
}

/// Splits a byte stream into lines, keeping partial input across reads.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub(crate) fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete line (`\n` terminated, `\r` stripped).
    pub(crate) fn next_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    pub(crate) fn clear(&mut self) {
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_buffer_keeps_partial_lines() {
        let mut lb = LineBuffer::default();
        lb.push(b"ok\r\n<Idle|WP");
        assert_eq!(lb.next_line().as_deref(), Some("ok"));
        assert_eq!(lb.next_line(), None);
        lb.push(b"os:0,0,0>\n");
        assert_eq!(lb.next_line().as_deref(), Some("<Idle|WPos:0,0,0>"));
        lb.push(b"junk");
        lb.clear();
        assert_eq!(lb.next_line(), None);
    }
}
