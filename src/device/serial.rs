// src/device/serial.rs - Serial port link to the controller
use async_trait::async_trait;
use serial2_tokio::SerialPort;
use std::io;
use std::path::PathBuf;

use super::transport::{Connector, LineBuffer, LinkStats, Transport};

/// Serial link with buffered line reads.
pub struct SerialTransport {
    port: SerialPort,
    port_name: String,
    lines: LineBuffer,
    stats: LinkStats,
}

impl SerialTransport {
    pub fn open(port_name: &str, baud_rate: u32) -> io::Result<Self> {
        let port = SerialPort::open(port_name, baud_rate)?;
        tracing::info!("Opened serial port {} at {} baud", port_name, baud_rate);
        Ok(Self {
            port,
            port_name: port_name.to_string(),
            lines: LineBuffer::default(),
            stats: LinkStats::default(),
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn available_ports() -> io::Result<Vec<PathBuf>> {
        SerialPort::available_ports()
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn write_line(&mut self, line: &str) -> io::Result<()> {
        let data = format!("{}\n", line);
        self.port.write_all(data.as_bytes()).await?;
        self.stats.lines_sent += 1;
        self.stats.bytes_sent += data.len() as u64;
        Ok(())
    }

    async fn write_realtime(&mut self, byte: u8) -> io::Result<()> {
        self.port.write_all(&[byte]).await?;
        self.stats.bytes_sent += 1;
        Ok(())
    }

    async fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut chunk = [0u8; 256];
        loop {
            if let Some(line) = self.lines.next_line() {
                self.stats.lines_received += 1;
                return Ok(Some(line));
            }
            let n = self.port.read(&mut chunk).await?;
            if n == 0 {
                tracing::info!("Serial connection closed by remote");
                return Ok(None);
            }
            tracing::trace!("Read {} bytes from serial", n);
            self.stats.bytes_received += n as u64;
            self.lines.push(&chunk[..n]);
        }
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.lines.clear();
        self.port.discard_input_buffer()
    }

    fn stats(&self) -> LinkStats {
        self.stats
    }
}

/// Opens real serial ports.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialConnector;

#[async_trait]
impl Connector for SerialConnector {
    async fn open(&self, port: &str, baud: u32) -> io::Result<Box<dyn Transport>> {
        let link = SerialTransport::open(port, baud)?;
        Ok(Box::new(link))
    }
}
