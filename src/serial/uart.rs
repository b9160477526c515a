use anyhow::{anyhow, Result};
use log::{debug, warn};
use serialport::{ClearBuffer, SerialPort};
use std::io::{self, Read};
use std::time::Duration;
use tokio::time::{sleep, Instant};

use super::{Readiness, SerialSource};

/// How often readiness is re-checked while waiting.
const READINESS_POLL: Duration = Duration::from_millis(10);

pub struct UartSource {
    port: Box<dyn SerialPort>,
    name: String,
}

impl UartSource {
    /// Open the port 8N1 and discard anything buffered before the device was enabled.
    pub async fn open(port_name: &str, baud_rate: u32) -> Result<Self> {
        debug!("Opening serial port {} at {} baud", port_name, baud_rate);

        let mut builder = serialport::new(port_name, baud_rate).timeout(Duration::from_millis(500));
        #[cfg(unix)]
        {
            builder = builder
                .data_bits(serialport::DataBits::Eight)
                .stop_bits(serialport::StopBits::One)
                .parity(serialport::Parity::None);
        }
        let port = builder
            .open()
            .map_err(|e| anyhow!("Failed to open serial port {}: {}", port_name, e))?;

        if let Err(e) = port.clear(ClearBuffer::Input) {
            warn!("Could not purge input buffer on {}: {}", port_name, e);
        }

        Ok(Self {
            port,
            name: port_name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl SerialSource for UartSource {
    async fn wait_readable(&mut self, timeout: Duration) -> Readiness {
        let deadline = Instant::now() + timeout;
        loop {
            match self.port.bytes_to_read() {
                Ok(n) if n > 0 => return Readiness::Readable,
                Ok(_) => {}
                Err(e) => return Readiness::Error(format!("{}: {}", self.name, e)),
            }
            let now = Instant::now();
            if now >= deadline {
                return Readiness::TimedOut;
            }
            sleep(READINESS_POLL.min(deadline - now)).await;
        }
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        Ok(self.port.bytes_to_read()? as usize)
    }

    fn read_available(&mut self, buf: &mut Vec<u8>, limit: usize) -> io::Result<usize> {
        let available = self.bytes_available()?.min(limit);
        if available == 0 {
            return Ok(0);
        }
        let mut chunk = vec![0u8; available];
        let n = self.port.read(&mut chunk)?;
        buf.extend_from_slice(&chunk[..n]);
        Ok(n)
    }
}
