// Serial Transport Implementation
// USB/UART port; readiness is detected by polling the driver's input byte count

use crate::transport::traits::{closed_error, ConnectError, Transport};
use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Sleep between byte-count checks while nothing is waiting
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Blocking read/write timeout handed to the driver
const PORT_TIMEOUT: Duration = Duration::from_millis(100);

/// Serial port transport
pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
    path: String,
    baud_rate: u32,
    closed: Arc<AtomicBool>,
}

impl SerialTransport {
    /// Open `path` at `baud_rate`, 8N1
    pub fn open(path: &str, baud_rate: u32) -> Result<Self, ConnectError> {
        let port = serialport::new(path, baud_rate)
            .timeout(PORT_TIMEOUT)
            .open()
            .map_err(|e| map_open_error(path, e))?;

        debug!(path, baud_rate, "serial port opened");

        Ok(Self {
            port: Some(port),
            path: path.to_string(),
            baud_rate,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn port(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(closed_error());
        }
        self.port.as_mut().ok_or_else(closed_error)
    }
}

fn map_open_error(path: &str, err: serialport::Error) -> ConnectError {
    match err.kind() {
        serialport::ErrorKind::NoDevice => ConnectError::NotFound(format!("{}: {}", path, err)),
        serialport::ErrorKind::Io(io::ErrorKind::NotFound) => {
            ConnectError::NotFound(format!("{}: {}", path, err))
        }
        _ => ConnectError::IoFailure(format!("{}: {}", path, err)),
    }
}

impl Transport for SerialTransport {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let port = self.port()?;
        port.write_all(bytes)?;
        port.flush()?;
        trace!(len = bytes.len(), "serial tx");
        Ok(())
    }

    fn poll_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            let waiting = self.port()?.bytes_to_read()?;
            if waiting > 0 {
                return Ok(true);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            thread::sleep(IDLE_POLL_INTERVAL.min(deadline - now));
        }
    }

    fn read_available(&mut self) -> io::Result<Vec<u8>> {
        let port = self.port()?;
        let waiting = port.bytes_to_read()? as usize;
        if waiting == 0 {
            return Ok(Vec::new());
        }

        let mut buf = vec![0u8; waiting];
        match port.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                trace!(len = n, "serial rx");
                Ok(buf)
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    fn close(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(path = %self.path, "closing serial port");
        }
        self.port = None;
    }

    fn is_open(&self) -> bool {
        self.port.is_some() && !self.closed.load(Ordering::Acquire)
    }

    fn try_clone(&self) -> io::Result<Box<dyn Transport>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(closed_error());
        }
        let port = self.port.as_ref().ok_or_else(closed_error)?.try_clone()?;
        Ok(Box::new(Self {
            port: Some(port),
            path: self.path.clone(),
            baud_rate: self.baud_rate,
            closed: Arc::clone(&self.closed),
        }))
    }
}
