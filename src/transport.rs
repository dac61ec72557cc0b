//! Serial transport seam.
//!
//! The connection task never talks to `serialport` directly.  It goes through
//! [`Connector`] (enumerate and open) and [`Link`] (an open device), so the
//! state machine can be driven by an in-memory device in tests.

use std::io::{self, Read, Write};
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::FsrError;

// ── Link settings ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

impl From<DataBits> for serialport::DataBits {
    fn from(d: DataBits) -> Self {
        match d {
            DataBits::Five => serialport::DataBits::Five,
            DataBits::Six => serialport::DataBits::Six,
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl From<Parity> for serialport::Parity {
    fn from(p: Parity) -> Self {
        match p {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopBits {
    One,
    Two,
}

impl From<StopBits> for serialport::StopBits {
    fn from(s: StopBits) -> Self {
        match s {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        }
    }
}

/// Baud and frame parameters.  Defaults to the controller's 9600 8N1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSettings {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    /// Upper bound on a single blocking read or write.  Default: `1000`.
    pub read_timeout_ms: u64,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            read_timeout_ms: 1000,
        }
    }
}

// ── Traits ────────────────────────────────────────────────────────────────────

/// An open serial device.  Owned by exactly one connection task.
///
/// Dropping the link closes the device.
pub trait Link: Send {
    /// Device name the link was opened with.
    fn name(&self) -> &str;

    /// Bytes waiting in the driver's receive buffer.  Never blocks.
    ///
    /// An error here means the device is gone.
    fn bytes_to_read(&mut self) -> io::Result<u32>;

    /// Read into `buf`.  Callers size `buf` to what
    /// [`bytes_to_read`](Self::bytes_to_read) reported so this returns
    /// without waiting.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;
}

/// Enumerates and opens serial devices.
pub trait Connector: Send + Sync + 'static {
    /// OS device names currently present.
    fn available_ports(&self) -> Result<Vec<String>, FsrError>;

    /// Open `port`.  `timeout` bounds each subsequent read and write.
    fn open(
        &self,
        port: &str,
        settings: &LinkSettings,
        timeout: Duration,
    ) -> Result<Box<dyn Link>, FsrError>;
}

// ── serialport implementation ─────────────────────────────────────────────────

/// [`Connector`] backed by the `serialport` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialConnector;

impl Connector for SerialConnector {
    fn available_ports(&self) -> Result<Vec<String>, FsrError> {
        let ports = serialport::available_ports()
            .map_err(|e| FsrError::DiscoveryFailed(format!("cannot enumerate serial ports: {e}")))?;
        Ok(ports.into_iter().map(|p| p.port_name).collect())
    }

    fn open(
        &self,
        port: &str,
        settings: &LinkSettings,
        timeout: Duration,
    ) -> Result<Box<dyn Link>, FsrError> {
        let inner = serialport::new(port, settings.baud_rate)
            .data_bits(settings.data_bits.into())
            .parity(settings.parity.into())
            .stop_bits(settings.stop_bits.into())
            .flow_control(serialport::FlowControl::None)
            .timeout(timeout)
            .open()
            .map_err(|e| FsrError::OpenFailed {
                port: port.to_string(),
                reason: e.to_string(),
            })?;
        debug!("serialport opened {port} ({} baud)", settings.baud_rate);
        Ok(Box::new(SerialLink {
            name: port.to_string(),
            inner,
        }))
    }
}

struct SerialLink {
    name: String,
    inner: Box<dyn serialport::SerialPort>,
}

impl Link for SerialLink {
    fn name(&self) -> &str {
        &self.name
    }

    fn bytes_to_read(&mut self) -> io::Result<u32> {
        self.inner.bytes_to_read().map_err(io::Error::from)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.inner.write_all(bytes)?;
        self.inner.flush()
    }
}

/// `true` for read errors that only mean "nothing arrived yet".
pub fn is_quiet_read(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_9600_8n1() {
        let s = LinkSettings::default();
        assert_eq!(s.baud_rate, 9600);
        assert_eq!(serialport::DataBits::from(s.data_bits), serialport::DataBits::Eight);
        assert_eq!(serialport::Parity::from(s.parity), serialport::Parity::None);
        assert_eq!(serialport::StopBits::from(s.stop_bits), serialport::StopBits::One);
    }

    #[test]
    fn timeouts_are_quiet_reads() {
        assert!(is_quiet_read(&io::Error::from(io::ErrorKind::TimedOut)));
        assert!(is_quiet_read(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(!is_quiet_read(&io::Error::from(io::ErrorKind::BrokenPipe)));
        assert!(!is_quiet_read(&io::Error::new(
            io::ErrorKind::Other,
            "device reports readiness to read but returned no data"
        )));
    }

    #[test]
    fn settings_deserialize_with_defaults() {
        let s: LinkSettings = serde_json::from_str(r#"{"baud_rate":115200,"parity":"Even"}"#)
            .unwrap();
        assert_eq!(s.baud_rate, 115200);
        assert_eq!(s.parity, Parity::Even);
        assert_eq!(s.read_timeout_ms, 1000);
    }
}
