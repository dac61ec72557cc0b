//! Error taxonomy for the ingestion pipeline.
//!
//! Errors are `Clone` so a single failure can be delivered to every
//! subscriber through [`crate::types::FsrEvent::Error`].  Payloads are plain
//! strings for the same reason; the underlying `serialport::Error` and
//! `std::io::Error` are not `Clone`.

use thiserror::Error;

/// Why a text line did not produce a [`crate::types::RawFrame`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Blank line or bare terminator.
    #[error("empty line")]
    Empty,

    /// Calibration or status chatter printed by the firmware.
    #[error("diagnostic line, not sensor data")]
    Diagnostic,

    /// Fewer fields than channels.
    #[error("expected {expected} fields, found {found}")]
    InsufficientFields { expected: usize, found: usize },

    /// More fields than channels.
    #[error("expected {expected} fields, found {found}")]
    ExcessFields { expected: usize, found: usize },

    /// Field at this zero-based index is not a finite number.
    #[error("field {0} is not a finite number")]
    MalformedField(usize),
}

/// Unified error type for discovery, connection, decoding and the consumer API.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FsrError {
    /// No port matched the naming table, or none of the matches could be opened.
    #[error("no force-sensor controller found: {0}")]
    DiscoveryFailed(String),

    /// A port was selected but opening it failed (permissions, in use, unplugged).
    #[error("failed to open serial port {port}: {reason}")]
    OpenFailed { port: String, reason: String },

    /// A read returned no bytes within its timeout.  Expected while the link is quiet.
    #[error("read timed out")]
    ReadTimeout,

    /// The transport raised a non-timeout I/O error.  Forces a reconnect.
    #[error("serial read fault on {port}: {reason}")]
    ReadFault { port: String, reason: String },

    /// A line was received but could not be decoded.
    #[error("malformed line: {0}")]
    DecodeMalformed(#[from] DecodeError),

    /// A sample sat outside the plausible range and its channel was not updated.
    #[error("channel {channel} raw value {raw} outside plausible range")]
    ChannelOutOfRange { channel: usize, raw: f64 },

    /// No line arrived within the watchdog window.  The link stays open.
    #[error("no data received for {0} ms")]
    DataStale(u64),

    /// Writing an outbound command failed.  Not retried.
    #[error("failed to send command: {0}")]
    CommandSendFailed(String),

    /// Operation requires an open link.
    #[error("not connected to a device")]
    NotConnected,

    /// Channel index outside `0..CHANNEL_COUNT`.
    #[error("invalid channel {0}")]
    InvalidChannel(usize),

    /// A configuration value failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The connection task has shut down.
    #[error("pipeline closed")]
    Closed,
}

impl FsrError {
    /// `true` for errors that end the current link session.
    pub fn is_transport_fault(&self) -> bool {
        matches!(self, Self::ReadFault { .. })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn decode_error_converts_into_fsr_error() {
        let err: FsrError = DecodeError::MalformedField(3).into();
        assert_eq!(err.to_string(), "malformed line: field 3 is not a finite number");
    }

    #[test]
    fn only_read_fault_is_a_transport_fault() {
        assert!(FsrError::ReadFault {
            port: "/dev/ttyACM0".into(),
            reason: "broken pipe".into()
        }
        .is_transport_fault());
        assert!(!FsrError::ReadTimeout.is_transport_fault());
        assert!(!FsrError::DataStale(1000).is_transport_fault());
    }

    #[test]
    fn open_failed_names_the_port() {
        let err = FsrError::OpenFailed {
            port: "COM4".into(),
            reason: "access denied".into(),
        };
        assert_eq!(err.to_string(), "failed to open serial port COM4: access denied");
    }
}
