//! Wire-format constants, per-OS device naming tables, and line encoders for
//! the force-sensor microcontroller link.
//!
//! The controller prints one ASCII line per sampling tick:
//!
//! ```text
//! <ch0>,<ch1>,<ch2>,<ch3>,<ch4>,<ch5>\n
//! ```
//!
//! Each field is a 10-bit ADC reading (`0..=1023`).  Lines that carry
//! calibration chatter (`"Sensor1 Min:0 Max:1023"`) are not data and are
//! filtered by [`crate::parse::FrameDecoder`].

use crate::error::FsrError;

// ── Frame shape ───────────────────────────────────────────────────────────────

/// Number of force-sensor channels carried in every data line.
pub const CHANNEL_COUNT: usize = 6;

/// Highest raw value a 10-bit ADC can report.
pub const ADC_MAX: f64 = 1023.0;

/// Field separator used on the wire.
pub const DELIMITER: char = ',';

/// Line terminator used on the wire in both directions.
pub const LINE_TERMINATOR: u8 = b'\n';

/// Substrings that mark a line as diagnostic text rather than sensor data.
///
/// The firmware prints per-sensor calibration lines such as
/// `"Sensor3 Min:12 Max:1001"` during start-up.
pub const DIAGNOSTIC_MARKERS: [&str; 3] = ["Sensor", "Min:", "Max:"];

// ── Floating-pin bounds ───────────────────────────────────────────────────────

/// Raw readings at or below this value are treated as a floating input.
pub const PLAUSIBLE_RAW_MIN: f64 = 10.0;

/// Raw readings at or above this value are treated as a floating input.
pub const PLAUSIBLE_RAW_MAX: f64 = 1000.0;

// ── Channel labels ────────────────────────────────────────────────────────────

/// Human-readable labels in channel-index order.
pub const CHANNEL_NAMES: [&str; CHANNEL_COUNT] = ["FSR0", "FSR1", "FSR2", "FSR3", "FSR4", "FSR5"];

// ── Device naming per OS family ───────────────────────────────────────────────

/// A substring that identifies a likely controller device, plus the
/// confidence assigned when it matches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PortPattern {
    pub needle: &'static str,
    pub confidence: f32,
}

const fn pat(needle: &'static str, confidence: f32) -> PortPattern {
    PortPattern { needle, confidence }
}

/// macOS callout devices created by the common USB-serial drivers.
///
/// | Pattern | Driver |
/// |---|---|
/// | `cu.usbmodem` | native USB CDC (Leonardo, Micro, Uno R4) |
/// | `cu.usbserial` | FTDI / CH340 bridges |
/// | `cu.SLAB_USBtoUART` | Silicon Labs CP210x |
pub const MACOS_PATTERNS: [PortPattern; 3] = [
    pat("cu.usbmodem", 1.0),
    pat("cu.usbserial", 0.9),
    pat("cu.SLAB_USBtoUART", 0.8),
];

/// Windows exposes every serial device as `COMn`, so confidence is low.
pub const WINDOWS_PATTERNS: [PortPattern; 1] = [pat("COM", 0.5)];

/// Linux tty nodes for USB-serial bridges and CDC-ACM boards.
pub const LINUX_PATTERNS: [PortPattern; 4] = [
    pat("ttyACM", 1.0),
    pat("ttyUSB", 0.9),
    pat("tty.usbmodem", 0.7),
    pat("tty.usbserial", 0.6),
];

/// Naming table for the OS this binary was compiled for.
pub fn platform_patterns() -> &'static [PortPattern] {
    if cfg!(target_os = "macos") {
        &MACOS_PATTERNS
    } else if cfg!(target_os = "windows") {
        &WINDOWS_PATTERNS
    } else {
        &LINUX_PATTERNS
    }
}

// ── Encoders ──────────────────────────────────────────────────────────────────

/// Encode an outbound control string as a single newline-terminated line.
///
/// Text containing a line break would be split into several commands by the
/// firmware and is rejected.
///
/// ```
/// # use fsr_rs::protocol::encode_command;
/// assert_eq!(encode_command("cal").unwrap(), b"cal\n");
/// assert!(encode_command("a\nb").is_err());
/// ```
pub fn encode_command(cmd: &str) -> Result<Vec<u8>, FsrError> {
    if cmd.contains(['\n', '\r']) {
        return Err(FsrError::CommandSendFailed(format!(
            "command {cmd:?} contains a line break"
        )));
    }
    let mut bytes = Vec::with_capacity(cmd.len() + 1);
    bytes.extend_from_slice(cmd.as_bytes());
    bytes.push(LINE_TERMINATOR);
    Ok(bytes)
}

/// Render raw samples in the controller's line format (without terminator).
///
/// Used by the simulator and by tests to produce device-shaped input.
pub fn encode_frame(samples: &[f64; CHANNEL_COUNT]) -> String {
    samples
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(&DELIMITER.to_string())
}
