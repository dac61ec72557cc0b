//! Line assembly and frame decoding for the controller's text protocol.
//!
//! Serial reads return arbitrary byte chunks.  [`LineAccumulator`] stitches
//! them back into complete lines, and [`FrameDecoder`] turns each line into a
//! [`RawFrame`] or a [`DecodeError`].  Neither type touches the transport.

use std::time::Instant;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::protocol::{
    CHANNEL_COUNT, DELIMITER, DIAGNOSTIC_MARKERS, LINE_TERMINATOR, PLAUSIBLE_RAW_MAX,
    PLAUSIBLE_RAW_MIN,
};
use crate::types::RawFrame;

/// Longest line kept while waiting for a terminator.  A healthy data line is
/// under 30 bytes; anything this long is noise from a wrong baud rate.
pub const MAX_LINE_LEN: usize = 512;

// ── Line accumulator ──────────────────────────────────────────────────────────

/// Reassembles newline-terminated lines from a stream of byte chunks.
///
/// ```
/// # use fsr_rs::parse::LineAccumulator;
/// let mut acc = LineAccumulator::new();
/// assert!(acc.push(b"512,0,10").is_empty());      // incomplete
/// let lines = acc.push(b"23,4,5,6\r\n7");         // terminator closes the line
/// assert_eq!(lines, vec!["512,0,1023,4,5,6".to_string()]);
/// assert_eq!(acc.pending(), 1);
/// ```
///
/// Use one accumulator per link session so a half line from an old session
/// never merges with the first bytes of the next.
pub struct LineAccumulator {
    buffer: Vec<u8>,
    /// Set after an overflow; bytes are dropped until the next terminator.
    discarding: bool,
}

impl LineAccumulator {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(64),
            discarding: false,
        }
    }

    /// Append a chunk and return every line it completed, in arrival order.
    ///
    /// A trailing `\r` is stripped.  Invalid UTF-8 is replaced lossily and
    /// left for the decoder to reject.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &b in bytes {
            if b == LINE_TERMINATOR {
                if self.discarding {
                    self.discarding = false;
                } else {
                    if self.buffer.last() == Some(&b'\r') {
                        self.buffer.pop();
                    }
                    lines.push(String::from_utf8_lossy(&self.buffer).into_owned());
                }
                self.buffer.clear();
                continue;
            }
            if self.discarding {
                continue;
            }
            if self.buffer.len() >= MAX_LINE_LEN {
                debug!("line exceeded {MAX_LINE_LEN} bytes without terminator; discarding");
                self.buffer.clear();
                self.discarding = true;
                continue;
            }
            self.buffer.push(b);
        }
        lines
    }

    /// Bytes buffered for the current incomplete line.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.discarding = false;
    }
}

impl Default for LineAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

// ── Frame decoder ─────────────────────────────────────────────────────────────

/// Tunables for [`FrameDecoder`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Raw values `<=` this are flagged as a floating input.  Default: `10`.
    pub plausible_min: f64,
    /// Raw values `>=` this are flagged as a floating input.  Default: `1000`.
    pub plausible_max: f64,
    /// A line containing any of these substrings is diagnostic text.
    pub diagnostic_markers: Vec<String>,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            plausible_min: PLAUSIBLE_RAW_MIN,
            plausible_max: PLAUSIBLE_RAW_MAX,
            diagnostic_markers: DIAGNOSTIC_MARKERS.iter().map(|m| m.to_string()).collect(),
        }
    }
}

/// Stateless line-to-frame decoder.
///
/// Rules, applied in order:
///
/// 1. Blank lines are [`DecodeError::Empty`].
/// 2. Lines containing a diagnostic marker are [`DecodeError::Diagnostic`].
/// 3. The line must split into exactly [`CHANNEL_COUNT`] fields.
/// 4. Every field must parse as a finite `f64`; the first failure rejects
///    the whole line.
/// 5. Each sample is flagged plausible when `plausible_min < raw < plausible_max`.
#[derive(Debug, Clone, Default)]
pub struct FrameDecoder {
    config: DecoderConfig,
}

impl FrameDecoder {
    pub fn new(config: DecoderConfig) -> Self {
        Self { config }
    }

    /// Decode `line`, stamping the frame with the current monotonic time.
    pub fn decode(&self, line: &str) -> Result<RawFrame, DecodeError> {
        self.decode_at(line, Instant::now())
    }

    /// Decode `line`, stamping the frame with `captured_at`.
    pub fn decode_at(&self, line: &str, captured_at: Instant) -> Result<RawFrame, DecodeError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(DecodeError::Empty);
        }
        if self
            .config
            .diagnostic_markers
            .iter()
            .any(|m| line.contains(m.as_str()))
        {
            return Err(DecodeError::Diagnostic);
        }

        let fields: Vec<&str> = line.split(DELIMITER).collect();
        if fields.len() < CHANNEL_COUNT {
            return Err(DecodeError::InsufficientFields {
                expected: CHANNEL_COUNT,
                found: fields.len(),
            });
        }
        if fields.len() > CHANNEL_COUNT {
            return Err(DecodeError::ExcessFields {
                expected: CHANNEL_COUNT,
                found: fields.len(),
            });
        }

        let mut samples = [0.0; CHANNEL_COUNT];
        let mut plausible = [false; CHANNEL_COUNT];
        for (i, field) in fields.iter().enumerate() {
            let value = field
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or(DecodeError::MalformedField(i))?;
            samples[i] = value;
            plausible[i] = self.is_plausible(value);
        }

        Ok(RawFrame {
            samples,
            plausible,
            captured_at,
        })
    }

    pub fn is_plausible(&self, raw: f64) -> bool {
        raw > self.config.plausible_min && raw < self.config.plausible_max
    }
}

/// Decode a line with the default [`DecoderConfig`].
pub fn decode(line: &str) -> Result<RawFrame, DecodeError> {
    FrameDecoder::default().decode(line)
}
