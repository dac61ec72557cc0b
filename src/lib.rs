//! # fsr-rs
//!
//! Async Rust library and terminal UI for streaming six force-sensitive
//! resistor (FSR) channels from a microcontroller over a serial link.
//!
//! The controller prints one comma-separated line of six 10-bit ADC readings
//! per tick.  This crate finds the board, keeps the link alive across
//! unplugs, drops malformed lines, and turns each raw reading into a
//! smoothed, shaped, hysteresis-gated channel state with hold-time
//! accounting.
//!
//! ## Pipeline
//!
//! ```text
//! PortDiscovery → ConnectionManager → LineAccumulator → FrameDecoder
//!               → FrameProcessor (6 × ChannelProcessor) → Publisher → consumers
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use fsr_rs::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let handle = FsrClient::new(FsrClientConfig::default()).start()?;
//!     let mut events = handle.subscribe_all();
//!
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             FsrEvent::ActivationChanged { channel, active } => {
//!                 println!("FSR{channel} {}", if active { "pressed" } else { "released" });
//!             }
//!             FsrEvent::ConnectionStatus { state, device } => println!("{state} {device:?}"),
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Using as a library dependency
//!
//! ```toml
//! [dependencies]
//! # Full build (includes the ratatui monitor):
//! fsr-rs = "0.1"
//!
//! # Library only, without ratatui / crossterm:
//! fsr-rs = { version = "0.1", default-features = false }
//! ```
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`prelude`] | One-line glob import of the most commonly needed types |
//! | [`fsr_client`] | Connection task, configuration, and the [`fsr_client::FsrHandle`] consumer API |
//! | [`discovery`] | Device-name ranking and open/close probing |
//! | [`transport`] | [`transport::Connector`] / [`transport::Link`] seam over `serialport` |
//! | [`parse`] | Line reassembly and line-to-frame decoding |
//! | [`channel`] | Smoothing, response curve, amplification, hysteresis, hold-time |
//! | [`publisher`] | Snapshot storage and ordered subscriber dispatch |
//! | [`types`] | Data model and event types |
//! | [`protocol`] | Wire constants, naming tables, and encoders |
//! | [`error`] | Error taxonomy |

pub mod channel;
pub mod discovery;
pub mod error;
pub mod fsr_client;
pub mod parse;
pub mod protocol;
pub mod publisher;
pub mod transport;
pub mod types;

// ── Prelude ───────────────────────────────────────────────────────────────────

/// Convenience re-exports for downstream crates.
pub mod prelude {
    // ── Client ────────────────────────────────────────────────────────────────
    pub use crate::fsr_client::{FsrClient, FsrClientConfig, FsrHandle};

    // ── Configuration ─────────────────────────────────────────────────────────
    pub use crate::channel::{Amplification, ChannelConfig, RawRange, ResponseCurve, Smoothing};
    pub use crate::discovery::PortRule;
    pub use crate::parse::DecoderConfig;
    pub use crate::transport::LinkSettings;

    // ── Events and data types ─────────────────────────────────────────────────
    pub use crate::error::{DecodeError, FsrError};
    pub use crate::publisher::{Subscription, SubscriptionGuard, SubscriptionId};
    pub use crate::types::{
        ChannelState, ConnectionState, EventKind, FsrEvent, PortCandidate, RawFrame, Snapshot,
    };

    // ── Protocol constants ────────────────────────────────────────────────────
    pub use crate::protocol::{ADC_MAX, CHANNEL_COUNT, CHANNEL_NAMES};
}
