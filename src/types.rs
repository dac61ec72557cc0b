use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::FsrError;
use crate::protocol::CHANNEL_COUNT;

/// A serial device whose name matched the controller naming table.
///
/// Produced by [`crate::discovery::PortDiscovery`] and consumed by the
/// connection task.  Higher `confidence` sorts first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortCandidate {
    /// OS device name (`/dev/ttyACM0`, `COM3`, `/dev/cu.usbmodem1101`).
    pub name: String,
    /// Strength of the naming match in `0.0..=1.0`.
    pub confidence: f32,
}

/// Lifecycle of the serial link.
///
/// ```text
///  Disconnected ──► Connecting(n) ──► Connected
///       ▲               │                 │ fault / liveness failure
///       │ retries       │                 ▼
///       └── exhausted ──┘            Reconnecting ──► Connecting(1)
/// ```
///
/// Exactly one value is authoritative at any time; it is owned by the
/// connection task and mirrored to consumers through
/// [`FsrEvent::ConnectionStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No link open.  Passive re-discovery may still be running.
    #[default]
    Disconnected,
    /// Trying to open a device.  `attempt` counts from 1.
    Connecting { attempt: u32 },
    /// Link open and the line reader is running.
    Connected,
    /// Link torn down after a fault; a fresh connect cycle follows.
    Reconnecting,
}

impl ConnectionState {
    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(&self, next: &ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (Disconnected, Connecting { attempt }) => *attempt == 1,
            (Connecting { attempt: a }, Connecting { attempt: b }) => *b == a + 1,
            (Connecting { .. }, Connected) => true,
            (Connecting { .. }, Disconnected) => true,
            (Connected, Reconnecting) => true,
            (Connected, Disconnected) => true,
            (Reconnecting, Connecting { attempt }) => *attempt == 1,
            (Reconnecting, Disconnected) => true,
            _ => false,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting { attempt } => write!(f, "connecting (attempt {attempt})"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// One decoded data line: six raw ADC readings in wire order.
///
/// `plausible[i]` is `false` when `samples[i]` looks like a floating input;
/// the sample is kept for inspection but the channel is not updated.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub samples: [f64; CHANNEL_COUNT],
    pub plausible: [bool; CHANNEL_COUNT],
    /// Monotonic time the line was completed.
    pub captured_at: Instant,
}

/// Processed state of a single force sensor.
///
/// | Field | Range | Meaning |
/// |---|---|---|
/// | `raw` | `0..=1023` | last plausible ADC reading |
/// | `normalized` | `0..=1` | raw mapped through the calibration range |
/// | `smoothed` | `0..=1` | exponential low-pass of `normalized` |
/// | `shaped` | `0..=max_multiplier` | after response curve and amplification |
/// | `hold_time` | `≥ 0` | integrated `shaped · dt` while active, decays while idle |
/// | `current_hold` | `≥ 0` s | duration of the ongoing press, 0 when idle |
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelState {
    pub channel: usize,
    pub raw: f64,
    pub normalized: f64,
    pub smoothed: f64,
    pub shaped: f64,
    pub active: bool,
    pub hold_time: f64,
    pub current_hold: f64,
    /// `None` until the first plausible sample arrives.
    pub last_update: Option<Instant>,
}

impl ChannelState {
    pub fn new(channel: usize) -> Self {
        Self {
            channel,
            raw: 0.0,
            normalized: 0.0,
            smoothed: 0.0,
            shaped: 0.0,
            active: false,
            hold_time: 0.0,
            current_hold: 0.0,
            last_update: None,
        }
    }

    /// Continuous intensity consumers should drive visuals and audio with.
    pub fn intensity(&self) -> f64 {
        self.shaped
    }
}

/// Committed state of all channels, shared between the snapshot and events.
pub type Snapshot = Arc<[ChannelState; CHANNEL_COUNT]>;

/// Build the all-idle snapshot used before the first frame.
pub fn initial_snapshot() -> Snapshot {
    Arc::new(std::array::from_fn(ChannelState::new))
}

/// Everything the pipeline publishes to subscribers.
#[derive(Debug, Clone)]
pub enum FsrEvent {
    /// A channel's shaped intensity changed.
    ValueChanged { channel: usize, value: f64 },
    /// A channel crossed a hysteresis threshold.  Emitted on edges only.
    ActivationChanged { channel: usize, active: bool },
    /// One frame was fully processed.  Always the last event of its frame.
    AllUpdated(Snapshot),
    /// The link changed state.  `device` is set while connected.
    ConnectionStatus {
        state: ConnectionState,
        device: Option<String>,
    },
    /// A recoverable failure worth surfacing (open failures, stale data, faults).
    Error(FsrError),
    /// A press has lasted longer than the channel's configured trigger.
    HoldTriggered { channel: usize, current_hold: f64 },
}

impl FsrEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ValueChanged { .. } => EventKind::ValueChanged,
            Self::ActivationChanged { .. } => EventKind::ActivationChanged,
            Self::AllUpdated(_) => EventKind::AllUpdated,
            Self::ConnectionStatus { .. } => EventKind::ConnectionStatus,
            Self::Error(_) => EventKind::Error,
            Self::HoldTriggered { .. } => EventKind::HoldTriggered,
        }
    }
}

/// Discriminant of [`FsrEvent`], used to filter subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    ValueChanged,
    ActivationChanged,
    AllUpdated,
    ConnectionStatus,
    Error,
    HoldTriggered,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::ValueChanged,
        EventKind::ActivationChanged,
        EventKind::AllUpdated,
        EventKind::ConnectionStatus,
        EventKind::Error,
        EventKind::HoldTriggered,
    ];
}
