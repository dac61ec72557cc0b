//! Per-channel signal processing.
//!
//! Each plausible sample runs through a fixed pipeline:
//!
//! | Stage | Formula | Default |
//! |---|---|---|
//! | normalise | `inverse_lerp(min, max, raw)` | `25..=1023` |
//! | smoothing | `lerp(prev, v, factor)` | factor `0.8` |
//! | response curve | `v ^ exponent` (skipped at 0) | exponent `0.3` |
//! | amplification | `v · lerp(1, max, t³)` above `start` | start `0.2`, max `3.5` |
//! | hysteresis | on above `activation`, off below `deactivation` | `0.1` / `0.05` |
//! | hold-time | `+ shaped · dt` active, `− dt` idle (floored at 0) | |
//! | notify | value-changed when `|shaped − last sent| > change_threshold` | `0.01` |
//!
//! A reading below the plausible window usually means the sensor was let go
//! so far that the divider sits at the rail.  For a channel that is pressed
//! or still holding, such a reading is fed through as a zero so the press
//! can end; an idle channel ignores it.
//!
//! [`FrameProcessor`] owns all six [`ChannelProcessor`]s plus the bounded
//! frame history and is driven only from the connection task.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::FsrError;
use crate::protocol::{ADC_MAX, CHANNEL_COUNT};
use crate::types::{ChannelState, RawFrame, Snapshot};

/// Bounds applied to the response-curve exponent before use.
pub const EXPONENT_RANGE: (f64, f64) = (0.1, 2.0);

/// Raw level an untouched sensor rests at or below.  The default calibration
/// maps it to zero so resting noise never reaches the response curve.
pub const REST_FLOOR: f64 = 25.0;

// ── Math helpers ──────────────────────────────────────────────────────────────

fn clamp01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

fn inverse_lerp(a: f64, b: f64, v: f64) -> f64 {
    if (b - a).abs() < f64::EPSILON {
        0.0
    } else {
        clamp01((v - a) / (b - a))
    }
}

// ── Configuration ─────────────────────────────────────────────────────────────

/// Exponential low-pass filter settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Smoothing {
    pub enabled: bool,
    /// Weight of the new sample in `(0, 1]`.  `1.0` disables filtering.
    pub factor: f64,
}

impl Default for Smoothing {
    fn default() -> Self {
        Self {
            enabled: true,
            factor: 0.8,
        }
    }
}

/// Power-law response curve.  Exponents below 1 lift light touches.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseCurve {
    pub enabled: bool,
    pub exponent: f64,
}

impl Default for ResponseCurve {
    fn default() -> Self {
        Self {
            enabled: true,
            exponent: 0.3,
        }
    }
}

/// Cubic high-pressure boost.
///
/// Below `start_threshold` the value passes through.  Above it the value is
/// multiplied by `lerp(1, max_multiplier, t³)` where `t` is the position of
/// the value between the threshold and 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Amplification {
    pub enabled: bool,
    pub start_threshold: f64,
    pub max_multiplier: f64,
}

impl Default for Amplification {
    fn default() -> Self {
        Self {
            enabled: true,
            start_threshold: 0.2,
            max_multiplier: 3.5,
        }
    }
}

/// Per-sensor raw calibration window, replacing the full ADC range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawRange {
    pub min: f64,
    pub max: f64,
}

/// Calibration and shaping parameters for one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Shaped intensity must rise above this to activate.  Default: `0.1`.
    pub activation_threshold: f64,
    /// Shaped intensity must fall below this to deactivate.  Default: `0.05`.
    pub deactivation_threshold: f64,
    pub smoothing: Smoothing,
    pub curve: ResponseCurve,
    pub amplification: Amplification,
    /// Raw window mapped onto `0..=1`.  Default: `25..=1023`; `None` uses
    /// the full `0..=1023`.
    pub calibration: Option<RawRange>,
    /// Smallest change in shaped intensity reported as value-changed,
    /// clamped to `0..=1`.  Default: `0.01`.
    pub change_threshold: f64,
    /// Emit [`crate::types::FsrEvent::HoldTriggered`] once a press lasts
    /// longer than this many seconds.  Default: `None`.
    pub hold_trigger_secs: Option<f64>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            activation_threshold: 0.1,
            deactivation_threshold: 0.05,
            smoothing: Smoothing::default(),
            curve: ResponseCurve::default(),
            amplification: Amplification::default(),
            calibration: Some(RawRange {
                min: REST_FLOOR,
                max: ADC_MAX,
            }),
            change_threshold: 0.01,
            hold_trigger_secs: None,
        }
    }
}

impl ChannelConfig {
    /// Thresholds only: full ADC range, no smoothing, no curve, no amplification.
    pub fn linear(activation: f64, deactivation: f64) -> Self {
        Self {
            activation_threshold: activation,
            deactivation_threshold: deactivation,
            smoothing: Smoothing {
                enabled: false,
                factor: 1.0,
            },
            curve: ResponseCurve {
                enabled: false,
                ..ResponseCurve::default()
            },
            amplification: Amplification {
                enabled: false,
                ..Amplification::default()
            },
            calibration: None,
            ..Self::default()
        }
    }

    #[allow(clippy::neg_cmp_op_on_partial_ord)]
    pub fn validate(&self) -> Result<(), FsrError> {
        let bad = |msg: String| Err(FsrError::InvalidConfig(msg));
        if !(self.deactivation_threshold >= 0.0) {
            return bad(format!(
                "deactivation threshold {} must be non-negative",
                self.deactivation_threshold
            ));
        }
        if !(self.deactivation_threshold <= self.activation_threshold) {
            return bad(format!(
                "deactivation threshold {} exceeds activation threshold {}",
                self.deactivation_threshold, self.activation_threshold
            ));
        }
        if !(self.smoothing.factor > 0.0 && self.smoothing.factor <= 1.0) {
            return bad(format!(
                "smoothing factor {} outside (0, 1]",
                self.smoothing.factor
            ));
        }
        if !(self.curve.exponent > 0.0) {
            return bad(format!("curve exponent {} must be positive", self.curve.exponent));
        }
        let amp = &self.amplification;
        if !(amp.start_threshold >= 0.0 && amp.start_threshold < 1.0) {
            return bad(format!(
                "amplification start {} outside [0, 1)",
                amp.start_threshold
            ));
        }
        if !(amp.max_multiplier >= 1.0) {
            return bad(format!(
                "amplification multiplier {} below 1",
                amp.max_multiplier
            ));
        }
        if let Some(range) = self.calibration {
            if !(range.min < range.max) {
                return bad(format!(
                    "calibration min {} not below max {}",
                    range.min, range.max
                ));
            }
        }
        if self.change_threshold.is_nan() {
            return bad("change threshold is not a number".to_string());
        }
        if let Some(secs) = self.hold_trigger_secs {
            if !(secs > 0.0) {
                return bad(format!("hold trigger {secs} s must be positive"));
            }
        }
        Ok(())
    }
}

// ── Pipeline stages ───────────────────────────────────────────────────────────

/// Map a raw reading into `0..=1`.
pub fn normalize(raw: f64, calibration: Option<RawRange>) -> f64 {
    match calibration {
        Some(r) => inverse_lerp(r.min, r.max, raw),
        None => clamp01(raw / ADC_MAX),
    }
}

pub fn smooth(prev: f64, sample: f64, s: &Smoothing) -> f64 {
    if s.enabled {
        lerp(prev, sample, s.factor)
    } else {
        sample
    }
}

pub fn apply_curve(v: f64, c: &ResponseCurve) -> f64 {
    if c.enabled && v > 0.0 {
        v.powf(c.exponent.clamp(EXPONENT_RANGE.0, EXPONENT_RANGE.1))
    } else {
        v
    }
}

pub fn amplify(v: f64, a: &Amplification) -> f64 {
    if !a.enabled || v <= a.start_threshold {
        return v;
    }
    let t = inverse_lerp(a.start_threshold, 1.0, v);
    v * lerp(1.0, a.max_multiplier, t * t * t)
}

// ── ChannelProcessor ──────────────────────────────────────────────────────────

/// What a single update changed, used by the publisher to pick events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelUpdate {
    pub value_changed: bool,
    pub activation_changed: bool,
    pub hold_triggered: bool,
}

/// Owns one channel's config and state.
pub struct ChannelProcessor {
    config: ChannelConfig,
    state: ChannelState,
    /// Latched once per press so the hold trigger fires a single time.
    trigger_latched: bool,
    /// Shaped value carried by the last value-changed notification.
    published: f64,
    /// Time hold-time was last integrated, by a sample or by idle decay.
    last_step: Option<Instant>,
}

impl ChannelProcessor {
    pub fn new(channel: usize, config: ChannelConfig) -> Self {
        Self {
            config,
            state: ChannelState::new(channel),
            trigger_latched: false,
            published: 0.0,
            last_step: None,
        }
    }

    pub fn state(&self) -> &ChannelState {
        &self.state
    }

    /// `true` while the channel is pressed or still has hold-time to shed.
    pub fn is_engaged(&self) -> bool {
        self.state.active || self.state.hold_time > 0.0
    }

    /// Swap the config; current state carries over.
    pub fn set_config(&mut self, config: ChannelConfig) {
        self.config = config;
    }

    /// Process one plausible raw sample captured at `at`.
    ///
    /// The integration step is the time since this channel's previous
    /// update, capped at `max_gap`.  The first sample integrates nothing.
    pub fn update(&mut self, raw: f64, at: Instant, max_gap: Duration) -> ChannelUpdate {
        let v = normalize(raw, self.config.calibration);
        self.step(raw, v, at, max_gap)
    }

    /// Process a reading below the plausible window as a release.
    pub fn release(&mut self, raw: f64, at: Instant, max_gap: Duration) -> ChannelUpdate {
        self.step(raw, 0.0, at, max_gap)
    }

    fn step(&mut self, raw: f64, normalized: f64, at: Instant, max_gap: Duration) -> ChannelUpdate {
        let dt = self
            .last_step
            .map(|prev| at.saturating_duration_since(prev).min(max_gap))
            .unwrap_or(Duration::ZERO);
        self.state.raw = raw;
        self.state.last_update = Some(at);
        self.last_step = Some(at);
        self.apply(normalized, dt.as_secs_f64())
    }

    /// Let an idle channel shed hold-time while no samples arrive.
    ///
    /// Does nothing unless the channel is inactive with hold-time left and
    /// at least `min_gap` has passed since it was last integrated.  Returns
    /// whether the state changed.
    pub fn decay_idle(&mut self, at: Instant, min_gap: Duration) -> bool {
        if self.state.active || self.state.hold_time <= 0.0 {
            return false;
        }
        let Some(prev) = self.last_step else {
            return false;
        };
        let elapsed = at.saturating_duration_since(prev);
        if elapsed < min_gap {
            return false;
        }
        self.state.hold_time = (self.state.hold_time - elapsed.as_secs_f64()).max(0.0);
        self.last_step = Some(at);
        true
    }

    /// Run the shaping pipeline on a normalised sample with an explicit step.
    pub fn apply(&mut self, normalized: f64, dt: f64) -> ChannelUpdate {
        let cfg = &self.config;
        let st = &mut self.state;
        let mut out = ChannelUpdate::default();

        st.normalized = clamp01(normalized);
        st.smoothed = clamp01(smooth(st.smoothed, st.normalized, &cfg.smoothing));
        let shaped = amplify(apply_curve(st.smoothed, &cfg.curve), &cfg.amplification);
        st.shaped = shaped;
        if (shaped - self.published).abs() > cfg.change_threshold.clamp(0.0, 1.0) {
            out.value_changed = true;
            self.published = shaped;
        }

        let was_active = st.active;
        if !st.active && shaped > cfg.activation_threshold {
            st.active = true;
        } else if st.active && shaped < cfg.deactivation_threshold {
            st.active = false;
        }
        out.activation_changed = was_active != st.active;

        if st.active {
            st.hold_time += shaped * dt;
            st.current_hold += dt;
        } else {
            st.hold_time = (st.hold_time - dt).max(0.0);
            st.current_hold = 0.0;
            self.trigger_latched = false;
        }

        if let Some(trigger) = cfg.hold_trigger_secs {
            if st.active && !self.trigger_latched && st.current_hold > trigger {
                self.trigger_latched = true;
                out.hold_triggered = true;
            }
        }
        out
    }

    /// Explicit external reset of both hold counters.
    pub fn reset_hold(&mut self) {
        self.state.hold_time = 0.0;
        self.state.current_hold = 0.0;
        self.trigger_latched = false;
    }
}

// ── FrameProcessor ────────────────────────────────────────────────────────────

/// Per-frame outcome: which channels changed, and the committed state.
#[derive(Debug, Clone)]
pub struct FrameOutcome {
    pub updates: [ChannelUpdate; CHANNEL_COUNT],
    pub skipped: Vec<usize>,
    pub snapshot: Snapshot,
}

/// All six channel processors plus the bounded history of accepted frames.
pub struct FrameProcessor {
    channels: [ChannelProcessor; CHANNEL_COUNT],
    history: VecDeque<RawFrame>,
    history_len: usize,
    max_gap: Duration,
}

impl FrameProcessor {
    pub fn new(configs: [ChannelConfig; CHANNEL_COUNT], history_len: usize, max_gap: Duration) -> Self {
        let mut configs = configs.into_iter();
        Self {
            channels: std::array::from_fn(|i| {
                ChannelProcessor::new(i, configs.next().unwrap_or_default())
            }),
            history: VecDeque::with_capacity(history_len),
            history_len,
            max_gap,
        }
    }

    /// Feed one decoded frame through every channel, in channel order.
    ///
    /// Implausible samples leave their channel untouched, except that a
    /// low one releases an engaged channel.
    pub fn process(&mut self, frame: RawFrame) -> FrameOutcome {
        let mut updates = [ChannelUpdate::default(); CHANNEL_COUNT];
        let mut skipped = Vec::new();
        for (i, ch) in self.channels.iter_mut().enumerate() {
            let raw = frame.samples[i];
            if frame.plausible[i] {
                updates[i] = ch.update(raw, frame.captured_at, self.max_gap);
            } else if raw < ADC_MAX / 2.0 && ch.is_engaged() {
                updates[i] = ch.release(raw, frame.captured_at, self.max_gap);
            } else {
                debug!(
                    "{}",
                    FsrError::ChannelOutOfRange {
                        channel: i,
                        raw: frame.samples[i]
                    }
                );
                skipped.push(i);
            }
        }
        if self.history_len > 0 {
            while self.history.len() >= self.history_len {
                self.history.pop_front();
            }
            self.history.push_back(frame);
        }
        FrameOutcome {
            updates,
            skipped,
            snapshot: self.snapshot(),
        }
    }

    /// Decay hold-time on idle channels that have gone `min_gap` without a
    /// sample.  Returns the new snapshot if anything changed.
    pub fn decay_idle(&mut self, at: Instant, min_gap: Duration) -> Option<Snapshot> {
        let mut changed = false;
        for ch in self.channels.iter_mut() {
            changed |= ch.decay_idle(at, min_gap);
        }
        changed.then(|| self.snapshot())
    }

    pub fn snapshot(&self) -> Snapshot {
        std::sync::Arc::new(std::array::from_fn(|i| self.channels[i].state().clone()))
    }

    pub fn channel(&self, id: usize) -> Option<&ChannelProcessor> {
        self.channels.get(id)
    }

    pub fn set_config(&mut self, id: usize, config: ChannelConfig) -> Result<(), FsrError> {
        config.validate()?;
        let ch = self
            .channels
            .get_mut(id)
            .ok_or(FsrError::InvalidChannel(id))?;
        ch.set_config(config);
        Ok(())
    }

    /// Reset hold counters for one channel, or all when `id` is `None`.
    pub fn reset_hold(&mut self, id: Option<usize>) -> Result<Snapshot, FsrError> {
        match id {
            Some(id) => self
                .channels
                .get_mut(id)
                .ok_or(FsrError::InvalidChannel(id))?
                .reset_hold(),
            None => self.channels.iter_mut().for_each(ChannelProcessor::reset_hold),
        }
        Ok(self.snapshot())
    }

    pub fn history(&self) -> Vec<RawFrame> {
        self.history.iter().cloned().collect()
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn frame(samples: [f64; CHANNEL_COUNT], at: Instant) -> RawFrame {
        RawFrame {
            samples,
            plausible: samples.map(|s| s > 10.0 && s < 1000.0),
            captured_at: at,
        }
    }

    #[test]
    fn hysteresis_scenario() {
        let mut ch = ChannelProcessor::new(0, ChannelConfig::linear(0.1, 0.05));
        let active: Vec<bool> = [0.02, 0.15, 0.07, 0.04]
            .iter()
            .map(|v| {
                ch.apply(*v, 0.0);
                ch.state().active
            })
            .collect();
        assert_eq!(active, vec![false, true, true, false]);
    }

    #[test]
    fn hysteresis_holds_inside_band() {
        let mut ch = ChannelProcessor::new(0, ChannelConfig::linear(0.1, 0.05));
        ch.apply(0.5, 0.0);
        assert!(ch.state().active);
        for v in [0.06, 0.09, 0.051, 0.0999, 0.07] {
            let up = ch.apply(v, 0.01);
            assert!(ch.state().active);
            assert!(!up.activation_changed);
        }
    }

    #[test]
    fn activation_edge_reported_once() {
        let mut ch = ChannelProcessor::new(0, ChannelConfig::linear(0.1, 0.05));
        assert!(ch.apply(0.5, 0.0).activation_changed);
        assert!(!ch.apply(0.6, 0.0).activation_changed);
        assert!(ch.apply(0.0, 0.0).activation_changed);
        assert!(!ch.apply(0.0, 0.0).activation_changed);
    }

    #[test]
    fn hold_time_integrates_intensity_while_active() {
        let mut ch = ChannelProcessor::new(0, ChannelConfig::linear(0.1, 0.05));
        ch.apply(0.5, 0.0);
        for _ in 0..100 {
            ch.apply(0.5, 0.02);
        }
        // 0.5 intensity held for 2 s
        assert!((ch.state().hold_time - 1.0).abs() < EPS);
        assert!((ch.state().current_hold - 2.0).abs() < EPS);
    }

    #[test]
    fn hold_time_decays_linearly_and_never_negative() {
        let mut ch = ChannelProcessor::new(0, ChannelConfig::linear(0.1, 0.05));
        ch.apply(1.0, 0.0);
        ch.apply(1.0, 0.5);
        assert!((ch.state().hold_time - 0.5).abs() < EPS);

        ch.apply(0.0, 0.1);
        assert!(!ch.state().active);
        assert_eq!(ch.state().current_hold, 0.0);
        assert!((ch.state().hold_time - 0.4).abs() < EPS);

        ch.apply(0.0, 0.3);
        assert!((ch.state().hold_time - 0.1).abs() < EPS);
        ch.apply(0.0, 5.0);
        assert_eq!(ch.state().hold_time, 0.0);
    }

    #[test]
    fn smoothing_lerps_toward_sample() {
        let s = Smoothing {
            enabled: true,
            factor: 0.8,
        };
        assert!((smooth(0.0, 1.0, &s) - 0.8).abs() < EPS);
        assert!((smooth(0.8, 1.0, &s) - 0.96).abs() < EPS);
        let off = Smoothing {
            enabled: false,
            factor: 0.8,
        };
        assert_eq!(smooth(0.2, 0.9, &off), 0.9);
    }

    #[test]
    fn curve_lifts_light_touch_and_skips_zero() {
        let c = ResponseCurve::default();
        assert_eq!(apply_curve(0.0, &c), 0.0);
        assert!(apply_curve(0.1, &c) > 0.1);
        assert!((apply_curve(1.0, &c) - 1.0).abs() < EPS);
    }

    #[test]
    fn curve_exponent_is_clamped() {
        let c = ResponseCurve {
            enabled: true,
            exponent: 10.0,
        };
        assert!((apply_curve(0.5, &c) - 0.25).abs() < EPS);
    }

    #[test]
    fn amplification_passes_through_below_start() {
        let a = Amplification::default();
        assert_eq!(amplify(0.1, &a), 0.1);
        assert_eq!(amplify(0.2, &a), 0.2);
    }

    #[test]
    fn amplification_reaches_ceiling_at_full_pressure() {
        let a = Amplification::default();
        assert!((amplify(1.0, &a) - 3.5).abs() < EPS);
        // t = 0.5 -> factor = 1 + 2.5 * 0.125
        let v = 0.6;
        assert!((amplify(v, &a) - v * 1.3125).abs() < EPS);
    }

    #[test]
    fn calibration_range_renormalises_raw() {
        let r = Some(RawRange {
            min: 100.0,
            max: 600.0,
        });
        assert_eq!(normalize(50.0, r), 0.0);
        assert!((normalize(350.0, r) - 0.5).abs() < EPS);
        assert_eq!(normalize(900.0, r), 1.0);
        assert!((normalize(1023.0, None) - 1.0).abs() < EPS);
    }

    #[test]
    fn validate_rejects_inverted_band() {
        let cfg = ChannelConfig {
            activation_threshold: 0.05,
            deactivation_threshold: 0.1,
            ..ChannelConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(FsrError::InvalidConfig(_))));
        assert!(ChannelConfig::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_smoothing_and_nan() {
        let mut cfg = ChannelConfig::default();
        cfg.smoothing.factor = 0.0;
        assert!(cfg.validate().is_err());
        let mut cfg = ChannelConfig::default();
        cfg.activation_threshold = f64::NAN;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn hold_trigger_fires_once_per_press() {
        let cfg = ChannelConfig {
            hold_trigger_secs: Some(1.0),
            ..ChannelConfig::linear(0.1, 0.05)
        };
        let mut ch = ChannelProcessor::new(0, cfg);
        ch.apply(1.0, 0.0);
        let fired: usize = (0..30)
            .map(|_| ch.apply(1.0, 0.1).hold_triggered as usize)
            .sum();
        assert_eq!(fired, 1);
        ch.apply(0.0, 0.1);
        ch.apply(1.0, 0.0);
        let fired: usize = (0..15)
            .map(|_| ch.apply(1.0, 0.1).hold_triggered as usize)
            .sum();
        assert_eq!(fired, 1);
    }

    #[test]
    fn frame_skips_floating_channels_and_keeps_state() {
        let mut fp = FrameProcessor::new(
            std::array::from_fn(|_| ChannelConfig::linear(0.1, 0.05)),
            10,
            Duration::from_secs(1),
        );
        let t0 = Instant::now();
        fp.process(frame([500.0; CHANNEL_COUNT], t0));
        let before = fp.channel(1).unwrap().state().clone();

        let out = fp.process(frame(
            [500.0, 1023.0, 500.0, 500.0, 500.0, 500.0],
            t0 + Duration::from_millis(20),
        ));
        assert_eq!(out.skipped, vec![1]);
        assert_eq!(fp.channel(1).unwrap().state(), &before);
        assert_eq!(out.snapshot[1], before);
        assert!(out.snapshot[0].active);
    }

    #[test]
    fn low_reading_releases_engaged_channel_only() {
        let mut fp = FrameProcessor::new(
            std::array::from_fn(|_| ChannelConfig::linear(0.1, 0.05)),
            0,
            Duration::from_secs(1),
        );
        let t0 = Instant::now();
        fp.process(frame([500.0, 0.0, 0.0, 0.0, 0.0, 0.0], t0));
        let idle = fp.channel(1).unwrap().state().clone();

        let out = fp.process(frame([3.0; CHANNEL_COUNT], t0 + Duration::from_millis(20)));
        assert!(out.updates[0].activation_changed);
        assert!(!out.snapshot[0].active);
        assert_eq!(out.snapshot[0].raw, 3.0);
        assert_eq!(out.skipped, vec![1, 2, 3, 4, 5]);
        assert_eq!(out.snapshot[1], idle);
    }

    fn run(fp: &mut FrameProcessor, raw: f64, frames: usize, t: &mut Instant) -> FrameOutcome {
        let mut last = None;
        for _ in 0..frames {
            *t += Duration::from_millis(20);
            last = Some(fp.process(frame([raw; CHANNEL_COUNT], *t)));
        }
        last.unwrap()
    }

    #[test]
    fn default_config_releases_after_press() {
        let mut fp = FrameProcessor::new(Default::default(), 0, Duration::from_secs(1));
        let mut t = Instant::now();

        let pressed = run(&mut fp, 600.0, 20, &mut t);
        assert!(pressed.snapshot[0].active);
        let peak_hold = pressed.snapshot[0].hold_time;

        let released = run(&mut fp, 0.0, 200, &mut t);
        assert!(!released.snapshot[0].active);
        assert!(released.snapshot[0].hold_time < peak_hold);

        let resting = run(&mut fp, 11.0, 200, &mut t);
        assert!(!resting.snapshot[0].active);
        assert_eq!(resting.snapshot[0].hold_time, 0.0);
    }

    #[test]
    fn default_config_ignores_resting_noise() {
        let mut fp = FrameProcessor::new(Default::default(), 0, Duration::from_secs(1));
        let mut t = Instant::now();
        for raw in [15.0, 22.0, 18.0, REST_FLOOR] {
            let out = run(&mut fp, raw, 5, &mut t);
            assert!(!out.snapshot[0].active);
            assert_eq!(out.snapshot[0].shaped, 0.0);
        }
    }

    #[test]
    fn small_jitter_is_not_a_value_change() {
        let mut ch = ChannelProcessor::new(0, ChannelConfig::linear(0.1, 0.05));
        assert!(ch.apply(0.5, 0.0).value_changed);
        for v in [0.505, 0.495, 0.509, 0.5] {
            assert!(!ch.apply(v, 0.02).value_changed);
        }
        assert!(ch.apply(0.52, 0.02).value_changed);
        // Measured from the last reported value, so slow drift still reports.
        assert!(!ch.apply(0.525, 0.02).value_changed);
        assert!(ch.apply(0.531, 0.02).value_changed);
    }

    #[test]
    fn idle_channel_decays_without_samples() {
        let mut fp = FrameProcessor::new(
            std::array::from_fn(|_| ChannelConfig::linear(0.1, 0.05)),
            0,
            Duration::from_secs(1),
        );
        let mut t = Instant::now();
        run(&mut fp, 800.0, 51, &mut t);
        let out = run(&mut fp, 20.0, 1, &mut t);
        assert!(!out.snapshot[0].active);
        let hold = out.snapshot[0].hold_time;
        assert!(hold > 0.5);

        let gap = Duration::from_millis(100);
        assert!(fp.decay_idle(t + Duration::from_millis(50), gap).is_none());
        let snap = fp.decay_idle(t + Duration::from_millis(300), gap).unwrap();
        assert!((snap[0].hold_time - (hold - 0.3)).abs() < EPS);
        let snap = fp.decay_idle(t + Duration::from_secs(30), gap).unwrap();
        assert_eq!(snap[0].hold_time, 0.0);
        assert!(fp.decay_idle(t + Duration::from_secs(40), gap).is_none());
    }

    #[test]
    fn frame_gap_is_capped() {
        let mut fp = FrameProcessor::new(
            std::array::from_fn(|_| ChannelConfig::linear(0.1, 0.05)),
            0,
            Duration::from_millis(100),
        );
        let t0 = Instant::now();
        fp.process(frame([512.0; CHANNEL_COUNT], t0));
        let out = fp.process(frame(
            [512.0; CHANNEL_COUNT],
            t0 + Duration::from_secs(30),
        ));
        assert!((out.snapshot[0].current_hold - 0.1).abs() < EPS);
    }

    #[test]
    fn history_is_bounded() {
        let mut fp = FrameProcessor::new(Default::default(), 3, Duration::from_secs(1));
        let t0 = Instant::now();
        for i in 0..5 {
            fp.process(frame([100.0 + i as f64; CHANNEL_COUNT], t0));
        }
        let h = fp.history();
        assert_eq!(h.len(), 3);
        assert_eq!(h[0].samples[0], 102.0);
        assert_eq!(h[2].samples[0], 104.0);
        fp.clear_history();
        assert!(fp.history().is_empty());
    }

    #[test]
    fn reset_hold_zeroes_selected_channel() {
        let mut fp = FrameProcessor::new(
            std::array::from_fn(|_| ChannelConfig::linear(0.1, 0.05)),
            0,
            Duration::from_secs(1),
        );
        let t0 = Instant::now();
        fp.process(frame([800.0; CHANNEL_COUNT], t0));
        fp.process(frame([800.0; CHANNEL_COUNT], t0 + Duration::from_millis(500)));
        let snap = fp.reset_hold(Some(2)).unwrap();
        assert_eq!(snap[2].hold_time, 0.0);
        assert!(snap[3].hold_time > 0.0);
        assert!(matches!(fp.reset_hold(Some(9)), Err(FsrError::InvalidChannel(9))));
        let snap = fp.reset_hold(None).unwrap();
        assert!(snap.iter().all(|c| c.hold_time == 0.0));
    }
}
