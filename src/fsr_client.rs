use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval, interval_at, sleep, Instant, MissedTickBehavior};

use crate::channel::{ChannelConfig, FrameProcessor};
use crate::discovery::{PortDiscovery, PortRule};
use crate::error::FsrError;
use crate::parse::{DecoderConfig, FrameDecoder, LineAccumulator};
use crate::protocol::{encode_command, CHANNEL_COUNT};
use crate::publisher::{Publisher, Subscription, SubscriptionGuard, SubscriptionId};
use crate::transport::{is_quiet_read, Connector, Link, LinkSettings, SerialConnector};
use crate::types::{ChannelState, ConnectionState, EventKind, FsrEvent, PortCandidate, RawFrame, Snapshot};

/// Largest chunk pulled from the driver per poll.
const READ_CHUNK: usize = 1024;

/// Capacity of the handle → task command queue.
const COMMAND_QUEUE: usize = 64;

// ── FsrClientConfig ───────────────────────────────────────────────────────────

/// Configuration for [`FsrClient`].
///
/// Every field has a default, so a JSON config file only needs the keys it
/// changes:
///
/// ```json
/// { "port_name": "/dev/ttyACM0", "channels": [ ... ] }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsrClientConfig {
    /// Explicit device name.  Takes precedence over discovery.  Default: `None`.
    pub port_name: Option<String>,
    /// Baud and frame parameters.  Default: 9600 8N1.
    pub link: LinkSettings,
    /// Open attempts per connect cycle before giving up.  Default: `3`.
    pub retry_count: u32,
    /// Pause between failed attempts.  Default: `2000`.
    pub retry_delay_ms: u64,
    /// Wait after a successful open before reading, while the board resets.
    /// Default: `500`.
    pub settle_ms: u64,
    /// Pause between tearing down a faulted link and reconnecting.  Default: `500`.
    pub reconnect_cooldown_ms: u64,
    /// Liveness check / passive re-discovery period.  Default: `2000`.
    ///
    /// While connected, the check confirms the bound device is still in the
    /// OS listing, which catches unplugs that leave reads silently timing out.
    pub monitor_interval_ms: u64,
    /// Silence longer than this raises [`FsrError::DataStale`].  Default: `1000`.
    pub data_timeout_ms: u64,
    /// Bound on each discovery probe open.  Default: `500`.
    pub probe_timeout_ms: u64,
    /// Read-loop cadence.  Default: `10`.
    pub read_poll_ms: u64,
    /// Cap on the hold-time integration step.  Default: `1000`.
    pub max_frame_gap_ms: u64,
    /// Released channels that go this long without a sample keep decaying
    /// their hold-time on a timer.  Default: `100`.
    pub hold_decay_ms: u64,
    /// Connect on start and keep re-discovering while disconnected.  Default: `true`.
    pub auto_connect: bool,
    /// Accepted frames retained for [`FsrHandle::history`].  `0` disables.  Default: `100`.
    pub history_len: usize,
    /// Naming rules for discovery.  `None` uses the platform table.
    pub port_patterns: Option<Vec<PortRule>>,
    pub decoder: DecoderConfig,
    pub channels: [ChannelConfig; CHANNEL_COUNT],
}

impl Default for FsrClientConfig {
    fn default() -> Self {
        Self {
            port_name: None,
            link: LinkSettings::default(),
            retry_count: 3,
            retry_delay_ms: 2000,
            settle_ms: 500,
            reconnect_cooldown_ms: 500,
            monitor_interval_ms: 2000,
            data_timeout_ms: 1000,
            probe_timeout_ms: 500,
            read_poll_ms: 10,
            max_frame_gap_ms: 1000,
            hold_decay_ms: 100,
            auto_connect: true,
            history_len: 100,
            port_patterns: None,
            decoder: DecoderConfig::default(),
            channels: Default::default(),
        }
    }
}

impl FsrClientConfig {
    pub fn validate(&self) -> Result<(), FsrError> {
        let nonzero = [
            ("retry_count", self.retry_count as u64),
            ("monitor_interval_ms", self.monitor_interval_ms),
            ("data_timeout_ms", self.data_timeout_ms),
            ("read_poll_ms", self.read_poll_ms),
            ("hold_decay_ms", self.hold_decay_ms),
            ("baud_rate", self.link.baud_rate as u64),
        ];
        if let Some((name, _)) = nonzero.iter().find(|(_, v)| *v == 0) {
            return Err(FsrError::InvalidConfig(format!("{name} must be non-zero")));
        }
        for (i, ch) in self.channels.iter().enumerate() {
            ch.validate()
                .map_err(|e| FsrError::InvalidConfig(format!("channel {i}: {e}")))?;
        }
        Ok(())
    }

    fn discovery(&self) -> PortDiscovery {
        PortDiscovery::new(
            self.port_patterns
                .clone()
                .unwrap_or_else(PortRule::platform_defaults),
            self.link.clone(),
            Duration::from_millis(self.probe_timeout_ms),
        )
    }
}

// ── FsrClient ─────────────────────────────────────────────────────────────────

/// Builds the ingestion pipeline and starts its connection task.
///
/// ```no_run
/// use fsr_rs::prelude::*;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let handle = FsrClient::new(FsrClientConfig::default()).start()?;
///     let mut events = handle.subscribe(&[EventKind::ActivationChanged]);
///     while let Some(FsrEvent::ActivationChanged { channel, active }) = events.recv().await {
///         println!("FSR{channel} active={active}");
///     }
///     Ok(())
/// }
/// ```
pub struct FsrClient {
    config: FsrClientConfig,
}

impl FsrClient {
    pub fn new(config: FsrClientConfig) -> Self {
        Self { config }
    }

    /// Ranked candidates on this machine, without probing them.
    pub fn list_candidates(&self) -> Vec<PortCandidate> {
        self.config.discovery().candidates(&SerialConnector)
    }

    /// Start against real serial hardware.  Must be called inside a Tokio runtime.
    pub fn start(self) -> Result<FsrHandle, FsrError> {
        self.start_with(Arc::new(SerialConnector))
    }

    /// Start against any [`Connector`].
    pub fn start_with(self, connector: Arc<dyn Connector>) -> Result<FsrHandle, FsrError> {
        self.config.validate()?;
        let publisher = Publisher::new();
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE);

        let manager = ConnectionManager {
            discovery: self.config.discovery(),
            decoder: FrameDecoder::new(self.config.decoder.clone()),
            processor: FrameProcessor::new(
                self.config.channels.clone(),
                self.config.history_len,
                Duration::from_millis(self.config.max_frame_gap_ms),
            ),
            auto_connect: self.config.auto_connect,
            config: self.config,
            connector,
            publisher: publisher.clone(),
            cmd_rx,
            lines: LineAccumulator::new(),
            state: ConnectionState::Disconnected,
            tried: HashSet::new(),
        };
        tokio::spawn(manager.run());

        Ok(FsrHandle { cmd_tx, publisher })
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

type Reply<T> = oneshot::Sender<Result<T, FsrError>>;

enum Command {
    Connect(Reply<()>),
    Disconnect(Reply<()>),
    Shutdown(Reply<()>),
    Send(String, Reply<()>),
    SetChannelConfig(usize, Box<ChannelConfig>, Reply<()>),
    ResetHold(Option<usize>, Reply<()>),
    History(Reply<Vec<RawFrame>>),
    ClearHistory(Reply<()>),
    InjectLine(String, Reply<()>),
}

/// Commands that change which phase the state machine is in.
enum Control {
    /// `None` when the monitor, not a handle, asked for the connect.
    Connect(Option<Reply<()>>),
    Disconnect(Reply<()>),
    Shutdown(Option<Reply<()>>),
}

enum CycleEnd {
    Connected(Box<dyn Link>, String),
    Exhausted,
    Interrupted(Control),
}

enum SessionEnd {
    Fault(FsrError),
    Interrupted(Control),
}

// ── ConnectionManager ─────────────────────────────────────────────────────────

/// Sole owner of the serial link.  Runs until shutdown or until every handle
/// is dropped.
struct ConnectionManager {
    config: FsrClientConfig,
    connector: Arc<dyn Connector>,
    discovery: PortDiscovery,
    decoder: FrameDecoder,
    processor: FrameProcessor,
    publisher: Publisher,
    cmd_rx: mpsc::Receiver<Command>,
    lines: LineAccumulator,
    state: ConnectionState,
    /// Passive re-discovery and fault recovery are enabled.
    auto_connect: bool,
    /// Devices already attempted while disconnected.  Cleared on an explicit
    /// connect and once a link comes up.
    tried: HashSet<String>,
}

impl ConnectionManager {
    async fn run(mut self) {
        info!("connection task started (auto_connect={})", self.auto_connect);
        let mut pending = self.auto_connect;
        let mut shutdown_ack = None;

        loop {
            let control = if pending {
                pending = false;
                match self.connect_cycle().await {
                    CycleEnd::Connected(link, device) => match self.session(link, device).await {
                        SessionEnd::Fault(e) => match self.recover(e).await {
                            None => {
                                pending = true;
                                None
                            }
                            Some(c) => Some(c),
                        },
                        SessionEnd::Interrupted(c) => Some(c),
                    },
                    CycleEnd::Exhausted => None,
                    CycleEnd::Interrupted(c) => Some(c),
                }
            } else {
                Some(self.idle().await)
            };

            match control {
                None => {}
                Some(Control::Connect(ack)) => {
                    pending = true;
                    // A handle request retries everything; the monitor only
                    // wakes the cycle for a device not tried yet.
                    if let Some(ack) = ack {
                        self.auto_connect = true;
                        self.tried.clear();
                        let _ = ack.send(Ok(()));
                    }
                }
                Some(Control::Disconnect(ack)) => {
                    self.auto_connect = false;
                    self.set_state(ConnectionState::Disconnected, None);
                    let _ = ack.send(Ok(()));
                }
                Some(Control::Shutdown(ack)) => {
                    shutdown_ack = ack;
                    break;
                }
            }
        }

        self.set_state(ConnectionState::Disconnected, None);
        info!(
            "connection task stopped ({} subscribers attached)",
            self.publisher.subscriber_count()
        );
        if let Some(ack) = shutdown_ack {
            let _ = ack.send(Ok(()));
        }
    }

    // ── State ─────────────────────────────────────────────────────────────────

    fn set_state(&mut self, next: ConnectionState, device: Option<String>) {
        if self.state == next {
            return;
        }
        if !self.state.can_transition_to(&next) {
            warn!("unexpected connection transition {} -> {next}", self.state);
        }
        info!("connection: {} -> {next}", self.state);
        self.state = next;
        self.publisher.publish_state(next, device);
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    /// Answer data-path commands in place; hand phase changes back to the caller.
    fn handle_command(
        &mut self,
        cmd: Option<Command>,
        link: Option<&mut Box<dyn Link>>,
    ) -> Option<Control> {
        let Some(cmd) = cmd else {
            debug!("all handles dropped");
            return Some(Control::Shutdown(None));
        };
        match cmd {
            Command::Connect(ack) => return Some(Control::Connect(Some(ack))),
            Command::Disconnect(ack) => return Some(Control::Disconnect(ack)),
            Command::Shutdown(ack) => return Some(Control::Shutdown(Some(ack))),
            Command::Send(text, reply) => {
                let result = match link {
                    Some(link) => send_line(link.as_mut(), &text),
                    None => Err(FsrError::NotConnected),
                };
                if let Err(e @ FsrError::CommandSendFailed(_)) = &result {
                    warn!("{e}");
                    self.publisher.publish_error(e.clone());
                }
                let _ = reply.send(result);
            }
            Command::SetChannelConfig(id, cfg, reply) => {
                let result = self.processor.set_config(id, *cfg);
                if result.is_ok() {
                    info!("channel {id} reconfigured");
                }
                let _ = reply.send(result);
            }
            Command::ResetHold(id, reply) => {
                let result = self
                    .processor
                    .reset_hold(id)
                    .map(|snapshot| self.publisher.commit(snapshot));
                let _ = reply.send(result);
            }
            Command::History(reply) => {
                let _ = reply.send(Ok(self.processor.history()));
            }
            Command::ClearHistory(reply) => {
                self.processor.clear_history();
                let _ = reply.send(Ok(()));
            }
            Command::InjectLine(line, reply) => {
                let _ = reply.send(self.ingest(&line));
            }
        }
        None
    }

    /// Cancellable sleep.  Data-path commands are served while waiting.
    async fn wait(&mut self, duration: Duration) -> Option<Control> {
        let deadline = sleep(duration);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => return None,
                cmd = self.cmd_rx.recv() => match self.handle_command(cmd, None) {
                    None => {}
                    Some(Control::Connect(ack)) => ack_connect(ack),
                    Some(c) => return Some(c),
                },
            }
        }
    }

    // ── Disconnected ──────────────────────────────────────────────────────────

    /// Wait for a connect request or a newly appeared device.
    async fn idle(&mut self) -> Control {
        let period = Duration::from_millis(self.config.monitor_interval_ms);
        let mut monitor = interval_at(Instant::now() + period, period);
        monitor.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut decay = self.decay_timer();
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match self.handle_command(cmd, None) {
                    None => {}
                    Some(Control::Disconnect(ack)) => {
                        self.auto_connect = false;
                        let _ = ack.send(Ok(()));
                    }
                    Some(c) => return c,
                },
                _ = monitor.tick() => {
                    if self.auto_connect {
                        if let Some(port) = self.untried_device() {
                            info!("monitor: new device {port} appeared");
                            return Control::Connect(None);
                        }
                    }
                }
                _ = decay.tick() => self.decay_idle(),
            }
        }
    }

    fn decay_timer(&self) -> tokio::time::Interval {
        let period = Duration::from_millis(self.config.hold_decay_ms);
        let mut timer = interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer
    }

    /// Shed hold-time on released channels that have stopped receiving samples.
    fn decay_idle(&mut self) {
        let gap = Duration::from_millis(self.config.hold_decay_ms);
        if let Some(snapshot) = self.processor.decay_idle(Instant::now().into_std(), gap) {
            self.publisher.commit(snapshot);
        }
    }

    /// A matching device that is present and not yet attempted.
    ///
    /// Devices that vanish from the OS listing are forgotten, so unplugging
    /// and replugging the same board counts as new.
    fn untried_device(&mut self) -> Option<String> {
        let listed = match self.connector.available_ports() {
            Ok(listed) => listed,
            Err(e) => {
                debug!("monitor: {e}");
                return None;
            }
        };
        self.tried.retain(|p| listed.contains(p));
        let candidates: Vec<String> = match &self.config.port_name {
            Some(name) => listed.into_iter().filter(|p| p == name).collect(),
            None => self
                .discovery
                .rank(&listed)
                .into_iter()
                .map(|c| c.name)
                .collect(),
        };
        candidates.into_iter().find(|p| !self.tried.contains(p))
    }

    // ── Connecting ────────────────────────────────────────────────────────────

    async fn connect_cycle(&mut self) -> CycleEnd {
        let retries = self.config.retry_count.max(1);
        let mut last_err = None;
        // Devices that failed in earlier cycles stay out of discovery.
        let skip = self.tried.clone();

        for attempt in 1..=retries {
            self.set_state(ConnectionState::Connecting { attempt }, None);
            match self.open_target(&skip) {
                Ok((link, device)) => {
                    if let Some(c) = self.wait(Duration::from_millis(self.config.settle_ms)).await {
                        drop(link);
                        return CycleEnd::Interrupted(c);
                    }
                    return CycleEnd::Connected(link, device);
                }
                Err(e) => {
                    warn!("connect attempt {attempt}/{retries} failed: {e}");
                    last_err = Some(e);
                }
            }
            if attempt < retries {
                if let Some(c) = self.wait(Duration::from_millis(self.config.retry_delay_ms)).await {
                    return CycleEnd::Interrupted(c);
                }
            }
        }

        let err = last_err.unwrap_or_else(|| {
            FsrError::DiscoveryFailed("no matching serial device could be opened".into())
        });
        error!("giving up after {retries} attempts: {err}");
        self.mark_all_tried();
        self.set_state(ConnectionState::Disconnected, None);
        self.publisher.publish_error(err);
        CycleEnd::Exhausted
    }

    /// Resolve the device name and open it.
    fn open_target(
        &mut self,
        skip: &HashSet<String>,
    ) -> Result<(Box<dyn Link>, String), FsrError> {
        let port = match &self.config.port_name {
            Some(name) => name.clone(),
            None => {
                self.discovery
                    .discover_excluding(self.connector.as_ref(), skip)
                    .ok_or_else(|| {
                        FsrError::DiscoveryFailed(
                            "no matching serial device could be opened".into(),
                        )
                    })?
                    .name
            }
        };
        self.tried.insert(port.clone());
        let timeout = Duration::from_millis(self.config.link.read_timeout_ms);
        let link = self.connector.open(&port, &self.config.link, timeout)?;
        info!("opened {port} at {} baud", self.config.link.baud_rate);
        Ok((link, port))
    }

    fn mark_all_tried(&mut self) {
        match &self.config.port_name {
            Some(name) => {
                self.tried.insert(name.clone());
            }
            None => {
                for c in self.discovery.candidates(self.connector.as_ref()) {
                    self.tried.insert(c.name);
                }
            }
        }
    }

    // ── Connected ─────────────────────────────────────────────────────────────

    /// Line reader, watchdog, liveness check and idle decay for one open link.
    async fn session(&mut self, mut link: Box<dyn Link>, device: String) -> SessionEnd {
        self.set_state(ConnectionState::Connected, Some(device.clone()));
        self.tried.clear();
        self.lines.reset();
        let mut buf = [0u8; READ_CHUNK];

        // Devices the OS never lists (pseudo-terminals, symlinks) rely on
        // read errors alone.
        let track_listing = self.is_listed(&device) == Some(true);
        if !track_listing {
            debug!("{device} is not in the OS listing; liveness relies on reads");
        }

        let mut poll = interval(Duration::from_millis(self.config.read_poll_ms));
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let period = Duration::from_millis(self.config.monitor_interval_ms);
        let mut monitor = interval_at(Instant::now() + period, period);
        monitor.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let data_timeout = Duration::from_millis(self.config.data_timeout_ms);
        let watchdog = sleep(data_timeout);
        tokio::pin!(watchdog);
        let mut stale = false;
        let mut decay = self.decay_timer();

        let end = loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match self.handle_command(cmd, Some(&mut link)) {
                    None => {}
                    Some(Control::Connect(ack)) => ack_connect(ack),
                    Some(c) => break SessionEnd::Interrupted(c),
                },
                _ = poll.tick() => {
                    let n = match read_available(link.as_mut(), &mut buf) {
                        Ok(n) => n,
                        Err(e) => break SessionEnd::Fault(e),
                    };
                    if n == 0 {
                        continue;
                    }
                    for line in self.lines.push(&buf[..n]) {
                        watchdog.as_mut().reset(Instant::now() + data_timeout);
                        stale = false;
                        let _ = self.ingest(&line);
                    }
                }
                _ = &mut watchdog, if !stale => {
                    stale = true;
                    warn!("no data from {device} for {} ms", self.config.data_timeout_ms);
                    self.publisher.publish_error(FsrError::DataStale(self.config.data_timeout_ms));
                }
                _ = monitor.tick(), if track_listing => {
                    if self.is_listed(&device) == Some(false) {
                        break SessionEnd::Fault(FsrError::ReadFault {
                            port: device.clone(),
                            reason: "device no longer listed by the OS".into(),
                        });
                    }
                }
                _ = decay.tick() => self.decay_idle(),
            }
        };

        drop(link);
        info!("closed {device}");
        end
    }

    /// Whether `device` is in the OS listing; `None` if enumeration failed.
    fn is_listed(&self, device: &str) -> Option<bool> {
        match self.connector.available_ports() {
            Ok(ports) => Some(ports.iter().any(|p| p == device)),
            Err(e) => {
                debug!("liveness: {e}");
                None
            }
        }
    }

    /// Decode one line and, if it is a frame, process and publish it.
    fn ingest(&mut self, line: &str) -> Result<(), FsrError> {
        let frame = self
            .decoder
            .decode_at(line, Instant::now().into_std())
            .map_err(|e| {
                debug!("dropped line {line:?}: {e}");
                FsrError::from(e)
            })?;
        let outcome = self.processor.process(frame);
        self.publisher.publish_frame(&outcome);
        Ok(())
    }

    // ── Reconnecting ──────────────────────────────────────────────────────────

    /// Report a fault and wait out the cooldown.  `None` means reconnect now.
    async fn recover(&mut self, err: FsrError) -> Option<Control> {
        warn!("{err}");
        self.publisher.publish_error(err);
        self.set_state(ConnectionState::Reconnecting, None);
        self.wait(Duration::from_millis(self.config.reconnect_cooldown_ms))
            .await
    }
}

/// Acknowledge a connect request that arrived while already connecting or connected.
fn ack_connect(ack: Option<Reply<()>>) {
    if let Some(ack) = ack {
        let _ = ack.send(Ok(()));
    }
}

/// Pull whatever the driver has buffered without blocking.
///
/// Zero available bytes, or a read timeout, is the quiet steady state.
fn read_available(link: &mut dyn Link, buf: &mut [u8]) -> Result<usize, FsrError> {
    let available = match link.bytes_to_read() {
        Ok(n) => n as usize,
        Err(e) => return Err(read_fault(link, e)),
    };
    if available == 0 {
        return Ok(0);
    }
    let want = available.min(buf.len());
    match link.read(&mut buf[..want]) {
        Ok(n) => Ok(n),
        Err(e) if is_quiet_read(&e) => {
            debug!("{}", FsrError::ReadTimeout);
            Ok(0)
        }
        Err(e) => Err(read_fault(link, e)),
    }
}

fn read_fault(link: &dyn Link, e: std::io::Error) -> FsrError {
    FsrError::ReadFault {
        port: link.name().to_string(),
        reason: e.to_string(),
    }
}

fn send_line(link: &mut dyn Link, text: &str) -> Result<(), FsrError> {
    let bytes = encode_command(text)?;
    link.write_all(&bytes)
        .map_err(|e| FsrError::CommandSendFailed(format!("{}: {e}", link.name())))?;
    debug!("sent {text:?} to {}", link.name());
    Ok(())
}

// ── FsrHandle ─────────────────────────────────────────────────────────────────

/// Cloneable handle to a running pipeline.
///
/// Reads (`get_*`, `is_*`, `connection_state`) come from the committed
/// snapshot and never wait on the connection task.  Everything else is a
/// request to the task and fails with [`FsrError::Closed`] after shutdown.
#[derive(Clone)]
pub struct FsrHandle {
    cmd_tx: mpsc::Sender<Command>,
    publisher: Publisher,
}

impl FsrHandle {
    // ── Snapshot reads ────────────────────────────────────────────────────────

    pub fn get_channel(&self, id: usize) -> Result<ChannelState, FsrError> {
        self.publisher
            .snapshot()
            .get(id)
            .cloned()
            .ok_or(FsrError::InvalidChannel(id))
    }

    pub fn get_all_channels(&self) -> [ChannelState; CHANNEL_COUNT] {
        (*self.publisher.snapshot()).clone()
    }

    /// `false` for an out-of-range id.
    pub fn is_active(&self, id: usize) -> bool {
        self.publisher
            .snapshot()
            .get(id)
            .map(|c| c.active)
            .unwrap_or(false)
    }

    pub fn snapshot(&self) -> Snapshot {
        self.publisher.snapshot()
    }

    /// Receiver that wakes whenever a new snapshot is committed.
    pub fn watch(&self) -> watch::Receiver<Snapshot> {
        self.publisher.watch_snapshot()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.publisher.status().state
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state().is_connected()
    }

    /// Device name while connected.
    pub fn bound_device(&self) -> Option<String> {
        self.publisher.status().device
    }

    // ── Subscriptions ─────────────────────────────────────────────────────────

    /// Queue-backed subscription to `kinds`.  Drop it to unsubscribe.
    pub fn subscribe(&self, kinds: &[EventKind]) -> Subscription {
        self.publisher.subscribe(kinds, 1024)
    }

    pub fn subscribe_all(&self) -> Subscription {
        self.subscribe(&EventKind::ALL)
    }

    /// Callback subscription, invoked on the connection task in registration
    /// order.  Stays registered while the returned guard lives.
    pub fn subscribe_fn<F>(&self, kinds: &[EventKind], callback: F) -> SubscriptionGuard
    where
        F: Fn(&FsrEvent) + Send + Sync + 'static,
    {
        self.publisher.subscribe_fn(kinds, callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.publisher.unsubscribe(id)
    }

    // ── Requests ──────────────────────────────────────────────────────────────

    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, FsrError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| FsrError::Closed)?;
        rx.await.map_err(|_| FsrError::Closed)?
    }

    /// Write one line to the device.  Failures are reported, not retried.
    pub async fn send_command(&self, text: &str) -> Result<(), FsrError> {
        let text = text.to_string();
        self.request(|r| Command::Send(text, r)).await
    }

    /// Start a connect cycle and re-enable passive re-discovery.
    pub async fn connect(&self) -> Result<(), FsrError> {
        self.request(Command::Connect).await
    }

    /// Close the link and suspend re-discovery until [`connect`](Self::connect).
    pub async fn disconnect(&self) -> Result<(), FsrError> {
        self.request(Command::Disconnect).await
    }

    pub async fn set_channel_config(&self, id: usize, config: ChannelConfig) -> Result<(), FsrError> {
        self.request(|r| Command::SetChannelConfig(id, Box::new(config), r))
            .await
    }

    /// Zero hold counters for one channel, or all when `id` is `None`.
    pub async fn reset_hold(&self, id: Option<usize>) -> Result<(), FsrError> {
        self.request(|r| Command::ResetHold(id, r)).await
    }

    /// Most recent accepted frames, oldest first.
    pub async fn history(&self) -> Result<Vec<RawFrame>, FsrError> {
        self.request(Command::History).await
    }

    pub async fn clear_history(&self) -> Result<(), FsrError> {
        self.request(Command::ClearHistory).await
    }

    /// Feed a line through the decoder as if the device had sent it.
    pub async fn inject_line(&self, line: &str) -> Result<(), FsrError> {
        let line = line.to_string();
        self.request(|r| Command::InjectLine(line, r)).await
    }

    /// Close the link and stop the connection task.
    pub async fn shutdown(&self) -> Result<(), FsrError> {
        self.request(Command::Shutdown).await
    }
}
