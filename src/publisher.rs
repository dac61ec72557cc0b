//! Snapshot storage and ordered event fan-out.
//!
//! The committed channel states live in a [`tokio::sync::watch`] so readers
//! never block the processing path and never observe a half-applied frame.
//! Subscribers live in a registry keyed by a monotonically increasing id;
//! dispatch walks the registry in id order so every consumer sees the same
//! sequence.  The registry lock is released before any sink runs.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};

use crate::channel::FrameOutcome;
use crate::error::FsrError;
use crate::types::{initial_snapshot, ConnectionState, EventKind, FsrEvent, Snapshot};

/// Callback sink signature.  Runs on the connection task; keep it short.
pub type EventCallback = dyn Fn(&FsrEvent) + Send + Sync;

/// Opaque subscriber id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

#[derive(Clone)]
enum Sink {
    Channel(mpsc::Sender<FsrEvent>, Arc<Backlog>),
    Callback(Arc<EventCallback>),
}

/// Overflow bookkeeping for one queue subscriber.
#[derive(Default)]
struct Backlog {
    dropped: AtomicU64,
    /// Set while the queue is full; cleared by the next delivered event.
    lagging: AtomicBool,
}

struct Subscriber {
    kinds: BTreeSet<EventKind>,
    sink: Sink,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribers: BTreeMap<SubscriptionId, Subscriber>,
}

/// Link status mirrored for pull-based queries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkStatus {
    pub state: ConnectionState,
    pub device: Option<String>,
}

// ── Subscription handles ──────────────────────────────────────────────────────

/// Removes its subscriber from the registry when dropped.
pub struct SubscriptionGuard {
    id: SubscriptionId,
    registry: Weak<Mutex<Registry>>,
}

impl SubscriptionGuard {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(reg) = self.registry.upgrade() {
            lock(&reg).subscribers.remove(&self.id);
        }
    }
}

/// A channel-backed subscription.  Dropping it unsubscribes.
pub struct Subscription {
    rx: mpsc::Receiver<FsrEvent>,
    guard: SubscriptionGuard,
    backlog: Arc<Backlog>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.guard.id
    }

    /// Next event, or `None` once the publisher is gone.
    pub async fn recv(&mut self) -> Option<FsrEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<FsrEvent> {
        self.rx.try_recv().ok()
    }

    /// Events discarded because this subscription's queue was full.
    pub fn dropped(&self) -> u64 {
        self.backlog.dropped.load(Ordering::Relaxed)
    }
}

fn lock(reg: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    reg.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ── Publisher ─────────────────────────────────────────────────────────────────

/// Shared between the connection task (writer) and every handle (readers).
#[derive(Clone)]
pub struct Publisher {
    registry: Arc<Mutex<Registry>>,
    snapshot: Arc<watch::Sender<Snapshot>>,
    status: Arc<watch::Sender<LinkStatus>>,
}

impl Publisher {
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(initial_snapshot());
        let (status, _) = watch::channel(LinkStatus::default());
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            snapshot: Arc::new(snapshot),
            status: Arc::new(status),
        }
    }

    // ── Registration ──────────────────────────────────────────────────────────

    fn register(&self, kinds: &[EventKind], sink: Sink) -> SubscriptionGuard {
        let mut reg = lock(&self.registry);
        let id = SubscriptionId(reg.next_id);
        reg.next_id += 1;
        reg.subscribers.insert(
            id,
            Subscriber {
                kinds: kinds.iter().copied().collect(),
                sink,
            },
        );
        debug!("subscriber {id:?} registered for {kinds:?}");
        SubscriptionGuard {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Subscribe to `kinds` through a bounded queue of `capacity` events.
    ///
    /// A subscriber that falls behind loses events rather than stalling the
    /// pipeline.
    pub fn subscribe(&self, kinds: &[EventKind], capacity: usize) -> Subscription {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let backlog = Arc::new(Backlog::default());
        let guard = self.register(kinds, Sink::Channel(tx, Arc::clone(&backlog)));
        Subscription { rx, guard, backlog }
    }

    /// Subscribe a callback.  It stays registered while the guard lives.
    pub fn subscribe_fn<F>(&self, kinds: &[EventKind], callback: F) -> SubscriptionGuard
    where
        F: Fn(&FsrEvent) + Send + Sync + 'static,
    {
        self.register(kinds, Sink::Callback(Arc::new(callback)))
    }

    /// Remove a subscriber by id.  Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        lock(&self.registry).subscribers.remove(&id).is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.registry).subscribers.len()
    }

    // ── Reads ─────────────────────────────────────────────────────────────────

    /// Last committed channel states.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver that wakes on every committed frame.
    pub fn watch_snapshot(&self) -> watch::Receiver<Snapshot> {
        self.snapshot.subscribe()
    }

    pub fn status(&self) -> LinkStatus {
        self.status.borrow().clone()
    }

    // ── Writes (connection task only) ─────────────────────────────────────────

    /// Commit a snapshot without emitting per-channel events.
    pub fn commit(&self, snapshot: Snapshot) {
        self.snapshot.send_replace(snapshot.clone());
        self.dispatch(vec![FsrEvent::AllUpdated(snapshot)]);
    }

    /// Commit a processed frame and emit its events.
    ///
    /// Per channel, in index order: value-changed, activation-changed on an
    /// edge, hold-triggered.  One all-updated closes the frame.
    pub fn publish_frame(&self, outcome: &FrameOutcome) {
        self.snapshot.send_replace(outcome.snapshot.clone());

        let mut events = Vec::with_capacity(outcome.updates.len() * 2 + 1);
        for (channel, (update, state)) in outcome
            .updates
            .iter()
            .zip(outcome.snapshot.iter())
            .enumerate()
        {
            if update.value_changed {
                events.push(FsrEvent::ValueChanged {
                    channel,
                    value: state.shaped,
                });
            }
            if update.activation_changed {
                events.push(FsrEvent::ActivationChanged {
                    channel,
                    active: state.active,
                });
            }
            if update.hold_triggered {
                events.push(FsrEvent::HoldTriggered {
                    channel,
                    current_hold: state.current_hold,
                });
            }
        }
        events.push(FsrEvent::AllUpdated(outcome.snapshot.clone()));
        self.dispatch(events);
    }

    pub fn publish_state(&self, state: ConnectionState, device: Option<String>) {
        self.status.send_replace(LinkStatus {
            state,
            device: device.clone(),
        });
        self.dispatch(vec![FsrEvent::ConnectionStatus { state, device }]);
    }

    pub fn publish_error(&self, err: FsrError) {
        self.dispatch(vec![FsrEvent::Error(err)]);
    }

    fn dispatch(&self, events: Vec<FsrEvent>) {
        let sinks: Vec<(SubscriptionId, BTreeSet<EventKind>, Sink)> = lock(&self.registry)
            .subscribers
            .iter()
            .map(|(id, s)| (*id, s.kinds.clone(), s.sink.clone()))
            .collect();
        if sinks.is_empty() {
            return;
        }

        let mut closed = Vec::new();
        for (id, kinds, sink) in &sinks {
            for event in events.iter().filter(|e| kinds.contains(&e.kind())) {
                match sink {
                    Sink::Callback(f) => f(event),
                    Sink::Channel(tx, backlog) => match tx.try_send(event.clone()) {
                        Ok(()) => {
                            if backlog.lagging.swap(false, Ordering::Relaxed) {
                                info!(
                                    "subscriber {id:?} caught up ({} events dropped so far)",
                                    backlog.dropped.load(Ordering::Relaxed)
                                );
                            }
                        }
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            backlog.dropped.fetch_add(1, Ordering::Relaxed);
                            if !backlog.lagging.swap(true, Ordering::Relaxed) {
                                warn!(
                                    "subscriber {id:?} is lagging; dropping events until it catches up"
                                );
                            }
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            closed.push(*id);
                            break;
                        }
                    },
                }
            }
        }

        if !closed.is_empty() {
            let mut reg = lock(&self.registry);
            for id in closed {
                debug!("subscriber {id:?} closed; removing");
                reg.subscribers.remove(&id);
            }
        }
    }
}

impl Default for Publisher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::channel::{ChannelConfig, FrameProcessor};
    use crate::protocol::CHANNEL_COUNT;
    use crate::types::RawFrame;

    fn processor() -> FrameProcessor {
        FrameProcessor::new(
            std::array::from_fn(|_| ChannelConfig::linear(0.1, 0.05)),
            0,
            Duration::from_secs(1),
        )
    }

    fn frame(samples: [f64; CHANNEL_COUNT]) -> RawFrame {
        RawFrame {
            samples,
            plausible: [true; CHANNEL_COUNT],
            captured_at: Instant::now(),
        }
    }

    fn drain(sub: &mut Subscription) -> Vec<FsrEvent> {
        std::iter::from_fn(|| sub.try_recv()).collect()
    }

    #[test]
    fn frame_events_are_edge_triggered_and_closed_by_batch() {
        let publisher = Publisher::new();
        let mut sub = publisher.subscribe(&EventKind::ALL, 64);
        let mut fp = processor();

        publisher.publish_frame(&fp.process(frame([500.0, 20.0, 20.0, 20.0, 20.0, 20.0])));
        let kinds: Vec<EventKind> = drain(&mut sub).iter().map(FsrEvent::kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::ValueChanged,
                EventKind::ActivationChanged,
                EventKind::ValueChanged,
                EventKind::ValueChanged,
                EventKind::ValueChanged,
                EventKind::ValueChanged,
                EventKind::ValueChanged,
                EventKind::AllUpdated,
            ]
        );

        // Same input: nothing changed, only the batch notification.
        publisher.publish_frame(&fp.process(frame([500.0, 20.0, 20.0, 20.0, 20.0, 20.0])));
        let kinds: Vec<EventKind> = drain(&mut sub).iter().map(FsrEvent::kind).collect();
        assert_eq!(kinds, vec![EventKind::AllUpdated]);
    }

    #[test]
    fn snapshot_is_committed_before_dispatch() {
        let publisher = Publisher::new();
        let reader = publisher.clone();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = Arc::clone(&seen);
        let _guard = publisher.subscribe_fn(&[EventKind::ActivationChanged], move |_| {
            seen_cb.lock().unwrap().push(reader.snapshot()[0].active);
        });
        let mut fp = processor();
        publisher.publish_frame(&fp.process(frame([900.0; CHANNEL_COUNT])));
        assert_eq!(*seen.lock().unwrap(), vec![true; CHANNEL_COUNT]);
    }

    #[test]
    fn filters_by_kind() {
        let publisher = Publisher::new();
        let mut errors = publisher.subscribe(&[EventKind::Error], 8);
        publisher.publish_state(ConnectionState::Connected, Some("COM3".into()));
        publisher.publish_error(FsrError::DataStale(1000));
        let got = drain(&mut errors);
        assert_eq!(got.len(), 1);
        assert!(matches!(got[0], FsrEvent::Error(FsrError::DataStale(1000))));
        assert_eq!(publisher.status().state, ConnectionState::Connected);
        assert_eq!(publisher.status().device.as_deref(), Some("COM3"));
    }

    #[test]
    fn callbacks_run_in_registration_order() {
        let publisher = Publisher::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let guards: Vec<SubscriptionGuard> = (0..3)
            .map(|n| {
                let order = Arc::clone(&order);
                publisher.subscribe_fn(&[EventKind::Error], move |_| order.lock().unwrap().push(n))
            })
            .collect();
        publisher.publish_error(FsrError::NotConnected);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
        drop(guards);
    }

    #[test]
    fn dropping_handles_unsubscribes() {
        let publisher = Publisher::new();
        let sub = publisher.subscribe(&EventKind::ALL, 4);
        let guard = publisher.subscribe_fn(&EventKind::ALL, |_| {});
        assert_eq!(publisher.subscriber_count(), 2);
        drop(sub);
        drop(guard);
        assert_eq!(publisher.subscriber_count(), 0);
    }

    #[test]
    fn explicit_unsubscribe() {
        let publisher = Publisher::new();
        let mut sub = publisher.subscribe(&EventKind::ALL, 4);
        assert!(publisher.unsubscribe(sub.id()));
        assert!(!publisher.unsubscribe(sub.id()));
        publisher.publish_error(FsrError::Closed);
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn lagging_subscriber_does_not_block() {
        let publisher = Publisher::new();
        let mut sub = publisher.subscribe(&[EventKind::Error], 2);
        for _ in 0..5 {
            publisher.publish_error(FsrError::ReadTimeout);
        }
        assert_eq!(drain(&mut sub).len(), 2);
        assert_eq!(sub.dropped(), 3);
        assert_eq!(publisher.subscriber_count(), 1);

        // One lag episode ends with the next delivery; a new one starts counting on.
        publisher.publish_error(FsrError::ReadTimeout);
        assert_eq!(drain(&mut sub).len(), 1);
        for _ in 0..4 {
            publisher.publish_error(FsrError::ReadTimeout);
        }
        assert_eq!(sub.dropped(), 5);
    }

    #[test]
    fn jitter_below_change_threshold_only_emits_batch() {
        let publisher = Publisher::new();
        let mut sub = publisher.subscribe(&EventKind::ALL, 64);
        let mut fp = processor();

        publisher.publish_frame(&fp.process(frame([500.0; CHANNEL_COUNT])));
        drain(&mut sub);

        for raw in [503.0, 498.0, 501.0] {
            publisher.publish_frame(&fp.process(frame([raw; CHANNEL_COUNT])));
            let kinds: Vec<EventKind> = drain(&mut sub).iter().map(FsrEvent::kind).collect();
            assert_eq!(kinds, vec![EventKind::AllUpdated]);
        }
    }
}
