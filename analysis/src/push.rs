//! Push Delivery Layer (C9).
//!
//! Fans parsed frames, detections, status and health out to subscribers with per-subscriber
//! backpressure. Grounded on the WebSocket session/bridge shape of
//! `examples/hdds-team-hdds/tools/hdds-ws/src/session.rs` (a dedicated per-client forwarding
//! task, `RecvError::Lagged` turned into a visible marker rather than a silent drop) adapted from
//! a `broadcast`-backed DDS topic bridge into an explicit bounded deque per subscriber, since
//! spec §4.9 requires dropping from the *middle* of the backlog (oldest non-status first) rather
//! than the refuse-new-sends behavior a plain `mpsc` bound gives you.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio::time::Duration;

pub const DEFAULT_MAX_QUEUE: usize = 1_000;
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Event payload kinds, matching the outbound `type` field of spec §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushPayload {
    Status(serde_json::Value),
    SweepData(serde_json::Value),
    SignalDetected(serde_json::Value),
    Peaks(serde_json::Value),
    ConfigUpdate(serde_json::Value),
    Error(serde_json::Value),
    Heartbeat,
    Degraded(serde_json::Value),
    /// Sent in place of dropped events when a subscriber's backlog overflows; `count` is the
    /// number of non-status events discarded since the last marker.
    Lagged { count: u64 },
}

impl PushPayload {
    fn type_key(&self) -> &'static str {
        match self {
            PushPayload::Status(_) => "status",
            PushPayload::SweepData(_) => "sweep_data",
            PushPayload::SignalDetected(_) => "signal_detected",
            PushPayload::Peaks(_) => "peaks",
            PushPayload::ConfigUpdate(_) => "config_update",
            PushPayload::Error(_) => "error",
            PushPayload::Heartbeat => "heartbeat",
            PushPayload::Degraded(_) => "degraded",
            PushPayload::Lagged { .. } => "lagged",
        }
    }

    /// Status events are exempt from the drop-oldest overflow policy (spec §4.9).
    fn is_status(&self) -> bool {
        matches!(self, PushPayload::Status(_))
    }
}

/// One event as delivered to a subscriber: a payload plus a per-subscriber, per-type monotonic
/// sequence number (spec §4.9 ordering guarantee).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushEvent {
    #[serde(flatten)]
    pub payload: PushPayload,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
}

/// Subscriber-side filter: an empty set means "all event types".
#[derive(Debug, Clone, Default)]
pub struct SubscriptionFilter {
    pub types: Vec<String>,
}

impl SubscriptionFilter {
    pub fn all() -> Self {
        Self { types: Vec::new() }
    }

    fn accepts(&self, payload: &PushPayload) -> bool {
        self.types.is_empty() || self.types.iter().any(|t| t == payload.type_key())
    }
}

struct Backlog {
    queue: VecDeque<PushEvent>,
    non_status_count: usize,
}

struct SubscriberState {
    backlog: Arc<Mutex<Backlog>>,
    notify: Arc<Notify>,
    filter: SubscriptionFilter,
    per_type_seq: HashMap<&'static str, u64>,
    max_queue: usize,
}

/// Droppable entries are plain data events; status events and the lagged marker itself are
/// never candidates for eviction.
fn is_droppable(event: &PushEvent) -> bool {
    !matches!(event.payload, PushPayload::Status(_) | PushPayload::Lagged { .. })
}

/// Removes any existing lagged marker from `queue`, folds its count into `extra_drops`, and
/// re-appends a single consolidated marker at the tail. Keeps exactly one marker live at a time
/// so a burst of drops across several `publish` calls is reported as one cumulative count
/// instead of several partial ones.
fn reconcile_lagged(queue: &mut VecDeque<PushEvent>, extra_drops: u64, now: DateTime<Utc>) {
    let mut pending = extra_drops;
    if let Some(pos) = queue.iter().position(|e| matches!(e.payload, PushPayload::Lagged { .. })) {
        if let PushPayload::Lagged { count } = queue.remove(pos).unwrap().payload {
            pending += count;
        }
    }
    if pending > 0 {
        queue.push_back(PushEvent { payload: PushPayload::Lagged { count: pending }, sequence: 0, timestamp: now });
    }
}

/// Handle returned to a consumer by [`PushHub::subscribe`]. `next()` yields events in arrival
/// order, waking only when the backlog has something to deliver.
pub struct Subscription {
    id: u64,
    backlog: Arc<Mutex<Backlog>>,
    notify: Arc<Notify>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn next(&mut self) -> Option<PushEvent> {
        loop {
            {
                let mut backlog = self.backlog.lock().await;
                if let Some(event) = backlog.queue.pop_front() {
                    if is_droppable(&event) {
                        backlog.non_status_count = backlog.non_status_count.saturating_sub(1);
                    }
                    return Some(event);
                }
            }
            self.notify.notified().await;
        }
    }
}

/// Central fanout point. Owned by the analysis task; every downstream component calls `publish`
/// with a payload and the hub stamps sequence numbers and distributes to all matching
/// subscribers.
pub struct PushHub {
    subscribers: Mutex<HashMap<u64, SubscriberState>>,
    next_id: AtomicU64,
    max_queue: usize,
}

impl PushHub {
    pub fn new(max_queue: usize) -> Self {
        Self { subscribers: Mutex::new(HashMap::new()), next_id: AtomicU64::new(1), max_queue }
    }

    pub async fn subscribe(&self, filter: SubscriptionFilter) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let backlog = Arc::new(Mutex::new(Backlog { queue: VecDeque::new(), non_status_count: 0 }));
        let notify = Arc::new(Notify::new());
        let state = SubscriberState {
            backlog: backlog.clone(),
            notify: notify.clone(),
            filter,
            per_type_seq: HashMap::new(),
            max_queue: self.max_queue,
        };
        self.subscribers.lock().await.insert(id, state);
        Subscription { id, backlog, notify }
    }

    pub async fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().await.remove(&id);
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }

    /// Publishes `payload` to every subscriber whose filter accepts it, applying the per-type
    /// sequence counter and the drop-oldest-non-status overflow policy independently per
    /// subscriber.
    pub async fn publish(&self, payload: PushPayload) {
        let now = Utc::now();
        let mut subscribers = self.subscribers.lock().await;

        for state in subscribers.values_mut() {
            if !state.filter.accepts(&payload) {
                continue;
            }
            let type_key = payload.type_key();
            let seq = state.per_type_seq.entry(type_key).or_insert(0);
            *seq += 1;
            let event = PushEvent { payload: payload.clone(), sequence: *seq, timestamp: now };
            let is_status = event.payload.is_status();

            let mut backlog = state.backlog.lock().await;
            backlog.queue.push_back(event);
            if !is_status {
                backlog.non_status_count += 1;
            }

            let mut new_drops = 0u64;
            while backlog.non_status_count > state.max_queue {
                if let Some(pos) = backlog.queue.iter().position(is_droppable) {
                    backlog.queue.remove(pos);
                    backlog.non_status_count -= 1;
                    new_drops += 1;
                } else {
                    break;
                }
            }
            if new_drops > 0 {
                reconcile_lagged(&mut backlog.queue, new_drops, now);
            }
            drop(backlog);
            state.notify.notify_waiters();
        }
    }

    /// Drives the heartbeat timer until `shutdown` fires. Intended as its own cooperative task
    /// per spec §5 ("one push worker per subscriber... each cooperatively scheduled").
    pub async fn run_heartbeat(self: Arc<Self>, interval: Duration, mut shutdown: tokio::sync::mpsc::Receiver<()>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.publish(PushPayload::Heartbeat).await;
                }
                _ = shutdown.recv() => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(s: &str) -> PushPayload {
        PushPayload::Status(serde_json::json!({ "state": s }))
    }

    fn sweep_data(n: u64) -> PushPayload {
        PushPayload::SweepData(serde_json::json!({ "n": n }))
    }

    #[tokio::test]
    async fn status_events_are_never_dropped() {
        let hub = PushHub::new(4);
        let mut sub = hub.subscribe(SubscriptionFilter::all()).await;

        for i in 0..20u64 {
            hub.publish(status(&i.to_string())).await;
        }
        let mut count = 0;
        while let Ok(Some(_)) = tokio::time::timeout(Duration::from_millis(50), sub.next()).await {
            count += 1;
        }
        assert_eq!(count, 20);
    }

    #[tokio::test]
    async fn filter_excludes_non_matching_types() {
        let hub = PushHub::new(16);
        let mut sub = hub
            .subscribe(SubscriptionFilter { types: vec!["status".to_string()] })
            .await;

        hub.publish(sweep_data(1)).await;
        hub.publish(status("running")).await;

        let event = tokio::time::timeout(Duration::from_millis(50), sub.next())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event.payload, PushPayload::Status(_)));
    }

    #[tokio::test]
    async fn per_type_sequence_is_monotonic() {
        let hub = PushHub::new(16);
        let mut sub = hub.subscribe(SubscriptionFilter::all()).await;

        hub.publish(sweep_data(1)).await;
        hub.publish(sweep_data(2)).await;
        hub.publish(sweep_data(3)).await;

        let mut seqs = Vec::new();
        for _ in 0..3 {
            seqs.push(sub.next().await.unwrap().sequence);
        }
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn s5_subscriber_lag_drops_oldest_non_status_and_marks_count() {
        let hub = PushHub::new(2);
        let mut sub = hub.subscribe(SubscriptionFilter::all()).await;

        for i in 0..5u64 {
            hub.publish(sweep_data(i)).await;
        }

        // Events 0, 1, 2 were evicted to keep the backlog at max_queue=2; 3 and 4 survive,
        // followed by a single consolidated lagged marker.
        let first = sub.next().await.unwrap();
        match first.payload {
            PushPayload::SweepData(v) => assert_eq!(v["n"], 3),
            other => panic!("expected sweep_data, got {other:?}"),
        }
        let second = sub.next().await.unwrap();
        match second.payload {
            PushPayload::SweepData(v) => assert_eq!(v["n"], 4),
            other => panic!("expected sweep_data, got {other:?}"),
        }
        let marker = sub.next().await.unwrap();
        assert!(matches!(marker.payload, PushPayload::Lagged { count: 3 }));
    }

    #[tokio::test]
    async fn reconnecting_subscriber_gets_fresh_status_snapshot() {
        let hub = PushHub::new(16);
        let mut first = hub.subscribe(SubscriptionFilter::all()).await;
        hub.publish(status("running")).await;
        assert!(first.next().await.is_some());
        hub.unsubscribe(first.id()).await;

        let mut second = hub.subscribe(SubscriptionFilter::all()).await;
        hub.publish(status("running")).await;
        let event = second.next().await.unwrap();
        assert_eq!(event.sequence, 1);
    }
}
