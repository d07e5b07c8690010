// ── Event fan-out bus ──
//
// Typed, multi-subscriber publish/subscribe of session events. Each
// event id is a topic carrying a full payload on `Added` and a smaller
// projection on `Updated`/`Removed`. Delivery is best-effort: a slow
// subscriber drops events rather than blocking publishers; consumers
// that need reliable history rebuild from object-store snapshots plus
// subsequent events.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use crate::model::{
    AdapterEvent, AdapterSnapshot, AuthRequest, DeviceEvent, DeviceSnapshot, ErrorEvent, MediaData,
    ObjectPushData, ObjectPushEvent,
};

/// Default per-action queue depth for a subscriber.
pub const DEFAULT_QUEUE_DEPTH: usize = 32;

/// Identifies one event stream on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventId {
    Error = 1,
    Adapter = 2,
    Device = 3,
    ObjectPush = 4,
    MediaPlayer = 5,
    Authentication = 6,
}

impl EventId {
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Error),
            2 => Some(Self::Adapter),
            3 => Some(Self::Device),
            4 => Some(Self::ObjectPush),
            5 => Some(Self::MediaPlayer),
            6 => Some(Self::Authentication),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Error => "error_event",
            Self::Adapter => "adapter_event",
            Self::Device => "device_event",
            Self::ObjectPush => "file_transfer_event",
            Self::MediaPlayer => "media_player_event",
            Self::Authentication => "authentication_event",
        }
    }
}

/// The action associated with a published event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Added,
    Updated,
    Removed,
}

// ── Topics ──────────────────────────────────────────────────────────

struct SubscriberSlots<N, U> {
    added: mpsc::Sender<N>,
    updated: mpsc::Sender<U>,
    removed: mpsc::Sender<U>,
    done: watch::Sender<bool>,
}

struct TopicInner<N, U> {
    id: EventId,
    enabled: Arc<AtomicBool>,
    next_key: AtomicU64,
    subscribers: DashMap<u64, SubscriberSlots<N, U>>,
}

/// One event stream: publishes `N` payloads for `Added` and `U`
/// projections for `Updated`/`Removed` to every live subscriber.
pub struct Topic<N, U> {
    inner: Arc<TopicInner<N, U>>,
}

impl<N, U> Clone for Topic<N, U> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<N: Clone, U: Clone> Topic<N, U> {
    fn new(id: EventId, enabled: Arc<AtomicBool>) -> Self {
        Self {
            inner: Arc::new(TopicInner {
                id,
                enabled,
                next_key: AtomicU64::new(0),
                subscribers: DashMap::new(),
            }),
        }
    }

    /// Subscribe with the default queue depth.
    pub fn subscribe(&self) -> Subscription<N, U> {
        self.subscribe_with_depth(DEFAULT_QUEUE_DEPTH)
    }

    /// Subscribe with an explicit per-action queue depth.
    ///
    /// When the bus is disabled the returned subscription is already
    /// terminated: its channels are closed and `done` has fired.
    pub fn subscribe_with_depth(&self, depth: usize) -> Subscription<N, U> {
        let (added_tx, added) = mpsc::channel(depth.max(1));
        let (updated_tx, updated) = mpsc::channel(depth.max(1));
        let (removed_tx, removed) = mpsc::channel(depth.max(1));
        let (done_tx, done) = watch::channel(false);

        if !self.inner.enabled.load(Ordering::Acquire) {
            let _ = done_tx.send(true);
            return Subscription {
                added,
                updated,
                removed,
                done,
                key: None,
                topic: Arc::clone(&self.inner),
            };
        }

        let key = self.inner.next_key.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.insert(
            key,
            SubscriberSlots {
                added: added_tx,
                updated: updated_tx,
                removed: removed_tx,
                done: done_tx,
            },
        );

        Subscription {
            added,
            updated,
            removed,
            done,
            key: Some(key),
            topic: Arc::clone(&self.inner),
        }
    }

    /// Publish a full payload with the `Added` action. Never blocks and
    /// never fails; subscribers with a full queue drop the event.
    pub fn publish_added(&self, data: N) {
        if !self.inner.enabled.load(Ordering::Acquire) {
            return;
        }

        for entry in self.inner.subscribers.iter() {
            if entry.value().added.try_send(data.clone()).is_err() {
                tracing::trace!(topic = self.inner.id.name(), "subscriber queue full, dropping");
            }
        }
    }

    /// Publish a projection with the `Updated` action.
    pub fn publish_updated(&self, data: U) {
        self.publish_projection(data, EventKind::Updated);
    }

    /// Publish a projection with the `Removed` action.
    pub fn publish_removed(&self, data: U) {
        self.publish_projection(data, EventKind::Removed);
    }

    fn publish_projection(&self, data: U, kind: EventKind) {
        if !self.inner.enabled.load(Ordering::Acquire) {
            return;
        }

        for entry in self.inner.subscribers.iter() {
            let slot = match kind {
                EventKind::Updated => &entry.value().updated,
                _ => &entry.value().removed,
            };

            if slot.try_send(data.clone()).is_err() {
                tracing::trace!(topic = self.inner.id.name(), "subscriber queue full, dropping");
            }
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    fn close_all(&self) {
        self.inner.subscribers.retain(|_, slots| {
            let _ = slots.done.send(true);
            false
        });
    }
}

/// A handle to one subscriber's queues.
///
/// Dropping the subscription without calling
/// [`unsubscribe`](Subscription::unsubscribe) leaves the sender slots in
/// place until the bus closes; explicit unsubscription is the intended
/// lifecycle.
pub struct Subscription<N, U> {
    /// Full payloads for newly observed objects.
    pub added: mpsc::Receiver<N>,
    /// Projections for in-place object updates.
    pub updated: mpsc::Receiver<U>,
    /// Projections for removed objects.
    pub removed: mpsc::Receiver<U>,
    /// Fires exactly once when the subscription terminates.
    pub done: watch::Receiver<bool>,

    key: Option<u64>,
    topic: Arc<TopicInner<N, U>>,
}

impl<N, U> Subscription<N, U> {
    /// Whether this subscription can still receive events.
    pub fn is_active(&self) -> bool {
        matches!(self.key, Some(key) if self.topic.subscribers.contains_key(&key))
    }

    /// Close this subscriber's channels. Idempotent; later publishes to
    /// it are no-ops and `done` fires exactly once.
    pub fn unsubscribe(&mut self) {
        if let Some(key) = self.key.take() {
            if let Some((_, slots)) = self.topic.subscribers.remove(&key) {
                let _ = slots.done.send(true);
            }
        }
    }
}

// ── Bus ─────────────────────────────────────────────────────────────

/// The session event bus: one topic per event id.
pub struct EventBus {
    enabled: Arc<AtomicBool>,

    pub errors: Topic<ErrorEvent, ErrorEvent>,
    pub adapters: Topic<AdapterSnapshot, AdapterEvent>,
    pub devices: Topic<DeviceSnapshot, DeviceEvent>,
    pub object_push: Topic<ObjectPushData, ObjectPushEvent>,
    pub media: Topic<MediaData, MediaData>,
    pub auth: Topic<AuthRequest, AuthRequest>,
}

impl EventBus {
    pub fn new() -> Self {
        let enabled = Arc::new(AtomicBool::new(true));

        Self {
            errors: Topic::new(EventId::Error, Arc::clone(&enabled)),
            adapters: Topic::new(EventId::Adapter, Arc::clone(&enabled)),
            devices: Topic::new(EventId::Device, Arc::clone(&enabled)),
            object_push: Topic::new(EventId::ObjectPush, Arc::clone(&enabled)),
            media: Topic::new(EventId::MediaPlayer, Arc::clone(&enabled)),
            auth: Topic::new(EventId::Authentication, Arc::clone(&enabled)),
            enabled,
        }
    }

    /// A bus that drops every publish and hands out terminated
    /// subscriptions. Used in tests and headless modes.
    pub fn disabled() -> Self {
        let bus = Self::new();
        bus.disable();
        bus
    }

    /// Convenience: publish an error on the error stream.
    pub fn publish_error(&self, err: &crate::error::Error) {
        self.errors.publish_added(ErrorEvent::from(err));
    }

    /// Terminate every live subscription on every topic. Used on
    /// session teardown; `done` fires for each subscriber.
    pub fn close_all(&self) {
        self.errors.close_all();
        self.adapters.close_all();
        self.devices.close_all();
        self.object_push.close_all();
        self.media.close_all();
        self.auth.close_all();
    }

    /// Install the null behavior: publishes become no-ops, new
    /// subscriptions come back terminated, and existing subscribers get
    /// their `done` signal.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
        self.close_all();
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
