// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Event delivery pipeline.
//!
//! # Architecture
//!
//! ```text
//!  read loop ──► ingress (bounded) ──► router task
//!                                         │ decode + route by server handle
//!                         ┌───────────────┼───────────────┐
//!                         ▼               ▼               ▼
//!                   queue (sub#1)   queue (sub#2)   queue (sub#3)
//!                         │               │               │
//!                   delivery task   delivery task   delivery task
//!                         │               │               │
//!                     EventSink       EventSink       EventSink
//! ```
//!
//! The read loop only blocks when the ingress is full. Per-subscription
//! queues are unbounded, so a slow sink grows its own backlog (logged past a
//! threshold) without holding up other subscriptions or protocol reads.
//!
//! Batches reach a sink in the order the server sent them. Closing a
//! subscription discards its backlog: only a batch the sink is already
//! handling when `unsubscribe` runs completes, then the sink sees
//! `on_closed`.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::PipelineConfig;
use crate::error::{ProtocolError, RtdbError, RtdbResult};
use crate::protocol::{EventBatchPayload, EventKind};
use crate::subscription::{
    DeliveryCounters, RouteResult, SubscriptionEntry, SubscriptionManager,
};
use crate::types::{ConnectionHandle, Quality, SubscriptionHandle, TagId, TimestampPrecision};

// =============================================================================
// SampleBatch
// =============================================================================

/// A decoded batch of samples for one subscription.
///
/// Arrays are parallel and always of equal length.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBatch {
    kind: EventKind,
    session: ConnectionHandle,
    subscription: SubscriptionHandle,
    precision: TimestampPrecision,
    ids: Vec<TagId>,
    positions: Vec<Option<usize>>,
    datetimes: Vec<i64>,
    subtimes: Vec<i32>,
    values: Vec<f64>,
    status: Vec<i64>,
    qualities: Vec<Quality>,
    errors: Vec<i32>,
}

impl SampleBatch {
    /// Returns the batch kind.
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Returns the owning session.
    pub fn session(&self) -> ConnectionHandle {
        self.session
    }

    /// Returns the subscription the batch belongs to.
    pub fn subscription(&self) -> SubscriptionHandle {
        self.subscription
    }

    /// Returns the precision of [`subtimes`](Self::subtimes).
    pub fn precision(&self) -> TimestampPrecision {
        self.precision
    }

    /// Returns the number of samples.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns `true` if the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Tag ids.
    pub fn ids(&self) -> &[TagId] {
        &self.ids
    }

    /// Index of each sample in the caller's subscribe list.
    pub fn positions(&self) -> &[Option<usize>] {
        &self.positions
    }

    /// Seconds since the Unix epoch.
    pub fn datetimes(&self) -> &[i64] {
        &self.datetimes
    }

    /// Sub-second parts.
    pub fn subtimes(&self) -> &[i32] {
        &self.subtimes
    }

    /// Values.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Status codes.
    pub fn status(&self) -> &[i64] {
        &self.status
    }

    /// Quality flags.
    pub fn qualities(&self) -> &[Quality] {
        &self.qualities
    }

    /// Per-item error codes.
    pub fn errors(&self) -> &[i32] {
        &self.errors
    }

    /// Returns the sample at `index`.
    pub fn get(&self, index: usize) -> Option<Sample> {
        if index >= self.len() {
            return None;
        }
        Some(Sample {
            tag_id: self.ids[index],
            position: self.positions[index],
            datetime: self.datetimes[index],
            subtime: self.subtimes[index],
            value: self.values[index],
            status: self.status[index],
            quality: self.qualities[index],
            error: self.errors[index],
            precision: self.precision,
        })
    }

    /// Iterates over the samples.
    pub fn iter(&self) -> impl Iterator<Item = Sample> + '_ {
        (0..self.len()).filter_map(move |index| self.get(index))
    }
}

/// One sample of a [`SampleBatch`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Tag id.
    pub tag_id: TagId,
    /// Index in the caller's subscribe list.
    pub position: Option<usize>,
    /// Seconds since the Unix epoch.
    pub datetime: i64,
    /// Sub-second part.
    pub subtime: i32,
    /// Value.
    pub value: f64,
    /// Status code.
    pub status: i64,
    /// Quality flag.
    pub quality: Quality,
    /// Per-item error code, zero when the item is good.
    pub error: i32,
    /// Precision of `subtime`.
    pub precision: TimestampPrecision,
}

impl Sample {
    /// Returns the sample time, if representable.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp(self.datetime, self.precision.to_nanos(self.subtime))
    }

    /// Returns `true` if the server reported no per-item error.
    pub fn is_ok(&self) -> bool {
        self.error == 0
    }
}

// =============================================================================
// Decoding
// =============================================================================

/// Decodes a pushed batch and checks that its arrays line up.
pub fn decode_event_batch(payload: Bytes) -> RtdbResult<EventBatchPayload> {
    let batch = EventBatchPayload::decode(payload)?;
    let expected = batch.ids.len();
    let lengths = [
        ("datetimes", batch.datetimes.len()),
        ("subtimes", batch.subtimes.len()),
        ("values", batch.values.len()),
        ("status", batch.status.len()),
        ("qualities", batch.qualities.len()),
        ("errors", batch.errors.len()),
    ];
    for (field, actual) in lengths {
        if actual != expected {
            return Err(ProtocolError::length_mismatch(field, expected, actual).into());
        }
    }
    Ok(batch)
}

fn build_batch(
    raw: EventBatchPayload,
    entry: &SubscriptionEntry,
    precision: TimestampPrecision,
) -> SampleBatch {
    let ids: Vec<TagId> = raw.ids.into_iter().map(TagId).collect();
    let positions = entry.correlate(&ids);
    SampleBatch {
        kind: raw.kind,
        session: entry.session(),
        subscription: entry.handle(),
        precision,
        ids,
        positions,
        datetimes: raw.datetimes,
        subtimes: raw.subtimes,
        values: raw.values,
        status: raw.status,
        qualities: raw.qualities.into_iter().map(Quality).collect(),
        errors: raw.errors,
    }
}

// =============================================================================
// Sinks
// =============================================================================

/// Item queued for a subscription's delivery task.
#[derive(Debug)]
pub enum Delivery {
    /// A decoded batch.
    Batch(SampleBatch),
    /// A batch that could not be decoded.
    Error(RtdbError),
}

/// Sending side of a subscription's delivery task.
#[derive(Debug, Clone)]
pub struct DeliveryQueue {
    tx: mpsc::UnboundedSender<Delivery>,
    closed: CancellationToken,
}

impl DeliveryQueue {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Delivery>) -> Self {
        Self {
            tx,
            closed: CancellationToken::new(),
        }
    }

    /// Queues an item. Returns `false` once closed.
    pub fn send(&self, item: Delivery) -> bool {
        !self.closed.is_cancelled() && self.tx.send(item).is_ok()
    }

    /// Stops delivery; queued items are discarded.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Returns `true` once closed.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

/// Receiver of pushed samples.
///
/// Methods run on the subscription's own delivery task, one call at a time.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Called for every decoded batch, in server order.
    async fn on_batch(&self, batch: SampleBatch);

    /// Called when a batch for this subscription was rejected.
    async fn on_error(&self, subscription: SubscriptionHandle, error: RtdbError) {
        warn!(subscription = %subscription, error = %error, "Batch rejected");
    }

    /// Called once after the last item when the subscription ends.
    async fn on_closed(&self, _subscription: SubscriptionHandle) {}
}

/// Event emitted by a [`ChannelSink`].
#[derive(Debug)]
pub enum SinkEvent {
    /// A decoded batch.
    Batch(SampleBatch),
    /// A rejected batch.
    Error {
        /// Subscription.
        subscription: SubscriptionHandle,
        /// Decode error.
        error: RtdbError,
    },
    /// The subscription ended.
    Closed(SubscriptionHandle),
}

/// Sink that forwards everything into a bounded channel.
///
/// A full channel slows only this subscription's delivery task.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<SinkEvent>,
}

impl ChannelSink {
    /// Creates a sink and the receiver that drains it.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<SinkEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn on_batch(&self, batch: SampleBatch) {
        if self.tx.send(SinkEvent::Batch(batch)).await.is_err() {
            trace!("Sink receiver dropped");
        }
    }

    async fn on_error(&self, subscription: SubscriptionHandle, error: RtdbError) {
        let _ = self
            .tx
            .send(SinkEvent::Error {
                subscription,
                error,
            })
            .await;
    }

    async fn on_closed(&self, subscription: SubscriptionHandle) {
        let _ = self.tx.send(SinkEvent::Closed(subscription)).await;
    }
}

/// Sink backed by a closure receiving each batch.
pub struct FnSink<F> {
    f: F,
}

impl<F> FnSink<F>
where
    F: Fn(SampleBatch) + Send + Sync,
{
    /// Wraps a closure.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> EventSink for FnSink<F>
where
    F: Fn(SampleBatch) + Send + Sync,
{
    async fn on_batch(&self, batch: SampleBatch) {
        (self.f)(batch);
    }
}

/// Wraps a closure as a shareable sink.
pub fn sink_fn<F>(f: F) -> Arc<dyn EventSink>
where
    F: Fn(SampleBatch) + Send + Sync + 'static,
{
    Arc::new(FnSink::new(f))
}

// =============================================================================
// Statistics
// =============================================================================

#[derive(Debug, Default)]
struct AtomicPipelineStats {
    received: AtomicU64,
    routed: AtomicU64,
    decode_failures: AtomicU64,
    dropped: AtomicU64,
}

/// Snapshot of pipeline counters.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    /// Batches received from the read loop.
    pub received: u64,
    /// Batches queued for a subscription.
    pub routed: u64,
    /// Batches rejected by decoding.
    pub decode_failures: u64,
    /// Batches with no matching subscription.
    pub dropped: u64,
}

// =============================================================================
// EventPipeline
// =============================================================================

/// Routes pushed batches to subscription sinks.
///
/// One pipeline lives as long as its session and survives reconnects: each
/// new dispatcher feeds the same [`ingress`](Self::ingress).
pub struct EventPipeline {
    ingress: mpsc::Sender<Bytes>,
    config: PipelineConfig,
    core: Arc<RouterCore>,
    cancel: CancellationToken,
    router: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl EventPipeline {
    /// Starts the router task.
    pub fn start(
        config: PipelineConfig,
        subscriptions: Arc<SubscriptionManager>,
        precision: Arc<RwLock<TimestampPrecision>>,
    ) -> Self {
        let (ingress, rx) = mpsc::channel(config.ingress_capacity.max(1));
        let cancel = CancellationToken::new();

        let core = Arc::new(RouterCore {
            subscriptions,
            precision,
            stats: AtomicPipelineStats::default(),
            backlog_warn: config.sink_backlog_warn,
        });
        let task = tokio::spawn(core.clone().run(rx, cancel.clone()));

        Self {
            ingress,
            config,
            core,
            cancel,
            router: parking_lot::Mutex::new(Some(task)),
        }
    }

    /// Returns a sender for raw batch payloads.
    pub fn ingress(&self) -> mpsc::Sender<Bytes> {
        self.ingress.clone()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Spawns the delivery task for a new subscription and returns its queue.
    ///
    /// Once the queue is closed the task stops before the next item, drops
    /// whatever is still queued and calls `on_closed`.
    pub fn spawn_delivery(
        &self,
        subscription: SubscriptionHandle,
        sink: Arc<dyn EventSink>,
        counters: Arc<DeliveryCounters>,
    ) -> DeliveryQueue {
        let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();
        let queue = DeliveryQueue::new(tx);
        let closed = queue.closed.clone();

        tokio::spawn(async move {
            loop {
                let item = tokio::select! {
                    biased;
                    _ = closed.cancelled() => break,
                    item = rx.recv() => match item {
                        Some(item) => item,
                        None => break,
                    },
                };
                match item {
                    Delivery::Batch(batch) => {
                        sink.on_batch(batch).await;
                        counters.delivered.fetch_add(1, Ordering::Relaxed);
                    }
                    Delivery::Error(error) => {
                        sink.on_error(subscription, error).await;
                        counters.errors.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }

            rx.close();
            let mut discarded = 0u64;
            while rx.try_recv().is_ok() {
                discarded += 1;
            }
            if discarded > 0 {
                counters.discarded.fetch_add(discarded, Ordering::Relaxed);
                debug!(subscription = %subscription, discarded, "Discarded queued batches");
            }

            sink.on_closed(subscription).await;
            trace!(subscription = %subscription, "Delivery task finished");
        });
        queue
    }

    /// Registers a subscription, delivering any batches that arrived for it
    /// before registration.
    pub fn register(&self, entry: Arc<SubscriptionEntry>) -> RtdbResult<()> {
        let core = &self.core;
        core.subscriptions.register_with(entry, |entry, parked| {
            for payload in parked {
                core.deliver(entry, payload);
            }
        })
    }

    /// Moves a subscription to a new server handle, delivering parked
    /// batches first.
    pub fn rebind(&self, handle: SubscriptionHandle, server_handle: u32) -> RtdbResult<()> {
        let core = &self.core;
        core.subscriptions
            .rebind_with(handle, server_handle, |entry, parked| {
                for payload in parked {
                    core.deliver(entry, payload);
                }
            })
    }

    /// Returns current statistics.
    pub fn stats(&self) -> PipelineStats {
        let stats = &self.core.stats;
        PipelineStats {
            received: stats.received.load(Ordering::Relaxed),
            routed: stats.routed.load(Ordering::Relaxed),
            decode_failures: stats.decode_failures.load(Ordering::Relaxed),
            dropped: stats.dropped.load(Ordering::Relaxed),
        }
    }

    /// Stops the router after it drains what is already queued.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self.router.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Event router task failed");
            }
        }
    }
}

impl fmt::Debug for EventPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventPipeline")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Drop for EventPipeline {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct RouterCore {
    subscriptions: Arc<SubscriptionManager>,
    precision: Arc<RwLock<TimestampPrecision>>,
    stats: AtomicPipelineStats,
    backlog_warn: usize,
}

impl RouterCore {
    async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<Bytes>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                payload = rx.recv() => match payload {
                    Some(payload) => self.handle(payload),
                    None => break,
                },
                _ = cancel.cancelled() => {
                    while let Ok(payload) = rx.try_recv() {
                        self.handle(payload);
                    }
                    break;
                }
            }
        }
        debug!("Event router stopped");
    }

    fn handle(&self, payload: Bytes) {
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        let Some(server_handle) = EventBatchPayload::peek_server_handle(&payload) else {
            self.stats.decode_failures.fetch_add(1, Ordering::Relaxed);
            warn!(len = payload.len(), "Batch too short to carry a subscription handle");
            return;
        };

        match self.subscriptions.route_or_park(server_handle, &payload) {
            RouteResult::Routed(entry) => self.deliver(&entry, payload),
            RouteResult::Parked => {
                trace!(server_handle, "Parked batch for in-flight subscribe");
            }
            RouteResult::Unrouted => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(server_handle, "No subscription for batch");
            }
        }
    }

    /// Decodes a batch already matched to `entry` and queues the result.
    fn deliver(&self, entry: &SubscriptionEntry, payload: Bytes) {
        let item = match decode_event_batch(payload) {
            Ok(raw) => {
                let precision = *self.precision.read();
                let batch = build_batch(raw, entry, precision);
                trace!(subscription = %entry.handle(), samples = batch.len(), "Routing batch");
                Delivery::Batch(batch)
            }
            Err(error) => {
                self.stats.decode_failures.fetch_add(1, Ordering::Relaxed);
                debug!(subscription = %entry.handle(), error = %error, "Rejecting batch");
                Delivery::Error(error)
            }
        };
        self.enqueue(entry, item);
    }

    fn enqueue(&self, entry: &SubscriptionEntry, item: Delivery) {
        if !entry.push(item) {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.stats.routed.fetch_add(1, Ordering::Relaxed);

        let backlog = entry.counters().backlog();
        if self.backlog_warn > 0 && backlog as usize == self.backlog_warn {
            warn!(
                subscription = %entry.handle(),
                backlog,
                "Sink is falling behind"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SubscribeWhat;
    use std::time::Duration;

    fn payload(server_handle: u32, ids: &[i32], values: &[f64]) -> EventBatchPayload {
        let n = ids.len();
        EventBatchPayload {
            server_handle,
            kind: EventKind::Snapshot,
            ids: ids.to_vec(),
            datetimes: vec![1_700_000_000; n],
            subtimes: vec![500; n],
            values: values.to_vec(),
            status: vec![0; n],
            qualities: vec![0; n],
            errors: vec![0; n],
        }
    }

    #[test]
    fn test_decode_rejects_length_mismatch() {
        let bytes = payload(1, &[1, 2, 3], &[1.0, 2.0]).encode();
        let err = decode_event_batch(bytes).unwrap_err();
        assert!(matches!(
            err,
            RtdbError::Protocol(ProtocolError::LengthMismatch {
                field: "values",
                expected: 3,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_decode_accepts_empty_batch() {
        let batch = decode_event_batch(payload(1, &[], &[]).encode()).unwrap();
        assert!(batch.ids.is_empty());
    }

    #[test]
    fn test_sample_timestamp() {
        let sample = Sample {
            tag_id: TagId(1),
            position: Some(0),
            datetime: 1_700_000_000,
            subtime: 250,
            value: 1.0,
            status: 0,
            quality: Quality::GOOD,
            error: 0,
            precision: TimestampPrecision::Milliseconds,
        };
        let ts = sample.timestamp().unwrap();
        assert_eq!(ts.timestamp(), 1_700_000_000);
        assert_eq!(ts.timestamp_subsec_millis(), 250);
    }

    #[tokio::test]
    async fn test_router_delivers_in_order_and_isolates_bad_batch() {
        let subscriptions = Arc::new(SubscriptionManager::new());
        let pipeline = EventPipeline::start(
            PipelineConfig::default(),
            subscriptions.clone(),
            Arc::new(RwLock::new(TimestampPrecision::Milliseconds)),
        );

        let (sink, mut events) = ChannelSink::new(16);
        let handle = subscriptions.allocate_handle();
        let counters = Arc::new(DeliveryCounters::default());
        let queue = pipeline.spawn_delivery(handle, Arc::new(sink), counters.clone());
        let entry = Arc::new(SubscriptionEntry::new(
            handle,
            ConnectionHandle(3),
            &[TagId(10), TagId(20), TagId(10)],
            SubscribeWhat::ALL,
            99,
            queue,
            counters,
        ));
        pipeline.register(entry).unwrap();

        let ingress = pipeline.ingress();
        ingress
            .send(payload(99, &[10, 20, 10], &[1.0, 2.0, 3.0]).encode())
            .await
            .unwrap();
        ingress.send(payload(99, &[10], &[]).encode()).await.unwrap();
        ingress
            .send(payload(99, &[20], &[4.0]).encode())
            .await
            .unwrap();

        let first = match events.recv().await.unwrap() {
            SinkEvent::Batch(batch) => batch,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(first.session(), ConnectionHandle(3));
        assert_eq!(first.positions(), &[Some(0), Some(1), Some(2)]);
        assert_eq!(first.values(), &[1.0, 2.0, 3.0]);

        assert!(matches!(
            events.recv().await.unwrap(),
            SinkEvent::Error {
                error: RtdbError::Protocol(ProtocolError::LengthMismatch { .. }),
                ..
            }
        ));

        let third = match events.recv().await.unwrap() {
            SinkEvent::Batch(batch) => batch,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(third.values(), &[4.0]);

        subscriptions.remove(handle).unwrap();
        let closed = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(closed, SinkEvent::Closed(h) if h == handle));

        pipeline.shutdown().await;
        let stats = pipeline.stats();
        assert_eq!(stats.received, 3);
        assert_eq!(stats.decode_failures, 1);
        assert_eq!(stats.routed, 3);
    }

    struct SlowSink {
        delay: Duration,
        batches: AtomicU64,
        closed: CancellationToken,
    }

    #[async_trait]
    impl EventSink for SlowSink {
        async fn on_batch(&self, _batch: SampleBatch) {
            tokio::time::sleep(self.delay).await;
            self.batches.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_closed(&self, _subscription: SubscriptionHandle) {
            self.closed.cancel();
        }
    }

    #[tokio::test]
    async fn test_unsubscribe_discards_backlog() {
        let subscriptions = Arc::new(SubscriptionManager::new());
        let pipeline = EventPipeline::start(
            PipelineConfig::default(),
            subscriptions.clone(),
            Arc::new(RwLock::new(TimestampPrecision::Milliseconds)),
        );

        let sink = Arc::new(SlowSink {
            delay: Duration::from_millis(50),
            batches: AtomicU64::new(0),
            closed: CancellationToken::new(),
        });
        let handle = subscriptions.allocate_handle();
        let counters = Arc::new(DeliveryCounters::default());
        let queue = pipeline.spawn_delivery(handle, sink.clone(), counters.clone());
        let entry = Arc::new(SubscriptionEntry::new(
            handle,
            ConnectionHandle(1),
            &[TagId(1)],
            SubscribeWhat::ALL,
            42,
            queue,
            counters.clone(),
        ));
        pipeline.register(entry).unwrap();

        let ingress = pipeline.ingress();
        for i in 0..10 {
            ingress
                .send(payload(42, &[1], &[f64::from(i)]).encode())
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        let before = sink.batches.load(Ordering::SeqCst);
        subscriptions.remove(handle).unwrap();
        tokio::time::timeout(Duration::from_secs(1), sink.closed.cancelled())
            .await
            .unwrap();

        let after = sink.batches.load(Ordering::SeqCst);
        assert!(after - before <= 1, "{} batches after unsubscribe", after - before);
        assert_eq!(counters.backlog(), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(sink.batches.load(Ordering::SeqCst), after);
        pipeline.shutdown().await;
    }
}
