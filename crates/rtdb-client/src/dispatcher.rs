// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Request/response correlation over one transport.
//!
//! ```text
//!   call() ──┐                                     ┌──► oneshot (caller)
//!   call() ──┼──► writer mutex ──► socket ──► read loop ──┤
//!   call() ──┘                                     └──► event ingress (pipeline)
//! ```
//!
//! Each call registers a pending entry keyed by its correlation id before the
//! request is written. The read loop removes the entry when the reply arrives
//! and completes the caller's oneshot. A call that times out moves its id to
//! an expiry list so a reply arriving later is recognised, counted and
//! dropped instead of being reported as unsolicited.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::error::{ProtocolError, RtdbError, RtdbResult, TimeoutError};
use crate::protocol::{Frame, FrameKind, Opcode};
use crate::transport::Transport;

/// How long a timed-out correlation id is remembered.
const EXPIRED_RETENTION: Duration = Duration::from_secs(300);

// =============================================================================
// Call timeouts
// =============================================================================

/// Deadlines applied to one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallTimeouts {
    /// Maximum time to write the request.
    pub send: Duration,
    /// Maximum time to wait for the reply after writing.
    pub recv: Duration,
}

// =============================================================================
// DisconnectReason
// =============================================================================

/// Why the read loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// [`Dispatcher::close`] was called.
    Local,
    /// The server closed the connection.
    PeerClosed,
    /// A read or decode error ended the connection.
    Failed(String),
}

impl DisconnectReason {
    /// Returns `true` if the disconnect was not requested locally.
    pub fn is_unexpected(&self) -> bool {
        !matches!(self, Self::Local)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "closed locally"),
            Self::PeerClosed => write!(f, "closed by peer"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Dispatcher counters, shared by every transport a session uses.
#[derive(Debug, Default)]
pub struct AtomicDispatcherStats {
    calls: AtomicU64,
    timeouts: AtomicU64,
    late_replies: AtomicU64,
    unsolicited: AtomicU64,
    events_forwarded: AtomicU64,
}

impl AtomicDispatcherStats {
    /// Takes a snapshot of the counters.
    pub fn snapshot(&self) -> DispatcherStats {
        DispatcherStats {
            calls: self.calls.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            late_replies: self.late_replies.load(Ordering::Relaxed),
            unsolicited: self.unsolicited.load(Ordering::Relaxed),
            events_forwarded: self.events_forwarded.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of dispatcher counters.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    /// Calls issued.
    pub calls: u64,
    /// Calls that timed out waiting for a reply.
    pub timeouts: u64,
    /// Replies that arrived after their call timed out.
    pub late_replies: u64,
    /// Frames that matched no pending or expired call.
    pub unsolicited: u64,
    /// Event frames handed to the pipeline.
    pub events_forwarded: u64,
}

// =============================================================================
// Dispatcher
// =============================================================================

type ReplySender = oneshot::Sender<RtdbResult<Frame>>;

/// Correlates concurrent calls with their replies on one transport.
pub struct Dispatcher {
    transport: Arc<Transport>,
    pending: DashMap<u32, ReplySender>,
    expired: DashMap<u32, Instant>,
    next_id: AtomicU32,
    closed: AtomicBool,
    stats: Arc<AtomicDispatcherStats>,
}

impl Dispatcher {
    /// Creates a dispatcher over `transport`.
    pub fn new(transport: Arc<Transport>, stats: Arc<AtomicDispatcherStats>) -> Self {
        Self {
            transport,
            pending: DashMap::new(),
            expired: DashMap::new(),
            next_id: AtomicU32::new(1),
            closed: AtomicBool::new(false),
            stats,
        }
    }

    /// Returns the underlying transport.
    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    /// Returns the number of calls awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Returns `true` once the dispatcher no longer accepts calls.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Sends a request and waits for the matching reply.
    ///
    /// The returned frame may carry a non-success status; translating it is
    /// up to the caller. Only the caller's wait is cancelled on timeout.
    pub async fn call(
        &self,
        opcode: Opcode,
        payload: Bytes,
        timeouts: CallTimeouts,
    ) -> RtdbResult<Frame> {
        if self.is_closed() {
            return Err(RtdbError::closed("connection closed"));
        }

        let correlation_id = self.next_correlation_id();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(correlation_id, tx);
        let _pending = PendingGuard {
            dispatcher: self,
            correlation_id,
        };

        // close() may have drained the table between the check and the insert.
        if self.is_closed() {
            return Err(RtdbError::closed("connection closed"));
        }

        self.stats.calls.fetch_add(1, Ordering::Relaxed);
        trace!(opcode = %opcode, correlation_id, "Dispatching call");

        let frame = Frame::request(opcode, correlation_id, payload);
        self.transport.send(frame, timeouts.send).await?;

        match tokio::time::timeout(timeouts.recv, rx).await {
            Ok(Ok(Ok(reply))) => {
                if reply.opcode != opcode {
                    return Err(ProtocolError::UnexpectedReply {
                        expected: opcode.to_string(),
                        actual: reply.opcode.to_string(),
                    }
                    .into());
                }
                Ok(reply)
            }
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(RtdbError::closed("connection closed")),
            Err(_) => {
                self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                debug!(opcode = %opcode, correlation_id, timeout = ?timeouts.recv, "Call timed out");
                Err(TimeoutError::call(opcode.name(), timeouts.recv).into())
            }
        }
    }

    /// Runs the read loop until the transport closes.
    ///
    /// Event frames go to `events`. When the loop ends every pending call
    /// fails with [`RtdbError::Closed`].
    pub async fn run(self: Arc<Self>, events: mpsc::Sender<Bytes>) -> DisconnectReason {
        let reason = loop {
            match self.transport.receive().await {
                Ok(frame) => self.route(frame, &events).await,
                Err(e) => {
                    break if self.is_closed() {
                        DisconnectReason::Local
                    } else if e.is_closed() {
                        DisconnectReason::PeerClosed
                    } else {
                        warn!(
                            endpoint = %self.transport.endpoint(),
                            error = %e,
                            "Read loop failed"
                        );
                        DisconnectReason::Failed(e.to_string())
                    };
                }
            }
        };

        self.closed.store(true, Ordering::Release);
        self.fail_pending(&format!("connection {reason}"));
        debug!(endpoint = %self.transport.endpoint(), reason = %reason, "Read loop stopped");
        reason
    }

    /// Stops accepting calls, closes the transport and fails pending calls.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.transport.close().await;
        self.fail_pending("connection closed");
    }

    /// Stops accepting calls without awaiting. The read loop fails the
    /// pending calls as it exits.
    pub fn abort(&self) {
        self.closed.store(true, Ordering::Release);
        self.transport.abort();
    }

    async fn route(&self, frame: Frame, events: &mpsc::Sender<Bytes>) {
        match frame.kind {
            FrameKind::Response => {
                let correlation_id = frame.correlation_id;
                if let Some((_, tx)) = self.pending.remove(&correlation_id) {
                    if tx.send(Ok(frame)).is_err() {
                        // Caller future was dropped before the reply arrived.
                        self.stats.late_replies.fetch_add(1, Ordering::Relaxed);
                    }
                } else if self.expired.remove(&correlation_id).is_some() {
                    self.stats.late_replies.fetch_add(1, Ordering::Relaxed);
                    debug!(correlation_id, "Discarding reply to timed-out call");
                } else {
                    self.stats.unsolicited.fetch_add(1, Ordering::Relaxed);
                    warn!(correlation_id, opcode = %frame.opcode, "Reply matches no pending call");
                }
            }
            FrameKind::Event if frame.opcode == Opcode::EventBatch => {
                self.stats.events_forwarded.fetch_add(1, Ordering::Relaxed);
                if events.send(frame.payload).await.is_err() {
                    debug!("Event pipeline stopped, dropping batch");
                }
            }
            FrameKind::Event | FrameKind::Request => {
                self.stats.unsolicited.fetch_add(1, Ordering::Relaxed);
                warn!(kind = ?frame.kind, opcode = %frame.opcode, "Ignoring unexpected frame");
            }
        }
    }

    fn fail_pending(&self, reason: &str) {
        let ids: Vec<u32> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, tx)) = self.pending.remove(&id) {
                let _ = tx.send(Err(RtdbError::closed(reason.to_string())));
            }
        }
        self.expired.clear();
    }

    fn remember_expired(&self, correlation_id: u32) {
        let now = Instant::now();
        self.expired
            .retain(|_, at| now.duration_since(*at) < EXPIRED_RETENTION);
        self.expired.insert(correlation_id, now);
    }

    fn next_correlation_id(&self) -> u32 {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            // Zero is reserved for event frames.
            if id != 0 && !self.pending.contains_key(&id) {
                return id;
            }
        }
    }
}

/// Drops a call's pending entry when the call ends, including when its
/// future is dropped. A reply arriving later counts as late.
struct PendingGuard<'a> {
    dispatcher: &'a Dispatcher,
    correlation_id: u32,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.dispatcher.pending.remove(&self.correlation_id).is_some() {
            self.dispatcher.remember_expired(self.correlation_id);
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("endpoint", self.transport.endpoint())
            .field("pending", &self.pending.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::SessionOptions;
    use crate::protocol::FrameCodec;
    use crate::types::Endpoint;
    use futures::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio_util::codec::Framed;

    const TIMEOUTS: CallTimeouts = CallTimeouts {
        send: Duration::from_secs(1),
        recv: Duration::from_millis(200),
    };

    async fn connect_pair() -> (Arc<Dispatcher>, Framed<tokio::net::TcpStream, FrameCodec>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });

        let transport = Transport::connect(&Endpoint::new("127.0.0.1", port), &SessionOptions::default())
            .await
            .unwrap();
        let server = Framed::new(accept.await.unwrap(), FrameCodec::new());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(transport),
            Arc::new(AtomicDispatcherStats::default()),
        ));
        (dispatcher, server)
    }

    #[tokio::test]
    async fn test_late_reply_is_discarded() {
        let (dispatcher, mut server) = connect_pair().await;
        let (events_tx, _events_rx) = mpsc::channel(4);
        let read_loop = tokio::spawn(dispatcher.clone().run(events_tx));

        let err = dispatcher
            .call(Opcode::Echo, Bytes::from_static(b"slow"), TIMEOUTS)
            .await
            .unwrap_err();
        assert!(matches!(err, RtdbError::Timeout(TimeoutError::Call { .. })));

        let request = server.next().await.unwrap().unwrap();
        server
            .send(Frame::response(Opcode::Echo, request.correlation_id, 0, request.payload))
            .await
            .unwrap();

        // A fresh call still works and gets its own reply.
        let call = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher
                    .call(Opcode::Echo, Bytes::from_static(b"next"), TIMEOUTS)
                    .await
            })
        };
        let request = server.next().await.unwrap().unwrap();
        server
            .send(Frame::response(Opcode::Echo, request.correlation_id, 0, request.payload))
            .await
            .unwrap();
        let reply = call.await.unwrap().unwrap();
        assert_eq!(&reply.payload[..], b"next");

        let stats = dispatcher.stats.snapshot();
        assert_eq!(stats.timeouts, 1);
        assert_eq!(stats.late_replies, 1);
        assert_eq!(stats.unsolicited, 0);

        dispatcher.close().await;
        assert_eq!(read_loop.await.unwrap(), DisconnectReason::Local);
    }

    #[tokio::test]
    async fn test_close_fails_pending_calls() {
        let (dispatcher, _server) = connect_pair().await;
        let (events_tx, _events_rx) = mpsc::channel(4);
        let _read_loop = tokio::spawn(dispatcher.clone().run(events_tx));

        let call = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher
                    .call(
                        Opcode::Echo,
                        Bytes::new(),
                        CallTimeouts {
                            send: Duration::from_secs(1),
                            recv: Duration::from_secs(30),
                        },
                    )
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(dispatcher.pending_count(), 1);
        dispatcher.close().await;

        let result = tokio::time::timeout(Duration::from_secs(1), call)
            .await
            .unwrap()
            .unwrap();
        assert!(result.unwrap_err().is_closed());

        let err = dispatcher
            .call(Opcode::Echo, Bytes::new(), TIMEOUTS)
            .await
            .unwrap_err();
        assert!(err.is_closed());
    }

    #[tokio::test]
    async fn test_events_forwarded_to_ingress() {
        let (dispatcher, mut server) = connect_pair().await;
        let (events_tx, mut events_rx) = mpsc::channel(4);
        let read_loop = tokio::spawn(dispatcher.clone().run(events_tx));

        server
            .send(Frame::event(Opcode::EventBatch, Bytes::from_static(b"batch")))
            .await
            .unwrap();
        let payload = events_rx.recv().await.unwrap();
        assert_eq!(&payload[..], b"batch");

        drop(server);
        assert_eq!(read_loop.await.unwrap(), DisconnectReason::PeerClosed);
        assert!(dispatcher.is_closed());
    }

    #[tokio::test]
    async fn test_dropped_call_releases_pending_entry() {
        let (dispatcher, mut server) = connect_pair().await;
        let (events_tx, _events_rx) = mpsc::channel(4);
        let _read_loop = tokio::spawn(dispatcher.clone().run(events_tx));

        let slow = CallTimeouts {
            send: Duration::from_secs(1),
            recv: Duration::from_secs(30),
        };
        tokio::select! {
            _ = dispatcher.call(Opcode::Echo, Bytes::from_static(b"abandoned"), slow) => {
                panic!("The server never answers");
            }
            _ = tokio::time::sleep(Duration::from_millis(50)) => {}
        }
        assert_eq!(dispatcher.pending_count(), 0);

        // The reply to the abandoned call counts as late, not unsolicited.
        let request = server.next().await.unwrap().unwrap();
        server
            .send(Frame::response(Opcode::Echo, request.correlation_id, 0, request.payload))
            .await
            .unwrap();
        let call = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher
                    .call(Opcode::Echo, Bytes::from_static(b"next"), TIMEOUTS)
                    .await
            })
        };
        let request = server.next().await.unwrap().unwrap();
        server
            .send(Frame::response(Opcode::Echo, request.correlation_id, 0, request.payload))
            .await
            .unwrap();
        assert_eq!(&call.await.unwrap().unwrap().payload[..], b"next");

        let stats = dispatcher.stats.snapshot();
        assert_eq!(stats.late_replies, 1);
        assert_eq!(stats.unsolicited, 0);
        assert_eq!(stats.timeouts, 0);
    }
}
