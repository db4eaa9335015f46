// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Mock Server
//!
//! In-process tag database server speaking the client's wire protocol.
//!
//! ## Capabilities
//!
//! - Password login with a per-user permission group
//! - Resume tokens, rotated on every successful resume
//! - Subscriptions with globally unique server handles
//! - Echo replies delivered in random order (`shuffle_echo`)
//! - Holding every reply for a chosen opcode
//! - Pushing well-formed or malformed event batches
//! - Dropping all connections to simulate network loss

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rand::Rng;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use rtdb_client::protocol::{
    ConnectionCountReply, ConnectionCountRequest, EventBatchPayload, EventKind, Frame, FrameCodec,
    FrameKind, LoginReply, LoginRequest, Opcode, ResumeRequest, SetOptionRequest, SubscribeReply,
    SubscribeRequest, UnsubscribeRequest, PRECISION_UNSPECIFIED,
};
use rtdb_client::{PermissionGroup, StatusCode};

/// Seconds since the epoch stamped on pushed samples.
pub const SAMPLE_EPOCH_SECS: i64 = 1_700_000_000;

// =============================================================================
// Configuration
// =============================================================================

/// Mock server behaviour.
#[derive(Debug, Clone)]
pub struct MockServerConfig {
    /// Accepted users: name -> (password, permission group).
    pub users: HashMap<String, (String, PermissionGroup)>,
    /// OS type reported at login.
    pub os_type: u8,
    /// Maximum blob length reported at login.
    pub max_blob_len: u32,
    /// Precision byte reported at login; `PRECISION_UNSPECIFIED` for none.
    pub precision: u8,
    /// Delay echo replies by a random amount so they complete out of order.
    pub shuffle_echo: bool,
    /// Upper bound of the random echo delay.
    pub max_echo_delay: Duration,
    /// Fixed delay added to every echo reply.
    pub echo_delay: Duration,
    /// Push a snapshot batch before answering each subscribe.
    pub snapshot_before_reply: bool,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        let mut users = HashMap::new();
        users.insert(
            "operator".to_string(),
            ("secret".to_string(), PermissionGroup::DataSource),
        );
        users.insert(
            "admin".to_string(),
            ("admin-pass".to_string(), PermissionGroup::SystemAdmin),
        );
        Self {
            users,
            os_type: 2,
            max_blob_len: 65_535,
            precision: 0,
            shuffle_echo: false,
            max_echo_delay: Duration::from_millis(20),
            echo_delay: Duration::ZERO,
            snapshot_before_reply: false,
        }
    }
}

impl MockServerConfig {
    /// Enables randomized echo completion order.
    pub fn shuffled(mut self) -> Self {
        self.shuffle_echo = true;
        self
    }

    /// Delays every echo reply by `delay`.
    pub fn with_echo_delay(mut self, delay: Duration) -> Self {
        self.echo_delay = delay;
        self
    }

    /// Pushes a snapshot ahead of every subscribe reply.
    pub fn with_early_snapshot(mut self) -> Self {
        self.snapshot_before_reply = true;
        self
    }

    /// Reports no precision at login.
    pub fn without_precision(mut self) -> Self {
        self.precision = PRECISION_UNSPECIFIED;
        self
    }
}

// =============================================================================
// Counters
// =============================================================================

/// Requests handled by the server.
#[derive(Debug, Default)]
pub struct MockCounters {
    /// Successful logins.
    pub logins: AtomicU64,
    /// Successful resumes.
    pub resumes: AtomicU64,
    /// Subscribe requests accepted.
    pub subscribes: AtomicU64,
    /// Unsubscribe requests received.
    pub unsubscribes: AtomicU64,
    /// Logout requests received.
    pub logouts: AtomicU64,
    /// Connections accepted.
    pub connections: AtomicU64,
}

impl MockCounters {
    /// Loads a counter.
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Server state
// =============================================================================

#[derive(Debug, Clone)]
struct ServerSubscription {
    connection: u64,
    ids: Vec<i32>,
}

struct Connection {
    tx: mpsc::UnboundedSender<Frame>,
    cancel: CancellationToken,
    authenticated: bool,
}

struct ServerState {
    config: MockServerConfig,
    counters: MockCounters,
    next_connection: AtomicU64,
    next_session: AtomicU64,
    next_server_handle: AtomicU32,
    tokens: Mutex<HashMap<Bytes, (u64, PermissionGroup)>>,
    subscriptions: Mutex<HashMap<u32, ServerSubscription>>,
    connections: Mutex<HashMap<u64, Connection>>,
    held: Mutex<HashSet<Opcode>>,
    reject_resume: AtomicBool,
}

// =============================================================================
// MockServer
// =============================================================================

/// A running mock server. Stops when dropped.
pub struct MockServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    cancel: CancellationToken,
}

impl MockServer {
    /// Starts a server with default behaviour on an ephemeral port.
    pub async fn start() -> Self {
        Self::start_with(MockServerConfig::default()).await
    }

    /// Starts a server with `config`.
    pub async fn start_with(config: MockServerConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock server");
        let addr = listener.local_addr().expect("Failed to read local address");

        let state = Arc::new(ServerState {
            config,
            counters: MockCounters::default(),
            next_connection: AtomicU64::new(1),
            next_session: AtomicU64::new(1000),
            next_server_handle: AtomicU32::new(100),
            tokens: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            connections: Mutex::new(HashMap::new()),
            held: Mutex::new(HashSet::new()),
            reject_resume: AtomicBool::new(false),
        });
        let cancel = CancellationToken::new();

        tokio::spawn(accept_loop(listener, state.clone(), cancel.clone()));
        debug!(addr = %addr, "Mock server listening");

        Self {
            addr,
            state,
            cancel,
        }
    }

    /// Returns the listening address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Returns the host to log into.
    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    /// Returns the port in the client's raw form.
    pub fn port(&self) -> i32 {
        i32::from(self.addr.port())
    }

    /// Returns request counters.
    pub fn counters(&self) -> &MockCounters {
        &self.state.counters
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        self.state.connections.lock().len()
    }

    /// Stops answering requests with `opcode` until [`release`](Self::release).
    pub fn hold(&self, opcode: Opcode) {
        self.state.held.lock().insert(opcode);
    }

    /// Resumes answering `opcode`. Requests held so far stay unanswered.
    pub fn release(&self, opcode: Opcode) {
        self.state.held.lock().remove(&opcode);
    }

    /// Makes every following resume fail with an auth error.
    pub fn reject_resumes(&self, reject: bool) {
        self.state.reject_resume.store(reject, Ordering::SeqCst);
    }

    /// Server handles currently subscribed, with their tag ids.
    pub fn subscriptions(&self) -> Vec<(u32, Vec<i32>)> {
        let mut subs: Vec<_> = self
            .state
            .subscriptions
            .lock()
            .iter()
            .map(|(handle, sub)| (*handle, sub.ids.clone()))
            .collect();
        subs.sort_by_key(|(handle, _)| *handle);
        subs
    }

    /// Pushes a change batch carrying `samples` as `(tag id, value)` pairs.
    ///
    /// Returns `false` if the server handle is unknown.
    pub fn push_samples(&self, server_handle: u32, samples: &[(i32, f64)]) -> bool {
        let payload = change_batch(server_handle, samples);
        self.push_payload(server_handle, &payload)
    }

    /// Pushes an arbitrary batch, including malformed ones.
    pub fn push_payload(&self, server_handle: u32, payload: &EventBatchPayload) -> bool {
        let connection = match self.state.subscriptions.lock().get(&server_handle) {
            Some(sub) => sub.connection,
            None => return false,
        };
        self.state.send_to(connection, Frame::event(Opcode::EventBatch, payload.encode()))
    }

    /// Closes every open connection.
    pub fn drop_connections(&self) {
        let connections = self.state.connections.lock();
        for connection in connections.values() {
            connection.cancel.cancel();
        }
        debug!(count = connections.len(), "Mock server dropping connections");
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Builds a well-formed change batch.
pub fn change_batch(server_handle: u32, samples: &[(i32, f64)]) -> EventBatchPayload {
    batch(server_handle, EventKind::Change, samples)
}

fn batch(server_handle: u32, kind: EventKind, samples: &[(i32, f64)]) -> EventBatchPayload {
    let n = samples.len();
    EventBatchPayload {
        server_handle,
        kind,
        ids: samples.iter().map(|(id, _)| *id).collect(),
        datetimes: vec![SAMPLE_EPOCH_SECS; n],
        subtimes: (0..n as i32).collect(),
        values: samples.iter().map(|(_, value)| *value).collect(),
        status: vec![0; n],
        qualities: vec![0; n],
        errors: vec![0; n],
    }
}

// =============================================================================
// Connection handling
// =============================================================================

async fn accept_loop(listener: TcpListener, state: Arc<ServerState>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    trace!(peer = %peer, "Mock server accepted connection");
                    tokio::spawn(serve(state.clone(), stream, cancel.child_token()));
                }
                Err(_) => break,
            },
        }
    }
}

async fn serve(state: Arc<ServerState>, stream: TcpStream, cancel: CancellationToken) {
    let id = state.next_connection.fetch_add(1, Ordering::SeqCst);
    state.counters.connections.fetch_add(1, Ordering::SeqCst);

    let (mut sink, mut frames) = Framed::new(stream, FrameCodec::new()).split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();
    state.connections.lock().insert(
        id,
        Connection {
            tx: tx.clone(),
            cancel: cancel.clone(),
            authenticated: false,
        },
    );

    let writer_cancel = cancel.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = writer_cancel.cancelled() => break,
                next = rx.recv() => match next {
                    Some(frame) => {
                        if sink.send(frame).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    });

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            next = frames.next() => match next {
                Some(Ok(frame)) if frame.kind == FrameKind::Request => {
                    state.handle(id, frame, &tx);
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => break,
            },
        }
    }

    cancel.cancel();
    state.disconnect(id);
    // The socket closes once both halves are dropped.
    let _ = writer.await;
    drop(frames);
}

impl ServerState {
    fn send_to(&self, connection: u64, frame: Frame) -> bool {
        match self.connections.lock().get(&connection) {
            Some(conn) => conn.tx.send(frame).is_ok(),
            None => false,
        }
    }

    fn disconnect(&self, connection: u64) {
        self.connections.lock().remove(&connection);
        self.subscriptions
            .lock()
            .retain(|_, sub| sub.connection != connection);
    }

    fn is_authenticated(&self, connection: u64) -> bool {
        self.connections
            .lock()
            .get(&connection)
            .map(|c| c.authenticated)
            .unwrap_or(false)
    }

    fn authenticate(&self, connection: u64) {
        if let Some(conn) = self.connections.lock().get_mut(&connection) {
            conn.authenticated = true;
        }
    }

    fn issue_token(&self, session_id: u64, permission: PermissionGroup) -> Bytes {
        let token: [u8; 16] = rand::thread_rng().gen();
        let token = Bytes::copy_from_slice(&token);
        self.tokens
            .lock()
            .insert(token.clone(), (session_id, permission));
        token
    }

    fn login_reply(&self, session_id: u64, permission: PermissionGroup, token: Bytes) -> Bytes {
        LoginReply {
            session_id,
            os_type: self.config.os_type,
            max_blob_len: self.config.max_blob_len,
            permission: permission as u8,
            precision: self.config.precision,
            resume_token: token,
        }
        .encode()
        .expect("Failed to encode login reply")
    }

    fn handle(&self, connection: u64, request: Frame, tx: &mpsc::UnboundedSender<Frame>) {
        let opcode = request.opcode;
        let correlation_id = request.correlation_id;

        if self.held.lock().contains(&opcode) {
            trace!(opcode = %opcode, correlation_id, "Holding request");
            return;
        }

        let reply = |status: StatusCode, payload: Bytes| {
            Frame::response(opcode, correlation_id, status.as_i32(), payload)
        };

        let response = match opcode {
            Opcode::Login => self.on_login(connection, request.payload),
            Opcode::Resume => self.on_resume(connection, request.payload),
            _ if !self.is_authenticated(connection) => (StatusCode::AuthFailed, Bytes::new()),
            Opcode::Logout => {
                self.counters.logouts.fetch_add(1, Ordering::SeqCst);
                (StatusCode::Success, Bytes::new())
            }
            Opcode::SetOption => match SetOptionRequest::decode(request.payload) {
                Ok(_) => (StatusCode::Success, Bytes::new()),
                Err(_) => (StatusCode::InvalidParameter, Bytes::new()),
            },
            Opcode::ConnectionCount => match ConnectionCountRequest::decode(request.payload) {
                Ok(_) => {
                    let count = self
                        .connections
                        .lock()
                        .values()
                        .filter(|c| c.authenticated)
                        .count() as i32;
                    (StatusCode::Success, ConnectionCountReply { count }.encode())
                }
                Err(_) => (StatusCode::InvalidParameter, Bytes::new()),
            },
            Opcode::Echo => {
                let frame = reply(StatusCode::Success, request.payload);
                let mut delay = self.config.echo_delay;
                if self.config.shuffle_echo {
                    let max = self.config.max_echo_delay.as_millis().max(1) as u64;
                    delay += Duration::from_millis(rand::thread_rng().gen_range(0..=max));
                }
                if !delay.is_zero() {
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = tx.send(frame);
                    });
                } else {
                    let _ = tx.send(frame);
                }
                return;
            }
            Opcode::Subscribe => self.on_subscribe(connection, request.payload, tx),
            Opcode::Unsubscribe => match UnsubscribeRequest::decode(request.payload) {
                Ok(req) => {
                    self.counters.unsubscribes.fetch_add(1, Ordering::SeqCst);
                    match self.subscriptions.lock().remove(&req.server_handle) {
                        Some(_) => (StatusCode::Success, Bytes::new()),
                        None => (StatusCode::NotFound, Bytes::new()),
                    }
                }
                Err(_) => (StatusCode::InvalidParameter, Bytes::new()),
            },
            Opcode::EventBatch => (StatusCode::Protocol, Bytes::new()),
        };

        let (status, payload) = response;
        let _ = tx.send(reply(status, payload));
    }

    fn on_login(&self, connection: u64, payload: Bytes) -> (StatusCode, Bytes) {
        let Ok(request) = LoginRequest::decode(payload) else {
            return (StatusCode::InvalidParameter, Bytes::new());
        };
        let permission = match self.config.users.get(&request.user) {
            Some((password, permission)) if *password == request.password => *permission,
            _ => return (StatusCode::AuthFailed, Bytes::new()),
        };

        let session_id = self.next_session.fetch_add(1, Ordering::SeqCst);
        let token = self.issue_token(session_id, permission);
        self.authenticate(connection);
        self.counters.logins.fetch_add(1, Ordering::SeqCst);
        (
            StatusCode::Success,
            self.login_reply(session_id, permission, token),
        )
    }

    fn on_resume(&self, connection: u64, payload: Bytes) -> (StatusCode, Bytes) {
        let Ok(request) = ResumeRequest::decode(payload) else {
            return (StatusCode::InvalidParameter, Bytes::new());
        };
        if self.reject_resume.load(Ordering::SeqCst) {
            return (StatusCode::AuthFailed, Bytes::new());
        }
        let Some((session_id, permission)) = self.tokens.lock().remove(&request.token) else {
            return (StatusCode::AuthFailed, Bytes::new());
        };

        let token = self.issue_token(session_id, permission);
        self.authenticate(connection);
        self.counters.resumes.fetch_add(1, Ordering::SeqCst);
        (
            StatusCode::Success,
            self.login_reply(session_id, permission, token),
        )
    }

    fn on_subscribe(
        &self,
        connection: u64,
        payload: Bytes,
        tx: &mpsc::UnboundedSender<Frame>,
    ) -> (StatusCode, Bytes) {
        let Ok(request) = SubscribeRequest::decode(payload) else {
            return (StatusCode::InvalidParameter, Bytes::new());
        };
        if request.ids.is_empty() || request.ids.iter().any(|id| *id <= 0) {
            return (StatusCode::InvalidParameter, Bytes::new());
        }

        let server_handle = self.next_server_handle.fetch_add(1, Ordering::SeqCst);
        self.subscriptions.lock().insert(
            server_handle,
            ServerSubscription {
                connection,
                ids: request.ids.clone(),
            },
        );
        self.counters.subscribes.fetch_add(1, Ordering::SeqCst);

        if self.config.snapshot_before_reply {
            let samples: Vec<(i32, f64)> =
                request.ids.iter().map(|id| (*id, f64::from(*id))).collect();
            let snapshot = batch(server_handle, EventKind::Snapshot, &samples);
            let _ = tx.send(Frame::event(Opcode::EventBatch, snapshot.encode()));
        }

        (StatusCode::Success, SubscribeReply { server_handle }.encode())
    }
}
