// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Authenticated sessions.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Session                            │
//! │                                                              │
//! │  request() ──► Dispatcher ──► Transport ──► server           │
//! │                    │                                         │
//! │                    └── read loop ──► EventPipeline ──► sinks │
//! │                                                              │
//! │  supervisor: watches the read loop, reconnects or closes     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! A session owns one dispatcher at a time. With auto-reconnect enabled a
//! lost transport is replaced: the supervisor reconnects with backoff,
//! resumes with the token handed out at login and re-creates every
//! subscription under its existing handle. Without auto-reconnect, or when
//! the server refuses the resume, the session closes.
//!
//! Closed is terminal. Every operation on a closed session fails with
//! [`RtdbError::Closed`]; a second logout fails with
//! [`RtdbError::AlreadyClosed`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, ReconnectConfig};
use crate::dispatcher::{
    AtomicDispatcherStats, CallTimeouts, DisconnectReason, Dispatcher, DispatcherStats,
};
use crate::error::{AuthError, NetworkError, ProtocolError, RtdbError, RtdbResult, StatusCode};
use crate::options::{SessionOption, SessionOptions};
use crate::pipeline::{EventPipeline, EventSink, PipelineStats};
use crate::protocol::{
    ConnectionCountReply, ConnectionCountRequest, Frame, LoginReply, LoginRequest, Opcode,
    ResumeRequest, SetOptionRequest, SubscribeReply, SubscribeRequest, UnsubscribeRequest,
    PRECISION_UNSPECIFIED,
};
use crate::registry::ConnectionRegistry;
use crate::subscription::{
    DeliveryCounters, SubscriptionEntry, SubscriptionInfo, SubscriptionManager,
};
use crate::transport::Transport;
use crate::types::{
    ConnectionHandle, Credentials, Endpoint, PermissionGroup, SessionInfo, SubscribeWhat,
    SubscriptionHandle, TagId, TimestampPrecision,
};

/// Upper bound on how long logout waits for the server's reply.
const LOGOUT_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// SessionState
// =============================================================================

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Logged in and usable.
    #[default]
    Active,

    /// The transport was lost and a reconnect is in progress.
    Reconnecting,

    /// Logout or teardown is in progress.
    Closing,

    /// The session is closed. Terminal.
    Closed,
}

impl SessionState {
    /// Returns `true` if the session accepts requests.
    #[inline]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Returns `true` while a reconnect is in progress.
    #[inline]
    pub fn is_reconnecting(&self) -> bool {
        matches!(self, Self::Reconnecting)
    }

    /// Returns `true` once logout or teardown has started.
    #[inline]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Reconnecting => "reconnecting",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

// =============================================================================
// SessionStats
// =============================================================================

/// Statistics for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Request/response counters, accumulated across reconnects.
    pub dispatcher: DispatcherStats,
    /// Event routing counters.
    pub pipeline: PipelineStats,
    /// Successful reconnects.
    pub reconnects: u64,
    /// Live subscriptions.
    pub subscriptions: usize,
}

// =============================================================================
// Session
// =============================================================================

/// An authenticated session with a server.
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    handle: ConnectionHandle,
    endpoint: Endpoint,
    user: String,
    info: RwLock<SessionInfo>,
    options: RwLock<SessionOptions>,
    precision: Arc<RwLock<TimestampPrecision>>,
    state: RwLock<SessionState>,
    link: RwLock<Option<Arc<Dispatcher>>>,
    resume_token: Mutex<Bytes>,
    subscriptions: Arc<SubscriptionManager>,
    pipeline: EventPipeline,
    reconnect: ReconnectConfig,
    stats: Arc<AtomicDispatcherStats>,
    reconnects: AtomicU64,
    registry: Weak<ConnectionRegistry>,
    shutdown: CancellationToken,
}

impl Session {
    /// Connects, authenticates and registers a new session.
    pub(crate) async fn login(
        registry: &Arc<ConnectionRegistry>,
        endpoint: Endpoint,
        credentials: &Credentials,
        config: &ClientConfig,
    ) -> RtdbResult<Self> {
        let options = config.options.clone();
        options.validate()?;

        info!(endpoint = %endpoint, user = credentials.user(), "Logging in");

        let transport = Arc::new(Transport::connect(&endpoint, &options).await?);
        let subscriptions = Arc::new(SubscriptionManager::new());
        let precision = Arc::new(RwLock::new(options.default_precision));
        let pipeline = EventPipeline::start(
            config.pipeline.clone(),
            subscriptions.clone(),
            precision.clone(),
        );
        let stats = Arc::new(AtomicDispatcherStats::default());
        let dispatcher = Arc::new(Dispatcher::new(transport, stats.clone()));
        let read_loop = tokio::spawn(dispatcher.clone().run(pipeline.ingress()));

        let reply = match authenticate(&dispatcher, credentials, &options).await {
            Ok(reply) => reply,
            Err(e) => {
                e.log("login");
                dispatcher.close().await;
                pipeline.shutdown().await;
                return Err(e);
            }
        };

        let (info, effective) = match session_info(&reply, &options) {
            Ok(negotiated) => negotiated,
            Err(e) => {
                dispatcher.close().await;
                pipeline.shutdown().await;
                return Err(e);
            }
        };

        let mut options = options;
        options.server_precision = effective;
        *precision.write() = effective;

        let handle = registry.allocate_handle();
        let inner = Arc::new(SessionInner {
            handle,
            endpoint,
            user: credentials.user().to_string(),
            info: RwLock::new(info),
            options: RwLock::new(options),
            precision,
            state: RwLock::new(SessionState::Active),
            link: RwLock::new(Some(dispatcher)),
            resume_token: Mutex::new(reply.resume_token.clone()),
            subscriptions,
            pipeline,
            reconnect: config.reconnect.clone(),
            stats,
            reconnects: AtomicU64::new(0),
            registry: Arc::downgrade(registry),
            shutdown: CancellationToken::new(),
        });

        let session = Self { inner };
        if let Err(e) = registry.register(session.clone()) {
            *session.inner.state.write() = SessionState::Closed;
            session.inner.release(false).await;
            return Err(e);
        }

        tokio::spawn(supervise(
            Arc::downgrade(&session.inner),
            read_loop,
            session.inner.shutdown.clone(),
        ));

        info!(
            handle = %handle,
            endpoint = %session.inner.endpoint,
            session_id = reply.session_id,
            permission = %session.inner.info.read().permission,
            precision = %effective,
            "Session established"
        );
        Ok(session)
    }

    /// Logs out and closes the session.
    ///
    /// Subscriptions are cancelled first. The logout request is best-effort:
    /// a failure to send it is logged and the session closes anyway.
    pub async fn logout(&self) -> RtdbResult<()> {
        {
            let mut state = self.inner.state.write();
            if state.is_closed() {
                return Err(RtdbError::AlreadyClosed);
            }
            *state = SessionState::Closing;
        }

        info!(handle = %self.inner.handle, "Logging out");
        self.inner.close(true).await;
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Returns the connection handle.
    pub fn handle(&self) -> ConnectionHandle {
        self.inner.handle
    }

    /// Returns the server endpoint.
    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    /// Returns the authenticated user.
    pub fn user(&self) -> &str {
        &self.inner.user
    }

    /// Returns the attributes negotiated at login.
    pub fn info(&self) -> SessionInfo {
        self.inner.info.read().clone()
    }

    /// Returns the granted permission group.
    pub fn permission(&self) -> PermissionGroup {
        self.inner.info.read().permission
    }

    /// Returns the current state.
    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    /// Returns `true` while the session accepts requests.
    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// Returns the precision applied to event timestamps.
    pub fn precision(&self) -> TimestampPrecision {
        *self.inner.precision.read()
    }

    /// Returns the number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.len()
    }

    /// Returns a snapshot of every live subscription, ordered by handle.
    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.inner
            .subscriptions
            .snapshot()
            .iter()
            .map(|entry| entry.info())
            .collect()
    }

    /// Returns session statistics.
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            dispatcher: self.inner.stats.snapshot(),
            pipeline: self.inner.pipeline.stats(),
            reconnects: self.inner.reconnects.load(Ordering::Relaxed),
            subscriptions: self.inner.subscriptions.len(),
        }
    }

    // =========================================================================
    // Options
    // =========================================================================

    /// Reads an option.
    pub fn get_option(&self, option: SessionOption) -> RtdbResult<i64> {
        self.inner.ensure_open()?;
        Ok(self.inner.options.read().get(option))
    }

    /// Changes an option.
    ///
    /// Timeouts apply to the next request; connect and user timeouts apply
    /// to the next transport. Changing the server precision is negotiated
    /// with the server before it takes effect.
    pub async fn set_option(&self, option: SessionOption, value: i64) -> RtdbResult<()> {
        self.inner.ensure_open()?;

        let mut candidate = self.inner.options.read().clone();
        candidate.set(option, value)?;
        candidate.validate()?;

        if option == SessionOption::ServerPrecision {
            let request = SetOptionRequest {
                option: option as i32 as u32,
                value,
            };
            self.inner.request(Opcode::SetOption, request.encode()).await?;
        }

        let mut options = self.inner.options.write();
        options.set(option, value)?;
        match option {
            SessionOption::ServerPrecision => {
                *self.inner.precision.write() = options.server_precision;
                self.inner.info.write().server_precision = Some(options.server_precision);
            }
            SessionOption::DefaultPrecision
                if self.inner.info.read().server_precision.is_none() =>
            {
                options.server_precision = options.default_precision;
                *self.inner.precision.write() = options.default_precision;
            }
            _ => {}
        }

        debug!(handle = %self.inner.handle, option = %option, value, "Option updated");
        Ok(())
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Asks the server how many connections match `filter`.
    pub async fn connection_count(&self, filter: i32) -> RtdbResult<i32> {
        let request = ConnectionCountRequest { filter };
        let reply = self
            .inner
            .request(Opcode::ConnectionCount, request.encode())
            .await?;
        Ok(ConnectionCountReply::decode(reply.payload)?.count)
    }

    /// Round-trips `payload` through the server.
    pub async fn ping(&self, payload: Bytes) -> RtdbResult<Bytes> {
        let reply = self.inner.request(Opcode::Echo, payload).await?;
        Ok(reply.payload)
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Subscribes to `tag_ids` and delivers their batches to `sink`.
    ///
    /// The id list may contain duplicates; every sample is correlated back
    /// to the position it was requested at.
    pub async fn subscribe(
        &self,
        tag_ids: &[TagId],
        what: SubscribeWhat,
        sink: Arc<dyn EventSink>,
    ) -> RtdbResult<SubscriptionHandle> {
        if tag_ids.is_empty() {
            return Err(RtdbError::invalid_tag("tag id list is empty"));
        }
        self.inner.ensure_open()?;

        let inner = &self.inner;
        let _in_flight = inner.subscriptions.begin_subscribe();

        let request = SubscribeRequest {
            what: what.bits(),
            ids: tag_ids.iter().map(|id| id.0).collect(),
        };
        let reply = match inner.request(Opcode::Subscribe, request.encode()).await {
            Ok(reply) => reply,
            Err(RtdbError::InvalidParameter { .. }) | Err(RtdbError::NotFound { .. }) => {
                return Err(RtdbError::invalid_tag(format!(
                    "server rejected {} tag id(s)",
                    tag_ids.len()
                )));
            }
            Err(e) => return Err(e),
        };
        let server_handle = SubscribeReply::decode(reply.payload)?.server_handle;

        let handle = inner.subscriptions.allocate_handle();
        let counters = Arc::new(DeliveryCounters::default());
        let queue = inner.pipeline.spawn_delivery(handle, sink, counters.clone());
        let entry = Arc::new(SubscriptionEntry::new(
            handle,
            inner.handle,
            tag_ids,
            what,
            server_handle,
            queue,
            counters,
        ));

        if let Err(e) = inner.pipeline.register(entry.clone()) {
            entry.close();
            inner.release_server_subscription(server_handle).await;
            return Err(e);
        }

        // Logout may have swept the table while the reply was in flight.
        if inner.state().is_closed() {
            let _ = inner.subscriptions.remove(handle);
            return Err(RtdbError::closed("session closed during subscribe"));
        }

        debug!(
            handle = %inner.handle,
            subscription = %handle,
            server_handle,
            tags = tag_ids.len(),
            "Subscribed"
        );
        Ok(handle)
    }

    /// Cancels a subscription.
    ///
    /// The subscription is removed locally even if the server cannot be
    /// told; that failure is logged.
    pub async fn unsubscribe(&self, handle: SubscriptionHandle) -> RtdbResult<()> {
        self.inner.ensure_open()?;
        let entry = self.inner.subscriptions.remove(handle)?;
        self.inner
            .release_server_subscription(entry.server_handle())
            .await;
        debug!(handle = %self.inner.handle, subscription = %handle, "Unsubscribed");
        Ok(())
    }
}

impl Session {
    pub(crate) fn abort(&self) {
        self.inner.abort();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("handle", &self.inner.handle)
            .field("endpoint", &self.inner.endpoint)
            .field("user", &self.inner.user)
            .field("state", &self.inner.state())
            .field("subscriptions", &self.inner.subscriptions.len())
            .finish()
    }
}

// =============================================================================
// SessionInner
// =============================================================================

impl SessionInner {
    fn state(&self) -> SessionState {
        *self.state.read()
    }

    fn ensure_open(&self) -> RtdbResult<()> {
        if self.state().is_closed() {
            return Err(RtdbError::closed(format!("session {} is closed", self.handle)));
        }
        Ok(())
    }

    fn timeouts(&self) -> CallTimeouts {
        let options = self.options.read();
        CallTimeouts {
            send: options.send_timeout,
            recv: options.recv_timeout,
        }
    }

    fn dispatcher(&self) -> RtdbResult<Arc<Dispatcher>> {
        match self.state() {
            SessionState::Closing | SessionState::Closed => {
                Err(RtdbError::closed(format!("session {} is closed", self.handle)))
            }
            SessionState::Reconnecting => Err(NetworkError::Disconnected.into()),
            SessionState::Active => self
                .link
                .read()
                .clone()
                .ok_or_else(|| NetworkError::Disconnected.into()),
        }
    }

    /// Issues one request and translates a non-success status.
    async fn request(&self, opcode: Opcode, payload: Bytes) -> RtdbResult<Frame> {
        let dispatcher = self.dispatcher()?;
        let reply = match dispatcher.call(opcode, payload, self.timeouts()).await {
            Ok(reply) => reply,
            Err(e) if e.is_closed() && self.reconnect_pending() => {
                return Err(NetworkError::Disconnected.into());
            }
            Err(e) => return Err(e),
        };

        if !reply.is_success() {
            return Err(RtdbError::from_status(reply.status, opcode.name()));
        }
        Ok(reply)
    }

    /// The link dropped but the supervisor will replace it.
    fn reconnect_pending(&self) -> bool {
        !self.state().is_closed() && self.options.read().auto_reconnect
    }

    async fn release_server_subscription(&self, server_handle: u32) {
        let request = UnsubscribeRequest { server_handle };
        if let Err(e) = self.request(Opcode::Unsubscribe, request.encode()).await {
            warn!(
                handle = %self.handle,
                server_handle,
                error = %e,
                "Server unsubscribe failed"
            );
        }
    }

    /// Tears the session down and leaves the registry. The caller has
    /// already moved the state to `Closing`.
    async fn close(&self, send_logout: bool) {
        self.release(send_logout).await;
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(self.handle);
        }
        *self.state.write() = SessionState::Closed;
        info!(handle = %self.handle, "Session closed");
    }

    /// Cancels subscriptions, closes the link and stops the pipeline.
    async fn release(&self, send_logout: bool) {
        self.shutdown.cancel();
        self.subscriptions.close_all();

        let link = self.link.write().take();
        if let Some(dispatcher) = link {
            if send_logout {
                let timeouts = {
                    let options = self.options.read();
                    CallTimeouts {
                        send: options.send_timeout,
                        recv: options.recv_timeout.min(LOGOUT_REPLY_TIMEOUT),
                    }
                };
                match dispatcher.call(Opcode::Logout, Bytes::new(), timeouts).await {
                    Ok(reply) if reply.is_success() => {
                        debug!(handle = %self.handle, "Logout acknowledged");
                    }
                    Ok(reply) => {
                        warn!(handle = %self.handle, status = reply.status, "Logout rejected by server");
                    }
                    Err(e) => {
                        warn!(handle = %self.handle, error = %e, "Logout request failed");
                    }
                }
            }
            dispatcher.close().await;
        }

        self.pipeline.shutdown().await;
    }

    /// Stops the session without awaiting. Used when the owning registry
    /// is dropped.
    fn abort(&self) {
        self.shutdown.cancel();
        if let Some(dispatcher) = self.link.write().take() {
            dispatcher.abort();
        }
        self.subscriptions.close_all();
    }

    /// Closes after an unrecoverable transport loss.
    async fn terminate(&self, reason: &str) {
        {
            let mut state = self.state.write();
            if state.is_closed() {
                return;
            }
            *state = SessionState::Closing;
        }
        warn!(handle = %self.handle, reason, "Session terminated");
        self.close(false).await;
    }

    // =========================================================================
    // Reconnect
    // =========================================================================

    /// Replaces the lost link. Returns the new read loop.
    async fn reconnect(&self) -> RtdbResult<JoinHandle<DisconnectReason>> {
        {
            let mut state = self.state.write();
            if state.is_closed() {
                return Err(RtdbError::closed("session closed"));
            }
            *state = SessionState::Reconnecting;
        }
        if let Some(old) = self.link.write().take() {
            old.abort();
        }
        self.subscriptions.detach_routes();

        let mut backoff = self.reconnect.backoff();
        loop {
            let Some(delay) = backoff.next_delay() else {
                return Err(NetworkError::reset(format!(
                    "gave up after {} reconnect attempts",
                    backoff.attempts()
                ))
                .into());
            };

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    return Err(RtdbError::closed("session closed during reconnect"));
                }
                _ = tokio::time::sleep(delay) => {}
            }

            debug!(
                handle = %self.handle,
                attempt = backoff.attempts(),
                endpoint = %self.endpoint,
                "Reconnecting"
            );
            match self.try_resume().await {
                Ok(read_loop) => return Ok(read_loop),
                Err(e @ RtdbError::Auth(_)) => return Err(e),
                Err(e) if e.is_closed() && self.state().is_closed() => return Err(e),
                Err(e) => {
                    warn!(
                        handle = %self.handle,
                        attempt = backoff.attempts(),
                        error = %e,
                        "Reconnect attempt failed"
                    );
                }
            }
        }
    }

    async fn try_resume(&self) -> RtdbResult<JoinHandle<DisconnectReason>> {
        let options = self.options.read().clone();
        let transport = Arc::new(Transport::connect(&self.endpoint, &options).await?);
        let dispatcher = Arc::new(Dispatcher::new(transport, self.stats.clone()));
        let read_loop = tokio::spawn(dispatcher.clone().run(self.pipeline.ingress()));

        if let Err(e) = self.resume_on(&dispatcher, &options).await {
            dispatcher.close().await;
            return Err(e);
        }

        let resumed = {
            let mut state = self.state.write();
            if state.is_reconnecting() {
                *self.link.write() = Some(dispatcher.clone());
                *state = SessionState::Active;
                true
            } else {
                false
            }
        };

        if !resumed {
            dispatcher.close().await;
            return Err(RtdbError::closed("session closed during reconnect"));
        }

        let count = self.reconnects.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            handle = %self.handle,
            reconnects = count,
            subscriptions = self.subscriptions.len(),
            "Session resumed"
        );
        Ok(read_loop)
    }

    async fn resume_on(&self, dispatcher: &Dispatcher, options: &SessionOptions) -> RtdbResult<()> {
        let timeouts = CallTimeouts {
            send: options.send_timeout,
            recv: options.recv_timeout,
        };

        let token = self.resume_token.lock().clone();
        let reply = dispatcher
            .call(Opcode::Resume, ResumeRequest { token }.encode()?, timeouts)
            .await?;
        if !reply.is_success() {
            return Err(match StatusCode::from_i32(reply.status) {
                Some(StatusCode::AuthFailed) | Some(StatusCode::NotFound) => {
                    AuthError::ResumeRejected.into()
                }
                _ => RtdbError::from_status(reply.status, Opcode::Resume.name()),
            });
        }

        let login = LoginReply::decode(reply.payload)?;
        let (info, effective) = session_info(&login, options)?;
        if info.permission != self.info.read().permission {
            warn!(
                handle = %self.handle,
                permission = %info.permission,
                "Permission changed across resume"
            );
            return Err(AuthError::ResumeRejected.into());
        }

        *self.resume_token.lock() = login.resume_token.clone();
        *self.info.write() = info;
        self.options.write().server_precision = effective;
        *self.precision.write() = effective;

        // Batches for the new server handles are parked until rebound.
        let _in_flight = self.subscriptions.begin_subscribe();
        for entry in self.subscriptions.snapshot() {
            let request = SubscribeRequest {
                what: entry.what().bits(),
                ids: entry.tag_ids().iter().map(|id| id.0).collect(),
            };
            let reply = dispatcher
                .call(Opcode::Subscribe, request.encode(), timeouts)
                .await?;
            if !reply.is_success() {
                return Err(RtdbError::from_status(reply.status, Opcode::Subscribe.name()));
            }
            let server_handle = SubscribeReply::decode(reply.payload)?.server_handle;

            match self.pipeline.rebind(entry.handle(), server_handle) {
                Ok(()) => {}
                // Unsubscribed while the reconnect was running.
                Err(RtdbError::NotFound { .. }) => {
                    let request = UnsubscribeRequest { server_handle };
                    let _ = dispatcher
                        .call(Opcode::Unsubscribe, request.encode(), timeouts)
                        .await;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(dispatcher) = self.link.get_mut().take() {
            dispatcher.abort();
        }
    }
}

// =============================================================================
// Supervisor
// =============================================================================

/// Watches the read loop and reacts to transport loss.
async fn supervise(
    session: Weak<SessionInner>,
    mut read_loop: JoinHandle<DisconnectReason>,
    shutdown: CancellationToken,
) {
    loop {
        let reason = tokio::select! {
            _ = shutdown.cancelled() => return,
            result = &mut read_loop => match result {
                Ok(reason) => reason,
                Err(e) => DisconnectReason::Failed(e.to_string()),
            },
        };

        let Some(inner) = session.upgrade() else {
            return;
        };
        if !reason.is_unexpected() || inner.state().is_closed() {
            return;
        }

        warn!(handle = %inner.handle, endpoint = %inner.endpoint, reason = %reason, "Connection lost");

        if !inner.options.read().auto_reconnect {
            inner.terminate(&reason.to_string()).await;
            return;
        }

        match inner.reconnect().await {
            Ok(next) => read_loop = next,
            Err(e) => {
                e.log("reconnect");
                inner.terminate(&e.to_string()).await;
                return;
            }
        }
    }
}

// =============================================================================
// Login helpers
// =============================================================================

async fn authenticate(
    dispatcher: &Dispatcher,
    credentials: &Credentials,
    options: &SessionOptions,
) -> RtdbResult<LoginReply> {
    let request = LoginRequest {
        user: credentials.user().to_string(),
        password: credentials.password().to_string(),
    };
    let timeouts = CallTimeouts {
        send: options.send_timeout,
        recv: options.recv_timeout,
    };

    let reply = dispatcher
        .call(Opcode::Login, request.encode()?, timeouts)
        .await?;
    drop(request);

    if !reply.is_success() {
        return Err(match StatusCode::from_i32(reply.status) {
            Some(StatusCode::AuthFailed) => AuthError::bad_credentials(credentials.user()).into(),
            _ => RtdbError::from_status(reply.status, Opcode::Login.name()),
        });
    }
    LoginReply::decode(reply.payload)
}

/// Builds the session attributes and the effective event precision.
fn session_info(
    reply: &LoginReply,
    options: &SessionOptions,
) -> RtdbResult<(SessionInfo, TimestampPrecision)> {
    let permission = PermissionGroup::from_u8(reply.permission).ok_or(
        ProtocolError::InvalidField {
            field: "permission",
            value: i64::from(reply.permission),
        },
    )?;

    let server_precision = (reply.precision != PRECISION_UNSPECIFIED)
        .then(|| TimestampPrecision::from_option_value(i64::from(reply.precision)));
    let effective = server_precision.unwrap_or(options.default_precision);

    let info = SessionInfo {
        session_id: reply.session_id,
        os_type: reply.os_type.into(),
        max_blob_len: reply.max_blob_len,
        permission,
        server_precision,
    };
    Ok((info, effective))
}
