// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! TCP transport carrying protocol frames.
//!
//! A [`Transport`] owns exactly one TCP connection. The write half sits
//! behind an async mutex so concurrent callers serialize their writes; the
//! read half is drained by a single reader (the dispatcher's read loop).
//!
//! There are no retries at this layer. Reconnecting is session policy.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex as SyncMutex;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{NetworkError, RtdbError, RtdbResult, TimeoutError};
use crate::options::SessionOptions;
use crate::protocol::{Frame, FrameCodec};
use crate::types::Endpoint;

// =============================================================================
// TransportState
// =============================================================================

/// Connection state of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransportState {
    /// Connected and usable.
    #[default]
    Connected,
    /// `close()` has been called.
    Closing,
    /// The connection is gone.
    Closed,
}

impl TransportState {
    /// Returns `true` if frames can be sent.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns `true` once the transport is unusable.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connected => "connected",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

// =============================================================================
// Transport
// =============================================================================

/// One framed TCP connection to a server.
pub struct Transport {
    endpoint: Endpoint,
    peer_addr: SocketAddr,
    writer: Mutex<FramedWrite<OwnedWriteHalf, FrameCodec>>,
    reader: Mutex<FramedRead<OwnedReadHalf, FrameCodec>>,
    state: SyncMutex<TransportState>,
    closed: CancellationToken,
}

impl Transport {
    /// Opens a connection to `endpoint`.
    ///
    /// Resolution failures map to [`NetworkError::DnsFailed`], an immediate
    /// rejection to [`NetworkError::Refused`], and an expired connect timeout
    /// to [`TimeoutError::Connect`].
    pub async fn connect(endpoint: &Endpoint, options: &SessionOptions) -> RtdbResult<Self> {
        let target = endpoint.to_string();
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((endpoint.host(), endpoint.port()))
            .await
            .map_err(|e| NetworkError::dns_failed(endpoint.host(), Some(e)))?
            .collect();

        if addrs.is_empty() {
            return Err(NetworkError::dns_failed(endpoint.host(), None).into());
        }

        let mut last_error = None;
        for addr in addrs {
            debug!(endpoint = %target, addr = %addr, "Connecting");
            match Self::connect_addr(addr, &target, options).await {
                Ok(stream) => return Self::from_stream(endpoint.clone(), stream, options),
                Err(e) => {
                    debug!(endpoint = %target, addr = %addr, error = %e, "Connect attempt failed");
                    if matches!(e, RtdbError::Timeout(_)) {
                        return Err(e);
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| NetworkError::refused(target).into()))
    }

    async fn connect_addr(
        addr: SocketAddr,
        target: &str,
        options: &SessionOptions,
    ) -> RtdbResult<TcpStream> {
        let attempt = TcpStream::connect(addr);
        let result = match options.connect_deadline() {
            Some(deadline) => timeout(deadline, attempt)
                .await
                .map_err(|_| TimeoutError::connect(target, deadline))?,
            None => attempt.await,
        };

        result.map_err(|e| match e.kind() {
            std::io::ErrorKind::ConnectionRefused => {
                RtdbError::from(NetworkError::refused_with(target, e))
            }
            _ => RtdbError::from(NetworkError::io(format!("connect to {target}"), e)),
        })
    }

    fn from_stream(
        endpoint: Endpoint,
        stream: TcpStream,
        options: &SessionOptions,
    ) -> RtdbResult<Self> {
        stream
            .set_nodelay(true)
            .map_err(|e| NetworkError::io("set TCP_NODELAY", e))?;
        apply_user_timeout(&stream, options.user_timeout);

        let peer_addr = stream
            .peer_addr()
            .map_err(|e| NetworkError::io("read peer address", e))?;
        let (read_half, write_half) = stream.into_split();

        debug!(endpoint = %endpoint, peer = %peer_addr, "Transport connected");

        Ok(Self {
            endpoint,
            peer_addr,
            writer: Mutex::new(FramedWrite::new(write_half, FrameCodec::new())),
            reader: Mutex::new(FramedRead::new(read_half, FrameCodec::new())),
            state: SyncMutex::new(TransportState::Connected),
            closed: CancellationToken::new(),
        })
    }

    /// Returns the endpoint this transport was opened for.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Returns the resolved peer address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Returns the current state.
    pub fn state(&self) -> TransportState {
        *self.state.lock()
    }

    /// Returns `true` while frames can be sent.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Writes one frame, waiting at most `send_timeout` for the socket.
    ///
    /// A timed-out write may have left part of the frame on the wire, so it
    /// closes the transport.
    pub async fn send(&self, frame: Frame, send_timeout: Duration) -> RtdbResult<()> {
        self.ensure_open()?;

        let correlation_id = frame.correlation_id;
        let mut writer = self.writer.lock().await;
        self.ensure_open()?;

        match timeout(send_timeout, writer.send(frame)).await {
            Ok(Ok(())) => {
                trace!(endpoint = %self.endpoint, correlation_id, "Frame sent");
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(endpoint = %self.endpoint, error = %e, "Write failed, closing transport");
                self.mark_closed();
                Err(e)
            }
            Err(_) => {
                warn!(
                    endpoint = %self.endpoint,
                    correlation_id,
                    timeout = ?send_timeout,
                    "Write timed out, closing transport"
                );
                self.mark_closed();
                Err(TimeoutError::send(send_timeout).into())
            }
        }
    }

    /// Reads the next frame.
    ///
    /// Returns [`RtdbError::Closed`] when the peer closes the connection or
    /// [`close`](Self::close) is called. Decode errors close the transport.
    pub async fn receive(&self) -> RtdbResult<Frame> {
        self.ensure_open()?;

        let mut reader = self.reader.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => Err(RtdbError::closed("transport closed")),
            next = reader.next() => match next {
                Some(Ok(frame)) => Ok(frame),
                Some(Err(e)) => {
                    self.mark_closed();
                    Err(e)
                }
                None => {
                    debug!(endpoint = %self.endpoint, "Connection closed by peer");
                    self.mark_closed();
                    Err(RtdbError::closed("connection closed by peer"))
                }
            },
        }
    }

    /// Closes the connection. Idempotent.
    pub async fn close(&self) {
        {
            let mut state = self.state.lock();
            if *state == TransportState::Closed {
                return;
            }
            *state = TransportState::Closing;
        }
        self.closed.cancel();

        let shutdown = async {
            let mut writer = self.writer.lock().await;
            writer.get_mut().shutdown().await
        };
        if let Ok(Err(e)) = timeout(Duration::from_millis(200), shutdown).await {
            trace!(endpoint = %self.endpoint, error = %e, "Socket shutdown failed");
        }

        *self.state.lock() = TransportState::Closed;
        debug!(endpoint = %self.endpoint, "Transport closed");
    }

    /// Marks the transport closed without waiting on the socket.
    pub fn abort(&self) {
        self.mark_closed();
    }

    fn mark_closed(&self) {
        *self.state.lock() = TransportState::Closed;
        self.closed.cancel();
    }

    fn ensure_open(&self) -> RtdbResult<()> {
        if self.state().is_closed() {
            return Err(RtdbError::closed("transport closed"));
        }
        Ok(())
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("endpoint", &self.endpoint)
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

#[cfg(any(target_os = "linux", target_os = "android", target_os = "fuchsia"))]
fn apply_user_timeout(stream: &TcpStream, user_timeout: Duration) {
    let socket = socket2::SockRef::from(stream);
    let value = if user_timeout.is_zero() {
        None
    } else {
        Some(user_timeout)
    };
    if let Err(e) = socket.set_tcp_user_timeout(value) {
        warn!(error = %e, "Failed to set TCP user timeout");
    }
    if let Err(e) = socket.set_keepalive(true) {
        warn!(error = %e, "Failed to enable TCP keepalive");
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "fuchsia")))]
fn apply_user_timeout(stream: &TcpStream, _user_timeout: Duration) {
    let socket = socket2::SockRef::from(stream);
    if let Err(e) = socket.set_keepalive(true) {
        warn!(error = %e, "Failed to enable TCP keepalive");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::net::TcpListener;

    use crate::protocol::Opcode;

    fn fast_options() -> SessionOptions {
        SessionOptions {
            connect_timeout: Duration::from_millis(500),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = Transport::connect(&Endpoint::new("127.0.0.1", port), &fast_options())
            .await
            .unwrap_err();
        assert!(matches!(err, RtdbError::Network(NetworkError::Refused { .. })));
    }

    #[tokio::test]
    async fn test_peer_close_marks_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let transport = Transport::connect(&Endpoint::new("127.0.0.1", port), &fast_options())
            .await
            .unwrap();
        server.await.unwrap();

        let err = transport.receive().await.unwrap_err();
        assert!(err.is_closed());
        assert_eq!(transport.state(), TransportState::Closed);

        let err = transport
            .send(
                Frame::request(Opcode::Echo, 1, Bytes::new()),
                Duration::from_millis(100),
            )
            .await
            .unwrap_err();
        assert!(err.is_closed());
    }

    #[tokio::test]
    async fn test_close_wakes_receiver() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let transport = std::sync::Arc::new(
            Transport::connect(&Endpoint::new("127.0.0.1", port), &fast_options())
                .await
                .unwrap(),
        );
        let reader = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.receive().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        transport.close().await;

        let result = timeout(Duration::from_secs(1), reader).await.unwrap().unwrap();
        assert!(result.unwrap_err().is_closed());
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_send_timeout_closes_transport() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        // Accepts and never reads.
        let _server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
            drop(socket);
        });

        let transport = Transport::connect(&Endpoint::new("127.0.0.1", port), &fast_options())
            .await
            .unwrap();
        let payload = Bytes::from(vec![0u8; 4 * 1024 * 1024]);

        let mut failure = None;
        for id in 1..=64 {
            let frame = Frame::request(Opcode::Echo, id, payload.clone());
            if let Err(e) = transport.send(frame, Duration::from_millis(50)).await {
                failure = Some(e);
                break;
            }
        }

        let err = failure.expect("Socket buffers never filled");
        assert!(matches!(err, RtdbError::Timeout(_)));
        assert_eq!(transport.state(), TransportState::Closed);

        let err = transport
            .send(
                Frame::request(Opcode::Echo, 100, Bytes::new()),
                Duration::from_millis(50),
            )
            .await
            .unwrap_err();
        assert!(err.is_closed());
    }
}
