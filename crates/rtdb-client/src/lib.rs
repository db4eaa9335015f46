// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Client for real-time tag database servers.
//!
//! This crate connects to a tag database server over TCP, authenticates a
//! session, subscribes to tag snapshots and delivers pushed sample batches
//! to caller-provided sinks.
//!
//! # Features
//!
//! - Multiplexed request/response over one connection per session
//! - Index-based correlation of samples to the requested tag order
//! - Per-subscription delivery tasks, so a slow sink never stalls reads
//! - Auto-reconnect with backoff and token-based resume
//! - YAML/TOML/JSON configuration with environment overrides
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐    ┌──────────────────┐
//! │ RtdbClient │───►│ConnectionRegistry│
//! └────────────┘    └────────┬─────────┘
//!                            │ 1..n
//!                   ┌────────▼─────────┐     ┌─────────────────────┐
//!                   │     Session      │────►│ SubscriptionManager │
//!                   └────────┬─────────┘     └──────────▲──────────┘
//!                            │                          │ route
//!                   ┌────────▼─────────┐     ┌──────────┴──────────┐
//!                   │    Dispatcher    │────►│    EventPipeline    │──► EventSink
//!                   └────────┬─────────┘     └─────────────────────┘
//!                   ┌────────▼─────────┐
//!                   │ Transport (TCP)  │
//!                   └──────────────────┘
//! ```
//!
//! # Error Handling
//!
//! ```text
//! RtdbError
//! ├── Network        - Refused, DNS, reset, disconnected
//! ├── Timeout        - Connect, send, call
//! ├── Auth           - Bad credentials, permission, resume
//! ├── Protocol       - Malformed frames and batches
//! ├── Configuration  - Config loading and validation
//! ├── Closed / AlreadyClosed
//! ├── InvalidOption / InvalidTag / InvalidParameter
//! └── NotFound
//! ```
//!
//! Every error maps to an integer [`StatusCode`] via
//! [`RtdbError::status_code`].
//!
//! # Example
//!
//! ```rust,ignore
//! use rtdb_client::{ChannelSink, RtdbClient, SubscribeWhat, TagId};
//! use std::sync::Arc;
//!
//! let client = RtdbClient::new();
//! let session = client.login("historian.local", 6327, "operator", "secret").await?;
//!
//! let (sink, mut events) = ChannelSink::new(64);
//! let tags = [TagId(10), TagId(20), TagId(10)];
//! session.subscribe(&tags, SubscribeWhat::ALL, Arc::new(sink)).await?;
//!
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//!
//! session.logout().await?;
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod options;
pub mod pipeline;
pub mod protocol;
pub mod registry;
pub mod retry;
pub mod session;
pub mod subscription;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use client::{client_version, RtdbClient};

pub use config::{
    ClientConfig, ConfigFormat, ConfigLoader, PipelineConfig, ReconnectConfig, ServerConfig,
};

pub use error::{
    AuthError, ConfigError, ErrorSeverity, NetworkError, ProtocolError, RtdbError, RtdbResult,
    StatusCode, TimeoutError,
};

pub use options::{SessionOption, SessionOptions};

pub use pipeline::{
    sink_fn, ChannelSink, EventSink, FnSink, PipelineStats, Sample, SampleBatch, SinkEvent,
};

pub use registry::{ConnectionFilter, ConnectionRegistry};

pub use session::{Session, SessionState, SessionStats};

pub use subscription::SubscriptionInfo;

pub use dispatcher::DispatcherStats;

pub use retry::{Backoff, ExponentialBackoff, RetryStrategy};

pub use types::{
    ClientVersion, ConnectionHandle, Credentials, Endpoint, OsType, PermissionGroup, Quality,
    SessionInfo, SubscribeWhat, SubscriptionHandle, TagId, TimestampPrecision,
};

pub use protocol::EventKind;
