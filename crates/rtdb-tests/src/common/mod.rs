// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Common Test Utilities
//!
//! - `fixtures`: Pre-built configurations and tag lists
//! - `mock_server`: In-process server speaking the wire protocol

pub mod fixtures;
pub mod mock_server;

pub use fixtures::*;
pub use mock_server::*;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use rtdb_client::SinkEvent;

static INIT: Once = Once::new();

/// Initialize test logging. Call this at the start of each test.
pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new("warn,rtdb_client=debug")),
            )
            .with_test_writer()
            .init();
    });
}

/// Awaits `future`, panicking after `limit`.
pub async fn within<F: Future>(limit: Duration, future: F) -> F::Output {
    tokio::time::timeout(limit, future)
        .await
        .expect("Operation did not finish in time")
}

/// Receives the next sink event, panicking after two seconds.
pub async fn next_event(events: &mut mpsc::Receiver<SinkEvent>) -> SinkEvent {
    within(Duration::from_secs(2), events.recv())
        .await
        .expect("Sink channel closed")
}

/// Polls `condition` every 10ms until it holds, panicking after `limit`.
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) {
    within(limit, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
}
