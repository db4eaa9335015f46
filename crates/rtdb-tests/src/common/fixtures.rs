// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Fixtures
//!
//! Pre-built configurations, credentials and tag lists.

use std::time::Duration;

use rtdb_client::protocol::EventBatchPayload;
use rtdb_client::{ClientConfig, ReconnectConfig, SessionOptions, TagId};

use super::mock_server::change_batch;

// =============================================================================
// Credentials
// =============================================================================

/// Accounts known to the default mock server.
pub struct UserFixtures;

impl UserFixtures {
    /// Data source account.
    pub const OPERATOR: (&'static str, &'static str) = ("operator", "secret");

    /// System administrator account.
    pub const ADMIN: (&'static str, &'static str) = ("admin", "admin-pass");
}

// =============================================================================
// Configurations
// =============================================================================

/// Client configurations tuned for fast tests.
pub struct ConfigFixtures;

impl ConfigFixtures {
    /// Short timeouts, no reconnect.
    pub fn fast() -> ClientConfig {
        ClientConfig {
            options: SessionOptions {
                connect_timeout: Duration::from_millis(500),
                send_timeout: Duration::from_millis(500),
                recv_timeout: Duration::from_secs(2),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Short timeouts with auto-reconnect and a quick backoff.
    pub fn reconnecting() -> ClientConfig {
        let mut config = Self::fast();
        config.options.auto_reconnect = true;
        config.reconnect = ReconnectConfig {
            max_attempts: 20,
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(200),
            multiplier: 2.0,
            jitter: 0.0,
        };
        config
    }
}

// =============================================================================
// Tags and batches
// =============================================================================

/// Tag id lists.
pub struct TagFixtures;

impl TagFixtures {
    /// A list containing a repeated id.
    pub fn with_duplicate() -> Vec<TagId> {
        vec![TagId(10), TagId(20), TagId(10)]
    }

    /// `count` distinct ids starting at 1.
    pub fn range(count: i32) -> Vec<TagId> {
        (1..=count).map(TagId).collect()
    }
}

/// Event batch payloads.
pub struct BatchFixtures;

impl BatchFixtures {
    /// A batch whose value array is one element short.
    pub fn mismatched(server_handle: u32) -> EventBatchPayload {
        let mut batch = change_batch(server_handle, &[(10, 1.0), (20, 2.0)]);
        batch.values.pop();
        batch
    }
}
