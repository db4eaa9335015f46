// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # rtdb Integration Tests
//!
//! Integration tests for `rtdb-client` against an in-process mock server.
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p rtdb-tests
//! cargo test -p rtdb-tests --test integration_session
//! cargo test -p rtdb-tests --test integration_dispatcher
//! cargo test -p rtdb-tests --test integration_subscription
//! cargo test -p rtdb-tests --test integration_reconnect
//! cargo test -p rtdb-tests --test integration_config
//! ```
//!
//! ## Test Categories
//!
//! ### Session Tests (`integration_session.rs`)
//! - Login, logout, `AlreadyClosed`
//! - Options and precision negotiation
//! - Registry membership and connection counts
//!
//! ### Dispatcher Tests (`integration_dispatcher.rs`)
//! - Concurrent calls with shuffled replies
//! - Call timeouts and late replies
//! - Close during a pending call
//!
//! ### Subscription Tests (`integration_subscription.rs`)
//! - Index correlation with duplicate ids
//! - Malformed batches isolated to one subscription
//! - Unsubscribe and early snapshots
//!
//! ### Reconnect Tests (`integration_reconnect.rs`)
//! - Resume with subscriptions kept
//! - Termination when resume is refused
//!
//! ### Config Tests (`integration_config.rs`)
//! - File loading and environment overrides

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod common;

/// Re-export commonly used items for convenience.
pub mod prelude {
    pub use crate::common::fixtures::*;
    pub use crate::common::mock_server::*;
    pub use crate::common::{init_test_logging, next_event, wait_until, within};
}
