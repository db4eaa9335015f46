// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Live session membership.
//!
//! One [`ConnectionRegistry`] belongs to one [`RtdbClient`](crate::RtdbClient).
//! Sessions register themselves after login and leave on logout or when
//! they are terminated. All membership changes go through a single lock;
//! nothing here spans more than one session's state.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{RtdbError, RtdbResult};
use crate::session::{Session, SessionState};
use crate::types::ConnectionHandle;

// =============================================================================
// ConnectionFilter
// =============================================================================

/// Which sessions [`ConnectionRegistry::count`] includes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum ConnectionFilter {
    /// Every registered session.
    #[default]
    All = 0,
    /// Sessions that currently accept requests.
    Active = 1,
    /// Sessions waiting for a reconnect.
    Reconnecting = 2,
}

impl ConnectionFilter {
    /// Returns `true` if a session in `state` passes the filter.
    pub fn matches(&self, state: SessionState) -> bool {
        match self {
            Self::All => true,
            Self::Active => state.is_active(),
            Self::Reconnecting => state.is_reconnecting(),
        }
    }
}

impl TryFrom<i32> for ConnectionFilter {
    type Error = RtdbError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::All),
            1 => Ok(Self::Active),
            2 => Ok(Self::Reconnecting),
            _ => Err(RtdbError::invalid_parameter(
                "filter",
                format!("unknown connection filter {value}"),
            )),
        }
    }
}

// =============================================================================
// ConnectionRegistry
// =============================================================================

/// Thread-safe table of live sessions keyed by handle.
pub struct ConnectionRegistry {
    sessions: RwLock<HashMap<ConnectionHandle, Session>>,
    next_handle: AtomicU32,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_handle: AtomicU32::new(1),
        }
    }

    /// Allocates a handle not held by any live session. Zero is never used.
    pub fn allocate_handle(&self) -> ConnectionHandle {
        loop {
            let raw = self.next_handle.fetch_add(1, Ordering::Relaxed);
            let handle = ConnectionHandle(raw);
            if raw != 0 && !self.sessions.read().contains_key(&handle) {
                return handle;
            }
        }
    }

    /// Adds a session.
    pub fn register(&self, session: Session) -> RtdbResult<()> {
        let handle = session.handle();
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&handle) {
            return Err(RtdbError::invalid_parameter(
                "handle",
                format!("{handle} is already registered"),
            ));
        }
        sessions.insert(handle, session);
        debug!(handle = %handle, live = sessions.len(), "Session registered");
        Ok(())
    }

    /// Removes a session. Returns it if it was registered.
    pub fn unregister(&self, handle: ConnectionHandle) -> Option<Session> {
        let mut sessions = self.sessions.write();
        let removed = sessions.remove(&handle);
        if removed.is_some() {
            debug!(handle = %handle, live = sessions.len(), "Session unregistered");
        }
        removed
    }

    /// Looks up a session by handle.
    pub fn find(&self, handle: ConnectionHandle) -> RtdbResult<Session> {
        self.sessions
            .read()
            .get(&handle)
            .cloned()
            .ok_or_else(|| RtdbError::not_found("connection", handle.get()))
    }

    /// Counts registered sessions passing `filter`.
    pub fn count(&self, filter: ConnectionFilter) -> usize {
        self.sessions
            .read()
            .values()
            .filter(|session| filter.matches(session.state()))
            .count()
    }

    /// Returns every registered handle in ascending order.
    pub fn handles(&self) -> Vec<ConnectionHandle> {
        let mut handles: Vec<_> = self.sessions.read().keys().copied().collect();
        handles.sort();
        handles
    }

    /// Returns every registered session.
    pub fn sessions(&self) -> Vec<Session> {
        self.sessions.read().values().cloned().collect()
    }

    /// Returns the number of registered sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Returns `true` if no session is registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("sessions", &self.handles())
            .finish()
    }
}

impl Drop for ConnectionRegistry {
    fn drop(&mut self) {
        let sessions: Vec<Session> = self.sessions.get_mut().drain().map(|(_, s)| s).collect();
        if !sessions.is_empty() {
            warn!(live = sessions.len(), "Registry dropped with live sessions, aborting them");
        }
        for session in sessions {
            session.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_from_raw() {
        assert_eq!(ConnectionFilter::try_from(0).unwrap(), ConnectionFilter::All);
        assert_eq!(ConnectionFilter::try_from(1).unwrap(), ConnectionFilter::Active);
        assert_eq!(
            ConnectionFilter::try_from(2).unwrap(),
            ConnectionFilter::Reconnecting
        );
        assert!(matches!(
            ConnectionFilter::try_from(9),
            Err(RtdbError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_filter_matches() {
        assert!(ConnectionFilter::All.matches(SessionState::Closing));
        assert!(ConnectionFilter::Active.matches(SessionState::Active));
        assert!(!ConnectionFilter::Active.matches(SessionState::Reconnecting));
        assert!(ConnectionFilter::Reconnecting.matches(SessionState::Reconnecting));
    }

    #[test]
    fn test_empty_registry() {
        let registry = ConnectionRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.count(ConnectionFilter::All), 0);
        assert!(matches!(
            registry.find(ConnectionHandle(3)),
            Err(RtdbError::NotFound { kind: "connection", id: 3 })
        ));
    }

    #[test]
    fn test_allocate_handle_skips_zero() {
        let registry = ConnectionRegistry::new();
        registry.next_handle.store(u32::MAX, Ordering::Relaxed);
        assert_eq!(registry.allocate_handle(), ConnectionHandle(u32::MAX));
        assert_eq!(registry.allocate_handle(), ConnectionHandle(1));
    }
}
