// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Client context: the entry point for logging in and looking sessions up.

use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::error::{ConfigError, RtdbError, RtdbResult};
use crate::registry::{ConnectionFilter, ConnectionRegistry};
use crate::session::Session;
use crate::types::{ClientVersion, ConnectionHandle, Credentials, Endpoint};

/// Owns the connection registry and the defaults new sessions start with.
///
/// Dropping the client aborts every session it still holds; call
/// [`shutdown`](Self::shutdown) to log them out cleanly.
pub struct RtdbClient {
    config: ClientConfig,
    registry: Arc<ConnectionRegistry>,
}

impl RtdbClient {
    /// Creates a client with default configuration.
    pub fn new() -> Self {
        Self::from_parts(ClientConfig::default())
    }

    /// Creates a client after validating `config`.
    pub fn with_config(config: ClientConfig) -> RtdbResult<Self> {
        config.validate()?;
        Ok(Self::from_parts(config))
    }

    fn from_parts(config: ClientConfig) -> Self {
        Self {
            config,
            registry: Arc::new(ConnectionRegistry::new()),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Connects to `host:port` and authenticates.
    ///
    /// `port` must lie in `1..=65535`.
    pub async fn login(
        &self,
        host: &str,
        port: i32,
        user: &str,
        password: &str,
    ) -> RtdbResult<Session> {
        let endpoint = Endpoint::parse(host, port)?;
        let credentials = Credentials::new(user, password);
        Session::login(&self.registry, endpoint, &credentials, &self.config).await
    }

    /// Logs into the server named in the configuration's `server` section.
    pub async fn connect_configured(&self) -> RtdbResult<Session> {
        let server = self.config.server.as_ref().ok_or_else(|| {
            RtdbError::from(ConfigError::validation("server", "no server configured"))
        })?;
        let endpoint = server.endpoint()?;
        let credentials = server.credentials();
        Session::login(&self.registry, endpoint, &credentials, &self.config).await
    }

    /// Looks up a live session.
    pub fn find(&self, handle: ConnectionHandle) -> RtdbResult<Session> {
        self.registry.find(handle)
    }

    /// Asks the server behind `handle` how many connections match `filter`.
    pub async fn connection_count(&self, handle: ConnectionHandle, filter: i32) -> RtdbResult<i32> {
        self.registry.find(handle)?.connection_count(filter).await
    }

    /// Counts this client's own sessions.
    pub fn live_sessions(&self, filter: ConnectionFilter) -> usize {
        self.registry.count(filter)
    }

    /// Returns the library version.
    pub fn client_version(&self) -> ClientVersion {
        client_version()
    }

    /// Logs out every live session.
    ///
    /// Failures are logged; the registry is empty afterwards.
    pub async fn shutdown(&self) {
        let sessions = self.registry.sessions();
        if sessions.is_empty() {
            return;
        }

        info!(sessions = sessions.len(), "Shutting down client");
        for session in sessions {
            match session.logout().await {
                Ok(()) | Err(RtdbError::AlreadyClosed) => {}
                Err(e) => {
                    warn!(handle = %session.handle(), error = %e, "Logout during shutdown failed");
                }
            }
            self.registry.unregister(session.handle());
        }
    }
}

impl Default for RtdbClient {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RtdbClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RtdbClient")
            .field("sessions", &self.registry.len())
            .finish()
    }
}

/// Returns the version of this library.
pub fn client_version() -> ClientVersion {
    ClientVersion::current()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_login_rejects_bad_port() {
        let client = RtdbClient::new();
        for port in [0, -1, 70_000] {
            let result = client.login("127.0.0.1", port, "u", "p").await;
            assert!(matches!(result, Err(RtdbError::InvalidParameter { .. })));
        }
        assert!(client.registry().is_empty());
    }

    #[tokio::test]
    async fn test_connect_configured_requires_server() {
        let client = RtdbClient::new();
        assert!(matches!(
            client.connect_configured().await,
            Err(RtdbError::Configuration(ConfigError::Validation { .. }))
        ));
    }

    #[tokio::test]
    async fn test_connection_count_unknown_handle() {
        let client = RtdbClient::new();
        assert!(matches!(
            client.connection_count(ConnectionHandle(42), 0).await,
            Err(RtdbError::NotFound { kind: "connection", id: 42 })
        ));
    }

    #[test]
    fn test_client_version_matches_package() {
        let version = client_version();
        assert_eq!(version.to_string(), env!("CARGO_PKG_VERSION"));
    }
}
