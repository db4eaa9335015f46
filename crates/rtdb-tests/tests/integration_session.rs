// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Session Integration Tests
//!
//! - `test_login_*`: Login and authentication
//! - `test_logout_*`: Logout and closed-session behaviour
//! - `test_option_*`: Option reads and writes
//! - `test_registry_*`: Connection registry and counts

use std::time::Duration;

use bytes::Bytes;
use rtdb_client::{
    AuthError, ConnectionFilter, NetworkError, OsType, PermissionGroup, RtdbClient, RtdbError,
    Session, SessionOption, SessionState, StatusCode, SubscribeWhat, SubscriptionHandle,
    TimestampPrecision,
};
use rtdb_tests::prelude::*;

async fn login(server: &MockServer, client: &RtdbClient) -> Session {
    let (user, password) = UserFixtures::OPERATOR;
    client
        .login(&server.host(), server.port(), user, password)
        .await
        .expect("Login failed")
}

fn fast_client() -> RtdbClient {
    RtdbClient::with_config(ConfigFixtures::fast()).expect("Invalid config")
}

// =============================================================================
// Login
// =============================================================================

#[tokio::test]
async fn test_login_reports_session_info() {
    init_test_logging();
    let server = MockServer::start().await;
    let client = fast_client();

    let session = login(&server, &client).await;

    assert!(session.is_active());
    assert_eq!(session.user(), "operator");
    assert_eq!(session.permission(), PermissionGroup::DataSource);
    let info = session.info();
    assert_eq!(info.os_type, OsType::Linux);
    assert_eq!(info.max_blob_len, 65_535);
    assert_eq!(info.server_precision, Some(TimestampPrecision::Milliseconds));
    assert_eq!(MockCounters::get(&server.counters().logins), 1);
    assert_eq!(client.live_sessions(ConnectionFilter::All), 1);
}

#[tokio::test]
async fn test_login_bad_password() {
    init_test_logging();
    let server = MockServer::start().await;
    let client = fast_client();

    let result = client
        .login(&server.host(), server.port(), "operator", "wrong")
        .await;

    let err = result.expect_err("Login should fail");
    assert!(matches!(err, RtdbError::Auth(AuthError::BadCredentials { .. })));
    assert_eq!(err.status_code(), StatusCode::AuthFailed);
    assert!(client.registry().is_empty());
}

#[tokio::test]
async fn test_login_refused() {
    init_test_logging();
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let client = fast_client();

    let err = client
        .login("127.0.0.1", i32::from(port), "operator", "secret")
        .await
        .expect_err("Nothing listens on the port");

    assert!(matches!(err, RtdbError::Network(NetworkError::Refused { .. })));
    assert_eq!(err.status_code(), StatusCode::Network);
}

#[tokio::test]
async fn test_login_admin_permission() {
    init_test_logging();
    let server = MockServer::start().await;
    let client = fast_client();
    let (user, password) = UserFixtures::ADMIN;

    let session = client
        .login(&server.host(), server.port(), user, password)
        .await
        .unwrap();

    assert_eq!(session.permission(), PermissionGroup::SystemAdmin);
    assert!(session.permission().is_admin());
}

// =============================================================================
// Logout
// =============================================================================

#[tokio::test]
async fn test_logout_once_then_already_closed() {
    init_test_logging();
    let server = MockServer::start().await;
    let client = fast_client();
    let session = login(&server, &client).await;

    session.logout().await.unwrap();

    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(MockCounters::get(&server.counters().logouts), 1);
    assert!(client.registry().is_empty());

    let err = session.logout().await.unwrap_err();
    assert!(matches!(err, RtdbError::AlreadyClosed));
    assert_eq!(err.status_code(), StatusCode::AlreadyClosed);
}

#[tokio::test]
async fn test_logout_closed_session_rejects_everything() {
    init_test_logging();
    let server = MockServer::start().await;
    let client = fast_client();
    let session = login(&server, &client).await;
    session.logout().await.unwrap();

    assert!(matches!(
        session.ping(Bytes::from_static(b"x")).await,
        Err(RtdbError::Closed { .. })
    ));
    assert!(matches!(
        session.get_option(SessionOption::RecvTimeout),
        Err(RtdbError::Closed { .. })
    ));
    assert!(matches!(
        session.set_option(SessionOption::RecvTimeout, 10).await,
        Err(RtdbError::Closed { .. })
    ));
    assert!(matches!(
        session.connection_count(0).await,
        Err(RtdbError::Closed { .. })
    ));
    let (sink, _events) = rtdb_client::ChannelSink::new(4);
    assert!(matches!(
        session
            .subscribe(&TagFixtures::range(2), SubscribeWhat::ALL, std::sync::Arc::new(sink))
            .await,
        Err(RtdbError::Closed { .. })
    ));
    assert!(matches!(
        session.unsubscribe(SubscriptionHandle(1)).await,
        Err(RtdbError::Closed { .. })
    ));
}

#[tokio::test]
async fn test_logout_after_server_loss_is_already_closed() {
    init_test_logging();
    let server = MockServer::start().await;
    let client = fast_client();
    let session = login(&server, &client).await;

    server.drop_connections();
    wait_until(Duration::from_secs(2), || session.state() == SessionState::Closed).await;

    assert!(client.registry().is_empty());
    assert!(matches!(session.logout().await, Err(RtdbError::AlreadyClosed)));
    assert!(matches!(
        session.ping(Bytes::new()).await,
        Err(RtdbError::Closed { .. })
    ));
}

// =============================================================================
// Options
// =============================================================================

#[tokio::test]
async fn test_option_defaults_and_updates() {
    init_test_logging();
    let server = MockServer::start().await;
    let client = fast_client();
    let session = login(&server, &client).await;

    assert_eq!(session.get_option(SessionOption::AutoReconnect).unwrap(), 0);
    assert_eq!(session.get_option(SessionOption::ConnectTimeout).unwrap(), 500);
    assert_eq!(session.get_option(SessionOption::RecvTimeout).unwrap(), 2000);

    session
        .set_option(SessionOption::RecvTimeout, 3000)
        .await
        .unwrap();
    assert_eq!(session.get_option(SessionOption::RecvTimeout).unwrap(), 3000);

    session
        .set_option(SessionOption::ConnectTimeout, 0)
        .await
        .unwrap();
    assert_eq!(session.get_option(SessionOption::ConnectTimeout).unwrap(), 0);

    assert!(matches!(
        session.set_option(SessionOption::AutoReconnect, 2).await,
        Err(RtdbError::InvalidOption { .. })
    ));
    assert!(matches!(
        session.set_option(SessionOption::SendTimeout, 0).await,
        Err(RtdbError::InvalidOption { .. })
    ));
    assert!(matches!(
        SessionOption::try_from(99),
        Err(RtdbError::InvalidOption { .. })
    ));
    assert_eq!(session.get_option(SessionOption::SendTimeout).unwrap(), 500);
}

#[tokio::test]
async fn test_option_server_precision_negotiated() {
    init_test_logging();
    let server = MockServer::start().await;
    let client = fast_client();
    let session = login(&server, &client).await;
    assert_eq!(session.precision(), TimestampPrecision::Milliseconds);

    session
        .set_option(SessionOption::ServerPrecision, 1)
        .await
        .unwrap();

    assert_eq!(session.precision(), TimestampPrecision::Nanoseconds);
    assert_eq!(session.get_option(SessionOption::ServerPrecision).unwrap(), 1);
    assert_eq!(
        session.info().server_precision,
        Some(TimestampPrecision::Nanoseconds)
    );
}

#[tokio::test]
async fn test_option_default_precision_applies_when_server_silent() {
    init_test_logging();
    let server = MockServer::start_with(MockServerConfig::default().without_precision()).await;
    let mut config = ConfigFixtures::fast();
    config.options.default_precision = TimestampPrecision::Nanoseconds;
    let client = RtdbClient::with_config(config).unwrap();
    let session = login(&server, &client).await;

    assert_eq!(session.info().server_precision, None);
    assert_eq!(session.precision(), TimestampPrecision::Nanoseconds);
    assert_eq!(session.get_option(SessionOption::ServerPrecision).unwrap(), 1);

    session
        .set_option(SessionOption::DefaultPrecision, 0)
        .await
        .unwrap();
    assert_eq!(session.precision(), TimestampPrecision::Milliseconds);
}

// =============================================================================
// Registry
// =============================================================================

#[tokio::test]
async fn test_registry_tracks_sessions() {
    init_test_logging();
    let server = MockServer::start().await;
    let client = fast_client();

    let first = login(&server, &client).await;
    let second = login(&server, &client).await;
    assert_ne!(first.handle(), second.handle());

    assert_eq!(client.live_sessions(ConnectionFilter::All), 2);
    assert_eq!(client.live_sessions(ConnectionFilter::Active), 2);
    assert_eq!(client.live_sessions(ConnectionFilter::Reconnecting), 0);
    assert_eq!(client.find(first.handle()).unwrap().handle(), first.handle());
    assert_eq!(
        client.connection_count(first.handle(), 0).await.unwrap(),
        2
    );

    first.logout().await.unwrap();
    assert!(matches!(
        client.find(first.handle()),
        Err(RtdbError::NotFound { kind: "connection", .. })
    ));
    assert_eq!(client.registry().handles(), vec![second.handle()]);
}

#[tokio::test]
async fn test_registry_shutdown_logs_out_everything() {
    init_test_logging();
    let server = MockServer::start().await;
    let client = fast_client();
    let first = login(&server, &client).await;
    let second = login(&server, &client).await;

    client.shutdown().await;

    assert!(client.registry().is_empty());
    assert_eq!(first.state(), SessionState::Closed);
    assert_eq!(second.state(), SessionState::Closed);
    assert_eq!(MockCounters::get(&server.counters().logouts), 2);
}

#[tokio::test]
async fn test_ping_round_trip() {
    init_test_logging();
    let server = MockServer::start().await;
    let client = fast_client();
    let session = login(&server, &client).await;

    let reply = session.ping(Bytes::from_static(b"hello")).await.unwrap();
    assert_eq!(&reply[..], b"hello");
    assert_eq!(session.stats().dispatcher.calls, 2);
}
