// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Configuration Integration Tests
//!
//! Configuration files driving real logins against the mock server.

use std::io::Write;
use std::time::Duration;

use rtdb_client::{ClientConfig, ConfigError, ConfigLoader, RtdbClient, RtdbError, SessionOption};
use rtdb_tests::prelude::*;
use tempfile::NamedTempFile;

fn yaml_file(content: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[tokio::test]
async fn test_config_file_drives_login() {
    init_test_logging();
    let server = MockServer::start().await;
    let (user, password) = UserFixtures::OPERATOR;
    let file = yaml_file(&format!(
        r#"
options:
  connect_timeout: 750ms
  recv_timeout: 3s
reconnect:
  max_attempts: 4
  initial_delay: 50ms
server:
  host: {host}
  port: {port}
  user: {user}
  password: {password}
"#,
        host = server.host(),
        port = server.port(),
    ));

    let config = ClientConfig::load(file.path()).unwrap();
    assert_eq!(config.options.recv_timeout, Duration::from_secs(3));
    assert_eq!(config.reconnect.max_attempts, 4);

    let client = RtdbClient::with_config(config).unwrap();
    let session = client.connect_configured().await.unwrap();

    assert!(session.is_active());
    assert_eq!(session.user(), user);
    assert_eq!(session.get_option(SessionOption::ConnectTimeout).unwrap(), 750);
    assert_eq!(session.get_option(SessionOption::RecvTimeout).unwrap(), 3000);
    session.logout().await.unwrap();
}

#[tokio::test]
async fn test_config_env_placeholders_and_overrides() {
    init_test_logging();
    let server = MockServer::start().await;
    std::env::set_var("RTDB_IT_CFG_PASSWORD_VALUE", UserFixtures::OPERATOR.1);
    std::env::set_var("RTDB_IT_CFG_PORT", server.port().to_string());

    let file = yaml_file(&format!(
        r#"
server:
  host: {host}
  port: 1
  user: ${{RTDB_IT_CFG_USER_UNSET:operator}}
  password: ${{RTDB_IT_CFG_PASSWORD_VALUE}}
"#,
        host = server.host(),
    ));

    let config = ConfigLoader::new()
        .with_env_prefix("RTDB_IT_CFG")
        .load(file.path())
        .unwrap();
    let server_config = config.server.as_ref().unwrap();
    assert_eq!(i32::from(server_config.port), server.port());
    assert_eq!(server_config.user, "operator");

    let client = RtdbClient::with_config(config).unwrap();
    let session = client.connect_configured().await.unwrap();
    assert!(session.is_active());
    assert_eq!(MockCounters::get(&server.counters().logins), 1);
}

#[tokio::test]
async fn test_config_missing_placeholder_fails() {
    init_test_logging();
    let file = yaml_file("server:\n  host: localhost\n  port: 6327\n  user: ${RTDB_IT_CFG_NEVER_SET}\n");

    let err = ConfigLoader::new()
        .with_env_prefix("RTDB_IT_CFG_MISSING")
        .load(file.path())
        .unwrap_err();
    assert!(matches!(err, ConfigError::MissingEnvVar { .. }));
}

#[tokio::test]
async fn test_config_missing_file() {
    init_test_logging();
    let err = ClientConfig::load("/nonexistent/rtdb-client.yaml").unwrap_err();
    assert!(matches!(err, RtdbError::Configuration(ConfigError::FileNotFound { .. })));
}
