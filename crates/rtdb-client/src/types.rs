// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Core value types shared across the client.
//!
//! Handles are plain newtypes over integers so they stay cheap to copy and
//! hash. Credentials zeroize their contents when dropped and never print the
//! password.

use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{RtdbError, RtdbResult};

// =============================================================================
// Handles
// =============================================================================

/// Process-local identifier for a live session.
///
/// Allocated by the [`ConnectionRegistry`](crate::registry::ConnectionRegistry)
/// and unique among the sessions it currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionHandle(pub u32);

impl ConnectionHandle {
    /// Returns the raw value.
    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Identifier of a subscription within one session.
///
/// Stays the same across reconnects even though the server handle behind it
/// may change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionHandle(pub u32);

impl SubscriptionHandle {
    /// Returns the raw value.
    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// Integer identifier of a tag on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagId(pub i32);

impl From<i32> for TagId {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Endpoint & Credentials
// =============================================================================

/// Server address. Immutable once a session has been built from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Creates an endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Validates a host and a raw port as accepted at the public boundary.
    pub fn parse(host: &str, port: i32) -> RtdbResult<Self> {
        let host = host.trim();
        if host.is_empty() {
            return Err(RtdbError::invalid_parameter("host", "must not be empty"));
        }
        let port = u16::try_from(port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| {
                RtdbError::invalid_parameter("port", format!("{port} is outside 1..=65535"))
            })?;
        Ok(Self::new(host, port))
    }

    /// Returns the host name.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// User name and password used for a single login exchange.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    user: String,
    password: String,
}

impl Credentials {
    /// Creates credentials.
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    /// Returns the user name.
    pub fn user(&self) -> &str {
        &self.user
    }

    pub(crate) fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

// =============================================================================
// Server-reported session attributes
// =============================================================================

/// Permission group granted at login. Never changes without a new login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PermissionGroup {
    /// May read and subscribe.
    ReadOnly = 0,
    /// May additionally write data.
    DataSource = 1,
    /// System administration.
    SystemAdmin = 2,
    /// Security administration.
    SecurityAdmin = 3,
}

impl PermissionGroup {
    /// Parses the wire value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::ReadOnly),
            1 => Some(Self::DataSource),
            2 => Some(Self::SystemAdmin),
            3 => Some(Self::SecurityAdmin),
            _ => None,
        }
    }

    /// Returns `true` for administrative groups.
    pub fn is_admin(&self) -> bool {
        matches!(self, Self::SystemAdmin | Self::SecurityAdmin)
    }
}

impl fmt::Display for PermissionGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadOnly => write!(f, "read-only"),
            Self::DataSource => write!(f, "data-source"),
            Self::SystemAdmin => write!(f, "system-admin"),
            Self::SecurityAdmin => write!(f, "security-admin"),
        }
    }
}

/// Operating system family reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OsType {
    /// Windows server.
    Windows,
    /// Linux server.
    Linux,
    /// Anything else, carrying the raw value.
    Other(u8),
}

impl From<u8> for OsType {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Windows,
            2 => Self::Linux,
            other => Self::Other(other),
        }
    }
}

impl From<OsType> for u8 {
    fn from(value: OsType) -> Self {
        match value {
            OsType::Windows => 1,
            OsType::Linux => 2,
            OsType::Other(raw) => raw,
        }
    }
}

/// Resolution of the sub-second part of event timestamps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampPrecision {
    /// Sub-second values are milliseconds.
    #[default]
    Milliseconds,
    /// Sub-second values are nanoseconds.
    Nanoseconds,
}

impl TimestampPrecision {
    /// Maps an option value: zero is milliseconds, anything else nanoseconds.
    pub fn from_option_value(value: i64) -> Self {
        if value == 0 {
            Self::Milliseconds
        } else {
            Self::Nanoseconds
        }
    }

    /// Returns the option value for this precision.
    pub fn as_option_value(self) -> i64 {
        match self {
            Self::Milliseconds => 0,
            Self::Nanoseconds => 1,
        }
    }

    /// Converts a sub-second value at this precision to nanoseconds.
    pub fn to_nanos(self, subtime: i32) -> u32 {
        let subtime = subtime.max(0) as u32;
        match self {
            Self::Milliseconds => subtime.saturating_mul(1_000_000),
            Self::Nanoseconds => subtime,
        }
    }
}

impl fmt::Display for TimestampPrecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Milliseconds => write!(f, "ms"),
            Self::Nanoseconds => write!(f, "ns"),
        }
    }
}

/// Per-sample quality flag as reported by the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quality(pub i16);

impl Quality {
    /// Quality reported for a good sample.
    pub const GOOD: Self = Self(0);

    /// Returns `true` if the sample is good.
    pub fn is_good(&self) -> bool {
        self.0 == 0
    }
}

// =============================================================================
// Subscription selector
// =============================================================================

/// Bitmask of what a subscription delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscribeWhat(u32);

impl SubscribeWhat {
    /// Deliver values.
    pub const VALUE: Self = Self(1);
    /// Deliver status codes.
    pub const STATUS: Self = Self(2);
    /// Deliver quality flags.
    pub const QUALITY: Self = Self(4);
    /// Deliver everything.
    pub const ALL: Self = Self(7);

    /// Builds a selector from raw bits, rejecting empty or unknown bits.
    pub fn from_bits(bits: u32) -> RtdbResult<Self> {
        if bits == 0 || bits & !Self::ALL.0 != 0 {
            return Err(RtdbError::invalid_parameter(
                "what",
                format!("0x{bits:X} is not a valid selector"),
            ));
        }
        Ok(Self(bits))
    }

    /// Returns the raw bits.
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Returns `true` if every bit of `other` is set.
    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl Default for SubscribeWhat {
    fn default() -> Self {
        Self::ALL
    }
}

impl std::ops::BitOr for SubscribeWhat {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

// =============================================================================
// SessionInfo & ClientVersion
// =============================================================================

/// Attributes negotiated at login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Server-assigned session id.
    pub session_id: u64,
    /// Server OS family.
    pub os_type: OsType,
    /// Maximum string/blob length the server accepts.
    pub max_blob_len: u32,
    /// Granted permission group.
    pub permission: PermissionGroup,
    /// Timestamp precision reported by the server, if any.
    pub server_precision: Option<TimestampPrecision>,
}

/// Client library version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClientVersion {
    /// Major version.
    pub major: u32,
    /// Minor version.
    pub minor: u32,
    /// Patch/beta number.
    pub beta: u32,
}

impl ClientVersion {
    /// Returns the version of this crate.
    pub fn current() -> Self {
        Self {
            major: env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(0),
            minor: env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or(0),
            beta: env!("CARGO_PKG_VERSION_PATCH").parse().unwrap_or(0),
        }
    }
}

impl fmt::Display for ClientVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.beta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_parse() {
        let ep = Endpoint::parse("localhost", 6327).unwrap();
        assert_eq!(ep.to_string(), "localhost:6327");

        assert!(Endpoint::parse("", 6327).is_err());
        assert!(Endpoint::parse("h", 0).is_err());
        assert!(Endpoint::parse("h", -1).is_err());
        assert!(Endpoint::parse("h", 70000).is_err());
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials::new("operator", "s3cret");
        let printed = format!("{creds:?}");
        assert!(printed.contains("operator"));
        assert!(!printed.contains("s3cret"));
    }

    #[test]
    fn test_subscribe_what() {
        assert!(SubscribeWhat::from_bits(0).is_err());
        assert!(SubscribeWhat::from_bits(8).is_err());
        let what = SubscribeWhat::VALUE | SubscribeWhat::QUALITY;
        assert_eq!(what.bits(), 5);
        assert!(what.contains(SubscribeWhat::VALUE));
        assert!(!what.contains(SubscribeWhat::STATUS));
        assert!(SubscribeWhat::ALL.contains(what));
    }

    #[test]
    fn test_precision_conversion() {
        assert_eq!(TimestampPrecision::from_option_value(0), TimestampPrecision::Milliseconds);
        assert_eq!(TimestampPrecision::from_option_value(3), TimestampPrecision::Nanoseconds);
        assert_eq!(TimestampPrecision::Milliseconds.to_nanos(250), 250_000_000);
        assert_eq!(TimestampPrecision::Nanoseconds.to_nanos(250), 250);
    }

    #[test]
    fn test_permission_group() {
        assert_eq!(PermissionGroup::from_u8(2), Some(PermissionGroup::SystemAdmin));
        assert!(PermissionGroup::from_u8(9).is_none());
        assert!(PermissionGroup::SecurityAdmin.is_admin());
        assert!(!PermissionGroup::ReadOnly.is_admin());
    }

    #[test]
    fn test_client_version_matches_package() {
        let version = ClientVersion::current();
        assert_eq!(version.to_string(), env!("CARGO_PKG_VERSION"));
    }
}
