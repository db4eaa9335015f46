// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Error types for the real-time database client.
//!
//! Every fallible operation returns [`RtdbResult`]. Errors are grouped by the
//! layer that detects them and each one maps onto a wire-level [`StatusCode`]
//! so that higher layers (or foreign callers) can work with a plain integer.
//!
//! # Error Categories
//!
//! ```text
//! RtdbError
//! ├── Network          - refused, reset, unreachable, I/O
//! ├── Timeout          - connect/send/receive/call deadline exceeded
//! ├── Auth             - bad credentials, insufficient permission
//! ├── Protocol         - malformed frames, mismatched batch lengths
//! ├── Configuration    - invalid configuration files or values
//! ├── Closed           - operation on a terminated session
//! ├── AlreadyClosed    - logout of a session that is already closed
//! ├── InvalidOption    - bad option key or value
//! ├── InvalidTag       - bad tag id list
//! ├── InvalidParameter - other bad caller input
//! └── NotFound         - unknown subscription or connection handle
//! ```
//!
//! # Examples
//!
//! ```
//! use rtdb_client::error::{NetworkError, RtdbError, StatusCode};
//!
//! let error = RtdbError::from(NetworkError::refused("127.0.0.1:6327"));
//! assert_eq!(error.status_code(), StatusCode::Network);
//! assert!(error.is_retryable());
//! ```

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::Level;

// =============================================================================
// StatusCode
// =============================================================================

/// Integer status codes used on the wire and at the public boundary.
///
/// Zero means success; every other value names one error class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum StatusCode {
    /// Operation succeeded.
    Success = 0,
    /// Authentication failed.
    AuthFailed = 1,
    /// A deadline was exceeded.
    Timeout = 2,
    /// Transport-level failure.
    Network = 3,
    /// The caller supplied an invalid parameter.
    InvalidParameter = 4,
    /// The session was already closed.
    AlreadyClosed = 5,
    /// The referenced handle does not exist.
    NotFound = 6,
    /// The session or connection is closed.
    Closed = 7,
    /// Malformed or unexpected protocol data.
    Protocol = 8,
    /// The permission group does not allow the operation.
    PermissionDenied = 9,
}

impl StatusCode {
    /// Returns the raw integer value.
    #[inline]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// Parses a raw status value. Unknown values yield `None`.
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Success),
            1 => Some(Self::AuthFailed),
            2 => Some(Self::Timeout),
            3 => Some(Self::Network),
            4 => Some(Self::InvalidParameter),
            5 => Some(Self::AlreadyClosed),
            6 => Some(Self::NotFound),
            7 => Some(Self::Closed),
            8 => Some(Self::Protocol),
            9 => Some(Self::PermissionDenied),
            _ => None,
        }
    }

    /// Returns `true` for [`StatusCode::Success`].
    #[inline]
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    /// Returns the canonical name of this status.
    pub fn name(self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::AuthFailed => "AuthFailed",
            Self::Timeout => "Timeout",
            Self::Network => "Network",
            Self::InvalidParameter => "InvalidParameter",
            Self::AlreadyClosed => "AlreadyClosed",
            Self::NotFound => "NotFound",
            Self::Closed => "Closed",
            Self::Protocol => "Protocol",
            Self::PermissionDenied => "PermissionDenied",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.as_i32())
    }
}

// =============================================================================
// RtdbError - Main Error Type
// =============================================================================

/// The main error type for client operations.
#[derive(Debug, Error)]
pub enum RtdbError {
    /// Transport-level failures.
    #[error("{0}")]
    Network(#[from] NetworkError),

    /// Deadline exceeded.
    #[error("{0}")]
    Timeout(#[from] TimeoutError),

    /// Authentication and authorization failures.
    #[error("{0}")]
    Auth(#[from] AuthError),

    /// Malformed frames or batches.
    #[error("{0}")]
    Protocol(#[from] ProtocolError),

    /// Invalid configuration.
    #[error("{0}")]
    Configuration(#[from] ConfigError),

    /// Operation attempted on a terminated session or connection.
    #[error("Session closed: {reason}")]
    Closed {
        /// Why the session is unusable.
        reason: String,
    },

    /// Logout of a session that is already closed.
    #[error("Session already closed")]
    AlreadyClosed,

    /// Invalid option key or value.
    #[error("Invalid option '{option}': {reason}")]
    InvalidOption {
        /// Option name or raw key.
        option: String,
        /// Reason the option was rejected.
        reason: String,
    },

    /// Invalid tag id list.
    #[error("Invalid tag selection: {reason}")]
    InvalidTag {
        /// Reason the tags were rejected.
        reason: String,
    },

    /// Any other invalid caller input.
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter {
        /// Parameter name.
        name: String,
        /// Reason the parameter was rejected.
        reason: String,
    },

    /// Lookup of an unknown handle.
    #[error("{kind} {id} not found")]
    NotFound {
        /// Kind of handle ("subscription", "connection").
        kind: &'static str,
        /// Raw handle value.
        id: i64,
    },
}

impl RtdbError {
    // =========================================================================
    // Factory Methods
    // =========================================================================

    /// Creates a closed error.
    pub fn closed(reason: impl Into<String>) -> Self {
        Self::Closed {
            reason: reason.into(),
        }
    }

    /// Creates an invalid option error.
    pub fn invalid_option(option: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidOption {
            option: option.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid tag error.
    pub fn invalid_tag(reason: impl Into<String>) -> Self {
        Self::InvalidTag {
            reason: reason.into(),
        }
    }

    /// Creates an invalid parameter error.
    pub fn invalid_parameter(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a not found error.
    pub fn not_found(kind: &'static str, id: impl Into<i64>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Translates a non-success status returned by the server.
    ///
    /// `operation` names the request that failed and is carried into the
    /// resulting error for diagnostics.
    pub fn from_status(status: i32, operation: &str) -> Self {
        match StatusCode::from_i32(status) {
            Some(StatusCode::Success) | None => {
                Self::Protocol(ProtocolError::UnknownStatus {
                    status,
                    operation: operation.to_string(),
                })
            }
            Some(StatusCode::AuthFailed) => Self::Auth(AuthError::rejected(operation)),
            Some(StatusCode::PermissionDenied) => {
                Self::Auth(AuthError::permission_denied(operation))
            }
            Some(StatusCode::Timeout) => Self::Timeout(TimeoutError::Server {
                operation: operation.to_string(),
            }),
            Some(StatusCode::Network) => Self::Network(NetworkError::Remote {
                operation: operation.to_string(),
            }),
            Some(StatusCode::InvalidParameter) => {
                Self::invalid_parameter(operation, "rejected by server")
            }
            Some(StatusCode::AlreadyClosed) | Some(StatusCode::Closed) => {
                Self::closed(format!("server reports session closed during {operation}"))
            }
            Some(StatusCode::NotFound) => Self::NotFound {
                kind: "server object",
                id: -1,
            },
            Some(StatusCode::Protocol) => Self::Protocol(ProtocolError::Rejected {
                operation: operation.to_string(),
            }),
        }
    }

    // =========================================================================
    // Error Properties
    // =========================================================================

    /// Returns the wire status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Network(_) => StatusCode::Network,
            Self::Timeout(_) => StatusCode::Timeout,
            Self::Auth(AuthError::PermissionDenied { .. }) => StatusCode::PermissionDenied,
            Self::Auth(_) => StatusCode::AuthFailed,
            Self::Protocol(_) => StatusCode::Protocol,
            Self::Configuration(_) => StatusCode::InvalidParameter,
            Self::Closed { .. } => StatusCode::Closed,
            Self::AlreadyClosed => StatusCode::AlreadyClosed,
            Self::InvalidOption { .. }
            | Self::InvalidTag { .. }
            | Self::InvalidParameter { .. } => StatusCode::InvalidParameter,
            Self::NotFound { .. } => StatusCode::NotFound,
        }
    }

    /// Returns `true` if retrying the operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(e) => e.is_retryable(),
            Self::Timeout(_) => true,
            Self::Auth(_)
            | Self::Protocol(_)
            | Self::Configuration(_)
            | Self::Closed { .. }
            | Self::AlreadyClosed
            | Self::InvalidOption { .. }
            | Self::InvalidTag { .. }
            | Self::InvalidParameter { .. }
            | Self::NotFound { .. } => false,
        }
    }

    /// Returns `true` if the error means the session can no longer be used.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed { .. } | Self::AlreadyClosed)
    }

    /// Returns the severity level of this error.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Network(e) => e.severity(),
            Self::Timeout(_) => ErrorSeverity::Warning,
            Self::Auth(_) => ErrorSeverity::Error,
            Self::Protocol(_) => ErrorSeverity::Error,
            Self::Configuration(_) => ErrorSeverity::Critical,
            Self::Closed { .. } | Self::AlreadyClosed => ErrorSeverity::Warning,
            Self::InvalidOption { .. }
            | Self::InvalidTag { .. }
            | Self::InvalidParameter { .. } => ErrorSeverity::Warning,
            Self::NotFound { .. } => ErrorSeverity::Info,
        }
    }

    /// Returns the error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Timeout(_) => "timeout",
            Self::Auth(_) => "auth",
            Self::Protocol(_) => "protocol",
            Self::Configuration(_) => "configuration",
            Self::Closed { .. } | Self::AlreadyClosed => "closed",
            Self::InvalidOption { .. } => "invalid_option",
            Self::InvalidTag { .. } => "invalid_tag",
            Self::InvalidParameter { .. } => "invalid_parameter",
            Self::NotFound { .. } => "not_found",
        }
    }

    /// Returns the tracing level for this error.
    pub fn tracing_level(&self) -> Level {
        self.severity().to_tracing_level()
    }

    /// Logs this error with a level matching its severity.
    pub fn log(&self, context: &str) {
        let status = self.status_code();

        match self.tracing_level() {
            Level::ERROR => tracing::error!(
                status = %status,
                category = self.category(),
                context = context,
                retryable = self.is_retryable(),
                "{self}"
            ),
            Level::WARN => tracing::warn!(
                status = %status,
                category = self.category(),
                context = context,
                retryable = self.is_retryable(),
                "{self}"
            ),
            _ => tracing::debug!(
                status = %status,
                category = self.category(),
                context = context,
                "{self}"
            ),
        }
    }
}

impl From<io::Error> for RtdbError {
    fn from(error: io::Error) -> Self {
        Self::Network(NetworkError::from(error))
    }
}

// =============================================================================
// NetworkError
// =============================================================================

/// Transport-level errors.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// The server rejected the connection attempt.
    #[error("Connection refused by '{endpoint}'")]
    Refused {
        /// Target endpoint.
        endpoint: String,
        /// Underlying error.
        #[source]
        source: Option<io::Error>,
    },

    /// Host name could not be resolved.
    #[error("Failed to resolve host '{host}'")]
    DnsFailed {
        /// Host name.
        host: String,
        /// Underlying error.
        #[source]
        source: Option<io::Error>,
    },

    /// The connection was reset or aborted by the peer.
    #[error("Connection reset: {reason}")]
    Reset {
        /// Reset reason.
        reason: String,
    },

    /// The session is between transports (reconnect in progress).
    #[error("Not connected (reconnect in progress)")]
    Disconnected,

    /// The server reported a network failure on its side.
    #[error("Server reported a network failure during {operation}")]
    Remote {
        /// Operation that failed.
        operation: String,
    },

    /// Other I/O failure.
    #[error("I/O error: {message}")]
    Io {
        /// Error message.
        message: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

impl NetworkError {
    /// Creates a connection refused error.
    pub fn refused(endpoint: impl Into<String>) -> Self {
        Self::Refused {
            endpoint: endpoint.into(),
            source: None,
        }
    }

    /// Creates a connection refused error with source.
    pub fn refused_with(endpoint: impl Into<String>, source: io::Error) -> Self {
        Self::Refused {
            endpoint: endpoint.into(),
            source: Some(source),
        }
    }

    /// Creates a DNS resolution failure.
    pub fn dns_failed(host: impl Into<String>, source: Option<io::Error>) -> Self {
        Self::DnsFailed {
            host: host.into(),
            source,
        }
    }

    /// Creates a connection reset error.
    pub fn reset(reason: impl Into<String>) -> Self {
        Self::Reset {
            reason: reason.into(),
        }
    }

    /// Creates an I/O error.
    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Refused { .. } | Self::Reset { .. } | Self::Disconnected | Self::Remote { .. } => {
                true
            }
            Self::DnsFailed { .. } => false,
            Self::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
            ),
        }
    }

    /// Returns the severity level.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Disconnected | Self::Reset { .. } => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        }
    }
}

impl From<io::Error> for NetworkError {
    fn from(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::ConnectionRefused => Self::Refused {
                endpoint: "unknown".to_string(),
                source: Some(error),
            },
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => Self::Reset {
                reason: error.to_string(),
            },
            _ => Self::Io {
                message: error.to_string(),
                source: error,
            },
        }
    }
}

// =============================================================================
// TimeoutError
// =============================================================================

/// Deadline-exceeded errors.
#[derive(Debug, Error)]
pub enum TimeoutError {
    /// Connection establishment timed out.
    #[error("Connect to '{endpoint}' timed out after {duration:?}")]
    Connect {
        /// Target endpoint.
        endpoint: String,
        /// Timeout duration.
        duration: Duration,
    },

    /// Writing a frame timed out.
    #[error("Send timed out after {duration:?}")]
    Send {
        /// Timeout duration.
        duration: Duration,
    },

    /// No reply arrived within the receive timeout.
    #[error("{operation} timed out after {duration:?} waiting for reply")]
    Call {
        /// Operation name.
        operation: String,
        /// Timeout duration.
        duration: Duration,
    },

    /// The server reported a timeout on its side.
    #[error("Server reported a timeout during {operation}")]
    Server {
        /// Operation name.
        operation: String,
    },
}

impl TimeoutError {
    /// Creates a connect timeout.
    pub fn connect(endpoint: impl Into<String>, duration: Duration) -> Self {
        Self::Connect {
            endpoint: endpoint.into(),
            duration,
        }
    }

    /// Creates a send timeout.
    pub fn send(duration: Duration) -> Self {
        Self::Send { duration }
    }

    /// Creates a call (receive) timeout.
    pub fn call(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Call {
            operation: operation.into(),
            duration,
        }
    }

    /// Returns the timeout duration, if known locally.
    pub fn duration(&self) -> Option<Duration> {
        match self {
            Self::Connect { duration, .. } | Self::Send { duration } | Self::Call { duration, .. } => {
                Some(*duration)
            }
            Self::Server { .. } => None,
        }
    }
}

// =============================================================================
// AuthError
// =============================================================================

/// Authentication and authorization errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The server rejected the supplied credentials.
    #[error("Authentication failed for user '{user}'")]
    BadCredentials {
        /// User name.
        user: String,
    },

    /// The server rejected an authenticated request.
    #[error("Server rejected {operation}: authentication required")]
    Rejected {
        /// Operation name.
        operation: String,
    },

    /// The session's permission group does not allow the operation.
    #[error("Permission denied for {operation}")]
    PermissionDenied {
        /// Operation name.
        operation: String,
    },

    /// The server refused the resume token during reconnect.
    #[error("Resume token rejected by server")]
    ResumeRejected,
}

impl AuthError {
    /// Creates a bad credentials error.
    pub fn bad_credentials(user: impl Into<String>) -> Self {
        Self::BadCredentials { user: user.into() }
    }

    /// Creates a rejected error.
    pub fn rejected(operation: impl Into<String>) -> Self {
        Self::Rejected {
            operation: operation.into(),
        }
    }

    /// Creates a permission denied error.
    pub fn permission_denied(operation: impl Into<String>) -> Self {
        Self::PermissionDenied {
            operation: operation.into(),
        }
    }
}

// =============================================================================
// ProtocolError
// =============================================================================

/// Malformed frames and payloads.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame did not start with the protocol magic.
    #[error("Bad frame magic 0x{found:04X}")]
    BadMagic {
        /// Value found.
        found: u16,
    },

    /// Unsupported protocol version.
    #[error("Unsupported protocol version {version}")]
    UnsupportedVersion {
        /// Version found.
        version: u8,
    },

    /// Frame payload exceeds the maximum size.
    #[error("Frame of {size} bytes exceeds maximum of {max}")]
    FrameTooLarge {
        /// Declared size.
        size: usize,
        /// Maximum size.
        max: usize,
    },

    /// Unknown frame kind.
    #[error("Unknown frame kind {0}")]
    UnknownFrameKind(u8),

    /// Unknown opcode.
    #[error("Unknown opcode 0x{0:04X}")]
    UnknownOpcode(u16),

    /// Unknown event kind in a pushed batch.
    #[error("Unknown event kind {0}")]
    UnknownEventKind(u8),

    /// Payload ended before a field could be read.
    #[error("Truncated payload while reading {field}")]
    Truncated {
        /// Field being read.
        field: &'static str,
    },

    /// A string field is not valid UTF-8.
    #[error("Field {field} is not valid UTF-8")]
    InvalidUtf8 {
        /// Field name.
        field: &'static str,
    },

    /// A string or blob field exceeds its wire limit.
    #[error("Field {field} is {size} bytes, limit is {max}")]
    FieldTooLong {
        /// Field name.
        field: &'static str,
        /// Actual size.
        size: usize,
        /// Limit.
        max: usize,
    },

    /// Parallel batch arrays have different lengths.
    #[error("Batch array '{field}' has {actual} items, expected {expected}")]
    LengthMismatch {
        /// Array that disagrees with the id array.
        field: &'static str,
        /// Length of the id array.
        expected: usize,
        /// Length of the offending array.
        actual: usize,
    },

    /// Reply opcode does not match the request.
    #[error("Expected reply to {expected}, got {actual}")]
    UnexpectedReply {
        /// Request opcode.
        expected: String,
        /// Reply opcode.
        actual: String,
    },

    /// Server reused a subscription handle still in use.
    #[error("Server assigned duplicate subscription handle {handle}")]
    DuplicateSubscription {
        /// Server handle.
        handle: u32,
    },

    /// Server rejected the request as malformed.
    #[error("Server rejected {operation} as malformed")]
    Rejected {
        /// Operation name.
        operation: String,
    },

    /// Server answered with a status this client does not know.
    #[error("Unknown status {status} in reply to {operation}")]
    UnknownStatus {
        /// Raw status value.
        status: i32,
        /// Operation name.
        operation: String,
    },

    /// A field carried a value outside its defined range.
    #[error("Invalid value {value} for field '{field}'")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// Raw value.
        value: i64,
    },
}

impl ProtocolError {
    /// Creates a truncated payload error.
    pub fn truncated(field: &'static str) -> Self {
        Self::Truncated { field }
    }

    /// Creates a batch length mismatch error.
    pub fn length_mismatch(field: &'static str, expected: usize, actual: usize) -> Self {
        Self::LengthMismatch {
            field,
            expected,
            actual,
        }
    }
}

// =============================================================================
// ConfigError
// =============================================================================

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file does not exist.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// File path.
        path: PathBuf,
    },

    /// Configuration file could not be read.
    #[error("Failed to read configuration file {path}: {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// File extension does not map to a supported format.
    #[error("Unsupported configuration format: {extension}")]
    UnsupportedFormat {
        /// Extension found.
        extension: String,
    },

    /// Content could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    Parse {
        /// Parser message.
        message: String,
    },

    /// Referenced environment variable is not set and has no default.
    #[error("Environment variable '{name}' is not set")]
    MissingEnvVar {
        /// Variable name.
        name: String,
    },

    /// A value failed validation.
    #[error("Invalid value for '{field}': {reason}")]
    Validation {
        /// Field name.
        field: String,
        /// Reason.
        reason: String,
    },
}

impl ConfigError {
    /// Creates a file not found error.
    pub fn file_not_found(path: &Path) -> Self {
        Self::FileNotFound {
            path: path.to_path_buf(),
        }
    }

    /// Creates an I/O error.
    pub fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Creates a parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Creates a validation error.
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// ErrorSeverity
// =============================================================================

/// Error severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    /// Informational - no action required.
    Info,
    /// Warning - action may be required.
    Warning,
    /// Error - action required, but recoverable.
    Error,
    /// Critical - immediate action required.
    Critical,
}

impl ErrorSeverity {
    /// Converts to tracing level.
    pub fn to_tracing_level(self) -> Level {
        match self {
            Self::Info => Level::INFO,
            Self::Warning => Level::WARN,
            Self::Error | Self::Critical => Level::ERROR,
        }
    }

    /// Returns the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// A Result type with [`RtdbError`].
pub type RtdbResult<T> = Result<T, RtdbError>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_roundtrip_values() {
        for raw in 0..=9 {
            let code = StatusCode::from_i32(raw).unwrap();
            assert_eq!(code.as_i32(), raw);
        }
        assert!(StatusCode::from_i32(42).is_none());
        assert!(StatusCode::Success.is_success());
        assert_eq!(StatusCode::NotFound.to_string(), "NotFound(6)");
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            RtdbError::from(NetworkError::refused("h:1")).status_code(),
            StatusCode::Network
        );
        assert_eq!(
            RtdbError::from(TimeoutError::send(Duration::from_secs(1))).status_code(),
            StatusCode::Timeout
        );
        assert_eq!(
            RtdbError::from(AuthError::bad_credentials("op")).status_code(),
            StatusCode::AuthFailed
        );
        assert_eq!(
            RtdbError::from(AuthError::permission_denied("subscribe")).status_code(),
            StatusCode::PermissionDenied
        );
        assert_eq!(RtdbError::AlreadyClosed.status_code(), StatusCode::AlreadyClosed);
        assert_eq!(
            RtdbError::not_found("subscription", 7u32).status_code(),
            StatusCode::NotFound
        );
        assert_eq!(
            RtdbError::invalid_tag("empty").status_code(),
            StatusCode::InvalidParameter
        );
    }

    #[test]
    fn test_from_status() {
        assert!(matches!(
            RtdbError::from_status(1, "login"),
            RtdbError::Auth(AuthError::Rejected { .. })
        ));
        assert!(matches!(
            RtdbError::from_status(9, "set_option"),
            RtdbError::Auth(AuthError::PermissionDenied { .. })
        ));
        assert!(matches!(
            RtdbError::from_status(6, "unsubscribe"),
            RtdbError::NotFound { .. }
        ));
        assert!(matches!(
            RtdbError::from_status(1234, "echo"),
            RtdbError::Protocol(ProtocolError::UnknownStatus { status: 1234, .. })
        ));
    }

    #[test]
    fn test_retryable() {
        assert!(RtdbError::from(NetworkError::refused("h:1")).is_retryable());
        assert!(!RtdbError::from(NetworkError::dns_failed("nohost", None)).is_retryable());
        assert!(RtdbError::from(TimeoutError::call("echo", Duration::from_millis(5))).is_retryable());
        assert!(!RtdbError::AlreadyClosed.is_retryable());
        assert!(!RtdbError::from(ProtocolError::truncated("ids")).is_retryable());
    }

    #[test]
    fn test_io_error_conversion() {
        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(
            NetworkError::from(refused),
            NetworkError::Refused { .. }
        ));

        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        assert!(matches!(NetworkError::from(reset), NetworkError::Reset { .. }));
    }

    #[test]
    fn test_severity() {
        assert_eq!(RtdbError::AlreadyClosed.severity(), ErrorSeverity::Warning);
        assert_eq!(
            RtdbError::from(ConfigError::parse("bad")).severity(),
            ErrorSeverity::Critical
        );
        assert_eq!(ErrorSeverity::Critical.to_tracing_level(), Level::ERROR);
        assert!(ErrorSeverity::Info < ErrorSeverity::Critical);
    }

    #[test]
    fn test_length_mismatch_message() {
        let error = ProtocolError::length_mismatch("values", 5, 4);
        assert_eq!(error.to_string(), "Batch array 'values' has 4 items, expected 5");
    }
}
