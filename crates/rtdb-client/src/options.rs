// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Per-session tunables.
//!
//! Options are read on every call, so changing a timeout affects the next
//! request immediately. The TCP user timeout only applies to sockets opened
//! after the change, which includes reconnects.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RtdbError, RtdbResult};
use crate::types::TimestampPrecision;

// =============================================================================
// SessionOption
// =============================================================================

/// Option keys accepted by `get_option` / `set_option`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum SessionOption {
    /// Reconnect automatically after transport loss (0/1).
    AutoReconnect = 0,
    /// Connect timeout in milliseconds, 0 means wait forever.
    ConnectTimeout = 1,
    /// Send timeout in milliseconds.
    SendTimeout = 2,
    /// Receive timeout in milliseconds.
    RecvTimeout = 3,
    /// TCP user timeout in milliseconds.
    UserTimeout = 4,
    /// Precision assumed when the server does not report one.
    DefaultPrecision = 5,
    /// Precision negotiated with the server (0 = ms, nonzero = ns).
    ServerPrecision = 6,
}

impl SessionOption {
    /// All option keys.
    pub const ALL: [SessionOption; 7] = [
        Self::AutoReconnect,
        Self::ConnectTimeout,
        Self::SendTimeout,
        Self::RecvTimeout,
        Self::UserTimeout,
        Self::DefaultPrecision,
        Self::ServerPrecision,
    ];

    /// Returns the option name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::AutoReconnect => "auto_reconnect",
            Self::ConnectTimeout => "connect_timeout",
            Self::SendTimeout => "send_timeout",
            Self::RecvTimeout => "recv_timeout",
            Self::UserTimeout => "user_timeout",
            Self::DefaultPrecision => "default_precision",
            Self::ServerPrecision => "server_precision",
        }
    }
}

impl TryFrom<i32> for SessionOption {
    type Error = RtdbError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Self::ALL
            .iter()
            .copied()
            .find(|opt| *opt as i32 == value)
            .ok_or_else(|| RtdbError::invalid_option(value.to_string(), "unknown option key"))
    }
}

impl fmt::Display for SessionOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// SessionOptions
// =============================================================================

/// Current option values for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Reconnect automatically after transport loss.
    pub auto_reconnect: bool,

    /// Connect timeout. Zero waits forever.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Timeout for writing one frame.
    #[serde(with = "humantime_serde")]
    pub send_timeout: Duration,

    /// Timeout for a reply to arrive.
    #[serde(with = "humantime_serde")]
    pub recv_timeout: Duration,

    /// TCP user timeout applied to new sockets.
    #[serde(with = "humantime_serde")]
    pub user_timeout: Duration,

    /// Precision used when the server does not report one.
    pub default_precision: TimestampPrecision,

    /// Precision in effect for event timestamps.
    pub server_precision: TimestampPrecision,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            auto_reconnect: false,
            connect_timeout: Duration::from_millis(1000),
            send_timeout: Duration::from_millis(1000),
            recv_timeout: Duration::from_millis(60_000),
            user_timeout: Duration::from_millis(10_000),
            default_precision: TimestampPrecision::Milliseconds,
            server_precision: TimestampPrecision::Milliseconds,
        }
    }
}

impl SessionOptions {
    /// Returns the connect timeout, or `None` when it is infinite.
    pub fn connect_deadline(&self) -> Option<Duration> {
        if self.connect_timeout.is_zero() {
            None
        } else {
            Some(self.connect_timeout)
        }
    }

    /// Reads an option as its integer form.
    pub fn get(&self, option: SessionOption) -> i64 {
        match option {
            SessionOption::AutoReconnect => i64::from(self.auto_reconnect),
            SessionOption::ConnectTimeout => millis(self.connect_timeout),
            SessionOption::SendTimeout => millis(self.send_timeout),
            SessionOption::RecvTimeout => millis(self.recv_timeout),
            SessionOption::UserTimeout => millis(self.user_timeout),
            SessionOption::DefaultPrecision => self.default_precision.as_option_value(),
            SessionOption::ServerPrecision => self.server_precision.as_option_value(),
        }
    }

    /// Writes an option from its integer form.
    pub fn set(&mut self, option: SessionOption, value: i64) -> RtdbResult<()> {
        match option {
            SessionOption::AutoReconnect => {
                self.auto_reconnect = match value {
                    0 => false,
                    1 => true,
                    _ => {
                        return Err(RtdbError::invalid_option(
                            option.name(),
                            format!("expected 0 or 1, got {value}"),
                        ))
                    }
                };
            }
            SessionOption::ConnectTimeout => {
                self.connect_timeout = duration_value(option, value, true)?;
            }
            SessionOption::SendTimeout => {
                self.send_timeout = duration_value(option, value, false)?;
            }
            SessionOption::RecvTimeout => {
                self.recv_timeout = duration_value(option, value, false)?;
            }
            SessionOption::UserTimeout => {
                self.user_timeout = duration_value(option, value, true)?;
            }
            SessionOption::DefaultPrecision => {
                self.default_precision = precision_value(option, value)?;
            }
            SessionOption::ServerPrecision => {
                self.server_precision = precision_value(option, value)?;
            }
        }
        Ok(())
    }

    /// Checks every value for consistency.
    pub fn validate(&self) -> RtdbResult<()> {
        if self.send_timeout.is_zero() {
            return Err(RtdbError::invalid_option(
                SessionOption::SendTimeout.name(),
                "must be greater than zero",
            ));
        }
        if self.recv_timeout.is_zero() {
            return Err(RtdbError::invalid_option(
                SessionOption::RecvTimeout.name(),
                "must be greater than zero",
            ));
        }
        for (option, duration) in [
            (SessionOption::ConnectTimeout, self.connect_timeout),
            (SessionOption::SendTimeout, self.send_timeout),
            (SessionOption::RecvTimeout, self.recv_timeout),
            (SessionOption::UserTimeout, self.user_timeout),
        ] {
            if duration.as_millis() > u32::MAX as u128 {
                return Err(RtdbError::invalid_option(option.name(), "value out of range"));
            }
        }
        Ok(())
    }
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn duration_value(option: SessionOption, value: i64, allow_zero: bool) -> RtdbResult<Duration> {
    if value < 0 || value > u32::MAX as i64 {
        return Err(RtdbError::invalid_option(
            option.name(),
            format!("{value} ms is out of range"),
        ));
    }
    if value == 0 && !allow_zero {
        return Err(RtdbError::invalid_option(
            option.name(),
            "must be greater than zero",
        ));
    }
    Ok(Duration::from_millis(value as u64))
}

fn precision_value(option: SessionOption, value: i64) -> RtdbResult<TimestampPrecision> {
    if value < 0 {
        return Err(RtdbError::invalid_option(
            option.name(),
            format!("{value} is not a precision"),
        ));
    }
    Ok(TimestampPrecision::from_option_value(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = SessionOptions::default();
        assert_eq!(opts.get(SessionOption::AutoReconnect), 0);
        assert_eq!(opts.get(SessionOption::ConnectTimeout), 1000);
        assert_eq!(opts.get(SessionOption::SendTimeout), 1000);
        assert_eq!(opts.get(SessionOption::RecvTimeout), 60_000);
        assert_eq!(opts.get(SessionOption::UserTimeout), 10_000);
        assert_eq!(opts.get(SessionOption::ServerPrecision), 0);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_set_and_get() {
        let mut opts = SessionOptions::default();
        opts.set(SessionOption::AutoReconnect, 1).unwrap();
        opts.set(SessionOption::RecvTimeout, 250).unwrap();
        opts.set(SessionOption::ConnectTimeout, 0).unwrap();
        opts.set(SessionOption::ServerPrecision, 7).unwrap();

        assert!(opts.auto_reconnect);
        assert_eq!(opts.recv_timeout, Duration::from_millis(250));
        assert_eq!(opts.connect_deadline(), None);
        assert_eq!(opts.server_precision, TimestampPrecision::Nanoseconds);
        assert_eq!(opts.get(SessionOption::ServerPrecision), 1);
    }

    #[test]
    fn test_invalid_values() {
        let mut opts = SessionOptions::default();
        assert!(matches!(
            opts.set(SessionOption::AutoReconnect, 2),
            Err(RtdbError::InvalidOption { .. })
        ));
        assert!(opts.set(SessionOption::SendTimeout, 0).is_err());
        assert!(opts.set(SessionOption::RecvTimeout, -5).is_err());
        assert!(opts.set(SessionOption::DefaultPrecision, -1).is_err());
        assert_eq!(opts, SessionOptions::default());
    }

    #[test]
    fn test_raw_keys() {
        assert_eq!(SessionOption::try_from(3).unwrap(), SessionOption::RecvTimeout);
        assert!(matches!(
            SessionOption::try_from(99),
            Err(RtdbError::InvalidOption { .. })
        ));
    }
}
