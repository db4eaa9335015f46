// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Frame header types.

use std::fmt;

use bytes::Bytes;

use crate::error::{ProtocolError, StatusCode};

/// Direction of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    /// Client to server request.
    Request = 1,
    /// Server reply to a request.
    Response = 2,
    /// Unsolicited server push.
    Event = 3,
}

impl TryFrom<u8> for FrameKind {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Request),
            2 => Ok(Self::Response),
            3 => Ok(Self::Event),
            other => Err(ProtocolError::UnknownFrameKind(other)),
        }
    }
}

/// Operation carried by a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    /// Authenticate with user and password.
    Login = 0x0001,
    /// End the session.
    Logout = 0x0002,
    /// Re-authenticate with a resume token.
    Resume = 0x0003,
    /// Set a server-side session option.
    SetOption = 0x0010,
    /// Count connections on the server.
    ConnectionCount = 0x0020,
    /// Echo the payload back.
    Echo = 0x0030,
    /// Create a subscription.
    Subscribe = 0x0100,
    /// Remove a subscription.
    Unsubscribe = 0x0101,
    /// Pushed batch of samples.
    EventBatch = 0x0200,
}

impl Opcode {
    /// Returns the operation name used in logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Logout => "logout",
            Self::Resume => "resume",
            Self::SetOption => "set_option",
            Self::ConnectionCount => "connection_count",
            Self::Echo => "echo",
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::EventBatch => "event_batch",
        }
    }
}

impl TryFrom<u16> for Opcode {
    type Error = ProtocolError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Ok(match value {
            0x0001 => Self::Login,
            0x0002 => Self::Logout,
            0x0003 => Self::Resume,
            0x0010 => Self::SetOption,
            0x0020 => Self::ConnectionCount,
            0x0030 => Self::Echo,
            0x0100 => Self::Subscribe,
            0x0101 => Self::Unsubscribe,
            0x0200 => Self::EventBatch,
            other => return Err(ProtocolError::UnknownOpcode(other)),
        })
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One decoded protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame direction.
    pub kind: FrameKind,
    /// Operation.
    pub opcode: Opcode,
    /// Reserved flags, zero in version 1.
    pub flags: u16,
    /// Correlation id shared by a request and its response.
    pub correlation_id: u32,
    /// Status of a response; zero for requests and events.
    pub status: i32,
    /// Raw payload.
    pub payload: Bytes,
}

impl Frame {
    /// Builds a request frame.
    pub fn request(opcode: Opcode, correlation_id: u32, payload: Bytes) -> Self {
        Self {
            kind: FrameKind::Request,
            opcode,
            flags: 0,
            correlation_id,
            status: StatusCode::Success.as_i32(),
            payload,
        }
    }

    /// Builds a response frame.
    pub fn response(opcode: Opcode, correlation_id: u32, status: i32, payload: Bytes) -> Self {
        Self {
            kind: FrameKind::Response,
            opcode,
            flags: 0,
            correlation_id,
            status,
            payload,
        }
    }

    /// Builds an event frame.
    pub fn event(opcode: Opcode, payload: Bytes) -> Self {
        Self {
            kind: FrameKind::Event,
            opcode,
            flags: 0,
            correlation_id: 0,
            status: StatusCode::Success.as_i32(),
            payload,
        }
    }

    /// Returns `true` if the status is success.
    pub fn is_success(&self) -> bool {
        self.status == StatusCode::Success.as_i32()
    }
}
