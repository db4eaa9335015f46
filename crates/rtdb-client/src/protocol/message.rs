// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Payload layouts for each opcode.
//!
//! Strings and blobs carry a `u16` length prefix; strings are UTF-8. Arrays
//! carry a `u32` element count. Encoding never validates semantic
//! constraints; that is left to the layer that consumes the message.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{ProtocolError, RtdbError, RtdbResult};

/// Login reply precision byte meaning "server did not say".
pub const PRECISION_UNSPECIFIED: u8 = 0xFF;

// =============================================================================
// WireWriter / WireReader
// =============================================================================

/// Big-endian payload builder.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: BytesMut,
}

impl WireWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a `u8`.
    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.buf.put_u8(value);
        self
    }

    /// Appends an `i16`.
    pub fn i16(&mut self, value: i16) -> &mut Self {
        self.buf.put_i16(value);
        self
    }

    /// Appends a `u32`.
    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.buf.put_u32(value);
        self
    }

    /// Appends an `i32`.
    pub fn i32(&mut self, value: i32) -> &mut Self {
        self.buf.put_i32(value);
        self
    }

    /// Appends a `u64`.
    pub fn u64(&mut self, value: u64) -> &mut Self {
        self.buf.put_u64(value);
        self
    }

    /// Appends an `i64`.
    pub fn i64(&mut self, value: i64) -> &mut Self {
        self.buf.put_i64(value);
        self
    }

    /// Appends an `f64`.
    pub fn f64(&mut self, value: f64) -> &mut Self {
        self.buf.put_f64(value);
        self
    }

    /// Appends a length-prefixed blob.
    pub fn blob(&mut self, field: &'static str, value: &[u8]) -> RtdbResult<&mut Self> {
        let len = u16::try_from(value.len()).map_err(|_| ProtocolError::FieldTooLong {
            field,
            size: value.len(),
            max: u16::MAX as usize,
        })?;
        self.buf.put_u16(len);
        self.buf.extend_from_slice(value);
        Ok(self)
    }

    /// Appends a length-prefixed UTF-8 string.
    pub fn string(&mut self, field: &'static str, value: &str) -> RtdbResult<&mut Self> {
        self.blob(field, value.as_bytes())
    }

    /// Appends a counted array.
    pub fn array<T: Copy>(&mut self, items: &[T], mut put: impl FnMut(&mut Self, T)) -> &mut Self {
        self.buf.put_u32(items.len() as u32);
        for item in items {
            put(self, *item);
        }
        self
    }

    /// Finishes the payload.
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Big-endian payload reader that reports which field ran short.
#[derive(Debug)]
pub struct WireReader {
    buf: Bytes,
}

impl WireReader {
    /// Wraps a payload.
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    fn need(&self, field: &'static str, len: usize) -> RtdbResult<()> {
        if self.buf.remaining() < len {
            return Err(ProtocolError::truncated(field).into());
        }
        Ok(())
    }

    /// Reads a `u8`.
    pub fn u8(&mut self, field: &'static str) -> RtdbResult<u8> {
        self.need(field, 1)?;
        Ok(self.buf.get_u8())
    }

    /// Reads an `i16`.
    pub fn i16(&mut self, field: &'static str) -> RtdbResult<i16> {
        self.need(field, 2)?;
        Ok(self.buf.get_i16())
    }

    /// Reads a `u32`.
    pub fn u32(&mut self, field: &'static str) -> RtdbResult<u32> {
        self.need(field, 4)?;
        Ok(self.buf.get_u32())
    }

    /// Reads an `i32`.
    pub fn i32(&mut self, field: &'static str) -> RtdbResult<i32> {
        self.need(field, 4)?;
        Ok(self.buf.get_i32())
    }

    /// Reads a `u64`.
    pub fn u64(&mut self, field: &'static str) -> RtdbResult<u64> {
        self.need(field, 8)?;
        Ok(self.buf.get_u64())
    }

    /// Reads an `i64`.
    pub fn i64(&mut self, field: &'static str) -> RtdbResult<i64> {
        self.need(field, 8)?;
        Ok(self.buf.get_i64())
    }

    /// Reads an `f64`.
    pub fn f64(&mut self, field: &'static str) -> RtdbResult<f64> {
        self.need(field, 8)?;
        Ok(self.buf.get_f64())
    }

    /// Reads a length-prefixed blob.
    pub fn blob(&mut self, field: &'static str) -> RtdbResult<Bytes> {
        self.need(field, 2)?;
        let len = self.buf.get_u16() as usize;
        self.need(field, len)?;
        Ok(self.buf.split_to(len))
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn string(&mut self, field: &'static str) -> RtdbResult<String> {
        let raw = self.blob(field)?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| RtdbError::from(ProtocolError::InvalidUtf8 { field }))
    }

    /// Reads a counted array.
    ///
    /// The declared count is checked against the bytes left so a corrupt
    /// count cannot trigger a huge allocation.
    pub fn array<T>(
        &mut self,
        field: &'static str,
        item_len: usize,
        mut get: impl FnMut(&mut Bytes) -> T,
    ) -> RtdbResult<Vec<T>> {
        let count = self.u32(field)? as usize;
        self.need(field, count.saturating_mul(item_len))?;
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(get(&mut self.buf));
        }
        Ok(items)
    }

    /// Returns the unread remainder.
    pub fn rest(self) -> Bytes {
        self.buf
    }
}

// =============================================================================
// Session messages
// =============================================================================

/// Login request payload.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct LoginRequest {
    /// User name.
    pub user: String,
    /// Password.
    pub password: String,
}

impl LoginRequest {
    /// Encodes the payload.
    pub fn encode(&self) -> RtdbResult<Bytes> {
        let mut w = WireWriter::new();
        w.string("user", &self.user)?;
        w.string("password", &self.password)?;
        Ok(w.finish())
    }

    /// Decodes the payload.
    pub fn decode(payload: Bytes) -> RtdbResult<Self> {
        let mut r = WireReader::new(payload);
        Ok(Self {
            user: r.string("user")?,
            password: r.string("password")?,
        })
    }
}

/// Login and resume reply payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginReply {
    /// Server session id.
    pub session_id: u64,
    /// Raw OS type.
    pub os_type: u8,
    /// Maximum blob length.
    pub max_blob_len: u32,
    /// Raw permission group.
    pub permission: u8,
    /// Raw precision: 0 ms, 1 ns, [`PRECISION_UNSPECIFIED`].
    pub precision: u8,
    /// Opaque token for resuming this session.
    pub resume_token: Bytes,
}

impl LoginReply {
    /// Encodes the payload.
    pub fn encode(&self) -> RtdbResult<Bytes> {
        let mut w = WireWriter::new();
        w.u64(self.session_id)
            .u8(self.os_type)
            .u32(self.max_blob_len)
            .u8(self.permission)
            .u8(self.precision);
        w.blob("resume_token", &self.resume_token)?;
        Ok(w.finish())
    }

    /// Decodes the payload.
    pub fn decode(payload: Bytes) -> RtdbResult<Self> {
        let mut r = WireReader::new(payload);
        Ok(Self {
            session_id: r.u64("session_id")?,
            os_type: r.u8("os_type")?,
            max_blob_len: r.u32("max_blob_len")?,
            permission: r.u8("permission")?,
            precision: r.u8("precision")?,
            resume_token: r.blob("resume_token")?,
        })
    }
}

/// Resume request payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeRequest {
    /// Token from the last login or resume reply.
    pub token: Bytes,
}

impl ResumeRequest {
    /// Encodes the payload.
    pub fn encode(&self) -> RtdbResult<Bytes> {
        let mut w = WireWriter::new();
        w.blob("token", &self.token)?;
        Ok(w.finish())
    }

    /// Decodes the payload.
    pub fn decode(payload: Bytes) -> RtdbResult<Self> {
        Ok(Self {
            token: WireReader::new(payload).blob("token")?,
        })
    }
}

/// Set option request payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetOptionRequest {
    /// Raw option key.
    pub option: u32,
    /// Option value.
    pub value: i64,
}

impl SetOptionRequest {
    /// Encodes the payload.
    pub fn encode(&self) -> Bytes {
        let mut w = WireWriter::new();
        w.u32(self.option).i64(self.value);
        w.finish()
    }

    /// Decodes the payload.
    pub fn decode(payload: Bytes) -> RtdbResult<Self> {
        let mut r = WireReader::new(payload);
        Ok(Self {
            option: r.u32("option")?,
            value: r.i64("value")?,
        })
    }
}

/// Connection count request payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionCountRequest {
    /// Server-side filter.
    pub filter: i32,
}

impl ConnectionCountRequest {
    /// Encodes the payload.
    pub fn encode(&self) -> Bytes {
        let mut w = WireWriter::new();
        w.i32(self.filter);
        w.finish()
    }

    /// Decodes the payload.
    pub fn decode(payload: Bytes) -> RtdbResult<Self> {
        Ok(Self {
            filter: WireReader::new(payload).i32("filter")?,
        })
    }
}

/// Connection count reply payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionCountReply {
    /// Number of matching connections.
    pub count: i32,
}

impl ConnectionCountReply {
    /// Encodes the payload.
    pub fn encode(&self) -> Bytes {
        let mut w = WireWriter::new();
        w.i32(self.count);
        w.finish()
    }

    /// Decodes the payload.
    pub fn decode(payload: Bytes) -> RtdbResult<Self> {
        Ok(Self {
            count: WireReader::new(payload).i32("count")?,
        })
    }
}

// =============================================================================
// Subscription messages
// =============================================================================

/// Subscribe request payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeRequest {
    /// Selector bits.
    pub what: u32,
    /// Tag ids in caller order.
    pub ids: Vec<i32>,
}

impl SubscribeRequest {
    /// Encodes the payload.
    pub fn encode(&self) -> Bytes {
        let mut w = WireWriter::new();
        w.u32(self.what).array(&self.ids, |w, id| {
            w.i32(id);
        });
        w.finish()
    }

    /// Decodes the payload.
    pub fn decode(payload: Bytes) -> RtdbResult<Self> {
        let mut r = WireReader::new(payload);
        Ok(Self {
            what: r.u32("what")?,
            ids: r.array("ids", 4, |b| b.get_i32())?,
        })
    }
}

/// Subscribe reply payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeReply {
    /// Handle assigned by the server.
    pub server_handle: u32,
}

impl SubscribeReply {
    /// Encodes the payload.
    pub fn encode(&self) -> Bytes {
        let mut w = WireWriter::new();
        w.u32(self.server_handle);
        w.finish()
    }

    /// Decodes the payload.
    pub fn decode(payload: Bytes) -> RtdbResult<Self> {
        Ok(Self {
            server_handle: WireReader::new(payload).u32("server_handle")?,
        })
    }
}

/// Unsubscribe request payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnsubscribeRequest {
    /// Server handle to remove.
    pub server_handle: u32,
}

impl UnsubscribeRequest {
    /// Encodes the payload.
    pub fn encode(&self) -> Bytes {
        let mut w = WireWriter::new();
        w.u32(self.server_handle);
        w.finish()
    }

    /// Decodes the payload.
    pub fn decode(payload: Bytes) -> RtdbResult<Self> {
        Ok(Self {
            server_handle: WireReader::new(payload).u32("server_handle")?,
        })
    }
}

// =============================================================================
// Event batch
// =============================================================================

/// Kind of pushed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventKind {
    /// Current values of the subscribed tags.
    Snapshot = 1,
    /// Values that changed since the last batch.
    Change = 2,
}

impl TryFrom<u8> for EventKind {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Snapshot),
            2 => Ok(Self::Change),
            other => Err(ProtocolError::UnknownEventKind(other)),
        }
    }
}

/// Raw pushed batch as it appears on the wire.
///
/// The parallel arrays are not checked for equal length here.
#[derive(Debug, Clone, PartialEq)]
pub struct EventBatchPayload {
    /// Server subscription handle the batch belongs to.
    pub server_handle: u32,
    /// Batch kind.
    pub kind: EventKind,
    /// Tag ids.
    pub ids: Vec<i32>,
    /// Seconds since the Unix epoch.
    pub datetimes: Vec<i64>,
    /// Sub-second part at the session precision.
    pub subtimes: Vec<i32>,
    /// Values.
    pub values: Vec<f64>,
    /// Status codes.
    pub status: Vec<i64>,
    /// Quality flags.
    pub qualities: Vec<i16>,
    /// Per-item error codes.
    pub errors: Vec<i32>,
}

impl EventBatchPayload {
    /// Encodes the payload.
    pub fn encode(&self) -> Bytes {
        let mut w = WireWriter::new();
        w.u32(self.server_handle).u8(self.kind as u8);
        w.array(&self.ids, |w, v| {
            w.i32(v);
        });
        w.array(&self.datetimes, |w, v| {
            w.i64(v);
        });
        w.array(&self.subtimes, |w, v| {
            w.i32(v);
        });
        w.array(&self.values, |w, v| {
            w.f64(v);
        });
        w.array(&self.status, |w, v| {
            w.i64(v);
        });
        w.array(&self.qualities, |w, v| {
            w.i16(v);
        });
        w.array(&self.errors, |w, v| {
            w.i32(v);
        });
        w.finish()
    }

    /// Decodes the payload.
    pub fn decode(payload: Bytes) -> RtdbResult<Self> {
        let mut r = WireReader::new(payload);
        let server_handle = r.u32("server_handle")?;
        let kind = EventKind::try_from(r.u8("kind")?)?;
        Ok(Self {
            server_handle,
            kind,
            ids: r.array("ids", 4, |b| b.get_i32())?,
            datetimes: r.array("datetimes", 8, |b| b.get_i64())?,
            subtimes: r.array("subtimes", 4, |b| b.get_i32())?,
            values: r.array("values", 8, |b| b.get_f64())?,
            status: r.array("status", 8, |b| b.get_i64())?,
            qualities: r.array("qualities", 2, |b| b.get_i16())?,
            errors: r.array("errors", 4, |b| b.get_i32())?,
        })
    }

    /// Reads only the server handle, so a malformed body can still be
    /// attributed to its subscription.
    pub fn peek_server_handle(payload: &Bytes) -> Option<u32> {
        if payload.len() < 4 {
            return None;
        }
        Some(u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_reply_layout() {
        let reply = LoginReply {
            session_id: 42,
            os_type: 2,
            max_blob_len: 4096,
            permission: 1,
            precision: PRECISION_UNSPECIFIED,
            resume_token: Bytes::from_static(b"tok"),
        };
        let bytes = reply.encode().unwrap();
        assert_eq!(bytes.len(), 8 + 1 + 4 + 1 + 1 + 2 + 3);
        assert_eq!(LoginReply::decode(bytes).unwrap(), reply);
    }

    #[test]
    fn test_truncated_payload_names_field() {
        let request = SubscribeRequest {
            what: 7,
            ids: vec![1, 2, 3],
        };
        let bytes = request.encode();
        let err = SubscribeRequest::decode(bytes.slice(..bytes.len() - 2)).unwrap_err();
        assert!(matches!(
            err,
            RtdbError::Protocol(ProtocolError::Truncated { field: "ids" })
        ));
    }

    #[test]
    fn test_string_length_limit() {
        let long = "x".repeat(u16::MAX as usize + 1);
        let request = LoginRequest {
            user: long,
            password: String::new(),
        };
        assert!(matches!(
            request.encode(),
            Err(RtdbError::Protocol(ProtocolError::FieldTooLong { field: "user", .. }))
        ));
    }

    #[test]
    fn test_invalid_utf8() {
        let mut w = WireWriter::new();
        w.blob("user", &[0xFF, 0xFE]).unwrap();
        w.string("password", "p").unwrap();
        assert!(matches!(
            LoginRequest::decode(w.finish()),
            Err(RtdbError::Protocol(ProtocolError::InvalidUtf8 { field: "user" }))
        ));
    }

    #[test]
    fn test_event_batch_keeps_unequal_arrays() {
        let batch = EventBatchPayload {
            server_handle: 5,
            kind: EventKind::Change,
            ids: vec![1, 2],
            datetimes: vec![10, 11],
            subtimes: vec![0, 0],
            values: vec![1.5],
            status: vec![0, 0],
            qualities: vec![0, 0],
            errors: vec![0, 0],
        };
        let bytes = batch.encode();
        assert_eq!(EventBatchPayload::peek_server_handle(&bytes), Some(5));
        let decoded = EventBatchPayload::decode(bytes).unwrap();
        assert_eq!(decoded.values.len(), 1);
        assert_eq!(decoded.ids.len(), 2);
    }

    #[test]
    fn test_array_count_checked_against_remaining() {
        let mut w = WireWriter::new();
        w.u32(7).u32(u32::MAX);
        let err = SubscribeRequest::decode(w.finish()).unwrap_err();
        assert!(matches!(
            err,
            RtdbError::Protocol(ProtocolError::Truncated { field: "ids" })
        ));
    }
}
