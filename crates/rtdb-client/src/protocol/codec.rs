// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Length-delimited frame codec for `tokio_util::codec`.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::frame::{Frame, FrameKind, Opcode};
use crate::error::{ProtocolError, RtdbError};

/// Frame magic, ASCII "RD".
pub const MAGIC: u16 = 0x5244;

/// Protocol version spoken by this client.
pub const PROTOCOL_VERSION: u8 = 1;

/// Size of the fixed header.
pub const HEADER_LEN: usize = 20;

/// Largest payload accepted in either direction.
pub const MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

/// Encoder/decoder for [`Frame`]s.
///
/// Any decode error is fatal for the connection: the stream position can no
/// longer be trusted once a header fails to parse.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_payload_len: usize,
}

impl FrameCodec {
    /// Creates a codec with the default payload limit.
    pub fn new() -> Self {
        Self {
            max_payload_len: MAX_PAYLOAD_LEN,
        }
    }

    /// Creates a codec with a custom payload limit.
    pub fn with_max_payload(max_payload_len: usize) -> Self {
        Self { max_payload_len }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = RtdbError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut header = &src[..HEADER_LEN];
        let magic = header.get_u16();
        if magic != MAGIC {
            return Err(ProtocolError::BadMagic { found: magic }.into());
        }
        let version = header.get_u8();
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion { version }.into());
        }
        let kind = FrameKind::try_from(header.get_u8())?;
        let opcode = Opcode::try_from(header.get_u16())?;
        let flags = header.get_u16();
        let correlation_id = header.get_u32();
        let status = header.get_i32();
        let payload_len = header.get_u32() as usize;

        if payload_len > self.max_payload_len {
            return Err(ProtocolError::FrameTooLarge {
                size: payload_len,
                max: self.max_payload_len,
            }
            .into());
        }

        let total = HEADER_LEN + payload_len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(payload_len).freeze();

        Ok(Some(Frame {
            kind,
            opcode,
            flags,
            correlation_id,
            status,
            payload,
        }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = RtdbError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if frame.payload.len() > self.max_payload_len {
            return Err(ProtocolError::FrameTooLarge {
                size: frame.payload.len(),
                max: self.max_payload_len,
            }
            .into());
        }

        dst.reserve(HEADER_LEN + frame.payload.len());
        dst.put_u16(MAGIC);
        dst.put_u8(PROTOCOL_VERSION);
        dst.put_u8(frame.kind as u8);
        dst.put_u16(frame.opcode as u16);
        dst.put_u16(frame.flags);
        dst.put_u32(frame.correlation_id);
        dst.put_i32(frame.status);
        dst.put_u32(frame.payload.len() as u32);
        dst.extend_from_slice(&frame.payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn encode(frame: Frame) -> BytesMut {
        let mut buf = BytesMut::new();
        FrameCodec::new().encode(frame, &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_header_layout() {
        let buf = encode(Frame::request(Opcode::Echo, 0x0102_0304, Bytes::from_static(b"hi")));
        assert_eq!(buf.len(), HEADER_LEN + 2);
        assert_eq!(&buf[0..2], &[0x52, 0x44]);
        assert_eq!(buf[2], PROTOCOL_VERSION);
        assert_eq!(buf[3], FrameKind::Request as u8);
        assert_eq!(&buf[4..6], &[0x00, 0x30]);
        assert_eq!(&buf[8..12], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&buf[16..20], &[0, 0, 0, 2]);
        assert_eq!(&buf[20..], b"hi");
    }

    #[test]
    fn test_decode_waits_for_full_frame() {
        let full = encode(Frame::response(Opcode::Echo, 9, 0, Bytes::from_static(b"payload")));
        let mut codec = FrameCodec::new();

        let mut partial = BytesMut::from(&full[..HEADER_LEN + 3]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&full[HEADER_LEN + 3..]);
        let frame = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(frame.correlation_id, 9);
        assert_eq!(frame.kind, FrameKind::Response);
        assert_eq!(&frame.payload[..], b"payload");
        assert!(partial.is_empty());
    }

    #[test]
    fn test_decode_two_frames_in_one_buffer() {
        let mut buf = encode(Frame::event(Opcode::EventBatch, Bytes::from_static(b"a")));
        buf.extend_from_slice(&encode(Frame::response(Opcode::Logout, 3, 0, Bytes::new())));

        let mut codec = FrameCodec::new();
        let first = codec.decode(&mut buf).unwrap().unwrap();
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.kind, FrameKind::Event);
        assert_eq!(second.opcode, Opcode::Logout);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_rejects_bad_header() {
        let mut bad_magic = encode(Frame::request(Opcode::Echo, 1, Bytes::new()));
        bad_magic[0] = 0xFF;
        assert!(matches!(
            FrameCodec::new().decode(&mut bad_magic),
            Err(RtdbError::Protocol(ProtocolError::BadMagic { .. }))
        ));

        let mut bad_opcode = encode(Frame::request(Opcode::Echo, 1, Bytes::new()));
        bad_opcode[4] = 0x7F;
        assert!(matches!(
            FrameCodec::new().decode(&mut bad_opcode),
            Err(RtdbError::Protocol(ProtocolError::UnknownOpcode(_)))
        ));

        let mut bad_kind = encode(Frame::request(Opcode::Echo, 1, Bytes::new()));
        bad_kind[3] = 9;
        assert!(matches!(
            FrameCodec::new().decode(&mut bad_kind),
            Err(RtdbError::Protocol(ProtocolError::UnknownFrameKind(9)))
        ));
    }

    #[test]
    fn test_payload_limit() {
        let mut codec = FrameCodec::with_max_payload(4);
        let mut buf = BytesMut::new();
        assert!(codec
            .encode(Frame::request(Opcode::Echo, 1, Bytes::from_static(b"12345")), &mut buf)
            .is_err());

        let mut oversized = encode(Frame::request(Opcode::Echo, 1, Bytes::from_static(b"12345")));
        assert!(matches!(
            codec.decode(&mut oversized),
            Err(RtdbError::Protocol(ProtocolError::FrameTooLarge { size: 5, max: 4 }))
        ));
    }
}
