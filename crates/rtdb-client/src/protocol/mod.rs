// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Binary wire protocol.
//!
//! Every message travels in a fixed 20-byte header followed by a payload:
//!
//! ```text
//! 0       2    3    4        6       8              12        16          20
//! ┌───────┬────┬────┬────────┬───────┬──────────────┬─────────┬───────────┐
//! │ magic │ver │kind│ opcode │ flags │ correlation  │ status  │ len       │
//! │ u16   │ u8 │ u8 │ u16    │ u16   │ u32          │ i32     │ u32       │
//! └───────┴────┴────┴────────┴───────┴──────────────┴─────────┴───────────┘
//! ```
//!
//! All integers are big-endian. Requests and responses share a correlation
//! id; pushed events use correlation id zero.

mod codec;
mod frame;
mod message;

pub use codec::{FrameCodec, HEADER_LEN, MAGIC, MAX_PAYLOAD_LEN, PROTOCOL_VERSION};
pub use frame::{Frame, FrameKind, Opcode};
pub use message::{
    ConnectionCountReply, ConnectionCountRequest, EventBatchPayload, EventKind, LoginReply,
    LoginRequest, ResumeRequest, SetOptionRequest, SubscribeReply, SubscribeRequest,
    UnsubscribeRequest, WireReader, WireWriter, PRECISION_UNSPECIFIED,
};
