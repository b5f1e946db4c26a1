//! Frame codec for data envelopes and health probes.
//!
//! Every frame is a 1-byte kind discriminant, a 4-byte big-endian body
//! length and a protobuf body:
//!
//! ```text
//! +------+----------------+---------------------------+
//! | kind | body length    | protobuf body             |
//! | u8   | u32 big-endian | `length` bytes            |
//! +------+----------------+---------------------------+
//! ```
//!
//! Bytes after the declared body and unknown protobuf fields inside it are
//! ignored so newer peers can extend the format.

use prost::Message;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{DecodeError, EncodeError};
use crate::proto;
use crate::types::NodeId;

/// Size of the kind byte plus the length prefix.
pub const FRAME_HEADER_LEN: usize = 5;

/// Discriminant carried in the first byte of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    Message = 1,
    HealthProbe = 2,
    HealthReply = 3,
}

impl FrameKind {
    fn from_byte(byte: u8) -> Result<Self, DecodeError> {
        match byte {
            1 => Ok(FrameKind::Message),
            2 => Ok(FrameKind::HealthProbe),
            3 => Ok(FrameKind::HealthReply),
            other => Err(DecodeError::UnknownKind(other)),
        }
    }

    /// Short name used in errors and logs.
    pub fn name(&self) -> &'static str {
        match self {
            FrameKind::Message => "message",
            FrameKind::HealthProbe => "health_probe",
            FrameKind::HealthReply => "health_reply",
        }
    }
}

/// Data message exchanged between nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub sender: NodeId,
    pub recipient: NodeId,
    pub payload: Vec<u8>,
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
    /// Whether the sender blocks for a reply.
    pub sync: bool,
    /// Producer-chosen nonce; no ordering across peers.
    pub sequence: u32,
    /// Next hop actually used when the redundancy engine rerouted the send.
    pub redundancy_path: Option<NodeId>,
    /// Proximity group of the next hop at send time.
    pub group_id: Option<String>,
}

impl Envelope {
    /// Envelope stamped with the current time, async, sequence 0, no route.
    pub fn new(
        sender: impl Into<NodeId>,
        recipient: impl Into<NodeId>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            sender: sender.into(),
            recipient: recipient.into(),
            payload: payload.into(),
            timestamp: unix_timestamp(),
            sync: false,
            sequence: 0,
            redundancy_path: None,
            group_id: None,
        }
    }

    pub fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    pub fn with_sequence(mut self, sequence: u32) -> Self {
        self.sequence = sequence;
        self
    }

    /// Record the next hop and its group.
    pub fn with_route(mut self, next_hop: impl Into<NodeId>, group_id: impl Into<String>) -> Self {
        self.redundancy_path = Some(next_hop.into());
        self.group_id = Some(group_id.into());
        self
    }

    /// Payload as UTF-8, replacing invalid sequences.
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Health probe addressed to a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthProbe {
    pub peer: NodeId,
}

/// Answer to a [`HealthProbe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReply {
    pub healthy: bool,
    pub status: String,
}

impl HealthReply {
    pub fn healthy(status: impl Into<String>) -> Self {
        Self {
            healthy: true,
            status: status.into(),
        }
    }
}

/// Any decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Message(Envelope),
    Probe(HealthProbe),
    Reply(HealthReply),
}

impl Frame {
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Message(_) => FrameKind::Message,
            Frame::Probe(_) => FrameKind::HealthProbe,
            Frame::Reply(_) => FrameKind::HealthReply,
        }
    }
}

/// Current time in whole seconds since the Unix epoch.
pub fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn wrap(kind: FrameKind, body: Vec<u8>) -> Result<Vec<u8>, EncodeError> {
    let len = u32::try_from(body.len()).map_err(|_| EncodeError::TooLarge(body.len()))?;
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    out.push(kind as u8);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

fn unwrap(bytes: &[u8]) -> Result<(FrameKind, &[u8]), DecodeError> {
    if bytes.len() < FRAME_HEADER_LEN {
        return Err(DecodeError::Truncated {
            needed: FRAME_HEADER_LEN,
            available: bytes.len(),
        });
    }
    let kind = FrameKind::from_byte(bytes[0])?;
    let len = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
    let end = FRAME_HEADER_LEN.saturating_add(len);
    if bytes.len() < end {
        return Err(DecodeError::Truncated {
            needed: end,
            available: bytes.len(),
        });
    }
    Ok((kind, &bytes[FRAME_HEADER_LEN..end]))
}

fn expect_kind(bytes: &[u8], expected: FrameKind) -> Result<&[u8], DecodeError> {
    let (kind, body) = unwrap(bytes)?;
    if kind != expected {
        return Err(DecodeError::UnexpectedKind {
            expected: expected.name(),
            found: kind.name(),
        });
    }
    Ok(body)
}

/// Validate the header and return the frame's kind without decoding the body.
pub fn frame_kind(bytes: &[u8]) -> Result<FrameKind, DecodeError> {
    unwrap(bytes).map(|(kind, _)| kind)
}

/// Encode a data envelope.
pub fn encode_message(env: &Envelope) -> Result<Vec<u8>, EncodeError> {
    if env.sender.is_empty() {
        return Err(EncodeError::MissingField("sender"));
    }
    if env.recipient.is_empty() {
        return Err(EncodeError::MissingField("recipient"));
    }
    let msg = proto::DcfMessage {
        sender: env.sender.clone(),
        recipient: env.recipient.clone(),
        data: Some(env.payload.clone()),
        timestamp: Some(env.timestamp),
        sync: env.sync,
        sequence: env.sequence,
        redundancy_path: env.redundancy_path.clone(),
        group_id: env.group_id.clone(),
    };
    wrap(FrameKind::Message, msg.encode_to_vec())
}

fn envelope_from_proto(msg: proto::DcfMessage) -> Result<Envelope, DecodeError> {
    if msg.sender.is_empty() {
        return Err(DecodeError::Malformed("missing sender".into()));
    }
    if msg.recipient.is_empty() {
        return Err(DecodeError::Malformed("missing recipient".into()));
    }
    let payload = msg
        .data
        .ok_or_else(|| DecodeError::Malformed("missing payload".into()))?;
    let timestamp = msg
        .timestamp
        .ok_or_else(|| DecodeError::Malformed("missing timestamp".into()))?;

    Ok(Envelope {
        sender: msg.sender,
        recipient: msg.recipient,
        payload,
        timestamp,
        sync: msg.sync,
        sequence: msg.sequence,
        redundancy_path: msg.redundancy_path,
        group_id: msg.group_id,
    })
}

fn decode_body<M: Message + Default>(body: &[u8]) -> Result<M, DecodeError> {
    M::decode(body).map_err(|e| DecodeError::Malformed(e.to_string()))
}

/// Decode a data envelope.
pub fn decode_message(bytes: &[u8]) -> Result<Envelope, DecodeError> {
    let body = expect_kind(bytes, FrameKind::Message)?;
    envelope_from_proto(decode_body(body)?)
}

/// Encode a health probe for `peer`.
pub fn encode_probe(peer: &str) -> Result<Vec<u8>, EncodeError> {
    if peer.is_empty() {
        return Err(EncodeError::MissingField("peer"));
    }
    let req = proto::HealthRequest {
        peer: peer.to_string(),
    };
    wrap(FrameKind::HealthProbe, req.encode_to_vec())
}

/// Decode a health probe.
pub fn decode_probe(bytes: &[u8]) -> Result<HealthProbe, DecodeError> {
    let body = expect_kind(bytes, FrameKind::HealthProbe)?;
    let req: proto::HealthRequest = decode_body(body)?;
    if req.peer.is_empty() {
        return Err(DecodeError::Malformed("missing peer".into()));
    }
    Ok(HealthProbe { peer: req.peer })
}

/// Encode a health reply.
pub fn encode_reply(reply: &HealthReply) -> Result<Vec<u8>, EncodeError> {
    let resp = proto::HealthResponse {
        healthy: reply.healthy,
        status: reply.status.clone(),
    };
    wrap(FrameKind::HealthReply, resp.encode_to_vec())
}

/// Decode a health reply.
pub fn decode_reply(bytes: &[u8]) -> Result<HealthReply, DecodeError> {
    let body = expect_kind(bytes, FrameKind::HealthReply)?;
    let resp: proto::HealthResponse = decode_body(body)?;
    Ok(HealthReply {
        healthy: resp.healthy,
        status: resp.status,
    })
}

/// Decode any frame, dispatching on its discriminant.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame, DecodeError> {
    match frame_kind(bytes)? {
        FrameKind::Message => decode_message(bytes).map(Frame::Message),
        FrameKind::HealthProbe => decode_probe(bytes).map(Frame::Probe),
        FrameKind::HealthReply => decode_reply(bytes).map(Frame::Reply),
    }
}
