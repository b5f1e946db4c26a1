//! In-memory loopback transport.
//!
//! Answers health probes as healthy and echoes data messages back to their
//! sender. Registered as the built-in `loopback` plugin artifact.
//!
//! Nothing but its own answers ever arrives, so `receive` does not block:
//! with an empty queue it fails at once with
//! [`TransportError::ReceiveFailed`] instead of waiting forever.

use async_trait::async_trait;
use std::collections::VecDeque;

use dcf_core::codec::{self, Envelope, Frame, HealthReply};
use dcf_core::TransportError;

use crate::transport::Transport;

const ECHO_PREFIX: &[u8] = b"Echo: ";

/// Echo answer to `env`, attributed to its logical recipient.
pub(crate) fn echo_reply(env: &Envelope) -> Envelope {
    let mut payload = Vec::with_capacity(ECHO_PREFIX.len() + env.payload.len());
    payload.extend_from_slice(ECHO_PREFIX);
    payload.extend_from_slice(&env.payload);

    Envelope::new(env.recipient.clone(), env.sender.clone(), payload).with_sequence(env.sequence)
}

/// Transport that answers its own frames.
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    inbound: VecDeque<Vec<u8>>,
    ready: bool,
    closed: bool,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames waiting to be received.
    pub fn pending(&self) -> usize {
        self.inbound.len()
    }

    fn check_open(&self) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if !self.ready {
            return Err(TransportError::NotSetup);
        }
        Ok(())
    }

    fn answer(&self, frame: &[u8], target: &str) -> Result<Vec<u8>, TransportError> {
        let failed = |reason: String| TransportError::SendFailed {
            target: target.to_string(),
            reason,
        };

        match codec::decode_frame(frame).map_err(|e| failed(e.to_string()))? {
            Frame::Probe(_) => {
                codec::encode_reply(&HealthReply::healthy("ok")).map_err(|e| failed(e.to_string()))
            }
            Frame::Message(env) => {
                codec::encode_message(&echo_reply(&env)).map_err(|e| failed(e.to_string()))
            }
            Frame::Reply(_) => Ok(frame.to_vec()),
        }
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    fn name(&self) -> &str {
        "loopback"
    }

    async fn setup(&mut self, host: &str, port: u16) -> Result<(), TransportError> {
        if self.ready {
            return Err(TransportError::AlreadySetup);
        }
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.ready = true;
        tracing::debug!(host, port, "loopback transport ready");
        Ok(())
    }

    async fn send(&mut self, frame: &[u8], target: &str) -> Result<(), TransportError> {
        self.check_open()?;
        let answer = self.answer(frame, target)?;
        self.inbound.push_back(answer);
        Ok(())
    }

    /// Pop the oldest queued answer. Never waits.
    async fn receive(&mut self) -> Result<Vec<u8>, TransportError> {
        self.check_open()?;
        self.inbound
            .pop_front()
            .ok_or_else(|| TransportError::ReceiveFailed("no frame available".into()))
    }

    async fn request(&mut self, frame: &[u8], target: &str) -> Result<Vec<u8>, TransportError> {
        self.check_open()?;
        self.answer(frame, target)
    }

    async fn teardown(&mut self) {
        self.inbound.clear();
        self.ready = false;
        self.closed = true;
    }
}
