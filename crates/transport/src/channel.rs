//! Default network channel over the `DcfService` gRPC contract.
//!
//! # Client side
//!
//! `setup` dials `http://host:port` eagerly. `send` performs a `Deliver`
//! call; a non-empty acknowledgement reply is queued as the next inbound
//! frame. `request` performs the same call and returns the reply directly,
//! so probe and sync answers never mix with fetched traffic. `receive`
//! drains queued frames first and otherwise polls `Fetch` for frames
//! addressed to this node.
//!
//! # Server side
//!
//! `activate(Mode::Server)` binds a listener on the configured address and
//! serves the relay:
//!
//! - health probes are answered `healthy = true, status = "ok"`
//! - messages for this node (or with an empty target) land in this
//!   channel's own receive queue
//! - messages for any other target are stored in that target's mailbox,
//!   drained by `Fetch` in responses of at most [`MAX_MESSAGE_LEN`] bytes
//! - `sync` messages are answered with an echo envelope from their
//!   logical recipient
//!
//! While serving, `send` pushes into the mailboxes directly and `request`
//! answers the way a remote relay would.

use async_trait::async_trait;
use prost::Message;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Channel, Server};
use tonic::{Request, Response, Status};

use dcf_core::codec::{self, Frame, HealthReply};
use dcf_core::proto::dcf_service_client::DcfServiceClient;
use dcf_core::proto::dcf_service_server::{DcfService, DcfServiceServer};
use dcf_core::proto::{self, Ack, FetchRequest, FetchResponse};
use dcf_core::{Mode, NodeId, TransportError};

use crate::loopback::echo_reply;
use crate::transport::Transport;

/// Largest gRPC message either end of the channel encodes or decodes.
pub const MAX_MESSAGE_LEN: usize = 4 * 1024 * 1024;

/// Room reserved in a gRPC message for the fields around one frame.
const MESSAGE_OVERHEAD: usize = 64 * 1024;

/// Largest frame the channel accepts.
pub const MAX_FRAME_LEN: usize = MAX_MESSAGE_LEN - MESSAGE_OVERHEAD;

/// Upper bound on the tag and length prefix of one frame in a `FetchResponse`.
const FETCH_FRAME_OVERHEAD: usize = 8;

/// Default interval between `Fetch` polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

type Mailboxes = Arc<Mutex<HashMap<NodeId, VecDeque<Vec<u8>>>>>;

fn lock(mailboxes: &Mailboxes) -> MutexGuard<'_, HashMap<NodeId, VecDeque<Vec<u8>>>> {
    mailboxes.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What the relay does with one delivered frame.
struct Relayed {
    /// Immediate answer carried back in the `Ack`; empty when there is none.
    reply: Vec<u8>,
    /// Whether the frame is routed on to its target.
    forward: bool,
}

fn relay_frame(payload: &[u8]) -> Result<Relayed, Status> {
    let decoded =
        codec::decode_frame(payload).map_err(|e| Status::invalid_argument(e.to_string()))?;
    let encoded = |result: Result<Vec<u8>, dcf_core::EncodeError>| {
        result.map_err(|e| Status::internal(e.to_string()))
    };

    match decoded {
        Frame::Probe(probe) => {
            tracing::debug!(peer = %probe.peer, "answering health probe");
            Ok(Relayed {
                reply: encoded(codec::encode_reply(&HealthReply::healthy("ok")))?,
                forward: false,
            })
        }
        Frame::Message(env) => Ok(Relayed {
            reply: if env.sync {
                encoded(codec::encode_message(&echo_reply(&env)))?
            } else {
                Vec::new()
            },
            forward: true,
        }),
        Frame::Reply(_) => Ok(Relayed {
            reply: Vec::new(),
            forward: true,
        }),
    }
}

/// Take frames from the front of `queue` until `max_frames` are taken
/// (0 means no limit) or the response would exceed `budget` bytes.
///
/// The first queued frame is always taken so a mailbox keeps draining.
fn drain_within(queue: &mut VecDeque<Vec<u8>>, max_frames: usize, budget: usize) -> Vec<Vec<u8>> {
    let mut frames = Vec::new();
    let mut used = 0;
    while let Some(front) = queue.front() {
        if max_frames != 0 && frames.len() >= max_frames {
            break;
        }
        let cost = front.len() + FETCH_FRAME_OVERHEAD;
        if !frames.is_empty() && used + cost > budget {
            break;
        }
        used += cost;
        if let Some(frame) = queue.pop_front() {
            frames.push(frame);
        }
    }
    frames
}

/// Relay side of the `DcfService` contract.
struct RelayService {
    node_id: NodeId,
    local: mpsc::UnboundedSender<Vec<u8>>,
    mailboxes: Mailboxes,
}

impl RelayService {
    fn is_local(&self, target: &str) -> bool {
        target.is_empty() || target == self.node_id
    }

    fn route(&self, target: String, payload: Vec<u8>) -> Result<(), Status> {
        if self.is_local(&target) {
            self.local
                .send(payload)
                .map_err(|_| Status::unavailable("relay receive queue closed"))
        } else {
            lock(&self.mailboxes)
                .entry(target)
                .or_default()
                .push_back(payload);
            Ok(())
        }
    }
}

#[tonic::async_trait]
impl DcfService for RelayService {
    async fn deliver(&self, request: Request<proto::Frame>) -> Result<Response<Ack>, Status> {
        let frame = request.into_inner();
        if frame.payload.len() > MAX_FRAME_LEN {
            return Err(Status::resource_exhausted(format!(
                "frame of {} bytes exceeds {}",
                frame.payload.len(),
                MAX_FRAME_LEN
            )));
        }

        let relayed = relay_frame(&frame.payload)?;
        tracing::debug!(
            origin = %frame.origin,
            target = %frame.target,
            forwarded = relayed.forward,
            "relayed frame"
        );
        if relayed.forward {
            self.route(frame.target, frame.payload)?;
        }

        Ok(Response::new(Ack {
            accepted: true,
            reply: relayed.reply,
        }))
    }

    async fn fetch(
        &self,
        request: Request<FetchRequest>,
    ) -> Result<Response<FetchResponse>, Status> {
        let req = request.into_inner();
        if req.node_id.is_empty() {
            return Err(Status::invalid_argument("node_id is required"));
        }

        let mut mailboxes = lock(&self.mailboxes);
        let frames = match mailboxes.get_mut(&req.node_id) {
            Some(queue) => drain_within(queue, req.max_frames as usize, MAX_MESSAGE_LEN),
            None => Vec::new(),
        };

        Ok(Response::new(FetchResponse { frames }))
    }
}

struct Listener {
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<Result<(), tonic::transport::Error>>,
}

/// Built-in transport speaking `DcfService`.
pub struct NetworkChannel {
    node_id: NodeId,
    mode: Mode,
    address: Option<(String, u16)>,
    client: Option<DcfServiceClient<Channel>>,
    pending: VecDeque<Vec<u8>>,
    local_tx: mpsc::UnboundedSender<Vec<u8>>,
    local_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    mailboxes: Mailboxes,
    listener: Option<Listener>,
    poll_interval: Duration,
    max_frame_len: usize,
    closed: bool,
}

impl std::fmt::Debug for NetworkChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkChannel")
            .field("node_id", &self.node_id)
            .field("mode", &self.mode)
            .field("address", &self.address)
            .field("connected", &self.is_connected())
            .field("serving", &self.local_addr())
            .finish()
    }
}

impl NetworkChannel {
    /// Channel for `node_id` operating in `mode`.
    ///
    /// In [`Mode::Server`] `setup` records the address without dialing;
    /// every other mode dials on `setup`.
    pub fn new(node_id: impl Into<NodeId>, mode: Mode) -> Self {
        let (local_tx, local_rx) = mpsc::unbounded_channel();
        Self {
            node_id: node_id.into(),
            mode,
            address: None,
            client: None,
            pending: VecDeque::new(),
            local_tx,
            local_rx,
            mailboxes: Arc::new(Mutex::new(HashMap::new())),
            listener: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_frame_len: MAX_FRAME_LEN,
            closed: false,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Address the relay listener is bound to, when serving.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().map(|l| l.local_addr)
    }

    /// Whether `setup` dialed a relay.
    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    fn check_open(&self) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if self.address.is_none() {
            return Err(TransportError::NotSetup);
        }
        Ok(())
    }

    fn check_len(&self, frame: &[u8]) -> Result<(), TransportError> {
        if frame.len() > self.max_frame_len {
            return Err(TransportError::FrameTooLarge {
                len: frame.len(),
                limit: self.max_frame_len,
            });
        }
        Ok(())
    }

    async fn bind(&mut self) -> Result<(), TransportError> {
        let (host, port) = self.address.clone().ok_or(TransportError::NotSetup)?;
        let address = format!("{}:{}", host, port);

        let listener = TcpListener::bind((host.as_str(), port))
            .await
            .map_err(|e| TransportError::BindFailed {
                address: address.clone(),
                reason: e.to_string(),
            })?;
        let local_addr = listener.local_addr().map_err(|e| TransportError::BindFailed {
            address: address.clone(),
            reason: e.to_string(),
        })?;

        let service = DcfServiceServer::new(RelayService {
            node_id: self.node_id.clone(),
            local: self.local_tx.clone(),
            mailboxes: self.mailboxes.clone(),
        })
        .max_decoding_message_size(MAX_MESSAGE_LEN)
        .max_encoding_message_size(MAX_MESSAGE_LEN);
        let (shutdown, signal) = oneshot::channel::<()>();
        let task = tokio::spawn(
            Server::builder()
                .add_service(service)
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                    signal.await.ok();
                }),
        );

        tracing::info!(node_id = %self.node_id, %local_addr, "relay listening");
        self.listener = Some(Listener {
            local_addr,
            shutdown,
            task,
        });
        Ok(())
    }

    fn push_mailbox(&self, frame: &[u8], target: &str) {
        if target.is_empty() || target == self.node_id {
            // Our own receiver lives in `self`, so the send cannot fail.
            let _ = self.local_tx.send(frame.to_vec());
        } else {
            lock(&self.mailboxes)
                .entry(target.to_string())
                .or_default()
                .push_back(frame.to_vec());
        }
    }

    /// One `Deliver` call; returns the acknowledgement reply.
    async fn deliver(&mut self, frame: &[u8], target: &str) -> Result<Vec<u8>, TransportError> {
        let request = proto::Frame {
            payload: frame.to_vec(),
            target: target.to_string(),
            origin: self.node_id.clone(),
        };
        if request.encoded_len() > MAX_MESSAGE_LEN {
            return Err(TransportError::FrameTooLarge {
                len: request.encoded_len(),
                limit: MAX_MESSAGE_LEN,
            });
        }

        let client = self.client.as_mut().ok_or(TransportError::NotSetup)?;
        let ack = client
            .deliver(request)
            .await
            .map_err(|status| TransportError::SendFailed {
                target: target.to_string(),
                reason: status.message().to_string(),
            })?
            .into_inner();

        if !ack.accepted {
            return Err(TransportError::SendFailed {
                target: target.to_string(),
                reason: "rejected by relay".into(),
            });
        }
        Ok(ack.reply)
    }

    async fn fetch_pending(&mut self) -> Result<(), TransportError> {
        let Some(client) = self.client.as_mut() else {
            return Ok(());
        };
        let response = client
            .fetch(FetchRequest {
                node_id: self.node_id.clone(),
                max_frames: 0,
            })
            .await
            .map_err(|status| TransportError::ReceiveFailed(status.message().to_string()))?;
        self.pending.extend(response.into_inner().frames);
        Ok(())
    }
}

#[async_trait]
impl Transport for NetworkChannel {
    fn name(&self) -> &str {
        "grpc"
    }

    async fn setup(&mut self, host: &str, port: u16) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if self.address.is_some() {
            return Err(TransportError::AlreadySetup);
        }

        if self.mode != Mode::Server {
            let endpoint = format!("http://{}:{}", host, port);
            let client = DcfServiceClient::connect(endpoint.clone())
                .await
                .map_err(|e| TransportError::ConnectionFailed {
                    endpoint: endpoint.clone(),
                    reason: e.to_string(),
                })?
                .max_decoding_message_size(MAX_MESSAGE_LEN)
                .max_encoding_message_size(MAX_MESSAGE_LEN);
            tracing::info!(node_id = %self.node_id, %endpoint, "connected to relay");
            self.client = Some(client);
        }

        self.address = Some((host.to_string(), port));
        Ok(())
    }

    async fn activate(&mut self, mode: Mode) -> Result<(), TransportError> {
        self.check_open()?;
        self.mode = mode;
        if mode == Mode::Server && self.listener.is_none() {
            self.bind().await?;
        }
        Ok(())
    }

    async fn deactivate(&mut self) -> Result<(), TransportError> {
        if let Some(listener) = self.listener.take() {
            let _ = listener.shutdown.send(());
            match listener.task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "relay server exited with error"),
                Err(e) => tracing::warn!(error = %e, "relay server task failed"),
            }
            tracing::info!(node_id = %self.node_id, "relay stopped");
        }
        Ok(())
    }

    async fn send(&mut self, frame: &[u8], target: &str) -> Result<(), TransportError> {
        self.check_open()?;
        self.check_len(frame)?;

        if self.listener.is_some() {
            self.push_mailbox(frame, target);
            return Ok(());
        }

        let reply = self.deliver(frame, target).await?;
        if !reply.is_empty() {
            self.pending.push_front(reply);
        }
        Ok(())
    }

    async fn request(&mut self, frame: &[u8], target: &str) -> Result<Vec<u8>, TransportError> {
        self.check_open()?;
        self.check_len(frame)?;

        let reply = if self.listener.is_some() {
            let relayed = relay_frame(frame).map_err(|status| TransportError::SendFailed {
                target: target.to_string(),
                reason: status.message().to_string(),
            })?;
            if relayed.forward {
                self.push_mailbox(frame, target);
            }
            relayed.reply
        } else {
            self.deliver(frame, target).await?
        };

        if reply.is_empty() {
            return Err(TransportError::ReceiveFailed(format!(
                "no reply from relay for frame to {}",
                target
            )));
        }
        Ok(reply)
    }

    async fn receive(&mut self) -> Result<Vec<u8>, TransportError> {
        self.check_open()?;
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Ok(frame);
            }
            if let Ok(frame) = self.local_rx.try_recv() {
                return Ok(frame);
            }
            if self.is_connected() {
                self.fetch_pending().await?;
                if !self.pending.is_empty() {
                    continue;
                }
            } else if self.listener.is_none() {
                return Err(TransportError::NotSetup);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn teardown(&mut self) {
        if self.closed {
            return;
        }
        let _ = self.deactivate().await;
        self.client = None;
        self.pending.clear();
        lock(&self.mailboxes).clear();
        self.closed = true;
        tracing::debug!(node_id = %self.node_id, "network channel torn down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dcf_core::codec::Envelope;

    async fn serving_channel(node_id: &str) -> NetworkChannel {
        let mut channel = NetworkChannel::new(node_id, Mode::Server);
        channel.setup("127.0.0.1", 0).await.unwrap();
        channel.activate(Mode::Server).await.unwrap();
        channel
    }

    async fn client_of(relay: &NetworkChannel, node_id: &str) -> NetworkChannel {
        let addr = relay.local_addr().unwrap();
        let mut channel = NetworkChannel::new(node_id, Mode::Client)
            .with_poll_interval(Duration::from_millis(10));
        channel.setup("127.0.0.1", addr.port()).await.unwrap();
        channel
    }

    #[tokio::test]
    async fn test_probe_answered_by_relay() {
        let mut relay = serving_channel("relay").await;
        let mut client = client_of(&relay, "node-a").await;

        let probe = codec::encode_probe("node-b").unwrap();
        client.send(&probe, "node-b").await.unwrap();
        let reply = codec::decode_reply(&client.receive().await.unwrap()).unwrap();
        assert_eq!(reply, HealthReply::healthy("ok"));

        client.teardown().await;
        relay.teardown().await;
    }

    #[tokio::test]
    async fn test_message_to_relay_reaches_its_queue_and_echoes() {
        let mut relay = serving_channel("relay").await;
        let mut client = client_of(&relay, "node-a").await;

        let env = Envelope::new("node-a", "relay", b"hi".to_vec()).with_sync(true);
        client
            .send(&codec::encode_message(&env).unwrap(), "relay")
            .await
            .unwrap();

        let echo = codec::decode_message(&client.receive().await.unwrap()).unwrap();
        assert_eq!(echo.sender, "relay");
        assert_eq!(echo.payload, b"Echo: hi");

        let delivered = codec::decode_message(&relay.receive().await.unwrap()).unwrap();
        assert_eq!(delivered, env);

        client.teardown().await;
        relay.teardown().await;
    }

    #[tokio::test]
    async fn test_mailbox_delivery_between_clients() {
        let mut relay = serving_channel("relay").await;
        let mut alice = client_of(&relay, "alice").await;
        let mut bob = client_of(&relay, "bob").await;

        let env = Envelope::new("alice", "bob", b"note".to_vec());
        alice
            .send(&codec::encode_message(&env).unwrap(), "bob")
            .await
            .unwrap();

        let received = tokio::time::timeout(Duration::from_secs(5), bob.receive())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(codec::decode_message(&received).unwrap(), env);

        alice.teardown().await;
        bob.teardown().await;
        relay.teardown().await;
    }

    #[tokio::test]
    async fn test_server_send_pushes_into_mailbox() {
        let mut relay = serving_channel("relay").await;
        let mut bob = client_of(&relay, "bob").await;

        let env = Envelope::new("relay", "bob", b"push".to_vec());
        relay
            .send(&codec::encode_message(&env).unwrap(), "bob")
            .await
            .unwrap();

        let received = tokio::time::timeout(Duration::from_secs(5), bob.receive())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(codec::decode_message(&received).unwrap().payload, b"push");

        bob.teardown().await;
        relay.teardown().await;
    }

    fn message(sender: &str, recipient: &str, payload: &[u8]) -> Vec<u8> {
        codec::encode_message(&Envelope::new(sender, recipient, payload.to_vec())).unwrap()
    }

    async fn receive_text(channel: &mut NetworkChannel) -> Vec<u8> {
        let frame = tokio::time::timeout(Duration::from_secs(5), channel.receive())
            .await
            .unwrap()
            .unwrap();
        codec::decode_message(&frame).unwrap().payload
    }

    #[tokio::test]
    async fn test_request_reply_skips_fetched_traffic() {
        let mut relay = serving_channel("relay").await;
        let mut alice = client_of(&relay, "alice").await;
        let mut bob = client_of(&relay, "bob").await;

        for payload in [&b"first"[..], b"second", b"third"] {
            bob.send(&message("bob", "alice", payload), "alice")
                .await
                .unwrap();
        }
        // Pulls every queued frame into alice's pending queue.
        assert_eq!(receive_text(&mut alice).await, b"first");

        let probe = codec::encode_probe("bob").unwrap();
        let reply = alice.request(&probe, "bob").await.unwrap();
        assert_eq!(codec::decode_reply(&reply).unwrap(), HealthReply::healthy("ok"));

        let sync = Envelope::new("alice", "bob", b"ping".to_vec())
            .with_sync(true)
            .with_sequence(41);
        let echo = alice
            .request(&codec::encode_message(&sync).unwrap(), "bob")
            .await
            .unwrap();
        let echo = codec::decode_message(&echo).unwrap();
        assert_eq!(echo.payload, b"Echo: ping");
        assert_eq!(echo.sequence, 41);

        assert_eq!(receive_text(&mut alice).await, b"second");
        assert_eq!(receive_text(&mut alice).await, b"third");
        assert_eq!(receive_text(&mut bob).await, b"ping");

        // An async message has no answer to return.
        assert!(matches!(
            alice.request(&message("alice", "bob", b"x"), "bob").await,
            Err(TransportError::ReceiveFailed(_))
        ));

        alice.teardown().await;
        bob.teardown().await;
        relay.teardown().await;
    }

    #[tokio::test]
    async fn test_send_queues_ack_reply_ahead_of_pending() {
        let mut relay = serving_channel("relay").await;
        let mut alice = client_of(&relay, "alice").await;
        let mut bob = client_of(&relay, "bob").await;

        bob.send(&message("bob", "alice", b"one"), "alice").await.unwrap();
        bob.send(&message("bob", "alice", b"two"), "alice").await.unwrap();
        assert_eq!(receive_text(&mut alice).await, b"one");

        let sync = Envelope::new("alice", "bob", b"hi".to_vec()).with_sync(true);
        alice
            .send(&codec::encode_message(&sync).unwrap(), "bob")
            .await
            .unwrap();
        assert_eq!(receive_text(&mut alice).await, b"Echo: hi");
        assert_eq!(receive_text(&mut alice).await, b"two");

        alice.teardown().await;
        bob.teardown().await;
        relay.teardown().await;
    }

    #[tokio::test]
    async fn test_server_request_answers_locally() {
        let mut relay = serving_channel("relay").await;
        let mut bob = client_of(&relay, "bob").await;

        let probe = codec::encode_probe("bob").unwrap();
        let reply = relay.request(&probe, "bob").await.unwrap();
        assert!(codec::decode_reply(&reply).unwrap().healthy);

        let sync = Envelope::new("relay", "bob", b"sync".to_vec()).with_sync(true);
        let echo = relay
            .request(&codec::encode_message(&sync).unwrap(), "bob")
            .await
            .unwrap();
        assert_eq!(codec::decode_message(&echo).unwrap().sender, "bob");
        assert_eq!(receive_text(&mut bob).await, b"sync");

        bob.teardown().await;
        relay.teardown().await;
    }

    #[tokio::test]
    async fn test_fetch_splits_mailbox_across_responses() {
        let mut relay = serving_channel("relay").await;
        let mut alice = client_of(&relay, "alice").await;
        let mut bob = client_of(&relay, "bob").await;

        let big = vec![7u8; 3 * 1024 * 1024];
        bob.send(&message("bob", "alice", &big), "alice").await.unwrap();
        bob.send(&message("bob", "alice", b"small"), "alice").await.unwrap();
        bob.send(&message("bob", "alice", &big), "alice").await.unwrap();

        assert_eq!(receive_text(&mut alice).await.len(), big.len());
        assert_eq!(receive_text(&mut alice).await, b"small");
        assert_eq!(receive_text(&mut alice).await.len(), big.len());

        alice.teardown().await;
        bob.teardown().await;
        relay.teardown().await;
    }

    #[tokio::test]
    async fn test_frame_at_limit_crosses_relay() {
        let mut relay = serving_channel("relay").await;
        let mut alice = client_of(&relay, "alice").await;
        let mut bob = client_of(&relay, "bob").await;

        let sizing_len = MAX_FRAME_LEN - 1024;
        let overhead = message("alice", "bob", &vec![0u8; sizing_len]).len() - sizing_len;
        let payload = vec![1u8; MAX_FRAME_LEN - overhead];
        let frame = message("alice", "bob", &payload);
        assert_eq!(frame.len(), MAX_FRAME_LEN);

        alice.send(&frame, "bob").await.unwrap();
        assert_eq!(receive_text(&mut bob).await.len(), payload.len());

        alice.teardown().await;
        bob.teardown().await;
        relay.teardown().await;
    }

    #[test]
    fn test_drain_within_budget() {
        let mut queue: VecDeque<Vec<u8>> = (0..3).map(|_| vec![0u8; 10]).collect();
        let cost = 10 + FETCH_FRAME_OVERHEAD;

        assert_eq!(drain_within(&mut queue, 0, 2 * cost).len(), 2);
        assert_eq!(queue.len(), 1);

        let mut queue: VecDeque<Vec<u8>> = (0..3).map(|_| vec![0u8; 10]).collect();
        assert_eq!(drain_within(&mut queue, 1, usize::MAX).len(), 1);
        assert_eq!(drain_within(&mut queue, 0, usize::MAX).len(), 2);
        assert!(drain_within(&mut queue, 0, usize::MAX).is_empty());

        // A frame larger than the budget still drains on its own.
        let mut queue: VecDeque<Vec<u8>> = VecDeque::from(vec![vec![0u8; 100], vec![0u8; 1]]);
        assert_eq!(drain_within(&mut queue, 0, 50).len(), 1);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_connection_failure_surfaces() {
        // Bind then drop to get a port nobody listens on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut channel = NetworkChannel::new("node-a", Mode::Client);
        let err = channel.setup("127.0.0.1", port).await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectionFailed { .. }));
    }

    #[tokio::test]
    async fn test_lifecycle_and_frame_limit() {
        let mut relay = serving_channel("relay").await;
        assert_eq!(
            relay.setup("127.0.0.1", 0).await.unwrap_err(),
            TransportError::AlreadySetup
        );

        let big = vec![0u8; MAX_FRAME_LEN + 1];
        assert!(matches!(
            relay.send(&big, "bob").await,
            Err(TransportError::FrameTooLarge { .. })
        ));

        relay.deactivate().await.unwrap();
        assert!(relay.local_addr().is_none());

        relay.teardown().await;
        assert_eq!(
            relay.receive().await.unwrap_err(),
            TransportError::Closed
        );

        let mut unset = NetworkChannel::new("x", Mode::Client);
        assert_eq!(
            unset.send(b"x", "y").await.unwrap_err(),
            TransportError::NotSetup
        );
    }
}
