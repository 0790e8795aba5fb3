use crate::errors::{ClientError, TransportError};
use crate::message_types::{InboundMessage, RequestEnvelope};
use async_trait::async_trait;
use futures::channel::mpsc;
use log::*;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use tokio::sync::RwLock;

/// Discriminates the transport family a channel runs over. The router only treats peer-to-peer
/// transports as having a peer registry worth cleaning up on disconnect.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// A relayed peer-to-peer channel with explicit pairing.
    P2p,
    /// An in-page browser-extension bridge.
    Extension,
}

impl Display for TransportKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::P2p => write!(f, "p2p"),
            TransportKind::Extension => write!(f, "extension"),
        }
    }
}

/// Delivery contract the client needs from a transport: reliable delivery of opaque payloads to
/// a peer, plus a peer registry for the peer-to-peer family. Inbound messages arrive out of band
/// through the sink returned by [`crate::DappClient::new`].
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Establish the transport. Idempotent; the pipeline calls it before every request.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Deliver `payload` to `target`, or to every paired peer when no target is given.
    async fn send(&self, payload: Vec<u8>, target: Option<&str>) -> Result<(), TransportError>;

    async fn peers(&self) -> Vec<String>;

    async fn remove_peer(&self, peer_id: &str) -> Result<(), TransportError>;

    async fn remove_all_peers(&self) -> Result<(), TransportError>;
}

/// Wire codec seam. The format is deliberately unspecified by the protocol core; JSON is the
/// default.
pub trait Serializer: Send + Sync {
    fn serialize(&self, envelope: &RequestEnvelope) -> Result<Vec<u8>, ClientError>;
    fn deserialize(&self, payload: &[u8]) -> Result<InboundMessage, ClientError>;
}

/// JSON codec.
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, envelope: &RequestEnvelope) -> Result<Vec<u8>, ClientError> {
        Ok(serde_json::to_vec(envelope)?)
    }

    fn deserialize(&self, payload: &[u8]) -> Result<InboundMessage, ClientError> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// An outbound payload captured by [`MemoryTransport`].
#[derive(Debug)]
pub struct SentPayload {
    pub payload: Vec<u8>,
    pub target: Option<String>,
}

/// In-memory loopback transport. Outbound payloads land on an unbounded channel so a test (or a
/// demo wallet) can play the counterparty.
pub struct MemoryTransport {
    kind: TransportKind,
    connected: RwLock<bool>,
    peers: RwLock<Vec<String>>,
    outbox: mpsc::UnboundedSender<SentPayload>,
}

impl MemoryTransport {
    /// Returns the transport and the receiving end of its outbox.
    pub fn new(kind: TransportKind) -> (Self, mpsc::UnboundedReceiver<SentPayload>) {
        let (outbox, outbox_rx) = mpsc::unbounded();
        let transport = MemoryTransport {
            kind,
            connected: RwLock::new(false),
            peers: RwLock::new(Vec::new()),
            outbox,
        };
        (transport, outbox_rx)
    }

    pub async fn add_peer(&self, peer_id: impl Into<String>) {
        self.peers.write().await.push(peer_id.into());
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn connect(&self) -> Result<(), TransportError> {
        let mut connected = self.connected.write().await;
        if !*connected {
            trace!("Memory transport connected");
            *connected = true;
        }
        Ok(())
    }

    async fn send(&self, payload: Vec<u8>, target: Option<&str>) -> Result<(), TransportError> {
        if !*self.connected.read().await {
            return Err(TransportError::NotConnected);
        }
        let sent = SentPayload { payload, target: target.map(String::from) };
        self.outbox.unbounded_send(sent).map_err(|_| TransportError::Closed)
    }

    async fn peers(&self) -> Vec<String> {
        self.peers.read().await.clone()
    }

    async fn remove_peer(&self, peer_id: &str) -> Result<(), TransportError> {
        let mut peers = self.peers.write().await;
        let before = peers.len();
        peers.retain(|p| p != peer_id);
        if peers.len() == before {
            debug!("Peer {peer_id} was not paired; nothing to remove");
        }
        Ok(())
    }

    async fn remove_all_peers(&self) -> Result<(), TransportError> {
        self.peers.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::message_types::WalletRequest;
    use futures::StreamExt;

    #[tokio::test]
    async fn send_requires_connect() {
        let (transport, mut outbox) = MemoryTransport::new(TransportKind::P2p);
        let err = transport.send(vec![1, 2, 3], None).await;
        assert!(matches!(err, Err(TransportError::NotConnected)));
        transport.connect().await.unwrap();
        transport.send(vec![1, 2, 3], Some("peer-1")).await.unwrap();
        let sent = outbox.next().await.unwrap();
        assert_eq!(sent.payload, vec![1, 2, 3]);
        assert_eq!(sent.target.as_deref(), Some("peer-1"));
    }

    #[tokio::test]
    async fn peer_registry_add_remove() {
        let (transport, _outbox) = MemoryTransport::new(TransportKind::P2p);
        transport.add_peer("peer-1").await;
        transport.add_peer("peer-2").await;
        transport.remove_peer("peer-1").await.unwrap();
        assert_eq!(transport.peers().await, vec!["peer-2".to_string()]);
        transport.remove_all_peers().await.unwrap();
        assert!(transport.peers().await.is_empty());
    }

    #[test]
    fn json_codec_round_trips_an_envelope() {
        let serializer = JsonSerializer;
        let envelope = RequestEnvelope::new(
            "sender-1",
            WalletRequest::BroadcastRequest {
                network: Default::default(),
                signed_transaction: "deadbeef".into(),
            },
        );
        let bytes = serializer.serialize(&envelope).unwrap();
        // the counterparty decodes requests with the same schema; just check it is valid JSON
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["sender_id"], "sender-1");
    }
}
