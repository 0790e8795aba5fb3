use crate::account::{Network, PermissionScope, Threshold};
use crate::errors::WalletErrorCode;
use crate::transport::TransportKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Protocol version stamped on every outgoing envelope.
pub const PROTOCOL_VERSION: &str = "3";

/// Correlation id carried by a request and its eventual reply. Generated fresh per call from
/// 128 random bits, so collisions between in-flight requests do not happen in practice.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn random() -> Self {
        let bytes: [u8; 16] = rand::random();
        RequestId(hex::encode(bytes))
    }

    pub fn new(id: impl Into<String>) -> Self {
        RequestId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The four kinds of request a client can make.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Permission,
    SignPayload,
    Operation,
    Broadcast,
}

impl Display for RequestKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestKind::Permission => write!(f, "permission"),
            RequestKind::SignPayload => write!(f, "sign-payload"),
            RequestKind::Operation => write!(f, "operation"),
            RequestKind::Broadcast => write!(f, "broadcast"),
        }
    }
}

/// Identifies the requesting application to the wallet, so it can show the user who is asking.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppMetadata {
    pub sender_id: String,
    pub name: String,
}

/// The kind-specific body of an outgoing request.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WalletRequest {
    /// Asks the wallet to grant an account with the given scopes. Always permitted; this is how
    /// scopes are obtained in the first place.
    PermissionRequest {
        app_metadata: AppMetadata,
        network: Network,
        scopes: Vec<PermissionScope>,
    },
    /// Asks the wallet to sign an arbitrary payload with the source address's key.
    SignPayloadRequest {
        payload: String,
        source_address: String,
    },
    /// Asks the wallet to forge, sign and submit the given partial operations.
    OperationRequest {
        network: Network,
        operation_details: Vec<serde_json::Value>,
        source_address: String,
    },
    /// Asks the wallet to broadcast an already-signed transaction.
    BroadcastRequest {
        network: Network,
        signed_transaction: String,
    },
}

impl WalletRequest {
    pub fn kind(&self) -> RequestKind {
        match self {
            WalletRequest::PermissionRequest { .. } => RequestKind::Permission,
            WalletRequest::SignPayloadRequest { .. } => RequestKind::SignPayload,
            WalletRequest::OperationRequest { .. } => RequestKind::Operation,
            WalletRequest::BroadcastRequest { .. } => RequestKind::Broadcast,
        }
    }
}

/// A complete outgoing request. Immutable once sent; the id is generated at construction and the
/// protocol version and sender identity are stamped on by the pipeline.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub id: RequestId,
    pub version: String,
    pub sender_id: String,
    pub request: WalletRequest,
}

impl RequestEnvelope {
    pub fn new(sender_id: impl Into<String>, request: WalletRequest) -> Self {
        RequestEnvelope {
            id: RequestId::random(),
            version: PROTOCOL_VERSION.to_string(),
            sender_id: sender_id.into(),
            request,
        }
    }
}

/// The kind-specific body of a successful wallet reply.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WalletResponse {
    PermissionResponse {
        public_key: String,
        network: Network,
        scopes: Vec<PermissionScope>,
        threshold: Option<Threshold>,
    },
    SignPayloadResponse {
        signature: String,
    },
    OperationResponse {
        transaction_hash: String,
    },
    BroadcastResponse {
        transaction_hash: String,
    },
}

/// A matched reply from the wallet, correlated back to its request by id.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub id: RequestId,
    pub sender_id: String,
    pub version: String,
    pub response: WalletResponse,
}

/// An error reply. A present `error_type` is a well-known protocol error; an absent one is an
/// unexpected failure that still rejects the pending entry but cannot be translated.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub id: RequestId,
    pub sender_id: Option<String>,
    pub error_type: Option<WalletErrorCode>,
    pub description: Option<String>,
}

/// A peer-initiated session-control event: the wallet is closing the channel. Carries a fresh id
/// of the wallet's own making, so it never matches a pending request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DisconnectNotice {
    pub id: RequestId,
    pub sender_id: String,
}

/// The closed set of messages a wallet can send us. Routing is on the variant plus a correlation
/// lookup, never on arrival order.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    Response(ResponseEnvelope),
    Error(ErrorResponse),
    Disconnect(DisconnectNotice),
}

impl InboundMessage {
    pub fn id(&self) -> &RequestId {
        match self {
            InboundMessage::Response(env) => &env.id,
            InboundMessage::Error(err) => &err.id,
            InboundMessage::Disconnect(notice) => &notice.id,
        }
    }
}

impl Display for InboundMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            InboundMessage::Response(env) => write!(f, "response to {}", env.id),
            InboundMessage::Error(err) => write!(f, "error reply to {}", err.id),
            InboundMessage::Disconnect(notice) => write!(f, "disconnect notice {}", notice.id),
        }
    }
}

/// Metadata about the channel a particular reply arrived over.
#[derive(Clone, Debug)]
pub struct ConnectionContext {
    pub transport: TransportKind,
    pub peer_id: String,
    pub received_at: DateTime<Utc>,
}

impl ConnectionContext {
    pub fn new(transport: TransportKind, peer_id: impl Into<String>) -> Self {
        ConnectionContext { transport, peer_id: peer_id.into(), received_at: Utc::now() }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn request_ids_are_unique_and_hex() {
        let a = RequestId::random();
        let b = RequestId::random();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn envelope_round_trips_through_json() {
        let envelope = RequestEnvelope::new(
            "sender-1",
            WalletRequest::SignPayloadRequest { payload: "05deadbeef".into(), source_address: "addr1".into() },
        );
        let bytes = serde_json::to_vec(&envelope).unwrap();
        let parsed: RequestEnvelope = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed.id, envelope.id);
        assert_eq!(parsed.version, PROTOCOL_VERSION);
        assert_eq!(parsed.request.kind(), RequestKind::SignPayload);
    }

    #[test]
    fn inbound_variants_expose_their_id() {
        let id = RequestId::new("abc");
        let msg = InboundMessage::Disconnect(DisconnectNotice { id: id.clone(), sender_id: "w".into() });
        assert_eq!(msg.id(), &id);
    }
}
