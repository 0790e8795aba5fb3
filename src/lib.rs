//! Client-side half of an asynchronous wallet request/response protocol: typed requests go out
//! over a pluggable transport, replies arrive out of order, and a correlation table matches
//! them back to their callers while a single-slot asynchronous cell tracks the active account.

pub mod account;
pub mod active_account;
pub mod client;
pub mod correlation;
pub mod errors;
pub mod events;
pub mod message_types;
pub mod permissions;
pub mod rate_limit;
pub mod router;
pub mod storage;
pub mod transport;

pub use account::{
    account_identifier, AccountRecord, AddressDeriver, HashAddressDeriver, Network, Origin,
    PermissionScope, Threshold,
};
pub use active_account::{ActiveAccount, SettleCell};
pub use client::{
    BroadcastParams, ClientConfig, DappClient, InboundSink, OperationParams, PermissionParams,
    SignPayloadParams,
};
pub use correlation::PendingResponses;
pub use errors::{ClientError, TransportError, WalletErrorCode};
pub use events::{ClientEvent, EventBus};
pub use message_types::{
    AppMetadata, ConnectionContext, DisconnectNotice, ErrorResponse, InboundMessage,
    RequestEnvelope, RequestId, RequestKind, ResponseEnvelope, WalletRequest, WalletResponse,
    PROTOCOL_VERSION,
};
pub use rate_limit::{RateLimit, Unlimited, WindowLimiter};
pub use router::ResponseRouter;
pub use storage::{AccountStore, FileStore, MemoryStore};
pub use transport::{
    JsonSerializer, MemoryTransport, SentPayload, Serializer, Transport, TransportKind,
};
