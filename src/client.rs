use crate::account::{
    account_identifier, AccountRecord, AddressDeriver, HashAddressDeriver, Network, Origin,
    PermissionScope,
};
use crate::active_account::ActiveAccount;
use crate::correlation::PendingResponses;
use crate::errors::{translate_error_response, ClientError};
use crate::events::{ClientEvent, EventBus};
use crate::message_types::{
    AppMetadata, ConnectionContext, InboundMessage, RequestEnvelope, RequestKind, ResponseEnvelope,
    WalletRequest, WalletResponse,
};
use crate::permissions;
use crate::rate_limit::{RateLimit, WindowLimiter};
use crate::router::ResponseRouter;
use crate::storage::AccountStore;
use crate::transport::{JsonSerializer, Serializer, Transport};
use chrono::Utc;
use futures::channel::mpsc;
use log::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, OnceCell};
use tokio::task::JoinHandle;

/// Default throttle: at most this many requests per [`DEFAULT_RATE_WINDOW`].
pub const DEFAULT_RATE_LIMIT: usize = 50;
pub const DEFAULT_RATE_WINDOW: Duration = Duration::from_secs(30);

/// Sink the transport integration pushes inbound wallet messages into, together with the
/// connection context they arrived over.
pub type InboundSink = mpsc::Sender<(InboundMessage, ConnectionContext)>;

/// Static configuration for a [`DappClient`].
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Shown to the user by the wallet when asking for permissions.
    pub app_name: String,
    /// Overrides the persisted/generated sender identity when set.
    pub sender_id: Option<String>,
}

impl ClientConfig {
    pub fn new(app_name: impl Into<String>) -> Self {
        ClientConfig { app_name: app_name.into(), sender_id: None }
    }

    pub fn with_sender_id(mut self, sender_id: impl Into<String>) -> Self {
        self.sender_id = Some(sender_id.into());
        self
    }
}

/// Caller-supplied fields for a permission request. Both fields have protocol defaults.
#[derive(Clone, Debug, Default)]
pub struct PermissionParams {
    /// Defaults to the main network.
    pub network: Option<Network>,
    /// Defaults to operation + sign.
    pub scopes: Option<Vec<PermissionScope>>,
}

/// Caller-supplied fields for a payload signing request.
#[derive(Clone, Debug)]
pub struct SignPayloadParams {
    pub payload: String,
    /// Defaults to the active account's address.
    pub source_address: Option<String>,
}

impl SignPayloadParams {
    pub fn new(payload: impl Into<String>) -> Self {
        SignPayloadParams { payload: payload.into(), source_address: None }
    }
}

/// Caller-supplied fields for an operation request. Network and source address are taken from
/// the active account.
#[derive(Clone, Debug)]
pub struct OperationParams {
    pub operation_details: Vec<serde_json::Value>,
}

/// Caller-supplied fields for a broadcast request.
#[derive(Clone, Debug)]
pub struct BroadcastParams {
    pub signed_transaction: String,
    /// Defaults to the main network.
    pub network: Option<Network>,
}

impl BroadcastParams {
    pub fn new(signed_transaction: impl Into<String>) -> Self {
        BroadcastParams { signed_transaction: signed_transaction.into(), network: None }
    }
}

/// The application-facing client: four typed request entry points over one shared pipeline,
/// plus active-account and peer management.
///
/// Every request follows the same path: ensure init + connect (both idempotent), consult the
/// rate limiter, consult the permission gate, build the envelope, register a pending entry,
/// hand the payload to the transport, and suspend until the entry settles. Failures are
/// translated into [`ClientError`] for the caller and mirrored, best-effort, onto the event
/// bus. Nothing here retries; that is the caller's decision.
pub struct DappClient {
    inner: Arc<ClientInner>,
    router_handle: JoinHandle<()>,
}

struct ClientInner {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    serializer: Arc<dyn Serializer>,
    store: Arc<dyn AccountStore>,
    limiter: Arc<dyn RateLimit>,
    deriver: Arc<dyn AddressDeriver>,
    pending: PendingResponses,
    active: ActiveAccount,
    events: EventBus,
    sender_id: OnceCell<String>,
    init_once: OnceCell<()>,
}

impl DappClient {
    /// Create a client with the default collaborators (JSON codec, window rate limiter, hash
    /// address deriver). Returns the sink the transport integration pushes inbound messages
    /// into.
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn AccountStore>,
    ) -> (Self, InboundSink) {
        Self::with_collaborators(
            config,
            transport,
            store,
            Arc::new(JsonSerializer),
            Arc::new(WindowLimiter::new(DEFAULT_RATE_LIMIT, DEFAULT_RATE_WINDOW)),
            Arc::new(HashAddressDeriver),
        )
    }

    pub fn with_collaborators(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn AccountStore>,
        serializer: Arc<dyn Serializer>,
        limiter: Arc<dyn RateLimit>,
        deriver: Arc<dyn AddressDeriver>,
    ) -> (Self, InboundSink) {
        let pending = PendingResponses::new();
        let events = EventBus::default();
        let (inbound_tx, inbound_rx) = mpsc::channel(16);
        let router = ResponseRouter::new(pending.clone(), Arc::clone(&transport), events.clone());
        let router_handle = tokio::spawn(router.run(inbound_rx));
        let inner = Arc::new(ClientInner {
            config,
            transport,
            serializer,
            store,
            limiter,
            deriver,
            pending,
            active: ActiveAccount::new(),
            events,
            sender_id: OnceCell::new(),
            init_once: OnceCell::new(),
        });
        (DappClient { inner, router_handle }, inbound_tx)
    }

    /// Subscribe to client events. Each subscriber gets an independent receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    /// Resolve the sender identity and the persisted active account. Idempotent; every request
    /// entry point calls it, so calling it up front is optional.
    pub async fn init(&self) -> Result<(), ClientError> {
        self.inner.init().await
    }

    /// The active account, waiting for the startup load if it has not completed yet.
    pub async fn get_active_account(&self) -> Result<Option<AccountRecord>, ClientError> {
        self.inner.init().await?;
        Ok(self.inner.active.get().await)
    }

    /// Assign (or clear) the active account, persist the choice and notify observers.
    pub async fn set_active_account(&self, account: Option<AccountRecord>) -> Result<(), ClientError> {
        self.inner.set_active(account).await
    }

    /// All accounts currently persisted, active or not.
    pub async fn accounts(&self) -> Result<Vec<AccountRecord>, ClientError> {
        Ok(self.inner.store.accounts().await?)
    }

    pub async fn connected_peers(&self) -> Vec<String> {
        self.inner.transport.peers().await
    }

    /// Detach a peer and delete every account it granted. Clears the active account if the
    /// removed peer owned it.
    pub async fn remove_peer(&self, peer_id: &str) -> Result<(), ClientError> {
        self.inner.remove_peer(peer_id).await
    }

    /// Detach every peer and delete all accounts.
    pub async fn remove_all_peers(&self) -> Result<(), ClientError> {
        self.inner.remove_all_peers().await
    }

    /// Ask the wallet to grant an account. On success the granted account is persisted, made
    /// active and returned.
    pub async fn request_permissions(&self, params: PermissionParams) -> Result<AccountRecord, ClientError> {
        self.inner.guarded(RequestKind::Permission, self.inner.permission_request(params)).await
    }

    /// Ask the wallet to sign `payload` and return the signature.
    pub async fn request_sign_payload(&self, params: SignPayloadParams) -> Result<String, ClientError> {
        self.inner.guarded(RequestKind::SignPayload, self.inner.sign_request(params)).await
    }

    /// Ask the wallet to forge, sign and inject the given operations. Returns the resulting
    /// transaction hash.
    pub async fn request_operation(&self, params: OperationParams) -> Result<String, ClientError> {
        self.inner.guarded(RequestKind::Operation, self.inner.operation_request(params)).await
    }

    /// Ask the wallet to broadcast an already-signed transaction. Returns the transaction hash.
    pub async fn request_broadcast(&self, params: BroadcastParams) -> Result<String, ClientError> {
        self.inner.guarded(RequestKind::Broadcast, self.inner.broadcast_request(params)).await
    }

    /// Stop the response router. In-flight requests are abandoned and resolve with an error.
    pub async fn shutdown(self) {
        self.router_handle.abort();
        let _ = self.router_handle.await;
    }
}

impl ClientInner {
    async fn init(&self) -> Result<(), ClientError> {
        self.init_once
            .get_or_try_init(|| async {
                // Sender identity: config override, then the store, then freshly generated.
                let sender_id = match (&self.config.sender_id, self.store.sender_id().await?) {
                    (Some(configured), _) => configured.clone(),
                    (None, Some(persisted)) => persisted,
                    (None, None) => {
                        let bytes: [u8; 8] = rand::random();
                        let generated = hex::encode(bytes);
                        self.store.set_sender_id(&generated).await?;
                        debug!("Generated sender identity {generated}");
                        generated
                    }
                };
                let _ = self.sender_id.set(sender_id);

                // First settlement of the active-account slot, from persisted storage. A caller
                // that already set an account explicitly wins the race.
                let active = match self.store.active_account_id().await? {
                    Some(id) => {
                        self.store.accounts().await?.into_iter().find(|a| a.account_identifier == id)
                    }
                    None => None,
                };
                if self.active.settle_first(active).await {
                    trace!("Active account restored from storage");
                }
                Ok::<(), ClientError>(())
            })
            .await?;
        Ok(())
    }

    fn require_sender_id(&self) -> Result<&str, ClientError> {
        self.sender_id.get().map(String::as_str).ok_or(ClientError::MissingSenderIdentity)
    }

    /// Wraps a request so every failure, local or remote, also lands on the event bus.
    async fn guarded<T>(
        &self,
        kind: RequestKind,
        request: impl std::future::Future<Output = Result<T, ClientError>>,
    ) -> Result<T, ClientError> {
        match request.await {
            Ok(value) => Ok(value),
            Err(err) => {
                self.events.emit(ClientEvent::RequestFailed {
                    kind,
                    code: err.wallet_code(),
                    description: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Steps shared by every kind before the envelope exists: init + connect, rate limit,
    /// permission gate, sender identity.
    async fn prepare(&self, kind: RequestKind) -> Result<(Option<AccountRecord>, String), ClientError> {
        self.init().await?;
        self.transport.connect().await?;
        if self.limiter.record_and_check() {
            warn!("Rate limit reached; {kind} request rejected locally");
            return Err(ClientError::RateLimitReached);
        }
        let active = self.active.get().await;
        permissions::authorize(kind, active.as_ref())?;
        let sender_id = self.require_sender_id()?.to_string();
        Ok((active, sender_id))
    }

    /// Register, send and await settlement for one envelope. A transport failure rejects the
    /// same pending entry it registered, so the table never leaks.
    async fn perform(
        &self,
        request: WalletRequest,
        target: Option<String>,
    ) -> Result<(InboundMessage, ConnectionContext), ClientError> {
        let kind = request.kind();
        let envelope = RequestEnvelope::new(self.require_sender_id()?, request);
        let id = envelope.id.clone();
        let receiver = self.pending.register(id.clone()).await;
        let payload = self.serializer.serialize(&envelope)?;
        if let Err(err) = self.transport.send(payload, target.as_deref()).await {
            self.pending.abandon(&id).await;
            return Err(err.into());
        }
        debug!("Sent {kind} request {id}");
        self.events.emit(ClientEvent::RequestSent { kind, id: id.clone() });
        match receiver.await {
            Ok(Ok(settled)) => Ok(settled),
            Ok(Err(error_response)) => Err(translate_error_response(error_response)),
            Err(_cancelled) => {
                Err(ClientError::Opaque(format!("request {id} was abandoned before a reply arrived")))
            }
        }
    }

    async fn permission_request(&self, params: PermissionParams) -> Result<AccountRecord, ClientError> {
        let (_, sender_id) = self.prepare(RequestKind::Permission).await?;
        let network = params.network.unwrap_or_default();
        let scopes = params
            .scopes
            .unwrap_or_else(|| vec![PermissionScope::Operation, PermissionScope::Sign]);
        let request = WalletRequest::PermissionRequest {
            app_metadata: AppMetadata { sender_id, name: self.config.app_name.clone() },
            network,
            scopes,
        };
        let (message, context) = self.perform(request, None).await?;
        let reply = expect_response(message, RequestKind::Permission)?;
        let wallet_sender = reply.sender_id;
        let WalletResponse::PermissionResponse { public_key, network, scopes, threshold } = reply.response
        else {
            return Err(unexpected_reply(RequestKind::Permission));
        };
        let address = self.deriver.derive_address(&public_key, &network)?;
        let account = AccountRecord {
            account_identifier: account_identifier(&address, &network, &wallet_sender),
            sender_id: wallet_sender,
            origin: Origin { kind: context.transport, id: context.peer_id.clone() },
            address,
            public_key,
            network,
            scopes,
            threshold,
            connected_at: Utc::now(),
        };
        self.store.upsert_account(&account).await?;
        self.set_active(Some(account.clone())).await?;
        info!("Permissions granted for account {account}");
        self.events.emit(ClientEvent::PermissionGranted { account: account.clone(), context });
        Ok(account)
    }

    async fn sign_request(&self, params: SignPayloadParams) -> Result<String, ClientError> {
        let (active, _) = self.prepare(RequestKind::SignPayload).await?;
        let account = active.ok_or(ClientError::NoActiveAccount)?;
        if params.payload.is_empty() {
            return Err(ClientError::InvalidInput("sign requests need a non-empty payload".into()));
        }
        let source_address = params.source_address.unwrap_or_else(|| account.address.clone());
        let request = WalletRequest::SignPayloadRequest { payload: params.payload, source_address };
        let (message, context) = self.perform(request, Some(account.origin.id.clone())).await?;
        let reply = expect_response(message, RequestKind::SignPayload)?;
        let WalletResponse::SignPayloadResponse { signature } = reply.response else {
            return Err(unexpected_reply(RequestKind::SignPayload));
        };
        self.events.emit(ClientEvent::PayloadSigned {
            account,
            signature: signature.clone(),
            context,
        });
        Ok(signature)
    }

    async fn operation_request(&self, params: OperationParams) -> Result<String, ClientError> {
        let (active, _) = self.prepare(RequestKind::Operation).await?;
        let account = active.ok_or(ClientError::NoActiveAccount)?;
        if params.operation_details.is_empty() {
            return Err(ClientError::InvalidInput(
                "operation requests need at least one operation detail".into(),
            ));
        }
        let request = WalletRequest::OperationRequest {
            network: account.network.clone(),
            operation_details: params.operation_details,
            source_address: account.address.clone(),
        };
        let (message, context) = self.perform(request, Some(account.origin.id.clone())).await?;
        let reply = expect_response(message, RequestKind::Operation)?;
        let WalletResponse::OperationResponse { transaction_hash } = reply.response else {
            return Err(unexpected_reply(RequestKind::Operation));
        };
        self.events.emit(ClientEvent::OperationSubmitted {
            account,
            transaction_hash: transaction_hash.clone(),
            context,
        });
        Ok(transaction_hash)
    }

    async fn broadcast_request(&self, params: BroadcastParams) -> Result<String, ClientError> {
        let (active, _) = self.prepare(RequestKind::Broadcast).await?;
        let account = active.ok_or(ClientError::NoActiveAccount)?;
        if params.signed_transaction.is_empty() {
            return Err(ClientError::InvalidInput(
                "broadcast requests need a non-empty signed transaction".into(),
            ));
        }
        let request = WalletRequest::BroadcastRequest {
            network: params.network.unwrap_or_default(),
            signed_transaction: params.signed_transaction,
        };
        let (message, context) = self.perform(request, Some(account.origin.id.clone())).await?;
        let reply = expect_response(message, RequestKind::Broadcast)?;
        let WalletResponse::BroadcastResponse { transaction_hash } = reply.response else {
            return Err(unexpected_reply(RequestKind::Broadcast));
        };
        self.events.emit(ClientEvent::TransactionBroadcast {
            account,
            transaction_hash: transaction_hash.clone(),
            context,
        });
        Ok(transaction_hash)
    }

    async fn set_active(&self, account: Option<AccountRecord>) -> Result<(), ClientError> {
        self.active.set(account.clone()).await;
        self.store
            .set_active_account_id(account.as_ref().map(|a| a.account_identifier.as_str()))
            .await?;
        self.events.emit(ClientEvent::ActiveAccountChanged { account });
        Ok(())
    }

    async fn remove_peer(&self, peer_id: &str) -> Result<(), ClientError> {
        self.init().await?;
        let owned: Vec<AccountRecord> = self
            .store
            .accounts()
            .await?
            .into_iter()
            .filter(|a| a.origin.id == peer_id)
            .collect();
        for account in &owned {
            self.store.remove_account(&account.account_identifier).await?;
        }
        let active = self.active.get().await;
        if active.is_some_and(|a| a.origin.id == peer_id) {
            self.set_active(None).await?;
        }
        self.transport.remove_peer(peer_id).await?;
        info!("Removed peer {peer_id} and {} account(s) it granted", owned.len());
        self.events.emit(ClientEvent::ChannelClosed { peer_id: peer_id.to_string() });
        Ok(())
    }

    async fn remove_all_peers(&self) -> Result<(), ClientError> {
        self.init().await?;
        for account in self.store.accounts().await? {
            self.store.remove_account(&account.account_identifier).await?;
        }
        if self.active.get().await.is_some() {
            self.set_active(None).await?;
        }
        self.transport.remove_all_peers().await?;
        info!("Removed all peers and their accounts");
        Ok(())
    }
}

fn expect_response(message: InboundMessage, kind: RequestKind) -> Result<ResponseEnvelope, ClientError> {
    match message {
        InboundMessage::Response(envelope) => Ok(envelope),
        other => Err(ClientError::Opaque(format!(
            "expected a {kind} response but the wallet sent a {other}"
        ))),
    }
}

fn unexpected_reply(kind: RequestKind) -> ClientError {
    ClientError::Opaque(format!("the wallet replied to a {kind} request with a different response kind"))
}
