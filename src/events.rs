use crate::account::AccountRecord;
use crate::errors::WalletErrorCode;
use crate::message_types::{ConnectionContext, RequestId, RequestKind};
use log::*;
use tokio::sync::broadcast;

/// Notifications for observers (UI layers, logging). Fire-and-forget: emitting never blocks the
/// request pipeline and a broken or slow observer only affects its own receiver.
#[derive(Clone, Debug)]
pub enum ClientEvent {
    /// A request envelope was handed to the transport.
    RequestSent { kind: RequestKind, id: RequestId },
    PermissionGranted {
        account: AccountRecord,
        context: ConnectionContext,
    },
    PayloadSigned {
        account: AccountRecord,
        signature: String,
        context: ConnectionContext,
    },
    OperationSubmitted {
        account: AccountRecord,
        transaction_hash: String,
        context: ConnectionContext,
    },
    TransactionBroadcast {
        account: AccountRecord,
        transaction_hash: String,
        context: ConnectionContext,
    },
    /// A request failed, locally or at the wallet. Carries the wallet's error code when the
    /// failure was a translated counterparty error.
    RequestFailed {
        kind: RequestKind,
        code: Option<WalletErrorCode>,
        description: String,
    },
    ActiveAccountChanged { account: Option<AccountRecord> },
    /// The channel to a peer was closed, either by us or by the peer.
    ChannelClosed { peer_id: String },
}

/// Broadcast bus for [`ClientEvent`]s. Cheap to clone; every subscriber gets an independent
/// buffered receiver, so one observer can never block or fail another.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ClientEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        EventBus { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.sender.subscribe()
    }

    /// Best-effort emit. A failure to notify (e.g. no live observers) is logged, never
    /// propagated to the caller.
    pub fn emit(&self, event: ClientEvent) {
        if let Err(err) = self.sender.send(event) {
            trace!("No observers for client event: {err}");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn emit_without_observers_is_harmless() {
        let bus = EventBus::default();
        bus.emit(ClientEvent::ChannelClosed { peer_id: "peer-1".into() });
    }

    #[tokio::test]
    async fn every_subscriber_sees_the_event() {
        let bus = EventBus::default();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        bus.emit(ClientEvent::ChannelClosed { peer_id: "peer-1".into() });
        for rx in [&mut first, &mut second] {
            match rx.recv().await.unwrap() {
                ClientEvent::ChannelClosed { peer_id } => assert_eq!(peer_id, "peer-1"),
                other => panic!("unexpected event {other:?}"),
            }
        }
    }
}
