use crate::correlation::PendingResponses;
use crate::events::{ClientEvent, EventBus};
use crate::message_types::{ConnectionContext, InboundMessage};
use crate::transport::{Transport, TransportKind};
use futures::channel::mpsc;
use futures::StreamExt;
use log::*;
use std::sync::Arc;

/// Routes every inbound wallet message: first through the correlation table, then, for ids we
/// never issued, as an out-of-band session event. An unmatched id is a legitimate case (the
/// wallet initiates disconnects with ids of its own making), so nothing is dropped silently.
pub struct ResponseRouter {
    pending: PendingResponses,
    transport: Arc<dyn Transport>,
    events: EventBus,
}

impl ResponseRouter {
    pub fn new(pending: PendingResponses, transport: Arc<dyn Transport>, events: EventBus) -> Self {
        ResponseRouter { pending, transport, events }
    }

    /// Drain the inbound stream until the transport side closes it.
    pub async fn run(self, mut inbound: mpsc::Receiver<(InboundMessage, ConnectionContext)>) {
        while let Some((message, context)) = inbound.next().await {
            trace!("Inbound message received: {message}");
            self.handle(message, context).await;
        }
        debug!("Inbound message stream closed; response router stopping");
    }

    /// Handle one inbound message. Matched messages settle their pending entry inside the
    /// correlation table; unmatched disconnect notices detach the peer (peer-to-peer transports
    /// only); everything else unmatched is logged and dropped, never resolved against an
    /// unrelated pending entry.
    pub async fn handle(&self, message: InboundMessage, context: ConnectionContext) {
        let Some(unmatched) = self.pending.dispatch(message, context.clone()).await else {
            return;
        };
        match unmatched {
            InboundMessage::Disconnect(notice) => {
                if self.transport.kind() == TransportKind::P2p {
                    info!("Peer {} closed the channel (notice {})", context.peer_id, notice.id);
                    if let Err(err) = self.transport.remove_peer(&context.peer_id).await {
                        warn!("Could not remove peer {} after its disconnect: {err}", context.peer_id);
                    }
                    self.events.emit(ClientEvent::ChannelClosed { peer_id: context.peer_id });
                } else {
                    debug!("Ignoring disconnect notice {} on a {} transport", notice.id, self.transport.kind());
                }
            }
            other => {
                debug!("No matching request for {other}; dropping it");
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::message_types::{DisconnectNotice, RequestId, ResponseEnvelope, WalletResponse, PROTOCOL_VERSION};
    use crate::transport::MemoryTransport;

    fn router_with(kind: TransportKind) -> (ResponseRouter, Arc<MemoryTransport>, EventBus, PendingResponses) {
        let (transport, _outbox) = MemoryTransport::new(kind);
        let transport = Arc::new(transport);
        let events = EventBus::default();
        let pending = PendingResponses::new();
        let router = ResponseRouter::new(
            pending.clone(),
            Arc::clone(&transport) as Arc<dyn Transport>,
            events.clone(),
        );
        (router, transport, events, pending)
    }

    #[tokio::test]
    async fn unmatched_disconnect_detaches_the_peer() {
        let (router, transport, events, _) = router_with(TransportKind::P2p);
        transport.add_peer("wallet-peer").await;
        let mut rx = events.subscribe();
        let notice = InboundMessage::Disconnect(DisconnectNotice {
            id: RequestId::random(),
            sender_id: "wallet-1".into(),
        });
        router.handle(notice, ConnectionContext::new(TransportKind::P2p, "wallet-peer")).await;
        assert!(transport.peers().await.is_empty());
        match rx.recv().await.unwrap() {
            ClientEvent::ChannelClosed { peer_id } => assert_eq!(peer_id, "wallet-peer"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn disconnect_on_extension_transport_is_dropped() {
        let (router, transport, events, _) = router_with(TransportKind::Extension);
        transport.add_peer("wallet-peer").await;
        let mut rx = events.subscribe();
        let notice = InboundMessage::Disconnect(DisconnectNotice {
            id: RequestId::random(),
            sender_id: "wallet-1".into(),
        });
        router.handle(notice, ConnectionContext::new(TransportKind::Extension, "wallet-peer")).await;
        assert_eq!(transport.peers().await.len(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unmatched_response_never_settles_an_unrelated_entry() {
        let (router, _, _, pending) = router_with(TransportKind::P2p);
        let pending_id = RequestId::random();
        let mut rx = pending.register(pending_id.clone()).await;
        let stray = InboundMessage::Response(ResponseEnvelope {
            id: RequestId::random(),
            sender_id: "wallet-1".into(),
            version: PROTOCOL_VERSION.into(),
            response: WalletResponse::SignPayloadResponse { signature: "sig".into() },
        });
        router.handle(stray, ConnectionContext::new(TransportKind::P2p, "wallet-peer")).await;
        assert!(rx.try_recv().unwrap().is_none());
        assert_eq!(pending.len().await, 1);
    }
}
