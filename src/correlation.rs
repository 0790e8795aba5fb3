use crate::message_types::{ConnectionContext, ErrorResponse, InboundMessage, RequestId};
use futures::channel::oneshot;
use log::*;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// What a pending entry settles with: the matched reply and the channel it arrived over, or the
/// wallet's error response.
pub type Settlement = Result<(InboundMessage, ConnectionContext), ErrorResponse>;

/// Tracks in-flight requests awaiting a reply, keyed by correlation id.
///
/// Each entry is a single-resolution future. `dispatch` settles an entry at most once and
/// removes it in the same table mutation, so a duplicate or late reply for the same id finds no
/// entry and is handed back to the caller as unmatched. Settlement across distinct ids is
/// independent; the only shared lock is the map itself.
#[derive(Default)]
pub struct PendingResponses {
    entries: Arc<RwLock<HashMap<RequestId, oneshot::Sender<Settlement>>>>,
}

impl Clone for PendingResponses {
    fn clone(&self) -> Self {
        Self { entries: Arc::clone(&self.entries) }
    }
}

impl PendingResponses {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending entry for `id` and return the receiver that will observe its
    /// settlement. Ids are generated fresh per request, so an existing entry for the same id is
    /// a bug; the stale entry is dropped and the collision logged.
    pub async fn register(&self, id: RequestId) -> oneshot::Receiver<Settlement> {
        let (sender, receiver) = oneshot::channel();
        let mut lock = self.entries.write().await;
        if lock.insert(id.clone(), sender).is_some() {
            error!("A pending request for {id} already existed; request ids must be unique per call");
            debug_assert!(false, "duplicate request id registered");
        }
        receiver
    }

    /// Drop the entry for `id` without settling it. Used when the send itself failed, so the
    /// failure can be surfaced to the caller while the table stays clean.
    pub async fn abandon(&self, id: &RequestId) {
        let mut lock = self.entries.write().await;
        if lock.remove(id).is_none() {
            trace!("Nothing to abandon for request {id}");
        }
    }

    /// Settle the entry matching `message`, if there is one.
    ///
    /// An error-kind message rejects the entry with its payload; any other matched message
    /// resolves it with `(message, context)`. The entry is removed under the same write lock
    /// that looks it up, so it can never be settled twice. Unmatched messages are returned to
    /// the caller for out-of-band handling rather than dropped here, since an unmatched id is a
    /// legitimate case, not an error.
    pub async fn dispatch(
        &self,
        message: InboundMessage,
        context: ConnectionContext,
    ) -> Option<InboundMessage> {
        let sender = {
            let mut lock = self.entries.write().await;
            lock.remove(message.id())
        };
        let Some(sender) = sender else {
            return Some(message);
        };
        let id = message.id().clone();
        let settlement = match message {
            InboundMessage::Error(err) => Err(err),
            other => Ok((other, context)),
        };
        if sender.send(settlement).is_err() {
            warn!("Request {id} settled, but the requester was no longer waiting");
        }
        None
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
