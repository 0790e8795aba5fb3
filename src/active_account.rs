use crate::account::AccountRecord;
use futures::channel::oneshot;
use log::*;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

enum CellState<T> {
    /// Not settled yet. Holds the waiters that arrived early.
    Unsettled(Vec<oneshot::Sender<T>>),
    Settled(T),
}

/// A write-once asynchronous cell: an explicit `{unsettled, settled(value)}` state machine.
///
/// `await_value` suspends until the cell settles; every caller that began waiting before the
/// settlement observes the same value. `settle` wins at most once per cell; changing a value
/// that has already settled is done by constructing a *new* cell, not by mutating this one, so
/// waiters holding a reference to the old cell still observe the value they were waiting for.
pub struct SettleCell<T> {
    state: Mutex<CellState<T>>,
}

impl<T: Clone> SettleCell<T> {
    pub fn new() -> Self {
        SettleCell { state: Mutex::new(CellState::Unsettled(Vec::new())) }
    }

    /// A cell that is born settled. Used when replacing an already-settled cell.
    pub fn settled_with(value: T) -> Self {
        SettleCell { state: Mutex::new(CellState::Settled(value)) }
    }

    /// The cell's eventual value. Returns immediately once settled.
    pub async fn await_value(&self) -> T {
        loop {
            let receiver = {
                let mut state = self.state.lock().await;
                match &mut *state {
                    CellState::Settled(value) => return value.clone(),
                    CellState::Unsettled(waiters) => {
                        let (sender, receiver) = oneshot::channel();
                        waiters.push(sender);
                        receiver
                    }
                }
            };
            match receiver.await {
                Ok(value) => return value,
                // Sender dropped without a value; re-check the state.
                Err(_) => continue,
            }
        }
    }

    /// Settle the cell with `value`. Returns false (and discards `value`) if it already settled.
    pub async fn settle(&self, value: T) -> bool {
        let waiters = {
            let mut state = self.state.lock().await;
            match &mut *state {
                CellState::Settled(_) => return false,
                CellState::Unsettled(waiters) => {
                    let drained = std::mem::take(waiters);
                    *state = CellState::Settled(value.clone());
                    drained
                }
            }
        };
        for waiter in waiters {
            let _ = waiter.send(value.clone());
        }
        true
    }

    pub async fn is_settled(&self) -> bool {
        matches!(&*self.state.lock().await, CellState::Settled(_))
    }
}

impl<T: Clone> Default for SettleCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// The single-slot holder for the active account.
///
/// One exclusively-owned cell reference, reassigned under a lock: the single point of mutation.
/// `get` suspends on the *current* cell, so a read that starts before the account is known (the
/// startup load is itself asynchronous) waits for exactly that load. A later `set` replaces the
/// cell wholesale; readers that already captured the old cell keep the old value, readers that
/// arrive afterwards observe the new one.
#[derive(Default)]
pub struct ActiveAccount {
    cell: RwLock<Arc<SettleCell<Option<AccountRecord>>>>,
}

impl ActiveAccount {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current cell's eventual value. Suspends until that specific cell settles.
    pub async fn get(&self) -> Option<AccountRecord> {
        let cell = Arc::clone(&*self.cell.read().await);
        // Awaited outside the lock so a concurrent set() is never blocked by waiters.
        cell.await_value().await
    }

    /// Assign the active account. Settles the current cell in place if this is the first
    /// settlement, otherwise swaps in a brand-new settled cell.
    pub async fn set(&self, account: Option<AccountRecord>) {
        let mut slot = self.cell.write().await;
        if slot.settle(account.clone()).await {
            trace!("Active account slot settled for the first time");
        } else {
            debug!("Active account replaced");
            *slot = Arc::new(SettleCell::settled_with(account));
        }
    }

    /// Settle only if nothing has settled the slot yet. Used by the startup load so a caller
    /// that raced ahead with an explicit `set` is not overridden.
    pub async fn settle_first(&self, account: Option<AccountRecord>) -> bool {
        let slot = self.cell.read().await;
        slot.settle(account).await
    }

    pub async fn is_settled(&self) -> bool {
        self.cell.read().await.is_settled().await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::account::{account_identifier, AccountRecord, Network, Origin};
    use crate::transport::TransportKind;
    use chrono::Utc;
    use std::time::Duration;
    use tokio::time::timeout;

    fn account(address: &str) -> AccountRecord {
        let network = Network::Mainnet;
        AccountRecord {
            account_identifier: account_identifier(address, &network, "wallet-1"),
            sender_id: "wallet-1".into(),
            origin: Origin { kind: TransportKind::P2p, id: "peer-1".into() },
            address: address.into(),
            public_key: "pk".into(),
            network,
            scopes: vec![],
            threshold: None,
            connected_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn get_suspends_until_first_set() {
        let slot = Arc::new(ActiveAccount::new());
        let reader = {
            let slot = Arc::clone(&slot);
            tokio::spawn(async move { slot.get().await })
        };
        // the reader cannot finish before anything settles the slot
        tokio::task::yield_now().await;
        assert!(!reader.is_finished());
        slot.set(Some(account("addr1"))).await;
        let seen = timeout(Duration::from_secs(1), reader).await.unwrap().unwrap();
        assert_eq!(seen.unwrap().address, "addr1");
    }

    #[tokio::test]
    async fn all_early_waiters_observe_the_same_value() {
        let cell = Arc::new(SettleCell::<Option<AccountRecord>>::new());
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let cell = Arc::clone(&cell);
                tokio::spawn(async move { cell.await_value().await })
            })
            .collect();
        tokio::task::yield_now().await;
        assert!(cell.settle(Some(account("addr1"))).await);
        for waiter in waiters {
            let seen = timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
            assert_eq!(seen.unwrap().address, "addr1");
        }
    }

    #[tokio::test]
    async fn settle_wins_only_once() {
        let cell = SettleCell::new();
        assert!(cell.settle(1u32).await);
        assert!(!cell.settle(2u32).await);
        assert_eq!(cell.await_value().await, 1);
    }

    #[tokio::test]
    async fn replacement_does_not_redirect_old_waiters() {
        let slot = ActiveAccount::new();
        slot.set(Some(account("addr1"))).await;
        // capture the settled cell the way a waiter would, then replace it
        let old_cell = Arc::clone(&*slot.cell.read().await);
        slot.set(None).await;
        assert_eq!(old_cell.await_value().await.unwrap().address, "addr1");
        assert!(slot.get().await.is_none());
    }

    #[tokio::test]
    async fn settle_first_does_not_override_an_explicit_set() {
        let slot = ActiveAccount::new();
        slot.set(Some(account("addr1"))).await;
        assert!(!slot.settle_first(None).await);
        assert_eq!(slot.get().await.unwrap().address, "addr1");
    }
}
