use crate::account::AccountRecord;
use async_trait::async_trait;
use ron::ser::PrettyConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tokio::sync::RwLock;

/// Persistence contract for accounts and the client's session identifiers.
///
/// The store is an external collaborator; the client only needs these typed operations, not a
/// particular backend.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn accounts(&self) -> Result<Vec<AccountRecord>, anyhow::Error>;

    /// Insert the account, or replace an existing record with the same identifier.
    async fn upsert_account(&self, account: &AccountRecord) -> Result<(), anyhow::Error>;

    async fn remove_account(&self, account_identifier: &str) -> Result<(), anyhow::Error>;

    async fn active_account_id(&self) -> Result<Option<String>, anyhow::Error>;

    async fn set_active_account_id(&self, id: Option<&str>) -> Result<(), anyhow::Error>;

    async fn sender_id(&self) -> Result<Option<String>, anyhow::Error>;

    async fn set_sender_id(&self, id: &str) -> Result<(), anyhow::Error>;
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct StoredState {
    sender_id: Option<String>,
    active_account: Option<String>,
    accounts: Vec<AccountRecord>,
}

impl StoredState {
    fn upsert(&mut self, account: &AccountRecord) {
        match self.accounts.iter_mut().find(|a| a.account_identifier == account.account_identifier) {
            Some(existing) => *existing = account.clone(),
            None => self.accounts.push(account.clone()),
        }
    }
}

/// In-memory store. State is lost when the client goes away.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<StoredState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn accounts(&self) -> Result<Vec<AccountRecord>, anyhow::Error> {
        Ok(self.state.read().await.accounts.clone())
    }

    async fn upsert_account(&self, account: &AccountRecord) -> Result<(), anyhow::Error> {
        self.state.write().await.upsert(account);
        Ok(())
    }

    async fn remove_account(&self, account_identifier: &str) -> Result<(), anyhow::Error> {
        self.state.write().await.accounts.retain(|a| a.account_identifier != account_identifier);
        Ok(())
    }

    async fn active_account_id(&self) -> Result<Option<String>, anyhow::Error> {
        Ok(self.state.read().await.active_account.clone())
    }

    async fn set_active_account_id(&self, id: Option<&str>) -> Result<(), anyhow::Error> {
        self.state.write().await.active_account = id.map(String::from);
        Ok(())
    }

    async fn sender_id(&self) -> Result<Option<String>, anyhow::Error> {
        Ok(self.state.read().await.sender_id.clone())
    }

    async fn set_sender_id(&self, id: &str) -> Result<(), anyhow::Error> {
        self.state.write().await.sender_id = Some(id.to_string());
        Ok(())
    }
}

/// A file-backed store. The whole client state lives in a single `accounts.ron` inside the
/// given directory; every mutation rewrites the file.
pub struct FileStore {
    path: PathBuf,
    state: RwLock<StoredState>,
}

impl FileStore {
    /// Opens (or creates) the store in `dir`, loading any previously persisted state.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, anyhow::Error> {
        let path = dir.into();
        if !path.exists() {
            fs::create_dir_all(&path)?;
        }
        let file = path.join("accounts.ron");
        let state = if file.exists() {
            ron::de::from_str(&fs::read_to_string(&file)?)?
        } else {
            StoredState::default()
        };
        Ok(FileStore { path, state: RwLock::new(state) })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn persist(&self, state: &StoredState) -> Result<(), anyhow::Error> {
        let config = PrettyConfig::new().compact_arrays(true).compact_maps(true);
        let val = ron::ser::to_string_pretty(state, config)?;
        fs::write(self.path.join("accounts.ron"), val)?;
        Ok(())
    }
}

#[async_trait]
impl AccountStore for FileStore {
    async fn accounts(&self) -> Result<Vec<AccountRecord>, anyhow::Error> {
        Ok(self.state.read().await.accounts.clone())
    }

    async fn upsert_account(&self, account: &AccountRecord) -> Result<(), anyhow::Error> {
        let mut state = self.state.write().await;
        state.upsert(account);
        self.persist(&state)
    }

    async fn remove_account(&self, account_identifier: &str) -> Result<(), anyhow::Error> {
        let mut state = self.state.write().await;
        state.accounts.retain(|a| a.account_identifier != account_identifier);
        self.persist(&state)
    }

    async fn active_account_id(&self) -> Result<Option<String>, anyhow::Error> {
        Ok(self.state.read().await.active_account.clone())
    }

    async fn set_active_account_id(&self, id: Option<&str>) -> Result<(), anyhow::Error> {
        let mut state = self.state.write().await;
        state.active_account = id.map(String::from);
        self.persist(&state)
    }

    async fn sender_id(&self) -> Result<Option<String>, anyhow::Error> {
        Ok(self.state.read().await.sender_id.clone())
    }

    async fn set_sender_id(&self, id: &str) -> Result<(), anyhow::Error> {
        let mut state = self.state.write().await;
        state.sender_id = Some(id.to_string());
        self.persist(&state)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::account::{account_identifier, Network, Origin};
    use crate::transport::TransportKind;
    use chrono::Utc;

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
    async fn file_store_round_trips_state() {
        let dir = tempfile::tempdir().unwrap();
        let acct = account("addr1");
        {
            let store = FileStore::new(dir.path()).unwrap();
            store.set_sender_id("dapp-1").await.unwrap();
            store.upsert_account(&acct).await.unwrap();
            store.set_active_account_id(Some(&acct.account_identifier)).await.unwrap();
        }
        let reloaded = FileStore::new(dir.path()).unwrap();
        assert_eq!(reloaded.sender_id().await.unwrap().as_deref(), Some("dapp-1"));
        assert_eq!(reloaded.active_account_id().await.unwrap(), Some(acct.account_identifier.clone()));
        assert_eq!(reloaded.accounts().await.unwrap(), vec![acct]);
    }

    #[tokio::test]
    async fn upsert_replaces_by_identifier() {
        let store = MemoryStore::new();
        let mut acct = account("addr1");
        store.upsert_account(&acct).await.unwrap();
        acct.public_key = "pk2".into();
        store.upsert_account(&acct).await.unwrap();
        let accounts = store.accounts().await.unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].public_key, "pk2");
    }

    #[tokio::test]
    async fn remove_account_only_touches_its_target() {
        let store = MemoryStore::new();
        let a = account("addr1");
        let b = account("addr2");
        store.upsert_account(&a).await.unwrap();
        store.upsert_account(&b).await.unwrap();
        store.remove_account(&a.account_identifier).await.unwrap();
        assert_eq!(store.accounts().await.unwrap(), vec![b]);
    }
}
