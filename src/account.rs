use crate::errors::ClientError;
use crate::transport::TransportKind;
use blake2::{Blake2b512, Digest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// The network an account lives on. Wallets may support several; requests carry the one they
/// apply to, defaulting to the main network.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
    Custom {
        name: String,
        rpc_url: String,
    },
}

impl Display for Network {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Network::Mainnet => write!(f, "mainnet"),
            Network::Testnet => write!(f, "testnet"),
            Network::Custom { name, .. } => write!(f, "custom:{name}"),
        }
    }
}

/// A named permission granted by the wallet during a permission exchange. Scopes gate which
/// request kinds the client may make on behalf of the granted account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionScope {
    /// Allows payload signing requests.
    Sign,
    /// Allows operation submission requests.
    Operation,
}

impl Display for PermissionScope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionScope::Sign => write!(f, "sign"),
            PermissionScope::Operation => write!(f, "operation"),
        }
    }
}

/// A signing threshold the wallet attached to a permission grant. Below the threshold the wallet
/// may sign without prompting the user again.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Threshold {
    pub amount: String,
    pub timeframe: String,
}

/// Where an account's wallet is reachable: the transport it paired over, and the peer id on that
/// transport.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    pub kind: TransportKind,
    pub id: String,
}

/// An account granted by a wallet. Created by a successful permission exchange and destroyed by
/// explicit removal or by removal of its owning peer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    /// Stable identifier, derived from the address, network and wallet sender id.
    pub account_identifier: String,
    /// The sender id of the wallet that granted the account.
    pub sender_id: String,
    pub origin: Origin,
    pub address: String,
    pub public_key: String,
    pub network: Network,
    pub scopes: Vec<PermissionScope>,
    pub threshold: Option<Threshold>,
    pub connected_at: DateTime<Utc>,
}

impl AccountRecord {
    pub fn has_scope(&self, scope: PermissionScope) -> bool {
        self.scopes.contains(&scope)
    }
}

impl Display for AccountRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} on {})", self.account_identifier, self.address, self.network)
    }
}

/// Derives the stable account identifier for an address + network + wallet sender id tuple.
/// The same tuple always yields the same identifier, so re-granting permissions updates the
/// existing record instead of duplicating it.
pub fn account_identifier(address: &str, network: &Network, sender_id: &str) -> String {
    let mut hasher = Blake2b512::new();
    hasher.update(address.as_bytes());
    hasher.update(network.to_string().as_bytes());
    hasher.update(sender_id.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}

/// Seam for deriving a display address from the public key a wallet returns. Real deployments
/// plug in the address scheme of their chain; the crate only needs *a* stable derivation.
pub trait AddressDeriver: Send + Sync {
    fn derive_address(&self, public_key: &str, network: &Network) -> Result<String, ClientError>;
}

/// Default deriver: a truncated Blake2b digest of the public key, hex encoded.
pub struct HashAddressDeriver;

impl AddressDeriver for HashAddressDeriver {
    fn derive_address(&self, public_key: &str, _network: &Network) -> Result<String, ClientError> {
        if public_key.is_empty() {
            return Err(ClientError::InvalidInput("cannot derive an address from an empty public key".into()));
        }
        let mut hasher = Blake2b512::new();
        hasher.update(public_key.as_bytes());
        let digest = hasher.finalize();
        Ok(hex::encode(&digest[..20]))
    }
}
