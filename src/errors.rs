use crate::account::PermissionScope;
use crate::message_types::ErrorResponse;
use log::warn;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An error code reported by the wallet in an error response, akin to an HTTP error code.
/// These are the codes the protocol defines; anything else arrives without a code and is
/// surfaced as [`ClientError::Opaque`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WalletErrorCode {
    #[error("The user aborted the request.")]
    Aborted,
    #[error("The wallet does not support the requested network.")]
    NetworkNotSupported,
    #[error("The wallet has no address for the requested account.")]
    NoAddress,
    #[error("The wallet holds no private key that can satisfy the request.")]
    NoPrivateKeyFound,
    #[error("The wallet has not granted permission for this request.")]
    NotGranted,
    #[error("The request parameters were invalid.")]
    ParametersInvalid,
    #[error("The request contained too many operations.")]
    TooManyOperations,
    #[error("The transaction was rejected as invalid.")]
    TransactionInvalid,
    #[error("The requested signature type is not supported.")]
    SignatureTypeNotSupported,
    #[error("The signed transaction could not be broadcast.")]
    BroadcastError,
}

/// Failures at the transport seam. The transport itself is an external collaborator; these are
/// the ways it can let the client down.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("The transport is not connected.")]
    NotConnected,
    #[error("The message could not be delivered. {0}")]
    SendFailed(String),
    #[error("No peer with id {0} is known to the transport.")]
    UnknownPeer(String),
    #[error("The transport has been shut down.")]
    Closed,
    #[error("I/O error. {0}")]
    Io(#[from] std::io::Error),
}

/// The client-side error taxonomy. Every request entry point resolves to exactly one of these;
/// none are retried internally, and each also triggers a best-effort failure notification on the
/// event bus.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The caller omitted or malformed a required field. Raised before any network interaction.
    #[error("A required field was missing or invalid. {0}")]
    InvalidInput(String),
    /// The request needs a bound account and none is set.
    #[error("No active account is set.")]
    NoActiveAccount,
    /// The active account lacks the scope this request kind requires.
    #[error("The active account has not been granted the '{0}' scope.")]
    NoPermission(PermissionScope),
    /// The local throttle rejected the request before it was sent.
    #[error("Too many requests were made in a short period. Try again later.")]
    RateLimitReached,
    /// The client has no sender identity. Indicates the client was driven before `init()`.
    #[error("The client's sender identity has not been resolved yet.")]
    MissingSenderIdentity,
    /// The wallet answered with a well-known error code.
    #[error("The wallet rejected the request. {0}")]
    Counterparty(WalletErrorCode),
    #[error("Transport failure. {0}")]
    Transport(#[from] TransportError),
    #[error("Error reading or writing the account store. {0}")]
    Storage(#[from] anyhow::Error),
    #[error("Error encoding or decoding a message. {0}")]
    Serialization(#[from] serde_json::Error),
    /// A failure that could not be classified: an error response without a recognised code, or
    /// an unexpected reply shape. Surfaced as-is rather than invented.
    #[error("An unclassified failure occurred. {0}")]
    Opaque(String),
}

impl ClientError {
    /// The wallet error code behind this error, when there is one.
    pub fn wallet_code(&self) -> Option<WalletErrorCode> {
        match self {
            ClientError::Counterparty(code) => Some(*code),
            _ => None,
        }
    }
}

/// Maps a received error response into the local taxonomy. A recognised code maps through the
/// fixed table above; an absent code is logged with the raw payload and surfaced unmapped.
pub fn translate_error_response(response: ErrorResponse) -> ClientError {
    match response.error_type {
        Some(code) => ClientError::Counterparty(code),
        None => {
            warn!(
                "Wallet returned an error without a recognised code for request {}: {:?}",
                response.id, response.description
            );
            ClientError::Opaque(
                response.description.unwrap_or_else(|| "wallet error without an error code".into()),
            )
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::message_types::RequestId;

    #[test]
    fn known_code_maps_to_counterparty() {
        let response = ErrorResponse {
            id: RequestId::new("req-1"),
            sender_id: Some("wallet-1".into()),
            error_type: Some(WalletErrorCode::Aborted),
            description: None,
        };
        let err = translate_error_response(response);
        assert!(matches!(err, ClientError::Counterparty(WalletErrorCode::Aborted)));
        assert_eq!(err.wallet_code(), Some(WalletErrorCode::Aborted));
    }

    #[test]
    fn absent_code_is_surfaced_opaque() {
        let response = ErrorResponse {
            id: RequestId::new("req-2"),
            sender_id: None,
            error_type: None,
            description: Some("something the protocol does not know".into()),
        };
        match translate_error_response(response) {
            ClientError::Opaque(msg) => assert!(msg.contains("something the protocol does not know")),
            other => panic!("expected an opaque error, got {other:?}"),
        }
    }
}
