use crate::account::{AccountRecord, PermissionScope};
use crate::errors::ClientError;
use crate::message_types::RequestKind;

/// The fixed mapping from request kind to the scope it requires. `None` means the kind is not
/// scope-gated: permission requests are how scopes are obtained in the first place, and
/// broadcasting an already-signed transaction needs no grant.
pub fn required_scope(kind: RequestKind) -> Option<PermissionScope> {
    match kind {
        RequestKind::Permission | RequestKind::Broadcast => None,
        RequestKind::SignPayload => Some(PermissionScope::Sign),
        RequestKind::Operation => Some(PermissionScope::Operation),
    }
}

/// Pure allow/deny decision for a request kind against the active account.
///
/// Permission requests are always allowed. Every other kind requires a present active account,
/// and is allowed iff its required scope (when it has one) is in the account's granted set.
pub fn authorize(kind: RequestKind, active: Option<&AccountRecord>) -> Result<(), ClientError> {
    if kind == RequestKind::Permission {
        return Ok(());
    }
    let account = active.ok_or(ClientError::NoActiveAccount)?;
    match required_scope(kind) {
        None => Ok(()),
        Some(scope) if account.has_scope(scope) => Ok(()),
        Some(scope) => Err(ClientError::NoPermission(scope)),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::account::{account_identifier, Network, Origin};
    use crate::transport::TransportKind;
    use chrono::Utc;

    fn account_with(scopes: Vec<PermissionScope>) -> AccountRecord {
        let network = Network::Mainnet;
        AccountRecord {
            account_identifier: account_identifier("addr1", &network, "wallet-1"),
            sender_id: "wallet-1".into(),
            origin: Origin { kind: TransportKind::P2p, id: "peer-1".into() },
            address: "addr1".into(),
            public_key: "pk".into(),
            network,
            scopes,
            threshold: None,
            connected_at: Utc::now(),
        }
    }

    #[test]
    fn permission_requests_are_always_allowed() {
        assert!(authorize(RequestKind::Permission, None).is_ok());
        let account = account_with(vec![]);
        assert!(authorize(RequestKind::Permission, Some(&account)).is_ok());
    }

    #[test]
    fn account_bound_kinds_need_an_account() {
        for kind in [RequestKind::SignPayload, RequestKind::Operation, RequestKind::Broadcast] {
            assert!(matches!(authorize(kind, None), Err(ClientError::NoActiveAccount)));
        }
    }

    #[test]
    fn scopes_gate_sign_and_operation() {
        let signer = account_with(vec![PermissionScope::Sign]);
        assert!(authorize(RequestKind::SignPayload, Some(&signer)).is_ok());
        assert!(matches!(
            authorize(RequestKind::Operation, Some(&signer)),
            Err(ClientError::NoPermission(PermissionScope::Operation))
        ));
    }

    #[test]
    fn broadcast_needs_no_scope() {
        let account = account_with(vec![]);
        assert!(authorize(RequestKind::Broadcast, Some(&account)).is_ok());
    }
}
