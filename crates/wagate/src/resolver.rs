//! Recipient resolution.
//!
//! Human-entered identifiers become fully-qualified network addresses, then
//! get verified against the live connection before a send is attempted.
//! Callers pass in the client so resolution always runs against whichever
//! connection is current at that moment.

use thiserror::Error;

use wagate_protocol::{NetworkClient, NetworkError, jid};

use crate::directory;

// ============================================================================
// Resolver
// ============================================================================

/// Normalizes and verifies send targets.
#[derive(Debug, Clone)]
pub struct Resolver {
    country_code: String,
}

impl Resolver {
    pub fn new(country_code: impl Into<String>) -> Self {
        Self {
            country_code: country_code.into(),
        }
    }

    /// Rewrite a human-entered number into a user address. Total: malformed
    /// input still yields a syntactically valid address, which the network
    /// rejects at resolution time instead.
    pub fn normalize_individual(&self, raw: &str) -> String {
        jid::normalize_user(raw, &self.country_code)
    }

    /// Normalize a number and confirm the address is provisioned on the
    /// network, returning the canonical form the network reports.
    pub async fn resolve_individual(
        &self,
        client: &dyn NetworkClient,
        raw: &str,
    ) -> Result<String, ResolveError> {
        let address = self.normalize_individual(raw);
        match client.check_user(&address).await? {
            Some(canonical) => Ok(canonical),
            None => Err(ResolveError::RecipientNotFound(address)),
        }
    }

    /// Normalize a group id and confirm the account participates in it.
    pub async fn resolve_group(
        &self,
        client: &dyn NetworkClient,
        raw: &str,
    ) -> Result<String, ResolveError> {
        let address = jid::normalize_group(raw);
        if directory::is_member(client, &address).await? {
            Ok(address)
        } else {
            Err(ResolveError::GroupNotFound(address))
        }
    }
}

// ============================================================================
// ResolveError
// ============================================================================

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("recipient {0} is not registered on the network")]
    RecipientNotFound(String),

    #[error("group {0} not found among joined groups")]
    GroupNotFound(String),

    #[error(transparent)]
    Network(#[from] NetworkError),
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use wagate_protocol::memory::MemoryNetwork;
    use wagate_protocol::{
        CredentialBundle, CredentialEntry, DeviceInfo, GroupInfo, NetworkConnector,
    };

    async fn open_client(net: &MemoryNetwork) -> Arc<dyn NetworkClient> {
        let bundle = CredentialBundle {
            entries: vec![CredentialEntry::new("creds.json", b"{}".to_vec())],
        };
        net.connect(&DeviceInfo::default(), Some(bundle))
            .await
            .unwrap()
            .client
    }

    #[test]
    fn test_normalize_individual_is_idempotent() {
        let resolver = Resolver::new("62");
        let once = resolver.normalize_individual("081234567890");
        let twice = resolver.normalize_individual(&once);
        assert_eq!(once, "6281234567890@s.whatsapp.net");
        assert_eq!(twice, once);
    }

    #[tokio::test]
    async fn test_resolve_individual_known_number() {
        let net = MemoryNetwork::new();
        net.register_user("6281234567890@s.whatsapp.net");
        let client = open_client(&net).await;

        let resolver = Resolver::new("62");
        let address = resolver
            .resolve_individual(client.as_ref(), "081234567890")
            .await
            .unwrap();
        assert_eq!(address, "6281234567890@s.whatsapp.net");
    }

    #[tokio::test]
    async fn test_resolve_individual_unknown_number() {
        let net = MemoryNetwork::new();
        let client = open_client(&net).await;

        let resolver = Resolver::new("62");
        let err = resolver
            .resolve_individual(client.as_ref(), "081234567890")
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::RecipientNotFound(_)));
    }

    #[tokio::test]
    async fn test_resolve_group_member() {
        let net = MemoryNetwork::new();
        net.register_group(GroupInfo {
            id: "120363041234@g.us".to_string(),
            subject: "ops".to_string(),
            participant_count: 4,
            owner: None,
        });
        let client = open_client(&net).await;

        let resolver = Resolver::new("62");
        let address = resolver
            .resolve_group(client.as_ref(), "120363041234")
            .await
            .unwrap();
        assert_eq!(address, "120363041234@g.us");
    }

    #[tokio::test]
    async fn test_resolve_group_not_joined() {
        let net = MemoryNetwork::new();
        let client = open_client(&net).await;

        let resolver = Resolver::new("62");
        let err = resolver
            .resolve_group(client.as_ref(), "120363049999")
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::GroupNotFound(_)));
    }

    #[tokio::test]
    async fn test_resolve_on_closed_connection() {
        let net = MemoryNetwork::new();
        // No credentials and no auto-pair, so the link never opens.
        let conn = net.connect(&DeviceInfo::default(), None).await.unwrap();

        let resolver = Resolver::new("62");
        let err = resolver
            .resolve_individual(conn.client.as_ref(), "081234567890")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ResolveError::Network(NetworkError::NotConnected)
        ));
    }
}
