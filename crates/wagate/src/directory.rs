//! Group directory.
//!
//! Read-through view over the network's participating-group listing. Every
//! call re-fetches from the connection; queries are infrequent and the
//! listing changes out from under any cache anyway.

use serde::Serialize;

use wagate_protocol::{GroupInfo, NetworkClient, NetworkError};

/// One group in the directory listing, as exposed over the API.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupRecord {
    pub id: String,
    pub subject: String,
    pub participants_count: u32,
    /// Owner address, or `-` when the network does not report one.
    pub owner: String,
}

impl From<GroupInfo> for GroupRecord {
    fn from(info: GroupInfo) -> Self {
        Self {
            id: info.id,
            subject: info.subject,
            participants_count: info.participant_count,
            owner: info.owner.unwrap_or_else(|| "-".to_string()),
        }
    }
}

/// Fetch the full listing, in the order the network reports it.
pub async fn list_groups(client: &dyn NetworkClient) -> Result<Vec<GroupRecord>, NetworkError> {
    let groups = client.fetch_groups().await?;
    Ok(groups.into_iter().map(GroupRecord::from).collect())
}

/// Membership test over the same fetch.
pub async fn is_member(
    client: &dyn NetworkClient,
    group_address: &str,
) -> Result<bool, NetworkError> {
    let groups = client.fetch_groups().await?;
    Ok(groups.iter().any(|g| g.id == group_address))
}

// ============================================================================
// Tests
// ============================================================================
