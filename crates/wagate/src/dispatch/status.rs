//! Per-item dispatch status.
//!
//! Queued mode acknowledges before the send happens; this registry is how
//! callers find out what became of an accepted item. Finished entries stay
//! queryable for a retention window and are then pruned.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

/// How long finished entries stay queryable (30 minutes).
const DEFAULT_RETENTION_SECS: u64 = 30 * 60;

// ============================================================================
// States
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DispatchState {
    /// Waiting in the queue.
    Pending,
    /// The worker is executing it right now.
    Sending,
    /// Delivered to the network, which assigned this message id.
    Sent { message_id: String },
    /// Failed for good.
    Failed { error: String },
}

impl DispatchState {
    pub fn is_final(&self) -> bool {
        matches!(self, DispatchState::Sent { .. } | DispatchState::Failed { .. })
    }
}

/// Everything known about one dispatched item.
#[derive(Debug, Clone, Serialize)]
pub struct ItemStatus {
    pub id: String,
    pub target: String,
    #[serde(flatten)]
    pub state: DispatchState,
    pub enqueued_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Registry
// ============================================================================

/// Shared registry of item statuses. Cloning shares the same map.
#[derive(Clone, Default)]
pub struct StatusRegistry {
    entries: Arc<DashMap<String, ItemStatus>>,
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_pending(&self, id: &str, target: String, enqueued_at: DateTime<Utc>) {
        self.entries.insert(
            id.to_string(),
            ItemStatus {
                id: id.to_string(),
                target,
                state: DispatchState::Pending,
                enqueued_at,
                finished_at: None,
            },
        );
    }

    pub fn mark_sending(&self, id: &str) {
        self.update(id, DispatchState::Sending);
    }

    pub fn mark_sent(&self, id: &str, message_id: &str) {
        self.update(
            id,
            DispatchState::Sent {
                message_id: message_id.to_string(),
            },
        );
    }

    pub fn mark_failed(&self, id: &str, error: &str) {
        self.update(
            id,
            DispatchState::Failed {
                error: error.to_string(),
            },
        );
    }

    pub fn get(&self, id: &str) -> Option<ItemStatus> {
        self.entries.get(id).map(|e| e.clone())
    }

    /// Remove finished entries older than the retention window.
    pub fn prune(&self, max_age_secs: Option<u64>) {
        let max_age = Duration::from_secs(max_age_secs.unwrap_or(DEFAULT_RETENTION_SECS));
        let now = Utc::now();
        let mut to_remove = Vec::new();

        for entry in self.entries.iter() {
            if entry.state.is_final()
                && let Some(finished_at) = entry.finished_at
            {
                let age = (now - finished_at).to_std().unwrap_or(Duration::ZERO);
                if age > max_age {
                    to_remove.push(entry.key().clone());
                }
            }
        }

        for id in to_remove {
            self.entries.remove(&id);
            debug!(item = %id, "pruned finished dispatch entry");
        }
    }

    fn update(&self, id: &str, state: DispatchState) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            // A final state never changes again.
            if entry.state.is_final() {
                return;
            }
            if state.is_final() {
                entry.finished_at = Some(Utc::now());
            }
            entry.state = state;
        }
    }
}

/// Spawn the periodic prune task. Returns its handle for shutdown.
pub fn spawn_prune_task(registry: StatusRegistry) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5 * 60)); // Every 5 min
        loop {
            interval.tick().await;
            registry.prune(None);
        }
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(id: &str) -> StatusRegistry {
        let registry = StatusRegistry::new();
        registry.insert_pending(id, "6281@s.whatsapp.net".to_string(), Utc::now());
        registry
    }

    #[test]
    fn test_lifecycle_transitions() {
        let registry = registry_with("item-1");
        assert_eq!(registry.get("item-1").unwrap().state, DispatchState::Pending);

        registry.mark_sending("item-1");
        assert_eq!(registry.get("item-1").unwrap().state, DispatchState::Sending);

        registry.mark_sent("item-1", "msg-9");
        let status = registry.get("item-1").unwrap();
        assert_eq!(
            status.state,
            DispatchState::Sent {
                message_id: "msg-9".to_string()
            }
        );
        assert!(status.finished_at.is_some());
    }

    #[test]
    fn test_final_state_is_sticky() {
        let registry = registry_with("item-1");
        registry.mark_failed("item-1", "send refused");
        registry.mark_sent("item-1", "msg-9");

        assert!(matches!(
            registry.get("item-1").unwrap().state,
            DispatchState::Failed { .. }
        ));
    }

    #[test]
    fn test_unknown_id_is_ignored() {
        let registry = StatusRegistry::new();
        registry.mark_sent("ghost", "msg-1");
        assert!(registry.get("ghost").is_none());
    }

    #[test]
    fn test_prune_only_removes_old_finished_entries() {
        let registry = registry_with("pending");
        registry.insert_pending("done", "t".to_string(), Utc::now());
        registry.mark_sent("done", "msg-1");

        // Zero retention: every finished entry is old enough.
        registry.prune(Some(0));

        assert!(registry.get("done").is_none());
        assert!(registry.get("pending").is_some());
    }

    #[test]
    fn test_status_serializes_with_inline_state() {
        let registry = registry_with("item-1");
        registry.mark_sent("item-1", "msg-9");

        let json = serde_json::to_value(registry.get("item-1").unwrap()).unwrap();
        assert_eq!(json["state"], "sent");
        assert_eq!(json["message_id"], "msg-9");
        assert_eq!(json["target"], "6281@s.whatsapp.net");
    }
}
