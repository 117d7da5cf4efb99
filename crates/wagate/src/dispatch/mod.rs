//! Outbound dispatch.
//!
//! Every send goes through here. In queued mode items are accepted into a
//! FIFO queue and executed by a single worker with a fixed delay between
//! items; in immediate mode the item is executed inline and the caller gets
//! the real send result. Both modes share the same execution path.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

use wagate_protocol::{NetworkError, SendReceipt};

use crate::config::DispatchConfig;
use crate::resolver::{ResolveError, Resolver};
use crate::session::SessionHandle;
use crate::staging::{StagedAttachment, Staging};

mod queue;
mod status;

pub use status::{DispatchState, ItemStatus, StatusRegistry, spawn_prune_task};

// ============================================================================
// Items
// ============================================================================

/// Where a message is going.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Individual { number: String },
    Group { id: String },
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Individual { number } => write!(f, "{number}"),
            Target::Group { id } => write!(f, "{id}"),
        }
    }
}

/// One pending outbound unit. Immutable once built; consumed exactly once
/// by whichever path executes it.
#[derive(Debug)]
pub struct OutboundItem {
    pub id: String,
    pub target: Target,
    pub text: String,
    pub attachment: Option<StagedAttachment>,
    pub enqueued_at: DateTime<Utc>,
}

/// Which dispatch profile the gateway runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Accept into the queue, return an acknowledgment, execute later.
    #[default]
    Queued,
    /// Execute inline and return the real send result. Bypasses the queue
    /// and its pacing.
    Immediate,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("recipient {0} is not registered on the network")]
    RecipientNotFound(String),

    #[error("group {0} not found among joined groups")]
    GroupNotFound(String),

    #[error("channel unavailable: no open connection")]
    ChannelUnavailable,

    #[error("send failed: {0}")]
    Send(String),

    #[error("send attempt timed out after {0}s")]
    Timeout(u64),
}

impl DispatchError {
    /// Only failures of the send attempt itself are worth retrying; target
    /// resolution and channel availability will not change on their own
    /// within one item's budget.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchError::Send(_) | DispatchError::Timeout(_))
    }
}

impl From<ResolveError> for DispatchError {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::RecipientNotFound(address) => DispatchError::RecipientNotFound(address),
            ResolveError::GroupNotFound(address) => DispatchError::GroupNotFound(address),
            ResolveError::Network(NetworkError::NotConnected) => DispatchError::ChannelUnavailable,
            ResolveError::Network(e) => DispatchError::Send(e.to_string()),
        }
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Outcome of handing an item to the dispatcher.
#[derive(Debug)]
pub enum Submission {
    /// Accepted into the queue; the outcome lands in the status registry.
    Queued { id: String },
    /// Executed inline (immediate mode).
    Completed {
        id: String,
        result: Result<SendReceipt, DispatchError>,
    },
}

/// Front door for outbound sends.
#[derive(Clone)]
pub struct Dispatcher {
    mode: DispatchMode,
    queue: mpsc::UnboundedSender<OutboundItem>,
    ctx: queue::ExecContext,
}

impl Dispatcher {
    /// Build the dispatcher and start its worker. The worker stops when the
    /// dispatcher is dropped.
    pub fn start(
        config: &DispatchConfig,
        session: SessionHandle,
        resolver: Resolver,
        staging: Staging,
        statuses: StatusRegistry,
    ) -> Self {
        let ctx = queue::ExecContext {
            session,
            resolver,
            staging,
            statuses,
            send_delay: Duration::from_secs(config.send_delay_seconds),
            attempt_timeout: Duration::from_secs(config.attempt_timeout_seconds),
            max_attempts: config.max_attempts.max(1),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        queue::spawn_worker(ctx.clone(), rx);

        Self {
            mode: config.mode,
            queue: tx,
            ctx,
        }
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Hand one item to dispatch, honoring the configured mode.
    pub async fn submit(
        &self,
        target: Target,
        text: String,
        attachment: Option<StagedAttachment>,
    ) -> Submission {
        let item = OutboundItem {
            id: new_item_id(),
            target,
            text,
            attachment,
            enqueued_at: Utc::now(),
        };
        let id = item.id.clone();
        self.ctx
            .statuses
            .insert_pending(&item.id, item.target.to_string(), item.enqueued_at);

        match self.mode {
            DispatchMode::Queued => {
                if self.queue.send(item).is_err() {
                    warn!(item = %id, "dispatch worker is gone; failing item");
                    self.ctx
                        .statuses
                        .mark_failed(&id, &DispatchError::ChannelUnavailable.to_string());
                }
                Submission::Queued { id }
            }
            DispatchMode::Immediate => {
                let result = queue::execute_item(&self.ctx, item).await;
                Submission::Completed { id, result }
            }
        }
    }
}

/// Unique id for one dispatch item.
fn new_item_id() -> String {
    ulid::Ulid::new().to_string().to_lowercase()
}

// ============================================================================
// Tests
// ============================================================================
