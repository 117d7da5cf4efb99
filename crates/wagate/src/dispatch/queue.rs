//! The dispatch worker.
//!
//! One task drains the queue in FIFO order and sleeps the inter-send delay
//! after every item, success or failure. The remote network throttles
//! accounts that burst, so a run of failing items drains at the same pace
//! as good ones.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use wagate_protocol::{MessagePayload, NetworkClient, NetworkError, SendReceipt};

use crate::resolver::Resolver;
use crate::session::SessionHandle;
use crate::staging::Staging;

use super::status::StatusRegistry;
use super::{DispatchError, OutboundItem, Target};

/// Everything item execution needs.
#[derive(Clone)]
pub(crate) struct ExecContext {
    pub session: SessionHandle,
    pub resolver: Resolver,
    pub staging: Staging,
    pub statuses: StatusRegistry,
    pub send_delay: Duration,
    pub attempt_timeout: Duration,
    pub max_attempts: u32,
}

/// Spawn the single queue worker. It stops when the queue sender is dropped.
pub(crate) fn spawn_worker(
    ctx: ExecContext,
    mut queue: mpsc::UnboundedReceiver<OutboundItem>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!("dispatch worker started");
        while let Some(item) = queue.recv().await {
            let id = item.id.clone();
            let target = item.target.to_string();

            match execute_item(&ctx, item).await {
                Ok(receipt) => {
                    info!(item = %id, target = %target, message_id = %receipt.message_id, "message sent");
                }
                Err(e) => {
                    warn!(item = %id, target = %target, error = %e, "dispatch failed");
                }
            }

            tokio::time::sleep(ctx.send_delay).await;
        }
        debug!("dispatch worker stopped");
    })
}

/// Execute one item end to end and record its outcome in the registry.
pub(crate) async fn execute_item(
    ctx: &ExecContext,
    item: OutboundItem,
) -> Result<SendReceipt, DispatchError> {
    ctx.statuses.mark_sending(&item.id);

    let result = run_item(ctx, &item).await;

    // The staged payload goes away exactly once, whatever happened above.
    if let Some(attachment) = item.attachment {
        ctx.staging.release(attachment).await;
    }

    match &result {
        Ok(receipt) => ctx.statuses.mark_sent(&item.id, &receipt.message_id),
        Err(e) => ctx.statuses.mark_failed(&item.id, &e.to_string()),
    }
    result
}

async fn run_item(ctx: &ExecContext, item: &OutboundItem) -> Result<SendReceipt, DispatchError> {
    // Read the current client at execution time; a reconnect may have
    // replaced it since the item was enqueued.
    let Some(client) = ctx.session.client() else {
        return Err(DispatchError::ChannelUnavailable);
    };

    let address = match &item.target {
        Target::Individual { number } => {
            ctx.resolver
                .resolve_individual(client.as_ref(), number)
                .await?
        }
        Target::Group { id } => ctx.resolver.resolve_group(client.as_ref(), id).await?,
    };

    let payload = match &item.attachment {
        Some(attachment) => attachment.classify(&item.text),
        None => MessagePayload::Text {
            body: item.text.clone(),
        },
    };

    send_with_budget(ctx, client.as_ref(), &address, &payload).await
}

/// Run send attempts until one succeeds or the budget is spent. Only
/// retryable failures get another attempt, with the inter-send delay
/// between attempts.
async fn send_with_budget(
    ctx: &ExecContext,
    client: &dyn NetworkClient,
    address: &str,
    payload: &MessagePayload,
) -> Result<SendReceipt, DispatchError> {
    let mut attempt = 1u32;
    loop {
        match attempt_send(ctx, client, address, payload).await {
            Ok(receipt) => return Ok(receipt),
            Err(e) if e.is_retryable() && attempt < ctx.max_attempts => {
                warn!(attempt, error = %e, "send attempt failed; retrying");
                tokio::time::sleep(ctx.send_delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// One bounded send attempt against the network.
async fn attempt_send(
    ctx: &ExecContext,
    client: &dyn NetworkClient,
    address: &str,
    payload: &MessagePayload,
) -> Result<SendReceipt, DispatchError> {
    match tokio::time::timeout(ctx.attempt_timeout, client.send(address, payload)).await {
        Ok(Ok(receipt)) => Ok(receipt),
        Ok(Err(NetworkError::NotConnected)) => Err(DispatchError::ChannelUnavailable),
        Ok(Err(e)) => Err(DispatchError::Send(e.to_string())),
        Err(_) => Err(DispatchError::Timeout(ctx.attempt_timeout.as_secs())),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use bytes::Bytes;
    use tempfile::TempDir;

    use wagate_protocol::memory::MemoryNetwork;
    use wagate_protocol::{DeviceInfo, DisconnectReason};

    use crate::config::DispatchConfig;
    use crate::dispatch::{DispatchState, Dispatcher, Submission};
    use crate::session::{CredentialStore, SessionManager, SessionState};

    struct Harness {
        net: MemoryNetwork,
        session: SessionHandle,
        dispatcher: Dispatcher,
        statuses: StatusRegistry,
        staging: Staging,
        _tmp: TempDir,
    }

    async fn harness(config: DispatchConfig) -> Harness {
        let net = MemoryNetwork::new().with_auto_pair();
        let tmp = TempDir::new().unwrap();
        let store = CredentialStore::new(tmp.path().join("session"));
        let session = SessionManager::new(
            Arc::new(net.clone()),
            store,
            DeviceInfo::default(),
            Duration::from_secs(3),
        )
        .spawn();
        while session.state() != SessionState::Connected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let statuses = StatusRegistry::new();
        let staging = Staging::new(tmp.path().join("uploads"));
        let dispatcher = Dispatcher::start(
            &config,
            session.clone(),
            Resolver::new("62"),
            staging.clone(),
            statuses.clone(),
        );

        Harness {
            net,
            session,
            dispatcher,
            statuses,
            staging,
            _tmp: tmp,
        }
    }

    fn individual(number: &str) -> Target {
        Target::Individual {
            number: number.to_string(),
        }
    }

    fn group(id: &str) -> Target {
        Target::Group { id: id.to_string() }
    }

    async fn enqueue(h: &Harness, target: Target, text: &str) -> String {
        match h.dispatcher.submit(target, text.to_string(), None).await {
            Submission::Queued { id } => id,
            Submission::Completed { .. } => panic!("expected queued mode"),
        }
    }

    async fn wait_final(h: &Harness, id: &str) -> DispatchState {
        tokio::time::timeout(Duration::from_secs(300), async {
            loop {
                if let Some(status) = h.statuses.get(id)
                    && status.state.is_final()
                {
                    return status.state;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("item never reached a final state")
    }

    fn failure_message(state: DispatchState) -> String {
        match state {
            DispatchState::Failed { error } => error,
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_order_held_across_failures() {
        let h = harness(DispatchConfig::default()).await;
        h.net.register_user("6281110001@s.whatsapp.net");
        h.net.register_user("6281110003@s.whatsapp.net");

        let a = enqueue(&h, individual("081110001"), "first").await;
        let b = enqueue(&h, individual("089990002"), "second").await;
        let c = enqueue(&h, individual("081110003"), "third").await;

        assert!(matches!(wait_final(&h, &a).await, DispatchState::Sent { .. }));
        assert!(matches!(wait_final(&h, &b).await, DispatchState::Failed { .. }));
        assert!(matches!(wait_final(&h, &c).await, DispatchState::Sent { .. }));

        let sent = h.net.sent();
        assert_eq!(sent.len(), 2);
        assert!(matches!(&sent[0].payload, MessagePayload::Text { body } if body == "first"));
        assert!(matches!(&sent[1].payload, MessagePayload::Text { body } if body == "third"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sends_are_paced_apart() {
        let h = harness(DispatchConfig::default()).await;
        h.net.register_user("6281110001@s.whatsapp.net");

        let mut ids = Vec::new();
        for body in ["one", "two", "three"] {
            ids.push(enqueue(&h, individual("081110001"), body).await);
        }
        for id in &ids {
            assert!(matches!(wait_final(&h, id).await, DispatchState::Sent { .. }));
        }

        let sent = h.net.sent();
        assert_eq!(sent.len(), 3);
        let first_to_third = sent[2].at.duration_since(sent[0].at);
        assert!(
            first_to_third >= Duration::from_secs(10),
            "three sends only {first_to_third:?} apart"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_image_attachment_classified_and_released() {
        let h = harness(DispatchConfig::default()).await;
        h.net.register_user("6281110001@s.whatsapp.net");

        let attachment = h
            .staging
            .stage("photo.png", "image/png", Bytes::from_static(b"png"))
            .await
            .unwrap();
        let staged_path = attachment.path.clone();

        let id = match h
            .dispatcher
            .submit(
                individual("081110001"),
                "look at this".to_string(),
                Some(attachment),
            )
            .await
        {
            Submission::Queued { id } => id,
            Submission::Completed { .. } => panic!("expected queued mode"),
        };

        assert!(matches!(wait_final(&h, &id).await, DispatchState::Sent { .. }));

        let sent = h.net.sent();
        match &sent[0].payload {
            MessagePayload::Image { caption, .. } => assert_eq!(caption, "look at this"),
            other => panic!("sent as {}", other.kind()),
        }
        assert!(!staged_path.exists(), "staged file survived the send");
    }

    #[tokio::test(start_paused = true)]
    async fn test_attachment_released_when_send_fails() {
        let h = harness(DispatchConfig::default()).await;
        h.net.register_user("6281110001@s.whatsapp.net");
        h.net.set_fail_sends(true);

        let attachment = h
            .staging
            .stage("notes.txt", "text/plain", Bytes::from_static(b"n"))
            .await
            .unwrap();
        let staged_path = attachment.path.clone();

        let id = match h
            .dispatcher
            .submit(individual("081110001"), "notes".to_string(), Some(attachment))
            .await
        {
            Submission::Queued { id } => id,
            Submission::Completed { .. } => panic!("expected queued mode"),
        };

        let error = failure_message(wait_final(&h, &id).await);
        assert!(error.contains("send refused"), "unexpected error: {error}");
        assert!(!staged_path.exists(), "staged file survived the failure");
    }

    #[tokio::test(start_paused = true)]
    async fn test_group_miss_never_reaches_network() {
        let h = harness(DispatchConfig::default()).await;

        let id = enqueue(&h, group("120363040001"), "hello ops").await;
        let error = failure_message(wait_final(&h, &id).await);

        assert!(error.contains("not found among joined groups"));
        assert!(h.net.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_items_fail_fast_after_termination() {
        let h = harness(DispatchConfig::default()).await;
        h.net.register_user("6281110001@s.whatsapp.net");

        h.net.disconnect(DisconnectReason::LoggedOut);
        while h.session.state() != SessionState::Terminated {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let id = enqueue(&h, individual("081110001"), "too late").await;
        let error = failure_message(wait_final(&h, &id).await);

        assert!(error.contains("channel unavailable"));
        assert!(h.net.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_send_times_out() {
        let config = DispatchConfig {
            attempt_timeout_seconds: 30,
            ..DispatchConfig::default()
        };
        let h = harness(config).await;
        h.net.register_user("6281110001@s.whatsapp.net");
        h.net.set_hang_sends(true);

        let id = enqueue(&h, individual("081110001"), "stuck").await;
        let error = failure_message(wait_final(&h, &id).await);
        assert!(error.contains("timed out after 30s"), "unexpected error: {error}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_from_transient_failure() {
        let config = DispatchConfig {
            max_attempts: 2,
            ..DispatchConfig::default()
        };
        let h = harness(config).await;
        h.net.register_user("6281110001@s.whatsapp.net");
        h.net.set_fail_sends(true);

        let id = enqueue(&h, individual("081110001"), "eventually").await;

        // First attempt fails immediately; clear the fault before the retry
        // fires after the delay.
        tokio::time::sleep(Duration::from_secs(1)).await;
        h.net.set_fail_sends(false);

        assert!(matches!(wait_final(&h, &id).await, DispatchState::Sent { .. }));
        assert_eq!(h.net.sent().len(), 1);
    }
}
