//! Connection lifecycle supervisor.
//!
//! One long-lived task owns the connection: it opens it, consumes the event
//! stream, persists credential updates as they arrive, and decides between
//! reconnect and wipe when the link drops. Everything else observes the
//! session through a [`SessionHandle`], which only hands out the client
//! while the session can actually send.
//!
//! Disconnect handling follows the reason classification: transient reasons
//! schedule a reconnect after a short delay, a terminal reason (remote
//! logout) erases the credential store and parks the supervisor for good.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use wagate_protocol::{DeviceInfo, NetworkClient, NetworkConnector, NetworkEvent};

use super::creds::{CredentialStore, CredsError};
use super::state::SessionState;

/// Random extra wait added to each reconnect delay, so a fleet of gateways
/// restarting together does not reconnect in lockstep.
const RECONNECT_JITTER_MS: u64 = 500;

// ============================================================================
// Handle
// ============================================================================

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session supervisor is not running")]
    SupervisorGone,

    #[error(transparent)]
    Wipe(#[from] CredsError),
}

enum Command {
    Logout {
        ack: oneshot::Sender<Result<(), CredsError>>,
    },
    Shutdown {
        ack: oneshot::Sender<()>,
    },
}

struct Snapshot {
    state: SessionState,
    client: Option<Arc<dyn NetworkClient>>,
}

struct Shared {
    snapshot: RwLock<Snapshot>,
}

impl Shared {
    fn set(&self, state: SessionState, client: Option<Arc<dyn NetworkClient>>) {
        let mut snap = self.snapshot.write().expect("session snapshot lock poisoned");
        snap.state = state;
        snap.client = client;
    }

    fn set_state(&self, state: SessionState) {
        self.snapshot
            .write()
            .expect("session snapshot lock poisoned")
            .state = state;
    }

    fn state(&self) -> SessionState {
        self.snapshot
            .read()
            .expect("session snapshot lock poisoned")
            .state
    }
}

/// Cloneable view of the supervised session.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
    commands: mpsc::Sender<Command>,
}

impl SessionHandle {
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// The current connection client, or `None` whenever the session cannot
    /// send. State and client are read under one lock so a reconnect swap is
    /// never observed halfway.
    pub fn client(&self) -> Option<Arc<dyn NetworkClient>> {
        let snap = self
            .shared
            .snapshot
            .read()
            .expect("session snapshot lock poisoned");
        if snap.state.can_send() {
            snap.client.clone()
        } else {
            None
        }
    }

    /// Tear the session down: best-effort network logout, credential wipe,
    /// park in `Terminated`. Idempotent once terminated.
    pub async fn logout(&self) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Logout { ack: tx })
            .await
            .map_err(|_| SessionError::SupervisorGone)?;
        rx.await.map_err(|_| SessionError::SupervisorGone)??;
        Ok(())
    }

    /// Stop the supervisor without revoking the session; credentials stay on
    /// disk so the next start resumes.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown { ack: tx }).await.is_ok() {
            let _ = rx.await;
        }
    }
}

// ============================================================================
// Manager
// ============================================================================

pub struct SessionManager {
    connector: Arc<dyn NetworkConnector>,
    store: CredentialStore,
    device: DeviceInfo,
    reconnect_delay: Duration,
}

impl SessionManager {
    pub fn new(
        connector: Arc<dyn NetworkConnector>,
        store: CredentialStore,
        device: DeviceInfo,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            connector,
            store,
            device,
            reconnect_delay,
        }
    }

    /// Spawn the supervisor task and return the handle others use.
    pub fn spawn(self) -> SessionHandle {
        let shared = Arc::new(Shared {
            snapshot: RwLock::new(Snapshot {
                state: SessionState::Disconnected,
                client: None,
            }),
        });
        let (tx, rx) = mpsc::channel(8);

        tokio::spawn(run(self, shared.clone(), rx));

        SessionHandle {
            shared,
            commands: tx,
        }
    }
}

// ============================================================================
// Supervisor loop
// ============================================================================

enum LinkOutcome {
    /// The link dropped for a transient reason; reconnect after the delay.
    Reconnect,
    /// The session is terminated; park and only answer commands.
    Park,
    /// Stop supervising entirely.
    Exit,
}

async fn run(mgr: SessionManager, shared: Arc<Shared>, mut commands: mpsc::Receiver<Command>) {
    loop {
        if shared.state().is_terminal() {
            // Nothing left to supervise; only commands can arrive.
            match commands.recv().await {
                Some(Command::Logout { ack }) => {
                    let _ = ack.send(Ok(()));
                }
                Some(Command::Shutdown { ack }) => {
                    let _ = ack.send(());
                    break;
                }
                None => break,
            }
            continue;
        }

        match run_link(&mgr, &shared, &mut commands).await {
            LinkOutcome::Reconnect => {
                if !wait_reconnect(&mgr, &shared, &mut commands).await {
                    break;
                }
            }
            LinkOutcome::Park => {}
            LinkOutcome::Exit => break,
        }
    }
    debug!("session supervisor stopped");
}

/// Open one connection and drive it until it drops or a command ends it.
async fn run_link(
    mgr: &SessionManager,
    shared: &Arc<Shared>,
    commands: &mut mpsc::Receiver<Command>,
) -> LinkOutcome {
    let credentials = match mgr.store.load().await {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to load credentials; pairing from scratch");
            None
        }
    };
    let resuming = credentials.is_some();
    info!(resuming, "opening connection");

    let mut conn = match mgr.connector.connect(&mgr.device, credentials).await {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to open connection");
            return LinkOutcome::Reconnect;
        }
    };

    loop {
        tokio::select! {
            event = conn.events.recv() => match event {
                Some(NetworkEvent::PairingRequired { code }) => {
                    info!(code = %code, "pairing required; link this device to continue");
                    shared.set_state(SessionState::Pairing);
                }
                Some(NetworkEvent::Connected) => {
                    info!("connection open");
                    // State and client swap together; readers never see the
                    // new state with a stale client.
                    shared.set(SessionState::Connected, Some(conn.client.clone()));
                }
                Some(NetworkEvent::CredentialsUpdated { entries }) => {
                    for entry in &entries {
                        if let Err(e) = mgr.store.save_entry(entry).await {
                            error!(entry = %entry.name, error = %e, "failed to persist credentials");
                        }
                    }
                }
                Some(NetworkEvent::Disconnected { reason }) => {
                    warn!(reason = %reason, "connection closed");
                    if reason.is_terminal() {
                        let _ = terminate(mgr, shared, Some(&conn.client)).await;
                        return LinkOutcome::Park;
                    }
                    shared.set(SessionState::Disconnected, None);
                    return LinkOutcome::Reconnect;
                }
                Some(NetworkEvent::Message(msg)) => {
                    debug!(from = %msg.from, id = %msg.id, "inbound message");
                }
                None => {
                    warn!("event stream ended without a close event");
                    shared.set(SessionState::Disconnected, None);
                    return LinkOutcome::Reconnect;
                }
            },
            command = commands.recv() => match command {
                Some(Command::Logout { ack }) => {
                    let result = terminate(mgr, shared, Some(&conn.client)).await;
                    let _ = ack.send(result);
                    return LinkOutcome::Park;
                }
                Some(Command::Shutdown { ack }) => {
                    shared.set(SessionState::Disconnected, None);
                    if let Err(e) = conn.client.close().await {
                        warn!(error = %e, "close failed during shutdown");
                    }
                    let _ = ack.send(());
                    return LinkOutcome::Exit;
                }
                None => {
                    shared.set(SessionState::Disconnected, None);
                    let _ = conn.client.close().await;
                    return LinkOutcome::Exit;
                }
            }
        }
    }
}

/// The terminal branch shared by explicit logout and remote revocation:
/// best-effort network logout and close, unconditional credential wipe,
/// park in `Terminated`. Only the wipe result is reported.
async fn terminate(
    mgr: &SessionManager,
    shared: &Arc<Shared>,
    client: Option<&Arc<dyn NetworkClient>>,
) -> Result<(), CredsError> {
    shared.set(SessionState::Closing, None);

    if let Some(client) = client {
        if let Err(e) = client.logout().await {
            warn!(error = %e, "network logout failed");
        }
        if let Err(e) = client.close().await {
            warn!(error = %e, "close failed");
        }
    }

    let result = mgr.store.wipe().await;
    if let Err(ref e) = result {
        error!(error = %e, "failed to erase credential store");
    }

    shared.set(SessionState::Terminated, None);
    info!("session terminated");
    result
}

/// Sit out the reconnect delay while still answering commands. Returns
/// `false` when the supervisor should exit instead of reconnecting.
async fn wait_reconnect(
    mgr: &SessionManager,
    shared: &Arc<Shared>,
    commands: &mut mpsc::Receiver<Command>,
) -> bool {
    let jitter = rand::rng().random_range(0..=RECONNECT_JITTER_MS);
    let delay = mgr.reconnect_delay + Duration::from_millis(jitter);
    info!(delay_ms = delay.as_millis() as u64, "reconnecting after delay");

    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        command = commands.recv() => match command {
            Some(Command::Logout { ack }) => {
                let result = terminate(mgr, shared, None).await;
                let _ = ack.send(result);
                true
            }
            Some(Command::Shutdown { ack }) => {
                let _ = ack.send(());
                false
            }
            None => false,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    use wagate_protocol::memory::MemoryNetwork;
    use wagate_protocol::{CredentialEntry, DisconnectReason};

    fn spawn_session(net: &MemoryNetwork, tmp: &TempDir) -> (SessionHandle, CredentialStore) {
        let store = CredentialStore::new(tmp.path().join("session"));
        let handle = SessionManager::new(
            Arc::new(net.clone()),
            store.clone(),
            DeviceInfo::default(),
            Duration::from_secs(3),
        )
        .spawn();
        (handle, store)
    }

    async fn wait_for_state(handle: &SessionHandle, want: SessionState) {
        tokio::time::timeout(Duration::from_secs(30), async {
            while handle.state() != want {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("never reached {want}, stuck in {}", handle.state()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pairs_and_persists_credentials() {
        let net = MemoryNetwork::new().with_auto_pair();
        let tmp = TempDir::new().unwrap();
        let (handle, store) = spawn_session(&net, &tmp);

        wait_for_state(&handle, SessionState::Connected).await;

        // Pairing emitted fresh credentials; they must already be on disk.
        let bundle = store.load().await.unwrap().unwrap();
        assert!(bundle.get("creds.json").is_some());
        assert!(handle.client().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resumes_with_persisted_credentials() {
        let net = MemoryNetwork::new();
        let tmp = TempDir::new().unwrap();
        let store = CredentialStore::new(tmp.path().join("session"));
        store
            .save_entry(&CredentialEntry::new("creds.json", b"{}".to_vec()))
            .await
            .unwrap();

        let (handle, _) = spawn_session(&net, &tmp);
        wait_for_state(&handle, SessionState::Connected).await;
        assert_eq!(net.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_disconnect_reconnects() {
        let net = MemoryNetwork::new().with_auto_pair();
        let tmp = TempDir::new().unwrap();
        let (handle, store) = spawn_session(&net, &tmp);
        wait_for_state(&handle, SessionState::Connected).await;

        net.disconnect(DisconnectReason::ConnectionLost);
        wait_for_state(&handle, SessionState::Disconnected).await;
        assert!(handle.client().is_none());

        // Reconnects on its own after the delay, resuming with the
        // credentials persisted during pairing.
        wait_for_state(&handle, SessionState::Connected).await;
        assert_eq!(net.connect_count(), 2);
        assert!(store.load().await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_disconnect_wipes_and_stays_down() {
        let net = MemoryNetwork::new().with_auto_pair();
        let tmp = TempDir::new().unwrap();
        let (handle, store) = spawn_session(&net, &tmp);
        wait_for_state(&handle, SessionState::Connected).await;

        net.disconnect(DisconnectReason::LoggedOut);
        wait_for_state(&handle, SessionState::Terminated).await;

        assert!(store.load().await.unwrap().is_none());

        // Well past any reconnect delay: still exactly one connect.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(net.connect_count(), 1);
        assert!(handle.client().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_tears_down_and_is_idempotent() {
        let net = MemoryNetwork::new().with_auto_pair();
        let tmp = TempDir::new().unwrap();
        let (handle, store) = spawn_session(&net, &tmp);
        wait_for_state(&handle, SessionState::Connected).await;

        handle.logout().await.unwrap();
        assert_eq!(handle.state(), SessionState::Terminated);
        assert!(store.load().await.unwrap().is_none());
        assert_eq!(net.logout_count(), 1);

        // Second logout succeeds without touching the network again.
        handle.logout().await.unwrap();
        assert_eq!(net.logout_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_network_failure_still_wipes() {
        let net = MemoryNetwork::new().with_auto_pair();
        let tmp = TempDir::new().unwrap();
        let (handle, store) = spawn_session(&net, &tmp);
        wait_for_state(&handle, SessionState::Connected).await;

        net.set_fail_logout(true);
        handle.logout().await.unwrap();

        assert_eq!(handle.state(), SessionState::Terminated);
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_credential_rotation_is_persisted() {
        let net = MemoryNetwork::new().with_auto_pair();
        let tmp = TempDir::new().unwrap();
        let (handle, store) = spawn_session(&net, &tmp);
        wait_for_state(&handle, SessionState::Connected).await;

        net.rotate_credentials("signal-key-2.json", b"rotated");

        tokio::time::timeout(Duration::from_secs(30), async {
            loop {
                if let Some(bundle) = store.load().await.unwrap() {
                    if bundle.get("signal-key-2.json") == Some(b"rotated".as_slice()) {
                        return;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("rotated entry never persisted");
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_keeps_credentials() {
        let net = MemoryNetwork::new().with_auto_pair();
        let tmp = TempDir::new().unwrap();
        let (handle, store) = spawn_session(&net, &tmp);
        wait_for_state(&handle, SessionState::Connected).await;

        handle.shutdown().await;

        assert!(store.load().await.unwrap().is_some());
        assert_eq!(net.logout_count(), 0);
        assert!(net.close_count() >= 1);
    }
}
