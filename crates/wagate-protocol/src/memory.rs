//! In-memory network driver.
//!
//! No wire protocol behind it, but the full connect/pair/send/event surface
//! of a real driver. Backs the test suites and local deployments where no
//! real driver is wired in. Test code scripts it through the handle methods
//! (`register_user`, `disconnect`, `set_fail_sends`, ...) and inspects the
//! send log afterwards.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::client::{
    Connection, DisconnectReason, NetworkClient, NetworkConnector, NetworkError, NetworkEvent,
};
use crate::types::{
    CredentialBundle, CredentialEntry, DeviceInfo, GroupInfo, InboundMessage, MessagePayload,
    SendReceipt,
};

/// One send that crossed the fake wire.
#[derive(Debug, Clone)]
pub struct SentRecord {
    pub jid: String,
    pub payload: MessagePayload,
    pub at: Instant,
}

struct CurrentLink {
    open: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<NetworkEvent>,
}

struct Shared {
    users: Mutex<HashSet<String>>,
    groups: Mutex<Vec<GroupInfo>>,
    sent: Mutex<Vec<SentRecord>>,
    current: Mutex<Option<CurrentLink>>,
    auto_pair: AtomicBool,
    fail_sends: AtomicBool,
    hang_sends: AtomicBool,
    fail_logout: AtomicBool,
    connects: AtomicU64,
    logouts: AtomicU64,
    closes: AtomicU64,
}

/// The in-memory driver. Cloning shares the same backing state, so a test
/// can keep a handle while the gateway owns the connector.
#[derive(Clone)]
pub struct MemoryNetwork {
    shared: Arc<Shared>,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                users: Mutex::new(HashSet::new()),
                groups: Mutex::new(Vec::new()),
                sent: Mutex::new(Vec::new()),
                current: Mutex::new(None),
                auto_pair: AtomicBool::new(false),
                fail_sends: AtomicBool::new(false),
                hang_sends: AtomicBool::new(false),
                fail_logout: AtomicBool::new(false),
                connects: AtomicU64::new(0),
                logouts: AtomicU64::new(0),
                closes: AtomicU64::new(0),
            }),
        }
    }

    /// Complete pairing automatically on every un-credentialed connect,
    /// simulating an operator who scans the challenge immediately.
    pub fn with_auto_pair(self) -> Self {
        self.shared.auto_pair.store(true, Ordering::SeqCst);
        self
    }

    /// Provision an individual address on the fake network.
    pub fn register_user(&self, jid: &str) {
        self.shared.users.lock().expect("users lock").insert(jid.to_string());
    }

    /// Add a group the account participates in.
    pub fn register_group(&self, group: GroupInfo) {
        self.shared.groups.lock().expect("groups lock").push(group);
    }

    /// Make every subsequent send fail with a network rejection.
    pub fn set_fail_sends(&self, fail: bool) {
        self.shared.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent send hang forever (never resolve).
    pub fn set_hang_sends(&self, hang: bool) {
        self.shared.hang_sends.store(hang, Ordering::SeqCst);
    }

    /// Make `logout()` calls fail.
    pub fn set_fail_logout(&self, fail: bool) {
        self.shared.fail_logout.store(fail, Ordering::SeqCst);
    }

    /// Close the current connection from the network side.
    pub fn disconnect(&self, reason: DisconnectReason) {
        if let Some(link) = self.shared.current.lock().expect("link lock").as_ref() {
            link.open.store(false, Ordering::SeqCst);
            let _ = link.events.send(NetworkEvent::Disconnected { reason });
        }
    }

    /// Finish a pending manual pairing: emit fresh credentials and open the
    /// connection. No-op when nothing is connected.
    pub fn complete_pairing(&self) {
        if let Some(link) = self.shared.current.lock().expect("link lock").as_ref() {
            let _ = link.events.send(NetworkEvent::CredentialsUpdated {
                entries: seed_credentials(),
            });
            link.open.store(true, Ordering::SeqCst);
            let _ = link.events.send(NetworkEvent::Connected);
        }
    }

    /// Push a credential rotation through the current connection.
    pub fn rotate_credentials(&self, name: &str, data: &[u8]) {
        if let Some(link) = self.shared.current.lock().expect("link lock").as_ref() {
            let _ = link.events.send(NetworkEvent::CredentialsUpdated {
                entries: vec![CredentialEntry::new(name, data.to_vec())],
            });
        }
    }

    /// Deliver an inbound message to the gateway.
    pub fn emit_message(&self, from: &str) {
        if let Some(link) = self.shared.current.lock().expect("link lock").as_ref() {
            let _ = link.events.send(NetworkEvent::Message(InboundMessage {
                id: new_id(),
                from: from.to_string(),
                timestamp: Utc::now(),
            }));
        }
    }

    /// Everything sent through any connection, in send order.
    pub fn sent(&self) -> Vec<SentRecord> {
        self.shared.sent.lock().expect("sent log lock").clone()
    }

    pub fn connect_count(&self) -> u64 {
        self.shared.connects.load(Ordering::SeqCst)
    }

    pub fn logout_count(&self) -> u64 {
        self.shared.logouts.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> u64 {
        self.shared.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NetworkConnector for MemoryNetwork {
    async fn connect(
        &self,
        _device: &DeviceInfo,
        credentials: Option<CredentialBundle>,
    ) -> Result<Connection, NetworkError> {
        self.shared.connects.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(false));

        // Queue the connection's opening events up front; the consumer sees
        // them in order once it starts polling.
        if credentials.is_some_and(|bundle| !bundle.is_empty()) {
            open.store(true, Ordering::SeqCst);
            let _ = tx.send(NetworkEvent::Connected);
        } else {
            let _ = tx.send(NetworkEvent::PairingRequired {
                code: format!("pair-{}", new_id()),
            });
            if self.shared.auto_pair.load(Ordering::SeqCst) {
                let _ = tx.send(NetworkEvent::CredentialsUpdated {
                    entries: seed_credentials(),
                });
                open.store(true, Ordering::SeqCst);
                let _ = tx.send(NetworkEvent::Connected);
            }
        }

        *self.shared.current.lock().expect("link lock") = Some(CurrentLink {
            open: open.clone(),
            events: tx,
        });

        let client = MemoryClient {
            shared: self.shared.clone(),
            open,
        };

        Ok(Connection {
            client: Arc::new(client),
            events: rx,
        })
    }
}

struct MemoryClient {
    shared: Arc<Shared>,
    open: Arc<AtomicBool>,
}

#[async_trait]
impl NetworkClient for MemoryClient {
    async fn send(&self, jid: &str, payload: &MessagePayload) -> Result<SendReceipt, NetworkError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(NetworkError::NotConnected);
        }
        if self.shared.hang_sends.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.shared.fail_sends.load(Ordering::SeqCst) {
            return Err(NetworkError::Rejected("send refused".to_string()));
        }

        self.shared.sent.lock().expect("sent log lock").push(SentRecord {
            jid: jid.to_string(),
            payload: payload.clone(),
            at: Instant::now(),
        });

        Ok(SendReceipt {
            message_id: new_id(),
            timestamp: Utc::now(),
        })
    }

    async fn check_user(&self, jid: &str) -> Result<Option<String>, NetworkError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(NetworkError::NotConnected);
        }
        let known = self.shared.users.lock().expect("users lock").contains(jid);
        Ok(known.then(|| jid.to_string()))
    }

    async fn fetch_groups(&self) -> Result<Vec<GroupInfo>, NetworkError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(NetworkError::NotConnected);
        }
        Ok(self.shared.groups.lock().expect("groups lock").clone())
    }

    async fn logout(&self) -> Result<(), NetworkError> {
        self.shared.logouts.fetch_add(1, Ordering::SeqCst);
        if self.shared.fail_logout.load(Ordering::SeqCst) {
            return Err(NetworkError::Rejected("logout refused".to_string()));
        }
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), NetworkError> {
        self.shared.closes.fetch_add(1, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

fn seed_credentials() -> Vec<CredentialEntry> {
    vec![
        CredentialEntry::new("creds.json", br#"{"registered":true}"#.to_vec()),
        CredentialEntry::new("signal-key-1.json", br#"{"key":"seed"}"#.to_vec()),
    ]
}

fn new_id() -> String {
    ulid::Ulid::new().to_string().to_lowercase()
}
