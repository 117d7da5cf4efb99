//! Driver traits and connection events.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::types::{
    CredentialBundle, CredentialEntry, DeviceInfo, GroupInfo, InboundMessage, MessagePayload,
    SendReceipt,
};

// ============================================================================
// Disconnect classification
// ============================================================================

/// Why the network closed a connection, extracted from the close event.
///
/// The numeric codes mirror the status codes the network attaches to stream
/// errors; drivers map whatever their transport reports into these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// 401: the account was logged out remotely. The session is dead and the
    /// persisted credentials are useless.
    LoggedOut,
    /// 408: the link dropped mid-session.
    ConnectionLost,
    /// 428: the server closed the connection.
    ConnectionClosed,
    /// 440: another device took over this session.
    Replaced,
    /// 515: the server requires a fresh connect.
    RestartRequired,
    /// Any code the driver could not classify.
    Unknown(u16),
}

impl DisconnectReason {
    pub fn from_code(code: u16) -> Self {
        match code {
            401 => DisconnectReason::LoggedOut,
            408 => DisconnectReason::ConnectionLost,
            428 => DisconnectReason::ConnectionClosed,
            440 => DisconnectReason::Replaced,
            515 => DisconnectReason::RestartRequired,
            other => DisconnectReason::Unknown(other),
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            DisconnectReason::LoggedOut => 401,
            DisconnectReason::ConnectionLost => 408,
            DisconnectReason::ConnectionClosed => 428,
            DisconnectReason::Replaced => 440,
            DisconnectReason::RestartRequired => 515,
            DisconnectReason::Unknown(code) => *code,
        }
    }

    /// Terminal reasons require a credential wipe and full re-pairing.
    /// Everything else is transient and eligible for automatic reconnect.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DisconnectReason::LoggedOut)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DisconnectReason::LoggedOut => "logged_out",
            DisconnectReason::ConnectionLost => "connection_lost",
            DisconnectReason::ConnectionClosed => "connection_closed",
            DisconnectReason::Replaced => "replaced",
            DisconnectReason::RestartRequired => "restart_required",
            DisconnectReason::Unknown(_) => "unknown",
        };
        write!(f, "{} ({})", label, self.code())
    }
}

// ============================================================================
// Events
// ============================================================================

/// Events a live connection emits back to the gateway.
#[derive(Debug)]
pub enum NetworkEvent {
    /// The network requires the operator to pair this device before the
    /// session can open. The code is surfaced to the operator out-of-band.
    PairingRequired { code: String },
    /// The connection is open; sends may proceed.
    Connected,
    /// The connection closed.
    Disconnected { reason: DisconnectReason },
    /// Advanced credential material. Must be persisted before anything else
    /// observes the session, or a later resume will fail.
    CredentialsUpdated { entries: Vec<CredentialEntry> },
    /// Inbound traffic addressed to this account.
    Message(InboundMessage),
}

pub type EventReceiver = mpsc::UnboundedReceiver<NetworkEvent>;

// ============================================================================
// Errors
// ============================================================================

/// Errors surfaced by network drivers.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// The connection is not open.
    #[error("connection is not open")]
    NotConnected,

    /// The network accepted the request and rejected it.
    #[error("rejected by network: {0}")]
    Rejected(String),

    /// The driver's transport failed.
    #[error("transport failure: {0}")]
    Transport(String),
}

// ============================================================================
// Traits
// ============================================================================

/// A live, authenticated connection to the messaging network.
///
/// At most one client is current at any time; the lifecycle manager owns
/// replacement and everything else only reads the current one.
#[async_trait]
pub trait NetworkClient: Send + Sync {
    /// Send one message to a fully-resolved address.
    async fn send(&self, jid: &str, payload: &MessagePayload) -> Result<SendReceipt, NetworkError>;

    /// Check whether an individual address is provisioned on the network.
    /// Returns the canonical address when it exists.
    async fn check_user(&self, jid: &str) -> Result<Option<String>, NetworkError>;

    /// Fetch every group the account currently participates in.
    async fn fetch_groups(&self) -> Result<Vec<GroupInfo>, NetworkError>;

    /// Ask the network to revoke this session.
    async fn logout(&self) -> Result<(), NetworkError>;

    /// Tear down the transport without revoking the session.
    async fn close(&self) -> Result<(), NetworkError>;
}

/// Opens connections. The gateway reconnects through the same connector
/// after transient drops, handing back the credentials it persisted.
#[async_trait]
pub trait NetworkConnector: Send + Sync {
    async fn connect(
        &self,
        device: &DeviceInfo,
        credentials: Option<CredentialBundle>,
    ) -> Result<Connection, NetworkError>;
}

/// A freshly-opened connection: the client plus its event stream.
pub struct Connection {
    pub client: Arc<dyn NetworkClient>,
    pub events: EventReceiver,
}
