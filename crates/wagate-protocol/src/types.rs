//! Types crossing the driver boundary.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Outbound payloads
// ============================================================================

/// Content of one outbound message, fully built by the gateway before it
/// reaches the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum MessagePayload {
    Text {
        body: String,
    },
    Image {
        path: PathBuf,
        caption: String,
    },
    Audio {
        path: PathBuf,
        mime: String,
    },
    Document {
        path: PathBuf,
        file_name: String,
        mime: String,
        caption: String,
    },
}

impl MessagePayload {
    /// Short kind tag for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            MessagePayload::Text { .. } => "text",
            MessagePayload::Image { .. } => "image",
            MessagePayload::Audio { .. } => "audio",
            MessagePayload::Document { .. } => "document",
        }
    }
}

/// Acknowledgment the network returns for an accepted send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendReceipt {
    /// Remote message id assigned by the network.
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// Groups
// ============================================================================

/// One group the account participates in, as reported by the network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub id: String,
    pub subject: String,
    pub participant_count: u32,
    /// Owner address; `None` when the network does not report one.
    pub owner: Option<String>,
}

// ============================================================================
// Credentials
// ============================================================================

/// A single opaque credential record. The gateway persists these verbatim;
/// only the driver understands the contents.
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialEntry {
    pub name: String,
    pub data: Vec<u8>,
}

impl CredentialEntry {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

/// The complete persisted authentication state for one account session.
#[derive(Debug, Clone, Default)]
pub struct CredentialBundle {
    pub entries: Vec<CredentialEntry>,
}

impl CredentialBundle {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.data.as_slice())
    }

    /// Insert or replace an entry by name.
    pub fn upsert(&mut self, entry: CredentialEntry) {
        match self.entries.iter_mut().find(|e| e.name == entry.name) {
            Some(existing) => existing.data = entry.data,
            None => self.entries.push(entry),
        }
    }
}

// ============================================================================
// Device identity
// ============================================================================

/// Device identity presented to the network during pairing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub os: String,
    pub browser: String,
    pub version: String,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            os: "Ubuntu".to_string(),
            browser: "Chrome".to_string(),
            version: "22.04.4".to_string(),
        }
    }
}

// ============================================================================
// Inbound traffic
// ============================================================================

/// Minimal view of an inbound message. The gateway only logs these; it does
/// not consume inbound traffic.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub id: String,
    pub from: String,
    pub timestamp: DateTime<Utc>,
}
