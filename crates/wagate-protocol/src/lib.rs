//! Network client protocol for Wagate.
//!
//! The gateway core never speaks the wire protocol itself. It talks to a
//! *driver* through the traits in this crate:
//!
//! - [`NetworkConnector`]: opens an authenticated connection, resuming from a
//!   persisted [`CredentialBundle`] when one exists.
//! - [`NetworkClient`]: the live connection. Sends, existence checks, group
//!   listing, logout, close.
//! - [`NetworkEvent`]: the event stream a connection emits back (pairing
//!   challenges, open/close transitions, credential updates, inbound
//!   messages).
//!
//! Real drivers wrap an actual protocol implementation and live out of tree.
//! The in-tree [`memory::MemoryNetwork`] driver backs tests and local
//! deployments.

pub mod client;
pub mod jid;
pub mod memory;
pub mod types;

pub use client::{
    Connection, DisconnectReason, EventReceiver, NetworkClient, NetworkConnector, NetworkError,
    NetworkEvent,
};
pub use types::{
    CredentialBundle, CredentialEntry, DeviceInfo, GroupInfo, InboundMessage, MessagePayload,
    SendReceipt,
};
