//! Session lifecycle: credential persistence and the connection supervisor.

mod creds;
mod manager;
mod state;

pub use creds::{CredentialStore, CredsError};
pub use manager::{SessionError, SessionHandle, SessionManager};
pub use state::SessionState;
