//! Session lifecycle states.

use std::fmt;

/// Where the account session currently is in its lifecycle.
///
/// The normal loop is `Disconnected -> Pairing -> Connected -> Disconnected`.
/// `Terminated` is absorbing: it is reached only through logout or a remote
/// session revocation, and only a process restart leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No live connection. A reconnect may be pending.
    Disconnected,
    /// Transport is up, waiting for the operator to complete the pairing
    /// challenge.
    Pairing,
    /// Open and able to send.
    Connected,
    /// Tearing down after a logout or terminal disconnect.
    Closing,
    /// Logged out and wiped.
    Terminated,
}

impl SessionState {
    /// Sends may only execute in this state.
    pub fn can_send(&self) -> bool {
        matches!(self, SessionState::Connected)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Terminated)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Pairing => "pairing",
            SessionState::Connected => "connected",
            SessionState::Closing => "closing",
            SessionState::Terminated => "terminated",
        };
        write!(f, "{label}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_connected_can_send() {
        assert!(SessionState::Connected.can_send());
        assert!(!SessionState::Disconnected.can_send());
        assert!(!SessionState::Pairing.can_send());
        assert!(!SessionState::Closing.can_send());
        assert!(!SessionState::Terminated.can_send());
    }

    #[test]
    fn test_display_labels() {
        assert_eq!(SessionState::Pairing.to_string(), "pairing");
        assert_eq!(SessionState::Terminated.to_string(), "terminated");
    }
}
