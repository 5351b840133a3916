//! Handshake and protocol states.
//!
//! ## Handshake
//!
//! ```text
//! Start -> PreloginSent -> PreloginAckReceived -> [TlsUpgrade] -> Login7Sent
//!       -> LoginAckReceived -> Ready
//! ```
//!
//! Any state can move to `Failed`.
//!
//! ## Protocol
//!
//! Once the session is ready, the connection alternates between `Ready` and
//! `AwaitingResponse`. A cancellation passes through `AttentionPending`;
//! a failure while a response is on the wire ends in `Poisoned`.

/// Handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Nothing sent yet.
    Start,
    /// PRELOGIN request written.
    PreloginSent,
    /// PRELOGIN response read and encryption agreed.
    PreloginAckReceived,
    /// TLS handshake in progress.
    TlsUpgrade,
    /// LOGIN7 written.
    Login7Sent,
    /// LOGINACK seen; the rest of the login response is being read.
    LoginAckReceived,
    /// Session established.
    Ready,
    /// The handshake failed; the stream must be dropped.
    Failed,
}

impl HandshakeState {
    /// Whether the handshake has finished, successfully or not.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed)
    }
}

/// Request/response discipline of an established connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolState {
    /// No request outstanding.
    #[default]
    Ready,
    /// A request was written and its response is not fully read.
    AwaitingResponse,
    /// ATTENTION sent; waiting for the acknowledging DONE.
    AttentionPending,
    /// The stream is at an unknown position.
    Poisoned,
}

impl ProtocolState {
    /// Check if the connection is in a usable state.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        !matches!(self, Self::Poisoned)
    }

    /// Check if a response is still on the wire.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::AwaitingResponse | Self::AttentionPending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_predicates() {
        assert!(HandshakeState::Ready.is_terminal());
        assert!(HandshakeState::Failed.is_terminal());
        assert!(!HandshakeState::Login7Sent.is_terminal());

        assert!(!ProtocolState::Ready.is_busy());
        assert!(ProtocolState::AttentionPending.is_busy());
        assert!(!ProtocolState::Poisoned.is_usable());
    }
}
