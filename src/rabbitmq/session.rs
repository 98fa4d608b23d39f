// src/rabbitmq/session.rs
use std::fmt;

use tokio::sync::watch;

/// Lifecycle of a consume or publish session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Binding,
    /// Inbound steady state.
    Consuming,
    /// Inbound only: tearing down after the delivery stream failed.
    Draining,
    /// Outbound steady state: the readiness gate is open.
    Ready,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Binding => "binding",
            SessionState::Consuming => "consuming",
            SessionState::Draining => "draining",
            SessionState::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// Publishes state transitions so supervisors and tests can follow a session.
pub(crate) struct StateCell {
    tx: watch::Sender<SessionState>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        Self {
            tx: watch::Sender::new(SessionState::Disconnected),
        }
    }

    pub(crate) fn set(&self, state: SessionState) {
        self.tx.send_replace(state);
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }
}
