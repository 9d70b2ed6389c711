// SPDX-License-Identifier: MIT OR Apache-2.0
//! Connect lifecycle state machine (spec §4.9: `CONNECTING → ACTIVE →
//! {DRAINING | RECONNECTING | CLOSING} → CLOSED`).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Full internal connection state, including the two states a caller never
/// observes directly (`Draining`, `Reconnecting`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Handshake in flight, or the gateway socket not yet open.
    Connecting,
    /// Registered and serving `EXECUTOR_REQUEST`s normally.
    Active,
    /// Winding down this connection in favour of a freshly-established one;
    /// still serving in-flight requests, accepting no new ones.
    Draining,
    /// Socket lost or a heartbeat deadline missed; retrying with backoff.
    Reconnecting,
    /// User-initiated shutdown: in-flight work cancelled after a grace
    /// window, then the socket is closed.
    Closing,
    /// Terminal. No further transitions.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Draining => "draining",
            Self::Reconnecting => "reconnecting",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// The subset of [`ConnectionState`] a caller of [`crate::ConnectHandle::state`]
/// can observe (spec §4.9: "External observers see only CONNECTING, ACTIVE,
/// CLOSING, CLOSED").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalState {
    /// Handshake/registration in progress.
    Connecting,
    /// Serving requests. Covers the internal `Draining` and `Reconnecting`
    /// states too — both are transparent recovery the caller shouldn't see.
    Active,
    /// Shutting down.
    Closing,
    /// Terminal.
    Closed,
}

impl ConnectionState {
    /// Collapse to the externally-visible state.
    #[must_use]
    pub fn external(self) -> ExternalState {
        match self {
            Self::Connecting => ExternalState::Connecting,
            Self::Active | Self::Draining | Self::Reconnecting => ExternalState::Active,
            Self::Closing => ExternalState::Closing,
            Self::Closed => ExternalState::Closed,
        }
    }
}

/// Record of a single lifecycle transition, kept for diagnostics.
#[derive(Debug, Clone)]
pub struct StateTransition {
    /// State before the transition.
    pub from: ConnectionState,
    /// State after the transition.
    pub to: ConnectionState,
    /// Optional human-readable reason (e.g. "missed heartbeat deadline").
    pub reason: Option<String>,
}

/// Raised when a requested transition isn't reachable from the current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    /// Current state.
    pub from: ConnectionState,
    /// Rejected target state.
    pub to: ConnectionState,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid connect transition from {} to {}", self.from, self.to)
    }
}

impl std::error::Error for InvalidTransition {}

/// Tracks connect state and enforces the transition diagram, the same way
/// `abp-host::lifecycle::LifecycleManager` tracks a sidecar's lifecycle.
#[derive(Debug)]
pub struct ConnectionLifecycle {
    state: ConnectionState,
    history: Vec<StateTransition>,
}

impl ConnectionLifecycle {
    /// A fresh lifecycle, starting in [`ConnectionState::Connecting`].
    #[must_use]
    pub fn new() -> Self {
        Self { state: ConnectionState::Connecting, history: Vec::new() }
    }

    /// Current internal state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Current externally-visible state.
    #[must_use]
    pub fn external_state(&self) -> ExternalState {
        self.state.external()
    }

    /// Attempt a transition, recording it in [`Self::history`] on success.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] if `to` isn't reachable from the
    /// current state.
    pub fn transition(&mut self, to: ConnectionState, reason: Option<String>) -> Result<(), InvalidTransition> {
        if !self.can_transition(to) {
            return Err(InvalidTransition { from: self.state, to });
        }
        let from = self.state;
        self.state = to;
        self.history.push(StateTransition { from, to, reason });
        Ok(())
    }

    /// Whether `to` is reachable from the current state.
    #[must_use]
    pub fn can_transition(&self, to: ConnectionState) -> bool {
        // Closing is reachable from any non-terminal state: the user can
        // call `close()` at any point in the connection's life.
        if to == ConnectionState::Closing {
            return !matches!(self.state, ConnectionState::Closing | ConnectionState::Closed);
        }

        matches!(
            (self.state, to),
            (ConnectionState::Connecting, ConnectionState::Active)
                | (ConnectionState::Connecting, ConnectionState::Closed) // fatal handshake/dial failure
                | (ConnectionState::Active, ConnectionState::Draining)
                | (ConnectionState::Active, ConnectionState::Reconnecting)
                | (ConnectionState::Draining, ConnectionState::Active)
                | (ConnectionState::Draining, ConnectionState::Reconnecting)
                | (ConnectionState::Reconnecting, ConnectionState::Active)
                | (ConnectionState::Closing, ConnectionState::Closed)
        )
    }

    /// Full transition history, oldest first.
    #[must_use]
    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }
}

impl Default for ConnectionLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_connecting() {
        let lifecycle = ConnectionLifecycle::new();
        assert_eq!(lifecycle.state(), ConnectionState::Connecting);
        assert_eq!(lifecycle.external_state(), ExternalState::Connecting);
    }

    #[test]
    fn draining_and_reconnecting_stay_externally_active() {
        let mut lifecycle = ConnectionLifecycle::new();
        lifecycle.transition(ConnectionState::Active, None).unwrap();
        lifecycle.transition(ConnectionState::Draining, Some("gateway draining".into())).unwrap();
        assert_eq!(lifecycle.external_state(), ExternalState::Active);

        lifecycle.transition(ConnectionState::Reconnecting, None).unwrap();
        assert_eq!(lifecycle.external_state(), ExternalState::Active);
    }

    #[test]
    fn close_is_reachable_from_any_live_state() {
        for start in [ConnectionState::Connecting, ConnectionState::Active, ConnectionState::Draining, ConnectionState::Reconnecting] {
            let mut lifecycle = ConnectionLifecycle::new();
            if start != ConnectionState::Connecting {
                lifecycle.transition(ConnectionState::Active, None).unwrap();
            }
            if start == ConnectionState::Draining || start == ConnectionState::Reconnecting {
                lifecycle.transition(start, None).unwrap();
            }
            assert!(lifecycle.transition(ConnectionState::Closing, None).is_ok(), "from {start}");
        }
    }

    #[test]
    fn closed_is_terminal() {
        let mut lifecycle = ConnectionLifecycle::new();
        lifecycle.transition(ConnectionState::Closing, None).unwrap();
        lifecycle.transition(ConnectionState::Closed, None).unwrap();
        assert!(!lifecycle.can_transition(ConnectionState::Active));
        assert!(!lifecycle.can_transition(ConnectionState::Closing));
    }

    #[test]
    fn rejects_skipping_straight_to_active_after_close() {
        let mut lifecycle = ConnectionLifecycle::new();
        lifecycle.transition(ConnectionState::Closing, None).unwrap();
        let err = lifecycle.transition(ConnectionState::Active, None).unwrap_err();
        assert_eq!(err.from, ConnectionState::Closing);
    }
}
