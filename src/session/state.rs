use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection lifecycle of a call session
///
/// `Idle -> Connecting -> WaitingForAgent -> Active`, with
/// `Reconnecting` returning to `Active` (or `WaitingForAgent` if the agent
/// never arrived). `Disconnected` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Connecting,
    /// Connected to the room, no agent yet
    WaitingForAgent,
    Active,
    Reconnecting,
    Disconnected,
}

impl ConnectionState {
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        matches!(
            (self, next),
            (Idle, Connecting)
                | (Idle, Disconnected)
                | (Connecting, WaitingForAgent)
                | (Connecting, Disconnected)
                | (WaitingForAgent, Active)
                | (WaitingForAgent, Reconnecting)
                | (WaitingForAgent, Disconnected)
                | (Active, Reconnecting)
                | (Active, Disconnected)
                | (Reconnecting, Active)
                | (Reconnecting, WaitingForAgent)
                | (Reconnecting, Disconnected)
        )
    }

    /// Connected to the room (agent present or not)
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::WaitingForAgent | ConnectionState::Active)
    }

    pub fn is_terminal(self) -> bool {
        self == ConnectionState::Disconnected
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::WaitingForAgent => "waiting_for_agent",
            ConnectionState::Active => "active",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid session transition {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for InvalidTransition {}

/// Holder enforcing the allowed transitions
#[derive(Debug)]
pub struct StateMachine {
    state: ConnectionState,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Idle,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Move to `next`, returning the previous state
    pub fn transition(&mut self, next: ConnectionState) -> Result<ConnectionState, InvalidTransition> {
        let from = self.state;
        if !from.can_transition_to(next) {
            return Err(InvalidTransition { from, to: next });
        }
        self.state = next;
        Ok(from)
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
