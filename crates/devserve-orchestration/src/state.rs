//! Per-server state machine.
//!
//! `Stopped -> Starting -> (Running | Unhealthy | Failed) -> Stopping -> Stopped`,
//! with `Running -> Failed` on unexpected exit. Transitions are
//! validated; the lifecycle manager is the only writer.

use devserve_common::{ServerError, ServerName, ServerResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of one server instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    /// Not running; the initial and final state.
    Stopped,
    /// Pre-start commands done, process spawned, health pending.
    Starting,
    /// Process alive and healthy (or liveness-gated).
    Running,
    /// Process alive but the health probe budget ran out.
    Unhealthy,
    /// Spawn failed, process exited unexpectedly, or restart budget
    /// exhausted.
    Failed,
    /// Graceful stop in progress.
    Stopping,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerState::Stopped => write!(f, "stopped"),
            ServerState::Starting => write!(f, "starting"),
            ServerState::Running => write!(f, "running"),
            ServerState::Unhealthy => write!(f, "unhealthy"),
            ServerState::Failed => write!(f, "failed"),
            ServerState::Stopping => write!(f, "stopping"),
        }
    }
}

impl ServerState {
    /// Terminal for one start attempt: the group coordinator releases
    /// the next group once every member reaches one of these (or
    /// `Running`).
    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, ServerState::Unhealthy | ServerState::Failed)
    }

    pub fn is_transitional(&self) -> bool {
        matches!(self, ServerState::Starting | ServerState::Stopping)
    }

    /// Whether a dependency in this state satisfies its dependents
    /// under the strict (blocking) policy.
    pub fn satisfies_dependents(&self) -> bool {
        matches!(self, ServerState::Running)
    }
}

/// Validated state machine for one server instance.
#[derive(Debug, Clone)]
pub struct ServerStateMachine {
    name: ServerName,
    current: ServerState,
}

impl ServerStateMachine {
    pub fn new(name: ServerName) -> Self {
        Self {
            name,
            current: ServerState::Stopped,
        }
    }

    pub fn current(&self) -> ServerState {
        self.current
    }

    pub fn is_valid_transition(&self, target: ServerState) -> bool {
        use ServerState::*;
        match (self.current, target) {
            (Stopped, Starting) => true,
            (Starting, Running) => true,
            (Starting, Unhealthy) => true,
            (Starting, Failed) => true,
            // Cancelling a start that already spawned.
            (Starting, Stopping) => true,
            (Running, Stopping) => true,
            (Running, Failed) => true,
            (Running, Unhealthy) => true,
            (Unhealthy, Starting) => true, // restart attempt
            (Unhealthy, Stopping) => true,
            (Unhealthy, Failed) => true,
            (Unhealthy, Running) => true, // recovered
            (Failed, Starting) => true,   // restart attempt
            (Failed, Stopping) => true,   // retrying a stop that failed to reap
            (Failed, Stopped) => true,    // reaped during stop
            (Stopping, Stopped) => true,
            (Stopping, Failed) => true,
            (state, target) if state == target => true,
            _ => false,
        }
    }

    pub fn transition_to(&mut self, target: ServerState) -> ServerResult<()> {
        if !self.is_valid_transition(target) {
            return Err(ServerError::invalid_state(
                self.name.clone(),
                target.to_string(),
                self.current.to_string(),
            ));
        }
        if self.current != target {
            tracing::debug!("Server '{}': {} -> {}", self.name, self.current, target);
            self.current = target;
        }
        Ok(())
    }
}
