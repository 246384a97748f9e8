//! Runtime record for one server definition during an orchestration run.

use crate::config::ServerDefinition;
use crate::logs::LogBuffer;
use crate::state::{ServerState, ServerStateMachine};
use chrono::{DateTime, Utc};
use devserve_common::{ServerError, ServerName};
use devserve_health::ProbeOutcome;
use std::sync::Arc;
use tokio::process::Child;

/// Mutable runtime state for one server.
///
/// Created once per definition when a run begins, mutated only by the
/// task that currently owns it (the lifecycle manager hands the whole
/// instance to one task per group member), discarded when the run ends.
pub struct ServerInstance {
    definition: Arc<ServerDefinition>,
    state: ServerStateMachine,
    /// Exclusively owned; reaped on stop or failure.
    pub(crate) child: Option<Child>,
    pub(crate) pid: Option<u32>,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) health: ProbeOutcome,
    pub(crate) restart_count: u32,
    pub(crate) last_error: Option<ServerError>,
    pub(crate) logs: LogBuffer,
}

/// Point-in-time snapshot for status queries. Never triggers a probe.
#[derive(Debug, Clone)]
pub struct ServerStatus {
    pub name: ServerName,
    pub state: ServerState,
    pub health: ProbeOutcome,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub restart_count: u32,
    pub last_error: Option<ServerError>,
}

impl ServerInstance {
    pub fn new(definition: Arc<ServerDefinition>) -> Self {
        let name = definition.name.clone();
        Self {
            definition,
            state: ServerStateMachine::new(name),
            child: None,
            pid: None,
            started_at: None,
            health: ProbeOutcome::Unknown,
            restart_count: 0,
            last_error: None,
            logs: LogBuffer::new(),
        }
    }

    pub fn definition(&self) -> &ServerDefinition {
        &self.definition
    }

    pub fn name(&self) -> &ServerName {
        &self.definition.name
    }

    pub fn state(&self) -> ServerState {
        self.state.current()
    }

    pub(crate) fn transition_to(
        &mut self,
        target: ServerState,
    ) -> devserve_common::ServerResult<()> {
        self.state.transition_to(target)
    }

    pub fn logs(&self) -> &LogBuffer {
        &self.logs
    }

    pub fn status(&self) -> ServerStatus {
        ServerStatus {
            name: self.definition.name.clone(),
            state: self.state.current(),
            health: self.health,
            pid: self.pid,
            started_at: self.started_at,
            restart_count: self.restart_count,
            last_error: self.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CommandSpec, ServerDefinition};
    use std::collections::HashMap;

    fn definition(name: &str) -> Arc<ServerDefinition> {
        Arc::new(ServerDefinition {
            name: ServerName::from(name),
            command: CommandSpec::Shell("true".to_string()),
            working_directory: None,
            port: None,
            env: HashMap::new(),
            depends_on: Vec::new(),
            auto_start: true,
            restart_on_failure: false,
            startup_delay: None,
            pre_start: Vec::new(),
            health_check: None,
        })
    }

    #[test]
    fn test_fresh_instance_snapshot() {
        let instance = ServerInstance::new(definition("api"));
        let status = instance.status();
        assert_eq!(status.name.as_str(), "api");
        assert_eq!(status.state, ServerState::Stopped);
        assert_eq!(status.health, ProbeOutcome::Unknown);
        assert_eq!(status.restart_count, 0);
        assert!(status.pid.is_none());
        assert!(status.last_error.is_none());
    }
}
