//! Error types for the devserve orchestrator.

use crate::types::ServerName;
use thiserror::Error;

/// Result type for configuration-level operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type for per-server runtime operations.
pub type ServerResult<T> = std::result::Result<T, ServerError>;

/// Configuration errors.
///
/// Any of these aborts the whole orchestration run before a single
/// process is spawned. Fixing the server file fully recovers; nothing is
/// ever partially applied.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Duplicate server name: {name}")]
    DuplicateName { name: ServerName },

    #[error("Server '{referrer}' depends on unknown server '{missing}'")]
    MissingDependency {
        referrer: ServerName,
        missing: ServerName,
    },

    #[error("Server '{name}' depends on itself")]
    SelfDependency { name: ServerName },

    #[error("Dependency cycle involving servers: {}", names.iter().map(|n| n.as_str()).collect::<Vec<_>>().join(", "))]
    Cycle { names: Vec<ServerName> },

    #[error("Unknown server: {name}")]
    UnknownServer { name: ServerName },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

impl ConfigError {
    pub fn duplicate_name(name: impl Into<ServerName>) -> Self {
        Self::DuplicateName { name: name.into() }
    }

    pub fn missing_dependency(
        referrer: impl Into<ServerName>,
        missing: impl Into<ServerName>,
    ) -> Self {
        Self::MissingDependency {
            referrer: referrer.into(),
            missing: missing.into(),
        }
    }

    pub fn self_dependency(name: impl Into<ServerName>) -> Self {
        Self::SelfDependency { name: name.into() }
    }

    pub fn cycle(names: Vec<ServerName>) -> Self {
        Self::Cycle { names }
    }

    pub fn unknown_server(name: impl Into<ServerName>) -> Self {
        Self::UnknownServer { name: name.into() }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}

/// Runtime errors scoped to one server instance.
///
/// These are recorded in the orchestration result for the affected
/// server; they never abort sibling instances, though a failed server's
/// dependents are not started.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServerError {
    #[error("Pre-start command failed for '{name}': `{command}` exited with {exit_code:?}")]
    PreStartFailed {
        name: ServerName,
        command: String,
        exit_code: Option<i32>,
    },

    #[error("Failed to spawn '{name}': {reason}")]
    SpawnFailed { name: ServerName, reason: String },

    #[error("Server '{name}' did not become healthy within {attempts} probe attempts")]
    HealthTimeout { name: ServerName, attempts: u32 },

    #[error("Server '{name}' exited unexpectedly with {exit_code:?}")]
    UnexpectedExit {
        name: ServerName,
        exit_code: Option<i32>,
    },

    #[error("Server '{name}' did not exit within the grace period (pid {pid:?})")]
    StopTimeout { name: ServerName, pid: Option<u32> },

    #[error("Invalid state for '{name}': expected {expected}, got {actual}")]
    InvalidState {
        name: ServerName,
        expected: String,
        actual: String,
    },

    #[error("Server '{name}' exhausted its restart budget ({attempts} attempts)")]
    RestartLimit { name: ServerName, attempts: u32 },

    #[error("Dependency '{dependency}' of '{name}' is not ready ({state})")]
    DependencyNotReady {
        name: ServerName,
        dependency: ServerName,
        state: String,
    },
}

impl ServerError {
    pub fn pre_start_failed(
        name: impl Into<ServerName>,
        command: impl Into<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::PreStartFailed {
            name: name.into(),
            command: command.into(),
            exit_code,
        }
    }

    pub fn spawn_failed(name: impl Into<ServerName>, reason: impl Into<String>) -> Self {
        Self::SpawnFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn health_timeout(name: impl Into<ServerName>, attempts: u32) -> Self {
        Self::HealthTimeout {
            name: name.into(),
            attempts,
        }
    }

    pub fn unexpected_exit(name: impl Into<ServerName>, exit_code: Option<i32>) -> Self {
        Self::UnexpectedExit {
            name: name.into(),
            exit_code,
        }
    }

    pub fn stop_timeout(name: impl Into<ServerName>, pid: Option<u32>) -> Self {
        Self::StopTimeout {
            name: name.into(),
            pid,
        }
    }

    pub fn invalid_state(
        name: impl Into<ServerName>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::InvalidState {
            name: name.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn restart_limit(name: impl Into<ServerName>, attempts: u32) -> Self {
        Self::RestartLimit {
            name: name.into(),
            attempts,
        }
    }

    pub fn dependency_not_ready(
        name: impl Into<ServerName>,
        dependency: impl Into<ServerName>,
        state: impl Into<String>,
    ) -> Self {
        Self::DependencyNotReady {
            name: name.into(),
            dependency: dependency.into(),
            state: state.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_messages() {
        let err = ConfigError::missing_dependency("api", "database");
        assert_eq!(
            err.to_string(),
            "Server 'api' depends on unknown server 'database'"
        );

        let err = ConfigError::cycle(vec![ServerName::from("a"), ServerName::from("b")]);
        assert!(err.to_string().contains("a, b"));
    }

    #[test]
    fn test_server_error_construction() {
        let err = ServerError::spawn_failed("api", "no such file");
        assert!(matches!(err, ServerError::SpawnFailed { .. }));
        assert!(err.to_string().contains("no such file"));

        let err = ServerError::pre_start_failed("api", "exit 1", Some(1));
        assert!(err.to_string().contains("exit 1"));
    }
}
