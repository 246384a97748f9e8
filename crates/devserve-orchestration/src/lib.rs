//! Development-server orchestration: configuration model, dependency
//! resolution, lifecycle management, and orchestration runs.
//!
//! The flow is config → plan → lifecycle: [`config`] loads and
//! validates server definitions, [`plan::resolve`] turns them into
//! dependency-ordered start-groups, and [`Orchestrator`] drives the
//! per-server lifecycle through those groups.

pub mod config;
pub mod instance;
pub mod lifecycle;
pub mod logs;
pub mod orchestrator;
pub mod plan;
pub mod state;

pub use config::{
    CommandSpec, HealthCheckOptions, HealthCheckSpec, ServerDefinition, ServerFile,
};
pub use instance::{ServerInstance, ServerStatus};
pub use lifecycle::LifecycleOptions;
pub use logs::{LogBuffer, LogEntry, StreamKind, LOG_BUFFER_CAPACITY};
pub use orchestrator::{
    Action, CancelToken, OrchestrationResult, Orchestrator, OrchestratorOptions, Selection,
    ServerReport, UnhealthyDependencyPolicy,
};
pub use plan::StartPlan;
pub use state::{ServerState, ServerStateMachine};
