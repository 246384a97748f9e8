//! # devserve-process
//!
//! Low-level process primitives for the devserve orchestrator:
//! - Spawning a server command with merged environment and working
//!   directory, stdout/stderr piped for log capture
//! - Running pre-start shell commands synchronously
//! - Liveness checking by PID
//! - Graceful termination with bounded escalation to a forced kill

pub mod check;
pub mod spawn;
pub mod terminate;
pub mod validation;

pub use check::process_exists;
pub use spawn::{run_pre_start, spawn_server, SpawnSpec};
pub use terminate::{force_kill, stop_with_grace, terminate_gracefully};
pub use validation::validate_command;
