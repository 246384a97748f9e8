//! # devserve-common
//!
//! Shared error taxonomy and identifier types for the devserve
//! orchestrator.
//!
//! Two error families are kept deliberately separate:
//! - [`ConfigError`] covers anything wrong with the declarative server
//!   file. These fail the whole run before any process is spawned.
//! - [`ServerError`] covers failures scoped to one server instance at
//!   runtime. These are recorded per-instance and never abort siblings.

pub mod errors;
pub mod types;

pub use errors::{ConfigError, ConfigResult, ServerError, ServerResult};
pub use types::ServerName;
