//! The orchestration run: ties the resolver, health checker, and
//! lifecycle manager together over an explicit per-scope registry.
//!
//! One coordinating flow of control per run. Within a start-group every
//! member runs as its own task (structured concurrency via `JoinSet`);
//! the coordinator hands each task exclusive ownership of the member's
//! instance, joins the whole group, and puts the instances back. That
//! join is the only synchronization barrier. There are no locks around
//! the registry because there is no concurrent access to it.

use crate::config::{validation, ServerDefinition, ServerFile};
use crate::instance::{ServerInstance, ServerStatus};
use crate::lifecycle::{self, LifecycleOptions};
use crate::logs::LogEntry;
use crate::plan::{self, StartPlan};
use crate::state::ServerState;
use devserve_common::{ConfigError, ConfigResult, ServerError, ServerName};
use devserve_health::ProbeOutcome;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Whether a dependency that is `Unhealthy` (process alive, probes
/// failing) satisfies its dependents. The source semantics leave this
/// open; blocking is the safer default, so it is an explicit policy
/// rather than an accident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnhealthyDependencyPolicy {
    /// Dependents are skipped until the dependency is `Running`.
    #[default]
    Block,
    /// An alive-but-unhealthy dependency releases its dependents.
    Allow,
}

/// Run-wide policy knobs.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorOptions {
    pub lifecycle: LifecycleOptions,
    pub unhealthy_dependency: UnhealthyDependencyPolicy,
}

/// Cooperative cancellation flag for an orchestration run.
///
/// Cancellation takes effect at the next group boundary: in-flight
/// member tasks run to completion and already-spawned processes are
/// left running, so partial progress stays inspectable.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Which servers an operation applies to.
#[derive(Debug, Clone)]
pub enum Selection {
    /// Every definition; `auto_start = false` members are included only
    /// when `include_manual` is set (start); stop always takes all.
    All { include_manual: bool },
    /// Explicitly named servers, regardless of `auto_start`.
    Named(Vec<ServerName>),
}

/// What an orchestration run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
}

/// Per-server outcome of a run. Failures always carry the originating
/// error, never a bare "failed".
#[derive(Debug, Clone)]
pub struct ServerReport {
    pub name: ServerName,
    pub state: ServerState,
    pub health: ProbeOutcome,
    pub restart_count: u32,
    pub error: Option<ServerError>,
    /// Never attempted: a dependency failed, or the run was cancelled.
    pub skipped: bool,
}

/// Result of one orchestration run, enumerating every requested server.
#[derive(Debug, Clone)]
pub struct OrchestrationResult {
    pub action: Action,
    pub reports: Vec<ServerReport>,
}

impl OrchestrationResult {
    pub fn all_succeeded(&self) -> bool {
        self.reports.iter().all(|r| r.error.is_none() && !r.skipped)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ServerReport> {
        self.reports
            .iter()
            .filter(|r| r.error.is_some() || r.skipped)
    }
}

/// Orchestrator for one scope's servers.
///
/// Owns the instance registry explicitly, with no process-wide state. A
/// higher-level aggregator may union several scopes' orchestrators for
/// a global view; this core never does.
pub struct Orchestrator {
    definitions: Vec<Arc<ServerDefinition>>,
    registry: HashMap<ServerName, ServerInstance>,
    options: OrchestratorOptions,
    cancel: CancelToken,
}

impl Orchestrator {
    /// Build an orchestrator from a validated server file.
    pub fn new(file: ServerFile) -> ConfigResult<Self> {
        Self::with_options(file, OrchestratorOptions::default())
    }

    pub fn with_options(file: ServerFile, options: OrchestratorOptions) -> ConfigResult<Self> {
        validation::validate_definitions(&file.servers)?;
        // Resolving the full scope up front rejects cycles before any
        // instance exists.
        plan::resolve(&file.servers)?;

        let definitions: Vec<Arc<ServerDefinition>> =
            file.servers.into_iter().map(Arc::new).collect();
        let registry = definitions
            .iter()
            .map(|def| (def.name.clone(), ServerInstance::new(Arc::clone(def))))
            .collect();

        Ok(Self {
            definitions,
            registry,
            options,
            cancel: CancelToken::new(),
        })
    }

    /// A handle for cancelling this orchestrator's runs cooperatively.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Start the selected servers in dependency order.
    ///
    /// Each start-group runs concurrently; the next group is released
    /// only once every member reaches `Running` or a terminal failure.
    /// A failed member's dependents are skipped (with the reason), but
    /// siblings and unrelated servers proceed. Already-started servers
    /// are never unwound automatically.
    pub async fn run_start(&mut self, selection: &Selection) -> ConfigResult<OrchestrationResult> {
        let mut selected = self.select_for_start(selection)?;
        // Dependencies start too, even when not named: a subset start
        // is a promise that its members end up usable.
        self.close_over_dependencies(&mut selected);

        let subset = self.subset_in_declaration_order(&selected);
        let start_plan = plan::resolve(&subset)?;
        info!(
            "Start plan: {} servers in {} groups",
            start_plan.server_count(),
            start_plan.groups().len()
        );

        let mut skipped: HashMap<ServerName, Option<ServerError>> = HashMap::new();
        let mut run_errors: HashMap<ServerName, ServerError> = HashMap::new();

        'groups: for group in start_plan.groups() {
            if self.cancel.is_cancelled() {
                warn!("Run cancelled; remaining groups are skipped");
                self.skip_remaining(&start_plan, group, &mut skipped);
                break 'groups;
            }

            let mut join_set: JoinSet<(ServerName, ServerInstance, Result<(), ServerError>)> =
                JoinSet::new();
            let mut dispatched: Vec<ServerName> = Vec::new();

            for name in group {
                if let Some(unready) = self.blocking_dependency(name) {
                    skipped.insert(name.clone(), Some(unready));
                    continue;
                }
                let Some(instance) = self.registry.remove(name) else {
                    continue;
                };
                dispatched.push(name.clone());
                let lifecycle_options = self.options.lifecycle.clone();
                let name = name.clone();
                join_set.spawn(async move {
                    let mut instance = instance;
                    let result = lifecycle::start_server(&mut instance, &lifecycle_options).await;
                    (name, instance, result)
                });
            }

            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok((name, instance, result)) => {
                        self.registry.insert(name.clone(), instance);
                        if let Err(err) = result {
                            run_errors.insert(name, err);
                        }
                    }
                    Err(join_err) => {
                        error!("Start task panicked: {}", join_err);
                    }
                }
            }

            // A panicking task never reinserted its instance; record the
            // loss as that server's error rather than reporting nothing.
            for name in dispatched {
                if !self.registry.contains_key(&name) {
                    let err = ServerError::invalid_state(
                        name.clone(),
                        "joined start task",
                        "task panicked, instance lost",
                    );
                    run_errors.insert(name, err);
                }
            }
        }

        Ok(self.build_result(Action::Start, &subset, run_errors, skipped))
    }

    /// Stop the selected servers in reverse dependency order.
    ///
    /// Named selections are widened to include transitive dependents,
    /// so a dependency is never stopped under a still-running server.
    /// A member that fails during stop is reported but does not abort
    /// the rest of the stop.
    pub async fn run_stop(&mut self, selection: &Selection) -> ConfigResult<OrchestrationResult> {
        let mut selected = self.select_for_stop(selection)?;
        self.close_over_dependents(&mut selected);

        let subset = self.subset_in_declaration_order(&selected);
        let stop_plan = plan::resolve(&subset)?.reverse();
        info!(
            "Stop plan: {} servers in {} groups",
            stop_plan.server_count(),
            stop_plan.groups().len()
        );

        let mut skipped: HashMap<ServerName, Option<ServerError>> = HashMap::new();
        let mut run_errors: HashMap<ServerName, ServerError> = HashMap::new();

        'groups: for group in stop_plan.groups() {
            if self.cancel.is_cancelled() {
                warn!("Run cancelled; remaining groups are skipped");
                self.skip_remaining(&stop_plan, group, &mut skipped);
                break 'groups;
            }

            let mut join_set: JoinSet<(ServerName, ServerInstance, Result<ServerState, ServerError>)> =
                JoinSet::new();
            let mut dispatched: Vec<ServerName> = Vec::new();

            for name in group {
                let Some(instance) = self.registry.remove(name) else {
                    continue;
                };
                dispatched.push(name.clone());
                let lifecycle_options = self.options.lifecycle.clone();
                let name = name.clone();
                join_set.spawn(async move {
                    let mut instance = instance;
                    let result = lifecycle::stop_server(&mut instance, &lifecycle_options).await;
                    (name, instance, result)
                });
            }

            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok((name, instance, result)) => {
                        self.registry.insert(name.clone(), instance);
                        if let Err(err) = result {
                            run_errors.insert(name, err);
                        }
                    }
                    Err(join_err) => {
                        error!("Stop task panicked: {}", join_err);
                    }
                }
            }

            for name in dispatched {
                if !self.registry.contains_key(&name) {
                    let err = ServerError::invalid_state(
                        name.clone(),
                        "joined stop task",
                        "task panicked, instance lost",
                    );
                    run_errors.insert(name, err);
                }
            }
        }

        Ok(self.build_result(Action::Stop, &subset, run_errors, skipped))
    }

    /// Restart one server as a single logical stop-then-start.
    ///
    /// Runtime failures are embedded in the returned status
    /// (`last_error`); only an unknown name is a hard error.
    pub async fn restart(&mut self, name: &ServerName) -> ConfigResult<ServerStatus> {
        let options = self.options.lifecycle.clone();
        let instance = self
            .registry
            .get_mut(name)
            .ok_or_else(|| ConfigError::unknown_server(name.clone()))?;

        if let Err(err) = lifecycle::restart_server(instance, &options).await {
            warn!("Restart of '{}' failed: {}", name, err);
        }
        Ok(instance.status())
    }

    /// Non-blocking status of one server. Detects a process that exited
    /// since the last operation, but never probes.
    pub fn status(&mut self, name: &ServerName) -> ConfigResult<ServerStatus> {
        let instance = self
            .registry
            .get_mut(name)
            .ok_or_else(|| ConfigError::unknown_server(name.clone()))?;
        lifecycle::refresh_liveness(instance);
        Ok(instance.status())
    }

    /// Status snapshot of every server, in declaration order.
    pub fn status_all(&mut self) -> Vec<ServerStatus> {
        let names: Vec<ServerName> = self.definitions.iter().map(|d| d.name.clone()).collect();
        names
            .iter()
            .filter_map(|name| self.status(name).ok())
            .collect()
    }

    /// The last `tail` captured log lines for one server.
    pub fn logs(&self, name: &ServerName, tail: usize) -> ConfigResult<Vec<LogEntry>> {
        let instance = self
            .registry
            .get(name)
            .ok_or_else(|| ConfigError::unknown_server(name.clone()))?;
        Ok(instance.logs().tail(tail))
    }

    /// Re-validate the scope's definitions, reporting every problem.
    pub fn validate(&self) -> validation::ValidationReport {
        let defs: Vec<ServerDefinition> =
            self.definitions.iter().map(|d| (**d).clone()).collect();
        validation::check_definitions(&defs)
    }

    // ------------------------------------------------------------------
    // Selection and plan helpers
    // ------------------------------------------------------------------

    fn select_for_start(&self, selection: &Selection) -> ConfigResult<HashSet<ServerName>> {
        match selection {
            Selection::All { include_manual } => Ok(self
                .definitions
                .iter()
                .filter(|d| d.auto_start || *include_manual)
                .map(|d| d.name.clone())
                .collect()),
            Selection::Named(names) => self.resolve_names(names),
        }
    }

    fn select_for_stop(&self, selection: &Selection) -> ConfigResult<HashSet<ServerName>> {
        match selection {
            Selection::All { .. } => {
                Ok(self.definitions.iter().map(|d| d.name.clone()).collect())
            }
            Selection::Named(names) => self.resolve_names(names),
        }
    }

    fn resolve_names(&self, names: &[ServerName]) -> ConfigResult<HashSet<ServerName>> {
        let mut selected = HashSet::new();
        for name in names {
            if !self.registry.contains_key(name) {
                return Err(ConfigError::unknown_server(name.clone()));
            }
            selected.insert(name.clone());
        }
        Ok(selected)
    }

    /// Add transitive `depends_on` targets to the selection.
    fn close_over_dependencies(&self, selected: &mut HashSet<ServerName>) {
        let by_name: HashMap<&ServerName, &Arc<ServerDefinition>> =
            self.definitions.iter().map(|d| (&d.name, d)).collect();
        let mut queue: Vec<ServerName> = selected.iter().cloned().collect();
        while let Some(name) = queue.pop() {
            if let Some(def) = by_name.get(&name) {
                for dep in &def.depends_on {
                    if selected.insert(dep.clone()) {
                        queue.push(dep.clone());
                    }
                }
            }
        }
    }

    /// Add transitive dependents to the selection.
    fn close_over_dependents(&self, selected: &mut HashSet<ServerName>) {
        loop {
            let mut added = false;
            for def in &self.definitions {
                if selected.contains(&def.name) {
                    continue;
                }
                if def.depends_on.iter().any(|dep| selected.contains(dep))
                    && selected.insert(def.name.clone())
                {
                    added = true;
                }
            }
            if !added {
                break;
            }
        }
    }

    fn subset_in_declaration_order(&self, selected: &HashSet<ServerName>) -> Vec<ServerDefinition> {
        self.definitions
            .iter()
            .filter(|d| selected.contains(&d.name))
            .map(|d| (**d).clone())
            .collect()
    }

    /// The first dependency of `name` that does not satisfy dependents,
    /// as a recordable error; `None` means the member may start.
    fn blocking_dependency(&self, name: &ServerName) -> Option<ServerError> {
        let def = self.definitions.iter().find(|d| &d.name == name)?;
        for dep in &def.depends_on {
            let Some(instance) = self.registry.get(dep) else {
                // Outside the scope entirely; validation would have
                // caught a truly unknown name.
                continue;
            };
            let state = instance.state();
            let satisfied = state.satisfies_dependents()
                || (state == ServerState::Unhealthy
                    && self.options.unhealthy_dependency == UnhealthyDependencyPolicy::Allow);
            if !satisfied {
                return Some(ServerError::dependency_not_ready(
                    name.clone(),
                    dep.clone(),
                    state.to_string(),
                ));
            }
        }
        None
    }

    /// Mark the current group and everything after it as skipped.
    fn skip_remaining(
        &self,
        run_plan: &StartPlan,
        from_group: &[ServerName],
        skipped: &mut HashMap<ServerName, Option<ServerError>>,
    ) {
        let mut reached = false;
        for group in run_plan.groups() {
            if group.as_slice() == from_group {
                reached = true;
            }
            if reached {
                for name in group {
                    skipped.entry(name.clone()).or_insert(None);
                }
            }
        }
    }

    fn build_result(
        &self,
        action: Action,
        subset: &[ServerDefinition],
        run_errors: HashMap<ServerName, ServerError>,
        skipped: HashMap<ServerName, Option<ServerError>>,
    ) -> OrchestrationResult {
        let reports = subset
            .iter()
            .map(|def| {
                let was_skipped = skipped.contains_key(&def.name);
                let mut error = run_errors
                    .get(&def.name)
                    .cloned()
                    .or_else(|| skipped.get(&def.name).cloned().flatten());
                let status = self
                    .registry
                    .get(&def.name)
                    .map(ServerInstance::status)
                    .unwrap_or_else(|| {
                        // No instance to snapshot; make sure this never
                        // reads as a success.
                        if error.is_none() && !was_skipped {
                            error = Some(ServerError::invalid_state(
                                def.name.clone(),
                                "registered instance",
                                "instance lost during the run",
                            ));
                        }
                        ServerStatus {
                            name: def.name.clone(),
                            state: ServerState::Failed,
                            health: ProbeOutcome::Unknown,
                            pid: None,
                            started_at: None,
                            restart_count: 0,
                            last_error: None,
                        }
                    });
                ServerReport {
                    name: def.name.clone(),
                    state: status.state,
                    health: status.health,
                    restart_count: status.restart_count,
                    error,
                    skipped: was_skipped,
                }
            })
            .collect();

        OrchestrationResult { action, reports }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerFile;

    fn orchestrator_from(yaml: &str) -> Orchestrator {
        Orchestrator::new(ServerFile::load_from_string(yaml).unwrap()).unwrap()
    }

    #[test]
    fn test_lost_instance_reported_as_failure() {
        let mut orchestrator = orchestrator_from(
            r#"
servers:
  - { name: worker, command: "x" }
"#,
        );
        let selected: HashSet<ServerName> =
            orchestrator.definitions.iter().map(|d| d.name.clone()).collect();
        let subset = orchestrator.subset_in_declaration_order(&selected);

        // Simulate a member task that never gave its instance back.
        orchestrator.registry.remove(&ServerName::from("worker"));

        let result = orchestrator.build_result(
            Action::Start,
            &subset,
            HashMap::new(),
            HashMap::new(),
        );
        assert!(!result.all_succeeded());
        let report = &result.reports[0];
        assert_eq!(report.state, ServerState::Failed);
        assert!(report.error.is_some(), "a lost instance must carry an error");
        assert!(!report.skipped);
    }
}
