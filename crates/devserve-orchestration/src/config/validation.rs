//! Validation of server definitions.
//!
//! Runs before anything spawns; a validation failure is never partially
//! applied. Missing dependencies are reported distinctly from cycles,
//! and cycle detection is only attempted once every named dependency
//! actually exists.

use super::{CommandSpec, ServerDefinition};
use crate::plan;
use devserve_common::{ConfigError, ConfigResult, ServerName};
use std::collections::HashSet;

/// Structured validation outcome, exposed to callers that want the full
/// picture rather than the first error (the `validate` operation).
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub duplicate_names: Vec<ServerName>,
    /// `(referrer, missing)` pairs.
    pub missing_dependencies: Vec<(ServerName, ServerName)>,
    /// Servers participating in a dependency cycle, if any.
    pub cycle: Vec<ServerName>,
    /// Everything else (bad names, empty commands, bad health checks).
    pub other: Vec<ConfigError>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.duplicate_names.is_empty()
            && self.missing_dependencies.is_empty()
            && self.cycle.is_empty()
            && self.other.is_empty()
    }

    /// Every problem as a flat error list, in validation order.
    pub fn problems(&self) -> Vec<ConfigError> {
        let mut problems: Vec<ConfigError> = self.other.clone();
        problems.extend(
            self.duplicate_names
                .iter()
                .cloned()
                .map(|name| ConfigError::DuplicateName { name }),
        );
        problems.extend(
            self.missing_dependencies
                .iter()
                .cloned()
                .map(|(referrer, missing)| ConfigError::MissingDependency { referrer, missing }),
        );
        if !self.cycle.is_empty() {
            problems.push(ConfigError::Cycle {
                names: self.cycle.clone(),
            });
        }
        problems
    }

    /// The first error, in validation order, for fail-fast callers.
    pub fn into_first_error(self) -> Option<ConfigError> {
        if let Some(err) = self.other.into_iter().next() {
            return Some(err);
        }
        if let Some(name) = self.duplicate_names.into_iter().next() {
            return Some(ConfigError::DuplicateName { name });
        }
        if let Some((referrer, missing)) = self.missing_dependencies.into_iter().next() {
            return Some(ConfigError::MissingDependency { referrer, missing });
        }
        if !self.cycle.is_empty() {
            return Some(ConfigError::Cycle { names: self.cycle });
        }
        None
    }
}

/// Validate a set of definitions, failing on the first problem.
pub fn validate_definitions(definitions: &[ServerDefinition]) -> ConfigResult<()> {
    match check_definitions(definitions).into_first_error() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Validate a set of definitions, collecting every problem.
pub fn check_definitions(definitions: &[ServerDefinition]) -> ValidationReport {
    let mut report = ValidationReport::default();

    if definitions.is_empty() {
        report
            .other
            .push(ConfigError::invalid("At least one server must be defined"));
        return report;
    }

    let mut seen: HashSet<&ServerName> = HashSet::new();
    for def in definitions {
        if !seen.insert(&def.name) {
            report.duplicate_names.push(def.name.clone());
        }
        validate_definition(def, &mut report);
    }

    for def in definitions {
        for dep in &def.depends_on {
            if dep == &def.name {
                report
                    .other
                    .push(ConfigError::self_dependency(def.name.clone()));
            } else if !seen.contains(dep) {
                report
                    .missing_dependencies
                    .push((def.name.clone(), dep.clone()));
            }
        }
    }

    // A cycle check over a graph with dangling or duplicate edges would
    // produce confusing secondary errors; only run it on a sound graph.
    if report.duplicate_names.is_empty()
        && report.missing_dependencies.is_empty()
        && report.other.is_empty()
    {
        if let Err(ConfigError::Cycle { names }) = plan::resolve(definitions) {
            report.cycle = names;
        }
    }

    report
}

fn validate_definition(def: &ServerDefinition, report: &mut ValidationReport) {
    let name = def.name.as_str();

    if name.is_empty() {
        report
            .other
            .push(ConfigError::invalid("Server name cannot be empty"));
    } else if name.len() > 64 {
        report.other.push(ConfigError::invalid(format!(
            "Server name too long (max 64 characters): {}",
            name
        )));
    } else if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        report.other.push(ConfigError::invalid(format!(
            "Server name may only contain alphanumerics, hyphens, and underscores: {}",
            name
        )));
    }

    let command_empty = match &def.command {
        CommandSpec::Shell(line) => line.trim().is_empty(),
        CommandSpec::Argv(argv) => argv.is_empty() || argv[0].trim().is_empty(),
    };
    if command_empty {
        report.other.push(ConfigError::invalid(format!(
            "Server '{}' has an empty command",
            name
        )));
    }

    if let Err(err) = def.health_policy() {
        report.other.push(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerFile;

    fn defs(yaml: &str) -> Vec<ServerDefinition> {
        let file: ServerFile = serde_yaml::from_str(yaml).unwrap();
        file.servers
    }

    #[test]
    fn test_duplicate_names_reported() {
        let report = check_definitions(&defs(
            r#"
servers:
  - { name: a, command: "x" }
  - { name: a, command: "y" }
"#,
        ));
        assert_eq!(report.duplicate_names, vec![ServerName::from("a")]);
        assert!(matches!(
            report.into_first_error(),
            Some(ConfigError::DuplicateName { .. })
        ));
    }

    #[test]
    fn test_missing_dependency_distinct_from_cycle() {
        let report = check_definitions(&defs(
            r#"
servers:
  - { name: api, command: "x", depends_on: [database] }
"#,
        ));
        assert_eq!(
            report.missing_dependencies,
            vec![(ServerName::from("api"), ServerName::from("database"))]
        );
        // No cycle check attempted on an unsound graph.
        assert!(report.cycle.is_empty());
    }

    #[test]
    fn test_self_dependency_rejected() {
        let err = validate_definitions(&defs(
            r#"
servers:
  - { name: a, command: "x", depends_on: [a] }
"#,
        ))
        .unwrap_err();
        assert_eq!(err, ConfigError::self_dependency("a"));
    }

    #[test]
    fn test_cycle_reported_with_names() {
        let report = check_definitions(&defs(
            r#"
servers:
  - { name: a, command: "x", depends_on: [b] }
  - { name: b, command: "y", depends_on: [a] }
"#,
        ));
        assert_eq!(
            report.cycle,
            vec![ServerName::from("a"), ServerName::from("b")]
        );
    }

    #[test]
    fn test_bad_name_charset() {
        let report = check_definitions(&defs(
            r#"
servers:
  - { name: "a b", command: "x" }
"#,
        ));
        assert!(!report.is_ok());
        assert!(report.other[0].to_string().contains("alphanumerics"));
    }

    #[test]
    fn test_valid_graph_passes() {
        assert!(validate_definitions(&defs(
            r#"
servers:
  - { name: database, command: "x" }
  - { name: api, command: "y", depends_on: [database] }
  - { name: frontend, command: "z", depends_on: [api] }
"#,
        ))
        .is_ok());
    }
}
