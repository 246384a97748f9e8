//! Dependency resolution: turning `depends_on` edges into a StartPlan.
//!
//! A StartPlan is an ordered sequence of start-groups. Every member of a
//! group has all of its dependencies in strictly earlier groups, so the
//! members of one group may start concurrently. Stop order is the
//! reverse of the start plan, which guarantees dependents stop before
//! the servers they depend on.

use crate::config::ServerDefinition;
use devserve_common::{ConfigError, ConfigResult, ServerName};
use std::collections::{HashMap, HashSet};

/// Ordered sequence of start-groups, consumed by one orchestration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartPlan {
    groups: Vec<Vec<ServerName>>,
}

impl StartPlan {
    pub fn groups(&self) -> &[Vec<ServerName>] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Total number of servers across all groups.
    pub fn server_count(&self) -> usize {
        self.groups.iter().map(Vec::len).sum()
    }

    /// The reversed plan, used for stopping: dependents first.
    pub fn reverse(&self) -> StartPlan {
        StartPlan {
            groups: self.groups.iter().rev().cloned().collect(),
        }
    }
}

/// Compute a StartPlan for the given definitions.
///
/// Kahn's algorithm over in-degrees: each pass extracts every node with
/// no unresolved dependencies as the next group. Ties within a group
/// keep declaration order, so plans are deterministic. If a pass
/// extracts nothing while nodes remain, the remainder contains a cycle
/// and resolution fails atomically with the participating names; no
/// partial plan is ever returned.
///
/// `depends_on` entries naming servers absent from `definitions` are
/// ignored here; the full-scope validation pass reports them before any
/// plan is computed, and subset plans legitimately reference servers
/// outside the subset.
pub fn resolve(definitions: &[ServerDefinition]) -> ConfigResult<StartPlan> {
    let names: HashSet<&ServerName> = definitions.iter().map(|d| &d.name).collect();

    // In-degree counts only edges inside the definition set.
    let mut in_degree: HashMap<&ServerName, usize> = HashMap::new();
    let mut dependents: HashMap<&ServerName, Vec<&ServerName>> = HashMap::new();
    for def in definitions {
        let degree = def
            .depends_on
            .iter()
            .filter(|dep| names.contains(dep))
            .count();
        in_degree.insert(&def.name, degree);
        for dep in &def.depends_on {
            if names.contains(dep) {
                dependents.entry(dep).or_default().push(&def.name);
            }
        }
    }

    let mut groups: Vec<Vec<ServerName>> = Vec::new();
    let mut remaining: usize = definitions.len();

    while remaining > 0 {
        // Declaration-order scan keeps ties deterministic.
        let group: Vec<&ServerName> = definitions
            .iter()
            .map(|d| &d.name)
            .filter(|name| in_degree.get(name) == Some(&0))
            .collect();

        if group.is_empty() {
            let cycle = find_cycle(definitions, &in_degree);
            return Err(ConfigError::cycle(cycle));
        }

        for name in &group {
            in_degree.remove(name);
            if let Some(deps) = dependents.get(name) {
                for dependent in deps {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree -= 1;
                    }
                }
            }
        }

        remaining -= group.len();
        groups.push(group.into_iter().cloned().collect());
    }

    Ok(StartPlan { groups })
}

/// Walk dependency edges among the unresolved nodes until a node
/// repeats, then return the cycle that was closed.
fn find_cycle(
    definitions: &[ServerDefinition],
    unresolved: &HashMap<&ServerName, usize>,
) -> Vec<ServerName> {
    let by_name: HashMap<&ServerName, &ServerDefinition> =
        definitions.iter().map(|d| (&d.name, d)).collect();

    // Every unresolved node sits on or leads into a cycle, so a walk
    // from the first one (declaration order) must close a loop.
    let start = match definitions
        .iter()
        .map(|d| &d.name)
        .find(|n| unresolved.contains_key(n))
    {
        Some(name) => name,
        None => return Vec::new(),
    };

    let mut path: Vec<&ServerName> = Vec::new();
    let mut on_path: HashSet<&ServerName> = HashSet::new();
    let mut current = start;

    loop {
        if on_path.contains(current) {
            let cycle_start = path.iter().position(|n| *n == current).unwrap_or(0);
            return path[cycle_start..].iter().map(|n| (*n).clone()).collect();
        }
        path.push(current);
        on_path.insert(current);

        let def = match by_name.get(current) {
            Some(def) => def,
            None => return path.into_iter().cloned().collect(),
        };
        current = match def
            .depends_on
            .iter()
            .find(|dep| unresolved.contains_key(dep))
        {
            Some(dep) => dep,
            // Should not happen for unresolved nodes; bail with the path.
            None => return path.into_iter().cloned().collect(),
        };
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

    fn group_names(plan: &StartPlan, idx: usize) -> Vec<&str> {
        plan.groups()[idx].iter().map(|n| n.as_str()).collect()
    }

    #[test]
    fn test_linear_chain() {
        let plan = resolve(&defs(
            r#"
servers:
  - { name: database, command: "x" }
  - { name: api, command: "x", depends_on: [database] }
  - { name: frontend, command: "x", depends_on: [api] }
"#,
        ))
        .unwrap();
        assert_eq!(plan.groups().len(), 3);
        assert_eq!(group_names(&plan, 0), vec!["database"]);
        assert_eq!(group_names(&plan, 1), vec!["api"]);
        assert_eq!(group_names(&plan, 2), vec!["frontend"]);
    }

    #[test]
    fn test_diamond() {
        let plan = resolve(&defs(
            r#"
servers:
  - { name: base, command: "x" }
  - { name: left, command: "x", depends_on: [base] }
  - { name: right, command: "x", depends_on: [base] }
  - { name: top, command: "x", depends_on: [left, right] }
"#,
        ))
        .unwrap();
        assert_eq!(plan.groups().len(), 3);
        assert_eq!(group_names(&plan, 0), vec!["base"]);
        assert_eq!(group_names(&plan, 1), vec!["left", "right"]);
        assert_eq!(group_names(&plan, 2), vec!["top"]);
    }

    #[test]
    fn test_ties_keep_declaration_order() {
        let plan = resolve(&defs(
            r#"
servers:
  - { name: zeta, command: "x" }
  - { name: alpha, command: "x" }
  - { name: mid, command: "x" }
"#,
        ))
        .unwrap();
        assert_eq!(group_names(&plan, 0), vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_two_node_cycle() {
        let err = resolve(&defs(
            r#"
servers:
  - { name: a, command: "x", depends_on: [b] }
  - { name: b, command: "x", depends_on: [a] }
"#,
        ))
        .unwrap_err();
        match err {
            ConfigError::Cycle { names } => {
                assert_eq!(names, vec![ServerName::from("a"), ServerName::from("b")]);
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn test_cycle_behind_a_chain() {
        // `entry` leads into the b<->c cycle but is not part of it.
        let err = resolve(&defs(
            r#"
servers:
  - { name: entry, command: "x", depends_on: [b] }
  - { name: b, command: "x", depends_on: [c] }
  - { name: c, command: "x", depends_on: [b] }
"#,
        ))
        .unwrap_err();
        match err {
            ConfigError::Cycle { names } => {
                assert_eq!(names, vec![ServerName::from("b"), ServerName::from("c")]);
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn test_reverse_plan() {
        let plan = resolve(&defs(
            r#"
servers:
  - { name: database, command: "x" }
  - { name: api, command: "x", depends_on: [database] }
"#,
        ))
        .unwrap();
        let reversed = plan.reverse();
        assert_eq!(group_names(&reversed, 0), vec!["api"]);
        assert_eq!(group_names(&reversed, 1), vec!["database"]);
    }

    #[test]
    fn test_every_server_after_its_dependencies() {
        let definitions = defs(
            r#"
servers:
  - { name: a, command: "x" }
  - { name: b, command: "x", depends_on: [a] }
  - { name: c, command: "x", depends_on: [a, b] }
  - { name: d, command: "x" }
  - { name: e, command: "x", depends_on: [c, d] }
"#,
        );
        let plan = resolve(&definitions).unwrap();

        let group_of: HashMap<&str, usize> = plan
            .groups()
            .iter()
            .enumerate()
            .flat_map(|(i, group)| group.iter().map(move |n| (n.as_str(), i)))
            .collect();

        for def in &definitions {
            for dep in &def.depends_on {
                assert!(
                    group_of[dep.as_str()] < group_of[def.name.as_str()],
                    "{} must start after {}",
                    def.name,
                    dep
                );
            }
        }
        assert_eq!(plan.server_count(), definitions.len());
    }

    #[test]
    fn test_edges_outside_the_set_are_ignored() {
        // Subset planning: api's dependency on database is outside the
        // given slice and must not affect the plan.
        let plan = resolve(&defs(
            r#"
servers:
  - { name: api, command: "x", depends_on: [database] }
"#,
        ))
        .unwrap();
        assert_eq!(plan.groups().len(), 1);
        assert_eq!(group_names(&plan, 0), vec!["api"]);
    }
}
