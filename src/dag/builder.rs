//! DAG builder for constructing the phase graph.
//!
//! The builder takes phases with their dependencies and group ids, validates
//! the structure, and produces an immutable [`PhaseGraph`].

use super::ParallelGroup;
use crate::errors::GraphError;
use crate::phase::Phase;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Index into the phase list (declaration order).
pub type PhaseIndex = usize;

/// A validated directed acyclic graph of phases.
#[derive(Debug, Clone)]
pub struct PhaseGraph {
    phases: Vec<Phase>,
    index_map: HashMap<String, PhaseIndex>,
    /// index -> phases that depend on it
    forward_edges: Vec<Vec<PhaseIndex>>,
    /// index -> phases it depends on
    reverse_edges: Vec<Vec<PhaseIndex>>,
    /// Groups in order of their first member's declaration.
    groups: Vec<ParallelGroup>,
}

impl PhaseGraph {
    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn phase(&self, name: &str) -> Option<&Phase> {
        self.index_map.get(name).and_then(|&i| self.phases.get(i))
    }

    pub fn get_index(&self, name: &str) -> Option<PhaseIndex> {
        self.index_map.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_map.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.phases.iter().map(|p| p.name.as_str())
    }

    /// Phases that depend directly on the phase at `index`.
    pub fn dependents(&self, index: PhaseIndex) -> &[PhaseIndex] {
        self.forward_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    /// Phases the phase at `index` depends on directly.
    pub fn dependencies(&self, index: PhaseIndex) -> &[PhaseIndex] {
        self.reverse_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    pub fn groups(&self) -> &[ParallelGroup] {
        &self.groups
    }

    pub fn group(&self, id: &str) -> Option<&ParallelGroup> {
        self.groups.iter().find(|g| g.id == id)
    }

    /// True iff every dependency of `name` is in `completed`.
    pub fn dependencies_satisfied(&self, name: &str, completed: &HashSet<String>) -> bool {
        self.phase(name)
            .is_some_and(|p| p.depends_on.iter().all(|dep| completed.contains(dep)))
    }

    /// Topological check over the whole graph (Kahn's algorithm).
    pub fn validate_acyclic(&self) -> Result<(), GraphError> {
        self.kahn().map(|_| ())
    }

    /// Phase names in a dependency-respecting order; ties keep declaration order.
    pub fn topological_order(&self) -> Vec<&str> {
        // Built graphs are acyclic, so the fallback is never taken.
        match self.kahn() {
            Ok(order) => order
                .into_iter()
                .map(|i| self.phases[i].name.as_str())
                .collect(),
            Err(_) => self.names().collect(),
        }
    }

    fn kahn(&self) -> Result<Vec<PhaseIndex>, GraphError> {
        let mut in_degree: Vec<usize> = self.reverse_edges.iter().map(Vec::len).collect();
        let mut queue: BTreeSet<PhaseIndex> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, deg)| *deg == 0)
            .map(|(i, _)| i)
            .collect();

        let mut order = Vec::with_capacity(self.len());
        while let Some(node) = queue.pop_first() {
            order.push(node);
            for &dependent in self.dependents(node) {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.insert(dependent);
                }
            }
        }

        if order.len() != self.len() {
            let involved = in_degree
                .iter()
                .enumerate()
                .filter(|&(_, deg)| *deg > 0)
                .map(|(i, _)| self.phases[i].name.clone())
                .collect();
            return Err(GraphError::Cycle(involved));
        }
        Ok(order)
    }
}

/// Builder for constructing phase graphs.
#[derive(Debug, Default)]
pub struct DagBuilder {
    phases: Vec<Phase>,
}

impl DagBuilder {
    pub fn new(phases: Vec<Phase>) -> Self {
        Self { phases }
    }

    /// Declare a phase by name and dependencies.
    pub fn add_phase(self, name: &str, depends_on: &[&str]) -> Self {
        let deps = depends_on.iter().map(|d| d.to_string()).collect();
        self.add(Phase::new(name, "", deps))
    }

    pub fn add(mut self, phase: Phase) -> Self {
        self.phases.push(phase);
        self
    }

    /// Build the phase graph, rejecting:
    /// - phase names and group ids that are not a single safe path segment
    /// - duplicate phase names
    /// - dependencies on phases that do not exist
    /// - cycles
    /// - groups whose members depend on each other or differ in dependencies
    /// - non-blocking phases that other phases depend on
    pub fn build(self) -> Result<PhaseGraph, GraphError> {
        let mut index_map = HashMap::new();
        for (i, phase) in self.phases.iter().enumerate() {
            check_name("phase", &phase.name)?;
            if let Some(group) = &phase.group {
                check_name("group", group)?;
            }
            if index_map.insert(phase.name.clone(), i).is_some() {
                return Err(GraphError::DuplicatePhase(phase.name.clone()));
            }
        }

        let mut forward_edges: Vec<Vec<PhaseIndex>> = vec![Vec::new(); self.phases.len()];
        let mut reverse_edges: Vec<Vec<PhaseIndex>> = vec![Vec::new(); self.phases.len()];
        for (to_idx, phase) in self.phases.iter().enumerate() {
            for dep in &phase.depends_on {
                let from_idx =
                    *index_map
                        .get(dep)
                        .ok_or_else(|| GraphError::UnknownDependency {
                            phase: phase.name.clone(),
                            dependency: dep.clone(),
                        })?;
                if !reverse_edges[to_idx].contains(&from_idx) {
                    forward_edges[from_idx].push(to_idx);
                    reverse_edges[to_idx].push(from_idx);
                }
            }
        }

        for phase in &self.phases {
            if !phase.non_blocking {
                continue;
            }
            let idx = index_map[&phase.name];
            if let Some(&dependent) = forward_edges[idx].first() {
                return Err(GraphError::NonBlockingDependency {
                    phase: phase.name.clone(),
                    dependent: self.phases[dependent].name.clone(),
                });
            }
        }

        let groups = collect_groups(&self.phases)?;

        let graph = PhaseGraph {
            phases: self.phases,
            index_map,
            forward_edges,
            reverse_edges,
            groups,
        };
        graph.validate_acyclic()?;
        Ok(graph)
    }
}

/// Names become file names under `.conductor/`, so they must be one plain segment.
fn check_name(kind: &'static str, name: &str) -> Result<(), GraphError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(GraphError::InvalidPhaseName {
            kind,
            name: name.to_string(),
        })
    }
}

fn collect_groups(phases: &[Phase]) -> Result<Vec<ParallelGroup>, GraphError> {
    let mut groups: Vec<ParallelGroup> = Vec::new();
    for phase in phases {
        let Some(id) = phase.group.as_deref() else {
            continue;
        };
        match groups.iter_mut().find(|g| g.id == id) {
            Some(group) => {
                let mut mine: Vec<&String> = phase.depends_on.iter().collect();
                let mut theirs: Vec<&String> = group.depends_on.iter().collect();
                mine.sort();
                mine.dedup();
                theirs.sort();
                theirs.dedup();
                if mine != theirs {
                    return Err(GraphError::MismatchedGroupDependencies {
                        group: id.to_string(),
                        first: group.members[0].clone(),
                        second: phase.name.clone(),
                    });
                }
                group.members.push(phase.name.clone());
            }
            None => groups.push(ParallelGroup {
                id: id.to_string(),
                members: vec![phase.name.clone()],
                depends_on: phase.depends_on.clone(),
            }),
        }
    }

    // Members share one dependency list, so naming a sibling in it means every
    // member depends on that sibling.
    for group in &groups {
        if let Some(dep) = group.depends_on.iter().find(|d| group.members.contains(d)) {
            return Err(GraphError::IntraGroupDependency {
                group: group.id.clone(),
                phase: group.members[0].clone(),
                dependency: dep.clone(),
            });
        }
    }
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference() -> PhaseGraph {
        DagBuilder::new(crate::phase::default_pipeline())
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_reference_pipeline() {
        let graph = reference();
        assert_eq!(graph.len(), 5);
        assert_eq!(graph.groups().len(), 1);
        let research = graph.group("research").unwrap();
        assert_eq!(research.members, vec!["phase2a", "phase2b", "phase2c"]);
        assert_eq!(research.depends_on, vec!["phase1"]);
    }

    #[test]
    fn test_dependencies_and_dependents() {
        let graph = DagBuilder::default()
            .add_phase("a", &[])
            .add_phase("b", &["a"])
            .add_phase("c", &["a"])
            .build()
            .unwrap();
        assert!(graph.dependencies(0).is_empty());
        assert_eq!(graph.dependencies(1), &[0]);
        let dependents = graph.dependents(0);
        assert!(dependents.contains(&1));
        assert!(dependents.contains(&2));
    }

    #[test]
    fn test_rejects_names_unusable_as_file_names() {
        for name in ["", "../../../escaped", "a/b", "with space", "dot.ted"] {
            let err = DagBuilder::default().add_phase(name, &[]).build().unwrap_err();
            assert!(
                matches!(err, GraphError::InvalidPhaseName { kind: "phase", name: ref n } if n == name),
                "{name:?} was accepted"
            );
        }
    }

    #[test]
    fn test_rejects_unsafe_group_id() {
        let err = DagBuilder::default()
            .add(Phase::new("a", "", vec![]).with_group("../research"))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            GraphError::InvalidPhaseName { kind: "group", ref name } if name == "../research"
        ));
    }

    #[test]
    fn test_cycle_detection_names_phases() {
        let err = DagBuilder::default()
            .add_phase("a", &["c"])
            .add_phase("b", &["a"])
            .add_phase("c", &["b"])
            .add_phase("d", &[])
            .build()
            .unwrap_err();
        match err {
            GraphError::Cycle(involved) => {
                assert_eq!(involved.len(), 3);
                assert!(!involved.contains(&"d".to_string()));
            }
            other => panic!("expected cycle, got {other}"),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let err = DagBuilder::default()
            .add_phase("a", &["a"])
            .build()
            .unwrap_err();
        assert!(matches!(err, GraphError::Cycle(_)));
    }

    #[test]
    fn test_unknown_dependency() {
        let err = DagBuilder::default()
            .add_phase("a", &["nonexistent"])
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("nonexistent"));
    }

    #[test]
    fn test_duplicate_phase_name() {
        let err = DagBuilder::default()
            .add_phase("a", &[])
            .add_phase("a", &[])
            .build()
            .unwrap_err();
        assert_eq!(err, GraphError::DuplicatePhase("a".into()));
    }

    #[test]
    fn test_group_with_mismatched_dependencies() {
        let err = DagBuilder::default()
            .add(Phase::new("root", "", vec![]))
            .add(Phase::new("other", "", vec![]))
            .add(Phase::new("x", "", vec!["root".into()]).with_group("g"))
            .add(Phase::new("y", "", vec!["other".into()]).with_group("g"))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            GraphError::MismatchedGroupDependencies { .. }
        ));
    }

    #[test]
    fn test_group_with_intra_group_dependency() {
        let err = DagBuilder::default()
            .add(Phase::new("x", "", vec!["y".into()]).with_group("g"))
            .add(Phase::new("y", "", vec!["y".into()]).with_group("g"))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            GraphError::IntraGroupDependency { ref dependency, .. } if dependency == "y"
        ));
    }

    #[test]
    fn test_non_blocking_phase_cannot_have_dependents() {
        let err = DagBuilder::default()
            .add(Phase::new("lint", "", vec![]).non_blocking())
            .add(Phase::new("ship", "", vec!["lint".into()]))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            GraphError::NonBlockingDependency {
                phase: "lint".into(),
                dependent: "ship".into()
            }
        );
    }

    #[test]
    fn test_topological_order_keeps_declaration_ties() {
        let graph = reference();
        assert_eq!(
            graph.topological_order(),
            vec!["phase1", "phase2a", "phase2b", "phase2c", "phase3"]
        );
    }

    #[test]
    fn test_dependencies_satisfied() {
        let graph = reference();
        let mut completed = HashSet::new();
        assert!(graph.dependencies_satisfied("phase1", &completed));
        assert!(!graph.dependencies_satisfied("phase2a", &completed));
        completed.insert("phase1".to_string());
        assert!(graph.dependencies_satisfied("phase2a", &completed));
        assert!(!graph.dependencies_satisfied("phase3", &completed));
        assert!(!graph.dependencies_satisfied("missing", &completed));
    }

    #[test]
    fn test_empty_graph() {
        let graph = DagBuilder::default().build().unwrap();
        assert!(graph.is_empty());
        assert!(graph.validate_acyclic().is_ok());
    }
}
