//! Readiness queries: which phases (or groups) may run given a completed set.

use super::PhaseGraph;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::fmt;

/// A named set of mutually independent phases sharing identical dependencies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParallelGroup {
    pub id: String,
    /// Member names in declaration order.
    pub members: Vec<String>,
    pub depends_on: Vec<String>,
}

/// One schedulable unit: a single phase or the runnable members of a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadyUnit {
    Single(String),
    Group(ParallelGroup),
}

impl ReadyUnit {
    /// Phase names this unit runs.
    pub fn phases(&self) -> Vec<String> {
        match self {
            Self::Single(name) => vec![name.clone()],
            Self::Group(group) => group.members.clone(),
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, Self::Group(_))
    }
}

impl fmt::Display for ReadyUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(name) => f.write_str(name),
            Self::Group(group) => write!(f, "{} [{}]", group.id, group.members.join(", ")),
        }
    }
}

impl PhaseGraph {
    /// Units whose every dependency is in `completed`, excluding completed phases.
    pub fn ready_phases(&self, completed: &HashSet<String>) -> Vec<ReadyUnit> {
        let candidates: HashSet<String> = self
            .names()
            .filter(|name| !completed.contains(*name))
            .map(str::to_string)
            .collect();
        self.ready_among(completed, &candidates)
    }

    /// Like [`ready_phases`](Self::ready_phases), restricted to `candidates`.
    ///
    /// A group is returned once, as one unit, listing only its candidate
    /// members. Units come out in declaration order of their first phase.
    pub fn ready_among(
        &self,
        completed: &HashSet<String>,
        candidates: &HashSet<String>,
    ) -> Vec<ReadyUnit> {
        let mut units = Vec::new();
        let mut seen_groups: HashSet<&str> = HashSet::new();

        for phase in self.phases() {
            if !candidates.contains(&phase.name)
                || !self.dependencies_satisfied(&phase.name, completed)
            {
                continue;
            }
            match phase.group.as_deref().and_then(|id| self.group(id)) {
                Some(group) => {
                    if !seen_groups.insert(group.id.as_str()) {
                        continue;
                    }
                    let members = group
                        .members
                        .iter()
                        .filter(|m| candidates.contains(*m))
                        .cloned()
                        .collect();
                    units.push(ReadyUnit::Group(ParallelGroup {
                        id: group.id.clone(),
                        members,
                        depends_on: group.depends_on.clone(),
                    }));
                }
                None => units.push(ReadyUnit::Single(phase.name.clone())),
            }
        }
        units
    }

    /// Waves of phases that could run together if everything succeeded.
    pub fn compute_waves(&self) -> Vec<Vec<String>> {
        let mut waves = Vec::new();
        let mut completed: HashSet<String> = HashSet::new();

        loop {
            let ready: Vec<String> = self
                .names()
                .filter(|name| {
                    !completed.contains(*name) && self.dependencies_satisfied(name, &completed)
                })
                .map(str::to_string)
                .collect();

            if ready.is_empty() {
                break;
            }
            completed.extend(ready.iter().cloned());
            waves.push(ready);
        }
        waves
    }

    /// Every phase that depends on `name`, directly or transitively, in
    /// declaration order.
    pub fn transitive_dependents(&self, name: &str) -> Vec<String> {
        let Some(start) = self.get_index(name) else {
            return Vec::new();
        };
        let mut reached = vec![false; self.len()];
        let mut queue = VecDeque::from([start]);
        while let Some(idx) = queue.pop_front() {
            for &dependent in self.dependents(idx) {
                if !reached[dependent] {
                    reached[dependent] = true;
                    queue.push_back(dependent);
                }
            }
        }
        self.phases()
            .iter()
            .enumerate()
            .filter(|(i, _)| reached[*i])
            .map(|(_, p)| p.name.clone())
            .collect()
    }
}
