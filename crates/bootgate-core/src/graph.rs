//! Startup dependency graph.
//!
//! Units form a directed acyclic graph of `requires` edges. Construction
//! rejects duplicates, unknown dependencies and cycles; the resulting order is
//! deterministic (ties keep declaration order).

use crate::error::{BootgateError, Result};
use crate::unit::UnitSpec;
use regex::Regex;
use std::collections::{HashMap, VecDeque};
use std::sync::OnceLock;

fn unit_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9_.-]{0,63}$").expect("valid regex"))
}

pub fn validate_unit_name(name: &str) -> Result<()> {
    if unit_name_re().is_match(name) {
        Ok(())
    } else {
        Err(BootgateError::InvalidConfig(format!(
            "invalid unit name '{name}': must be lowercase alphanumeric with '-', '_' or '.'"
        )))
    }
}

#[derive(Debug, Clone)]
pub struct UnitGraph {
    /// Units in topological order.
    units: Vec<UnitSpec>,
    index: HashMap<String, usize>,
}

impl UnitGraph {
    pub fn build(units: Vec<UnitSpec>) -> Result<Self> {
        let mut position: HashMap<&str, usize> = HashMap::new();
        for (i, unit) in units.iter().enumerate() {
            validate_unit_name(&unit.name)?;
            if position.insert(unit.name.as_str(), i).is_some() {
                return Err(BootgateError::DuplicateUnit(unit.name.clone()));
            }
        }

        let mut indegree = vec![0usize; units.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); units.len()];
        for (i, unit) in units.iter().enumerate() {
            for dep in &unit.requires {
                let &j = position.get(dep.as_str()).ok_or_else(|| {
                    BootgateError::UnknownDependency {
                        unit: unit.name.clone(),
                        dependency: dep.clone(),
                    }
                })?;
                if j == i {
                    return Err(BootgateError::DependencyCycle(format!(
                        "{0} -> {0}",
                        unit.name
                    )));
                }
                indegree[i] += 1;
                dependents[j].push(i);
            }
        }

        // Kahn's algorithm; the queue is seeded in declaration order.
        let mut queue: VecDeque<usize> = (0..units.len()).filter(|&i| indegree[i] == 0).collect();
        let mut order = Vec::with_capacity(units.len());
        while let Some(i) = queue.pop_front() {
            order.push(i);
            for &d in &dependents[i] {
                indegree[d] -= 1;
                if indegree[d] == 0 {
                    queue.push_back(d);
                }
            }
        }
        if order.len() != units.len() {
            let stuck: Vec<&str> = (0..units.len())
                .filter(|&i| indegree[i] > 0)
                .map(|i| units[i].name.as_str())
                .collect();
            return Err(BootgateError::DependencyCycle(stuck.join(", ")));
        }

        let mut slots: Vec<Option<UnitSpec>> = units.into_iter().map(Some).collect();
        let sorted: Vec<UnitSpec> = order
            .into_iter()
            .filter_map(|i| slots[i].take())
            .collect();
        let index = sorted
            .iter()
            .enumerate()
            .map(|(i, u)| (u.name.clone(), i))
            .collect();
        Ok(Self {
            units: sorted,
            index,
        })
    }

    /// Units in start order.
    pub fn units(&self) -> &[UnitSpec] {
        &self.units
    }

    pub fn get(&self, name: &str) -> Option<&UnitSpec> {
        self.index.get(name).map(|&i| &self.units[i])
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Group units into layers: every unit's predecessors sit in earlier
    /// layers, so units in one layer may start concurrently.
    pub fn layers(&self) -> Vec<Vec<&str>> {
        let mut depth = vec![0usize; self.units.len()];
        for (i, unit) in self.units.iter().enumerate() {
            let d = unit
                .requires
                .iter()
                .filter_map(|d| self.index.get(d))
                .map(|&j| depth[j] + 1)
                .max()
                .unwrap_or(0);
            depth[i] = d;
        }
        let max = depth.iter().copied().max().map(|m| m + 1).unwrap_or(0);
        let mut layers = vec![Vec::new(); max];
        for (i, unit) in self.units.iter().enumerate() {
            layers[depth[i]].push(unit.name.as_str());
        }
        layers
    }
}
