//! Diff the desired unit graph against the last observed status snapshot.

use crate::graph::UnitGraph;
use crate::status::StatusSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlanStep {
    /// Desired but never observed.
    Add { unit: String },
    /// Observed but no longer desired.
    Remove { unit: String },
    /// Observed with a different definition.
    Replace {
        unit: String,
        observed: String,
        desired: String,
    },
    Keep { unit: String },
}

impl PlanStep {
    pub fn unit(&self) -> &str {
        match self {
            PlanStep::Add { unit }
            | PlanStep::Remove { unit }
            | PlanStep::Replace { unit, .. }
            | PlanStep::Keep { unit } => unit,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PlanStep::Add { .. } => "add",
            PlanStep::Remove { .. } => "remove",
            PlanStep::Replace { .. } => "replace",
            PlanStep::Keep { .. } => "keep",
        }
    }

    pub fn is_change(&self) -> bool {
        !matches!(self, PlanStep::Keep { .. })
    }
}

/// Desired units in start order, followed by removals in observed order.
pub fn plan(desired: &UnitGraph, observed: Option<&StatusSnapshot>) -> Vec<PlanStep> {
    let mut steps = Vec::with_capacity(desired.len());
    for unit in desired.units() {
        let fingerprint = unit.fingerprint();
        let step = match observed.and_then(|s| s.unit(&unit.name)) {
            None => PlanStep::Add {
                unit: unit.name.clone(),
            },
            Some(seen) if seen.fingerprint == fingerprint => PlanStep::Keep {
                unit: unit.name.clone(),
            },
            Some(seen) => PlanStep::Replace {
                unit: unit.name.clone(),
                observed: seen.fingerprint.clone(),
                desired: fingerprint,
            },
        };
        steps.push(step);
    }

    if let Some(snapshot) = observed {
        let wanted: HashSet<&str> = desired.units().iter().map(|u| u.name.as_str()).collect();
        steps.extend(
            snapshot
                .units
                .iter()
                .filter(|u| !wanted.contains(u.name.as_str()))
                .map(|u| PlanStep::Remove {
                    unit: u.name.clone(),
                }),
        );
    }
    steps
}
