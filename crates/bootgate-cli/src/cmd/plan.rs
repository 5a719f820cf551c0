use crate::output::{print_json, print_table};
use crate::root::Host;
use anyhow::Context;
use bootgate_core::reconcile::{self, PlanStep};
use bootgate_core::status::{status_path, StatusSnapshot};

pub fn run(host: &Host, json: bool) -> anyhow::Result<()> {
    let graph = host.config.graph().context("invalid unit graph")?;
    let observed = StatusSnapshot::load(&status_path(&host.config.state_dir(&host.root)))?;
    let steps = reconcile::plan(&graph, observed.as_ref());

    if json {
        return print_json(&steps);
    }
    let rows: Vec<Vec<String>> = steps
        .iter()
        .map(|s| {
            let detail = match s {
                PlanStep::Replace {
                    observed, desired, ..
                } => format!("{} -> {}", short(observed), short(desired)),
                _ => String::new(),
            };
            vec![s.label().to_string(), s.unit().to_string(), detail]
        })
        .collect();
    print_table(&["ACTION", "UNIT", "FINGERPRINT"], &rows);

    let changes = steps.iter().filter(|s| s.is_change()).count();
    if changes == 0 {
        println!("No changes.");
    } else {
        println!("{changes} change(s).");
    }
    Ok(())
}

fn short(fingerprint: &str) -> &str {
    fingerprint.get(..12).unwrap_or(fingerprint)
}
