use crate::output::{print_json, print_table};
use crate::root::Host;
use anyhow::Context;
use serde::Serialize;

#[derive(Serialize)]
struct GraphEntry<'a> {
    name: &'a str,
    layer: usize,
    kind: bootgate_core::unit::UnitKind,
    action: String,
    requires: &'a [String],
}

pub fn run(host: &Host, json: bool) -> anyhow::Result<()> {
    let graph = host.config.graph().context("invalid unit graph")?;

    let mut entries = Vec::with_capacity(graph.len());
    for (layer, names) in graph.layers().into_iter().enumerate() {
        for name in names {
            let Some(unit) = graph.get(name) else { continue };
            entries.push(GraphEntry {
                name: &unit.name,
                layer,
                kind: unit.kind,
                action: unit.action.label(),
                requires: &unit.requires,
            });
        }
    }

    if json {
        return print_json(&entries);
    }
    let rows: Vec<Vec<String>> = entries
        .iter()
        .map(|e| {
            vec![
                e.layer.to_string(),
                e.name.to_string(),
                e.kind.as_str().to_string(),
                e.action.clone(),
                e.requires.join(", "),
            ]
        })
        .collect();
    print_table(&["LAYER", "UNIT", "KIND", "ACTION", "REQUIRES"], &rows);
    Ok(())
}
