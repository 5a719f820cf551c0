use crate::output::{print_json, print_table};
use crate::root::Host;
use bootgate_core::status::{status_path, StatusSnapshot};

pub fn run(host: &Host, json: bool) -> anyhow::Result<()> {
    let path = status_path(&host.config.state_dir(&host.root));
    let snapshot = StatusSnapshot::load(&path)?;

    if json {
        return print_json(&snapshot);
    }
    let Some(snapshot) = snapshot else {
        println!("No status recorded yet. Run `bootgate up` first.");
        return Ok(());
    };

    println!(
        "Host '{}' as of {}",
        snapshot.host,
        snapshot.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    let rows: Vec<Vec<String>> = snapshot
        .units
        .iter()
        .map(|u| {
            vec![
                u.name.clone(),
                u.state.to_string(),
                u.since.format("%H:%M:%S").to_string(),
                u.restarts.to_string(),
            ]
        })
        .collect();
    print_table(&["UNIT", "STATE", "SINCE", "RESTARTS"], &rows);
    Ok(())
}
