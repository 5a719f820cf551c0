use crate::output::{print_json, print_table};
use crate::root::Host;
use anyhow::Context;
use bootgate_core::config::WarnLevel;
use bootgate_core::launch::HostLauncher;
use bootgate_core::reconcile;
use bootgate_core::status::{status_path, StatusSnapshot};
use bootgate_core::supervisor::Supervisor;
use std::sync::Arc;
use tokio::sync::watch;

pub fn run(host: &Host, json: bool) -> anyhow::Result<()> {
    let errors: Vec<String> = host
        .config
        .validate()
        .into_iter()
        .filter(|w| w.level == WarnLevel::Error)
        .map(|w| w.message)
        .collect();
    if !errors.is_empty() {
        for message in &errors {
            eprintln!("[error] {message}");
        }
        anyhow::bail!("config validation found errors; refusing to start");
    }

    let graph = host.config.graph().context("invalid unit graph")?;
    let state_dir = host.config.state_dir(&host.root);
    let path = status_path(&state_dir);

    let observed = match StatusSnapshot::load(&path) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable status snapshot");
            None
        }
    };
    for step in reconcile::plan(&graph, observed.as_ref()) {
        if step.is_change() {
            tracing::info!(unit = %step.unit(), action = step.label(), "reconcile");
        }
    }

    let secrets = host
        .config
        .load_secrets(&host.root)
        .context("failed to load secrets")?;
    secrets
        .require_all(&host.config.secret_names())
        .context("refusing to start")?;
    let launcher = Arc::new(HostLauncher::new(
        host.config.host_context(&host.root, secrets),
    ));
    std::fs::create_dir_all(&state_dir)
        .with_context(|| format!("cannot create {}", state_dir.display()))?;

    let rt = tokio::runtime::Runtime::new()?;
    let (summary, snapshot) = rt.block_on(async {
        let supervisor = Supervisor::new(&host.config.host.name, graph, launcher);
        let board = supervisor.board();
        let persister = board.spawn_persister(path.clone());

        let (stop_tx, stop_rx) = watch::channel(false);
        let signal = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
                let _ = stop_tx.send(true);
            }
        });

        let summary = supervisor.run(stop_rx).await;
        signal.abort();
        persister.abort();

        let snapshot = board.snapshot();
        snapshot.save(&path)?;
        Ok::<_, anyhow::Error>((summary, snapshot))
    })?;

    if json {
        print_json(&snapshot)?;
    } else {
        let rows: Vec<Vec<String>> = snapshot
            .units
            .iter()
            .map(|u| vec![u.name.clone(), u.state.to_string()])
            .collect();
        print_table(&["UNIT", "STATE"], &rows);
    }

    let fatal = summary.fatal_units();
    let blocked = summary.blocked_units();
    if !fatal.is_empty() {
        anyhow::bail!(
            "unit(s) failed: {}; blocked: {}",
            fatal.join(", "),
            if blocked.is_empty() {
                "none".to_string()
            } else {
                blocked.join(", ")
            }
        );
    }
    if !blocked.is_empty() {
        anyhow::bail!("unit(s) blocked: {}", blocked.join(", "));
    }
    Ok(())
}
