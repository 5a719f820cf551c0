//! One-shot database commands: `wait-ready`, `bootstrap-db`, `migrate`.

use crate::output::{print_json, print_table};
use crate::root::Host;
use anyhow::Context;
use bootgate_core::bootstrap::{BootstrapReport, StepOutcome};
use bootgate_core::launch::HostContext;
use bootgate_core::probe::Ready;

fn host_context(host: &Host) -> anyhow::Result<HostContext> {
    let secrets = host
        .config
        .load_secrets(&host.root)
        .context("failed to load secrets")?;
    Ok(host.config.host_context(&host.root, secrets))
}

fn ready_json(ready: &Ready) -> serde_json::Value {
    serde_json::json!({ "target": ready.target(), "attempts": ready.attempts() })
}

fn print_ready(ready: &Ready) {
    println!(
        "Database at {} ready after {} attempt(s).",
        ready.target(),
        ready.attempts()
    );
}

fn print_report(report: &BootstrapReport) {
    let rows: Vec<Vec<String>> = report
        .steps
        .iter()
        .map(|s| {
            let outcome = match &s.outcome {
                StepOutcome::Applied => "applied".to_string(),
                StepOutcome::AlreadySatisfied => "already satisfied".to_string(),
                StepOutcome::Tolerated { reason } => format!("tolerated: {reason}"),
            };
            vec![s.step.clone(), outcome]
        })
        .collect();
    print_table(&["STEP", "OUTCOME"], &rows);
    println!(
        "Role '{}' bootstrapped ({} change(s) applied).",
        report.role,
        report.applied_count()
    );
}

// ---------------------------------------------------------------------------
// wait-ready
// ---------------------------------------------------------------------------

pub fn wait_ready(host: &Host, json: bool) -> anyhow::Result<()> {
    let ctx = host_context(host)?;
    let rt = tokio::runtime::Runtime::new()?;
    let ready = rt.block_on(ctx.wait_ready())?;
    if json {
        print_json(&ready_json(&ready))
    } else {
        print_ready(&ready);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// bootstrap-db
// ---------------------------------------------------------------------------

pub fn bootstrap(host: &Host, json: bool) -> anyhow::Result<()> {
    let ctx = host_context(host)?;
    let rt = tokio::runtime::Runtime::new()?;
    let done = rt.block_on(ctx.bootstrap()).context("bootstrap failed")?;
    let report = done.into_report();
    if json {
        print_json(&report)
    } else {
        print_report(&report);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// migrate
// ---------------------------------------------------------------------------

/// Probe, bootstrap and apply in one go; each stage gates the next.
pub fn migrate(host: &Host, json: bool) -> anyhow::Result<()> {
    let ctx = host_context(host)?;
    let rt = tokio::runtime::Runtime::new()?;
    let (ready, done, migration) = rt.block_on(async {
        let ready = ctx.wait_ready().await?;
        let done = ctx.bootstrap().await.context("bootstrap failed")?;
        let migration = ctx
            .migrate(&ready, &done)
            .await
            .context("migration failed")?;
        Ok::<_, anyhow::Error>((ready, done, migration))
    })?;

    if json {
        print_json(&serde_json::json!({
            "ready": ready_json(&ready),
            "bootstrap": done.report(),
            "migration": migration,
        }))
    } else {
        print_ready(&ready);
        print_report(done.report());
        println!(
            "Migrations applied with {} in {} ms.",
            migration.program, migration.duration_ms
        );
        Ok(())
    }
}
