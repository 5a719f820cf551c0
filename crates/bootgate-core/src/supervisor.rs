//! Dependency-ordered unit supervision.
//!
//! Every unit gets its own task and its own `watch` channel. A task first
//! waits until every predecessor releases it (a one-shot unit `Succeeded`, a
//! long-running unit `Running`), then launches its process. A predecessor that
//! can never release (fatal, blocked, stopped, or exited without restart)
//! leaves the unit `WaitingOnDependencies { blocked_by }` forever, which in
//! turn blocks its own dependents.
//!
//! Long-running units that exit are relaunched after `restart_sec` according
//! to their restart policy, and only once their predecessors release them
//! again. One-shot units never restart.

use crate::error::{ErrorClass, Result};
use crate::graph::UnitGraph;
use crate::status::StatusBoard;
use crate::unit::{UnitKind, UnitSpec, UnitState};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;

// ---------------------------------------------------------------------------
// Launcher
// ---------------------------------------------------------------------------

/// A started unit.
#[async_trait]
pub trait UnitProcess: Send {
    /// Wait for the unit to finish. `Ok(None)` means killed by a signal.
    /// Dropping the process must stop it.
    async fn wait(&mut self) -> Result<Option<i32>>;
}

/// Starts unit processes.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, unit: &UnitSpec) -> Result<Box<dyn UnitProcess>>;
}

// ---------------------------------------------------------------------------
// RunSummary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub states: BTreeMap<String, UnitState>,
}

impl RunSummary {
    pub fn fatal_units(&self) -> Vec<&str> {
        self.states
            .iter()
            .filter(|(_, s)| s.is_fatal())
            .map(|(n, _)| n.as_str())
            .collect()
    }

    pub fn blocked_units(&self) -> Vec<&str> {
        self.states
            .iter()
            .filter(|(_, s)| s.is_blocked())
            .map(|(n, _)| n.as_str())
            .collect()
    }

    /// No unit failed or was left blocked.
    pub fn is_success(&self) -> bool {
        self.fatal_units().is_empty() && self.blocked_units().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

pub struct Supervisor {
    graph: Arc<UnitGraph>,
    launcher: Arc<dyn Launcher>,
    board: StatusBoard,
}

impl Supervisor {
    pub fn new(host: &str, graph: UnitGraph, launcher: Arc<dyn Launcher>) -> Self {
        let board = StatusBoard::new(host, &graph);
        Self {
            graph: Arc::new(graph),
            launcher,
            board,
        }
    }

    pub fn board(&self) -> StatusBoard {
        self.board.clone()
    }

    /// Run every unit until all tasks finish. One-shot-only graphs finish on
    /// their own; long-running units run until `shutdown` flips to `true`.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> RunSummary {
        let channels: Vec<(watch::Sender<UnitState>, watch::Receiver<UnitState>)> = self
            .graph
            .units()
            .iter()
            .map(|_| watch::channel(UnitState::Pending))
            .collect();

        let mut tasks = JoinSet::new();
        for (i, (tx, _)) in channels.iter().enumerate() {
            let spec = self.graph.units()[i].clone();
            let predecessors: Vec<Predecessor> = spec
                .requires
                .iter()
                .filter_map(|dep| {
                    let j = self.graph.position(dep)?;
                    Some(Predecessor {
                        spec: self.graph.units()[j].clone(),
                        rx: channels[j].1.clone(),
                    })
                })
                .collect();
            let task = UnitTask {
                spec,
                state: UnitState::Pending,
                tx: tx.clone(),
                board: self.board.clone(),
                launcher: self.launcher.clone(),
                predecessors,
                shutdown: shutdown.clone(),
            };
            tasks.spawn(task.run());
        }
        drop(channels);

        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                tracing::error!(error = %e, "unit task panicked");
            }
        }

        let states = self
            .board
            .snapshot()
            .units
            .into_iter()
            .map(|u| (u.name, u.state))
            .collect();
        RunSummary { states }
    }
}

struct Predecessor {
    spec: UnitSpec,
    rx: watch::Receiver<UnitState>,
}

enum Gate {
    Released,
    Blocked(String),
    Shutdown,
}

struct UnitTask {
    spec: UnitSpec,
    state: UnitState,
    tx: watch::Sender<UnitState>,
    board: StatusBoard,
    launcher: Arc<dyn Launcher>,
    predecessors: Vec<Predecessor>,
    shutdown: watch::Receiver<bool>,
}

/// Resolves once shutdown is requested; never if the sender is gone.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn await_predecessors(preds: &mut [Predecessor], shutdown: &watch::Receiver<bool>) -> Gate {
    loop {
        for pred in preds.iter_mut() {
            let spec = &pred.spec;
            let mut stop = shutdown.clone();
            let waited = tokio::select! {
                res = pred.rx.wait_for(|s| spec.releases_dependents(s) || spec.blocks_dependents(s)) => {
                    res.map(|s| s.clone())
                }
                _ = shutdown_requested(&mut stop) => return Gate::Shutdown,
            };
            match waited {
                Ok(state) if !spec.blocks_dependents(&state) => {}
                // A predecessor stopped by shutdown is not a failure.
                _ if *shutdown.borrow() => return Gate::Shutdown,
                _ => return Gate::Blocked(spec.name.clone()),
            }
        }
        // A long-running predecessor may have dropped while we waited on
        // another one; start only if all are released right now.
        if preds
            .iter()
            .all(|p| p.spec.releases_dependents(&p.rx.borrow()))
        {
            return Gate::Released;
        }
    }
}

impl UnitTask {
    /// Record then publish, so the board always holds the release point
    /// before any dependent can observe it.
    fn transition(&mut self, to: UnitState) -> bool {
        if let Err(e) = UnitState::check_transition(&self.spec.name, self.spec.kind, &self.state, &to) {
            tracing::error!(unit = %self.spec.name, error = %e, "rejected transition");
            return false;
        }
        let releases = self.spec.releases_dependents(&to);
        self.board.record(&self.spec.name, &to, releases);
        tracing::info!(unit = %self.spec.name, state = %to, "unit state");
        self.state = to.clone();
        self.tx.send_replace(to);
        true
    }

    /// Enter `WaitingOnDependencies` and hold there until every predecessor
    /// releases this unit. `false` means the unit must not launch; the task
    /// has already moved to its final state.
    async fn pass_gate(&mut self) -> bool {
        self.transition(UnitState::WaitingOnDependencies { blocked_by: None });
        match await_predecessors(&mut self.predecessors, &self.shutdown).await {
            Gate::Released => true,
            Gate::Blocked(dep) => {
                tracing::warn!(unit = %self.spec.name, blocked_by = %dep, "dependency failed; unit will not start");
                self.transition(UnitState::WaitingOnDependencies {
                    blocked_by: Some(dep),
                });
                false
            }
            Gate::Shutdown => {
                self.transition(UnitState::Stopped);
                false
            }
        }
    }

    async fn run(mut self) {
        if !self.pass_gate().await {
            return;
        }
        match self.spec.kind {
            UnitKind::Oneshot => self.run_oneshot().await,
            UnitKind::LongRunning => self.run_long().await,
        }
    }

    async fn run_oneshot(&mut self) {
        let mut process = match self.launcher.launch(&self.spec).await {
            Ok(p) => p,
            Err(e) => {
                self.transition(UnitState::Fatal {
                    reason: e.to_string(),
                });
                return;
            }
        };
        self.transition(UnitState::Running);
        let mut shutdown = self.shutdown.clone();
        let outcome = tokio::select! {
            res = process.wait() => res,
            _ = shutdown_requested(&mut shutdown) => {
                drop(process);
                self.transition(UnitState::Stopped);
                return;
            }
        };
        match outcome {
            Ok(Some(0)) => {
                self.transition(UnitState::Succeeded);
            }
            Ok(code) => {
                let reason = match code {
                    Some(c) => format!("exited with status {c}"),
                    None => "killed by signal".to_string(),
                };
                self.transition(UnitState::Fatal { reason });
            }
            Err(e) => {
                self.transition(UnitState::Fatal {
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Launch, supervise and relaunch. Every relaunch passes the predecessor
    /// gate again, and a configuration error ends the unit as `Fatal`.
    async fn run_long(&mut self) {
        let mut attempt = 0u32;
        loop {
            let code = match self.launcher.launch(&self.spec).await {
                Ok(mut process) => {
                    self.transition(UnitState::Running);
                    let mut shutdown = self.shutdown.clone();
                    tokio::select! {
                        res = process.wait() => match res {
                            Ok(code) => code,
                            Err(e) => {
                                tracing::warn!(unit = %self.spec.name, error = %e, "wait failed");
                                None
                            }
                        },
                        _ = shutdown_requested(&mut shutdown) => {
                            drop(process);
                            self.transition(UnitState::Stopped);
                            return;
                        }
                    }
                }
                Err(e) if e.class() == ErrorClass::ConfigurationFatal => {
                    tracing::error!(unit = %self.spec.name, error = %e, "launch failed; not retrying");
                    self.transition(UnitState::Fatal {
                        reason: e.to_string(),
                    });
                    return;
                }
                Err(e) => {
                    tracing::warn!(unit = %self.spec.name, error = %e, "launch failed");
                    None
                }
            };
            self.transition(UnitState::Exited { code });
            if !self.spec.restart.should_restart(code) {
                return;
            }
            attempt += 1;
            self.transition(UnitState::RestartScheduled { attempt });
            let mut shutdown = self.shutdown.clone();
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(self.spec.restart_sec)) => {}
                _ = shutdown_requested(&mut shutdown) => {
                    self.transition(UnitState::Stopped);
                    return;
                }
            }
            if !self.pass_gate().await {
                return;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BootgateError;
    use crate::unit::{RestartPolicy, UnitAction};
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    /// Scripted behaviour for one launch of a unit.
    #[derive(Clone)]
    enum Script {
        Exit(i32, Duration),
        LaunchError,
        MissingSecret,
        Forever,
    }

    struct ScriptedProcess(Script);

    #[async_trait]
    impl UnitProcess for ScriptedProcess {
        async fn wait(&mut self) -> Result<Option<i32>> {
            match &self.0 {
                Script::Exit(code, after) => {
                    tokio::time::sleep(*after).await;
                    Ok(Some(*code))
                }
                Script::Forever => std::future::pending().await,
                Script::LaunchError | Script::MissingSecret => unreachable!(),
            }
        }
    }

    #[derive(Default)]
    struct ScriptedLauncher {
        scripts: Mutex<HashMap<String, VecDeque<Script>>>,
        launches: Mutex<HashMap<String, u32>>,
        order: Mutex<Vec<String>>,
    }

    impl ScriptedLauncher {
        fn script(self, unit: &str, steps: &[Script]) -> Self {
            self.scripts
                .lock()
                .unwrap()
                .insert(unit.to_string(), steps.iter().cloned().collect());
            self
        }

        fn launches(&self, unit: &str) -> u32 {
            self.launches.lock().unwrap().get(unit).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl Launcher for ScriptedLauncher {
        async fn launch(&self, unit: &UnitSpec) -> Result<Box<dyn UnitProcess>> {
            *self.launches.lock().unwrap().entry(unit.name.clone()).or_default() += 1;
            self.order.lock().unwrap().push(unit.name.clone());
            let step = {
                let mut scripts = self.scripts.lock().unwrap();
                let queue = scripts.entry(unit.name.clone()).or_default();
                if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                }
            }
            .unwrap_or(Script::Exit(0, Duration::from_millis(10)));
            match step {
                Script::LaunchError => Err(BootgateError::LaunchFailed {
                    unit: unit.name.clone(),
                    reason: "no such file".into(),
                }),
                Script::MissingSecret => Err(BootgateError::SecretNotFound("RESEND_API_KEY".into())),
                other => Ok(Box::new(ScriptedProcess(other))),
            }
        }
    }

    fn oneshot(name: &str, deps: &[&str]) -> UnitSpec {
        UnitSpec::new(name, UnitKind::Oneshot, UnitAction::WaitReady).requires(deps)
    }

    fn service(name: &str, deps: &[&str]) -> UnitSpec {
        let mut s = UnitSpec::new(
            name,
            UnitKind::LongRunning,
            UnitAction::Exec {
                argv: vec![name.to_string()],
                workdir: None,
            },
        )
        .requires(deps);
        s.restart_sec = 1;
        s
    }

    fn api_graph() -> UnitGraph {
        UnitGraph::build(vec![
            oneshot("db-ready", &[]),
            oneshot("db-bootstrap", &["db-ready"]),
            oneshot("db-migrate", &["db-bootstrap"]),
            service("app", &["db-migrate"]),
        ])
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn oneshot_chain_runs_in_order() {
        let graph = UnitGraph::build(vec![
            oneshot("c", &["b"]),
            oneshot("a", &[]),
            oneshot("b", &["a"]),
        ])
        .unwrap();
        let launcher = Arc::new(ScriptedLauncher::default());
        let sup = Supervisor::new("api", graph, launcher.clone());
        let (_stop, rx) = watch::channel(false);
        let summary = sup.run(rx).await;
        assert!(summary.is_success());
        assert_eq!(*launcher.order.lock().unwrap(), vec!["a", "b", "c"]);
        assert!(summary.states.values().all(|s| *s == UnitState::Succeeded));
    }

    #[tokio::test(start_paused = true)]
    async fn unit_never_starts_before_predecessors_release() {
        // Fan-in with skewed durations: the fast branch must not let `join`
        // race ahead of the slow one.
        let graph = UnitGraph::build(vec![
            oneshot("slow", &[]),
            oneshot("fast", &[]),
            oneshot("join", &["slow", "fast"]),
            service("svc", &["join"]),
            oneshot("after-svc", &["svc"]),
        ])
        .unwrap();
        let launcher = Arc::new(
            ScriptedLauncher::default()
                .script("slow", &[Script::Exit(0, Duration::from_secs(30))])
                .script("fast", &[Script::Exit(0, Duration::from_millis(1))])
                .script("svc", &[Script::Forever]),
        );
        let sup = Supervisor::new("api", graph.clone(), launcher.clone());
        let board = sup.board();
        let (stop, rx) = watch::channel(false);
        let handle = tokio::spawn(sup.run(rx));

        while board.state("after-svc") != Some(UnitState::Succeeded) {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        stop.send(true).unwrap();
        let summary = handle.await.unwrap();
        assert_eq!(summary.states["svc"], UnitState::Stopped);

        let snap = board.snapshot();
        for unit in graph.units() {
            let started = snap.unit(&unit.name).unwrap().started_seq.unwrap();
            for dep in &unit.requires {
                let released = snap.unit(dep).unwrap().released_seq.unwrap();
                assert!(
                    started > released,
                    "{} started at {started} before {dep} released at {released}",
                    unit.name
                );
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_migration_blocks_app_forever() {
        let launcher = Arc::new(
            ScriptedLauncher::default().script("db-migrate", &[Script::Exit(1, Duration::from_millis(5))]),
        );
        let sup = Supervisor::new("api", api_graph(), launcher.clone());
        let (_stop, rx) = watch::channel(false);
        let summary = sup.run(rx).await;

        assert_eq!(
            summary.states["db-migrate"],
            UnitState::Fatal {
                reason: "exited with status 1".into()
            }
        );
        assert_eq!(
            summary.states["app"],
            UnitState::WaitingOnDependencies {
                blocked_by: Some("db-migrate".into())
            }
        );
        assert_eq!(launcher.launches("app"), 0);
        // One-shot units are not retried.
        assert_eq!(launcher.launches("db-migrate"), 1);
        assert!(!summary.is_success());
        assert_eq!(summary.fatal_units(), vec!["db-migrate"]);
        assert_eq!(summary.blocked_units(), vec!["app"]);
    }

    #[tokio::test(start_paused = true)]
    async fn readiness_failure_blocks_transitively() {
        let launcher = Arc::new(
            ScriptedLauncher::default().script("db-ready", &[Script::Exit(1, Duration::from_secs(29))]),
        );
        let sup = Supervisor::new("api", api_graph(), launcher.clone());
        let (_stop, rx) = watch::channel(false);
        let summary = sup.run(rx).await;
        assert!(summary.states["db-ready"].is_fatal());
        for unit in ["db-bootstrap", "db-migrate", "app"] {
            assert!(summary.states[unit].is_blocked(), "{unit} should be blocked");
            assert_eq!(launcher.launches(unit), 0);
        }
        assert_eq!(
            summary.states["db-migrate"],
            UnitState::WaitingOnDependencies {
                blocked_by: Some("db-bootstrap".into())
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn launch_error_on_oneshot_is_fatal() {
        let launcher = Arc::new(ScriptedLauncher::default().script("db-ready", &[Script::LaunchError]));
        let graph = UnitGraph::build(vec![oneshot("db-ready", &[])]).unwrap();
        let summary = Supervisor::new("api", graph, launcher).run(watch::channel(false).1).await;
        match &summary.states["db-ready"] {
            UnitState::Fatal { reason } => assert!(reason.contains("no such file")),
            other => panic!("expected fatal, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn long_running_unit_restarts_after_backoff() {
        let launcher = Arc::new(ScriptedLauncher::default().script(
            "app",
            &[
                Script::Exit(1, Duration::from_secs(1)),
                Script::LaunchError,
                Script::Forever,
            ],
        ));
        let graph = UnitGraph::build(vec![service("app", &[])]).unwrap();
        let sup = Supervisor::new("frontend", graph, launcher.clone());
        let board = sup.board();
        let (stop, rx) = watch::channel(false);
        let handle = tokio::spawn(sup.run(rx));

        while launcher.launches("app") < 3 || board.state("app") != Some(UnitState::Running) {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        let snap = board.snapshot();
        assert_eq!(snap.unit("app").unwrap().restarts, 2);

        stop.send(true).unwrap();
        let summary = handle.await.unwrap();
        assert_eq!(summary.states["app"], UnitState::Stopped);
        assert!(summary.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_never_leaves_unit_exited_and_blocks_dependents() {
        let mut svc = service("pg", &[]);
        svc.restart = RestartPolicy::Never;
        let graph = UnitGraph::build(vec![svc, oneshot("db-ready", &["pg"])]).unwrap();
        let launcher = Arc::new(ScriptedLauncher::default().script("pg", &[Script::Exit(2, Duration::from_millis(1))]));
        let summary = Supervisor::new("api", graph, launcher.clone())
            .run(watch::channel(false).1)
            .await;
        assert_eq!(summary.states["pg"], UnitState::Exited { code: Some(2) });
        assert_eq!(launcher.launches("pg"), 1);
        // db-ready either started while pg was up or was blocked once pg died.
        let ready = &summary.states["db-ready"];
        assert!(*ready == UnitState::Succeeded || ready.is_blocked(), "got {ready:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn restart_waits_for_predecessors_and_blocks_once_they_are_gone() {
        let mut pg = service("pg", &[]);
        pg.restart = RestartPolicy::Never;
        let app = service("app", &["pg"]);
        let graph = UnitGraph::build(vec![pg, app]).unwrap();
        let launcher = Arc::new(
            ScriptedLauncher::default()
                .script("pg", &[Script::Exit(1, Duration::from_secs(3))])
                .script("app", &[Script::Exit(1, Duration::from_millis(500))]),
        );
        let sup = Supervisor::new("api", graph, launcher.clone());
        let board = sup.board();
        let summary = tokio::time::timeout(Duration::from_secs(60), sup.run(watch::channel(false).1))
            .await
            .expect("supervisor should finish once app is blocked");

        assert_eq!(summary.states["pg"], UnitState::Exited { code: Some(1) });
        assert_eq!(
            summary.states["app"],
            UnitState::WaitingOnDependencies {
                blocked_by: Some("pg".into())
            }
        );
        // Launched at most while pg was up: t=0, t=1.5 and possibly t=3.
        assert!(launcher.launches("app") <= 3, "app launched {} times", launcher.launches("app"));
        assert!(board.snapshot().unit("app").unwrap().restarts <= 3);
        assert_eq!(summary.blocked_units(), vec!["app"]);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_holds_while_predecessor_is_down() {
        let mut pg = service("pg", &[]);
        pg.restart_sec = 5;
        let app = service("app", &["pg"]);
        let graph = UnitGraph::build(vec![pg, app]).unwrap();
        let launcher = Arc::new(
            ScriptedLauncher::default()
                .script(
                    "pg",
                    &[Script::Exit(1, Duration::from_millis(1200)), Script::Forever],
                )
                .script(
                    "app",
                    &[
                        Script::Exit(1, Duration::from_millis(100)),
                        Script::Exit(1, Duration::from_millis(100)),
                        Script::Forever,
                    ],
                ),
        );
        let sup = Supervisor::new("api", graph, launcher.clone());
        let board = sup.board();
        let (stop, rx) = watch::channel(false);
        let handle = tokio::spawn(sup.run(rx));

        // pg is down from t=1.2 until t=6.2; app's relaunch comes due at t=2.2.
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(
            board.state("app"),
            Some(UnitState::WaitingOnDependencies { blocked_by: None })
        );
        assert_eq!(launcher.launches("app"), 2);

        while board.state("app") != Some(UnitState::Running) {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(board.state("pg"), Some(UnitState::Running));
        assert_eq!(launcher.launches("app"), 3);

        stop.send(true).unwrap();
        let summary = handle.await.unwrap();
        assert_eq!(summary.states["app"], UnitState::Stopped);
        assert!(summary.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_secret_on_long_running_unit_is_fatal_without_restart() {
        let graph = UnitGraph::build(vec![service("app", &[]), oneshot("warmup", &["app"])]).unwrap();
        let launcher = Arc::new(ScriptedLauncher::default().script("app", &[Script::MissingSecret]));
        let sup = Supervisor::new("frontend", graph, launcher.clone());
        let board = sup.board();
        let summary = tokio::time::timeout(Duration::from_secs(60), sup.run(watch::channel(false).1))
            .await
            .expect("supervisor should finish");

        match &summary.states["app"] {
            UnitState::Fatal { reason } => assert!(reason.contains("secret not found: RESEND_API_KEY")),
            other => panic!("expected fatal, got {other:?}"),
        }
        assert_eq!(launcher.launches("app"), 1);
        assert_eq!(board.snapshot().unit("app").unwrap().restarts, 0);
        assert_eq!(summary.blocked_units(), vec!["warmup"]);
        assert!(!summary.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn on_failure_policy_stops_after_clean_exit() {
        let mut svc = service("worker", &[]);
        svc.restart = RestartPolicy::OnFailure;
        let graph = UnitGraph::build(vec![svc]).unwrap();
        let launcher = Arc::new(ScriptedLauncher::default().script(
            "worker",
            &[Script::Exit(1, Duration::from_millis(1)), Script::Exit(0, Duration::from_millis(1))],
        ));
        let summary = Supervisor::new("api", graph, launcher.clone())
            .run(watch::channel(false).1)
            .await;
        assert_eq!(summary.states["worker"], UnitState::Exited { code: Some(0) });
        assert_eq!(launcher.launches("worker"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_waiting_units() {
        let launcher = Arc::new(ScriptedLauncher::default().script("pg", &[Script::LaunchError]));
        let mut pg = service("pg", &[]);
        pg.restart_sec = 3600;
        let graph = UnitGraph::build(vec![pg, oneshot("db-ready", &["pg"])]).unwrap();
        let sup = Supervisor::new("api", graph, launcher);
        let board = sup.board();
        let (stop, rx) = watch::channel(false);
        let handle = tokio::spawn(sup.run(rx));
        while !matches!(board.state("pg"), Some(UnitState::RestartScheduled { .. })) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        stop.send(true).unwrap();
        let summary = handle.await.unwrap();
        assert_eq!(summary.states["pg"], UnitState::Stopped);
        assert_eq!(summary.states["db-ready"], UnitState::Stopped);
    }
}
