//! Fakes for every collaborator of the executor and coordinator
#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use pit_harness::catalog::{Catalog, Variant};
use pit_harness::config::{Mode, PitConfig, RunType};
use pit_harness::error::{PitError, PitResult};
use pit_harness::executor::{ExecutorDeps, ExecutorSettings, ValidationPlan};
use pit_harness::operator::OperatorPrompt;
use pit_harness::patch::{PatchCleanupReport, PatchContext, PatchState, Patcher};
use pit_harness::process::{ManagedProcess, PortControl, ProcessState, ProcessSupervisor, Signal, SpawnOptions};
use pit_harness::project::ProjectSource;
use pit_harness::readiness::{HttpProbe, PollIntervals, ProbeResponse};
use pit_harness::ui_test::{UiTestConfig, UiTestRunner};

pub const STARTUP_LINE: &str = "Started Application in 1.2 seconds (process running for 1.5)";

/// Shared, ordered log of what the fakes were asked to do
#[derive(Clone, Default)]
pub struct Events(Arc<Mutex<Vec<String>>>);

impl Events {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().push(event.into());
    }

    pub fn all(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.0.lock().iter().position(|e| e == event)
    }

    pub fn last_position(&self, event: &str) -> Option<usize> {
        self.0.lock().iter().rposition(|e| e == event)
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.0.lock().iter().filter(|e| e.starts_with(prefix)).count()
    }
}

/// What the fakes should simulate
#[derive(Debug, Clone)]
pub struct Scenario {
    pub compile_exit: Option<i32>,
    pub fail_server_spawn: bool,
    /// Delay before the server prints its startup line; `None` never prints it
    pub startup_delay: Option<Duration>,
    pub create_dev_bundle: bool,
    pub port_busy: bool,
    /// Whether killing the port occupants frees the port
    pub port_frees: bool,
    /// Responses carrying the frontend-pending header before it clears
    pub pending_polls: usize,
    pub content_type: String,
    pub fail_apply: bool,
    pub unsupported: Vec<String>,
    /// Variant whose UI test throws
    pub ui_fail_for: Option<String>,
    /// Operator never answers the interactive prompt
    pub operator_silent: bool,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            compile_exit: Some(0),
            fail_server_spawn: false,
            startup_delay: Some(Duration::from_millis(50)),
            create_dev_bundle: false,
            port_busy: false,
            port_frees: true,
            pending_polls: 0,
            content_type: "text/html;charset=utf-8".to_string(),
            fail_apply: false,
            unsupported: Vec::new(),
            ui_fail_for: None,
            operator_silent: false,
        }
    }
}

fn append(path: &Path, line: &str) {
    if let Ok(mut file) = std::fs::OpenOptions::new().create(true).append(true).open(path) {
        let _ = writeln!(file, "{}", line);
    }
}

fn exited(id: &str, command: &str, output: Option<PathBuf>, code: Option<i32>) -> ManagedProcess {
    let (tx, rx) = watch::channel(ProcessState::Exited(code));
    drop(tx);
    ManagedProcess::new(id, command, output, None, rx)
}

pub struct FakeSupervisor {
    events: Events,
    scenario: Scenario,
    running: Mutex<HashMap<String, watch::Sender<ProcessState>>>,
}

impl FakeSupervisor {
    pub fn new(events: Events, scenario: Scenario) -> Self {
        Self {
            events,
            scenario,
            running: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ProcessSupervisor for FakeSupervisor {
    async fn spawn(&self, command: &str, options: SpawnOptions) -> PitResult<ManagedProcess> {
        let id = options.id.clone().unwrap_or_else(|| "anonymous".to_string());
        self.events.push(format!("spawn:{}", id));
        if let Some(out) = &options.output_file {
            append(out, &format!("$ {}", command));
        }

        if id.ends_with("-build") {
            if self.scenario.create_dev_bundle {
                if let Some(cwd) = &options.cwd {
                    std::fs::create_dir_all(cwd.join("src/main/dev-bundle"))?;
                }
            }
            if self.scenario.compile_exit != Some(0) {
                if let Some(out) = &options.output_file {
                    append(out, "[ERROR] Failed to execute goal: compilation error");
                    append(out, "[INFO] BUILD FAILURE");
                }
            }
            return Ok(exited(&id, command, options.output_file, self.scenario.compile_exit));
        }

        if id.ends_with("-server") {
            if self.scenario.fail_server_spawn {
                return Err(PitError::Process("spawn refused".to_string()));
            }
            let (tx, rx) = watch::channel(ProcessState::Running);
            self.running.lock().insert(id.clone(), tx);
            if let (Some(delay), Some(out)) = (self.scenario.startup_delay, options.output_file.clone()) {
                let events = self.events.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    events.push("log:started");
                    append(&out, STARTUP_LINE);
                });
            }
            return Ok(ManagedProcess::new(id, command, options.output_file, Some(4242), rx));
        }

        Ok(exited(&id, command, options.output_file, Some(0)))
    }

    async fn kill_with_signal(&self, id: &str, _signal: Signal) -> bool {
        match self.running.lock().remove(id) {
            Some(tx) => {
                tx.send_replace(ProcessState::Exited(None));
                self.events.push(format!("kill:{}", id));
                true
            }
            None => false,
        }
    }

    async fn kill_all(&self) {
        for (_, tx) in self.running.lock().drain() {
            tx.send_replace(ProcessState::Exited(None));
        }
        self.events.push("kill_all");
    }

    fn ids(&self) -> Vec<String> {
        self.running.lock().keys().cloned().collect()
    }
}

pub struct FakePorts {
    events: Events,
    busy: AtomicBool,
    frees: bool,
}

#[async_trait]
impl PortControl for FakePorts {
    async fn is_busy(&self, _port: u16) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    async fn kill_occupants(&self, port: u16) -> usize {
        self.events.push(format!("port:kill:{}", port));
        if self.frees {
            self.busy.store(false, Ordering::SeqCst);
        }
        1
    }
}

pub struct FakeProbe {
    events: Events,
    pending: AtomicUsize,
    content_type: String,
    pub calls: AtomicUsize,
}

#[async_trait]
impl HttpProbe for FakeProbe {
    async fn get(&self, _url: &str) -> PitResult<ProbeResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let pending = self
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        self.events.push(if pending { "probe:pending" } else { "probe:clear" });
        Ok(ProbeResponse {
            status: 200,
            content_type: Some(self.content_type.clone()),
            frontend_pending: pending,
        })
    }
}

pub struct FakePatcher {
    events: Events,
    fail_apply: bool,
    unsupported: Vec<String>,
    pub apply_calls: AtomicUsize,
    pub cleanup_calls: AtomicUsize,
}

#[async_trait]
impl Patcher for FakePatcher {
    fn is_unsupported(&self, ctx: &PatchContext) -> bool {
        self.unsupported.contains(&ctx.app_name)
    }

    async fn apply(&self, ctx: &mut PatchContext) -> PitResult<()> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        self.events.push("patch:apply");
        ctx.set_state(PatchState::Applied);
        if self.fail_apply {
            return Err(PitError::Configuration("OPENAI_TOKEN is not set".to_string()));
        }
        Ok(())
    }

    async fn cleanup(&self, ctx: &mut PatchContext) -> PatchCleanupReport {
        self.cleanup_calls.fetch_add(1, Ordering::SeqCst);
        self.events.push("patch:cleanup");
        ctx.set_state(PatchState::Reverted);
        PatchCleanupReport::default()
    }
}

pub struct FakeUiTests {
    events: Events,
    fail_for: Option<String>,
    pub calls: AtomicUsize,
}

#[async_trait]
impl UiTestRunner for FakeUiTests {
    async fn run(&self, test_id: &str, config: &UiTestConfig) -> PitResult<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.events.push(format!("ui:{}", test_id));
        if self.fail_for.as_deref() == Some(config.name.as_str()) {
            return Err(PitError::Process("browser crashed".to_string()));
        }
        Ok(true)
    }
}

pub struct FakeOperator {
    events: Events,
    silent: bool,
}

#[async_trait]
impl OperatorPrompt for FakeOperator {
    async fn confirm(&self, _message: &str) -> PitResult<()> {
        self.events.push("operator:prompt");
        if self.silent {
            std::future::pending::<()>().await;
        }
        self.events.push("operator:confirm");
        Ok(())
    }
}

/// Creates an empty project directory per variant
pub struct FakeProjects {
    root: PathBuf,
    fail_for: Option<String>,
}

impl FakeProjects {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            fail_for: None,
        }
    }

    pub fn failing_for(root: &Path, name: &str) -> Self {
        Self {
            root: root.to_path_buf(),
            fail_for: Some(name.to_string()),
        }
    }
}

#[async_trait]
impl ProjectSource for FakeProjects {
    async fn prepare(&self, variant: &Variant) -> PitResult<PathBuf> {
        if self.fail_for.as_deref() == Some(variant.name.as_str()) {
            return Err(PitError::ProjectSetup(format!("could not download {}", variant)));
        }
        let dir = variant.project_dir(&self.root);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

/// One set of fakes sharing an event log
pub struct Fakes {
    pub events: Events,
    pub processes: Arc<FakeSupervisor>,
    pub ports: Arc<FakePorts>,
    pub probe: Arc<FakeProbe>,
    pub patches: Arc<FakePatcher>,
    pub ui_tests: Arc<FakeUiTests>,
    pub operator: Arc<FakeOperator>,
}

impl Fakes {
    pub fn new(scenario: Scenario) -> Self {
        let events = Events::default();
        Self {
            processes: Arc::new(FakeSupervisor::new(events.clone(), scenario.clone())),
            ports: Arc::new(FakePorts {
                events: events.clone(),
                busy: AtomicBool::new(scenario.port_busy),
                frees: scenario.port_frees,
            }),
            probe: Arc::new(FakeProbe {
                events: events.clone(),
                pending: AtomicUsize::new(scenario.pending_polls),
                content_type: scenario.content_type.clone(),
                calls: AtomicUsize::new(0),
            }),
            patches: Arc::new(FakePatcher {
                events: events.clone(),
                fail_apply: scenario.fail_apply,
                unsupported: scenario.unsupported.clone(),
                apply_calls: AtomicUsize::new(0),
                cleanup_calls: AtomicUsize::new(0),
            }),
            ui_tests: Arc::new(FakeUiTests {
                events: events.clone(),
                fail_for: scenario.ui_fail_for.clone(),
                calls: AtomicUsize::new(0),
            }),
            operator: Arc::new(FakeOperator {
                events: events.clone(),
                silent: scenario.operator_silent,
            }),
            events,
        }
    }

    pub fn deps(&self) -> ExecutorDeps {
        ExecutorDeps {
            processes: self.processes.clone(),
            ports: self.ports.clone(),
            probe: self.probe.clone(),
            ui_tests: self.ui_tests.clone(),
            patches: self.patches.clone(),
            operator: self.operator.clone(),
        }
    }

    pub fn probe_calls(&self) -> usize {
        self.probe.calls.load(Ordering::SeqCst)
    }

    pub fn ui_calls(&self) -> usize {
        self.ui_tests.calls.load(Ordering::SeqCst)
    }

    pub fn cleanup_calls(&self) -> usize {
        self.patches.cleanup_calls.load(Ordering::SeqCst)
    }
}

pub fn fast_intervals() -> PollIntervals {
    PollIntervals {
        log: Duration::from_millis(20),
        http: Duration::from_millis(20),
        frontend: Duration::from_millis(20),
    }
}

pub fn settings() -> ExecutorSettings {
    ExecutorSettings {
        port: 8080,
        platform: "linux".to_string(),
        interactive: false,
        interactive_timeout: Duration::from_secs(1),
        run_ui_tests: true,
        headless: true,
        ui_wait_timeout: Duration::from_secs(1),
        show_output: false,
        dry_run: false,
        servlet_attempts: 2,
        servlet_delay: Duration::from_millis(10),
    }
}

pub fn test_config() -> PitConfig {
    PitConfig {
        timeout_secs: 2,
        ..PitConfig::default()
    }
}

pub fn plan(project_dir: &Path, name: &str, mode: Mode) -> ValidationPlan {
    let variant = Variant::parse(name, &Catalog::default());
    ValidationPlan::new(&variant, mode, RunType::Current, "current", project_dir, &test_config())
}
