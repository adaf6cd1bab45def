//! Validation executor - the lifecycle of one (variant, mode, version) run
//!
//! Steps run strictly in order. The first failing step ends the lifecycle and
//! control goes straight to cleanup, which always runs.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::catalog::Variant;
use crate::commands::{BuildCommands, CommandOptions};
use crate::config::{Mode, PitConfig, RunType, RuntimeEnvironment};
use crate::error::{PitError, PitResult};
use crate::operator::{OperatorPrompt, StdinPrompt};
use crate::patch::{PatchContext, PatchGate, PatchSettings, Patcher};
use crate::process::{PortControl, ProcessSupervisor, SpawnOptions, SystemPorts};
use crate::readiness::{last_lines, HttpProbe, PollIntervals, ReadinessPoller, ReqwestProbe};
use crate::report::ValidationResult;
use crate::ui_test::{test_id_for, NodeUiTestRunner, UiTestConfig, UiTestRunner};

/// Directory a dev build must not produce on its own
pub const DEV_BUNDLE_DIR: &str = "src/main/dev-bundle";

/// Frontend install reused across builds unless removed
pub const NODE_MODULES_DIR: &str = "node_modules";

/// Preset that ships its own dev bundle
const DEV_BUNDLE_EXEMPT: &str = "default";

const FAILURE_TAIL: usize = 10;
const MAX_DIAGNOSTICS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleStep {
    PortCheck,
    PatchApply,
    Compile,
    Start,
    ReadinessWait,
    Interactive,
    ModeChecks,
    UiProbe,
    ExternalUiTest,
    Cleanup,
}

impl LifecycleStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleStep::PortCheck => "port-check",
            LifecycleStep::PatchApply => "patch-apply",
            LifecycleStep::Compile => "compile",
            LifecycleStep::Start => "start",
            LifecycleStep::ReadinessWait => "readiness-wait",
            LifecycleStep::Interactive => "interactive",
            LifecycleStep::ModeChecks => "mode-checks",
            LifecycleStep::UiProbe => "ui-probe",
            LifecycleStep::ExternalUiTest => "external-ui-test",
            LifecycleStep::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for LifecycleStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the executor needs to know about one validation
#[derive(Debug, Clone)]
pub struct ValidationPlan {
    /// Variant name as selected
    pub name: String,
    /// Name used for patch and dev-bundle decisions (no branch or JDK suffix)
    pub app_name: String,
    pub mode: Mode,
    pub run_type: RunType,
    pub version: String,
    pub project_dir: PathBuf,
    pub commands: BuildCommands,
    /// External UI test; `None` when the variant has none
    pub test_id: Option<String>,
    /// Deadline for all readiness gates together
    pub timeout: Duration,
    pub jdk: Option<u32>,
}

impl ValidationPlan {
    pub fn new(
        variant: &Variant,
        mode: Mode,
        run_type: RunType,
        version: &str,
        project_dir: &Path,
        config: &PitConfig,
    ) -> Self {
        let options = CommandOptions::from(config);
        Self {
            name: variant.name.clone(),
            app_name: variant.base.clone(),
            mode,
            run_type,
            version: version.to_string(),
            project_dir: project_dir.to_path_buf(),
            commands: BuildCommands::derive(variant, mode, project_dir, &options),
            test_id: test_id_for(&variant.base).map(str::to_string),
            timeout: config.timeout_for(&variant.base),
            jdk: variant.jdk,
        }
    }

    pub fn label(&self) -> String {
        format!("{} {} {}", self.name, self.mode, self.version)
    }

    /// Registry id of the long-running server
    pub fn server_id(&self) -> String {
        format!("{}-{}-server", self.name, self.mode)
    }

    pub fn build_id(&self) -> String {
        format!("{}-{}-build", self.name, self.mode)
    }
}

/// Run-wide knobs of the executor
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub port: u16,
    pub platform: String,
    pub interactive: bool,
    pub interactive_timeout: Duration,
    pub run_ui_tests: bool,
    pub headless: bool,
    /// Element wait timeout handed to UI scripts
    pub ui_wait_timeout: Duration,
    pub show_output: bool,
    pub dry_run: bool,
    pub servlet_attempts: usize,
    pub servlet_delay: Duration,
}

impl ExecutorSettings {
    pub fn from_config(config: &PitConfig, env: &RuntimeEnvironment) -> Self {
        Self {
            port: config.port,
            platform: env.platform.clone(),
            interactive: config.interactive,
            interactive_timeout: config.interactive_timeout(),
            run_ui_tests: config.ui_tests_enabled(),
            headless: config.headless,
            ui_wait_timeout: env.ui_wait_timeout(),
            show_output: config.verbose,
            dry_run: config.dry_run,
            servlet_attempts: 5,
            servlet_delay: Duration::from_secs(2),
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }
}

/// Collaborators of the executor; production and test wiring differ only here
#[derive(Clone)]
pub struct ExecutorDeps {
    pub processes: Arc<dyn ProcessSupervisor>,
    pub ports: Arc<dyn PortControl>,
    pub probe: Arc<dyn HttpProbe>,
    pub ui_tests: Arc<dyn UiTestRunner>,
    pub patches: Arc<dyn Patcher>,
    pub operator: Arc<dyn OperatorPrompt>,
}

impl ExecutorDeps {
    /// Real processes, ports, HTTP, node UI tests and the patch table
    pub fn system(processes: Arc<dyn ProcessSupervisor>, config: &PitConfig) -> PitResult<Self> {
        Ok(Self {
            ui_tests: Arc::new(NodeUiTestRunner::new(
                Arc::clone(&processes),
                config.tests_dir.clone(),
                config.verbose,
            )),
            processes,
            ports: Arc::new(SystemPorts::new()),
            probe: Arc::new(ReqwestProbe::new()?),
            patches: Arc::new(PatchGate::new(PatchSettings::from_env(config))),
            operator: Arc::new(StdinPrompt),
        })
    }
}

pub struct ValidationExecutor {
    deps: ExecutorDeps,
    settings: ExecutorSettings,
    poller: ReadinessPoller,
}

impl ValidationExecutor {
    pub fn new(deps: ExecutorDeps, settings: ExecutorSettings) -> Self {
        let poller = ReadinessPoller::new(Arc::clone(&deps.probe));
        Self {
            deps,
            settings,
            poller,
        }
    }

    pub fn with_poll_intervals(mut self, intervals: PollIntervals) -> Self {
        self.poller = self.poller.with_intervals(intervals);
        self
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut ExecutorSettings {
        &mut self.settings
    }

    /// Append-only capture of every command of this validation
    pub fn output_file(&self, plan: &ValidationPlan) -> PathBuf {
        let stem = format!(
            "{}-{}-{}-{}",
            plan.name, plan.mode, plan.version, self.settings.platform
        )
        .replace(['/', ':'], "-");
        plan.project_dir.join(format!("{}.out", stem))
    }

    /// Run the whole lifecycle. Never fails: every error ends up in the result.
    pub async fn execute(&self, plan: &ValidationPlan) -> ValidationResult {
        let started = Instant::now();
        let mut ctx = PatchContext::new(
            &plan.app_name,
            plan.run_type,
            &plan.version,
            plan.mode,
            &plan.project_dir,
        )
        .with_jdk(plan.jdk);

        if self.deps.patches.is_unsupported(&ctx) {
            warn!("Skipping {}: not supported in this environment", plan.label());
            return ValidationResult::skipped(
                &plan.name,
                plan.mode,
                &plan.version,
                "not supported in this environment",
            );
        }

        info!(variant = %plan.name, mode = %plan.mode, version = %plan.version, "Validating {}", plan.label());
        let output = self.output_file(plan);
        let mut step = LifecycleStep::PortCheck;
        let mut warnings = Vec::new();

        let outcome = if self.settings.dry_run {
            self.dry_run(plan, &mut ctx).await
        } else {
            self.run_lifecycle(plan, &mut ctx, &output, &mut step, &mut warnings)
                .await
        };

        warnings.extend(self.cleanup(plan, &mut ctx, &output, outcome.is_err()).await);
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(()) => {
                info!("✓ {} ({} ms)", plan.label(), duration_ms);
                let mut result = ValidationResult::passed(&plan.name, plan.mode, &plan.version, duration_ms);
                result.warnings = warnings;
                result
            }
            Err(e) => {
                error!(step = %step, "✗ {} - {}", plan.label(), e);
                let mut result = ValidationResult::failed(&plan.name, plan.mode, &plan.version, &e);
                result.failed_step = Some(step);
                result.warnings = warnings;
                result.duration_ms = duration_ms;
                result
            }
        }
    }

    async fn run_lifecycle(
        &self,
        plan: &ValidationPlan,
        ctx: &mut PatchContext,
        output: &Path,
        step: &mut LifecycleStep,
        warnings: &mut Vec<String>,
    ) -> PitResult<()> {
        enter(step, LifecycleStep::PortCheck);
        self.check_port().await?;

        enter(step, LifecycleStep::PatchApply);
        self.deps.patches.apply(ctx).await?;

        enter(step, LifecycleStep::Compile);
        if plan.mode == Mode::Dev {
            clean_dev_artifacts(&plan.project_dir)?;
        }
        self.compile(plan, ctx, output).await?;

        enter(step, LifecycleStep::Start);
        append_marker(output, &format!("Starting {}", plan.commands.run)).await;
        let server = self
            .deps
            .processes
            .spawn(&plan.commands.run, self.spawn_options(plan.server_id(), plan, ctx, output))
            .await?;

        enter(step, LifecycleStep::ReadinessWait);
        let deadline = Instant::now() + plan.timeout;
        tokio::select! {
            found = self.poller.wait_for_log_message(output, &plan.commands.check_message, plan.timeout) => {
                found?;
            }
            code = server.wait() => {
                let tail: String = last_lines(output, FAILURE_TAIL)
                    .await
                    .iter()
                    .map(|l| format!("\n  | {}", l))
                    .collect();
                return Err(PitError::Process(format!(
                    "Server exited with {:?} before printing its startup message{}",
                    code, tail
                )));
            }
        }
        let url = self.settings.base_url();
        self.poller.wait_for_http(&url, remaining(deadline)).await?;
        if plan.mode == Mode::Dev {
            self.poller.wait_for_frontend(&url, remaining(deadline)).await?;
        }

        if self.settings.interactive {
            enter(step, LifecycleStep::Interactive);
            self.wait_for_operator(plan).await?;
        }

        enter(step, LifecycleStep::ModeChecks);
        match plan.mode {
            Mode::Prod => {
                let found = deprecation_warnings(output).await?;
                for warning in &found {
                    warn!("Deprecated API use: {}", warning);
                }
                warnings.extend(found);
            }
            Mode::Dev => check_dev_bundle(plan)?,
        }

        enter(step, LifecycleStep::UiProbe);
        self.poller
            .check_servlet(&url, self.settings.servlet_attempts, self.settings.servlet_delay)
            .await?;

        if let Some(test_id) = self.ui_test_for(plan) {
            enter(step, LifecycleStep::ExternalUiTest);
            self.run_ui_test(plan, test_id, output).await?;
        }
        Ok(())
    }

    async fn check_port(&self) -> PitResult<()> {
        let port = self.settings.port;
        if !self.deps.ports.is_busy(port).await {
            return Ok(());
        }
        warn!("Port {} is busy, stopping whatever listens on it", port);
        let killed = self.deps.ports.kill_occupants(port).await;
        debug!("Signalled {} process(es) on port {}", killed, port);
        if self.deps.ports.is_busy(port).await {
            return Err(PitError::PortBusy { port });
        }
        Ok(())
    }

    fn spawn_options(
        &self,
        id: String,
        plan: &ValidationPlan,
        ctx: &PatchContext,
        output: &Path,
    ) -> SpawnOptions {
        SpawnOptions::with_id(id)
            .cwd(&plan.project_dir)
            .env(ctx.env_overrides())
            .output(output, self.settings.show_output)
    }

    async fn compile(&self, plan: &ValidationPlan, ctx: &PatchContext, output: &Path) -> PitResult<()> {
        let command = &plan.commands.compile;
        info!("Compiling {}", plan.label());
        append_marker(output, &format!("Running {}", command)).await;

        let code = self
            .deps
            .processes
            .run(command, self.spawn_options(plan.build_id(), plan, ctx, output))
            .await?;
        if code == Some(0) {
            return Ok(());
        }
        Err(PitError::Compile {
            command: command.clone(),
            exit_code: code,
            diagnostics: compile_diagnostics(output).await,
        })
    }

    /// Block until the operator confirms, bounded by the safety timeout
    async fn wait_for_operator(&self, plan: &ValidationPlan) -> PitResult<()> {
        let limit = self.settings.interactive_timeout;
        let message = format!(
            "{} is running at {}. Test it manually, then press enter to continue...",
            plan.label(),
            self.settings.base_url()
        );
        match tokio::time::timeout(limit, self.deps.operator.confirm(&message)).await {
            Ok(confirmed) => confirmed,
            Err(_) => Err(PitError::Timeout {
                waiting_for: "operator confirmation".to_string(),
                seconds: limit.as_secs(),
                checked: Vec::new(),
            }),
        }
    }

    fn ui_test_for<'a>(&self, plan: &'a ValidationPlan) -> Option<&'a str> {
        if !self.settings.run_ui_tests {
            return None;
        }
        plan.test_id.as_deref().filter(|id| *id != "noop")
    }

    async fn run_ui_test(&self, plan: &ValidationPlan, test_id: &str, output: &Path) -> PitResult<()> {
        let config = UiTestConfig {
            url: self.settings.base_url(),
            host: "localhost".to_string(),
            port: self.settings.port,
            headless: self.settings.headless,
            timeout: self.settings.ui_wait_timeout,
            mode: plan.mode,
            version: plan.version.clone(),
            name: plan.name.clone(),
            output_file: Some(output.to_path_buf()),
        };
        match self.deps.ui_tests.run(test_id, &config).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(PitError::UiTestFailure {
                test: test_id.to_string(),
                reason: "test reported failure".to_string(),
            }),
            Err(e @ PitError::UiTestFailure { .. }) => Err(e),
            Err(e) => Err(PitError::UiTestFailure {
                test: test_id.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn dry_run(&self, plan: &ValidationPlan, ctx: &mut PatchContext) -> PitResult<()> {
        let port = self.settings.port;
        info!("[{}] {}: check port {}", LifecycleStep::PortCheck, plan.label(), port);
        self.deps.patches.apply(ctx).await?;
        info!("[{}] {}: {}", LifecycleStep::Compile, plan.label(), plan.commands.compile);
        info!("[{}] {}: {}", LifecycleStep::Start, plan.label(), plan.commands.run);
        info!(
            "[{}] {}: wait {}s for '{}'",
            LifecycleStep::ReadinessWait,
            plan.label(),
            plan.timeout.as_secs(),
            plan.commands.check_message
        );
        info!("[{}] {}: GET {}", LifecycleStep::UiProbe, plan.label(), self.settings.base_url());
        if let Some(test_id) = self.ui_test_for(plan) {
            info!("[{}] {}: {}", LifecycleStep::ExternalUiTest, plan.label(), test_id);
        }
        Ok(())
    }

    /// Release everything the lifecycle may have acquired; returns warnings
    async fn cleanup(
        &self,
        plan: &ValidationPlan,
        ctx: &mut PatchContext,
        output: &Path,
        failed: bool,
    ) -> Vec<String> {
        debug!(step = %LifecycleStep::Cleanup, "Cleaning up {}", plan.label());
        let mut warnings = Vec::new();

        if !self.settings.dry_run {
            self.deps.processes.kill(&plan.server_id()).await;
            self.deps.processes.kill(&plan.build_id()).await;
            let port = self.settings.port;
            if self.deps.ports.is_busy(port).await {
                let killed = self.deps.ports.kill_occupants(port).await;
                debug!("Stopped {} stray process(es) on port {}", killed, port);
            }
        }

        let report = self.deps.patches.cleanup(ctx).await;
        warnings.extend(report.warnings);

        if failed {
            let tail = last_lines(output, FAILURE_TAIL).await;
            if !tail.is_empty() {
                warn!("Last lines of {}:\n  {}", output.display(), tail.join("\n  "));
            }
        }
        if output.exists() {
            if let Err(e) = tokio::fs::remove_file(output).await {
                let msg = format!("Failed to delete {}: {}", output.display(), e);
                warn!("{}", msg);
                warnings.push(msg);
            }
        }
        warnings
    }
}

fn enter(step: &mut LifecycleStep, next: LifecycleStep) {
    debug!(step = %next, "Entering step");
    *step = next;
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

/// Dev builds start without a dev bundle or installed frontend packages
fn clean_dev_artifacts(project: &Path) -> PitResult<()> {
    for relative in [DEV_BUNDLE_DIR, NODE_MODULES_DIR] {
        let dir = project.join(relative);
        if dir.exists() {
            debug!("Removing stale {}", dir.display());
            std::fs::remove_dir_all(&dir)?;
        }
    }
    Ok(())
}

fn check_dev_bundle(plan: &ValidationPlan) -> PitResult<()> {
    let bundle = plan.project_dir.join(DEV_BUNDLE_DIR);
    if bundle.exists() && plan.app_name != DEV_BUNDLE_EXEMPT {
        return Err(PitError::DevBundleCreated(bundle));
    }
    Ok(())
}

/// Separator line so the steps are easy to find in the output file
async fn append_marker(output: &Path, message: &str) {
    let result = async {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(output)
            .await?;
        file.write_all(format!(">>>> PiT: {}\n", message).as_bytes()).await
    }
    .await;
    if let Err(e) = result {
        debug!("Cannot write marker to {}: {}", output.display(), e);
    }
}

/// Lines of a failed build worth showing in the report
async fn compile_diagnostics(output: &Path) -> Vec<String> {
    let content = match tokio::fs::read(output).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(_) => return Vec::new(),
    };
    let failures: Vec<String> = content
        .lines()
        .filter(|l| l.contains("FAILURE") || l.contains("[ERROR]"))
        .take(MAX_DIAGNOSTICS)
        .map(str::to_string)
        .collect();
    if failures.is_empty() {
        last_lines(output, FAILURE_TAIL).await
    } else {
        failures
    }
}

/// Deprecation warnings printed by the compiler, with paths made project-relative
pub async fn deprecation_warnings(output: &Path) -> PitResult<Vec<String>> {
    let content = match tokio::fs::read(output).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(_) => return Ok(Vec::new()),
    };
    let prefix = Regex::new(r"^.*/src/")?;
    let mut found: Vec<String> = content
        .lines()
        .filter(|l| l.contains("WARNING") && l.contains("deprecated"))
        .map(|l| prefix.replace(l, "src/").into_owned())
        .collect();
    found.dedup();
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    #[test]
    fn test_plan_ids_and_timeout() {
        let config = PitConfig::default();
        let variant = Variant::parse("start", &Catalog::default());
        let plan = ValidationPlan::new(
            &variant,
            Mode::Dev,
            RunType::Current,
            "current",
            Path::new("tmp/start"),
            &config,
        );
        assert_eq!(plan.server_id(), "start-dev-server");
        assert_eq!(plan.build_id(), "start-dev-build");
        assert_eq!(plan.timeout, Duration::from_secs(500));
        assert_eq!(plan.test_id.as_deref(), Some("start"));
    }

    #[test]
    fn test_step_names() {
        assert_eq!(LifecycleStep::ExternalUiTest.to_string(), "external-ui-test");
        assert_eq!(
            serde_json::to_string(&LifecycleStep::PortCheck).unwrap(),
            "\"port-check\""
        );
    }

    #[tokio::test]
    async fn test_deprecation_warnings_are_made_relative() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("app.out");
        std::fs::write(
            &out,
            "[INFO] Compiling 3 source files\n\
             [WARNING] /home/runner/work/app/src/main/java/App.java:[12,8] setFoo() in Bar has been deprecated\n\
             [WARNING] unrelated warning\n",
        )
        .unwrap();

        let found = deprecation_warnings(&out).await.unwrap();
        assert_eq!(
            found,
            vec!["src/main/java/App.java:[12,8] setFoo() in Bar has been deprecated"]
        );
    }

    #[tokio::test]
    async fn test_compile_diagnostics_prefer_failure_lines() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("build.out");
        std::fs::write(&out, "[INFO] a\n[ERROR] Tests run: 1, Failures: 1\n[INFO] BUILD FAILURE\n").unwrap();
        let lines = compile_diagnostics(&out).await;
        assert_eq!(lines, vec!["[ERROR] Tests run: 1, Failures: 1", "[INFO] BUILD FAILURE"]);

        std::fs::write(&out, "just\nsome\noutput\n").unwrap();
        assert_eq!(compile_diagnostics(&out).await, vec!["just", "some", "output"]);
    }

    #[test]
    fn test_dev_artifacts_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(DEV_BUNDLE_DIR).join("webapp")).unwrap();
        std::fs::create_dir_all(dir.path().join(NODE_MODULES_DIR).join("lit")).unwrap();
        std::fs::create_dir_all(dir.path().join("src/main/java")).unwrap();

        clean_dev_artifacts(dir.path()).unwrap();
        assert!(!dir.path().join(DEV_BUNDLE_DIR).exists());
        assert!(!dir.path().join(NODE_MODULES_DIR).exists());
        assert!(dir.path().join("src/main/java").exists());

        // nothing left to remove is fine
        clean_dev_artifacts(dir.path()).unwrap();
    }

    #[test]
    fn test_dev_bundle_check_exempts_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(DEV_BUNDLE_DIR)).unwrap();
        let config = PitConfig::default();
        let catalog = Catalog::default();

        let plan = ValidationPlan::new(
            &Variant::parse("react", &catalog),
            Mode::Dev,
            RunType::Current,
            "current",
            dir.path(),
            &config,
        );
        assert!(matches!(check_dev_bundle(&plan), Err(PitError::DevBundleCreated(_))));

        let plan = ValidationPlan::new(
            &Variant::parse("default", &catalog),
            Mode::Dev,
            RunType::Current,
            "current",
            dir.path(),
            &config,
        );
        assert!(check_dev_bundle(&plan).is_ok());
    }
}
