//! Run coordinator - sequences every selected variant through the version and
//! mode matrix and collects the results

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};

use crate::catalog::{Catalog, Variant};
use crate::config::{PitConfig, RuntimeEnvironment};
use crate::error::{PitError, PitResult};
use crate::executor::{ExecutorDeps, ExecutorSettings, ValidationExecutor, ValidationPlan};
use crate::patch::{PatchContext, Patcher};
use crate::process::ProcessSupervisor;
use crate::project::ProjectSource;
use crate::readiness::PollIntervals;
use crate::report::{RunReport, ValidationResult};

pub struct RunCoordinator {
    config: PitConfig,
    catalog: Catalog,
    processes: Arc<dyn ProcessSupervisor>,
    patches: Arc<dyn Patcher>,
    projects: Arc<dyn ProjectSource>,
    executor: ValidationExecutor,
}

impl RunCoordinator {
    pub fn new(
        config: PitConfig,
        catalog: Catalog,
        env: &RuntimeEnvironment,
        deps: ExecutorDeps,
        projects: Arc<dyn ProjectSource>,
    ) -> Self {
        let settings = ExecutorSettings::from_config(&config, env);
        let processes = Arc::clone(&deps.processes);
        let patches = Arc::clone(&deps.patches);
        Self {
            config,
            catalog,
            processes,
            patches,
            projects,
            executor: ValidationExecutor::new(deps, settings),
        }
    }

    pub fn with_poll_intervals(mut self, intervals: PollIntervals) -> Self {
        self.executor = self.executor.with_poll_intervals(intervals);
        self
    }

    /// Adjust the executor settings derived from the configuration
    pub fn with_settings(mut self, f: impl FnOnce(&mut ExecutorSettings)) -> Self {
        f(self.executor.settings_mut());
        self
    }

    pub fn config(&self) -> &PitConfig {
        &self.config
    }

    /// Names selected by a comma-separated list; `!name` excludes
    pub fn compute_variants(&self, starters: &str) -> Vec<String> {
        self.catalog.compute_variants(starters)
    }

    /// Check the host has every required command
    pub fn preflight(&self) -> PitResult<()> {
        for alternatives in required_commands(&self.config) {
            if !alternatives.iter().any(|cmd| which::which(cmd).is_ok()) {
                return Err(PitError::MissingCommand(alternatives.join(" or ")));
            }
        }
        Ok(())
    }

    /// Validate every selected variant, strictly one after another
    pub async fn run(&self) -> RunReport {
        let started = Instant::now();
        let variants = self.catalog.resolve(&self.config.starters);
        info!(
            "Validating {} variant(s): {}",
            variants.len(),
            variants.iter().map(|v| v.name.as_str()).collect::<Vec<_>>().join(", ")
        );

        let mut results = Vec::new();
        for variant in &variants {
            results.extend(self.run_variant(variant).await);
            // nothing may survive into the next variant
            self.processes.kill_all().await;
        }

        let report = RunReport::new(results, started.elapsed().as_millis() as u64);
        info!(
            "Run complete: {} passed, {} failed, {} skipped",
            report.passed, report.failed, report.skipped
        );
        report
    }

    async fn run_variant(&self, variant: &Variant) -> Vec<ValidationResult> {
        let versions = self.config.versions();
        let modes = self.config.modes();
        if versions.is_empty() || modes.is_empty() {
            warn!("Nothing to validate for {}: every version or mode is skipped", variant);
            return Vec::new();
        }

        let (run_type, version) = &versions[0];
        let ctx = PatchContext::new(
            &variant.base,
            *run_type,
            version.as_str(),
            modes[0],
            variant.project_dir(&self.config.work_dir),
        );
        if self.patches.is_unsupported(&ctx) {
            warn!("Skipping {}: not supported in this environment", variant);
            let mut skipped = Vec::new();
            for (_, version) in &versions {
                for mode in &modes {
                    skipped.push(ValidationResult::skipped(
                        &variant.name,
                        *mode,
                        version,
                        "not supported in this environment",
                    ));
                }
            }
            return skipped;
        }

        info!(variant = %variant, "Preparing {}", variant);
        let project_dir = match self.projects.prepare(variant).await {
            Ok(dir) => dir,
            Err(e) => {
                error!("✗ {} - {}", variant, e);
                let mut failed = Vec::new();
                for (_, version) in &versions {
                    for mode in &modes {
                        failed.push(ValidationResult::failed(&variant.name, *mode, version, &e));
                    }
                }
                return failed;
            }
        };

        let mut results = Vec::with_capacity(versions.len() * modes.len());
        for (run_type, version) in &versions {
            for mode in &modes {
                let plan = ValidationPlan::new(variant, *mode, *run_type, version, &project_dir, &self.config);
                results.push(self.executor.execute(&plan).await);
            }
        }
        results
    }
}

/// Commands a run needs, each entry listing acceptable alternatives
pub fn required_commands(config: &PitConfig) -> Vec<Vec<&'static str>> {
    let mut required = vec![vec!["git"], vec!["curl"], vec!["unzip"], vec!["mvn", "java"]];
    if config.ui_tests_enabled() {
        required.push(vec!["node"]);
    }
    required
}
