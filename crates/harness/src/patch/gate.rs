//! Patch lookup table and the [`Patcher`] implementation built on it

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::routines::{self, Routine};
use super::{Backup, PatchCleanupReport, PatchContext, PatchState, Patcher};
use crate::config::{PitConfig, RunType};
use crate::error::PitResult;

/// Variants that cannot be validated with the current platform. `control-center`
/// only runs inside a Kubernetes cluster provisioned by helm.
const UNSUPPORTED: &[&str] = &[
    "vaadin-flow-karaf-example",
    "base-starter-flow-osgi",
    "control-center",
];

/// Host facts the patch routines depend on, captured once
#[derive(Debug, Clone, Default)]
pub struct PatchSettings {
    /// Home directory holding `.vaadin/proKey` and license files
    pub home: PathBuf,
    /// Snapshot of the environment
    pub vars: HashMap<String, String>,
    pub github_token: Option<String>,
    /// Only log what would be applied
    pub dry_run: bool,
}

impl PatchSettings {
    pub fn from_env(config: &PitConfig) -> Self {
        let vars: HashMap<String, String> = std::env::vars().collect();
        let home = vars
            .get("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let github_token = config
            .github_token
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| vars.get("GHTK").filter(|t| !t.is_empty()).cloned());
        Self {
            home,
            vars,
            github_token,
            dry_run: config.dry_run,
        }
    }

    /// Non-empty environment variable
    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    pub fn pro_key(&self) -> PathBuf {
        self.home.join(".vaadin").join("proKey")
    }
}

struct PatchRule {
    name: &'static str,
    /// Selects by variant name; evaluated once per name and cached
    app: fn(&str) -> bool,
    /// Run-specific condition checked on every apply
    when: fn(&PatchContext) -> bool,
    routine: Routine,
}

fn any_app(_: &str) -> bool {
    true
}

fn always(_: &PatchContext) -> bool {
    true
}

fn default_rules() -> Vec<PatchRule> {
    // preconditions first, so a missing one fails before any file is touched
    vec![
        PatchRule {
            name: "jdk-toolchain",
            app: any_app,
            when: |ctx| ctx.jdk.is_some(),
            routine: routines::select_jdk,
        },
        PatchRule {
            name: "openai-token",
            app: |app| app == "form-filler-demo",
            when: always,
            routine: routines::require_openai_token,
        },
        PatchRule {
            name: "spreadsheet-license",
            app: |app| app == "mpr-demo" || app == "spreadsheet-demo",
            when: always,
            routine: routines::require_spreadsheet_license,
        },
        PatchRule {
            name: "github-token",
            app: |app| app == "releases-graph",
            when: always,
            routine: routines::configure_github_token,
        },
        PatchRule {
            name: "disable-launch-browser",
            app: any_app,
            when: always,
            routine: routines::disable_launch_browser,
        },
        PatchRule {
            name: "target-version",
            app: any_app,
            when: |ctx| ctx.run_type == RunType::Next,
            routine: routines::set_target_version,
        },
        PatchRule {
            name: "prerelease-repositories",
            app: any_app,
            when: |ctx| routines::is_prerelease(&ctx.version),
            routine: routines::add_prerelease_repositories,
        },
        PatchRule {
            name: "remove-pro-key",
            app: |app| app.starts_with("skeleton-starter-") || app.starts_with("archetype-"),
            when: always,
            routine: routines::remove_pro_key,
        },
    ]
}

/// Table-driven [`Patcher`]
pub struct PatchGate {
    settings: PatchSettings,
    rules: Vec<PatchRule>,
    selected: Mutex<HashMap<String, Arc<[usize]>>>,
}

impl PatchGate {
    pub fn new(settings: PatchSettings) -> Self {
        Self {
            settings,
            rules: default_rules(),
            selected: Mutex::new(HashMap::new()),
        }
    }

    fn rules_for(&self, app: &str) -> Arc<[usize]> {
        let mut selected = self.selected.lock();
        if let Some(found) = selected.get(app) {
            return Arc::clone(found);
        }
        let indexes: Arc<[usize]> = self
            .rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| (rule.app)(app))
            .map(|(i, _)| i)
            .collect();
        selected.insert(app.to_string(), Arc::clone(&indexes));
        indexes
    }

    /// Names of the patches that apply to this context, in order
    pub fn patches_for(&self, ctx: &PatchContext) -> Vec<&'static str> {
        self.rules_for(&ctx.app_name)
            .iter()
            .map(|&i| &self.rules[i])
            .filter(|rule| (rule.when)(ctx))
            .map(|rule| rule.name)
            .collect()
    }
}

#[async_trait]
impl Patcher for PatchGate {
    fn is_unsupported(&self, ctx: &PatchContext) -> bool {
        UNSUPPORTED.contains(&ctx.app_name.as_str())
    }

    async fn apply(&self, ctx: &mut PatchContext) -> PitResult<()> {
        if ctx.state() != PatchState::Idle {
            warn!("Patches for {} already applied", ctx.app_name);
            return Ok(());
        }
        ctx.set_state(PatchState::Applied);

        if self.settings.dry_run {
            for name in self.patches_for(ctx) {
                info!("Would apply patch {} to {} {} {}", name, ctx.app_name, ctx.run_type, ctx.version);
            }
            return Ok(());
        }

        info!("Applying patches for {} {} {}", ctx.app_name, ctx.run_type, ctx.version);
        let indexes = self.rules_for(&ctx.app_name);
        for &i in indexes.iter() {
            let rule = &self.rules[i];
            if !(rule.when)(ctx) {
                continue;
            }
            debug!("Applying patch {}", rule.name);
            (rule.routine)(&self.settings, ctx)?;
            ctx.record_applied(rule.name);
        }
        Ok(())
    }

    async fn cleanup(&self, ctx: &mut PatchContext) -> PatchCleanupReport {
        let mut report = PatchCleanupReport::default();
        for backup in ctx.take_backups().into_iter().rev() {
            match restore(&backup) {
                Ok(note) => {
                    report.restored += 1;
                    if let Some(note) = note {
                        warn!("{}", note);
                        report.warnings.push(note);
                    }
                }
                Err(e) => {
                    let msg = format!("Failed to restore {}: {}", describe(&backup), e);
                    warn!("{}", msg);
                    report.warnings.push(msg);
                }
            }
        }
        ctx.set_state(PatchState::Reverted);
        report
    }
}

fn describe(backup: &Backup) -> String {
    match backup {
        Backup::Content { path, .. } => path.display().to_string(),
        Backup::Moved { original, .. } => original.display().to_string(),
    }
}

fn restore(backup: &Backup) -> PitResult<Option<String>> {
    match backup {
        Backup::Content {
            path,
            original: Some(bytes),
        } => {
            std::fs::write(path, bytes)?;
            Ok(None)
        }
        Backup::Content { path, original: None } => {
            if path.exists() {
                std::fs::remove_file(path)?;
            }
            Ok(None)
        }
        Backup::Moved { original, aside } => {
            let note = original
                .exists()
                .then(|| format!("A new {} was generated during the run", original.display()));
            std::fs::rename(aside, original)?;
            Ok(note)
        }
    }
}
