//! Patch gate - project edits applied before a build and reverted after the run
//!
//! A [`PatchContext`] is created per validation. `apply` moves it from idle to
//! applied and records a backup of everything it touches; `cleanup` restores
//! those backups and moves it to reverted, whatever happened in between.

mod gate;
mod routines;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::config::{Mode, RunType};
use crate::error::PitResult;

pub use gate::{PatchGate, PatchSettings};
pub use routines::{is_prerelease, remove_property, set_property};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchState {
    Idle,
    Applied,
    Reverted,
}

/// Something to undo during cleanup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backup {
    /// Previous content of an edited file; `None` when the patch created it
    Content {
        path: PathBuf,
        original: Option<Vec<u8>>,
    },
    /// A file moved out of the way
    Moved { original: PathBuf, aside: PathBuf },
}

/// Everything that decides which patches apply to one validation, plus the
/// undo log for them
#[derive(Debug, Clone)]
pub struct PatchContext {
    pub app_name: String,
    pub run_type: RunType,
    pub version: String,
    pub mode: Mode,
    pub project_path: PathBuf,
    pub jdk: Option<u32>,
    state: PatchState,
    backups: Vec<Backup>,
    env: Vec<(String, String)>,
    applied: Vec<String>,
}

impl PatchContext {
    pub fn new(
        app_name: impl Into<String>,
        run_type: RunType,
        version: impl Into<String>,
        mode: Mode,
        project_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            run_type,
            version: version.into(),
            mode,
            project_path: project_path.into(),
            jdk: None,
            state: PatchState::Idle,
            backups: Vec::new(),
            env: Vec::new(),
            applied: Vec::new(),
        }
    }

    pub fn with_jdk(mut self, jdk: Option<u32>) -> Self {
        self.jdk = jdk;
        self
    }

    pub fn state(&self) -> PatchState {
        self.state
    }

    pub fn set_state(&mut self, state: PatchState) {
        self.state = state;
    }

    /// Environment entries the run's processes must see
    pub fn env_overrides(&self) -> &[(String, String)] {
        &self.env
    }

    pub fn set_env(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.env.retain(|(k, _)| *k != key);
        self.env.push((key, value.into()));
    }

    /// Names of the patches that were applied
    pub fn applied(&self) -> &[String] {
        &self.applied
    }

    pub fn record_applied(&mut self, name: &str) {
        self.applied.push(name.to_string());
    }

    pub fn backups(&self) -> &[Backup] {
        &self.backups
    }

    pub fn take_backups(&mut self) -> Vec<Backup> {
        std::mem::take(&mut self.backups)
    }

    /// Remember the current content of `path` unless it is already backed up
    pub fn backup_file(&mut self, path: &Path) -> PitResult<()> {
        let already = self.backups.iter().any(|b| match b {
            Backup::Content { path: p, .. } => p == path,
            Backup::Moved { .. } => false,
        });
        if already {
            return Ok(());
        }
        let original = if path.exists() {
            Some(std::fs::read(path)?)
        } else {
            None
        };
        debug!("Backed up {}", path.display());
        self.backups.push(Backup::Content {
            path: path.to_path_buf(),
            original,
        });
        Ok(())
    }

    /// Move `original` to `aside`, to be moved back during cleanup
    pub fn move_aside(&mut self, original: &Path, aside: &Path) -> PitResult<()> {
        std::fs::rename(original, aside)?;
        self.backups.push(Backup::Moved {
            original: original.to_path_buf(),
            aside: aside.to_path_buf(),
        });
        Ok(())
    }

    pub fn project_file(&self, relative: &str) -> PathBuf {
        self.project_path.join(relative)
    }
}

/// Outcome of reverting a context; failures here are never fatal
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchCleanupReport {
    pub restored: usize,
    pub warnings: Vec<String>,
}

impl PatchCleanupReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Applies and reverts project patches
#[async_trait]
pub trait Patcher: Send + Sync {
    /// Variants that cannot run in this environment at all
    fn is_unsupported(&self, ctx: &PatchContext) -> bool;

    /// Apply every matching patch; fails before any build when a precondition is missing
    async fn apply(&self, ctx: &mut PatchContext) -> PitResult<()>;

    /// Restore all backups and mark the context reverted
    async fn cleanup(&self, ctx: &mut PatchContext) -> PatchCleanupReport;
}
