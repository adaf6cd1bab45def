//! Harness configuration
//!
//! [`PitConfig`] is built once at startup (defaults, then an optional TOML
//! file, then command-line flags) and validated before any variant runs.
//! Nothing downstream reads configuration by string key.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use crate::error::{PitError, PitResult};

/// Version label used for the project as generated, before any upgrade.
pub const CURRENT_VERSION: &str = "current";

/// Timeout granted to the `start` preset, whose dev-mode frontend build is slow.
const SLOW_FRONTEND_TIMEOUT_SECS: u64 = 500;
const SLOW_FRONTEND_THRESHOLD_SECS: u64 = 300;

/// Validation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Dev,
    Prod,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Dev => "dev",
            Mode::Prod => "prod",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which axis of the version matrix a run belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunType {
    /// The project exactly as generated or checked out
    Current,
    /// The project upgraded to the requested target version
    Next,
}

impl fmt::Display for RunType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunType::Current => f.write_str("current"),
            RunType::Next => f.write_str("next"),
        }
    }
}

/// Harness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PitConfig {
    /// HTTP port the application under test listens on
    pub port: u16,

    /// Seconds to wait for a server to become ready
    pub timeout_secs: u64,

    /// Target version; `current` means only the generated version is validated
    pub version: String,

    /// Comma-separated starter selection (`!name` excludes)
    pub starters: String,

    /// Directory where projects are generated or checked out
    pub work_dir: PathBuf,

    /// Directory holding the UI test scripts
    pub tests_dir: PathBuf,

    /// Mirror server output to the console
    pub verbose: bool,

    /// Reuse existing checkouts and build without network
    pub offline: bool,

    /// Pause for manual testing once the application is ready
    pub interactive: bool,

    /// Upper bound for the interactive pause
    pub interactive_timeout_secs: u64,

    pub skip_tests: bool,
    pub skip_current: bool,
    pub skip_dev: bool,
    pub skip_prod: bool,
    pub skip_pw: bool,

    /// Run browsers without a window
    pub headless: bool,

    /// Show the steps and commands without running them
    pub dry_run: bool,

    /// Build the frontend with pnpm
    pub pnpm: bool,

    /// Build the frontend with vite
    pub vite: bool,

    /// Clone demos over ssh instead of https
    pub git_ssh: bool,

    /// Token for variants that read from the GitHub API; falls back to `GHTK`
    pub github_token: Option<String>,
}

impl Default for PitConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            timeout_secs: 300,
            version: CURRENT_VERSION.to_string(),
            starters: String::new(),
            work_dir: PathBuf::from("tmp"),
            tests_dir: PathBuf::from("its"),
            verbose: false,
            offline: false,
            interactive: false,
            interactive_timeout_secs: 600,
            skip_tests: false,
            skip_current: false,
            skip_dev: false,
            skip_prod: false,
            skip_pw: false,
            headless: true,
            dry_run: false,
            pnpm: false,
            vite: false,
            git_ssh: false,
            github_token: None,
        }
    }
}

impl PitConfig {
    /// Load configuration from a TOML file, or defaults when it does not exist
    pub fn load(path: &Path) -> PitResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Reject configurations that cannot possibly run
    pub fn validate(&self, catalog: &Catalog) -> PitResult<()> {
        let mut errors = Vec::new();

        if self.port == 0 {
            errors.push("port must be between 1 and 65535".to_string());
        }
        if self.timeout_secs == 0 {
            errors.push("timeout must be positive".to_string());
        }
        if self.version.trim().is_empty() {
            errors.push("version must not be empty".to_string());
        }

        for entry in self.starters.split(',').map(str::trim) {
            let name = entry.trim_start_matches('!');
            if name.is_empty() || entry.starts_with('!') {
                continue;
            }
            if !catalog.is_known(name) {
                errors.push(format!("unknown starter: {}", name));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(PitError::Configuration(errors.join("; ")))
        }
    }

    /// Target version when it differs from the generated one
    pub fn target_version(&self) -> Option<&str> {
        let v = self.version.trim();
        if v.is_empty() || v == CURRENT_VERSION {
            None
        } else {
            Some(v)
        }
    }

    /// Versions to validate, in order
    pub fn versions(&self) -> Vec<(RunType, String)> {
        let mut versions = Vec::new();
        if !self.skip_current {
            versions.push((RunType::Current, CURRENT_VERSION.to_string()));
        }
        if let Some(target) = self.target_version() {
            versions.push((RunType::Next, target.to_string()));
        }
        versions
    }

    /// Modes to validate, in order
    pub fn modes(&self) -> Vec<Mode> {
        let mut modes = Vec::new();
        if !self.skip_dev {
            modes.push(Mode::Dev);
        }
        if !self.skip_prod {
            modes.push(Mode::Prod);
        }
        modes
    }

    /// Readiness timeout for one variant
    pub fn timeout_for(&self, variant: &str) -> Duration {
        if variant == "start" && self.timeout_secs <= SLOW_FRONTEND_THRESHOLD_SECS {
            Duration::from_secs(SLOW_FRONTEND_TIMEOUT_SECS)
        } else {
            Duration::from_secs(self.timeout_secs)
        }
    }

    /// Whether the external UI tests should run at all
    pub fn ui_tests_enabled(&self) -> bool {
        !self.skip_tests && !self.skip_pw
    }

    pub fn interactive_timeout(&self) -> Duration {
        Duration::from_secs(self.interactive_timeout_secs)
    }

    pub fn base_url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }
}

/// Facts about the host, detected once at entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeEnvironment {
    /// Platform label used in output file names (`linux`, `macos`, ...)
    pub platform: String,
    /// Running inside GitHub Actions
    pub is_ci: bool,
}

impl RuntimeEnvironment {
    pub fn detect() -> Self {
        Self {
            platform: std::env::consts::OS.to_string(),
            is_ci: std::env::var("GITHUB_ACTIONS").map(|v| v == "true").unwrap_or(false),
        }
    }

    /// Timeout handed to UI scripts for their own element waits
    pub fn ui_wait_timeout(&self) -> Duration {
        if self.is_ci {
            Duration::from_secs(60)
        } else {
            Duration::from_secs(180)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versions_include_target_only_when_distinct() {
        let mut config = PitConfig::default();
        assert_eq!(config.versions(), vec![(RunType::Current, "current".to_string())]);

        config.version = "24.9.0".to_string();
        assert_eq!(
            config.versions(),
            vec![
                (RunType::Current, "current".to_string()),
                (RunType::Next, "24.9.0".to_string()),
            ]
        );

        config.skip_current = true;
        assert_eq!(config.versions(), vec![(RunType::Next, "24.9.0".to_string())]);
    }

    #[test]
    fn test_modes_respect_skips() {
        let mut config = PitConfig::default();
        assert_eq!(config.modes(), vec![Mode::Dev, Mode::Prod]);
        config.skip_dev = true;
        assert_eq!(config.modes(), vec![Mode::Prod]);
        config.skip_prod = true;
        assert!(config.modes().is_empty());
    }

    #[test]
    fn test_start_gets_extended_timeout() {
        let config = PitConfig::default();
        assert_eq!(config.timeout_for("start"), Duration::from_secs(500));
        assert_eq!(config.timeout_for("react"), Duration::from_secs(300));

        let long = PitConfig {
            timeout_secs: 900,
            ..Default::default()
        };
        assert_eq!(long.timeout_for("start"), Duration::from_secs(900));
    }

    #[test]
    fn test_validate_reports_every_problem() {
        let config = PitConfig {
            port: 0,
            timeout_secs: 0,
            starters: "react,not-a-starter,!default".to_string(),
            ..Default::default()
        };
        let err = config.validate(&Catalog::default()).unwrap_err().to_string();
        assert!(err.contains("port"));
        assert!(err.contains("timeout"));
        assert!(err.contains("not-a-starter"));
        assert!(!err.contains("default"));
    }

    #[test]
    fn test_load_partial_toml_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pit.toml");
        std::fs::write(&path, "port = 9090\nskip_prod = true\n").unwrap();

        let config = PitConfig::load(&path).unwrap();
        assert_eq!(config.port, 9090);
        assert!(config.skip_prod);
        assert_eq!(config.timeout_secs, 300);
        assert!(config.headless);
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let config = PitConfig::load(Path::new("/nonexistent/pit.toml")).unwrap();
        assert_eq!(config.port, 8080);
    }
}
