//! Error types for validation runs

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PitError {
    #[error("Port {port} is already in use")]
    PortBusy { port: u16 },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Compilation failed (exit code {exit_code:?}): {command}{}", format_diagnostics(.diagnostics))]
    Compile {
        command: String,
        exit_code: Option<i32>,
        diagnostics: Vec<String>,
    },

    #[error("Timeout after {seconds}s waiting for {waiting_for}{}", format_locations(.checked))]
    Timeout {
        waiting_for: String,
        seconds: u64,
        checked: Vec<CheckedLocation>,
    },

    #[error("HTTP servlet check failed for {url} after {attempts} attempts")]
    ServletCheck { url: String, attempts: usize },

    #[error("Frontend compilation failed: {0}")]
    Frontend(String),

    #[error("UI test '{test}' failed: {reason}")]
    UiTestFailure { test: String, reason: String },

    #[error("Dev bundle was created in dev mode at {0} - it should come from the platform")]
    DevBundleCreated(PathBuf),

    #[error("Required command not found: {0}")]
    MissingCommand(String),

    #[error("Project setup failed: {0}")]
    ProjectSetup(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// A place the readiness poller looked at before giving up, with the tail of
/// what it found there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckedLocation {
    pub location: String,
    pub last_lines: Vec<String>,
}

impl PitError {
    /// Errors that abort the whole batch instead of failing one validation.
    pub fn is_batch_fatal(&self) -> bool {
        matches!(self, PitError::MissingCommand(_))
    }

    /// Short machine-friendly kind, used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            PitError::PortBusy { .. } => "port-busy",
            PitError::Configuration(_) => "configuration",
            PitError::Compile { .. } => "compile",
            PitError::Timeout { .. } => "timeout",
            PitError::ServletCheck { .. } => "servlet-check",
            PitError::Frontend(_) => "frontend",
            PitError::UiTestFailure { .. } => "ui-test",
            PitError::DevBundleCreated(_) => "dev-bundle",
            PitError::MissingCommand(_) => "missing-command",
            PitError::ProjectSetup(_) => "project-setup",
            PitError::Process(_) => "process",
            PitError::Io(_)
            | PitError::Http(_)
            | PitError::Pattern(_)
            | PitError::Json(_)
            | PitError::Toml(_) => "internal",
        }
    }
}

fn format_diagnostics(lines: &[String]) -> String {
    if lines.is_empty() {
        String::new()
    } else {
        format!("\n  {}", lines.join("\n  "))
    }
}

fn format_locations(checked: &[CheckedLocation]) -> String {
    let mut out = String::new();
    for loc in checked {
        out.push_str(&format!("\n  checked {}", loc.location));
        for line in &loc.last_lines {
            out.push_str(&format!("\n    | {}", line));
        }
    }
    out
}

pub type PitResult<T> = Result<T, PitError>;
