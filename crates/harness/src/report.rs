//! Validation results and the end-of-run report

use std::fmt::Write as _;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::Mode;
use crate::executor::LifecycleStep;

/// Outcome of one (variant, mode, version) validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub name: String,
    pub mode: Mode,
    pub version: String,
    pub success: bool,
    /// Not attempted: unsupported in this environment
    pub skipped: bool,
    pub error: Option<String>,
    pub error_kind: Option<String>,
    pub failed_step: Option<LifecycleStep>,
    /// Non-fatal findings such as deprecated API usage
    pub warnings: Vec<String>,
    pub duration_ms: u64,
}

impl ValidationResult {
    pub fn passed(name: &str, mode: Mode, version: &str, duration_ms: u64) -> Self {
        Self {
            name: name.to_string(),
            mode,
            version: version.to_string(),
            success: true,
            skipped: false,
            error: None,
            error_kind: None,
            failed_step: None,
            warnings: Vec::new(),
            duration_ms,
        }
    }

    pub fn failed(name: &str, mode: Mode, version: &str, error: &crate::error::PitError) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            error_kind: Some(error.kind().to_string()),
            ..Self::passed(name, mode, version, 0)
        }
    }

    pub fn skipped(name: &str, mode: Mode, version: &str, reason: &str) -> Self {
        Self {
            skipped: true,
            warnings: vec![reason.to_string()],
            ..Self::passed(name, mode, version, 0)
        }
    }

    /// `name mode version` label used in logs and reports
    pub fn label(&self) -> String {
        format!("{} {} {}", self.name, self.mode, self.version)
    }
}

/// Aggregated results of a whole run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub results: Vec<ValidationResult>,
}

impl RunReport {
    pub fn new(results: Vec<ValidationResult>, duration_ms: u64) -> Self {
        let failed = results.iter().filter(|r| !r.success).count();
        let skipped = results.iter().filter(|r| r.skipped).count();
        Self {
            total: results.len(),
            passed: results.len() - failed - skipped,
            failed,
            skipped,
            duration_ms,
            results,
        }
    }

    pub fn successes(&self) -> impl Iterator<Item = &ValidationResult> {
        self.results.iter().filter(|r| r.success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ValidationResult> {
        self.results.iter().filter(|r| !r.success)
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    /// 1 when any validation failed, 0 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.has_failures() {
            1
        } else {
            0
        }
    }

    /// Successes first, then failures with their messages
    pub fn render_plain(&self) -> String {
        let mut out = String::new();
        for r in self.successes() {
            if r.skipped {
                let _ = writeln!(out, "SKIPPED {}", r.label());
            } else {
                let _ = writeln!(out, "PASSED  {} ({} ms)", r.label(), r.duration_ms);
            }
            for w in &r.warnings {
                let _ = writeln!(out, "        warning: {}", w);
            }
        }
        for r in self.failures() {
            let step = r
                .failed_step
                .map(|s| format!(" at {}", s))
                .unwrap_or_default();
            let _ = writeln!(out, "FAILED  {}{}", r.label(), step);
            if let Some(e) = &r.error {
                for line in e.lines() {
                    let _ = writeln!(out, "        {}", line);
                }
            }
        }
        let _ = writeln!(
            out,
            "{} passed, {} failed, {} skipped in {:.1}s",
            self.passed,
            self.failed,
            self.skipped,
            self.duration_ms as f64 / 1000.0
        );
        out
    }

    /// Log the report through tracing
    pub fn log_results(&self) {
        for r in self.successes() {
            if r.skipped {
                warn!("Skipped {}", r.label());
            } else {
                info!("Passed {} ({} ms)", r.label(), r.duration_ms);
            }
        }
        for r in self.failures() {
            error!(
                "Failed {}: {}",
                r.label(),
                r.error.as_deref().unwrap_or("unknown error")
            );
        }
        info!(
            "Results: {} passed, {} failed, {} skipped ({} ms)",
            self.passed, self.failed, self.skipped, self.duration_ms
        );
    }
}
