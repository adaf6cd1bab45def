//! PiT Harness
//!
//! Validation orchestration for generated starters and demo applications:
//! - Prepares each selected variant (download, generate or clone)
//! - Patches, builds and starts it in dev and prod mode
//! - Waits for readiness, probes the servlet and hands over to a UI test
//! - Always reverts patches and stops every process it started
//!
//! # Architecture
//!
//! ```text
//! RunCoordinator
//!   for variant -> ProjectSource::prepare
//!     for version x mode -> ValidationExecutor::execute
//!       PortCheck -> PatchApply -> Compile -> Start -> ReadinessWait
//!       -> Interactive? -> ModeChecks -> UiProbe -> ExternalUiTest
//!       -> Cleanup (always)
//!     ProcessSupervisor::kill_all
//!   RunReport
//! ```

pub mod catalog;
pub mod commands;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod operator;
pub mod patch;
pub mod process;
pub mod project;
pub mod readiness;
pub mod report;

pub use catalog::{Catalog, Variant, VariantKind};
pub use config::{Mode, PitConfig, RunType, RuntimeEnvironment};
pub use coordinator::RunCoordinator;
pub use error::{PitError, PitResult};
pub use executor::{ExecutorDeps, ExecutorSettings, LifecycleStep, ValidationExecutor, ValidationPlan};
pub use process::{ProcessRegistry, ProcessSupervisor};
pub use project::{ProjectOptions, ProjectSource, ShellProjectSource};
pub use report::{RunReport, ValidationResult};

/// Harness version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
