//! PiT CLI - Main Entry Point
//!
//! Builds, starts and validates generated starters and demo applications in
//! dev and prod mode, then prints a report. Exit code 0 when everything
//! passed, 1 when any validation failed, 2 when the run could not start.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use pit_harness::catalog::Catalog;
use pit_harness::config::{PitConfig, RuntimeEnvironment};
use pit_harness::coordinator::RunCoordinator;
use pit_harness::executor::ExecutorDeps;
use pit_harness::process::{install_shutdown_hook, ProcessRegistry, ProcessSupervisor};
use pit_harness::project::{ProjectOptions, ShellProjectSource};

mod output;

use output::OutputFormat;

/// Exit code when the batch is aborted before any validation runs
const EXIT_ABORTED: i32 = 2;

/// PiT - Platform in Test
#[derive(Parser, Debug)]
#[command(name = "pit")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Target version to validate in addition to the generated one
    #[arg(long, value_name = "VERSION")]
    vaadin_version: Option<String>,

    /// Port the application under test listens on [default: 8080]
    #[arg(long)]
    port: Option<u16>,

    /// Seconds to wait for a server to become ready [default: 300]
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Comma-separated variants; `!name` excludes, `name:branch` picks a branch
    #[arg(long, value_name = "LIST")]
    starters: Option<String>,

    /// Select from demos only
    #[arg(long, conflicts_with = "generated")]
    demos: bool,

    /// Select from generated presets only
    #[arg(long)]
    generated: bool,

    /// Print the known presets and demos and exit
    #[arg(long)]
    list: bool,

    #[arg(long)]
    skip_dev: bool,

    #[arg(long)]
    skip_prod: bool,

    /// Skip the UI tests
    #[arg(long)]
    skip_tests: bool,

    /// Skip the Playwright based UI tests
    #[arg(long)]
    skip_pw: bool,

    /// Only validate the target version
    #[arg(long)]
    skip_current: bool,

    /// Reuse existing checkouts and build without network
    #[arg(long)]
    offline: bool,

    /// Pause once each application is ready for manual testing
    #[arg(long)]
    interactive: bool,

    /// Run browsers without a window
    #[arg(long, conflicts_with = "headed")]
    headless: bool,

    /// Run browsers with a window
    #[arg(long)]
    headed: bool,

    /// Show build and server output
    #[arg(short, long)]
    verbose: bool,

    /// Debug logging
    #[arg(long)]
    debug: bool,

    /// Show the steps and commands without running them
    #[arg(long = "test")]
    dry_run: bool,

    /// Build the frontend with pnpm
    #[arg(long)]
    pnpm: bool,

    /// Build the frontend with vite
    #[arg(long)]
    vite: bool,

    /// Clone demos over ssh
    #[arg(long)]
    git_ssh: bool,

    /// GitHub token for variants that call the GitHub API
    #[arg(long, env = "GHTK", hide_env_values = true)]
    ghtk: Option<String>,

    /// Where projects are generated or checked out [default: tmp]
    #[arg(long, value_name = "DIR")]
    work_dir: Option<PathBuf>,

    /// Directory with the UI test scripts [default: its]
    #[arg(long, value_name = "DIR")]
    tests_dir: Option<PathBuf>,

    /// TOML file with default settings
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Output format of the report
    #[arg(long, value_enum, default_value = "table")]
    format: OutputFormat,
}

impl Cli {
    /// Layer the flags given on the command line over `config`
    fn apply(&self, config: &mut PitConfig) {
        if let Some(v) = &self.vaadin_version {
            config.version = v.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(timeout) = self.timeout {
            config.timeout_secs = timeout;
        }
        if let Some(starters) = &self.starters {
            config.starters = starters.clone();
        }
        if let Some(dir) = &self.work_dir {
            config.work_dir = dir.clone();
        }
        if let Some(dir) = &self.tests_dir {
            config.tests_dir = dir.clone();
        }
        if self.ghtk.is_some() {
            config.github_token = self.ghtk.clone();
        }
        if self.headless {
            config.headless = true;
        }
        if self.headed {
            config.headless = false;
        }

        config.skip_dev |= self.skip_dev;
        config.skip_prod |= self.skip_prod;
        config.skip_tests |= self.skip_tests;
        config.skip_pw |= self.skip_pw;
        config.skip_current |= self.skip_current;
        config.offline |= self.offline;
        config.interactive |= self.interactive;
        config.verbose |= self.verbose;
        config.dry_run |= self.dry_run;
        config.pnpm |= self.pnpm;
        config.vite |= self.vite;
        config.git_ssh |= self.git_ssh;
    }

    fn catalog(&self) -> Catalog {
        let catalog = Catalog::default();
        if self.demos {
            catalog.only_demos()
        } else if self.generated {
            catalog.only_presets()
        } else {
            catalog
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging; stdout is kept for the report
    let filter = if cli.debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else if cli.verbose {
        tracing_subscriber::EnvFilter::new("info,pit_harness=debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            output::print_error(&format!("{:#}", e));
            EXIT_ABORTED
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let catalog = cli.catalog();
    if cli.list {
        output::print_catalog(&catalog, cli.format);
        return Ok(0);
    }

    let mut config = match &cli.config {
        Some(path) => PitConfig::load(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => PitConfig::default(),
    };
    cli.apply(&mut config);
    config.validate(&catalog)?;

    let env = RuntimeEnvironment::detect();
    info!(
        "PiT v{} on {}{}",
        pit_harness::VERSION,
        env.platform,
        if env.is_ci { " (CI)" } else { "" }
    );

    let registry = Arc::new(ProcessRegistry::new());
    install_shutdown_hook(Arc::clone(&registry));
    let processes: Arc<dyn ProcessSupervisor> = registry;

    let deps = ExecutorDeps::system(Arc::clone(&processes), &config)?;
    let projects = Arc::new(ShellProjectSource::new(
        Arc::clone(&processes),
        ProjectOptions::from(&config),
    ));
    let dry_run = config.dry_run;
    let coordinator = RunCoordinator::new(config, catalog, &env, deps, projects);

    if !dry_run {
        coordinator.preflight()?;
    }

    let report = coordinator.run().await;
    report.log_results();
    output::print_report(&report, cli.format);
    Ok(report.exit_code())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_command_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_target_version_does_not_clash_with_version_flag() {
        let cli = Cli::parse_from(["pit", "--vaadin-version", "24.5.0"]);
        let mut config = PitConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.version, "24.5.0");

        let err = Cli::try_parse_from(["pit", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_flags_override_file_values() {
        let cli = Cli::parse_from([
            "pit",
            "--port",
            "9090",
            "--starters",
            "react,!default",
            "--skip-prod",
            "--headed",
            "--test",
        ]);
        let mut config = PitConfig {
            port: 8081,
            timeout_secs: 120,
            ..PitConfig::default()
        };
        cli.apply(&mut config);

        assert_eq!(config.port, 9090);
        assert_eq!(config.timeout_secs, 120);
        assert_eq!(config.starters, "react,!default");
        assert!(config.skip_prod);
        assert!(!config.skip_dev);
        assert!(!config.headless);
        assert!(config.dry_run);
    }

    #[test]
    fn test_demos_and_generated_conflict() {
        assert!(Cli::try_parse_from(["pit", "--demos", "--generated"]).is_err());
        let cli = Cli::parse_from(["pit", "--demos"]);
        assert!(cli.catalog().presets().is_empty());
    }
}
