//! Output formatting for the report and the catalog listing

use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

use pit_harness::catalog::Catalog;
use pit_harness::report::{RunReport, ValidationResult};

/// Output format
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
    /// Plain text format
    Plain,
}

/// Items that can be displayed as a table row
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

impl TableDisplay for ValidationResult {
    fn headers() -> Vec<&'static str> {
        vec!["Variant", "Mode", "Version", "Status", "Step", "Duration"]
    }

    fn row(&self) -> Vec<String> {
        let status = if self.skipped {
            "- skipped".yellow().to_string()
        } else if self.success {
            "✓ passed".green().to_string()
        } else {
            "✗ failed".red().to_string()
        };
        vec![
            self.name.clone(),
            self.mode.to_string(),
            self.version.clone(),
            status,
            self.failed_step.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string()),
            format!("{:.1}s", self.duration_ms as f64 / 1000.0),
        ]
    }
}

#[derive(Serialize)]
struct CatalogEntry<'a> {
    name: &'a str,
    kind: &'static str,
}

impl TableDisplay for CatalogEntry<'_> {
    fn headers() -> Vec<&'static str> {
        vec!["Name", "Kind"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.name.to_string(), self.kind.to_string()]
    }
}

fn table_of<T: TableDisplay>(items: &[&T]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(T::headers());
    for item in items {
        table.add_row(item.row());
    }
    table
}

fn print_serialized<T: Serialize + ?Sized>(value: &T, format: OutputFormat) {
    match format {
        OutputFormat::Json => match serde_json::to_string_pretty(value) {
            Ok(s) => println!("{}", s),
            Err(e) => print_error(&format!("Cannot render JSON: {}", e)),
        },
        OutputFormat::Yaml => match serde_yaml::to_string(value) {
            Ok(s) => print!("{}", s),
            Err(e) => print_error(&format!("Cannot render YAML: {}", e)),
        },
        OutputFormat::Table | OutputFormat::Plain => {}
    }
}

/// Print the end-of-run report: successes first, then failures
pub fn print_report(report: &RunReport, format: OutputFormat) {
    match format {
        OutputFormat::Json | OutputFormat::Yaml => print_serialized(report, format),
        OutputFormat::Plain => print!("{}", report.render_plain()),
        OutputFormat::Table => {
            if report.results.is_empty() {
                println!("No validations were run.");
                return;
            }
            let ordered: Vec<&ValidationResult> = report.successes().chain(report.failures()).collect();
            println!("{}", table_of(&ordered));

            let warned: Vec<&ValidationResult> =
                report.results.iter().filter(|r| !r.warnings.is_empty()).collect();
            if !warned.is_empty() {
                println!();
                println!("{}", "Warnings:".bold());
                for result in warned {
                    for warning in &result.warnings {
                        print_warning(&format!("{}: {}", result.label(), warning));
                    }
                }
            }

            let failures: Vec<&ValidationResult> = report.failures().collect();
            if !failures.is_empty() {
                println!();
                println!("{}", "Failures:".bold());
                for result in failures {
                    println!("  {} {}", "✗".red(), result.label().bold());
                    if let Some(error) = &result.error {
                        for line in error.lines() {
                            println!("    {}", line.dimmed());
                        }
                    }
                }
            }

            println!();
            let summary = format!(
                "{} passed, {} failed, {} skipped in {:.1}s",
                report.passed,
                report.failed,
                report.skipped,
                report.duration_ms as f64 / 1000.0
            );
            if report.has_failures() {
                println!("{}", summary.red().bold());
            } else {
                println!("{}", summary.green().bold());
            }
        }
    }
}

/// Print the known presets and demos
pub fn print_catalog(catalog: &Catalog, format: OutputFormat) {
    let entries: Vec<CatalogEntry> = catalog
        .presets()
        .iter()
        .map(|name| CatalogEntry { name, kind: "preset" })
        .chain(catalog.demos().iter().map(|name| CatalogEntry { name, kind: "demo" }))
        .collect();

    match format {
        OutputFormat::Json | OutputFormat::Yaml => print_serialized(&entries, format),
        OutputFormat::Plain => {
            for entry in &entries {
                println!("{}", entry.name);
            }
        }
        OutputFormat::Table => {
            let refs: Vec<&CatalogEntry> = entries.iter().collect();
            println!("{}", table_of(&refs));
        }
    }
}

/// Print error message
pub fn print_error(message: &str) {
    eprintln!("❌ {}", message);
}

/// Print warning message
pub fn print_warning(message: &str) {
    println!("⚠️  {}", message);
}
