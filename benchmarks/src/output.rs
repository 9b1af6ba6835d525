//! Report output for the stresslab binaries.
//!
//! Supports:
//! - JSON output for machine parsing and run-to-run comparison
//! - Colored console summaries

use colored::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use stresslab_core::churn::RoleSummary;
use stresslab_core::{SessionReport, ThroughputReport};

/// Envelope written around every report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport<T> {
    /// Report version for forward compatibility
    pub version: String,
    /// Timestamp when report was generated
    pub generated_at: String,
    /// Which binary produced it
    pub tool: String,
    /// CI run ID (if available)
    pub ci_run_id: Option<String>,
    pub body: T,
}

impl<T> RunReport<T> {
    /// Wrap `body` with the current timestamp
    pub fn new(tool: &str, body: T) -> Self {
        Self {
            version: "1.0.0".to_string(),
            generated_at: chrono::Utc::now().to_rfc3339(),
            tool: tool.to_string(),
            ci_run_id: std::env::var("CI_RUN_ID")
                .or_else(|_| std::env::var("GITHUB_RUN_ID"))
                .ok(),
            body,
        }
    }
}

/// Write a report as pretty JSON
pub fn write_json_report<T: Serialize, P: AsRef<Path>>(
    report: &RunReport<T>,
    path: P,
) -> std::io::Result<()> {
    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, report)?;
    Ok(())
}

fn rate(value: f64) -> String {
    if value >= 1e6 {
        format!("{:.2}M", value / 1e6)
    } else if value >= 1e3 {
        format!("{:.2}k", value / 1e3)
    } else {
        format!("{:.2}", value)
    }
}

pub fn print_throughput_report(report: &ThroughputReport) {
    println!(
        "\n{} {} ({} ch, {}, chunk {}, {} batches)",
        "THROUGHPUT".cyan().bold(),
        report.stream,
        report.channels,
        report.format,
        report.chunk_size,
        report.batches
    );
    for (label, direction) in [("push", &report.push), ("pull", &report.pull)] {
        let ops = match (direction.operations, direction.ops_per_sec) {
            (Some(ops), Some(per_sec)) => format!(", {} ops ({} ops/s)", ops, rate(per_sec)),
            _ => String::new(),
        };
        println!(
            "  {:5} {} samples in {:.3}s: {} samples/s{}",
            label.bold(),
            direction.samples,
            direction.elapsed_secs,
            rate(direction.samples_per_sec).green(),
            ops
        );
    }
}

fn print_role(label: &str, role: &RoleSummary) {
    println!(
        "  {:9} spawned {:>5}  retired {:>5}  endpoints {:>6}  samples {:>10}",
        label.bold(),
        role.spawned,
        role.retired,
        role.endpoints_opened,
        role.samples
    );
    let failed = if role.failed > 0 {
        role.failed.to_string().red()
    } else {
        role.failed.to_string().normal()
    };
    println!(
        "            completed {:>5}  not-found {:>5}  timeout {:>5}  failed {:>5}  panics {:>3}",
        role.completed, role.not_found, role.timeouts, failed, role.panics
    );
}

pub fn print_churn_summary(report: &SessionReport) {
    println!(
        "\n{} ran {:.1}s",
        "CHURN".cyan().bold(),
        report.elapsed_secs
    );
    print_role("producers", &report.summary.producers);
    print_role("consumers", &report.summary.consumers);
    let spawn_failures = report.producer_controller.spawn_failures
        + report.consumer_controller.spawn_failures;
    if spawn_failures > 0 {
        println!(
            "{} {} worker spawn(s) failed",
            "WARN".yellow().bold(),
            spawn_failures
        );
    }
}
