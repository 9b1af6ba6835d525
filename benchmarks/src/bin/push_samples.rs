//! Push/pull throughput of one producer/consumer pair.
//!
//! Usage:
//!   push_samples [numchans=32] [format=0] [maxsamples=500000] [chunksize=100]
//!                [push_single=0] [pull_single=0]
//!
//! `format` 1 selects string samples instead of float32; `1` for either
//! `*_single` switches that side to per-sample calls.

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use std::io;
use std::path::PathBuf;
use stresslab_benchmarks::{
    init_logging, launched_without_args, print_throughput_report, wait_for_enter, write_json_report,
    RunReport,
};
use stresslab_core::{run_throughput, ChannelFormat, LoopbackTransport, StressError, ThroughputConfig};

#[derive(Parser)]
#[command(name = "push_samples")]
#[command(about = "Measure push/pull throughput over the loopback transport")]
struct Cli {
    /// Number of channels
    #[arg(default_value_t = 32)]
    numchans: u32,

    /// 0 = float32, 1 = string
    #[arg(default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=1))]
    format: u8,

    /// Total samples per direction
    #[arg(default_value_t = 500_000)]
    maxsamples: u64,

    /// Samples per batch
    #[arg(default_value_t = 100)]
    chunksize: usize,

    /// 1 = push one sample per call
    #[arg(default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=1))]
    push_single: u8,

    /// 1 = pull one sample per call
    #[arg(default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=1))]
    pull_single: u8,

    /// Write the report as JSON
    #[arg(long = "json")]
    json: Option<PathBuf>,
}

impl Cli {
    fn throughput_config(&self) -> ThroughputConfig {
        ThroughputConfig {
            channels: self.numchans,
            format: if self.format == 1 {
                ChannelFormat::String
            } else {
                ChannelFormat::Float32
            },
            max_samples: self.maxsamples,
            chunk_size: self.chunksize,
            push_single: self.push_single == 1,
            pull_single: self.pull_single == 1,
            ..Default::default()
        }
    }
}

fn main() -> Result<()> {
    let interactive = launched_without_args();
    let cli = Cli::parse();
    init_logging("info");

    let config = cli.throughput_config();
    let transport = LoopbackTransport::new();
    let report = match run_throughput(&transport, &config) {
        Ok(report) => report,
        Err(e @ StressError::StartupFailed(_)) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };
    print_throughput_report(&report);

    if let Some(path) = &cli.json {
        write_json_report(&RunReport::new("push_samples", &report), path)
            .with_context(|| format!("writing {}", path.display()))?;
    }

    if interactive {
        wait_for_enter(&mut io::stdin().lock(), &mut io::stdout())?;
    }
    Ok(())
}
