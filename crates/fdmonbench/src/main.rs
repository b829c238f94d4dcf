// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Benchmarks Linux file descriptor readiness monitoring mechanisms against each other.
//!
//! # Usage
//!
//! ```bash
//! fdmonbench --engine=epoll --num-engines=4 --num-fds=64 --exclusive=1 --duration-secs=10
//! ```
//!
//! On success, two CSV lines are written to stdout: a header and the statistics of the run.
//! Diagnostics go to stderr. The process exits with code 1 if the configuration is rejected, if
//! setting up the benchmark fails or if the workload hits an I/O fault; the statistics gathered up
//! to a fault are still printed.

use std::fmt::Write as _;
use std::io::{self, Write};
use std::num::{NonZeroU64, NonZeroUsize};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use fdmon::{CancellationToken, Config, EngineKind, RunReport};
use tracing::level_filters::LevelFilter;

#[derive(Parser, Debug)]
#[command(
    name = "fdmonbench",
    version,
    about = "Benchmarks file descriptor readiness monitoring mechanisms"
)]
struct Cli {
    /// Readiness monitoring mechanism to benchmark.
    #[arg(long, value_name = "NAME", default_value = "select", long_help = engine_help())]
    engine: EngineKind,

    /// Number of engine instances watching the same descriptors.
    #[arg(long, value_name = "N", default_value = "1")]
    num_engines: NonZeroUsize,

    /// Number of descriptor pairs carrying traffic.
    #[arg(long, value_name = "N", default_value = "1")]
    num_fds: NonZeroUsize,

    /// Bytes per message.
    #[arg(long, value_name = "BYTES", default_value = "1")]
    msg_size: NonZeroUsize,

    /// Request exclusive wakeups (0 or 1). Only epoll and io_uring support this.
    #[arg(
        long,
        value_name = "0|1",
        default_value = "0",
        action = clap::ArgAction::Set,
        value_parser = parse_flag
    )]
    exclusive: bool,

    /// How long to run the workload.
    #[arg(long, value_name = "SECS", default_value = "30")]
    duration_secs: NonZeroU64,

    /// Log more detail to stderr. Repeat for even more.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn engine_help() -> String {
    let mut help = String::from("Readiness monitoring mechanism to benchmark.\n\nAvailable engines:");

    for kind in EngineKind::ALL {
        let exclusive = if kind.supports_exclusive() {
            ", supports --exclusive=1"
        } else {
            ""
        };

        _ = write!(help, "\n  {:<10} (alias {}{exclusive})", kind.name(), kind.alias());
    }

    help
}

fn parse_flag(value: &str) -> std::result::Result<bool, String> {
    match value {
        "0" => Ok(false),
        "1" => Ok(true),
        _ => Err(format!("expected 0 or 1, got {value:?}")),
    }
}

const fn log_level(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(log_level(cli.verbose))
        .with_writer(io::stderr)
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = Config::builder()
        .with_engine(cli.engine)
        .with_num_engines(cli.num_engines.get())
        .with_num_fds(cli.num_fds.get())
        .with_msg_size(cli.msg_size.get())
        .with_exclusive(cli.exclusive)
        .with_duration(Duration::from_secs(cli.duration_secs.get()))
        .build()
        .context("invalid configuration")?;

    let report = fdmon::run(&config, &CancellationToken::new())
        .with_context(|| format!("failed to set up {} benchmark", config.engine()))?;

    finish(report, io::stdout().lock())
}

/// Writes the statistics to `out`, also when the run ended with a fault, and then reports the fault.
fn finish(report: RunReport, out: impl Write) -> Result<()> {
    report
        .stats()
        .write_csv(out)
        .context("failed to write statistics")?;

    report.into_result().context("benchmark aborted")?;

    Ok(())
}
