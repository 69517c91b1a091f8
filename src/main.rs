// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: CLI entry point for the clock topology extractor.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! CLI entry point for the clock topology extractor.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use env_logger::Env;
use log::{info, LevelFilter};

use clock_topology::config::MAX_CLOCKS_LIMIT;
use clock_topology::{
    ClockExtractor, ClockMapping, ClockTopology, DeviceTree, DiagFs, ExtractConfig,
};

const DEFAULT_DTB: &str = "/sys/firmware/fdt";

/// Clock topology extractor command-line arguments.
#[derive(Debug, Parser)]
#[command(author = "Lukas Bower", version, about = "Device tree clock topology reporter", long_about = None)]
struct Cli {
    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate the clock report for a device tree blob.
    Report(ReportArgs),
    /// Print a captured clock report one input per line.
    Inspect {
        /// Report file to read.
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

#[derive(Debug, Args)]
struct ReportArgs {
    /// Flattened device tree blob to walk.
    #[arg(long, value_name = "FILE", default_value = DEFAULT_DTB)]
    dtb: PathBuf,

    /// Configuration TOML; falls back to $CLOCK_TOPOLOGY_CONFIG.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Resolve and report the rate of every clock input.
    #[arg(long)]
    resolve_frequencies: bool,

    /// Override the number of clock inputs considered per node.
    #[arg(long, value_name = "N")]
    max_clocks: Option<usize>,

    /// Write the report here instead of stdout.
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,
}

fn init_logging(verbose: bool) {
    let default_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    let mut builder =
        env_logger::Builder::from_env(Env::default().default_filter_or(default_level.as_str()));
    builder.format_timestamp_millis();
    let _ = builder.try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match cli.command {
        Command::Report(args) => run_report(args),
        Command::Inspect { file } => run_inspect(&file),
    }
}

fn run_report(args: ReportArgs) -> Result<()> {
    let mut config = ExtractConfig::load_or_default(args.config.as_deref())
        .context("failed to load configuration")?;
    if args.resolve_frequencies {
        config.report.resolve_frequencies = true;
    }
    if let Some(max_clocks) = args.max_clocks {
        if !(1..=MAX_CLOCKS_LIMIT).contains(&max_clocks) {
            bail!("--max-clocks must be within 1..={MAX_CLOCKS_LIMIT}");
        }
        config.report.max_clocks = max_clocks;
    }

    let blob = fs::read(&args.dtb)
        .with_context(|| format!("failed to read device tree {}", args.dtb.display()))?;
    let tree = DeviceTree::from_fdt(&blob)
        .with_context(|| format!("failed to parse device tree {}", args.dtb.display()))?;
    info!("loaded {} nodes from {}", tree.len(), args.dtb.display());

    let topology = ClockTopology::from_config(Arc::new(tree), &config);
    let mut diag = DiagFs::new();
    let extractor = ClockExtractor::load(&mut diag, &config.mount, topology)
        .context("failed to register clock report")?;
    let mut report = diag
        .open(&extractor.file_path())
        .context("failed to open clock report")?;

    match &args.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            let mut out = BufWriter::new(file);
            io::copy(&mut report, &mut out)?;
            out.flush()?;
        }
        None => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            io::copy(&mut report, &mut out)?;
            out.flush()?;
        }
    }

    extractor
        .unload(&mut diag)
        .context("failed to remove clock report")?;
    Ok(())
}

fn run_inspect(path: &Path) -> Result<()> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let mapping = ClockMapping::parse(&text)
        .with_context(|| format!("{} is not a clock report", path.display()))?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for (node, inputs) in mapping.entries() {
        for (index, info) in inputs.iter().enumerate() {
            let parent = info.parent_name.as_deref().unwrap_or("-");
            match info.rate() {
                Some(rate) => writeln!(out, "{node}\t{index}\t{parent}\t{rate}")?,
                None => writeln!(out, "{node}\t{index}\t{parent}")?,
            }
        }
    }
    out.flush()?;
    Ok(())
}
