// SPDX-License-Identifier: MIT OR Apache-2.0
//! Command-line arguments.

use clap::Parser;
use std::path::PathBuf;

/// Load a saved node graph and run it headless
#[derive(Debug, Clone, PartialEq, Eq, Parser)]
#[command(name = "wireloom-runner", version, about, long_about = None)]
pub struct RunnerArgs {
    /// Graph file to run (`.ron` is read as RON, anything else as JSON)
    pub graph: PathBuf,
    /// RON settings file
    #[arg(long)]
    pub settings: Option<PathBuf>,
    /// Run exactly this many steps instead of a timed loop
    #[arg(long)]
    pub steps: Option<u32>,
    /// Timer interval; 0 means frame pacing
    #[arg(long, default_value_t = 0)]
    pub interval_ms: u64,
    /// Stop the timed loop after this long
    #[arg(long)]
    pub duration_ms: Option<u64>,
}
