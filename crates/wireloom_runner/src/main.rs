// SPDX-License-Identifier: MIT OR Apache-2.0
//! Wireloom Runner - headless host for node graphs.
//!
//! Loads engine settings and a saved graph, then either runs a fixed number
//! of steps or starts the graph on a timer until it stops, the requested
//! duration elapses or Ctrl-C arrives. The values shown by `basic/watch`
//! nodes are printed as JSON on exit.

mod args;
mod catalog;
mod scheduler;

use args::RunnerArgs;
use clap::Parser;
use std::time::Duration;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use wireloom_graph::{
    load_graph, GraphSettings, LoadError, RegistryError, SettingsError, StepError, StepOutcome,
};

/// Anything that ends the run early
#[derive(Debug, thiserror::Error)]
enum RunnerError {
    #[error("Failed to load settings: {0}")]
    Settings(#[from] SettingsError),

    #[error("Failed to build node catalog: {0}")]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("Graph faulted: {0}")]
    Step(#[from] StepError),

    #[error("Runtime error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode results: {0}")]
    Json(#[from] serde_json::Error),
}

fn main() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("wireloom=info"));

    // stdout carries the results
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // clap exits with its own usage message on bad arguments
    let args = RunnerArgs::parse();
    match run(args) {
        Ok(()) => {}
        Err(e) => {
            tracing::error!("Runner failed: {e}");
            std::process::exit(1);
        }
    }
}

fn run(args: RunnerArgs) -> Result<(), RunnerError> {
    tracing::info!("Starting Wireloom Runner v{}", env!("CARGO_PKG_VERSION"));

    let settings = match &args.settings {
        Some(path) => GraphSettings::load(path)?,
        None => GraphSettings::default(),
    };
    let registry = catalog::registry()?;
    let (mut graph, report) = load_graph(&args.graph, &registry, settings)?;
    if !report.is_clean() {
        tracing::warn!(
            missing = ?report.missing_types,
            failed = ?report.failed_nodes,
            "Graph loaded with errors"
        );
    }
    tracing::info!(
        nodes = graph.node_count(),
        links = graph.link_count(),
        "Loaded {}",
        args.graph.display()
    );

    match args.steps {
        Some(steps) => {
            if let StepOutcome::Faulted(err) = graph.run_step(steps, None) {
                return Err(err.into());
            }
        }
        None => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            graph.start(args.interval_ms);
            let duration = args.duration_ms.map(Duration::from_millis);
            let summary = runtime.block_on(scheduler::run(&mut graph, duration))?;
            tracing::info!(ticks = summary.ticks, "Run ended ({:?})", summary.reason);
        }
    }

    let values = catalog::watched_values(&graph);
    println!("{}", serde_json::to_string_pretty(&values)?);
    Ok(())
}
