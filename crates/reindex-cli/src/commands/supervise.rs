//! Supervisor mode
//!
//! Plans the shards, starts one worker process per shard and renders the
//! aggregate progress until every worker is done.

use super::{preflight_failure, EXIT_FAILURE};
use crate::progress::{format_summary, BarObserver};
use anyhow::Context;
use chrono::Utc;
use colored::Colorize;
use reindex_core::plugin::PluginConfig;
use reindex_core::shard::plan_shards;
use reindex_core::supervisor::{ProcessLauncher, Supervisor};
use reindex_core::{ConnectionDescriptor, ReindexConfig, RunSummary, ShardSpec};
use std::process::ExitCode;
use tracing::{error, info, warn};

pub fn run(config: &ReindexConfig, plugin: Option<&PluginConfig>) -> ExitCode {
    let shards = match preflight(config, plugin) {
        Ok(shards) => shards,
        Err(e) => {
            error!(error = %e, "Pre-flight check failed");
            return preflight_failure(e);
        },
    };

    println!("Starting reindex in {} shards.", shards.len());
    if shards.len() > 1 {
        if let Some(max_docs) = config.max_docs {
            println!(
                "{} --max-docs {} applies to each of the {} shards",
                "!".yellow(),
                max_docs,
                shards.len()
            );
        }
    }

    match execute(shards) {
        Ok(summary) => {
            for line in format_summary(&summary, &config.log_path) {
                println!("{}", line);
            }
            if summary.failed_workers == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_FAILURE)
            }
        },
        Err(e) => {
            error!(error = %format!("{:#}", e), "Supervisor failed");
            eprintln!("Error: {:#}", e);
            ExitCode::from(EXIT_FAILURE)
        },
    }
}

/// Checks that would otherwise fail in every worker at once
fn preflight(
    config: &ReindexConfig,
    plugin: Option<&PluginConfig>,
) -> reindex_core::Result<Vec<ShardSpec>> {
    for uri in [&config.from, &config.to] {
        ConnectionDescriptor::parse(uri)?.with_aws(&config.aws)?;
    }

    let shards = plan_shards(plugin, config.concurrency, Utc::now())?;
    info!(
        shards = shards.len(),
        names = ?shards.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
        "Planned shards"
    );
    Ok(shards)
}

fn execute(shards: Vec<ShardSpec>) -> anyhow::Result<RunSummary> {
    let launcher = ProcessLauncher::current().context("Failed to locate the es-reindex binary")?;
    let mut observer = BarObserver::new(shards.len());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start supervisor runtime")?;

    let summary = runtime.block_on(Supervisor::new(launcher, shards).run(&mut observer))?;
    if summary.failed_workers > 0 {
        warn!(failed_workers = summary.failed_workers, "Some workers failed");
    }
    Ok(summary)
}
