//! Worker mode
//!
//! Migrates the shard handed over by the supervisor and reports progress on
//! stdout. Runs on a current-thread runtime: one worker is one process.

use super::EXIT_FAILURE;
use anyhow::Context;
use reindex_core::plugin::PluginConfig;
use reindex_core::worker::run_worker;
use reindex_core::{ReindexConfig, ShardSpec};
use std::process::ExitCode;
use tracing::{error, info};

pub fn run(config: &ReindexConfig, plugin: Option<&PluginConfig>, shard: ShardSpec) -> ExitCode {
    let name = shard.name.clone();

    match execute(config, plugin, shard) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(shard = %name, error = %format!("{:#}", e), "Worker failed");
            eprintln!("Error: {:#}", e);
            ExitCode::from(EXIT_FAILURE)
        },
    }
}

fn execute(
    config: &ReindexConfig,
    plugin: Option<&PluginConfig>,
    shard: ShardSpec,
) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start worker runtime")?;

    let name = shard.name.clone();
    let outcome = runtime
        .block_on(run_worker(config, plugin, shard))
        .with_context(|| format!("shard {} could not be reindexed", name))?;

    info!(
        shard = %outcome.shard,
        total = outcome.total,
        delivered = outcome.delivered,
        failed = outcome.failed,
        "Worker finished"
    );
    Ok(())
}
