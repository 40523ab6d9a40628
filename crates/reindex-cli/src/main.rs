//! es-reindex - Main entry point

use clap::Parser;
use reindex_cli::commands::{self, preflight_failure};
use reindex_cli::Cli;
use reindex_common::logging::{init_logging, LogConfig, LogOutput};
use reindex_core::plugin::PluginConfig;
use reindex_core::ShardSpec;
use std::process::ExitCode;

fn main() -> ExitCode {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let config = match cli.to_config() {
        Ok(config) => config,
        Err(e) => return preflight_failure(e),
    };

    let plugin = match config.plugin_path.as_deref().map(PluginConfig::load).transpose() {
        Ok(plugin) => plugin,
        Err(e) => return preflight_failure(e),
    };

    // Set only when started by a supervisor
    let shard = match ShardSpec::from_env() {
        Ok(shard) => shard,
        Err(e) => return preflight_failure(e),
    };

    // Supervisor and workers share one log file; stdout belongs to the
    // progress protocol in workers and to the bar in the supervisor
    let log_config = LogConfig::builder()
        .output(LogOutput::File)
        .log_path(config.log_path.clone())
        .build();
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    let _guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Warning: logging disabled: {:#}", e);
            None
        },
    };

    match shard {
        Some(shard) => commands::worker::run(&config, plugin.as_ref(), shard),
        None => commands::supervise::run(&config, plugin.as_ref()),
    }
}
