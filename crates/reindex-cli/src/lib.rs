//! es-reindex CLI Library
//!
//! Command-line surface of the distributed reindexer.
//!
//! # Overview
//!
//! The same binary runs in two modes:
//!
//! - **Supervisor** (default): plans shards, starts one worker process per
//!   shard, shows a progress bar and prints the final summary
//! - **Worker**: started by the supervisor with its shard in
//!   `REINDEX_WORKER_SHARD`; migrates that shard and reports progress as
//!   JSON lines on stdout
//!
//! Workers are started with the supervisor's own arguments, so both modes
//! parse the same [`Cli`].

pub mod commands;
pub mod progress;

use clap::{ArgAction, Parser};
use reindex_core::config::{
    self, AwsOptions, ApiVersion, ReindexConfig, WriteMode, DEFAULT_API_VERSION, DEFAULT_BULK_SIZE,
    DEFAULT_QUERY_SIZE, DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_SCROLL,
};
use reindex_common::logging::DEFAULT_LOG_PATH;
use std::path::PathBuf;
use std::time::Duration;

/// es-reindex - reindex documents between Elasticsearch clusters
#[derive(Parser, Debug, Clone)]
#[command(name = "es-reindex")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Source cluster, e.g. http://192.168.1.100:9200/index/type
    #[arg(short = 'f', long, env = "ES_REINDEX_FROM")]
    pub from: Option<String>,

    /// Destination cluster, e.g. http://192.168.1.100:9200/index/type
    #[arg(short = 't', long, env = "ES_REINDEX_TO")]
    pub to: Option<String>,

    /// Concurrent bulk requests per worker and shard count of computed plans (default: CPU count)
    #[arg(short = 'c', long, env = "ES_REINDEX_CONCURRENCY")]
    pub concurrency: Option<usize>,

    /// Documents per bulk request
    #[arg(short = 'b', long, env = "ES_REINDEX_BULK", default_value_t = DEFAULT_BULK_SIZE)]
    pub bulk: usize,

    /// Page size of each scroll request
    #[arg(short = 'q', long, alias = "query_size", env = "ES_REINDEX_QUERY_SIZE", default_value_t = DEFAULT_QUERY_SIZE)]
    pub query_size: usize,

    /// JSON search body for a partial extract, e.g. '{"query":{"term":{"user":"kimchy"}}}'
    #[arg(short = 'r', long, alias = "search_body", env = "ES_REINDEX_SEARCH_BODY", default_value = "")]
    pub search_body: String,

    /// Scroll keep-alive
    #[arg(short = 's', long, env = "ES_REINDEX_SCROLL", default_value = DEFAULT_SCROLL)]
    pub scroll: String,

    /// Discover the rest of the cluster on connect and after connection faults
    #[arg(
        short = 'i',
        long,
        alias = "sniff_cluster",
        env = "ES_REINDEX_SNIFF_CLUSTER",
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_value_t = false,
        default_missing_value = "true"
    )]
    pub sniff_cluster: bool,

    /// Per-request timeout in milliseconds
    #[arg(short = 'o', long, alias = "request_timeout", env = "ES_REINDEX_REQUEST_TIMEOUT", default_value_t = DEFAULT_REQUEST_TIMEOUT_MS)]
    pub request_timeout: u64,

    /// Log file shared by the supervisor and all workers
    #[arg(short = 'l', long, alias = "log_path", env = "ES_REINDEX_LOG_PATH", default_value = DEFAULT_LOG_PATH)]
    pub log_path: PathBuf,

    /// Maximum documents per shard, -1 for unlimited
    #[arg(short = 'n', long, alias = "max_docs", env = "ES_REINDEX_MAX_DOCS", default_value_t = -1, allow_negative_numbers = true)]
    pub max_docs: i64,

    /// API version of the source cluster
    #[arg(long, alias = "from_ver", env = "ES_REINDEX_FROM_VER", default_value = DEFAULT_API_VERSION)]
    pub from_ver: String,

    /// API version of the destination cluster
    #[arg(long, alias = "to_ver", env = "ES_REINDEX_TO_VER", default_value = DEFAULT_API_VERSION)]
    pub to_ver: String,

    /// Source field used as the parent of each document
    #[arg(short = 'p', long, env = "ES_REINDEX_PARENT")]
    pub parent: Option<String>,

    /// Settle bulk sub-batches in completion order instead of submission order
    #[arg(
        short = 'm',
        long,
        env = "ES_REINDEX_PROMISE",
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_value_t = false,
        default_missing_value = "true"
    )]
    pub promise: bool,

    /// Request compressed responses
    #[arg(
        short = 'z',
        long,
        env = "ES_REINDEX_COMPRESS",
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_value_t = false,
        default_missing_value = "true"
    )]
    pub compress: bool,

    /// AWS access key
    #[arg(short = 'a', long, alias = "access_key", env = "ES_REINDEX_ACCESS_KEY", hide_env_values = true)]
    pub access_key: Option<String>,

    /// AWS secret key
    #[arg(short = 'k', long, alias = "secret_key", env = "ES_REINDEX_SECRET_KEY", hide_env_values = true)]
    pub secret_key: Option<String>,

    /// AWS region; enables request signing for *.amazonaws.* hosts
    #[arg(short = 'e', long, env = "ES_REINDEX_REGION")]
    pub region: Option<String>,

    /// Create or overwrite documents instead of create-only writes
    #[arg(
        short = 'u',
        long,
        env = "ES_REINDEX_UPDATE",
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_value_t = false,
        default_missing_value = "true"
    )]
    pub update: bool,

    /// Index name used when a cluster URI does not carry one
    #[arg(short = 'x', long, env = "ES_REINDEX_INDEX")]
    pub index: Option<String>,

    /// Plugin file (YAML or JSON) with sharding, query and transform settings
    pub plugin: Option<PathBuf>,
}

impl Cli {
    /// Typed, validated run configuration
    pub fn to_config(&self) -> reindex_core::Result<ReindexConfig> {
        let config = ReindexConfig {
            from: self.from.clone().unwrap_or_default(),
            to: self.to.clone().unwrap_or_default(),
            concurrency: self
                .concurrency
                .unwrap_or_else(config::default_concurrency),
            bulk_size: self.bulk,
            query_size: self.query_size,
            search_body: config::parse_search_body(&self.search_body)
                .map_err(|e| reindex_core::ReindexError::config(format!("invalid --search-body: {}", e)))?,
            scroll: self.scroll.clone(),
            sniff_cluster: self.sniff_cluster,
            request_timeout: Duration::from_millis(self.request_timeout),
            log_path: self.log_path.clone(),
            max_docs: config::max_docs_from_signed(self.max_docs),
            from_version: ApiVersion::new(&self.from_ver),
            to_version: ApiVersion::new(&self.to_ver),
            parent: self.parent.clone().filter(|p| !p.is_empty()),
            write_mode: if self.promise {
                WriteMode::Promise
            } else {
                WriteMode::Callback
            },
            compress: self.compress,
            aws: AwsOptions {
                access_key: self.access_key.clone(),
                secret_key: self.secret_key.clone(),
                region: self.region.clone(),
            },
            update: self.update,
            index: self.index.clone().filter(|i| !i.is_empty()),
            plugin_path: self.plugin.clone(),
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("es-reindex").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&["-f", "source:9200/logs", "-t", "dest:9200/logs"]);
        let config = cli.to_config().unwrap();

        assert_eq!(config.bulk_size, 100);
        assert_eq!(config.query_size, 100);
        assert_eq!(config.scroll, "1m");
        assert_eq!(config.request_timeout, Duration::from_millis(60_000));
        assert_eq!(config.log_path, PathBuf::from("./reindex.log"));
        assert_eq!(config.max_docs, None);
        assert_eq!(config.from_version.as_str(), "6.8");
        assert_eq!(config.write_mode, WriteMode::Callback);
        assert!(!config.sniff_cluster);
        assert!(!config.update);
        assert!(config.concurrency >= 1);
        assert!(config.plugin_path.is_none());
    }

    #[test]
    fn test_flags_and_plugin() {
        let cli = parse(&[
            "--from",
            "http://a:9200/src",
            "--to",
            "http://b:9200/dst",
            "--concurrency",
            "4",
            "--max-docs",
            "500",
            "--from-ver",
            "1.7",
            "--promise",
            "--update=true",
            "--compress=false",
            "-p",
            "account_id",
            "--search-body",
            r#"{"query":{"match_all":{}}}"#,
            "plugin.yaml",
        ]);
        let config = cli.to_config().unwrap();

        assert_eq!(config.concurrency, 4);
        assert_eq!(config.max_docs, Some(500));
        assert!(config.from_version.is_legacy());
        assert_eq!(config.write_mode, WriteMode::Promise);
        assert!(config.update);
        assert!(!config.compress);
        assert_eq!(config.parent.as_deref(), Some("account_id"));
        assert!(config.search_body.unwrap().contains_key("query"));
        assert_eq!(config.plugin_path, Some(PathBuf::from("plugin.yaml")));
    }

    #[test]
    fn test_underscore_aliases() {
        let cli = parse(&["-f", "a", "-t", "b", "--query_size", "50", "--max_docs", "-1"]);
        assert_eq!(cli.query_size, 50);
        assert_eq!(cli.to_config().unwrap().max_docs, None);
    }

    #[test]
    fn test_missing_endpoints_and_bad_body_are_config_errors() {
        let err = parse(&["-f", "a"]).to_config().unwrap_err();
        assert!(err.is_preflight());

        let err = parse(&["-f", "a", "-t", "b", "-r", "[1]"]).to_config().unwrap_err();
        assert!(err.is_preflight());
    }
}
