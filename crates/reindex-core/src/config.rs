//! Run configuration
//!
//! Typed form of every operator-facing option. The CLI builds a
//! [`ReindexConfig`] once at startup; the supervisor and each worker process
//! build an identical one from the same arguments.

use reindex_common::{ReindexError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// Defaults
// ============================================================================

/// Default documents per `_bulk` request
pub const DEFAULT_BULK_SIZE: usize = 100;

/// Default page size for scroll requests
pub const DEFAULT_QUERY_SIZE: usize = 100;

/// Default scroll keep-alive
pub const DEFAULT_SCROLL: &str = "1m";

/// Default per-request timeout in milliseconds
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 60_000;

/// Default API version assumed for both clusters
pub const DEFAULT_API_VERSION: &str = "6.8";

/// Source versions that only understand the `search_type=scan` scroll shape
const LEGACY_VERSIONS: &[&str] = &["1.7", "0.90"];

/// Elasticsearch API version of one cluster, as given by the operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiVersion(String);

impl ApiVersion {
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the cluster predates `_doc` sorted scrolls and JSON scroll bodies
    pub fn is_legacy(&self) -> bool {
        LEGACY_VERSIONS.contains(&self.0.as_str())
    }

    /// Major version number, if the string starts with one
    pub fn major(&self) -> Option<u32> {
        self.0.split('.').next().and_then(|m| m.parse().ok())
    }

    /// Whether documents still carry a mapping type (`_type`)
    pub fn supports_types(&self) -> bool {
        self.major().is_none_or(|major| major < 7)
    }
}

impl Default for ApiVersion {
    fn default() -> Self {
        Self::new(DEFAULT_API_VERSION)
    }
}

impl std::fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a page's bulk sub-batches complete relative to each other
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Sub-batches settle in submission order
    #[default]
    Callback,
    /// Sub-batches settle in completion order
    Promise,
}

/// Cloud signing options supplied by the operator
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwsOptions {
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub region: Option<String>,
}

impl std::fmt::Debug for AwsOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsOptions")
            .field("access_key", &self.access_key)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("region", &self.region)
            .finish()
    }
}

/// Complete configuration of a reindex run
#[derive(Debug, Clone)]
pub struct ReindexConfig {
    /// Source cluster URI
    pub from: String,
    /// Destination cluster URI
    pub to: String,
    /// Worker write concurrency, also the shard count target for computed plans
    pub concurrency: usize,
    /// Documents per `_bulk` request
    pub bulk_size: usize,
    /// Page size of each scroll request
    pub query_size: usize,
    /// Raw query body merged into every shard's initial search
    pub search_body: Option<Map<String, Value>>,
    /// Scroll keep-alive, e.g. `1m`
    pub scroll: String,
    /// Discover cluster nodes on connect and after connection faults
    pub sniff_cluster: bool,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Log file shared by all processes of the run
    pub log_path: PathBuf,
    /// Per-shard document limit, `None` for unlimited
    pub max_docs: Option<u64>,
    pub from_version: ApiVersion,
    pub to_version: ApiVersion,
    /// Source field whose value becomes the destination parent/routing key
    pub parent: Option<String>,
    pub write_mode: WriteMode,
    /// Request compressed responses
    pub compress: bool,
    pub aws: AwsOptions,
    /// Overwrite existing documents instead of create-only writes
    pub update: bool,
    /// Index name used when a URI does not carry one
    pub index: Option<String>,
    /// Optional plugin file (sharding, query fragment, transform)
    pub plugin_path: Option<PathBuf>,
}

impl Default for ReindexConfig {
    fn default() -> Self {
        Self {
            from: String::new(),
            to: String::new(),
            concurrency: default_concurrency(),
            bulk_size: DEFAULT_BULK_SIZE,
            query_size: DEFAULT_QUERY_SIZE,
            search_body: None,
            scroll: DEFAULT_SCROLL.to_string(),
            sniff_cluster: false,
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            log_path: PathBuf::from(reindex_common::logging::DEFAULT_LOG_PATH),
            max_docs: None,
            from_version: ApiVersion::default(),
            to_version: ApiVersion::default(),
            parent: None,
            write_mode: WriteMode::default(),
            compress: false,
            aws: AwsOptions::default(),
            update: false,
            index: None,
            plugin_path: None,
        }
    }
}

impl ReindexConfig {
    /// Reject configurations that cannot start a run
    pub fn validate(&self) -> Result<()> {
        if self.from.trim().is_empty() || self.to.trim().is_empty() {
            return Err(ReindexError::config(
                "\"from\" and \"to\" parameters are required",
            ));
        }
        if self.concurrency == 0 {
            return Err(ReindexError::config("concurrency must be at least 1"));
        }
        if self.bulk_size == 0 {
            return Err(ReindexError::config("bulk size must be at least 1"));
        }
        if self.query_size == 0 {
            return Err(ReindexError::config("query size must be at least 1"));
        }
        if self.scroll.trim().is_empty() {
            return Err(ReindexError::config("scroll keep-alive must not be empty"));
        }
        Ok(())
    }
}

/// Number of CPUs, the default worker concurrency
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Negative limits mean unlimited
pub fn max_docs_from_signed(max_docs: i64) -> Option<u64> {
    u64::try_from(max_docs).ok()
}

/// Parse the raw `--search-body` argument into a JSON object
pub fn parse_search_body(raw: &str) -> Result<Option<Map<String, Value>>> {
    if raw.trim().is_empty() {
        return Ok(None);
    }

    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(Some(map)),
        other => Err(ReindexError::config(format!(
            "search body must be a JSON object, got: {}",
            other
        ))),
    }
}
