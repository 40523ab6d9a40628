//! Scroll Cursor
//!
//! Paginated extraction of one shard from the source cluster.
//!
//! ```text
//!   Init ──open()──► Paging ──next_page()──► Done
//!     │                 │
//!     └──── error ──────┴──────► Failed
//! ```
//!
//! The first page arrives with the initial search (empty for legacy `scan`
//! searches). Continuation pages are requested with the scroll id until the
//! per-shard quota is reached or the cluster returns an empty page.

use crate::connection::{RequestBody, RetryPolicy, Transport};
use crate::query::ScanQuery;
use crate::types::Hit;
use async_trait::async_trait;
use reindex_common::{ReindexError, Result};
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

/// One page of search results
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScrollPage {
    pub scroll_id: Option<String>,
    /// Total hits of the whole search, not of this page
    pub total: u64,
    pub hits: Vec<Hit>,
}

/// Source of scroll pages
#[async_trait]
pub trait ScrollSource: Send + Sync {
    /// Issue the initial search
    async fn search(&self, query: &ScanQuery) -> Result<ScrollPage>;

    /// Exchange a scroll id for the next page
    async fn scroll(&self, scroll_id: &str, keep_alive: &str) -> Result<ScrollPage>;
}

/// [`ScrollSource`] backed by the `_search` and `_search/scroll` HTTP APIs
#[derive(Debug)]
pub struct SearchClient {
    transport: Transport,
}

impl SearchClient {
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }

    async fn fetch(&self, path: &str, body: RequestBody, retry: RetryPolicy) -> Result<ScrollPage> {
        let response = self
            .transport
            .request_with(Method::POST, path, body, retry)
            .await
            .map_err(|e| ReindexError::scroll_fetch(e.to_string()))?;

        if !response.is_success() {
            return Err(ReindexError::scroll_fetch(format!(
                "{} {}",
                response.status, response.body
            )));
        }

        let parsed: SearchResponse = serde_json::from_str(&response.body).map_err(|e| {
            ReindexError::scroll_fetch(format!("failed to parse search response: {}", e))
        })?;

        Ok(ScrollPage {
            scroll_id: parsed.scroll_id,
            total: parsed.hits.total.map(TotalHits::value).unwrap_or(0),
            hits: parsed.hits.hits,
        })
    }
}

#[async_trait]
impl ScrollSource for SearchClient {
    async fn search(&self, query: &ScanQuery) -> Result<ScrollPage> {
        let body = if query.body.is_empty() {
            RequestBody::Empty
        } else {
            RequestBody::Json(serde_json::Value::Object(query.body.clone()))
        };
        self.fetch(&query.search_path(), body, RetryPolicy::Standard).await
    }

    /// A repeated scroll request could skip a page the node already served,
    /// so only connection failures are retried
    async fn scroll(&self, scroll_id: &str, keep_alive: &str) -> Result<ScrollPage> {
        if self.transport.api_version().is_legacy() {
            let path = format!("/_search/scroll?scroll={}", urlencoding::encode(keep_alive));
            self.fetch(&path, RequestBody::Text(scroll_id.to_string()), RetryPolicy::ConnectOnly)
                .await
        } else {
            let body = json!({ "scroll": keep_alive, "scroll_id": scroll_id });
            self.fetch("/_search/scroll", RequestBody::Json(body), RetryPolicy::ConnectOnly)
                .await
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(rename = "_scroll_id")]
    scroll_id: Option<String>,
    hits: SearchHits,
}

#[derive(Debug, Deserialize)]
struct SearchHits {
    #[serde(default)]
    total: Option<TotalHits>,
    #[serde(default)]
    hits: Vec<Hit>,
}

/// `hits.total` is a number before 7.0 and `{ "value": n }` after
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TotalHits {
    Count(u64),
    Object { value: u64 },
}

impl TotalHits {
    fn value(self) -> u64 {
        match self {
            TotalHits::Count(n) | TotalHits::Object { value: n } => n,
        }
    }
}

/// Lifecycle of a cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorPhase {
    Init,
    Paging,
    Done,
    Failed,
}

/// Running counters of one shard
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScrollState {
    pub scroll_id: Option<String>,
    /// Documents handed to the writer so far
    pub processed: u64,
    /// Documents the writer reported as failed
    pub failed: u64,
    /// Hits to process, already clipped to the per-shard maximum
    pub total: u64,
}

/// Drives paginated extraction for one shard
pub struct ScrollCursor<'a, S: ScrollSource + ?Sized> {
    source: &'a S,
    query: ScanQuery,
    max_docs: Option<u64>,
    phase: CursorPhase,
    state: ScrollState,
    first_page: Option<Vec<Hit>>,
}

impl<'a, S: ScrollSource + ?Sized> ScrollCursor<'a, S> {
    pub fn new(source: &'a S, query: ScanQuery, max_docs: Option<u64>) -> Self {
        Self {
            source,
            query,
            max_docs,
            phase: CursorPhase::Init,
            state: ScrollState::default(),
            first_page: None,
        }
    }

    pub fn phase(&self) -> CursorPhase {
        self.phase
    }

    pub fn state(&self) -> &ScrollState {
        &self.state
    }

    /// Issue the initial search and return the clipped total
    #[instrument(skip(self), fields(path = %self.query.search_path()))]
    pub async fn open(&mut self) -> Result<u64> {
        if self.phase != CursorPhase::Init {
            return Ok(self.state.total);
        }

        let page = match self.source.search(&self.query).await {
            Ok(page) => page,
            Err(e) => return Err(self.fail(e)),
        };

        let total = match self.max_docs {
            Some(max) => page.total.min(max),
            None => page.total,
        };
        debug!(reported = page.total, total, "Initial search completed");

        self.state.total = total;
        self.state.scroll_id = page.scroll_id;

        if total == 0 {
            self.phase = CursorPhase::Done;
        } else {
            self.phase = CursorPhase::Paging;
            self.first_page = Some(page.hits);
        }
        Ok(total)
    }

    /// Next non-empty page, or `None` once the shard is exhausted
    pub async fn next_page(&mut self) -> Result<Option<Vec<Hit>>> {
        if self.phase != CursorPhase::Paging {
            return Ok(None);
        }

        if let Some(first) = self.first_page.take() {
            if !first.is_empty() {
                return Ok(Some(self.take_quota(first)));
            }
        }

        if self.state.processed >= self.state.total {
            self.phase = CursorPhase::Done;
            return Ok(None);
        }

        let Some(scroll_id) = self.state.scroll_id.clone() else {
            return Err(self.fail(ReindexError::scroll_fetch("search returned no scroll id")));
        };

        let page = match self.source.scroll(&scroll_id, &self.query.scroll).await {
            Ok(page) => page,
            Err(e) => return Err(self.fail(e)),
        };

        if let Some(next_id) = page.scroll_id {
            self.state.scroll_id = Some(next_id);
        }

        if page.hits.is_empty() {
            debug!(processed = self.state.processed, "Scroll returned an empty page");
            self.phase = CursorPhase::Done;
            return Ok(None);
        }

        Ok(Some(self.take_quota(page.hits)))
    }

    /// Count documents the writer could not deliver
    pub fn record_failures(&mut self, failed: u64) {
        self.state.failed += failed;
    }

    /// Truncate a page to what is left of the quota
    fn take_quota(&mut self, mut hits: Vec<Hit>) -> Vec<Hit> {
        let remaining = self.state.total.saturating_sub(self.state.processed);
        let keep = usize::try_from(remaining).unwrap_or(usize::MAX);
        hits.truncate(keep);
        self.state.processed += hits.len() as u64;
        hits
    }

    fn fail(&mut self, err: ReindexError) -> ReindexError {
        self.phase = CursorPhase::Failed;
        err
    }
}
