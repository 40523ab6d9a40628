//! Bulk Writer
//!
//! Writes one page of documents into the destination cluster. The worker
//! only sees the [`BulkWriter`] trait; [`HttpBulkWriter`] is the `_bulk`
//! API implementation used by the binary.

use crate::config::WriteMode;
use crate::connection::{ConnectionDescriptor, RequestBody, Transport};
use crate::plugin::RecordTransform;
use crate::types::Hit;
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use reindex_common::{ReindexError, Result};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Re-submissions of items rejected with 429 before they count as failed
pub const MAX_ITEM_RETRIES: usize = 3;

const THROTTLE_BACKOFF: Duration = Duration::from_millis(500);

/// One page handed to the writer
pub struct BulkRequest<'a> {
    pub records: Vec<Hit>,
    pub destination: &'a ConnectionDescriptor,
    pub transform: Option<&'a dyn RecordTransform>,
    /// Sub-batches in flight at once
    pub concurrency: usize,
    /// Documents per `_bulk` request
    pub bulk_size: usize,
    /// Source field holding the parent id
    pub parent: Option<&'a str>,
    /// `index` (overwrite) instead of `create`
    pub update: bool,
    pub mode: WriteMode,
}

/// A document the destination refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedItem {
    pub id: String,
    pub status: u16,
    pub reason: String,
}

impl std::fmt::Display for FailedItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "document {} failed with status {}: {}", self.id, self.status, self.reason)
    }
}

/// Result of writing one page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub succeeded: u64,
    pub failed: Vec<FailedItem>,
}

impl BatchOutcome {
    pub fn merge(&mut self, other: BatchOutcome) {
        self.succeeded += other.succeeded;
        self.failed.extend(other.failed);
    }
}

/// Writes a page of documents to the destination
///
/// Item-level rejections are reported in the [`BatchOutcome`]; an `Err` is a
/// hard failure that must stop the worker.
#[async_trait]
pub trait BulkWriter: Send + Sync {
    async fn write(&self, request: BulkRequest<'_>) -> Result<BatchOutcome>;
}

/// [`BulkWriter`] over the `_bulk` HTTP API
#[derive(Debug)]
pub struct HttpBulkWriter {
    transport: Transport,
}

/// Per-page settings shared by every action line
struct ActionContext<'a> {
    index: Option<&'a str>,
    doc_type: Option<&'a str>,
    include_type: bool,
    legacy: bool,
    parent: Option<&'a str>,
    update: bool,
}

impl HttpBulkWriter {
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }

    async fn send_chunk(&self, docs: &[Hit], ctx: &ActionContext<'_>) -> Result<BatchOutcome> {
        let mut pending: Vec<&Hit> = docs.iter().collect();
        let mut outcome = BatchOutcome::default();

        for attempt in 0..=MAX_ITEM_RETRIES {
            let body = encode_bulk_body(&pending, ctx)?;
            let response = self
                .transport
                .request(Method::POST, "/_bulk", RequestBody::NdJson(body))
                .await
                .map_err(ReindexError::bulk_write)?;

            if !response.is_success() {
                return Err(ReindexError::bulk_write(format!(
                    "bulk request rejected with {}: {}",
                    response.status, response.body
                )));
            }

            let parsed: BulkResponse = response.json().map_err(ReindexError::bulk_write)?;
            if parsed.items.len() != pending.len() {
                return Err(ReindexError::bulk_write(format!(
                    "bulk response has {} items for {} documents",
                    parsed.items.len(),
                    pending.len()
                )));
            }

            let mut throttled = Vec::new();
            for (hit, item) in pending.into_iter().zip(parsed.items) {
                let Some(result) = item.into_values().next() else {
                    return Err(ReindexError::bulk_write("bulk response item without an action"));
                };

                if result.error.is_none() && (200..300).contains(&result.status) {
                    outcome.succeeded += 1;
                } else if result.status == 429 && attempt < MAX_ITEM_RETRIES {
                    throttled.push(hit);
                } else {
                    let reason = result.reason();
                    outcome.failed.push(FailedItem {
                        id: result.id.unwrap_or_else(|| hit.id.clone()),
                        status: result.status,
                        reason,
                    });
                }
            }

            if throttled.is_empty() {
                break;
            }

            warn!(count = throttled.len(), attempt = attempt + 1, "Destination throttled bulk items, retrying");
            tokio::time::sleep(THROTTLE_BACKOFF * (attempt as u32 + 1)).await;
            pending = throttled;
        }

        Ok(outcome)
    }
}

#[async_trait]
impl BulkWriter for HttpBulkWriter {
    async fn write(&self, request: BulkRequest<'_>) -> Result<BatchOutcome> {
        let records: Vec<Hit> = match request.transform {
            Some(transform) => request
                .records
                .into_iter()
                .map(|hit| transform.transform(hit))
                .collect(),
            None => request.records,
        };

        if records.is_empty() {
            return Ok(BatchOutcome::default());
        }

        let version = self.transport.api_version();
        let ctx = ActionContext {
            index: request.destination.index.as_deref(),
            doc_type: request.destination.doc_type.as_deref(),
            include_type: version.supports_types(),
            legacy: version.is_legacy(),
            parent: request.parent,
            update: request.update,
        };

        let chunks = records.chunks(request.bulk_size.max(1));
        let concurrency = request.concurrency.max(1);
        debug!(documents = records.len(), sub_batches = chunks.len(), "Writing page");

        let pending: Vec<_> = chunks.map(|chunk| self.send_chunk(chunk, &ctx)).collect();
        let requests = stream::iter(pending);
        let outcomes: Vec<BatchOutcome> = match request.mode {
            WriteMode::Callback => requests.buffered(concurrency).try_collect().await?,
            WriteMode::Promise => requests.buffer_unordered(concurrency).try_collect().await?,
        };

        let mut total = BatchOutcome::default();
        for outcome in outcomes {
            total.merge(outcome);
        }
        Ok(total)
    }
}

/// NDJSON body of one `_bulk` request
fn encode_bulk_body(docs: &[&Hit], ctx: &ActionContext<'_>) -> Result<String> {
    let mut body = String::new();
    for hit in docs {
        body.push_str(&serde_json::to_string(&action_line(hit, ctx))?);
        body.push('\n');
        body.push_str(&serde_json::to_string(&hit.source)?);
        body.push('\n');
    }
    Ok(body)
}

fn action_line(hit: &Hit, ctx: &ActionContext<'_>) -> Value {
    let mut meta = Map::new();
    meta.insert(
        "_index".to_string(),
        Value::String(ctx.index.unwrap_or(&hit.index).to_string()),
    );

    if ctx.include_type {
        if let Some(doc_type) = ctx.doc_type.or(hit.doc_type.as_deref()) {
            meta.insert("_type".to_string(), Value::String(doc_type.to_string()));
        }
    }

    meta.insert("_id".to_string(), Value::String(hit.id.clone()));

    let parent = ctx
        .parent
        .and_then(|field| hit.field_as_key(field))
        .or_else(|| hit.parent.clone());
    let (parent_key, routing_key) = if ctx.legacy {
        ("_parent", "_routing")
    } else {
        ("routing", "routing")
    };

    if let Some(parent) = parent {
        meta.insert(parent_key.to_string(), Value::String(parent));
    } else if let Some(routing) = &hit.routing {
        meta.insert(routing_key.to_string(), Value::String(routing.clone()));
    }

    let action = if ctx.update { "index" } else { "create" };
    let mut line = Map::new();
    line.insert(action.to_string(), Value::Object(meta));
    Value::Object(line)
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    items: Vec<HashMap<String, BulkItemResult>>,
}

#[derive(Debug, Deserialize)]
struct BulkItemResult {
    #[serde(rename = "_id")]
    id: Option<String>,
    status: u16,
    #[serde(default)]
    error: Option<Value>,
}

impl BulkItemResult {
    fn reason(&self) -> String {
        match &self.error {
            Some(Value::Object(error)) => error
                .get("reason")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| Value::Object(error.clone()).to_string()),
            Some(Value::String(reason)) => reason.clone(),
            Some(other) => other.to_string(),
            None => format!("status {}", self.status),
        }
    }
}
