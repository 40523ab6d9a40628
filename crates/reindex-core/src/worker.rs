//! Worker Coordinator
//!
//! Runs inside a worker process and migrates exactly one shard: open the
//! scroll, hand each page to the bulk writer, report progress, repeat. The
//! next page is fetched only after the current page's writes have settled.

use crate::bulk::{BulkRequest, BulkWriter, HttpBulkWriter};
use crate::config::{ApiVersion, ReindexConfig, WriteMode};
use crate::connection::{ConnectionDescriptor, Transport, TransportConfig};
use crate::plugin::{PluginConfig, RecordTransform};
use crate::progress::{ProgressEvent, ProgressSink, StdoutSink};
use crate::query::ScanQuery;
use crate::scroll::{ScrollCursor, ScrollSource, SearchClient};
use crate::shard::ShardSpec;
use reindex_common::Result;
use tracing::{debug, info, instrument, warn};

/// Write-side settings of a worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    pub concurrency: usize,
    pub bulk_size: usize,
    pub parent: Option<String>,
    pub update: bool,
    pub mode: WriteMode,
    pub max_docs: Option<u64>,
}

impl WorkerSettings {
    pub fn from_config(config: &ReindexConfig) -> Self {
        Self {
            concurrency: config.concurrency,
            bulk_size: config.bulk_size,
            parent: config.parent.clone(),
            update: config.update,
            mode: config.write_mode,
            max_docs: config.max_docs,
        }
    }
}

/// Counters of a finished shard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardOutcome {
    pub shard: String,
    pub total: u64,
    pub processed: u64,
    pub delivered: u64,
    pub failed: u64,
}

/// Migrates one shard
pub struct WorkerCoordinator {
    shard: ShardSpec,
    query: ScanQuery,
    destination: ConnectionDescriptor,
    settings: WorkerSettings,
    transform: Option<Box<dyn RecordTransform>>,
}

impl WorkerCoordinator {
    pub fn new(
        shard: ShardSpec,
        query: ScanQuery,
        destination: ConnectionDescriptor,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            shard,
            query,
            destination,
            settings,
            transform: None,
        }
    }

    pub fn with_transform(mut self, transform: Option<Box<dyn RecordTransform>>) -> Self {
        self.transform = transform;
        self
    }

    /// Drive the shard to completion
    ///
    /// Item failures are counted and logged; a scroll error or a hard writer
    /// error ends the shard with `Err`.
    #[instrument(skip_all, fields(shard = %self.shard.name))]
    pub async fn run<S, W, P>(&self, source: &S, writer: &W, sink: &P) -> Result<ShardOutcome>
    where
        S: ScrollSource + ?Sized,
        W: BulkWriter + ?Sized,
        P: ProgressSink + ?Sized,
    {
        let mut cursor = ScrollCursor::new(source, self.query.clone(), self.settings.max_docs);
        let total = cursor.open().await?;

        let mut outcome = ShardOutcome {
            shard: self.shard.name.clone(),
            total,
            processed: 0,
            delivered: 0,
            failed: 0,
        };

        if total == 0 {
            info!("No documents can be found!");
            return Ok(outcome);
        }

        sink.send(ProgressEvent::Total {
            shard_id: self.shard.name.clone(),
            total,
        })?;

        while let Some(records) = cursor.next_page().await? {
            let page_size = records.len();
            let result = writer
                .write(BulkRequest {
                    records,
                    destination: &self.destination,
                    transform: self.transform.as_deref(),
                    concurrency: self.settings.concurrency,
                    bulk_size: self.settings.bulk_size,
                    parent: self.settings.parent.as_deref(),
                    update: self.settings.update,
                    mode: self.settings.mode,
                })
                .await?;

            for item in &result.failed {
                warn!(id = %item.id, status = item.status, reason = %item.reason, "Document was not reindexed");
            }
            let failed = result.failed.len() as u64;
            cursor.record_failures(failed);
            outcome.delivered += result.succeeded;

            debug!(page_size, succeeded = result.succeeded, failed, "Page written");
            sink.send(ProgressEvent::Tick {
                success_count: result.succeeded,
            })?;
        }

        outcome.processed = cursor.state().processed;
        outcome.failed = cursor.state().failed;

        if outcome.failed > 0 {
            info!(
                failed = outcome.failed,
                "{} Total {} documents have been processed! about {} documents reindex failed",
                outcome.shard,
                outcome.processed,
                outcome.failed
            );
        } else {
            info!(
                "{} Total {} documents have been processed!",
                outcome.shard, outcome.processed
            );
        }

        Ok(outcome)
    }
}

/// Connect both clusters and migrate `shard`, reporting to stdout
pub async fn run_worker(
    config: &ReindexConfig,
    plugin: Option<&PluginConfig>,
    shard: ShardSpec,
) -> Result<ShardOutcome> {
    let (source, source_transport) = resolve(&config.from, config, &config.from_version)?;
    let (destination, destination_transport) = resolve(&config.to, config, &config.to_version)?;
    debug!(source = %source.base_url(), destination = %destination.base_url(), "Resolved clusters");

    let query = ScanQuery::for_version(
        &config.from_version,
        source.index.clone(),
        source.doc_type.clone(),
        config.scroll.clone(),
        config.query_size,
    )
    .with_range_default(shard.range.as_ref())
    .merge_body(plugin.and_then(|p| p.query.as_ref()))
    .merge_body(config.search_body.as_ref());

    let transform = plugin
        .and_then(PluginConfig::record_transform)
        .map(|t| Box::new(t) as Box<dyn RecordTransform>);

    let search = SearchClient::new(Transport::connect(source, source_transport).await?);
    let writer =
        HttpBulkWriter::new(Transport::connect(destination.clone(), destination_transport).await?);

    WorkerCoordinator::new(shard, query, destination, WorkerSettings::from_config(config))
        .with_transform(transform)
        .run(&search, &writer, &StdoutSink)
        .await
}

fn resolve(
    uri: &str,
    config: &ReindexConfig,
    version: &ApiVersion,
) -> Result<(ConnectionDescriptor, TransportConfig)> {
    let descriptor = ConnectionDescriptor::parse(uri)?
        .with_aws(&config.aws)?
        .with_default_index(config.index.as_deref());
    let transport = TransportConfig::new(version.clone(), config.request_timeout)
        .with_compression(config.compress)
        .with_sniff(config.sniff_cluster);
    Ok((descriptor, transport))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::bulk::{BatchOutcome, FailedItem};
    use crate::scroll::tests::{hits, FakeSource};
    use crate::types::Hit;
    use async_trait::async_trait;
    use reindex_common::ReindexError;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// Fails the listed ids and optionally every call from a given index on
    #[derive(Default)]
    struct FakeWriter {
        reject_ids: HashSet<String>,
        hard_fail_on_call: Option<usize>,
        calls: Mutex<Vec<(usize, usize, Option<String>, bool)>>,
    }

    #[async_trait]
    impl BulkWriter for FakeWriter {
        async fn write(&self, request: BulkRequest<'_>) -> Result<BatchOutcome> {
            let mut calls = self.calls.lock().unwrap();
            if self.hard_fail_on_call == Some(calls.len()) {
                return Err(ReindexError::bulk_write("destination unavailable"));
            }
            calls.push((
                request.records.len(),
                request.bulk_size,
                request.parent.map(str::to_string),
                request.update,
            ));

            let records: Vec<Hit> = match request.transform {
                Some(t) => request.records.into_iter().map(|h| t.transform(h)).collect(),
                None => request.records,
            };
            let (failed, ok): (Vec<Hit>, Vec<Hit>) = records
                .into_iter()
                .partition(|h| self.reject_ids.contains(&h.id));
            Ok(BatchOutcome {
                succeeded: ok.len() as u64,
                failed: failed
                    .into_iter()
                    .map(|h| FailedItem {
                        id: h.id,
                        status: 400,
                        reason: "mapper_parsing_exception".to_string(),
                    })
                    .collect(),
            })
        }
    }

    fn coordinator(max_docs: Option<u64>) -> WorkerCoordinator {
        WorkerCoordinator::new(
            ShardSpec::single(),
            ScanQuery::for_version(&ApiVersion::default(), Some("logs".into()), None, "1m", 100),
            ConnectionDescriptor::parse("http://dest:9200/logs").unwrap(),
            WorkerSettings {
                concurrency: 2,
                bulk_size: 25,
                parent: Some("account".to_string()),
                update: true,
                mode: WriteMode::Promise,
                max_docs,
            },
        )
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_zero_hits_sends_nothing() {
        let source = FakeSource::new(0, Vec::new(), Vec::new());
        let writer = FakeWriter::default();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let outcome = coordinator(None).run(&source, &writer, &tx).await.unwrap();

        assert_eq!(outcome.total, 0);
        assert!(drain(&mut rx).is_empty());
        assert!(writer.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pages_flow_into_ticks() {
        let source = FakeSource::new(50, hits("a", 20), vec![hits("b", 20), hits("c", 10)]);
        let writer = FakeWriter {
            reject_ids: ["b-3".to_string()].into_iter().collect(),
            ..FakeWriter::default()
        };
        let (tx, mut rx) = mpsc::unbounded_channel();

        let outcome = coordinator(None).run(&source, &writer, &tx).await.unwrap();

        assert_eq!(
            drain(&mut rx),
            vec![
                ProgressEvent::Total { shard_id: "single".into(), total: 50 },
                ProgressEvent::Tick { success_count: 20 },
                ProgressEvent::Tick { success_count: 19 },
                ProgressEvent::Tick { success_count: 10 },
            ]
        );
        assert_eq!(outcome.processed, 50);
        assert_eq!(outcome.delivered, 49);
        assert_eq!(outcome.failed, 1);

        let calls = writer.calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0], (20, 25, Some("account".to_string()), true));
    }

    #[tokio::test]
    async fn test_max_docs_limits_written_documents() {
        let source = FakeSource::new(500, hits("a", 100), vec![hits("b", 100)]);
        let writer = FakeWriter::default();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let outcome = coordinator(Some(130)).run(&source, &writer, &tx).await.unwrap();

        assert_eq!(outcome.total, 130);
        assert_eq!(outcome.delivered, 130);
        let events = drain(&mut rx);
        assert_eq!(events[0], ProgressEvent::Total { shard_id: "single".into(), total: 130 });
        assert_eq!(events[2], ProgressEvent::Tick { success_count: 30 });
    }

    #[tokio::test]
    async fn test_hard_writer_failure_is_fatal() {
        let source = FakeSource::new(60, hits("a", 20), vec![hits("b", 20), hits("c", 20)]);
        let writer = FakeWriter {
            hard_fail_on_call: Some(1),
            ..FakeWriter::default()
        };
        let (tx, mut rx) = mpsc::unbounded_channel();

        let err = coordinator(None).run(&source, &writer, &tx).await.unwrap_err();

        assert!(matches!(err, ReindexError::BulkWrite(_)));
        assert_eq!(drain(&mut rx).len(), 2);
        assert_eq!(source.scroll_calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_scroll_failure_is_fatal() {
        let source = FakeSource::failing(ReindexError::scroll_fetch("failed to parse request"));
        let writer = FakeWriter::default();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let err = coordinator(None).run(&source, &writer, &tx).await.unwrap_err();

        assert!(matches!(err, ReindexError::PageSizeTooLarge(_)));
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_transform_is_passed_to_writer() {
        use crate::plugin::{FieldTransform, TransformConfig};

        struct SourceCheckingWriter;

        #[async_trait]
        impl BulkWriter for SourceCheckingWriter {
            async fn write(&self, request: BulkRequest<'_>) -> Result<BatchOutcome> {
                let transform = request.transform.expect("transform");
                let succeeded = request
                    .records
                    .into_iter()
                    .map(|h| transform.transform(h))
                    .filter(|h| h.source.contains_key("migrated"))
                    .count();
                Ok(BatchOutcome {
                    succeeded: succeeded as u64,
                    failed: Vec::new(),
                })
            }
        }

        let transform = FieldTransform::from(TransformConfig {
            remove_fields: Vec::new(),
            set_fields: serde_json::json!({ "migrated": true })
                .as_object()
                .cloned()
                .unwrap(),
        });
        let source = FakeSource::new(5, hits("a", 5), Vec::new());
        let (tx, _rx) = mpsc::unbounded_channel();

        let outcome = coordinator(None)
            .with_transform(Some(Box::new(transform)))
            .run(&source, &SourceCheckingWriter, &tx)
            .await
            .unwrap();
        assert_eq!(outcome.delivered, 5);
    }
}
