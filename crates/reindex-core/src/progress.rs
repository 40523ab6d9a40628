//! Progress protocol between workers and the supervisor
//!
//! Workers write one JSON [`ProgressEvent`] per line on stdout. The
//! supervisor folds the events of all workers into an
//! [`AggregateProgress`] and renders a [`RunSummary`] at the end.

use reindex_common::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::io::Write;
use tokio::sync::mpsc;

/// Message from a worker to the supervisor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Documents this shard will process; sent once, only when non-zero
    Total { shard_id: String, total: u64 },
    /// Documents written by one page
    Tick { success_count: u64 },
}

impl ProgressEvent {
    /// Encode as a single protocol line (without the newline)
    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_line(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line.trim())?)
    }
}

/// Where a worker sends its progress
pub trait ProgressSink: Send + Sync {
    fn send(&self, event: ProgressEvent) -> Result<()>;
}

/// Writes events as JSON lines to the process's stdout
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl ProgressSink for StdoutSink {
    fn send(&self, event: ProgressEvent) -> Result<()> {
        let line = event.to_line()?;
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", line)?;
        stdout.flush()?;
        Ok(())
    }
}

impl ProgressSink for mpsc::UnboundedSender<ProgressEvent> {
    fn send(&self, event: ProgressEvent) -> Result<()> {
        mpsc::UnboundedSender::send(self, event).map_err(|e| {
            reindex_common::ReindexError::worker(format!("progress receiver closed: {}", e))
        })
    }
}

/// Run-wide progress, owned by the supervisor's consuming loop
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateProgress {
    totals: HashMap<String, u64>,
    active: BTreeSet<String>,
    total: u64,
    delivered: u64,
}

impl AggregateProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a shard's total to the denominator, once per shard id
    pub fn record_total(&mut self, shard_id: &str, total: u64) {
        if !self.totals.contains_key(shard_id) {
            self.totals.insert(shard_id.to_string(), total);
            self.total += total;
        }
        self.active.insert(shard_id.to_string());
    }

    pub fn tick(&mut self, success_count: u64) {
        self.delivered += success_count;
    }

    /// Mark a shard's worker as gone; its total stays counted
    pub fn retire(&mut self, shard_id: &str) {
        self.active.remove(shard_id);
    }

    pub fn apply(&mut self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Total { shard_id, total } => self.record_total(shard_id, *total),
            ProgressEvent::Tick { success_count } => self.tick(*success_count),
        }
    }

    /// Denominator: sum of distinct shard totals
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Numerator: documents written so far
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Shards that reported a total and whose worker is still running
    pub fn active(&self) -> usize {
        self.active.len()
    }

    pub fn summary(&self, shards: usize, failed_workers: usize) -> RunSummary {
        RunSummary {
            total: self.total,
            delivered: self.delivered,
            shards,
            failed_workers,
        }
    }
}

/// Outcome of a whole run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: u64,
    pub delivered: u64,
    pub shards: usize,
    pub failed_workers: usize,
}

impl RunSummary {
    /// Every counted document was written
    pub fn is_complete(&self) -> bool {
        self.delivered == self.total
    }

    pub fn undelivered(&self) -> u64 {
        self.total.saturating_sub(self.delivered)
    }

    /// Share of undelivered documents in percent, rounded to three decimals
    pub fn undelivered_percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let delivered_percent = self.delivered as f64 / self.total as f64 * 100.0;
        ((100.0 - delivered_percent) * 1000.0).round() / 1000.0
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_complete() {
            write!(f, "Reindexing completed.")
        } else {
            write!(
                f,
                "Failed to reindex {} (~{}%) documents.",
                self.undelivered(),
                self.undelivered_percent()
            )
        }
    }
}
