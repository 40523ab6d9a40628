//! Progress bar for the supervisor
//!
//! Renders the aggregate progress of all workers as a single bar.

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use reindex_core::progress::{AggregateProgress, RunSummary};
use reindex_core::supervisor::{ProgressObserver, WorkerExit};

const BAR_TEMPLATE: &str =
    "{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({percent}%, {eta})";

/// Drives an indicatif bar from supervisor updates
pub struct BarObserver {
    bar: ProgressBar,
    shards: usize,
}

impl BarObserver {
    pub fn new(shards: usize) -> Self {
        Self::with_bar(create_reindex_progress(), shards)
    }

    /// Observer over an existing bar, e.g. a hidden one
    pub fn with_bar(bar: ProgressBar, shards: usize) -> Self {
        bar.set_message(worker_message(0, shards));
        Self { bar, shards }
    }
}

impl ProgressObserver for BarObserver {
    fn on_update(&mut self, progress: &AggregateProgress) {
        self.bar.set_length(progress.total());
        self.bar.set_position(progress.delivered());
        self.bar
            .set_message(worker_message(progress.active(), self.shards));
    }

    fn on_worker_exit(&mut self, shard: &str, exit: WorkerExit) {
        if !exit.success() {
            self.bar
                .println(format!("{} {}: {}", "✗".red(), shard, exit));
        }
    }

    fn on_finish(&mut self, _summary: &RunSummary) {
        self.bar.finish_and_clear();
    }
}

/// Create the bar used while documents are being reindexed
pub fn create_reindex_progress() -> ProgressBar {
    let pb = ProgressBar::new(0);
    let style = ProgressStyle::default_bar()
        .template(BAR_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb
}

fn worker_message(active: usize, shards: usize) -> String {
    format!("{}/{} working", active, shards)
}

/// Final lines printed after a run
pub fn format_summary(summary: &RunSummary, log_path: &std::path::Path) -> Vec<String> {
    let mut lines = Vec::new();

    if summary.is_complete() {
        lines.push(format!("{} {}", "✓".green(), summary));
    } else {
        lines.push(format!("{} {}", "!".yellow(), summary));
    }

    if summary.failed_workers > 0 {
        lines.push(format!(
            "{} {} of {} workers failed, see {}",
            "✗".red(),
            summary.failed_workers,
            summary.shards,
            log_path.display()
        ));
    }

    lines
}
