//! Supervisor
//!
//! Starts one worker process per shard and folds their progress into a
//! single [`AggregateProgress`]. Each worker gets a reader task that decodes
//! its stdout and forwards the events, then its exit status, over one
//! channel. The consuming loop in [`Supervisor::run_until`] is the only
//! owner of the aggregate.

use crate::progress::{AggregateProgress, ProgressEvent, RunSummary};
use crate::shard::{ShardSpec, WORKER_SHARD_ENV};
use reindex_common::{ReindexError, Result};
use std::collections::HashMap;
use std::ffi::OsString;
use std::future::Future;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How a worker process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    Code(i32),
    Signal(i32),
    /// Neither a code nor a signal was reported, or the process could not be awaited
    Unknown,
}

impl WorkerExit {
    pub fn success(&self) -> bool {
        matches!(self, WorkerExit::Code(0))
    }
}

impl From<ExitStatus> for WorkerExit {
    fn from(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return WorkerExit::Code(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return WorkerExit::Signal(signal);
            }
        }
        WorkerExit::Unknown
    }
}

impl std::fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerExit::Code(code) => write!(f, "worker exited with error code: {}", code),
            WorkerExit::Signal(signal) => write!(f, "worker was killed by signal: {}", signal),
            WorkerExit::Unknown => write!(f, "worker ended without an exit status"),
        }
    }
}

/// Message from a worker's reader task to the consuming loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerMessage {
    Progress { worker: usize, event: ProgressEvent },
    /// Always the last message of a worker
    Exited { worker: usize, exit: WorkerExit },
}

/// Starts workers
pub trait WorkerLauncher: Send + Sync {
    /// Start the worker for `shard`
    ///
    /// The returned task forwards the worker's progress to `tx` and finishes
    /// with exactly one [`WorkerMessage::Exited`]. Aborting the task must
    /// stop the worker.
    fn launch(
        &self,
        worker: usize,
        shard: &ShardSpec,
        tx: mpsc::UnboundedSender<WorkerMessage>,
    ) -> Result<JoinHandle<()>>;
}

/// Re-executes a binary as a worker process
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>, args: Vec<OsString>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// The running binary with its own arguments
    pub fn current() -> Result<Self> {
        let program = std::env::current_exe()?;
        let args = std::env::args_os().skip(1).collect();
        Ok(Self::new(program, args))
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(
        &self,
        worker: usize,
        shard: &ShardSpec,
        tx: mpsc::UnboundedSender<WorkerMessage>,
    ) -> Result<JoinHandle<()>> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env(WORKER_SHARD_ENV, shard.to_env_value()?)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ReindexError::worker(format!("failed to start worker for {}: {}", shard.name, e))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ReindexError::worker("worker stdout was not captured"))?;
        debug!(worker, shard = %shard.name, pid = ?child.id(), "Worker started");

        Ok(tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => {},
                    Ok(Some(line)) => match ProgressEvent::from_line(&line) {
                        Ok(event) => {
                            let _ = tx.send(WorkerMessage::Progress { worker, event });
                        },
                        Err(e) => warn!(worker, line = %line, error = %e, "Ignoring unexpected worker output"),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        warn!(worker, error = %e, "Failed to read worker output");
                        break;
                    },
                }
            }

            let exit = match child.wait().await {
                Ok(status) => WorkerExit::from(status),
                Err(e) => {
                    error!(worker, error = %e, "Failed to wait for worker");
                    WorkerExit::Unknown
                },
            };
            let _ = tx.send(WorkerMessage::Exited { worker, exit });
        }))
    }
}

/// Receives supervisor progress, e.g. to drive a progress bar
pub trait ProgressObserver: Send {
    fn on_update(&mut self, _progress: &AggregateProgress) {}

    fn on_worker_exit(&mut self, _shard: &str, _exit: WorkerExit) {}

    fn on_finish(&mut self, _summary: &RunSummary) {}
}

impl ProgressObserver for () {}

/// Runs every shard of a plan to completion
pub struct Supervisor<L: WorkerLauncher> {
    launcher: L,
    shards: Vec<ShardSpec>,
}

impl<L: WorkerLauncher> Supervisor<L> {
    pub fn new(launcher: L, shards: Vec<ShardSpec>) -> Self {
        Self { launcher, shards }
    }

    /// Run until every worker exits, Ctrl-C is pressed or SIGTERM arrives
    pub async fn run<O: ProgressObserver>(&self, observer: &mut O) -> Result<RunSummary> {
        self.run_until(observer, termination()).await
    }

    /// Run until every worker exits or `shutdown` completes
    ///
    /// On shutdown the reader tasks are aborted, which kills their workers;
    /// workers still running at that point count as failed.
    pub async fn run_until<O, F>(&self, observer: &mut O, shutdown: F) -> Result<RunSummary>
    where
        O: ProgressObserver,
        F: Future<Output = ()>,
    {
        info!(shards = self.shards.len(), "Starting reindex in {} shards.", self.shards.len());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handles = Vec::with_capacity(self.shards.len());
        let mut running: HashMap<usize, &str> = HashMap::new();
        let mut failed_workers = 0;

        for (worker, shard) in self.shards.iter().enumerate() {
            match self.launcher.launch(worker, shard, tx.clone()) {
                Ok(handle) => {
                    handles.push(handle);
                    running.insert(worker, shard.name.as_str());
                },
                Err(e) => {
                    error!(shard = %shard.name, error = %e, "Worker could not be started");
                    failed_workers += 1;
                },
            }
        }
        drop(tx);

        let mut progress = AggregateProgress::new();
        tokio::pin!(shutdown);

        while !running.is_empty() {
            tokio::select! {
                message = rx.recv() => match message {
                    Some(WorkerMessage::Progress { event, .. }) => {
                        progress.apply(&event);
                        observer.on_update(&progress);
                    },
                    Some(WorkerMessage::Exited { worker, exit }) => {
                        let Some(shard) = running.remove(&worker) else {
                            continue;
                        };
                        progress.retire(shard);
                        if exit.success() {
                            debug!(shard, "Worker finished");
                        } else {
                            error!(shard, exit = %exit, "Worker failed");
                            failed_workers += 1;
                        }
                        observer.on_worker_exit(shard, exit);
                        observer.on_update(&progress);
                    },
                    None => {
                        error!(remaining = running.len(), "Workers stopped reporting");
                        failed_workers += running.len();
                        break;
                    },
                },
                _ = &mut shutdown => {
                    warn!(remaining = running.len(), "Interrupted, stopping workers");
                    for handle in &handles {
                        handle.abort();
                    }
                    failed_workers += running.len();
                    break;
                },
            }
        }

        let summary = progress.summary(self.shards.len(), failed_workers);
        if summary.is_complete() {
            info!(total = summary.total, "{}", summary);
        } else {
            warn!(total = summary.total, delivered = summary.delivered, "{}", summary);
        }
        observer.on_finish(&summary);
        Ok(summary)
    }
}

/// Completes on Ctrl-C, or on SIGTERM on unix
async fn termination() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "SIGTERM handler could not be installed");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
