//! es-reindex Core Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Distributed reindex orchestration between two Elasticsearch clusters.
//!
//! # Overview
//!
//! A run is split into independent shards, each migrated by its own worker
//! process. The supervisor never talks back to its workers; workers report
//! progress as JSON lines on stdout.
//!
//! - **Connection Resolver** ([`connection`]): URI parsing, HTTP transport, AWS request signing
//! - **Shard Planner** ([`shard`]): unsharded, explicit and computed date-range plans
//! - **Scroll Cursor** ([`scroll`]): paginated extraction from the source cluster
//! - **Bulk Writer** ([`bulk`]): batched writes into the destination cluster
//! - **Worker Coordinator** ([`worker`]): the per-shard read/write loop
//! - **Supervisor** ([`supervisor`]): spawns workers and aggregates their progress
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────────────────────┐
//!                 │          Supervisor          │
//!                 │  AggregateProgress (owned)   │
//!                 └──────┬───────────────▲───────┘
//!          spawn(shard)  │               │  ProgressEvent (stdout JSON lines)
//!            ┌───────────┼───────────┐   │
//!            ▼           ▼           ▼   │
//!       ┌─────────┐ ┌─────────┐ ┌─────────┐
//!       │Worker 1 │ │Worker 2 │ │Worker N │   one process per shard
//!       └────┬────┘ └────┬────┘ └────┬────┘
//!            │ scroll    │           │
//!            ▼           ▼           ▼
//!       source cluster ──────► Bulk Writer ──────► destination cluster
//! ```

pub mod bulk;
pub mod config;
pub mod connection;
pub mod plugin;
pub mod progress;
pub mod query;
pub mod scroll;
pub mod shard;
pub mod supervisor;
pub mod types;
pub mod worker;

// Re-export commonly used types
pub use config::{ApiVersion, ReindexConfig, WriteMode};
pub use connection::ConnectionDescriptor;
pub use progress::{AggregateProgress, ProgressEvent, RunSummary};
pub use reindex_common::{ReindexError, Result};
pub use shard::ShardSpec;
pub use types::Hit;
