//! es-reindex Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling and logging for the es-reindex workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`ReindexError`] and the [`Result`] alias used by every crate
//! - **Logging**: `tracing` subscriber setup shared by the supervisor and its workers
//!
//! # Example
//!
//! ```no_run
//! use reindex_common::logging::{init_logging, LogConfig};
//! use reindex_common::{ReindexError, Result};
//!
//! fn start() -> Result<()> {
//!     let config = LogConfig::from_env().map_err(|e| ReindexError::config(e.to_string()))?;
//!     let _guard = init_logging(&config).map_err(|e| ReindexError::config(e.to_string()))?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{ReindexError, Result};
