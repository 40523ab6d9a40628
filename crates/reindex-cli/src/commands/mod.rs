//! CLI command implementations
//!
//! Each run mode has its own module with a `run` function returning the
//! process exit code.

pub mod supervise;
pub mod worker;

use std::process::ExitCode;

/// Invalid configuration or plugin, detected before any worker starts
pub const EXIT_PREFLIGHT: u8 = 2;

/// A worker hit a fatal error, or the supervisor saw a worker fail
pub const EXIT_FAILURE: u8 = 1;

pub fn preflight_failure(message: impl std::fmt::Display) -> ExitCode {
    eprintln!("Error: {}", message);
    ExitCode::from(EXIT_PREFLIGHT)
}
