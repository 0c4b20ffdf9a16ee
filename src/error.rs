//! Error types for scanfs
//!
//! This module defines the error hierarchy for the scanner:
//! - Filesystem errors surfaced while statting or listing entries
//! - Configuration and CLI validation errors
//! - Worker thread errors
//!
//! Design philosophy:
//! - Use thiserror for structured error types in library code
//! - Per-entry errors are recoverable and must never abort a scan;
//!   only bootstrap errors propagate to the caller

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the scanfs library
#[derive(Error, Debug)]
pub enum ScanError {
    /// Access denied on stat or directory listing
    #[error("permission denied: '{}'", path.display())]
    Permission { path: PathBuf },

    /// Path does not exist (includes stale-handle failures that survived
    /// the single retry)
    #[error("no such file or directory: '{}'", path.display())]
    NotFound { path: PathBuf },

    /// A bounded setup operation exceeded its deadline
    #[error("timed out entering '{}' after {secs}s", path.display())]
    Timeout { path: PathBuf, secs: u64 },

    /// Target exists but is not a directory
    #[error("not a directory: '{}'", path.display())]
    NotDirectory { path: PathBuf },

    /// A scan was requested while another is still in progress
    #[error("already scanning")]
    AlreadyScanning,

    /// Aggregation produced no data
    #[error("failed to produce scan result")]
    NoResult,

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Worker/concurrency errors
    #[error("worker error: {0}")]
    Worker(#[from] WorkerError),

    /// I/O errors without a more specific mapping
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScanError {
    /// Check if this error is recoverable at the entry level (log and skip
    /// the entry, keep scanning the rest of the directory)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ScanError::Permission { .. } | ScanError::NotFound { .. }
        )
    }
}

/// Configuration and CLI validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid worker count
    #[error("invalid worker count {count}: must be between 1 and {max}")]
    InvalidWorkerCount { count: usize, max: usize },

    /// Invalid setup timeout
    #[error("invalid setup timeout {secs}: must be a positive integer")]
    InvalidSetupTimeout { secs: u64 },

    /// Invalid dedup shard count
    #[error("invalid dedup shard count {count}: must be between 1 and {max}")]
    InvalidShardCount { count: usize, max: usize },

    /// Invalid dedup salt count
    #[error("invalid dedup salt count {count}: must be at least 1")]
    InvalidSaltCount { count: u32 },

    /// Invalid dedup filter width
    #[error("invalid dedup bit width {bits}: must be at least {min}")]
    InvalidBitWidth { bits: u64, min: u64 },

    /// Invalid time clamp bounds
    #[error("invalid clamp bounds: min {min} exceeds max {max}")]
    InvalidClampBounds { min: i64, max: i64 },
}

/// Worker thread errors
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Worker thread could not be spawned
    #[error("failed to spawn worker {id}: {reason}")]
    SpawnFailed { id: usize, reason: String },

    /// Worker panicked
    #[error("worker {id} panicked")]
    Panicked { id: usize },
}

/// Result type alias for ScanError
pub type Result<T> = std::result::Result<T, ScanError>;
