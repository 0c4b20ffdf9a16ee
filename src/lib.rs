//! scanfs: concurrent filesystem scanner producing per-directory rollups
//!
//! Scans a directory tree with a pool of worker threads and produces one
//! [`AggregateNode`] per directory: total bytes, file and directory
//! counts, latest access/modify watermarks, per-owner byte totals, and
//! six nested aging buckets (bytes untouched for 1/2/4/12/26/52 weeks).
//!
//! Hardlinked files are counted exactly once per scan, either precisely
//! or through a sharded bloom filter for very large trees. The scan never
//! crosses filesystem boundaries, though it tolerates the target itself
//! being remounted mid-scan.
//!
//! # Example
//!
//! ```no_run
//! use scanfs::{ScanConfig, Scanner};
//!
//! # fn main() -> scanfs::Result<()> {
//! let config = ScanConfig {
//!     target: "/storage/projects".into(),
//!     workers: 16,
//!     ..ScanConfig::default()
//! };
//! let scanner = Scanner::new(config)?;
//! let result = scanner.scan()?;
//! println!(
//!     "{} bytes in {} files",
//!     result.root().total(),
//!     result.root().file_count()
//! );
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod fs;
pub mod report;
pub mod scan;

pub use config::{CliArgs, DedupStrategy, ScanConfig};
pub use error::{ConfigError, Result, ScanError, WorkerError};
pub use fs::{ClampBounds, EntryKind, StatRecord};
pub use scan::{AggregateNode, ScanResult, Scanner};
