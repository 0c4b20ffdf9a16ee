//! Concurrent directory scanning
//!
//! The pieces fit together like this:
//!
//! ```text
//!                     +-------------+
//!                     |   Scanner   |  seed root, watch, merge
//!                     +------+------+
//!                            |
//!                     +------v------+
//!                     |  TaskQueue  |  shared, tri-state completion
//!                     +------+------+
//!                      |     |     |
//!                +-----v-+ +-v---+ +v------+
//!                |Worker | | ... | |Worker |  stat, fold, queue subdirs
//!                +-----+-+ +-+---+ ++------+
//!                      |     |      |
//!                      +-----v------+
//!                    ResultFragment channel
//! ```
//!
//! Workers share only the queue and the dedup cache; every rollup node is
//! owned by exactly one worker until the coordinator merges the fragments
//! and aggregates bottom-up.

pub mod coordinator;
pub mod dedup;
pub mod node;
pub mod queue;
pub mod worker;

pub use coordinator::{ScanResult, Scanner, TargetDevice};
pub use dedup::{build_cache, BloomDedup, DedupCache, ExactDedup};
pub use node::{aging_reference_epoch, AggregateNode, AGE_THRESHOLD_WEEKS};
pub use queue::{Task, TaskQueue, WorkerState};
pub use worker::{ResultFragment, Worker, OFFLOAD_THRESHOLD, POP_TIMEOUT};
