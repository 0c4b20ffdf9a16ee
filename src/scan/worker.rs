//! Worker threads
//!
//! Each worker loops on the shared queue, scans one directory per task,
//! and accumulates finished rollup nodes in a private fragment. The
//! fragment is delivered over a channel exactly once, when the worker
//! exits; workers never touch each other's results.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use tracing::{debug, info, warn};

use crate::config::ScanConfig;
use crate::error::{Result, WorkerError};
use crate::fs::stat::{self, StatRecord};
use crate::scan::coordinator::TargetDevice;
use crate::scan::dedup::DedupCache;
use crate::scan::node::AggregateNode;
use crate::scan::queue::{Task, TaskQueue};

/// How long a worker blocks on an empty queue per pop
pub const POP_TIMEOUT: Duration = Duration::from_secs(1);

/// Pending subdirectory tasks are flushed to the shared queue once this
/// many accumulate, so other workers can steal breadth early
pub const OFFLOAD_THRESHOLD: usize = 1024;

/// Finished rollup nodes from one worker, keyed by directory path
pub type ResultFragment = HashMap<PathBuf, AggregateNode>;

/// Handle to a spawned worker thread
pub struct Worker {
    id: usize,
    handle: JoinHandle<()>,
}

impl Worker {
    /// Spawn a named worker thread running the scan loop
    pub fn spawn(
        id: usize,
        queue: Arc<TaskQueue>,
        dedup: Arc<dyn DedupCache>,
        device: Arc<TargetDevice>,
        config: Arc<ScanConfig>,
        terminate: Arc<AtomicBool>,
        fragments: Sender<(usize, ResultFragment)>,
    ) -> Result<Self> {
        let handle = thread::Builder::new()
            .name(format!("scan-worker-{id}"))
            .spawn(move || {
                let mut state = WorkerLoop::new(id, queue, dedup, device, config, terminate);
                state.run();
                state.deliver(&fragments);
            })
            .map_err(|e| WorkerError::SpawnFailed {
                id,
                reason: e.to_string(),
            })?;
        Ok(Self { id, handle })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn join(self) -> std::result::Result<(), WorkerError> {
        self.handle
            .join()
            .map_err(|_| WorkerError::Panicked { id: self.id })
    }
}

struct WorkerLoop {
    id: usize,
    queue: Arc<TaskQueue>,
    dedup: Arc<dyn DedupCache>,
    device: Arc<TargetDevice>,
    config: Arc<ScanConfig>,
    terminate: Arc<AtomicBool>,
    local_seen: HashSet<(u64, u64)>,
    pending: Vec<Task>,
    fragment: ResultFragment,
    dispatched: u64,
    completed: u64,
    stat_ops: u64,
    bytes_seen: u64,
    started: Instant,
}

impl WorkerLoop {
    fn new(
        id: usize,
        queue: Arc<TaskQueue>,
        dedup: Arc<dyn DedupCache>,
        device: Arc<TargetDevice>,
        config: Arc<ScanConfig>,
        terminate: Arc<AtomicBool>,
    ) -> Self {
        Self {
            id,
            queue,
            dedup,
            device,
            config,
            terminate,
            local_seen: HashSet::new(),
            pending: Vec::new(),
            fragment: ResultFragment::new(),
            dispatched: 0,
            completed: 0,
            stat_ops: 0,
            bytes_seen: 0,
            started: Instant::now(),
        }
    }

    fn run(&mut self) {
        debug!(worker = self.id, "worker started");
        loop {
            if self.terminate.load(Ordering::Relaxed) {
                debug!(worker = self.id, "termination requested");
                break;
            }
            match self.queue.pop(self.id, POP_TIMEOUT) {
                Some(Task::Stop) => {
                    debug!(worker = self.id, "stop sentinel received");
                    break;
                }
                Some(Task::Scan(node)) => {
                    self.scan_directory(*node);
                }
                None => {}
            }
        }
        self.queue.mark_idle(self.id);
        self.summarize();
    }

    /// Scan one directory: stat every entry, fold files in, queue
    /// subdirectories, then park the finished node in the fragment
    fn scan_directory(&mut self, mut node: AggregateNode) {
        self.dispatched += 1;
        let entries = match stat::list_entries(node.path()) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(worker = self.id, path = %node.path().display(), error = %e,
                      "directory dropped");
                return;
            }
        };
        for name in entries {
            if self.config.filters.iter().any(|f| f.as_str() == name) {
                continue;
            }
            let path = node.path().join(&name);
            self.stat_ops += 1;
            let entry = match StatRecord::new(&path) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(worker = self.id, path = %path.display(), error = %e,
                          "entry skipped");
                    continue;
                }
            };
            if !self.device.check(entry.dev) {
                debug!(worker = self.id, path = %path.display(),
                       "foreign filesystem, skipped");
                continue;
            }
            if entry.is_directory() {
                match AggregateNode::from_stat(&entry) {
                    Ok(mut child) => {
                        child.set_parent(node.path());
                        node.link_child(&path);
                        self.pending.push(Task::Scan(Box::new(child)));
                        if self.pending.len() >= OFFLOAD_THRESHOLD {
                            self.flush_pending();
                        }
                    }
                    Err(e) => {
                        warn!(worker = self.id, path = %path.display(), error = %e,
                              "subdirectory skipped")
                    }
                }
            } else {
                if self.is_duplicate(&entry) {
                    debug!(worker = self.id, path = %path.display(),
                           "hardlink already counted");
                    continue;
                }
                let entry = match &self.config.clamp {
                    Some(bounds) => stat::repair_times(entry, bounds),
                    None => entry,
                };
                self.bytes_seen += entry.size;
                node.fold_file(&entry);
            }
        }
        self.flush_pending();
        self.fragment.insert(node.path().to_path_buf(), node);
        // a dropped listing never counts as completed
        self.completed += 1;
    }

    /// Check whether a multi-link file's inode was already counted
    ///
    /// Singly-linked files skip the shared cache entirely. The local set
    /// is consulted first; only a local miss pays for the shared lock.
    fn is_duplicate(&mut self, entry: &StatRecord) -> bool {
        if entry.nlink <= 1 {
            return false;
        }
        if self.local_seen.contains(&(entry.dev, entry.ino)) {
            return true;
        }
        self.dedup
            .seen_or_record_refresh(entry.dev, entry.ino, &mut self.local_seen)
    }

    fn flush_pending(&mut self) {
        if !self.pending.is_empty() {
            self.queue.push(self.pending.drain(..));
        }
    }

    fn deliver(self, fragments: &Sender<(usize, ResultFragment)>) {
        if fragments.send((self.id, self.fragment)).is_err() {
            warn!(worker = self.id, "result channel closed, fragment dropped");
        }
    }

    fn summarize(&self) {
        let elapsed = self.started.elapsed().as_secs_f64();
        let stat_rate = if elapsed > 0.0 {
            self.stat_ops as f64 / elapsed
        } else {
            0.0
        };
        info!(
            worker = self.id,
            dispatched = self.dispatched,
            completed = self.completed,
            stat_ops = self.stat_ops,
            bytes_seen = self.bytes_seen,
            stat_ops_per_sec = format!("{stat_rate:.0}"),
            "worker finished"
        );
    }
}
