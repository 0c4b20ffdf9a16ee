//! Scan orchestration
//!
//! [`Scanner`] owns the lifecycle of one scan: verify the target, seed
//! the queue with the root directory, spawn the worker pool, watch for
//! drain, stop the workers, merge their fragments, and run the bottom-up
//! aggregation pass that rolls every subtree into its parent.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam_channel::{bounded, unbounded};
use tracing::{debug, info, warn};

use crate::config::ScanConfig;
use crate::error::{Result, ScanError};
use crate::fs::stat::StatRecord;
use crate::scan::dedup;
use crate::scan::node::AggregateNode;
use crate::scan::queue::{Task, TaskQueue};
use crate::scan::worker::{ResultFragment, Worker};

/// How often the watch loop re-checks for drain
const WATCH_INTERVAL: Duration = Duration::from_secs(1);

/// How long workers get to exit after their stop sentinels are pushed
const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(3);

/// The device id the scan is pinned to
///
/// Automounted targets can change device id mid-scan when the mount
/// cycles. `check` tolerates exactly that case: a mismatched entry is
/// accepted only if re-statting the scan root shows the root itself now
/// reports the entry's device.
pub struct TargetDevice {
    path: PathBuf,
    dev: Mutex<u64>,
}

impl TargetDevice {
    pub fn new(path: impl Into<PathBuf>, dev: u64) -> Self {
        Self {
            path: path.into(),
            dev: Mutex::new(dev),
        }
    }

    pub fn current(&self) -> u64 {
        *lock(&self.dev)
    }

    pub fn update(&self, dev: u64) {
        *lock(&self.dev) = dev;
    }

    /// Check whether an observed device id belongs to the scan target
    pub fn check(&self, observed: u64) -> bool {
        let mut dev = lock(&self.dev);
        if observed == *dev {
            return true;
        }
        match StatRecord::assume_mountpoint(&self.path) {
            Ok(root) if root.dev == observed => {
                warn!(
                    path = %self.path.display(),
                    old_dev = *dev,
                    new_dev = observed,
                    "target device id changed, following remount"
                );
                *dev = observed;
                true
            }
            _ => false,
        }
    }
}

/// Finished scan: every rollup node plus how to navigate them
pub struct ScanResult {
    data: HashMap<PathBuf, AggregateNode>,
    root_path: PathBuf,
    root_depth: usize,
    elapsed: Duration,
}

impl ScanResult {
    fn new(
        data: HashMap<PathBuf, AggregateNode>,
        root_path: PathBuf,
        root_depth: usize,
        elapsed: Duration,
    ) -> Result<Self> {
        if !data.contains_key(&root_path) {
            return Err(ScanError::NoResult);
        }
        Ok(Self {
            data,
            root_path,
            root_depth,
            elapsed,
        })
    }

    /// The fully aggregated root rollup
    pub fn root(&self) -> &AggregateNode {
        // presence checked at construction
        &self.data[&self.root_path]
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    pub fn root_depth(&self) -> usize {
        self.root_depth
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn node_count(&self) -> usize {
        self.data.len()
    }

    pub fn node(&self, path: &Path) -> Option<&AggregateNode> {
        self.data.get(path)
    }

    /// Distinct depths present, ascending
    pub fn depths(&self) -> Vec<usize> {
        let mut depths: Vec<usize> = self.data.values().map(AggregateNode::depth).collect();
        depths.sort_unstable();
        depths.dedup();
        depths
    }

    /// Number of directories at one depth
    pub fn breadth_at(&self, depth: usize) -> usize {
        self.data.values().filter(|n| n.depth() == depth).count()
    }

    /// Resolved child rollups of one directory
    pub fn children_of(&self, path: &Path) -> Vec<&AggregateNode> {
        self.node(path)
            .map(|node| {
                node.children()
                    .iter()
                    .filter_map(|child| self.data.get(child))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Orchestrates the worker pool over one target directory
pub struct Scanner {
    config: Arc<ScanConfig>,
    target: PathBuf,
    target_depth: usize,
    device: Arc<TargetDevice>,
    scanning: AtomicBool,
    terminate: Arc<AtomicBool>,
}

impl Scanner {
    /// Verify the target within the setup timeout and build a scanner
    ///
    /// The probing stat runs on a helper thread so a wedged mount cannot
    /// hang startup; on timeout the helper is abandoned and
    /// [`ScanError::Timeout`] returned.
    pub fn new(config: ScanConfig) -> Result<Self> {
        let target = std::path::absolute(&config.target)?;
        let timeout = Duration::from_secs(config.setup_timeout_secs);
        let root = probe_target(&target, timeout)?;
        if !root.is_directory() {
            return Err(ScanError::NotDirectory { path: target });
        }
        info!(
            target = %target.display(),
            dev = root.dev,
            depth = root.depth,
            "scan target verified"
        );
        Ok(Self {
            config: Arc::new(config),
            target_depth: root.depth,
            device: Arc::new(TargetDevice::new(&target, root.dev)),
            target,
            scanning: AtomicBool::new(false),
            terminate: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Shared flag that aborts the scan when set, e.g. from a signal
    /// handler
    pub fn terminate_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.terminate)
    }

    /// Run one full scan of the target
    pub fn scan(&self) -> Result<ScanResult> {
        let _guard = self.begin_scan()?;
        let started = Instant::now();
        info!(
            target = %self.target.display(),
            workers = self.config.workers,
            started_at = %Utc::now().to_rfc3339(),
            "scan starting"
        );

        let root = StatRecord::assume_mountpoint(&self.target)?;
        self.device.update(root.dev);

        let queue = Arc::new(TaskQueue::new());
        let cache = dedup::build_cache(&self.config.dedup);
        queue.push([Task::Scan(Box::new(AggregateNode::from_stat(&root)?))]);

        let (frag_tx, frag_rx) = unbounded();
        let mut workers = Vec::with_capacity(self.config.workers);
        for id in 0..self.config.workers {
            workers.push(Worker::spawn(
                id,
                Arc::clone(&queue),
                Arc::clone(&cache),
                Arc::clone(&self.device),
                Arc::clone(&self.config),
                Arc::clone(&self.terminate),
                frag_tx.clone(),
            )?);
        }
        drop(frag_tx);

        while !self.terminate.load(Ordering::Relaxed) && !queue.is_complete() {
            thread::sleep(WATCH_INTERVAL);
            debug!(queued = queue.len(), "watching");
        }
        if self.terminate.load(Ordering::Relaxed) {
            warn!("scan terminated before completion");
        }

        stop_workers(&queue, workers);

        let data = merge_fragments(frag_rx.try_iter());
        let data = aggregate(data, self.target_depth);
        let elapsed = started.elapsed();
        let result = ScanResult::new(data, self.target.clone(), self.target_depth, elapsed)?;
        info!(
            target = %self.target.display(),
            directories = result.node_count(),
            elapsed_secs = format!("{:.2}", elapsed.as_secs_f64()),
            "scan finished"
        );
        Ok(result)
    }

    fn begin_scan(&self) -> Result<ScanGuard<'_>> {
        self.scanning
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| ScanError::AlreadyScanning)?;
        self.terminate.store(false, Ordering::SeqCst);
        Ok(ScanGuard {
            flag: &self.scanning,
        })
    }
}

struct ScanGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

fn probe_target(target: &Path, timeout: Duration) -> Result<StatRecord> {
    let (tx, rx) = bounded(1);
    let probe_path = target.to_path_buf();
    let spawned = thread::Builder::new()
        .name("scan-probe".to_string())
        .spawn(move || {
            let _ = tx.send(StatRecord::assume_mountpoint(&probe_path));
        });
    if spawned.is_err() {
        // fall back to probing inline
        return StatRecord::assume_mountpoint(target);
    }
    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(_) => Err(ScanError::Timeout {
            path: target.to_path_buf(),
            secs: timeout.as_secs(),
        }),
    }
}

/// Push one stop sentinel per worker, then wait up to the join deadline
///
/// Threads cannot be killed; a worker stuck in a hung filesystem call is
/// detached with a warning and its fragment is lost.
fn stop_workers(queue: &TaskQueue, workers: Vec<Worker>) {
    queue.push(workers.iter().map(|_| Task::Stop));
    let deadline = Instant::now() + WORKER_JOIN_TIMEOUT;
    let mut remaining = workers;
    while !remaining.is_empty() && Instant::now() < deadline {
        let (finished, pending) = remaining.into_iter().partition::<Vec<_>, _>(Worker::is_finished);
        for worker in finished {
            let id = worker.id();
            if let Err(e) = worker.join() {
                warn!(worker = id, error = %e, "worker join failed");
            }
        }
        remaining = pending;
        if !remaining.is_empty() {
            thread::sleep(Duration::from_millis(50));
        }
    }
    for worker in remaining {
        warn!(worker = worker.id(), "worker unresponsive, detaching");
    }
}

fn merge_fragments(
    fragments: impl Iterator<Item = (usize, ResultFragment)>,
) -> HashMap<PathBuf, AggregateNode> {
    let mut merged = HashMap::new();
    for (worker, fragment) in fragments {
        debug!(worker, nodes = fragment.len(), "merging fragment");
        for (path, node) in fragment {
            if merged.insert(path.clone(), node).is_some() {
                warn!(path = %path.display(), "directory reported twice, keeping later copy");
            }
        }
    }
    merged
}

/// Roll every subtree into its parent, deepest level first
///
/// All nodes stay in the map for drill-down; folding only accumulates
/// their totals upward. A node whose parent never made it into the result
/// is an orphan: its subtree totals are unreachable from the root, so it
/// is logged and left unfolded.
fn aggregate(
    mut data: HashMap<PathBuf, AggregateNode>,
    target_depth: usize,
) -> HashMap<PathBuf, AggregateNode> {
    let mut levels: BTreeMap<usize, Vec<PathBuf>> = BTreeMap::new();
    for node in data.values() {
        if node.depth() > target_depth {
            levels
                .entry(node.depth())
                .or_default()
                .push(node.path().to_path_buf());
        }
    }
    for (_, level) in levels.into_iter().rev() {
        for path in level {
            let Some(node) = data.remove(&path) else {
                continue;
            };
            let parent_path = node.parent_path();
            match data.get_mut(&parent_path) {
                Some(parent) => parent.fold_child(&node),
                None => {
                    warn!(
                        path = %path.display(),
                        parent = %parent_path.display(),
                        "orphaned directory, totals not rolled up"
                    );
                }
            }
            data.insert(path, node);
        }
    }
    data
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
