//! Per-directory rollup records and the fold algebra
//!
//! An [`AggregateNode`] accumulates the statistics of one directory:
//! direct files are folded in by the worker that scanned the directory,
//! fully-resolved child directories are folded in later by the
//! coordinator's bottom-up aggregation pass. A node is only ever mutated
//! by one thread at a time, so it carries no locks.
//!
//! Aging buckets hold cumulative byte totals for content untouched for at
//! least 1/2/4/12/26/52 weeks before a reference instant captured once at
//! process start. Buckets are nested: everything counted at 52 weeks is
//! also counted at 26, and so on down to 1 week.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{error, warn};

use crate::error::{Result, ScanError};
use crate::fs::stat::StatRecord;

/// Age thresholds, newest first
pub const AGE_THRESHOLD_WEEKS: [u64; 6] = [1, 2, 4, 12, 26, 52];

const WEEK_SECS: i64 = 86_400 * 7;

struct AgingPolicy {
    reference: i64,
    /// Cutoff epochs, newest (1 week ago) first
    cutoffs: [i64; 6],
}

impl AgingPolicy {
    fn capture() -> Self {
        let reference = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let mut cutoffs = [0i64; 6];
        for (cutoff, weeks) in cutoffs.iter_mut().zip(AGE_THRESHOLD_WEEKS) {
            *cutoff = reference - WEEK_SECS * weeks as i64;
        }
        Self { reference, cutoffs }
    }
}

static AGING: LazyLock<AgingPolicy> = LazyLock::new(AgingPolicy::capture);

/// The reference instant all age buckets are computed against
pub fn aging_reference_epoch() -> i64 {
    AGING.reference
}

/// Mutable per-directory rollup
#[derive(Debug, Clone)]
pub struct AggregateNode {
    path: PathBuf,
    depth: usize,
    parent: Option<PathBuf>,
    children: Vec<PathBuf>,
    total: u64,
    dir_count: u64,
    file_count: u64,
    owner: u32,
    atime: i64,
    mtime: i64,
    buckets: [u64; 6],
    owner_bytes: HashMap<u32, u64>,
}

impl AggregateNode {
    /// Create a rollup for the directory described by `stat`
    ///
    /// The directory's own stat contributes the owner id and the initial
    /// watermark times; byte totals start at zero and only ever reflect
    /// folded files.
    pub fn from_stat(stat: &StatRecord) -> Result<Self> {
        if !stat.is_directory() {
            return Err(ScanError::NotDirectory {
                path: stat.path.clone(),
            });
        }
        Ok(Self {
            path: stat.path.clone(),
            depth: stat.depth,
            parent: None,
            children: Vec::new(),
            total: 0,
            dir_count: 1,
            file_count: 0,
            owner: stat.uid,
            atime: stat.atime,
            mtime: stat.mtime,
            buckets: [0; 6],
            owner_bytes: HashMap::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Total bytes of all non-deduplicated files folded into this subtree
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Directories in this subtree, including this one
    pub fn dir_count(&self) -> u64 {
        self.dir_count
    }

    /// Files folded into this subtree
    pub fn file_count(&self) -> u64 {
        self.file_count
    }

    /// Owner uid of the directory itself
    pub fn owner(&self) -> u32 {
        self.owner
    }

    /// Latest access time seen anywhere in the subtree
    pub fn atime(&self) -> i64 {
        self.atime
    }

    /// Latest modify time seen anywhere in the subtree
    pub fn mtime(&self) -> i64 {
        self.mtime
    }

    /// Byte total for content untouched for at least
    /// `AGE_THRESHOLD_WEEKS[index]` weeks
    pub fn bucket(&self, index: usize) -> u64 {
        self.buckets[index]
    }

    pub fn buckets(&self) -> &[u64; 6] {
        &self.buckets
    }

    /// Cumulative bytes per owner uid
    pub fn owner_bytes(&self) -> &HashMap<u32, u64> {
        &self.owner_bytes
    }

    pub fn parent(&self) -> Option<&Path> {
        self.parent.as_deref()
    }

    /// Paths of the directly linked child directories
    pub fn children(&self) -> &[PathBuf] {
        &self.children
    }

    /// The path this node's parent is expected at: the recorded link if
    /// one exists, otherwise the path minus its final segment
    pub fn parent_path(&self) -> PathBuf {
        match &self.parent {
            Some(p) => p.clone(),
            None => self
                .path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| self.path.clone()),
        }
    }

    /// Record this node's parent, overwriting (and logging) any prior link
    pub fn set_parent(&mut self, parent: &Path) {
        if let Some(old) = &self.parent {
            warn!(
                path = %self.path.display(),
                old = %old.display(),
                new = %parent.display(),
                "redefining parent"
            );
        }
        self.parent = Some(parent.to_path_buf());
    }

    /// Record a child link; duplicates are ignored
    pub fn link_child(&mut self, child: &Path) {
        if !self.children.iter().any(|c| c == child) {
            self.children.push(child.to_path_buf());
        }
    }

    /// Fold a direct file entry into this directory's totals
    pub fn fold_file(&mut self, file: &StatRecord) {
        self.total += file.size;
        self.file_count += 1;
        *self.owner_bytes.entry(file.uid).or_insert(0) += file.size;
        self.atime = self.atime.max(file.atime);
        self.mtime = self.mtime.max(file.mtime);
        if file.size > 0 {
            let age_ts = file.age_timestamp();
            for (bucket, cutoff) in self.buckets.iter_mut().zip(AGING.cutoffs) {
                if age_ts > cutoff {
                    // too fresh for this threshold, so for every older one too
                    break;
                }
                *bucket += file.size;
            }
        }
    }

    /// Fold a fully-resolved child directory into this node
    ///
    /// The child's buckets are already correctly nested, so they are added
    /// directly without re-evaluating thresholds.
    pub fn fold_child(&mut self, child: &AggregateNode) {
        if child.path == self.path {
            error!(path = %self.path.display(), "refusing to fold node into itself");
            return;
        }
        self.total += child.total;
        self.dir_count += child.dir_count;
        self.file_count += child.file_count;
        self.atime = self.atime.max(child.atime);
        self.mtime = self.mtime.max(child.mtime);
        for (uid, bytes) in &child.owner_bytes {
            *self.owner_bytes.entry(*uid).or_insert(0) += bytes;
        }
        if child.total != 0 {
            for (bucket, child_bucket) in self.buckets.iter_mut().zip(child.buckets) {
                *bucket += child_bucket;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::stat::EntryKind;

    fn dir_stat(path: &str, depth: usize) -> StatRecord {
        StatRecord {
            path: PathBuf::from(path),
            size: 4096,
            uid: 1000,
            dev: 1,
            ino: 100,
            nlink: 2,
            kind: EntryKind::Directory,
            atime: aging_reference_epoch(),
            mtime: aging_reference_epoch(),
            depth,
        }
    }

    fn file_stat(path: &str, size: u64, uid: u32, age_weeks: i64) -> StatRecord {
        let ts = aging_reference_epoch() - age_weeks * WEEK_SECS;
        StatRecord {
            path: PathBuf::from(path),
            size,
            uid,
            dev: 1,
            ino: 200,
            nlink: 1,
            kind: EntryKind::File,
            atime: ts,
            mtime: ts,
            depth: 3,
        }
    }

    #[test]
    fn test_new_node_starts_empty() {
        let node = AggregateNode::from_stat(&dir_stat("/data", 1)).unwrap();
        assert_eq!(node.total(), 0);
        assert_eq!(node.dir_count(), 1);
        assert_eq!(node.file_count(), 0);
        assert_eq!(node.buckets(), &[0; 6]);
        assert!(node.owner_bytes().is_empty());
    }

    #[test]
    fn test_from_stat_rejects_files() {
        let err = AggregateNode::from_stat(&file_stat("/data/f", 1, 0, 0)).unwrap_err();
        assert!(matches!(err, ScanError::NotDirectory { .. }));
    }

    #[test]
    fn test_fold_file_buckets_short_circuit() {
        let mut node = AggregateNode::from_stat(&dir_stat("/data", 1)).unwrap();

        // 30 weeks old: lands in every bucket up to 26 weeks, not 52
        node.fold_file(&file_stat("/data/old", 20, 1000, 30));
        assert_eq!(node.buckets(), &[20, 20, 20, 20, 20, 0]);

        // brand new: no buckets at all
        node.fold_file(&file_stat("/data/new", 10, 1000, 0));
        assert_eq!(node.buckets(), &[20, 20, 20, 20, 20, 0]);

        assert_eq!(node.total(), 30);
        assert_eq!(node.file_count(), 2);
    }

    #[test]
    fn test_fold_file_zero_size_skips_buckets() {
        let mut node = AggregateNode::from_stat(&dir_stat("/data", 1)).unwrap();
        node.fold_file(&file_stat("/data/empty", 0, 1000, 60));
        assert_eq!(node.buckets(), &[0; 6]);
        assert_eq!(node.file_count(), 1);
    }

    #[test]
    fn test_bucket_nesting_invariant() {
        let mut node = AggregateNode::from_stat(&dir_stat("/data", 1)).unwrap();
        for (i, weeks) in [0, 1, 3, 5, 13, 30, 60].iter().enumerate() {
            node.fold_file(&file_stat("/data/f", 7 + i as u64, 1000, *weeks));
        }
        for k in 1..6 {
            assert!(node.bucket(k) <= node.bucket(k - 1));
        }
        assert!(node.bucket(0) <= node.total());
    }

    #[test]
    fn test_fold_file_owner_bytes() {
        let mut node = AggregateNode::from_stat(&dir_stat("/data", 1)).unwrap();
        node.fold_file(&file_stat("/data/a", 10, 500, 0));
        node.fold_file(&file_stat("/data/b", 15, 501, 0));
        node.fold_file(&file_stat("/data/c", 5, 500, 0));
        assert_eq!(node.owner_bytes()[&500], 15);
        assert_eq!(node.owner_bytes()[&501], 15);
    }

    #[test]
    fn test_watermarks_never_regress() {
        let mut node = AggregateNode::from_stat(&dir_stat("/data", 1)).unwrap();
        let fresh = node.atime();
        node.fold_file(&file_stat("/data/old", 1, 0, 40));
        assert_eq!(node.atime(), fresh);
        assert_eq!(node.mtime(), fresh);
    }

    #[test]
    fn test_fold_child_propagates_everything() {
        let mut parent = AggregateNode::from_stat(&dir_stat("/data", 1)).unwrap();
        let mut child = AggregateNode::from_stat(&dir_stat("/data/sub", 2)).unwrap();
        child.fold_file(&file_stat("/data/sub/f", 20, 777, 30));

        parent.fold_file(&file_stat("/data/a", 10, 1000, 0));
        parent.fold_child(&child);

        assert_eq!(parent.total(), 30);
        assert_eq!(parent.dir_count(), 2);
        assert_eq!(parent.file_count(), 2);
        assert_eq!(parent.buckets(), &[20, 20, 20, 20, 20, 0]);
        assert_eq!(parent.owner_bytes()[&777], 20);
    }

    #[test]
    fn test_fold_self_is_rejected() {
        let mut node = AggregateNode::from_stat(&dir_stat("/data", 1)).unwrap();
        node.fold_file(&file_stat("/data/a", 10, 1000, 0));
        let snapshot = node.clone();
        node.fold_child(&snapshot);
        assert_eq!(node.total(), 10);
        assert_eq!(node.dir_count(), 1);
    }

    #[test]
    fn test_parent_path_fallback_and_link() {
        let mut node = AggregateNode::from_stat(&dir_stat("/data/sub", 2)).unwrap();
        assert_eq!(node.parent_path(), PathBuf::from("/data"));

        node.set_parent(Path::new("/data"));
        assert_eq!(node.parent(), Some(Path::new("/data")));

        // second link overwrites
        node.set_parent(Path::new("/other"));
        assert_eq!(node.parent_path(), PathBuf::from("/other"));
    }

    #[test]
    fn test_link_child_dedupes() {
        let mut node = AggregateNode::from_stat(&dir_stat("/data", 1)).unwrap();
        node.link_child(Path::new("/data/a"));
        node.link_child(Path::new("/data/a"));
        node.link_child(Path::new("/data/b"));
        assert_eq!(node.children().len(), 2);
    }
}
