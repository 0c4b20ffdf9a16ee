//! Per-path metadata snapshots
//!
//! [`StatRecord`] is an immutable snapshot of one filesystem entry, built
//! from `lstat` (symlinks are never followed). Construction retries exactly
//! once on the transient vanished-entry class (ENOENT/ESTALE) before failing
//! permanently: entries collected from a directory listing can disappear
//! before we stat them, and some filesystems report a spurious ENOENT that
//! succeeds on immediate retry. Permission errors are never retried.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::error::{Result, ScanError};

const ESTALE: i32 = 116;
const ENOTDIR: i32 = 20;

/// Type of filesystem entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// Regular file
    File,
    /// Directory
    Directory,
    /// Symbolic link
    Symlink,
    /// Anything else (device, fifo, socket, ...)
    Other,
}

/// Immutable metadata snapshot of one filesystem entry
#[derive(Debug, Clone)]
pub struct StatRecord {
    /// Full path of the entry
    pub path: PathBuf,

    /// Size in bytes
    pub size: u64,

    /// Owner user id
    pub uid: u32,

    /// Device id the entry resides on
    pub dev: u64,

    /// Inode number
    pub ino: u64,

    /// Number of hard links
    pub nlink: u64,

    /// Entry type
    pub kind: EntryKind,

    /// Last access time (unix seconds)
    pub atime: i64,

    /// Last modification time (unix seconds)
    pub mtime: i64,

    /// Path-separator count from the filesystem root
    pub depth: usize,
}

impl StatRecord {
    /// Stat a path without following symlinks
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        Self::build(path.into(), false)
    }

    /// Stat a path, probing `path/.` so the automounter mounts it first
    ///
    /// Used for the scan root: statting inside the directory makes the
    /// recorded device id agree with every subsequent child stat even when
    /// the target was not mounted at startup.
    pub fn assume_mountpoint(path: impl Into<PathBuf>) -> Result<Self> {
        Self::build(path.into(), true)
    }

    fn build(path: PathBuf, assume_mountpoint: bool) -> Result<Self> {
        let probe = if assume_mountpoint {
            path.join(".")
        } else {
            path.clone()
        };
        let meta = match fs::symlink_metadata(&probe) {
            Ok(m) => m,
            Err(e) if is_transient(&e) => {
                debug!(path = %path.display(), "transient stat failure, retrying once");
                fs::symlink_metadata(&probe).map_err(|e| map_fs_error(e, &path))?
            }
            Err(e) => return Err(map_fs_error(e, &path)),
        };
        Ok(Self::from_metadata(path, &meta))
    }

    fn from_metadata(path: PathBuf, meta: &fs::Metadata) -> Self {
        let kind = if meta.file_type().is_dir() {
            EntryKind::Directory
        } else if meta.file_type().is_file() {
            EntryKind::File
        } else if meta.file_type().is_symlink() {
            EntryKind::Symlink
        } else {
            EntryKind::Other
        };
        let depth = fs_depth(&path);
        Self {
            size: meta.size(),
            uid: meta.uid(),
            dev: meta.dev(),
            ino: meta.ino(),
            nlink: meta.nlink(),
            kind,
            atime: meta.atime(),
            mtime: meta.mtime(),
            depth,
            path,
        }
    }

    /// Check if this entry is a directory
    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Check if this entry is a regular file
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    /// The timestamp used for age bucketing: the later of atime and mtime
    pub fn age_timestamp(&self) -> i64 {
        self.atime.max(self.mtime)
    }
}

/// Path-separator count from the filesystem root; `/` itself has depth 0
pub fn fs_depth(path: &Path) -> usize {
    path.components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .count()
}

/// List the names of a directory's direct entries
///
/// `.` and `..` are never yielded. An error reading a single entry is
/// logged and that entry skipped; an error opening the directory itself
/// propagates to the caller.
pub fn list_entries(path: &Path) -> Result<Vec<OsString>> {
    let reader = fs::read_dir(path).map_err(|e| map_fs_error(e, path))?;
    let mut names = Vec::new();
    for entry in reader {
        match entry {
            Ok(entry) => names.push(entry.file_name()),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable directory entry skipped");
            }
        }
    }
    Ok(names)
}

/// Inclusive timestamp bounds for the clamping repair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClampBounds {
    /// Earliest acceptable epoch second
    pub min: i64,
    /// Latest acceptable epoch second
    pub max: i64,
}

impl ClampBounds {
    fn clamp(&self, ts: i64) -> i64 {
        ts.clamp(self.min, self.max)
    }
}

/// Clamp out-of-range access/modify times and write the correction back
///
/// Returns the record untouched when both times are in bounds. Otherwise the
/// corrected times are written onto the underlying file and the entry is
/// re-statted so the fold sees exactly what is now on disk. The write-back
/// is best effort: when it fails the clamped in-memory record is returned.
pub fn repair_times(stat: StatRecord, bounds: &ClampBounds) -> StatRecord {
    let atime = bounds.clamp(stat.atime);
    let mtime = bounds.clamp(stat.mtime);
    if atime == stat.atime && mtime == stat.mtime {
        return stat;
    }
    warn!(
        path = %stat.path.display(),
        atime = stat.atime,
        mtime = stat.mtime,
        "clamping out-of-range timestamps"
    );
    let times = fs::FileTimes::new()
        .set_accessed(epoch_to_system_time(atime))
        .set_modified(epoch_to_system_time(mtime));
    let written = fs::File::options()
        .write(true)
        .open(&stat.path)
        .and_then(|f| f.set_times(times));
    match written {
        Ok(()) => match StatRecord::new(stat.path.clone()) {
            Ok(reread) => return reread,
            Err(e) => {
                debug!(path = %stat.path.display(), error = %e, "re-stat after repair failed")
            }
        },
        Err(e) => {
            debug!(path = %stat.path.display(), error = %e, "timestamp write-back failed")
        }
    }
    StatRecord {
        atime,
        mtime,
        ..stat
    }
}

fn epoch_to_system_time(ts: i64) -> SystemTime {
    if ts >= 0 {
        UNIX_EPOCH + Duration::from_secs(ts as u64)
    } else {
        UNIX_EPOCH - Duration::from_secs(ts.unsigned_abs())
    }
}

fn is_transient(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::NotFound || e.raw_os_error() == Some(ESTALE)
}

fn map_fs_error(e: io::Error, path: &Path) -> ScanError {
    match e.kind() {
        io::ErrorKind::PermissionDenied => ScanError::Permission {
            path: path.to_path_buf(),
        },
        io::ErrorKind::NotFound => ScanError::NotFound {
            path: path.to_path_buf(),
        },
        _ if e.raw_os_error() == Some(ESTALE) => ScanError::NotFound {
            path: path.to_path_buf(),
        },
        // probing `path/.` on a plain file fails with ENOTDIR
        _ if e.raw_os_error() == Some(ENOTDIR) => ScanError::NotDirectory {
            path: path.to_path_buf(),
        },
        _ => ScanError::Io(e),
    }
}
