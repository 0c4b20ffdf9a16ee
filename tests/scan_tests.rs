//! End-to-end scans over real temporary trees

use std::fs::{self, File, FileTimes};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

use scanfs::{DedupStrategy, ScanConfig, ScanError, Scanner};
use tempfile::tempdir;

fn write_file(path: &Path, len: usize) {
    let mut f = File::create(path).unwrap();
    f.write_all(&vec![0xabu8; len]).unwrap();
}

fn age_file(path: &Path, weeks: u64) {
    let then = SystemTime::now() - Duration::from_secs(86_400 * 7 * weeks);
    let times = FileTimes::new().set_accessed(then).set_modified(then);
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_times(times)
        .unwrap();
}

fn config_for(target: &Path) -> ScanConfig {
    ScanConfig {
        target: target.to_path_buf(),
        workers: 4,
        ..ScanConfig::default()
    }
}

#[test]
fn rollup_totals_watermarks_and_buckets() {
    let dir = tempdir().unwrap();
    write_file(&dir.path().join("fresh.bin"), 10);
    fs::create_dir(dir.path().join("archive")).unwrap();
    let old = dir.path().join("archive/old.bin");
    write_file(&old, 20);
    age_file(&old, 30);

    let scanner = Scanner::new(config_for(dir.path())).unwrap();
    let result = scanner.scan().unwrap();
    let root = result.root();

    assert_eq!(root.total(), 30);
    assert_eq!(root.file_count(), 2);
    assert_eq!(root.dir_count(), 2);

    // 30 weeks exceeds the 26-week threshold but not the 52-week one
    assert_eq!(root.buckets(), &[20, 20, 20, 20, 20, 0]);

    // the fresh file pushes the watermarks near now
    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64;
    assert!((now - root.mtime()).abs() < 120);
    assert!((now - root.atime()).abs() < 120);

    // per-directory drill-down survives aggregation
    let canonical = std::path::absolute(dir.path()).unwrap();
    let archive = result.node(&canonical.join("archive")).unwrap();
    assert_eq!(archive.total(), 20);
    assert_eq!(archive.buckets(), &[20, 20, 20, 20, 20, 0]);
}

#[test]
fn hardlinks_counted_once_across_directories() {
    let dir = tempdir().unwrap();
    fs::create_dir(dir.path().join("a")).unwrap();
    fs::create_dir(dir.path().join("b")).unwrap();
    let original = dir.path().join("a/data.bin");
    write_file(&original, 512);
    fs::hard_link(&original, dir.path().join("b/alias.bin")).unwrap();

    let scanner = Scanner::new(config_for(dir.path())).unwrap();
    let result = scanner.scan().unwrap();

    assert_eq!(result.root().total(), 512);
    assert_eq!(result.root().file_count(), 1);
}

#[test]
fn bloom_strategy_matches_exact() {
    let dir = tempdir().unwrap();
    for i in 0..20 {
        write_file(&dir.path().join(format!("f{i}.bin")), 100 + i);
    }
    let original = dir.path().join("f0.bin");
    fs::hard_link(&original, dir.path().join("twin.bin")).unwrap();

    let exact = Scanner::new(config_for(dir.path()))
        .unwrap()
        .scan()
        .unwrap();

    let bloom_config = ScanConfig {
        dedup: DedupStrategy::Bloom {
            shards: 9,
            salts: 6,
            bits: 0xff_ffff,
        },
        ..config_for(dir.path())
    };
    let bloom = Scanner::new(bloom_config).unwrap().scan().unwrap();

    assert_eq!(exact.root().total(), bloom.root().total());
    assert_eq!(exact.root().file_count(), bloom.root().file_count());
}

#[test]
fn subtree_sums_are_consistent() {
    let dir = tempdir().unwrap();
    write_file(&dir.path().join("top.bin"), 5);
    for name in ["x", "y", "z"] {
        fs::create_dir(dir.path().join(name)).unwrap();
        write_file(&dir.path().join(name).join("f.bin"), 11);
        fs::create_dir(dir.path().join(name).join("inner")).unwrap();
        write_file(&dir.path().join(name).join("inner/g.bin"), 3);
    }

    let scanner = Scanner::new(config_for(dir.path())).unwrap();
    let result = scanner.scan().unwrap();
    let root = result.root();

    assert_eq!(root.total(), 5 + 3 * (11 + 3));
    assert_eq!(root.dir_count(), 7);
    assert_eq!(result.node_count(), 7);

    // the root's total equals its direct bytes plus its children's totals
    let canonical = std::path::absolute(dir.path()).unwrap();
    let child_sum: u64 = result
        .children_of(&canonical)
        .iter()
        .map(|c| c.total())
        .sum();
    assert_eq!(root.total(), 5 + child_sum);

    // tree shape bookkeeping
    let root_depth = result.root_depth();
    assert_eq!(result.breadth_at(root_depth), 1);
    assert_eq!(result.breadth_at(root_depth + 1), 3);
    assert_eq!(result.breadth_at(root_depth + 2), 3);
    assert_eq!(
        result.depths(),
        vec![root_depth, root_depth + 1, root_depth + 2]
    );
}

#[test]
fn rescan_is_stable() {
    let dir = tempdir().unwrap();
    fs::create_dir(dir.path().join("sub")).unwrap();
    write_file(&dir.path().join("sub/a.bin"), 42);
    let original = dir.path().join("sub/a.bin");
    fs::hard_link(&original, dir.path().join("sub/b.bin")).unwrap();

    let scanner = Scanner::new(config_for(dir.path())).unwrap();
    let first = scanner.scan().unwrap();
    // the dedup cache is rebuilt per scan, so the hardlink is counted
    // exactly once both times
    let second = scanner.scan().unwrap();

    assert_eq!(first.root().total(), 42);
    assert_eq!(second.root().total(), 42);
    assert_eq!(first.root().file_count(), second.root().file_count());
    assert_eq!(first.node_count(), second.node_count());
}

#[test]
fn filters_exclude_named_entries() {
    let dir = tempdir().unwrap();
    write_file(&dir.path().join("kept.bin"), 10);
    fs::create_dir(dir.path().join(".snapshot")).unwrap();
    write_file(&dir.path().join(".snapshot/hidden.bin"), 1000);
    write_file(&dir.path().join("skipme.bin"), 7);

    let config = ScanConfig {
        filters: vec![".snapshot".into(), "skipme.bin".into()],
        ..config_for(dir.path())
    };
    let result = Scanner::new(config).unwrap().scan().unwrap();

    assert_eq!(result.root().total(), 10);
    assert_eq!(result.root().file_count(), 1);
    assert_eq!(result.node_count(), 1);
}

#[test]
fn concurrent_scan_is_rejected_and_workers_exit() {
    let dir = tempdir().unwrap();
    for i in 0..10 {
        let sub = dir.path().join(format!("d{i}"));
        fs::create_dir(&sub).unwrap();
        for j in 0..10 {
            write_file(&sub.join(format!("f{j}.bin")), 10);
        }
    }

    let scanner = Arc::new(Scanner::new(config_for(dir.path())).unwrap());
    // every live worker thread holds a clone of this flag
    let terminate = scanner.terminate_flag();

    let background = {
        let scanner = Arc::clone(&scanner);
        thread::spawn(move || scanner.scan())
    };
    thread::sleep(Duration::from_millis(200));

    // the pool is up and a second scan is refused while it runs
    assert!(Arc::strong_count(&terminate) > 2);
    assert!(matches!(
        scanner.scan(),
        Err(ScanError::AlreadyScanning)
    ));

    let result = background.join().unwrap().unwrap();
    assert_eq!(result.root().total(), 1000);
    assert_eq!(result.root().dir_count(), 11);

    // only the scanner's copy and ours remain: no worker outlived scan()
    assert_eq!(Arc::strong_count(&terminate), 2);

    // and the scanner is reusable once the first scan has returned
    let again = scanner.scan().unwrap();
    assert_eq!(again.root().total(), 1000);
}

#[test]
fn symlinks_are_not_followed() {
    let dir = tempdir().unwrap();
    fs::create_dir(dir.path().join("real")).unwrap();
    write_file(&dir.path().join("real/f.bin"), 100);
    std::os::unix::fs::symlink(dir.path().join("real"), dir.path().join("alias")).unwrap();

    let result = Scanner::new(config_for(dir.path()))
        .unwrap()
        .scan()
        .unwrap();

    // the link itself is counted as an entry, its target is never entered
    // through it, so the real file contributes exactly once
    let link_len = fs::symlink_metadata(dir.path().join("alias")).unwrap().len();
    assert_eq!(result.root().total(), 100 + link_len);
    assert_eq!(result.root().file_count(), 2);
    assert_eq!(result.root().dir_count(), 2);
}
