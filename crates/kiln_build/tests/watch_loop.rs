//! Watch-mode behavior: coalescing, configuration reloads, and parity with
//! single-pass builds.

use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use kiln_build::{
    CycleReport, FsEvent, FsEventKind, SessionDriver, TextEngine, WatchMessage, Watcher,
};
use kiln_common::{FileSystem, MemoryFileSystem, OsFileSystem};

const CONFIG: &str = r#"
[project]
name = "watched"

[inputs]
roots = ["b.kl", "c.kl"]

[watch]
debounce_ms = 5
poll_interval_ms = 10
"#;

const STATE: &str = "/p/out/kiln.buildinfo";

fn project() -> Arc<MemoryFileSystem> {
    let fs = Arc::new(MemoryFileSystem::new());
    fs.insert("/p/kiln.toml", CONFIG);
    fs.insert("/p/a.kl", "alpha\n");
    fs.insert("/p/b.kl", "@import \"a.kl\"\nbeta\n");
    fs.insert("/p/c.kl", "gamma\n");
    fs
}

fn modified(path: &str) -> WatchMessage {
    WatchMessage::Events(vec![FsEvent::new(FsEventKind::Modified, path)])
}

#[test]
fn watch_and_once_leave_identical_state() {
    let once = project();
    let mut driver = SessionDriver::new(TextEngine, once.clone(), "/p").unwrap();
    driver.run_cycle();
    once.insert("/p/a.kl", "alpha two\n");
    driver.run_cycle();

    let watched = project();
    let mut driver = SessionDriver::new(TextEngine, watched.clone(), "/p").unwrap();
    let (tx, rx) = mpsc::channel();
    tx.send(modified("/p/a.kl")).unwrap();
    drop(tx);

    let mut reports: Vec<CycleReport> = Vec::new();
    let edit = watched.clone();
    driver.run_watch(&rx, |report| {
        if reports.is_empty() {
            edit.insert("/p/a.kl", "alpha two\n");
        }
        reports.push(report.clone());
    });

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[1].modified, 1);
    assert_eq!(reports[1].emitted.len(), 2);
    assert_eq!(
        once.get(Path::new(STATE)).unwrap(),
        watched.get(Path::new(STATE)).unwrap()
    );
    assert_eq!(
        once.get(Path::new("/p/out/b.out")),
        watched.get(Path::new("/p/out/b.out"))
    );
}

#[test]
fn descriptor_change_reloads_configuration() {
    let fs = project();
    let mut driver = SessionDriver::new(TextEngine, fs.clone(), "/p").unwrap();
    let (tx, rx) = mpsc::channel();
    tx.send(modified("/p/kiln.toml")).unwrap();
    drop(tx);

    let edit = fs.clone();
    let mut reports: Vec<CycleReport> = Vec::new();
    driver.run_watch(&rx, |report| {
        if reports.is_empty() {
            edit.insert("/p/kiln.toml", format!("{CONFIG}\n[build]\nsource_map = true\n"));
        }
        reports.push(report.clone());
    });

    assert_eq!(reports.len(), 2);
    assert!(reports[1].full_rebuild);
    assert!(driver.project().config.build.source_map);
    assert!(fs.exists(Path::new("/p/out/b.out.map")));
}

#[test]
fn broken_descriptor_does_not_end_the_loop() {
    let fs = project();
    let mut driver = SessionDriver::new(TextEngine, fs.clone(), "/p").unwrap();
    let (tx, rx) = mpsc::channel();
    tx.send(modified("/p/kiln.toml")).unwrap();

    let edit = fs.clone();
    let mut reports: Vec<CycleReport> = Vec::new();
    let sender = tx.clone();
    drop(tx);
    driver.run_watch(&rx, |report| {
        match reports.len() {
            0 => edit.insert("/p/kiln.toml", "[project"),
            1 => {
                edit.insert("/p/kiln.toml", CONFIG);
                edit.insert("/p/c.kl", "gamma two\n");
                sender.send(modified("/p/kiln.toml")).unwrap();
            }
            _ => sender.send(WatchMessage::Stop).unwrap(),
        }
        reports.push(report.clone());
    });

    assert_eq!(reports.len(), 3);
    assert!(reports[1].aborted);
    assert!(!reports[2].aborted);
    assert_eq!(reports[2].emitted.len(), 1);
}

#[test]
fn polling_watcher_drives_rebuilds_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    std::fs::write(root.join("kiln.toml"), CONFIG).unwrap();
    std::fs::write(root.join("a.kl"), "alpha\n").unwrap();
    std::fs::write(root.join("b.kl"), "@import \"a.kl\"\nbeta\n").unwrap();
    std::fs::write(root.join("c.kl"), "gamma\n").unwrap();

    let fs: Arc<dyn FileSystem> = Arc::new(OsFileSystem);
    let mut driver = SessionDriver::new(TextEngine, fs, &root).unwrap();
    let mut watcher = driver.polling_watcher();
    let (tx, rx) = mpsc::channel();
    watcher.watch(tx.clone()).unwrap();

    // Give up rather than hang if no change is ever seen.
    let timeout = tx.clone();
    thread::spawn(move || {
        thread::sleep(Duration::from_secs(10));
        let _ = timeout.send(WatchMessage::Stop);
    });

    let mut reports: Vec<CycleReport> = Vec::new();
    driver.run_watch(&rx, |report| {
        match reports.len() {
            0 => std::fs::write(root.join("a.kl"), "alpha, edited\n").unwrap(),
            _ => tx.send(WatchMessage::Stop).unwrap(),
        }
        reports.push(report.clone());
    });
    watcher.stop();

    // A scan can land mid-write, so the edit may arrive as two batches.
    assert!(reports.len() >= 2);
    assert!(reports[1..].iter().all(|r| !r.has_errors()));
    let b = std::fs::read_to_string(root.join("out").join("b.out")).unwrap();
    let a = std::fs::read(root.join("out").join("a.out")).unwrap();
    assert!(b.contains(&kiln_common::ContentHash::from_bytes(&a).to_string()));
}
