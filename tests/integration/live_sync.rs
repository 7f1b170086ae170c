use crate::common::{Replicas, GROUP};
use std::fs;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use syncfold::config::WatchConfig;
use syncfold::progress::NullProgress;
use syncfold::snapshot::SnapshotStore;
use syncfold::watch::{EventScheduler, LiveSync, LiveSyncExecutor, LogicalOp, RawEvent};

fn wait_for(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(25));
    }
    done()
}

fn live_executor(r: &Replicas) -> LiveSyncExecutor {
    LiveSyncExecutor::new(
        GROUP,
        r.roots.clone(),
        r.config.clone(),
        Arc::new(r.ops.clone()),
        Arc::new(r.store.clone()),
        Arc::new(NullProgress),
    )
}

#[test]
fn temporary_file_never_reaches_the_sink() {
    let (tx, rx) = mpsc::channel();
    let scheduler = EventScheduler::new(tx);
    scheduler
        .enqueue(vec![RawEvent::creating("/r/~lock"), RawEvent::deleted("/r/~lock")])
        .unwrap();
    scheduler.enqueue(vec![RawEvent::modified("/r/real.txt")]).unwrap();

    let ops = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].path(), std::path::Path::new("/r/real.txt"));
    scheduler.terminate();
}

#[test]
fn deferred_rename_completes_in_a_later_batch() {
    let (tx, rx) = mpsc::channel();
    let scheduler = EventScheduler::new(tx);
    scheduler
        .enqueue(vec![RawEvent::creating("/r/a"), RawEvent::renamed("/r/a", "/r/b")])
        .unwrap();
    scheduler.enqueue(vec![RawEvent::created("/r/a")]).unwrap();

    let ops = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(
        ops,
        vec![LogicalOp::Created {
            path: "/r/b".into(),
            kind: syncfold::watch::ItemKind::File,
        }]
    );
    scheduler.terminate();
}

#[test]
fn chained_renames_move_the_sibling_once() {
    let r = Replicas::new(2);
    r.write(0, "c.txt", "body", 1_000);
    r.write(1, "a.txt", "body", 1_000);

    let scheduler = EventScheduler::new(live_executor(&r));
    scheduler
        .enqueue(vec![
            RawEvent::renamed(r.path(0, "a.txt"), r.path(0, "b.txt")),
            RawEvent::renamed(r.path(0, "b.txt"), r.path(0, "c.txt")),
        ])
        .unwrap();

    assert!(wait_for(|| r.exists(1, "c.txt")));
    assert!(!r.exists(1, "a.txt"));
    assert!(!r.exists(1, "b.txt"));
    scheduler.terminate();
}

#[test]
fn live_deletion_is_logged_for_the_next_manual_sync() {
    let r = Replicas::new(2);
    r.write(0, "gone.txt", "x", 1_000);
    r.sync();

    fs::remove_file(r.path(0, "gone.txt")).unwrap();
    let scheduler = EventScheduler::new(live_executor(&r));
    scheduler
        .enqueue(vec![RawEvent::deleted(r.path(0, "gone.txt"))])
        .unwrap();
    assert!(wait_for(|| !r.exists(1, "gone.txt")));
    scheduler.terminate();

    let snapshot = r.store.load(&r.roots[0], GROUP).unwrap().unwrap();
    assert_eq!(snapshot.logged_deletions().count(), 1);
    assert_eq!(r.sync().planned, 0);
}

#[test]
fn watcher_propagates_a_new_file() {
    let r = Replicas::new(2);
    let live = LiveSync::start(
        GROUP,
        r.roots.clone(),
        r.config.clone(),
        &WatchConfig::default(),
        Arc::new(r.ops.clone()),
        Arc::new(r.store.clone()),
        Arc::new(NullProgress),
    )
    .unwrap();

    // give the OS watcher a moment to register
    thread::sleep(Duration::from_millis(200));
    fs::write(r.path(0, "fresh.txt"), b"hello").unwrap();

    assert!(wait_for(|| r.read(1, "fresh.txt").as_deref() == Some("hello")));
    live.stop();
}
