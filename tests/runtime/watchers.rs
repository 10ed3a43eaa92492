use std::sync::{Arc, Mutex};
use std::time::Duration;

use jsbox::vfs::watch::{WatchEvent, WatchKind};

use super::common::Fixture;

fn collector() -> (Arc<Mutex<Vec<WatchEvent>>>, impl Fn(&WatchEvent) + Send + Sync + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (seen, move |event: &WatchEvent| sink.lock().unwrap().push(event.clone()))
}

async fn settle() {
    // One tick for the pump to wake, one sleep for the flush to land.
    tokio::task::yield_now().await;
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test]
async fn writes_are_delivered_through_the_pump() {
    let fixture = Fixture::new();
    let vfs = fixture.vfs();
    vfs.mkdir("/watched", false).unwrap();

    let (seen, listener) = collector();
    let _guard = vfs.watch_path("/watched", true, listener).unwrap();

    vfs.write_file("/watched/new.txt", "created").unwrap();
    settle().await;

    let events = seen.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0], WatchEvent { path: "/watched/new.txt".into(), kind: WatchKind::Rename });
}

#[tokio::test]
async fn burst_of_writes_is_batched_and_deduped() {
    let fixture = Fixture::new();
    let vfs = fixture.vfs();
    vfs.mkdir("/dir", false).unwrap();
    vfs.write_file("/dir/a.txt", "seed").unwrap();
    settle().await;

    let (seen, listener) = collector();
    let _guard = vfs.watch_path("/dir", true, listener).unwrap();

    // All in one synchronous block: one flush, one event per path.
    vfs.write_file("/dir/a.txt", "one").unwrap();
    vfs.write_file("/dir/a.txt", "two").unwrap();
    vfs.write_file("/dir/b.txt", "fresh").unwrap();
    settle().await;

    let events = seen.lock().unwrap();
    let mut paths: Vec<&str> = events.iter().map(|e| e.path.as_str()).collect();
    paths.sort_unstable();
    assert_eq!(paths, vec!["/dir/a.txt", "/dir/b.txt"]);
}

#[tokio::test]
async fn module_writes_from_execute_reach_watchers() {
    let fixture = Fixture::new();
    let vfs = fixture.vfs();

    let (seen, listener) = collector();
    let _guard = vfs.watch_path("/", true, listener).unwrap();

    fixture.runtime.execute("module.exports = 1;", Some("/script.js")).unwrap();
    settle().await;

    let events = seen.lock().unwrap();
    assert!(events.iter().any(|e| e.path == "/script.js" && e.kind == WatchKind::Rename));
}

#[tokio::test]
async fn closed_watcher_misses_later_batches() {
    let fixture = Fixture::new();
    let vfs = fixture.vfs();

    let (seen, listener) = collector();
    let mut guard = vfs.watch_path("/", true, listener).unwrap();

    vfs.write_file("/before.txt", "x").unwrap();
    settle().await;
    assert_eq!(seen.lock().unwrap().len(), 1);

    guard.close();
    vfs.write_file("/after.txt", "y").unwrap();
    settle().await;
    assert_eq!(seen.lock().unwrap().len(), 1);
}
