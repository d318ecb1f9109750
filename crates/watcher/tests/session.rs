//! End-to-end tests against the real notification backend

use anyhow::Result;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{sleep, timeout, Instant};
use watcher::{ChangeKind, SessionState, WatchError, WatchEvent, WatchSession, WatcherConfig};

const EVENT_TIMEOUT: Duration = Duration::from_secs(10);
const SETTLE: Duration = Duration::from_millis(500);

/// Temp dir whose path matches what the backend reports
fn temp_root() -> Result<(TempDir, PathBuf)> {
    let temp = TempDir::new()?;
    let root = temp.path().canonicalize()?;
    Ok((temp, root))
}

/// Wait for the first change matching `kind` and `path`
async fn wait_for(
    rx: &mut UnboundedReceiver<WatchEvent>,
    kind: ChangeKind,
    path: &Path,
) -> Result<Vec<WatchEvent>> {
    let mut seen = Vec::new();
    let deadline = Instant::now() + EVENT_TIMEOUT;
    loop {
        let event = timeout(deadline.saturating_duration_since(Instant::now()), rx.recv())
            .await
            .map_err(|_| anyhow::anyhow!("timed out waiting for {} {}", kind, path.display()))?
            .ok_or_else(|| anyhow::anyhow!("event stream closed"))?;

        let hit = event
            .as_change()
            .map_or(false, |c| c.kind == kind && c.path == path);
        seen.push(event);
        if hit {
            return Ok(seen);
        }
    }
}

/// Everything that arrives within `window`
async fn drain(rx: &mut UnboundedReceiver<WatchEvent>, window: Duration) -> Vec<WatchEvent> {
    let mut seen = Vec::new();
    let deadline = Instant::now() + window;
    while let Ok(Some(event)) = timeout(deadline.saturating_duration_since(Instant::now()), rx.recv()).await {
        seen.push(event);
    }
    seen
}

fn count(events: &[WatchEvent], kind: ChangeKind, path: &Path) -> usize {
    events
        .iter()
        .filter_map(WatchEvent::as_change)
        .filter(|c| c.kind == kind && c.path == path)
        .count()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_lifecycle_and_chaining() -> Result<()> {
    let (_temp, root) = temp_root()?;
    let session = WatchSession::new([&root], WatcherConfig::default())?;
    assert!(!session.is_watching());
    assert_eq!(session.state(), SessionState::Idle);

    let watching = session.start().await?.is_watching();
    assert!(watching);
    assert_eq!(session.state(), SessionState::Ready);

    assert!(matches!(session.start().await, Err(WatchError::AlreadyStarted)));

    session.stop().await;
    assert!(!session.is_watching());
    assert_eq!(session.state(), SessionState::Stopped);

    // Second stop is a no-op
    session.stop().await;
    assert!(matches!(session.start().await, Err(WatchError::AlreadyStopped)));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ready_fires_once_for_empty_root() -> Result<()> {
    let (_temp, root) = temp_root()?;
    let session = WatchSession::new([&root], WatcherConfig::default())?;

    let ready = Arc::new(AtomicUsize::new(0));
    let created = Arc::new(AtomicUsize::new(0));
    let r = ready.clone();
    session.on_ready(move || {
        r.fetch_add(1, Ordering::SeqCst);
    });
    let c = created.clone();
    session.on_created(move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    });

    session.start().await?;
    sleep(SETTLE).await;
    session.stop().await;

    assert_eq!(ready.load(Ordering::SeqCst), 1);
    assert_eq!(created.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_initial_scan_reports_existing_entries() -> Result<()> {
    let (_temp, root) = temp_root()?;
    fs::create_dir(root.join("src"))?;
    fs::write(root.join("src/main.rs"), b"fn main() {}")?;

    let session = WatchSession::new([&root], WatcherConfig::default())?;
    let (_, mut rx) = session.subscribe();
    session.start().await?;

    let events = wait_for(&mut rx, ChangeKind::Created, &root.join("src/main.rs")).await?;
    assert_eq!(count(&events, ChangeKind::DirectoryCreated, &root.join("src")), 1);

    // Initial events precede ready
    let rest = drain(&mut rx, SETTLE).await;
    assert!(rest.iter().any(WatchEvent::is_ready));

    session.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_create_modify_delete_then_silence() -> Result<()> {
    let (_temp, root) = temp_root()?;
    let session = WatchSession::new([&root], WatcherConfig::default())?;
    let (_, mut rx) = session.subscribe();
    session.start().await?;

    let hello = root.join("hello.txt");
    fs::write(&hello, b"hello")?;
    wait_for(&mut rx, ChangeKind::Created, &hello).await?;

    // Single write syscall, longer than the original
    let mut file = fs::OpenOptions::new().write(true).open(&hello)?;
    file.write_all(b"hello, world")?;
    drop(file);
    wait_for(&mut rx, ChangeKind::Modified, &hello).await?;

    fs::remove_file(&hello)?;
    let events = wait_for(&mut rx, ChangeKind::Deleted, &hello).await?;
    assert_eq!(count(&events, ChangeKind::Created, &hello), 0);

    session.stop().await;

    let late = root.join("late.txt");
    fs::write(&late, b"after stop")?;
    sleep(SETTLE).await;

    // Stream is closed; only events classified before stop may remain
    let mut remaining = Vec::new();
    while let Some(event) = rx.recv().await {
        remaining.push(event);
    }
    assert!(remaining
        .iter()
        .filter_map(WatchEvent::as_change)
        .all(|c| c.path != late));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_created_event_for_new_file() -> Result<()> {
    let (_temp, root) = temp_root()?;
    let session = WatchSession::new([&root], WatcherConfig::default())?;
    let (_, mut rx) = session.subscribe();
    session.start().await?;

    let hello = root.join("hello.txt");
    fs::write(&hello, b"hello")?;
    let mut events = wait_for(&mut rx, ChangeKind::Created, &hello).await?;
    events.extend(drain(&mut rx, SETTLE).await);

    assert_eq!(count(&events, ChangeKind::Created, &hello), 1);
    session.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ignore_initial_then_modify() -> Result<()> {
    let (_temp, root) = temp_root()?;
    let watched = root.join("watch.txt");
    fs::write(&watched, b"initial")?;

    let config = WatcherConfig::default().with_ignore_initial(true);
    let session = WatchSession::new([&root], config)?;
    let (_, mut rx) = session.subscribe();
    session.start().await?;

    let mut file = fs::OpenOptions::new().write(true).open(&watched)?;
    file.write_all(b"updated content")?;
    drop(file);

    let mut events = wait_for(&mut rx, ChangeKind::Modified, &watched).await?;
    events.extend(drain(&mut rx, SETTLE).await);

    assert_eq!(count(&events, ChangeKind::Modified, &watched), 1);
    let created = events
        .iter()
        .filter_map(WatchEvent::as_change)
        .filter(|c| c.kind == ChangeKind::Created)
        .count();
    assert_eq!(created, 0);

    session.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_delete_reported_once() -> Result<()> {
    let (_temp, root) = temp_root()?;
    let doomed = root.join("delete-me.txt");
    fs::write(&doomed, b"bye")?;

    let session = WatchSession::new([&root], WatcherConfig::default().with_ignore_initial(true))?;
    let (_, mut rx) = session.subscribe();
    session.start().await?;

    fs::remove_file(&doomed)?;
    let mut events = wait_for(&mut rx, ChangeKind::Deleted, &doomed).await?;
    events.extend(drain(&mut rx, SETTLE).await);

    assert_eq!(count(&events, ChangeKind::Deleted, &doomed), 1);
    let mentions = events
        .iter()
        .filter_map(WatchEvent::as_change)
        .filter(|c| c.path == doomed)
        .count();
    assert_eq!(mentions, 1);

    session.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_directory_delete_cascades() -> Result<()> {
    let (_temp, root) = temp_root()?;
    let dir = root.join("dir");
    fs::create_dir(&dir)?;
    let files: Vec<PathBuf> = (0..3).map(|i| dir.join(format!("f{i}.txt"))).collect();
    for file in &files {
        fs::write(file, b"x")?;
    }

    let session = WatchSession::new([&root], WatcherConfig::default().with_ignore_initial(true))?;
    let (_, mut rx) = session.subscribe();
    session.start().await?;

    fs::remove_dir_all(&dir)?;
    let events = wait_for(&mut rx, ChangeKind::DirectoryDeleted, &dir).await?;

    for file in &files {
        assert_eq!(count(&events, ChangeKind::Deleted, file), 1, "{}", file.display());
    }

    let rest = drain(&mut rx, SETTLE).await;
    assert_eq!(count(&rest, ChangeKind::DirectoryDeleted, &dir), 0);

    session.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_new_directory_tree_reported() -> Result<()> {
    let (_temp, base) = temp_root()?;
    let root = base.join("root");
    let staging = base.join("staging");
    fs::create_dir(&root)?;
    fs::create_dir_all(staging.join("a/b"))?;
    fs::write(staging.join("a/b/c.txt"), b"c")?;

    let session = WatchSession::new([&root], WatcherConfig::default())?;
    let (_, mut rx) = session.subscribe();
    session.start().await?;

    // Whole tree appears at once
    fs::rename(staging.join("a"), root.join("a"))?;
    let leaf = root.join("a/b/c.txt");

    let mut events = wait_for(&mut rx, ChangeKind::Created, &leaf).await?;
    events.extend(drain(&mut rx, SETTLE).await);

    assert_eq!(count(&events, ChangeKind::DirectoryCreated, &root.join("a")), 1);
    assert_eq!(count(&events, ChangeKind::DirectoryCreated, &root.join("a/b")), 1);
    assert_eq!(count(&events, ChangeKind::Created, &leaf), 1);

    session.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ignored_paths_are_silent() -> Result<()> {
    let (_temp, root) = temp_root()?;
    let config = WatcherConfig::default().with_ignored("*.log").with_ignored("build/");
    let session = WatchSession::new([&root], config)?;
    let (_, mut rx) = session.subscribe();
    session.start().await?;

    fs::write(root.join("noise.log"), b"noise")?;
    fs::create_dir(root.join("build"))?;
    fs::write(root.join("build/out.o"), b"obj")?;
    let marker = root.join("marker.txt");
    fs::write(&marker, b"m")?;

    let mut events = wait_for(&mut rx, ChangeKind::Created, &marker).await?;
    events.extend(drain(&mut rx, SETTLE).await);

    let leaked: Vec<_> = events
        .iter()
        .filter_map(WatchEvent::as_change)
        .filter(|c| c.path != marker)
        .collect();
    assert!(leaked.is_empty(), "unexpected events: {:?}", leaked);

    session.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_panicking_subscriber_does_not_stop_session() -> Result<()> {
    let (_temp, root) = temp_root()?;
    let session = WatchSession::new([&root], WatcherConfig::default())?;

    session.on_created(|_| panic!("subscriber bug"));
    let (_, mut rx) = session.subscribe();
    session.start().await?;

    let first = root.join("first.txt");
    let second = root.join("second.txt");
    fs::write(&first, b"1")?;
    wait_for(&mut rx, ChangeKind::Created, &first).await?;
    fs::write(&second, b"2")?;
    wait_for(&mut rx, ChangeKind::Created, &second).await?;

    assert!(session.is_watching());
    session.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unsubscribe_stops_delivery() -> Result<()> {
    let (_temp, root) = temp_root()?;
    let session = WatchSession::new([&root], WatcherConfig::default())?;

    let hits = Arc::new(AtomicUsize::new(0));
    let h = hits.clone();
    let id = session.on_created(move |_| {
        h.fetch_add(1, Ordering::SeqCst);
    });
    let (_, mut rx) = session.subscribe();
    session.start().await?;

    assert!(session.unsubscribe(id));
    let file = root.join("unheard.txt");
    fs::write(&file, b"?")?;
    wait_for(&mut rx, ChangeKind::Created, &file).await?;

    assert_eq!(hits.load(Ordering::SeqCst), 0);
    session.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_missing_root_stops_session() -> Result<()> {
    let (_temp, root) = temp_root()?;
    let missing = root.join("does-not-exist");

    let session = WatchSession::new([&missing], WatcherConfig::default())?;
    let errors = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = errors.clone();
    session.on_error(move |err| sink.lock().push(err.clone()));
    let (_, mut rx) = session.subscribe();

    session.start().await?;
    assert_eq!(session.state(), SessionState::Stopped);
    assert!(!session.is_watching());

    let errors = errors.lock().clone();
    assert!(matches!(
        errors.first(),
        Some(WatchError::BackendUnavailable { root, .. }) if root == &missing
    ));
    assert_eq!(errors.last(), Some(&WatchError::NoRootsAvailable));

    // Channel subscribers see the end of the stream
    let remaining = drain(&mut rx, SETTLE).await;
    assert!(remaining.iter().all(|e| matches!(e, WatchEvent::Error(_))));
    assert!(rx.recv().await.is_none());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_partial_root_failure_keeps_watching() -> Result<()> {
    let (_temp, root) = temp_root()?;
    let missing = root.join("missing");
    let live = root.join("live");
    fs::create_dir(&live)?;

    let session = WatchSession::new([&missing, &live], WatcherConfig::default())?;
    let (_, mut rx) = session.subscribe();
    session.start().await?;
    assert_eq!(session.state(), SessionState::Ready);

    let file = live.join("still-here.txt");
    fs::write(&file, b"ok")?;
    let events = wait_for(&mut rx, ChangeKind::Created, &file).await?;
    assert!(events
        .iter()
        .any(|e| matches!(e, WatchEvent::Error(WatchError::BackendUnavailable { .. }))));

    session.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_polling_backend() -> Result<()> {
    let (_temp, root) = temp_root()?;
    let config = WatcherConfig::default().with_poll_interval(Duration::from_millis(50));
    let session = WatchSession::new([&root], config)?;
    let (_, mut rx) = session.subscribe();
    session.start().await?;

    let file = root.join("polled.txt");
    fs::write(&file, b"polled")?;
    wait_for(&mut rx, ChangeKind::Created, &file).await?;

    fs::remove_file(&file)?;
    wait_for(&mut rx, ChangeKind::Deleted, &file).await?;

    session.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_stop_waits_for_callbacks() -> Result<()> {
    let (_temp, root) = temp_root()?;
    for i in 0..5 {
        fs::write(root.join(format!("file{}.txt", i)), b"data")?;
    }

    let session = WatchSession::new([&root], WatcherConfig::default())?;
    let returned = Arc::new(AtomicBool::new(false));
    let fired = Arc::new(AtomicUsize::new(0));
    let late = Arc::new(AtomicUsize::new(0));
    for kind in ChangeKind::ALL {
        let (returned, fired, late) = (returned.clone(), fired.clone(), late.clone());
        session.on_change(kind, move |_| {
            std::thread::sleep(Duration::from_millis(200));
            fired.fetch_add(1, Ordering::SeqCst);
            if returned.load(Ordering::SeqCst) {
                late.fetch_add(1, Ordering::SeqCst);
            }
        });
    }

    // Seed events are queued before start() returns; the dispatcher is still busy with them
    session.start().await?;

    let first = tokio::spawn({
        let session = session.clone();
        let returned = returned.clone();
        async move {
            session.stop().await;
            returned.store(true, Ordering::SeqCst);
        }
    });
    sleep(Duration::from_millis(20)).await;
    session.stop().await;
    returned.store(true, Ordering::SeqCst);
    first.await?;

    assert_eq!(fired.load(Ordering::SeqCst), 5);
    assert_eq!(late.load(Ordering::SeqCst), 0);
    assert_eq!(session.state(), SessionState::Stopped);

    // Stopped sessions return at once
    timeout(Duration::from_millis(100), session.stop()).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_during_initial_scan() -> Result<()> {
    let (_temp, root) = temp_root()?;
    for d in 0..20 {
        let dir = root.join(format!("dir{:02}", d));
        fs::create_dir(&dir)?;
        for f in 0..1000 {
            fs::write(dir.join(format!("file{:04}.txt", f)), b"")?;
        }
    }

    let session = WatchSession::new([&root], WatcherConfig::default())?;
    let stopped = Arc::new(AtomicBool::new(false));
    let late = Arc::new(AtomicUsize::new(0));
    let ready = Arc::new(AtomicUsize::new(0));

    let (s, l) = (stopped.clone(), late.clone());
    session.on_created(move |_| {
        if s.load(Ordering::SeqCst) {
            l.fetch_add(1, Ordering::SeqCst);
        }
    });
    let r = ready.clone();
    session.on_ready(move || {
        r.fetch_add(1, Ordering::SeqCst);
    });

    let starting = tokio::spawn({
        let session = session.clone();
        async move { session.start().await.map(|_| ()) }
    });
    while session.state() == SessionState::Idle {
        tokio::task::yield_now().await;
    }

    timeout(EVENT_TIMEOUT, session.stop()).await?;
    stopped.store(true, Ordering::SeqCst);

    assert!(timeout(EVENT_TIMEOUT, starting).await??.is_ok());
    sleep(SETTLE).await;

    assert_eq!(late.load(Ordering::SeqCst), 0);
    assert_eq!(ready.load(Ordering::SeqCst), 0);
    assert_eq!(session.state(), SessionState::Stopped);
    Ok(())
}
