use crate::model::unix_now_ms;
use crate::registry::Registry;
use crate::{RegistryError, Result};
use ignore::WalkBuilder;
use log::{debug, info, warn};
use notify::event::{ModifyKind, RenameMode};
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateOp {
    Add,
    Change,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateState {
    Queued,
    Processing,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpdate {
    pub op: UpdateOp,
    pub path: PathBuf,
    pub state: UpdateState,
}

/// Ordered queue of filesystem updates awaiting the next drain.
#[derive(Debug, Default)]
pub struct UpdateQueue {
    items: VecDeque<PendingUpdate>,
}

impl UpdateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an update. A repeat of the last queued `(op, path)` is coalesced and returns
    /// `false`.
    pub fn push(&mut self, op: UpdateOp, path: PathBuf) -> bool {
        if let Some(last) = self.items.back() {
            if last.op == op && last.path == path {
                return false;
            }
        }
        self.items.push_back(PendingUpdate {
            op,
            path,
            state: UpdateState::Queued,
        });
        true
    }

    pub fn pop_front(&mut self) -> Option<PendingUpdate> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingUpdate> {
        self.items.iter()
    }
}

/// Outcome of one queue drain.
#[derive(Debug, Clone, Default)]
pub struct DrainSummary {
    /// Drained updates in processing order, each `Done`
    pub updates: Vec<PendingUpdate>,
    pub scanned: usize,
    pub deleted: usize,
    pub errors: Vec<String>,
    pub duration_ms: u64,
    /// Time spent waiting for the mutation lock before processing
    pub lock_wait_ms: u64,
}

/// Published after every drain.
#[derive(Debug, Clone, Serialize)]
pub struct WatchUpdate {
    pub completed_at_ms: u64,
    pub duration_ms: u64,
    pub processed: usize,
    pub scanned: usize,
    pub deleted: usize,
    pub errors: Vec<String>,
    pub success: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct WatcherHealth {
    pub pending_events: usize,
    pub draining: bool,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub last_drain_ms: Option<u64>,
    pub last_drain_at_ms: Option<u64>,
    /// Time the last drain spent waiting for the mutation lock
    pub mutation_wait_ms_last: u64,
    /// Longest mutation lock wait seen by any writer since the registry opened
    pub mutation_wait_ms_max: u64,
}

impl WatcherHealth {
    const fn initial() -> Self {
        Self {
            pending_events: 0,
            draining: false,
            last_error: None,
            consecutive_failures: 0,
            last_drain_ms: None,
            last_drain_at_ms: None,
            mutation_wait_ms_last: 0,
            mutation_wait_ms_max: 0,
        }
    }
}

/// Translate one notify event into queue operations.
pub fn map_event(event: &Event) -> Vec<(UpdateOp, PathBuf)> {
    let each = |op: UpdateOp| -> Vec<(UpdateOp, PathBuf)> {
        event.paths.iter().map(|p| (op, p.clone())).collect()
    };
    match event.kind {
        EventKind::Create(_) => each(UpdateOp::Add),
        EventKind::Remove(_) => each(UpdateOp::Delete),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => each(UpdateOp::Delete),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => each(UpdateOp::Add),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match event.paths.as_slice() {
            [from, to, ..] => vec![(UpdateOp::Delete, from.clone()), (UpdateOp::Add, to.clone())],
            _ => existence_ops(&event.paths),
        },
        EventKind::Modify(ModifyKind::Name(_)) | EventKind::Any | EventKind::Other => {
            existence_ops(&event.paths)
        }
        EventKind::Modify(_) => each(UpdateOp::Change),
        EventKind::Access(_) => Vec::new(),
    }
}

fn existence_ops(paths: &[PathBuf]) -> Vec<(UpdateOp, PathBuf)> {
    paths
        .iter()
        .map(|path| {
            let op = if path.exists() {
                UpdateOp::Change
            } else {
                UpdateOp::Delete
            };
            (op, path.clone())
        })
        .collect()
}

/// Queue the operations for one event. Adds and changes need a relevant file (a new directory
/// is expanded to its relevant files); deletes are queued for any path outside ignored scopes.
/// Writes to the registry's own snapshot and report never queue anything.
pub fn enqueue_event(registry: &Registry, queue: &mut UpdateQueue, event: &Event) -> usize {
    let scanner = registry.scanner();
    let mut queued = 0;
    for (op, path) in map_event(event) {
        if scanner.relative(&path).is_none()
            || scanner.in_ignored_scope(&path)
            || registry.config().is_state_file(&path)
        {
            continue;
        }
        match op {
            UpdateOp::Delete => queued += usize::from(queue.push(op, path)),
            UpdateOp::Add | UpdateOp::Change if path.is_dir() => {
                for file in scanner.discover_in(&path) {
                    queued += usize::from(queue.push(UpdateOp::Add, file));
                }
            }
            UpdateOp::Add | UpdateOp::Change => {
                if scanner.is_relevant(&path) {
                    queued += usize::from(queue.push(op, path));
                }
            }
        }
    }
    queued
}

/// Process every queued update in order under the mutation lock, then refresh link statuses
/// and save once.
pub async fn drain_queue(registry: &Registry, queue: &mut UpdateQueue) -> DrainSummary {
    let mut summary = DrainSummary::default();
    if queue.is_empty() {
        return summary;
    }
    let start = Instant::now();
    let guard = registry.lock_mutation().await;
    summary.lock_wait_ms = registry.mutation_lock().wait_ms_last();

    while let Some(mut item) = queue.pop_front() {
        item.state = UpdateState::Processing;
        match item.op {
            UpdateOp::Add | UpdateOp::Change => {
                match registry.scan_one_locked(&guard, &item.path).await {
                    Ok(Some(_)) => summary.scanned += 1,
                    Ok(None) => {}
                    Err(err) => {
                        warn!("Failed to rescan {}: {err}", item.path.display());
                        summary
                            .errors
                            .push(format!("{}: {err}", item.path.display()));
                    }
                }
            }
            UpdateOp::Delete => {
                summary.deleted += registry.delete_path_locked(&guard, &item.path).await;
            }
        }
        item.state = UpdateState::Done;
        summary.updates.push(item);
    }

    registry.refresh_links_locked(&guard).await;
    registry.persist_logged().await;
    drop(guard);

    summary.duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
    debug!(
        "Drained {} update(s): {} scanned, {} deleted in {} ms ({} ms waiting for the lock)",
        summary.updates.len(),
        summary.scanned,
        summary.deleted,
        summary.duration_ms,
        summary.lock_wait_ms
    );
    summary
}

enum WatcherCommand {
    Shutdown { done: Option<oneshot::Sender<()>> },
}

type SharedWatcher = Arc<std::sync::Mutex<Option<RecommendedWatcher>>>;
type WatchState = Arc<std::sync::Mutex<HashSet<PathBuf>>>;

/// Keeps the registry in sync with the filesystem under its root.
pub struct RegistryWatcher {
    command_tx: mpsc::Sender<WatcherCommand>,
    update_tx: broadcast::Sender<WatchUpdate>,
    health_rx: watch::Receiver<WatcherHealth>,
    watch_state: WatchState,
}

impl RegistryWatcher {
    /// Start watching. Must be called from within a tokio runtime.
    pub fn start(registry: Arc<Registry>) -> Result<Self> {
        let (event_tx, event_rx) = mpsc::channel(1024);
        let (command_tx, command_rx) = mpsc::channel(4);
        let (health_tx, health_rx) = watch::channel(WatcherHealth::initial());
        let (update_tx, _) = broadcast::channel(32);

        let (watcher, watch_state) = create_fs_watcher(
            &registry,
            event_tx,
            registry.config().watch.notify_poll_interval(),
        )?;
        info!(
            "Watching {} ({} directories)",
            registry.config().root.display(),
            watch_state.lock().map(|s| s.len()).unwrap_or(0)
        );
        let watcher = Arc::new(std::sync::Mutex::new(Some(watcher)));

        spawn_watch_loop(
            registry,
            event_rx,
            command_rx,
            update_tx.clone(),
            health_tx,
            watcher,
            Arc::clone(&watch_state),
        );

        Ok(Self {
            command_tx,
            update_tx,
            health_rx,
            watch_state,
        })
    }

    #[must_use]
    pub fn subscribe_updates(&self) -> broadcast::Receiver<WatchUpdate> {
        self.update_tx.subscribe()
    }

    #[must_use]
    pub fn health_snapshot(&self) -> WatcherHealth {
        self.health_rx.borrow().clone()
    }

    #[must_use]
    pub fn health_stream(&self) -> watch::Receiver<WatcherHealth> {
        self.health_rx.clone()
    }

    /// Number of directories with an active OS watch.
    pub fn watch_count(&self) -> usize {
        self.watch_state.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Stop accepting events, drain what was already received, save, and wait for completion.
    pub async fn shutdown(self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.command_tx
            .send(WatcherCommand::Shutdown {
                done: Some(done_tx),
            })
            .await
            .map_err(|e| RegistryError::Watch(format!("watch loop already stopped: {e}")))?;
        done_rx
            .await
            .map_err(|e| RegistryError::Watch(format!("watch loop ended early: {e}")))
    }
}

impl Drop for RegistryWatcher {
    fn drop(&mut self) {
        let _ = self
            .command_tx
            .try_send(WatcherCommand::Shutdown { done: None });
    }
}

fn create_fs_watcher(
    registry: &Registry,
    sender: mpsc::Sender<notify::Result<Event>>,
    poll_interval: Duration,
) -> Result<(RecommendedWatcher, WatchState)> {
    let mut watcher = RecommendedWatcher::new(
        move |res| {
            let _ = sender.blocking_send(res);
        },
        NotifyConfig::default().with_poll_interval(poll_interval),
    )
    .map_err(|e| RegistryError::Watch(format!("watcher init failed: {e}")))?;

    let watch_state: WatchState = Arc::new(std::sync::Mutex::new(HashSet::new()));
    {
        let mut guard = watch_state
            .lock()
            .map_err(|_| RegistryError::Other("watch state lock poisoned".to_string()))?;
        for dir in watchable_dirs(registry, &registry.config().root) {
            if let Err(err) = watcher.watch(&dir, RecursiveMode::NonRecursive) {
                warn!("Failed to watch {}: {err}", dir.display());
                continue;
            }
            guard.insert(dir);
        }
    }
    Ok((watcher, watch_state))
}

/// `start` and every directory below it that is outside the ignored scopes.
fn watchable_dirs(registry: &Registry, start: &Path) -> Vec<PathBuf> {
    let scanner = registry.scanner();
    let root = scanner.root().to_path_buf();
    let mut builder = WalkBuilder::new(start);
    builder
        .hidden(false)
        .git_ignore(true)
        .git_global(true)
        .git_exclude(true);
    {
        let root = root.clone();
        builder.filter_entry(move |entry| is_watchable_dir(&root, entry.path()));
    }

    builder
        .build()
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_dir()))
        .map(|entry| entry.into_path())
        .filter(|path| is_watchable_dir(&root, path))
        .collect()
}

fn is_watchable_dir(root: &Path, path: &Path) -> bool {
    let Ok(relative) = path.strip_prefix(root) else {
        return false;
    };
    !relative.components().any(|component| {
        let std::path::Component::Normal(name) = component else {
            return false;
        };
        let lowered = name.to_string_lossy().to_lowercase();
        crate::scanner::IGNORED_SCOPES
            .iter()
            .any(|ignored| *ignored == lowered)
    })
}

/// Put new directories under watch so files created inside them are seen.
fn maybe_add_watches(registry: &Registry, event: &Event, watcher: &SharedWatcher, state: &WatchState) {
    let new_dirs: Vec<PathBuf> = event
        .paths
        .iter()
        .filter(|path| path.is_dir())
        .flat_map(|path| watchable_dirs(registry, path))
        .collect();
    if new_dirs.is_empty() {
        return;
    }

    let Ok(mut watched) = state.lock() else {
        warn!("watch state lock poisoned");
        return;
    };
    let Ok(mut watcher_guard) = watcher.lock() else {
        warn!("watcher lock poisoned");
        return;
    };
    let Some(watcher) = watcher_guard.as_mut() else {
        return;
    };
    for dir in new_dirs {
        if watched.contains(&dir) {
            continue;
        }
        match watcher.watch(&dir, RecursiveMode::NonRecursive) {
            Ok(()) => {
                watched.insert(dir);
            }
            Err(err) => warn!("Failed to watch {}: {err}", dir.display()),
        }
    }
}

fn spawn_watch_loop(
    registry: Arc<Registry>,
    mut event_rx: mpsc::Receiver<notify::Result<Event>>,
    mut command_rx: mpsc::Receiver<WatcherCommand>,
    update_tx: broadcast::Sender<WatchUpdate>,
    health_tx: watch::Sender<WatcherHealth>,
    watcher: SharedWatcher,
    watch_state: WatchState,
) {
    tokio::spawn(async move {
        let debounce = registry.config().watch.debounce();
        let mut queue = UpdateQueue::new();
        let mut health = WatcherHealth::initial();
        let mut last_event: Option<time::Instant> = None;

        loop {
            let deadline = last_event
                .filter(|_| !queue.is_empty())
                .map(|last| last + debounce);

            tokio::select! {
                Some(event) = event_rx.recv() => {
                    match event {
                        Ok(event) => {
                            maybe_add_watches(&registry, &event, &watcher, &watch_state);
                            if enqueue_event(&registry, &mut queue, &event) > 0 {
                                last_event = Some(time::Instant::now());
                            }
                        }
                        Err(err) => {
                            warn!("Watch backend error: {err}");
                            health.last_error = Some(err.to_string());
                            health.consecutive_failures += 1;
                        }
                    }
                    health.pending_events = queue.len();
                    let _ = health_tx.send(health.clone());
                }
                Some(cmd) = command_rx.recv() => {
                    match cmd {
                        WatcherCommand::Shutdown { done } => {
                            // Stop the OS watch, then take whatever it already delivered.
                            if let Ok(mut guard) = watcher.lock() {
                                guard.take();
                            }
                            while let Ok(event) = event_rx.try_recv() {
                                if let Ok(event) = event {
                                    enqueue_event(&registry, &mut queue, &event);
                                }
                            }
                            run_drain(&registry, &mut queue, &mut health, &health_tx, &update_tx).await;
                            if let Err(err) = registry.flush().await {
                                log::error!("Final registry save failed: {err}");
                            }
                            info!("Watcher stopped");
                            if let Some(done) = done {
                                let _ = done.send(());
                            }
                            break;
                        }
                    }
                }
                () = async {
                    if let Some(deadline) = deadline {
                        time::sleep_until(deadline).await;
                    }
                }, if deadline.is_some() => {
                    run_drain(&registry, &mut queue, &mut health, &health_tx, &update_tx).await;
                    last_event = None;
                }
                else => break,
            }
        }
    });
}

async fn run_drain(
    registry: &Registry,
    queue: &mut UpdateQueue,
    health: &mut WatcherHealth,
    health_tx: &watch::Sender<WatcherHealth>,
    update_tx: &broadcast::Sender<WatchUpdate>,
) {
    if queue.is_empty() {
        return;
    }
    health.draining = true;
    let _ = health_tx.send(health.clone());

    let summary = drain_queue(registry, queue).await;
    let success = summary.errors.is_empty();

    health.draining = false;
    health.pending_events = queue.len();
    health.last_drain_ms = Some(summary.duration_ms);
    health.last_drain_at_ms = Some(unix_now_ms());
    health.mutation_wait_ms_last = summary.lock_wait_ms;
    health.mutation_wait_ms_max = registry.mutation_lock().wait_ms_max();
    if success {
        health.consecutive_failures = 0;
    } else {
        health.consecutive_failures += 1;
        health.last_error = summary.errors.last().cloned();
    }
    let _ = health_tx.send(health.clone());
    let _ = update_tx.send(WatchUpdate {
        completed_at_ms: unix_now_ms(),
        duration_ms: summary.duration_ms,
        processed: summary.updates.len(),
        scanned: summary.scanned,
        deleted: summary.deleted,
        errors: summary.errors,
        success,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use crate::model::FileStatus;
    use notify::event::{CreateKind, DataChange, RemoveKind};
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::tempdir;

    fn event(kind: EventKind, paths: &[&Path]) -> Event {
        let mut event = Event::new(kind);
        for path in paths {
            event = event.add_path(path.to_path_buf());
        }
        event
    }

    #[test]
    fn queue_coalesces_only_consecutive_duplicates() {
        let mut queue = UpdateQueue::new();
        assert!(queue.push(UpdateOp::Change, PathBuf::from("/r/a.md")));
        assert!(!queue.push(UpdateOp::Change, PathBuf::from("/r/a.md")));
        assert!(queue.push(UpdateOp::Change, PathBuf::from("/r/b.md")));
        assert!(queue.push(UpdateOp::Change, PathBuf::from("/r/a.md")));
        let ops: Vec<&Path> = queue.iter().map(|u| u.path.as_path()).collect();
        assert_eq!(
            ops,
            vec![Path::new("/r/a.md"), Path::new("/r/b.md"), Path::new("/r/a.md")]
        );
        assert!(queue.iter().all(|u| u.state == UpdateState::Queued));
    }

    #[test]
    fn rename_events_split_into_delete_and_add() {
        let from = Path::new("/r/old.md");
        let to = Path::new("/r/new.md");
        let both = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &[from, to],
        );
        assert_eq!(
            map_event(&both),
            vec![
                (UpdateOp::Delete, from.to_path_buf()),
                (UpdateOp::Add, to.to_path_buf())
            ]
        );

        let created = event(EventKind::Create(CreateKind::File), &[to]);
        assert_eq!(map_event(&created), vec![(UpdateOp::Add, to.to_path_buf())]);
        let modified = event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &[to],
        );
        assert_eq!(map_event(&modified), vec![(UpdateOp::Change, to.to_path_buf())]);
        let removed = event(EventKind::Remove(RemoveKind::File), &[from]);
        assert_eq!(map_event(&removed), vec![(UpdateOp::Delete, from.to_path_buf())]);
    }

    #[tokio::test]
    async fn deletes_are_queued_regardless_of_extension_but_adds_are_filtered() {
        let temp = tempdir().unwrap();
        let root = temp.path().canonicalize().unwrap();
        let registry = Registry::open(RegistryConfig::for_root(&root))
            .await
            .unwrap();
        let mut queue = UpdateQueue::new();

        let script = root.join("tool.py");
        fs::write(&script, "print()").unwrap();
        enqueue_event(
            &registry,
            &mut queue,
            &event(EventKind::Create(CreateKind::File), &[&script]),
        );
        assert!(queue.is_empty());

        let gone_dir = root.join("rules");
        enqueue_event(
            &registry,
            &mut queue,
            &event(EventKind::Remove(RemoveKind::Folder), &[&gone_dir]),
        );
        let state = root.join(".docreg").join("registry.json");
        enqueue_event(
            &registry,
            &mut queue,
            &event(EventKind::Remove(RemoveKind::File), &[&state]),
        );
        let queued: Vec<(UpdateOp, PathBuf)> =
            queue.iter().map(|u| (u.op, u.path.clone())).collect();
        assert_eq!(queued, vec![(UpdateOp::Delete, gone_dir)]);
    }

    #[tokio::test]
    async fn saving_a_snapshot_inside_the_tree_queues_nothing() {
        let temp = tempdir().unwrap();
        let root = temp.path().canonicalize().unwrap();
        let mut config = RegistryConfig::for_root(&root);
        config.snapshot_path = Some(root.join("registry.json"));
        let registry = Registry::open(config).await.unwrap();
        registry.persist().await.unwrap();

        let snapshot = root.join("registry.json");
        let tmp = root.join("registry.json.tmp");
        let mut queue = UpdateQueue::new();
        for event in [
            event(EventKind::Create(CreateKind::File), &[&tmp]),
            event(
                EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
                &[&tmp, &snapshot],
            ),
            event(EventKind::Modify(ModifyKind::Data(DataChange::Content)), &[&snapshot]),
        ] {
            assert_eq!(enqueue_event(&registry, &mut queue, &event), 0);
        }
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn add_then_change_is_processed_in_order() {
        let temp = tempdir().unwrap();
        let root = temp.path().canonicalize().unwrap();
        let registry = Registry::open(RegistryConfig::for_root(&root))
            .await
            .unwrap();
        let path = root.join("d.mdc");
        let mut queue = UpdateQueue::new();

        fs::write(&path, "# First\n").unwrap();
        enqueue_event(
            &registry,
            &mut queue,
            &event(EventKind::Create(CreateKind::File), &[&path]),
        );
        fs::write(&path, "# Second\n").unwrap();
        enqueue_event(
            &registry,
            &mut queue,
            &event(EventKind::Modify(ModifyKind::Data(DataChange::Content)), &[&path]),
        );

        let summary = drain_queue(&registry, &mut queue).await;
        let ops: Vec<UpdateOp> = summary.updates.iter().map(|u| u.op).collect();
        assert_eq!(ops, vec![UpdateOp::Add, UpdateOp::Change]);
        assert!(summary.updates.iter().all(|u| u.state == UpdateState::Done));
        assert!(queue.is_empty());

        let store = registry.read_store().await;
        assert_eq!(store.get("d.mdc").unwrap().title, "Second");
        assert!(registry.config().snapshot_path().exists());
    }

    #[tokio::test]
    async fn health_reports_time_spent_waiting_for_the_mutation_lock() {
        let temp = tempdir().unwrap();
        let root = temp.path().canonicalize().unwrap();
        let path = root.join("e.md");
        fs::write(&path, "# E\n").unwrap();
        let registry = Registry::open(RegistryConfig::for_root(&root))
            .await
            .unwrap();
        let mut queue = UpdateQueue::new();
        enqueue_event(
            &registry,
            &mut queue,
            &event(EventKind::Create(CreateKind::File), &[&path]),
        );

        let (health_tx, _health_rx) = watch::channel(WatcherHealth::initial());
        let (update_tx, mut update_rx) = broadcast::channel(4);
        let mut health = WatcherHealth::initial();
        let held = registry.lock_mutation().await;
        let release = async move {
            time::sleep(Duration::from_millis(30)).await;
            drop(held);
        };
        tokio::join!(
            run_drain(&registry, &mut queue, &mut health, &health_tx, &update_tx),
            release
        );

        assert!(health.mutation_wait_ms_last >= 20);
        assert!(health.mutation_wait_ms_max >= health.mutation_wait_ms_last);
        assert_eq!(health.pending_events, 0);
        assert!(!health.draining);
        assert_eq!(update_rx.try_recv().unwrap().scanned, 1);
    }

    #[tokio::test]
    async fn delete_event_soft_deletes_directory_contents() {
        let temp = tempdir().unwrap();
        let root = temp.path().canonicalize().unwrap();
        let rules = root.join("rules");
        fs::create_dir_all(&rules).unwrap();
        fs::write(rules.join("a.mdc"), "# A\n").unwrap();
        fs::write(rules.join("b.mdc"), "# B\n").unwrap();
        let registry = Registry::open(RegistryConfig::for_root(&root))
            .await
            .unwrap();
        registry.scan_all().await.unwrap();

        fs::remove_dir_all(&rules).unwrap();
        let mut queue = UpdateQueue::new();
        enqueue_event(
            &registry,
            &mut queue,
            &event(EventKind::Remove(RemoveKind::Folder), &[&rules]),
        );
        let summary = drain_queue(&registry, &mut queue).await;
        assert_eq!(summary.deleted, 2);

        let store = registry.read_store().await;
        assert_eq!(store.len(), 2);
        assert!(store.all().all(|r| r.status == FileStatus::Deleted));
    }
}
