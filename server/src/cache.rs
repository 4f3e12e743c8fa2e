//! Per-file blame cache.
//!
//! Every path gets at most one [`BlamedFile`]. Entries move through
//! `Resolving -> Computing -> Ready`, or end early as `NotTrackable` or
//! `Disposed`. Waiters subscribe to the entry's state and wake once it
//! settles, so removal always releases them.

use crate::git::{BlamedFile, GitCommand};
use crate::queue::BlameQueue;
use crate::watcher::{WatchCallback, WatchHandle, WatchService};
use blame_model::{Blame, LineAttachedCommit};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;

/// Lifecycle of one cached file.
#[derive(Clone)]
enum FileState {
    Resolving,
    NotTrackable,
    Computing {
        file: Arc<BlamedFile>,
        git_root: PathBuf,
    },
    Ready {
        git_root: PathBuf,
        blame: Option<Arc<Blame>>,
    },
    Disposed,
}

impl FileState {
    fn is_settled(&self) -> bool {
        matches!(
            self,
            FileState::NotTrackable | FileState::Ready { .. } | FileState::Disposed
        )
    }

    fn git_root(&self) -> Option<&Path> {
        match self {
            FileState::Computing { git_root, .. } | FileState::Ready { git_root, .. } => {
                Some(git_root)
            }
            _ => None,
        }
    }
}

enum WatchSlot {
    Empty,
    Active(WatchHandle),
    Closed,
}

struct CacheEntry {
    generation: u64,
    state: watch::Sender<FileState>,
    watch: Mutex<WatchSlot>,
}

impl CacheEntry {
    fn new(generation: u64) -> Self {
        let (state, _) = watch::channel(FileState::Resolving);
        Self {
            generation,
            state,
            watch: Mutex::new(WatchSlot::Empty),
        }
    }

    fn git_root_is(&self, root: &Path) -> bool {
        self.state.borrow().git_root() == Some(root)
    }

    /// Wait until the entry settles and return its blame.
    async fn blame(&self) -> Option<Arc<Blame>> {
        let mut rx = self.state.subscribe();
        let state = rx.wait_for(FileState::is_settled).await.ok()?;
        match &*state {
            FileState::Ready { blame, .. } => blame.clone(),
            _ => None,
        }
    }

    /// Close the watch, kill a running blame and wake all waiters.
    fn close(&self) {
        let (slot, previous) = {
            let mut watch = self.watch.lock();
            let slot = std::mem::replace(&mut *watch, WatchSlot::Closed);
            (slot, self.state.send_replace(FileState::Disposed))
        };

        if let FileState::Computing { file, .. } = previous {
            file.dispose();
        }
        if let WatchSlot::Active(mut handle) = slot {
            handle.close();
        }
    }
}

/// Watches on a repository's `HEAD` and `config`.
struct RepositoryWatch {
    _handles: Vec<WatchHandle>,
}

struct BlamerInner {
    files: DashMap<PathBuf, Arc<CacheEntry>>,
    repositories: DashMap<PathBuf, RepositoryWatch>,
    queue: BlameQueue,
    git: Arc<GitCommand>,
    watcher: Arc<dyn WatchService>,
    next_generation: AtomicU64,
}

/// Cache of blames keyed by file path.
#[derive(Clone)]
pub struct Blamer {
    inner: Arc<BlamerInner>,
}

impl Blamer {
    pub fn new(git: Arc<GitCommand>, watcher: Arc<dyn WatchService>, max_parallel: i64) -> Self {
        Self {
            inner: Arc::new(BlamerInner {
                files: DashMap::new(),
                repositories: DashMap::new(),
                queue: BlameQueue::new(max_parallel),
                git,
                watcher,
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn queue(&self) -> &BlameQueue {
        &self.inner.queue
    }

    pub fn git(&self) -> &Arc<GitCommand> {
        &self.inner.git
    }

    /// Number of cached files.
    pub fn len(&self) -> usize {
        self.inner.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.files.is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.inner.files.contains_key(path)
    }

    /// Start blaming `path` unless it is already cached.
    pub fn prepare_file(&self, path: &Path) {
        self.inner.prepare(path);
    }

    /// Blame of `path` once it is computed.
    pub async fn file(&self, path: &Path) -> Option<Arc<Blame>> {
        self.inner.prepare(path).blame().await
    }

    /// Attribution of a line. `line` is 0-based.
    pub async fn get_line(&self, path: &Path, line: u32) -> Option<LineAttachedCommit> {
        let result_line = line.checked_add(1)?;
        let blame = self.file(path).await?;
        blame.get(result_line).cloned()
    }

    /// Forget `path`, killing its blame and closing its watch.
    pub fn remove(&self, path: &Path) {
        self.inner.remove(path);
    }

    /// Forget every file whose repository is `git_root`.
    pub fn remove_from_repository(&self, git_root: &Path) {
        self.inner.remove_from_repository(git_root);
    }

    /// Forget everything and close all watches.
    pub fn dispose(&self) {
        let paths: Vec<PathBuf> = self
            .inner
            .files
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for path in paths {
            self.inner.remove(&path);
        }
        self.inner.repositories.clear();
        tracing::debug!("Blame cache disposed");
    }
}

impl BlamerInner {
    fn prepare(self: &Arc<Self>, path: &Path) -> Arc<CacheEntry> {
        let mut created = None;
        let entry = self
            .files
            .entry(path.to_path_buf())
            .or_insert_with(|| {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                let entry = Arc::new(CacheEntry::new(generation));
                created = Some(Arc::clone(&entry));
                entry
            })
            .value()
            .clone();

        if let Some(entry) = created {
            tokio::spawn(track(Arc::clone(self), path.to_path_buf(), entry));
        }
        entry
    }

    fn remove(&self, path: &Path) {
        if let Some((_, entry)) = self.files.remove(path) {
            tracing::debug!("Removing {} from blame cache", path.display());
            entry.close();
        }
    }

    /// Remove `path` only if it still holds the entry of `generation`.
    fn remove_generation(&self, path: &Path, generation: u64) {
        if let Some((_, entry)) = self
            .files
            .remove_if(path, |_, entry| entry.generation == generation)
        {
            tracing::debug!("{} changed, dropping cached blame", path.display());
            entry.close();
        }
    }

    fn remove_from_repository(&self, git_root: &Path) {
        let paths: Vec<PathBuf> = self
            .files
            .iter()
            .filter(|entry| entry.value().git_root_is(git_root))
            .map(|entry| entry.key().clone())
            .collect();

        for path in paths {
            if let Some((_, entry)) = self
                .files
                .remove_if(&path, |_, entry| entry.git_root_is(git_root))
            {
                entry.close();
            }
        }
    }

    /// Whether the file exists and lives in a repository.
    async fn resolve(&self, path: &Path) -> Option<PathBuf> {
        if let Err(e) = tokio::fs::metadata(path).await {
            tracing::debug!("Cannot access {}: {}", path.display(), e);
            return None;
        }
        self.git.repository_root(path).await.ok()
    }

    fn file_watch(self: &Arc<Self>, path: &Path, generation: u64) -> Option<WatchHandle> {
        let inner = Arc::downgrade(self);
        let watched = path.to_path_buf();
        let on_change: WatchCallback = Arc::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.remove_generation(&watched, generation);
            }
        });

        match self.watcher.watch(path, on_change) {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!("Could not watch {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Watch `HEAD` and `config` of a repository the first time it is seen.
    fn watch_repository(self: &Arc<Self>, git_root: &Path) {
        let Entry::Vacant(vacant) = self.repositories.entry(git_root.to_path_buf()) else {
            return;
        };

        let mut handles = Vec::with_capacity(2);

        let inner: Weak<Self> = Arc::downgrade(self);
        let root = git_root.to_path_buf();
        let on_head: WatchCallback = Arc::new(move || {
            if let Some(inner) = inner.upgrade() {
                tracing::debug!("HEAD of {} changed", root.display());
                inner.remove_from_repository(&root);
            }
        });

        let inner: Weak<Self> = Arc::downgrade(self);
        let on_config: WatchCallback = Arc::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.git.clear();
            }
        });

        for (name, callback) in [("HEAD", on_head), ("config", on_config)] {
            let path = git_root.join(name);
            match self.watcher.watch(&path, callback) {
                Ok(handle) => handles.push(handle),
                Err(e) => tracing::warn!("Could not watch {}: {}", path.display(), e),
            }
        }

        vacant.insert(RepositoryWatch { _handles: handles });
    }
}

/// Drive one entry from resolving to ready.
async fn track(inner: Arc<BlamerInner>, path: PathBuf, entry: Arc<CacheEntry>) {
    let Some(git_root) = inner.resolve(&path).await else {
        tracing::info!(
            "Will not blame '{}'. Outside the current workspace.",
            path.display()
        );
        entry.state.send_if_modified(|state| {
            if matches!(state, FileState::Resolving) {
                *state = FileState::NotTrackable;
                true
            } else {
                false
            }
        });
        return;
    };

    let file = Arc::new(BlamedFile::new(&path, Arc::clone(&inner.git)));
    {
        // Closing waits on the slot, so dispose sees the repository watch.
        let mut slot = entry.watch.lock();
        if matches!(*slot, WatchSlot::Closed) {
            return;
        }
        inner.watch_repository(&git_root);
        if let Some(handle) = inner.file_watch(&path, entry.generation) {
            *slot = WatchSlot::Active(handle);
        }
        entry.state.send_replace(FileState::Computing {
            file: Arc::clone(&file),
            git_root: git_root.clone(),
        });
    }

    let blame = inner
        .queue
        .add({
            let file = Arc::clone(&file);
            async move { file.get_blame().await }
        })
        .await
        .flatten();

    entry.state.send_if_modified(|state| {
        if matches!(state, FileState::Computing { .. }) {
            *state = FileState::Ready { git_root, blame };
            true
        } else {
            false
        }
    });
}
