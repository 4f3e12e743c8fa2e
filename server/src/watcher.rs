//! File system watches for cache invalidation.

use dashmap::DashMap;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::sync::mpsc;

/// Invoked every time a watched path changes.
pub type WatchCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Watch error: {0}")]
    Notify(#[from] notify::Error),
}

/// Something that can watch single paths for changes.
pub trait WatchService: Send + Sync {
    fn watch(&self, path: &Path, on_change: WatchCallback) -> Result<WatchHandle, WatchError>;
}

/// An active watch. Closing it, or dropping it, stops notifications.
pub struct WatchHandle {
    close: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl WatchHandle {
    pub fn new(close: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            close: Some(Box::new(close)),
        }
    }

    pub fn close(&mut self) {
        if let Some(close) = self.close.take() {
            close();
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("open", &self.close.is_some())
            .finish()
    }
}

/// Watch service backed by the platform watcher from `notify`.
///
/// Events are forwarded to a tokio task, so callbacks never run on the
/// watcher thread and may close watches themselves.
pub struct NotifyWatchService {
    inner: Arc<NotifyInner>,
}

struct NotifyInner {
    watcher: Mutex<RecommendedWatcher>,
    subscribers: DashMap<PathBuf, Vec<(u64, WatchCallback)>>,
    next_id: AtomicU64,
}

impl NotifyWatchService {
    /// Create the service. Must be called inside a tokio runtime.
    pub fn new() -> Result<Self, WatchError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();

        let watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    let _ = tx.send(event);
                }
                Err(e) => tracing::warn!("File watcher error: {}", e),
            },
            Config::default(),
        )?;

        let inner = Arc::new(NotifyInner {
            watcher: Mutex::new(watcher),
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(0),
        });

        let weak = Arc::downgrade(&inner);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.dispatch(&event);
            }
        });

        Ok(Self { inner })
    }

    /// Number of callbacks registered for `path`.
    pub fn subscriber_count(&self, path: &Path) -> usize {
        self.inner
            .subscribers
            .get(path)
            .map(|subscribers| subscribers.len())
            .unwrap_or(0)
    }
}

impl WatchService for NotifyWatchService {
    fn watch(&self, path: &Path, on_change: WatchCallback) -> Result<WatchHandle, WatchError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let path = path.to_path_buf();

        {
            let mut subscribers = self.inner.subscribers.entry(path.clone()).or_default();
            if subscribers.is_empty() {
                if let Err(e) = self
                    .inner
                    .watcher
                    .lock()
                    .watch(&path, RecursiveMode::NonRecursive)
                {
                    drop(subscribers);
                    self.inner.subscribers.remove_if(&path, |_, s| s.is_empty());
                    return Err(e.into());
                }
                tracing::debug!("Watching {}", path.display());
            }
            subscribers.push((id, on_change));
        }

        let inner: Weak<NotifyInner> = Arc::downgrade(&self.inner);
        Ok(WatchHandle::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.unsubscribe(&path, id);
            }
        }))
    }
}

impl NotifyInner {
    fn dispatch(&self, event: &Event) {
        if matches!(event.kind, EventKind::Access(_)) {
            return;
        }

        for path in &event.paths {
            let callbacks: Vec<WatchCallback> = match self.subscribers.get(path) {
                Some(subscribers) => subscribers.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
                None => continue,
            };

            tracing::debug!("{} changed", path.display());
            for callback in callbacks {
                callback();
            }
        }
    }

    fn unsubscribe(&self, path: &Path, id: u64) {
        let emptied = match self.subscribers.get_mut(path) {
            Some(mut subscribers) => {
                subscribers.retain(|(sid, _)| *sid != id);
                subscribers.is_empty()
            }
            None => false,
        };

        if emptied && self.subscribers.remove_if(path, |_, s| s.is_empty()).is_some() {
            if let Err(e) = self.watcher.lock().unwatch(path) {
                tracing::debug!("Failed to unwatch {}: {}", path.display(), e);
            }
            tracing::debug!("Closed watch on {}", path.display());
        }
    }
}
