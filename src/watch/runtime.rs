//! Watch runtime
//!
//! One notify watcher per replica root. Every callback becomes one batch on
//! the shared [`EventScheduler`], which folds and hands the result to the
//! live executor.

use super::events::{ItemKind, RawEvent};
use super::live::LiveSyncExecutor;
use super::scheduler::{EventScheduler, OpSink};
use crate::config::{SyncConfig, WatchConfig};
use crate::error::SyncError;
use crate::ops::FileOps;
use crate::progress::ProgressSink;
use crate::snapshot::{SnapshotStore, Walker};
use notify::event::{AccessKind, AccessMode, CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Maps notify events below one root to raw sync events.
#[derive(Debug, Clone)]
pub struct EventConverter {
    root: PathBuf,
    walker: Walker,
    confirm_creates_on_close: bool,
    ignore_metadata: bool,
}

impl EventConverter {
    pub fn new(root: impl Into<PathBuf>, sync: &SyncConfig, watch: &WatchConfig) -> Self {
        Self {
            root: root.into(),
            walker: Walker::new(sync.skip_names()),
            confirm_creates_on_close: watch.confirm_creates_on_close,
            ignore_metadata: watch.ignore_metadata,
        }
    }

    fn skipped(&self, path: &Path) -> bool {
        self.walker.is_skipped_path(&self.root, path)
    }

    fn kind_of(path: &Path) -> ItemKind {
        match std::fs::symlink_metadata(path) {
            Ok(meta) if meta.is_dir() => ItemKind::Folder,
            Ok(_) => ItemKind::File,
            Err(_) => ItemKind::Unknown,
        }
    }

    /// An item appearing at `path`. Files wait for close-after-write when
    /// the platform reports it.
    fn appeared(&self, path: &Path, kind: ItemKind) -> Vec<RawEvent> {
        let path = path.to_path_buf();
        match kind {
            ItemKind::File if self.confirm_creates_on_close => {
                vec![RawEvent::Creating { path, kind }]
            }
            ItemKind::File => vec![
                RawEvent::Creating {
                    path: path.clone(),
                    kind,
                },
                RawEvent::Created { path, kind },
            ],
            _ => vec![RawEvent::Created { path, kind }],
        }
    }

    /// An item that arrives complete, e.g. moved in from a skipped name.
    fn arrived(&self, path: &Path) -> Vec<RawEvent> {
        let kind = Self::kind_of(path);
        let path = path.to_path_buf();
        match kind {
            ItemKind::File => vec![
                RawEvent::Creating {
                    path: path.clone(),
                    kind,
                },
                RawEvent::Created { path, kind },
            ],
            _ => vec![RawEvent::Created { path, kind }],
        }
    }

    pub fn convert(&self, event: &Event) -> Vec<RawEvent> {
        let Some(path) = event.paths.first() else {
            return Vec::new();
        };

        if let EventKind::Modify(ModifyKind::Name(RenameMode::Both)) = event.kind {
            let Some(to) = event.paths.get(1) else {
                return Vec::new();
            };
            return match (self.skipped(path), self.skipped(to)) {
                (true, true) => Vec::new(),
                // a finished copy moved into place
                (true, false) => self.arrived(to),
                (false, true) => vec![RawEvent::Deleted {
                    path: path.clone(),
                    kind: ItemKind::Unknown,
                }],
                (false, false) => vec![RawEvent::Renamed {
                    from: path.clone(),
                    to: to.clone(),
                    kind: Self::kind_of(to),
                }],
            };
        }

        if self.skipped(path) {
            return Vec::new();
        }

        match event.kind {
            EventKind::Create(CreateKind::File) => self.appeared(path, ItemKind::File),
            EventKind::Create(CreateKind::Folder) => self.appeared(path, ItemKind::Folder),
            EventKind::Create(_) => self.appeared(path, Self::kind_of(path)),
            EventKind::Access(AccessKind::Close(AccessMode::Write)) => vec![RawEvent::Created {
                path: path.clone(),
                kind: ItemKind::File,
            }],
            // inotify also reports the pair as `Both`; single halves are only
            // kept where no pairing exists
            EventKind::Modify(ModifyKind::Name(RenameMode::From | RenameMode::To)) => Vec::new(),
            EventKind::Modify(ModifyKind::Name(_)) => {
                if path.exists() {
                    self.arrived(path)
                } else {
                    vec![RawEvent::Deleted {
                        path: path.clone(),
                        kind: ItemKind::Unknown,
                    }]
                }
            }
            EventKind::Modify(ModifyKind::Metadata(_)) if self.ignore_metadata => Vec::new(),
            EventKind::Modify(_) => {
                let kind = Self::kind_of(path);
                if kind == ItemKind::Folder {
                    return Vec::new();
                }
                vec![RawEvent::Modified {
                    path: path.clone(),
                    kind,
                }]
            }
            EventKind::Remove(RemoveKind::File) => vec![RawEvent::Deleted {
                path: path.clone(),
                kind: ItemKind::File,
            }],
            EventKind::Remove(RemoveKind::Folder) => vec![RawEvent::Deleted {
                path: path.clone(),
                kind: ItemKind::Folder,
            }],
            EventKind::Remove(_) => vec![RawEvent::Deleted {
                path: path.clone(),
                kind: ItemKind::Unknown,
            }],
            _ => Vec::new(),
        }
    }
}

/// Watches one replica root and feeds the scheduler.
pub struct ReplicaWatcher {
    root: PathBuf,
    _watcher: RecommendedWatcher,
}

impl ReplicaWatcher {
    pub fn start(converter: EventConverter, scheduler: Arc<EventScheduler>) -> Result<Self, SyncError> {
        let root = converter.root.clone();
        let label = root.display().to_string();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let batch = converter.convert(&event);
                if batch.is_empty() {
                    return;
                }
                if let Err(e) = scheduler.enqueue(batch) {
                    debug!(replica = %label, error = %e, "Dropping events after shutdown");
                }
            }
            Err(e) => error!(replica = %label, error = %e, "Watch error"),
        })
        .map_err(|e| SyncError::Watch(format!("Failed to create watcher: {}", e)))?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| SyncError::Watch(format!("Failed to watch {}: {}", root.display(), e)))?;
        info!(replica = %root.display(), "Watching replica");

        Ok(Self {
            root,
            _watcher: watcher,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Live synchronisation of one group: watchers on every replica, one
/// coalescer and the live executor behind it.
pub struct LiveSync {
    scheduler: Arc<EventScheduler>,
    watchers: Vec<ReplicaWatcher>,
}

impl LiveSync {
    pub fn start(
        group: &str,
        roots: Vec<PathBuf>,
        sync: SyncConfig,
        watch: &WatchConfig,
        ops: Arc<dyn FileOps>,
        store: Arc<dyn SnapshotStore>,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<Self, SyncError> {
        let executor = LiveSyncExecutor::new(group, roots.clone(), sync.clone(), ops, store, progress);
        Self::with_sink(&roots, &sync, watch, executor)
    }

    /// Start watchers that feed an arbitrary sink.
    pub fn with_sink(
        roots: &[PathBuf],
        sync: &SyncConfig,
        watch: &WatchConfig,
        sink: impl OpSink + 'static,
    ) -> Result<Self, SyncError> {
        let scheduler = Arc::new(EventScheduler::new(sink));
        let mut watchers = Vec::with_capacity(roots.len());
        for root in roots {
            let converter = EventConverter::new(root.clone(), sync, watch);
            match ReplicaWatcher::start(converter, Arc::clone(&scheduler)) {
                Ok(watcher) => watchers.push(watcher),
                Err(e) => {
                    scheduler.terminate();
                    return Err(e);
                }
            }
        }
        Ok(Self {
            scheduler,
            watchers,
        })
    }

    pub fn roots(&self) -> Vec<&Path> {
        self.watchers.iter().map(|w| w.root()).collect()
    }

    pub fn scheduler(&self) -> &EventScheduler {
        &self.scheduler
    }

    /// Drop the watchers, then stop the coalescer without draining it.
    pub fn stop(self) {
        let LiveSync { scheduler, watchers } = self;
        drop(watchers);
        scheduler.terminate();
        info!(batches = scheduler.processed(), "Live sync stopped");
    }
}
