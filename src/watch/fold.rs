//! Folds a batch of raw events into the smallest set of logical operations.

use super::events::{path_key, ItemKind, LogicalOp, RawEvent};
use std::collections::{HashSet, VecDeque};
use std::mem;
use tracing::{debug, trace};

/// Cycles a rename of an in-progress file may wait for its create to finish.
/// Past this the create is taken as finished so the queue keeps moving.
const MAX_DEFERRALS: usize = 8;

/// Coalescing state. Files that are still being written live in `creating`
/// across batches; a rename that arrives before its create is confirmed is
/// parked in `deferred` together with everything queued behind it.
#[derive(Debug, Default)]
pub struct EventFold {
    creating: HashSet<String>,
    result: Vec<LogicalOp>,
    deferred: Vec<RawEvent>,
    deferrals: usize,
}

impl EventFold {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events parked until a later batch confirms a create.
    pub fn deferred(&self) -> &[RawEvent] {
        &self.deferred
    }

    /// Files seen appearing whose writer has not finished.
    pub fn pending_creates(&self) -> usize {
        self.creating.len()
    }

    /// Fold one batch. Deferred events from the previous call run first.
    pub fn fold(&mut self, batch: Vec<RawEvent>) -> Vec<LogicalOp> {
        let mut events: VecDeque<RawEvent> = mem::take(&mut self.deferred).into();
        let resumed = !events.is_empty();
        events.extend(batch);
        self.result.clear();

        while let Some(event) = events.pop_front() {
            match event {
                RawEvent::Creating { path, kind } => {
                    if kind == ItemKind::File {
                        self.creating.insert(path_key(&path));
                    } else {
                        self.push_created(path, kind);
                    }
                }
                RawEvent::Created { path, kind } => {
                    if kind != ItemKind::File || self.creating.remove(&path_key(&path)) {
                        self.push_created(path, kind);
                    } else {
                        trace!(path = %path.display(), "Ignoring close of a file not being created");
                    }
                }
                RawEvent::Modified { path, kind } => self.modified(path, kind),
                RawEvent::Deleted { path, kind } => self.deleted(path, kind),
                RawEvent::Renamed { from, to, kind } => {
                    if kind == ItemKind::File && self.creating.contains(&path_key(&from)) {
                        if !self.confirm_create(&from, &to, &mut events) {
                            debug!(from = %from.display(), to = %to.display(), "Deferring rename of file still being created");
                            self.deferred.push(RawEvent::Renamed { from, to, kind });
                            self.deferred.extend(events.drain(..));
                            break;
                        }
                    }
                    self.renamed(from, to, kind);
                }
            }
        }

        if self.deferred.is_empty() {
            self.deferrals = 0;
        } else if resumed {
            self.deferrals += 1;
        } else {
            self.deferrals = 1;
        }
        mem::take(&mut self.result)
    }

    /// Pull the confirmation of a pending create out of the queue so the
    /// rename that follows it sees a finished file.
    fn confirm_create(
        &mut self,
        from: &std::path::Path,
        to: &std::path::Path,
        events: &mut VecDeque<RawEvent>,
    ) -> bool {
        let from_key = path_key(from);
        let to_key = path_key(to);
        let closed = events.iter().position(|e| {
            matches!(e, RawEvent::Created { path, kind: ItemKind::File }
                if path_key(path) == from_key || path_key(path) == to_key)
        });
        match closed {
            Some(pos) => {
                events.remove(pos);
            }
            None if self.deferrals >= MAX_DEFERRALS => {
                debug!(path = %from.display(), "Create never confirmed, treating as finished");
            }
            None => return false,
        }
        self.creating.remove(&from_key);
        self.push_created(from.to_path_buf(), ItemKind::File);
        true
    }

    fn push_created(&mut self, path: std::path::PathBuf, kind: ItemKind) {
        let key = path_key(&path);
        let seen = self
            .result
            .iter()
            .any(|op| matches!(op, LogicalOp::Created { path, .. } if path_key(path) == key));
        if !seen {
            self.result.push(LogicalOp::Created { path, kind });
        }
    }

    fn modified(&mut self, path: std::path::PathBuf, kind: ItemKind) {
        let key = path_key(&path);
        if self.creating.contains(&key) {
            return;
        }
        let covered = self.result.iter().any(|op| {
            path_key(op.path()) == key || op.rename_target().is_some_and(|to| path_key(to) == key)
        });
        if !covered {
            self.result.push(LogicalOp::Modified { path, kind });
        }
    }

    fn deleted(&mut self, path: std::path::PathBuf, kind: ItemKind) {
        let key = path_key(&path);
        let was_creating = self.creating.remove(&key);

        let mut removed = false;
        let mut renamed_away = Vec::new();
        self.result.retain(|op| match op {
            LogicalOp::Created { path, .. } if path_key(path) == key => {
                removed = true;
                false
            }
            LogicalOp::Renamed { from, to, kind } if path_key(to) == key => {
                removed = true;
                renamed_away.push((from.clone(), *kind));
                false
            }
            LogicalOp::Modified { path, .. } => path_key(path) != key,
            _ => true,
        });
        // The item existed before the batch under its old name.
        for (from, kind) in renamed_away {
            self.result.push(LogicalOp::Deleted { path: from, kind });
        }

        if !was_creating && !removed {
            self.result.push(LogicalOp::Deleted { path, kind });
        }
    }

    fn renamed(&mut self, from: std::path::PathBuf, to: std::path::PathBuf, kind: ItemKind) {
        let key = path_key(&from);
        for op in self.result.iter_mut() {
            match op {
                LogicalOp::Created { path, .. } if path_key(path) == key => {
                    *path = to;
                    return;
                }
                LogicalOp::Renamed { to: target, .. } if path_key(target) == key => {
                    *target = to;
                    return;
                }
                _ => {}
            }
        }
        self.result.push(LogicalOp::Renamed { from, to, kind });
    }
}
