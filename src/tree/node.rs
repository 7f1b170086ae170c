//! Sync tree node types

use crate::snapshot::RelPath;
use crate::types::{ContentHash, ReplicaId};
use chrono::{DateTime, Utc};
use serde::Serialize;

pub type NodeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NodeKind {
    Root,
    Folder,
    File,
}

/// Change observed at one replica for one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChangeType {
    New,
    Update,
    Delete,
    Rename,
    NoChange,
}

/// What the executor did to one replica for one node. Written once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FinalState {
    Unchanged,
    Created,
    Updated,
    Deleted,
    Renamed,
    CreatedRenamed,
    Error,
}

/// Per-replica state of one node.
#[derive(Debug, Clone, Serialize)]
pub struct ReplicaSlot {
    pub exists: bool,
    pub meta_exists: bool,
    pub hash: Option<ContentHash>,
    pub meta_hash: Option<ContentHash>,
    pub length: u64,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub change: ChangeType,
    pub priority: u32,
    /// Spelling of the path at this replica, when the item is or was there.
    pub local: Option<RelPath>,
    final_state: Option<FinalState>,
}

impl Default for ReplicaSlot {
    fn default() -> Self {
        Self {
            exists: false,
            meta_exists: false,
            hash: None,
            meta_hash: None,
            length: 0,
            created: None,
            modified: None,
            change: ChangeType::NoChange,
            priority: 0,
            local: None,
            final_state: None,
        }
    }
}

impl ReplicaSlot {
    /// Final state, `Unchanged` until the executor settles the slot.
    pub fn final_state(&self) -> FinalState {
        self.final_state.unwrap_or(FinalState::Unchanged)
    }

    pub fn is_settled(&self) -> bool {
        self.final_state.is_some()
    }

    pub fn settle(&mut self, state: FinalState) {
        debug_assert!(
            self.final_state.is_none(),
            "replica slot settled twice: {:?} then {:?}",
            self.final_state,
            state
        );
        self.final_state = Some(state);
    }

    /// True when the live content still matches the stored snapshot.
    pub fn matches_metadata(&self) -> bool {
        self.meta_exists && self.hash.is_some() && self.hash == self.meta_hash
    }

    /// Copy content facts from `source` after a successful transfer.
    pub fn stamp_from(&mut self, source: &ReplicaSlot) {
        self.exists = true;
        self.hash = source.hash;
        self.length = source.length;
        self.created = source.created;
        self.modified = source.modified;
    }
}

/// One logical file or folder across all replicas.
#[derive(Debug, Clone, Serialize)]
pub struct SyncNode {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub name: String,
    pub path: RelPath,
    pub kind: NodeKind,
    /// Exactly one slot per replica, indexed by `ReplicaId`.
    pub slots: Vec<ReplicaSlot>,
    pub source_position: ReplicaId,
    pub invalid: bool,
    pub renamed_to: Option<RelPath>,
}

impl SyncNode {
    pub fn new(id: NodeId, parent: Option<NodeId>, path: RelPath, kind: NodeKind, replicas: usize) -> Self {
        Self {
            id,
            parent,
            children: Vec::new(),
            name: path.name().to_string(),
            path,
            kind,
            slots: vec![ReplicaSlot::default(); replicas],
            source_position: 0,
            invalid: false,
            renamed_to: None,
        }
    }

    pub fn slot(&self, replica: ReplicaId) -> &ReplicaSlot {
        &self.slots[replica]
    }

    pub fn slot_mut(&mut self, replica: ReplicaId) -> &mut ReplicaSlot {
        &mut self.slots[replica]
    }

    pub fn source(&self) -> &ReplicaSlot {
        &self.slots[self.source_position]
    }

    pub fn display_name(&self) -> &str {
        if self.kind == NodeKind::Root {
            "/"
        } else {
            &self.name
        }
    }

    /// A node with pending work: its source has non-zero priority.
    pub fn is_pending(&self) -> bool {
        self.source().priority > 0
    }

    /// Pick the replica with the highest priority; ties go to the most recently
    /// modified copy, then to the lowest index.
    pub fn elect_source(&mut self) {
        let best = self
            .slots
            .iter()
            .enumerate()
            .max_by(|(ia, a), (ib, b)| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| a.modified.cmp(&b.modified))
                    .then_with(|| ib.cmp(ia))
            })
            .map(|(idx, _)| idx)
            .unwrap_or(0);
        self.source_position = best;
    }

    pub fn is_co_owned(&self, replica: ReplicaId) -> bool {
        replica != self.source_position && self.slots[replica].priority == self.source().priority
    }
}
