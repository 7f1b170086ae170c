//! Builds the sync tree from a diff outcome.
//!
//! Files take their decision straight from the decision table. Folder decisions
//! are derived here since the diff engine only reasons about files: a folder is
//! created where a decision needs it or where it is missing next to a live copy,
//! and deleted where a replica dropped it and nothing underneath survives.

use super::node::{ChangeType, NodeId, NodeKind, SyncNode};
use super::SyncTree;
use crate::diff::{ChangeClassification, DecisionEntry, DecisionKind, DiffOutcome, ReplicaState};
use crate::snapshot::{RelKey, RelPath};
use crate::types::ReplicaId;
use std::collections::BTreeMap;
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct TreeBuilder;

impl TreeBuilder {
    pub fn new() -> Self {
        TreeBuilder
    }

    pub fn build(&self, outcome: &DiffOutcome) -> SyncTree {
        let replicas = &outcome.replicas;
        let mut tree = SyncTree::new(replicas.len());

        let (folders, files) = collect_paths(outcome);
        let mut folder_ids: BTreeMap<RelKey, NodeId> = BTreeMap::new();

        // key order puts every folder before anything it contains
        let mut ordered: Vec<(RelKey, RelPath, NodeKind)> = folders
            .iter()
            .map(|(k, p)| (k.clone(), p.clone(), NodeKind::Folder))
            .chain(files.iter().map(|(k, p)| (k.clone(), p.clone(), NodeKind::File)))
            .collect();
        ordered.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| folder_first(a.2, b.2)));

        for (key, path, kind) in ordered {
            let parent = path
                .parent()
                .and_then(|p| folder_ids.get(&p.key()).copied())
                .unwrap_or(tree.root());
            let id = tree.add(parent, path, kind);
            match kind {
                NodeKind::Folder => {
                    folder_ids.insert(key, id);
                }
                NodeKind::File => {
                    if folders.contains_key(&key) {
                        warn!(path = %tree.node(id).path, "Path is a file in one replica and a folder in another");
                        tree.node_mut(id).invalid = true;
                    }
                }
                NodeKind::Root => {}
            }
        }

        let ids: Vec<NodeId> = tree.pre_order();
        for &id in &ids {
            if tree.node(id).kind == NodeKind::File {
                fill_file(tree.node_mut(id), outcome);
            }
        }

        for &id in &ids {
            if tree.node(id).kind == NodeKind::Folder {
                fill_folder(&mut tree, id, replicas);
            }
        }

        debug!(nodes = tree.len(), "Built sync tree");
        tree
    }
}

fn folder_first(a: NodeKind, b: NodeKind) -> std::cmp::Ordering {
    let rank = |k: NodeKind| match k {
        NodeKind::Root => 0,
        NodeKind::Folder => 1,
        NodeKind::File => 2,
    };
    rank(a).cmp(&rank(b))
}

type PathSet = BTreeMap<RelKey, RelPath>;

fn add_file(files: &mut PathSet, folders: &mut PathSet, path: &RelPath) {
    files.entry(path.key()).or_insert_with(|| path.clone());
    for ancestor in path.ancestors() {
        folders.entry(ancestor.key()).or_insert(ancestor);
    }
}

/// Every folder and file path known to any replica, live or stored.
fn collect_paths(outcome: &DiffOutcome) -> (PathSet, PathSet) {
    let mut folders = PathSet::new();
    let mut files = PathSet::new();

    for replica in &outcome.replicas {
        for record in &replica.walk.files {
            add_file(&mut files, &mut folders, &record.relative);
        }
        for folder in &replica.walk.folders {
            folders.entry(folder.key()).or_insert_with(|| folder.clone());
        }
        if let Some(snapshot) = &replica.snapshot {
            for entry in &snapshot.files {
                add_file(&mut files, &mut folders, &entry.name);
            }
            for folder in &snapshot.folders {
                folders.entry(folder.key()).or_insert_with(|| folder.clone());
            }
        }
        if let Some(rec) = &replica.reconciliation {
            for deleted in rec.deletions() {
                add_file(&mut files, &mut folders, &deleted.path);
            }
        }
    }
    (folders, files)
}

fn classify(replica: &ReplicaState, key: &RelKey, exists: bool, meta_exists: bool) -> ChangeType {
    match replica.class(key) {
        Some(ChangeClassification::New) | Some(ChangeClassification::Renamed { .. }) => ChangeType::New,
        Some(ChangeClassification::Updated) => ChangeType::Update,
        Some(ChangeClassification::Deleted) => ChangeType::Delete,
        Some(ChangeClassification::NoChange) => ChangeType::NoChange,
        None if exists && !meta_exists => ChangeType::New,
        None => ChangeType::NoChange,
    }
}

fn fill_file(node: &mut SyncNode, outcome: &DiffOutcome) {
    let key = node.path.key();
    for replica in &outcome.replicas {
        let live = replica.walk.file(&node.path);
        let stored = replica
            .snapshot
            .as_ref()
            .and_then(|s| s.files.iter().find(|e| e.name.key() == key));

        let slot = node.slot_mut(replica.id);
        slot.local = live
            .map(|record| record.relative.clone())
            .or_else(|| stored.map(|entry| entry.name.clone()));
        if let Some(record) = live {
            slot.exists = true;
            slot.hash = Some(record.hash);
            slot.length = record.length;
            slot.created = record.created;
            slot.modified = Some(record.modified);
        }
        if let Some(entry) = stored {
            slot.meta_exists = true;
            slot.meta_hash = Some(entry.hash);
        }
        slot.change = classify(replica, &key, slot.exists, slot.meta_exists);
    }

    match outcome.table.get_key(&key) {
        Some(entry) => apply_decision(node, entry),
        None => node.elect_source(),
    }
}

/// Source and co-owners get priority 1, replicas with work to do get 0.
fn apply_decision(node: &mut SyncNode, entry: &DecisionEntry) {
    for (replica, slot) in node.slots.iter_mut().enumerate() {
        slot.priority = if entry.targets.contains_key(&replica) { 0 } else { 1 };
    }
    node.source_position = entry.source_replica;
    let source = node.slot_mut(entry.source_replica);
    match entry.kind() {
        Some(DecisionKind::Delete) => source.change = ChangeType::Delete,
        Some(DecisionKind::Rename) => {
            source.change = ChangeType::Rename;
            node.renamed_to = entry.renamed_to.clone();
        }
        _ => {
            if !matches!(source.change, ChangeType::New | ChangeType::Update) {
                source.change = ChangeType::NoChange;
            }
        }
    }
}

/// A folder missing next to a live copy is created there, which also covers
/// every folder a file decision places something into.
fn fill_folder(tree: &mut SyncTree, id: NodeId, replicas: &[ReplicaState]) {
    let path = tree.node(id).path.clone();

    for replica in replicas {
        let live = replica.walk.folder(&path);
        let stored = replica
            .snapshot
            .as_ref()
            .and_then(|s| s.folders.iter().find(|f| *f == &path));
        let (exists, meta_exists) = (live.is_some(), stored.is_some());
        let slot = tree.node_mut(id).slot_mut(replica.id);
        slot.exists = exists;
        slot.meta_exists = meta_exists;
        slot.local = live.or(stored).cloned();
        slot.change = match (exists, meta_exists) {
            (true, false) => ChangeType::New,
            (false, true) => ChangeType::Delete,
            _ => ChangeType::NoChange,
        };
    }

    let deleted_at = replicas.iter().find(|r| {
        let slot = tree.node(id).slot(r.id);
        r.has_metadata() && slot.meta_exists && !slot.exists
    });

    if let Some(deleter) = deleted_at {
        if !survives(tree, id, replicas) {
            let node = tree.node_mut(id);
            for (replica, slot) in node.slots.iter_mut().enumerate() {
                slot.priority = if slot.exists && replica != deleter.id { 0 } else { 1 };
            }
            node.source_position = deleter.id;
            node.slot_mut(deleter.id).change = ChangeType::Delete;
            debug!(path = %path, replica = deleter.id, "Folder deletion propagates");
            return;
        }
    }

    let node = tree.node_mut(id);
    let holder = node.slots.iter().position(|s| s.exists);
    let missing: Vec<ReplicaId> = (0..node.slots.len())
        .filter(|&r| !node.slots[r].exists)
        .collect();

    match holder {
        Some(holder) if !missing.is_empty() => {
            for (replica, slot) in node.slots.iter_mut().enumerate() {
                slot.priority = if missing.contains(&replica) { 0 } else { 1 };
            }
            node.source_position = holder;
            let source = node.slot_mut(holder);
            if source.change != ChangeType::New {
                source.change = ChangeType::NoChange;
            }
        }
        _ => node.elect_source(),
    }
}

/// Whether anything under folder `id` is still wanted somewhere.
fn survives(tree: &SyncTree, id: NodeId, replicas: &[ReplicaState]) -> bool {
    let own = tree.node(id);
    let fresh_here = own
        .slots
        .iter()
        .zip(replicas)
        .any(|(slot, r)| slot.exists && (!r.has_metadata() || !slot.meta_exists));
    if fresh_here {
        return true;
    }

    tree.descendants(id).into_iter().any(|child| {
        let node = tree.node(child);
        match node.kind {
            NodeKind::Folder => node
                .slots
                .iter()
                .zip(replicas)
                .any(|(slot, r)| slot.exists && (!r.has_metadata() || !slot.meta_exists)),
            NodeKind::File => {
                let source_change = node.source().change;
                let leaving = node.is_pending()
                    && matches!(source_change, ChangeType::Delete | ChangeType::Rename);
                !leaving && node.slots.iter().any(|s| s.exists)
            }
            NodeKind::Root => false,
        }
    })
}
