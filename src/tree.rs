//! Sync tree
//!
//! Arena of [`SyncNode`]s, one per logical file or folder, each carrying one
//! [`ReplicaSlot`] per replica. Built from a diff outcome by [`TreeBuilder`] and
//! consumed by the executor in pre-order.

mod builder;
mod node;

pub use builder::TreeBuilder;
pub use node::{ChangeType, FinalState, NodeId, NodeKind, ReplicaSlot, SyncNode};

use crate::snapshot::{RelKey, RelPath};
use crate::types::ReplicaId;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct SyncTree {
    nodes: Vec<SyncNode>,
    index: HashMap<(RelKey, NodeKind), NodeId>,
    replicas: usize,
}

impl SyncTree {
    /// Empty tree holding just the root.
    pub fn new(replicas: usize) -> Self {
        let mut root = SyncNode::new(0, None, RelPath::new(""), NodeKind::Root, replicas);
        for slot in root.slots.iter_mut() {
            slot.exists = true;
            slot.meta_exists = true;
        }
        Self {
            nodes: vec![root],
            index: HashMap::new(),
            replicas,
        }
    }

    pub fn root(&self) -> NodeId {
        0
    }

    pub fn replica_count(&self) -> usize {
        self.replicas
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn node(&self, id: NodeId) -> &SyncNode {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut SyncNode {
        &mut self.nodes[id]
    }

    pub fn iter(&self) -> impl Iterator<Item = &SyncNode> {
        self.nodes.iter()
    }

    /// Append a node under `parent` and return its id.
    pub fn add(&mut self, parent: NodeId, path: RelPath, kind: NodeKind) -> NodeId {
        let id = self.nodes.len();
        self.index.insert((path.key(), kind), id);
        self.nodes
            .push(SyncNode::new(id, Some(parent), path, kind, self.replicas));
        self.nodes[parent].children.push(id);
        id
    }

    pub fn find(&self, path: &RelPath, kind: NodeKind) -> Option<NodeId> {
        self.index.get(&(path.key(), kind)).copied()
    }

    /// Node ids with every folder before its contents.
    pub fn pre_order(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root()];
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.nodes[id].children.iter().rev());
        }
        out
    }

    /// Path of node `id` as replica `replica` spells it. Segments the replica
    /// does not hold take the node's own name.
    pub fn replica_path(&self, id: NodeId, replica: ReplicaId) -> RelPath {
        let node = &self.nodes[id];
        if let Some(local) = &node.slots[replica].local {
            return local.clone();
        }
        match node.parent {
            Some(parent) if node.kind != NodeKind::Root => {
                self.replica_path(parent, replica).join(&node.name)
            }
            _ => node.path.clone(),
        }
    }

    /// Nodes below `id`, excluding `id` itself.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.nodes[id].children.clone();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.nodes[next].children.iter());
        }
        out
    }
}
