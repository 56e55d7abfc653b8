//! Local feed tree seam.
//!
//! The sync core never owns local nodes. It reads the root's direct children
//! and asks the tree to create, remove or refresh them through [`FeedTree`].
//! [`MemoryTree`] is a complete in-process implementation used by the CLI
//! and the tests.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// Opaque handle of a local node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Snapshot of one subscription node below the source root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedNode {
    pub id: NodeId,
    /// Feed URL as stored locally (no remote namespace prefix).
    pub source: String,
    pub title: String,
}

/// Operations the sync core performs on the local tree.
///
/// Implementations must be cheap to call: `refresh` only schedules a
/// content fetch, it does not perform it.
pub trait FeedTree: Send + Sync + 'static {
    /// Direct children of the source root.
    fn children(&self) -> Vec<FeedNode>;

    /// Create a subscription node and return its handle.
    fn add_subscription(&self, source: &str, title: &str) -> NodeId;

    /// Remove a node. Returns `false` if it did not exist.
    fn remove_node(&self, id: NodeId) -> bool;

    /// Schedule a content refresh of one subscription.
    fn refresh(&self, id: NodeId);

    fn set_unread_count(&self, id: NodeId, count: u32);
}

#[derive(Debug, Clone)]
struct MemoryNode {
    source: String,
    title: String,
    unread: u32,
}

#[derive(Debug, Default)]
struct MemoryTreeInner {
    nodes: BTreeMap<NodeId, MemoryNode>,
    next_id: u64,
    refreshes: Vec<NodeId>,
}

/// Feed tree held entirely in memory.
///
/// Records every refresh request so callers can see which feeds a sync
/// cycle decided to fetch.
#[derive(Debug, Default)]
pub struct MemoryTree {
    inner: Mutex<MemoryTreeInner>,
}

impl MemoryTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tree pre-populated with `(source, title)` nodes.
    pub fn with_nodes(nodes: &[(&str, &str)]) -> Self {
        let tree = Self::new();
        for (source, title) in nodes {
            tree.add_subscription(source, title);
        }
        tree
    }

    fn lock(&self) -> MutexGuard<'_, MemoryTreeInner> {
        // A panic while holding the lock cannot leave the map half-updated
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().nodes.is_empty()
    }

    pub fn unread_count(&self, id: NodeId) -> Option<u32> {
        self.lock().nodes.get(&id).map(|n| n.unread)
    }

    /// Refresh requests in the order they were made.
    pub fn refresh_log(&self) -> Vec<NodeId> {
        self.lock().refreshes.clone()
    }

    /// Return and forget recorded refresh requests.
    pub fn take_refreshes(&self) -> Vec<NodeId> {
        std::mem::take(&mut self.lock().refreshes)
    }

    /// Node handle for an exact locally stored source string.
    pub fn find(&self, source: &str) -> Option<NodeId> {
        self.lock()
            .nodes
            .iter()
            .find(|(_, n)| n.source == source)
            .map(|(id, _)| *id)
    }
}

impl FeedTree for MemoryTree {
    fn children(&self) -> Vec<FeedNode> {
        self.lock()
            .nodes
            .iter()
            .map(|(id, n)| FeedNode {
                id: *id,
                source: n.source.clone(),
                title: n.title.clone(),
            })
            .collect()
    }

    fn add_subscription(&self, source: &str, title: &str) -> NodeId {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = NodeId(inner.next_id);
        inner.nodes.insert(
            id,
            MemoryNode {
                source: source.to_string(),
                title: title.to_string(),
                unread: 0,
            },
        );
        id
    }

    fn remove_node(&self, id: NodeId) -> bool {
        self.lock().nodes.remove(&id).is_some()
    }

    fn refresh(&self, id: NodeId) {
        let mut inner = self.lock();
        if inner.nodes.contains_key(&id) {
            inner.refreshes.push(id);
        }
    }

    fn set_unread_count(&self, id: NodeId, count: u32) {
        if let Some(node) = self.lock().nodes.get_mut(&id) {
            node.unread = count;
        }
    }
}
