//! Remote subscription id ↔ local node lookup.

use crate::api::types::FEED_STREAM_PREFIX;
use crate::tree::{FeedTree, NodeId};
use std::collections::HashMap;
use url::Url;

/// Canonical form used as index key.
///
/// Accepts both remote stream ids (`feed/https://...`) and plain local URLs.
/// URLs that parse are re-serialised so scheme/host case and default ports
/// do not cause mismatches.
pub fn normalize_source(source: &str) -> String {
    let trimmed = source.trim();
    let bare = trimmed.strip_prefix(FEED_STREAM_PREFIX).unwrap_or(trimmed);
    match Url::parse(bare) {
        Ok(url) => url.to_string(),
        Err(_) => bare.to_string(),
    }
}

/// Index over the direct children of a source root.
///
/// Several local nodes may point at the same remote subscription.
#[derive(Debug, Default)]
pub struct NodeMapper {
    index: HashMap<String, Vec<NodeId>>,
}

impl NodeMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-read the tree. Call at the start of every sync cycle.
    pub fn rebuild(&mut self, tree: &dyn FeedTree) {
        self.index.clear();
        for node in tree.children() {
            self.insert(&node.source, node.id);
        }
    }

    pub fn find(&self, source: &str) -> Option<NodeId> {
        self.index
            .get(&normalize_source(source))
            .and_then(|ids| ids.first().copied())
    }

    pub fn nodes_for(&self, source: &str) -> &[NodeId] {
        self.index
            .get(&normalize_source(source))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn insert(&mut self, source: &str, id: NodeId) {
        let ids = self.index.entry(normalize_source(source)).or_default();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    /// Forget a node; returns the normalized source it was bound to.
    pub fn remove(&mut self, id: NodeId) -> Option<String> {
        let key = self
            .index
            .iter()
            .find(|(_, ids)| ids.contains(&id))
            .map(|(key, _)| key.clone())?;
        if let Some(ids) = self.index.get_mut(&key) {
            ids.retain(|n| *n != id);
            if ids.is_empty() {
                self.index.remove(&key);
            }
        }
        Some(key)
    }

    /// Every `(normalized source, node)` binding.
    pub fn bindings(&self) -> impl Iterator<Item = (&str, NodeId)> + '_ {
        self.index
            .iter()
            .flat_map(|(key, ids)| ids.iter().map(move |id| (key.as_str(), *id)))
    }

    pub fn len(&self) -> usize {
        self.index.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::MemoryTree;

    #[test]
    fn test_normalize_strips_remote_prefix() {
        assert_eq!(
            normalize_source("feed/https://example.com/rss"),
            normalize_source("https://example.com/rss")
        );
    }

    #[test]
    fn test_normalize_host_case_and_default_port() {
        assert_eq!(
            normalize_source("HTTPS://Example.COM:443/rss"),
            "https://example.com/rss"
        );
    }

    #[test]
    fn test_normalize_keeps_unparseable_sources() {
        assert_eq!(normalize_source("  not a url "), "not a url");
    }

    #[test]
    fn test_find_by_remote_id() {
        let tree = MemoryTree::with_nodes(&[("https://a.example.com/rss", "A")]);
        let mut mapper = NodeMapper::new();
        mapper.rebuild(&tree);

        let id = tree.find("https://a.example.com/rss");
        assert_eq!(mapper.find("feed/https://a.example.com/rss"), id);
        assert_eq!(mapper.find("https://missing.example.com/rss"), None);
    }

    #[test]
    fn test_duplicate_bindings() {
        let tree = MemoryTree::with_nodes(&[
            ("https://a.example.com/rss", "A"),
            ("https://a.example.com/rss", "A copy"),
        ]);
        let mut mapper = NodeMapper::new();
        mapper.rebuild(&tree);
        assert_eq!(mapper.nodes_for("https://a.example.com/rss").len(), 2);
        assert_eq!(mapper.len(), 2);

        let first = mapper.find("https://a.example.com/rss").unwrap();
        assert!(mapper.remove(first).is_some());
        assert_eq!(mapper.nodes_for("https://a.example.com/rss").len(), 1);
    }

    #[test]
    fn test_remove_last_binding_drops_key() {
        let mut mapper = NodeMapper::new();
        mapper.insert("https://a.example.com/rss", NodeId(1));
        assert_eq!(
            mapper.remove(NodeId(1)).as_deref(),
            Some("https://a.example.com/rss")
        );
        assert!(mapper.is_empty());
        assert!(mapper.remove(NodeId(1)).is_none());
    }
}
