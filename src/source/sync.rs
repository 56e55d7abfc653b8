//! Full and quick update bookkeeping.
//!
//! Network access happens in the actor; everything here works on already
//! fetched payloads so a failed fetch never touches the tree or the map.

use super::mapper::{normalize_source, NodeMapper};
use crate::api::{Subscription, UnreadCount};
use crate::tree::{FeedTree, NodeId};
use crate::util::sanitize_title;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;

/// Minimum spacing between two quick updates.
pub const QUICK_UPDATE_INTERVAL: Duration = Duration::from_secs(600);

/// Automatic full list updates happen once a day.
pub const LIST_UPDATE_INTERVAL: Duration = Duration::from_secs(60 * 60 * 24);

// ============================================================================
// Timestamp Map
// ============================================================================

#[derive(Debug, Clone)]
struct Stamp {
    /// Subscription id as the service last listed it.
    id: String,
    timestamp: i64,
}

/// Last known remote update time (epoch seconds) per subscription.
///
/// Lookups go through [`normalize_source`], so ids differing only in host
/// case or default port share one entry. Reported keys are the ids the
/// subscription list used.
#[derive(Debug, Default, Clone)]
pub struct TimestampMap {
    entries: HashMap<String, Stamp>,
}

impl TimestampMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<i64> {
        self.entries
            .get(&normalize_source(id))
            .map(|stamp| stamp.timestamp)
    }

    /// Store `timestamp` if the entry is missing or older.
    /// Returns `true` when the stored value changed.
    pub fn record(&mut self, id: &str, timestamp: i64) -> bool {
        match self.entries.get_mut(&normalize_source(id)) {
            Some(stamp) if stamp.timestamp >= timestamp => false,
            Some(stamp) => {
                stamp.timestamp = timestamp;
                true
            }
            None => {
                self.entries.insert(
                    normalize_source(id),
                    Stamp {
                        id: id.to_string(),
                        timestamp,
                    },
                );
                true
            }
        }
    }

    /// Like [`record`](Self::record), and adopt `id` as the reported key.
    pub fn record_listed(&mut self, id: &str, timestamp: i64) -> bool {
        let changed = self.record(id, timestamp);
        if let Some(stamp) = self.entries.get_mut(&normalize_source(id)) {
            if stamp.id != id {
                stamp.id = id.to_string();
            }
        }
        changed
    }

    /// True if `timestamp` is strictly newer than what we hold.
    pub fn is_newer(&self, id: &str, timestamp: i64) -> bool {
        self.get(id).map_or(true, |stored| timestamp > stored)
    }

    /// Drop every entry whose id is not in `keep`. Returns the number pruned.
    pub fn retain_ids(&mut self, keep: &HashSet<&str>) -> usize {
        let keep: HashSet<String> = keep.iter().map(|id| normalize_source(id)).collect();
        let before = self.entries.len();
        self.entries.retain(|key, _| keep.contains(key));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sorted copy for reporting.
    pub fn snapshot(&self) -> BTreeMap<String, i64> {
        self.entries
            .values()
            .map(|stamp| (stamp.id.clone(), stamp.timestamp))
            .collect()
    }
}

// ============================================================================
// Cycle Bookkeeping
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    Full,
    Quick,
}

impl std::fmt::Display for UpdateMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateMode::Full => write!(f, "full"),
            UpdateMode::Quick => write!(f, "quick"),
        }
    }
}

#[derive(Debug, Default)]
pub struct SyncEngine {
    pub timestamps: TimestampMap,
    in_flight: Option<UpdateMode>,
    last_quick_update: Option<Instant>,
    last_list_update: Option<Instant>,
}

impl SyncEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the single update slot. Returns `false` (coalesced) if a cycle
    /// is already running.
    pub fn try_begin(&mut self, mode: UpdateMode) -> bool {
        if let Some(running) = self.in_flight {
            tracing::debug!(requested = %mode, running = %running, "Update already in flight, ignoring trigger");
            return false;
        }
        self.in_flight = Some(mode);
        true
    }

    pub fn finish(&mut self) {
        self.in_flight = None;
    }

    pub fn in_flight(&self) -> Option<UpdateMode> {
        self.in_flight
    }

    pub fn quick_due(&self, now: Instant) -> bool {
        self.last_quick_update
            .map_or(true, |last| now.saturating_duration_since(last) >= QUICK_UPDATE_INTERVAL)
    }

    pub fn list_due(&self, now: Instant) -> bool {
        self.last_list_update
            .map_or(true, |last| now.saturating_duration_since(last) >= LIST_UPDATE_INTERVAL)
    }

    pub fn mark_quick(&mut self, now: Instant) {
        self.last_quick_update = Some(now);
    }

    pub fn mark_list(&mut self, now: Instant) {
        self.last_list_update = Some(now);
    }
}

// ============================================================================
// Reconciliation
// ============================================================================

/// What a full list reconciliation changed locally.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub added: Vec<NodeId>,
    pub removed: Vec<NodeId>,
    /// Subscriptions that already had a local node.
    pub unchanged: usize,
}

/// Bring the local tree and timestamp map in line with the remote list.
///
/// Afterwards every remote subscription has a node and a map entry, and no
/// map entry or node exists for a subscription the list no longer carries.
pub fn reconcile_list(
    subscriptions: &[Subscription],
    tree: &dyn FeedTree,
    mapper: &mut NodeMapper,
    timestamps: &mut TimestampMap,
) -> Reconciliation {
    let mut outcome = Reconciliation::default();
    let mut remote_sources = HashSet::with_capacity(subscriptions.len());

    for sub in subscriptions {
        let source = normalize_source(&sub.id);
        if !remote_sources.insert(source) {
            // Same feed listed twice; the first entry wins
            continue;
        }

        if mapper.find(&sub.id).is_some() {
            outcome.unchanged += 1;
        } else {
            let url = sub.feed_url();
            let title = sanitize_title(&sub.title, url);
            let id = tree.add_subscription(url, &title);
            tracing::info!(feed = %url, node = %id, "Adding subscription discovered remotely");
            mapper.insert(url, id);
            outcome.added.push(id);
        }
        timestamps.record_listed(&sub.id, sub.timestamp);
    }

    let stale: Vec<NodeId> = mapper
        .bindings()
        .filter(|(source, _)| !remote_sources.contains(*source))
        .map(|(_, id)| id)
        .collect();
    for id in stale {
        tracing::info!(node = %id, "Removing subscription no longer present remotely");
        tree.remove_node(id);
        mapper.remove(id);
        outcome.removed.push(id);
    }

    let keep: HashSet<&str> = subscriptions.iter().map(|s| s.id.as_str()).collect();
    let pruned = timestamps.retain_ids(&keep);
    if pruned > 0 {
        tracing::debug!(pruned, "Pruned timestamps of removed subscriptions");
    }

    outcome
}

/// Push unread counters to the tree and decide which feeds need fetching.
///
/// With `refresh_changed` set, every node whose remote timestamp is strictly
/// newer than the stored one is refreshed and returned. Otherwise only the
/// counters and the map are updated.
pub fn apply_unread_counts(
    counts: &[UnreadCount],
    tree: &dyn FeedTree,
    mapper: &NodeMapper,
    timestamps: &mut TimestampMap,
    refresh_changed: bool,
) -> Vec<NodeId> {
    let mut refreshed = Vec::new();

    for count in counts.iter().filter(|c| c.is_feed()) {
        let nodes = mapper.nodes_for(&count.id);
        if nodes.is_empty() {
            tracing::trace!(stream = %count.id, "No local node for unread count");
            continue;
        }
        for id in nodes {
            tree.set_unread_count(*id, count.count);
        }

        if refresh_changed && timestamps.is_newer(&count.id, count.timestamp) {
            for id in nodes {
                tree.refresh(*id);
                refreshed.push(*id);
            }
        }
        timestamps.record(&count.id, count.timestamp);
    }

    refreshed
}
