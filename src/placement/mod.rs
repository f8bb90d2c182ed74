//! Actor placement registry (§4.E): `(type, id) → candidate nodes`, with
//! change notification for callers waiting on an as-yet-unregistered type.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Notify;

use crate::types::{ActorId, ActorType, NodeName};

/// One placement entry: a candidate host for a type, at a given version,
/// optionally restricted to ids whose `bind_idx` segment matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementEntry {
    pub node: NodeName,
    pub version: String,
    pub bind_idx: Option<usize>,
}

#[derive(Default)]
struct TypeEntries {
    entries: Vec<PlacementEntry>,
}

/// The registry's shared state, plus a monotonically numbered change feed.
pub struct PlacementRegistry {
    by_type: DashMap<ActorType, TypeEntries>,
    sequence: AtomicU64,
    notify: Arc<Notify>,
}

impl Default for PlacementRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PlacementRegistry {
    pub fn new() -> Self {
        Self {
            by_type: DashMap::new(),
            sequence: AtomicU64::new(0),
            notify: Arc::new(Notify::new()),
        }
    }

    fn bump(&self) -> u64 {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        self.notify.notify_waiters();
        seq
    }

    /// Insert or update a mapping. Idempotent on `(type, node, version)`:
    /// re-adding the same triple only updates `bind_idx`.
    pub fn add_mapping(
        &self,
        actor_type: impl Into<ActorType>,
        node: impl Into<NodeName>,
        version: Option<String>,
        bind_idx: Option<usize>,
    ) -> u64 {
        let actor_type = actor_type.into();
        let node = node.into();
        let version = version.unwrap_or_else(|| "0".to_string());
        let mut entry = self.by_type.entry(actor_type.clone()).or_default();
        if let Some(existing) = entry
            .entries
            .iter_mut()
            .find(|e| e.node == node && e.version == version)
        {
            existing.bind_idx = bind_idx;
        } else {
            entry.entries.push(PlacementEntry { node: node.clone(), version: version.clone(), bind_idx });
        }
        drop(entry);
        tracing::info!(%actor_type, %node, %version, ?bind_idx, "placement mapping added");
        self.bump()
    }

    /// Remove every entry for `(type, node)`, across all versions.
    pub fn remove_mapping(&self, actor_type: impl Into<ActorType>, node: impl Into<NodeName>) -> u64 {
        let actor_type = actor_type.into();
        let node = node.into();
        if let Some(mut entry) = self.by_type.get_mut(&actor_type) {
            entry.entries.retain(|e| e.node != node);
        }
        tracing::info!(%actor_type, %node, "placement mapping removed");
        self.bump()
    }

    /// Resolve the ordered candidate list for `id`: group by version
    /// (highest first, string-compared), and within the highest group
    /// prefer entries whose `bind_idx` segment matches `id`'s
    /// corresponding segment, falling back to unmatched entries of that
    /// same group. Node names break ties deterministically.
    pub fn resolve(&self, id: &ActorId) -> Vec<NodeName> {
        let Some(entry) = self.by_type.get(&id.actor_type) else {
            return Vec::new();
        };
        if entry.entries.is_empty() {
            return Vec::new();
        }

        let mut by_version: HashMap<&str, Vec<&PlacementEntry>> = HashMap::new();
        for e in &entry.entries {
            by_version.entry(e.version.as_str()).or_default().push(e);
        }
        let mut versions: Vec<&str> = by_version.keys().copied().collect();
        versions.sort_unstable_by(|a, b| b.cmp(a));

        let mut out = Vec::new();
        for version in versions {
            let group = &by_version[version];
            let has_bind_idx = group.iter().any(|e| e.bind_idx.is_some());
            if !has_bind_idx {
                let mut nodes: Vec<NodeName> = group.iter().map(|e| e.node.clone()).collect();
                nodes.sort();
                out.extend(nodes);
                continue;
            }
            // A bind_idx entry is preferred when the caller's id segment
            // at that index names this entry's node directly (the node
            // name doubles as the bind key); entries whose segment is
            // absent or names a different node fall back.
            let mut matched = Vec::new();
            let mut fallback = Vec::new();
            for e in group {
                match e.bind_idx {
                    Some(idx) if id.segment(idx) == Some(e.node.as_str()) => matched.push(e.node.clone()),
                    _ => fallback.push(e.node.clone()),
                }
            }
            matched.sort();
            fallback.sort();
            out.extend(matched);
            out.extend(fallback);
        }
        out
    }

    /// Current change sequence number.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Wait up to `timeout` for any change after `after_seq`. Returns the
    /// new sequence number, or `None` on timeout.
    pub async fn wait_for_change(&self, after_seq: u64, timeout: Duration) -> Option<u64> {
        if self.sequence() > after_seq {
            return Some(self.sequence());
        }
        let notified = self.notify.notified();
        tokio::select! {
            _ = notified => Some(self.sequence()),
            _ = tokio::time::sleep(timeout) => {
                if self.sequence() > after_seq {
                    Some(self.sequence())
                } else {
                    None
                }
            }
        }
    }
}
