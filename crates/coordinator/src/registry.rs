//! Storage node membership and round-robin placement.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::info;

/// A storage node as seen by the coordinator.
#[derive(Debug, Clone)]
pub struct StorageNode {
    pub node_id: String,
    pub host: String,
    pub port: u16,
    pub last_heartbeat: Instant,
    pub active: bool,
    /// Registration order; keeps placement order stable.
    registered_seq: u64,
}

impl StorageNode {
    /// `host:port`, the form recorded in file metadata.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn is_live(&self, now: Instant, timeout: Duration) -> bool {
        self.active && now.saturating_duration_since(self.last_heartbeat) < timeout
    }
}

/// Live set of storage nodes.
///
/// A node counts as live while it is active and its last heartbeat is
/// younger than the configured timeout; liveness is evaluated on read, so
/// no sweeper is needed.
pub struct NodeRegistry {
    nodes: DashMap<String, StorageNode>,
    timeout: Duration,
    next_seq: AtomicU64,
    cursor: AtomicUsize,
}

impl NodeRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            nodes: DashMap::new(),
            timeout,
            next_seq: AtomicU64::new(0),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Adds a node under a fresh id and returns that id.
    pub fn register(&self, host: &str, port: u16) -> String {
        let node_id = uuid::Uuid::new_v4().to_string();
        let node = StorageNode {
            node_id: node_id.clone(),
            host: host.to_string(),
            port,
            last_heartbeat: Instant::now(),
            active: true,
            registered_seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        };
        info!(node_id = %node_id, address = %node.address(), "storage node registered");
        self.nodes.insert(node_id.clone(), node);
        node_id
    }

    /// Removes a node. Unknown ids are ignored.
    pub fn unregister(&self, node_id: &str) {
        if let Some((_, node)) = self.nodes.remove(node_id) {
            info!(node_id, address = %node.address(), "storage node unregistered");
        }
    }

    /// Refreshes a node's heartbeat. Returns `false` for unknown ids, which
    /// are never created here.
    pub fn heartbeat(&self, node_id: &str) -> bool {
        match self.nodes.get_mut(node_id) {
            Some(mut node) => {
                node.last_heartbeat = Instant::now();
                node.active = true;
                true
            }
            None => false,
        }
    }

    /// Nodes that are currently live, in registration order.
    pub fn active_nodes(&self) -> Vec<StorageNode> {
        let now = Instant::now();
        let mut live: Vec<StorageNode> = self
            .nodes
            .iter()
            .filter(|n| n.is_live(now, self.timeout))
            .map(|n| n.value().clone())
            .collect();
        live.sort_by_key(|n| n.registered_seq);
        live
    }

    /// Picks the next live node in round-robin order, or `None` if there is
    /// no live node.
    pub fn choose_node_for_upload(&self) -> Option<StorageNode> {
        let mut live = self.active_nodes();
        if live.is_empty() {
            return None;
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % live.len();
        Some(live.swap_remove(idx))
    }

    /// Looks up a registered node, live or not.
    #[cfg(test)]
    pub fn get(&self, node_id: &str) -> Option<StorageNode> {
        self.nodes.get(node_id).map(|n| n.value().clone())
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn registry() -> NodeRegistry {
        NodeRegistry::new(Duration::from_secs(30))
    }

    #[test]
    fn register_makes_node_live() {
        let reg = registry();
        let id = reg.register("10.0.0.1", 9091);
        let live = reg.active_nodes();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].node_id, id);
        assert_eq!(live[0].address(), "10.0.0.1:9091");
    }

    #[test]
    fn register_twice_yields_two_nodes() {
        let reg = registry();
        let a = reg.register("h", 1);
        let b = reg.register("h", 1);
        assert_ne!(a, b);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn unregister_is_idempotent() {
        let reg = registry();
        let id = reg.register("h", 1);
        reg.unregister(&id);
        reg.unregister(&id);
        reg.unregister("never-known");
        assert!(reg.is_empty());
        assert!(reg.choose_node_for_upload().is_none());
    }

    #[test]
    fn heartbeat_unknown_returns_false_and_creates_nothing() {
        let reg = registry();
        assert!(!reg.heartbeat("ghost"));
        assert!(reg.is_empty());
    }

    #[test]
    fn stale_node_is_excluded_until_heartbeat() {
        let reg = NodeRegistry::new(Duration::from_millis(50));
        let id = reg.register("h", 1);
        std::thread::sleep(Duration::from_millis(80));

        assert!(reg.active_nodes().is_empty());
        assert!(reg.choose_node_for_upload().is_none());
        // Still registered, just not live.
        assert!(reg.get(&id).is_some());

        assert!(reg.heartbeat(&id));
        assert_eq!(reg.active_nodes().len(), 1);
    }

    #[test]
    fn round_robin_is_fair() {
        let reg = registry();
        for port in 1..=3 {
            reg.register("h", port);
        }

        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..30 {
            let node = reg.choose_node_for_upload().unwrap();
            *counts.entry(node.node_id).or_default() += 1;
        }
        assert_eq!(counts.len(), 3);
        assert!(counts.values().all(|&c| c == 10));
    }

    #[test]
    fn round_robin_cycles_in_registration_order() {
        let reg = registry();
        let ids: Vec<String> = (1..=3).map(|p| reg.register("h", p)).collect();
        let picked: Vec<String> = (0..6)
            .map(|_| reg.choose_node_for_upload().unwrap().node_id)
            .collect();
        assert_eq!(&picked[..3], &ids[..]);
        assert_eq!(&picked[3..], &ids[..]);
    }

    #[test]
    fn concurrent_selection_spreads_load() {
        let reg = Arc::new(registry());
        for port in 1..=4 {
            reg.register("h", port);
        }

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let reg = Arc::clone(&reg);
                std::thread::spawn(move || {
                    (0..100)
                        .map(|_| reg.choose_node_for_upload().unwrap().node_id)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut counts: HashMap<String, usize> = HashMap::new();
        for h in handles {
            for id in h.join().unwrap() {
                *counts.entry(id).or_default() += 1;
            }
        }
        assert_eq!(counts.len(), 4);
        assert!(counts.values().all(|&c| c == 100));
    }
}
