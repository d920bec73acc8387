//! Thread-safe registry mapping remote address to other-node (§4.C).

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;

use crate::events::{Event, EventBus};
use crate::model::Node;

/// Maps remote addresses to the `Node` discovered at that address.
/// `try_add` is insert-if-absent and atomic with respect to concurrent
/// callers racing on the same new address: exactly one of them creates
/// the node and exactly one `node_joined` event fires.
pub struct NodeRegistry {
    nodes: DashMap<SocketAddr, Arc<Node>>,
    events: EventBus,
}

impl NodeRegistry {
    pub fn new(events: EventBus) -> Self {
        Self {
            nodes: DashMap::new(),
            events,
        }
    }

    pub fn try_find(&self, addr: SocketAddr) -> Option<Arc<Node>> {
        self.nodes.get(&addr).map(|e| e.value().clone())
    }

    /// Insert `node` at `addr` if absent. Returns `(node, was_added)`:
    /// the node that ends up registered (the caller's `node` if this
    /// call won the race, the existing one otherwise) and whether this
    /// call was the one that added it.
    pub fn try_add(&self, addr: SocketAddr, node: Arc<Node>) -> (Arc<Node>, bool) {
        match self.nodes.entry(addr) {
            dashmap::mapref::entry::Entry::Occupied(entry) => (entry.get().clone(), false),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(node.clone());
                self.events.emit(Event::NodeJoined(Arc::clone(&node)));
                (node, true)
            }
        }
    }

    pub fn remove(&self, addr: SocketAddr) -> Option<Arc<Node>> {
        self.nodes.remove(&addr).map(|(_, v)| v)
    }

    pub fn all(&self) -> Vec<Arc<Node>> {
        self.nodes.iter().map(|e| e.value().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc as StdArc;

    fn addr() -> SocketAddr {
        "127.0.0.1:3610".parse().unwrap()
    }

    #[test]
    fn try_add_is_insert_if_absent() {
        let registry = NodeRegistry::new(EventBus::new());
        let a = addr();
        let (_, added1) = registry.try_add(a, Arc::new(Node::new_other(a, 0x01)));
        let (_, added2) = registry.try_add(a, Arc::new(Node::new_other(a, 0x01)));
        assert!(added1);
        assert!(!added2);
    }

    #[tokio::test]
    async fn concurrent_try_add_fires_exactly_one_node_joined() {
        let registry = Arc::new(NodeRegistry::new(EventBus::new()));
        let a = addr();
        let mut events = registry.events.subscribe();
        let joined_count = StdArc::new(AtomicUsize::new(0));
        let counter = StdArc::clone(&joined_count);
        let listener = tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                if matches!(event, Event::NodeJoined(_)) {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }
        });

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry.try_add(a, Arc::new(Node::new_other(a, 0x01)));
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        // Give the listener a beat to drain the broadcast channel.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        listener.abort();
        assert_eq!(joined_count.load(Ordering::SeqCst), 1);
    }
}
