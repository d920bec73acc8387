use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::object::{Object, ObjectKind};
use crate::wire::eoj::node_profile;
use crate::wire::Eoj;

/// Add/remove event for a node's device-object collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DevicesChange {
    Added(Eoj),
    Removed(Eoj),
}

/// A node on the network: either the local self-node (exactly one) or
/// a remote other-node (many, keyed by address in the registry). Both
/// have a node-profile object and a device-object collection.
pub struct Node {
    /// `None` for the self-node; `Some(addr)` for other-nodes.
    address: Option<SocketAddr>,
    node_profile: Arc<Object>,
    devices: DashMap<Eoj, Arc<Object>>,
    changes: broadcast::Sender<DevicesChange>,
}

impl Node {
    /// Construct the self-node, optionally initializing a set of
    /// locally-hosted device objects at construction time.
    pub fn new_self(instance_code: u8, initial_devices: Vec<Arc<Object>>) -> Self {
        let node = Self::new(None, instance_code);
        for device in initial_devices {
            node.devices.insert(device.eoj(), device);
        }
        node
    }

    pub fn new_other(address: SocketAddr, node_profile_instance: u8) -> Self {
        Self::new(Some(address), node_profile_instance)
    }

    fn new(address: Option<SocketAddr>, node_profile_instance: u8) -> Self {
        let (changes, _) = broadcast::channel(16);
        Self {
            address,
            node_profile: Arc::new(Object::new(node_profile(node_profile_instance), ObjectKind::Detailed)),
            devices: DashMap::new(),
            changes,
        }
    }

    pub fn is_self(&self) -> bool {
        self.address.is_none()
    }

    pub fn address(&self) -> Option<SocketAddr> {
        self.address
    }

    pub fn node_profile(&self) -> &Arc<Object> {
        &self.node_profile
    }

    pub fn device(&self, eoj: Eoj) -> Option<Arc<Object>> {
        self.devices.get(&eoj).map(|e| e.value().clone())
    }

    pub fn devices(&self) -> Vec<Arc<Object>> {
        self.devices.iter().map(|e| e.value().clone()).collect()
    }

    /// Register a device, firing `Added`.
    pub fn add_device(&self, device: Arc<Object>) {
        let eoj = device.eoj();
        self.devices.insert(eoj, device);
        let _ = self.changes.send(DevicesChange::Added(eoj));
    }

    /// Find the device at `eoj`, creating it (undetailed, empty
    /// property set) if it's not already known. Returns the object and
    /// whether it was newly created, per the lifecycle rule in §3: an
    /// object is created when the application registers it, or when an
    /// unsolicited message references a previously unknown EOJ.
    pub fn ensure_device(&self, eoj: Eoj) -> (Arc<Object>, bool) {
        if let Some(existing) = self.device(eoj) {
            return (existing, false);
        }
        let device = Arc::new(Object::new(eoj, ObjectKind::Undetailed));
        self.add_device(Arc::clone(&device));
        (device, true)
    }

    pub fn remove_device(&self, eoj: Eoj) -> Option<Arc<Object>> {
        let removed = self.devices.remove(&eoj).map(|(_, v)| v);
        if removed.is_some() {
            let _ = self.changes.send(DevicesChange::Removed(eoj));
        }
        removed
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<DevicesChange> {
        self.changes.subscribe()
    }

    /// Resolve `deoj` against this node: the node profile if it names
    /// the node-profile class (instance `0x00` matches any instance),
    /// otherwise a device lookup.
    pub fn resolve(&self, deoj: Eoj) -> Option<Arc<Object>> {
        if deoj.is_node_profile() {
            Some(Arc::clone(&self.node_profile))
        } else {
            self.device(deoj)
        }
    }
}
