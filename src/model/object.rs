use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::property::{Capabilities, Property};
use crate::wire::Eoj;

/// Add/remove event for an object's property collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PropertiesChange {
    Added(u8),
    Removed(u8),
}

/// Whether an object's property set comes from a static catalog entry
/// ("detailed") or was discovered dynamically off the wire
/// ("undetailed"). Both satisfy the same property-enumeration contract;
/// this is metadata, not a different code path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectKind {
    Detailed,
    Undetailed,
}

/// An ECHONET object: its EOJ and a keyed, enumerable collection of
/// properties.
pub struct Object {
    eoj: Eoj,
    kind: ObjectKind,
    properties: DashMap<u8, Arc<Property>>,
    changes: broadcast::Sender<PropertiesChange>,
}

impl Object {
    pub fn new(eoj: Eoj, kind: ObjectKind) -> Self {
        let (changes, _) = broadcast::channel(16);
        Self {
            eoj,
            kind,
            properties: DashMap::new(),
            changes,
        }
    }

    pub fn eoj(&self) -> Eoj {
        self.eoj
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub fn get(&self, epc: u8) -> Option<Arc<Property>> {
        self.properties.get(&epc).map(|e| e.value().clone())
    }

    /// Insert a property, firing `Added`. Replaces any existing entry
    /// for the same EPC without firing `Removed` first (insertion is
    /// the add/update path; `remove` is the only source of `Removed`).
    pub fn insert(&self, prop: Arc<Property>) {
        let epc = prop.epc();
        self.properties.insert(epc, prop);
        let _ = self.changes.send(PropertiesChange::Added(epc));
    }

    pub fn remove(&self, epc: u8) -> Option<Arc<Property>> {
        let removed = self.properties.remove(&epc).map(|(_, v)| v);
        if removed.is_some() {
            let _ = self.changes.send(PropertiesChange::Removed(epc));
        }
        removed
    }

    /// Get the property for `epc`, creating it with `default_caps` and
    /// an empty value if it doesn't exist yet (the INF-ingest and
    /// property-map-merge lifecycle paths both need this).
    pub fn get_or_create(&self, epc: u8, default_caps: Capabilities) -> Arc<Property> {
        if let Some(existing) = self.get(epc) {
            return existing;
        }
        let prop = Arc::new(Property::new(epc, Vec::new(), default_caps));
        self.insert(Arc::clone(&prop));
        prop
    }

    /// An enumerable snapshot of the current property collection.
    pub fn properties_snapshot(&self) -> Vec<Arc<Property>> {
        self.properties.iter().map(|e| e.value().clone()).collect()
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<PropertiesChange> {
        self.changes.subscribe()
    }
}
