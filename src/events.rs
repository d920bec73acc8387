//! Events emitted by the client (§6).

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;

use crate::model::{DevicesChange, Node, Object, PropertiesChange, Property};
use crate::wire::Eoj;

#[derive(Clone)]
pub enum Event {
    NodeJoined(Arc<Node>),
    InstanceListUpdating(Arc<Node>),
    InstanceListPropertyMapAcquiring(Arc<Node>, Vec<Eoj>),
    InstanceListUpdated(Arc<Node>, Vec<Eoj>),
    PropertyMapAcquiring(Arc<Node>, Arc<Object>),
    PropertyMapAcquired(Arc<Node>, Arc<Object>),
    /// `property_value_updated(object, property, old, new, prev_time, new_time)`
    /// per §6: both timestamps bracketing the change ride along, not
    /// just the values, since "last seen" semantics depend on them.
    PropertyValueUpdated {
        object: Arc<Object>,
        property: Arc<Property>,
        old_value: Vec<u8>,
        new_value: Vec<u8>,
        prev_update: Instant,
        new_update: Instant,
    },
    PropertiesChanged(Arc<Object>, PropertiesChange),
    DevicesChanged(Arc<Node>, DevicesChange),
}

/// A broadcast-backed event emitter: many subscribers, fire-and-forget
/// publish. Grounded on the broadcast-channel pattern used elsewhere in
/// the pack for "many independent listeners" signaling, since the
/// teacher repo has no precedent of its own for a multi-subscriber
/// event bus.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Publish an event. No-op (not an error) when there are currently
    /// no subscribers, matching the fire-and-forget nature of every
    /// event in §6.
    pub fn emit(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
