use std::sync::Mutex;
use std::time::Instant;

use tokio::sync::broadcast;

/// Capability flags and size bounds for a property, either derived from
/// a static spec or acquired via property-map read for remote objects.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub can_get: bool,
    pub can_set: bool,
    pub can_announce: bool,
    pub min_size: Option<usize>,
    pub max_size: Option<usize>,
}

impl Capabilities {
    pub fn accepts_len(&self, len: usize) -> bool {
        if let Some(min) = self.min_size {
            if len < min {
                return false;
            }
        }
        if let Some(max) = self.max_size {
            if len > max {
                return false;
            }
        }
        true
    }
}

/// A value-updated event: old/new value plus the timestamps that
/// bracket the change. Setting the same value again still produces an
/// event with `old_value == new_value` (clients rely on "last seen"
/// semantics), only the timestamps move forward.
#[derive(Clone, Debug)]
pub struct PropertyUpdate {
    pub epc: u8,
    pub old_value: Vec<u8>,
    pub new_value: Vec<u8>,
    pub prev_update: Instant,
    pub new_update: Instant,
}

struct State {
    value: Vec<u8>,
    updated_at: Instant,
    caps: Capabilities,
}

/// A single object property: current value, last-updated time, and
/// capability flags, with a subscribable stream of value-updated
/// events.
///
/// Callers are expected to validate a new value's length against
/// [`Capabilities`] (via [`Property::caps`]) before calling
/// [`Property::write`]; the service engine does this at the one seam
/// where §3's size invariant actually needs enforcing (inbound
/// SetI/SetC/SetGet handling), so `write` itself stays infallible.
pub struct Property {
    epc: u8,
    state: Mutex<State>,
    updates: broadcast::Sender<PropertyUpdate>,
}

impl Property {
    pub fn new(epc: u8, initial_value: Vec<u8>, caps: Capabilities) -> Self {
        let (updates, _) = broadcast::channel(16);
        Self {
            epc,
            state: Mutex::new(State {
                value: initial_value,
                updated_at: Instant::now(),
                caps,
            }),
            updates,
        }
    }

    pub fn epc(&self) -> u8 {
        self.epc
    }

    /// A snapshot of the current value.
    pub fn read(&self) -> Vec<u8> {
        self.state.lock().unwrap().value.clone()
    }

    pub fn caps(&self) -> Capabilities {
        self.state.lock().unwrap().caps
    }

    pub fn set_caps(&self, caps: Capabilities) {
        self.state.lock().unwrap().caps = caps;
    }

    /// Overwrite the value, recording the new update time and emitting
    /// a [`PropertyUpdate`] even when the value is unchanged.
    pub fn write(&self, new_value: Vec<u8>) -> PropertyUpdate {
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();
        let old_value = std::mem::replace(&mut state.value, new_value.clone());
        let prev_update = std::mem::replace(&mut state.updated_at, now);
        drop(state);
        let update = PropertyUpdate {
            epc: self.epc,
            old_value,
            new_value,
            prev_update,
            new_update: now,
        };
        let _ = self.updates.send(update.clone());
        update
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PropertyUpdate> {
        self.updates.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_reports_old_and_new_value() {
        let prop = Property::new(0x80, vec![0x30], Capabilities::default());
        let update = prop.write(vec![0x31]);
        assert_eq!(update.old_value, vec![0x30]);
        assert_eq!(update.new_value, vec![0x31]);
        assert_eq!(prop.read(), vec![0x31]);
    }

    #[test]
    fn rewriting_same_value_still_fires_update_with_old_eq_new() {
        let prop = Property::new(0x80, vec![0x30], Capabilities::default());
        let update = prop.write(vec![0x30]);
        assert_eq!(update.old_value, update.new_value);
    }

    #[test]
    fn capabilities_enforce_size_bounds() {
        let caps = Capabilities {
            min_size: Some(1),
            max_size: Some(1),
            ..Default::default()
        };
        assert!(caps.accepts_len(1));
        assert!(!caps.accepts_len(0));
        assert!(!caps.accepts_len(2));
    }

    #[tokio::test]
    async fn subscribers_observe_writes() {
        let prop = Property::new(0x80, vec![], Capabilities::default());
        let mut rx = prop.subscribe();
        prop.write(vec![0x01]);
        let update = rx.recv().await.unwrap();
        assert_eq!(update.new_value, vec![0x01]);
    }
}
