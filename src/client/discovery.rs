//! Discovery sequence (§4.G): announcing the self-node's instance list,
//! requesting a remote node's instance list, and processing an inbound
//! instance-list notification by acquiring each newly-seen device's
//! property maps.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::warn;

use crate::client::EchonetClient;
use crate::events::Event;
use crate::model::{Capabilities, Node, Object};
use crate::wire::eoj::node_profile;
use crate::wire::{instance_list, property_map, Eoj, PropertyOp};

enum MapKind {
    Announce,
    Set,
    Get,
}

/// Optional hooks into [`EchonetClient::request_instance_list`]'s
/// observation window. Each returns `true` to end the wait early. These
/// are plain `Fn` rather than `FnMut` so a caller that needs to
/// accumulate state reaches for its own interior mutability instead of
/// this type carrying it.
#[derive(Default)]
pub struct InstanceListCallbacks {
    pub on_acquisition_starting: Option<Box<dyn Fn(Eoj) -> bool + Send + Sync>>,
    pub on_property_map_acquired: Option<Box<dyn Fn(Eoj) -> bool + Send + Sync>>,
    pub on_instance_list_updated: Option<Box<dyn Fn(&[Eoj]) -> bool + Send + Sync>>,
}

impl EchonetClient {
    /// Fill the self-node's own instance list (EPC 0xD5) and broadcast
    /// it as an INF from the node profile.
    pub async fn announce(&self) -> Result<()> {
        let eojs: Vec<Eoj> = self.self_node.devices().iter().map(|o| o.eoj()).collect();
        let edt = instance_list::encode(&eojs)?;
        let node_profile_eoj = self.self_node.node_profile().eoj();
        self.inf(node_profile_eoj, None, node_profile(0x00), vec![PropertyOp::new(0xD5, edt)]).await
    }

    /// Broadcast an INF_REQ for EPC 0xD5, then, if `callbacks` were
    /// supplied, watch the event bus for the acquisition progress each
    /// responding node's instance-list notification drives (via
    /// [`EchonetClient::on_instance_list_notification`]) until the
    /// configured timeout elapses or a callback asks to stop early.
    pub async fn request_instance_list(&self, callbacks: Option<InstanceListCallbacks>) -> Result<()> {
        let node_profile_eoj = self.self_node.node_profile().eoj();
        self.inf_req(node_profile_eoj, node_profile(0x00), vec![0xD5]).await?;

        let Some(callbacks) = callbacks else {
            return Ok(());
        };

        let mut events = self.events.subscribe();
        let deadline = tokio::time::Instant::now() + Duration::from_millis(self.config.property_map_acquire_timeout_ms);
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(());
            }
            let event = match tokio::time::timeout(remaining, events.recv()).await {
                Ok(Ok(event)) => event,
                Ok(Err(_)) => return Ok(()), // bus lagged/closed
                Err(_) => return Ok(()),     // timed out
            };
            let stop = match event {
                Event::InstanceListPropertyMapAcquiring(_, eojs) => callbacks
                    .on_acquisition_starting
                    .as_ref()
                    .is_some_and(|cb| eojs.iter().any(|&eoj| cb(eoj))),
                Event::PropertyMapAcquired(_, object) => callbacks
                    .on_property_map_acquired
                    .as_ref()
                    .is_some_and(|cb| cb(object.eoj())),
                Event::InstanceListUpdated(_, eojs) => callbacks
                    .on_instance_list_updated
                    .as_ref()
                    .is_some_and(|cb| cb(&eojs)),
                _ => false,
            };
            if stop {
                return Ok(());
            }
        }
    }

    /// Handle an inbound instance-list notification (EPC 0xD5 on a
    /// node-profile source, per the inbound INF/INFC ingest path):
    /// ensure every named device exists, acquire property maps for the
    /// ones newly created, then refresh the node profile's own map.
    pub(crate) async fn on_instance_list_notification(&self, node: Arc<Node>, edt: Vec<u8>) {
        self.events.emit(Event::InstanceListUpdating(Arc::clone(&node)));

        let eojs = match instance_list::decode(&edt) {
            Ok(eojs) => eojs,
            Err(e) => {
                warn!("malformed instance list from {:?}: {e}", node.address());
                return;
            }
        };

        let mut newly_seen = Vec::new();
        for &eoj in &eojs {
            let (object, created) = node.ensure_device(eoj);
            if created {
                newly_seen.push(object);
            }
        }

        if !newly_seen.is_empty() {
            self.events.emit(Event::InstanceListPropertyMapAcquiring(
                Arc::clone(&node),
                newly_seen.iter().map(|o| o.eoj()).collect(),
            ));
            for object in &newly_seen {
                self.acquire_property_map(&node, object).await;
            }
        }

        self.acquire_property_map(&node, node.node_profile()).await;

        self.events.emit(Event::InstanceListUpdated(node, eojs));
    }

    /// Read EPC 0x9D/0x9E/0x9F from `object` (20s-default-timeout Get
    /// each, per configuration) and merge the announce/set/get
    /// capability flags they carry onto its properties. A timeout or
    /// SNA on any one of the three maps aborts only that map, logged
    /// via [`EchonetClient::log_acquisition_failure`]; it never raises
    /// out of the discovery sequence.
    async fn acquire_property_map(&self, node: &Arc<Node>, object: &Arc<Object>) {
        self.events.emit(Event::PropertyMapAcquiring(Arc::clone(node), Arc::clone(object)));
        let eoj = object.eoj();
        let timeout = Duration::from_millis(self.config.property_map_acquire_timeout_ms);
        let from = self.self_node.node_profile().eoj();

        let mut flags: HashMap<u8, (bool, bool, bool)> = HashMap::new();
        for (epc, kind) in [(0x9Du8, MapKind::Announce), (0x9E, MapKind::Set), (0x9F, MapKind::Get)] {
            let outcome = tokio::time::timeout(
                timeout,
                self.get(from, node.address(), eoj, vec![epc], std::future::pending::<()>()),
            )
            .await;
            match outcome {
                Ok(Ok((true, ops))) => {
                    let Some(op) = ops.first() else { continue };
                    match property_map::decode(&op.edt) {
                        Ok(members) => {
                            for member in members {
                                let entry = flags.entry(member).or_insert((false, false, false));
                                match kind {
                                    MapKind::Announce => entry.0 = true,
                                    MapKind::Set => entry.1 = true,
                                    MapKind::Get => entry.2 = true,
                                }
                            }
                        }
                        Err(e) => warn!("malformed property map EPC {epc:#04X} from {eoj:?}: {e}"),
                    }
                }
                Ok(Ok((false, _))) => self.log_acquisition_failure(
                    eoj,
                    "property map read",
                    &anyhow::anyhow!("device returned SNA for EPC {epc:#04X}"),
                ),
                Ok(Err(e)) => self.log_acquisition_failure(eoj, "property map read", &e),
                Err(_) => self.log_acquisition_failure(
                    eoj,
                    "property map read",
                    &anyhow::anyhow!("timed out after {timeout:?} reading EPC {epc:#04X}"),
                ),
            }
        }

        let class_spec = self.object_spec.find_class(eoj.class_group, eoj.class);
        for (epc, (can_announce, can_set, can_get)) in flags {
            let bounds = class_spec.find(epc);
            let caps = Capabilities {
                can_get,
                can_set,
                can_announce,
                min_size: bounds.and_then(|p| p.min_size),
                max_size: bounds.and_then(|p| p.max_size),
            };
            object.get_or_create(epc, caps).set_caps(caps);
        }

        self.events.emit(Event::PropertyMapAcquired(Arc::clone(node), Arc::clone(object)));
    }
}
