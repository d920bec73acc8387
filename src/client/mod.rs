//! The stateful ECHONET Lite client: outbound service engine (§4.E),
//! inbound dispatcher (§4.F), and discovery sequence (§4.G), all
//! methods of the one [`EchonetClient`] defined here.

mod discovery;
mod inbound;
mod outbound;

pub use discovery::InstanceListCallbacks;

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use log::{error, trace};
use tokio::sync::Mutex as AsyncMutex;

use crate::config::Config;
use crate::events::EventBus;
use crate::model::Node;
use crate::objectspec::ObjectSpecCatalog;
use crate::registry::NodeRegistry;
use crate::transaction::TransactionTracker;
use crate::transport::{DestAddr, Transport};
use crate::wire::Frame;

/// The stateful client: owns the self-node, the node registry, and all
/// pending transactions. Construct one per process that wants to
/// participate on the network.
pub struct EchonetClient {
    pub(crate) config: Config,
    pub(crate) self_node: Arc<Node>,
    pub(crate) registry: NodeRegistry,
    pub(crate) tracker: TransactionTracker,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) events: EventBus,
    pub(crate) object_spec: Arc<dyn ObjectSpecCatalog>,
    /// The single binary semaphore guarding the shared encoding buffer
    /// and the send path (§4.E "Send mutex", §5): the buffer lives
    /// inside the lock itself so holding the guard *is* holding the
    /// buffer.
    send_lock: AsyncMutex<BytesMut>,
}

impl EchonetClient {
    pub fn new(
        config: Config,
        transport: Arc<dyn Transport>,
        object_spec: Arc<dyn ObjectSpecCatalog>,
        initial_devices: Vec<Arc<crate::model::Object>>,
    ) -> Self {
        let events = EventBus::new();
        let self_node = Arc::new(Node::new_self(config.self_node_instance_code, initial_devices));
        Self {
            config,
            self_node,
            registry: NodeRegistry::new(events.clone()),
            tracker: TransactionTracker::new(),
            transport,
            events,
            object_spec,
            send_lock: AsyncMutex::new(BytesMut::with_capacity(1024)),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn self_node(&self) -> &Arc<Node> {
        &self.self_node
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Serialize `frame` and send it, holding the send mutex for the
    /// whole operation (§4.E step 3-6). The buffer is cleared before
    /// the guard is released so the next caller starts from empty.
    pub(crate) async fn send_frame(&self, dest: DestAddr, frame: &Frame) -> anyhow::Result<()> {
        let mut buf = self.send_lock.lock().await;
        buf.clear();
        frame.serialize(&mut buf)?;
        trace!("sending {} bytes to {:?}", buf.len(), dest);
        let payload = buf.to_vec();
        drop(buf);
        self.transport.send(dest, payload).await
    }

    /// Entry point the transport's receive callback invokes per
    /// datagram (§4.F, §5). Parses the frame, hands it to the
    /// transaction tracker first, and if nothing was awaiting it,
    /// dispatches it to the inbound service handlers as a background
    /// task, matching the "fire-and-forget, exceptions logged" model.
    pub fn on_receive(self: &Arc<Self>, from: SocketAddr, payload: &[u8]) {
        let frame = match Frame::deserialize(payload) {
            Ok(frame) => frame,
            Err(e) => {
                trace!("dropping malformed frame from {from}: {e}");
                return;
            }
        };
        let Some(msg) = frame.as_format1() else {
            trace!("dropping Format-2 frame from {from}: no core handling for subprofiles");
            return;
        };
        if self.tracker.dispatch(from, frame.tid, msg.seoj, msg.esv, &frame) {
            return;
        }
        let client = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = client.handle_inbound(from, frame).await {
                error!("inbound handler failed for frame from {from}: {e:?}");
            }
        });
    }
}
