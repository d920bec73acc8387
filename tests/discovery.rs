//! Exercises the discovery sequence (announce, instance-list request,
//! property-map acquisition) between two in-process clients.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use echolite_core::config::Config;
use echolite_core::model::{Capabilities, Object, ObjectKind, Property};
use echolite_core::objectspec::EmptyCatalog;
use echolite_core::transport::{BoxFuture, DestAddr, Transport};
use echolite_core::wire::{property_map, Eoj};
use echolite_core::EchonetClient;

struct LoopbackTransport {
    from_addr: SocketAddr,
    peers: Mutex<Vec<Arc<EchonetClient>>>,
}

impl LoopbackTransport {
    fn new(from_addr: SocketAddr) -> Arc<Self> {
        Arc::new(Self {
            from_addr,
            peers: Mutex::new(Vec::new()),
        })
    }

    fn connect(&self, peer: Arc<EchonetClient>) {
        self.peers.lock().unwrap().push(peer);
    }
}

impl Transport for LoopbackTransport {
    fn send(&self, _dest: DestAddr, payload: Vec<u8>) -> BoxFuture<'_, anyhow::Result<()>> {
        let peers = self.peers.lock().unwrap().clone();
        let from = self.from_addr;
        Box::pin(async move {
            for peer in peers {
                peer.on_receive(from, &payload);
            }
            Ok(())
        })
    }
}

#[tokio::test]
async fn device_controller_discovers_and_acquires_property_map_of_announcer() {
    let controller_addr: SocketAddr = "127.0.0.1:3620".parse().unwrap();
    let device_addr: SocketAddr = "127.0.0.1:3621".parse().unwrap();

    let controller_transport = LoopbackTransport::new(controller_addr);
    let device_transport = LoopbackTransport::new(device_addr);

    let device_object = Arc::new(Object::new(Eoj::new(0x02, 0x90, 0x01), ObjectKind::Detailed));
    device_object.insert(Arc::new(Property::new(
        0x80,
        vec![0x30],
        Capabilities {
            can_get: true,
            can_announce: true,
            min_size: Some(1),
            max_size: Some(1),
            ..Default::default()
        },
    )));
    let readable_caps = Capabilities { can_get: true, ..Default::default() };
    let announce_map: std::collections::BTreeSet<u8> = [0x80u8].into_iter().collect();
    let get_map: std::collections::BTreeSet<u8> = [0x80u8].into_iter().collect();
    let set_map: std::collections::BTreeSet<u8> = std::collections::BTreeSet::new();
    device_object.insert(Arc::new(Property::new(0x9D, property_map::encode(&announce_map), readable_caps)));
    device_object.insert(Arc::new(Property::new(0x9E, property_map::encode(&set_map), readable_caps)));
    device_object.insert(Arc::new(Property::new(0x9F, property_map::encode(&get_map), readable_caps)));

    let device_client = Arc::new(EchonetClient::new(
        Config::default(),
        device_transport.clone() as Arc<dyn Transport>,
        Arc::new(EmptyCatalog),
        vec![device_object],
    ));
    let controller_client = Arc::new(EchonetClient::new(
        Config::default(),
        controller_transport.clone() as Arc<dyn Transport>,
        Arc::new(EmptyCatalog),
        vec![],
    ));

    controller_transport.connect(Arc::clone(&device_client));
    device_transport.connect(Arc::clone(&controller_client));

    // The device announces itself spontaneously (e.g. at startup).
    device_client.announce().await.unwrap();

    // Give the controller's background inbound handling (ingest +
    // property-map acquisition round-trips) time to settle.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let node = controller_client
        .registry()
        .try_find(device_addr)
        .expect("controller learned of the device's node from the INF source address");
    let object = node
        .device(Eoj::new(0x02, 0x90, 0x01))
        .expect("instance list caused the device object to be created");
    assert_eq!(object.get(0x80).map(|p| p.caps().can_get), Some(true));
}
