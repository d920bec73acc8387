//! The transport interface consumed by the core (§6). UDP broadcast,
//! PAN/low-power routed transports, anything that can deliver complete
//! datagrams, implements this and is supplied by the embedding
//! application; the core never opens a socket itself.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;

use anyhow::Result;

/// `None` means broadcast: "all nodes in subnet".
pub type DestAddr = Option<SocketAddr>;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Abstract datagram handler. Fragmentation and reassembly are the
/// transport's responsibility; the core only ever sees complete
/// datagrams.
pub trait Transport: Send + Sync {
    /// Send `payload` to `dest` (or broadcast, if `None`).
    fn send(&self, dest: DestAddr, payload: Vec<u8>) -> BoxFuture<'_, Result<()>>;
}
