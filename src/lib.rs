//! Core protocol engine for an ECHONET Lite middleware: wire codec,
//! stateful async client, object/property model, node registry,
//! transaction tracker, and the service/discovery sequences that sit on
//! top of them. Transport (UDP broadcast or otherwise) and the static
//! object-spec catalog are external collaborators the embedding
//! application supplies; this crate never opens a socket.

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod model;
pub mod objectspec;
pub mod registry;
pub mod transaction;
pub mod transport;
pub mod wire;

pub use client::{EchonetClient, InstanceListCallbacks};
pub use config::Config;
pub use error::CodecError;
pub use events::{Event, EventBus};
pub use objectspec::{ClassSpec, EmptyCatalog, ObjectSpecCatalog, PropertySpec};
pub use registry::NodeRegistry;
pub use transport::{BoxFuture, DestAddr, Transport};
