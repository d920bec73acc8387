//! Recognized configuration options (§6).

/// Options the core recognizes. `transport_protocol` lives at the
/// transport layer and isn't modeled here since the core is
/// transport-agnostic.
#[derive(Clone, Debug)]
pub struct Config {
    pub udp_port: u16,
    pub property_map_acquire_timeout_ms: u64,
    pub self_node_instance_code: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            udp_port: 3610,
            property_map_acquire_timeout_ms: 20_000,
            self_node_instance_code: 0x01,
        }
    }
}
