//! Wire-level codec: frame (de)serialization for both ECHONET Lite
//! frame formats, plus the property-map and instance-list sub-codecs
//! used by discovery (§4.G) and the debug JSON rendering (§4.A).

pub mod eoj;
pub mod esv;
pub mod frame;
pub mod instance_list;
pub mod json;
pub mod property_map;

pub use eoj::Eoj;
pub use esv::Esv;
pub use frame::{EData, Ehd2, Format1Message, Frame, PropertyOp};
