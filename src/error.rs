use thiserror::Error;

/// Errors produced while decoding or constructing a frame at the wire
/// boundary. Malformed bytes are never an `anyhow` error here because
/// callers above the codec (the inbound dispatcher, in particular) need
/// to tell "not enough bytes" apart from "unknown ESV" without string
/// matching.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("buffer too short: need at least {needed} bytes, have {have}")]
    UnexpectedEof { needed: usize, have: usize },
    #[error("invalid EHD1 byte: {0:#04X}, expected 0x10")]
    InvalidEhd1(u8),
    #[error("invalid EHD2 byte: {0:#04X}, expected 0x81 or 0x82")]
    InvalidEhd2(u8),
    #[error("EHD2 does not agree with the EDATA variant being constructed")]
    EhdEdataMismatch,
    #[error("unknown ESV code: {0:#04X}")]
    UnknownEsv(u8),
    #[error("operation list has {0} entries, more than the 255 OPC can address")]
    TooManyOperations(usize),
    #[error("invalid property map payload: {0}")]
    InvalidPropertyMap(String),
    #[error("instance list has {0} entries, more than the 84-entry maximum")]
    TooManyInstances(usize),
}
