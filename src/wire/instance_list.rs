use crate::error::CodecError;
use crate::wire::eoj::Eoj;

pub const MAX_INSTANCES: usize = 84;
const BUFFER_SIZE: usize = 253;

/// Encode an instance list (the EPC 0xD5/0xD6 payload): a 1-byte count
/// followed by 3 bytes per EOJ, zero-padded to the 253-byte maximum
/// buffer.
pub fn encode(eojs: &[Eoj]) -> Result<Vec<u8>, CodecError> {
    if eojs.len() > MAX_INSTANCES {
        return Err(CodecError::TooManyInstances(eojs.len()));
    }
    let mut out = vec![0u8; BUFFER_SIZE];
    out[0] = eojs.len() as u8;
    for (i, eoj) in eojs.iter().enumerate() {
        let offset = 1 + i * 3;
        out[offset..offset + 3].copy_from_slice(&eoj.to_bytes());
    }
    out.truncate(1 + eojs.len() * 3);
    Ok(out)
}

/// Decode an instance list EDT back into its EOJs.
pub fn decode(edt: &[u8]) -> Result<Vec<Eoj>, CodecError> {
    if edt.is_empty() {
        return Err(CodecError::InvalidPropertyMap(
            "empty instance list payload".into(),
        ));
    }
    let count = edt[0] as usize;
    let body = &edt[1..];
    if body.len() < count * 3 {
        return Err(CodecError::InvalidPropertyMap(format!(
            "instance list declares {count} entries but only has {} trailing bytes",
            body.len()
        )));
    }
    let mut out = Vec::with_capacity(count);
    for chunk in body[..count * 3].chunks_exact(3) {
        out.push(Eoj::from_bytes([chunk[0], chunk[1], chunk[2]]));
    }
    Ok(out)
}
