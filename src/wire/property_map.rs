use std::collections::BTreeSet;

use crate::error::CodecError;

/// Encode a set of EPCs (each expected in `0x80..=0xFF`) as an ECHONET
/// Lite property map EDT: short form when `count <= 15` (one byte per
/// EPC), long form when `count >= 16` (16 bitmap bytes, bit `j` of byte
/// `i` set iff EPC `0x80 + 0x10*j + i` is present).
pub fn encode(epcs: &BTreeSet<u8>) -> Vec<u8> {
    if epcs.len() <= 15 {
        let mut out = Vec::with_capacity(1 + epcs.len());
        out.push(epcs.len() as u8);
        out.extend(epcs.iter().copied());
        return out;
    }
    let mut bitmap = [0u8; 16];
    for &epc in epcs {
        if !(0x80..=0xFF).contains(&epc) {
            continue;
        }
        let offset = epc - 0x80;
        let i = (offset % 0x10) as usize;
        let j = (offset / 0x10) as usize;
        bitmap[i] |= 1 << j;
    }
    let mut out = Vec::with_capacity(17);
    out.push(epcs.len() as u8);
    out.extend_from_slice(&bitmap);
    out
}

/// Decode a property-map EDT into the set of EPCs it names.
pub fn decode(edt: &[u8]) -> Result<BTreeSet<u8>, CodecError> {
    if edt.is_empty() {
        return Err(CodecError::InvalidPropertyMap(
            "empty property map payload".into(),
        ));
    }
    let count = edt[0];
    if count < 16 {
        let rest = &edt[1..];
        if rest.len() != count as usize {
            return Err(CodecError::InvalidPropertyMap(format!(
                "short-form count {count} does not match payload length {}",
                rest.len()
            )));
        }
        return Ok(rest.iter().copied().collect());
    }
    let bitmap = &edt[1..];
    if bitmap.len() != 16 {
        return Err(CodecError::InvalidPropertyMap(format!(
            "long-form property map must have 16 bitmap bytes, got {}",
            bitmap.len()
        )));
    }
    let mut epcs = BTreeSet::new();
    for (i, byte) in bitmap.iter().enumerate() {
        for j in 0..8u8 {
            if byte & (1 << j) != 0 {
                epcs.insert(0x80 + 0x10 * j + i as u8);
            }
        }
    }
    Ok(epcs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_form_roundtrips() {
        let epcs: BTreeSet<u8> = [0x80, 0x81, 0x8F, 0x93, 0xA0, 0xA3, 0xB0, 0xB3]
            .into_iter()
            .collect();
        let edt = encode(&epcs);
        assert_eq!(edt[0], epcs.len() as u8);
        assert_eq!(decode(&edt).unwrap(), epcs);
    }

    #[test]
    fn long_form_roundtrips_from_concrete_payload() {
        // count = 0x10 (16), byte 0 bit 0 set => EPC 0x80 only.
        let edt: Vec<u8> = {
            let mut v = vec![0x10u8];
            v.extend_from_slice(&[0u8; 16]);
            v[1] = 0x01;
            v
        };
        let decoded = decode(&edt).unwrap();
        assert_eq!(decoded, [0x80u8].into_iter().collect());
    }

    #[test]
    fn chooses_short_form_iff_at_most_15() {
        let small: BTreeSet<u8> = (0x80..0x80 + 15).collect();
        assert_eq!(encode(&small).len(), 1 + 15);
        let large: BTreeSet<u8> = (0x80..0x80 + 16).collect();
        assert_eq!(encode(&large).len(), 1 + 16);
    }

    #[test]
    fn roundtrips_every_subset_of_the_full_epc_space() {
        // Ship the codec with round-trip coverage over the full 128-EPC
        // space (0x80..=0xFF) rather than trusting the bit<->EPC mapping
        // by inspection; exhaustive subset enumeration is infeasible
        // (2^128), so this sweeps singletons, the full set, and a
        // deterministic sample of larger subsets instead.
        let universe: Vec<u8> = (0x80..=0xFFu8).collect();

        // Every singleton.
        for &epc in &universe {
            let set: BTreeSet<u8> = [epc].into_iter().collect();
            assert_eq!(decode(&encode(&set)).unwrap(), set);
        }

        // The full set (forces long form, all bitmap bytes fully set).
        let full: BTreeSet<u8> = universe.iter().copied().collect();
        assert_eq!(decode(&encode(&full)).unwrap(), full);

        // Deterministic pseudo-random-looking subsets at a few sizes
        // straddling the short/long-form boundary.
        for size in [1, 14, 15, 16, 17, 63, 64, 127, 128] {
            let subset: BTreeSet<u8> = universe
                .iter()
                .copied()
                .enumerate()
                .filter(|(i, _)| i % (128 / size.max(1)).max(1) == 0)
                .map(|(_, epc)| epc)
                .take(size)
                .collect();
            assert_eq!(decode(&encode(&subset)).unwrap(), subset);
        }
    }

    #[test]
    fn rejects_malformed_long_form() {
        let edt = vec![0x10u8, 0x00, 0x00];
        assert!(decode(&edt).is_err());
    }

    #[test]
    fn rejects_empty_payload() {
        assert!(decode(&[]).is_err());
    }
}
