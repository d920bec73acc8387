//! Hex JSON debug rendering (§4.A). This is a contract exercised by
//! round-trip tests, not just a `Debug` convenience: EHD1/EHD2 render as
//! two-digit upper-hex strings, and TID renders as a four-digit
//! upper-hex string in wire byte order (so `0x0100` renders `"0100"`,
//! matching the bytes actually sent, not the logical integer value).
//! [`frame_to_debug_json`] and [`frame_from_debug_json`] are the
//! round-trip pair: the parser only understands the fixed shape the
//! renderer produces, not JSON in general.

use crate::wire::eoj::Eoj;
use crate::wire::esv::Esv;
use crate::wire::frame::{EData, Ehd2, Format1Message, Frame, PropertyOp};

pub fn tid_to_hex(tid: u16) -> String {
    let [lo, hi] = tid.to_le_bytes();
    format!("{lo:02X}{hi:02X}")
}

pub fn tid_from_hex(hex: &str) -> Option<u16> {
    if hex.len() != 4 {
        return None;
    }
    let lo = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let hi = u8::from_str_radix(&hex[2..4], 16).ok()?;
    Some(u16::from_le_bytes([lo, hi]))
}

/// Render EHD1 (always `0x10`) as its two-digit upper-hex form.
pub fn ehd1_hex() -> &'static str {
    "10"
}

pub fn ehd2_hex(ehd2: Ehd2) -> &'static str {
    match ehd2 {
        Ehd2::Format1 => "81",
        Ehd2::Format2 => "82",
    }
}

/// Minimal hand-rolled JSON object string for the debug form; this
/// module has no serde dependency of its own since the contract is a
/// fixed handful of fields, not a general serialization surface.
pub fn frame_to_debug_json(frame: &Frame) -> String {
    let mut json = String::new();
    json.push('{');
    json.push_str(&format!("\"EHD1\":\"{}\",", ehd1_hex()));
    json.push_str(&format!("\"EHD2\":\"{}\",", ehd2_hex(frame.ehd2)));
    json.push_str(&format!("\"TID\":\"{}\",", tid_to_hex(frame.tid)));
    match &frame.edata {
        EData::Format1(msg) => {
            json.push_str(&format!(
                "\"SEOJ\":\"{:02X}{:02X}{:02X}\",",
                msg.seoj.class_group, msg.seoj.class, msg.seoj.instance
            ));
            json.push_str(&format!(
                "\"DEOJ\":\"{:02X}{:02X}{:02X}\",",
                msg.deoj.class_group, msg.deoj.class, msg.deoj.instance
            ));
            json.push_str(&format!("\"ESV\":\"{:02X}\",", msg.esv.code()));
            json.push_str("\"OPC\":\"");
            json.push_str(&ops_to_json(&msg.ops));
            json.push('"');
            if let Some(ops2) = &msg.ops2 {
                json.push_str(",\"OPC2\":\"");
                json.push_str(&ops_to_json(ops2));
                json.push('"');
            }
        }
        EData::Format2(payload) => {
            json.push_str("\"EDATA\":\"");
            for byte in payload {
                json.push_str(&format!("{byte:02X}"));
            }
            json.push('"');
        }
    }
    json.push('}');
    json
}

fn ops_to_json(ops: &[PropertyOp]) -> String {
    let mut s = String::new();
    s.push_str(&format!("{:02X}", ops.len()));
    for op in ops {
        s.push_str(&format!("{:02X}{:02X}", op.epc, op.pdc()));
        for byte in &op.edt {
            s.push_str(&format!("{byte:02X}"));
        }
    }
    s
}

/// Parse the debug form produced by [`frame_to_debug_json`] back into a
/// [`Frame`]. Returns `None` on anything that doesn't match the fixed
/// shape the renderer emits; this is not a general JSON parser.
pub fn frame_from_debug_json(json: &str) -> Option<Frame> {
    let tid = tid_from_hex(field(json, "TID")?)?;
    let ehd2 = match field(json, "EHD2")? {
        "81" => Ehd2::Format1,
        "82" => Ehd2::Format2,
        _ => return None,
    };
    match ehd2 {
        Ehd2::Format1 => {
            let seoj = eoj_from_hex(field(json, "SEOJ")?)?;
            let deoj = eoj_from_hex(field(json, "DEOJ")?)?;
            let esv = Esv::try_from(hex_byte(field(json, "ESV")?)?).ok()?;
            let ops = ops_from_hex(field(json, "OPC")?)?;
            let ops2 = if esv.is_set_get_family() {
                Some(ops_from_hex(field(json, "OPC2")?)?)
            } else {
                None
            };
            Some(Frame::format1(
                tid,
                Format1Message {
                    seoj,
                    deoj,
                    esv,
                    ops,
                    ops2,
                },
            ))
        }
        Ehd2::Format2 => {
            let payload = hex_bytes(field(json, "EDATA")?)?;
            Some(Frame::format2(tid, payload))
        }
    }
}

/// Find `"key":"value"` in `json` and return `value`'s raw (still-hex)
/// contents.
fn field<'a>(json: &'a str, key: &str) -> Option<&'a str> {
    let pat = format!("\"{key}\":\"");
    let start = json.find(&pat)? + pat.len();
    let rest = &json[start..];
    let end = rest.find('"')?;
    Some(&rest[..end])
}

fn hex_byte(s: &str) -> Option<u8> {
    u8::from_str_radix(s, 16).ok()
}

fn hex_bytes(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len()).step_by(2).map(|i| hex_byte(&s[i..i + 2])).collect()
}

fn eoj_from_hex(s: &str) -> Option<Eoj> {
    let bytes = hex_bytes(s)?;
    let [class_group, class, instance]: [u8; 3] = bytes.try_into().ok()?;
    Some(Eoj::new(class_group, class, instance))
}

fn ops_from_hex(s: &str) -> Option<Vec<PropertyOp>> {
    let bytes = hex_bytes(s)?;
    let mut iter = bytes.into_iter();
    let opc = iter.next()? as usize;
    let mut ops = Vec::with_capacity(opc);
    for _ in 0..opc {
        let epc = iter.next()?;
        let pdc = iter.next()? as usize;
        let edt: Vec<u8> = (0..pdc).map(|_| iter.next()).collect::<Option<_>>()?;
        ops.push(PropertyOp::new(epc, edt));
    }
    Some(ops)
}
