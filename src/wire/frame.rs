use bytes::{BufMut, BytesMut};

use crate::error::CodecError;
use crate::wire::eoj::Eoj;
use crate::wire::esv::Esv;

pub const EHD1: u8 = 0x10;

/// ECHONET Lite header byte 2: which of the two coexisting frame formats
/// the EDATA payload is encoded in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Ehd2 {
    Format1 = 0x81,
    Format2 = 0x82,
}

impl TryFrom<u8> for Ehd2 {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x81 => Ok(Ehd2::Format1),
            0x82 => Ok(Ehd2::Format2),
            other => Err(CodecError::InvalidEhd2(other)),
        }
    }
}

/// A single property operation: an EPC and its EDT payload. An empty
/// `edt` means PDC = 0 on the wire (used for read requests that only
/// name the property being asked for).
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PropertyOp {
    pub epc: u8,
    pub edt: Vec<u8>,
}

impl PropertyOp {
    pub fn new(epc: u8, edt: impl Into<Vec<u8>>) -> Self {
        Self {
            epc,
            edt: edt.into(),
        }
    }

    /// A property operation naming only an EPC, PDC = 0, no EDT: the
    /// shape used by Get requests and by echoed-back rejections.
    pub fn epc_only(epc: u8) -> Self {
        Self {
            epc,
            edt: Vec::new(),
        }
    }

    pub fn pdc(&self) -> u8 {
        // Callers never build an op with > 255 EDT bytes; property sizes
        // are bounded well under that by the object-spec catalog.
        self.edt.len() as u8
    }
}

/// The Format-1 (structured) EDATA payload: SEOJ, DEOJ, ESV, and one or
/// two operation lists.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Format1Message {
    pub seoj: Eoj,
    pub deoj: Eoj,
    pub esv: Esv,
    pub ops: Vec<PropertyOp>,
    /// Present only for SetGet-family ESVs: the get-list that follows
    /// the set-list (`ops`) on the wire.
    pub ops2: Option<Vec<PropertyOp>>,
}

impl Format1Message {
    pub fn single(seoj: Eoj, deoj: Eoj, esv: Esv, ops: Vec<PropertyOp>) -> Self {
        Self {
            seoj,
            deoj,
            esv,
            ops,
            ops2: None,
        }
    }

    pub fn set_get(seoj: Eoj, deoj: Eoj, esv: Esv, set_ops: Vec<PropertyOp>, get_ops: Vec<PropertyOp>) -> Self {
        Self {
            seoj,
            deoj,
            esv,
            ops: set_ops,
            ops2: Some(get_ops),
        }
    }
}

/// The EDATA payload, tagged by which frame format produced it.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum EData {
    Format1(Format1Message),
    /// Opaque bytes; Format-2 subprofiles are handled outside this core.
    Format2(Vec<u8>),
}

/// A complete ECHONET Lite frame: EHD1 (implicit, always 0x10), EHD2,
/// TID, and EDATA.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Frame {
    pub ehd2: Ehd2,
    pub tid: u16,
    pub edata: EData,
}

impl Frame {
    /// Construct a frame, failing if `ehd2` disagrees with the EDATA
    /// variant (§3 invariant).
    pub fn new(ehd2: Ehd2, tid: u16, edata: EData) -> Result<Self, CodecError> {
        let agrees = matches!(
            (ehd2, &edata),
            (Ehd2::Format1, EData::Format1(_)) | (Ehd2::Format2, EData::Format2(_))
        );
        if !agrees {
            return Err(CodecError::EhdEdataMismatch);
        }
        Ok(Self { ehd2, tid, edata })
    }

    pub fn format1(tid: u16, msg: Format1Message) -> Self {
        Self {
            ehd2: Ehd2::Format1,
            tid,
            edata: EData::Format1(msg),
        }
    }

    pub fn format2(tid: u16, payload: Vec<u8>) -> Self {
        Self {
            ehd2: Ehd2::Format2,
            tid,
            edata: EData::Format2(payload),
        }
    }

    pub fn as_format1(&self) -> Option<&Format1Message> {
        match &self.edata {
            EData::Format1(msg) => Some(msg),
            EData::Format2(_) => None,
        }
    }

    /// Serialize this frame into `buf`, returning the number of bytes
    /// written.
    pub fn serialize(&self, buf: &mut BytesMut) -> Result<usize, CodecError> {
        match &self.edata {
            EData::Format1(msg) => serialize_format1(
                buf,
                self.tid,
                msg.seoj,
                msg.deoj,
                msg.esv,
                &msg.ops,
                msg.ops2.as_deref(),
            ),
            EData::Format2(payload) => {
                let start = buf.len();
                buf.put_u8(EHD1);
                buf.put_u8(Ehd2::Format2 as u8);
                buf.put_slice(&self.tid.to_le_bytes());
                buf.put_slice(payload);
                Ok(buf.len() - start)
            }
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let mut buf = BytesMut::new();
        self.serialize(&mut buf)?;
        Ok(buf.to_vec())
    }

    /// Parse a complete frame out of `bytes`. Returns an error (never
    /// panics) on any length underrun, OPC mismatch, or unknown EHD.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut cursor = Cursor::new(bytes);
        let ehd1 = cursor.take_u8()?;
        if ehd1 != EHD1 {
            return Err(CodecError::InvalidEhd1(ehd1));
        }
        let ehd2 = Ehd2::try_from(cursor.take_u8()?)?;
        let tid = cursor.take_u16_le()?;
        let edata = match ehd2 {
            Ehd2::Format1 => EData::Format1(deserialize_format1_body(&mut cursor)?),
            Ehd2::Format2 => EData::Format2(cursor.take_rest().to_vec()),
        };
        Ok(Self { ehd2, tid, edata })
    }
}

/// Inputs: output buffer, TID, SEOJ, DEOJ, ESV, and either one property
/// list (for single-list ESVs) or two lists (SetGet-family, via
/// `ops2`). Output: number of bytes written.
pub fn serialize_format1(
    buf: &mut BytesMut,
    tid: u16,
    seoj: Eoj,
    deoj: Eoj,
    esv: Esv,
    ops: &[PropertyOp],
    ops2: Option<&[PropertyOp]>,
) -> Result<usize, CodecError> {
    if ops.len() > 255 {
        return Err(CodecError::TooManyOperations(ops.len()));
    }
    if let Some(list) = ops2 {
        if list.len() > 255 {
            return Err(CodecError::TooManyOperations(list.len()));
        }
    }
    if esv.is_set_get_family() != ops2.is_some() {
        return Err(CodecError::EhdEdataMismatch);
    }

    let start = buf.len();
    buf.put_u8(EHD1);
    buf.put_u8(Ehd2::Format1 as u8);
    buf.put_slice(&tid.to_le_bytes());
    buf.put_slice(&seoj.to_bytes());
    buf.put_slice(&deoj.to_bytes());
    buf.put_u8(esv.code());
    write_op_list(buf, ops);
    if let Some(list) = ops2 {
        write_op_list(buf, list);
    }
    Ok(buf.len() - start)
}

fn write_op_list(buf: &mut BytesMut, ops: &[PropertyOp]) {
    buf.put_u8(ops.len() as u8);
    for op in ops {
        buf.put_u8(op.epc);
        buf.put_u8(op.pdc());
        buf.put_slice(&op.edt);
    }
}

fn deserialize_format1_body(cursor: &mut Cursor<'_>) -> Result<Format1Message, CodecError> {
    let seoj = Eoj::from_bytes(cursor.take_array::<3>()?);
    let deoj = Eoj::from_bytes(cursor.take_array::<3>()?);
    let esv = Esv::try_from(cursor.take_u8()?)?;
    let ops = read_op_list(cursor)?;
    let ops2 = if esv.is_set_get_family() {
        Some(read_op_list(cursor)?)
    } else {
        None
    };
    Ok(Format1Message {
        seoj,
        deoj,
        esv,
        ops,
        ops2,
    })
}

fn read_op_list(cursor: &mut Cursor<'_>) -> Result<Vec<PropertyOp>, CodecError> {
    let opc = cursor.take_u8()?;
    let mut ops = Vec::with_capacity(opc as usize);
    for _ in 0..opc {
        let epc = cursor.take_u8()?;
        let pdc = cursor.take_u8()?;
        let edt = cursor.take_n(pdc as usize)?.to_vec();
        ops.push(PropertyOp { epc, edt });
    }
    Ok(ops)
}

/// Minimal forward-only byte cursor. `bytes::Buf` silently panics on
/// underrun (it's built for trusted/internal framing); this codec must
/// turn the same condition into a `CodecError` since its input comes
/// straight off the wire, so a small hand-rolled cursor is used instead.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn require(&self, n: usize) -> Result<(), CodecError> {
        if self.remaining() < n {
            return Err(CodecError::UnexpectedEof {
                needed: n,
                have: self.remaining(),
            });
        }
        Ok(())
    }

    fn take_u8(&mut self) -> Result<u8, CodecError> {
        self.require(1)?;
        let b = self.bytes[self.pos];
        self.pos += 1;
        Ok(b)
    }

    fn take_u16_le(&mut self) -> Result<u16, CodecError> {
        let bytes = self.take_array::<2>()?;
        Ok(u16::from_le_bytes(bytes))
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        self.require(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[self.pos..self.pos + N]);
        self.pos += N;
        Ok(out)
    }

    fn take_n(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        self.require(n)?;
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_rest(&mut self) -> &'a [u8] {
        let slice = &self.bytes[self.pos..];
        self.pos = self.bytes.len();
        slice
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_seti_matches_spec_example() {
        let msg = Format1Message::single(
            Eoj::new(0x0E, 0xF0, 0x01),
            Eoj::new(0x05, 0xFF, 0x01),
            Esv::SetI,
            vec![PropertyOp::new(0x80, vec![0x30])],
        );
        let frame = Frame::format1(0x0001, msg);
        let bytes = frame.to_bytes().unwrap();
        assert_eq!(
            bytes,
            vec![
                0x10, 0x81, 0x01, 0x00, 0x0E, 0xF0, 0x01, 0x05, 0xFF, 0x01, 0x60, 0x01, 0x80,
                0x01, 0x30
            ]
        );
    }

    #[test]
    fn serialize_get_request_matches_spec_example() {
        let msg = Format1Message::single(
            Eoj::new(0x0E, 0xF0, 0x01),
            Eoj::new(0x0E, 0xF0, 0x01),
            Esv::Get,
            vec![
                PropertyOp::epc_only(0x9D),
                PropertyOp::epc_only(0x9E),
                PropertyOp::epc_only(0x9F),
            ],
        );
        let frame = Frame::format1(0x1234, msg);
        let bytes = frame.to_bytes().unwrap();
        assert_eq!(
            bytes,
            vec![
                0x10, 0x81, 0x34, 0x12, 0x0E, 0xF0, 0x01, 0x0E, 0xF0, 0x01, 0x62, 0x03, 0x9D,
                0x00, 0x9E, 0x00, 0x9F, 0x00
            ]
        );
    }

    #[test]
    fn roundtrips_single_list_frame() {
        let msg = Format1Message::single(
            Eoj::new(0x01, 0x30, 0x01),
            Eoj::new(0x05, 0xFF, 0x01),
            Esv::GetRes,
            vec![PropertyOp::new(0x80, vec![0x30]), PropertyOp::new(0xE0, vec![])],
        );
        let frame = Frame::format1(0xABCD, msg);
        let bytes = frame.to_bytes().unwrap();
        let back = Frame::deserialize(&bytes).unwrap();
        assert_eq!(frame, back);
    }

    #[test]
    fn roundtrips_set_get_frame() {
        let msg = Format1Message::set_get(
            Eoj::new(0x05, 0xFF, 0x01),
            Eoj::new(0x01, 0x30, 0x01),
            Esv::SetGet,
            vec![PropertyOp::new(0x80, vec![0x30])],
            vec![PropertyOp::epc_only(0x9F)],
        );
        let frame = Frame::format1(0x0002, msg);
        let bytes = frame.to_bytes().unwrap();
        let back = Frame::deserialize(&bytes).unwrap();
        assert_eq!(frame, back);
    }

    #[test]
    fn roundtrips_format2_frame() {
        let frame = Frame::format2(0x0009, vec![0xDE, 0xAD, 0xBE, 0xEF]);
        let bytes = frame.to_bytes().unwrap();
        let back = Frame::deserialize(&bytes).unwrap();
        assert_eq!(frame, back);
    }

    #[test]
    fn rejects_short_buffer() {
        let bytes = [0x10, 0x81, 0x00];
        assert!(Frame::deserialize(&bytes).is_err());
    }

    #[test]
    fn rejects_bad_ehd1() {
        let bytes = [0x11, 0x81, 0, 0, 0, 0, 0, 0, 0, 0, 0x62, 0];
        assert!(matches!(
            Frame::deserialize(&bytes),
            Err(CodecError::InvalidEhd1(0x11))
        ));
    }

    #[test]
    fn construction_fails_on_ehd_edata_mismatch() {
        let msg = Format1Message::single(
            Eoj::new(0x0E, 0xF0, 0x01),
            Eoj::new(0x05, 0xFF, 0x01),
            Esv::Get,
            vec![],
        );
        let err = Frame::new(Ehd2::Format2, 1, EData::Format1(msg)).unwrap_err();
        assert_eq!(err, CodecError::EhdEdataMismatch);
    }

    #[test]
    fn rejects_too_many_operations() {
        let ops: Vec<PropertyOp> = (0..=255).map(|i| PropertyOp::epc_only(i as u8)).collect();
        let mut buf = BytesMut::new();
        let err = serialize_format1(
            &mut buf,
            1,
            Eoj::new(0x0E, 0xF0, 0x01),
            Eoj::new(0x05, 0xFF, 0x01),
            Esv::Get,
            &ops,
            None,
        )
        .unwrap_err();
        assert_eq!(err, CodecError::TooManyOperations(256));
    }
}
