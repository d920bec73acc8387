use crate::error::CodecError;

/// ECHONET Lite service code (ESV), one wire byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Esv {
    SetI = 0x60,
    SetC = 0x61,
    Get = 0x62,
    InfReq = 0x63,
    SetGet = 0x6E,
    SetRes = 0x71,
    GetRes = 0x72,
    Inf = 0x73,
    InfC = 0x74,
    InfCRes = 0x7A,
    SetGetRes = 0x7E,
    SetISna = 0x50,
    SetCSna = 0x51,
    GetSna = 0x52,
    InfSna = 0x53,
    SetGetSna = 0x5E,
}

impl Esv {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Whether this ESV carries two operation lists (set-list, get-list)
    /// rather than a single one.
    pub fn is_set_get_family(self) -> bool {
        matches!(self, Esv::SetGet | Esv::SetGetRes | Esv::SetGetSna)
    }

    /// Whether this ESV is a service-not-available failure variant.
    pub fn is_sna(self) -> bool {
        matches!(
            self,
            Esv::SetISna | Esv::SetCSna | Esv::GetSna | Esv::InfSna | Esv::SetGetSna
        )
    }
}

impl TryFrom<u8> for Esv {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x60 => Esv::SetI,
            0x61 => Esv::SetC,
            0x62 => Esv::Get,
            0x63 => Esv::InfReq,
            0x6E => Esv::SetGet,
            0x71 => Esv::SetRes,
            0x72 => Esv::GetRes,
            0x73 => Esv::Inf,
            0x74 => Esv::InfC,
            0x7A => Esv::InfCRes,
            0x7E => Esv::SetGetRes,
            0x50 => Esv::SetISna,
            0x51 => Esv::SetCSna,
            0x52 => Esv::GetSna,
            0x53 => Esv::InfSna,
            0x5E => Esv::SetGetSna,
            other => return Err(CodecError::UnknownEsv(other)),
        })
    }
}
