use indexmap::IndexMap;

pub mod amf0_markers {
    pub const NUMBER: u8 = 0x00;
    pub const BOOLEAN: u8 = 0x01;
    pub const STRING: u8 = 0x02;
    pub const OBJECT: u8 = 0x03;
    pub const NULL: u8 = 0x05;
    pub const UNDEFINED: u8 = 0x06;
    pub const ECMA_ARRAY: u8 = 0x08;
    pub const OBJECT_END: u8 = 0x09;
    pub const STRICT_ARRAY: u8 = 0x0a;
    pub const DATE: u8 = 0x0b;
    pub const LONG_STRING: u8 = 0x0c;
}

/// One decoded AMF0 value. Object and ECMA array keys keep wire order.
#[derive(Debug, Clone, PartialEq)]
pub enum Amf0ValueType {
    Number(f64),
    Boolean(bool),
    UTF8String(String),
    Object(IndexMap<String, Amf0ValueType>),
    Null,
    Undefined,
    EcmaArray(IndexMap<String, Amf0ValueType>),
    StrictArray(Vec<Amf0ValueType>),
    Date { unix_time_ms: f64, time_zone: i16 },
    LongUTF8String(String),
    END,
}

impl Amf0ValueType {
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::UTF8String(s) | Self::LongUTF8String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Properties of an object or ECMA array.
    #[must_use]
    pub const fn as_properties(&self) -> Option<&IndexMap<String, Self>> {
        match self {
            Self::Object(props) | Self::EcmaArray(props) => Some(props),
            _ => None,
        }
    }
}
