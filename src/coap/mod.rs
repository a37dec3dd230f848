//! CoAP message codec (RFC 7252).
//!
//! Two layers:
//!
//! * a light codec ([`MessageWriter`], [`option`], [`OptionIter`]) that writes
//!   straight into a caller buffer and scans options without allocating,
//! * a full [`Packet`] used by the LWM2M layer, with multi-value options,
//!   block options and a presence bitmap. It is built on the light codec.

use std::fmt;

mod block;
mod option;
mod packet;
mod writer;

pub use block::BlockInfo;
pub use option::{decode_int, option, OptionCursor, OptionIter};
pub use packet::Packet;
pub use writer::{calc_option_size, MessageWriter};

/// CoAP protocol version carried in every header.
pub const COAP_VERSION: u8 = 1;

/// Fixed header length.
pub const HEADER_LEN: usize = 4;

/// Longest token allowed.
pub const MAX_TOKEN_LEN: usize = 8;

/// Payload marker between options and payload.
pub const PAYLOAD_MARKER: u8 = 0xFF;

/// Largest datagram this stack builds or accepts.
pub const MAX_PACKET_SIZE: usize = 1024;

/// Default response timeout (RFC 7252 4.8).
pub const RESPONSE_TIMEOUT_SECS: u64 = 2;

/// Default max retransmissions of a CON message.
pub const MAX_RETRANSMIT: usize = 4;

/// `ACK_RANDOM_FACTOR` as a percentage.
pub const ACK_RANDOM_FACTOR_PERCENT: u64 = 150;

/// `MAX_TRANSMIT_WAIT` = RESPONSE_TIMEOUT * (2^(MAX_RETRANSMIT+1) - 1) * ACK_RANDOM_FACTOR.
pub const MAX_TRANSMIT_WAIT_SECS: u64 = 93;

/// `EXCHANGE_LIFETIME` (RFC 7252 4.8.2).
pub const EXCHANGE_LIFETIME_SECS: u64 = 247;

/// Message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Confirmable,
    NonConfirmable,
    Acknowledgement,
    Reset,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Self {
        match value & 0b11 {
            0 => MessageType::Confirmable,
            1 => MessageType::NonConfirmable,
            2 => MessageType::Acknowledgement,
            _ => MessageType::Reset,
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            MessageType::Confirmable => 0,
            MessageType::NonConfirmable => 1,
            MessageType::Acknowledgement => 2,
            MessageType::Reset => 3,
        }
    }
}

/// Request method or response code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    Empty,
    Get,
    Post,
    Put,
    Delete,
    Response(ResponseCode),
    Unknown(u8),
}

impl Code {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => Code::Empty,
            0x01 => Code::Get,
            0x02 => Code::Post,
            0x03 => Code::Put,
            0x04 => Code::Delete,
            _ => match ResponseCode::from_u8(value) {
                ResponseCode::Unknown(_) => Code::Unknown(value),
                code => Code::Response(code),
            },
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            Code::Empty => 0x00,
            Code::Get => 0x01,
            Code::Post => 0x02,
            Code::Put => 0x03,
            Code::Delete => 0x04,
            Code::Response(code) => code.as_u8(),
            Code::Unknown(value) => *value,
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self, Code::Get | Code::Post | Code::Put | Code::Delete)
            || matches!(self, Code::Unknown(v) if *v < 0x20 && *v != 0)
    }

    pub fn is_response(&self) -> bool {
        matches!(self, Code::Response(_))
            || matches!(self, Code::Unknown(v) if *v >= 0x40)
    }
}

impl From<ResponseCode> for Code {
    fn from(value: ResponseCode) -> Self {
        Code::Response(value)
    }
}

macro_rules! response_codes {
    ($($name:ident = ($class:expr, $detail:expr),)*) => {
        /// Response codes, `class.detail` packed as `class << 5 | detail`.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum ResponseCode {
            $($name,)*
            Unknown(u8),
        }

        impl ResponseCode {
            pub fn from_u8(value: u8) -> Self {
                match value {
                    $(v if v == (($class << 5) | $detail) => ResponseCode::$name,)*
                    _ => ResponseCode::Unknown(value),
                }
            }

            pub fn as_u8(&self) -> u8 {
                match self {
                    $(ResponseCode::$name => ($class << 5) | $detail,)*
                    ResponseCode::Unknown(value) => *value,
                }
            }
        }
    };
}

response_codes! {
    Created = (2, 1),
    Deleted = (2, 2),
    Valid = (2, 3),
    Changed = (2, 4),
    Content = (2, 5),
    Continue = (2, 31),
    BadRequest = (4, 0),
    Unauthorized = (4, 1),
    BadOption = (4, 2),
    Forbidden = (4, 3),
    NotFound = (4, 4),
    MethodNotAllowed = (4, 5),
    NotAcceptable = (4, 6),
    RequestEntityIncomplete = (4, 8),
    PreconditionFailed = (4, 12),
    RequestEntityTooLarge = (4, 13),
    UnsupportedContentFormat = (4, 15),
    InternalServerError = (5, 0),
    NotImplemented = (5, 1),
    BadGateway = (5, 2),
    ServiceUnavailable = (5, 3),
    GatewayTimeout = (5, 4),
    ProxyingNotSupported = (5, 5),
}

impl ResponseCode {
    pub fn class(&self) -> u8 {
        self.as_u8() >> 5
    }

    pub fn detail(&self) -> u8 {
        self.as_u8() & 0x1F
    }

    pub fn is_success(&self) -> bool {
        self.class() == 2
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.class(), self.detail())
    }
}

/// Option number. Odd numbers are critical.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OptionNumber(pub u16);

impl OptionNumber {
    pub const IF_MATCH: OptionNumber = OptionNumber(1);
    pub const URI_HOST: OptionNumber = OptionNumber(3);
    pub const ETAG: OptionNumber = OptionNumber(4);
    pub const IF_NONE_MATCH: OptionNumber = OptionNumber(5);
    pub const OBSERVE: OptionNumber = OptionNumber(6);
    pub const URI_PORT: OptionNumber = OptionNumber(7);
    pub const LOCATION_PATH: OptionNumber = OptionNumber(8);
    pub const URI_PATH: OptionNumber = OptionNumber(11);
    pub const CONTENT_FORMAT: OptionNumber = OptionNumber(12);
    pub const MAX_AGE: OptionNumber = OptionNumber(14);
    pub const URI_QUERY: OptionNumber = OptionNumber(15);
    pub const ACCEPT: OptionNumber = OptionNumber(17);
    pub const LOCATION_QUERY: OptionNumber = OptionNumber(20);
    pub const BLOCK2: OptionNumber = OptionNumber(23);
    pub const BLOCK1: OptionNumber = OptionNumber(27);
    pub const SIZE2: OptionNumber = OptionNumber(28);
    pub const PROXY_URI: OptionNumber = OptionNumber(35);
    pub const PROXY_SCHEME: OptionNumber = OptionNumber(39);
    pub const SIZE1: OptionNumber = OptionNumber(60);

    pub fn is_critical(&self) -> bool {
        self.0 & 1 == 1
    }
}

/// Content formats used by LWM2M 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentFormat {
    Text,
    LinkFormat,
    Opaque,
    Tlv,
    Json,
    /// The pre-registration TLV number some servers still send.
    OldTlv,
    Unknown(u16),
}

impl ContentFormat {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => ContentFormat::Text,
            40 => ContentFormat::LinkFormat,
            42 => ContentFormat::Opaque,
            11542 => ContentFormat::Tlv,
            11543 => ContentFormat::Json,
            1542 => ContentFormat::OldTlv,
            _ => ContentFormat::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            ContentFormat::Text => 0,
            ContentFormat::LinkFormat => 40,
            ContentFormat::Opaque => 42,
            ContentFormat::Tlv => 11542,
            ContentFormat::Json => 11543,
            ContentFormat::OldTlv => 1542,
            ContentFormat::Unknown(value) => *value,
        }
    }
}
