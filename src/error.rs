use std::io;

use thiserror::Error;

use crate::coap::ResponseCode;
use crate::dtls::Alert;

/// Errors surfaced by the public API.
///
/// Every variant maps to a stable negative integer through [`Error::code`],
/// so embedded callers that only look at a number can still tell them apart.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("Bad parameter: {0}")]
    BadParameter(&'static str),

    #[error("Out of memory")]
    NoMemory,

    #[error("Not supported")]
    NotSupported,

    #[error("Not found")]
    NotFound,

    #[error("Socket error: {0:?}")]
    Socket(io::ErrorKind),

    #[error("Timed out")]
    Timeout,

    #[error("Invalid URI")]
    InvalidUri,

    #[error("Registration failed")]
    RegistrationFailed,

    #[error("Not registered")]
    NotRegistered,

    #[error("Server reset")]
    ServerReset,

    #[error("Already registered")]
    AlreadyRegistered,

    #[error("Pending")]
    Pending,

    #[error("Buffer too small, need {need} have {have}")]
    BufferTooSmall { need: usize, have: usize },

    #[error("Parse error: {0}")]
    Parse(&'static str),

    #[error("Receive queue full")]
    ReceiveQueueFull,

    #[error("DTLS alert {0}")]
    Alert(Alert),

    #[error("CoAP {0}")]
    Coap(ResponseCode),
}

impl Error {
    /// Numeric error code in the negative range used by the C-style API.
    pub fn code(&self) -> i32 {
        match self {
            Error::BadParameter(_) => -1,
            Error::NoMemory => -2,
            Error::NotSupported => -3,
            Error::NotFound => -4,
            Error::Socket(_) => -5,
            Error::Timeout => -6,
            Error::InvalidUri => -7,
            Error::RegistrationFailed => -8,
            Error::NotRegistered => -9,
            Error::ServerReset => -10,
            Error::AlreadyRegistered => -11,
            Error::Pending => -12,
            Error::BufferTooSmall { .. } => -13,
            Error::Parse(_) => -14,
            Error::ReceiveQueueFull => -15,
            Error::Alert(alert) => alert.code(),
            Error::Coap(code) => -(code.as_u8() as i32),
        }
    }

    pub(crate) fn too_small(need: usize, have: usize) -> Self {
        Error::BufferTooSmall { need, have }
    }
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Error::Socket(value.kind())
    }
}

impl<'a> From<nom::Err<nom::error::Error<&'a [u8]>>> for Error {
    fn from(value: nom::Err<nom::error::Error<&'a [u8]>>) -> Self {
        match value {
            nom::Err::Incomplete(_) => Error::Parse("incomplete"),
            nom::Err::Error(_) | nom::Err::Failure(_) => Error::Parse("malformed"),
        }
    }
}
