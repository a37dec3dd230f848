//! Handshake message parsing and serialization.
//!
//! Only what `TLS_ECDHE_ECDSA_WITH_AES_128_CCM_8` with raw public keys
//! needs is modelled. Every message has a `parse`/`serialize` pair, parsing
//! is done with nom and never panics on hostile input.

mod hello;
mod key_exchange;

pub use hello::{ClientHello, HelloVerifyRequest, ServerHello};
pub use key_exchange::{
    Certificate, CertificateRequest, CertificateVerify, ClientKeyExchange, EcdhParams, Finished,
    ServerKeyExchange,
};

use nom::bytes::complete::take;
use nom::error::{Error, ErrorKind};
use nom::number::complete::{be_u16, be_u24, be_u32, be_u8};
use nom::{Err, IResult};
use tinyvec::ArrayVec;

use crate::bytes::put_u24;

/// TLS_ECDHE_ECDSA_WITH_AES_128_CCM_8
pub const CIPHER_SUITE: u16 = 0xC0AE;

/// secp256r1
pub const NAMED_CURVE_P256: u16 = 23;

/// `named_curve` ECParameters curve type.
pub const CURVE_TYPE_NAMED: u8 = 3;

/// ecdsa_secp256r1_sha256 as TLS 1.2 SignatureAndHashAlgorithm.
pub const SIGNATURE_ECDSA_SHA256: u16 = 0x0403;

/// ClientCertificateType ecdsa_sign.
pub const CERT_TYPE_ECDSA_SIGN: u8 = 64;

/// RFC 7250 certificate type.
pub const CERT_TYPE_RAW_PUBLIC_KEY: u8 = 2;

pub const COMPRESSION_NULL: u8 = 0;

pub const VERIFY_DATA_LEN: usize = 12;

pub mod extension {
    pub const SUPPORTED_GROUPS: u16 = 10;
    pub const EC_POINT_FORMATS: u16 = 11;
    pub const SIGNATURE_ALGORITHMS: u16 = 13;
    pub const CLIENT_CERTIFICATE_TYPE: u16 = 19;
    pub const SERVER_CERTIFICATE_TYPE: u16 = 20;
}

fn fail<T>(input: &[u8], kind: ErrorKind) -> IResult<&[u8], T> {
    Err(Err::Failure(Error::new(input, kind)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeType {
    HelloRequest,
    ClientHello,
    ServerHello,
    HelloVerifyRequest,
    Certificate,
    ServerKeyExchange,
    CertificateRequest,
    ServerHelloDone,
    CertificateVerify,
    ClientKeyExchange,
    Finished,
    Unknown(u8),
}

impl HandshakeType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => HandshakeType::HelloRequest,
            1 => HandshakeType::ClientHello,
            2 => HandshakeType::ServerHello,
            3 => HandshakeType::HelloVerifyRequest,
            11 => HandshakeType::Certificate,
            12 => HandshakeType::ServerKeyExchange,
            13 => HandshakeType::CertificateRequest,
            14 => HandshakeType::ServerHelloDone,
            15 => HandshakeType::CertificateVerify,
            16 => HandshakeType::ClientKeyExchange,
            20 => HandshakeType::Finished,
            _ => HandshakeType::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            HandshakeType::HelloRequest => 0,
            HandshakeType::ClientHello => 1,
            HandshakeType::ServerHello => 2,
            HandshakeType::HelloVerifyRequest => 3,
            HandshakeType::Certificate => 11,
            HandshakeType::ServerKeyExchange => 12,
            HandshakeType::CertificateRequest => 13,
            HandshakeType::ServerHelloDone => 14,
            HandshakeType::CertificateVerify => 15,
            HandshakeType::ClientKeyExchange => 16,
            HandshakeType::Finished => 20,
            HandshakeType::Unknown(value) => *value,
        }
    }
}

/// The 12 byte DTLS handshake header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub msg_type: HandshakeType,
    pub length: u32,
    pub message_seq: u16,
    pub fragment_offset: u32,
    pub fragment_length: u32,
}

impl Header {
    pub const LEN: usize = 12;

    /// Header of an unfragmented message.
    pub fn whole(msg_type: HandshakeType, message_seq: u16, length: usize) -> Self {
        Header {
            msg_type,
            length: length as u32,
            message_seq,
            fragment_offset: 0,
            fragment_length: length as u32,
        }
    }

    pub fn is_fragment(&self) -> bool {
        self.fragment_offset != 0 || self.fragment_length != self.length
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Header> {
        let (input, msg_type) = be_u8(input)?;
        let (input, length) = be_u24(input)?;
        let (input, message_seq) = be_u16(input)?;
        let (input, fragment_offset) = be_u24(input)?;
        let (input, fragment_length) = be_u24(input)?;

        if fragment_offset as u64 + fragment_length as u64 > length as u64 {
            return fail(input, ErrorKind::LengthValue);
        }

        Ok((
            input,
            Header {
                msg_type: HandshakeType::from_u8(msg_type),
                length,
                message_seq,
                fragment_offset,
                fragment_length,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.push(self.msg_type.as_u8());
        put_u24(output, self.length);
        output.extend_from_slice(&self.message_seq.to_be_bytes());
        put_u24(output, self.fragment_offset);
        put_u24(output, self.fragment_length);
    }
}

/// One handshake fragment as it sits in a record.
pub fn parse_fragment(input: &[u8]) -> IResult<&[u8], (Header, &[u8])> {
    let (input, header) = Header::parse(input)?;
    let (input, body) = take(header.fragment_length as usize)(input)?;
    Ok((input, (header, body)))
}

/// `gmt_unix_time(4) ‖ random_bytes(28)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Random {
    pub gmt_unix_time: u32,
    pub random_bytes: [u8; 28],
}

impl Random {
    pub fn parse(input: &[u8]) -> IResult<&[u8], Random> {
        let (input, gmt_unix_time) = be_u32(input)?;
        let (input, bytes) = take(28usize)(input)?;
        let mut random_bytes = [0u8; 28];
        random_bytes.copy_from_slice(bytes);
        Ok((
            input,
            Random {
                gmt_unix_time,
                random_bytes,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&self.gmt_unix_time.to_be_bytes());
        output.extend_from_slice(&self.random_bytes);
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out[..4].copy_from_slice(&self.gmt_unix_time.to_be_bytes());
        out[4..].copy_from_slice(&self.random_bytes);
        out
    }
}

/// Length-prefixed opaque of at most 32 bytes: session ids and cookies.
pub type Opaque32 = ArrayVec<[u8; 32]>;

pub type SessionId = Opaque32;
pub type Cookie = Opaque32;

pub(crate) fn parse_opaque32(input: &[u8]) -> IResult<&[u8], Opaque32> {
    let (input, len) = be_u8(input)?;
    if len > 32 {
        return fail(input, ErrorKind::LengthValue);
    }
    let (input, bytes) = take(len as usize)(input)?;
    let mut out = ArrayVec::new();
    out.extend_from_slice(bytes);
    Ok((input, out))
}

pub(crate) fn serialize_opaque8(bytes: &[u8], output: &mut Vec<u8>) {
    output.push(bytes.len() as u8);
    output.extend_from_slice(bytes);
}

pub(crate) fn serialize_opaque16(bytes: &[u8], output: &mut Vec<u8>) {
    output.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    output.extend_from_slice(bytes);
}

/// A hello extension. Unknown ones are kept and ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    pub extension_type: u16,
    pub data: Vec<u8>,
}

impl Extension {
    pub fn new(extension_type: u16, data: Vec<u8>) -> Self {
        Extension {
            extension_type,
            data,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Extension> {
        let (input, extension_type) = be_u16(input)?;
        let (input, len) = be_u16(input)?;
        let (input, data) = take(len as usize)(input)?;
        Ok((input, Extension::new(extension_type, data.to_vec())))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&self.extension_type.to_be_bytes());
        serialize_opaque16(&self.data, output);
    }
}

/// Optional extension block at the end of a hello.
pub(crate) fn parse_extensions(input: &[u8]) -> IResult<&[u8], Vec<Extension>> {
    if input.is_empty() {
        return Ok((input, Vec::new()));
    }
    let (input, len) = be_u16(input)?;
    let (input, mut block) = take(len as usize)(input)?;
    let mut out = Vec::new();
    while !block.is_empty() {
        let (rest, ext) = Extension::parse(block)?;
        out.push(ext);
        block = rest;
    }
    Ok((input, out))
}

pub(crate) fn serialize_extensions(extensions: &[Extension], output: &mut Vec<u8>) {
    if extensions.is_empty() {
        return;
    }
    let mut block = Vec::new();
    for e in extensions {
        e.serialize(&mut block);
    }
    serialize_opaque16(&block, output);
}

pub(crate) fn find_extension(extensions: &[Extension], extension_type: u16) -> Option<&[u8]> {
    extensions
        .iter()
        .find(|e| e.extension_type == extension_type)
        .map(|e| e.data.as_slice())
}

/// A complete, reassembled handshake message.
#[derive(Debug, PartialEq, Eq)]
pub enum Body {
    HelloRequest,
    ClientHello(ClientHello),
    ServerHello(ServerHello),
    HelloVerifyRequest(HelloVerifyRequest),
    Certificate(Certificate),
    ServerKeyExchange(ServerKeyExchange),
    CertificateRequest(CertificateRequest),
    ServerHelloDone,
    CertificateVerify(CertificateVerify),
    ClientKeyExchange(ClientKeyExchange),
    Finished(Finished),
}

impl Body {
    pub fn msg_type(&self) -> HandshakeType {
        match self {
            Body::HelloRequest => HandshakeType::HelloRequest,
            Body::ClientHello(_) => HandshakeType::ClientHello,
            Body::ServerHello(_) => HandshakeType::ServerHello,
            Body::HelloVerifyRequest(_) => HandshakeType::HelloVerifyRequest,
            Body::Certificate(_) => HandshakeType::Certificate,
            Body::ServerKeyExchange(_) => HandshakeType::ServerKeyExchange,
            Body::CertificateRequest(_) => HandshakeType::CertificateRequest,
            Body::ServerHelloDone => HandshakeType::ServerHelloDone,
            Body::CertificateVerify(_) => HandshakeType::CertificateVerify,
            Body::ClientKeyExchange(_) => HandshakeType::ClientKeyExchange,
            Body::Finished(_) => HandshakeType::Finished,
        }
    }

    /// Parse a whole message body. Trailing bytes are an error.
    pub fn parse(msg_type: HandshakeType, input: &[u8]) -> IResult<&[u8], Body> {
        let (rest, body) = match msg_type {
            HandshakeType::HelloRequest => (input, Body::HelloRequest),
            HandshakeType::ClientHello => {
                let (i, m) = ClientHello::parse(input)?;
                (i, Body::ClientHello(m))
            }
            HandshakeType::ServerHello => {
                let (i, m) = ServerHello::parse(input)?;
                (i, Body::ServerHello(m))
            }
            HandshakeType::HelloVerifyRequest => {
                let (i, m) = HelloVerifyRequest::parse(input)?;
                (i, Body::HelloVerifyRequest(m))
            }
            HandshakeType::Certificate => {
                let (i, m) = Certificate::parse(input)?;
                (i, Body::Certificate(m))
            }
            HandshakeType::ServerKeyExchange => {
                let (i, m) = ServerKeyExchange::parse(input)?;
                (i, Body::ServerKeyExchange(m))
            }
            HandshakeType::CertificateRequest => {
                let (i, m) = CertificateRequest::parse(input)?;
                (i, Body::CertificateRequest(m))
            }
            HandshakeType::ServerHelloDone => (input, Body::ServerHelloDone),
            HandshakeType::CertificateVerify => {
                let (i, m) = CertificateVerify::parse(input)?;
                (i, Body::CertificateVerify(m))
            }
            HandshakeType::ClientKeyExchange => {
                let (i, m) = ClientKeyExchange::parse(input)?;
                (i, Body::ClientKeyExchange(m))
            }
            HandshakeType::Finished => {
                let (i, m) = Finished::parse(input)?;
                (i, Body::Finished(m))
            }
            HandshakeType::Unknown(_) => return fail(input, ErrorKind::Switch),
        };
        if !rest.is_empty() {
            return fail(rest, ErrorKind::Eof);
        }
        Ok((rest, body))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        match self {
            Body::HelloRequest | Body::ServerHelloDone => {}
            Body::ClientHello(m) => m.serialize(output),
            Body::ServerHello(m) => m.serialize(output),
            Body::HelloVerifyRequest(m) => m.serialize(output),
            Body::Certificate(m) => m.serialize(output),
            Body::ServerKeyExchange(m) => m.serialize(output),
            Body::CertificateRequest(m) => m.serialize(output),
            Body::CertificateVerify(m) => m.serialize(output),
            Body::ClientKeyExchange(m) => m.serialize(output),
            Body::Finished(m) => m.serialize(output),
        }
    }

    /// Header plus body as it goes on the wire and into the transcript.
    pub fn to_message(&self, message_seq: u16) -> Vec<u8> {
        let mut body = Vec::new();
        self.serialize(&mut body);
        let mut out = Vec::with_capacity(Header::LEN + body.len());
        Header::whole(self.msg_type(), message_seq, body.len()).serialize(&mut out);
        out.extend_from_slice(&body);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let h = Header {
            msg_type: HandshakeType::Certificate,
            length: 300,
            message_seq: 2,
            fragment_offset: 100,
            fragment_length: 50,
        };
        let mut out = Vec::new();
        h.serialize(&mut out);
        assert_eq!(out.len(), Header::LEN);
        let (rest, parsed) = Header::parse(&out).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, h);
        assert!(parsed.is_fragment());
    }

    #[test]
    fn fragment_past_length() {
        let h = Header {
            msg_type: HandshakeType::Certificate,
            length: 10,
            message_seq: 0,
            fragment_offset: 8,
            fragment_length: 4,
        };
        let mut out = Vec::new();
        h.serialize(&mut out);
        assert!(Header::parse(&out).is_err());
    }

    #[test]
    fn server_hello_done_message() {
        let m = Body::ServerHelloDone.to_message(4);
        assert_eq!(m, [14, 0, 0, 0, 0, 4, 0, 0, 0, 0, 0, 0]);

        let (rest, (header, body)) = parse_fragment(&m).unwrap();
        assert!(rest.is_empty());
        assert!(body.is_empty());
        assert_eq!(header.msg_type, HandshakeType::ServerHelloDone);
    }

    #[test]
    fn oversized_opaque() {
        let mut input = vec![33];
        input.extend_from_slice(&[0; 33]);
        assert!(parse_opaque32(&input).is_err());
    }

    #[test]
    fn unknown_message_type() {
        assert!(Body::parse(HandshakeType::Unknown(99), &[]).is_err());
    }

    #[test]
    fn trailing_bytes() {
        assert!(Body::parse(HandshakeType::ServerHelloDone, &[0]).is_err());
    }
}
