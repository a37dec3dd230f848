use nom::bytes::complete::take;
use nom::error::ErrorKind;
use nom::number::complete::{be_u16, be_u8};
use nom::IResult;

use super::{extension, fail, find_extension, parse_extensions, parse_opaque32};
use super::{serialize_extensions, serialize_opaque16, serialize_opaque8};
use super::{Cookie, Extension, Random, SessionId};
use super::{CERT_TYPE_RAW_PUBLIC_KEY, NAMED_CURVE_P256, SIGNATURE_ECDSA_SHA256};
use crate::dtls::record::ProtocolVersion;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    pub client_version: ProtocolVersion,
    pub random: Random,
    pub session_id: SessionId,
    pub cookie: Cookie,
    pub cipher_suites: Vec<u16>,
    pub compression_methods: Vec<u8>,
    pub extensions: Vec<Extension>,
}

impl ClientHello {
    /// Hello offering our one suite. `client_auth` announces that we can
    /// authenticate with a raw public key.
    pub fn new(random: Random, cookie: Cookie, client_auth: bool) -> Self {
        let mut extensions = vec![
            Extension::new(
                extension::SUPPORTED_GROUPS,
                [&2u16.to_be_bytes()[..], &NAMED_CURVE_P256.to_be_bytes()[..]].concat(),
            ),
            // uncompressed
            Extension::new(extension::EC_POINT_FORMATS, vec![1, 0]),
            Extension::new(
                extension::SIGNATURE_ALGORITHMS,
                [&2u16.to_be_bytes()[..], &SIGNATURE_ECDSA_SHA256.to_be_bytes()[..]].concat(),
            ),
            Extension::new(
                extension::SERVER_CERTIFICATE_TYPE,
                vec![1, CERT_TYPE_RAW_PUBLIC_KEY],
            ),
        ];
        if client_auth {
            extensions.push(Extension::new(
                extension::CLIENT_CERTIFICATE_TYPE,
                vec![1, CERT_TYPE_RAW_PUBLIC_KEY],
            ));
        }
        ClientHello {
            client_version: ProtocolVersion::DTLS1_2,
            random,
            session_id: SessionId::new(),
            cookie,
            cipher_suites: vec![super::CIPHER_SUITE],
            compression_methods: vec![super::COMPRESSION_NULL],
            extensions,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ClientHello> {
        let (input, client_version) = ProtocolVersion::parse(input)?;
        let (input, random) = Random::parse(input)?;
        let (input, session_id) = parse_opaque32(input)?;
        let (input, cookie) = parse_opaque32(input)?;

        let (input, suites_len) = be_u16(input)?;
        if suites_len == 0 || suites_len % 2 != 0 {
            return fail(input, ErrorKind::LengthValue);
        }
        let (input, mut suites) = take(suites_len as usize)(input)?;
        let mut cipher_suites = Vec::with_capacity(suites_len as usize / 2);
        while !suites.is_empty() {
            let (rest, s) = be_u16(suites)?;
            cipher_suites.push(s);
            suites = rest;
        }

        let (input, comp_len) = be_u8(input)?;
        if comp_len == 0 {
            return fail(input, ErrorKind::LengthValue);
        }
        let (input, comp) = take(comp_len as usize)(input)?;
        let (input, extensions) = parse_extensions(input)?;

        Ok((
            input,
            ClientHello {
                client_version,
                random,
                session_id,
                cookie,
                cipher_suites,
                compression_methods: comp.to_vec(),
                extensions,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        self.client_version.serialize(output);
        self.random.serialize(output);
        serialize_opaque8(&self.session_id, output);
        serialize_opaque8(&self.cookie, output);
        let suites: Vec<u8> = self
            .cipher_suites
            .iter()
            .flat_map(|s| s.to_be_bytes())
            .collect();
        serialize_opaque16(&suites, output);
        serialize_opaque8(&self.compression_methods, output);
        serialize_extensions(&self.extensions, output);
    }

    /// Whether the peer offers raw public keys for the given certificate
    /// type extension. Absent means X.509 only.
    pub fn offers_raw_public_key(&self, extension_type: u16) -> bool {
        find_extension(&self.extensions, extension_type)
            .and_then(|d| d.get(1..))
            .map_or(false, |types| types.contains(&CERT_TYPE_RAW_PUBLIC_KEY))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    pub server_version: ProtocolVersion,
    pub random: Random,
    pub session_id: SessionId,
    pub cipher_suite: u16,
    pub compression_method: u8,
    pub extensions: Vec<Extension>,
}

impl ServerHello {
    pub fn new(random: Random, session_id: SessionId, client_auth: bool) -> Self {
        let mut extensions = vec![
            Extension::new(extension::EC_POINT_FORMATS, vec![1, 0]),
            Extension::new(extension::SERVER_CERTIFICATE_TYPE, vec![CERT_TYPE_RAW_PUBLIC_KEY]),
        ];
        if client_auth {
            extensions.push(Extension::new(
                extension::CLIENT_CERTIFICATE_TYPE,
                vec![CERT_TYPE_RAW_PUBLIC_KEY],
            ));
        }
        ServerHello {
            server_version: ProtocolVersion::DTLS1_2,
            random,
            session_id,
            cipher_suite: super::CIPHER_SUITE,
            compression_method: super::COMPRESSION_NULL,
            extensions,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ServerHello> {
        let (input, server_version) = ProtocolVersion::parse(input)?;
        let (input, random) = Random::parse(input)?;
        let (input, session_id) = parse_opaque32(input)?;
        let (input, cipher_suite) = be_u16(input)?;
        let (input, compression_method) = be_u8(input)?;
        let (input, extensions) = parse_extensions(input)?;
        Ok((
            input,
            ServerHello {
                server_version,
                random,
                session_id,
                cipher_suite,
                compression_method,
                extensions,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        self.server_version.serialize(output);
        self.random.serialize(output);
        serialize_opaque8(&self.session_id, output);
        output.extend_from_slice(&self.cipher_suite.to_be_bytes());
        output.push(self.compression_method);
        serialize_extensions(&self.extensions, output);
    }

    /// The selected certificate type, if the extension is present.
    pub fn certificate_type(&self, extension_type: u16) -> Option<u8> {
        find_extension(&self.extensions, extension_type).and_then(|d| d.first().copied())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloVerifyRequest {
    pub server_version: ProtocolVersion,
    pub cookie: Cookie,
}

impl HelloVerifyRequest {
    pub fn new(cookie: Cookie) -> Self {
        HelloVerifyRequest {
            // RFC 6347 4.2.1, answer with 1.0 regardless of the offered version.
            server_version: ProtocolVersion::DTLS1_0,
            cookie,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], HelloVerifyRequest> {
        let (input, server_version) = ProtocolVersion::parse(input)?;
        let (input, cookie) = parse_opaque32(input)?;
        if cookie.is_empty() {
            return fail(input, ErrorKind::LengthValue);
        }
        Ok((
            input,
            HelloVerifyRequest {
                server_version,
                cookie,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        self.server_version.serialize(output);
        serialize_opaque8(&self.cookie, output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn random() -> Random {
        Random {
            gmt_unix_time: 0x01020304,
            random_bytes: [7; 28],
        }
    }

    #[test]
    fn client_hello_roundtrip() {
        let mut cookie = Cookie::new();
        cookie.extend_from_slice(&[0xBB; 16]);
        let hello = ClientHello::new(random(), cookie, true);

        let mut out = Vec::new();
        hello.serialize(&mut out);
        let (rest, parsed) = ClientHello::parse(&out).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, hello);
        assert_eq!(parsed.cipher_suites, [0xC0AE]);
        assert!(parsed.offers_raw_public_key(extension::SERVER_CERTIFICATE_TYPE));
        assert!(parsed.offers_raw_public_key(extension::CLIENT_CERTIFICATE_TYPE));
    }

    #[test]
    fn client_hello_without_extensions() {
        let mut out = Vec::new();
        ProtocolVersion::DTLS1_2.serialize(&mut out);
        random().serialize(&mut out);
        out.extend_from_slice(&[0, 0]); // session id, cookie
        out.extend_from_slice(&[0, 2, 0xC0, 0xAE]);
        out.extend_from_slice(&[1, 0]);

        let (_, parsed) = ClientHello::parse(&out).unwrap();
        assert!(parsed.extensions.is_empty());
        assert!(!parsed.offers_raw_public_key(extension::SERVER_CERTIFICATE_TYPE));
    }

    #[test]
    fn odd_cipher_suite_length() {
        let mut out = Vec::new();
        ProtocolVersion::DTLS1_2.serialize(&mut out);
        random().serialize(&mut out);
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&[0, 3, 0xC0, 0xAE, 0x00]);
        out.extend_from_slice(&[1, 0]);
        assert!(ClientHello::parse(&out).is_err());
    }

    #[test]
    fn server_hello_roundtrip() {
        let hello = ServerHello::new(random(), SessionId::new(), false);
        let mut out = Vec::new();
        hello.serialize(&mut out);
        let (rest, parsed) = ServerHello::parse(&out).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, hello);
        assert_eq!(
            parsed.certificate_type(extension::SERVER_CERTIFICATE_TYPE),
            Some(CERT_TYPE_RAW_PUBLIC_KEY)
        );
        assert_eq!(parsed.certificate_type(extension::CLIENT_CERTIFICATE_TYPE), None);
    }

    #[test]
    fn hello_verify_request() {
        const MESSAGE: &[u8] = &[0xFE, 0xFF, 0x01, 0xBB];
        let (rest, hvr) = HelloVerifyRequest::parse(MESSAGE).unwrap();
        assert!(rest.is_empty());
        assert_eq!(&hvr.cookie[..], &[0xBB]);

        let mut out = Vec::new();
        hvr.serialize(&mut out);
        assert_eq!(out, MESSAGE);
    }

    #[test]
    fn hello_verify_request_empty_cookie() {
        assert!(HelloVerifyRequest::parse(&[0xFE, 0xFD, 0x00]).is_err());
    }
}
