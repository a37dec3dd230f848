use nom::bytes::complete::take;
use nom::error::ErrorKind;
use nom::number::complete::{be_u16, be_u24, be_u8};
use nom::IResult;

use super::{fail, serialize_opaque16, serialize_opaque8};
use super::{CERT_TYPE_ECDSA_SIGN, CURVE_TYPE_NAMED, NAMED_CURVE_P256, SIGNATURE_ECDSA_SHA256};
use super::VERIFY_DATA_LEN;
use crate::bytes::put_u24;

/// Raw public key certificate (RFC 7250): one SubjectPublicKeyInfo.
///
/// An empty key is a client declining to authenticate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    pub subject_public_key_info: Vec<u8>,
}

impl Certificate {
    pub fn parse(input: &[u8]) -> IResult<&[u8], Certificate> {
        let (input, len) = be_u24(input)?;
        let (input, spki) = take(len as usize)(input)?;
        Ok((
            input,
            Certificate {
                subject_public_key_info: spki.to_vec(),
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        put_u24(output, self.subject_public_key_info.len() as u32);
        output.extend_from_slice(&self.subject_public_key_info);
    }
}

/// ECParameters plus the ephemeral point, the part of ServerKeyExchange
/// that gets signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcdhParams {
    pub named_curve: u16,
    pub public: Vec<u8>,
}

impl EcdhParams {
    pub fn new(public: Vec<u8>) -> Self {
        EcdhParams {
            named_curve: NAMED_CURVE_P256,
            public,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], EcdhParams> {
        let (input, curve_type) = be_u8(input)?;
        if curve_type != CURVE_TYPE_NAMED {
            return fail(input, ErrorKind::Tag);
        }
        let (input, named_curve) = be_u16(input)?;
        let (input, len) = be_u8(input)?;
        let (input, public) = take(len as usize)(input)?;
        Ok((
            input,
            EcdhParams {
                named_curve,
                public: public.to_vec(),
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.push(CURVE_TYPE_NAMED);
        output.extend_from_slice(&self.named_curve.to_be_bytes());
        serialize_opaque8(&self.public, output);
    }
}

/// `algorithm(2) ‖ opaque signature<0..2^16-1>`
fn parse_signed(input: &[u8]) -> IResult<&[u8], (u16, Vec<u8>)> {
    let (input, algorithm) = be_u16(input)?;
    let (input, len) = be_u16(input)?;
    let (input, signature) = take(len as usize)(input)?;
    Ok((input, (algorithm, signature.to_vec())))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerKeyExchange {
    pub params: EcdhParams,
    pub algorithm: u16,
    pub signature: Vec<u8>,
}

impl ServerKeyExchange {
    pub fn parse(input: &[u8]) -> IResult<&[u8], ServerKeyExchange> {
        let (input, params) = EcdhParams::parse(input)?;
        let (input, (algorithm, signature)) = parse_signed(input)?;
        Ok((
            input,
            ServerKeyExchange {
                params,
                algorithm,
                signature,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        self.params.serialize(output);
        output.extend_from_slice(&self.algorithm.to_be_bytes());
        serialize_opaque16(&self.signature, output);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequest {
    pub certificate_types: Vec<u8>,
    pub signature_algorithms: Vec<u16>,
}

impl Default for CertificateRequest {
    fn default() -> Self {
        CertificateRequest {
            certificate_types: vec![CERT_TYPE_ECDSA_SIGN],
            signature_algorithms: vec![SIGNATURE_ECDSA_SHA256],
        }
    }
}

impl CertificateRequest {
    pub fn parse(input: &[u8]) -> IResult<&[u8], CertificateRequest> {
        let (input, types_len) = be_u8(input)?;
        let (input, types) = take(types_len as usize)(input)?;
        let (input, algs_len) = be_u16(input)?;
        if algs_len % 2 != 0 {
            return fail(input, ErrorKind::LengthValue);
        }
        let (input, mut algs) = take(algs_len as usize)(input)?;
        let mut signature_algorithms = Vec::new();
        while !algs.is_empty() {
            let (rest, a) = be_u16(algs)?;
            signature_algorithms.push(a);
            algs = rest;
        }
        // Distinguished names mean nothing for raw public keys.
        let (input, dn_len) = be_u16(input)?;
        let (input, _) = take(dn_len as usize)(input)?;
        Ok((
            input,
            CertificateRequest {
                certificate_types: types.to_vec(),
                signature_algorithms,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        serialize_opaque8(&self.certificate_types, output);
        let algs: Vec<u8> = self
            .signature_algorithms
            .iter()
            .flat_map(|a| a.to_be_bytes())
            .collect();
        serialize_opaque16(&algs, output);
        output.extend_from_slice(&[0, 0]);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientKeyExchange {
    pub public: Vec<u8>,
}

impl ClientKeyExchange {
    pub fn parse(input: &[u8]) -> IResult<&[u8], ClientKeyExchange> {
        let (input, len) = be_u8(input)?;
        let (input, public) = take(len as usize)(input)?;
        Ok((
            input,
            ClientKeyExchange {
                public: public.to_vec(),
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        serialize_opaque8(&self.public, output);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateVerify {
    pub algorithm: u16,
    pub signature: Vec<u8>,
}

impl CertificateVerify {
    pub fn parse(input: &[u8]) -> IResult<&[u8], CertificateVerify> {
        let (input, (algorithm, signature)) = parse_signed(input)?;
        Ok((
            input,
            CertificateVerify {
                algorithm,
                signature,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&self.algorithm.to_be_bytes());
        serialize_opaque16(&self.signature, output);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finished {
    pub verify_data: [u8; VERIFY_DATA_LEN],
}

impl Finished {
    pub fn parse(input: &[u8]) -> IResult<&[u8], Finished> {
        let (input, data) = take(VERIFY_DATA_LEN)(input)?;
        let mut verify_data = [0u8; VERIFY_DATA_LEN];
        verify_data.copy_from_slice(data);
        Ok((input, Finished { verify_data }))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&self.verify_data);
    }
}
