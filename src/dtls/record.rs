//! Record layer framing.

use std::fmt;

use nom::bytes::complete::take;
use nom::error::{Error, ErrorKind};
use nom::number::complete::{be_u16, be_u8};
use nom::{Err, IResult};

use crate::bytes::{put_u48, read_u16};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    ChangeCipherSpec,
    Alert,
    Handshake,
    ApplicationData,
    Unknown(u8),
}

impl ContentType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            20 => ContentType::ChangeCipherSpec,
            21 => ContentType::Alert,
            22 => ContentType::Handshake,
            23 => ContentType::ApplicationData,
            _ => ContentType::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            ContentType::ChangeCipherSpec => 20,
            ContentType::Alert => 21,
            ContentType::Handshake => 22,
            ContentType::ApplicationData => 23,
            ContentType::Unknown(value) => *value,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ContentType> {
        let (input, value) = be_u8(input)?;
        Ok((input, ContentType::from_u8(value)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    DTLS1_0,
    DTLS1_2,
    Unknown(u16),
}

impl ProtocolVersion {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0xFEFF => ProtocolVersion::DTLS1_0,
            0xFEFD => ProtocolVersion::DTLS1_2,
            _ => ProtocolVersion::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            ProtocolVersion::DTLS1_0 => 0xFEFF,
            ProtocolVersion::DTLS1_2 => 0xFEFD,
            ProtocolVersion::Unknown(value) => *value,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ProtocolVersion> {
        let (input, version) = be_u16(input)?;
        Ok((input, ProtocolVersion::from_u16(version)))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&self.as_u16().to_be_bytes());
    }
}

/// Epoch and 48 bit sequence number of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Sequence {
    pub epoch: u16,
    pub sequence_number: u64,
}

impl Sequence {
    pub const MAX: u64 = (1 << 48) - 1;

    /// The 8 bytes `epoch ‖ seq` used as explicit nonce and in the AAD.
    pub fn to_bytes(&self) -> [u8; 8] {
        let mut out = self.sequence_number.to_be_bytes();
        out[..2].copy_from_slice(&self.epoch.to_be_bytes());
        out
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.epoch, self.sequence_number)
    }
}

/// `type(1) version(2) epoch(2) seq(6) length(2)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub content_type: ContentType,
    pub version: ProtocolVersion,
    pub sequence: Sequence,
    pub length: u16,
}

impl RecordHeader {
    pub const LEN: usize = 13;

    /// Parse one record, returning its header and fragment.
    pub fn parse(input: &[u8]) -> IResult<&[u8], (RecordHeader, &[u8])> {
        let (input, content_type) = ContentType::parse(input)?;
        let (input, version) = ProtocolVersion::parse(input)?;
        let (input, epoch) = be_u16(input)?;
        let (input, seq) = take(6usize)(input)?;
        let (input, length) = be_u16(input)?;
        let (rest, fragment) = take(length as usize)(input)?;

        if matches!(content_type, ContentType::Unknown(_)) {
            return Err(Err::Failure(Error::new(input, ErrorKind::Tag)));
        }

        let mut s = [0u8; 8];
        s[2..].copy_from_slice(seq);
        let header = RecordHeader {
            content_type,
            version,
            sequence: Sequence {
                epoch,
                sequence_number: u64::from_be_bytes(s),
            },
            length,
        };
        Ok((rest, (header, fragment)))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.push(self.content_type.as_u8());
        self.version.serialize(output);
        output.extend_from_slice(&self.sequence.epoch.to_be_bytes());
        put_u48(output, self.sequence.sequence_number);
        output.extend_from_slice(&self.length.to_be_bytes());
    }
}

/// Length of the DTLS 1.2 record at the start of `buf`, or 0 if there is
/// none: too short, unknown content type, another version, or a declared
/// length running past the end.
pub fn is_record(buf: &[u8]) -> usize {
    if buf.len() < RecordHeader::LEN {
        return 0;
    }
    if matches!(ContentType::from_u8(buf[0]), ContentType::Unknown(_)) {
        return 0;
    }
    if read_u16(buf, 1) != Some(ProtocolVersion::DTLS1_2.as_u16()) {
        return 0;
    }
    let Some(length) = read_u16(buf, 11) else {
        return 0;
    };
    let total = RecordHeader::LEN + length as usize;
    if total > buf.len() {
        return 0;
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECORD: &[u8] = &[
        0x16, // Handshake
        0xFE, 0xFD, // DTLS 1.2
        0x00, 0x01, // epoch
        0x00, 0x00, 0x00, 0x00, 0x00, 0x07, // sequence number
        0x00, 0x04, // length
        0x01, 0x02, 0x03, 0x04,
    ];

    #[test]
    fn parse_and_serialize() {
        let (rest, (header, fragment)) = RecordHeader::parse(RECORD).unwrap();
        assert!(rest.is_empty());
        assert_eq!(header.content_type, ContentType::Handshake);
        assert_eq!(header.sequence, Sequence { epoch: 1, sequence_number: 7 });
        assert_eq!(fragment, &[1, 2, 3, 4]);

        let mut out = Vec::new();
        header.serialize(&mut out);
        out.extend_from_slice(fragment);
        assert_eq!(out, RECORD);
    }

    #[test]
    fn is_record_accepts_whole_record() {
        assert_eq!(is_record(RECORD), RECORD.len());

        let mut two = RECORD.to_vec();
        two.extend_from_slice(RECORD);
        assert_eq!(is_record(&two), RECORD.len());
    }

    #[test]
    fn is_record_rejects_short() {
        assert_eq!(is_record(&RECORD[..12]), 0);
    }

    #[test]
    fn is_record_rejects_unknown_type() {
        let mut r = RECORD.to_vec();
        r[0] = 0x30;
        assert_eq!(is_record(&r), 0);
    }

    #[test]
    fn is_record_rejects_overlong() {
        let mut r = RECORD.to_vec();
        r[12] = 0x05;
        assert_eq!(is_record(&r), 0);
    }

    #[test]
    fn is_record_rejects_other_versions() {
        let mut r = RECORD.to_vec();
        r[2] = 0xFF;
        assert_eq!(is_record(&r), 0);
    }

    #[test]
    fn sequence_bytes() {
        let s = Sequence {
            epoch: 1,
            sequence_number: 0x0203,
        };
        assert_eq!(s.to_bytes(), [0, 1, 0, 0, 0, 0, 2, 3]);
    }
}
