//! LWM2M TLV wire format (OMA-TS-LightweightM2M 6.4.3).
//!
//! ```text
//!  7 6   5     4 3       2 1 0
//! [type][id16][len-type][inline len]  [id: 1|2] [len: 0|1|2|3] [value]
//! ```

use nom::bytes::complete::take;
use nom::number::complete::{be_u16, be_u24, be_u8};
use nom::IResult;

use crate::Error;

/// Largest value length the 3-byte length field can carry.
pub const MAX_VALUE_LEN: usize = 0x00FF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlvKind {
    ObjectInstance,
    ResourceInstance,
    MultipleResource,
    Resource,
}

impl TlvKind {
    pub fn from_u8(value: u8) -> Self {
        match value & 0b11 {
            0 => TlvKind::ObjectInstance,
            1 => TlvKind::ResourceInstance,
            2 => TlvKind::MultipleResource,
            _ => TlvKind::Resource,
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            TlvKind::ObjectInstance => 0,
            TlvKind::ResourceInstance => 1,
            TlvKind::MultipleResource => 2,
            TlvKind::Resource => 3,
        }
    }
}

/// One decoded record borrowing its value from the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tlv<'a> {
    pub kind: TlvKind,
    pub id: u16,
    pub value: &'a [u8],
}

fn length_bytes(len: usize) -> usize {
    match len {
        0..=7 => 0,
        8..=0xFF => 1,
        0x100..=0xFFFF => 2,
        _ => 3,
    }
}

/// Exact encoded size of a record with this id and value length.
pub fn length(id: u16, len: usize) -> usize {
    let id_len = if id > 0xFF { 2 } else { 1 };
    1 + id_len + length_bytes(len) + len
}

/// Append one record to `out`. Returns the number of bytes written.
pub fn encode(kind: TlvKind, id: u16, value: &[u8], out: &mut Vec<u8>) -> Result<usize, Error> {
    let len = value.len();
    if len > MAX_VALUE_LEN {
        return Err(Error::BadParameter("tlv value too long"));
    }

    let start = out.len();
    let len_bytes = length_bytes(len);

    let mut header = kind.as_u8() << 6;
    if id > 0xFF {
        header |= 0b0010_0000;
    }
    header |= (len_bytes as u8) << 3;
    if len_bytes == 0 {
        header |= len as u8;
    }
    out.push(header);

    if id > 0xFF {
        out.extend_from_slice(&id.to_be_bytes());
    } else {
        out.push(id as u8);
    }

    let len_be = (len as u32).to_be_bytes();
    out.extend_from_slice(&len_be[4 - len_bytes..]);
    out.extend_from_slice(value);

    Ok(out.len() - start)
}

fn parse(input: &[u8]) -> IResult<&[u8], Tlv<'_>> {
    let (input, header) = be_u8(input)?;
    let (input, id) = if header & 0b0010_0000 != 0 {
        be_u16(input)?
    } else {
        let (input, id) = be_u8(input)?;
        (input, id as u16)
    };
    let (input, len) = match (header >> 3) & 0b11 {
        0 => (input, (header & 0b111) as u32),
        1 => {
            let (input, l) = be_u8(input)?;
            (input, l as u32)
        }
        2 => {
            let (input, l) = be_u16(input)?;
            (input, l as u32)
        }
        _ => be_u24(input)?,
    };
    let (input, value) = take(len as usize)(input)?;

    Ok((
        input,
        Tlv {
            kind: TlvKind::from_u8(header >> 6),
            id,
            value,
        },
    ))
}

/// Decode the record at the start of `buf`.
///
/// Returns the record and the number of bytes it took, or `None` when the
/// header is truncated or the declared length runs past the buffer. Callers
/// stop at `None`.
pub fn decode(buf: &[u8]) -> Option<(Tlv<'_>, usize)> {
    let (rest, tlv) = parse(buf).ok()?;
    Some((tlv, buf.len() - rest.len()))
}

/// Iterate the records of a buffer back to back. Ends at the first malformed
/// record; [`TlvIter::is_complete`] tells whether everything was consumed.
pub struct TlvIter<'a> {
    buf: &'a [u8],
}

impl<'a> TlvIter<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        TlvIter { buf }
    }

    pub fn is_complete(&self) -> bool {
        self.buf.is_empty()
    }
}

impl<'a> Iterator for TlvIter<'a> {
    type Item = Tlv<'a>;

    fn next(&mut self) -> Option<Tlv<'a>> {
        if self.buf.is_empty() {
            return None;
        }
        let (tlv, used) = decode(self.buf)?;
        self.buf = &self.buf[used..];
        Some(tlv)
    }
}
