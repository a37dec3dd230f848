use super::{OptionNumber, HEADER_LEN, MAX_TOKEN_LEN, PAYLOAD_MARKER};
use crate::bytes::be_to_uint;
use crate::Error;

/// Offset of the first option, after header and token.
fn options_start(msg: &[u8]) -> Result<usize, Error> {
    if msg.len() < HEADER_LEN {
        return Err(Error::Parse("short coap header"));
    }
    let tkl = (msg[0] & 0x0F) as usize;
    if tkl > MAX_TOKEN_LEN || HEADER_LEN + tkl > msg.len() {
        return Err(Error::Parse("bad token length"));
    }
    Ok(HEADER_LEN + tkl)
}

fn read_extended(msg: &[u8], pos: &mut usize, nibble: u8) -> Result<usize, Error> {
    match nibble {
        13 => {
            let b = *msg.get(*pos).ok_or(Error::Parse("truncated option"))?;
            *pos += 1;
            Ok(13 + b as usize)
        }
        14 => {
            let b = msg
                .get(*pos..*pos + 2)
                .ok_or(Error::Parse("truncated option"))?;
            *pos += 2;
            Ok(269 + u16::from_be_bytes([b[0], b[1]]) as usize)
        }
        15 => Err(Error::Parse("reserved option nibble")),
        n => Ok(n as usize),
    }
}

/// Decode the option at `pos`. Returns `Ok(None)` at the end of the message
/// or on the payload marker, leaving `pos` on the marker.
fn decode_option<'a>(
    msg: &'a [u8],
    pos: &mut usize,
    last: OptionNumber,
) -> Result<Option<(OptionNumber, &'a [u8])>, Error> {
    let Some(&header) = msg.get(*pos) else {
        return Ok(None);
    };
    if header == PAYLOAD_MARKER {
        return Ok(None);
    }

    let mut p = *pos + 1;
    let delta = read_extended(msg, &mut p, header >> 4)?;
    let len = read_extended(msg, &mut p, header & 0x0F)?;

    let number = last.0 as usize + delta;
    if number > u16::MAX as usize {
        return Err(Error::Parse("option number overflow"));
    }
    let value = msg
        .get(p..p + len)
        .ok_or(Error::Parse("option value past end"))?;

    *pos = p + len;
    Ok(Some((OptionNumber(number as u16), value)))
}

/// Running position of an [`option`] scan, so repeated options can be read
/// one after the other without rescanning from the start.
#[derive(Debug, Default, Clone, Copy)]
pub struct OptionCursor {
    pos: usize,
    last: OptionNumber,
}

impl OptionCursor {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Find the next option `number` in a serialized message.
///
/// A fresh cursor starts at the first option. Options are sorted, so the
/// scan gives up as soon as it sees a greater number, at the payload marker,
/// or on malformed input.
pub fn option<'a>(msg: &'a [u8], number: OptionNumber, cursor: &mut OptionCursor) -> Option<&'a [u8]> {
    if cursor.pos == 0 {
        cursor.pos = options_start(msg).ok()?;
        cursor.last = OptionNumber(0);
    }

    loop {
        let mut pos = cursor.pos;
        let (n, value) = decode_option(msg, &mut pos, cursor.last).ok()??;
        if n > number {
            return None;
        }
        cursor.pos = pos;
        cursor.last = n;
        if n == number {
            return Some(value);
        }
    }
}

/// Big-endian accumulation of an integer option value.
pub fn decode_int(value: &[u8]) -> Option<u32> {
    be_to_uint(value)
}

/// Iterates all options of a message in order.
///
/// Yields an error once and then stops if the options are malformed. After
/// the last option, [`payload`](Self::payload) returns what follows the
/// payload marker.
pub struct OptionIter<'a> {
    msg: &'a [u8],
    pos: usize,
    last: OptionNumber,
    done: bool,
}

impl<'a> OptionIter<'a> {
    pub fn new(msg: &'a [u8]) -> Result<Self, Error> {
        let pos = options_start(msg)?;
        Ok(OptionIter {
            msg,
            pos,
            last: OptionNumber(0),
            done: false,
        })
    }

    /// Payload after the marker. Only meaningful once iteration finished.
    ///
    /// A marker followed by no bytes is a format error.
    pub fn payload(&self) -> Result<&'a [u8], Error> {
        match self.msg.get(self.pos) {
            None => Ok(&[]),
            Some(&PAYLOAD_MARKER) if self.pos + 1 < self.msg.len() => Ok(&self.msg[self.pos + 1..]),
            Some(&PAYLOAD_MARKER) => Err(Error::Parse("payload marker without payload")),
            Some(_) => Err(Error::Parse("options not fully read")),
        }
    }
}

impl<'a> Iterator for OptionIter<'a> {
    type Item = Result<(OptionNumber, &'a [u8]), Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match decode_option(self.msg, &mut self.pos, self.last) {
            Ok(Some((n, v))) => {
                self.last = n;
                Some(Ok((n, v)))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
