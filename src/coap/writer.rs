use super::{Code, MessageType, OptionNumber, COAP_VERSION, HEADER_LEN, MAX_TOKEN_LEN};
use super::PAYLOAD_MARKER;
use crate::bytes::uint_to_be_minimal;
use crate::Error;

/// Encoded size of one option given the previous option number.
pub fn calc_option_size(prev: OptionNumber, number: OptionNumber, value_len: usize) -> usize {
    let mut size = 1 + value_len;
    if value_len >= 269 {
        size += 2;
    } else if value_len >= 13 {
        size += 1;
    }

    let delta = number.0.saturating_sub(prev.0);
    if delta >= 269 {
        size += 2;
    } else if delta >= 13 {
        size += 1;
    }

    size
}

/// Writes a CoAP message into a caller-provided buffer.
///
/// Options must be added in non-decreasing number order; the writer keeps
/// the previous number to compute deltas and refuses to go backwards.
pub struct MessageWriter<'a> {
    buf: &'a mut [u8],
    len: usize,
    last_option: OptionNumber,
    has_payload: bool,
}

impl<'a> MessageWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        MessageWriter {
            buf,
            len: 0,
            last_option: OptionNumber(0),
            has_payload: false,
        }
    }

    /// Write the 4-byte header and the token. Resets any previous content.
    pub fn init_header(
        &mut self,
        kind: MessageType,
        code: Code,
        mid: u16,
        token: &[u8],
    ) -> Result<(), Error> {
        if token.len() > MAX_TOKEN_LEN {
            return Err(Error::BadParameter("token longer than 8 bytes"));
        }
        let need = HEADER_LEN + token.len();
        if need > self.buf.len() {
            return Err(Error::too_small(need, self.buf.len()));
        }

        self.buf[0] = (COAP_VERSION << 6) | (kind.as_u8() << 4) | token.len() as u8;
        self.buf[1] = code.as_u8();
        self.buf[2..4].copy_from_slice(&mid.to_be_bytes());
        self.buf[4..need].copy_from_slice(token);

        self.len = need;
        self.last_option = OptionNumber(0);
        self.has_payload = false;
        Ok(())
    }

    pub fn add_option(&mut self, number: OptionNumber, value: &[u8]) -> Result<(), Error> {
        if self.len < HEADER_LEN {
            return Err(Error::BadParameter("header not written"));
        }
        if self.has_payload {
            return Err(Error::BadParameter("option after payload"));
        }
        if number < self.last_option {
            return Err(Error::BadParameter("options out of order"));
        }
        if value.len() > u16::MAX as usize + 269 {
            return Err(Error::BadParameter("option value too long"));
        }

        let size = calc_option_size(self.last_option, number, value.len());
        let have = self.buf.len() - self.len;
        if size > have {
            return Err(Error::too_small(size, have));
        }

        let out = &mut self.buf[self.len..self.len + size];
        let mut pos = 1;

        let delta = (number.0 - self.last_option.0) as usize;
        let delta_nibble = write_extended(out, &mut pos, delta);
        let len_nibble = write_extended(out, &mut pos, value.len());
        out[0] = (delta_nibble << 4) | len_nibble;
        out[pos..pos + value.len()].copy_from_slice(value);

        self.len += size;
        self.last_option = number;
        Ok(())
    }

    /// Integer option, MSB first without leading zero bytes. Zero is empty.
    pub fn add_int_option(&mut self, number: OptionNumber, value: u32) -> Result<(), Error> {
        let bytes = uint_to_be_minimal(value);
        self.add_option(number, &bytes)
    }

    /// Write the payload marker and the payload. An empty payload writes
    /// nothing, a marker followed by nothing is a format error.
    pub fn add_payload(&mut self, payload: &[u8]) -> Result<(), Error> {
        if self.len < HEADER_LEN {
            return Err(Error::BadParameter("header not written"));
        }
        if payload.is_empty() {
            return Ok(());
        }
        let need = 1 + payload.len();
        let have = self.buf.len() - self.len;
        if need > have {
            return Err(Error::too_small(need, have));
        }
        self.buf[self.len] = PAYLOAD_MARKER;
        self.buf[self.len + 1..self.len + need].copy_from_slice(payload);
        self.len += need;
        self.has_payload = true;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The bytes written so far.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

// Emits the extension bytes for a delta or length and returns the nibble.
fn write_extended(out: &mut [u8], pos: &mut usize, value: usize) -> u8 {
    if value >= 269 {
        let ext = (value - 269) as u16;
        out[*pos..*pos + 2].copy_from_slice(&ext.to_be_bytes());
        *pos += 2;
        14
    } else if value >= 13 {
        out[*pos] = (value - 13) as u8;
        *pos += 1;
        13
    } else {
        value as u8
    }
}
