//! Bounds-checked conversions between integers, floats, text and wire bytes.
//!
//! Everything here works on explicit slices and returns `None` instead of
//! reading past the end, so callers handling attacker-controlled input can
//! simply drop the unit that failed to convert.

use std::io::Write;

use tinyvec::ArrayVec;

/// Largest accepted plain text number, in bytes.
const MAX_NUMBER_TEXT: usize = 64;

/// Parse an ASCII decimal integer with optional sign.
pub fn text_to_int(text: &[u8]) -> Option<i64> {
    let (negative, digits) = match text.first()? {
        b'-' => (true, &text[1..]),
        b'+' => (false, &text[1..]),
        _ => (false, text),
    };

    if digits.is_empty() {
        return None;
    }

    // Accumulate as a negative number so i64::MIN is representable.
    let mut acc: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return None;
        }
        acc = acc.checked_mul(10)?.checked_sub((b - b'0') as i64)?;
    }

    if negative {
        Some(acc)
    } else {
        acc.checked_neg()
    }
}

/// Parse an unsigned decimal that must fit in a `u16`. Used for URI segments.
pub fn text_to_u16(text: &[u8]) -> Option<u16> {
    if text.is_empty() || text.len() > 5 {
        return None;
    }
    let mut acc: u32 = 0;
    for &b in text {
        if !b.is_ascii_digit() {
            return None;
        }
        acc = acc * 10 + (b - b'0') as u32;
    }
    u16::try_from(acc).ok()
}

/// Parse an ASCII decimal float (`-12.5`, `3`, `1e3`).
pub fn text_to_float(text: &[u8]) -> Option<f64> {
    if text.is_empty() || text.len() > MAX_NUMBER_TEXT {
        return None;
    }
    let s = std::str::from_utf8(text).ok()?;
    // Reject the spellings Rust accepts but LWM2M text format does not.
    if s.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
        return None;
    }
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Append the decimal text of `value`.
pub fn int_to_text(value: i64, out: &mut Vec<u8>) {
    // Writing into a Vec cannot fail.
    let _ = write!(out, "{}", value);
}

/// Append the decimal text of `value`.
pub fn float_to_text(value: f64, out: &mut Vec<u8>) {
    let _ = write!(out, "{}", value);
}

/// Encode an integer the way LWM2M TLV does: the shortest of 1, 2, 4 or 8
/// bytes, two's complement, big-endian.
pub fn int_to_tlv(value: i64) -> ArrayVec<[u8; 8]> {
    let mut out = ArrayVec::new();
    if let Ok(v) = i8::try_from(value) {
        out.extend_from_slice(&v.to_be_bytes());
    } else if let Ok(v) = i16::try_from(value) {
        out.extend_from_slice(&v.to_be_bytes());
    } else if let Ok(v) = i32::try_from(value) {
        out.extend_from_slice(&v.to_be_bytes());
    } else {
        out.extend_from_slice(&value.to_be_bytes());
    }
    out
}

/// Decode a TLV integer. Only the lengths 1, 2, 4 and 8 are valid.
pub fn tlv_to_int(bytes: &[u8]) -> Option<i64> {
    match bytes.len() {
        1 => Some(i8::from_be_bytes([bytes[0]]) as i64),
        2 => Some(i16::from_be_bytes(bytes.try_into().ok()?) as i64),
        4 => Some(i32::from_be_bytes(bytes.try_into().ok()?) as i64),
        8 => Some(i64::from_be_bytes(bytes.try_into().ok()?)),
        _ => None,
    }
}

/// Encode a float as 4 bytes when that is lossless, otherwise 8.
pub fn float_to_tlv(value: f64) -> ArrayVec<[u8; 8]> {
    let mut out = ArrayVec::new();
    let narrow = value as f32;
    if narrow as f64 == value || value.is_nan() {
        out.extend_from_slice(&narrow.to_be_bytes());
    } else {
        out.extend_from_slice(&value.to_be_bytes());
    }
    out
}

pub fn tlv_to_float(bytes: &[u8]) -> Option<f64> {
    match bytes.len() {
        4 => Some(f32::from_be_bytes(bytes.try_into().ok()?) as f64),
        8 => Some(f64::from_be_bytes(bytes.try_into().ok()?)),
        _ => None,
    }
}

/// Unsigned integer as used by CoAP options: big-endian, no leading zeros.
/// Zero encodes as the empty string.
pub fn uint_to_be_minimal(value: u32) -> ArrayVec<[u8; 4]> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    let mut out = ArrayVec::new();
    out.extend_from_slice(&bytes[skip..]);
    out
}

/// Decode a CoAP integer option value (at most 4 bytes).
pub fn be_to_uint(bytes: &[u8]) -> Option<u32> {
    if bytes.len() > 4 {
        return None;
    }
    Some(bytes.iter().fold(0u32, |acc, b| (acc << 8) | *b as u32))
}

/// Write a 24 bit big-endian integer. Panics in debug if it does not fit.
pub fn put_u24(out: &mut Vec<u8>, value: u32) {
    debug_assert!(value <= 0xFF_FFFF);
    out.extend_from_slice(&value.to_be_bytes()[1..]);
}

/// Write a 48 bit big-endian integer.
pub fn put_u48(out: &mut Vec<u8>, value: u64) {
    debug_assert!(value <= 0xFFFF_FFFF_FFFF);
    out.extend_from_slice(&value.to_be_bytes()[2..]);
}

/// Read a big-endian u16 at `offset`, if there are two bytes left.
pub fn read_u16(buf: &[u8], offset: usize) -> Option<u16> {
    let b = buf.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_be_bytes([b[0], b[1]]))
}

/// Constant-time comparison of two byte strings.
pub fn equals_ct(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_text_bounds() {
        assert_eq!(text_to_int(b"0"), Some(0));
        assert_eq!(text_to_int(b"-42"), Some(-42));
        assert_eq!(text_to_int(b"+7"), Some(7));
        assert_eq!(text_to_int(b"9223372036854775807"), Some(i64::MAX));
        assert_eq!(text_to_int(b"-9223372036854775808"), Some(i64::MIN));
        assert_eq!(text_to_int(b"9223372036854775808"), None);
        assert_eq!(text_to_int(b""), None);
        assert_eq!(text_to_int(b"-"), None);
        assert_eq!(text_to_int(b"12a"), None);
    }

    #[test]
    fn u16_text_bounds() {
        assert_eq!(text_to_u16(b"65535"), Some(65535));
        assert_eq!(text_to_u16(b"65536"), None);
        assert_eq!(text_to_u16(b"000001"), None);
        assert_eq!(text_to_u16(b"3x"), None);
    }

    #[test]
    fn float_text() {
        assert_eq!(text_to_float(b"-12.5"), Some(-12.5));
        assert_eq!(text_to_float(b"1e3"), Some(1000.0));
        assert_eq!(text_to_float(b"inf"), None);
        assert_eq!(text_to_float(b"NaN"), None);

        let mut out = Vec::new();
        float_to_text(21.5, &mut out);
        assert_eq!(out, b"21.5");
    }

    #[test]
    fn tlv_int_widths() {
        assert_eq!(int_to_tlv(0).len(), 1);
        assert_eq!(int_to_tlv(-128).len(), 1);
        assert_eq!(int_to_tlv(128).len(), 2);
        assert_eq!(int_to_tlv(-32769).len(), 4);
        assert_eq!(int_to_tlv(1 << 40).len(), 8);

        for v in [0, 1, -1, 127, -128, 300, -70000, i64::MAX, i64::MIN] {
            assert_eq!(tlv_to_int(&int_to_tlv(v)), Some(v));
        }
        assert_eq!(tlv_to_int(&[0, 0, 0]), None);
    }

    #[test]
    fn tlv_float_widths() {
        assert_eq!(float_to_tlv(1.5).len(), 4);
        assert_eq!(float_to_tlv(0.1).len(), 8);
        assert_eq!(tlv_to_float(&float_to_tlv(0.1)), Some(0.1));
        assert_eq!(tlv_to_float(&[0; 3]), None);
    }

    #[test]
    fn coap_uint() {
        assert!(uint_to_be_minimal(0).is_empty());
        assert_eq!(&uint_to_be_minimal(0x0100)[..], &[0x01, 0x00]);
        assert_eq!(be_to_uint(&[0x01, 0x00]), Some(256));
        assert_eq!(be_to_uint(&[]), Some(0));
        assert_eq!(be_to_uint(&[1, 2, 3, 4, 5]), None);
    }

    #[test]
    fn read_helpers_stay_in_bounds() {
        assert_eq!(read_u16(&[1], 0), None);
        assert_eq!(read_u16(&[1, 2], 0), Some(0x0102));
        assert_eq!(read_u16(&[1, 2], usize::MAX), None);
    }
}
