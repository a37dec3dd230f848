use std::fmt;

use tinyvec::ArrayVec;

use super::option::OptionIter;
use super::writer::{calc_option_size, MessageWriter};
use super::{
    decode_int, BlockInfo, Code, ContentFormat, MessageType, OptionNumber, ResponseCode,
    COAP_VERSION, HEADER_LEN, MAX_TOKEN_LEN,
};
use crate::bytes::uint_to_be_minimal;
use crate::Error;

/// A decoded CoAP message with the options the LWM2M layer understands.
///
/// Repeated options (Uri-Path, Uri-Query, Location-Path) keep one entry per
/// segment. Setters keep a bitmap of present options in sync so
/// [`has`](Self::has) is a single mask test.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Packet {
    kind: Option<MessageType>,
    code: Option<Code>,
    mid: u16,
    token: ArrayVec<[u8; MAX_TOKEN_LEN]>,

    present: u64,

    if_none_match: bool,
    uri_host: Option<String>,
    etag: Option<ArrayVec<[u8; 8]>>,
    observe: Option<u32>,
    uri_port: Option<u16>,
    location_path: Vec<String>,
    uri_path: Vec<String>,
    content_format: Option<ContentFormat>,
    max_age: Option<u32>,
    uri_query: Vec<String>,
    accept: Option<ContentFormat>,
    location_query: Vec<String>,
    block2: Option<BlockInfo>,
    block1: Option<BlockInfo>,
    size2: Option<u32>,
    size1: Option<u32>,

    payload: Vec<u8>,
}

impl Packet {
    pub fn new(kind: MessageType, code: impl Into<Code>, mid: u16) -> Self {
        Packet {
            kind: Some(kind),
            code: Some(code.into()),
            mid,
            ..Default::default()
        }
    }

    /// Parse a datagram.
    ///
    /// Unknown elective options are skipped. Unknown critical options fail
    /// with [`ResponseCode::BadOption`], proxy options with
    /// [`ResponseCode::ProxyingNotSupported`].
    pub fn parse(data: &[u8]) -> Result<Packet, Error> {
        if data.len() < HEADER_LEN {
            return Err(Error::Parse("short coap header"));
        }
        if data[0] >> 6 != COAP_VERSION {
            return Err(Error::Parse("coap version"));
        }
        let tkl = (data[0] & 0x0F) as usize;

        let mut packet = Packet::new(
            MessageType::from_u8(data[0] >> 4),
            Code::from_u8(data[1]),
            u16::from_be_bytes([data[2], data[3]]),
        );

        let mut options = OptionIter::new(data)?;
        packet.token.extend_from_slice(&data[HEADER_LEN..HEADER_LEN + tkl]);

        for item in options.by_ref() {
            let (number, value) = item?;
            packet.parse_option(number, value)?;
        }

        let payload = options.payload()?;
        packet.payload.extend_from_slice(payload);

        Ok(packet)
    }

    fn parse_option(&mut self, number: OptionNumber, value: &[u8]) -> Result<(), Error> {
        let int = || decode_int(value).ok_or(Error::Coap(ResponseCode::BadOption));
        let text = || {
            std::str::from_utf8(value)
                .map(str::to_owned)
                .map_err(|_| Error::Coap(ResponseCode::BadOption))
        };

        match number {
            OptionNumber::IF_MATCH => {
                // Accepted and ignored, the object layer has no entity tags.
            }
            OptionNumber::URI_HOST => self.uri_host = Some(text()?),
            OptionNumber::ETAG => {
                if value.len() > 8 {
                    return Err(Error::Coap(ResponseCode::BadOption));
                }
                self.etag = Some(value.iter().copied().collect());
            }
            OptionNumber::IF_NONE_MATCH => self.if_none_match = true,
            OptionNumber::OBSERVE => self.observe = Some(int()?),
            OptionNumber::URI_PORT => {
                let port = int()?;
                self.uri_port = Some(u16::try_from(port).map_err(|_| Error::Coap(ResponseCode::BadOption))?);
            }
            OptionNumber::LOCATION_PATH => self.location_path.push(text()?),
            OptionNumber::URI_PATH => self.uri_path.push(text()?),
            OptionNumber::CONTENT_FORMAT => {
                self.content_format = Some(ContentFormat::from_u16(int()? as u16))
            }
            OptionNumber::MAX_AGE => self.max_age = Some(int()?),
            OptionNumber::URI_QUERY => self.uri_query.push(text()?),
            OptionNumber::ACCEPT => self.accept = Some(ContentFormat::from_u16(int()? as u16)),
            OptionNumber::LOCATION_QUERY => self.location_query.push(text()?),
            OptionNumber::BLOCK2 => self.block2 = Some(parse_block(value)?),
            OptionNumber::BLOCK1 => self.block1 = Some(parse_block(value)?),
            OptionNumber::SIZE2 => self.size2 = Some(int()?),
            OptionNumber::SIZE1 => self.size1 = Some(int()?),
            OptionNumber::PROXY_URI | OptionNumber::PROXY_SCHEME => {
                return Err(Error::Coap(ResponseCode::ProxyingNotSupported));
            }
            n if n.is_critical() => {
                debug!("Unknown critical option {}", n.0);
                return Err(Error::Coap(ResponseCode::BadOption));
            }
            n => {
                trace!("Skip elective option {}", n.0);
                return Ok(());
            }
        }

        self.mark(number);
        Ok(())
    }

    fn mark(&mut self, number: OptionNumber) {
        if number.0 < 64 {
            self.present |= 1 << number.0;
        }
    }

    fn unmark(&mut self, number: OptionNumber) {
        if number.0 < 64 {
            self.present &= !(1 << number.0);
        }
    }

    /// Whether an option is present. Options above 63 are never tracked.
    pub fn has(&self, number: OptionNumber) -> bool {
        number.0 < 64 && self.present & (1 << number.0) != 0
    }

    // Calls `f` for every option in ascending number order.
    fn for_each_option(
        &self,
        mut f: impl FnMut(OptionNumber, &[u8]) -> Result<(), Error>,
    ) -> Result<(), Error> {
        if let Some(host) = &self.uri_host {
            f(OptionNumber::URI_HOST, host.as_bytes())?;
        }
        if let Some(etag) = &self.etag {
            f(OptionNumber::ETAG, &etag[..])?;
        }
        if self.if_none_match {
            f(OptionNumber::IF_NONE_MATCH, &[][..])?;
        }
        int_option(&mut f, OptionNumber::OBSERVE, self.observe)?;
        int_option(&mut f, OptionNumber::URI_PORT, self.uri_port.map(u32::from))?;
        for seg in &self.location_path {
            f(OptionNumber::LOCATION_PATH, seg.as_bytes())?;
        }
        for seg in &self.uri_path {
            f(OptionNumber::URI_PATH, seg.as_bytes())?;
        }
        int_option(
            &mut f,
            OptionNumber::CONTENT_FORMAT,
            self.content_format.map(|c| c.as_u16() as u32),
        )?;
        int_option(&mut f, OptionNumber::MAX_AGE, self.max_age)?;
        for q in &self.uri_query {
            f(OptionNumber::URI_QUERY, q.as_bytes())?;
        }
        int_option(&mut f, OptionNumber::ACCEPT, self.accept.map(|c| c.as_u16() as u32))?;
        for q in &self.location_query {
            f(OptionNumber::LOCATION_QUERY, q.as_bytes())?;
        }
        int_option(&mut f, OptionNumber::BLOCK2, self.block2.map(|b| b.0))?;
        int_option(&mut f, OptionNumber::BLOCK1, self.block1.map(|b| b.0))?;
        int_option(&mut f, OptionNumber::SIZE2, self.size2)?;
        int_option(&mut f, OptionNumber::SIZE1, self.size1)?;
        Ok(())
    }

    /// Exact serialized size.
    pub fn encoded_len(&self) -> usize {
        let mut len = HEADER_LEN + self.token.len();
        let mut prev = OptionNumber(0);
        // The closure never fails.
        let _ = self.for_each_option(|n, v| {
            len += calc_option_size(prev, n, v.len());
            prev = n;
            Ok(())
        });
        if !self.payload.is_empty() {
            len += 1 + self.payload.len();
        }
        len
    }

    /// Serialize into `out`, returning the number of bytes written.
    pub fn serialize(&self, out: &mut [u8]) -> Result<usize, Error> {
        let mut w = MessageWriter::new(out);
        w.init_header(self.kind(), self.code(), self.mid, &self.token)?;
        self.for_each_option(|n, v| w.add_option(n, v))?;
        w.add_payload(&self.payload)?;
        Ok(w.len())
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, Error> {
        let mut out = vec![0; self.encoded_len()];
        let len = self.serialize(&mut out)?;
        out.truncate(len);
        Ok(out)
    }

    pub fn kind(&self) -> MessageType {
        self.kind.unwrap_or(MessageType::Confirmable)
    }

    pub fn set_kind(&mut self, kind: MessageType) {
        self.kind = Some(kind);
    }

    pub fn code(&self) -> Code {
        self.code.unwrap_or(Code::Empty)
    }

    pub fn set_code(&mut self, code: impl Into<Code>) {
        self.code = Some(code.into());
    }

    pub fn mid(&self) -> u16 {
        self.mid
    }

    pub fn set_mid(&mut self, mid: u16) {
        self.mid = mid;
    }

    pub fn token(&self) -> &[u8] {
        &self.token
    }

    pub fn set_token(&mut self, token: &[u8]) -> Result<(), Error> {
        if token.len() > MAX_TOKEN_LEN {
            return Err(Error::BadParameter("token longer than 8 bytes"));
        }
        self.token.clear();
        self.token.extend_from_slice(token);
        Ok(())
    }

    pub fn uri_path(&self) -> &[String] {
        &self.uri_path
    }

    /// Set Uri-Path from `/a/b/c`. Empty segments are dropped.
    pub fn set_uri_path(&mut self, path: &str) {
        self.uri_path = split_path(path);
        if self.uri_path.is_empty() {
            self.unmark(OptionNumber::URI_PATH);
        } else {
            self.mark(OptionNumber::URI_PATH);
        }
    }

    pub fn location_path(&self) -> &[String] {
        &self.location_path
    }

    /// Location-Path joined as `/rd/5`, or `None` when absent.
    pub fn location_path_string(&self) -> Option<String> {
        if self.location_path.is_empty() {
            return None;
        }
        Some(join_path(&self.location_path))
    }

    pub fn set_location_path(&mut self, path: &str) {
        self.location_path = split_path(path);
        if self.location_path.is_empty() {
            self.unmark(OptionNumber::LOCATION_PATH);
        } else {
            self.mark(OptionNumber::LOCATION_PATH);
        }
    }

    pub fn uri_query(&self) -> &[String] {
        &self.uri_query
    }

    pub fn add_uri_query(&mut self, query: impl Into<String>) {
        self.uri_query.push(query.into());
        self.mark(OptionNumber::URI_QUERY);
    }

    pub fn location_query(&self) -> &[String] {
        &self.location_query
    }

    pub fn uri_host(&self) -> Option<&str> {
        self.uri_host.as_deref()
    }

    pub fn uri_port(&self) -> Option<u16> {
        self.uri_port
    }

    pub fn etag(&self) -> Option<&[u8]> {
        self.etag.as_ref().map(|e| &e[..])
    }

    pub fn if_none_match(&self) -> bool {
        self.if_none_match
    }

    pub fn observe(&self) -> Option<u32> {
        self.observe
    }

    pub fn set_observe(&mut self, value: u32) {
        // 24-bit sequence number.
        self.observe = Some(value & 0x00FF_FFFF);
        self.mark(OptionNumber::OBSERVE);
    }

    pub fn content_format(&self) -> Option<ContentFormat> {
        self.content_format
    }

    pub fn set_content_format(&mut self, format: ContentFormat) {
        self.content_format = Some(format);
        self.mark(OptionNumber::CONTENT_FORMAT);
    }

    pub fn accept(&self) -> Option<ContentFormat> {
        self.accept
    }

    pub fn set_accept(&mut self, format: ContentFormat) {
        self.accept = Some(format);
        self.mark(OptionNumber::ACCEPT);
    }

    pub fn max_age(&self) -> Option<u32> {
        self.max_age
    }

    pub fn set_max_age(&mut self, secs: u32) {
        self.max_age = Some(secs);
        self.mark(OptionNumber::MAX_AGE);
    }

    pub fn block1(&self) -> Option<BlockInfo> {
        self.block1
    }

    pub fn set_block1(&mut self, block: BlockInfo) {
        self.block1 = Some(block);
        self.mark(OptionNumber::BLOCK1);
    }

    pub fn block2(&self) -> Option<BlockInfo> {
        self.block2
    }

    pub fn set_block2(&mut self, block: BlockInfo) {
        self.block2 = Some(block);
        self.mark(OptionNumber::BLOCK2);
    }

    pub fn size1(&self) -> Option<u32> {
        self.size1
    }

    pub fn set_size1(&mut self, size: u32) {
        self.size1 = Some(size);
        self.mark(OptionNumber::SIZE1);
    }

    pub fn size2(&self) -> Option<u32> {
        self.size2
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn set_payload(&mut self, payload: impl Into<Vec<u8>>) {
        self.payload = payload.into();
    }

    pub fn take_payload(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.payload)
    }
}

fn int_option(
    f: &mut dyn FnMut(OptionNumber, &[u8]) -> Result<(), Error>,
    number: OptionNumber,
    value: Option<u32>,
) -> Result<(), Error> {
    match value {
        Some(v) => f(number, &uint_to_be_minimal(v)),
        None => Ok(()),
    }
}

fn parse_block(value: &[u8]) -> Result<BlockInfo, Error> {
    let block = decode_int(value)
        .filter(|_| value.len() <= 3)
        .map(BlockInfo)
        .ok_or(Error::Coap(ResponseCode::BadOption))?;
    if !block.is_valid() {
        return Err(Error::Coap(ResponseCode::BadOption));
    }
    Ok(block)
}

fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

fn join_path(segments: &[String]) -> String {
    let mut out = String::new();
    for seg in segments {
        out.push('/');
        out.push_str(seg);
    }
    out
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Packet");
        d.field("kind", &self.kind())
            .field("code", &self.code())
            .field("mid", &self.mid)
            .field("token", &&self.token[..]);
        if !self.uri_path.is_empty() {
            d.field("uri_path", &join_path(&self.uri_path));
        }
        if !self.uri_query.is_empty() {
            d.field("uri_query", &self.uri_query);
        }
        if !self.location_path.is_empty() {
            d.field("location_path", &join_path(&self.location_path));
        }
        if let Some(o) = self.observe {
            d.field("observe", &o);
        }
        if let Some(c) = self.content_format {
            d.field("content_format", &c);
        }
        if let Some(b) = self.block1 {
            d.field("block1", &format_args!("{}", b));
        }
        if let Some(b) = self.block2 {
            d.field("block2", &format_args!("{}", b));
        }
        d.field("payload_len", &self.payload.len()).finish()
    }
}
