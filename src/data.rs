//! Resource values and their TLV / plain text / opaque encodings.

use crate::bytes::{
    float_to_text, float_to_tlv, int_to_text, int_to_tlv, text_to_float, text_to_int, tlv_to_float,
    tlv_to_int,
};
use crate::coap::{ContentFormat, ResponseCode};
use crate::tlv::{self, TlvIter, TlvKind};
use crate::uri::Uri;
use crate::Error;

/// One node of a resource tree: an id and its value.
#[derive(Debug, Clone, PartialEq)]
pub struct Data {
    pub id: u16,
    pub value: Value,
}

/// Value of a [`Data`] node.
///
/// Containers own their children. Values parsed from TLV arrive as
/// [`Value::Opaque`] and values parsed from plain text as [`Value::String`],
/// since neither format carries the type; the `as_*` accessors interpret them.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Instances of an object.
    Object(Vec<Data>),
    /// Resources of one instance.
    Instance(Vec<Data>),
    /// Instances of a multiple resource.
    MultiResource(Vec<Data>),
    String(String),
    Opaque(Vec<u8>),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    ObjectLink(u16, u16),
    /// Placeholder for a requested resource not yet filled in.
    Undefined,
}

impl Data {
    pub fn new(id: u16, value: Value) -> Self {
        Data { id, value }
    }

    /// A request slot for `id`, filled in by an object's `read`.
    pub fn undefined(id: u16) -> Self {
        Data::new(id, Value::Undefined)
    }

    pub fn int(id: u16, value: i64) -> Self {
        Data::new(id, Value::Integer(value))
    }

    pub fn float(id: u16, value: f64) -> Self {
        Data::new(id, Value::Float(value))
    }

    pub fn bool(id: u16, value: bool) -> Self {
        Data::new(id, Value::Boolean(value))
    }

    pub fn string(id: u16, value: impl Into<String>) -> Self {
        Data::new(id, Value::String(value.into()))
    }

    pub fn opaque(id: u16, value: impl Into<Vec<u8>>) -> Self {
        Data::new(id, Value::Opaque(value.into()))
    }

    pub fn children(&self) -> Option<&[Data]> {
        match &self.value {
            Value::Object(c) | Value::Instance(c) | Value::MultiResource(c) => Some(c.as_slice()),
            _ => None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children().is_none()
    }
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            Value::Boolean(b) => Some(*b as i64),
            Value::String(s) => text_to_int(s.as_bytes()),
            Value::Opaque(b) => tlv_to_int(b),
            Value::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Integer(v) => Some(*v as f64),
            Value::String(s) => text_to_float(s.as_bytes()),
            Value::Opaque(b) => tlv_to_float(b),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            Value::Integer(0) => Some(false),
            Value::Integer(1) => Some(true),
            Value::String(s) => match s.as_str() {
                "0" | "false" => Some(false),
                "1" | "true" => Some(true),
                _ => None,
            },
            Value::Opaque(b) if b.len() == 1 => match b[0] {
                0 => Some(false),
                1 => Some(true),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            Value::Opaque(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::String(s) => Some(s.as_bytes()),
            Value::Opaque(b) => Some(b.as_slice()),
            _ => None,
        }
    }

    pub fn as_object_link(&self) -> Option<(u16, u16)> {
        match self {
            Value::ObjectLink(o, i) => Some((*o, *i)),
            Value::Opaque(b) if b.len() == 4 => Some((
                u16::from_be_bytes([b[0], b[1]]),
                u16::from_be_bytes([b[2], b[3]]),
            )),
            Value::String(s) => {
                let (o, i) = s.split_once(':')?;
                Some((o.parse().ok()?, i.parse().ok()?))
            }
            _ => None,
        }
    }

    /// Numeric view used by observation thresholds.
    pub fn as_numeric(&self) -> Option<f64> {
        match self {
            Value::Integer(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Boolean(b) => Some(*b as u8 as f64),
            Value::String(s) => text_to_float(s.as_bytes()),
            _ => None,
        }
    }
}

/// Encode a leaf value as TLV payload bytes.
fn leaf_tlv_bytes(value: &Value, out: &mut Vec<u8>) -> Result<(), Error> {
    match value {
        Value::String(s) => out.extend_from_slice(s.as_bytes()),
        Value::Opaque(b) => out.extend_from_slice(b),
        Value::Integer(v) => out.extend_from_slice(&int_to_tlv(*v)),
        Value::Float(v) => out.extend_from_slice(&float_to_tlv(*v)),
        Value::Boolean(b) => out.push(*b as u8),
        Value::ObjectLink(o, i) => {
            out.extend_from_slice(&o.to_be_bytes());
            out.extend_from_slice(&i.to_be_bytes());
        }
        Value::Undefined => return Err(Error::Coap(ResponseCode::NotFound)),
        Value::Object(_) | Value::Instance(_) | Value::MultiResource(_) => {
            return Err(Error::BadParameter("container is not a leaf"));
        }
    }
    Ok(())
}

fn encode_tlv(data: &Data, in_multi: bool, out: &mut Vec<u8>) -> Result<(), Error> {
    let mut body = Vec::new();
    let kind = match &data.value {
        Value::Object(instances) => {
            // An object has no TLV of its own, only its instances.
            for i in instances {
                encode_tlv(i, false, out)?;
            }
            return Ok(());
        }
        Value::Instance(resources) => {
            for r in resources {
                encode_tlv(r, false, &mut body)?;
            }
            TlvKind::ObjectInstance
        }
        Value::MultiResource(instances) => {
            for r in instances {
                encode_tlv(r, true, &mut body)?;
            }
            TlvKind::MultipleResource
        }
        leaf => {
            leaf_tlv_bytes(leaf, &mut body)?;
            if in_multi {
                TlvKind::ResourceInstance
            } else {
                TlvKind::Resource
            }
        }
    };
    tlv::encode(kind, data.id, &body, out)?;
    Ok(())
}

/// TLV encoding of a list of nodes, back to back.
pub fn to_tlv(data: &[Data]) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    for d in data {
        encode_tlv(d, false, &mut out)?;
    }
    Ok(out)
}

/// Plain text encoding of a single leaf.
pub fn to_text(value: &Value) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    match value {
        Value::String(s) => out.extend_from_slice(s.as_bytes()),
        Value::Integer(v) => int_to_text(*v, &mut out),
        Value::Float(v) => float_to_text(*v, &mut out),
        Value::Boolean(b) => out.push(if *b { b'1' } else { b'0' }),
        Value::ObjectLink(o, i) => {
            int_to_text(*o as i64, &mut out);
            out.push(b':');
            int_to_text(*i as i64, &mut out);
        }
        _ => return Err(Error::Coap(ResponseCode::NotAcceptable)),
    }
    Ok(out)
}

/// Serialize the result of a read for `uri`.
///
/// A single leaf resource uses plain text (opaque for binary values) unless
/// TLV is asked for; everything else is TLV.
pub fn serialize(
    uri: &Uri,
    data: &[Data],
    accept: Option<ContentFormat>,
) -> Result<(ContentFormat, Vec<u8>), Error> {
    let single_leaf = uri.is_resource() && data.len() == 1 && data[0].is_leaf();

    match accept {
        None | Some(ContentFormat::Text) | Some(ContentFormat::Opaque) if single_leaf => {
            let value = &data[0].value;
            if let Value::Opaque(b) = value {
                if accept == Some(ContentFormat::Text) {
                    return Err(Error::Coap(ResponseCode::NotAcceptable));
                }
                return Ok((ContentFormat::Opaque, b.clone()));
            }
            if accept == Some(ContentFormat::Opaque) {
                return Err(Error::Coap(ResponseCode::NotAcceptable));
            }
            Ok((ContentFormat::Text, to_text(value)?))
        }
        None | Some(ContentFormat::Tlv) | Some(ContentFormat::OldTlv) => {
            Ok((ContentFormat::Tlv, to_tlv(data)?))
        }
        _ => Err(Error::Coap(ResponseCode::NotAcceptable)),
    }
}

fn decode_tlv_list(buf: &[u8], parent: Option<TlvKind>) -> Result<Vec<Data>, Error> {
    let mut it = TlvIter::new(buf);
    let mut out = Vec::new();
    for t in it.by_ref() {
        let allowed = match parent {
            None => true,
            Some(TlvKind::ObjectInstance) => {
                matches!(t.kind, TlvKind::Resource | TlvKind::MultipleResource)
            }
            Some(TlvKind::MultipleResource) => t.kind == TlvKind::ResourceInstance,
            Some(_) => false,
        };
        if !allowed {
            return Err(Error::Coap(ResponseCode::BadRequest));
        }
        let value = match t.kind {
            TlvKind::ObjectInstance => Value::Instance(decode_tlv_list(t.value, Some(t.kind))?),
            TlvKind::MultipleResource => {
                Value::MultiResource(decode_tlv_list(t.value, Some(t.kind))?)
            }
            TlvKind::Resource | TlvKind::ResourceInstance => Value::Opaque(t.value.to_vec()),
        };
        out.push(Data::new(t.id, value));
    }
    if !it.is_complete() {
        debug!("Malformed TLV payload");
        return Err(Error::Coap(ResponseCode::BadRequest));
    }
    Ok(out)
}

/// Parse a write payload addressed to `uri`.
pub fn parse(uri: &Uri, format: ContentFormat, payload: &[u8]) -> Result<Vec<Data>, Error> {
    match format {
        ContentFormat::Text | ContentFormat::Opaque => {
            let Some(id) = uri.resource_id() else {
                return Err(Error::Coap(ResponseCode::BadRequest));
            };
            let value = if format == ContentFormat::Text {
                let s = std::str::from_utf8(payload)
                    .map_err(|_| Error::Coap(ResponseCode::BadRequest))?;
                Value::String(s.to_owned())
            } else {
                Value::Opaque(payload.to_vec())
            };
            Ok(vec![Data::new(id, value)])
        }
        ContentFormat::Tlv | ContentFormat::OldTlv => decode_tlv_list(payload, None),
        _ => Err(Error::Coap(ResponseCode::UnsupportedContentFormat)),
    }
}
