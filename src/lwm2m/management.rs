use std::fmt::Write;
use std::time::Instant;

use super::context::Lwm2mContext;
use super::server::ServerStatus;
use crate::coap::{Code, ContentFormat, Packet, ResponseCode};
use crate::data::{self, Data, Value};
use crate::object::{free_instance_id, SECURITY_OBJECT_ID, SERVER_OBJECT_ID};
use crate::objects::ids::server;
use crate::uri::Uri;
use crate::Error;

/// Response code for an error from the data layer.
pub(super) fn code_of(e: Error) -> ResponseCode {
    match e {
        Error::Coap(code) => code,
        Error::Parse(_) => ResponseCode::BadRequest,
        _ => ResponseCode::InternalServerError,
    }
}

/// `;dim=N` of a multiple resource.
fn dimension(d: &Data) -> Option<usize> {
    match &d.value {
        Value::MultiResource(c) => Some(c.len()),
        _ => None,
    }
}

/// Unwrap a write payload to the resources of one instance.
///
/// A TLV payload may carry the instance record itself. For a resource URI
/// only that resource may be present.
fn instance_payload(uri: &Uri, mut data: Vec<Data>) -> Result<Vec<Data>, ResponseCode> {
    if let [Data {
        id,
        value: Value::Instance(_),
    }] = data.as_slice()
    {
        if Some(*id) != uri.instance_id() {
            return Err(ResponseCode::BadRequest);
        }
        if let Some(Data {
            value: Value::Instance(children),
            ..
        }) = data.pop()
        {
            data = children;
        }
    }
    if data.iter().any(|d| matches!(d.value, Value::Instance(_) | Value::Object(_))) {
        return Err(ResponseCode::BadRequest);
    }
    if let Some(res) = uri.resource_id() {
        if data.iter().any(|d| d.id != res) {
            return Err(ResponseCode::BadRequest);
        }
    }
    Ok(data)
}

impl Lwm2mContext {
    /// Read `uri` into a data tree. Object reads yield one
    /// [`Value::Instance`] per instance.
    pub(super) fn read_uri(&mut self, uri: &Uri) -> Result<Vec<Data>, ResponseCode> {
        let obj = self
            .registry
            .get_mut(uri.object_id())
            .ok_or(ResponseCode::NotFound)?;

        let Some(inst) = uri.instance_id() else {
            let mut out = Vec::new();
            for i in obj.instances() {
                let mut resources = Vec::new();
                obj.read(i, &mut resources)?;
                out.push(Data::new(i, Value::Instance(resources)));
            }
            return Ok(out);
        };

        if !obj.instances().contains(&inst) {
            return Err(ResponseCode::NotFound);
        }

        let mut data = Vec::new();
        if let Some(res) = uri.resource_id() {
            data.push(Data::undefined(res));
        }
        obj.read(inst, &mut data)?;
        if let Some(res) = uri.resource_id() {
            if !data.iter().any(|d| d.id == res && d.value != Value::Undefined) {
                return Err(ResponseCode::NotFound);
            }
        }
        Ok(data)
    }

    /// Write parsed data to an instance or resource.
    pub(super) fn write_uri(&mut self, uri: &Uri, data: Vec<Data>, replace: bool) -> Result<(), ResponseCode> {
        let Some(inst) = uri.instance_id() else {
            return Err(ResponseCode::MethodNotAllowed);
        };
        let data = instance_payload(uri, data)?;
        let obj = self
            .registry
            .get_mut(uri.object_id())
            .ok_or(ResponseCode::NotFound)?;
        if !obj.instances().contains(&inst) {
            return Err(ResponseCode::NotFound);
        }
        obj.write(inst, &data, replace)?;
        self.resource_value_changed(uri);
        Ok(())
    }

    /// Create an instance of object `object`. The id comes from an instance
    /// record in the payload, or is the lowest free one.
    pub(super) fn create_instance(&mut self, object: u16, data: Vec<Data>) -> Result<u16, ResponseCode> {
        let obj = self.registry.get_mut(object).ok_or(ResponseCode::NotFound)?;
        let used = obj.instances();

        let wrapped = match data.as_slice() {
            [Data {
                id,
                value: Value::Instance(_),
            }] => Some(*id),
            _ => None,
        };
        let (id, resources) = match wrapped {
            Some(id) => match data.into_iter().next() {
                Some(Data {
                    value: Value::Instance(children),
                    ..
                }) => (id, children),
                _ => (id, Vec::new()),
            },
            None => {
                let id = free_instance_id(&used).ok_or(ResponseCode::InternalServerError)?;
                (id, data)
            }
        };
        if used.contains(&id) {
            return Err(ResponseCode::BadRequest);
        }

        obj.create(id, &resources)?;
        self.resource_value_changed(&Uri::object(object));
        Ok(id)
    }

    /// CoRE link format description of `uri`, with the attributes `server`
    /// has set.
    pub(super) fn discover(&mut self, uri: &Uri, server: Option<u16>) -> Result<String, ResponseCode> {
        let object = uri.object_id();
        let obj = self.registry.get_mut(object).ok_or(ResponseCode::NotFound)?;

        let instances = match uri.instance_id() {
            Some(i) if obj.instances().contains(&i) => vec![i],
            Some(_) => return Err(ResponseCode::NotFound),
            None => obj.instances(),
        };

        let mut links: Vec<(Uri, Option<usize>)> = Vec::new();
        if uri.is_object() {
            links.push((*uri, None));
        }
        for inst in instances {
            let mut data = Vec::new();
            obj.discover(inst, &mut data)?;
            match uri.resource_id() {
                Some(res) => {
                    let d = data
                        .iter()
                        .find(|d| d.id == res)
                        .ok_or(ResponseCode::NotFound)?;
                    links.push((*uri, dimension(d)));
                }
                None => {
                    links.push((Uri::instance(object, inst), None));
                    for d in &data {
                        links.push((Uri::resource(object, inst, d.id), dimension(d)));
                    }
                }
            }
        }

        let mut out = String::new();
        for (i, (link, dim)) in links.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            let _ = write!(out, "<{}>", link);
            if let Some(dim) = dim {
                let _ = write!(out, ";dim={}", dim);
            }
            if let Some(attrs) = server.and_then(|s| self.own_attributes(link, s)) {
                attrs.write_link_params(&mut out);
            }
        }
        Ok(out)
    }

    /// Answer a request from device management server `index`.
    pub(super) fn dm_request(
        &mut self,
        now: Instant,
        index: usize,
        req: &Packet,
        payload: &[u8],
        resp: &mut Packet,
    ) -> ResponseCode {
        let short_id = self.servers[index].short_id;
        let uri = match Uri::from_segments(req.uri_path()) {
            Ok(Some(uri)) => uri,
            Ok(None) => return ResponseCode::MethodNotAllowed,
            Err(_) => return ResponseCode::BadRequest,
        };
        if uri.object_id() == SECURITY_OBJECT_ID || !self.registry.contains(uri.object_id()) {
            return ResponseCode::NotFound;
        }

        let result = match req.code() {
            Code::Get => self.dm_get(now, short_id, &uri, req, resp),
            Code::Put if payload.is_empty() && !req.uri_query().is_empty() => self
                .write_attributes(now, &uri, short_id, req.uri_query())
                .map(|_| ResponseCode::Changed),
            Code::Put => self.dm_write(&uri, req, payload, uri.is_instance()),
            Code::Post if uri.is_object() => {
                let format = req.content_format().unwrap_or(ContentFormat::Tlv);
                data::parse(&uri, format, payload)
                    .map_err(code_of)
                    .and_then(|data| self.create_instance(uri.object_id(), data))
                    .map(|id| {
                        resp.set_location_path(&format!("/{}/{}", uri.object_id(), id));
                        ResponseCode::Created
                    })
            }
            Code::Post if uri.is_instance() => self.dm_write(&uri, req, payload, false),
            Code::Post => self.dm_execute(&uri, payload),
            Code::Delete => self.dm_delete(&uri),
            _ => Err(ResponseCode::MethodNotAllowed),
        };
        result.unwrap_or_else(|code| code)
    }

    fn dm_get(
        &mut self,
        now: Instant,
        short_id: u16,
        uri: &Uri,
        req: &Packet,
        resp: &mut Packet,
    ) -> Result<ResponseCode, ResponseCode> {
        let accept = req.accept();
        if accept == Some(ContentFormat::LinkFormat) {
            let links = self.discover(uri, Some(short_id))?;
            resp.set_content_format(ContentFormat::LinkFormat);
            resp.set_payload(links.into_bytes());
            return Ok(ResponseCode::Content);
        }

        if let Some(inst) = uri.instance_id() {
            if !self.registry.has_instance(uri.object_id(), inst) {
                return Err(ResponseCode::NotFound);
            }
        }

        if req.observe() == Some(1) {
            self.observe_cancel(uri, short_id);
        }

        let data = self.read_uri(uri)?;
        let (format, bytes) = data::serialize(uri, &data, accept).map_err(code_of)?;

        if req.observe() == Some(0) {
            let counter = self.observe_add(now, uri, short_id, req.token(), accept);
            resp.set_observe(counter);
        }

        resp.set_content_format(format);
        resp.set_payload(bytes);
        Ok(ResponseCode::Content)
    }

    fn dm_write(&mut self, uri: &Uri, req: &Packet, payload: &[u8], replace: bool) -> Result<ResponseCode, ResponseCode> {
        if uri.is_object() {
            return Err(ResponseCode::MethodNotAllowed);
        }
        let format = req.content_format().unwrap_or(ContentFormat::Text);
        let data = data::parse(uri, format, payload).map_err(code_of)?;
        self.write_uri(uri, data, replace)?;
        Ok(ResponseCode::Changed)
    }

    fn dm_execute(&mut self, uri: &Uri, args: &[u8]) -> Result<ResponseCode, ResponseCode> {
        let (Some(inst), Some(res)) = (uri.instance_id(), uri.resource_id()) else {
            return Err(ResponseCode::MethodNotAllowed);
        };
        if !self.registry.has_instance(uri.object_id(), inst) {
            return Err(ResponseCode::NotFound);
        }
        let obj = self
            .registry
            .get_mut(uri.object_id())
            .ok_or(ResponseCode::NotFound)?;
        obj.execute(inst, res, args)?;

        if uri.object_id() == SERVER_OBJECT_ID && res == server::RES_UPDATE_TRIGGER {
            let sid = self
                .registry
                .read_value(SERVER_OBJECT_ID, inst, server::RES_SHORT_SERVER_ID)
                .and_then(|v| v.as_int());
            for s in &mut self.servers {
                if Some(s.short_id as i64) == sid && s.status == ServerStatus::Registered {
                    debug!("Registration update triggered for server {}", s.short_id);
                    s.status = ServerStatus::RegUpdateNeeded;
                }
            }
        }
        Ok(ResponseCode::Changed)
    }

    fn dm_delete(&mut self, uri: &Uri) -> Result<ResponseCode, ResponseCode> {
        let Some(inst) = uri.instance_id().filter(|_| uri.is_instance()) else {
            return Err(ResponseCode::MethodNotAllowed);
        };
        let obj = self
            .registry
            .get_mut(uri.object_id())
            .ok_or(ResponseCode::NotFound)?;
        obj.delete(inst)?;
        self.observe_remove_uri(uri);
        self.resource_value_changed(&Uri::object(uri.object_id()));
        Ok(ResponseCode::Deleted)
    }
}
