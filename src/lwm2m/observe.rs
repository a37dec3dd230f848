use std::fmt;
use std::time::{Duration, Instant};

use tinyvec::ArrayVec;

use super::context::Lwm2mContext;
use super::Transport;
use crate::coap::{ContentFormat, MessageType, Packet, ResponseCode, MAX_TOKEN_LEN};
use crate::data::{self, Value};
use crate::object::{ObjectRegistry, SERVER_OBJECT_ID};
use crate::objects::ids::server;
use crate::uri::Uri;

/// Largest Observe option value (24 bits).
const OBSERVE_MAX: u32 = 0x00FF_FFFF;

/// Notification attributes set with Write-Attributes.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Attributes {
    pub pmin: Option<u32>,
    pub pmax: Option<u32>,
    pub gt: Option<f64>,
    pub lt: Option<f64>,
    pub st: Option<f64>,
}

impl Attributes {
    pub fn is_empty(&self) -> bool {
        *self == Attributes::default()
    }

    /// Any of the value conditions `gt`, `lt` or `st` is set.
    pub fn has_conditions(&self) -> bool {
        self.gt.is_some() || self.lt.is_some() || self.st.is_some()
    }

    /// `pmin <= pmax`, and `lt + 2 * st < gt` when all three are set.
    pub fn is_valid(&self) -> bool {
        if let (Some(pmin), Some(pmax)) = (self.pmin, self.pmax) {
            if pmin > pmax {
                return false;
            }
        }
        if let (Some(lt), Some(gt)) = (self.lt, self.gt) {
            let st = self.st.unwrap_or(0.0);
            if lt + 2.0 * st >= gt {
                return false;
            }
        }
        if matches!(self.st, Some(st) if st < 0.0) {
            return false;
        }
        true
    }

    /// Whether moving from `old` to `new` crosses a threshold or steps far
    /// enough. Periods are not considered here.
    pub fn should_notify(&self, old: f64, new: f64) -> bool {
        let crosses = |t: f64| (new <= t && old > t) || (new >= t && old < t);
        if self.lt.map(crosses).unwrap_or(false) {
            return true;
        }
        if self.gt.map(crosses).unwrap_or(false) {
            return true;
        }
        if let Some(st) = self.st {
            if (new - old).abs() >= st {
                return true;
            }
        }
        false
    }

    /// Apply one Uri-Query of a Write-Attributes request. A name without a
    /// value removes the attribute.
    pub fn apply_query(&mut self, query: &str) -> Result<(), ResponseCode> {
        let bad = ResponseCode::BadRequest;
        let (name, value) = match query.split_once('=') {
            Some((n, v)) => (n, Some(v)),
            None => (query, None),
        };
        let period = |v: Option<&str>| -> Result<Option<u32>, ResponseCode> {
            v.map(|v| v.parse::<u32>().map_err(|_| bad)).transpose()
        };
        let number = |v: Option<&str>| -> Result<Option<f64>, ResponseCode> {
            v.map(|v| v.parse::<f64>().ok().filter(|f| f.is_finite()).ok_or(bad))
                .transpose()
        };
        match name {
            "pmin" => self.pmin = period(value)?,
            "pmax" => self.pmax = period(value)?,
            "gt" => self.gt = number(value)?,
            "lt" => self.lt = number(value)?,
            "st" => self.st = number(value)?,
            _ => {
                debug!("Unknown attribute {}", name);
                return Err(bad);
            }
        }
        Ok(())
    }

    /// Link-format parameters, `;pmin=10;gt=20`.
    pub fn write_link_params(&self, out: &mut String) {
        use std::fmt::Write;
        if let Some(v) = self.pmin {
            let _ = write!(out, ";pmin={}", v);
        }
        if let Some(v) = self.pmax {
            let _ = write!(out, ";pmax={}", v);
        }
        if let Some(v) = self.gt {
            let _ = write!(out, ";gt={}", v);
        }
        if let Some(v) = self.lt {
            let _ = write!(out, ";lt={}", v);
        }
        if let Some(v) = self.st {
            let _ = write!(out, ";st={}", v);
        }
    }
}

/// One server's interest in an observed URI.
pub(crate) struct Watcher {
    pub server: u16,
    pub token: ArrayVec<[u8; MAX_TOKEN_LEN]>,
    pub format: Option<ContentFormat>,
    pub attributes: Option<Attributes>,
    pub last_time: Instant,
    pub last_value: Option<f64>,
    pub counter: u32,
    pub last_mid: Option<u16>,
    pub update: bool,
    /// Attributes-only entries are inactive until the server observes.
    pub active: bool,
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("server", &self.server)
            .field("counter", &self.counter)
            .field("update", &self.update)
            .field("active", &self.active)
            .finish()
    }
}

impl Watcher {
    fn new(server: u16, now: Instant) -> Self {
        Watcher {
            server,
            token: ArrayVec::new(),
            format: None,
            attributes: None,
            last_time: now,
            last_value: None,
            counter: 0,
            last_mid: None,
            update: false,
            active: false,
        }
    }

    fn next_counter(&mut self) -> u32 {
        let c = self.counter;
        self.counter = (self.counter + 1) & OBSERVE_MAX;
        c
    }
}

#[derive(Debug)]
pub(crate) struct Observed {
    pub uri: Uri,
    pub watchers: Vec<Watcher>,
}

/// Default periods of the Server object instance for `short_id`.
fn server_defaults(registry: &mut ObjectRegistry, short_id: u16) -> (Option<u32>, Option<u32>) {
    let instances = match registry.get_mut(SERVER_OBJECT_ID) {
        Some(o) => o.instances(),
        None => return (None, None),
    };
    for inst in instances {
        let sid = registry
            .read_value(SERVER_OBJECT_ID, inst, server::RES_SHORT_SERVER_ID)
            .and_then(|v| v.as_int());
        if sid != Some(short_id as i64) {
            continue;
        }
        let period = |v: Option<Value>| v.and_then(|v| v.as_int()).and_then(|n| u32::try_from(n).ok());
        let pmin = period(registry.read_value(SERVER_OBJECT_ID, inst, server::RES_DEFAULT_PMIN));
        let pmax = period(registry.read_value(SERVER_OBJECT_ID, inst, server::RES_DEFAULT_PMAX));
        return (pmin, pmax);
    }
    (None, None)
}

impl Lwm2mContext {
    fn find_observed(&self, uri: &Uri) -> Option<usize> {
        self.observed.iter().position(|o| o.uri == *uri)
    }

    fn watcher_mut(&mut self, uri: &Uri, server: u16, now: Instant) -> &mut Watcher {
        let idx = match self.find_observed(uri) {
            Some(i) => i,
            None => {
                self.observed.push(Observed {
                    uri: *uri,
                    watchers: Vec::new(),
                });
                self.observed.len() - 1
            }
        };
        let watchers = &mut self.observed[idx].watchers;
        let w = match watchers.iter().position(|w| w.server == server) {
            Some(w) => w,
            None => {
                watchers.push(Watcher::new(server, now));
                watchers.len() - 1
            }
        };
        &mut watchers[w]
    }

    /// Attributes set directly on `uri` by `server`.
    pub(super) fn own_attributes(&self, uri: &Uri, server: u16) -> Option<Attributes> {
        let o = &self.observed[self.find_observed(uri)?];
        o.watchers
            .iter()
            .find(|w| w.server == server)
            .and_then(|w| w.attributes)
    }

    /// Attributes in force for `uri`: its own, then periods inherited from the
    /// instance and object levels, then the server defaults.
    fn effective_attributes(&mut self, uri: &Uri, server: u16) -> Attributes {
        let mut attrs = self.own_attributes(uri, server).unwrap_or_default();
        let mut parent = uri.parent();
        while let Some(p) = parent {
            if let Some(a) = self.own_attributes(&p, server) {
                attrs.pmin = attrs.pmin.or(a.pmin);
                attrs.pmax = attrs.pmax.or(a.pmax);
            }
            parent = p.parent();
        }
        if attrs.pmin.is_none() || attrs.pmax.is_none() {
            let (pmin, pmax) = server_defaults(&mut self.registry, server);
            attrs.pmin = attrs.pmin.or(pmin);
            attrs.pmax = attrs.pmax.or(pmax);
        }
        attrs
    }

    fn numeric_value(&mut self, uri: &Uri) -> Option<f64> {
        if !uri.is_resource() {
            return None;
        }
        let data = self.read_uri(uri).ok()?;
        match data.as_slice() {
            [d] => d.value.as_numeric(),
            _ => None,
        }
    }

    /// Start or refresh an observation. Returns the Observe value for the
    /// response.
    pub(super) fn observe_add(
        &mut self,
        now: Instant,
        uri: &Uri,
        server: u16,
        token: &[u8],
        format: Option<ContentFormat>,
    ) -> u32 {
        let value = self.numeric_value(uri);
        let w = self.watcher_mut(uri, server, now);
        w.token.clear();
        w.token.extend_from_slice(token);
        w.format = format;
        w.active = true;
        w.update = false;
        w.last_time = now;
        w.last_value = value;
        w.last_mid = None;
        debug!("Observe {} by server {}", uri, server);
        w.next_counter()
    }

    /// Observe=1. Attributes of the watcher survive.
    pub(super) fn observe_cancel(&mut self, uri: &Uri, server: u16) {
        let Some(idx) = self.find_observed(uri) else {
            return;
        };
        let o = &mut self.observed[idx];
        let uri = o.uri;
        o.watchers.retain_mut(|w| {
            if w.server != server {
                return true;
            }
            debug!("Cancel observation of {} by server {}", uri, server);
            w.active = false;
            w.attributes.is_some()
        });
        if o.watchers.is_empty() {
            self.observed.remove(idx);
        }
    }

    /// RST to a notification cancels the watcher it was sent for.
    pub(super) fn observe_reset(&mut self, server: u16, mid: u16) {
        for o in &mut self.observed {
            for w in &mut o.watchers {
                if w.server == server && w.active && w.last_mid == Some(mid) {
                    debug!("Notification of {} reset, cancelling", o.uri);
                    w.active = false;
                }
            }
            o.watchers.retain(|w| w.active || w.attributes.is_some());
        }
        self.observed.retain(|o| !o.watchers.is_empty());
    }

    /// Drop observations of `uri` and everything below it.
    pub(super) fn observe_remove_uri(&mut self, uri: &Uri) {
        self.observed.retain(|o| !uri.contains(&o.uri));
    }

    /// Drop every watcher of `server`.
    pub(super) fn observe_remove_server(&mut self, server: u16) {
        for o in &mut self.observed {
            o.watchers.retain(|w| w.server != server);
        }
        self.observed.retain(|o| !o.watchers.is_empty());
    }

    /// Write-Attributes from `server` on `uri`.
    pub(super) fn write_attributes(
        &mut self,
        now: Instant,
        uri: &Uri,
        server: u16,
        queries: &[String],
    ) -> Result<(), ResponseCode> {
        let mut attrs = self.own_attributes(uri, server).unwrap_or_default();
        for q in queries {
            attrs.apply_query(q)?;
        }
        if attrs.has_conditions() && !uri.is_resource() {
            return Err(ResponseCode::BadRequest);
        }
        if !attrs.is_valid() {
            return Err(ResponseCode::BadRequest);
        }
        let w = self.watcher_mut(uri, server, now);
        w.attributes = if attrs.is_empty() { None } else { Some(attrs) };
        if !w.active && w.attributes.is_none() {
            self.observe_cancel(uri, server);
        }
        Ok(())
    }

    /// Flag every observation overlapping `uri` for re-evaluation.
    pub fn resource_value_changed(&mut self, uri: &Uri) {
        for o in &mut self.observed {
            if o.uri.contains(uri) || uri.contains(&o.uri) {
                for w in &mut o.watchers {
                    if w.active {
                        w.update = true;
                    }
                }
            }
        }
    }

    /// Send due notifications and shrink `timeout` to the next pmin or pmax
    /// deadline.
    pub(super) fn observe_step(&mut self, now: Instant, transport: &mut dyn Transport, timeout: &mut Duration) {
        for idx in 0..self.observed.len() {
            let uri = self.observed[idx].uri;
            let mut current: Option<Option<f64>> = None;
            let mut payload: Option<(Option<ContentFormat>, ContentFormat, Vec<u8>)> = None;

            for w_idx in 0..self.observed[idx].watchers.len() {
                let (server, active, update, last_time, last_value) = {
                    let w = &self.observed[idx].watchers[w_idx];
                    (w.server, w.active, w.update, w.last_time, w.last_value)
                };
                if !active {
                    continue;
                }
                let Some(session) = self
                    .servers
                    .iter()
                    .find(|s| s.short_id == server && s.status.is_registered())
                    .and_then(|s| s.session)
                else {
                    continue;
                };

                let attrs = self.effective_attributes(&uri, server);
                let elapsed = now.saturating_duration_since(last_time);
                let mut notify = false;
                let mut keep_update = false;

                if update {
                    let new = match current {
                        Some(v) => v,
                        None => {
                            let v = self.numeric_value(&uri);
                            current = Some(v);
                            v
                        }
                    };
                    notify = match (attrs.has_conditions(), last_value, new) {
                        (false, _, _) => true,
                        (true, Some(old), Some(new)) => attrs.should_notify(old, new),
                        (true, None, Some(_)) => true,
                        (true, _, None) => false,
                    };
                    if let Some(pmin) = attrs.pmin {
                        let pmin = Duration::from_secs(pmin as u64);
                        if notify && elapsed < pmin {
                            notify = false;
                            keep_update = true;
                            *timeout = (*timeout).min(pmin - elapsed);
                        }
                    }
                }

                if !notify {
                    if let Some(pmax) = attrs.pmax.filter(|p| *p > 0) {
                        let pmax = Duration::from_secs(pmax as u64);
                        if elapsed >= pmax {
                            notify = true;
                        } else {
                            *timeout = (*timeout).min(pmax - elapsed);
                        }
                    }
                }

                if !notify {
                    self.observed[idx].watchers[w_idx].update = keep_update;
                    continue;
                }

                let format = self.observed[idx].watchers[w_idx].format;
                let cached = matches!(&payload, Some((f, _, _)) if *f == format);
                if !cached {
                    let data = match self.read_uri(&uri) {
                        Ok(d) => d,
                        Err(code) => {
                            debug!("Read of observed {} failed: {}", uri, code);
                            continue;
                        }
                    };
                    match data::serialize(&uri, &data, format) {
                        Ok((cf, bytes)) => payload = Some((format, cf, bytes)),
                        Err(e) => {
                            debug!("Serializing {} failed: {}", uri, e);
                            continue;
                        }
                    }
                }
                let Some((_, cf, bytes)) = payload.as_ref() else {
                    continue;
                };
                if current.is_none() {
                    current = Some(self.numeric_value(&uri));
                }

                let mid = self.next_mid();
                let w = &mut self.observed[idx].watchers[w_idx];
                let mut packet = Packet::new(MessageType::NonConfirmable, ResponseCode::Content, mid);
                if packet.set_token(&w.token).is_err() {
                    continue;
                }
                packet.set_observe(w.counter);
                packet.set_content_format(*cf);
                packet.set_payload(bytes.clone());

                trace!("Notify {} to server {} mid {}", uri, server, mid);
                let sent = packet
                    .to_vec()
                    .and_then(|out| transport.send(now, session, &out));
                if let Err(e) = sent {
                    // Left pending, the next step tries again.
                    debug!("Notification of {} failed: {}", uri, e);
                    continue;
                }
                w.next_counter();
                w.last_time = now;
                w.last_value = current.flatten();
                w.last_mid = Some(mid);
                w.update = false;
            }
        }
    }
}
