use std::fmt::Write;
use std::time::{Duration, Instant};

use super::context::Lwm2mContext;
use super::server::{security_of, ServerStatus};
use super::transaction::{Outcome, TransactionKind};
use super::{ClientState, Transport};
use crate::coap::{
    Code, ContentFormat, MessageType, Packet, ResponseCode, MAX_TRANSMIT_WAIT_SECS,
};
use crate::object::{ObjectRegistry, SECURITY_OBJECT_ID};
use crate::Error;

/// Link-format object list sent when registering,
/// `</>;rt="oma.lwm2m",</1/0>,</3/0>`. The Security object is never listed.
pub(crate) fn object_links(registry: &ObjectRegistry) -> String {
    let mut out = String::from("</>;rt=\"oma.lwm2m\"");
    for (object, instance) in registry.instance_pairs(SECURITY_OBJECT_ID) {
        match instance {
            Some(i) => {
                let _ = write!(out, ",</{}/{}>", object, i);
            }
            None => {
                let _ = write!(out, ",</{}>", object);
            }
        }
    }
    out
}

/// Time after a successful registration when the update is due.
pub(crate) fn update_interval(lifetime: u32) -> Duration {
    let lifetime = lifetime as u64;
    if lifetime > MAX_TRANSMIT_WAIT_SECS {
        Duration::from_secs(lifetime - MAX_TRANSMIT_WAIT_SECS)
    } else {
        Duration::from_secs(lifetime / 2)
    }
}

impl Lwm2mContext {
    fn registration_packet(&self, index: usize) -> Packet {
        let s = &self.servers[index];
        let mut p = Packet::new(MessageType::Confirmable, Code::Post, 0);
        p.set_uri_path("/rd");
        p.add_uri_query(format!("ep={}", self.endpoint));
        p.add_uri_query(format!("b={}", s.binding));
        if s.lifetime > 0 {
            p.add_uri_query(format!("lt={}", s.lifetime));
        }
        p.set_content_format(ContentFormat::LinkFormat);
        p.set_payload(object_links(&self.registry).into_bytes());
        p
    }

    fn update_packet(&self, index: usize, full: bool) -> Option<Packet> {
        let s = &self.servers[index];
        let location = s.location.as_deref()?;
        let mut p = Packet::new(MessageType::Confirmable, Code::Post, 0);
        p.set_uri_path(location);
        if full {
            p.add_uri_query(format!("lt={}", s.lifetime));
            p.add_uri_query(format!("b={}", s.binding));
            p.set_content_format(ContentFormat::LinkFormat);
            p.set_payload(object_links(&self.registry).into_bytes());
        }
        Some(p)
    }

    /// Open sessions to every deregistered server and send Register.
    ///
    /// Fails only if no server could be contacted at all.
    pub(super) fn register_start(&mut self, now: Instant, transport: &mut dyn Transport) -> Result<(), Error> {
        let mut started = 0;
        for index in 0..self.servers.len() {
            if self.servers[index].status != ServerStatus::Deregistered {
                continue;
            }
            match self.register_one(now, transport, index) {
                Ok(()) => started += 1,
                Err(e) => {
                    warn!("Register to server {} failed: {}", self.servers[index].short_id, e);
                    self.servers[index].status = ServerStatus::RegFailed;
                }
            }
        }
        if started == 0 && !self.servers.iter().any(|s| s.status.is_registered()) {
            return Err(Error::RegistrationFailed);
        }
        Ok(())
    }

    fn register_one(&mut self, now: Instant, transport: &mut dyn Transport, index: usize) -> Result<(), Error> {
        let security_id = self.servers[index].security_id;
        let session = match self.servers[index].session {
            Some(s) => s,
            None => {
                let security = security_of(&mut self.registry, security_id).ok_or(Error::NotFound)?;
                let s = transport.connect(now, &security)?;
                self.servers[index].session = Some(s);
                s
            }
        };
        let packet = self.registration_packet(index);
        let kind = TransactionKind::Register(self.servers[index].short_id);
        let mid = self.next_mid();
        self.transactions
            .start(now, transport, session, kind, packet, mid, &mut self.rng)?;
        debug!("Registering to server {}", self.servers[index].short_id);
        self.servers[index].status = ServerStatus::RegPending;
        Ok(())
    }

    fn update_one(&mut self, now: Instant, transport: &mut dyn Transport, index: usize, full: bool) -> Result<(), Error> {
        let session = self.servers[index].session.ok_or(Error::NotRegistered)?;
        let packet = self.update_packet(index, full).ok_or(Error::NotRegistered)?;
        let kind = TransactionKind::Update(self.servers[index].short_id);
        let mid = self.next_mid();
        self.transactions
            .start(now, transport, session, kind, packet, mid, &mut self.rng)?;
        debug!("Updating registration at server {}", self.servers[index].short_id);
        self.servers[index].status = ServerStatus::RegUpdatePending;
        Ok(())
    }

    /// Overall registration progress: registered if any server is.
    pub(super) fn registration_summary(&self) -> ServerStatus {
        let mut summary = ServerStatus::RegFailed;
        for s in &self.servers {
            match s.status {
                st if st.is_registered() => return ServerStatus::Registered,
                ServerStatus::RegPending => summary = ServerStatus::RegPending,
                _ => {}
            }
        }
        summary
    }

    /// Send due and requested registration updates.
    pub(super) fn registration_step(&mut self, now: Instant, transport: &mut dyn Transport, timeout: &mut Duration) {
        for index in 0..self.servers.len() {
            let s = &self.servers[index];
            let full = match s.status {
                ServerStatus::Registered => {
                    let Some(at) = s.registered_at else {
                        continue;
                    };
                    let due = at + update_interval(s.lifetime);
                    if now < due {
                        *timeout = (*timeout).min(due - now);
                        continue;
                    }
                    false
                }
                ServerStatus::RegUpdateNeeded => false,
                ServerStatus::RegFullUpdateNeeded => true,
                _ => continue,
            };
            if let Err(e) = self.update_one(now, transport, index, full) {
                warn!("Registration update to server {} failed: {}", self.servers[index].short_id, e);
                self.servers[index].status = ServerStatus::RegFailed;
            }
        }
    }

    /// Apply the outcome of a Register, Update or Deregister.
    pub(super) fn registration_complete(&mut self, now: Instant, kind: TransactionKind, outcome: Outcome) {
        let short_id = match kind {
            TransactionKind::Register(id) | TransactionKind::Update(id) | TransactionKind::Deregister(id) => id,
            TransactionKind::BootstrapRequest => return,
        };
        let Some(s) = self.servers.iter_mut().find(|s| s.short_id == short_id) else {
            return;
        };

        let code = match &outcome {
            Outcome::Response(p) => match p.code() {
                Code::Response(c) => Some(c),
                _ => None,
            },
            _ => None,
        };

        match kind {
            TransactionKind::Register(_) => {
                if let (Some(ResponseCode::Created), Outcome::Response(p)) = (code, &outcome) {
                    s.location = p.location_path_string();
                    s.registered_at = Some(now);
                    s.status = ServerStatus::Registered;
                    info!("Registered to server {} at {:?}", s.short_id, s.location);
                    return;
                }
                warn!("Registration to server {} failed: {:?}", s.short_id, code);
                s.status = ServerStatus::RegFailed;
                if matches!(outcome, Outcome::Reset) {
                    self.state = ClientState::Reset;
                }
            }
            TransactionKind::Update(_) => {
                if code == Some(ResponseCode::Changed) {
                    s.registered_at = Some(now);
                    s.status = ServerStatus::Registered;
                    debug!("Registration updated at server {}", s.short_id);
                    return;
                }
                warn!("Registration update at server {} failed: {:?}", s.short_id, code);
                s.status = ServerStatus::RegFailed;
                if matches!(outcome, Outcome::Reset) {
                    self.state = ClientState::Reset;
                }
            }
            TransactionKind::Deregister(_) => {
                debug!("Deregistered from server {}", s.short_id);
                s.status = ServerStatus::Deregistered;
                s.location = None;
                s.registered_at = None;
            }
            TransactionKind::BootstrapRequest => {}
        }
    }

    /// Ask registered servers for an update. `with_objects` sends lifetime,
    /// binding and the object list too.
    pub fn update_registration(&mut self, with_objects: bool) {
        for s in &mut self.servers {
            if s.status == ServerStatus::Registered || s.status == ServerStatus::RegUpdateNeeded {
                s.status = if with_objects {
                    ServerStatus::RegFullUpdateNeeded
                } else {
                    ServerStatus::RegUpdateNeeded
                };
            }
        }
    }

    /// Best effort Deregister to every registered server. No response is
    /// awaited.
    pub fn deregister(&mut self, now: Instant, transport: &mut dyn Transport) {
        for index in 0..self.servers.len() {
            let s = &self.servers[index];
            if !s.status.is_registered() {
                continue;
            }
            let (Some(session), Some(location)) = (s.session, s.location.clone()) else {
                continue;
            };
            let short_id = s.short_id;
            let mid = self.next_mid();
            let mut p = Packet::new(MessageType::Confirmable, Code::Delete, mid);
            p.set_uri_path(&location);
            let mut token = [0u8; 4];
            self.rng.fill(&mut token);
            let sent = p
                .set_token(&token)
                .and_then(|_| p.to_vec())
                .and_then(|bytes| transport.send(now, session, &bytes));
            if let Err(e) = sent {
                debug!("Deregister from server {} failed: {}", short_id, e);
            }
            self.observe_remove_server(short_id);
            let s = &mut self.servers[index];
            s.status = ServerStatus::Deregistered;
            s.location = None;
            s.registered_at = None;
        }
    }
}
