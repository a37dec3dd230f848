use std::time::{Duration, Instant};

use super::context::Lwm2mContext;
use super::management::code_of;
use super::server::{security_of, ServerStatus};
use super::transaction::{Outcome, TransactionKind};
use super::Transport;
use crate::coap::{Code, ContentFormat, MessageType, Packet, ResponseCode, EXCHANGE_LIFETIME_SECS};
use crate::data::{self, Data, Value};
use crate::object::{SECURITY_OBJECT_ID, SERVER_OBJECT_ID};
use crate::objects::ServerObject;
use crate::uri::Uri;
use crate::Error;

fn pending_deadline(now: Instant) -> Instant {
    now + Duration::from_secs(EXCHANGE_LIFETIME_SECS)
}

impl Lwm2mContext {
    /// Begin a client initiated bootstrap: wait out the hold-off, then ask.
    pub(super) fn bootstrap_start(&mut self, now: Instant) -> Result<(), Error> {
        let bs = self.bootstrap.as_mut().ok_or(Error::NotFound)?;
        bs.status = ServerStatus::BsHoldOff;
        bs.deadline = Some(now + Duration::from_secs(bs.hold_off as u64));
        info!("Bootstrap in {} s", bs.hold_off);

        if let Some(srv) = self.registry.downcast_mut::<ServerObject>(SERVER_OBJECT_ID) {
            srv.set_bootstrap_writes(true);
        }
        Ok(())
    }

    pub(super) fn bootstrap_status(&self) -> ServerStatus {
        self.bootstrap
            .as_ref()
            .map(|b| b.status)
            .unwrap_or(ServerStatus::BsFailed)
    }

    /// Leave bootstrap mode and close the bootstrap session.
    pub(super) fn bootstrap_end(&mut self, transport: &mut dyn Transport) {
        if let Some(srv) = self.registry.downcast_mut::<ServerObject>(SERVER_OBJECT_ID) {
            srv.set_bootstrap_writes(false);
        }
        if let Some(bs) = self.bootstrap.as_mut() {
            if let Some(session) = bs.session.take() {
                self.transactions.remove_session(session);
                transport.disconnect(session);
            }
            bs.deadline = None;
        }
    }

    /// Send the Bootstrap-Request after the hold-off and time out a
    /// bootstrap server that never finishes.
    pub(super) fn bootstrap_step(&mut self, now: Instant, transport: &mut dyn Transport, timeout: &mut Duration) {
        let Some(bs) = self.bootstrap.as_ref() else {
            return;
        };
        let Some(deadline) = bs.deadline else {
            return;
        };
        let status = bs.status;
        match status {
            ServerStatus::BsHoldOff | ServerStatus::BsPending if now < deadline => {
                *timeout = (*timeout).min(deadline - now);
            }
            ServerStatus::BsHoldOff => {
                if let Err(e) = self.bootstrap_request(now, transport) {
                    warn!("Bootstrap request failed: {}", e);
                    if let Some(bs) = self.bootstrap.as_mut() {
                        bs.status = ServerStatus::BsFailed;
                    }
                }
            }
            ServerStatus::BsPending => {
                warn!("Bootstrap server did not finish");
                if let Some(bs) = self.bootstrap.as_mut() {
                    bs.status = ServerStatus::BsFailed;
                }
            }
            _ => {}
        }
    }

    fn bootstrap_request(&mut self, now: Instant, transport: &mut dyn Transport) -> Result<(), Error> {
        let security_id = self.bootstrap.as_ref().ok_or(Error::NotFound)?.security_id;
        let session = match self.bootstrap.as_ref().and_then(|b| b.session) {
            Some(s) => s,
            None => {
                let security = security_of(&mut self.registry, security_id).ok_or(Error::NotFound)?;
                transport.connect(now, &security)?
            }
        };

        let mut p = Packet::new(MessageType::Confirmable, Code::Post, 0);
        p.set_uri_path("/bs");
        p.add_uri_query(format!("ep={}", self.endpoint));
        let mid = self.next_mid();
        self.transactions.start(
            now,
            transport,
            session,
            TransactionKind::BootstrapRequest,
            p,
            mid,
            &mut self.rng,
        )?;

        if let Some(bs) = self.bootstrap.as_mut() {
            bs.session = Some(session);
            bs.status = ServerStatus::BsInitiated;
            bs.deadline = Some(pending_deadline(now));
        }
        debug!("Bootstrap request sent");
        Ok(())
    }

    pub(super) fn bootstrap_complete(&mut self, now: Instant, outcome: Outcome) {
        let Some(bs) = self.bootstrap.as_mut() else {
            return;
        };
        if bs.status != ServerStatus::BsInitiated {
            return;
        }
        match outcome {
            Outcome::Response(p) if p.code() == Code::Response(ResponseCode::Changed) => {
                bs.status = ServerStatus::BsPending;
                bs.deadline = Some(pending_deadline(now));
            }
            other => {
                warn!("Bootstrap request rejected: {:?}", other);
                bs.status = ServerStatus::BsFailed;
            }
        }
    }

    /// Whether `session` belongs to a bootstrap in progress.
    pub(super) fn is_bootstrap_session(&self, session: std::net::SocketAddr) -> bool {
        self.bootstrap.as_ref().map_or(false, |b| {
            b.session == Some(session)
                && matches!(b.status, ServerStatus::BsInitiated | ServerStatus::BsPending)
        })
    }

    /// Answer a request from the bootstrap server.
    pub(super) fn bootstrap_request_from_server(
        &mut self,
        now: Instant,
        req: &Packet,
        payload: &[u8],
    ) -> ResponseCode {
        if let Some(bs) = self.bootstrap.as_mut() {
            // Any request shows the server is alive, so a write arriving
            // before the ACK to our request also counts.
            bs.status = ServerStatus::BsPending;
            bs.deadline = Some(pending_deadline(now));
        }

        let path = req.uri_path();
        if req.code() == Code::Post && path.len() == 1 && path[0] == "bs" {
            info!("Bootstrap finished");
            if let Some(bs) = self.bootstrap.as_mut() {
                bs.status = ServerStatus::BsFinished;
            }
            return ResponseCode::Changed;
        }

        let uri = match Uri::from_segments(path) {
            Ok(uri) => uri,
            Err(_) => return ResponseCode::BadRequest,
        };

        let result = match (req.code(), uri) {
            (Code::Put, Some(uri)) => self.bootstrap_write(&uri, req, payload),
            (Code::Delete, uri) => self.bootstrap_delete(uri.as_ref()),
            _ => Err(ResponseCode::MethodNotAllowed),
        };
        result.unwrap_or_else(|code| code)
    }

    fn bootstrap_write(&mut self, uri: &Uri, req: &Packet, payload: &[u8]) -> Result<ResponseCode, ResponseCode> {
        let format = req.content_format().unwrap_or(ContentFormat::Tlv);
        let data = data::parse(uri, format, payload).map_err(code_of)?;
        let object = uri.object_id();
        if !self.registry.contains(object) {
            return Err(ResponseCode::NotFound);
        }

        match uri.instance_id() {
            None => {
                // A list of instance records.
                for d in data {
                    let Value::Instance(resources) = d.value else {
                        return Err(ResponseCode::BadRequest);
                    };
                    self.write_or_create(object, d.id, resources)?;
                }
            }
            Some(inst) => self.write_or_create(object, inst, data)?,
        }
        Ok(ResponseCode::Changed)
    }

    fn write_or_create(&mut self, object: u16, instance: u16, data: Vec<Data>) -> Result<(), ResponseCode> {
        let uri = Uri::instance(object, instance);
        if self.registry.has_instance(object, instance) {
            return self.write_uri(&uri, data, false);
        }
        let obj = self.registry.get_mut(object).ok_or(ResponseCode::NotFound)?;
        let wrapped = matches!(
            data.as_slice(),
            [Data {
                value: Value::Instance(_),
                ..
            }]
        );
        let data = if wrapped {
            match data.into_iter().next() {
                Some(Data {
                    value: Value::Instance(children),
                    ..
                }) => children,
                _ => Vec::new(),
            }
        } else {
            data
        };
        debug!("Bootstrap creates {}", uri);
        obj.create(instance, &data)
    }

    /// Delete instances. The bootstrap server's own Security instance
    /// survives, other refusals are ignored.
    fn bootstrap_delete(&mut self, uri: Option<&Uri>) -> Result<ResponseCode, ResponseCode> {
        let keep = self.bootstrap.as_ref().map(|b| b.security_id);
        let targets: Vec<(u16, Vec<u16>)> = match uri {
            None => self
                .registry
                .ids()
                .collect::<Vec<_>>()
                .into_iter()
                .filter_map(|id| self.registry.get_mut(id).map(|o| (id, o.instances())))
                .collect(),
            Some(uri) if uri.is_object() => {
                let o = self
                    .registry
                    .get_mut(uri.object_id())
                    .ok_or(ResponseCode::NotFound)?;
                vec![(uri.object_id(), o.instances())]
            }
            Some(uri) if uri.is_instance() => {
                let inst = uri.instance_id().unwrap_or_default();
                if uri.object_id() == SECURITY_OBJECT_ID && Some(inst) == keep {
                    return Err(ResponseCode::BadRequest);
                }
                vec![(uri.object_id(), vec![inst])]
            }
            Some(_) => return Err(ResponseCode::MethodNotAllowed),
        };

        for (object, instances) in targets {
            let Some(obj) = self.registry.get_mut(object) else {
                continue;
            };
            for inst in instances {
                if object == SECURITY_OBJECT_ID && Some(inst) == keep {
                    continue;
                }
                match obj.delete(inst) {
                    Ok(()) => debug!("Bootstrap deleted /{}/{}", object, inst),
                    Err(ResponseCode::MethodNotAllowed) => {}
                    Err(code) => debug!("Bootstrap delete /{}/{}: {}", object, inst, code),
                }
            }
            self.observe_remove_uri(&Uri::object(object));
        }
        Ok(ResponseCode::Deleted)
    }
}
