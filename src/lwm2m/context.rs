use std::net::SocketAddr;
use std::time::{Duration, Instant};

use super::block1::BlockOutcome;
use super::observe::Observed;
use super::server::{load_servers, Server, ServerStatus};
use super::transaction::{Outcome, Transaction, TransactionKind, Transactions};
use super::{ClientState, Transport};
use crate::coap::{Code, MessageType, Packet, ResponseCode, HEADER_LEN, MAX_TOKEN_LEN};
use crate::object::ObjectRegistry;
use crate::rng::SeededRng;
use crate::Error;

/// LWM2M client state: servers, transactions in flight, observations and the
/// objects they act on.
pub struct Lwm2mContext {
    pub(super) endpoint: String,
    pub(super) state: ClientState,
    pub(super) registry: ObjectRegistry,
    pub(super) servers: Vec<Server>,
    pub(super) bootstrap: Option<Server>,
    pub(super) transactions: Transactions,
    pub(super) observed: Vec<Observed>,
    pub(super) rng: SeededRng,
    next_mid: u16,
}

impl std::fmt::Debug for Lwm2mContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lwm2mContext")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state)
            .field("servers", &self.servers.len())
            .field("transactions", &self.transactions.len())
            .field("observed", &self.observed.len())
            .finish()
    }
}

impl Lwm2mContext {
    pub fn new(endpoint: impl Into<String>, registry: ObjectRegistry, rng_seed: Option<u64>) -> Self {
        let mut rng = SeededRng::new(rng_seed);
        let next_mid = rng.random();
        Lwm2mContext {
            endpoint: endpoint.into(),
            state: ClientState::Initial,
            registry,
            servers: Vec::new(),
            bootstrap: None,
            transactions: Transactions::default(),
            observed: Vec::new(),
            rng,
            next_mid,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn registry(&self) -> &ObjectRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ObjectRegistry {
        &mut self.registry
    }

    /// Status of the device management server with `short_id`.
    pub fn server_status(&self, short_id: u16) -> Option<ServerStatus> {
        self.servers
            .iter()
            .find(|s| s.short_id == short_id)
            .map(|s| s.status)
    }

    /// Registration location (`/rd/5`) at server `short_id`.
    pub fn server_location(&self, short_id: u16) -> Option<&str> {
        self.servers
            .iter()
            .find(|s| s.short_id == short_id)
            .and_then(|s| s.location.as_deref())
    }

    /// `Ok` once registered with at least one server.
    pub fn registration_status(&self) -> Result<(), Error> {
        let any = |f: fn(&ServerStatus) -> bool| self.servers.iter().any(|s| f(&s.status));
        if any(|s| s.is_registered()) {
            Ok(())
        } else if any(|s| *s == ServerStatus::RegPending) {
            Err(Error::Pending)
        } else if any(|s| *s == ServerStatus::RegFailed) {
            Err(Error::RegistrationFailed)
        } else {
            Err(Error::NotRegistered)
        }
    }

    pub(super) fn next_mid(&mut self) -> u16 {
        let mid = self.next_mid;
        self.next_mid = mid.wrapping_add(1);
        mid
    }

    /// Advance the state machine by at most one transition, then run the
    /// observation, registration and transaction steppers.
    ///
    /// `timeout` is only ever shrunk: to the next deadline any stepper has,
    /// or to zero after a transition so the caller steps again at once.
    pub fn step(&mut self, now: Instant, transport: &mut dyn Transport, timeout: &mut Duration) -> Result<(), Error> {
        let before = self.state;
        let result = self.advance(now, transport);
        if self.state != before {
            debug!("Client state {:?} -> {:?}", before, self.state);
        }

        if self.state == ClientState::Bootstrapping {
            self.bootstrap_step(now, transport, timeout);
        }
        self.observe_step(now, transport, timeout);
        self.registration_step(now, transport, timeout);
        self.transaction_step(now, transport, timeout);

        if self.state != before {
            *timeout = Duration::ZERO;
        }
        result
    }

    fn advance(&mut self, now: Instant, transport: &mut dyn Transport) -> Result<(), Error> {
        match self.state {
            ClientState::Initial => {
                self.teardown(transport);
                let (servers, bootstrap) = load_servers(&mut self.registry);
                if servers.is_empty() && bootstrap.is_none() {
                    return Err(Error::NotFound);
                }
                self.servers = servers;
                self.bootstrap = bootstrap;
                self.state = if self.servers.is_empty() {
                    ClientState::BootstrapRequired
                } else {
                    ClientState::RegisterRequired
                };
            }
            ClientState::BootstrapRequired => {
                // DM servers are about to be rewritten.
                for s in std::mem::take(&mut self.servers) {
                    self.drop_server(transport, s);
                }
                self.bootstrap_start(now)?;
                self.state = ClientState::Bootstrapping;
            }
            ClientState::Bootstrapping => match self.bootstrap_status() {
                ServerStatus::BsFinished => {
                    self.bootstrap_end(transport);
                    self.state = ClientState::Initial;
                }
                ServerStatus::BsFailed => {
                    self.bootstrap_end(transport);
                    self.state = ClientState::BootstrapRequired;
                }
                _ => {}
            },
            ClientState::RegisterRequired => match self.register_start(now, transport) {
                Ok(()) => self.state = ClientState::Registering,
                Err(_) if self.bootstrap.is_some() => self.state = ClientState::BootstrapRequired,
                Err(e) => return Err(e),
            },
            ClientState::Registering => match self.registration_summary() {
                ServerStatus::Registered => self.state = ClientState::Ready,
                ServerStatus::RegFailed if self.bootstrap.is_some() => {
                    self.state = ClientState::BootstrapRequired
                }
                ServerStatus::RegFailed => return Err(Error::RegistrationFailed),
                _ => {}
            },
            ClientState::Ready => {
                let failed = self.servers.iter().any(|s| s.status == ServerStatus::RegFailed);
                if failed && self.bootstrap.is_some() {
                    self.state = ClientState::BootstrapRequired;
                } else if failed && self.registration_status().is_err() {
                    return Err(Error::RegistrationFailed);
                }
            }
            ClientState::Reset => {
                self.teardown(transport);
                self.state = ClientState::Initial;
                return Err(Error::ServerReset);
            }
        }
        Ok(())
    }

    fn drop_server(&mut self, transport: &mut dyn Transport, server: Server) {
        self.observe_remove_server(server.short_id);
        if let Some(session) = server.session {
            self.transactions.remove_session(session);
            transport.disconnect(session);
        }
    }

    /// Close every session and forget servers, transactions and observations.
    fn teardown(&mut self, transport: &mut dyn Transport) {
        for s in std::mem::take(&mut self.servers) {
            self.drop_server(transport, s);
        }
        if let Some(bs) = self.bootstrap.take() {
            self.drop_server(transport, bs);
        }
        self.transactions.clear();
        self.observed.clear();
    }

    fn transaction_step(&mut self, now: Instant, transport: &mut dyn Transport, timeout: &mut Duration) {
        for (t, outcome) in self.transactions.step(now, transport, timeout) {
            self.complete(now, t, outcome);
        }
    }

    fn complete(&mut self, now: Instant, t: Transaction, outcome: Outcome) {
        match t.kind {
            TransactionKind::BootstrapRequest => self.bootstrap_complete(now, outcome),
            kind => self.registration_complete(now, kind, outcome),
        }
    }

    /// Start over from the Security and Server objects on the next step.
    pub fn restart(&mut self) {
        self.state = ClientState::Initial;
    }

    /// A session ended underneath us, e.g. the DTLS peer sent a fatal alert
    /// or close_notify. A registered server doing so resets the client.
    pub fn session_closed(&mut self, session: SocketAddr) {
        self.transactions.remove_session(session);
        let registered = self
            .servers
            .iter()
            .any(|s| s.session == Some(session) && s.status != ServerStatus::Deregistered);
        if registered {
            warn!("Session to server {} closed, resetting", session);
            self.state = ClientState::Reset;
            return;
        }
        for s in &mut self.servers {
            if s.session == Some(session) {
                s.session = None;
            }
        }
        if let Some(bs) = self.bootstrap.as_mut() {
            if bs.session == Some(session) {
                bs.session = None;
                if matches!(bs.status, ServerStatus::BsInitiated | ServerStatus::BsPending) {
                    bs.status = ServerStatus::BsFailed;
                }
            }
        }
    }

    /// Deregister from every server and close all sessions.
    pub fn close(&mut self, now: Instant, transport: &mut dyn Transport) {
        self.deregister(now, transport);
        self.bootstrap_end(transport);
        self.teardown(transport);
        self.state = ClientState::Initial;
    }

    /// Process one datagram received on `session`.
    pub fn handle_packet(&mut self, now: Instant, transport: &mut dyn Transport, session: SocketAddr, data: &[u8]) {
        let packet = match Packet::parse(data) {
            Ok(p) => p,
            Err(Error::Coap(code)) => {
                self.reject(now, transport, session, data, code);
                return;
            }
            Err(e) => {
                debug!("Dropping malformed CoAP message from {}: {}", session, e);
                return;
            }
        };
        trace!("Received {:?} from {}", packet, session);

        let code = packet.code();
        if code.is_request() {
            self.handle_request(now, transport, session, packet);
            return;
        }

        if packet.kind() == MessageType::Confirmable {
            // Ping, or a separate response.
            let reply = if code == Code::Empty {
                MessageType::Reset
            } else {
                MessageType::Acknowledgement
            };
            self.send_empty(now, transport, session, reply, packet.mid());
            if code == Code::Empty {
                return;
            }
        }

        match self.transactions.handle(now, session, &packet) {
            Some((t, outcome)) => self.complete(now, t, outcome),
            None if packet.kind() == MessageType::Reset => {
                let server = self
                    .servers
                    .iter()
                    .find(|s| s.session == Some(session))
                    .map(|s| s.short_id);
                if let Some(server) = server {
                    self.observe_reset(server, packet.mid());
                }
            }
            None => trace!("Unmatched message mid {} from {}", packet.mid(), session),
        }
    }

    fn send_empty(&mut self, now: Instant, transport: &mut dyn Transport, session: SocketAddr, kind: MessageType, mid: u16) {
        let p = Packet::new(kind, Code::Empty, mid);
        self.send(now, transport, session, &p);
    }

    fn send(&mut self, now: Instant, transport: &mut dyn Transport, session: SocketAddr, packet: &Packet) {
        trace!("Send {:?} to {}", packet, session);
        let result = packet
            .to_vec()
            .and_then(|bytes| transport.send(now, session, &bytes));
        if let Err(e) = result {
            debug!("Send to {} failed: {}", session, e);
        }
    }

    /// Answer a confirmable request we could not parse, typically for an
    /// unknown critical option.
    fn reject(&mut self, now: Instant, transport: &mut dyn Transport, session: SocketAddr, data: &[u8], code: ResponseCode) {
        if data.len() < HEADER_LEN {
            return;
        }
        let kind = MessageType::from_u8(data[0] >> 4);
        let token_len = (data[0] & 0x0F) as usize;
        let request = Code::from_u8(data[1]).is_request();
        if kind != MessageType::Confirmable || !request || token_len > MAX_TOKEN_LEN {
            return;
        }
        let Some(token) = data.get(HEADER_LEN..HEADER_LEN + token_len) else {
            return;
        };
        let mid = u16::from_be_bytes([data[2], data[3]]);
        debug!("Rejecting request mid {} with {}", mid, code);
        let mut p = Packet::new(MessageType::Acknowledgement, code, mid);
        if p.set_token(token).is_ok() {
            self.send(now, transport, session, &p);
        }
    }

    fn handle_request(&mut self, now: Instant, transport: &mut dyn Transport, session: SocketAddr, mut req: Packet) {
        let bootstrap = self.is_bootstrap_session(session);
        let index = self.servers.iter().position(|s| s.session == Some(session));
        if !bootstrap && index.is_none() {
            debug!("Request from unknown session {}", session);
            if req.kind() == MessageType::Confirmable {
                self.send_empty(now, transport, session, MessageType::Reset, req.mid());
            }
            return;
        }

        let mut resp = match req.kind() {
            MessageType::Confirmable => Packet::new(MessageType::Acknowledgement, ResponseCode::Content, req.mid()),
            _ => {
                let mid = self.next_mid();
                Packet::new(MessageType::NonConfirmable, ResponseCode::Content, mid)
            }
        };
        if resp.set_token(req.token()).is_err() {
            return;
        }

        let mut payload = req.take_payload();
        if let Some(block) = req.block1() {
            let state = if bootstrap {
                self.bootstrap.as_mut().map(|b| &mut b.block1)
            } else {
                index.map(|i| &mut self.servers[i].block1)
            };
            let Some(state) = state else {
                return;
            };
            resp.set_block1(block);
            match state.accept(req.mid(), block, &payload) {
                Ok(BlockOutcome::Continue) => {
                    resp.set_code(ResponseCode::Continue);
                    self.send(now, transport, session, &resp);
                    return;
                }
                Ok(BlockOutcome::Complete) => {
                    payload = state.body().map(|b| b.to_vec()).unwrap_or_default();
                }
                Err(code) => {
                    resp.set_code(code);
                    self.send(now, transport, session, &resp);
                    return;
                }
            }
        }

        let code = match index {
            _ if bootstrap => self.bootstrap_request_from_server(now, &req, &payload),
            Some(i) => self.dm_request(now, i, &req, &payload, &mut resp),
            None => return,
        };
        debug!("{:?} {:?} -> {}", req.code(), req.uri_path(), code);
        resp.set_code(code);
        self.send(now, transport, session, &resp);
    }
}
