//! Shared helpers for LWM2M client tests: a recording transport, a scripted
//! server and an in-memory socket.

#![allow(unused)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::{Duration, Instant};

use nbiot::coap::{Code, ContentFormat, MessageType, Packet, ResponseCode};
use nbiot::{parse_server_uri, Access, ClientState, DeviceObject, Error, Lwm2mContext};
use nbiot::{ObjectRegistry, Resource, ResourceObject, SecurityInstance, SecurityObject};
use nbiot::{ServerInstance, ServerObject, ServerSecurity, Socket, Transport, Value};

pub const SERVER_URI: &str = "coap://192.0.2.5:5683";
pub const SHORT_ID: u16 = 123;

pub fn server_addr() -> SocketAddr {
    "192.0.2.5:5683".parse().unwrap()
}

/// Transport that resolves literal addresses and keeps everything sent.
#[derive(Default, Debug)]
pub struct Recorder {
    pub connects: Vec<String>,
    pub sent: Vec<(SocketAddr, Vec<u8>)>,
    pub disconnects: Vec<SocketAddr>,
    /// Refuse every send, as a socket with a full buffer would.
    pub fail_sends: bool,
}

impl Recorder {
    /// Parse and forget everything sent so far.
    pub fn take(&mut self) -> Vec<Packet> {
        self.sent
            .drain(..)
            .map(|(_, bytes)| Packet::parse(&bytes).unwrap())
            .collect()
    }

    pub fn take_one(&mut self) -> Packet {
        let mut sent = self.take();
        assert_eq!(sent.len(), 1, "expected one message, got {:?}", sent);
        sent.remove(0)
    }
}

impl Transport for Recorder {
    fn connect(&mut self, _now: Instant, security: &ServerSecurity) -> Result<SocketAddr, Error> {
        self.connects.push(security.uri.clone());
        let (_, host, port) = parse_server_uri(&security.uri)?;
        let ip = host.parse().map_err(|_| Error::InvalidUri)?;
        Ok(SocketAddr::new(ip, port))
    }

    fn send(&mut self, _now: Instant, session: SocketAddr, data: &[u8]) -> Result<(), Error> {
        if self.fail_sends {
            return Err(Error::Socket(io::ErrorKind::WouldBlock));
        }
        self.sent.push((session, data.to_vec()));
        Ok(())
    }

    fn disconnect(&mut self, session: SocketAddr) {
        self.disconnects.push(session);
    }
}

/// Security, Server and Device objects for one server at `SERVER_URI`,
/// plus a temperature object 3303 with instance 0.
pub fn registry() -> ObjectRegistry {
    let mut security = SecurityObject::new();
    security.add_instance(SecurityInstance::new(0, SERVER_URI, SHORT_ID));
    let mut server = ServerObject::new();
    server.add_instance(ServerInstance::new(0, SHORT_ID, 300));

    let mut temperature = ResourceObject::new(3303);
    temperature
        .insert(Resource::new(3303, 0, 5700, Value::Float(21.0), Access::READ))
        .unwrap();
    temperature
        .insert(Resource::new(
            3303,
            0,
            5750,
            Value::String(String::new()),
            Access::READ | Access::WRITE,
        ))
        .unwrap();

    let mut registry = ObjectRegistry::new();
    registry.add(Box::new(security)).unwrap();
    registry.add(Box::new(server)).unwrap();
    registry.add(Box::new(DeviceObject::new("Acme", "T-1000"))).unwrap();
    registry.add(Box::new(temperature)).unwrap();
    registry
}

pub fn step(ctx: &mut Lwm2mContext, now: Instant, transport: &mut Recorder) -> Duration {
    step_within(ctx, now, transport, Duration::from_secs(60))
}

/// Like `step`, with the caller's own upper bound on the wait.
pub fn step_within(ctx: &mut Lwm2mContext, now: Instant, transport: &mut Recorder, limit: Duration) -> Duration {
    let mut timeout = limit;
    let _ = ctx.step(now, transport, &mut timeout);
    timeout
}

/// Piggybacked response to `request`.
pub fn ack(request: &Packet, code: ResponseCode) -> Packet {
    let mut p = Packet::new(MessageType::Acknowledgement, code, request.mid());
    p.set_token(request.token()).unwrap();
    p
}

pub fn bytes(p: &Packet) -> Vec<u8> {
    p.to_vec().unwrap()
}

/// A client registered at `/rd/5`, with nothing left in the recorder.
pub fn registered(now: Instant) -> (Lwm2mContext, Recorder) {
    registered_with(now, registry())
}

pub fn registered_with(now: Instant, registry: ObjectRegistry) -> (Lwm2mContext, Recorder) {
    let mut ctx = Lwm2mContext::new("dev1", registry, Some(1));
    let mut rec = Recorder::default();
    step(&mut ctx, now, &mut rec);
    step(&mut ctx, now, &mut rec);
    let register = rec.take_one();

    let mut created = ack(&register, ResponseCode::Created);
    created.set_location_path("/rd/5");
    ctx.handle_packet(now, &mut rec, server_addr(), &bytes(&created));
    step(&mut ctx, now, &mut rec);
    assert_eq!(ctx.state(), ClientState::Ready);
    assert!(rec.take().is_empty());
    (ctx, rec)
}

/// Confirmable request from the server.
pub fn request(code: Code, path: &str, mid: u16) -> Packet {
    let mut p = Packet::new(MessageType::Confirmable, code, mid);
    p.set_token(&mid.to_be_bytes()).unwrap();
    p.set_uri_path(path);
    p
}

/// Send `req` from the server and return the single answer.
pub fn exchange(ctx: &mut Lwm2mContext, rec: &mut Recorder, now: Instant, req: &Packet) -> Packet {
    ctx.handle_packet(now, rec, server_addr(), &bytes(req));
    rec.take_one()
}

pub fn code(p: &Packet) -> ResponseCode {
    match p.code() {
        Code::Response(c) => c,
        c => panic!("not a response: {:?}", c),
    }
}

/// Datagram socket backed by two queues shared with the test.
#[derive(Clone, Default)]
pub struct MemSocket {
    pub inbound: Rc<RefCell<VecDeque<(SocketAddr, Vec<u8>)>>>,
    pub outbound: Rc<RefCell<Vec<(SocketAddr, Vec<u8>)>>>,
}

impl MemSocket {
    pub fn deliver(&self, from: SocketAddr, data: Vec<u8>) {
        self.inbound.borrow_mut().push_back((from, data));
    }

    pub fn take_sent(&self) -> Vec<(SocketAddr, Vec<u8>)> {
        self.outbound.borrow_mut().drain(..).collect()
    }
}

impl Socket for MemSocket {
    fn send_to(&mut self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.outbound.borrow_mut().push((addr, data.to_vec()));
        Ok(data.len())
    }

    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let Some((from, data)) = self.inbound.borrow_mut().pop_front() else {
            return Err(io::ErrorKind::WouldBlock.into());
        };
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok((n, from))
    }
}
