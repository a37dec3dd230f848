//! A whole device over an in-memory socket, plain and over DTLS.

use std::cell::Cell;
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use nbiot::coap::{Code, MessageType, Packet, ResponseCode};
use nbiot::{Access, ClientState, Config, Device, DeviceConfig, DtlsContext, Error};
use nbiot::{Identity, Output, Resource, Uri, Value};

use crate::common::*;

fn device_addr() -> SocketAddr {
    "192.0.2.1:40000".parse().unwrap()
}

fn plain_device(now: Instant) -> (Device<MemSocket>, MemSocket) {
    let socket = MemSocket::default();
    let config = DeviceConfig::builder("dev1", SERVER_URI)
        .short_server_id(SHORT_ID)
        .rng_seed(5)
        .build()
        .unwrap();
    let mut device = Device::new(config, socket.clone()).unwrap();
    device.step(now).unwrap();
    device.step(now).unwrap();
    (device, socket)
}

/// The only CoAP message the device sent since the last call.
fn sent_one(socket: &MemSocket) -> Packet {
    let mut sent = socket.take_sent();
    assert_eq!(sent.len(), 1, "expected one datagram");
    let (to, data) = sent.remove(0);
    assert_eq!(to, server_addr());
    Packet::parse(&data).unwrap()
}

fn register(device: &mut Device<MemSocket>, socket: &MemSocket, now: Instant) {
    let req = sent_one(socket);
    assert_eq!(req.uri_path(), ["rd"]);
    let mut created = ack(&req, ResponseCode::Created);
    created.set_location_path("/rd/9");
    socket.deliver(server_addr(), bytes(&created));
    device.step(now).unwrap();
    device.step(now).unwrap();
    assert_eq!(device.state(), ClientState::Ready);
}

#[test]
fn plain_register_and_read() {
    let _ = env_logger::try_init();
    let now = Instant::now();
    let (mut device, socket) = plain_device(now);
    assert_eq!(device.registration_status(), Err(Error::Pending));
    register(&mut device, &socket, now);
    assert_eq!(device.registration_status(), Ok(()));

    // The device object carries the endpoint name as model number.
    socket.deliver(server_addr(), bytes(&request(Code::Get, "/3/0/1", 300)));
    device.step(now).unwrap();
    let resp = sent_one(&socket);
    assert_eq!(resp.kind(), MessageType::Acknowledgement);
    assert_eq!(code(&resp), ResponseCode::Content);
    assert_eq!(resp.payload(), b"dev1");
}

#[test]
fn user_resources() {
    let _ = env_logger::try_init();
    let now = Instant::now();
    let (mut device, socket) = plain_device(now);
    register(&mut device, &socket, now);

    let reserved = Resource::new(3, 0, 100, Value::Integer(1), Access::READ);
    assert!(matches!(device.add_resource(reserved), Err(Error::BadParameter(_))));

    let humidity = Resource::new(3304, 0, 5700, Value::Float(40.0), Access::READ);
    device.add_resource(humidity).unwrap();

    // A new object goes out in a full registration update.
    device.step(now).unwrap();
    let update = sent_one(&socket);
    assert_eq!(update.uri_path(), ["rd", "9"]);
    let links = std::str::from_utf8(update.payload()).unwrap();
    assert!(links.contains("</3304/0>"), "{}", links);
    socket.deliver(server_addr(), bytes(&ack(&update, ResponseCode::Changed)));
    device.step(now).unwrap();

    let uri = Uri::resource(3304, 0, 5700);
    assert_eq!(device.set_value(Uri::instance(3304, 0), Value::Float(1.0)), Err(Error::InvalidUri));
    assert_eq!(device.set_value(Uri::resource(3304, 0, 1), Value::Float(1.0)), Err(Error::NotFound));
    assert_eq!(device.set_value(Uri::resource(3305, 0, 5700), Value::Float(1.0)), Err(Error::NotFound));

    let mut observe = request(Code::Get, "/3304/0/5700", 301);
    observe.set_observe(0);
    socket.deliver(server_addr(), bytes(&observe));
    device.step(now).unwrap();
    assert_eq!(sent_one(&socket).observe(), Some(0));

    // Same value, nothing to tell.
    device.set_value(uri, Value::Float(40.0)).unwrap();
    device.step(now).unwrap();
    assert!(socket.take_sent().is_empty());

    device.set_value(uri, Value::Float(41.5)).unwrap();
    device.step(now).unwrap();
    let note = sent_one(&socket);
    assert_eq!(note.kind(), MessageType::NonConfirmable);
    assert_eq!(note.observe(), Some(1));
    assert_eq!(note.payload(), b"41.5");
}

#[test]
fn close_sends_deregister() {
    let now = Instant::now();
    let (mut device, socket) = plain_device(now);
    register(&mut device, &socket, now);

    device.close(now);
    let delete = sent_one(&socket);
    assert_eq!(delete.code(), Code::Delete);
    assert_eq!(delete.uri_path(), ["rd", "9"]);
    assert_eq!(device.state(), ClientState::Initial);
}

/// Step the device and a DTLS server against each other until both go
/// quiet. Returns the CoAP messages the server received.
fn run(device: &mut Device<MemSocket>, socket: &MemSocket, server: &mut DtlsContext, now: Instant) -> Vec<Packet> {
    let addr: SocketAddr = "192.0.2.5:5684".parse().unwrap();
    let mut received = Vec::new();
    for _ in 0..20 {
        device.step(now).unwrap();
        let sent = socket.take_sent();
        for (to, data) in &sent {
            assert_eq!(*to, addr);
            let _ = server.handle_message(now, device_addr(), data);
        }
        let mut replies = 0;
        while let Some(o) = server.poll_output() {
            match o {
                Output::Packet { data, .. } => {
                    socket.deliver(addr, data.to_vec());
                    replies += 1;
                }
                Output::ApplicationData { data, .. } => received.push(Packet::parse(&data).unwrap()),
                Output::Event { .. } => {}
            }
        }
        if sent.is_empty() && replies == 0 {
            return received;
        }
    }
    panic!("device and server never went quiet");
}

#[test]
fn secure_registration() {
    let _ = env_logger::try_init();
    let now = Instant::now();

    let server_identity = Identity::generate().unwrap();
    let server_config = Arc::new(
        Config::builder()
            .require_client_certificate(true)
            .rng_seed(21)
            .build()
            .unwrap(),
    );
    let mut server = DtlsContext::server(server_config, server_identity.clone());

    let socket = MemSocket::default();
    let config = DeviceConfig::builder("dev1", "coaps://192.0.2.5:5684")
        .server_public_key(server_identity.public_key_der().to_vec())
        .rng_seed(22)
        .build()
        .unwrap();
    let mut device = Device::new(config, socket.clone()).unwrap();
    device.step(now).unwrap();

    // The register request waits for the handshake, then goes encrypted.
    let received = run(&mut device, &socket, &mut server, now);
    assert!(server.is_connected(device_addr()));
    assert_eq!(server.peer_public_key(device_addr()), Some(device.public_key()));
    assert_eq!(received.len(), 1);
    let register = &received[0];
    assert_eq!(register.uri_path(), ["rd"]);
    assert_eq!(device.state(), ClientState::Registering);

    let mut created = ack(register, ResponseCode::Created);
    created.set_location_path("/rd/1");
    server.write(now, device_addr(), &bytes(&created)).unwrap();
    run(&mut device, &socket, &mut server, now);
    assert_eq!(device.state(), ClientState::Ready);

    // Closing the DTLS session under a registered client resets it.
    server.close(now, device_addr()).unwrap();
    while let Some(o) = server.poll_output() {
        if let Output::Packet { data, .. } = o {
            socket.deliver("192.0.2.5:5684".parse().unwrap(), data.to_vec());
        }
    }
    assert_eq!(device.step(now), Err(Error::ServerReset));
    assert_eq!(device.state(), ClientState::Initial);
}

#[test]
fn plaintext_from_secure_server_is_dropped() {
    let _ = env_logger::try_init();
    let now = Instant::now();

    let server_identity = Identity::generate().unwrap();
    let socket = MemSocket::default();
    let config = DeviceConfig::builder("dev1", "coaps://192.0.2.5:5684")
        .server_public_key(server_identity.public_key_der().to_vec())
        .rng_seed(23)
        .build()
        .unwrap();
    let mut device = Device::new(config, socket.clone()).unwrap();

    let fired = Rc::new(Cell::new(false));
    let flag = fired.clone();
    let switch = Resource::new(3311, 0, 5850, Value::Opaque(Vec::new()), Access::EXECUTE)
        .on_execute(move |_, _| flag.set(true));
    device.add_resource(switch).unwrap();

    device.step(now).unwrap();
    device.step(now).unwrap();
    // The ClientHello is out.
    assert!(!socket.take_sent().is_empty());

    let post = request(Code::Post, "/3311/0/5850", 400);
    socket.deliver("192.0.2.5:5684".parse().unwrap(), bytes(&post));
    device.step(now).unwrap();

    assert!(!fired.get());
    assert!(socket.take_sent().is_empty());
}

#[test]
fn step_reports_next_deadline() {
    let now = Instant::now();
    let (mut device, socket) = plain_device(now);
    register(&mut device, &socket, now);

    let wait = device.step(now).unwrap();
    assert!(wait <= Duration::from_secs(60));
    assert!(wait > Duration::ZERO);
}
