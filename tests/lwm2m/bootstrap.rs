//! Client initiated bootstrap followed by registration.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use nbiot::coap::{Code, ContentFormat, MessageType, Packet, ResponseCode};
use nbiot::tlv::{self, TlvKind};
use nbiot::{ClientState, DeviceObject, Lwm2mContext, ObjectRegistry};
use nbiot::{SecurityInstance, SecurityObject, ServerObject};

use crate::common::*;

const BOOTSTRAP_URI: &str = "coap://192.0.2.9:5683";

fn bootstrap_addr() -> SocketAddr {
    "192.0.2.9:5683".parse().unwrap()
}

fn bootstrap_registry(hold_off: u32) -> ObjectRegistry {
    let mut bs = SecurityInstance::new(0, BOOTSTRAP_URI, 0);
    bs.bootstrap = true;
    bs.hold_off = hold_off;
    let mut security = SecurityObject::new();
    security.add_instance(bs);

    let mut registry = ObjectRegistry::new();
    registry.add(Box::new(security)).unwrap();
    registry.add(Box::new(ServerObject::new())).unwrap();
    registry.add(Box::new(DeviceObject::new("Acme", "T-1000"))).unwrap();
    registry
}

fn resource(id: u16, value: &[u8], out: &mut Vec<u8>) {
    tlv::encode(TlvKind::Resource, id, value, out).unwrap();
}

/// Request from the bootstrap server, answered in the recorder.
fn from_bootstrap(ctx: &mut Lwm2mContext, rec: &mut Recorder, now: Instant, req: &Packet) -> Packet {
    ctx.handle_packet(now, rec, bootstrap_addr(), &bytes(req));
    let resp = rec.take_one();
    assert_eq!(resp.mid(), req.mid());
    resp
}

#[test]
fn bootstrap_then_register() {
    let _ = env_logger::try_init();
    let now = Instant::now();
    let mut ctx = Lwm2mContext::new("dev1", bootstrap_registry(2), Some(9));
    let mut rec = Recorder::default();

    step(&mut ctx, now, &mut rec);
    assert_eq!(ctx.state(), ClientState::BootstrapRequired);
    step(&mut ctx, now, &mut rec);
    assert_eq!(ctx.state(), ClientState::Bootstrapping);

    // Hold-off first.
    assert_eq!(step(&mut ctx, now, &mut rec), Duration::from_secs(2));
    assert!(rec.take().is_empty());

    let later = now + Duration::from_secs(2);
    step(&mut ctx, later, &mut rec);
    assert_eq!(rec.connects, vec![BOOTSTRAP_URI.to_string()]);
    let bs_request = rec.take_one();
    assert_eq!(bs_request.code(), Code::Post);
    assert_eq!(bs_request.uri_path(), ["bs"]);
    assert_eq!(bs_request.uri_query(), ["ep=dev1"]);
    ctx.handle_packet(later, &mut rec, bootstrap_addr(), &bytes(&ack(&bs_request, ResponseCode::Changed)));

    // Security instance 1 for the device management server.
    let mut payload = Vec::new();
    resource(0, SERVER_URI.as_bytes(), &mut payload);
    resource(1, &[0], &mut payload);
    resource(2, &[3], &mut payload);
    resource(10, &[SHORT_ID as u8], &mut payload);
    let mut put = request(Code::Put, "/0/1", 1000);
    put.set_content_format(ContentFormat::Tlv);
    put.set_payload(payload);
    assert_eq!(code(&from_bootstrap(&mut ctx, &mut rec, later, &put)), ResponseCode::Changed);

    // Server instance 0 with lifetime 300.
    let mut payload = Vec::new();
    resource(0, &[SHORT_ID as u8], &mut payload);
    resource(1, &300u16.to_be_bytes(), &mut payload);
    resource(7, b"U", &mut payload);
    let mut put = request(Code::Put, "/1/0", 1001);
    put.set_content_format(ContentFormat::Tlv);
    put.set_payload(payload);
    assert_eq!(code(&from_bootstrap(&mut ctx, &mut rec, later, &put)), ResponseCode::Changed);

    // The bootstrap server's own account cannot be deleted.
    let delete = request(Code::Delete, "/0/0", 1002);
    assert_eq!(code(&from_bootstrap(&mut ctx, &mut rec, later, &delete)), ResponseCode::BadRequest);

    let finish = request(Code::Post, "/bs", 1003);
    assert_eq!(code(&from_bootstrap(&mut ctx, &mut rec, later, &finish)), ResponseCode::Changed);

    step(&mut ctx, later, &mut rec);
    assert_eq!(ctx.state(), ClientState::Initial);
    assert_eq!(rec.disconnects, vec![bootstrap_addr()]);

    step(&mut ctx, later, &mut rec);
    assert_eq!(ctx.state(), ClientState::RegisterRequired);
    step(&mut ctx, later, &mut rec);
    assert_eq!(ctx.state(), ClientState::Registering);

    let register = rec.take_one();
    assert_eq!(register.uri_path(), ["rd"]);
    assert_eq!(register.uri_query(), ["ep=dev1", "b=U", "lt=300"]);
    assert_eq!(register.payload(), b"</>;rt=\"oma.lwm2m\",</1/0>,</3/0>");
}

#[test]
fn bootstrap_server_that_never_finishes() {
    let _ = env_logger::try_init();
    let now = Instant::now();
    let mut ctx = Lwm2mContext::new("dev1", bootstrap_registry(0), Some(10));
    let mut rec = Recorder::default();

    step(&mut ctx, now, &mut rec);
    step(&mut ctx, now, &mut rec);
    step(&mut ctx, now, &mut rec);
    let bs_request = rec.take_one();
    ctx.handle_packet(now, &mut rec, bootstrap_addr(), &bytes(&ack(&bs_request, ResponseCode::Changed)));

    // EXCHANGE_LIFETIME without a Bootstrap-Finish.
    let wait = step(&mut ctx, now, &mut rec);
    assert!(wait <= Duration::from_secs(60));
    step(&mut ctx, now + Duration::from_secs(247), &mut rec);
    step(&mut ctx, now + Duration::from_secs(247), &mut rec);
    assert_eq!(ctx.state(), ClientState::BootstrapRequired);
}

#[test]
fn request_outside_bootstrap_is_reset() {
    let now = Instant::now();
    let mut ctx = Lwm2mContext::new("dev1", bootstrap_registry(5), Some(11));
    let mut rec = Recorder::default();
    step(&mut ctx, now, &mut rec);
    step(&mut ctx, now, &mut rec);

    // Still in hold-off, no session yet.
    let put = request(Code::Put, "/0/1", 7);
    ctx.handle_packet(now, &mut rec, bootstrap_addr(), &bytes(&put));
    let rst = rec.take_one();
    assert_eq!(rst.kind(), MessageType::Reset);
}
