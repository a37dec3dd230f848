//! Register, update and deregister against a scripted server.

use std::time::{Duration, Instant};

use nbiot::coap::{Code, ContentFormat, MessageType, Packet, ResponseCode};
use nbiot::{ClientState, Error, Lwm2mContext};

use crate::common::*;

#[test]
fn register_and_update() {
    let _ = env_logger::try_init();
    let now = Instant::now();
    let mut ctx = Lwm2mContext::new("dev1", registry(), Some(1));
    let mut rec = Recorder::default();

    assert_eq!(ctx.registration_status(), Err(Error::NotRegistered));
    assert_eq!(step(&mut ctx, now, &mut rec), Duration::ZERO);
    assert_eq!(ctx.state(), ClientState::RegisterRequired);
    step(&mut ctx, now, &mut rec);
    assert_eq!(ctx.state(), ClientState::Registering);
    assert_eq!(rec.connects, vec![SERVER_URI.to_string()]);
    assert_eq!(ctx.registration_status(), Err(Error::Pending));

    let register = rec.take_one();
    assert_eq!(register.kind(), MessageType::Confirmable);
    assert_eq!(register.code(), Code::Post);
    assert_eq!(register.uri_path(), ["rd"]);
    assert_eq!(register.uri_query(), ["ep=dev1", "b=U", "lt=300"]);
    assert_eq!(register.content_format(), Some(ContentFormat::LinkFormat));
    assert_eq!(
        register.payload(),
        b"</>;rt=\"oma.lwm2m\",</1/0>,</3/0>,</3303/0>"
    );

    let mut created = ack(&register, ResponseCode::Created);
    created.set_location_path("/rd/5");
    ctx.handle_packet(now, &mut rec, server_addr(), &bytes(&created));
    step(&mut ctx, now, &mut rec);
    assert_eq!(ctx.state(), ClientState::Ready);
    assert_eq!(ctx.registration_status(), Ok(()));
    assert_eq!(ctx.server_location(SHORT_ID), Some("/rd/5"));

    // Update without parameters.
    ctx.update_registration(false);
    step(&mut ctx, now, &mut rec);
    let update = rec.take_one();
    assert_eq!(update.code(), Code::Post);
    assert_eq!(update.uri_path(), ["rd", "5"]);
    assert!(update.uri_query().is_empty());
    assert!(update.payload().is_empty());
    ctx.handle_packet(now, &mut rec, server_addr(), &bytes(&ack(&update, ResponseCode::Changed)));

    // Full update carries the object list again.
    ctx.update_registration(true);
    step(&mut ctx, now, &mut rec);
    let update = rec.take_one();
    assert_eq!(update.uri_path(), ["rd", "5"]);
    assert_eq!(update.uri_query(), ["lt=300", "b=U"]);
    assert!(update.payload().starts_with(b"</>;rt=\"oma.lwm2m\""));
    ctx.handle_packet(now, &mut rec, server_addr(), &bytes(&ack(&update, ResponseCode::Changed)));
    assert_eq!(ctx.registration_status(), Ok(()));
}

#[test]
fn update_sent_before_lifetime_expires() {
    let _ = env_logger::try_init();
    let now = Instant::now();
    let (mut ctx, mut rec) = registered(now);

    // Lifetime 300 minus MAX_TRANSMIT_WAIT.
    let wait = step_within(&mut ctx, now, &mut rec, Duration::from_secs(3600));
    assert_eq!(wait, Duration::from_secs(207));
    assert!(rec.take().is_empty());

    // A shorter wait from the caller is left alone.
    assert_eq!(step(&mut ctx, now, &mut rec), Duration::from_secs(60));

    step(&mut ctx, now + Duration::from_secs(207), &mut rec);
    let update = rec.take_one();
    assert_eq!(update.uri_path(), ["rd", "5"]);
}

#[test]
fn register_is_retransmitted() {
    let _ = env_logger::try_init();
    let now = Instant::now();
    let mut ctx = Lwm2mContext::new("dev1", registry(), Some(2));
    let mut rec = Recorder::default();
    step(&mut ctx, now, &mut rec);
    step(&mut ctx, now, &mut rec);
    let first = rec.take_one();
    let wait = step(&mut ctx, now, &mut rec);
    assert!(rec.take().is_empty());

    // ACK_TIMEOUT 2 s, stretched by up to 1.5.
    assert!(wait >= Duration::from_secs(2) && wait <= Duration::from_secs(3));

    step(&mut ctx, now + wait, &mut rec);
    let again = rec.take_one();
    assert_eq!(bytes(&again), bytes(&first));
}

#[test]
fn register_rejected() {
    let _ = env_logger::try_init();
    let now = Instant::now();
    let mut ctx = Lwm2mContext::new("dev1", registry(), Some(3));
    let mut rec = Recorder::default();
    step(&mut ctx, now, &mut rec);
    step(&mut ctx, now, &mut rec);
    let register = rec.take_one();

    let forbidden = ack(&register, ResponseCode::Forbidden);
    ctx.handle_packet(now, &mut rec, server_addr(), &bytes(&forbidden));

    let mut timeout = Duration::from_secs(60);
    let result = ctx.step(now, &mut rec, &mut timeout);
    assert_eq!(result, Err(Error::RegistrationFailed));
    assert_eq!(ctx.registration_status(), Err(Error::RegistrationFailed));
}

#[test]
fn reset_to_update_restarts_client() {
    let _ = env_logger::try_init();
    let now = Instant::now();
    let (mut ctx, mut rec) = registered(now);

    ctx.update_registration(false);
    step(&mut ctx, now, &mut rec);
    let update = rec.take_one();

    let rst = Packet::new(MessageType::Reset, Code::Empty, update.mid());
    ctx.handle_packet(now, &mut rec, server_addr(), &bytes(&rst));
    assert_eq!(ctx.state(), ClientState::Reset);

    let mut timeout = Duration::from_secs(60);
    assert_eq!(ctx.step(now, &mut rec, &mut timeout), Err(Error::ServerReset));
    assert_eq!(ctx.state(), ClientState::Initial);
    assert_eq!(rec.disconnects, vec![server_addr()]);

    // And registers again from scratch.
    step(&mut ctx, now, &mut rec);
    step(&mut ctx, now, &mut rec);
    assert_eq!(rec.take_one().uri_path(), ["rd"]);
}

#[test]
fn session_closed_while_registered() {
    let now = Instant::now();
    let (mut ctx, mut rec) = registered(now);

    ctx.session_closed(server_addr());
    assert_eq!(ctx.state(), ClientState::Reset);
    let mut timeout = Duration::from_secs(60);
    assert_eq!(ctx.step(now, &mut rec, &mut timeout), Err(Error::ServerReset));
}

#[test]
fn update_trigger_executes_update() {
    let _ = env_logger::try_init();
    let now = Instant::now();
    let (mut ctx, mut rec) = registered(now);

    let resp = exchange(&mut ctx, &mut rec, now, &request(Code::Post, "/1/0/8", 100));
    assert_eq!(code(&resp), ResponseCode::Changed);

    step(&mut ctx, now, &mut rec);
    let update = rec.take_one();
    assert_eq!(update.uri_path(), ["rd", "5"]);
}

#[test]
fn close_deregisters() {
    let _ = env_logger::try_init();
    let now = Instant::now();
    let (mut ctx, mut rec) = registered(now);

    ctx.close(now, &mut rec);
    let delete = rec.take_one();
    assert_eq!(delete.code(), Code::Delete);
    assert_eq!(delete.uri_path(), ["rd", "5"]);
    assert_eq!(rec.disconnects, vec![server_addr()]);
    assert_eq!(ctx.state(), ClientState::Initial);
    assert_eq!(ctx.registration_status(), Err(Error::NotRegistered));
}

#[test]
fn ping_is_answered_with_reset() {
    let now = Instant::now();
    let (mut ctx, mut rec) = registered(now);

    let ping = Packet::new(MessageType::Confirmable, Code::Empty, 4242);
    let rst = exchange(&mut ctx, &mut rec, now, &ping);
    assert_eq!(rst.kind(), MessageType::Reset);
    assert_eq!(rst.mid(), 4242);
}

#[test]
fn request_from_unknown_session_is_reset() {
    let now = Instant::now();
    let (mut ctx, mut rec) = registered(now);

    let req = request(Code::Get, "/3/0/0", 7);
    let stranger = "198.51.100.1:5683".parse().unwrap();
    ctx.handle_packet(now, &mut rec, stranger, &bytes(&req));
    let (to, data) = rec.sent.remove(0);
    assert_eq!(to, stranger);
    let rst = Packet::parse(&data).unwrap();
    assert_eq!(rst.kind(), MessageType::Reset);
    assert_eq!(rst.mid(), 7);
}
