//! Device management and observation requests from a registered server.

use std::any::Any;
use std::time::{Duration, Instant};

use nbiot::coap::{BlockInfo, Code, ContentFormat, MessageType, ResponseCode};
use nbiot::tlv;
use nbiot::{Data, Object, ObjectResult, ResourceObject, Uri, Value};

use crate::common::*;

fn text(p: &nbiot::coap::Packet) -> &str {
    std::str::from_utf8(p.payload()).unwrap()
}

#[test]
fn read_single_resource_as_text() {
    let _ = env_logger::try_init();
    let now = Instant::now();
    let (mut ctx, mut rec) = registered(now);

    let resp = exchange(&mut ctx, &mut rec, now, &request(Code::Get, "/3/0/0", 1));
    assert_eq!(resp.kind(), MessageType::Acknowledgement);
    assert_eq!(resp.mid(), 1);
    assert_eq!(resp.token(), &1u16.to_be_bytes());
    assert_eq!(code(&resp), ResponseCode::Content);
    assert_eq!(resp.content_format(), Some(ContentFormat::Text));
    assert_eq!(text(&resp), "Acme");
}

#[test]
fn read_instance_as_tlv() {
    let now = Instant::now();
    let (mut ctx, mut rec) = registered(now);

    let resp = exchange(&mut ctx, &mut rec, now, &request(Code::Get, "/3303/0", 2));
    assert_eq!(code(&resp), ResponseCode::Content);
    assert_eq!(resp.content_format(), Some(ContentFormat::Tlv));
    // Resources come out in id order.
    let (first, used) = tlv::decode(resp.payload()).unwrap();
    assert_eq!(first.id, 5700);
    let (second, _) = tlv::decode(&resp.payload()[used..]).unwrap();
    assert_eq!(second.id, 5750);
}

#[test]
fn security_object_is_hidden() {
    let now = Instant::now();
    let (mut ctx, mut rec) = registered(now);

    let resp = exchange(&mut ctx, &mut rec, now, &request(Code::Get, "/0/0/0", 3));
    assert_eq!(code(&resp), ResponseCode::NotFound);
}

#[test]
fn empty_path_not_allowed() {
    let now = Instant::now();
    let (mut ctx, mut rec) = registered(now);

    let resp = exchange(&mut ctx, &mut rec, now, &request(Code::Get, "", 4));
    assert_eq!(code(&resp), ResponseCode::MethodNotAllowed);
}

/// Object whose instance 0 must never be read.
struct OnlyInstanceOne;

impl Object for OnlyInstanceOne {
    fn id(&self) -> u16 {
        3200
    }

    fn instances(&self) -> Vec<u16> {
        vec![1]
    }

    fn read(&mut self, instance: u16, data: &mut Vec<Data>) -> ObjectResult {
        assert_eq!(instance, 1, "read of a missing instance");
        data.clear();
        data.push(Data::new(5500, Value::Boolean(true)));
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[test]
fn missing_instance_is_not_read() {
    let now = Instant::now();
    let mut registry = registry();
    registry.add(Box::new(OnlyInstanceOne)).unwrap();
    let (mut ctx, mut rec) = registered_with(now, registry);

    let resp = exchange(&mut ctx, &mut rec, now, &request(Code::Get, "/3200/0/5500", 5));
    assert_eq!(code(&resp), ResponseCode::NotFound);

    let resp = exchange(&mut ctx, &mut rec, now, &request(Code::Get, "/3200/1/5500", 6));
    assert_eq!(code(&resp), ResponseCode::Content);
    assert_eq!(text(&resp), "1");
}

#[test]
fn write_text_resource() {
    let _ = env_logger::try_init();
    let now = Instant::now();
    let (mut ctx, mut rec) = registered(now);

    // No Content-Format means plain text.
    let mut put = request(Code::Put, "/3303/0/5750", 7);
    put.set_payload(b"Celsius".to_vec());
    let resp = exchange(&mut ctx, &mut rec, now, &put);
    assert_eq!(code(&resp), ResponseCode::Changed);

    let object = ctx.registry_mut().downcast_mut::<ResourceObject>(3303).unwrap();
    assert_eq!(object.value(0, 5750), Some(&Value::String("Celsius".into())));

    // Read only.
    let mut put = request(Code::Put, "/3303/0/5700", 8);
    put.set_payload(b"30".to_vec());
    let resp = exchange(&mut ctx, &mut rec, now, &put);
    assert_eq!(code(&resp), ResponseCode::MethodNotAllowed);
}

#[test]
fn discover_lists_resources() {
    let now = Instant::now();
    let (mut ctx, mut rec) = registered(now);

    let mut get = request(Code::Get, "/3303/0", 9);
    get.set_accept(ContentFormat::LinkFormat);
    let resp = exchange(&mut ctx, &mut rec, now, &get);
    assert_eq!(code(&resp), ResponseCode::Content);
    assert_eq!(resp.content_format(), Some(ContentFormat::LinkFormat));
    assert_eq!(text(&resp), "</3303/0>,</3303/0/5700>,</3303/0/5750>");
}

#[test]
fn write_attributes_then_discover() {
    let now = Instant::now();
    let (mut ctx, mut rec) = registered(now);

    let mut put = request(Code::Put, "/3303/0/5700", 10);
    put.add_uri_query("pmin=10");
    put.add_uri_query("gt=25");
    let resp = exchange(&mut ctx, &mut rec, now, &put);
    assert_eq!(code(&resp), ResponseCode::Changed);

    let mut get = request(Code::Get, "/3303/0/5700", 11);
    get.set_accept(ContentFormat::LinkFormat);
    let resp = exchange(&mut ctx, &mut rec, now, &get);
    let links = text(&resp);
    assert!(links.starts_with("</3303/0/5700>"), "{}", links);
    assert!(links.contains("pmin=10"), "{}", links);
    assert!(links.contains("gt=25"), "{}", links);

    // Value conditions only make sense on resources.
    let mut put = request(Code::Put, "/3303/0", 12);
    put.add_uri_query("lt=5");
    let resp = exchange(&mut ctx, &mut rec, now, &put);
    assert_eq!(code(&resp), ResponseCode::BadRequest);
}

#[test]
fn observe_and_notify() {
    let _ = env_logger::try_init();
    let now = Instant::now();
    let (mut ctx, mut rec) = registered(now);

    let mut get = request(Code::Get, "/3303/0/5700", 20);
    get.set_observe(0);
    let resp = exchange(&mut ctx, &mut rec, now, &get);
    assert_eq!(code(&resp), ResponseCode::Content);
    assert_eq!(resp.observe(), Some(0));

    // Unchanged values are not sent.
    step(&mut ctx, now, &mut rec);
    assert!(rec.take().is_empty());

    let object = ctx.registry_mut().downcast_mut::<ResourceObject>(3303).unwrap();
    assert_eq!(object.set_value(0, 5700, Value::Float(22.5)), Some(true));
    ctx.resource_value_changed(&Uri::resource(3303, 0, 5700));
    step(&mut ctx, now, &mut rec);

    let note = rec.take_one();
    assert_eq!(note.kind(), MessageType::NonConfirmable);
    assert_eq!(code(&note), ResponseCode::Content);
    assert_eq!(note.token(), get.token());
    assert_eq!(note.observe(), Some(1));
    assert_eq!(text(&note).parse::<f64>().unwrap(), 22.5);

    // RST to the notification ends the observation.
    let rst = nbiot::coap::Packet::new(MessageType::Reset, Code::Empty, note.mid());
    ctx.handle_packet(now, &mut rec, server_addr(), &bytes(&rst));
    ctx.resource_value_changed(&Uri::resource(3303, 0, 5700));
    step(&mut ctx, now, &mut rec);
    assert!(rec.take().is_empty());
}

#[test]
fn failed_notification_is_retried() {
    let _ = env_logger::try_init();
    let now = Instant::now();
    let (mut ctx, mut rec) = registered(now);

    let mut get = request(Code::Get, "/3303/0/5700", 25);
    get.set_observe(0);
    exchange(&mut ctx, &mut rec, now, &get);

    let object = ctx.registry_mut().downcast_mut::<ResourceObject>(3303).unwrap();
    object.set_value(0, 5700, Value::Float(24.0));
    ctx.resource_value_changed(&Uri::resource(3303, 0, 5700));
    rec.fail_sends = true;
    step(&mut ctx, now, &mut rec);
    assert!(rec.take().is_empty());

    // The change still counts as unsent.
    rec.fail_sends = false;
    step(&mut ctx, now + Duration::from_secs(1), &mut rec);
    let note = rec.take_one();
    assert_eq!(note.observe(), Some(1));
    assert_eq!(text(&note).parse::<f64>().unwrap(), 24.0);
}

#[test]
fn observe_only_on_get() {
    let _ = env_logger::try_init();
    let now = Instant::now();
    let (mut ctx, mut rec) = registered(now);

    let mut put = request(Code::Put, "/3303/0/5750", 26);
    put.set_observe(0);
    put.set_payload(b"Kelvin".to_vec());
    let resp = exchange(&mut ctx, &mut rec, now, &put);
    assert_eq!(code(&resp), ResponseCode::Changed);
    assert_eq!(resp.observe(), None);

    ctx.resource_value_changed(&Uri::resource(3303, 0, 5750));
    step(&mut ctx, now, &mut rec);
    assert!(rec.take().is_empty());
}

#[test]
fn observe_respects_pmin_and_pmax() {
    let _ = env_logger::try_init();
    let now = Instant::now();
    let (mut ctx, mut rec) = registered(now);

    let mut put = request(Code::Put, "/3303/0/5700", 30);
    put.add_uri_query("pmin=5");
    put.add_uri_query("pmax=60");
    assert_eq!(code(&exchange(&mut ctx, &mut rec, now, &put)), ResponseCode::Changed);

    let mut get = request(Code::Get, "/3303/0/5700", 31);
    get.set_observe(0);
    exchange(&mut ctx, &mut rec, now, &get);

    // A change inside pmin waits for pmin.
    let object = ctx.registry_mut().downcast_mut::<ResourceObject>(3303).unwrap();
    object.set_value(0, 5700, Value::Float(23.0));
    ctx.resource_value_changed(&Uri::resource(3303, 0, 5700));
    let wait = step(&mut ctx, now + Duration::from_secs(1), &mut rec);
    assert!(rec.take().is_empty());
    assert_eq!(wait, Duration::from_secs(4));

    step(&mut ctx, now + Duration::from_secs(5), &mut rec);
    assert_eq!(rec.take_one().observe(), Some(1));

    // Nothing changes: pmax forces a notification.
    step(&mut ctx, now + Duration::from_secs(64), &mut rec);
    assert!(rec.take().is_empty());
    step(&mut ctx, now + Duration::from_secs(65), &mut rec);
    assert_eq!(rec.take_one().observe(), Some(2));
}

#[test]
fn cancel_observation_with_observe_1() {
    let now = Instant::now();
    let (mut ctx, mut rec) = registered(now);

    let mut get = request(Code::Get, "/3303/0/5700", 40);
    get.set_observe(0);
    exchange(&mut ctx, &mut rec, now, &get);

    let mut cancel = request(Code::Get, "/3303/0/5700", 41);
    cancel.set_observe(1);
    let resp = exchange(&mut ctx, &mut rec, now, &cancel);
    assert_eq!(code(&resp), ResponseCode::Content);
    assert_eq!(resp.observe(), None);

    let object = ctx.registry_mut().downcast_mut::<ResourceObject>(3303).unwrap();
    object.set_value(0, 5700, Value::Float(30.0));
    ctx.resource_value_changed(&Uri::resource(3303, 0, 5700));
    step(&mut ctx, now, &mut rec);
    assert!(rec.take().is_empty());
}

#[test]
fn block1_write() {
    let _ = env_logger::try_init();
    let now = Instant::now();
    let (mut ctx, mut rec) = registered(now);

    let body = b"0123456789abcdef0123456789ABCDEFtail";

    let mut first = request(Code::Put, "/3303/0/5750", 50);
    first.set_block1(BlockInfo::with_size(0, true, 16).unwrap());
    first.set_payload(body[..16].to_vec());
    let resp = exchange(&mut ctx, &mut rec, now, &first);
    assert_eq!(code(&resp), ResponseCode::Continue);
    assert_eq!(resp.block1().map(|b| b.num()), Some(0));

    // A retransmitted block is answered again without appending.
    let resp = exchange(&mut ctx, &mut rec, now, &first);
    assert_eq!(code(&resp), ResponseCode::Continue);

    let mut second = request(Code::Put, "/3303/0/5750", 51);
    second.set_block1(BlockInfo::with_size(1, true, 16).unwrap());
    second.set_payload(body[16..32].to_vec());
    assert_eq!(code(&exchange(&mut ctx, &mut rec, now, &second)), ResponseCode::Continue);

    let mut last = request(Code::Put, "/3303/0/5750", 52);
    last.set_block1(BlockInfo::with_size(2, false, 16).unwrap());
    last.set_payload(body[32..].to_vec());
    let resp = exchange(&mut ctx, &mut rec, now, &last);
    assert_eq!(code(&resp), ResponseCode::Changed);

    let object = ctx.registry_mut().downcast_mut::<ResourceObject>(3303).unwrap();
    let expected = std::str::from_utf8(body).unwrap().to_string();
    assert_eq!(object.value(0, 5750), Some(&Value::String(expected)));
}

#[test]
fn block1_out_of_order() {
    let now = Instant::now();
    let (mut ctx, mut rec) = registered(now);

    let mut skipped = request(Code::Put, "/3303/0/5750", 60);
    skipped.set_block1(BlockInfo::with_size(1, true, 16).unwrap());
    skipped.set_payload(vec![b'x'; 16]);
    let resp = exchange(&mut ctx, &mut rec, now, &skipped);
    assert_eq!(code(&resp), ResponseCode::RequestEntityIncomplete);
}

#[test]
fn execute_calls_back() {
    use std::cell::RefCell;
    use std::rc::Rc;

    let now = Instant::now();
    let got = Rc::new(RefCell::new(Vec::new()));
    let sink = got.clone();

    let mut registry = registry();
    let mut object = ResourceObject::new(3311);
    object
        .insert(
            nbiot::Resource::new(3311, 0, 5523, Value::String(String::new()), nbiot::Access::EXECUTE)
                .on_execute(move |uri, args| sink.borrow_mut().push((uri, args.to_vec()))),
        )
        .unwrap();
    registry.add(Box::new(object)).unwrap();
    let (mut ctx, mut rec) = registered_with(now, registry);

    let mut post = request(Code::Post, "/3311/0/5523", 70);
    post.set_payload(b"5='on'".to_vec());
    let resp = exchange(&mut ctx, &mut rec, now, &post);
    assert_eq!(code(&resp), ResponseCode::Changed);
    assert_eq!(
        got.borrow().as_slice(),
        &[(Uri::resource(3311, 0, 5523), b"5='on'".to_vec())]
    );
}
