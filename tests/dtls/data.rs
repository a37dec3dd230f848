//! Application data and close_notify over an established association.

use nbiot::{AlertDescription, Error, Event};

use crate::common::*;

#[test]
fn data_both_ways() {
    let _ = env_logger::try_init();

    let mut pair = Pair::plain();
    pair.connect();

    pair.client.write(pair.now, server_addr(), b"ping").unwrap();
    let packets = pair.client_packets();
    assert_eq!(packets.len(), 1);
    assert_eq!(content_types(&packets[0]), vec![CONTENT_APPLICATION_DATA]);
    // Encrypted on the wire.
    assert!(!packets[0].windows(4).any(|w| w == b"ping"));
    pair.to_server(&packets);
    pair.server_packets();
    assert_eq!(pair.server_data, vec![b"ping".to_vec()]);

    pair.server.write(pair.now, client_addr(), b"pong").unwrap();
    pair.exchange();
    assert_eq!(pair.client_data, vec![b"pong".to_vec()]);
}

#[test]
fn replayed_record_is_dropped() {
    let _ = env_logger::try_init();

    let mut pair = Pair::plain();
    pair.connect();

    pair.client.write(pair.now, server_addr(), b"once").unwrap();
    let packets = pair.client_packets();
    pair.to_server(&packets);
    pair.to_server(&packets);
    pair.server_packets();
    assert_eq!(pair.server_data, vec![b"once".to_vec()]);
    assert!(pair.server.is_connected(client_addr()));
}

#[test]
fn tampered_record_is_fatal() {
    let _ = env_logger::try_init();

    let mut pair = Pair::plain();
    pair.connect();

    pair.client.write(pair.now, server_addr(), b"data").unwrap();
    let mut packets = pair.client_packets();
    let last = packets[0].len() - 1;
    packets[0][last] ^= 0x01;

    let err = pair
        .server
        .handle_message(pair.now, client_addr(), &packets[0])
        .unwrap_err();
    let Error::Alert(alert) = err else {
        panic!("expected alert, got {:?}", err);
    };
    assert_eq!(alert.description, AlertDescription::BadRecordMac);
    assert!(!pair.server.has_peer(client_addr()));
    pair.server_packets();
    assert!(pair.server_data.is_empty());
    assert_eq!(pair.server_events.last(), Some(&Event::Closed(Some(alert))));
}

#[test]
fn write_larger_than_mtu() {
    let mut pair = Pair::plain();
    pair.connect();

    let max = pair.client.max_application_data();
    let big = vec![0u8; max + 1];
    let err = pair.client.write(pair.now, server_addr(), &big).unwrap_err();
    assert!(matches!(err, Error::BufferTooSmall { .. }));

    pair.client.write(pair.now, server_addr(), &big[..max]).unwrap();
    pair.exchange();
    assert_eq!(pair.server_data.len(), 1);
    assert_eq!(pair.server_data[0].len(), max);
}

#[test]
fn close_notify() {
    let _ = env_logger::try_init();

    let mut pair = Pair::plain();
    pair.connect();
    pair.client_events.clear();
    pair.server_events.clear();

    pair.client.close(pair.now, server_addr()).unwrap();
    let packets = pair.client_packets();
    assert_eq!(content_types(&packets[0]), vec![CONTENT_ALERT]);
    assert_eq!(pair.client_events, vec![Event::Closed(None)]);
    assert!(!pair.client.has_peer(server_addr()));

    pair.to_server(&packets);
    // The server answers with its own close_notify.
    let reply = pair.server_packets();
    assert_eq!(reply.len(), 1);
    assert!(!pair.server.has_peer(client_addr()));
    let [Event::Closed(Some(alert))] = pair.server_events[..] else {
        panic!("unexpected {:?}", pair.server_events);
    };
    assert!(alert.is_close_notify());

    assert!(matches!(
        pair.client.close(pair.now, server_addr()),
        Err(Error::NotFound)
    ));
}
