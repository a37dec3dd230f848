//! Full handshakes between a client and a server context.

use std::sync::Arc;

use nbiot::{AlertDescription, Config, DtlsContext, Event, Identity};

use crate::common::*;

#[test]
fn handshake_without_client_auth() {
    let _ = env_logger::try_init();

    let mut pair = Pair::plain();
    pair.connect();

    assert_eq!(pair.client_events, vec![Event::Connected]);
    assert_eq!(pair.server_events, vec![Event::Connected]);
    assert!(pair.client.is_connected(server_addr()));
    assert!(pair.server.is_connected(client_addr()));

    // Trust on first use: the server key is remembered.
    assert_eq!(
        pair.client.peer_public_key(server_addr()),
        Some(pair.server_identity.public_key_der())
    );
    assert_eq!(pair.server.peer_public_key(client_addr()), None);
}

#[test]
fn handshake_starts_with_cookie_exchange() {
    let _ = env_logger::try_init();

    let mut pair = Pair::plain();
    pair.client.connect(pair.now, server_addr(), None).unwrap();

    let hello = pair.client_packets();
    assert_eq!(hello.len(), 1);
    pair.to_server(&hello);
    assert!(!pair.server.has_peer(client_addr()));

    let hvr = pair.server_packets();
    assert_eq!(hvr.len(), 1);
    assert_eq!(content_types(&hvr[0]), vec![CONTENT_HANDSHAKE]);
    // HelloVerifyRequest
    assert_eq!(hvr[0][13], 3);

    pair.to_client(&hvr);
    let hello2 = pair.client_packets();
    pair.to_server(&hello2);
    assert!(pair.server.has_peer(client_addr()));
    assert!(!pair.server.is_connected(client_addr()));
}

#[test]
fn server_flight_after_cookie_exchange_is_accepted() {
    let _ = env_logger::try_init();

    let mut pair = Pair::plain();
    pair.client.connect(pair.now, server_addr(), None).unwrap();
    let c = pair.client_packets();
    pair.to_server(&c);
    let hvr = pair.server_packets();
    // The HelloVerifyRequest reuses the record sequence number of the
    // ClientHello, which is 0.
    assert_eq!(hvr[0][5..11], [0, 0, 0, 0, 0, 0]);
    pair.to_client(&hvr);

    let c = pair.client_packets();
    pair.to_server(&c);
    let flight = pair.server_packets();
    // The new association on the server starts over at 0 too.
    assert_eq!(flight[0][5..11], [0, 0, 0, 0, 0, 0]);

    // No timer involved: the client answers the flight right away.
    pair.to_client(&flight);
    let answer = pair.client_packets();
    assert!(!answer.is_empty());
    let types: Vec<u8> = answer.iter().flat_map(|d| content_types(d)).collect();
    assert!(types.contains(&CONTENT_CHANGE_CIPHER_SPEC), "{:?}", types);
}

#[test]
fn handshake_with_client_auth() {
    let _ = env_logger::try_init();

    let server_config = Arc::new(
        Config::builder()
            .require_client_certificate(true)
            .rng_seed(3)
            .build()
            .unwrap(),
    );
    let client_identity = Identity::generate().unwrap();
    let mut pair = Pair::new(config(4), server_config, Some(client_identity.clone()));
    pair.connect();

    assert!(pair.client.is_connected(server_addr()));
    assert!(pair.server.is_connected(client_addr()));
    assert_eq!(
        pair.server.peer_public_key(client_addr()),
        Some(client_identity.public_key_der())
    );
}

#[test]
fn client_auth_required_but_no_identity() {
    let _ = env_logger::try_init();

    let server_config = Arc::new(
        Config::builder()
            .require_client_certificate(true)
            .rng_seed(5)
            .build()
            .unwrap(),
    );
    let mut pair = Pair::new(config(6), server_config, None);
    pair.connect();

    assert!(!pair.client.has_peer(server_addr()));
    assert!(!pair.server.has_peer(client_addr()));

    let Some(Event::Closed(Some(alert))) = pair.client_events.last().copied() else {
        panic!("client not closed: {:?}", pair.client_events);
    };
    // Without a key the client never offers a client certificate type.
    assert!(alert.is_fatal());
    assert_eq!(alert.description, AlertDescription::UnsupportedCertificate);
}

#[test]
fn pinned_server_key_mismatch() {
    let _ = env_logger::try_init();

    let mut pair = Pair::plain();
    let other = Identity::generate().unwrap();
    pair.client
        .connect(pair.now, server_addr(), Some(other.public_key_der()))
        .unwrap();
    pair.exchange();

    assert!(!pair.client.has_peer(server_addr()));
    let Some(Event::Closed(Some(alert))) = pair.client_events.last().copied() else {
        panic!("client not closed: {:?}", pair.client_events);
    };
    assert_eq!(alert.description, AlertDescription::BadCertificate);

    // The server saw our alert.
    assert!(!pair.server.has_peer(client_addr()));
    assert!(matches!(pair.server_events.last(), Some(Event::Closed(Some(_)))));
}

#[test]
fn pinned_server_key_match() {
    let _ = env_logger::try_init();

    let mut pair = Pair::plain();
    let key = pair.server_identity.public_key_der().to_vec();
    pair.client.connect(pair.now, server_addr(), Some(&key)).unwrap();
    pair.exchange();

    assert_eq!(pair.client_events, vec![Event::Connected]);
}

#[test]
fn connect_with_garbage_key_is_rejected() {
    let mut client = DtlsContext::client(config(7), None);
    let err = client
        .connect(std::time::Instant::now(), server_addr(), Some(&[1, 2, 3]))
        .unwrap_err();
    assert!(matches!(err, nbiot::Error::BadParameter(_)));
    assert!(!client.has_peer(server_addr()));
}

#[test]
fn peer_limit() {
    let config = Arc::new(Config::builder().max_peers(1).rng_seed(8).build().unwrap());
    let mut client = DtlsContext::client(config, None);
    let now = std::time::Instant::now();
    client.connect(now, server_addr(), None).unwrap();
    let err = client
        .connect(now, "192.0.2.3:5684".parse().unwrap(), None)
        .unwrap_err();
    assert_eq!(err, nbiot::Error::NoMemory);
}

#[test]
fn new_hello_replaces_association() {
    let _ = env_logger::try_init();

    let mut pair = Pair::plain();
    pair.connect();
    pair.server_events.clear();

    // The client restarts from scratch on the same address.
    let mut restarted = DtlsContext::client(config(9), None);
    restarted.connect(pair.now, server_addr(), None).unwrap();
    pair.client = restarted;
    pair.client_events.clear();
    pair.exchange();

    assert_eq!(pair.server_events, vec![Event::Closed(None), Event::Connected]);
    assert_eq!(pair.client_events, vec![Event::Connected]);
}
