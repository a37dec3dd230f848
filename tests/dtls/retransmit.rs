//! Lost datagrams during the handshake.

use std::sync::Arc;
use std::time::Duration;

use nbiot::{Config, Event};

use crate::common::*;

#[test]
fn lost_client_hello_is_resent() {
    let _ = env_logger::try_init();

    let mut pair = Pair::plain();
    pair.client.connect(pair.now, server_addr(), None).unwrap();
    let lost = pair.client_packets();
    assert_eq!(lost.len(), 1);

    // Nothing before the first timeout.
    pair.advance(Duration::from_millis(1999));
    assert!(pair.client_packets().is_empty());

    pair.advance(Duration::from_millis(1));
    let resent = pair.client_packets();
    assert_eq!(resent.len(), 1);
    // Same handshake message, new record sequence number.
    assert_eq!(resent[0][13..], lost[0][13..]);
    assert_ne!(resent[0][5..11], lost[0][5..11]);

    pair.to_server(&resent);
    pair.exchange();
    assert_eq!(pair.client_events, vec![Event::Connected]);
}

#[test]
fn lost_server_flight_is_resent() {
    let _ = env_logger::try_init();

    let mut pair = Pair::plain();
    pair.client.connect(pair.now, server_addr(), None).unwrap();

    // ClientHello / HelloVerifyRequest / ClientHello
    let c = pair.client_packets();
    pair.to_server(&c);
    let s = pair.server_packets();
    pair.to_client(&s);
    let c = pair.client_packets();
    pair.to_server(&c);

    // The ServerHello flight is lost.
    let lost = pair.server_packets();
    assert!(!lost.is_empty());

    pair.advance(Duration::from_secs(2));
    let resent = pair.server_packets();
    assert_eq!(resent.len(), lost.len());

    // The client also timed out and repeated its hello. The server answers
    // that duplicate with the flight again, which the client ignores.
    pair.to_client(&resent);
    pair.exchange();
    assert_eq!(pair.client_events, vec![Event::Connected]);
    assert_eq!(pair.server_events, vec![Event::Connected]);
}

#[test]
fn lost_final_server_flight() {
    let _ = env_logger::try_init();

    let mut pair = Pair::plain();
    pair.client.connect(pair.now, server_addr(), None).unwrap();

    let c = pair.client_packets();
    pair.to_server(&c);
    let s = pair.server_packets();
    pair.to_client(&s);
    let c = pair.client_packets();
    pair.to_server(&c);
    let s = pair.server_packets();
    pair.to_client(&s);

    // Client key exchange flight reaches the server...
    let c = pair.client_packets();
    pair.to_server(&c);
    assert!(pair.server.is_connected(client_addr()));

    // ...but its ChangeCipherSpec and Finished do not make it back.
    let lost = pair.server_packets();
    assert!(!lost.is_empty());
    assert!(!pair.client.is_connected(server_addr()));

    // The server's last flight has no timer of its own.
    pair.now += Duration::from_secs(2);
    pair.server.check_retransmit(pair.now);
    assert!(pair.server_packets().is_empty());

    // The client resends, the repeated Finished makes the server resend.
    pair.client.check_retransmit(pair.now);
    pair.exchange();
    assert!(pair.client.is_connected(server_addr()));
    assert_eq!(pair.client_events, vec![Event::Connected]);
}

#[test]
fn lost_server_finished() {
    let _ = env_logger::try_init();

    let mut pair = Pair::plain();
    pair.client.connect(pair.now, server_addr(), None).unwrap();

    let c = pair.client_packets();
    pair.to_server(&c);
    let s = pair.server_packets();
    pair.to_client(&s);
    let c = pair.client_packets();
    pair.to_server(&c);
    let s = pair.server_packets();
    pair.to_client(&s);
    let c = pair.client_packets();
    pair.to_server(&c);
    assert!(pair.server.is_connected(client_addr()));

    // Only the ChangeCipherSpec record of the last flight arrives.
    let last = pair.server_packets();
    assert_eq!(last.len(), 1);
    assert_eq!(content_types(&last[0]), vec![CONTENT_CHANGE_CIPHER_SPEC, CONTENT_HANDSHAKE]);
    let ccs_len = 13 + u16::from_be_bytes([last[0][11], last[0][12]]) as usize;
    pair.to_client(&[last[0][..ccs_len].to_vec()]);
    assert!(!pair.client.is_connected(server_addr()));
    assert!(pair.client_packets().is_empty());

    // The client flight is still on its timer.
    pair.advance(Duration::from_secs(2));
    let resent = pair.client_packets();
    assert!(!resent.is_empty());
    pair.to_server(&resent);
    pair.exchange();
    assert!(pair.client.is_connected(server_addr()));
    assert_eq!(pair.client_events, vec![Event::Connected]);
}

#[test]
fn handshake_gives_up() {
    let _ = env_logger::try_init();

    let client_config = Arc::new(
        Config::builder()
            .flight_start_rto(Duration::from_secs(1))
            .flight_retries(3)
            .rng_seed(11)
            .build()
            .unwrap(),
    );
    let mut pair = Pair::new(client_config, config(12), None);
    pair.client.connect(pair.now, server_addr(), None).unwrap();

    let mut sent = pair.client_packets().len();
    // 1 + 2 + 4 seconds of resends, then 8 more before giving up.
    for secs in [1, 2, 4, 8] {
        pair.advance(Duration::from_secs(secs));
        sent += pair.client_packets().len();
    }

    assert_eq!(sent, 4);
    assert!(!pair.client.has_peer(server_addr()));
    assert_eq!(pair.client_events, vec![Event::Closed(None)]);
}
