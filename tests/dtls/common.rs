//! Shared helpers for DTLS loopback tests.

#![allow(unused)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use nbiot::{Config, DtlsContext, Event, Identity, Output};

pub const CONTENT_CHANGE_CIPHER_SPEC: u8 = 20;
pub const CONTENT_ALERT: u8 = 21;
pub const CONTENT_HANDSHAKE: u8 = 22;
pub const CONTENT_APPLICATION_DATA: u8 = 23;

pub fn client_addr() -> SocketAddr {
    "192.0.2.1:40000".parse().unwrap()
}

pub fn server_addr() -> SocketAddr {
    "192.0.2.2:5684".parse().unwrap()
}

pub fn config(seed: u64) -> Arc<Config> {
    Arc::new(Config::builder().rng_seed(seed).build().unwrap())
}

/// Everything one endpoint produced since the last drain.
#[derive(Default, Debug)]
pub struct Drained {
    pub packets: Vec<Vec<u8>>,
    pub data: Vec<Vec<u8>>,
    pub events: Vec<Event>,
}

pub fn drain(ctx: &mut DtlsContext) -> Drained {
    let mut out = Drained::default();
    while let Some(o) = ctx.poll_output() {
        match o {
            Output::Packet { data, .. } => out.packets.push(data.to_vec()),
            Output::ApplicationData { data, .. } => out.data.push(data.to_vec()),
            Output::Event { event, .. } => out.events.push(event),
        }
    }
    out
}

/// First byte of every record in a datagram.
pub fn content_types(datagram: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut i = 0;
    while i + 13 <= datagram.len() {
        out.push(datagram[i]);
        let len = u16::from_be_bytes([datagram[i + 11], datagram[i + 12]]) as usize;
        i += 13 + len;
    }
    out
}

/// A client and a server wired back to back.
pub struct Pair {
    pub client: DtlsContext,
    pub server: DtlsContext,
    pub server_identity: Identity,
    pub now: Instant,
    pub client_events: Vec<Event>,
    pub server_events: Vec<Event>,
    pub client_data: Vec<Vec<u8>>,
    pub server_data: Vec<Vec<u8>>,
}

impl Pair {
    pub fn new(client_config: Arc<Config>, server_config: Arc<Config>, client_identity: Option<Identity>) -> Self {
        let server_identity = Identity::generate().unwrap();
        Pair {
            client: DtlsContext::client(client_config, client_identity),
            server: DtlsContext::server(server_config, server_identity.clone()),
            server_identity,
            now: Instant::now(),
            client_events: Vec::new(),
            server_events: Vec::new(),
            client_data: Vec::new(),
            server_data: Vec::new(),
        }
    }

    pub fn plain() -> Self {
        Pair::new(config(1), config(2), None)
    }

    /// Collect client output. Packets are returned, the rest is kept.
    pub fn client_packets(&mut self) -> Vec<Vec<u8>> {
        let d = drain(&mut self.client);
        self.client_events.extend(d.events);
        self.client_data.extend(d.data);
        d.packets
    }

    pub fn server_packets(&mut self) -> Vec<Vec<u8>> {
        let d = drain(&mut self.server);
        self.server_events.extend(d.events);
        self.server_data.extend(d.data);
        d.packets
    }

    pub fn to_server(&mut self, packets: &[Vec<u8>]) {
        for p in packets {
            let _ = self.server.handle_message(self.now, client_addr(), p);
        }
    }

    pub fn to_client(&mut self, packets: &[Vec<u8>]) {
        for p in packets {
            let _ = self.client.handle_message(self.now, server_addr(), p);
        }
    }

    /// Move datagrams both ways until both sides go quiet.
    pub fn exchange(&mut self) {
        for _ in 0..20 {
            let c = self.client_packets();
            self.to_server(&c);
            let s = self.server_packets();
            self.to_client(&s);
            if c.is_empty() && s.is_empty() {
                return;
            }
        }
        panic!("endpoints never went quiet");
    }

    pub fn connect(&mut self) {
        self.client.connect(self.now, server_addr(), None).unwrap();
        self.exchange();
    }

    pub fn advance(&mut self, by: Duration) {
        self.now += by;
        self.client.check_retransmit(self.now);
        self.server.check_retransmit(self.now);
    }
}
