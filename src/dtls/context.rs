use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use super::crypto::ecc;
use super::keystore::KeyStore;
use super::message::{parse_fragment, Body, ClientHello, HandshakeType, HelloVerifyRequest};
use super::netq::Due;
use super::peer::{Env, Peer, Role};
use super::record::{is_record, ContentType, ProtocolVersion, RecordHeader};
use super::server::CookieSecret;
use super::{Alert, AlertDescription, Identity};
use crate::buffer::Buf;
use crate::rng::SeededRng;
use crate::{Config, Error};

/// Something the caller has to act on, drained with
/// [`DtlsContext::poll_output`].
#[derive(Debug)]
pub enum Output {
    /// A datagram to send to `peer`.
    Packet { peer: SocketAddr, data: Buf },
    /// Decrypted application data from `peer`.
    ApplicationData { peer: SocketAddr, data: Buf },
    Event { peer: SocketAddr, event: Event },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Handshake finished, application data can flow.
    Connected,
    /// The association is gone. Carries the alert that ended it, if any.
    /// `None` is a local close or a handshake that timed out.
    Closed(Option<Alert>),
}

/// Sans-IO DTLS 1.2 endpoint for any number of peers.
///
/// Datagrams go in through [`handle_message`](Self::handle_message), and
/// everything to send or deliver comes out of
/// [`poll_output`](Self::poll_output). Time only moves when the caller
/// passes a new `now`.
pub struct DtlsContext {
    config: Arc<Config>,
    identity: Option<Identity>,
    /// Whether unknown peers may start a handshake with us.
    accept: bool,
    peers: BTreeMap<SocketAddr, Peer>,
    keystore: KeyStore,
    cookie: CookieSecret,
    rng: SeededRng,
    outputs: VecDeque<Output>,
}

impl DtlsContext {
    /// A context that only initiates handshakes. `identity` is used when a
    /// server asks for client authentication.
    pub fn client(config: Arc<Config>, identity: Option<Identity>) -> Self {
        Self::new(config, identity, false)
    }

    /// A context that answers ClientHellos. It can still connect out.
    pub fn server(config: Arc<Config>, identity: Identity) -> Self {
        Self::new(config, Some(identity), true)
    }

    fn new(config: Arc<Config>, identity: Option<Identity>, accept: bool) -> Self {
        let mut rng = SeededRng::new(config.rng_seed());
        let cookie = CookieSecret::new(&mut rng);
        DtlsContext {
            config,
            identity,
            accept,
            peers: BTreeMap::new(),
            keystore: KeyStore::new(),
            cookie,
            rng,
            outputs: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Key used for handshakes started from now on.
    pub fn set_identity(&mut self, identity: Option<Identity>) {
        self.identity = identity;
    }

    pub fn is_connected(&self, peer: SocketAddr) -> bool {
        self.peers.get(&peer).map_or(false, |p| p.is_connected())
    }

    /// Whether a handshake or association with `peer` exists.
    pub fn has_peer(&self, peer: SocketAddr) -> bool {
        self.peers.contains_key(&peer)
    }

    /// The raw public key `peer` authenticated with, once seen.
    pub fn peer_public_key(&self, peer: SocketAddr) -> Option<&[u8]> {
        self.keystore.get(&peer)
    }

    /// Start a handshake with `peer`. `server_key` pins the server's raw
    /// public key (SPKI DER); without it the first key seen is trusted.
    ///
    /// An existing association or handshake is left alone.
    pub fn connect(&mut self, now: Instant, peer: SocketAddr, server_key: Option<&[u8]>) -> Result<(), Error> {
        if self.peers.contains_key(&peer) {
            return Ok(());
        }
        if self.peers.len() >= self.config.max_peers() {
            warn!("Peer limit {} reached", self.config.max_peers());
            return Err(Error::NoMemory);
        }
        if let Some(key) = server_key {
            ecc::parse_public_key(key).map_err(|_| Error::BadParameter("server public key"))?;
            self.keystore.pin(peer, key.to_vec());
        }

        debug!("Connect to {}", peer);
        let mut p = Peer::new(peer, Role::Client, &self.config);
        p.hs.client_random = Peer::new_random(now, &mut self.rng);
        let mut env = Env {
            config: &self.config,
            identity: self.identity.as_ref(),
            keystore: &mut self.keystore,
        };
        p.client_start(&mut env)?;
        self.flush(now, &mut p);
        self.peers.insert(peer, p);
        Ok(())
    }

    /// Feed one received datagram. Records that fail to parse are skipped.
    ///
    /// Returns `Err(Error::Alert)` when the datagram made the association
    /// fail; the alert has been sent and the peer is gone.
    pub fn handle_message(&mut self, now: Instant, peer: SocketAddr, mut data: &[u8]) -> Result<(), Error> {
        self.cookie.maybe_rotate(now, &mut self.rng);
        let was_connected = self.is_connected(peer);

        loop {
            let len = is_record(data);
            if len == 0 {
                if !data.is_empty() {
                    debug!("Drop {} trailing bytes from {}", data.len(), peer);
                }
                break;
            }
            let (record, rest) = data.split_at(len);
            data = rest;

            if let Err(e) = self.handle_record(now, peer, record) {
                return Err(self.fail(now, peer, e));
            }
        }

        if let Some(mut p) = self.peers.remove(&peer) {
            self.flush(now, &mut p);
            let connected = p.is_connected();
            self.peers.insert(peer, p);
            if connected && !was_connected {
                self.outputs.push_back(Output::Event {
                    peer,
                    event: Event::Connected,
                });
            }
        }
        Ok(())
    }

    fn handle_record(&mut self, now: Instant, addr: SocketAddr, record: &[u8]) -> Result<(), Error> {
        let Ok((_, (header, fragment))) = RecordHeader::parse(record) else {
            return Ok(());
        };
        trace!("Received {:?} {} from {}", header.content_type, header.sequence, addr);

        let is_hello = header.content_type == ContentType::Handshake
            && header.sequence.epoch == 0
            && fragment.first() == Some(&HandshakeType::ClientHello.as_u8());
        if is_hello && self.accept {
            return self.client_hello(now, addr, &header, fragment);
        }

        let Some(peer) = self.peers.get_mut(&addr) else {
            debug!("Drop {:?} from unknown peer {}", header.content_type, addr);
            return Ok(());
        };
        let Some(plaintext) = peer.open(&header, fragment)? else {
            return Ok(());
        };

        match header.content_type {
            ContentType::Handshake => {
                let mut env = Env {
                    config: &self.config,
                    identity: self.identity.as_ref(),
                    keystore: &mut self.keystore,
                };
                match peer.handle_handshake(&mut env, &plaintext) {
                    Err(Error::ReceiveQueueFull) => Ok(()),
                    r => r,
                }
            }
            ContentType::ChangeCipherSpec => peer.handle_change_cipher_spec(&plaintext),
            ContentType::Alert => {
                let Ok((_, alert)) = Alert::parse(&plaintext) else {
                    return Err(Error::Alert(Alert::fatal(AlertDescription::DecodeError)));
                };
                self.handle_alert(now, addr, alert);
                Ok(())
            }
            ContentType::ApplicationData => {
                if !peer.is_connected() {
                    debug!("Drop application data from {} before handshake", addr);
                    return Ok(());
                }
                // Our final flight got through.
                peer.netq.clear();
                self.outputs.push_back(Output::ApplicationData {
                    peer: addr,
                    data: Buf::from(plaintext),
                });
                Ok(())
            }
            ContentType::Unknown(_) => Ok(()),
        }
    }

    fn handle_alert(&mut self, now: Instant, addr: SocketAddr, alert: Alert) {
        if alert.is_close_notify() {
            debug!("close_notify from {}", addr);
            if let Some(mut p) = self.peers.remove(&addr) {
                let _ = p.send_alert(Alert::close_notify());
                self.flush(now, &mut p);
            }
        } else if alert.is_fatal() {
            warn!("Fatal alert from {}: {}", addr, alert);
            self.peers.remove(&addr);
        } else {
            debug!("Ignore warning alert from {}: {}", addr, alert);
            return;
        }
        self.outputs.push_back(Output::Event {
            peer: addr,
            event: Event::Closed(Some(alert)),
        });
    }

    /// ClientHello as seen by a server: cookie exchange, duplicate
    /// detection, then a new peer.
    fn client_hello(&mut self, now: Instant, addr: SocketAddr, header: &RecordHeader, fragment: &[u8]) -> Result<(), Error> {
        let Ok((_, (hs_header, body))) = parse_fragment(fragment) else {
            return Ok(());
        };
        if hs_header.is_fragment() {
            debug!("Drop fragmented ClientHello from {}", addr);
            return Ok(());
        }
        let Ok((_, hello)) = ClientHello::parse(body) else {
            debug!("Drop malformed ClientHello from {}", addr);
            return Ok(());
        };

        if let Some(existing) = self.peers.get_mut(&addr) {
            if existing.hs.client_random == hello.random {
                if !existing.is_connected() && !existing.netq.is_empty() {
                    existing.resend_flight()?;
                }
                return Ok(());
            }
        }

        if !self.cookie.verify(addr, &hello) {
            let cookie = self.cookie.generate(addr, &hello);
            let message = Body::HelloVerifyRequest(HelloVerifyRequest::new(cookie))
                .to_message(hs_header.message_seq);
            // Stateless: same record sequence number as the ClientHello.
            let record_header = RecordHeader {
                content_type: ContentType::Handshake,
                version: ProtocolVersion::DTLS1_2,
                sequence: header.sequence,
                length: message.len() as u16,
            };
            let mut data = Vec::with_capacity(RecordHeader::LEN + message.len());
            record_header.serialize(&mut data);
            data.extend_from_slice(&message);
            debug!("HelloVerifyRequest to {}", addr);
            self.outputs.push_back(Output::Packet {
                peer: addr,
                data: Buf::from(data),
            });
            return Ok(());
        }

        if self.peers.remove(&addr).is_some() {
            debug!("New handshake replaces association with {}", addr);
            self.outputs.push_back(Output::Event {
                peer: addr,
                event: Event::Closed(None),
            });
        } else if self.peers.len() >= self.config.max_peers() {
            warn!("Peer limit {} reached, drop ClientHello from {}", self.config.max_peers(), addr);
            return Ok(());
        }

        let mut peer = Peer::new(addr, Role::Server, &self.config);
        peer.hs.server_random = Peer::new_random(now, &mut self.rng);
        let raw = &fragment[..super::message::Header::LEN + body.len()];
        let mut env = Env {
            config: &self.config,
            identity: self.identity.as_ref(),
            keystore: &mut self.keystore,
        };
        let result = peer.server_hello(&mut env, hello, raw, hs_header.message_seq);
        // Inserted either way so a failure can send its alert.
        self.peers.insert(addr, peer);
        result
    }

    /// Send application data to a connected peer.
    pub fn write(&mut self, now: Instant, peer: SocketAddr, data: &[u8]) -> Result<(), Error> {
        let max = self.max_application_data();
        if data.len() > max {
            return Err(Error::too_small(data.len(), max));
        }
        let Some(mut p) = self.peers.remove(&peer) else {
            return Err(Error::NotFound);
        };
        let result = p.send_application_data(data);
        self.flush(now, &mut p);
        self.peers.insert(peer, p);
        result
    }

    /// Largest application data record that fits the MTU.
    pub fn max_application_data(&self) -> usize {
        self.config
            .mtu()
            .saturating_sub(RecordHeader::LEN + super::crypto::ccm::OVERHEAD)
    }

    /// Send close_notify and forget the peer.
    pub fn close(&mut self, now: Instant, peer: SocketAddr) -> Result<(), Error> {
        let Some(mut p) = self.peers.remove(&peer) else {
            return Err(Error::NotFound);
        };
        debug!("Close {}", peer);
        let _ = p.send_alert(Alert::close_notify());
        self.flush(now, &mut p);
        self.outputs.push_back(Output::Event {
            peer,
            event: Event::Closed(None),
        });
        Ok(())
    }

    /// Resend every flight whose timer ran out. Peers that used up their
    /// retries are closed. Returns the next deadline, if any.
    pub fn check_retransmit(&mut self, now: Instant) -> Option<Instant> {
        let addrs: Vec<SocketAddr> = self.peers.keys().copied().collect();
        for addr in addrs {
            let Some(mut p) = self.peers.remove(&addr) else {
                continue;
            };
            match p.netq.poll(now) {
                Due::Idle => {}
                Due::Resend => {
                    if let Err(e) = p.resend_flight() {
                        warn!("Resend to {} failed: {}", addr, e);
                    }
                }
                Due::GiveUp => {
                    warn!("Handshake with {} timed out in {:?}", addr, p.state);
                    self.outputs.push_back(Output::Event {
                        peer: addr,
                        event: Event::Closed(None),
                    });
                    continue;
                }
            }
            self.flush(now, &mut p);
            self.peers.insert(addr, p);
        }
        self.peers.values().filter_map(|p| p.netq.deadline()).min()
    }

    pub fn poll_output(&mut self) -> Option<Output> {
        self.outputs.pop_front()
    }

    /// Move a peer's sealed records into datagram outputs and arm its
    /// retransmission timer.
    fn flush(&mut self, now: Instant, peer: &mut Peer) {
        if peer.netq.is_unarmed() {
            peer.netq.poll(now);
        }
        for data in peer.take_datagrams(self.config.mtu()) {
            self.outputs.push_back(Output::Packet {
                peer: peer.addr,
                data: Buf::from(data),
            });
        }
    }

    /// Tear down `addr` after a local error. Fatal errors send their alert.
    fn fail(&mut self, now: Instant, addr: SocketAddr, err: Error) -> Error {
        let alert = match err {
            Error::Alert(alert) => alert,
            Error::Parse(_) => Alert::fatal(AlertDescription::DecodeError),
            _ => Alert::fatal(AlertDescription::InternalError),
        };
        warn!("Association with {} failed: {}", addr, alert);
        if let Some(mut p) = self.peers.remove(&addr) {
            let _ = p.send_alert(alert);
            self.flush(now, &mut p);
        }
        self.outputs.push_back(Output::Event {
            peer: addr,
            event: Event::Closed(Some(alert)),
        });
        Error::Alert(alert)
    }
}

impl fmt::Debug for DtlsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DtlsContext")
            .field("accept", &self.accept)
            .field("peers", &self.peers.len())
            .field("outputs", &self.outputs.len())
            .finish()
    }
}
