//! One DTLS association: epochs, record protection, the handshake reorder
//! queue and the retransmission queue. The handshake logic itself lives in
//! `client.rs` and `server.rs`.

use std::collections::BTreeMap;
use std::fmt;
use std::mem;
use std::net::SocketAddr;
use std::time::Instant;

use zeroize::Zeroizing;

use super::crypto::ccm::Cipher;
use super::crypto::ecc::EphemeralKey;
use super::crypto::prf::{key_block, MASTER_SECRET_LEN};
use super::keystore::KeyStore;
use super::message::{parse_fragment, Body, HandshakeType, Header, Random};
use super::netq::Netq;
use super::record::{ContentType, ProtocolVersion, RecordHeader, Sequence};
use super::{Alert, AlertDescription, Identity};
use crate::rng::SeededRng;
use crate::time_tricks::InstantExt;
use crate::window::ReplayWindow;
use crate::{Config, Error};

/// Largest handshake message we reassemble.
const MAX_HANDSHAKE_LEN: u32 = 16384;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    Client,
    Server,
}

/// Handshake progress. The server only uses the `WaitClient*` states plus
/// the shared tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum State {
    ClientHello,
    WaitServerCertificate,
    WaitServerKeyExchange,
    WaitServerHelloDone,
    WaitClientCertificate,
    WaitClientKeyExchange,
    WaitCertificateVerify,
    WaitChangeCipherSpec,
    WaitFinished,
    Connected,
}

/// What the handlers need from the owning context.
pub(crate) struct Env<'a> {
    pub config: &'a Config,
    pub identity: Option<&'a Identity>,
    pub keystore: &'a mut KeyStore,
}

/// Secrets and transcript of the handshake in progress.
#[derive(Default)]
pub(crate) struct Handshake {
    pub client_random: Random,
    pub server_random: Random,
    pub transcript: Vec<u8>,
    pub ephemeral: Option<EphemeralKey>,
    /// Peer's raw public key (SPKI). Empty when the client did not
    /// authenticate.
    pub peer_public_key: Vec<u8>,
    /// Server's ephemeral point, client side only.
    pub peer_point: Vec<u8>,
    /// CertificateRequest sent (server) or received (client).
    pub client_auth: bool,
    pub master_secret: Option<Zeroizing<[u8; MASTER_SECRET_LEN]>>,
}

/// A handshake message being put together from fragments.
struct Reassembly {
    msg_type: HandshakeType,
    data: Vec<u8>,
    /// Sorted, non-overlapping `[start, end)` ranges received so far.
    ranges: Vec<(u32, u32)>,
}

impl Reassembly {
    fn new(msg_type: HandshakeType, length: u32) -> Self {
        Reassembly {
            msg_type,
            data: vec![0; length as usize],
            ranges: Vec::new(),
        }
    }

    fn insert(&mut self, offset: u32, bytes: &[u8]) {
        let start = offset as usize;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);

        let mut range = (offset, offset + bytes.len() as u32);
        let mut merged = Vec::with_capacity(self.ranges.len() + 1);
        for &(s, e) in &self.ranges {
            if e < range.0 || s > range.1 {
                merged.push((s, e));
            } else {
                range = (range.0.min(s), range.1.max(e));
            }
        }
        merged.push(range);
        merged.sort_unstable();
        self.ranges = merged;
    }

    fn is_complete(&self) -> bool {
        let len = self.data.len() as u32;
        len == 0 || self.ranges.first() == Some(&(0, len))
    }
}

pub(crate) struct Peer {
    pub addr: SocketAddr,
    pub role: Role,
    pub state: State,
    pub hs: Handshake,
    read_epoch: u16,
    write_epoch: u16,
    /// Next record sequence number per write epoch. Epoch 0 keeps counting
    /// after the switch since flight resends may go back to it.
    write_seq: [u64; 2],
    replay: [ReplayWindow; 2],
    read_cipher: Option<Cipher>,
    write_cipher: Option<Cipher>,
    pending_read: Option<Cipher>,
    pending_write: Option<Cipher>,
    pub next_send_seq: u16,
    pub next_recv_seq: u16,
    reorder: BTreeMap<u16, Reassembly>,
    max_queue_rx: usize,
    pub netq: Netq,
    /// Sealed records waiting to be packed into datagrams.
    tx: Vec<Vec<u8>>,
}

impl Peer {
    pub fn new(addr: SocketAddr, role: Role, config: &Config) -> Self {
        let state = match role {
            Role::Client => State::ClientHello,
            Role::Server => State::WaitClientKeyExchange,
        };
        Peer {
            addr,
            role,
            state,
            hs: Handshake::default(),
            read_epoch: 0,
            write_epoch: 0,
            write_seq: [0; 2],
            replay: [ReplayWindow::new(), ReplayWindow::new()],
            read_cipher: None,
            write_cipher: None,
            pending_read: None,
            pending_write: None,
            next_send_seq: 0,
            next_recv_seq: 0,
            reorder: BTreeMap::new(),
            max_queue_rx: config.max_queue_rx(),
            netq: Netq::new(config.flight_start_rto(), config.flight_retries()),
            tx: Vec::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == State::Connected
    }

    pub fn new_random(now: Instant, rng: &mut SeededRng) -> Random {
        let mut random_bytes = [0u8; 28];
        rng.fill(&mut random_bytes);
        Random {
            gmt_unix_time: now.to_unix_secs_u32(),
            random_bytes,
        }
    }

    // ---- record layer ----

    /// Protect `fragment` for `epoch` and queue it.
    fn seal(&mut self, content_type: ContentType, epoch: u16, fragment: &[u8]) -> Result<(), Error> {
        let slot = epoch.min(1) as usize;
        let sequence_number = self.write_seq[slot];
        if sequence_number > Sequence::MAX {
            return Err(Error::Alert(Alert::fatal(AlertDescription::InternalError)));
        }
        self.write_seq[slot] += 1;
        let sequence = Sequence {
            epoch,
            sequence_number,
        };

        let body = if epoch == 0 {
            fragment.to_vec()
        } else {
            let Some(cipher) = &self.write_cipher else {
                return Err(Error::Alert(Alert::fatal(AlertDescription::InternalError)));
            };
            cipher.seal(content_type, sequence, fragment)?
        };

        let header = RecordHeader {
            content_type,
            version: ProtocolVersion::DTLS1_2,
            sequence,
            length: body.len() as u16,
        };
        let mut record = Vec::with_capacity(RecordHeader::LEN + body.len());
        header.serialize(&mut record);
        record.extend_from_slice(&body);
        trace!("Send {:?} {} len {}", content_type, sequence, body.len());
        self.tx.push(record);
        Ok(())
    }

    /// Check epoch and replay window, then decrypt. `None` means the record
    /// is silently dropped.
    pub fn open(&mut self, header: &RecordHeader, fragment: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        let epoch = header.sequence.epoch;
        let seq = header.sequence.sequence_number;
        if epoch != self.read_epoch {
            trace!("Drop record for epoch {}, reading {}", epoch, self.read_epoch);
            return Ok(None);
        }
        let slot = epoch.min(1) as usize;
        if !self.replay[slot].is_fresh(seq) {
            debug!("Drop replayed record {}", header.sequence);
            return Ok(None);
        }

        let plaintext = if epoch == 0 {
            fragment.to_vec()
        } else {
            let Some(cipher) = &self.read_cipher else {
                return Ok(None);
            };
            cipher
                .open(header.content_type, header.sequence, fragment)
                .map_err(|_| Error::Alert(Alert::fatal(AlertDescription::BadRecordMac)))?
        };

        self.replay[slot].mark(seq);
        Ok(Some(plaintext))
    }

    /// Pack queued records into datagrams no larger than `mtu`. A record
    /// larger than `mtu` travels alone.
    pub fn take_datagrams(&mut self, mtu: usize) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        let mut current: Vec<u8> = Vec::new();
        for record in self.tx.drain(..) {
            if !current.is_empty() && current.len() + record.len() > mtu {
                out.push(mem::take(&mut current));
            }
            current.extend_from_slice(&record);
        }
        if !current.is_empty() {
            out.push(current);
        }
        out
    }

    /// The server keeps no state across a HelloVerifyRequest, so the
    /// association it creates for the second ClientHello numbers its
    /// epoch 0 records from zero again.
    pub fn reset_epoch0_replay(&mut self) {
        self.replay[0] = ReplayWindow::new();
    }

    // ---- sending ----

    /// Send a handshake message as part of the current flight.
    pub fn send_handshake(&mut self, body: &Body) -> Result<(), Error> {
        let message = body.to_message(self.next_send_seq);
        self.next_send_seq = self.next_send_seq.wrapping_add(1);
        debug!("Send {:?} to {}", body.msg_type(), self.addr);
        self.hs.transcript.extend_from_slice(&message);
        self.netq.push(ContentType::Handshake, self.write_epoch, &message);
        self.seal(ContentType::Handshake, self.write_epoch, &message)
    }

    /// Send ChangeCipherSpec and switch the write side to epoch 1.
    pub fn send_change_cipher_spec(&mut self) -> Result<(), Error> {
        self.netq
            .push(ContentType::ChangeCipherSpec, self.write_epoch, &[1]);
        self.seal(ContentType::ChangeCipherSpec, self.write_epoch, &[1])?;
        self.write_cipher = self.pending_write.take();
        if self.write_cipher.is_none() {
            return Err(Error::Alert(Alert::fatal(AlertDescription::InternalError)));
        }
        self.write_epoch = 1;
        Ok(())
    }

    pub fn send_alert(&mut self, alert: Alert) -> Result<(), Error> {
        let mut fragment = Vec::with_capacity(Alert::LEN);
        alert.serialize(&mut fragment);
        self.seal(ContentType::Alert, self.write_epoch, &fragment)
    }

    pub fn send_application_data(&mut self, data: &[u8]) -> Result<(), Error> {
        if !self.is_connected() {
            return Err(Error::Pending);
        }
        self.seal(ContentType::ApplicationData, self.write_epoch, data)
    }

    /// Resend everything in the retransmission queue with fresh record
    /// sequence numbers.
    pub fn resend_flight(&mut self) -> Result<(), Error> {
        let entries: Vec<(ContentType, u16, Vec<u8>)> = self
            .netq
            .entries()
            .iter()
            .map(|e| (e.content_type, e.epoch, e.fragment.to_vec()))
            .collect();
        debug!("Resend flight of {} records to {}", entries.len(), self.addr);
        for (content_type, epoch, fragment) in entries {
            self.seal(content_type, epoch, &fragment)?;
        }
        Ok(())
    }

    // ---- keys ----

    /// Derive traffic keys from the master secret. They take effect at the
    /// respective ChangeCipherSpec.
    pub fn install_keys(&mut self) -> Result<(), Error> {
        let Some(master) = &self.hs.master_secret else {
            return Err(Error::Alert(Alert::fatal(AlertDescription::InternalError)));
        };
        let kb = key_block(
            &master[..],
            &self.hs.client_random.to_bytes(),
            &self.hs.server_random.to_bytes(),
        )?;
        let client = Cipher::new(&kb.client_write_key, kb.client_write_iv)?;
        let server = Cipher::new(&kb.server_write_key, kb.server_write_iv)?;
        let (write, read) = match self.role {
            Role::Client => (client, server),
            Role::Server => (server, client),
        };
        self.pending_write = Some(write);
        self.pending_read = Some(read);
        Ok(())
    }

    /// Peer's ChangeCipherSpec.
    pub fn handle_change_cipher_spec(&mut self, fragment: &[u8]) -> Result<(), Error> {
        if fragment != [1] {
            return Err(Error::Alert(Alert::fatal(AlertDescription::DecodeError)));
        }
        if self.state != State::WaitChangeCipherSpec {
            debug!("Ignore ChangeCipherSpec from {} in {:?}", self.addr, self.state);
            return Ok(());
        }
        let Some(cipher) = self.pending_read.take() else {
            return Err(Error::Alert(Alert::fatal(AlertDescription::UnexpectedMessage)));
        };
        debug!("Read epoch 1 from {}", self.addr);
        self.read_cipher = Some(cipher);
        self.read_epoch = 1;
        // Our flight stays armed until the peer's Finished verifies.
        self.state = State::WaitFinished;
        Ok(())
    }

    // ---- handshake reassembly ----

    /// Feed one record's worth of handshake fragments and process every
    /// message that became complete in order.
    pub fn handle_handshake(&mut self, env: &mut Env<'_>, mut plaintext: &[u8]) -> Result<(), Error> {
        let mut resend = false;
        while !plaintext.is_empty() {
            let (rest, (header, body)) = parse_fragment(plaintext)
                .map_err(|_| Error::Alert(Alert::fatal(AlertDescription::DecodeError)))?;
            plaintext = rest;
            resend |= self.insert_fragment(header, body)?;
        }
        if resend && !self.netq.is_empty() {
            self.resend_flight()?;
        }

        while let Some((msg_type, message_seq, data)) = self.next_message() {
            let mut raw = Vec::with_capacity(Header::LEN + data.len());
            Header::whole(msg_type, message_seq, data.len()).serialize(&mut raw);
            raw.extend_from_slice(&data);

            let (_, body) = Body::parse(msg_type, &data)
                .map_err(|_| Error::Alert(Alert::fatal(AlertDescription::DecodeError)))?;
            debug!("Received {:?} from {} in {:?}", msg_type, self.addr, self.state);

            // These are checked against the transcript without themselves.
            let deferred = matches!(
                msg_type,
                HandshakeType::HelloVerifyRequest
                    | HandshakeType::CertificateVerify
                    | HandshakeType::Finished
            );
            if !deferred {
                self.hs.transcript.extend_from_slice(&raw);
            }
            self.netq.clear();

            match self.role {
                Role::Client => self.client_handle(env, body, &raw)?,
                Role::Server => self.server_handle(env, body, &raw)?,
            }
        }
        Ok(())
    }

    /// Returns whether the fragment is a duplicate that asks for our last
    /// flight again.
    fn insert_fragment(&mut self, header: Header, body: &[u8]) -> Result<bool, Error> {
        if header.message_seq < self.next_recv_seq {
            let triggers = header.fragment_offset == 0
                && matches!(
                    header.msg_type,
                    HandshakeType::HelloVerifyRequest
                        | HandshakeType::ServerHelloDone
                        | HandshakeType::ClientKeyExchange
                        | HandshakeType::Finished
                );
            trace!("Duplicate {:?} seq {}", header.msg_type, header.message_seq);
            return Ok(triggers);
        }
        if header.length > MAX_HANDSHAKE_LEN {
            warn!("Drop {:?} of {} bytes from {}", header.msg_type, header.length, self.addr);
            return Ok(false);
        }

        if !self.reorder.contains_key(&header.message_seq) {
            if self.reorder.len() >= self.max_queue_rx {
                warn!("Reorder queue full for {} (max {})", self.addr, self.max_queue_rx);
                return Err(Error::ReceiveQueueFull);
            }
            self.reorder.insert(
                header.message_seq,
                Reassembly::new(header.msg_type, header.length),
            );
        }
        let Some(entry) = self.reorder.get_mut(&header.message_seq) else {
            return Ok(false);
        };
        if entry.msg_type != header.msg_type || entry.data.len() != header.length as usize {
            warn!("Fragment mismatch for message seq {}", header.message_seq);
            return Ok(false);
        }
        entry.insert(header.fragment_offset, body);
        Ok(false)
    }

    fn next_message(&mut self) -> Option<(HandshakeType, u16, Vec<u8>)> {
        let seq = self.next_recv_seq;
        if !self.reorder.get(&seq)?.is_complete() {
            return None;
        }
        let entry = self.reorder.remove(&seq)?;
        self.next_recv_seq = seq.wrapping_add(1);
        Some((entry.msg_type, seq, entry.data))
    }
}

/// Fatal alert as an error.
pub(crate) fn fatal(description: AlertDescription) -> Error {
    Error::Alert(Alert::fatal(description))
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("addr", &self.addr)
            .field("role", &self.role)
            .field("state", &self.state)
            .field("read_epoch", &self.read_epoch)
            .field("write_epoch", &self.write_epoch)
            .field("reorder", &self.reorder.len())
            .field("netq", &self.netq)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> Peer {
        Peer::new("10.0.0.1:5684".parse().unwrap(), Role::Client, &Config::default())
    }

    #[test]
    fn reassembly_out_of_order() {
        let mut r = Reassembly::new(HandshakeType::Certificate, 10);
        r.insert(5, &[5, 6, 7, 8, 9]);
        assert!(!r.is_complete());
        r.insert(0, &[0, 1, 2]);
        assert!(!r.is_complete());
        r.insert(2, &[2, 3, 4]);
        assert!(r.is_complete());
        assert_eq!(r.data, (0..10).collect::<Vec<u8>>());
    }

    #[test]
    fn fragments_are_reordered() {
        let mut p = peer();
        let h1 = Header::whole(HandshakeType::ServerHelloDone, 1, 0);
        let h0 = Header::whole(HandshakeType::ServerHelloDone, 0, 0);
        assert!(!p.insert_fragment(h1, &[]).unwrap());
        assert!(p.next_message().is_none());
        p.insert_fragment(h0, &[]).unwrap();
        assert_eq!(p.next_message().map(|m| m.1), Some(0));
        assert_eq!(p.next_message().map(|m| m.1), Some(1));
        assert!(p.next_message().is_none());
    }

    #[test]
    fn duplicates_are_flagged() {
        let mut p = peer();
        p.next_recv_seq = 3;
        let done = Header::whole(HandshakeType::ServerHelloDone, 2, 0);
        assert!(p.insert_fragment(done, &[]).unwrap());
        let cert = Header::whole(HandshakeType::Certificate, 1, 0);
        assert!(!p.insert_fragment(cert, &[]).unwrap());
        assert!(p.reorder.is_empty());
    }

    #[test]
    fn reorder_queue_is_bounded() {
        let config = Config::builder().max_queue_rx(2).build().unwrap();
        let mut p = Peer::new("10.0.0.1:5684".parse().unwrap(), Role::Client, &config);
        for seq in 1..3 {
            p.insert_fragment(Header::whole(HandshakeType::ServerHelloDone, seq, 0), &[])
                .unwrap();
        }
        let err = p
            .insert_fragment(Header::whole(HandshakeType::ServerHelloDone, 3, 0), &[])
            .unwrap_err();
        assert!(matches!(err, Error::ReceiveQueueFull));
    }

    #[test]
    fn plaintext_records_and_replay() {
        let mut p = peer();
        p.send_alert(Alert::close_notify()).unwrap();
        let datagrams = p.take_datagrams(1150);
        assert_eq!(datagrams.len(), 1);

        let (_, (header, fragment)) = RecordHeader::parse(&datagrams[0]).unwrap();
        assert_eq!(header.sequence.sequence_number, 0);
        assert_eq!(p.open(&header, fragment).unwrap().as_deref(), Some(&[1u8, 0][..]));
        // Same sequence number again.
        assert_eq!(p.open(&header, fragment).unwrap(), None);

        p.reset_epoch0_replay();
        assert!(p.open(&header, fragment).unwrap().is_some());
    }

    #[test]
    fn datagrams_respect_mtu() {
        let mut p = peer();
        for _ in 0..3 {
            p.send_alert(Alert::close_notify()).unwrap();
        }
        // Each alert record is 15 bytes.
        let datagrams = p.take_datagrams(30);
        assert_eq!(datagrams.len(), 2);
        assert_eq!(datagrams[0].len(), 30);
        assert_eq!(datagrams[1].len(), 15);
    }
}
