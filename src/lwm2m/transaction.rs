use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tinyvec::ArrayVec;

use super::Transport;
use crate::coap::{
    Code, MessageType, Packet, ACK_RANDOM_FACTOR_PERCENT, EXCHANGE_LIFETIME_SECS, MAX_RETRANSMIT,
    MAX_TOKEN_LEN, RESPONSE_TIMEOUT_SECS,
};
use crate::rng::SeededRng;
use crate::timer::ExponentialBackoff;
use crate::Error;

/// What a confirmable request was for. DM variants carry the short server id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransactionKind {
    Register(u16),
    Update(u16),
    Deregister(u16),
    BootstrapRequest,
}

/// How a transaction ended.
#[derive(Debug)]
pub(crate) enum Outcome {
    Response(Packet),
    Reset,
    Timeout,
}

/// One confirmable request waiting for its response.
pub(crate) struct Transaction {
    pub mid: u16,
    pub token: ArrayVec<[u8; MAX_TOKEN_LEN]>,
    pub session: SocketAddr,
    pub kind: TransactionKind,
    bytes: Vec<u8>,
    backoff: ExponentialBackoff,
    next_fire: Instant,
    /// Empty ACK seen, a separate response follows.
    acked: bool,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("mid", &self.mid)
            .field("session", &self.session)
            .field("kind", &self.kind)
            .field("len", &self.bytes.len())
            .field("attempts", &self.backoff.attempts())
            .field("acked", &self.acked)
            .finish()
    }
}

/// Confirmable requests in flight, in the order they were sent.
#[derive(Debug, Default)]
pub(crate) struct Transactions {
    list: Vec<Transaction>,
}

impl Transactions {
    /// Send `packet` as a new transaction. Message id and a fresh token are
    /// filled in here.
    pub fn start(
        &mut self,
        now: Instant,
        transport: &mut dyn Transport,
        session: SocketAddr,
        kind: TransactionKind,
        mut packet: Packet,
        mid: u16,
        rng: &mut SeededRng,
    ) -> Result<(), Error> {
        let mut token = [0u8; 4];
        rng.fill(&mut token);
        packet.set_kind(MessageType::Confirmable);
        packet.set_mid(mid);
        packet.set_token(&token)?;
        let bytes = packet.to_vec()?;

        trace!("Start transaction {:?} mid {} to {}", kind, mid, session);
        transport.send(now, session, &bytes)?;

        let backoff = ExponentialBackoff::randomized(
            Duration::from_secs(RESPONSE_TIMEOUT_SECS),
            MAX_RETRANSMIT,
            ACK_RANDOM_FACTOR_PERCENT,
            rng,
        );
        let next_fire = now + backoff.rto();
        let mut tok = ArrayVec::new();
        tok.extend_from_slice(&token);

        self.list.push(Transaction {
            mid,
            token: tok,
            session,
            kind,
            bytes,
            backoff,
            next_fire,
            acked: false,
        });
        Ok(())
    }

    /// Match an incoming message against the transactions in flight.
    ///
    /// Returns the finished transaction with its outcome. An empty ACK only
    /// stops retransmission and returns `None`.
    pub fn handle(&mut self, now: Instant, session: SocketAddr, packet: &Packet) -> Option<(Transaction, Outcome)> {
        let by_mid = |t: &Transaction| t.session == session && t.mid == packet.mid() && !t.acked;

        let idx = match (packet.kind(), packet.code()) {
            (MessageType::Reset, _) => {
                let idx = self.list.iter().position(by_mid)?;
                return Some((self.list.remove(idx), Outcome::Reset));
            }
            (MessageType::Acknowledgement, Code::Empty) => {
                let t = self.list.iter_mut().find(|t| by_mid(&**t))?;
                debug!("Empty ACK for mid {}, awaiting separate response", t.mid);
                t.acked = true;
                t.next_fire = now + Duration::from_secs(EXCHANGE_LIFETIME_SECS);
                return None;
            }
            (MessageType::Acknowledgement, Code::Response(_)) => {
                self.list.iter().position(by_mid)?
            }
            (_, Code::Response(_)) => self
                .list
                .iter()
                .position(|t| t.session == session && &t.token[..] == packet.token())?,
            _ => return None,
        };

        let t = self.list.remove(idx);
        Some((t, Outcome::Response(packet.clone())))
    }

    /// Retransmit due requests. Returns the transactions that ran out of
    /// retries.
    pub fn step(
        &mut self,
        now: Instant,
        transport: &mut dyn Transport,
        timeout: &mut Duration,
    ) -> Vec<(Transaction, Outcome)> {
        let mut expired = Vec::new();
        let mut i = 0;
        while i < self.list.len() {
            let t = &mut self.list[i];
            if t.next_fire <= now {
                if t.acked || !t.backoff.can_retry() {
                    debug!("Transaction {:?} mid {} timed out", t.kind, t.mid);
                    let t = self.list.remove(i);
                    expired.push((t, Outcome::Timeout));
                    continue;
                }
                t.backoff.attempt();
                t.next_fire = now + t.backoff.rto();
                trace!("Retransmit mid {} attempt {}", t.mid, t.backoff.attempts());
                if let Err(e) = transport.send(now, t.session, &t.bytes) {
                    debug!("Retransmit of mid {} failed: {}", t.mid, e);
                }
            }
            let wait = t.next_fire.saturating_duration_since(now);
            if wait < *timeout {
                *timeout = wait;
            }
            i += 1;
        }
        expired
    }

    /// Forget every transaction on `session` without completing them.
    pub fn remove_session(&mut self, session: SocketAddr) {
        self.list.retain(|t| t.session != session);
    }

    pub fn clear(&mut self) {
        self.list.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coap::ResponseCode;
    use crate::lwm2m::ServerSecurity;

    #[derive(Default)]
    struct Recorder {
        sent: Vec<Vec<u8>>,
    }

    impl Transport for Recorder {
        fn connect(&mut self, _: Instant, _: &ServerSecurity) -> Result<SocketAddr, Error> {
            Err(Error::NotSupported)
        }

        fn send(&mut self, _: Instant, _: SocketAddr, data: &[u8]) -> Result<(), Error> {
            self.sent.push(data.to_vec());
            Ok(())
        }

        fn disconnect(&mut self, _: SocketAddr) {}
    }

    fn addr() -> SocketAddr {
        "127.0.0.1:5683".parse().unwrap()
    }

    fn started(now: Instant, t: &mut Recorder) -> Transactions {
        let mut list = Transactions::default();
        let mut rng = SeededRng::new(Some(1));
        let req = Packet::new(MessageType::Confirmable, Code::Post, 0);
        list.start(now, t, addr(), TransactionKind::Register(1), req, 77, &mut rng)
            .unwrap();
        list
    }

    #[test]
    fn piggybacked_response_completes() {
        let now = Instant::now();
        let mut t = Recorder::default();
        let mut list = started(now, &mut t);
        assert_eq!(t.sent.len(), 1);

        let ack = Packet::new(MessageType::Acknowledgement, ResponseCode::Created, 77);
        let (done, outcome) = list.handle(now, addr(), &ack).unwrap();
        assert_eq!(done.kind, TransactionKind::Register(1));
        assert!(matches!(outcome, Outcome::Response(_)));
        assert!(list.is_empty());
    }

    #[test]
    fn separate_response_matched_by_token() {
        let now = Instant::now();
        let mut t = Recorder::default();
        let mut list = started(now, &mut t);
        let token = list.list[0].token.clone();

        let empty = Packet::new(MessageType::Acknowledgement, Code::Empty, 77);
        assert!(list.handle(now, addr(), &empty).is_none());
        assert_eq!(list.len(), 1);

        let mut resp = Packet::new(MessageType::Confirmable, ResponseCode::Created, 900);
        resp.set_token(&token).unwrap();
        assert!(list.handle(now, addr(), &resp).is_some());
    }

    #[test]
    fn reset_ends_transaction() {
        let now = Instant::now();
        let mut t = Recorder::default();
        let mut list = started(now, &mut t);
        let rst = Packet::new(MessageType::Reset, Code::Empty, 77);
        let (_, outcome) = list.handle(now, addr(), &rst).unwrap();
        assert!(matches!(outcome, Outcome::Reset));
    }

    #[test]
    fn retransmits_then_times_out() {
        let start = Instant::now();
        let mut t = Recorder::default();
        let mut list = started(start, &mut t);

        let mut now = start;
        let mut expired = Vec::new();
        for _ in 0..100 {
            now += Duration::from_secs(5);
            let mut timeout = Duration::from_secs(3600);
            expired = list.step(now, &mut t, &mut timeout);
            if !expired.is_empty() {
                break;
            }
        }
        assert_eq!(expired.len(), 1);
        assert!(matches!(expired[0].1, Outcome::Timeout));
        // First send plus MAX_RETRANSMIT retransmissions.
        assert_eq!(t.sent.len(), 1 + MAX_RETRANSMIT);
    }
}
