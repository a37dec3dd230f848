//! Retransmission queue for the last flight sent to one peer.

use std::fmt;
use std::time::{Duration, Instant};

use crate::buffer::{Buf, BufferPool};
use crate::dtls::record::ContentType;
use crate::timer::ExponentialBackoff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Timeout {
    /// Nothing to resend.
    Disabled,
    /// Armed on the next poll.
    Unarmed,
    Armed(Instant),
}

/// A plaintext record kept for resending. Resends get fresh record sequence
/// numbers, so only the fragment and its epoch are stored.
pub(crate) struct Entry {
    pub content_type: ContentType,
    pub epoch: u16,
    pub fragment: Buf,
}

/// What [`Netq::poll`] decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Due {
    Idle,
    Resend,
    GiveUp,
}

pub(crate) struct Netq {
    entries: Vec<Entry>,
    backoff: ExponentialBackoff,
    timeout: Timeout,
    buffers: BufferPool,
}

impl Netq {
    pub fn new(start_rto: Duration, retries: usize) -> Self {
        Netq {
            entries: Vec::new(),
            backoff: ExponentialBackoff::new(start_rto, retries),
            timeout: Timeout::Disabled,
            buffers: BufferPool::default(),
        }
    }

    /// Start a new flight, forgetting the previous one.
    pub fn begin(&mut self) {
        self.clear();
        self.backoff.reset();
        self.timeout = Timeout::Unarmed;
    }

    pub fn push(&mut self, content_type: ContentType, epoch: u16, fragment: &[u8]) {
        let fragment = self.buffers.copy_of(fragment);
        self.entries.push(Entry {
            content_type,
            epoch,
            fragment,
        });
    }

    /// Stop retransmitting. Called when the peer's next flight shows up.
    pub fn clear(&mut self) {
        for entry in self.entries.drain(..) {
            self.buffers.push(entry.fragment);
        }
        self.timeout = Timeout::Disabled;
    }

    /// Stop the timer but keep the entries, so a duplicate from the peer
    /// can still trigger a resend of our final flight.
    pub fn stop_timer(&mut self) {
        self.timeout = Timeout::Disabled;
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check the timer. An unarmed timer is armed from `now`.
    pub fn poll(&mut self, now: Instant) -> Due {
        match self.timeout {
            Timeout::Disabled => Due::Idle,
            Timeout::Unarmed => {
                trace!("Flight timeout in {:.03}s", self.backoff.rto().as_secs_f32());
                self.timeout = Timeout::Armed(now + self.backoff.rto());
                Due::Idle
            }
            Timeout::Armed(at) if now < at => Due::Idle,
            Timeout::Armed(_) => {
                if !self.backoff.can_retry() {
                    self.timeout = Timeout::Disabled;
                    return Due::GiveUp;
                }
                self.backoff.attempt();
                debug!(
                    "Flight resend {}, next in {:.03}s",
                    self.backoff.attempts(),
                    self.backoff.rto().as_secs_f32()
                );
                self.timeout = Timeout::Armed(now + self.backoff.rto());
                Due::Resend
            }
        }
    }

    /// When the timer next fires, if armed.
    pub fn deadline(&self) -> Option<Instant> {
        match self.timeout {
            Timeout::Armed(at) => Some(at),
            _ => None,
        }
    }

    pub fn is_unarmed(&self) -> bool {
        self.timeout == Timeout::Unarmed
    }
}

impl fmt::Debug for Netq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes: usize = self.entries.iter().map(|e| e.fragment.len()).sum();
        f.debug_struct("Netq")
            .field("entries", &self.entries.len())
            .field("bytes", &bytes)
            .field("timeout", &self.timeout)
            .finish()
    }
}
