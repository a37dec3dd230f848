/// Anti-replay window for the records of one epoch (RFC 6347 4.1.2.6).
///
/// Checking and marking are separate steps: a record is only marked as seen
/// after it decrypted and authenticated, so a forged record cannot burn a
/// sequence number.
#[derive(Debug, Default, Clone)]
pub struct ReplayWindow {
    /// Highest sequence number marked so far, or `None` before the first.
    max_seq: Option<u64>,
    /// Bit `n` set means `max_seq - n` was seen.
    bitmap: u64,
}

impl ReplayWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `seq` has neither been seen nor fallen out of the window.
    pub fn is_fresh(&self, seq: u64) -> bool {
        let Some(max) = self.max_seq else {
            return true;
        };
        if seq > max {
            return true;
        }
        let offset = max - seq;
        offset < 64 && self.bitmap & (1 << offset) == 0
    }

    /// Record `seq` as received.
    pub fn mark(&mut self, seq: u64) {
        match self.max_seq {
            None => {
                self.max_seq = Some(seq);
                self.bitmap = 1;
            }
            Some(max) if seq > max => {
                let shift = seq - max;
                self.bitmap = if shift >= 64 { 0 } else { self.bitmap << shift };
                self.bitmap |= 1;
                self.max_seq = Some(seq);
            }
            Some(max) => {
                let offset = max - seq;
                if offset < 64 {
                    self.bitmap |= 1 << offset;
                }
            }
        }
    }
}
