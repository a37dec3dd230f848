use std::time::SystemTime;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

// The whole crate is driven by `Instant`s handed in by the caller. Wall clock
// values (the DTLS Random's gmt_unix_time, the Device object's current time)
// are derived from a single Instant/SystemTime pair frozen at first use.
static ANCHOR: Lazy<(Instant, SystemTime)> = Lazy::new(|| (Instant::now(), SystemTime::now()));

pub trait InstantExt {
    /// Duration since the unix epoch that corresponds to this Instant.
    fn to_unix_duration(&self) -> Duration;

    /// Whole seconds since the unix epoch, saturating at `u32::MAX`.
    fn to_unix_secs_u32(&self) -> u32 {
        u32::try_from(self.to_unix_duration().as_secs()).unwrap_or(u32::MAX)
    }
}

impl InstantExt for Instant {
    fn to_unix_duration(&self) -> Duration {
        let (anchor, anchor_sys) = *ANCHOR;

        let system_time = if *self >= anchor {
            anchor_sys + (*self - anchor)
        } else {
            anchor_sys
                .checked_sub(anchor - *self)
                .unwrap_or(SystemTime::UNIX_EPOCH)
        };

        system_time
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
    }
}
