//! Per-stream 4-bit sequence tracking.
//!
//! VITA-49 packets carry a rolling mod-16 packet counter. The first frame
//! of a stream seeds the expectation; afterwards any frame whose counter is
//! not the expected one counts as one loss event and re-synchronises on the
//! observed value. Lost data is never requested again.

use std::sync::atomic::{AtomicU8, Ordering};

use flexsync_core::ConcurrentProperty;

const UNSEEDED: u8 = 0xFF;

/// Sequence state for one stream.
///
/// Only the UDP receive task calls [`check`](Self::check); other contexts
/// may read the counters at any time.
#[derive(Debug)]
pub struct StreamSequencer {
    expected: AtomicU8,
    lost: ConcurrentProperty<u64>,
}

impl Default for StreamSequencer {
    fn default() -> Self {
        StreamSequencer {
            expected: AtomicU8::new(UNSEEDED),
            lost: ConcurrentProperty::new("lost_frames", 0),
        }
    }
}

impl StreamSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for a frame carrying `observed`. Returns `false` when a gap
    /// was detected.
    pub fn check(&self, observed: u8) -> bool {
        let observed = observed & 0x0F;
        let expected = self.expected.load(Ordering::Acquire);
        let in_order = expected == UNSEEDED || expected == observed;
        if !in_order {
            self.lost.update(|n| *n += 1);
            tracing::debug!(expected, observed, "stream sequence gap");
        }
        self.expected
            .store((observed + 1) & 0x0F, Ordering::Release);
        in_order
    }

    /// The counter value the next frame should carry, once seeded.
    pub fn expected(&self) -> Option<u8> {
        match self.expected.load(Ordering::Acquire) {
            UNSEEDED => None,
            n => Some(n),
        }
    }

    /// Number of gaps seen so far.
    pub fn lost(&self) -> u64 {
        self.lost.read()
    }

    /// Observable loss counter.
    pub fn lost_property(&self) -> &ConcurrentProperty<u64> {
        &self.lost
    }

    /// Forget the expectation; the next frame seeds again.
    pub fn reset(&self) {
        self.expected.store(UNSEEDED, Ordering::Release);
    }
}
