//! UDP stream handling: sequence tracking, payload decoding, frame pools and
//! the class-code demultiplexer.
//!
//! Every stream-backed model object (panadapter, DAX audio stream, DAX IQ
//! stream) embeds a [`StreamEndpoint`]: its sequencer plus the slot for an
//! application consumer. Decoding always happens, consumer or not, so loss
//! counters and pools stay meaningful.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use flexsync_core::ConcurrentProperty;

pub mod decode;
pub mod demux;
pub mod pool;
pub mod sequencer;

pub use decode::{AudioFrame, FftAssembler, FftFrame, IqFrame};
pub use demux::{DemuxCounters, StreamDemux};
pub use pool::FramePool;
pub use sequencer::StreamSequencer;

/// Callback receiving decoded frames on the UDP receive task.
pub type Consumer<F> = Arc<dyn Fn(&F) + Send + Sync + 'static>;

/// Sequencer plus consumer slot for one stream.
pub struct StreamEndpoint<F> {
    sequencer: StreamSequencer,
    consumer: ConcurrentProperty<Option<Consumer<F>>>,
    frames: AtomicU64,
}

impl<F> Default for StreamEndpoint<F> {
    fn default() -> Self {
        StreamEndpoint {
            sequencer: StreamSequencer::new(),
            consumer: ConcurrentProperty::new("consumer", None),
            frames: AtomicU64::new(0),
        }
    }
}

impl<F> StreamEndpoint<F> {
    pub fn sequencer(&self) -> &StreamSequencer {
        &self.sequencer
    }

    /// Gaps seen on this stream.
    pub fn lost(&self) -> u64 {
        self.sequencer.lost()
    }

    /// Frames decoded on this stream.
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Install the consumer, replacing any previous one.
    pub fn set_consumer(&self, consumer: impl Fn(&F) + Send + Sync + 'static) {
        self.consumer.replace(Some(Arc::new(consumer)));
    }

    pub fn clear_consumer(&self) {
        self.consumer.replace(None);
    }

    pub fn has_consumer(&self) -> bool {
        self.consumer.with(Option::is_some)
    }

    /// Count a decoded frame and hand it to the consumer, if one is set.
    pub(crate) fn deliver(&self, frame: &F) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        // Clone out so the consumer runs without the slot locked.
        let consumer = self.consumer.with(Option::clone);
        if let Some(consumer) = consumer {
            consumer(frame);
        }
    }
}

impl<F> std::fmt::Debug for StreamEndpoint<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamEndpoint")
            .field("expected", &self.sequencer.expected())
            .field("lost", &self.sequencer.lost())
            .field("frames", &self.frames())
            .field("consumer", &self.has_consumer())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn deliver_without_consumer_still_counts() {
        let ep: StreamEndpoint<u32> = StreamEndpoint::default();
        ep.deliver(&1);
        assert_eq!(ep.frames(), 1);
        assert!(!ep.has_consumer());
    }

    #[test]
    fn consumer_can_be_swapped() {
        let ep: StreamEndpoint<u32> = StreamEndpoint::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        ep.set_consumer(move |v| {
            h.fetch_add(*v as usize, Ordering::SeqCst);
        });
        ep.deliver(&5);
        ep.clear_consumer();
        ep.deliver(&5);
        assert_eq!(hits.load(Ordering::SeqCst), 5);
        assert_eq!(ep.frames(), 2);
    }
}
