//! Round-robin frame buffer pools.
//!
//! Decoded frames are handed to consumers as `Arc<F>`. A consumer may keep
//! the `Arc` for as long as it likes; when the pool comes back around to a
//! slot whose frame is still held elsewhere, it allocates a fresh frame for
//! that slot instead of overwriting the held one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Panadapter FFT frames kept per stream.
pub const PANADAPTER_POOL_SIZE: usize = 6;

/// DAX IQ frames kept per stream.
pub const IQ_POOL_SIZE: usize = 10;

/// A fixed ring of reusable frames.
#[derive(Debug)]
pub struct FramePool<F> {
    slots: Mutex<PoolSlots<F>>,
    fresh_allocations: AtomicU64,
}

#[derive(Debug)]
struct PoolSlots<F> {
    frames: Vec<Arc<F>>,
    next: usize,
}

impl<F: Default> FramePool<F> {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        FramePool {
            slots: Mutex::new(PoolSlots {
                frames: (0..size).map(|_| Arc::new(F::default())).collect(),
                next: 0,
            }),
            fresh_allocations: AtomicU64::new(0),
        }
    }

    /// Fill the next slot with `fill` and return a shared handle to it.
    pub fn fill(&self, fill: impl FnOnce(&mut F)) -> Arc<F> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let idx = slots.next;
        slots.next = (idx + 1) % slots.frames.len();

        let slot = &mut slots.frames[idx];
        if Arc::get_mut(slot).is_none() {
            // Still held by a consumer: leave that frame alone.
            *slot = Arc::new(F::default());
            self.fresh_allocations.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(frame) = Arc::get_mut(slot) {
            fill(frame);
        }
        Arc::clone(slot)
    }

    /// How many times a held slot forced a new allocation.
    pub fn fresh_allocations(&self) -> u64 {
        self.fresh_allocations.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .frames
            .len()
    }
}
