//! Rolling history of mono input samples
//!
//! The input callback appends whole blocks and the control thread copies out
//! the most recent samples. Both sides go through the same mutex (see
//! [`SharedHistory`]); every operation done under the lock is bounded by the
//! size of the block being pushed, the number of samples being copied, or the
//! retained length when the window grows.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Retained length used until the caller declares one.
pub const DEFAULT_RETAINED_SAMPLES: usize = 256;

/// Extra room reserved on top of the retained length, so that pushing a typical
/// block before trimming does not reallocate.
const BLOCK_HEADROOM: usize = 1024;

fn storage_capacity(retained_length: usize) -> usize {
    retained_length.saturating_add(BLOCK_HEADROOM)
}

/// Most-recent-last window of mono samples
#[derive(Debug, Clone)]
pub struct SampleHistory {
    samples: VecDeque<f32>,
    retained_length: usize,
}

impl SampleHistory {
    pub fn new(retained_length: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(storage_capacity(retained_length)),
            retained_length,
        }
    }

    pub fn retained_length(&self) -> usize {
        self.retained_length
    }

    /// Changes the window size. Shrinking drops the oldest samples right away.
    pub fn set_retained_length(&mut self, retained_length: usize) {
        self.retained_length = retained_length;
        self.trim();
        let wanted = storage_capacity(retained_length);
        if self.samples.capacity() < wanted {
            self.samples.reserve(wanted - self.samples.len());
        }
    }

    /// Moves the samples into `storage` and returns the previous storage.
    fn move_into(&mut self, mut storage: VecDeque<f32>) -> VecDeque<f32> {
        storage.clear();
        storage.extend(self.samples.iter().copied());
        std::mem::replace(&mut self.samples, storage)
    }

    /// Appends a block of mono frames, then drops whatever no longer fits.
    pub fn push_block(&mut self, block: &[f32]) {
        // Only the tail of an oversized block can survive the trim.
        let skip = block.len().saturating_sub(self.retained_length);
        self.samples.extend(&block[skip..]);
        self.trim();
    }

    fn trim(&mut self) {
        let excess = self.samples.len().saturating_sub(self.retained_length);
        if excess > 0 {
            self.samples.drain(..excess);
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Replaces the content of `out` with the `count` most recent samples,
    /// oldest first. Copies fewer if fewer are available.
    pub fn copy_latest(&self, count: usize, out: &mut Vec<f32>) {
        out.clear();
        let count = count.min(self.samples.len());
        out.extend(self.samples.range(self.samples.len() - count..));
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

impl Default for SampleHistory {
    fn default() -> Self {
        Self::new(DEFAULT_RETAINED_SAMPLES)
    }
}

/// [`SampleHistory`] shared between the input callback and the control thread
#[derive(Debug, Clone, Default)]
pub struct SharedHistory {
    inner: Arc<Mutex<SampleHistory>>,
}

impl SharedHistory {
    pub fn new(retained_length: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SampleHistory::new(retained_length))),
        }
    }

    /// A panic while the lock was held can only have interrupted a push or a
    /// trim, which leaves the deque valid, so a poisoned lock is reused.
    pub fn lock(&self) -> MutexGuard<'_, SampleHistory> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Same as [`SampleHistory::set_retained_length`], but a larger storage is
    /// allocated before taking the lock. Under the lock only the retained
    /// samples are copied over, and the old storage is freed after unlocking.
    pub fn set_retained_length(&self, retained_length: usize) {
        let wanted = storage_capacity(retained_length);
        let storage = (self.lock().samples.capacity() < wanted)
            .then(|| VecDeque::with_capacity(wanted));

        let previous = {
            let mut history = self.lock();
            history.retained_length = retained_length;
            history.trim();
            match storage {
                Some(storage) if history.samples.capacity() < wanted => {
                    Some(history.move_into(storage))
                }
                _ => None,
            }
        };
        drop(previous);
    }
}
