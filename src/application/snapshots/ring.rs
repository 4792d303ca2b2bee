use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::domain::errors::BuildError;

/// Fixed-capacity FIFO over a preallocated backing array.
///
/// A single reader-writer lock guards the slots; the index fields are
/// atomics so size probes (`len`, `is_full`) never take the lock. Once at
/// capacity, an `add` overwrites the oldest slot and advances `start` —
/// the backing array never grows.
#[derive(Debug)]
pub struct RingBuffer<T> {
    slots: RwLock<Vec<Option<T>>>,
    start: AtomicUsize,
    count: AtomicUsize,
    size: usize,
}

impl<T: Clone> RingBuffer<T> {
    pub fn new(size: usize) -> Result<Self, BuildError> {
        if size == 0 {
            return Err(BuildError::ZeroCapacity);
        }
        Ok(Self {
            slots: RwLock::new((0..size).map(|_| None).collect()),
            start: AtomicUsize::new(0),
            count: AtomicUsize::new(0),
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn len(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.size
    }

    pub fn add(&self, item: T) {
        let mut slots = self.slots.write().expect("ring lock poisoned");
        let start = self.start.load(Ordering::SeqCst);
        let count = self.count.load(Ordering::SeqCst);

        let write_at = (start + count) % self.size;
        slots[write_at] = Some(item);

        if count == self.size {
            self.start.store((start + 1) % self.size, Ordering::SeqCst);
        } else {
            self.count.store(count + 1, Ordering::SeqCst);
        }
    }

    /// Returns a copy of the newest entry.
    pub fn last(&self) -> Option<T> {
        let slots = self.slots.read().expect("ring lock poisoned");
        let count = self.count.load(Ordering::SeqCst);
        if count == 0 {
            return None;
        }
        let start = self.start.load(Ordering::SeqCst);
        slots[(start + count - 1) % self.size].clone()
    }

    /// Returns up to `n` newest entries, oldest to newest. `n` is clamped
    /// to the current length.
    pub fn last_n(&self, n: usize) -> Vec<T> {
        let slots = self.slots.read().expect("ring lock poisoned");
        let count = self.count.load(Ordering::SeqCst);
        let start = self.start.load(Ordering::SeqCst);
        let take = n.min(count);

        (count - take..count)
            .filter_map(|i| slots[(start + i) % self.size].clone())
            .collect()
    }

    /// Copies every entry in chronological order.
    pub fn to_vec(&self) -> Vec<T> {
        self.last_n(self.size)
    }

    /// Copies entries satisfying `pred`, in chronological order.
    pub fn filter(&self, pred: impl Fn(&T) -> bool) -> Vec<T> {
        let slots = self.slots.read().expect("ring lock poisoned");
        let count = self.count.load(Ordering::SeqCst);
        let start = self.start.load(Ordering::SeqCst);

        (0..count)
            .filter_map(|i| slots[(start + i) % self.size].as_ref())
            .filter(|item| pred(item))
            .cloned()
            .collect()
    }

    /// Visits every entry in chronological order under the read lock.
    pub fn for_each(&self, mut f: impl FnMut(&T)) {
        let slots = self.slots.read().expect("ring lock poisoned");
        let count = self.count.load(Ordering::SeqCst);
        let start = self.start.load(Ordering::SeqCst);

        for i in 0..count {
            if let Some(item) = slots[(start + i) % self.size].as_ref() {
                f(item);
            }
        }
    }
}
