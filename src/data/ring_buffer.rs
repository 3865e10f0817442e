//! Fixed-capacity circular buffer of recent readings.
//!
//! `ReadingBuffer` keeps the last `capacity` values pushed into it. Once full, every
//! push evicts the oldest element (drop-oldest). Iteration is always oldest -> newest,
//! which is also the order used in the JSON snapshot.
//!
//! The storage is a heap-allocated `ringbuf::HeapRb`; this type only adds the
//! overwrite policy and the bulk operations the daemon needs.
//!
//! # Thread Safety
//!
//! `ReadingBuffer` is a plain value type. Sharing between the acquisition task and
//! request handlers goes through [`crate::data::store::SharedStore`].

use crate::error::{AppResult, SensorError};
use ringbuf::{HeapRb, Rb};

/// Drop-oldest circular buffer.
pub struct ReadingBuffer<T> {
    inner: HeapRb<T>,
    capacity: usize,
}

impl<T: std::fmt::Debug> std::fmt::Debug for ReadingBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadingBuffer")
            .field("capacity", &self.capacity)
            .field("len", &self.inner.len())
            .finish()
    }
}

impl<T: Copy> ReadingBuffer<T> {
    /// Create an empty buffer holding at most `capacity` readings.
    ///
    /// # Errors
    /// Returns `SensorError::Configuration` if `capacity` is zero.
    pub fn new(capacity: usize) -> AppResult<Self> {
        if capacity == 0 {
            return Err(SensorError::Configuration(
                "Reading buffer capacity must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            inner: HeapRb::new(capacity),
            capacity,
        })
    }

    /// Append a reading, evicting and returning the oldest one if the buffer was full.
    pub fn push(&mut self, value: T) -> Option<T> {
        self.inner.push_overwrite(value)
    }

    /// Overwrite every stored reading with `value`. The length does not change.
    pub fn fill(&mut self, value: T) {
        for slot in self.inner.iter_mut() {
            *slot = value;
        }
    }

    /// Most recent reading.
    pub fn latest(&self) -> Option<T> {
        self.inner.iter().last().copied()
    }

    /// Readings from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.inner.iter()
    }

    /// Copy of the readings from oldest to newest.
    pub fn to_vec(&self) -> Vec<T> {
        self.inner.iter().copied().collect()
    }

    /// Number of stored readings.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// True if nothing has been pushed yet (or after `clear`).
    pub fn is_empty(&self) -> bool {
        self.inner.len() == 0
    }

    /// True once `len() == capacity()`.
    pub fn is_full(&self) -> bool {
        self.inner.len() == self.capacity
    }

    /// Maximum number of readings kept.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop all readings.
    pub fn clear(&mut self) {
        self.inner.clear();
    }
}
