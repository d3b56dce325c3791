//! Fixed-capacity circular storage with O(1) running aggregates.
//!
//! `RingBuffer` only stores values and hands back whatever it evicts.
//! `RollingSum` and `WeightedRollingSum` build on it and keep their sums
//! consistent with the retained window by subtracting each evicted entry
//! before adding the new one.
//!
//! Subtraction-based sums accumulate floating-point error over millions of
//! pushes, so both accumulators recompute their sums from the window every
//! `resync_interval` pushes. That costs one O(capacity) pass per interval.

/// Pushes between full recomputations of a running sum.
pub const DEFAULT_RESYNC_INTERVAL: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BufferError {
    #[error("Ring buffer capacity must be > 0")]
    ZeroCapacity,
    #[error("Non-finite value: {0}")]
    NonFinite(f64),
    #[error("Negative weight: {0}")]
    NegativeWeight(f64),
}

/// Circular buffer that overwrites its oldest entry once full.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    slots: Vec<T>,
    capacity: usize,
    /// Next slot to write. Once full this is also the oldest entry.
    cursor: usize,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Result<Self, BufferError> {
        if capacity == 0 {
            return Err(BufferError::ZeroCapacity);
        }
        Ok(Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            cursor: 0,
        })
    }

    /// Insert a value, returning the evicted oldest entry if the buffer was full.
    pub fn push(&mut self, value: T) -> Option<T> {
        let evicted = if self.slots.len() < self.capacity {
            self.slots.push(value);
            None
        } else {
            Some(std::mem::replace(&mut self.slots[self.cursor], value))
        };
        self.cursor = (self.cursor + 1) % self.capacity;
        evicted
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Most recently pushed value.
    pub fn latest(&self) -> Option<&T> {
        if self.slots.is_empty() {
            return None;
        }
        let idx = (self.cursor + self.capacity - 1) % self.capacity;
        self.slots.get(idx)
    }

    /// Iterate from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        // While filling, cursor == len so the first half is empty.
        self.slots[self.cursor..]
            .iter()
            .chain(self.slots[..self.cursor].iter())
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.cursor = 0;
    }
}

/// Rolling window of scalars with O(1) sum, mean and variance.
#[derive(Debug, Clone)]
pub struct RollingSum {
    window: RingBuffer<f64>,
    sum: f64,
    sum_sq: f64,
    resync_interval: u64,
    since_resync: u64,
}

impl RollingSum {
    pub fn new(capacity: usize) -> Result<Self, BufferError> {
        Ok(Self {
            window: RingBuffer::new(capacity)?,
            sum: 0.0,
            sum_sq: 0.0,
            resync_interval: DEFAULT_RESYNC_INTERVAL,
            since_resync: 0,
        })
    }

    /// Override the resync cadence. Zero disables resyncing.
    pub fn with_resync_interval(mut self, interval: u64) -> Self {
        self.resync_interval = interval;
        self
    }

    /// Push a finite value; returns the evicted value when the window was full.
    pub fn push(&mut self, value: f64) -> Result<Option<f64>, BufferError> {
        if !value.is_finite() {
            return Err(BufferError::NonFinite(value));
        }

        let evicted = self.window.push(value);
        if let Some(old) = evicted {
            self.sum -= old;
            self.sum_sq -= old * old;
        }
        self.sum += value;
        self.sum_sq += value * value;

        self.since_resync += 1;
        if self.resync_interval > 0 && self.since_resync >= self.resync_interval {
            self.resync();
        }

        Ok(evicted)
    }

    /// Recompute both sums from the retained window.
    pub fn resync(&mut self) {
        let (sum, sum_sq) = self
            .window
            .iter()
            .fold((0.0, 0.0), |(s, sq), v| (s + v, sq + v * v));
        self.sum = sum;
        self.sum_sq = sum_sq;
        self.since_resync = 0;
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn sum_sq(&self) -> f64 {
        self.sum_sq
    }

    pub fn count(&self) -> usize {
        self.window.len()
    }

    pub fn capacity(&self) -> usize {
        self.window.capacity()
    }

    pub fn is_full(&self) -> bool {
        self.window.is_full()
    }

    pub fn mean(&self) -> Option<f64> {
        match self.window.len() {
            0 => None,
            n => Some(self.sum / n as f64),
        }
    }

    /// Population variance of the window.
    pub fn variance(&self) -> Option<f64> {
        let n = self.window.len();
        if n == 0 {
            return None;
        }
        let mean = self.sum / n as f64;
        // Cancellation can push this a hair below zero.
        Some((self.sum_sq / n as f64 - mean * mean).max(0.0))
    }

    pub fn window(&self) -> &RingBuffer<f64> {
        &self.window
    }

    pub fn clear(&mut self) {
        self.window.clear();
        self.sum = 0.0;
        self.sum_sq = 0.0;
        self.since_resync = 0;
    }
}

/// Rolling window of `(value, weight)` pairs with an O(1) weighted mean.
#[derive(Debug, Clone)]
pub struct WeightedRollingSum {
    window: RingBuffer<(f64, f64)>,
    weighted_sum: f64,
    total_weight: f64,
    /// Entries with a strictly positive weight. Exact, unlike `total_weight`.
    weighted_entries: usize,
    resync_interval: u64,
    since_resync: u64,
}

impl WeightedRollingSum {
    pub fn new(capacity: usize) -> Result<Self, BufferError> {
        Ok(Self {
            window: RingBuffer::new(capacity)?,
            weighted_sum: 0.0,
            total_weight: 0.0,
            weighted_entries: 0,
            resync_interval: DEFAULT_RESYNC_INTERVAL,
            since_resync: 0,
        })
    }

    pub fn with_resync_interval(mut self, interval: u64) -> Self {
        self.resync_interval = interval;
        self
    }

    pub fn push(&mut self, value: f64, weight: f64) -> Result<Option<(f64, f64)>, BufferError> {
        if !value.is_finite() {
            return Err(BufferError::NonFinite(value));
        }
        if !weight.is_finite() {
            return Err(BufferError::NonFinite(weight));
        }
        if weight < 0.0 {
            return Err(BufferError::NegativeWeight(weight));
        }

        let evicted = self.window.push((value, weight));
        if let Some((old_value, old_weight)) = evicted {
            self.weighted_sum -= old_value * old_weight;
            self.total_weight -= old_weight;
            if old_weight > 0.0 {
                self.weighted_entries -= 1;
            }
        }
        self.weighted_sum += value * weight;
        self.total_weight += weight;
        if weight > 0.0 {
            self.weighted_entries += 1;
        }

        self.since_resync += 1;
        if self.resync_interval > 0 && self.since_resync >= self.resync_interval {
            self.resync();
        }

        Ok(evicted)
    }

    pub fn resync(&mut self) {
        let (ws, tw) = self
            .window
            .iter()
            .fold((0.0, 0.0), |(ws, tw), (v, w)| (ws + v * w, tw + w));
        self.weighted_sum = ws;
        self.total_weight = tw;
        self.since_resync = 0;
    }

    pub fn weighted_sum(&self) -> f64 {
        self.weighted_sum
    }

    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    pub fn count(&self) -> usize {
        self.window.len()
    }

    pub fn is_full(&self) -> bool {
        self.window.is_full()
    }

    /// `None` when every retained entry has zero weight.
    pub fn weighted_mean(&self) -> Option<f64> {
        if self.weighted_entries == 0 || self.total_weight <= 0.0 {
            return None;
        }
        Some(self.weighted_sum / self.total_weight)
    }

    pub fn clear(&mut self) {
        self.window.clear();
        self.weighted_sum = 0.0;
        self.total_weight = 0.0;
        self.weighted_entries = 0;
        self.since_resync = 0;
    }
}
