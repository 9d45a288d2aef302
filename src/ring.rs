use parking_lot::Mutex;

use crate::error::ConfigError;

/// Largest ring accepted, in samples (about 2 GiB of storage). An hour at
/// 10 kHz is well inside it.
pub const MAX_CAPACITY: usize = 1 << 27;

/// One reading of the signal, stamped with seconds since the stream epoch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sample {
    pub value: f32,
    pub timestamp: f64,
}

impl Sample {
    pub fn new(value: f32, timestamp: f64) -> Self {
        Self { value, timestamp }
    }
}

/// Fixed-capacity, time-ordered ring of samples shared between one writer
/// and any number of snapshot readers.
///
/// Once full, every append evicts exactly the oldest sample. The writer must
/// hand in non-decreasing timestamps; the ring never re-sorts.
pub struct RingBuffer {
    slots: Mutex<Slots>,
    capacity: usize,
}

struct Slots {
    samples: Vec<Sample>,
    // Index the next append writes to.
    head: usize,
    len: usize,
    appended: u64,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::Capacity);
        }
        if capacity > MAX_CAPACITY {
            return Err(ConfigError::CapacityTooLarge {
                capacity,
                max: MAX_CAPACITY,
            });
        }
        let mut samples = Vec::new();
        samples
            .try_reserve_exact(capacity)
            .map_err(|_| ConfigError::CapacityTooLarge {
                capacity,
                max: MAX_CAPACITY,
            })?;
        samples.resize(capacity, Sample::new(0.0, 0.0));
        Ok(Self {
            slots: Mutex::new(Slots {
                samples,
                head: 0,
                len: 0,
                appended: 0,
            }),
            capacity,
        })
    }

    /// Ring sized to hold `window_seconds` of signal at `sample_rate_hz`.
    pub fn with_window(window_seconds: u32, sample_rate_hz: u32) -> Result<Self, ConfigError> {
        Self::new(window_capacity(window_seconds, sample_rate_hz)?)
    }

    pub fn append(&self, value: f32, timestamp: f64) {
        let sample = Sample::new(value, timestamp);
        let mut slots = self.slots.lock();
        let head = slots.head;
        slots.samples[head] = sample;
        slots.head = (head + 1) % self.capacity;
        if slots.len < self.capacity {
            slots.len += 1;
        }
        slots.appended += 1;
    }

    /// Consistent copy of the current contents, oldest first.
    pub fn snapshot(&self) -> Snapshot {
        // Allocate before locking so the critical section is only the copy.
        let mut timestamps = Vec::with_capacity(self.capacity);
        let mut values = Vec::with_capacity(self.capacity);

        let slots = self.slots.lock();
        let start = (slots.head + self.capacity - slots.len) % self.capacity;
        let first_run = slots.len.min(self.capacity - start);
        let (older, newer) = (
            &slots.samples[start..start + first_run],
            &slots.samples[..slots.len - first_run],
        );
        for sample in older.iter().chain(newer) {
            timestamps.push(sample.timestamp);
            values.push(sample.value);
        }
        let generation = slots.appended;
        drop(slots);

        Snapshot {
            timestamps,
            values,
            generation,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of appends since creation, including evicted samples.
    pub fn total_appended(&self) -> u64 {
        self.slots.lock().appended
    }

    pub fn latest(&self) -> Option<Sample> {
        let slots = self.slots.lock();
        if slots.len == 0 {
            return None;
        }
        let idx = (slots.head + self.capacity - 1) % self.capacity;
        Some(slots.samples[idx])
    }
}

pub fn window_capacity(window_seconds: u32, sample_rate_hz: u32) -> Result<usize, ConfigError> {
    let capacity = (window_seconds as u64)
        .checked_mul(sample_rate_hz as u64)
        .and_then(|n| usize::try_from(n).ok())
        .filter(|&n| n <= MAX_CAPACITY)
        .ok_or(ConfigError::CapacityOverflow {
            window_seconds,
            sample_rate_hz,
        })?;
    if capacity == 0 {
        return Err(ConfigError::Capacity);
    }
    Ok(capacity)
}

/// Point-in-time copy of a [`RingBuffer`]. Both sequences are index-aligned.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    pub timestamps: Vec<f64>,
    pub values: Vec<f32>,
    /// Value of [`RingBuffer::total_appended`] when the copy was taken.
    pub generation: u64,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn span_seconds(&self) -> f64 {
        match (self.timestamps.first(), self.timestamps.last()) {
            (Some(first), Some(last)) if self.timestamps.len() >= 2 => last - first,
            _ => 0.0,
        }
    }

    /// Timestamps shifted so the newest sample sits at zero.
    pub fn relative_to_latest(&self) -> Vec<f64> {
        let Some(&latest) = self.timestamps.last() else {
            return Vec::new();
        };
        self.timestamps.iter().map(|t| t - latest).collect()
    }

    pub fn value_range(&self) -> Option<(f32, f32)> {
        self.values
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(None, |range, v| match range {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(capacity: usize, count: usize) -> RingBuffer {
        let ring = RingBuffer::new(capacity).unwrap();
        for i in 0..count {
            ring.append(i as f32, i as f64 * 0.001);
        }
        ring
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert_eq!(RingBuffer::new(0).err(), Some(ConfigError::Capacity));
        assert_eq!(
            RingBuffer::with_window(0, 1000).err(),
            Some(ConfigError::Capacity)
        );
    }

    #[test]
    fn window_sizes_capacity() {
        let ring = RingBuffer::with_window(5, 1000).unwrap();
        assert_eq!(ring.capacity(), 5000);
        assert!(ring.is_empty());
    }

    #[test]
    fn empty_snapshot() {
        let ring = RingBuffer::new(8).unwrap();
        let snap = ring.snapshot();
        assert!(snap.timestamps.is_empty());
        assert!(snap.values.is_empty());
        assert_eq!(ring.len(), 0);
        assert_eq!(snap.span_seconds(), 0.0);
        assert_eq!(snap.value_range(), None);
        assert!(snap.relative_to_latest().is_empty());
        assert_eq!(ring.latest(), None);
    }

    #[test]
    fn partial_fill_keeps_append_order() {
        let ring = filled(10, 4);
        let snap = ring.snapshot();
        assert_eq!(snap.values, vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(snap.timestamps, vec![0.0, 0.001, 0.002, 0.003]);
        assert_eq!(ring.len(), 4);
        assert_eq!(snap.generation, 4);
    }

    #[test]
    fn overflow_evicts_oldest() {
        let ring = RingBuffer::new(5).unwrap();
        for (t, v) in [(0.0, 1.0), (1.0, 2.0), (2.0, 3.0), (3.0, 4.0), (4.0, 5.0), (5.0, 6.0)] {
            ring.append(v, t);
        }
        let snap = ring.snapshot();
        assert_eq!(snap.values, vec![2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(snap.timestamps, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(ring.len(), 5);
        assert_eq!(ring.total_appended(), 6);
        assert_eq!(ring.latest(), Some(Sample::new(6.0, 5.0)));
    }

    #[test]
    fn len_is_min_of_appends_and_capacity() {
        for count in 0..40 {
            let ring = filled(7, count);
            assert_eq!(ring.len(), count.min(7));
            let snap = ring.snapshot();
            assert_eq!(snap.len(), count.min(7));
            let first = count.saturating_sub(7);
            let expected: Vec<f32> = (first..count).map(|i| i as f32).collect();
            assert_eq!(snap.values, expected);
            assert!(snap.timestamps.windows(2).all(|w| w[0] <= w[1]));
        }
    }

    #[test]
    fn capacity_of_one_holds_latest() {
        let ring = filled(1, 3);
        assert_eq!(ring.snapshot().values, vec![2.0]);
    }

    #[test]
    fn snapshot_helpers() {
        let ring = RingBuffer::new(4).unwrap();
        ring.append(3.0, 10.0);
        ring.append(-1.0, 10.5);
        ring.append(2.0, 11.0);
        let snap = ring.snapshot();
        assert_eq!(snap.span_seconds(), 1.0);
        assert_eq!(snap.relative_to_latest(), vec![-1.0, -0.5, 0.0]);
        assert_eq!(snap.value_range(), Some((-1.0, 3.0)));
    }

    #[test]
    fn overflowing_window_is_rejected() {
        assert!(matches!(
            window_capacity(u32::MAX, u32::MAX),
            Err(ConfigError::CapacityOverflow { .. })
        ));
        assert!(matches!(
            RingBuffer::with_window(4_000_000, 4_000),
            Err(ConfigError::CapacityOverflow { .. })
        ));
        assert_eq!(
            RingBuffer::new(MAX_CAPACITY + 1).err(),
            Some(ConfigError::CapacityTooLarge {
                capacity: MAX_CAPACITY + 1,
                max: MAX_CAPACITY,
            })
        );
    }

    #[test]
    fn largest_window_fits_the_limit() {
        assert!(window_capacity(3600, 10_000).unwrap() <= MAX_CAPACITY);
    }
}
