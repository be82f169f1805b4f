use std::collections::VecDeque;

/// Accumulates decoded samples until a full segment is available.
///
/// Holds at most one segment; when a push overflows it the oldest samples
/// are dropped.
#[derive(Debug)]
pub struct SegmentBuffer {
    samples: VecDeque<f32>,
    capacity: usize,
}

impl SegmentBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends samples. Returns `true` once a full segment is held.
    pub fn push(&mut self, samples: &[f32]) -> bool {
        for &sample in samples {
            if self.samples.len() == self.capacity {
                self.samples.pop_front();
            }
            self.samples.push_back(sample);
        }
        self.is_full()
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Removes and returns everything buffered.
    pub fn take(&mut self) -> Vec<f32> {
        self.samples.drain(..).collect()
    }
}
