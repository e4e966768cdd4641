//! Sliding window of the most recent feature vectors

use std::collections::VecDeque;

use crate::features::FeatureVector;

/// FIFO window holding at most `capacity` vectors with their frame indices
#[derive(Debug, Clone)]
pub struct SequenceBuffer {
    entries: VecDeque<(u64, FeatureVector)>,
    capacity: usize,
}

impl SequenceBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append, evicting the oldest entry when full
    pub fn add(&mut self, vector: FeatureVector, frame_index: u64) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((frame_index, vector));
    }

    pub fn is_ready(&self) -> bool {
        self.entries.len() == self.capacity
    }

    /// Current window in temporal order, or `None` until the window is full
    pub fn snapshot(&self) -> Option<Vec<FeatureVector>> {
        if !self.is_ready() {
            return None;
        }
        Some(self.entries.iter().map(|(_, v)| v.clone()).collect())
    }

    pub fn frame_indices(&self) -> Vec<u64> {
        self.entries.iter().map(|(i, _)| *i).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector(tag: f32) -> FeatureVector {
        FeatureVector::from_values(vec![tag])
    }

    #[test]
    fn test_ready_only_when_full() {
        let mut buffer = SequenceBuffer::new(3);
        assert!(buffer.snapshot().is_none());

        buffer.add(vector(1.0), 0);
        buffer.add(vector(2.0), 5);
        assert!(!buffer.is_ready());
        assert!(buffer.snapshot().is_none());

        buffer.add(vector(3.0), 10);
        assert!(buffer.is_ready());
        assert_eq!(buffer.snapshot().unwrap().len(), 3);
    }

    #[test]
    fn test_fifo_eviction() {
        let mut buffer = SequenceBuffer::new(3);
        for i in 0..5u64 {
            buffer.add(vector(i as f32), i * 5);
            assert!(buffer.len() <= 3);
        }
        assert_eq!(buffer.frame_indices(), vec![10, 15, 20]);

        let window = buffer.snapshot().unwrap();
        let firsts: Vec<f32> = window.iter().map(|v| v.as_slice()[0]).collect();
        assert_eq!(firsts, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_clear() {
        let mut buffer = SequenceBuffer::new(2);
        buffer.add(vector(1.0), 0);
        buffer.add(vector(2.0), 1);
        buffer.clear();
        assert!(buffer.is_empty());
        assert!(!buffer.is_ready());
    }
}
