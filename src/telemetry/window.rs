//! # Sample Window
//!
//! A fixed-size window of recent durations that overwrites the oldest
//! sample when full.
//!
//! ## Plain English
//!
//! Picture a circular track with numbered parking spots.
//! When all spots are full and a new car arrives,
//! the oldest car is towed away to make room.
//! The window also keeps a running total, so the average is always one
//! division away.

use std::collections::VecDeque;
use std::time::Duration;

/// A fixed-capacity window of durations.
///
/// ## Properties
/// - Fixed capacity (doesn't grow)
/// - O(1) push and mean
/// - Automatically discards oldest when full
#[derive(Debug, Clone)]
pub struct SampleWindow {
    /// The samples, oldest first
    samples: VecDeque<Duration>,

    /// Maximum number of samples
    capacity: usize,

    /// Sum of everything in `samples`
    total: Duration,
}

impl SampleWindow {
    /// Creates an empty window holding at most `capacity` samples.
    ///
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            total: Duration::ZERO,
        }
    }

    /// Adds a sample, evicting the oldest one if the window is full.
    pub fn push(&mut self, sample: Duration) {
        if self.samples.len() >= self.capacity {
            if let Some(evicted) = self.samples.pop_front() {
                self.total = self.total.saturating_sub(evicted);
            }
        }
        self.samples.push_back(sample);
        self.total += sample;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.total = Duration::ZERO;
    }

    /// The most recent sample.
    pub fn latest(&self) -> Option<Duration> {
        self.samples.back().copied()
    }

    /// Average of the samples in the window.
    pub fn mean(&self) -> Option<Duration> {
        let count = u32::try_from(self.samples.len()).ok().filter(|&n| n > 0)?;
        Some(self.total / count)
    }

    /// Longest sample in the window.
    pub fn max(&self) -> Option<Duration> {
        self.samples.iter().max().copied()
    }

    /// Samples, oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &Duration> {
        self.samples.iter()
    }
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_new_window() {
        let window = SampleWindow::new(5);
        assert!(window.is_empty());
        assert_eq!(window.capacity(), 5);
        assert_eq!(window.mean(), None);
        assert_eq!(window.latest(), None);
    }

    #[test]
    fn test_overflow_keeps_newest() {
        let mut window = SampleWindow::new(3);

        // Add 5 samples to a capacity-3 window
        for i in 1..=5 {
            window.push(ms(i));
        }

        // Should only have 3, 4, 5
        assert_eq!(window.len(), 3);
        assert!(window.is_full());
        let kept: Vec<_> = window.iter().copied().collect();
        assert_eq!(kept, vec![ms(3), ms(4), ms(5)]);
        assert_eq!(window.latest(), Some(ms(5)));
    }

    #[test]
    fn test_mean_tracks_evictions() {
        let mut window = SampleWindow::new(2);
        window.push(ms(10));
        window.push(ms(20));
        assert_eq!(window.mean(), Some(ms(15)));

        window.push(ms(40));
        assert_eq!(window.mean(), Some(ms(30)));
        assert_eq!(window.max(), Some(ms(40)));
    }

    #[test]
    fn test_clear() {
        let mut window = SampleWindow::new(4);
        window.push(ms(7));
        window.clear();
        assert!(window.is_empty());
        assert_eq!(window.mean(), None);
        window.push(ms(3));
        assert_eq!(window.mean(), Some(ms(3)));
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let mut window = SampleWindow::new(0);
        window.push(ms(1));
        window.push(ms(2));
        assert_eq!(window.len(), 1);
        assert_eq!(window.latest(), Some(ms(2)));
    }
}
