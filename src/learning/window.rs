//! Rolling Window - fixed-capacity, oldest-evicted sample buffer

use itertools::{Itertools, MinMaxResult};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default number of samples retained per (signature, store)
pub const DEFAULT_WINDOW_CAPACITY: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollingWindow<T> {
    capacity: usize,
    samples: VecDeque<T>,
}

impl<T> RollingWindow<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    /// Push a sample, returning the evicted oldest sample when full.
    pub fn push(&mut self, sample: T) -> Option<T> {
        let evicted = if self.samples.len() >= self.capacity {
            self.samples.pop_front()
        } else {
            None
        };
        self.samples.push_back(sample);
        evicted
    }

    /// Re-apply a (possibly changed) capacity, dropping the oldest overflow.
    pub fn resize(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.samples.iter()
    }

    pub fn latest(&self) -> Option<&T> {
        self.samples.back()
    }
}

/// Summary statistics for one metric over a window
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricAggregate {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    /// Population standard deviation
    pub std_dev: f64,
}

impl MetricAggregate {
    pub fn from_values(values: &[f64]) -> Self {
        let (min, max) = match values.iter().copied().minmax() {
            MinMaxResult::NoElements => return Self::default(),
            MinMaxResult::OneElement(v) => (v, v),
            MinMaxResult::MinMax(lo, hi) => (lo, hi),
        };

        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

        Self {
            mean,
            min,
            max,
            std_dev: variance.sqrt(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_evicts_oldest() {
        let mut window = RollingWindow::new(3);
        assert_eq!(window.push(1), None);
        window.push(2);
        window.push(3);
        assert_eq!(window.push(4), Some(1));
        assert_eq!(window.iter().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
        assert_eq!(window.latest(), Some(&4));
    }

    #[test]
    fn test_window_resize_drops_overflow() {
        let mut window = RollingWindow::new(5);
        for i in 0..5 {
            window.push(i);
        }
        window.resize(2);
        assert_eq!(window.iter().copied().collect::<Vec<_>>(), vec![3, 4]);
    }

    #[test]
    fn test_aggregate() {
        let agg = MetricAggregate::from_values(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(agg.mean, 5.0);
        assert_eq!(agg.min, 2.0);
        assert_eq!(agg.max, 9.0);
        assert_eq!(agg.std_dev, 2.0);

        assert_eq!(MetricAggregate::from_values(&[]), MetricAggregate::default());
        let one = MetricAggregate::from_values(&[3.5]);
        assert_eq!((one.min, one.max, one.std_dev), (3.5, 3.5, 0.0));
    }
}
