//! Running sums and wall-clock timing for the training loop.

use std::ops::Index;
use std::time::Instant;

/// Fixed number of `f64` running sums.
#[derive(Debug, Clone, PartialEq)]
pub struct Accumulator {
    data: Vec<f64>,
}

impl Accumulator {
    pub fn new(n: usize) -> Self {
        Self { data: vec![0.0; n] }
    }

    /// Add element-wise. Values past the slot count are ignored; a shorter
    /// slice only touches the leading slots.
    pub fn add(&mut self, values: &[f64]) {
        for (slot, v) in self.data.iter_mut().zip(values) {
            *slot += v;
        }
    }

    pub fn reset(&mut self) {
        self.data.iter_mut().for_each(|v| *v = 0.0);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.data
    }
}

impl Index<usize> for Accumulator {
    type Output = f64;

    fn index(&self, idx: usize) -> &f64 {
        &self.data[idx]
    }
}

/// Records the duration of repeated runs. Starts on construction.
#[derive(Debug, Clone)]
pub struct Timer {
    times: Vec<f64>,
    started: Instant,
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer {
    pub fn new() -> Self {
        Self {
            times: Vec::new(),
            started: Instant::now(),
        }
    }

    pub fn start(&mut self) {
        self.started = Instant::now();
    }

    /// Record the time since the last `start` and return it in seconds.
    pub fn stop(&mut self) -> f64 {
        let secs = self.started.elapsed().as_secs_f64();
        self.times.push(secs);
        secs
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn sum(&self) -> f64 {
        self.times.iter().sum()
    }

    /// Mean recorded time; NaN when nothing was recorded.
    pub fn avg(&self) -> f64 {
        self.sum() / self.times.len() as f64
    }

    pub fn cumsum(&self) -> Vec<f64> {
        self.times
            .iter()
            .scan(0.0, |acc, t| {
                *acc += t;
                Some(*acc)
            })
            .collect()
    }
}
