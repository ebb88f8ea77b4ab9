use serde::{Deserialize, Serialize};

/// Multiply the learning rate by `decay` every `period` epochs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepDecay {
    pub initial: f64,
    pub period: usize,
    pub decay: f64,
}

impl StepDecay {
    pub fn new(initial: f64, period: usize, decay: f64) -> Self {
        Self {
            initial,
            period,
            decay,
        }
    }

    /// Learning rate in effect during `epoch` (zero-based).
    pub fn lr_at(&self, epoch: usize) -> f64 {
        let steps = epoch / self.period.max(1);
        self.initial * self.decay.powi(steps as i32)
    }
}
