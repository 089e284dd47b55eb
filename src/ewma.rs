/// Exponentially weighted moving average with optional asymmetric weights.
///
/// Rate adaptation policies use it to smooth noisy per-segment throughput
/// samples. With asymmetric weights the filter can follow drops quickly
/// while reacting slowly to spikes, which keeps a bitrate estimate
/// conservative.
#[derive(Debug, Clone)]
pub struct Ewma {
    value: Option<f64>,
    alpha_up: f64,
    alpha_down: f64,
}

impl Ewma {
    /// Symmetric filter, `0.0 < alpha <= 1.0`. Higher alpha follows input
    /// more closely.
    pub fn new(alpha: f64) -> Self {
        Self::asymmetric(alpha, alpha)
    }

    /// `alpha_up` applies to samples above the current value, `alpha_down`
    /// to samples below it.
    pub fn asymmetric(alpha_up: f64, alpha_down: f64) -> Self {
        Self {
            value: None,
            alpha_up: alpha_up.clamp(0.0, 1.0),
            alpha_down: alpha_down.clamp(0.0, 1.0),
        }
    }

    /// Feed a sample and return the smoothed value. Non-finite samples are
    /// ignored.
    pub fn update(&mut self, sample: f64) -> Option<f64> {
        if !sample.is_finite() {
            return self.value;
        }
        let next = match self.value {
            None => sample,
            Some(current) => {
                let alpha = if sample > current {
                    self.alpha_up
                } else {
                    self.alpha_down
                };
                current * (1.0 - alpha) + sample * alpha
            }
        };
        self.value = Some(next);
        self.value
    }

    /// Smoothed value, `None` until the first finite sample.
    pub fn value(&self) -> Option<f64> {
        self.value
    }

    pub fn value_or(&self, fallback: f64) -> f64 {
        self.value.unwrap_or(fallback)
    }

    pub fn reset(&mut self) {
        self.value = None;
    }
}
