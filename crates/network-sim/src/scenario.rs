use std::fmt::Write as _;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::rate::DataRate;

/// Bounds and step size of a bottleneck-rate random walk.
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    /// RNG seed for reproducibility.
    pub seed: u64,
    /// Total scenario duration.
    pub duration: Duration,
    /// Time between rate changes.
    pub step: Duration,
    pub min_rate_kbit: u64,
    pub max_rate_kbit: u64,
    pub rate_step_kbit: u64,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            seed: 1,
            duration: Duration::from_secs(300),
            step: Duration::from_secs(10),
            min_rate_kbit: 1_000,
            max_rate_kbit: 10_000,
            rate_step_kbit: 1_500,
        }
    }
}

/// One bottleneck rate change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioFrame {
    pub t: Duration,
    pub rate: DataRate,
}

/// Deterministic random-walk generator for bottleneck rate schedules.
///
/// Given a seed, produces a reproducible sequence of [`ScenarioFrame`]s whose
/// rate moves by clamped random steps.
#[derive(Debug)]
pub struct Scenario {
    cfg: ScenarioConfig,
    rng: StdRng,
    rate_kbit: f64,
}

impl Scenario {
    pub fn new(cfg: ScenarioConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let range = cfg.max_rate_kbit.saturating_sub(cfg.min_rate_kbit) as f64;
        let rate_kbit = cfg.min_rate_kbit as f64 + rng.random::<f64>() * range;
        Self { cfg, rng, rate_kbit }
    }

    /// Generate all frames for the configured duration, starting at t=0.
    pub fn frames(&mut self) -> Vec<ScenarioFrame> {
        let step_secs = self.cfg.step.as_secs_f64();
        if step_secs <= 0.0 {
            return Vec::new();
        }
        let total_steps = (self.cfg.duration.as_secs_f64() / step_secs).ceil() as u64;

        (0..=total_steps)
            .map(|step_idx| {
                if step_idx > 0 {
                    self.rate_kbit = (self.rate_kbit
                        + rand_signed(&mut self.rng, self.cfg.rate_step_kbit as f64))
                    .clamp(self.cfg.min_rate_kbit as f64, self.cfg.max_rate_kbit as f64);
                }
                ScenarioFrame {
                    t: self.cfg.step.mul_f64(step_idx as f64),
                    rate: DataRate::from_kbps(self.rate_kbit.max(1.0).round() as u64),
                }
            })
            .collect()
    }
}

/// Render frames in the event-schedule file format: a header line followed
/// by one `BottleneckRate <seconds> <rate>` line per frame.
pub fn render_schedule(frames: &[ScenarioFrame]) -> String {
    let mut out = String::from("Event Time Value\n");
    for frame in frames {
        let _ = writeln!(
            out,
            "BottleneckRate {} {}",
            frame.t.as_secs_f64(),
            frame.rate
        );
    }
    out
}

/// Random value in `[-max_step, +max_step]`.
fn rand_signed(rng: &mut StdRng, max_step: f64) -> f64 {
    if max_step <= 0.0 {
        return 0.0;
    }
    let mag = rng.random::<f64>() * max_step;
    if rng.random::<bool>() { mag } else { -mag }
}
