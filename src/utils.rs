//! Simulated-time helpers.
//!
//! All simulated time is kept as integer microseconds; metrics and logs
//! render it as fractional seconds.

pub const MICROS_PER_SECOND: u64 = 1_000_000;

/// Microseconds to fractional seconds.
#[inline]
pub fn us_to_secs(us: u64) -> f64 {
    us as f64 / MICROS_PER_SECOND as f64
}

/// Fractional seconds to microseconds, rounding to the nearest microsecond.
/// Negative and non-finite inputs map to zero.
#[inline]
pub fn secs_to_us(secs: f64) -> u64 {
    if !secs.is_finite() || secs <= 0.0 {
        return 0;
    }
    (secs * MICROS_PER_SECOND as f64).round() as u64
}
