//! Data-rate and delay strings in the `5Mbps` / `2ms` notation used by
//! scenario files and the command line.

use std::fmt;
use std::str::FromStr;

use anyhow::{Result, anyhow, bail};

/// Link rate in bits per second.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DataRate(u64);

impl DataRate {
    pub const fn from_bps(bps: u64) -> Self {
        Self(bps)
    }

    pub const fn from_kbps(kbps: u64) -> Self {
        Self(kbps * 1_000)
    }

    pub const fn from_mbps(mbps: u64) -> Self {
        Self(mbps * 1_000_000)
    }

    #[inline]
    pub const fn bps(self) -> u64 {
        self.0
    }

    pub fn mbps(self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    /// Serialization time of `bytes` at this rate, in microseconds.
    /// `None` for a zero rate.
    pub fn transmit_time_us(self, bytes: u64) -> Option<u64> {
        if self.0 == 0 {
            return None;
        }
        let bits = bytes as u128 * 8 * 1_000_000;
        Some(bits.div_ceil(self.0 as u128) as u64)
    }
}

impl fmt::Display for DataRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bps = self.0;
        if bps >= 1_000_000_000 && bps % 1_000_000_000 == 0 {
            write!(f, "{}Gbps", bps / 1_000_000_000)
        } else if bps >= 1_000_000 && bps % 1_000_000 == 0 {
            write!(f, "{}Mbps", bps / 1_000_000)
        } else if bps >= 1_000 && bps % 1_000 == 0 {
            write!(f, "{}kbps", bps / 1_000)
        } else {
            write!(f, "{}bps", bps)
        }
    }
}

impl FromStr for DataRate {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (value, unit) = split_number(s)?;
        let multiplier = match unit.to_ascii_lowercase().as_str() {
            "" | "bps" | "b/s" => 1.0,
            "kbps" | "kb/s" => 1e3,
            "mbps" | "mb/s" => 1e6,
            "gbps" | "gb/s" => 1e9,
            _ => bail!("unknown data rate unit '{unit}' in '{s}'"),
        };
        Ok(Self((value * multiplier).round() as u64))
    }
}

/// Parse a delay such as `2ms`, `500us` or `1.5s` into microseconds.
/// A bare number is taken as milliseconds.
pub fn parse_delay_us(s: &str) -> Result<u64> {
    let (value, unit) = split_number(s)?;
    let multiplier = match unit {
        "us" => 1.0,
        "" | "ms" => 1e3,
        "s" => 1e6,
        _ => bail!("unknown delay unit '{unit}' in '{s}'"),
    };
    Ok((value * multiplier).round() as u64)
}

fn split_number(s: &str) -> Result<(f64, &str)> {
    let s = s.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (num, unit) = s.split_at(split);
    let value: f64 = num
        .parse()
        .map_err(|_| anyhow!("expected a number at the start of '{s}'"))?;
    if !value.is_finite() || value < 0.0 {
        bail!("value out of range in '{s}'");
    }
    Ok((value, unit.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_rates() {
        assert_eq!("5Mbps".parse::<DataRate>().unwrap().bps(), 5_000_000);
        assert_eq!("500kbps".parse::<DataRate>().unwrap().bps(), 500_000);
        assert_eq!("1.5Mb/s".parse::<DataRate>().unwrap().bps(), 1_500_000);
        assert_eq!("2Gbps".parse::<DataRate>().unwrap().bps(), 2_000_000_000);
        assert_eq!("1200".parse::<DataRate>().unwrap().bps(), 1_200);
    }

    #[test]
    fn rejects_garbage() {
        assert!("fast".parse::<DataRate>().is_err());
        assert!("5Xbps".parse::<DataRate>().is_err());
        assert!("".parse::<DataRate>().is_err());
    }

    #[test]
    fn display_picks_largest_exact_unit() {
        assert_eq!(DataRate::from_mbps(10).to_string(), "10Mbps");
        assert_eq!(DataRate::from_kbps(1500).to_string(), "1500kbps");
        assert_eq!(DataRate::from_bps(999).to_string(), "999bps");
    }

    #[test]
    fn transmit_time() {
        let rate = DataRate::from_mbps(8);
        assert_eq!(rate.transmit_time_us(1_000_000), Some(1_000_000));
        assert_eq!(DataRate::from_bps(0).transmit_time_us(10), None);
    }

    #[test]
    fn parses_delays() {
        assert_eq!(parse_delay_us("2ms").unwrap(), 2_000);
        assert_eq!(parse_delay_us("150us").unwrap(), 150);
        assert_eq!(parse_delay_us("1.5s").unwrap(), 1_500_000);
        assert_eq!(parse_delay_us("10").unwrap(), 10_000);
        assert!(parse_delay_us("10h").is_err());
    }
}
