//! Per-representation segment sizes of one video.
//!
//! The catalog file holds one line per representation, lowest bitrate
//! first, each line a whitespace-separated list of segment sizes in bytes.
//! A blank line ends the table.

use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};
use crate::utils::us_to_secs;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentCatalog {
    sizes: Vec<Vec<u64>>,
    segment_duration_us: u64,
}

impl SegmentCatalog {
    /// Read and parse a catalog file.
    pub fn load(path: impl AsRef<Path>, segment_duration_us: u64) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let catalog = Self::parse(path.display().to_string(), &text, segment_duration_us)?;
        debug!(
            "loaded {}: {} representations x {} segments",
            path.display(),
            catalog.representation_count(),
            catalog.segment_count()
        );
        Ok(catalog)
    }

    /// Parse catalog text. `origin` names the source in error messages.
    pub fn parse(origin: impl Into<String>, text: &str, segment_duration_us: u64) -> Result<Self> {
        let origin = origin.into();
        if text.trim().is_empty() {
            return Err(Error::format(origin, 1, None, "empty catalog"));
        }

        let mut sizes: Vec<Vec<u64>> = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            let line_no = idx + 1;
            if line.trim().is_empty() {
                if sizes.is_empty() {
                    continue;
                }
                break;
            }

            let row = line
                .split_whitespace()
                .enumerate()
                .map(|(field, token)| {
                    token.parse::<u64>().map_err(|_| {
                        Error::format(
                            origin.as_str(),
                            line_no,
                            Some(field + 1),
                            format!("not a non-negative integer: '{token}'"),
                        )
                    })
                })
                .collect::<Result<Vec<u64>>>()?;

            if let Some(first) = sizes.first()
                && first.len() != row.len()
            {
                return Err(Error::format(
                    origin,
                    line_no,
                    None,
                    format!(
                        "representation has {} segments, expected {}",
                        row.len(),
                        first.len()
                    ),
                ));
            }
            sizes.push(row);
        }

        if sizes.is_empty() {
            return Err(Error::format(origin, 1, None, "no representation rows"));
        }
        Self::from_sizes(sizes, segment_duration_us)
    }

    /// Build a catalog from in-memory rows, validated like a parsed file.
    pub fn from_sizes(sizes: Vec<Vec<u64>>, segment_duration_us: u64) -> Result<Self> {
        if segment_duration_us == 0 {
            return Err(Error::Config("segment duration must be positive".into()));
        }
        let Some(first) = sizes.first() else {
            return Err(Error::format("<memory>", 1, None, "no representation rows"));
        };
        if first.is_empty() {
            return Err(Error::format("<memory>", 1, None, "representation has no segments"));
        }
        if let Some(bad) = sizes.iter().position(|row| row.len() != first.len()) {
            return Err(Error::format(
                "<memory>",
                bad + 1,
                None,
                format!(
                    "representation has {} segments, expected {}",
                    sizes[bad].len(),
                    first.len()
                ),
            ));
        }
        Ok(Self {
            sizes,
            segment_duration_us,
        })
    }

    /// Size in bytes of segment `segment` at representation `representation`.
    pub fn size_of(&self, representation: usize, segment: u64) -> Result<u64> {
        self.sizes
            .get(representation)
            .and_then(|row| usize::try_from(segment).ok().and_then(|s| row.get(s)))
            .copied()
            .ok_or(Error::Index {
                representation,
                segment,
            })
    }

    pub fn segment_count(&self) -> u64 {
        self.sizes[0].len() as u64
    }

    pub fn representation_count(&self) -> usize {
        self.sizes.len()
    }

    pub fn highest_rep_index(&self) -> usize {
        self.sizes.len() - 1
    }

    pub fn last_segment_index(&self) -> u64 {
        self.segment_count() - 1
    }

    #[inline]
    pub fn segment_duration_us(&self) -> u64 {
        self.segment_duration_us
    }

    /// Mean bitrate of a representation in bits per second.
    pub fn average_bitrate(&self, representation: usize) -> Result<f64> {
        let row = self.sizes.get(representation).ok_or(Error::Index {
            representation,
            segment: 0,
        })?;
        let mean = row.iter().sum::<u64>() as f64 / row.len() as f64;
        Ok(8.0 * mean / us_to_secs(self.segment_duration_us))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_SECONDS: u64 = 2_000_000;

    #[test]
    fn parses_rows_and_stops_at_blank_line() {
        let text = "100 200 300\n400 500 600\n\n7 8\n";
        let catalog = SegmentCatalog::parse("mem", text, TWO_SECONDS).unwrap();
        assert_eq!(catalog.representation_count(), 2);
        assert_eq!(catalog.segment_count(), 3);
        assert_eq!(catalog.highest_rep_index(), 1);
        assert_eq!(catalog.last_segment_index(), 2);
        assert_eq!(catalog.size_of(1, 2).unwrap(), 600);
    }

    #[test]
    fn leading_blank_lines_are_skipped() {
        let catalog = SegmentCatalog::parse("mem", "\n  \n1 2\n", TWO_SECONDS).unwrap();
        assert_eq!(catalog.segment_count(), 2);
    }

    #[test]
    fn rejects_empty_source() {
        let err = SegmentCatalog::parse("mem", "  \n", TWO_SECONDS).unwrap_err();
        assert!(matches!(err, Error::Format { line: 1, .. }));
    }

    #[test]
    fn reports_line_and_field_of_bad_token() {
        let err = SegmentCatalog::parse("v.txt", "1 2 3\n4 x 6\n", TWO_SECONDS).unwrap_err();
        match err {
            Error::Format {
                origin,
                line,
                field,
                ..
            } => {
                assert_eq!(origin, "v.txt");
                assert_eq!(line, 2);
                assert_eq!(field, Some(2));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn rejects_negative_sizes() {
        let err = SegmentCatalog::parse("mem", "1 -2\n", TWO_SECONDS).unwrap_err();
        assert!(matches!(err, Error::Format { field: Some(2), .. }));
    }

    #[test]
    fn rejects_ragged_rows() {
        let err = SegmentCatalog::parse("mem", "1 2 3\n4 5\n", TWO_SECONDS).unwrap_err();
        assert!(matches!(err, Error::Format { line: 2, .. }));
    }

    #[test]
    fn zero_duration_is_config_error() {
        let err = SegmentCatalog::from_sizes(vec![vec![1]], 0).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn out_of_range_never_clamps() {
        let catalog = SegmentCatalog::from_sizes(vec![vec![1, 2], vec![3, 4]], TWO_SECONDS).unwrap();
        let last = catalog.last_segment_index();
        assert_eq!(catalog.size_of(0, last).unwrap(), 2);
        assert!(matches!(
            catalog.size_of(0, catalog.segment_count()),
            Err(Error::Index { segment: 2, .. })
        ));
        assert!(matches!(
            catalog.size_of(2, 0),
            Err(Error::Index {
                representation: 2,
                ..
            })
        ));
    }

    #[test]
    fn lookups_are_stable() {
        let catalog = SegmentCatalog::from_sizes(vec![vec![10, 20]], TWO_SECONDS).unwrap();
        assert_eq!(catalog.size_of(0, 1).unwrap(), catalog.size_of(0, 1).unwrap());
    }

    #[test]
    fn average_bitrate_uses_segment_duration() {
        // mean 250_000 bytes per 2s segment -> 1 Mbps
        let catalog =
            SegmentCatalog::from_sizes(vec![vec![200_000, 300_000]], TWO_SECONDS).unwrap();
        assert_eq!(catalog.average_bitrate(0).unwrap(), 1_000_000.0);
        assert!(catalog.average_bitrate(1).is_err());
    }

    #[test]
    fn load_reports_missing_file() {
        let err = SegmentCatalog::load("/nonexistent/video.txt", TWO_SECONDS).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
