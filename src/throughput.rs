//! Per-segment download timestamps and the throughput estimates derived
//! from them.

use serde::Serialize;

use crate::utils::MICROS_PER_SECOND;

/// One completed download. Appended once, never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DownloadRecord {
    pub segment_index: u64,
    pub representation: usize,
    pub requested_at_us: u64,
    pub transfer_started_at_us: u64,
    pub transfer_ended_at_us: u64,
    pub bytes: u64,
}

impl DownloadRecord {
    /// Time the transfer took. Falls back to the whole request-response
    /// interval when the first byte and the last byte landed together.
    pub fn transfer_time_us(&self) -> u64 {
        let transfer = self
            .transfer_ended_at_us
            .saturating_sub(self.transfer_started_at_us);
        if transfer > 0 {
            transfer
        } else {
            self.transfer_ended_at_us
                .saturating_sub(self.requested_at_us)
        }
    }

    /// Bits per second, `None` for an instantaneous transfer.
    pub fn throughput_bps(&self) -> Option<f64> {
        let us = self.transfer_time_us();
        (us > 0).then(|| (self.bytes * 8) as f64 * MICROS_PER_SECOND as f64 / us as f64)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ThroughputTracker {
    records: Vec<DownloadRecord>,
    pending_request: Option<(u64, u64)>,
    pending_start: Option<u64>,
}

impl ThroughputTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request_sent(&mut self, segment_index: u64, now_us: u64) {
        self.pending_request = Some((segment_index, now_us));
        self.pending_start = None;
    }

    /// First byte of the outstanding segment arrived.
    pub fn record_transfer_start(&mut self, now_us: u64) {
        self.pending_start.get_or_insert(now_us);
    }

    pub fn record_transfer_end(
        &mut self,
        segment_index: u64,
        representation: usize,
        bytes: u64,
        now_us: u64,
    ) -> &DownloadRecord {
        let requested_at_us = match self.pending_request.take() {
            Some((seg, at)) if seg == segment_index => at,
            _ => self.pending_start.unwrap_or(now_us),
        };
        let transfer_started_at_us = self.pending_start.take().unwrap_or(requested_at_us);
        self.records.push(DownloadRecord {
            segment_index,
            representation,
            requested_at_us,
            transfer_started_at_us,
            transfer_ended_at_us: now_us,
            bytes,
        });
        &self.records[self.records.len() - 1]
    }

    pub fn last_transfer_end(&self) -> Option<u64> {
        self.records.last().map(|r| r.transfer_ended_at_us)
    }

    pub fn records(&self) -> &[DownloadRecord] {
        &self.records
    }

    pub fn last(&self) -> Option<&DownloadRecord> {
        self.records.last()
    }

    /// Aggregate throughput over the last `window` downloads: total bits over
    /// total transfer time. Instantaneous transfers are left out.
    pub fn estimate_throughput(&self, window: usize) -> Option<f64> {
        let (bits, us) = self
            .recent(window)
            .filter(|r| r.transfer_time_us() > 0)
            .fold((0u64, 0u64), |(bits, us), r| {
                (bits + r.bytes * 8, us + r.transfer_time_us())
            });
        (us > 0).then(|| bits as f64 * MICROS_PER_SECOND as f64 / us as f64)
    }

    /// Per-download throughput samples of the last `window` downloads,
    /// oldest first.
    pub fn segment_throughputs(&self, window: usize) -> Vec<f64> {
        self.recent(window)
            .filter_map(DownloadRecord::throughput_bps)
            .collect()
    }

    fn recent(&self, window: usize) -> impl Iterator<Item = &DownloadRecord> {
        let skip = self.records.len().saturating_sub(window);
        self.records[skip..].iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn download(tracker: &mut ThroughputTracker, seg: u64, req: u64, start: u64, end: u64, bytes: u64) {
        tracker.record_request_sent(seg, req);
        tracker.record_transfer_start(start);
        tracker.record_transfer_end(seg, 0, bytes, end);
    }

    #[test]
    fn records_timestamps_in_order() {
        let mut tracker = ThroughputTracker::new();
        tracker.record_request_sent(0, 100);
        tracker.record_transfer_start(200);
        tracker.record_transfer_start(300);
        let record = *tracker.record_transfer_end(0, 2, 1_000, 400);
        assert_eq!(record.requested_at_us, 100);
        assert_eq!(record.transfer_started_at_us, 200);
        assert_eq!(record.transfer_ended_at_us, 400);
        assert_eq!(record.representation, 2);
        assert_eq!(tracker.last_transfer_end(), Some(400));
    }

    #[test]
    fn estimate_aggregates_window() {
        let mut tracker = ThroughputTracker::new();
        // 1 MB in 1 s, then 1 MB in 3 s
        download(&mut tracker, 0, 0, 0, 1_000_000, 1_000_000);
        download(&mut tracker, 1, 1_000_000, 1_000_000, 4_000_000, 1_000_000);

        assert_eq!(tracker.estimate_throughput(1), Some(8_000_000.0 / 3.0));
        assert_eq!(tracker.estimate_throughput(10), Some(16_000_000.0 / 4.0));
        assert_eq!(tracker.segment_throughputs(10), vec![8_000_000.0, 8_000_000.0 / 3.0]);
    }

    #[test]
    fn zero_length_transfer_falls_back_to_request_time() {
        let mut tracker = ThroughputTracker::new();
        download(&mut tracker, 0, 0, 500_000, 500_000, 125_000);
        assert_eq!(tracker.estimate_throughput(1), Some(2_000_000.0));
    }

    #[test]
    fn no_estimate_without_usable_records() {
        let mut tracker = ThroughputTracker::new();
        assert_eq!(tracker.estimate_throughput(5), None);
        download(&mut tracker, 0, 7, 7, 7, 100);
        assert_eq!(tracker.estimate_throughput(5), None);
        assert!(tracker.segment_throughputs(5).is_empty());
    }
}
