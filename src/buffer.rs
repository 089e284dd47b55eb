//! Playback buffer occupancy and underrun tracking.
//!
//! Pure bookkeeping: the controller tells the buffer when a segment arrives
//! and when a playback tick fires, and the buffer reports what changed.

/// Snapshot taken when a segment arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferState {
    /// Occupancy just before the arrival, in microseconds of media.
    pub level_old_us: u64,
    /// Occupancy just after the arrival.
    pub level_new_us: u64,
    pub segments_in_buffer: u64,
    pub underrun_active: bool,
}

/// What a single playback tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickOutcome {
    pub underrun_started: bool,
    pub underrun_cleared: bool,
    pub consumed: bool,
}

#[derive(Debug, Clone)]
pub struct PlaybackBuffer {
    segment_duration_us: u64,
    last_segment_index: u64,
    segments_in_buffer: u64,
    playback_index: u64,
    underrun_active: bool,
    level_new_us: u64,
    last_arrival_us: Option<u64>,
}

impl PlaybackBuffer {
    pub fn new(segment_duration_us: u64, last_segment_index: u64) -> Self {
        Self {
            segment_duration_us,
            last_segment_index,
            segments_in_buffer: 0,
            playback_index: 0,
            underrun_active: false,
            level_new_us: 0,
            last_arrival_us: None,
        }
    }

    /// Account for a downloaded segment entering the buffer.
    pub fn on_segment_arrived(&mut self, now_us: u64) -> BufferState {
        let level_old_us = self.level_at(now_us);
        self.level_new_us = level_old_us + self.segment_duration_us;
        self.last_arrival_us = Some(now_us);
        self.segments_in_buffer += 1;
        BufferState {
            level_old_us,
            level_new_us: self.level_new_us,
            segments_in_buffer: self.segments_in_buffer,
            underrun_active: self.underrun_active,
        }
    }

    /// Play one segment if one is buffered, or start an underrun if playback
    /// ran dry before reaching the last segment.
    pub fn tick(&mut self, _now_us: u64) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        if self.segments_in_buffer == 0 {
            if self.playback_index < self.last_segment_index && !self.underrun_active {
                self.underrun_active = true;
                outcome.underrun_started = true;
            }
            return outcome;
        }

        if self.underrun_active {
            self.underrun_active = false;
            outcome.underrun_cleared = true;
        }
        self.segments_in_buffer -= 1;
        self.playback_index += 1;
        outcome.consumed = true;
        outcome
    }

    /// Estimated occupancy at `now_us`: the level after the last arrival
    /// drained in real time, floored at zero.
    pub fn level_at(&self, now_us: u64) -> u64 {
        match self.last_arrival_us {
            None => 0,
            Some(arrival) => self
                .level_new_us
                .saturating_sub(now_us.saturating_sub(arrival)),
        }
    }

    /// Every segment of the stream has been played.
    pub fn is_finished(&self) -> bool {
        self.playback_index > self.last_segment_index
    }

    /// Index of the next segment to play.
    pub fn playback_index(&self) -> u64 {
        self.playback_index
    }

    pub fn segments_in_buffer(&self) -> u64 {
        self.segments_in_buffer
    }

    pub fn underrun_active(&self) -> bool {
        self.underrun_active
    }

    pub fn segment_duration_us(&self) -> u64 {
        self.segment_duration_us
    }

    pub fn last_segment_index(&self) -> u64 {
        self.last_segment_index
    }
}
