//! The streaming client state machine.
//!
//! A [`StreamController`] owns everything about one client: its playback
//! buffer, throughput history and rate adaptation policy. The driver feeds
//! it timer events and received bytes through [`handle_event`] and
//! [`on_receive`], lending it a [`ClientIo`] for each call.
//!
//! [`handle_event`]: StreamController::handle_event
//! [`on_receive`]: StreamController::on_receive

pub mod io;
pub mod state;

use std::sync::Arc;

use network_sim::TimerId;
use tracing::{debug, error, info, warn};

pub use io::{ClientIo, SegmentRequest};
pub use state::{ControllerEvent, ControllerState, Transition};

use crate::adaptation::{
    AdaptationContext, AdaptationDecision, PolicyKind, RateAdaptationPolicy, create_policy,
};
use crate::buffer::{PlaybackBuffer, TickOutcome};
use crate::catalog::SegmentCatalog;
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::metrics::{MetricsEvent, MetricsSink};
use crate::stats::ClientStats;
use crate::throughput::ThroughputTracker;
use crate::utils::us_to_secs;

/// The segment currently requested or in flight.
#[derive(Debug, Clone, Copy)]
struct Outstanding {
    segment_index: u64,
    representation: usize,
    expected_bytes: u64,
    received_bytes: u64,
    transfer_started: bool,
}

#[derive(Debug, Default)]
struct Counters {
    connected_at_us: Option<u64>,
    first_playback_us: Option<u64>,
    underruns: u64,
    stall_started_us: Option<u64>,
    stall_time_us: u64,
    switches: u64,
    unexpected_events: u64,
}

pub struct StreamController {
    client_id: u32,
    catalog: Arc<SegmentCatalog>,
    policy: Box<dyn RateAdaptationPolicy>,
    sink: Box<dyn MetricsSink>,
    buffer: PlaybackBuffer,
    throughput: ThroughputTracker,

    state: ControllerState,
    /// Segment the policy decides for next; advanced once per download.
    segment_counter: u64,
    /// Decided representation of every requested segment, by index.
    decided: Vec<usize>,
    /// Decision waiting on a policy delay.
    deferred: Option<AdaptationDecision>,
    outstanding: Option<Outstanding>,
    playback_history: Vec<usize>,

    pending_tick: Option<TimerId>,
    pending_delay: Option<TimerId>,

    transitions: Vec<Transition>,
    counters: Counters,
    error: Option<String>,
}

impl StreamController {
    /// Load the catalog named by `config` and build a controller for it.
    pub fn new(config: &SessionConfig, sink: Box<dyn MetricsSink>) -> Result<Self> {
        let catalog = SegmentCatalog::load(&config.catalog_path, config.segment_duration_us)?;
        Ok(Self::from_config(config, Arc::new(catalog), sink))
    }

    /// Build a controller around an already loaded catalog, shared with
    /// other clients streaming the same video.
    pub fn from_config(
        config: &SessionConfig,
        catalog: Arc<SegmentCatalog>,
        sink: Box<dyn MetricsSink>,
    ) -> Self {
        let policy = create_policy(config.policy, config.client_id);
        Self::with_policy(config.client_id, catalog, policy, sink)
    }

    pub fn with_policy(
        client_id: u32,
        catalog: Arc<SegmentCatalog>,
        policy: Box<dyn RateAdaptationPolicy>,
        sink: Box<dyn MetricsSink>,
    ) -> Self {
        let buffer = PlaybackBuffer::new(catalog.segment_duration_us(), catalog.last_segment_index());
        Self {
            client_id,
            catalog,
            policy,
            sink,
            buffer,
            throughput: ThroughputTracker::new(),
            state: ControllerState::Initial,
            segment_counter: 0,
            decided: Vec::new(),
            deferred: None,
            outstanding: None,
            playback_history: Vec::new(),
            pending_tick: None,
            pending_delay: None,
            transitions: Vec::new(),
            counters: Counters::default(),
            error: None,
        }
    }

    pub fn client_id(&self) -> u32 {
        self.client_id
    }

    pub fn policy_kind(&self) -> PolicyKind {
        self.policy.kind()
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn catalog(&self) -> &SegmentCatalog {
        &self.catalog
    }

    pub fn buffer(&self) -> &PlaybackBuffer {
        &self.buffer
    }

    pub fn throughput(&self) -> &ThroughputTracker {
        &self.throughput
    }

    /// Representation of every played segment, in playback order.
    pub fn playback_history(&self) -> &[usize] {
        &self.playback_history
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// Open the connection. `ControllerEvent::Init` follows once it is up.
    pub fn start(&mut self, io: &mut dyn ClientIo) -> Result<()> {
        if self.state != ControllerState::Initial || self.counters.connected_at_us.is_some() {
            return Err(Error::InvariantViolation(format!(
                "client {} started twice",
                self.client_id
            )));
        }
        self.counters.connected_at_us = Some(io.now_us());
        info!(
            "client {}: connecting ({}, {} representations x {} segments)",
            self.client_id,
            self.policy.kind(),
            self.catalog.representation_count(),
            self.catalog.segment_count()
        );
        if let Err(e) = io.connect() {
            self.abort(io, &e);
            return Err(e);
        }
        Ok(())
    }

    /// Dispatch one event.
    ///
    /// An error means the session was aborted: the controller is already
    /// terminal and its sink flushed.
    pub fn handle_event(&mut self, io: &mut dyn ClientIo, event: ControllerEvent) -> Result<()> {
        if self.state.is_terminal() {
            debug!("client {}: ignoring {} after terminal", self.client_id, event);
            return Ok(());
        }
        match event {
            ControllerEvent::PlaybackTick => self.pending_tick = None,
            ControllerEvent::DelayElapsed => self.pending_delay = None,
            _ => {}
        }

        let from = self.state;
        match self.dispatch(io, event) {
            Ok(to) => {
                self.transitions.push(Transition {
                    at_us: io.now_us(),
                    from,
                    event,
                    to,
                });
                self.state = to;
                if to != from {
                    debug!("client {}: {} --{}--> {}", self.client_id, from, event, to);
                }
                if to.is_terminal() {
                    self.finish(io);
                }
                Ok(())
            }
            Err(e) => {
                self.abort(io, &e);
                Err(e)
            }
        }
    }

    /// Account for `bytes` of the outstanding segment arriving.
    pub fn on_receive(&mut self, io: &mut dyn ClientIo, bytes: u64) -> Result<()> {
        if self.state.is_terminal() {
            return Ok(());
        }
        let now = io.now_us();
        let Some(outstanding) = self.outstanding.as_mut() else {
            let e = Error::InvariantViolation(format!(
                "client {}: received {bytes} bytes with no request outstanding",
                self.client_id
            ));
            self.abort(io, &e);
            return Err(e);
        };

        if !outstanding.transfer_started {
            outstanding.transfer_started = true;
            self.throughput.record_transfer_start(now);
        }
        outstanding.received_bytes += bytes;
        let done = *outstanding;
        self.sink.record(&MetricsEvent::BytesReceived {
            time: us_to_secs(now),
            bytes,
        });

        if done.received_bytes > done.expected_bytes {
            let e = Error::InvariantViolation(format!(
                "client {}: segment {} overran: {} of {} bytes",
                self.client_id, done.segment_index, done.received_bytes, done.expected_bytes
            ));
            self.abort(io, &e);
            return Err(e);
        }
        if done.received_bytes < done.expected_bytes {
            return Ok(());
        }

        self.outstanding = None;
        self.segment_arrived(now, done);
        self.handle_event(io, ControllerEvent::DownloadComplete)
    }

    /// External cancellation: stop timers, close the connection and flush.
    pub fn stop(&mut self, io: &mut dyn ClientIo) {
        if self.state.is_terminal() {
            return;
        }
        let from = self.state;
        self.state = ControllerState::Terminal;
        self.transitions.push(Transition {
            at_us: io.now_us(),
            from,
            event: ControllerEvent::Stop,
            to: ControllerState::Terminal,
        });
        info!("client {}: stopped in {}", self.client_id, from);
        self.finish(io);
    }

    pub fn stats(&self) -> ClientStats {
        let records = self.throughput.records();
        let average_representation = if records.is_empty() {
            0.0
        } else {
            records.iter().map(|r| r.representation as f64).sum::<f64>() / records.len() as f64
        };
        let startup_delay_s = match (self.counters.connected_at_us, self.counters.first_playback_us) {
            (Some(connected), Some(played)) => Some(us_to_secs(played.saturating_sub(connected))),
            _ => None,
        };
        ClientStats {
            client_id: self.client_id,
            policy: self.policy.kind(),
            final_state: self.state,
            aborted: self.error.is_some(),
            error: self.error.clone(),
            segments_downloaded: records.len() as u64,
            bytes_downloaded: records.iter().map(|r| r.bytes).sum(),
            segments_played: self.buffer.playback_index(),
            underruns: self.counters.underruns,
            stall_time_s: us_to_secs(self.counters.stall_time_us),
            startup_delay_s,
            average_representation,
            representation_switches: self.counters.switches,
            unexpected_events: self.counters.unexpected_events,
        }
    }

    fn dispatch(&mut self, io: &mut dyn ClientIo, event: ControllerEvent) -> Result<ControllerState> {
        use ControllerEvent as E;
        use ControllerState as S;

        let last = self.catalog.last_segment_index();
        match (self.state, event) {
            (_, E::Stop) => {
                self.cancel_timers(io);
                Ok(S::Terminal)
            }

            (S::Initial, E::Init) => {
                self.record_underrun(io.now_us(), false);
                let decision = self.decide(io.now_us())?;
                self.request(io, decision)?;
                Ok(S::Downloading)
            }

            // Stalled: the arrival restarts playback and the next request
            // goes out right away, whatever delay the policy asks for.
            (S::Downloading, E::DownloadComplete) => {
                self.play(io);
                if self.segment_counter >= last {
                    return Ok(S::Playing);
                }
                self.segment_counter += 1;
                let decision = self.decide(io.now_us())?;
                self.request(io, decision)?;
                Ok(S::DownloadingPlaying)
            }

            (S::DownloadingPlaying, E::DownloadComplete) => {
                if self.segment_counter >= last {
                    return Ok(S::Playing);
                }
                self.segment_counter += 1;
                let decision = self.decide(io.now_us())?;
                if decision.extra_delay_us > 0 {
                    self.pending_delay =
                        Some(io.schedule(decision.extra_delay_us, E::DelayElapsed));
                    self.deferred = Some(decision);
                    Ok(S::Playing)
                } else {
                    self.request(io, decision)?;
                    Ok(S::DownloadingPlaying)
                }
            }

            (S::DownloadingPlaying, E::PlaybackTick) => {
                if self.play(io).consumed {
                    Ok(S::DownloadingPlaying)
                } else {
                    Ok(S::Downloading)
                }
            }

            (S::Playing, E::DelayElapsed) => {
                let decision = self.deferred.take().ok_or_else(|| {
                    Error::InvariantViolation(format!(
                        "client {}: delay elapsed with no deferred request",
                        self.client_id
                    ))
                })?;
                self.request(io, decision)?;
                Ok(S::DownloadingPlaying)
            }

            (S::Playing, E::PlaybackTick) => {
                let outcome = self.play(io);
                if self.buffer.is_finished() {
                    self.record_underrun(io.now_us(), false);
                    info!(
                        "client {}: finished at {:.3}s",
                        self.client_id,
                        us_to_secs(io.now_us())
                    );
                    return Ok(S::Terminal);
                }
                if outcome.consumed {
                    return Ok(S::Playing);
                }
                // ran dry while a policy delay was pending: request now and
                // wait for the arrival like any other stall
                if let Some(id) = self.pending_delay.take() {
                    io.cancel(id);
                    if let Some(decision) = self.deferred.take() {
                        self.request(io, decision)?;
                        return Ok(S::Downloading);
                    }
                }
                Err(Error::InvariantViolation(format!(
                    "client {}: playback ran dry with nothing left to download",
                    self.client_id
                )))
            }

            (state, event) => {
                self.counters.unexpected_events += 1;
                warn!(
                    "client {}: unexpected {} in state {}",
                    self.client_id, event, state
                );
                Ok(state)
            }
        }
    }

    /// Ask the policy about the current segment and check its answer.
    fn decide(&mut self, now_us: u64) -> Result<AdaptationDecision> {
        let ctx = AdaptationContext {
            segment_index: self.segment_counter,
            client_id: self.client_id,
            now_us,
            catalog: &self.catalog,
            throughput: &self.throughput,
            buffer: &self.buffer,
            last_representation: self.decided.last().copied(),
        };
        let decision = self.policy.next_representation(&ctx);

        if decision.representation > self.catalog.highest_rep_index() {
            return Err(Error::InvariantViolation(format!(
                "{} chose representation {} for segment {}, highest is {}",
                self.policy.kind(),
                decision.representation,
                decision.segment_index,
                self.catalog.highest_rep_index()
            )));
        }
        if decision.segment_index != self.segment_counter {
            return Err(Error::InvariantViolation(format!(
                "{} answered for segment {}, asked about {}",
                self.policy.kind(),
                decision.segment_index,
                self.segment_counter
            )));
        }

        if self
            .decided
            .last()
            .is_some_and(|&prev| prev != decision.representation)
        {
            self.counters.switches += 1;
        }
        self.decided.push(decision.representation);
        self.sink.record(&MetricsEvent::Adaptation {
            time: us_to_secs(decision.decided_at_us),
            segment_index: decision.segment_index,
            representation: decision.representation,
            decision_case: decision.decision_case,
            delay_case: decision.delay_case,
        });
        Ok(decision)
    }

    fn request(&mut self, io: &mut dyn ClientIo, decision: AdaptationDecision) -> Result<()> {
        if let Some(pending) = &self.outstanding {
            return Err(Error::InvariantViolation(format!(
                "client {}: segment {} requested while {} is outstanding",
                self.client_id, decision.segment_index, pending.segment_index
            )));
        }
        let bytes = self
            .catalog
            .size_of(decision.representation, decision.segment_index)?;
        let request = SegmentRequest {
            client_id: self.client_id,
            segment_index: decision.segment_index,
            representation: decision.representation,
            bytes,
        };
        self.throughput
            .record_request_sent(decision.segment_index, io.now_us());
        self.outstanding = Some(Outstanding {
            segment_index: decision.segment_index,
            representation: decision.representation,
            expected_bytes: bytes,
            received_bytes: 0,
            transfer_started: false,
        });
        io.send(&request)
    }

    fn segment_arrived(&mut self, now: u64, done: Outstanding) {
        let record = *self.throughput.record_transfer_end(
            done.segment_index,
            done.representation,
            done.expected_bytes,
            now,
        );
        self.sink.record(&MetricsEvent::Download {
            time: us_to_secs(now),
            segment_index: record.segment_index,
            representation: record.representation,
            requested_at: us_to_secs(record.requested_at_us),
            transfer_started_at: us_to_secs(record.transfer_started_at_us),
            transfer_ended_at: us_to_secs(record.transfer_ended_at_us),
            bytes: record.bytes,
        });

        let level = self.buffer.on_segment_arrived(now);
        for level_us in [level.level_old_us, level.level_new_us] {
            self.sink.record(&MetricsEvent::BufferLevel {
                time: us_to_secs(now),
                level: us_to_secs(level_us),
            });
        }
    }

    /// Run one playback step and keep the tick going if it played something.
    fn play(&mut self, io: &mut dyn ClientIo) -> TickOutcome {
        let now = io.now_us();
        self.sink.record(&MetricsEvent::BufferLevel {
            time: us_to_secs(now),
            level: us_to_secs(self.buffer.level_at(now)),
        });

        let index = self.buffer.playback_index();
        let outcome = self.buffer.tick(now);
        if outcome.underrun_started {
            self.counters.underruns += 1;
            self.record_underrun(now, true);
        }
        if outcome.underrun_cleared {
            self.record_underrun(now, false);
        }
        if outcome.consumed {
            let representation = self.decided.get(index as usize).copied().unwrap_or_default();
            self.playback_history.push(representation);
            self.counters.first_playback_us.get_or_insert(now);
            self.sink.record(&MetricsEvent::Playback {
                time: us_to_secs(now),
                playback_index: index,
                representation,
            });
            if !self.buffer.is_finished() || self.state != ControllerState::Playing {
                self.pending_tick = Some(io.schedule(
                    self.catalog.segment_duration_us(),
                    ControllerEvent::PlaybackTick,
                ));
            }
        }
        outcome
    }

    fn record_underrun(&mut self, now: u64, active: bool) {
        if active {
            self.counters.stall_started_us = Some(now);
        } else if let Some(started) = self.counters.stall_started_us.take() {
            self.counters.stall_time_us += now.saturating_sub(started);
        }
        self.sink.record(&MetricsEvent::Underrun {
            time: us_to_secs(now),
            active,
        });
    }

    fn cancel_timers(&mut self, io: &mut dyn ClientIo) {
        if let Some(id) = self.pending_tick.take() {
            io.cancel(id);
        }
        if let Some(id) = self.pending_delay.take() {
            io.cancel(id);
        }
        self.deferred = None;
    }

    fn finish(&mut self, io: &mut dyn ClientIo) {
        self.cancel_timers(io);
        self.outstanding = None;
        io.close();
        if let Err(e) = self.sink.flush() {
            warn!("client {}: flushing metrics failed: {e}", self.client_id);
        }
    }

    /// End the session after an error. Other clients are unaffected.
    fn abort(&mut self, io: &mut dyn ClientIo, err: &Error) {
        error!("client {}: session aborted: {err}", self.client_id);
        self.error = Some(err.to_string());
        let from = self.state;
        self.state = ControllerState::Terminal;
        self.transitions.push(Transition {
            at_us: io.now_us(),
            from,
            event: ControllerEvent::Stop,
            to: ControllerState::Terminal,
        });
        self.finish(io);
    }
}
