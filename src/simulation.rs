//! Discrete-event driver for one simulation run.
//!
//! Every client sits behind the same bottleneck link. A request travels to
//! the server in one one-way delay, the response is pushed through the
//! shared link, and every chunk that leaves the link reaches its client one
//! one-way delay later. Connection setup takes one round trip.

use std::fs::File;
use std::io::BufWriter;
use std::sync::Arc;

use anyhow::{Context, Result};
use network_sim::{DataRate, EventQueue, FlowId, SharedLink, TimerId};
use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use crate::catalog::SegmentCatalog;
use crate::client::{ClientIo, ControllerEvent, SegmentRequest, StreamController};
use crate::config::{
    CLIENT_START_US, LIVE_APPLY_DELAY_US, LIVE_POLL_INTERVAL_US, SimulationConfig,
    parse_client_batches,
};
use crate::error::Error;
use crate::events::{ControlCommand, EventLog, LiveControlFile, ScheduledCommand, parse_event_schedule};
use crate::metrics::{CsvLogSink, JsonLinesSink, MultiSink};
use crate::stats::{RunSummary, StopReason};
use crate::utils::us_to_secs;

#[derive(Debug, Clone, Copy)]
enum SimEvent {
    ClientStart(usize),
    Client { client: usize, event: ControllerEvent },
    /// A segment request reached the server.
    RequestArrived { client: usize, bytes: u64 },
    /// The link reached its next chunk boundary.
    LinkService,
    /// A chunk reached its client.
    Deliver { client: usize, bytes: u64 },
    Command(ControlCommand),
    PollLive,
}

/// Clock, timers and transport lent to one controller for one dispatch.
struct SimClientIo<'a> {
    queue: &'a mut EventQueue<SimEvent>,
    client: usize,
    one_way_us: u64,
    closed: &'a mut bool,
}

impl ClientIo for SimClientIo<'_> {
    fn now_us(&self) -> u64 {
        self.queue.now_us()
    }

    fn schedule(&mut self, delay_us: u64, event: ControllerEvent) -> TimerId {
        self.queue.schedule_in(
            delay_us,
            SimEvent::Client {
                client: self.client,
                event,
            },
        )
    }

    fn cancel(&mut self, id: TimerId) {
        self.queue.cancel(id);
    }

    fn connect(&mut self) -> crate::error::Result<()> {
        if *self.closed {
            return Err(Error::Connect(format!("client {}: transport closed", self.client)));
        }
        self.queue.schedule_in(
            2 * self.one_way_us,
            SimEvent::Client {
                client: self.client,
                event: ControllerEvent::Init,
            },
        );
        Ok(())
    }

    fn send(&mut self, request: &SegmentRequest) -> crate::error::Result<()> {
        if *self.closed {
            return Err(Error::Connect(format!(
                "client {}: send on closed transport",
                self.client
            )));
        }
        self.queue.schedule_in(
            self.one_way_us,
            SimEvent::RequestArrived {
                client: self.client,
                bytes: request.bytes,
            },
        );
        Ok(())
    }

    fn close(&mut self) {
        *self.closed = true;
    }
}

struct ClientSlot {
    controller: StreamController,
    closed: bool,
    flow: Option<FlowId>,
}

pub struct Simulation {
    config: SimulationConfig,
    queue: EventQueue<SimEvent>,
    link: SharedLink,
    clients: Vec<ClientSlot>,
    flows: FxHashMap<FlowId, usize>,
    service_timer: Option<TimerId>,
    event_log: Option<EventLog<BufWriter<File>>>,
    live: Option<LiveControlFile>,
    bottleneck_changes: u64,
}

impl Simulation {
    pub fn new(config: SimulationConfig) -> Self {
        let link = SharedLink::new(config.bottleneck_rate, config.chunk_bytes);
        Self {
            config,
            queue: EventQueue::new(),
            link,
            clients: Vec::new(),
            flows: FxHashMap::default(),
            service_timer: None,
            event_log: None,
            live: None,
            bottleneck_changes: 0,
        }
    }

    /// Add a client; it connects at [`CLIENT_START_US`].
    pub fn add_client(&mut self, controller: StreamController) -> usize {
        let idx = self.clients.len();
        self.clients.push(ClientSlot {
            controller,
            closed: false,
            flow: None,
        });
        self.queue.schedule_at(CLIENT_START_US, SimEvent::ClientStart(idx));
        idx
    }

    pub fn schedule(&mut self, command: ScheduledCommand) {
        self.queue
            .schedule_at(command.at_us, SimEvent::Command(command.command));
    }

    pub fn set_event_log(&mut self, log: EventLog<BufWriter<File>>) {
        self.event_log = Some(log);
    }

    /// Poll `live` every simulated second for commands.
    pub fn set_live_control(&mut self, live: LiveControlFile) {
        self.live = Some(live);
        self.queue.schedule_at(0, SimEvent::PollLive);
    }

    pub fn controllers(&self) -> impl Iterator<Item = &StreamController> {
        self.clients.iter().map(|slot| &slot.controller)
    }

    pub fn now_us(&self) -> u64 {
        self.queue.now_us()
    }

    /// Run until every client is done, `EndSimulation` arrives, or the stop
    /// time passes.
    pub fn run(&mut self) -> RunSummary {
        let initial_rate = self.link.rate();
        self.log_event("BottleneckRate", initial_rate);
        let reason = loop {
            if self.clients.iter().all(|c| c.controller.is_terminal()) {
                break StopReason::AllClientsFinished;
            }
            let Some(next) = self.queue.peek_time() else {
                break StopReason::QueueDrained;
            };
            if self.config.stop_time_us.is_some_and(|stop| next > stop) {
                break StopReason::StopTime;
            }
            let Some(scheduled) = self.queue.pop() else {
                break StopReason::QueueDrained;
            };
            if self.handle(scheduled.event) {
                break StopReason::EndSimulation;
            }
        };

        for idx in 0..self.clients.len() {
            self.with_client(idx, |controller, io| {
                controller.stop(io);
                Ok(())
            });
        }
        if let Some(log) = self.event_log.as_mut()
            && let Err(e) = log.flush()
        {
            warn!("flushing event log: {e}");
        }

        info!(
            "simulation {} stopped at {:.3}s: {:?}",
            self.config.simulation_id,
            us_to_secs(self.queue.now_us()),
            reason
        );
        RunSummary {
            simulation_id: self.config.simulation_id,
            simulation_name: self.config.simulation_name.clone(),
            number_of_clients: self.config.number_of_clients,
            ended_at_s: us_to_secs(self.queue.now_us()),
            stop_reason: reason,
            bottleneck_changes: self.bottleneck_changes,
            finished_at_ms: chrono::Utc::now().timestamp_millis() as u64,
            clients: self.controllers().map(StreamController::stats).collect(),
        }
    }

    /// Returns true if the run should end.
    fn handle(&mut self, event: SimEvent) -> bool {
        let now = self.queue.now_us();
        match event {
            SimEvent::ClientStart(idx) => {
                self.with_client(idx, |controller, io| controller.start(io));
            }
            SimEvent::Client { client, event } => {
                self.with_client(client, |controller, io| controller.handle_event(io, event));
            }
            SimEvent::RequestArrived { client, bytes } => {
                if self.clients[client].closed {
                    debug!("client {client}: dropping request on closed connection");
                } else {
                    let flow = self.link.start_flow(now, bytes);
                    self.flows.insert(flow, client);
                    self.clients[client].flow = Some(flow);
                    self.reschedule_service();
                }
            }
            SimEvent::LinkService => {
                self.service_timer = None;
                let one_way_us = self.config.one_way_delay_us();
                for delivery in self.link.service(now) {
                    let Some(&client) = self.flows.get(&delivery.flow) else {
                        continue;
                    };
                    if delivery.finished {
                        self.flows.remove(&delivery.flow);
                        self.clients[client].flow = None;
                    }
                    self.queue.schedule_in(
                        one_way_us,
                        SimEvent::Deliver {
                            client,
                            bytes: delivery.bytes,
                        },
                    );
                }
                self.reschedule_service();
            }
            SimEvent::Deliver { client, bytes } => {
                self.with_client(client, |controller, io| controller.on_receive(io, bytes));
            }
            SimEvent::Command(ControlCommand::BottleneckRate(rate)) => {
                self.set_bottleneck_rate(rate);
            }
            SimEvent::Command(ControlCommand::EndSimulation) => {
                info!("EndSimulation at {:.3}s", us_to_secs(now));
                self.log_event("EndSimulation", 1);
                return true;
            }
            SimEvent::PollLive => {
                let commands = self.live.as_mut().map(LiveControlFile::poll).unwrap_or_default();
                for command in commands {
                    match command {
                        ControlCommand::EndSimulation => {
                            info!("EndSimulation requested live at {:.3}s", us_to_secs(now));
                            self.log_event("EndSimulation", 1);
                            return true;
                        }
                        other => {
                            self.queue
                                .schedule_in(LIVE_APPLY_DELAY_US, SimEvent::Command(other));
                        }
                    }
                }
                self.queue.schedule_in(LIVE_POLL_INTERVAL_US, SimEvent::PollLive);
            }
        }
        false
    }

    /// Lend client `idx` its I/O for one call, then release its flow if the
    /// call left it terminal.
    fn with_client<F>(&mut self, idx: usize, f: F)
    where
        F: FnOnce(&mut StreamController, &mut SimClientIo<'_>) -> crate::error::Result<()>,
    {
        let one_way_us = self.config.one_way_delay_us();
        let slot = &mut self.clients[idx];
        let mut io = SimClientIo {
            queue: &mut self.queue,
            client: idx,
            one_way_us,
            closed: &mut slot.closed,
        };
        if let Err(e) = f(&mut slot.controller, &mut io) {
            // the controller already logged the abort
            if e.is_mid_session() {
                debug!("client {idx}: {e}");
            } else {
                warn!("client {idx}: {e}");
            }
        }
        if slot.controller.is_terminal()
            && let Some(flow) = slot.flow.take()
        {
            let now = self.queue.now_us();
            self.link.abort_flow(now, flow);
            self.flows.remove(&flow);
            self.reschedule_service();
        }
    }

    fn set_bottleneck_rate(&mut self, rate: DataRate) {
        let now = self.queue.now_us();
        info!("bottleneck rate {} -> {} at {:.3}s", self.link.rate(), rate, us_to_secs(now));
        self.link.set_rate(now, rate);
        self.bottleneck_changes += 1;
        self.log_event("BottleneckRate", rate);
        self.reschedule_service();
    }

    fn reschedule_service(&mut self) {
        if let Some(id) = self.service_timer.take() {
            self.queue.cancel(id);
        }
        if let Some(at) = self.link.next_event_us() {
            self.service_timer = Some(self.queue.schedule_at(at, SimEvent::LinkService));
        }
    }

    fn log_event(&mut self, event: &str, value: impl std::fmt::Display) {
        let now = self.queue.now_us();
        if let Some(log) = self.event_log.as_mut()
            && let Err(e) = log.log(now, event, value)
        {
            warn!("writing event log: {e}");
        }
    }
}

/// Run one simulation from the files in its run directory.
///
/// Reads `sim{id}_clients.txt` and, if present, `sim{id}_event_schedule.txt`;
/// writes one log per client, the event log and `sim{id}_summary.json`.
pub fn run_simulation(config: &SimulationConfig) -> Result<RunSummary> {
    config.validate()?;
    let layout = config.layout();
    std::fs::create_dir_all(layout.run_dir())
        .with_context(|| format!("create {}", layout.run_dir().display()))?;

    let clients_path = layout.clients_file();
    let clients_text = std::fs::read_to_string(&clients_path)
        .with_context(|| format!("read client file {}", clients_path.display()))?;
    let batches = parse_client_batches(&clients_path.display().to_string(), &clients_text);
    let sessions = batches.sessions(&config.video_dir, config.number_of_clients)?;

    let mut sim = Simulation::new(config.clone());
    let mut catalogs: FxHashMap<(std::path::PathBuf, u64), Arc<SegmentCatalog>> =
        FxHashMap::default();
    for session in &sessions {
        let key = (session.catalog_path.clone(), session.segment_duration_us);
        let catalog = match catalogs.get(&key) {
            Some(catalog) => catalog.clone(),
            None => {
                let catalog = Arc::new(
                    SegmentCatalog::load(&session.catalog_path, session.segment_duration_us)
                        .with_context(|| format!("client {}", session.client_id))?,
                );
                catalogs.insert(key, catalog.clone());
                catalog
            }
        };

        let mut sink = MultiSink::new();
        sink.push(Box::new(CsvLogSink::create(
            &layout.client_log(session.client_id, session.policy),
        )?));
        if config.json_metrics {
            sink.push(Box::new(JsonLinesSink::create(
                &layout.client_json_log(session.client_id, session.policy),
            )?));
        }
        sim.add_client(StreamController::from_config(session, catalog, Box::new(sink)));
    }

    let schedule_path = layout.event_schedule_file();
    match std::fs::read_to_string(&schedule_path) {
        Ok(text) => {
            let schedule = parse_event_schedule(&schedule_path.display().to_string(), &text);
            for command in schedule.commands {
                sim.schedule(command);
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("no event schedule at {}", schedule_path.display());
        }
        Err(e) => {
            return Err(e).with_context(|| format!("read {}", schedule_path.display()));
        }
    }

    sim.set_event_log(EventLog::create(&layout.event_log_file())?);
    if config.live_inputs {
        sim.set_live_control(LiveControlFile::new(layout.live_events_file()));
    }

    info!(
        "simulation {} ({}): {} clients, bottleneck {}",
        config.simulation_id, config.simulation_name, config.number_of_clients, config.bottleneck_rate
    );
    let summary = sim.run();
    summary.write(&layout.summary_file())?;
    Ok(summary)
}
