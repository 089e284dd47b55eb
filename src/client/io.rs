//! What a controller needs from the world around it.

use network_sim::TimerId;

use super::state::ControllerEvent;
use crate::error::Result;

/// A request for one segment at one representation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegmentRequest {
    pub client_id: u32,
    pub segment_index: u64,
    pub representation: usize,
    /// Size the server will send back.
    pub bytes: u64,
}

/// Clock, timers and transport for one client.
///
/// Passed into every controller call rather than stored, so the driver can
/// lend out its event queue for the duration of one dispatch.
pub trait ClientIo {
    fn now_us(&self) -> u64;

    /// Deliver `event` back to this client `delay_us` from now.
    fn schedule(&mut self, delay_us: u64, event: ControllerEvent) -> TimerId;

    fn cancel(&mut self, id: TimerId);

    /// Open the connection. `ControllerEvent::Init` is delivered once it is up.
    fn connect(&mut self) -> Result<()>;

    fn send(&mut self, request: &SegmentRequest) -> Result<()>;

    fn close(&mut self);
}
