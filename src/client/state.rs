use std::fmt;

use serde::Serialize;

/// Where a streaming client is in its session.
///
/// `Downloading` is the stalled state: a request is outstanding and
/// playback is not running. `Playing` has no request outstanding, either
/// because a policy delay is pending or because every segment is in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    #[default]
    Initial,
    Downloading,
    DownloadingPlaying,
    Playing,
    Terminal,
}

impl ControllerState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, ControllerState::Terminal)
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ControllerState::Initial => "initial",
            ControllerState::Downloading => "downloading",
            ControllerState::DownloadingPlaying => "downloading-playing",
            ControllerState::Playing => "playing",
            ControllerState::Terminal => "terminal",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ControllerEvent {
    /// Connection established.
    Init,
    /// One segment duration of playback elapsed.
    PlaybackTick,
    /// The outstanding segment arrived in full.
    DownloadComplete,
    /// A policy-requested delay ran out.
    DelayElapsed,
    /// External cancellation.
    Stop,
}

impl fmt::Display for ControllerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ControllerEvent::Init => "init",
            ControllerEvent::PlaybackTick => "playback-tick",
            ControllerEvent::DownloadComplete => "download-complete",
            ControllerEvent::DelayElapsed => "delay-elapsed",
            ControllerEvent::Stop => "stop",
        })
    }
}

/// One state change, kept for inspection after a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub at_us: u64,
    pub from: ControllerState,
    pub event: ControllerEvent,
    pub to: ControllerState,
}
