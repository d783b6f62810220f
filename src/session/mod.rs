//! Device sessions: one per serial link.
//!
//! A session drains its transport, classifies every frame as ASCII,
//! acknowledgment or binary, and keeps the facts the mode engine reads.
//! Only the session writes those facts.

pub mod mcb;
pub mod pu;

use heapless::Vec;
use thiserror::Error;

use crate::protocol::{Device, LogText, MAX_FRAMES_PER_TICK};

pub use mcb::{McbSession, MotionCommand, MotionKind};
pub use pu::{PuSession, PuStatus};

/// Noteworthy things that happened while draining a link.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    MotionStarted(MotionKind),
    MotionFinished,
    DockDetected,
    LowPower,
    PuStatus(PuStatus),
    TsenReceived,
    ProfileRecordReceived,
    NoMoreRecords,
    /// Fault reported by the device itself. Forces the owning mode into its error path.
    DeviceFault { device: Device, detail: LogText },
    /// Frame the core could not use. Logged and reported, never applied.
    ProtocolFault { device: Device, detail: LogText },
}

/// Both sessions drain into one queue per tick and each frame yields at most
/// one event, so the queue holds every event a tick can produce.
pub const MAX_EVENTS_PER_TICK: usize = 2 * MAX_FRAMES_PER_TICK;

pub type SessionEvents = Vec<SessionEvent, MAX_EVENTS_PER_TICK>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("motion commanded while motion ongoing")]
    MotionOngoing,
    #[error("no motion selected")]
    NoMotion,
    #[error("invalid motion parameters")]
    InvalidMotion,
    #[error("{0} link refused the command")]
    SendFailed(Device),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_received: u32,
    pub ascii_frames: u32,
    pub ack_frames: u32,
    pub binary_frames: u32,
    pub commands_sent: u32,
    pub send_failures: u32,
    pub unexpected_acks: u32,
    pub rejected_frames: u32,
}

pub(crate) fn push_event(events: &mut SessionEvents, event: SessionEvent) {
    if events.push(event).is_err() {
        tracing::error!("Session event queue full, event dropped");
    }
}
