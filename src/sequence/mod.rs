//! Nested sequencers used by the flight sub-machines.
//!
//! Each sequencer owns its own state and exposes `restart` and `step`.
//! A step does one unit of work and never blocks; waits are expressed by
//! staying in a state until a flag or device fact changes.

pub mod check_pu;
pub mod manual_motion;
pub mod motion;
pub mod profile;
pub mod ra;
pub mod records;
pub mod redock;
pub mod tm;

pub use check_pu::CheckPu;
pub use manual_motion::ManualMotion;
pub use motion::{MotionDriver, MotionOutcome};
pub use profile::{ProfileSequencer, ProfileState};
pub use ra::RaHandshake;
pub use records::{RecordFetch, RecordKind};
pub use redock::Redock;
pub use tm::TmHandshake;

use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::protocol::Severity;
use crate::telemetry::TelemetryKind;

pub const SUPERVISOR_RESEND_TIMEOUT: u32 = 60;
pub const MCB_RESEND_TIMEOUT: u32 = 30;
pub const PU_RESEND_TIMEOUT: u32 = 30;

/// Result of one sequencer step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Step {
    Running,
    Done,
    /// Gave up after the resend budget; the caller returns to a safe wait.
    Aborted,
    /// The owning mode must take its error path.
    Error,
}

/// Exactly one resend per request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResendGuard {
    attempted: bool,
}

impl ResendGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` the first time after a reset, `false` afterwards.
    pub fn retry(&mut self) -> bool {
        if self.attempted {
            false
        } else {
            self.attempted = true;
            true
        }
    }

    pub fn attempted(&self) -> bool {
        self.attempted
    }

    pub fn reset(&mut self) {
        self.attempted = false;
    }
}

pub(crate) fn send_motion_tm(ctx: &mut Context<'_>, summary: &str) {
    let payload = ctx.mcb.motion_telemetry().as_bytes();
    ctx.supervisor
        .send_telemetry(TelemetryKind::Motion, Severity::Nominal, summary, payload);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resend_guard_allows_one() {
        let mut guard = ResendGuard::new();
        assert!(guard.retry());
        assert!(!guard.retry());
        assert!(!guard.retry());
        guard.reset();
        assert!(guard.retry());
    }
}
