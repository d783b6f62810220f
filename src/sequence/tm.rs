use super::{Step, SUPERVISOR_RESEND_TIMEOUT};
use crate::ack::AckState;
use crate::action::ActionId;
use crate::context::Context;
use crate::scheduler::Deadline;

/// Wait for the supervisor to acknowledge the telemetry record just sent.
/// A NAK or timeout triggers one resend, after which the handshake is over.
#[derive(Debug, Clone, Default)]
pub struct TmHandshake {
    waiting: bool,
}

impl TmHandshake {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the resend timer. Call right after sending the record.
    pub fn begin(&mut self, ctx: &mut Context<'_>) -> bool {
        self.waiting = true;
        ctx.schedule(ActionId::ResendTm, Deadline::After(SUPERVISOR_RESEND_TIMEOUT))
    }

    pub fn step(&mut self, ctx: &mut Context<'_>) -> Step {
        if !self.waiting {
            return Step::Done;
        }

        let resend = match ctx.supervisor.take_tm_ack() {
            AckState::Ack => false,
            AckState::Nak => true,
            AckState::None => {
                if !ctx.consume(ActionId::ResendTm) {
                    return Step::Running;
                }
                true
            }
        };

        ctx.cancel(ActionId::ResendTm);
        if resend {
            ctx.supervisor.resend_telemetry();
        }
        self.waiting = false;
        Step::Done
    }
}
