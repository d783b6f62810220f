use super::{ResendGuard, Step, SUPERVISOR_RESEND_TIMEOUT};
use crate::ack::AckState;
use crate::action::ActionId;
use crate::context::Context;
use crate::protocol::Severity;
use crate::scheduler::Deadline;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RaState {
    Send,
    Wait,
}

/// Request-authorization handshake with the supervisor. A NAK and a
/// timeout both spend the single resend.
#[derive(Debug, Clone)]
pub struct RaHandshake {
    state: RaState,
    resend: ResendGuard,
}

impl RaHandshake {
    pub fn new() -> Self {
        Self {
            state: RaState::Send,
            resend: ResendGuard::new(),
        }
    }

    pub fn restart(&mut self) {
        self.state = RaState::Send;
        self.resend.reset();
    }

    pub fn step(&mut self, ctx: &mut Context<'_>) -> Step {
        match self.state {
            RaState::Send => {
                ctx.supervisor.request_authorization();
                if !ctx.schedule(ActionId::ResendRa, Deadline::After(SUPERVISOR_RESEND_TIMEOUT)) {
                    return Step::Error;
                }
                self.state = RaState::Wait;
                Step::Running
            }
            RaState::Wait => match ctx.supervisor.take_ra_ack() {
                AckState::Ack => {
                    ctx.cancel(ActionId::ResendRa);
                    tracing::info!("RA ACK");
                    Step::Done
                }
                AckState::Nak => self.retry_or_abort(ctx, "Cannot perform motion, RA NAK"),
                AckState::None => {
                    if ctx.consume(ActionId::ResendRa) {
                        self.retry_or_abort(ctx, "Never received RA ACK")
                    } else {
                        Step::Running
                    }
                }
            },
        }
    }

    fn retry_or_abort(&mut self, ctx: &mut Context<'_>, reason: &str) -> Step {
        ctx.cancel(ActionId::ResendRa);
        if self.resend.retry() {
            self.state = RaState::Send;
            Step::Running
        } else {
            ctx.report(Severity::Warning, reason);
            self.restart();
            Step::Aborted
        }
    }
}

impl Default for RaHandshake {
    fn default() -> Self {
        Self::new()
    }
}
