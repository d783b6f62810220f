use super::{ResendGuard, Step, PU_RESEND_TIMEOUT};
use crate::action::ActionId;
use crate::context::Context;
use crate::protocol::Severity;
use crate::scheduler::Deadline;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CheckState {
    Entry,
    Wait,
}

/// Ask the PU for a status frame and wait for a new one to arrive.
///
/// A fresh status is detected by the session's status counter moving, so an
/// unparseable status still proves the PU is on the dock link.
#[derive(Debug, Clone)]
pub struct CheckPu {
    state: CheckState,
    resend: ResendGuard,
    last_count: u32,
}

impl CheckPu {
    pub fn new() -> Self {
        Self {
            state: CheckState::Entry,
            resend: ResendGuard::new(),
            last_count: 0,
        }
    }

    pub fn restart(&mut self) {
        self.state = CheckState::Entry;
        self.resend.reset();
    }

    pub fn step(&mut self, ctx: &mut Context<'_>) -> Step {
        match self.state {
            CheckState::Entry => {
                self.last_count = ctx.pu.status_count();
                self.request(ctx)
            }
            CheckState::Wait => {
                if ctx.pu.status_count() != self.last_count {
                    ctx.cancel(ActionId::ResendPuCheck);
                    let status = ctx.pu.status();
                    ctx.report(Severity::Nominal, &format!("PU status: {}", status));
                    self.restart();
                    return Step::Done;
                }

                if !ctx.consume(ActionId::ResendPuCheck) {
                    return Step::Running;
                }

                if self.resend.retry() {
                    self.request(ctx)
                } else {
                    ctx.report(Severity::Warning, "PU not responding to status request");
                    self.restart();
                    Step::Aborted
                }
            }
        }
    }

    fn request(&mut self, ctx: &mut Context<'_>) -> Step {
        // a refused send is covered by the resend timer
        let _ = ctx.pu.request_status();
        if !ctx.schedule(ActionId::ResendPuCheck, Deadline::After(PU_RESEND_TIMEOUT)) {
            return Step::Error;
        }
        self.state = CheckState::Wait;
        Step::Running
    }
}

impl Default for CheckPu {
    fn default() -> Self {
        Self::new()
    }
}
