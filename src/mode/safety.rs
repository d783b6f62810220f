use serde::{Deserialize, Serialize};

use super::ModeHandler;
use crate::ack::AckState;
use crate::action::ActionId;
use crate::context::Context;
use crate::protocol::Severity;
use crate::scheduler::Deadline;
use crate::sequence::{ResendGuard, SUPERVISOR_RESEND_TIMEOUT};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SafetyState {
    Entry,
    SendNotice,
    AckWait,
    Loop,
    Shutdown,
    Exit,
}

/// Assert the SAFE discrete and tell the supervisor the PIB is safed.
///
/// A NAK restarts the acknowledgment wait. A timeout resends the notice
/// once; a second timeout leaves the mode safed without an acknowledgment.
#[derive(Debug, Clone)]
pub struct SafetyMode {
    state: SafetyState,
    resend: ResendGuard,
}

impl SafetyMode {
    pub fn new() -> Self {
        Self {
            state: SafetyState::Entry,
            resend: ResendGuard::new(),
        }
    }

    pub fn state(&self) -> SafetyState {
        self.state
    }

    fn arm_wait(&mut self, ctx: &mut Context<'_>) {
        if ctx.schedule(ActionId::ResendSafety, Deadline::After(SUPERVISOR_RESEND_TIMEOUT)) {
            self.state = SafetyState::AckWait;
        } else {
            self.state = SafetyState::Loop;
        }
    }
}

impl Default for SafetyMode {
    fn default() -> Self {
        Self::new()
    }
}

impl ModeHandler for SafetyMode {
    fn enter(&mut self) {
        self.state = SafetyState::Entry;
        self.resend.reset();
    }

    fn step(&mut self, ctx: &mut Context<'_>) {
        match self.state {
            SafetyState::Entry => {
                tracing::info!("Entering SA");
                ctx.discretes.set_safe_signal(true);
                self.resend.reset();
                self.state = SafetyState::SendNotice;
            }
            SafetyState::SendNotice => {
                ctx.supervisor.send_safety_notice();
                self.arm_wait(ctx);
            }
            SafetyState::AckWait => match ctx.supervisor.take_safety_ack() {
                AckState::Ack => {
                    ctx.cancel(ActionId::ResendSafety);
                    tracing::info!("Safety notice acknowledged");
                    self.state = SafetyState::Loop;
                }
                AckState::Nak => {
                    tracing::warn!("Safety notice NAK, waiting again");
                    self.arm_wait(ctx);
                }
                AckState::None => {
                    if ctx.consume(ActionId::ResendSafety) {
                        if self.resend.retry() {
                            self.state = SafetyState::SendNotice;
                        } else {
                            ctx.report(Severity::Warning, "Safety notice never acknowledged");
                            self.state = SafetyState::Loop;
                        }
                    }
                }
            },
            SafetyState::Loop => {}
            SafetyState::Shutdown => {
                tracing::info!("Shutdown warning received in SA");
                self.state = SafetyState::Loop;
            }
            SafetyState::Exit => {
                ctx.cancel(ActionId::ResendSafety);
                ctx.discretes.set_safe_signal(false);
                tracing::info!("Exiting SA");
            }
        }
    }

    fn force_exit(&mut self) {
        self.state = SafetyState::Exit;
    }

    fn force_shutdown(&mut self) {
        self.state = SafetyState::Shutdown;
    }

    fn substate(&self) -> alloc::string::String {
        format!("{:?}", self.state)
    }
}
