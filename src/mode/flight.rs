use serde::{Deserialize, Serialize};

use super::{AutonomousFlight, ManualFlight, ModeHandler};
use crate::action::ActionId;
use crate::context::Context;
use crate::protocol::Severity;
use crate::sequence::Step;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlightState {
    Entry,
    TimeWait,
    Manual,
    Autonomous,
    ErrorLanding,
    ErrorLoop,
    Shutdown,
    ShutdownLoop,
    Exit,
}

/// Flight mode: waits for a time reference, then runs the manual or the
/// autonomous branch. Any error lands in `ErrorLoop`, which only the
/// operator's `ExitError` leaves.
#[derive(Debug, Clone)]
pub struct FlightMode {
    state: FlightState,
    autonomous_mode: bool,
    manual: ManualFlight,
    autonomous: AutonomousFlight,
    errors: u32,
}

impl FlightMode {
    pub fn new() -> Self {
        Self {
            state: FlightState::Entry,
            autonomous_mode: false,
            manual: ManualFlight::new(),
            autonomous: AutonomousFlight::new(),
            errors: 0,
        }
    }

    pub fn state(&self) -> FlightState {
        self.state
    }

    pub fn is_autonomous(&self) -> bool {
        self.autonomous_mode
    }

    pub fn in_error(&self) -> bool {
        matches!(self.state, FlightState::ErrorLanding | FlightState::ErrorLoop)
    }

    /// Times the error landing was entered.
    pub fn error_count(&self) -> u32 {
        self.errors
    }

    pub fn manual(&self) -> &ManualFlight {
        &self.manual
    }

    pub fn manual_mut(&mut self) -> &mut ManualFlight {
        &mut self.manual
    }

    pub fn autonomous(&self) -> &AutonomousFlight {
        &self.autonomous
    }

    /// Switch between manual and autonomous. The branch restarts from
    /// `Entry` unless flight is winding down or in its error path.
    pub fn set_autonomous(&mut self, autonomous: bool) {
        self.autonomous_mode = autonomous;
        if matches!(
            self.state,
            FlightState::TimeWait | FlightState::Manual | FlightState::Autonomous
        ) {
            self.state = FlightState::Entry;
        }
    }

    /// Returns `false` when flight is already erroring or shutting down.
    pub fn force_error(&mut self) -> bool {
        match self.state {
            FlightState::Entry | FlightState::TimeWait | FlightState::Manual | FlightState::Autonomous => {
                self.state = FlightState::ErrorLanding;
                true
            }
            _ => false,
        }
    }
}

impl Default for FlightMode {
    fn default() -> Self {
        Self::new()
    }
}

impl ModeHandler for FlightMode {
    fn enter(&mut self) {
        self.state = FlightState::Entry;
    }

    fn step(&mut self, ctx: &mut Context<'_>) {
        match self.state {
            FlightState::Entry => {
                tracing::info!(
                    "Entering FL, {}",
                    if self.autonomous_mode { "autonomous" } else { "manual" }
                );
                // a branch switch must not leave the other branch's timers armed
                self.autonomous.abandon(ctx);
                self.manual.restart();
                self.state = FlightState::TimeWait;
            }
            FlightState::TimeWait => {
                if !ctx.supervisor.time_valid() {
                    return;
                }
                if !self.autonomous_mode {
                    self.state = FlightState::Manual;
                } else if self.autonomous.restart(ctx) {
                    self.state = FlightState::Autonomous;
                } else {
                    self.state = FlightState::ErrorLanding;
                }
            }
            FlightState::Manual => {
                if self.manual.step(ctx) == Step::Error {
                    self.state = FlightState::ErrorLanding;
                }
            }
            FlightState::Autonomous => {
                if self.autonomous.step(ctx) == Step::Error {
                    self.state = FlightState::ErrorLanding;
                }
            }
            FlightState::ErrorLanding => {
                self.errors += 1;
                self.autonomous.abandon(ctx);
                self.manual.restart();
                ctx.cancel(ActionId::ResendMotionCommand);
                ctx.cancel(ActionId::MotionTimeout);
                let _ = ctx.mcb.go_low_power();
                tracing::warn!("FL error landing, waiting for ExitError");
                self.state = FlightState::ErrorLoop;
            }
            FlightState::ErrorLoop => {
                if ctx.consume(ActionId::ExitError) {
                    ctx.report(Severity::Nominal, "Exiting FL error loop");
                    self.state = FlightState::Entry;
                }
            }
            FlightState::Shutdown => {
                tracing::info!("Shutdown warning received in FL");
                self.autonomous.abandon(ctx);
                let _ = ctx.mcb.go_low_power();
                self.state = FlightState::ShutdownLoop;
            }
            FlightState::ShutdownLoop => {}
            FlightState::Exit => {
                self.autonomous.abandon(ctx);
                tracing::info!("Exiting FL");
            }
        }
    }

    fn force_exit(&mut self) {
        self.state = FlightState::Exit;
    }

    fn force_shutdown(&mut self) {
        self.state = FlightState::Shutdown;
    }

    fn substate(&self) -> alloc::string::String {
        format!("{:?}", self.state)
    }
}
