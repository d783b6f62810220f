pub mod autonomous;
pub mod end_of_flight;
pub mod flight;
pub mod low_power;
pub mod manual;
pub mod safety;
pub mod standby;

pub use autonomous::{AutonomousFlight, AutonomousState};
pub use end_of_flight::EndOfFlightMode;
pub use flight::{FlightMode, FlightState};
pub use low_power::LowPowerMode;
pub use manual::{ManualFlight, ManualState};
pub use safety::{SafetyMode, SafetyState};
pub use standby::StandbyMode;

use serde::{Deserialize, Serialize};

use crate::context::Context;

/// Top-level operating mode, selected by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    Standby,
    Flight,
    LowPower,
    Safety,
    EndOfFlight,
}

/// Substates shared by the simple modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BasicState {
    Entry,
    Loop,
    Shutdown,
    Exit,
}

pub trait ModeHandler {
    /// Reset to the entry substate.
    fn enter(&mut self);
    /// One unit of work for the current substate.
    fn step(&mut self, ctx: &mut Context<'_>);
    fn force_exit(&mut self);
    fn force_shutdown(&mut self);
    fn substate(&self) -> alloc::string::String;
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ModeStats {
    pub transitions: u32,
    pub steps: u64,
    pub shutdowns: u32,
}

/// Runs exactly one mode at a time.
///
/// A mode change requested by the supervisor is applied on the next step:
/// the old mode is forced to its exit substate (its shutdown substate when a
/// shutdown warning is pending) and stepped once, then the new mode is entered
/// and stepped once.
#[derive(Debug)]
pub struct ModeEngine {
    current: Mode,
    requested: Option<Mode>,
    shutdown_pending: bool,
    standby: StandbyMode,
    flight: FlightMode,
    low_power: LowPowerMode,
    safety: SafetyMode,
    end_of_flight: EndOfFlightMode,
    stats: ModeStats,
}

impl ModeEngine {
    pub fn new(initial: Mode) -> Self {
        Self {
            current: initial,
            requested: None,
            shutdown_pending: false,
            standby: StandbyMode::new(),
            flight: FlightMode::new(),
            low_power: LowPowerMode::new(),
            safety: SafetyMode::new(),
            end_of_flight: EndOfFlightMode::new(),
            stats: ModeStats::default(),
        }
    }

    pub fn current(&self) -> Mode {
        self.current
    }

    pub fn request_mode(&mut self, mode: Mode) {
        if mode == self.current && self.requested.is_none() {
            tracing::debug!("Already in {:?}", mode);
            return;
        }
        self.requested = Some(mode);
    }

    pub fn shutdown_warning(&mut self) {
        self.shutdown_pending = true;
    }

    /// Send the flight mode to its error path. Other modes have none.
    pub fn force_error(&mut self) -> bool {
        if self.current == Mode::Flight {
            self.flight.force_error()
        } else {
            false
        }
    }

    pub fn flight(&self) -> &FlightMode {
        &self.flight
    }

    pub fn flight_mut(&mut self) -> &mut FlightMode {
        &mut self.flight
    }

    pub fn safety(&self) -> &SafetyMode {
        &self.safety
    }

    pub fn substate(&self) -> alloc::string::String {
        self.handler(self.current).substate()
    }

    pub fn get_stats(&self) -> &ModeStats {
        &self.stats
    }

    fn handler(&self, mode: Mode) -> &dyn ModeHandler {
        match mode {
            Mode::Standby => &self.standby,
            Mode::Flight => &self.flight,
            Mode::LowPower => &self.low_power,
            Mode::Safety => &self.safety,
            Mode::EndOfFlight => &self.end_of_flight,
        }
    }

    fn handler_mut(&mut self, mode: Mode) -> &mut dyn ModeHandler {
        match mode {
            Mode::Standby => &mut self.standby,
            Mode::Flight => &mut self.flight,
            Mode::LowPower => &mut self.low_power,
            Mode::Safety => &mut self.safety,
            Mode::EndOfFlight => &mut self.end_of_flight,
        }
    }

    pub fn step(&mut self, ctx: &mut Context<'_>) {
        self.stats.steps += 1;

        if let Some(next) = self.requested.take() {
            if next != self.current {
                tracing::info!("Mode change {:?} -> {:?}", self.current, next);
                let shutdown = core::mem::take(&mut self.shutdown_pending);
                if shutdown {
                    self.stats.shutdowns += 1;
                }
                let old = self.handler_mut(self.current);
                if shutdown {
                    old.force_shutdown();
                } else {
                    old.force_exit();
                }
                old.step(ctx);

                self.current = next;
                self.stats.transitions += 1;
                let new = self.handler_mut(next);
                new.enter();
                new.step(ctx);
                return;
            }
        }

        if self.shutdown_pending {
            self.shutdown_pending = false;
            self.stats.shutdowns += 1;
            self.handler_mut(self.current).force_shutdown();
        }

        self.handler_mut(self.current).step(ctx);
    }
}

impl Default for ModeEngine {
    fn default() -> Self {
        Self::new(Mode::Standby)
    }
}
