use crate::action::{ActionId, ActionRegistry};
use crate::config::{ConfigField, ConfigValue, PibConfig, Settings};
use crate::hardware::Discretes;
use crate::protocol::Severity;
use crate::scheduler::{ActionScheduler, Deadline};
use crate::session::{McbSession, PuSession};
use crate::supervisor::SupervisorLink;

/// Everything a mode or sequencer step may touch, borrowed for one tick.
pub struct Context<'a> {
    pub now_ms: u64,
    pub actions: &'a mut ActionRegistry,
    pub scheduler: &'a mut ActionScheduler,
    pub mcb: &'a mut McbSession,
    pub pu: &'a mut PuSession,
    pub supervisor: &'a mut SupervisorLink,
    pub settings: &'a mut dyn Settings,
    pub discretes: &'a mut dyn Discretes,
}

impl Context<'_> {
    /// Fresh read of the configuration. Never hold on to it across ticks.
    pub fn config(&self) -> PibConfig {
        self.settings.snapshot()
    }

    pub fn consume(&mut self, action: ActionId) -> bool {
        self.actions.consume(action)
    }

    /// Arm a timer. A full table is reported as critical and returns `false`;
    /// the caller must take its error path.
    pub fn schedule(&mut self, action: ActionId, deadline: Deadline) -> bool {
        match self.scheduler.schedule(action, deadline) {
            Ok(()) => true,
            Err(e) => {
                self.supervisor
                    .report(Severity::Critical, &format!("Unable to schedule {:?}: {}", action, e));
                false
            }
        }
    }

    pub fn cancel(&mut self, action: ActionId) {
        self.scheduler.cancel(action);
    }

    pub fn epoch(&self) -> Option<u32> {
        self.supervisor.epoch(self.now_ms)
    }

    pub fn report(&mut self, severity: Severity, message: &str) {
        self.supervisor.report(severity, message);
    }

    /// Write a setting the core owns (trigger disarm, dock state). A failure
    /// here is a store fault, reported as a warning.
    pub fn write_setting(&mut self, field: ConfigField, value: ConfigValue) {
        if let Err(e) = self.settings.write(field, value) {
            self.supervisor
                .report(Severity::Warning, &format!("Error setting {:?}: {}", field, e));
        }
    }

    /// PU seated on the dock: mark it and power it for charging.
    pub fn pu_docked(&mut self) {
        self.write_setting(ConfigField::PuDocked, ConfigValue::Bool(true));
        self.discretes.set_pu_power(true);
    }

    /// PU leaving the dock: mark it and cut dock power.
    pub fn pu_undocked(&mut self) {
        self.write_setting(ConfigField::PuDocked, ConfigValue::Bool(false));
        self.discretes.set_pu_power(false);
    }
}
