use serde::{Deserialize, Serialize};

use crate::action::ActionId;
use crate::config::{ConfigField, ConfigValue};
use crate::context::Context;
use crate::protocol::Severity;
use crate::scheduler::Deadline;
use crate::sequence::{ProfileSequencer, RecordFetch, Step};

/// Delay between the trigger and the first profile.
pub const PROFILE_START_DELAY_MS: u64 = 5_000;
/// TSEN records are requested on the quarter hour.
pub const TSEN_PERIOD_SECS: u32 = 900;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AutonomousState {
    Idle,
    ProfileWait,
    Profile,
    Tsen,
}

/// Trigger evaluation and the scheduled series of profiles.
///
/// `BeginProfile` and `RequestTsen` are latched in every state so a timer
/// firing during a long profile is not lost to staleness.
#[derive(Debug, Clone)]
pub struct AutonomousFlight {
    state: AutonomousState,
    profile: ProfileSequencer,
    tsen: RecordFetch,
    profiles_remaining: u8,
    profiles_scheduled: u8,
    trigger_ms: Option<u64>,
    begin_pending: bool,
    tsen_pending: bool,
    sza_armed: bool,
}

impl AutonomousFlight {
    pub fn new() -> Self {
        Self {
            state: AutonomousState::Idle,
            profile: ProfileSequencer::new(),
            tsen: RecordFetch::tsen(),
            profiles_remaining: 0,
            profiles_scheduled: 0,
            trigger_ms: None,
            begin_pending: false,
            tsen_pending: false,
            sza_armed: true,
        }
    }

    /// Re-enter the idle state, keeping the SZA arm. Returns `false` when
    /// the periodic TSEN timer cannot be armed.
    pub fn restart(&mut self, ctx: &mut Context<'_>) -> bool {
        self.state = AutonomousState::Idle;
        self.profile.restart();
        self.profiles_remaining = 0;
        self.begin_pending = false;
        self.tsen_pending = false;
        self.schedule_next_tsen(ctx)
    }

    /// Drop the current profile and every profile still scheduled.
    pub fn abandon(&mut self, ctx: &mut Context<'_>) {
        self.profile.abandon(ctx);
        ctx.cancel(ActionId::BeginProfile);
        ctx.cancel(ActionId::RequestTsen);
        self.profiles_remaining = 0;
        self.begin_pending = false;
        self.tsen_pending = false;
        self.state = AutonomousState::Idle;
    }

    pub fn state(&self) -> AutonomousState {
        self.state
    }

    pub fn profiles_remaining(&self) -> u8 {
        self.profiles_remaining
    }

    pub fn trigger_ms(&self) -> Option<u64> {
        self.trigger_ms
    }

    pub fn profile(&self) -> &ProfileSequencer {
        &self.profile
    }

    pub fn sza_armed(&self) -> bool {
        self.sza_armed
    }

    pub fn step(&mut self, ctx: &mut Context<'_>) -> Step {
        if ctx.consume(ActionId::BeginProfile) && !self.latch_profile(ctx) {
            return Step::Error;
        }
        if ctx.consume(ActionId::RequestTsen) {
            self.tsen_pending = true;
            if !self.schedule_next_tsen(ctx) {
                return Step::Error;
            }
        }
        self.update_sza_arm(ctx);

        match self.state {
            AutonomousState::Idle => {
                if self.begin_pending {
                    self.start_profile();
                } else if self.tsen_pending {
                    self.tsen_pending = false;
                    self.tsen.restart();
                    self.state = AutonomousState::Tsen;
                } else if self.trigger_fired(ctx) {
                    if !self.schedule_profiles(ctx) {
                        return Step::Error;
                    }
                    self.state = AutonomousState::ProfileWait;
                }
                Step::Running
            }
            AutonomousState::ProfileWait => {
                if self.begin_pending {
                    self.start_profile();
                } else if self.profiles_remaining == 0 {
                    tracing::info!("All scheduled profiles complete");
                    self.state = AutonomousState::Idle;
                }
                Step::Running
            }
            AutonomousState::Profile => match self.profile.step(ctx) {
                Step::Running => Step::Running,
                Step::Error => {
                    self.abandon(ctx);
                    Step::Error
                }
                Step::Done | Step::Aborted => {
                    self.state = AutonomousState::ProfileWait;
                    Step::Running
                }
            },
            AutonomousState::Tsen => match self.tsen.step(ctx) {
                Step::Running => Step::Running,
                Step::Error => Step::Error,
                Step::Done | Step::Aborted => {
                    self.state = AutonomousState::Idle;
                    Step::Running
                }
            },
        }
    }

    fn start_profile(&mut self) {
        self.begin_pending = false;
        self.profile.restart();
        self.state = AutonomousState::Profile;
    }

    /// Account for one `BeginProfile` firing and chain the next one.
    fn latch_profile(&mut self, ctx: &mut Context<'_>) -> bool {
        if self.profiles_remaining == 0 {
            tracing::warn!("BeginProfile with no profiles remaining");
            return true;
        }
        if self.begin_pending {
            ctx.report(Severity::Warning, "Profile period elapsed before the last profile started");
        }

        self.profiles_remaining -= 1;
        self.begin_pending = true;
        tracing::info!("Beginning profile, {} remaining", self.profiles_remaining);

        if self.profiles_remaining == 0 {
            return true;
        }
        let Some(trigger_ms) = self.trigger_ms else {
            return true;
        };
        let index = u64::from(self.profiles_scheduled - self.profiles_remaining);
        let period_ms = u64::from(ctx.config().profile_period) * 1000;
        let at = trigger_ms + PROFILE_START_DELAY_MS + index * period_ms;
        ctx.schedule(ActionId::BeginProfile, Deadline::At(at))
    }

    fn schedule_profiles(&mut self, ctx: &mut Context<'_>) -> bool {
        let config = ctx.config();
        ctx.write_setting(ConfigField::TimeTrigger, ConfigValue::U32(u32::MAX));

        self.trigger_ms = Some(ctx.now_ms);
        self.profiles_scheduled = config.num_profiles;
        self.profiles_remaining = config.num_profiles;

        ctx.report(
            Severity::Nominal,
            &format!(
                "Scheduled profiles: {}, {:.1}, {:.1}, {:.1}, {}, {}",
                config.num_profiles,
                config.profile_size,
                config.dock_amount,
                config.dock_overshoot,
                config.dwell_time,
                config.profile_period
            ),
        );
        ctx.schedule(
            ActionId::BeginProfile,
            Deadline::At(ctx.now_ms + PROFILE_START_DELAY_MS),
        )
    }

    fn update_sza_arm(&mut self, ctx: &mut Context<'_>) {
        let config = ctx.config();
        if !config.sza_trigger {
            return;
        }
        if let Some(sza) = ctx.supervisor.sza() {
            if sza < config.sza_minimum && !self.sza_armed {
                tracing::debug!("SZA trigger re-armed at {:.1}", sza);
                self.sza_armed = true;
            }
        }
    }

    fn trigger_fired(&mut self, ctx: &mut Context<'_>) -> bool {
        let config = ctx.config();
        if config.sza_trigger {
            let Some(sza) = ctx.supervisor.sza() else {
                return false;
            };
            if self.sza_armed && sza >= config.sza_minimum {
                self.sza_armed = false;
                tracing::info!("SZA trigger at {:.1}", sza);
                return true;
            }
            return false;
        }

        if config.time_trigger == u32::MAX {
            return false;
        }
        match ctx.epoch() {
            Some(epoch) if epoch >= config.time_trigger => {
                tracing::info!("Time trigger at {}", epoch);
                true
            }
            _ => false,
        }
    }

    fn schedule_next_tsen(&mut self, ctx: &mut Context<'_>) -> bool {
        match ctx.epoch() {
            Some(epoch) => {
                let delay = TSEN_PERIOD_SECS - epoch % TSEN_PERIOD_SECS;
                ctx.schedule(ActionId::RequestTsen, Deadline::After(delay))
            }
            None => true,
        }
    }
}

impl Default for AutonomousFlight {
    fn default() -> Self {
        Self::new()
    }
}
