use serde::{Deserialize, Serialize};

use super::{
    send_motion_tm, CheckPu, MotionDriver, MotionOutcome, RaHandshake, RecordFetch, Redock, ResendGuard,
    Step, MCB_RESEND_TIMEOUT, PU_RESEND_TIMEOUT,
};
use crate::ack::AckState;
use crate::action::ActionId;
use crate::config::PibConfig;
use crate::context::Context;
use crate::protocol::{ProfileParameters, Severity, WarmUpParameters};
use crate::scheduler::Deadline;
use crate::session::{MotionCommand, MotionKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProfilePhase {
    ReelOut,
    ReelIn,
    Dock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProfileState {
    Entry,
    Authorize,
    HousekeepingCheck,
    SetPuWarmup,
    ConfirmPuWarmup,
    Warmup,
    GetTsen,
    SetPuProfile,
    ConfirmPuProfile,
    PreprofileWait,
    Motion(ProfilePhase),
    Dwell,
    DockWait,
    VerifyDock,
    Redock,
    ConfirmMcbLowPower,
}

/// Reel lengths for one profile, derived from the configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfileLengths {
    pub deploy: f32,
    pub retract: f32,
    pub dock: f32,
}

impl ProfileLengths {
    pub fn from_config(config: &PibConfig) -> Self {
        Self {
            deploy: config.profile_size,
            retract: config.profile_size - config.dock_amount,
            dock: config.dock_amount + config.dock_overshoot,
        }
    }
}

/// Parameters handed to the PU before the reel starts moving. The down and
/// up durations bound how long the PU samples on each leg.
pub fn profile_parameters(config: &PibConfig) -> ProfileParameters {
    let lengths = ProfileLengths::from_config(config);
    let t_down = 60.0 * lengths.deploy / config.deploy_velocity + f32::from(config.preprofile_time);
    let t_up = 60.0 * (lengths.retract / config.retract_velocity + lengths.dock / config.dock_velocity)
        + f32::from(config.motion_timeout);

    ProfileParameters {
        t_down: t_down.round() as i32,
        dwell: config.dwell_time,
        t_up: t_up.round() as i32,
        profile_rate: config.profile_rate,
        dwell_rate: config.dwell_rate,
        tsen: config.profile_tsen,
        ropc: config.profile_ropc,
        flash: config.profile_flash,
    }
}

pub fn warmup_parameters(config: &PibConfig) -> WarmUpParameters {
    WarmUpParameters {
        flash_temp: config.flash_temp,
        heater1_temp: config.heater1_temp,
        heater2_temp: config.heater2_temp,
        flash_power: config.flash_power,
        tsen_power: config.tsen_power,
    }
}

const PROFILE_TIMERS: [ActionId; 9] = [
    ActionId::ResendPuWarmup,
    ActionId::ResendPuProfile,
    ActionId::ResendMcbLowPower,
    ActionId::ResendMotionCommand,
    ActionId::MotionTimeout,
    ActionId::EndWarmup,
    ActionId::EndPreprofile,
    ActionId::EndDwell,
    ActionId::EndDockWait,
];

/// One autonomous profile from authorization to the MCB powering down.
///
/// A failed dock confirmation triggers a re-dock, up to `num_redock`
/// consecutive failures. `redock_count` survives across those attempts and
/// resets once the dock is confirmed.
#[derive(Debug, Clone)]
pub struct ProfileSequencer {
    state: ProfileState,
    ra: RaHandshake,
    motion: MotionDriver,
    check: CheckPu,
    redock: Redock,
    tsen: RecordFetch,
    resend: ResendGuard,
    redock_count: u8,
    completed: u32,
}

impl ProfileSequencer {
    pub fn new() -> Self {
        Self {
            state: ProfileState::Entry,
            ra: RaHandshake::new(),
            motion: MotionDriver::new(),
            check: CheckPu::new(),
            redock: Redock::new(),
            tsen: RecordFetch::tsen(),
            resend: ResendGuard::new(),
            redock_count: 0,
            completed: 0,
        }
    }

    pub fn restart(&mut self) {
        self.state = ProfileState::Entry;
        self.redock_count = 0;
    }

    pub fn state(&self) -> ProfileState {
        self.state
    }

    pub fn redock_count(&self) -> u8 {
        self.redock_count
    }

    /// Profiles that ran through to the MCB powering down.
    pub fn completed(&self) -> u32 {
        self.completed
    }

    /// Drop any timers the profile still has armed.
    pub fn abandon(&mut self, ctx: &mut Context<'_>) {
        for action in PROFILE_TIMERS {
            ctx.cancel(action);
        }
        self.state = ProfileState::Entry;
    }

    pub fn step(&mut self, ctx: &mut Context<'_>) -> Step {
        match self.state {
            ProfileState::Entry => {
                self.ra.restart();
                self.state = ProfileState::Authorize;
                Step::Running
            }
            ProfileState::Authorize => match self.ra.step(ctx) {
                Step::Done => {
                    self.state = ProfileState::HousekeepingCheck;
                    Step::Running
                }
                other => other,
            },
            ProfileState::HousekeepingCheck => {
                if ctx.mcb.motion_ongoing() {
                    ctx.report(Severity::Warning, "Motion ongoing at profile start");
                    return Step::Error;
                }
                if !ctx.config().pu_docked {
                    ctx.report(Severity::Warning, "PU not marked docked at profile start");
                }
                self.resend.reset();
                self.state = ProfileState::SetPuWarmup;
                Step::Running
            }
            ProfileState::SetPuWarmup => {
                let config = ctx.config();
                let _ = ctx.pu.warm_up(warmup_parameters(&config));
                self.arm(ctx, ActionId::ResendPuWarmup, PU_RESEND_TIMEOUT, ProfileState::ConfirmPuWarmup)
            }
            ProfileState::ConfirmPuWarmup => match self.pu_confirmation(ctx, ActionId::ResendPuWarmup) {
                Some(true) => {
                    let config = ctx.config();
                    self.arm(ctx, ActionId::EndWarmup, u32::from(config.puwarmup_time), ProfileState::Warmup)
                }
                Some(false) => self.retry_or_abort(ctx, ProfileState::SetPuWarmup, "PU not responding to warmup command"),
                None => Step::Running,
            },
            ProfileState::Warmup => {
                if ctx.consume(ActionId::EndWarmup) {
                    self.tsen.restart();
                    self.state = ProfileState::GetTsen;
                }
                Step::Running
            }
            ProfileState::GetTsen => match self.tsen.step(ctx) {
                Step::Running => Step::Running,
                Step::Error => Step::Error,
                // a missing TSEN does not hold up the profile
                Step::Done | Step::Aborted => {
                    self.resend.reset();
                    self.state = ProfileState::SetPuProfile;
                    Step::Running
                }
            },
            ProfileState::SetPuProfile => {
                let config = ctx.config();
                let _ = ctx.pu.start_profile(profile_parameters(&config));
                self.arm(ctx, ActionId::ResendPuProfile, PU_RESEND_TIMEOUT, ProfileState::ConfirmPuProfile)
            }
            ProfileState::ConfirmPuProfile => match self.pu_confirmation(ctx, ActionId::ResendPuProfile) {
                Some(true) => {
                    let config = ctx.config();
                    self.arm(
                        ctx,
                        ActionId::EndPreprofile,
                        u32::from(config.preprofile_time),
                        ProfileState::PreprofileWait,
                    )
                }
                Some(false) => {
                    self.retry_or_abort(ctx, ProfileState::SetPuProfile, "PU not responding to profile command")
                }
                None => Step::Running,
            },
            ProfileState::PreprofileWait => {
                if ctx.consume(ActionId::EndPreprofile) {
                    self.begin_motion(ctx, ProfilePhase::ReelOut);
                }
                Step::Running
            }
            ProfileState::Motion(phase) => match self.motion.step(ctx) {
                MotionOutcome::Running => Step::Running,
                MotionOutcome::Finished(_) => self.finish_motion(ctx, phase),
                MotionOutcome::Stopped => {
                    ctx.report(Severity::Warning, "Commanded motion stop in autonomous");
                    Step::Error
                }
                MotionOutcome::Error => Step::Error,
            },
            ProfileState::Dwell => {
                if ctx.consume(ActionId::EndDwell) {
                    self.begin_motion(ctx, ProfilePhase::ReelIn);
                }
                Step::Running
            }
            ProfileState::DockWait => {
                if ctx.consume(ActionId::EndDockWait) {
                    self.begin_motion(ctx, ProfilePhase::Dock);
                }
                Step::Running
            }
            ProfileState::VerifyDock => match self.check.step(ctx) {
                Step::Done => self.dock_confirmed(ctx),
                Step::Aborted => self.dock_failed(ctx),
                other => other,
            },
            ProfileState::Redock => match self.redock.step(ctx) {
                Step::Done => self.dock_confirmed(ctx),
                Step::Aborted => self.dock_failed(ctx),
                other => other,
            },
            ProfileState::ConfirmMcbLowPower => {
                let retry = match ctx.mcb.take_low_power_ack() {
                    AckState::Ack => {
                        ctx.cancel(ActionId::ResendMcbLowPower);
                        return self.finish(ctx);
                    }
                    AckState::Nak => true,
                    AckState::None => ctx.consume(ActionId::ResendMcbLowPower),
                };
                if !retry {
                    return Step::Running;
                }

                ctx.cancel(ActionId::ResendMcbLowPower);
                if self.resend.retry() {
                    let _ = ctx.mcb.go_low_power();
                    self.arm(
                        ctx,
                        ActionId::ResendMcbLowPower,
                        MCB_RESEND_TIMEOUT,
                        ProfileState::ConfirmMcbLowPower,
                    )
                } else {
                    ctx.report(Severity::Warning, "MCB never powered off after profile");
                    self.finish(ctx)
                }
            }
        }
    }

    /// `Some(true)` on ACK, `Some(false)` on NAK or resend timeout.
    fn pu_confirmation(&mut self, ctx: &mut Context<'_>, resend: ActionId) -> Option<bool> {
        let ack = match resend {
            ActionId::ResendPuWarmup => ctx.pu.take_warmup_ack(),
            _ => ctx.pu.take_profile_ack(),
        };
        match ack {
            AckState::Ack => {
                ctx.cancel(resend);
                Some(true)
            }
            AckState::Nak => {
                ctx.cancel(resend);
                Some(false)
            }
            AckState::None => ctx.consume(resend).then_some(false),
        }
    }

    fn retry_or_abort(&mut self, ctx: &mut Context<'_>, resend_state: ProfileState, reason: &str) -> Step {
        if self.resend.retry() {
            self.state = resend_state;
            Step::Running
        } else {
            ctx.report(Severity::Warning, reason);
            self.abandon(ctx);
            Step::Aborted
        }
    }

    fn arm(&mut self, ctx: &mut Context<'_>, action: ActionId, secs: u32, next: ProfileState) -> Step {
        if !ctx.schedule(action, Deadline::After(secs)) {
            return Step::Error;
        }
        self.state = next;
        Step::Running
    }

    fn begin_motion(&mut self, ctx: &mut Context<'_>, phase: ProfilePhase) {
        let config = ctx.config();
        let lengths = ProfileLengths::from_config(&config);
        let command = match phase {
            ProfilePhase::ReelOut => MotionCommand::new(MotionKind::ReelOut, lengths.deploy, config.deploy_velocity),
            ProfilePhase::ReelIn => MotionCommand::new(MotionKind::ReelIn, lengths.retract, config.retract_velocity),
            ProfilePhase::Dock => MotionCommand::new(MotionKind::Dock, lengths.dock, config.dock_velocity),
        };
        self.motion.begin(command, false);
        self.state = ProfileState::Motion(phase);
    }

    fn finish_motion(&mut self, ctx: &mut Context<'_>, phase: ProfilePhase) -> Step {
        let config = ctx.config();
        match phase {
            ProfilePhase::ReelOut => {
                send_motion_tm(ctx, "Finished autonomous reel out");
                tracing::info!("Scheduled dwell: {} s", config.dwell_time);
                self.arm(ctx, ActionId::EndDwell, u32::from(config.dwell_time), ProfileState::Dwell)
            }
            ProfilePhase::ReelIn => {
                send_motion_tm(ctx, "Finished autonomous reel in");
                let wait = config.motion_timeout.min(config.dock_wait_time);
                self.arm(ctx, ActionId::EndDockWait, u32::from(wait), ProfileState::DockWait)
            }
            ProfilePhase::Dock => {
                send_motion_tm(ctx, "Finished autonomous dock");
                self.check.restart();
                self.state = ProfileState::VerifyDock;
                Step::Running
            }
        }
    }

    fn dock_confirmed(&mut self, ctx: &mut Context<'_>) -> Step {
        self.redock_count = 0;
        ctx.pu_docked();
        let _ = ctx.mcb.zero_reel();
        let _ = ctx.mcb.go_low_power();
        self.resend.reset();
        self.arm(
            ctx,
            ActionId::ResendMcbLowPower,
            MCB_RESEND_TIMEOUT,
            ProfileState::ConfirmMcbLowPower,
        )
    }

    fn dock_failed(&mut self, ctx: &mut Context<'_>) -> Step {
        self.redock_count = self.redock_count.saturating_add(1);
        let config = ctx.config();

        if self.redock_count >= config.num_redock {
            ctx.report(
                Severity::Critical,
                &format!("Dock not confirmed after {} attempts", self.redock_count),
            );
            return Step::Error;
        }

        ctx.report(
            Severity::Warning,
            &format!("Dock not confirmed, re-dock attempt {}", self.redock_count),
        );
        self.redock.restart(config.redock_out, config.redock_in);
        self.state = ProfileState::Redock;
        Step::Running
    }

    fn finish(&mut self, ctx: &mut Context<'_>) -> Step {
        self.completed += 1;
        ctx.report(Severity::Nominal, &format!("Profile {} complete", self.completed));
        self.state = ProfileState::Entry;
        Step::Done
    }
}

impl Default for ProfileSequencer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_lengths() {
        let config = PibConfig::default();
        let lengths = ProfileLengths::from_config(&config);
        assert_eq!(lengths.deploy, 8000.0);
        assert_eq!(lengths.retract, 7800.0);
        assert_eq!(lengths.dock, 300.0);
    }

    #[test]
    fn test_profile_parameters_bound_each_leg() {
        let config = PibConfig::default();
        let params = profile_parameters(&config);
        // 8000 revs at 250 rpm plus the preprofile wait
        assert_eq!(params.t_down, 1920 + 180);
        // 7800 at 250 and 300 at 80, plus the motion timeout
        assert_eq!(params.t_up, 1872 + 225 + 30);
        assert_eq!(params.dwell, config.dwell_time);
    }
}
