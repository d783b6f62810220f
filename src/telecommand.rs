//! Telecommand dispatch.
//!
//! Each telecommand maps to exactly one of: a configuration write, a device
//! command, an action flag for the active flight branch, or a flight-mode
//! switch. Every telecommand is answered with one ACK or NAK.

use serde::{Deserialize, Serialize};

use crate::action::ActionId;
use crate::config::{ConfigField, ConfigValue};
use crate::context::Context;
use crate::mode::ModeEngine;
use crate::protocol::{McbCommand, Severity, Telecommand, TelecommandKind};
use crate::session::MotionKind;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DispatchStats {
    pub received: u32,
    pub accepted: u32,
    pub rejected: u32,
}

#[derive(Debug, Default)]
pub struct TelecommandDispatcher {
    stats: DispatchStats,
}

impl TelecommandDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Apply one telecommand and answer it upstream. Returns the ACK value.
    pub fn dispatch(&mut self, telecommand: &Telecommand, engine: &mut ModeEngine, ctx: &mut Context<'_>) -> bool {
        self.stats.received += 1;
        tracing::debug!("TC {}: {:?}", telecommand.id, telecommand.kind);

        let ack = self.apply(&telecommand.kind, engine, ctx);
        if ack {
            self.stats.accepted += 1;
        } else {
            self.stats.rejected += 1;
        }
        ctx.supervisor.acknowledge_telecommand(telecommand.id, ack);
        ack
    }

    fn apply(&mut self, kind: &TelecommandKind, engine: &mut ModeEngine, ctx: &mut Context<'_>) -> bool {
        use TelecommandKind as Tc;

        let autonomous = engine.flight().is_autonomous();

        match *kind {
            Tc::Deploy { length } => manual_motion(engine, ctx, autonomous, MotionKind::ReelOut, length),
            Tc::Retract { length } => manual_motion(engine, ctx, autonomous, MotionKind::ReelIn, length),
            Tc::Dock { length } => manual_motion(engine, ctx, autonomous, MotionKind::Dock, length),
            Tc::DeployVelocity { velocity } => set_config(ctx, ConfigField::DeployVelocity, ConfigValue::F32(velocity)),
            Tc::RetractVelocity { velocity } => set_config(ctx, ConfigField::RetractVelocity, ConfigValue::F32(velocity)),
            Tc::DockVelocity { velocity } => set_config(ctx, ConfigField::DockVelocity, ConfigValue::F32(velocity)),
            Tc::DeployAcceleration { acceleration } => {
                set_acceleration(ctx, McbCommand::SetOutAcceleration(acceleration), acceleration)
            }
            Tc::RetractAcceleration { acceleration } => {
                set_acceleration(ctx, McbCommand::SetInAcceleration(acceleration), acceleration)
            }
            Tc::DockAcceleration { acceleration } => {
                set_acceleration(ctx, McbCommand::SetDockAcceleration(acceleration), acceleration)
            }
            Tc::CancelMotion => {
                let sent = ctx.mcb.cancel_motion().is_ok();
                ctx.actions.raise(ActionId::MotionStop);
                ctx.report(Severity::Nominal, "Cancelling motion");
                sent
            }
            Tc::ZeroReel => {
                if ctx.mcb.motion_ongoing() {
                    ctx.report(Severity::Warning, "Cannot zero reel during motion");
                    return false;
                }
                ctx.mcb.zero_reel().is_ok()
            }
            Tc::SetAutonomous => switch_branch(engine, ctx, true),
            Tc::SetManual => switch_branch(engine, ctx, false),
            Tc::SetSzaMinimum { degrees } => set_config(ctx, ConfigField::SzaMinimum, ConfigValue::F32(degrees)),
            Tc::SetProfileSize { revs } => set_config(ctx, ConfigField::ProfileSize, ConfigValue::F32(revs)),
            Tc::SetDockAmount { revs } => set_config(ctx, ConfigField::DockAmount, ConfigValue::F32(revs)),
            Tc::SetDockOvershoot { revs } => set_config(ctx, ConfigField::DockOvershoot, ConfigValue::F32(revs)),
            Tc::SetDwellTime { seconds } => set_config(ctx, ConfigField::DwellTime, ConfigValue::U16(seconds)),
            Tc::SetProfilePeriod { seconds } => set_config(ctx, ConfigField::ProfilePeriod, ConfigValue::U16(seconds)),
            Tc::SetNumProfiles { count } => set_config(ctx, ConfigField::NumProfiles, ConfigValue::U8(count)),
            Tc::SetTimeTrigger { epoch } => {
                if let Some(now) = ctx.epoch() {
                    if epoch <= now {
                        ctx.report(
                            Severity::Warning,
                            &format!("Time trigger {} is in the past (now {})", epoch, now),
                        );
                        return false;
                    }
                }
                set_config(ctx, ConfigField::TimeTrigger, ConfigValue::U32(epoch))
            }
            Tc::UseSzaTrigger => set_config(ctx, ConfigField::SzaTrigger, ConfigValue::Bool(true)),
            Tc::UseTimeTrigger => set_config(ctx, ConfigField::SzaTrigger, ConfigValue::Bool(false)),
            Tc::SetPuWarmupTime { seconds } => set_config(ctx, ConfigField::PuWarmupTime, ConfigValue::U16(seconds)),
            Tc::SetPreprofileTime { seconds } => {
                set_config(ctx, ConfigField::PreprofileTime, ConfigValue::U16(seconds))
            }
            Tc::SetMotionTimeout { seconds } => set_config(ctx, ConfigField::MotionTimeout, ConfigValue::U16(seconds)),
            Tc::SetDockWaitTime { seconds } => set_config(ctx, ConfigField::DockWaitTime, ConfigValue::U16(seconds)),
            Tc::SetRedockParameters {
                out_revs,
                in_revs,
                attempts,
            } => {
                let writes = [
                    (ConfigField::RedockOut, ConfigValue::F32(out_revs)),
                    (ConfigField::RedockIn, ConfigValue::F32(in_revs)),
                    (ConfigField::NumRedock, ConfigValue::U8(attempts)),
                ];
                // all three or none
                let mut candidate = ctx.config();
                if let Err(e) = writes.iter().try_for_each(|(field, value)| candidate.set(*field, *value)) {
                    ctx.report(Severity::Warning, &format!("Error setting redock parameters: {}", e));
                    return false;
                }
                writes.iter().all(|(field, value)| set_config(ctx, *field, *value))
            }
            Tc::RetryDock { out_revs, in_revs } => {
                if refuse_in_autonomous(ctx, autonomous, "Retry dock") {
                    return false;
                }
                if !valid_length(out_revs) || !valid_length(in_revs) {
                    ctx.report(Severity::Warning, "Invalid re-dock lengths");
                    return false;
                }
                engine.flight_mut().manual_mut().set_redock_lengths(out_revs, in_revs);
                ctx.actions.raise(ActionId::ReDock);
                true
            }
            Tc::GetPuStatus => {
                if refuse_in_autonomous(ctx, autonomous, "PU status request") {
                    return false;
                }
                ctx.actions.raise(ActionId::CheckPu);
                true
            }
            Tc::RequestTsen => {
                ctx.actions.raise(ActionId::RequestTsen);
                true
            }
            Tc::OffloadProfileRecords => {
                if refuse_in_autonomous(ctx, autonomous, "Profile record offload") {
                    return false;
                }
                ctx.actions.raise(ActionId::OffloadPu);
                true
            }
            Tc::ExitError => {
                ctx.actions.raise(ActionId::ExitError);
                true
            }
            Tc::PuPowerOn => {
                ctx.discretes.set_pu_power(true);
                ctx.report(Severity::Nominal, "PU power on");
                true
            }
            Tc::PuPowerOff => {
                ctx.discretes.set_pu_power(false);
                ctx.report(Severity::Nominal, "PU power off");
                true
            }
        }
    }
}

fn valid_length(length: f32) -> bool {
    length.is_finite() && length > 0.0
}

fn refuse_in_autonomous(ctx: &mut Context<'_>, autonomous: bool, what: &str) -> bool {
    if autonomous {
        ctx.report(Severity::Warning, &format!("{} refused in autonomous mode", what));
    }
    autonomous
}

fn manual_motion(
    engine: &mut ModeEngine,
    ctx: &mut Context<'_>,
    autonomous: bool,
    kind: MotionKind,
    length: f32,
) -> bool {
    if refuse_in_autonomous(ctx, autonomous, "Motion command") {
        return false;
    }
    if !valid_length(length) {
        ctx.report(Severity::Warning, &format!("Invalid motion length {}", length));
        return false;
    }

    engine.flight_mut().manual_mut().set_length(kind, length);
    let action = match kind {
        MotionKind::ReelOut => ActionId::ReelOut,
        MotionKind::ReelIn => ActionId::ReelIn,
        _ => ActionId::Dock,
    };
    ctx.actions.raise(action);
    true
}

fn switch_branch(engine: &mut ModeEngine, ctx: &mut Context<'_>, autonomous: bool) -> bool {
    if ctx.mcb.motion_ongoing() {
        ctx.report(Severity::Warning, "Cannot switch flight branch during motion");
        return false;
    }
    engine.flight_mut().set_autonomous(autonomous);
    ctx.report(
        Severity::Nominal,
        if autonomous { "Set autonomous" } else { "Set manual" },
    );
    true
}

fn set_acceleration(ctx: &mut Context<'_>, command: McbCommand, acceleration: f32) -> bool {
    if !valid_length(acceleration) {
        ctx.report(Severity::Warning, &format!("Invalid acceleration {}", acceleration));
        return false;
    }
    ctx.mcb.set_acceleration(command).is_ok()
}

fn set_config(ctx: &mut Context<'_>, field: ConfigField, value: ConfigValue) -> bool {
    match ctx.settings.write(field, value) {
        Ok(()) => {
            ctx.report(Severity::Nominal, &format!("Set {:?}: {}", field, value));
            true
        }
        Err(e) => {
            ctx.report(Severity::Warning, &format!("Error setting {:?}: {}", field, e));
            false
        }
    }
}
