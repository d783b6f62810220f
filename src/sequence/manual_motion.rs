use super::{send_motion_tm, MotionDriver, MotionOutcome, RaHandshake, Step, TmHandshake};
use crate::context::Context;
use crate::protocol::Severity;
use crate::session::MotionCommand;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Authorize,
    Drive,
    TmAck,
}

/// A ground-commanded motion: authorization, the motion itself, then the
/// motion telemetry handed upstream.
#[derive(Debug, Clone)]
pub struct ManualMotion {
    stage: Stage,
    ra: RaHandshake,
    motion: MotionDriver,
    tm: TmHandshake,
    command: MotionCommand,
}

impl ManualMotion {
    pub fn new() -> Self {
        Self {
            stage: Stage::Authorize,
            ra: RaHandshake::new(),
            motion: MotionDriver::new(),
            tm: TmHandshake::new(),
            command: MotionCommand::NONE,
        }
    }

    pub fn restart(&mut self, command: MotionCommand) {
        self.command = command;
        self.stage = Stage::Authorize;
        self.ra.restart();
    }

    pub fn step(&mut self, ctx: &mut Context<'_>) -> Step {
        match self.stage {
            Stage::Authorize => match self.ra.step(ctx) {
                Step::Done => {
                    self.motion.begin(self.command, true);
                    self.stage = Stage::Drive;
                    Step::Running
                }
                other => other,
            },
            Stage::Drive => match self.motion.step(ctx) {
                MotionOutcome::Running => Step::Running,
                MotionOutcome::Finished(_) => {
                    send_motion_tm(ctx, "Finished commanded manual motion");
                    if !self.tm.begin(ctx) {
                        return Step::Error;
                    }
                    self.stage = Stage::TmAck;
                    Step::Running
                }
                MotionOutcome::Stopped => {
                    ctx.report(Severity::Nominal, "Commanded motion stop");
                    Step::Done
                }
                MotionOutcome::Error => Step::Error,
            },
            Stage::TmAck => self.tm.step(ctx),
        }
    }
}

impl Default for ManualMotion {
    fn default() -> Self {
        Self::new()
    }
}
