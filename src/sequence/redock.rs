use super::{CheckPu, MotionDriver, MotionOutcome, Step};
use crate::context::Context;
use crate::protocol::Severity;
use crate::session::{MotionCommand, MotionKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RedockState {
    Start,
    ReelOut,
    InNoLatch,
    Check,
}

/// Back the PU off the dock and pull it in again without latching, then
/// confirm it is seated by asking for its status.
#[derive(Debug, Clone)]
pub struct Redock {
    state: RedockState,
    motion: MotionDriver,
    check: CheckPu,
    out_revs: f32,
    in_revs: f32,
}

impl Redock {
    pub fn new() -> Self {
        Self {
            state: RedockState::Start,
            motion: MotionDriver::new(),
            check: CheckPu::new(),
            out_revs: 0.0,
            in_revs: 0.0,
        }
    }

    pub fn restart(&mut self, out_revs: f32, in_revs: f32) {
        self.state = RedockState::Start;
        self.out_revs = out_revs;
        self.in_revs = in_revs;
        self.check.restart();
    }

    pub fn step(&mut self, ctx: &mut Context<'_>) -> Step {
        match self.state {
            RedockState::Start => {
                let config = ctx.config();
                self.motion.begin(
                    MotionCommand::new(MotionKind::ReelOut, self.out_revs, config.deploy_velocity),
                    false,
                );
                self.state = RedockState::ReelOut;
                Step::Running
            }
            RedockState::ReelOut => match self.motion.step(ctx) {
                MotionOutcome::Running => Step::Running,
                MotionOutcome::Finished(_) => {
                    let config = ctx.config();
                    self.motion.begin(
                        MotionCommand::new(MotionKind::InNoLatch, self.in_revs, config.dock_velocity),
                        false,
                    );
                    self.state = RedockState::InNoLatch;
                    Step::Running
                }
                MotionOutcome::Stopped => self.stopped(ctx),
                MotionOutcome::Error => Step::Error,
            },
            RedockState::InNoLatch => match self.motion.step(ctx) {
                MotionOutcome::Running => Step::Running,
                MotionOutcome::Finished(_) => {
                    self.check.restart();
                    self.state = RedockState::Check;
                    Step::Running
                }
                MotionOutcome::Stopped => self.stopped(ctx),
                MotionOutcome::Error => Step::Error,
            },
            RedockState::Check => self.check.step(ctx),
        }
    }

    fn stopped(&mut self, ctx: &mut Context<'_>) -> Step {
        ctx.report(Severity::Nominal, "Commanded motion stop during re-dock");
        self.state = RedockState::Start;
        Step::Aborted
    }
}

impl Default for Redock {
    fn default() -> Self {
        Self::new()
    }
}
