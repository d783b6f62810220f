use serde::{Deserialize, Serialize};

use crate::action::ActionId;
use crate::context::Context;
use crate::sequence::{CheckPu, ManualMotion, RecordFetch, Redock, Step};
use crate::session::{MotionCommand, MotionKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManualState {
    Idle,
    Motion,
    Redock,
    CheckPu,
    Tsen,
    Offload,
}

/// Lengths set by the deploy, retract and dock telecommands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ManualLengths {
    pub deploy: f32,
    pub retract: f32,
    pub dock: f32,
}

/// Ground-driven flight: the idle state waits for an operator action and
/// runs the matching sequence to completion.
#[derive(Debug, Clone)]
pub struct ManualFlight {
    state: ManualState,
    motion: ManualMotion,
    redock: Redock,
    check: CheckPu,
    tsen: RecordFetch,
    offload: RecordFetch,
    lengths: ManualLengths,
    redock_lengths: (f32, f32),
}

impl ManualFlight {
    pub fn new() -> Self {
        Self {
            state: ManualState::Idle,
            motion: ManualMotion::new(),
            redock: Redock::new(),
            check: CheckPu::new(),
            tsen: RecordFetch::tsen(),
            offload: RecordFetch::offload(),
            lengths: ManualLengths::default(),
            redock_lengths: (0.0, 0.0),
        }
    }

    pub fn restart(&mut self) {
        self.state = ManualState::Idle;
    }

    pub fn state(&self) -> ManualState {
        self.state
    }

    pub fn lengths(&self) -> ManualLengths {
        self.lengths
    }

    pub fn set_length(&mut self, kind: MotionKind, length: f32) {
        match kind {
            MotionKind::ReelOut => self.lengths.deploy = length,
            MotionKind::ReelIn => self.lengths.retract = length,
            MotionKind::Dock => self.lengths.dock = length,
            MotionKind::InNoLatch | MotionKind::None => {}
        }
    }

    pub fn set_redock_lengths(&mut self, out_revs: f32, in_revs: f32) {
        self.redock_lengths = (out_revs, in_revs);
    }

    /// `Step::Error` sends the flight mode to its error landing.
    pub fn step(&mut self, ctx: &mut Context<'_>) -> Step {
        let result = match self.state {
            ManualState::Idle => {
                self.idle(ctx);
                return Step::Running;
            }
            ManualState::Motion => self.motion.step(ctx),
            ManualState::Redock => {
                let result = self.redock.step(ctx);
                if result == Step::Done {
                    let _ = ctx.mcb.zero_reel();
                    ctx.pu_docked();
                }
                result
            }
            ManualState::CheckPu => self.check.step(ctx),
            ManualState::Tsen => self.tsen.step(ctx),
            ManualState::Offload => self.offload.step(ctx),
        };

        match result {
            Step::Running => Step::Running,
            Step::Error => {
                self.state = ManualState::Idle;
                Step::Error
            }
            Step::Done | Step::Aborted => {
                self.state = ManualState::Idle;
                Step::Done
            }
        }
    }

    fn idle(&mut self, ctx: &mut Context<'_>) {
        let config = ctx.config();

        if ctx.consume(ActionId::ReelIn) {
            self.start_motion(MotionCommand::new(
                MotionKind::ReelIn,
                self.lengths.retract,
                config.retract_velocity,
            ));
        } else if ctx.consume(ActionId::ReelOut) {
            self.start_motion(MotionCommand::new(
                MotionKind::ReelOut,
                self.lengths.deploy,
                config.deploy_velocity,
            ));
        } else if ctx.consume(ActionId::Dock) {
            self.start_motion(MotionCommand::new(
                MotionKind::Dock,
                self.lengths.dock,
                config.dock_velocity,
            ));
        } else if ctx.consume(ActionId::ReDock) {
            let (out_revs, in_revs) = self.redock_lengths;
            self.redock.restart(out_revs, in_revs);
            self.state = ManualState::Redock;
        } else if ctx.consume(ActionId::CheckPu) {
            self.check.restart();
            self.state = ManualState::CheckPu;
        } else if ctx.consume(ActionId::OffloadPu) {
            self.offload.restart();
            self.state = ManualState::Offload;
        } else if ctx.consume(ActionId::RequestTsen) {
            self.tsen.restart();
            self.state = ManualState::Tsen;
        }
    }

    fn start_motion(&mut self, command: MotionCommand) {
        self.motion.restart(command);
        self.state = ManualState::Motion;
    }
}

impl Default for ManualFlight {
    fn default() -> Self {
        Self::new()
    }
}
