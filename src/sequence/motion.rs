use super::{ResendGuard, MCB_RESEND_TIMEOUT};
use crate::ack::AckState;
use crate::action::ActionId;
use crate::context::Context;
use crate::protocol::Severity;
use crate::scheduler::Deadline;
use crate::session::{MotionCommand, MotionKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionOutcome {
    Running,
    Finished(MotionKind),
    /// The ground raised `MotionStop` while the reel was moving.
    Stopped,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriverState {
    Idle,
    Start,
    Verify,
    Monitor,
}

/// Start, verify and monitor a single reel motion.
///
/// Start refuses when the MCB already reports a motion in progress, which
/// sends the owning mode to its error path. Verify waits for the MCB to
/// confirm the start, resending the command once. Monitor bounds the motion
/// by `60 * length / velocity + motion_timeout` seconds.
#[derive(Debug, Clone)]
pub struct MotionDriver {
    state: DriverState,
    command: MotionCommand,
    resend: ResendGuard,
    announce: bool,
}

impl MotionDriver {
    pub fn new() -> Self {
        Self {
            state: DriverState::Idle,
            command: MotionCommand::NONE,
            resend: ResendGuard::new(),
            announce: false,
        }
    }

    /// Prepare a motion; the command goes out on the next step. With
    /// `announce` set the start is reported upstream instead of only logged.
    pub fn begin(&mut self, command: MotionCommand, announce: bool) {
        self.command = command;
        self.announce = announce;
        self.resend.reset();
        self.state = DriverState::Start;
    }

    pub fn command(&self) -> MotionCommand {
        self.command
    }

    pub fn step(&mut self, ctx: &mut Context<'_>) -> MotionOutcome {
        match self.state {
            DriverState::Idle => MotionOutcome::Running,
            DriverState::Start => self.start(ctx),
            DriverState::Verify => self.verify(ctx),
            DriverState::Monitor => self.monitor(ctx),
        }
    }

    fn start(&mut self, ctx: &mut Context<'_>) -> MotionOutcome {
        if ctx.mcb.motion_ongoing() {
            ctx.report(Severity::Warning, "Motion commanded while motion ongoing");
            return self.fail();
        }

        if self.command.kind == MotionKind::ReelOut {
            ctx.pu_undocked();
        }

        if let Err(e) = ctx.mcb.start_motion(self.command) {
            ctx.report(Severity::Warning, &format!("Motion start error: {}", e));
            return self.fail();
        }

        let description = format!(
            "{} {:.1} revs at {:.1} rpm",
            describe(self.command.kind),
            self.command.length_revs,
            self.command.velocity
        );
        if self.announce {
            ctx.report(Severity::Nominal, &description);
        } else {
            tracing::info!("{}", description);
        }

        if !ctx.schedule(ActionId::ResendMotionCommand, Deadline::After(MCB_RESEND_TIMEOUT)) {
            return self.fail();
        }
        self.state = DriverState::Verify;
        MotionOutcome::Running
    }

    fn verify(&mut self, ctx: &mut Context<'_>) -> MotionOutcome {
        if ctx.mcb.motion_ongoing() {
            ctx.cancel(ActionId::ResendMotionCommand);
            tracing::info!("MCB commanded motion");
            let config = ctx.config();
            let bound = self.command.max_duration_secs(config.motion_timeout);
            if !ctx.schedule(ActionId::MotionTimeout, Deadline::After(bound)) {
                return self.fail();
            }
            self.state = DriverState::Monitor;
            return MotionOutcome::Running;
        }

        let nak = ctx.mcb.take_motion_ack() == AckState::Nak;
        if !nak && !ctx.consume(ActionId::ResendMotionCommand) {
            return MotionOutcome::Running;
        }

        ctx.cancel(ActionId::ResendMotionCommand);
        if self.resend.retry() {
            self.state = DriverState::Start;
            MotionOutcome::Running
        } else {
            ctx.report(Severity::Warning, "MCB never confirmed motion");
            self.fail()
        }
    }

    fn monitor(&mut self, ctx: &mut Context<'_>) -> MotionOutcome {
        if ctx.consume(ActionId::MotionStop) {
            ctx.cancel(ActionId::MotionTimeout);
            self.state = DriverState::Idle;
            return MotionOutcome::Stopped;
        }

        if !ctx.mcb.motion_ongoing() {
            ctx.cancel(ActionId::MotionTimeout);
            self.state = DriverState::Idle;
            return MotionOutcome::Finished(self.command.kind);
        }

        if ctx.consume(ActionId::MotionTimeout) {
            let _ = ctx.mcb.cancel_motion();
            ctx.report(Severity::Warning, "Motion timeout, cancelling motion");
            return self.fail();
        }

        MotionOutcome::Running
    }

    fn fail(&mut self) -> MotionOutcome {
        self.state = DriverState::Idle;
        MotionOutcome::Error
    }
}

impl Default for MotionDriver {
    fn default() -> Self {
        Self::new()
    }
}

fn describe(kind: MotionKind) -> &'static str {
    match kind {
        MotionKind::None => "No motion",
        MotionKind::ReelIn => "Reeling in",
        MotionKind::ReelOut => "Reeling out",
        MotionKind::Dock => "Docking",
        MotionKind::InNoLatch => "Reeling in without latch",
    }
}
