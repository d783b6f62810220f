use serde::{Deserialize, Serialize};

use super::{ResendGuard, Step, TmHandshake, PU_RESEND_TIMEOUT};
use crate::action::ActionId;
use crate::context::Context;
use crate::protocol::Severity;
use crate::scheduler::Deadline;
use crate::telemetry::TelemetryKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordKind {
    Tsen,
    ProfileRecord,
}

impl RecordKind {
    fn resend_action(self) -> ActionId {
        match self {
            RecordKind::Tsen => ActionId::ResendPuTsen,
            RecordKind::ProfileRecord => ActionId::ResendPuRecord,
        }
    }

    fn label(self) -> &'static str {
        match self {
            RecordKind::Tsen => "TSEN",
            RecordKind::ProfileRecord => "profile record",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchState {
    Request,
    Wait,
    TmAck,
}

/// Pull records from the PU and forward each one upstream as telemetry.
///
/// A TSEN fetch stops after one record. An offload keeps requesting profile
/// records until the PU answers that it has no more.
#[derive(Debug, Clone)]
pub struct RecordFetch {
    kind: RecordKind,
    repeat: bool,
    state: FetchState,
    resend: ResendGuard,
    tm: TmHandshake,
    fetched: u32,
}

impl RecordFetch {
    pub fn tsen() -> Self {
        Self::with_kind(RecordKind::Tsen, false)
    }

    pub fn offload() -> Self {
        Self::with_kind(RecordKind::ProfileRecord, true)
    }

    fn with_kind(kind: RecordKind, repeat: bool) -> Self {
        Self {
            kind,
            repeat,
            state: FetchState::Request,
            resend: ResendGuard::new(),
            tm: TmHandshake::new(),
            fetched: 0,
        }
    }

    pub fn restart(&mut self) {
        self.state = FetchState::Request;
        self.resend.reset();
        self.tm = TmHandshake::new();
        self.fetched = 0;
    }

    /// Records forwarded since the last restart.
    pub fn fetched(&self) -> u32 {
        self.fetched
    }

    pub fn step(&mut self, ctx: &mut Context<'_>) -> Step {
        match self.state {
            FetchState::Request => self.request(ctx),
            FetchState::Wait => self.wait(ctx),
            FetchState::TmAck => match self.tm.step(ctx) {
                Step::Done if self.repeat => {
                    self.resend.reset();
                    self.state = FetchState::Request;
                    Step::Running
                }
                other => other,
            },
        }
    }

    fn request(&mut self, ctx: &mut Context<'_>) -> Step {
        // a refused send is covered by the resend timer
        let _ = match self.kind {
            RecordKind::Tsen => ctx.pu.request_tsen(),
            RecordKind::ProfileRecord => ctx.pu.request_profile_record(),
        };
        if !ctx.schedule(self.kind.resend_action(), Deadline::After(PU_RESEND_TIMEOUT)) {
            return Step::Error;
        }
        self.state = FetchState::Wait;
        Step::Running
    }

    fn wait(&mut self, ctx: &mut Context<'_>) -> Step {
        let received = match self.kind {
            RecordKind::Tsen => ctx.pu.take_tsen(),
            RecordKind::ProfileRecord => ctx.pu.take_profile_record(),
        };

        if received {
            ctx.cancel(self.kind.resend_action());
            self.fetched += 1;
            self.forward(ctx);
            if !self.tm.begin(ctx) {
                return Step::Error;
            }
            self.state = FetchState::TmAck;
            return Step::Running;
        }

        if ctx.pu.take_no_more_records() {
            ctx.cancel(self.kind.resend_action());
            ctx.report(
                Severity::Nominal,
                &format!("PU has no more {}s ({} sent)", self.kind.label(), self.fetched),
            );
            return Step::Done;
        }

        if !ctx.consume(self.kind.resend_action()) {
            return Step::Running;
        }

        if self.resend.retry() {
            self.state = FetchState::Request;
            Step::Running
        } else {
            ctx.report(
                Severity::Warning,
                &format!("PU not successful in sending {}", self.kind.label()),
            );
            Step::Aborted
        }
    }

    fn forward(&mut self, ctx: &mut Context<'_>) {
        let status = ctx.pu.status();
        let (kind, summary) = match self.kind {
            RecordKind::Tsen => (TelemetryKind::Tsen, format!("PU TSEN: {}", status)),
            RecordKind::ProfileRecord => (
                TelemetryKind::ProfileRecord,
                format!("PU profile record {}: {}", self.fetched, status),
            ),
        };
        let payload = ctx.pu.last_record();
        ctx.supervisor
            .send_telemetry(kind, Severity::Nominal, &summary, payload);
    }
}
