//! Device stand-ins for ground runs and tests.
//!
//! [`ScriptedTransport`] replays frames pushed by a test and records every
//! command sent. [`SimulatedBench`] models a reel, an MCB driving it and a
//! PU that only answers while seated on the dock.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::{MemorySettings, PibConfig};
use crate::controller::PibController;
use crate::hardware::SharedDiscretes;
use crate::protocol::{
    log_text, AckKind, BinaryPayload, DeviceMessage, McbAsciiId, McbBinaryId, McbCommand, McbCommandId,
    McbMessage, Outbound, PuAsciiId, PuBinaryId, PuCommand, PuCommandId, PuMessage, SupervisorMessage,
    Telecommand, TelecommandKind, Transport, MOTION_TM_SIZE, PROFILE_RECORD_SIZE, TSEN_RECORD_SIZE,
};
use crate::mode::Mode;
use crate::session::mcb::REEL_POSITION_OFFSET;
use crate::session::{McbSession, PuSession};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Debug)]
struct Script<C, M> {
    inbound: VecDeque<M>,
    sent: Vec<C>,
    link_up: bool,
}

/// Transport whose inbound frames come from a test script.
#[derive(Debug)]
pub struct ScriptedTransport<C, M> {
    script: Arc<Mutex<Script<C, M>>>,
}

/// Test-side handle on a [`ScriptedTransport`].
#[derive(Debug)]
pub struct ScriptHandle<C, M> {
    script: Arc<Mutex<Script<C, M>>>,
}

impl<C, M> Clone for ScriptHandle<C, M> {
    fn clone(&self) -> Self {
        Self {
            script: Arc::clone(&self.script),
        }
    }
}

impl<C, M> ScriptedTransport<C, M> {
    pub fn new() -> (Self, ScriptHandle<C, M>) {
        let script = Arc::new(Mutex::new(Script {
            inbound: VecDeque::new(),
            sent: Vec::new(),
            link_up: true,
        }));
        (
            Self {
                script: Arc::clone(&script),
            },
            ScriptHandle { script },
        )
    }
}

impl<C: Clone, M> Transport for ScriptedTransport<C, M> {
    type Command = C;
    type Message = M;

    fn send(&mut self, command: &C) -> bool {
        let mut script = lock(&self.script);
        if !script.link_up {
            return false;
        }
        script.sent.push(command.clone());
        true
    }

    fn poll(&mut self) -> Option<M> {
        lock(&self.script).inbound.pop_front()
    }
}

impl<C: Clone, M> ScriptHandle<C, M> {
    pub fn push(&self, message: M) {
        lock(&self.script).inbound.push_back(message);
    }

    pub fn sent(&self) -> Vec<C> {
        lock(&self.script).sent.clone()
    }

    pub fn take_sent(&self) -> Vec<C> {
        core::mem::take(&mut lock(&self.script).sent)
    }

    pub fn sent_count(&self) -> usize {
        lock(&self.script).sent.len()
    }

    /// A downed link refuses every send.
    pub fn set_link_up(&self, up: bool) {
        lock(&self.script).link_up = up;
    }
}

pub type McbScript = ScriptHandle<McbCommand, McbMessage>;
pub type PuScript = ScriptHandle<PuCommand, PuMessage>;

/// Controller wired to scripted links, in-memory settings and observable
/// discretes. Time advances one second per tick.
pub struct ScriptedBench {
    pub controller: PibController,
    pub mcb: McbScript,
    pub pu: PuScript,
    pub discretes: SharedDiscretes,
    pub now_ms: u64,
    next_tc_id: u32,
}

impl ScriptedBench {
    pub fn new(config: PibConfig) -> Self {
        let (mcb_transport, mcb) = ScriptedTransport::<McbCommand, McbMessage>::new();
        let (pu_transport, pu) = ScriptedTransport::<PuCommand, PuMessage>::new();
        let discretes = SharedDiscretes::new();

        let mut controller = PibController::new(
            McbSession::new(Box::new(mcb_transport)),
            PuSession::new(Box::new(pu_transport)),
            Box::new(MemorySettings::with_config(config)),
            Box::new(discretes.clone()),
        );
        controller.start(0, true);

        Self {
            controller,
            mcb,
            pu,
            discretes,
            now_ms: 0,
            next_tc_id: 1,
        }
    }

    pub fn tick(&mut self) {
        self.now_ms += 1000;
        self.controller.tick(self.now_ms);
    }

    pub fn run(&mut self, ticks: u32) {
        for _ in 0..ticks {
            self.tick();
        }
    }

    /// Tick until `done` holds, at most `limit` times. Returns whether it held.
    pub fn run_until(&mut self, limit: u32, mut done: impl FnMut(&PibController) -> bool) -> bool {
        for _ in 0..limit {
            if done(&self.controller) {
                return true;
            }
            self.tick();
        }
        done(&self.controller)
    }

    pub fn send(&mut self, message: SupervisorMessage) {
        self.controller.handle_supervisor_message(message, self.now_ms);
    }

    pub fn telecommand(&mut self, kind: TelecommandKind) -> u32 {
        let id = self.next_tc_id;
        self.next_tc_id += 1;
        self.send(SupervisorMessage::Telecommand(Telecommand { id, kind }));
        id
    }

    pub fn ack(&mut self, kind: AckKind, ack: bool) {
        self.send(SupervisorMessage::Ack { kind, ack });
    }

    /// GPS fix, then Flight mode in the requested branch.
    pub fn enter_flight(&mut self, epoch: u32, autonomous: bool) {
        self.send(SupervisorMessage::Gps { epoch, sza: 90.0 });
        if autonomous {
            self.telecommand(TelecommandKind::SetAutonomous);
        }
        self.send(SupervisorMessage::SetMode { mode: Mode::Flight });
        self.run(3);
    }

    pub fn drain_outbound(&mut self) -> Vec<Outbound> {
        std::iter::from_fn(|| self.controller.pop_outbound()).collect()
    }

    pub fn mcb_ack(&self, command: McbCommandId, ok: bool) {
        self.mcb.push(DeviceMessage::Ack { command, ok });
    }

    pub fn mcb_ascii(&self, id: McbAsciiId, payload: &str) {
        self.mcb.push(DeviceMessage::Ascii {
            id,
            payload: log_text(payload),
        });
    }

    pub fn pu_ack(&self, command: PuCommandId, ok: bool) {
        self.pu.push(DeviceMessage::Ack { command, ok });
    }

    pub fn pu_ascii(&self, id: PuAsciiId, payload: &str) {
        self.pu.push(DeviceMessage::Ascii {
            id,
            payload: log_text(payload),
        });
    }
}

/// Reel position within which the PU is considered seated.
pub const DOCK_TOLERANCE_REVS: f32 = 0.5;
const TM_INTERVAL_MS: u64 = 1000;
const SIM_PROFILE_RECORDS: u16 = 4;

#[derive(Debug, Clone, Copy)]
struct ActiveMotion {
    command: McbCommandId,
    start_ms: u64,
    end_ms: u64,
    start_position: f32,
    travel: f32,
}

impl ActiveMotion {
    fn position_at(&self, now_ms: u64) -> f32 {
        let span = self.end_ms.saturating_sub(self.start_ms).max(1) as f32;
        let done = (now_ms.saturating_sub(self.start_ms) as f32 / span).min(1.0);
        self.start_position + self.travel * done
    }
}

#[derive(Debug, Default)]
struct McbModel {
    now_ms: u64,
    outbox: VecDeque<McbMessage>,
    motion: Option<ActiveMotion>,
    position: f32,
    next_tm_ms: u64,
    tm_sequence: u32,
    low_power: bool,
    commands: u32,
}

impl McbModel {
    fn reply(&mut self, command: McbCommandId, ok: bool) {
        self.outbox.push_back(DeviceMessage::Ack { command, ok });
    }

    fn handle(&mut self, command: &McbCommand) {
        self.commands += 1;
        let (length, velocity, sign) = match *command {
            McbCommand::ReelOut { length, velocity } => (length, velocity, 1.0),
            McbCommand::ReelIn { length, velocity }
            | McbCommand::Dock { length, velocity }
            | McbCommand::InNoLatch { length, velocity } => (length, velocity, -1.0),
            McbCommand::CancelMotion => {
                if let Some(motion) = self.motion.take() {
                    self.position = motion.position_at(self.now_ms);
                    self.outbox.push_back(DeviceMessage::Ascii {
                        id: McbAsciiId::MotionFinished,
                        payload: log_text("cancelled"),
                    });
                }
                self.reply(McbCommandId::CancelMotion, true);
                return;
            }
            McbCommand::ZeroReel => {
                self.position = 0.0;
                self.reply(McbCommandId::ZeroReel, true);
                return;
            }
            McbCommand::GoLowPower => {
                self.low_power = true;
                self.reply(McbCommandId::GoLowPower, true);
                return;
            }
            McbCommand::SetInAcceleration(_)
            | McbCommand::SetOutAcceleration(_)
            | McbCommand::SetDockAcceleration(_) => {
                self.reply(command.id(), true);
                return;
            }
        };

        if self.motion.is_some() || velocity <= 0.0 {
            self.reply(command.id(), false);
            return;
        }

        let duration_ms = (60_000.0 * length / velocity) as u64;
        self.low_power = false;
        self.motion = Some(ActiveMotion {
            command: command.id(),
            start_ms: self.now_ms,
            end_ms: self.now_ms + duration_ms,
            start_position: self.position,
            travel: sign * length,
        });
        self.next_tm_ms = self.now_ms + TM_INTERVAL_MS;
        self.reply(command.id(), true);
    }

    fn advance(&mut self, now_ms: u64) {
        self.now_ms = now_ms;
        let Some(motion) = self.motion else {
            return;
        };

        while self.next_tm_ms <= now_ms.min(motion.end_ms) {
            let position = motion.position_at(self.next_tm_ms);
            self.tm_sequence = self.tm_sequence.wrapping_add(1);
            self.outbox.push_back(DeviceMessage::Binary {
                id: McbBinaryId::MotionTm,
                bytes: motion_frame(self.tm_sequence, position),
            });
            self.next_tm_ms += TM_INTERVAL_MS;
        }

        if now_ms >= motion.end_ms {
            self.motion = None;
            self.position = motion.start_position + motion.travel;
            let (id, payload) = match motion.command {
                // the dock latch stalls the motor, which the MCB reports as a fault
                McbCommandId::Dock | McbCommandId::InNoLatch => (McbAsciiId::MotionFault, "0,0,0,0,0,0,0,1"),
                _ => (McbAsciiId::MotionFinished, ""),
            };
            self.outbox.push_back(DeviceMessage::Ascii {
                id,
                payload: log_text(payload),
            });
        }
    }
}

fn motion_frame(sequence: u32, position: f32) -> BinaryPayload {
    let mut frame = [0u8; MOTION_TM_SIZE];
    frame[..4].copy_from_slice(&sequence.to_be_bytes());
    frame[REEL_POSITION_OFFSET..REEL_POSITION_OFFSET + 4].copy_from_slice(&position.to_be_bytes());
    let mut bytes = BinaryPayload::new();
    // MOTION_TM_SIZE fits the binary payload capacity
    let _ = bytes.extend_from_slice(&frame);
    bytes
}

#[derive(Debug, Default)]
struct PuModel {
    outbox: VecDeque<PuMessage>,
    docked: bool,
    uptime_s: u32,
    records_left: u16,
    record_acks: u32,
    commands: u32,
}

impl PuModel {
    fn handle(&mut self, command: &PuCommand) {
        self.commands += 1;
        if !self.docked {
            return;
        }

        match *command {
            PuCommand::SendStatus => {
                let status = format!("{}, 3.95, 0.20, -12.50, -14.00, 0", self.uptime_s);
                self.outbox.push_back(DeviceMessage::Ascii {
                    id: PuAsciiId::Status,
                    payload: log_text(&status),
                });
            }
            PuCommand::SendTsenRecord => {
                self.outbox.push_back(record(PuBinaryId::TsenRecord, TSEN_RECORD_SIZE, self.uptime_s));
            }
            PuCommand::SendProfileRecord => {
                if self.records_left == 0 {
                    self.outbox.push_back(DeviceMessage::Ascii {
                        id: PuAsciiId::NoMoreRecords,
                        payload: log_text(""),
                    });
                } else {
                    self.records_left -= 1;
                    self.outbox
                        .push_back(record(PuBinaryId::ProfileRecord, PROFILE_RECORD_SIZE, self.uptime_s));
                }
            }
            PuCommand::WarmUp(_) => self.outbox.push_back(DeviceMessage::Ack {
                command: PuCommandId::WarmUp,
                ok: true,
            }),
            PuCommand::Profile(_) => {
                self.records_left = SIM_PROFILE_RECORDS;
                self.outbox.push_back(DeviceMessage::Ack {
                    command: PuCommandId::Profile,
                    ok: true,
                });
            }
            PuCommand::RecordAck { .. } => self.record_acks += 1,
        }
    }
}

fn record(id: PuBinaryId, size: usize, stamp: u32) -> PuMessage {
    let mut bytes = BinaryPayload::new();
    let _ = bytes.extend_from_slice(&stamp.to_be_bytes());
    let _ = bytes.resize(size, 0);
    DeviceMessage::Binary { id, bytes }
}

#[derive(Debug, Default)]
struct BenchState {
    mcb: McbModel,
    pu: PuModel,
    mcb_link_up: bool,
    pu_link_up: bool,
}

/// Modelled MCB and PU sharing one reel.
#[derive(Debug, Clone)]
pub struct SimulatedBench {
    state: Arc<Mutex<BenchState>>,
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BenchSnapshot {
    pub reel_position: f32,
    pub motion: bool,
    pub mcb_low_power: bool,
    pub pu_docked: bool,
    pub pu_records_left: u16,
    pub pu_record_acks: u32,
    pub mcb_commands: u32,
    pub pu_commands: u32,
}

impl SimulatedBench {
    pub fn new() -> Self {
        let mut state = BenchState {
            mcb_link_up: true,
            pu_link_up: true,
            ..BenchState::default()
        };
        state.pu.docked = true;
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn mcb_transport(&self) -> SimulatedMcb {
        SimulatedMcb {
            state: Arc::clone(&self.state),
        }
    }

    pub fn pu_transport(&self) -> SimulatedPu {
        SimulatedPu {
            state: Arc::clone(&self.state),
        }
    }

    /// Move the reel forward to `now_ms` and emit whatever the devices say.
    pub fn advance(&self, now_ms: u64) {
        let mut state = lock(&self.state);
        state.mcb.advance(now_ms);
        let position = match state.mcb.motion {
            Some(motion) => motion.position_at(now_ms),
            None => state.mcb.position,
        };
        state.pu.docked = position <= DOCK_TOLERANCE_REVS;
        state.pu.uptime_s = (now_ms / 1000) as u32;
    }

    /// Report a motor fault and stop the reel where it is.
    pub fn inject_motion_fault(&self) {
        let mut state = lock(&self.state);
        let now_ms = state.mcb.now_ms;
        if let Some(motion) = state.mcb.motion.take() {
            state.mcb.position = motion.position_at(now_ms);
        }
        state.mcb.outbox.push_back(DeviceMessage::Ascii {
            id: McbAsciiId::MotionFault,
            payload: log_text("8001,0,0,0,0,0,0,0"),
        });
    }

    pub fn set_mcb_link(&self, up: bool) {
        lock(&self.state).mcb_link_up = up;
    }

    pub fn set_pu_link(&self, up: bool) {
        lock(&self.state).pu_link_up = up;
    }

    pub fn snapshot(&self) -> BenchSnapshot {
        let state = lock(&self.state);
        BenchSnapshot {
            reel_position: match state.mcb.motion {
                Some(motion) => motion.position_at(state.mcb.now_ms),
                None => state.mcb.position,
            },
            motion: state.mcb.motion.is_some(),
            mcb_low_power: state.mcb.low_power,
            pu_docked: state.pu.docked,
            pu_records_left: state.pu.records_left,
            pu_record_acks: state.pu.record_acks,
            mcb_commands: state.mcb.commands,
            pu_commands: state.pu.commands,
        }
    }
}

impl Default for SimulatedBench {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct SimulatedMcb {
    state: Arc<Mutex<BenchState>>,
}

impl Transport for SimulatedMcb {
    type Command = McbCommand;
    type Message = McbMessage;

    fn send(&mut self, command: &McbCommand) -> bool {
        let mut state = lock(&self.state);
        if !state.mcb_link_up {
            return false;
        }
        state.mcb.handle(command);
        true
    }

    fn poll(&mut self) -> Option<McbMessage> {
        let mut state = lock(&self.state);
        if !state.mcb_link_up {
            return None;
        }
        state.mcb.outbox.pop_front()
    }
}

#[derive(Debug)]
pub struct SimulatedPu {
    state: Arc<Mutex<BenchState>>,
}

impl Transport for SimulatedPu {
    type Command = PuCommand;
    type Message = PuMessage;

    fn send(&mut self, command: &PuCommand) -> bool {
        let mut state = lock(&self.state);
        if !state.pu_link_up {
            return false;
        }
        state.pu.handle(command);
        true
    }

    fn poll(&mut self) -> Option<PuMessage> {
        let mut state = lock(&self.state);
        if !state.pu_link_up {
            return None;
        }
        state.pu.outbox.pop_front()
    }
}
