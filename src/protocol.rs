use arrayvec::ArrayString;
use heapless::Vec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mode::Mode;
use crate::telemetry::TelemetryRecord;

pub const MAX_INBOUND_SIZE: usize = 512;
pub const MAX_OUTBOUND_SIZE: usize = 16384;
pub const LOG_TEXT_SIZE: usize = 100;
pub const MAX_BINARY_FRAME: usize = 256;

pub const MOTION_TM_SIZE: usize = 32;
pub const TSEN_RECORD_SIZE: usize = 24;
pub const PROFILE_RECORD_SIZE: usize = 128;

/// Upper bound on frames drained from one device per control-loop tick.
pub const MAX_FRAMES_PER_TICK: usize = 32;

pub type LogText = ArrayString<LOG_TEXT_SIZE>;
pub type InboundBuffer = ArrayString<MAX_INBOUND_SIZE>;
pub type BinaryPayload = Vec<u8, MAX_BINARY_FRAME>;

/// Copy `text` into a fixed-size log string, cutting at a char boundary.
pub fn log_text(text: &str) -> LogText {
    let mut out = LogText::new();
    for c in text.chars() {
        if out.try_push(c).is_err() {
            break;
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Device {
    Mcb,
    Pu,
}

impl core::fmt::Display for Device {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Device::Mcb => write!(f, "MCB"),
            Device::Pu => write!(f, "PU"),
        }
    }
}

/// One fully framed inbound message from a device link.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceMessage<A, C, B> {
    Ascii { id: A, payload: LogText },
    Ack { command: C, ok: bool },
    Binary { id: B, bytes: BinaryPayload },
}

/// Serial link to one device. Framing and checksums live behind this trait.
pub trait Transport {
    type Command;
    type Message;

    fn send(&mut self, command: &Self::Command) -> bool;

    fn poll(&mut self) -> Option<Self::Message>;
}

// MCB wire vocabulary

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum McbAsciiId {
    MotionFinished,
    Error,
    MotionFault,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum McbBinaryId {
    MotionTm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum McbCommandId {
    ReelIn,
    ReelOut,
    Dock,
    InNoLatch,
    CancelMotion,
    ZeroReel,
    GoLowPower,
    InAcceleration,
    OutAcceleration,
    DockAcceleration,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum McbCommand {
    ReelIn { length: f32, velocity: f32 },
    ReelOut { length: f32, velocity: f32 },
    Dock { length: f32, velocity: f32 },
    InNoLatch { length: f32, velocity: f32 },
    CancelMotion,
    ZeroReel,
    GoLowPower,
    SetInAcceleration(f32),
    SetOutAcceleration(f32),
    SetDockAcceleration(f32),
}

impl McbCommand {
    pub fn id(&self) -> McbCommandId {
        match self {
            McbCommand::ReelIn { .. } => McbCommandId::ReelIn,
            McbCommand::ReelOut { .. } => McbCommandId::ReelOut,
            McbCommand::Dock { .. } => McbCommandId::Dock,
            McbCommand::InNoLatch { .. } => McbCommandId::InNoLatch,
            McbCommand::CancelMotion => McbCommandId::CancelMotion,
            McbCommand::ZeroReel => McbCommandId::ZeroReel,
            McbCommand::GoLowPower => McbCommandId::GoLowPower,
            McbCommand::SetInAcceleration(_) => McbCommandId::InAcceleration,
            McbCommand::SetOutAcceleration(_) => McbCommandId::OutAcceleration,
            McbCommand::SetDockAcceleration(_) => McbCommandId::DockAcceleration,
        }
    }
}

pub type McbMessage = DeviceMessage<McbAsciiId, McbCommandId, McbBinaryId>;

// PU wire vocabulary

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PuAsciiId {
    Status,
    NoMoreRecords,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PuBinaryId {
    TsenRecord,
    ProfileRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PuCommandId {
    SendStatus,
    SendTsenRecord,
    SendProfileRecord,
    WarmUp,
    Profile,
    RecordAck,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WarmUpParameters {
    pub flash_temp: f32,
    pub heater1_temp: f32,
    pub heater2_temp: f32,
    pub flash_power: u8,
    pub tsen_power: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfileParameters {
    pub t_down: i32,
    pub dwell: u16,
    pub t_up: i32,
    pub profile_rate: u16,
    pub dwell_rate: u16,
    pub tsen: bool,
    pub ropc: bool,
    pub flash: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PuCommand {
    SendStatus,
    SendTsenRecord,
    SendProfileRecord,
    WarmUp(WarmUpParameters),
    Profile(ProfileParameters),
    RecordAck { record: PuBinaryId, ok: bool },
}

impl PuCommand {
    pub fn id(&self) -> PuCommandId {
        match self {
            PuCommand::SendStatus => PuCommandId::SendStatus,
            PuCommand::SendTsenRecord => PuCommandId::SendTsenRecord,
            PuCommand::SendProfileRecord => PuCommandId::SendProfileRecord,
            PuCommand::WarmUp(_) => PuCommandId::WarmUp,
            PuCommand::Profile(_) => PuCommandId::Profile,
            PuCommand::RecordAck { .. } => PuCommandId::RecordAck,
        }
    }
}

pub type PuMessage = DeviceMessage<PuAsciiId, PuCommandId, PuBinaryId>;

// Supervisor link

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Debug,
    Nominal,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AckKind {
    RequestAuthorization,
    Safety,
    Telemetry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Telecommand {
    pub id: u32,
    pub kind: TelecommandKind,
}

/// Closed telecommand surface accepted from the supervisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TelecommandKind {
    Deploy { length: f32 },
    DeployVelocity { velocity: f32 },
    DeployAcceleration { acceleration: f32 },
    Retract { length: f32 },
    RetractVelocity { velocity: f32 },
    RetractAcceleration { acceleration: f32 },
    Dock { length: f32 },
    DockVelocity { velocity: f32 },
    DockAcceleration { acceleration: f32 },
    CancelMotion,
    ZeroReel,
    SetAutonomous,
    SetManual,
    SetSzaMinimum { degrees: f32 },
    SetProfileSize { revs: f32 },
    SetDockAmount { revs: f32 },
    SetDockOvershoot { revs: f32 },
    SetDwellTime { seconds: u16 },
    SetProfilePeriod { seconds: u16 },
    SetNumProfiles { count: u8 },
    SetTimeTrigger { epoch: u32 },
    UseSzaTrigger,
    UseTimeTrigger,
    SetPuWarmupTime { seconds: u16 },
    SetPreprofileTime { seconds: u16 },
    SetMotionTimeout { seconds: u16 },
    SetDockWaitTime { seconds: u16 },
    SetRedockParameters { out_revs: f32, in_revs: f32, attempts: u8 },
    RetryDock { out_revs: f32, in_revs: f32 },
    GetPuStatus,
    RequestTsen,
    OffloadProfileRecords,
    ExitError,
    PuPowerOn,
    PuPowerOff,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SupervisorMessage {
    SetMode { mode: Mode },
    ShutdownWarning,
    Telecommand(Telecommand),
    Ack { kind: AckKind, ack: bool },
    Gps { epoch: u32, sza: f32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Outbound {
    Report { severity: Severity, message: alloc::string::String },
    RequestAuthorization,
    SafetyNotice,
    Telemetry(TelemetryRecord),
    TelecommandAck { id: u32, ack: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("invalid JSON format")]
    InvalidJson,
    #[error("message exceeds buffer size")]
    MessageTooLarge,
    #[error("serialization failed")]
    SerializationError,
    #[error("invalid parameter")]
    InvalidParameter,
}

/// Line codec for the supervisor link: one JSON document per line.
#[derive(Debug)]
pub struct SupervisorCodec {
    inbound_buffer: InboundBuffer,
    decoded: u32,
    rejected: u32,
}

impl SupervisorCodec {
    pub fn new() -> Self {
        Self {
            inbound_buffer: ArrayString::new(),
            decoded: 0,
            rejected: 0,
        }
    }

    pub fn parse_message(&mut self, line: &str) -> Result<SupervisorMessage, ProtocolError> {
        self.inbound_buffer.clear();
        let line = line.trim();
        if self.inbound_buffer.try_push_str(line).is_err() {
            self.rejected += 1;
            return Err(ProtocolError::MessageTooLarge);
        }

        match serde_json::from_str::<SupervisorMessage>(&self.inbound_buffer) {
            Ok(message) => {
                self.decoded += 1;
                Ok(message)
            }
            Err(_) => {
                self.rejected += 1;
                Err(ProtocolError::InvalidJson)
            }
        }
    }

    pub fn serialize_outbound(&self, message: &Outbound) -> Result<alloc::string::String, ProtocolError> {
        let json = serde_json::to_string(message).map_err(|_| ProtocolError::SerializationError)?;
        if json.len() > MAX_OUTBOUND_SIZE {
            return Err(ProtocolError::MessageTooLarge);
        }
        Ok(json)
    }

    pub fn serialize_message(&self, message: &SupervisorMessage) -> Result<alloc::string::String, ProtocolError> {
        let json = serde_json::to_string(message).map_err(|_| ProtocolError::SerializationError)?;
        if json.len() > MAX_INBOUND_SIZE {
            return Err(ProtocolError::MessageTooLarge);
        }
        Ok(json)
    }

    pub fn get_stats(&self) -> (u32, u32) {
        (self.decoded, self.rejected)
    }
}

impl Default for SupervisorCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Split an ASCII parameter payload on commas.
pub fn ascii_fields(payload: &str) -> impl Iterator<Item = &str> {
    payload.split(',').map(str::trim).filter(|field| !field.is_empty())
}
