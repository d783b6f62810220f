use heapless::Vec;
use serde::{Deserialize, Serialize};

use super::{push_event, SessionError, SessionEvent, SessionEvents, SessionStats};
use crate::ack::{AckSlot, AckState};
use crate::protocol::{
    ascii_fields, log_text, Device, DeviceMessage, LogText, McbAsciiId, McbBinaryId, McbCommand,
    McbCommandId, McbMessage, Transport, MAX_FRAMES_PER_TICK,
};
use crate::telemetry::{MotionTelemetry, TelemetryError};

pub type McbTransport = Box<dyn Transport<Command = McbCommand, Message = McbMessage> + Send>;

/// Byte offset of the reel position (big-endian f32) inside a motion TM frame.
pub const REEL_POSITION_OFFSET: usize = 21;

const MAX_HOUSEKEEPING: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MotionKind {
    #[default]
    None,
    ReelIn,
    ReelOut,
    Dock,
    InNoLatch,
}

impl MotionKind {
    pub const ALL: [MotionKind; 4] = [
        MotionKind::ReelIn,
        MotionKind::ReelOut,
        MotionKind::Dock,
        MotionKind::InNoLatch,
    ];

    /// Motions that end against the dock, where a motion fault means "seated".
    pub fn ends_in_dock(self) -> bool {
        matches!(self, MotionKind::Dock | MotionKind::InNoLatch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionCommand {
    pub kind: MotionKind,
    pub length_revs: f32,
    pub velocity: f32,
}

impl MotionCommand {
    pub const NONE: MotionCommand = MotionCommand {
        kind: MotionKind::None,
        length_revs: 0.0,
        velocity: 0.0,
    };

    pub fn new(kind: MotionKind, length_revs: f32, velocity: f32) -> Self {
        Self {
            kind,
            length_revs,
            velocity,
        }
    }

    /// Upper bound on the motion in seconds. Velocity is in rev/min.
    pub fn max_duration_secs(&self, motion_timeout: u16) -> u32 {
        if self.velocity <= 0.0 {
            return u32::from(motion_timeout);
        }
        let travel = 60.0 * self.length_revs / self.velocity;
        travel.max(0.0).ceil() as u32 + u32::from(motion_timeout)
    }

    fn to_wire(self) -> Option<McbCommand> {
        let (length, velocity) = (self.length_revs, self.velocity);
        match self.kind {
            MotionKind::None => None,
            MotionKind::ReelIn => Some(McbCommand::ReelIn { length, velocity }),
            MotionKind::ReelOut => Some(McbCommand::ReelOut { length, velocity }),
            MotionKind::Dock => Some(McbCommand::Dock { length, velocity }),
            MotionKind::InNoLatch => Some(McbCommand::InNoLatch { length, velocity }),
        }
    }
}

impl Default for MotionCommand {
    fn default() -> Self {
        Self::NONE
    }
}

/// Session for the motor-control board.
///
/// `motion_ongoing` is set only by the acknowledgment of a motion-start
/// command and cleared only by a motion-finished (or terminal fault) frame.
pub struct McbSession {
    transport: McbTransport,
    motion: MotionCommand,
    motion_ongoing: bool,
    dock_ongoing: bool,
    low_power: bool,
    motion_ack: AckSlot<McbCommandId>,
    low_power_ack: AckSlot<McbCommandId>,
    housekeeping: Vec<McbCommandId, MAX_HOUSEKEEPING>,
    telemetry: MotionTelemetry,
    motion_fault: Option<[u16; 8]>,
    reel_position: Option<f32>,
    stats: SessionStats,
}

impl core::fmt::Debug for McbSession {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("McbSession")
            .field("motion", &self.motion)
            .field("motion_ongoing", &self.motion_ongoing)
            .field("dock_ongoing", &self.dock_ongoing)
            .field("low_power", &self.low_power)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl McbSession {
    pub fn new(transport: McbTransport) -> Self {
        Self {
            transport,
            motion: MotionCommand::NONE,
            motion_ongoing: false,
            dock_ongoing: false,
            low_power: false,
            motion_ack: AckSlot::new(),
            low_power_ack: AckSlot::new(),
            housekeeping: Vec::new(),
            telemetry: MotionTelemetry::new(),
            motion_fault: None,
            reel_position: None,
            stats: SessionStats::default(),
        }
    }

    /// Drain and classify inbound frames.
    pub fn poll(&mut self, now_ms: u64, epoch: u32, events: &mut SessionEvents) {
        for _ in 0..MAX_FRAMES_PER_TICK {
            let Some(message) = self.transport.poll() else {
                break;
            };
            self.stats.frames_received += 1;

            match message {
                DeviceMessage::Ascii { id, payload } => {
                    self.stats.ascii_frames += 1;
                    self.handle_ascii(id, &payload, events);
                }
                DeviceMessage::Ack { command, ok } => {
                    self.stats.ack_frames += 1;
                    self.handle_ack(command, ok, now_ms, epoch, events);
                }
                DeviceMessage::Binary { id, bytes } => {
                    self.stats.binary_frames += 1;
                    self.handle_binary(id, &bytes, now_ms, events);
                }
            }
        }
    }

    fn handle_ascii(&mut self, id: McbAsciiId, payload: &str, events: &mut SessionEvents) {
        match id {
            McbAsciiId::MotionFinished => {
                tracing::info!("MCB motion finished");
                self.end_motion();
                push_event(events, SessionEvent::MotionFinished);
            }
            McbAsciiId::Error => {
                // the MCB stops the reel on any error it reports
                self.end_motion();
                let detail = log_text(&format!("MCB error: {}", payload));
                push_event(
                    events,
                    SessionEvent::DeviceFault {
                        device: Device::Mcb,
                        detail,
                    },
                );
            }
            McbAsciiId::MotionFault => {
                if self.dock_ongoing {
                    tracing::info!("Dock condition detected");
                    self.end_motion();
                    push_event(events, SessionEvent::DockDetected);
                    return;
                }

                self.end_motion();
                let detail = match parse_fault_words(payload) {
                    Some(words) => {
                        self.motion_fault = Some(words);
                        let mut text = LogText::new();
                        let _ = core::fmt::Write::write_fmt(
                            &mut text,
                            format_args!(
                                "MCB Fault: {:x},{:x},{:x},{:x},{:x},{:x},{:x},{:x}",
                                words[0], words[1], words[2], words[3], words[4], words[5], words[6], words[7]
                            ),
                        );
                        text
                    }
                    None => log_text("MCB Fault: error receiving parameters"),
                };
                push_event(
                    events,
                    SessionEvent::DeviceFault {
                        device: Device::Mcb,
                        detail,
                    },
                );
            }
        }
    }

    fn handle_ack(
        &mut self,
        command: McbCommandId,
        ok: bool,
        now_ms: u64,
        epoch: u32,
        events: &mut SessionEvents,
    ) {
        if self.motion_ack.expects(command) {
            if ok {
                self.motion_ack.disarm();
                self.note_motion_start(now_ms, epoch);
                push_event(events, SessionEvent::MotionStarted(self.motion.kind));
            } else {
                tracing::warn!("MCB NAK for {:?}", command);
                self.motion_ack.resolve(command, false);
            }
            return;
        }

        if self.low_power_ack.expects(command) {
            self.low_power_ack.resolve(command, ok);
            if ok {
                tracing::info!("MCB in low power");
                self.low_power = true;
                push_event(events, SessionEvent::LowPower);
            }
            return;
        }

        if let Some(position) = self.housekeeping.iter().position(|pending| *pending == command) {
            self.housekeeping.remove(position);
            if ok {
                tracing::debug!("MCB acknowledged {:?}", command);
            } else {
                tracing::warn!("MCB rejected {:?}", command);
            }
            return;
        }

        self.stats.unexpected_acks += 1;
        tracing::warn!("Unexpected MCB ack for {:?} discarded", command);
    }

    fn handle_binary(&mut self, id: McbBinaryId, bytes: &[u8], now_ms: u64, events: &mut SessionEvents) {
        match id {
            McbBinaryId::MotionTm => match self.telemetry.append_frame(now_ms, bytes) {
                Ok(()) => {
                    self.reel_position = read_reel_position(bytes);
                    if let Some(position) = self.reel_position {
                        tracing::debug!("Reel position: {}", position as i32);
                    }
                }
                Err(TelemetryError::InvalidSize { expected, actual }) => {
                    self.stats.rejected_frames += 1;
                    let detail = log_text(&format!("Invalid motion TM size {} (expected {})", actual, expected));
                    push_event(
                        events,
                        SessionEvent::ProtocolFault {
                            device: Device::Mcb,
                            detail,
                        },
                    );
                }
                Err(TelemetryError::BufferFull) => {
                    tracing::error!("Unable to add frame to MCB TM buffer");
                }
            },
        }
    }

    fn note_motion_start(&mut self, now_ms: u64, epoch: u32) {
        self.motion_ongoing = true;
        self.low_power = false;
        self.dock_ongoing = self.motion.kind.ends_in_dock();
        self.motion_fault = None;
        self.telemetry.begin(epoch, now_ms);
    }

    fn end_motion(&mut self) {
        self.motion_ongoing = false;
        self.dock_ongoing = false;
        self.motion.kind = MotionKind::None;
    }

    fn send(&mut self, command: &McbCommand) -> Result<(), SessionError> {
        if self.transport.send(command) {
            self.stats.commands_sent += 1;
            Ok(())
        } else {
            self.stats.send_failures += 1;
            tracing::warn!("MCB link refused {:?}", command.id());
            Err(SessionError::SendFailed(Device::Mcb))
        }
    }

    fn send_housekeeping(&mut self, command: McbCommand) -> Result<(), SessionError> {
        if self.housekeeping.is_full() {
            self.housekeeping.remove(0);
        }
        let _ = self.housekeeping.push(command.id());
        self.send(&command)
    }

    /// Command a motion. Refused while another motion is ongoing.
    pub fn start_motion(&mut self, command: MotionCommand) -> Result<(), SessionError> {
        if self.motion_ongoing {
            return Err(SessionError::MotionOngoing);
        }
        let wire = command.to_wire().ok_or(SessionError::NoMotion)?;
        let valid = command.length_revs.is_finite()
            && command.length_revs > 0.0
            && command.velocity.is_finite()
            && command.velocity > 0.0;
        if !valid {
            return Err(SessionError::InvalidMotion);
        }

        self.motion = command;
        self.motion_ack.arm(wire.id());
        self.send(&wire)
    }

    /// NAK status of the last motion-start command, read-and-reset.
    pub fn take_motion_ack(&mut self) -> AckState {
        self.motion_ack.take()
    }

    pub fn cancel_motion(&mut self) -> Result<(), SessionError> {
        self.send_housekeeping(McbCommand::CancelMotion)
    }

    pub fn zero_reel(&mut self) -> Result<(), SessionError> {
        self.send_housekeeping(McbCommand::ZeroReel)
    }

    pub fn set_acceleration(&mut self, command: McbCommand) -> Result<(), SessionError> {
        match command {
            McbCommand::SetInAcceleration(_)
            | McbCommand::SetOutAcceleration(_)
            | McbCommand::SetDockAcceleration(_) => self.send_housekeeping(command),
            _ => Err(SessionError::InvalidMotion),
        }
    }

    pub fn go_low_power(&mut self) -> Result<(), SessionError> {
        self.low_power = false;
        self.low_power_ack.arm(McbCommandId::GoLowPower);
        self.send(&McbCommand::GoLowPower)
    }

    pub fn take_low_power_ack(&mut self) -> AckState {
        self.low_power_ack.take()
    }

    pub fn motion_ongoing(&self) -> bool {
        self.motion_ongoing
    }

    pub fn dock_ongoing(&self) -> bool {
        self.dock_ongoing
    }

    pub fn low_power(&self) -> bool {
        self.low_power
    }

    pub fn motion(&self) -> MotionCommand {
        self.motion
    }

    pub fn motion_telemetry(&self) -> &MotionTelemetry {
        &self.telemetry
    }

    pub fn last_motion_fault(&self) -> Option<[u16; 8]> {
        self.motion_fault
    }

    pub fn reel_position(&self) -> Option<f32> {
        self.reel_position
    }

    pub fn get_stats(&self) -> &SessionStats {
        &self.stats
    }
}

fn parse_fault_words(payload: &str) -> Option<[u16; 8]> {
    let mut words = [0u16; 8];
    let mut count = 0;
    for field in ascii_fields(payload) {
        if count == words.len() {
            return None;
        }
        let digits = field.trim_start_matches("0x");
        words[count] = u16::from_str_radix(digits, 16).ok()?;
        count += 1;
    }
    (count == words.len()).then_some(words)
}

fn read_reel_position(frame: &[u8]) -> Option<f32> {
    let bytes = frame.get(REEL_POSITION_OFFSET..REEL_POSITION_OFFSET + 4)?;
    Some(f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}
