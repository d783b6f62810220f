use heapless::Vec;
use serde::{Deserialize, Serialize};

use super::{push_event, SessionError, SessionEvent, SessionEvents, SessionStats};
use crate::ack::{AckSlot, AckState};
use crate::protocol::{
    ascii_fields, log_text, Device, DeviceMessage, ProfileParameters, PuAsciiId, PuBinaryId, PuCommand,
    PuCommandId, PuMessage, Transport, WarmUpParameters, MAX_FRAMES_PER_TICK, PROFILE_RECORD_SIZE,
    TSEN_RECORD_SIZE,
};

pub type PuTransport = Box<dyn Transport<Command = PuCommand, Message = PuMessage> + Send>;

// both record kinds land in the same buffer
static_assertions::const_assert!(TSEN_RECORD_SIZE <= PROFILE_RECORD_SIZE);

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PuStatus {
    pub time: u32,
    pub v_battery: f32,
    pub i_charge: f32,
    pub therm1: f32,
    pub therm2: f32,
    pub heater_stat: u8,
}

impl PuStatus {
    pub fn parse(payload: &str) -> Option<Self> {
        let mut fields = ascii_fields(payload);
        let status = Self {
            time: fields.next()?.parse().ok()?,
            v_battery: fields.next()?.parse().ok()?,
            i_charge: fields.next()?.parse().ok()?,
            therm1: fields.next()?.parse().ok()?,
            therm2: fields.next()?.parse().ok()?,
            heater_stat: fields.next()?.parse().ok()?,
        };
        fields.next().is_none().then_some(status)
    }
}

impl core::fmt::Display for PuStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{}, {:.2}, {:.2}, {:.2}, {:.2}, {}",
            self.time, self.v_battery, self.i_charge, self.therm1, self.therm2, self.heater_stat
        )
    }
}

/// Session for the profiling unit.
pub struct PuSession {
    transport: PuTransport,
    status: PuStatus,
    status_count: u32,
    warmup_ack: AckSlot<PuCommandId>,
    profile_ack: AckSlot<PuCommandId>,
    tsen_received: bool,
    record_received: bool,
    no_more_records: bool,
    last_record: Vec<u8, PROFILE_RECORD_SIZE>,
    records_received: u32,
    stats: SessionStats,
}

impl core::fmt::Debug for PuSession {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PuSession")
            .field("status", &self.status)
            .field("status_count", &self.status_count)
            .field("records_received", &self.records_received)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl PuSession {
    pub fn new(transport: PuTransport) -> Self {
        Self {
            transport,
            status: PuStatus::default(),
            status_count: 0,
            warmup_ack: AckSlot::new(),
            profile_ack: AckSlot::new(),
            tsen_received: false,
            record_received: false,
            no_more_records: false,
            last_record: Vec::new(),
            records_received: 0,
            stats: SessionStats::default(),
        }
    }

    pub fn poll(&mut self, events: &mut SessionEvents) {
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
                    self.handle_ack(command, ok);
                }
                DeviceMessage::Binary { id, bytes } => {
                    self.stats.binary_frames += 1;
                    self.handle_binary(id, &bytes, events);
                }
            }
        }
    }

    fn handle_ascii(&mut self, id: PuAsciiId, payload: &str, events: &mut SessionEvents) {
        match id {
            PuAsciiId::Status => {
                self.status = PuStatus::parse(payload).unwrap_or_else(|| {
                    tracing::warn!("Unable to parse PU status '{}'", payload);
                    PuStatus::default()
                });
                self.status_count = self.status_count.wrapping_add(1);
                push_event(events, SessionEvent::PuStatus(self.status));
            }
            PuAsciiId::NoMoreRecords => {
                self.no_more_records = true;
                push_event(events, SessionEvent::NoMoreRecords);
            }
            PuAsciiId::Error => {
                let detail = log_text(&format!("PU error: {}", payload));
                push_event(
                    events,
                    SessionEvent::DeviceFault {
                        device: Device::Pu,
                        detail,
                    },
                );
            }
        }
    }

    fn handle_ack(&mut self, command: PuCommandId, ok: bool) {
        let slot = match command {
            PuCommandId::WarmUp => &mut self.warmup_ack,
            PuCommandId::Profile => &mut self.profile_ack,
            _ => {
                self.stats.unexpected_acks += 1;
                tracing::warn!("Unexpected PU ack for {:?} discarded", command);
                return;
            }
        };

        if !slot.resolve(command, ok) {
            self.stats.unexpected_acks += 1;
            tracing::warn!("Unexpected PU ack for {:?} discarded", command);
        } else if !ok {
            tracing::warn!("PU NAK for {:?}", command);
        }
    }

    fn handle_binary(&mut self, id: PuBinaryId, bytes: &[u8], events: &mut SessionEvents) {
        let expected = match id {
            PuBinaryId::TsenRecord => TSEN_RECORD_SIZE,
            PuBinaryId::ProfileRecord => PROFILE_RECORD_SIZE,
        };

        if bytes.len() != expected {
            self.stats.rejected_frames += 1;
            let _ = self.send(&PuCommand::RecordAck { record: id, ok: false });
            let detail = log_text(&format!("PU {:?} is {} bytes, expected {}", id, bytes.len(), expected));
            push_event(
                events,
                SessionEvent::ProtocolFault {
                    device: Device::Pu,
                    detail,
                },
            );
            return;
        }

        self.last_record.clear();
        // length checked against the record size above
        let _ = self.last_record.extend_from_slice(bytes);
        self.records_received += 1;
        let _ = self.send(&PuCommand::RecordAck { record: id, ok: true });

        match id {
            PuBinaryId::TsenRecord => {
                self.tsen_received = true;
                push_event(events, SessionEvent::TsenReceived);
            }
            PuBinaryId::ProfileRecord => {
                self.record_received = true;
                push_event(events, SessionEvent::ProfileRecordReceived);
            }
        }
    }

    fn send(&mut self, command: &PuCommand) -> Result<(), SessionError> {
        if self.transport.send(command) {
            self.stats.commands_sent += 1;
            Ok(())
        } else {
            self.stats.send_failures += 1;
            tracing::warn!("PU link refused {:?}", command.id());
            Err(SessionError::SendFailed(Device::Pu))
        }
    }

    pub fn request_status(&mut self) -> Result<(), SessionError> {
        self.send(&PuCommand::SendStatus)
    }

    pub fn request_tsen(&mut self) -> Result<(), SessionError> {
        self.tsen_received = false;
        self.no_more_records = false;
        self.send(&PuCommand::SendTsenRecord)
    }

    pub fn request_profile_record(&mut self) -> Result<(), SessionError> {
        self.record_received = false;
        self.no_more_records = false;
        self.send(&PuCommand::SendProfileRecord)
    }

    pub fn warm_up(&mut self, parameters: WarmUpParameters) -> Result<(), SessionError> {
        self.warmup_ack.arm(PuCommandId::WarmUp);
        self.send(&PuCommand::WarmUp(parameters))
    }

    pub fn start_profile(&mut self, parameters: ProfileParameters) -> Result<(), SessionError> {
        self.profile_ack.arm(PuCommandId::Profile);
        self.send(&PuCommand::Profile(parameters))
    }

    pub fn take_warmup_ack(&mut self) -> AckState {
        self.warmup_ack.take()
    }

    pub fn take_profile_ack(&mut self) -> AckState {
        self.profile_ack.take()
    }

    pub fn take_tsen(&mut self) -> bool {
        core::mem::take(&mut self.tsen_received)
    }

    pub fn take_profile_record(&mut self) -> bool {
        core::mem::take(&mut self.record_received)
    }

    pub fn take_no_more_records(&mut self) -> bool {
        core::mem::take(&mut self.no_more_records)
    }

    pub fn status(&self) -> PuStatus {
        self.status
    }

    /// Increments on every status frame, parseable or not.
    pub fn status_count(&self) -> u32 {
        self.status_count
    }

    pub fn last_record(&self) -> &[u8] {
        &self.last_record
    }

    pub fn records_received(&self) -> u32 {
        self.records_received
    }

    pub fn get_stats(&self) -> &SessionStats {
        &self.stats
    }
}
