use heapless::Deque;
use serde::{Deserialize, Serialize};

use crate::ack::{AckSlot, AckState};
use crate::protocol::{AckKind, Outbound, Severity};
use crate::telemetry::{TelemetryKind, TelemetryRecord};

pub const OUTBOUND_QUEUE_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeReference {
    pub epoch: u32,
    pub at_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SupervisorStats {
    pub reports: [u32; 4],
    pub dropped_outbound: u32,
    pub ra_sent: u32,
    pub safety_notices_sent: u32,
    pub telemetry_sent: u32,
    pub telemetry_resent: u32,
    pub telecommands_acked: u32,
    pub telecommands_naked: u32,
    pub unmatched_acks: u32,
}

/// Core side of the link to the supervising flight computer.
///
/// Everything the core says upstream goes through here. When the outbound
/// queue is full the oldest message is dropped.
#[derive(Debug)]
pub struct SupervisorLink {
    outbound: Deque<Outbound, OUTBOUND_QUEUE_SIZE>,
    ra_ack: AckSlot<AckKind>,
    safety_ack: AckSlot<AckKind>,
    tm_ack: AckSlot<AckKind>,
    time: Option<TimeReference>,
    sza: Option<f32>,
    last_telemetry: Option<TelemetryRecord>,
    telemetry_sequence: u32,
    stats: SupervisorStats,
}

impl SupervisorLink {
    pub fn new() -> Self {
        Self {
            outbound: Deque::new(),
            ra_ack: AckSlot::new(),
            safety_ack: AckSlot::new(),
            tm_ack: AckSlot::new(),
            time: None,
            sza: None,
            last_telemetry: None,
            telemetry_sequence: 0,
            stats: SupervisorStats::default(),
        }
    }

    fn enqueue(&mut self, message: Outbound) {
        if self.outbound.is_full() {
            let _ = self.outbound.pop_front();
            self.stats.dropped_outbound += 1;
            tracing::warn!("Supervisor outbound queue full, dropped oldest message");
        }
        // space was made above
        let _ = self.outbound.push_back(message);
    }

    pub fn report(&mut self, severity: Severity, message: &str) {
        match severity {
            Severity::Debug => tracing::debug!("{}", message),
            Severity::Nominal => tracing::info!("{}", message),
            Severity::Warning => tracing::warn!("{}", message),
            Severity::Critical => tracing::error!("{}", message),
        }
        self.stats.reports[severity as usize] += 1;
        self.enqueue(Outbound::Report {
            severity,
            message: alloc::string::ToString::to_string(message),
        });
    }

    pub fn request_authorization(&mut self) {
        self.ra_ack.arm(AckKind::RequestAuthorization);
        self.stats.ra_sent += 1;
        tracing::info!("Sending RA");
        self.enqueue(Outbound::RequestAuthorization);
    }

    pub fn send_safety_notice(&mut self) {
        self.safety_ack.arm(AckKind::Safety);
        self.stats.safety_notices_sent += 1;
        tracing::info!("Sending safety message");
        self.enqueue(Outbound::SafetyNotice);
    }

    pub fn send_telemetry(
        &mut self,
        kind: TelemetryKind,
        severity: Severity,
        summary: &str,
        payload: &[u8],
    ) -> u32 {
        self.telemetry_sequence = self.telemetry_sequence.wrapping_add(1);
        let record = TelemetryRecord {
            sequence_number: self.telemetry_sequence,
            kind,
            severity,
            summary: alloc::string::ToString::to_string(summary),
            payload: payload.to_vec(),
        };

        self.tm_ack.arm(AckKind::Telemetry);
        self.stats.telemetry_sent += 1;
        tracing::info!("TM {:?} #{}: {}", kind, record.sequence_number, summary);
        self.last_telemetry = Some(record.clone());
        self.enqueue(Outbound::Telemetry(record));
        self.telemetry_sequence
    }

    /// Send the last telemetry record again. Returns `false` if nothing was sent yet.
    pub fn resend_telemetry(&mut self) -> bool {
        let Some(record) = self.last_telemetry.clone() else {
            return false;
        };
        self.tm_ack.arm(AckKind::Telemetry);
        self.stats.telemetry_resent += 1;
        tracing::error!("Needed to resend TM #{}", record.sequence_number);
        self.enqueue(Outbound::Telemetry(record));
        true
    }

    pub fn acknowledge_telecommand(&mut self, id: u32, ack: bool) {
        if ack {
            self.stats.telecommands_acked += 1;
        } else {
            self.stats.telecommands_naked += 1;
        }
        self.enqueue(Outbound::TelecommandAck { id, ack });
    }

    pub fn handle_ack(&mut self, kind: AckKind, ack: bool) {
        let slot = match kind {
            AckKind::RequestAuthorization => &mut self.ra_ack,
            AckKind::Safety => &mut self.safety_ack,
            AckKind::Telemetry => &mut self.tm_ack,
        };
        if !slot.resolve(kind, ack) {
            self.stats.unmatched_acks += 1;
            tracing::debug!("Discarded {:?} ack with nothing outstanding", kind);
        }
    }

    pub fn take_ra_ack(&mut self) -> AckState {
        self.ra_ack.take()
    }

    pub fn take_safety_ack(&mut self) -> AckState {
        self.safety_ack.take()
    }

    pub fn take_tm_ack(&mut self) -> AckState {
        self.tm_ack.take()
    }

    pub fn set_gps(&mut self, epoch: u32, sza: f32, now_ms: u64) {
        if self.time.is_none() {
            tracing::info!("Time reference acquired: {}", epoch);
        }
        self.time = Some(TimeReference { epoch, at_ms: now_ms });
        self.sza = Some(sza);
    }

    pub fn time_valid(&self) -> bool {
        self.time.is_some()
    }

    pub fn epoch(&self, now_ms: u64) -> Option<u32> {
        self.time.map(|reference| {
            let elapsed = now_ms.saturating_sub(reference.at_ms) / 1000;
            reference.epoch.saturating_add(elapsed.min(u64::from(u32::MAX)) as u32)
        })
    }

    pub fn sza(&self) -> Option<f32> {
        self.sza
    }

    pub fn pop_outbound(&mut self) -> Option<Outbound> {
        self.outbound.pop_front()
    }

    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }

    pub fn report_count(&self, severity: Severity) -> u32 {
        self.stats.reports[severity as usize]
    }

    pub fn get_stats(&self) -> &SupervisorStats {
        &self.stats
    }
}

impl Default for SupervisorLink {
    fn default() -> Self {
        Self::new()
    }
}
