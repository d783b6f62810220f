use heapless::Vec;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use thiserror::Error;

use crate::protocol::{Severity, MOTION_TM_SIZE};

pub const MOTION_TM_CAPACITY: usize = 4096;
pub const MOTION_TM_SYNC: u8 = 0xA5;

const HEADER_SIZE: usize = 4;
const FRAME_OVERHEAD: usize = 3; // sync + u16 elapsed

const_assert!(MOTION_TM_CAPACITY >= HEADER_SIZE + FRAME_OVERHEAD + MOTION_TM_SIZE);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TelemetryError {
    #[error("motion TM frame is {actual} bytes, expected {expected}")]
    InvalidSize { expected: usize, actual: usize },
    #[error("motion TM buffer full")]
    BufferFull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TelemetryKind {
    Motion,
    Tsen,
    ProfileRecord,
}

/// One telemetry message for the supervisor: a binary payload plus a
/// human-readable summary line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub sequence_number: u32,
    pub kind: TelemetryKind,
    pub severity: Severity,
    pub summary: alloc::string::String,
    #[serde(with = "serde_bytes")]
    pub payload: alloc::vec::Vec<u8>,
}

/// Accumulates MCB motion telemetry for the motion in progress.
///
/// Layout: a big-endian u32 epoch header written when the motion starts,
/// then per frame a `0xA5` sync byte, the big-endian u16 tenths of a second
/// since motion start, and the raw frame.
#[derive(Debug, Clone)]
pub struct MotionTelemetry {
    buffer: Vec<u8, MOTION_TM_CAPACITY>,
    start_ms: u64,
    frames: u16,
    dropped: u16,
}

impl MotionTelemetry {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            start_ms: 0,
            frames: 0,
            dropped: 0,
        }
    }

    pub fn begin(&mut self, epoch: u32, now_ms: u64) {
        self.buffer.clear();
        self.frames = 0;
        self.dropped = 0;
        self.start_ms = now_ms;
        // capacity is checked at compile time
        let _ = self.buffer.extend_from_slice(&epoch.to_be_bytes());
    }

    pub fn append_frame(&mut self, now_ms: u64, frame: &[u8]) -> Result<(), TelemetryError> {
        if frame.len() != MOTION_TM_SIZE {
            return Err(TelemetryError::InvalidSize {
                expected: MOTION_TM_SIZE,
                actual: frame.len(),
            });
        }

        if self.buffer.len() + FRAME_OVERHEAD + frame.len() > MOTION_TM_CAPACITY {
            self.dropped = self.dropped.saturating_add(1);
            return Err(TelemetryError::BufferFull);
        }

        let tenths = (now_ms.saturating_sub(self.start_ms) / 100).min(u64::from(u16::MAX)) as u16;

        // all three pushes fit after the capacity check above
        let _ = self.buffer.push(MOTION_TM_SYNC);
        let _ = self.buffer.extend_from_slice(&tenths.to_be_bytes());
        let _ = self.buffer.extend_from_slice(frame);
        self.frames += 1;
        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn frame_count(&self) -> u16 {
        self.frames
    }

    pub fn dropped_count(&self) -> u16 {
        self.dropped
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.frames = 0;
    }
}

impl Default for MotionTelemetry {
    fn default() -> Self {
        Self::new()
    }
}
