use crate::action::{ActionId, ActionRegistry};
use heapless::Vec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_SCHEDULED_ACTIONS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Deadline {
    /// Relative delay in seconds from the current tick.
    After(u32),
    /// Absolute monotonic time in milliseconds.
    At(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledAction {
    pub action: ActionId,
    pub fire_at_ms: u64,
    pub scheduled_at_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SchedulerStats {
    pub total_scheduled: u32,
    pub total_fired: u32,
    pub total_replaced: u32,
    pub total_cancelled: u32,
    pub total_rejected: u32,
    pub currently_scheduled: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("timer table full, cannot arm {0:?}")]
    TableFull(ActionId),
}

/// One-shot timer table feeding the [`ActionRegistry`].
///
/// Scheduling an action that is already pending replaces its deadline.
/// A full table is reported to the caller, which must not continue
/// without the timeout it tried to arm.
#[derive(Debug)]
pub struct ActionScheduler {
    pending: Vec<ScheduledAction, MAX_SCHEDULED_ACTIONS>,
    now_ms: u64,
    stats: SchedulerStats,
}

impl ActionScheduler {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
            now_ms: 0,
            stats: SchedulerStats::default(),
        }
    }

    /// Time of the most recent tick, used as the base for relative deadlines.
    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    /// Bring the scheduler clock forward without firing anything.
    pub fn set_time(&mut self, now_ms: u64) {
        self.now_ms = self.now_ms.max(now_ms);
    }

    pub fn schedule(&mut self, action: ActionId, deadline: Deadline) -> Result<(), ScheduleError> {
        let fire_at_ms = match deadline {
            Deadline::After(seconds) => self.now_ms + u64::from(seconds) * 1000,
            Deadline::At(at_ms) => at_ms,
        };

        if let Some(existing) = self.pending.iter_mut().find(|entry| entry.action == action) {
            existing.fire_at_ms = fire_at_ms;
            existing.scheduled_at_ms = self.now_ms;
            self.stats.total_replaced += 1;
            self.stats.total_scheduled += 1;
            return Ok(());
        }

        let entry = ScheduledAction {
            action,
            fire_at_ms,
            scheduled_at_ms: self.now_ms,
        };

        if self.pending.push(entry).is_err() {
            self.stats.total_rejected += 1;
            tracing::error!("Scheduler table full, unable to arm {:?}", action);
            return Err(ScheduleError::TableFull(action));
        }

        debug_assert!(
            self.pending.len() <= MAX_SCHEDULED_ACTIONS,
            "Scheduler table length {} exceeds capacity {}",
            self.pending.len(),
            MAX_SCHEDULED_ACTIONS
        );

        self.stats.total_scheduled += 1;
        self.stats.currently_scheduled = self.pending.len() as u8;
        Ok(())
    }

    /// Raise every action whose deadline has passed. Each entry fires once
    /// and is removed from the table.
    pub fn tick(&mut self, now_ms: u64, registry: &mut ActionRegistry) -> usize {
        self.set_time(now_ms);
        let now = self.now_ms;
        let mut fired = 0;

        self.pending.retain(|entry| {
            if entry.fire_at_ms <= now {
                registry.raise(entry.action);
                fired += 1;
                false
            } else {
                true
            }
        });

        self.stats.total_fired += fired as u32;
        self.stats.currently_scheduled = self.pending.len() as u8;
        fired
    }

    pub fn cancel(&mut self, action: ActionId) -> bool {
        let before = self.pending.len();
        self.pending.retain(|entry| entry.action != action);
        let removed = before != self.pending.len();
        if removed {
            self.stats.total_cancelled += 1;
        }
        self.stats.currently_scheduled = self.pending.len() as u8;
        removed
    }

    pub fn is_pending(&self, action: ActionId) -> bool {
        self.pending.iter().any(|entry| entry.action == action)
    }

    pub fn deadline(&self, action: ActionId) -> Option<u64> {
        self.pending
            .iter()
            .find(|entry| entry.action == action)
            .map(|entry| entry.fire_at_ms)
    }

    pub fn get_stats(&self) -> &SchedulerStats {
        &self.stats
    }

    pub fn get_scheduled_actions(&self) -> &[ScheduledAction] {
        &self.pending
    }

    pub fn clear_all_scheduled(&mut self) {
        self.stats.total_cancelled += self.pending.len() as u32;
        self.pending.clear();
        self.stats.currently_scheduled = 0;
    }
}

impl Default for ActionScheduler {
    fn default() -> Self {
        Self::new()
    }
}
