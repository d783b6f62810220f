use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

/// Discrete outputs of the board.
pub trait Discretes {
    /// Safe signal line read by the supervisor.
    fn set_safe_signal(&mut self, asserted: bool);

    /// Power enable for the profiling unit.
    fn set_pu_power(&mut self, enabled: bool);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscreteState {
    pub safe_signal: bool,
    pub pu_power: bool,
    pub safe_signal_edges: u32,
    pub pu_power_edges: u32,
}

/// Latching outputs shared between the controller and whoever observes
/// them (the simulator display, tests).
#[derive(Debug, Clone, Default)]
pub struct SharedDiscretes {
    state: Arc<Mutex<DiscreteState>>,
}

impl SharedDiscretes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> DiscreteState {
        match self.state.lock() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn update(&self, apply: impl FnOnce(&mut DiscreteState)) {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        apply(&mut *guard);
    }
}

impl Discretes for SharedDiscretes {
    fn set_safe_signal(&mut self, asserted: bool) {
        self.update(|state| {
            if state.safe_signal != asserted {
                state.safe_signal_edges += 1;
            }
            state.safe_signal = asserted;
        });
        tracing::debug!("Safe signal {}", if asserted { "asserted" } else { "released" });
    }

    fn set_pu_power(&mut self, enabled: bool) {
        self.update(|state| {
            if state.pu_power != enabled {
                state.pu_power_edges += 1;
            }
            state.pu_power = enabled;
        });
        tracing::debug!("PU power {}", if enabled { "enabled" } else { "disabled" });
    }
}
