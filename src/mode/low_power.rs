use super::{BasicState, ModeHandler};
use crate::context::Context;

/// Shed load: the MCB is told to power down on entry.
#[derive(Debug, Clone)]
pub struct LowPowerMode {
    state: BasicState,
}

impl LowPowerMode {
    pub fn new() -> Self {
        Self {
            state: BasicState::Entry,
        }
    }

    pub fn state(&self) -> BasicState {
        self.state
    }
}

impl Default for LowPowerMode {
    fn default() -> Self {
        Self::new()
    }
}

impl ModeHandler for LowPowerMode {
    fn enter(&mut self) {
        self.state = BasicState::Entry;
    }

    fn step(&mut self, ctx: &mut Context<'_>) {
        match self.state {
            BasicState::Entry => {
                tracing::info!("Entering LP");
                let _ = ctx.mcb.go_low_power();
                self.state = BasicState::Loop;
            }
            BasicState::Loop => {}
            BasicState::Shutdown => {
                tracing::info!("Shutdown warning received in LP");
                self.state = BasicState::Loop;
            }
            BasicState::Exit => tracing::info!("Exiting LP"),
        }
    }

    fn force_exit(&mut self) {
        self.state = BasicState::Exit;
    }

    fn force_shutdown(&mut self) {
        self.state = BasicState::Shutdown;
    }

    fn substate(&self) -> alloc::string::String {
        format!("{:?}", self.state)
    }
}
