use super::{BasicState, ModeHandler};
use crate::context::Context;

/// Powered and idle, waiting for the supervisor to pick a mode.
#[derive(Debug, Clone)]
pub struct StandbyMode {
    state: BasicState,
}

impl StandbyMode {
    pub fn new() -> Self {
        Self {
            state: BasicState::Entry,
        }
    }

    pub fn state(&self) -> BasicState {
        self.state
    }
}

impl Default for StandbyMode {
    fn default() -> Self {
        Self::new()
    }
}

impl ModeHandler for StandbyMode {
    fn enter(&mut self) {
        self.state = BasicState::Entry;
    }

    fn step(&mut self, _ctx: &mut Context<'_>) {
        match self.state {
            BasicState::Entry => {
                tracing::info!("Entering SB");
                self.state = BasicState::Loop;
            }
            BasicState::Loop => {}
            BasicState::Shutdown => {
                tracing::info!("Shutdown warning received in SB");
                self.state = BasicState::Loop;
            }
            BasicState::Exit => tracing::info!("Exiting SB"),
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
