use super::{BasicState, ModeHandler};
use crate::context::Context;

#[derive(Debug, Clone)]
pub struct EndOfFlightMode {
    state: BasicState,
}

impl EndOfFlightMode {
    pub fn new() -> Self {
        Self {
            state: BasicState::Entry,
        }
    }

    pub fn state(&self) -> BasicState {
        self.state
    }
}

impl Default for EndOfFlightMode {
    fn default() -> Self {
        Self::new()
    }
}

impl ModeHandler for EndOfFlightMode {
    fn enter(&mut self) {
        self.state = BasicState::Entry;
    }

    fn step(&mut self, ctx: &mut Context<'_>) {
        match self.state {
            BasicState::Entry => {
                tracing::info!("Entering EF");
                if ctx.mcb.motion_ongoing() {
                    let _ = ctx.mcb.cancel_motion();
                }
                self.state = BasicState::Loop;
            }
            BasicState::Loop => {}
            BasicState::Shutdown => {
                tracing::info!("Shutdown warning received in EF");
                self.state = BasicState::Loop;
            }
            BasicState::Exit => tracing::info!("Exiting EF"),
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
