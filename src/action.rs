use serde::{Deserialize, Serialize};

/// Number of sweeps a raised flag survives without being consumed.
pub const STALE_THRESHOLD: u8 = 2;

/// Closed set of deferred actions. Every scheduled timeout and every
/// operator request that the state machine reacts to is one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionId {
    // supervisor link timeouts
    ResendSafety,
    ResendRa,
    ResendTm,

    // device timeouts
    ResendMotionCommand,
    ResendMcbLowPower,
    ResendPuWarmup,
    ResendPuProfile,
    ResendPuCheck,
    ResendPuTsen,
    ResendPuRecord,
    MotionTimeout,

    // profile timers
    BeginProfile,
    EndWarmup,
    EndPreprofile,
    EndDwell,
    EndDockWait,

    // operator requests
    ReelOut,
    ReelIn,
    Dock,
    MotionStop,
    ReDock,
    CheckPu,
    OffloadPu,
    RequestTsen,
    ExitError,
}

impl ActionId {
    pub const COUNT: usize = 25;

    pub const ALL: [ActionId; Self::COUNT] = [
        ActionId::ResendSafety,
        ActionId::ResendRa,
        ActionId::ResendTm,
        ActionId::ResendMotionCommand,
        ActionId::ResendMcbLowPower,
        ActionId::ResendPuWarmup,
        ActionId::ResendPuProfile,
        ActionId::ResendPuCheck,
        ActionId::ResendPuTsen,
        ActionId::ResendPuRecord,
        ActionId::MotionTimeout,
        ActionId::BeginProfile,
        ActionId::EndWarmup,
        ActionId::EndPreprofile,
        ActionId::EndDwell,
        ActionId::EndDockWait,
        ActionId::ReelOut,
        ActionId::ReelIn,
        ActionId::Dock,
        ActionId::MotionStop,
        ActionId::ReDock,
        ActionId::CheckPu,
        ActionId::OffloadPu,
        ActionId::RequestTsen,
        ActionId::ExitError,
    ];

    /// Dense index into the registry table. Exhaustive, so adding a variant
    /// without a slot fails to compile.
    pub const fn index(self) -> usize {
        match self {
            ActionId::ResendSafety => 0,
            ActionId::ResendRa => 1,
            ActionId::ResendTm => 2,
            ActionId::ResendMotionCommand => 3,
            ActionId::ResendMcbLowPower => 4,
            ActionId::ResendPuWarmup => 5,
            ActionId::ResendPuProfile => 6,
            ActionId::ResendPuCheck => 7,
            ActionId::ResendPuTsen => 8,
            ActionId::ResendPuRecord => 9,
            ActionId::MotionTimeout => 10,
            ActionId::BeginProfile => 11,
            ActionId::EndWarmup => 12,
            ActionId::EndPreprofile => 13,
            ActionId::EndDwell => 14,
            ActionId::EndDockWait => 15,
            ActionId::ReelOut => 16,
            ActionId::ReelIn => 17,
            ActionId::Dock => 18,
            ActionId::MotionStop => 19,
            ActionId::ReDock => 20,
            ActionId::CheckPu => 21,
            ActionId::OffloadPu => 22,
            ActionId::RequestTsen => 23,
            ActionId::ExitError => 24,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionFlag {
    pub flag_value: bool,
    pub stale_count: u8,
}

/// Typed table of action flags, one per [`ActionId`].
///
/// Flags are observed only through [`ActionRegistry::consume`], which clears
/// the flag it returns, so each raise is handled at most once. Flags nobody
/// consumes are dropped by [`ActionRegistry::sweep`] after
/// [`STALE_THRESHOLD`] control-loop ticks.
#[derive(Debug, Clone)]
pub struct ActionRegistry {
    flags: [ActionFlag; ActionId::COUNT],
    stale_cleared: u32,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self {
            flags: [ActionFlag::default(); ActionId::COUNT],
            stale_cleared: 0,
        }
    }

    pub fn raise(&mut self, action: ActionId) {
        let flag = &mut self.flags[action.index()];
        flag.flag_value = true;
        flag.stale_count = 0;
    }

    pub fn consume(&mut self, action: ActionId) -> bool {
        let flag = &mut self.flags[action.index()];
        if flag.flag_value {
            flag.flag_value = false;
            flag.stale_count = 0;
            true
        } else {
            false
        }
    }

    pub fn sweep(&mut self) {
        for (index, flag) in self.flags.iter_mut().enumerate() {
            if !flag.flag_value {
                continue;
            }
            flag.stale_count = flag.stale_count.saturating_add(1);
            if flag.stale_count >= STALE_THRESHOLD {
                flag.flag_value = false;
                flag.stale_count = 0;
                self.stale_cleared = self.stale_cleared.saturating_add(1);
                tracing::debug!("Cleared stale action flag {:?}", ActionId::ALL[index]);
            }
        }
    }

    pub fn is_raised(&self, action: ActionId) -> bool {
        self.flags[action.index()].flag_value
    }

    pub fn flag(&self, action: ActionId) -> ActionFlag {
        self.flags[action.index()]
    }

    /// Number of flags dropped by the staleness sweep since start.
    pub fn stale_cleared(&self) -> u32 {
        self.stale_cleared
    }

    pub fn clear_all(&mut self) {
        self.flags = [ActionFlag::default(); ActionId::COUNT];
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
