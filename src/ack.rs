use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AckState {
    #[default]
    None,
    Ack,
    Nak,
}

/// Acknowledgment tracker for one kind of outstanding request.
///
/// The owner arms the slot immediately before sending, which drops any
/// answer left over from a previous request. Acknowledgments for a command
/// the slot is not waiting on are refused and counted.
#[derive(Debug, Clone)]
pub struct AckSlot<K> {
    expected: Option<K>,
    state: AckState,
    unexpected: u32,
}

impl<K: Copy + PartialEq> AckSlot<K> {
    pub fn new() -> Self {
        Self {
            expected: None,
            state: AckState::None,
            unexpected: 0,
        }
    }

    pub fn arm(&mut self, key: K) {
        self.expected = Some(key);
        self.state = AckState::None;
    }

    pub fn disarm(&mut self) {
        self.expected = None;
        self.state = AckState::None;
    }

    pub fn expects(&self, key: K) -> bool {
        self.expected == Some(key)
    }

    /// Apply an acknowledgment. Returns `false` when it did not match the
    /// armed request, in which case nothing changes but the counter.
    pub fn resolve(&mut self, key: K, ok: bool) -> bool {
        if self.expected != Some(key) {
            self.unexpected = self.unexpected.saturating_add(1);
            return false;
        }
        self.state = if ok { AckState::Ack } else { AckState::Nak };
        true
    }

    pub fn state(&self) -> AckState {
        self.state
    }

    /// Read and reset. An answer is handed out once; the slot stays armed
    /// after a NAK so a resend can reuse it.
    pub fn take(&mut self) -> AckState {
        let state = self.state;
        match state {
            AckState::Ack => self.disarm(),
            AckState::Nak => self.state = AckState::None,
            AckState::None => {}
        }
        state
    }

    pub fn unexpected_count(&self) -> u32 {
        self.unexpected
    }
}

impl<K: Copy + PartialEq> Default for AckSlot<K> {
    fn default() -> Self {
        Self::new()
    }
}
