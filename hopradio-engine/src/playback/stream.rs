//! Live program state.
//!
//! Tracks the connection state machine for the live source (rotation or
//! continuous stream) and the one-shot tune-in behavior: the first
//! rotation track after engine start joins mid-song, everything after
//! plays from the top.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Connecting,
    Playing,
    Reconnecting,
}

pub struct StreamController {
    state: StreamState,
    tuned_in: bool,
}

impl StreamController {
    pub fn new() -> Self {
        Self {
            state: StreamState::Idle,
            tuned_in: false,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn set_state(&mut self, state: StreamState) {
        self.state = state;
    }

    /// Whether the next rotation connect should join mid-track. True
    /// exactly once per engine lifetime.
    pub fn take_tune_in(&mut self) -> bool {
        !std::mem::replace(&mut self.tuned_in, true)
    }
}

impl Default for StreamController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tune_in_is_offered_exactly_once() {
        let mut ctrl = StreamController::new();
        assert!(ctrl.take_tune_in());
        assert!(!ctrl.take_tune_in());
        assert!(!ctrl.take_tune_in());
    }

    #[test]
    fn starts_idle() {
        let ctrl = StreamController::new();
        assert_eq!(ctrl.state(), StreamState::Idle);
    }
}
