use super::{lock, Decision};
use crate::error::Error;
use log::error;
use std::sync::Mutex;

struct State<T> {
    size: usize,
    finished: usize,
    decision: Option<Decision<T>>,
}

/// Completes on the first successful participant, or with the final failure
/// once all `size` participants have finished.
///
/// Used to race a batch of connection attempts: the first connected socket
/// wins and every later socket is dropped (and so closed) as soon as it
/// arrives.
pub struct RaceQuality<T> {
    state: Mutex<State<T>>,
}

impl<T> RaceQuality<T> {
    /// Create a race over `size` participants.
    pub fn new(size: usize) -> Self {
        Self {
            state: Mutex::new(State {
                size,
                finished: 0,
                decision: None,
            }),
        }
    }

    /// The number of participants.
    pub fn size(&self) -> usize {
        lock(&self.state).size
    }

    /// Whether the race has started and not yet decided.
    pub fn running(&self) -> bool {
        lock(&self.state).decision.is_some()
    }

    /// Install the decision handler and start the race.
    ///
    /// Returns `false` without touching the in-flight race if it is already
    /// running. A race over zero participants decides immediately with
    /// [`Error::OperationFailed`].
    pub fn start(&self, decision: Decision<T>) -> bool {
        let mut state = lock(&self.state);
        if state.decision.is_some() {
            return false;
        }

        if state.size == 0 {
            drop(state);
            decision(Err(Error::OperationFailed));
            return true;
        }

        state.finished = 0;
        state.decision = Some(decision);
        true
    }

    /// Report one participant's outcome, returns whether it decided the race.
    pub fn finish(&self, result: Result<T, Error>) -> bool {
        let mut state = lock(&self.state);
        if state.decision.is_none() {
            // Decided (or never started), the payload is released here.
            return false;
        }

        state.finished += 1;
        if result.is_err() && state.finished < state.size {
            return false;
        }

        let decision = state.decision.take();
        drop(state);

        if let Some(decision) = decision {
            decision(result);
        }

        true
    }
}

impl<T> Drop for RaceQuality<T> {
    fn drop(&mut self) {
        if lock(&self.state).decision.is_some() {
            error!("Quality race dropped while still running");
        }
    }
}
