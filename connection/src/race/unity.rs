use super::{lock, Decision};
use crate::error::Error;
use log::error;
use std::sync::Mutex;

struct State<T> {
    size: usize,
    finished: usize,
    decision: Option<Decision<T>>,
}

/// Completes on the first failing participant, or with the last success once
/// all `size` participants have succeeded.
pub struct RaceUnity<T> {
    state: Mutex<State<T>>,
}

impl<T> RaceUnity<T> {
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

    /// Whether the race has started and not yet decided.
    pub fn running(&self) -> bool {
        lock(&self.state).decision.is_some()
    }

    /// Install the decision handler and start the race.
    ///
    /// Returns `false` if already running. Zero participants decide
    /// immediately with [`Error::OperationFailed`], there is no payload to
    /// report success with.
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
            return false;
        }

        state.finished += 1;
        if result.is_ok() && state.finished < state.size {
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

impl<T> Drop for RaceUnity<T> {
    fn drop(&mut self) {
        if lock(&self.state).decision.is_some() {
            error!("Unity race dropped while still running");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn capture() -> (Arc<Mutex<Vec<Result<u8, Error>>>>, Decision<u8>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        (
            calls,
            Box::new(move |result| sink.lock().unwrap().push(result)),
        )
    }

    #[test]
    fn test_first_failure_wins() {
        let race = RaceUnity::new(4);
        let (calls, decision) = capture();
        race.start(decision);

        assert!(!race.finish(Ok(1)));
        assert!(race.finish(Err(Error::AddressInUse)));
        assert!(!race.finish(Err(Error::BadStream)));
        assert!(!race.finish(Ok(4)));

        assert_eq!(*calls.lock().unwrap(), vec![Err(Error::AddressInUse)]);
    }

    #[test]
    fn test_all_success_decides_on_last() {
        let race = RaceUnity::new(3);
        let (calls, decision) = capture();
        race.start(decision);

        race.finish(Ok(1));
        race.finish(Ok(2));
        assert!(race.running());
        assert!(race.finish(Ok(3)));

        assert_eq!(*calls.lock().unwrap(), vec![Ok(3)]);
        assert!(!race.running());
    }

    #[test]
    fn test_restart_after_decision() {
        let race = RaceUnity::new(1);
        let (calls, decision) = capture();
        race.start(decision);
        race.finish(Ok(1));

        let (again, decision) = capture();
        assert!(race.start(decision));
        race.finish(Err(Error::OperationFailed));
        assert_eq!(*calls.lock().unwrap(), vec![Ok(1)]);
        assert_eq!(*again.lock().unwrap(), vec![Err(Error::OperationFailed)]);
    }
}
