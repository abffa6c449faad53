use super::lock;
use crate::error::Error;
use log::error;
use std::sync::Mutex;

/// Handler invoked once the sufficient threshold is reached (or missed).
pub type Sufficient = Box<dyn FnOnce(Result<(), Error>) + Send>;

/// Handler invoked once with the final accumulated total.
pub type Complete = Box<dyn FnOnce(usize) + Send>;

struct State {
    size: usize,
    sufficient: usize,
    complete: usize,
    failure: Error,
    finished: usize,
    total: usize,
    on_sufficient: Option<Sufficient>,
    on_complete: Option<Complete>,
}

/// Accumulates quantities reported by `size` participants.
///
/// * The sufficiency handler fires once with `Ok(())` at the call where the
///   running total first reaches `sufficient`. If every participant finishes
///   (or the completion threshold is hit) first, it fires with the
///   construction-time `failure` code instead.
/// * The completion handler fires once with the total at the call where the
///   running total first reaches `complete` or the last participant finishes.
pub struct RaceVolume {
    state: Mutex<State>,
}

impl RaceVolume {
    pub fn new(size: usize, sufficient: usize, complete: usize, failure: Error) -> Self {
        Self {
            state: Mutex::new(State {
                size,
                sufficient,
                complete,
                failure,
                finished: 0,
                total: 0,
                on_sufficient: None,
                on_complete: None,
            }),
        }
    }

    /// Whether the race has started and not yet completed.
    pub fn running(&self) -> bool {
        lock(&self.state).on_complete.is_some()
    }

    /// The running total.
    pub fn total(&self) -> usize {
        lock(&self.state).total
    }

    /// Install both handlers, returns `false` if already running.
    pub fn start(&self, on_sufficient: Sufficient, on_complete: Complete) -> bool {
        let mut state = lock(&self.state);
        if state.on_complete.is_some() {
            return false;
        }

        state.finished = 0;
        state.total = 0;
        state.on_sufficient = Some(on_sufficient);
        state.on_complete = Some(on_complete);

        if state.size == 0 {
            Self::settle(state, true);
        }

        true
    }

    /// Report one participant's quantity.
    pub fn finish(&self, amount: usize) {
        let mut state = lock(&self.state);
        if state.on_complete.is_none() {
            return;
        }

        state.finished += 1;
        state.total = state.total.saturating_add(amount);
        let exhausted = state.finished >= state.size;
        Self::settle(state, exhausted);
    }

    fn settle(mut state: std::sync::MutexGuard<'_, State>, exhausted: bool) {
        let reached_sufficient = state.total >= state.sufficient;
        let reached_complete = exhausted || state.total >= state.complete;

        let sufficient = if reached_sufficient || reached_complete {
            state.on_sufficient.take()
        } else {
            None
        };
        let complete = if reached_complete {
            state.on_complete.take()
        } else {
            None
        };

        let total = state.total;
        let failure = state.failure;
        drop(state);

        if let Some(handler) = sufficient {
            handler(if reached_sufficient {
                Ok(())
            } else {
                Err(failure)
            });
        }

        if let Some(handler) = complete {
            handler(total);
        }
    }
}

impl Drop for RaceVolume {
    fn drop(&mut self) {
        if lock(&self.state).on_complete.is_some() {
            error!("Volume race dropped while still running");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    type Log = Arc<Mutex<Vec<String>>>;

    fn start(race: &RaceVolume) -> Log {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sufficient_log = log.clone();
        let complete_log = log.clone();
        race.start(
            Box::new(move |result| {
                sufficient_log
                    .lock()
                    .unwrap()
                    .push(format!("sufficient {result:?}"))
            }),
            Box::new(move |total| complete_log.lock().unwrap().push(format!("complete {total}"))),
        );
        log
    }

    #[test]
    fn test_thresholds_fire_once_at_crossing() {
        let race = RaceVolume::new(5, 10, 20, Error::SeedingUnsuccessful);
        let log = start(&race);

        race.finish(4);
        assert!(log.lock().unwrap().is_empty());
        race.finish(6);
        assert_eq!(*log.lock().unwrap(), vec!["sufficient Ok(())"]);
        race.finish(5);
        assert_eq!(log.lock().unwrap().len(), 1);
        race.finish(5);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["sufficient Ok(())", "complete 20"]
        );

        race.finish(100);
        assert_eq!(log.lock().unwrap().len(), 2);
        assert!(!race.running());
    }

    #[test]
    fn test_exhausted_without_sufficiency_fails() {
        let race = RaceVolume::new(2, 10, 20, Error::SeedingUnsuccessful);
        let log = start(&race);

        race.finish(3);
        race.finish(3);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["sufficient Err(SeedingUnsuccessful)", "complete 6"]
        );
    }

    #[test]
    fn test_single_call_crossing_both() {
        let race = RaceVolume::new(3, 1, 2, Error::SeedingUnsuccessful);
        let log = start(&race);

        race.finish(50);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["sufficient Ok(())", "complete 50"]
        );
    }

    #[test]
    fn test_start_while_running_rejected() {
        let race = RaceVolume::new(1, 1, 1, Error::SeedingUnsuccessful);
        let _log = start(&race);
        assert!(!race.start(Box::new(|_| {}), Box::new(|_| {})));
        race.finish(1);
        assert!(!race.running());
    }
}
