//! Race aggregators.
//!
//! A race collapses the completions of N concurrent sub-operations into a
//! single decision, invoked exactly once per started race:
//!
//! * [`RaceQuality`] - first success wins, otherwise the last failure.
//! * [`RaceUnity`] - first failure wins, otherwise the last success.
//! * [`RaceVolume`] - accumulates quantities against sufficiency and
//!   completion thresholds.
//!
//! Races are shared (`Arc`) between the participants. The decision handler is
//! invoked outside of the race's lock, so it may freely start other work.
//! Payloads offered after the decision are dropped on the spot, releasing
//! whatever resources they hold.

mod quality;
mod unity;
mod volume;

pub use quality::RaceQuality;
pub use unity::RaceUnity;
pub use volume::RaceVolume;

use crate::error::Error;

/// Decision handler of a [`RaceQuality`] or [`RaceUnity`].
pub type Decision<T> = Box<dyn FnOnce(Result<T, Error>) + Send>;

fn lock<S>(mutex: &std::sync::Mutex<S>) -> std::sync::MutexGuard<'_, S> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
