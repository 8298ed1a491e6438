//! Shared polling loop.
//!
//! Task readiness, ssh reachability and the graceful-stop wait all follow the
//! same shape: run a check on a fixed tick until it yields a value, a
//! deadline passes, or the caller cancels. Whichever fires first wins, even
//! while a check is still in flight.

use std::future::Future;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use crate::cancel::CancelToken;

/// Floor for the tick interval; `tokio::time::interval` rejects zero.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Why [`poll_until`] stopped without a value.
#[derive(Debug, PartialEq, Eq)]
pub enum PollError<E> {
    /// The deadline passed first.
    TimedOut,
    /// The cancellation token fired first.
    Cancelled,
    /// The check itself failed; polling stops on its first error.
    Check(E),
}

/// Run `check` every `interval` until it yields `Some`.
///
/// The first check runs immediately, so a condition that already holds is
/// observed without waiting a full tick. A timeout is reported no later
/// than `timeout` after the call started.
///
/// # Errors
/// Returns [`PollError::TimedOut`], [`PollError::Cancelled`], or the check's
/// own error wrapped in [`PollError::Check`].
///
/// # Cancel Safety
/// Cancel safe as long as `check` futures are.
pub async fn poll_until<T, E, F, Fut>(
    interval: Duration,
    timeout: Duration,
    cancel: &CancelToken,
    mut check: F,
) -> Result<T, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    let mut ticker = tokio::time::interval(interval.max(MIN_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(PollError::Cancelled),
            () = &mut deadline => return Err(PollError::TimedOut),
            _ = ticker.tick() => {}
        }

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(PollError::Cancelled),
            () = &mut deadline => return Err(PollError::TimedOut),
            outcome = check() => outcome,
        };

        match outcome {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {}
            Err(e) => return Err(PollError::Check(e)),
        }
    }
}
