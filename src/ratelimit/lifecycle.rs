//! Background expiry and teardown wiring.
//!
//! Windows reset correctly without any of this, because every evaluation
//! reaps due buckets first. The reaper exists so buckets of callers that
//! never come back are released on time instead of on the next access.

use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use crate::interpolate::Interpolator;

use super::limiter::FieldRateLimiter;

/// Spawn a task that deletes buckets as their windows end.
///
/// The task sleeps until the earliest pending deadline (or at most the
/// configured reap interval), wakes early when an earlier deadline is
/// scheduled, and exits once the limiter is torn down.
pub fn spawn_reaper<C, I>(limiter: Arc<FieldRateLimiter<C, I>>) -> JoinHandle<()>
where
    C: ?Sized + 'static,
    I: Interpolator<C> + 'static,
{
    tokio::spawn(async move {
        debug!("Expiry reaper started");

        while !limiter.is_torn_down() {
            let now = Instant::now();
            let latest = now + limiter.reap_interval();
            let wake_at = limiter
                .next_deadline()
                .map_or(latest, |deadline| deadline.min(latest));

            tokio::select! {
                _ = sleep_until(wake_at) => {}
                _ = limiter.woken() => {}
            }

            let removed = limiter.reap_expired(Instant::now());
            if removed > 0 {
                debug!(removed = removed, "Reaped expired buckets");
            }
        }

        debug!("Expiry reaper stopped");
    })
}

/// Tear the limiter down once `signal` resolves.
///
/// `signal` is the session-end or shutdown event of the owning pipeline.
/// The returned handle yields the number of expiries that were cancelled.
pub fn spawn_teardown_listener<C, I, F>(
    limiter: Arc<FieldRateLimiter<C, I>>,
    signal: F,
) -> JoinHandle<usize>
where
    C: ?Sized + 'static,
    I: Interpolator<C> + 'static,
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        signal.await;
        info!("Teardown signal received");
        limiter.on_teardown()
    })
}
