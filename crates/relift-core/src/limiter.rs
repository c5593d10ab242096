//! Admission controller: a rate budget with periodic full replenishment.
//!
//! `RateBudget` bounds the long-run rate of outbound generation requests.
//! It maintains a counter of available units up to capacity `C`; a
//! background task tops the counter back up to `C` once per refill period
//! `T`. This is periodic full replenishment, not a continuously leaking
//! bucket — the policy is deliberate and carried from the system this
//! replaces, so bursts of up to `C` requests are admitted at each period
//! boundary.
//!
//! The second admission bound — maximum concurrent in-flight calls — is a
//! plain `tokio::sync::Semaphore` owned by the resilient client, held
//! around the whole retry loop of one logical request.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::{ReliftError, Result};

/// Token-bucket-like limiter with periodic full refill.
pub struct RateBudget {
    capacity: u32,
    available: Mutex<u32>,
    notify: Notify,
}

impl RateBudget {
    /// Create a budget with `capacity` units per `refill_period` and spawn
    /// its refill task. Must be called from within a tokio runtime. The
    /// refill task exits once the returned handle (and all clones) drop.
    pub fn new(capacity: u32, refill_period: Duration) -> Arc<Self> {
        let budget = Arc::new(Self {
            capacity,
            available: Mutex::new(capacity),
            notify: Notify::new(),
        });

        let weak = Arc::downgrade(&budget);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(refill_period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick of a tokio interval fires immediately.
            tick.tick().await;
            loop {
                tick.tick().await;
                match weak.upgrade() {
                    Some(budget) => budget.refill(),
                    None => break,
                }
            }
        });

        budget
    }

    /// Block the calling task until a unit is available, or until `cancel`
    /// fires.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<()> {
        loop {
            // Register for wakeups before re-checking the counter so a
            // release between the check and the await cannot be lost.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.try_acquire() {
                return Ok(());
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(ReliftError::Cancelled("rate budget acquire".into()));
                }
                _ = &mut notified => {}
            }
        }
    }

    /// Take a unit without waiting. Returns `false` when the budget is
    /// exhausted for the current period.
    pub fn try_acquire(&self) -> bool {
        let mut available = self.lock_available();
        if *available > 0 {
            *available -= 1;
            true
        } else {
            false
        }
    }

    /// Return a unit early. Used when a call fails before consuming
    /// service-side quota, so it does not count against the budget. Units
    /// never accumulate beyond capacity.
    pub fn release(&self) {
        let mut available = self.lock_available();
        if *available < self.capacity {
            *available += 1;
            drop(available);
            self.notify.notify_waiters();
        }
    }

    /// Units currently available.
    pub fn available(&self) -> u32 {
        *self.lock_available()
    }

    fn refill(&self) {
        let mut available = self.lock_available();
        let topped_up = self.capacity - *available;
        *available = self.capacity;
        drop(available);
        if topped_up > 0 {
            trace!(topped_up, "rate budget refilled");
            self.notify.notify_waiters();
        }
    }

    fn lock_available(&self) -> std::sync::MutexGuard<'_, u32> {
        self.available
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
