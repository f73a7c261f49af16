//! Per-provider request budgets.
//!
//! Free-tier rate APIs meter requests aggressively; each adapter carries its
//! own budget so one chatty provider cannot burn another's quota.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};

/// Request budget enforced before each upstream call.
pub struct ThrottlingQueue {
    limiter: DefaultDirectRateLimiter,
    clock: DefaultClock,
}

impl ThrottlingQueue {
    /// Budget of `requests` per minute. Zero is clamped to one.
    pub fn per_minute(requests: u32) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(requests.max(1)).unwrap_or(NonZeroU32::MIN));
        Self {
            limiter: RateLimiter::direct(quota),
            clock: DefaultClock::default(),
        }
    }

    /// Take one slot from the budget.
    ///
    /// On an exhausted budget returns the time until the next slot frees up,
    /// which adapters surface as a rate-limited source error.
    pub fn acquire(&self) -> Result<(), Duration> {
        self.limiter
            .check()
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }
}

impl std::fmt::Debug for ThrottlingQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThrottlingQueue").finish_non_exhaustive()
    }
}
