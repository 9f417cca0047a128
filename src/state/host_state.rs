use std::time::{Duration, Instant};

/// Largest exponent applied to a host's delay after repeated failures
const MAX_BACKOFF_EXPONENT: u32 = 6;

/// Tracks the politeness state of a single host during a job
///
/// Owned and mutated only by the politeness governor. Times are passed in
/// explicitly so the rules can be checked deterministically.
#[derive(Debug, Clone)]
pub struct HostState {
    /// The host key (lowercase host, plus port when explicit)
    pub host: String,

    /// Last dispatch or completion instant for this host
    pub last_request_at: Option<Instant>,

    /// Requests currently in flight to this host
    pub in_flight_count: u32,

    /// Minimum spacing between requests
    pub min_delay: Duration,

    /// Ceiling on concurrent requests
    pub max_concurrency: u32,

    /// Failures (429, transport) since the last success
    pub consecutive_failures: u32,

    /// Upper bound for the failure-scaled delay
    pub max_backoff: Duration,

    /// Number of requests authorized so far
    pub request_count: u64,
}

impl HostState {
    pub fn new(
        host: impl Into<String>,
        min_delay: Duration,
        max_concurrency: u32,
        max_backoff: Duration,
    ) -> Self {
        Self {
            host: host.into(),
            last_request_at: None,
            in_flight_count: 0,
            min_delay,
            max_concurrency: max_concurrency.max(1),
            consecutive_failures: 0,
            max_backoff,
            request_count: 0,
        }
    }

    /// The spacing currently enforced, scaled up after consecutive failures
    pub fn effective_delay(&self) -> Duration {
        if self.consecutive_failures == 0 {
            return self.min_delay;
        }

        let factor = 1u32 << self.consecutive_failures.min(MAX_BACKOFF_EXPONENT);
        let scaled = self.min_delay.saturating_mul(factor);
        let ceiling = self.max_backoff.max(self.min_delay);
        scaled.min(ceiling)
    }

    /// Checks if a new request may be authorized at `now`
    ///
    /// # Returns
    ///
    /// * `true` - the delay has elapsed and a concurrency slot is free
    /// * `false` - the request must wait
    pub fn is_eligible(&self, now: Instant) -> bool {
        if self.in_flight_count >= self.max_concurrency {
            return false;
        }

        self.time_until_eligible(now).is_none()
    }

    /// Time left before the delay rule allows another request
    ///
    /// Returns None if the delay has already elapsed. Concurrency is not
    /// considered here: a full host frees up on completion, not on a timer.
    pub fn time_until_eligible(&self, now: Instant) -> Option<Duration> {
        let last = self.last_request_at?;
        let delay = self.effective_delay();
        let elapsed = now.saturating_duration_since(last);
        if elapsed < delay {
            Some(delay - elapsed)
        } else {
            None
        }
    }

    /// Records an authorized dispatch
    pub fn record_dispatch(&mut self, now: Instant) {
        self.in_flight_count += 1;
        self.request_count += 1;
        self.last_request_at = Some(now);
    }

    /// Records the end of a request
    pub fn record_release(&mut self, now: Instant) {
        self.in_flight_count = self.in_flight_count.saturating_sub(1);
        self.last_request_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(min_delay_ms: u64, max_concurrency: u32) -> HostState {
        HostState::new(
            "example.com",
            Duration::from_millis(min_delay_ms),
            max_concurrency,
            Duration::from_secs(60),
        )
    }

    #[test]
    fn test_new_host_is_eligible() {
        let state = state(1000, 1);
        assert!(state.is_eligible(Instant::now()));
        assert!(state.time_until_eligible(Instant::now()).is_none());
    }

    #[test]
    fn test_not_eligible_too_soon() {
        let mut state = state(1000, 2);
        let now = Instant::now();
        state.record_dispatch(now);

        assert!(!state.is_eligible(now));
        assert!(!state.is_eligible(now + Duration::from_millis(500)));
        assert!(state.is_eligible(now + Duration::from_millis(1000)));
    }

    #[test]
    fn test_not_eligible_at_concurrency_ceiling() {
        let mut state = state(0, 1);
        let now = Instant::now();
        state.record_dispatch(now);

        assert!(!state.is_eligible(now + Duration::from_secs(10)));

        state.record_release(now);
        assert!(state.is_eligible(now));
    }

    #[test]
    fn test_time_until_eligible() {
        let mut state = state(1000, 1);
        let now = Instant::now();
        state.last_request_at = Some(now);

        assert_eq!(
            state.time_until_eligible(now),
            Some(Duration::from_millis(1000))
        );
        assert_eq!(
            state.time_until_eligible(now + Duration::from_millis(400)),
            Some(Duration::from_millis(600))
        );
        assert!(state
            .time_until_eligible(now + Duration::from_millis(1100))
            .is_none());
    }

    #[test]
    fn test_effective_delay_backs_off_and_caps() {
        let mut state = HostState::new(
            "example.com",
            Duration::from_millis(500),
            1,
            Duration::from_secs(3),
        );
        assert_eq!(state.effective_delay(), Duration::from_millis(500));

        state.consecutive_failures = 1;
        assert_eq!(state.effective_delay(), Duration::from_millis(1000));

        state.consecutive_failures = 2;
        assert_eq!(state.effective_delay(), Duration::from_millis(2000));

        state.consecutive_failures = 10;
        assert_eq!(state.effective_delay(), Duration::from_secs(3));
    }

    #[test]
    fn test_release_never_underflows() {
        let mut state = state(0, 1);
        state.record_release(Instant::now());
        assert_eq!(state.in_flight_count, 0);
    }
}
