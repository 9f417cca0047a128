//! Per-host politeness
//!
//! The governor decides when a host may receive another request. It knows
//! nothing about proxies: spacing and concurrency apply to the host no
//! matter which egress carries the request.

use crate::config::PolitenessConfig;
use crate::policy::PolicyProvider;
use crate::state::HostState;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Default per-host limits
#[derive(Debug, Clone)]
pub struct PolitenessSettings {
    pub min_delay: Duration,
    pub max_concurrency: u32,
    pub max_backoff: Duration,
}

impl PolitenessSettings {
    pub fn from_config(config: &PolitenessConfig) -> Self {
        Self {
            min_delay: Duration::from_millis(config.min_delay_ms),
            max_concurrency: config.max_concurrency,
            max_backoff: Duration::from_millis(config.max_host_backoff_ms),
        }
    }
}

impl Default for PolitenessSettings {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(1),
            max_concurrency: 1,
            max_backoff: Duration::from_secs(60),
        }
    }
}

/// What an attempt told us about the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostSignal {
    /// The host answered normally
    Success,

    /// The host answered 429 or 503
    RateLimited,

    /// The host could not be reached
    Unreachable,

    /// Nothing to learn (e.g. a 404)
    Neutral,
}

/// Enforces minimum spacing and a concurrency ceiling per host
pub struct PolitenessGovernor {
    settings: PolitenessSettings,
    policy: Option<Arc<dyn PolicyProvider>>,
    hosts: DashMap<String, HostState>,
}

impl PolitenessGovernor {
    pub fn new(settings: PolitenessSettings) -> Self {
        Self {
            settings,
            policy: None,
            hosts: DashMap::new(),
        }
    }

    /// Lets the policy's crawl-delay raise a host's minimum delay
    pub fn with_policy(mut self, policy: Arc<dyn PolicyProvider>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn settings(&self) -> &PolitenessSettings {
        &self.settings
    }

    /// Whether a request to `host` may be authorized now
    ///
    /// Hosts that have never been acquired are always eligible.
    pub fn is_host_eligible(&self, host: &str) -> bool {
        self.is_host_eligible_at(host, Instant::now())
    }

    pub fn is_host_eligible_at(&self, host: &str, now: Instant) -> bool {
        let eligible = self
            .hosts
            .get(host)
            .map_or(true, |state| state.is_eligible(now));
        trace!("Host {} eligible: {}", host, eligible);
        eligible
    }

    /// Filters `hosts` down to those eligible at `now`
    pub fn eligible_hosts(&self, hosts: &[String], now: Instant) -> HashSet<String> {
        hosts
            .iter()
            .filter(|h| self.is_host_eligible_at(h, now))
            .cloned()
            .collect()
    }

    /// Authorizes a request to `host`
    ///
    /// Eligibility is re-checked under the host's entry lock, so two
    /// callers racing for the last slot cannot both win. Returns false if
    /// the host is not eligible.
    pub fn acquire(&self, host: &str) -> bool {
        self.acquire_at(host, Instant::now())
    }

    pub fn acquire_at(&self, host: &str, now: Instant) -> bool {
        if !self.hosts.contains_key(host) {
            let fresh = self.new_host(host);
            self.hosts.entry(host.to_string()).or_insert(fresh);
        }

        let Some(mut state) = self.hosts.get_mut(host) else {
            return false;
        };

        if !state.is_eligible(now) {
            return false;
        }

        state.record_dispatch(now);
        trace!(
            "Acquired {} ({} in flight)",
            host,
            state.in_flight_count
        );
        true
    }

    /// Ends a request started with `acquire`
    pub fn release(&self, host: &str) {
        self.release_at(host, Instant::now());
    }

    pub fn release_at(&self, host: &str, now: Instant) {
        if let Some(mut state) = self.hosts.get_mut(host) {
            state.record_release(now);
        }
    }

    /// Adjusts the host's backoff after an attempt
    pub fn record_outcome(&self, host: &str, signal: HostSignal) {
        let Some(mut state) = self.hosts.get_mut(host) else {
            return;
        };

        match signal {
            HostSignal::Success => state.consecutive_failures = 0,
            HostSignal::RateLimited | HostSignal::Unreachable => {
                state.consecutive_failures += 1;
                debug!(
                    "Host {} backing off to {:?} after {} failure(s)",
                    host,
                    state.effective_delay(),
                    state.consecutive_failures
                );
            }
            HostSignal::Neutral => {}
        }
    }

    /// Time until the host's delay elapses
    ///
    /// None if the delay has already elapsed or the host is unknown.
    pub fn time_until_eligible(&self, host: &str, now: Instant) -> Option<Duration> {
        self.hosts
            .get(host)
            .and_then(|state| state.time_until_eligible(now))
    }

    /// Shortest wait until one of `hosts` leaves its delay
    ///
    /// Hosts at their concurrency ceiling are skipped; they free up when a
    /// request completes.
    pub fn next_eligible_in(&self, hosts: &[String], now: Instant) -> Option<Duration> {
        hosts
            .iter()
            .filter_map(|h| {
                let state = self.hosts.get(h)?;
                if state.in_flight_count >= state.max_concurrency {
                    return None;
                }
                state.time_until_eligible(now)
            })
            .min()
    }

    /// Copy of the host's state, if it has been seen
    pub fn host_state(&self, host: &str) -> Option<HostState> {
        self.hosts.get(host).map(|s| s.clone())
    }

    /// Number of hosts seen so far
    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    fn new_host(&self, host: &str) -> HostState {
        let mut min_delay = self.settings.min_delay;

        if let Some(delay) = self
            .policy
            .as_ref()
            .and_then(|p| p.crawl_delay(host))
            .filter(|d| d.is_finite() && *d > 0.0)
        {
            let policy_delay = Duration::from_secs_f64(delay);
            if policy_delay > min_delay {
                debug!("Host {} crawl-delay raises min delay to {:?}", host, policy_delay);
                min_delay = policy_delay;
            }
        }

        HostState::new(
            host,
            min_delay,
            self.settings.max_concurrency,
            self.settings.max_backoff.max(min_delay),
        )
    }
}
