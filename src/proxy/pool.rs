use crate::config::ProxyConfig;
use crate::proxy::record::{ProxyOutcome, ProxyProtocol, ProxyRecord, ProxyStatus, SavedProxy};
use crate::proxy::rotation::{Candidate, RotationStrategy};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Smoothing factor for the latency moving average
const LATENCY_ALPHA: f64 = 0.2;

/// Id used for the direct egress registered from config
pub const DIRECT_PROXY_ID: &str = "direct";

/// Ban and health-window settings
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Failures within the window that ban a proxy
    pub ban_threshold: u32,
    /// Most recent outcomes kept
    pub window_size: usize,
    /// Outcomes older than this drop out of the window
    pub window: Duration,
    pub ban_base: Duration,
    pub ban_max: Duration,
}

impl PoolSettings {
    pub fn from_config(config: &ProxyConfig) -> Self {
        Self {
            ban_threshold: config.ban_threshold,
            window_size: config.window_size,
            window: Duration::from_millis(config.window_ms),
            ban_base: Duration::from_millis(config.ban_base_ms),
            ban_max: Duration::from_millis(config.ban_max_ms),
        }
    }

    /// Length of ban number `bans` (1-based), doubling up to `ban_max`
    pub fn ban_duration(&self, bans: u32) -> Duration {
        let factor = 1u32
            .checked_shl(bans.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.ban_base.saturating_mul(factor).min(self.ban_max)
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            ban_threshold: 3,
            window_size: 10,
            window: Duration::from_secs(60),
            ban_base: Duration::from_secs(30),
            ban_max: Duration::from_secs(600),
        }
    }
}

/// Restrictions on which proxy `get_proxy` may return
#[derive(Debug, Clone, Default)]
pub struct ProxyConstraints {
    pub protocol: Option<ProxyProtocol>,
    pub exclude: HashSet<String>,
}

impl ProxyConstraints {
    fn admits(&self, record: &ProxyRecord) -> bool {
        self.protocol.map_or(true, |p| p == record.protocol) && !self.exclude.contains(&record.id)
    }
}

/// Counts of proxies by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolHealth {
    pub active: usize,
    pub cooling: usize,
    pub banned: usize,
}

#[derive(Debug)]
struct ProxyEntry {
    record: ProxyRecord,
    /// (when, success) for recent outcomes while Active
    window: VecDeque<(Instant, bool)>,
    /// Lease of the Cooling probe handed out and not yet reported
    probe_lease: Option<u64>,
    /// Leases below this were handed out before the latest ban
    epoch: u64,
}

impl ProxyEntry {
    fn success_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 1.0;
        }
        let ok = self.window.iter().filter(|(_, success)| *success).count();
        ok as f64 / self.window.len() as f64
    }

    fn trim_window(&mut self, settings: &PoolSettings, now: Instant) {
        while self.window.len() > settings.window_size {
            self.window.pop_front();
        }
        while let Some((at, _)) = self.window.front() {
            if now.saturating_duration_since(*at) > settings.window {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    fn ban(&mut self, settings: &PoolSettings, now: Instant, epoch: u64) {
        self.record.consecutive_bans += 1;
        let duration = settings.ban_duration(self.record.consecutive_bans);
        self.record.status = ProxyStatus::Banned;
        self.record.banned_until = Some(now + duration);
        self.window.clear();
        self.probe_lease = None;
        self.epoch = epoch;
        warn!(
            "Proxy {} banned for {:?} (ban #{})",
            self.record.id, duration, self.record.consecutive_bans
        );
    }
}

/// Registry of upstream proxies with health tracking and rotation
///
/// Safe to share between jobs behind an `Arc`. Each record is updated
/// under its own map entry lock.
pub struct ProxyPool {
    settings: PoolSettings,
    entries: DashMap<String, ProxyEntry>,
    order: RwLock<Vec<String>>,
    turn: AtomicUsize,
    leases: AtomicU64,
}

impl ProxyPool {
    pub fn new(settings: PoolSettings) -> Self {
        Self {
            settings,
            entries: DashMap::new(),
            order: RwLock::new(Vec::new()),
            turn: AtomicUsize::new(0),
            leases: AtomicU64::new(1),
        }
    }

    /// Builds a pool and registers every configured endpoint
    pub fn from_config(config: &ProxyConfig) -> Self {
        let pool = Self::new(PoolSettings::from_config(config));
        for entry in &config.endpoints {
            pool.register(&entry.id, &entry.endpoint, entry.protocol);
        }
        if config.direct {
            pool.register(DIRECT_PROXY_ID, "direct", ProxyProtocol::Direct);
        }
        pool
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    /// Adds a proxy; returns false if the id is already registered
    pub fn register(&self, id: &str, endpoint: &str, protocol: ProxyProtocol) -> bool {
        self.insert(ProxyRecord::new(id, endpoint, protocol))
    }

    fn insert(&self, record: ProxyRecord) -> bool {
        let id = record.id.clone();
        let mut order = self.order.write().unwrap_or_else(PoisonError::into_inner);
        if self.entries.contains_key(&id) {
            return false;
        }

        debug!("Registered proxy {} ({})", id, record.protocol);
        self.entries.insert(
            id.clone(),
            ProxyEntry {
                record,
                window: VecDeque::new(),
                probe_lease: None,
                epoch: 0,
            },
        );
        order.push(id);
        true
    }

    /// Hands out a proxy for one attempt
    ///
    /// Banned proxies whose ban has run out become Cooling; a Cooling proxy
    /// is preferred as a probe when none is outstanding. Otherwise an
    /// Active proxy is chosen by `rotation`. Returns None if nothing
    /// qualifies. The returned copy carries a fresh `lease` that must be
    /// passed back to `report_outcome` or `release_unused`.
    pub fn get_proxy(
        &self,
        rotation: RotationStrategy,
        constraints: &ProxyConstraints,
    ) -> Option<ProxyRecord> {
        self.get_proxy_at(rotation, constraints, Instant::now())
    }

    pub fn get_proxy_at(
        &self,
        rotation: RotationStrategy,
        constraints: &ProxyConstraints,
        now: Instant,
    ) -> Option<ProxyRecord> {
        let ids = self.ids();
        self.promote_expired(&ids, now);

        if let Some(probe) = self.take_probe(&ids, constraints, now) {
            return Some(probe);
        }

        let mut rng = rand::thread_rng();
        let mut candidates = self.active_candidates(&ids, constraints);

        while !candidates.is_empty() {
            let turn = self.turn.fetch_add(1, Ordering::Relaxed);
            let index = rotation.pick(&candidates, turn, &mut rng)?;
            let id = candidates.remove(index).id;

            // Status may have changed since the candidate list was built
            if let Some(mut entry) = self.entries.get_mut(&id) {
                if entry.record.status == ProxyStatus::Active {
                    entry.record.last_used = Some(now);
                    let mut handed = entry.record.clone();
                    handed.lease = self.next_lease();
                    return Some(handed);
                }
            }
        }

        None
    }

    /// Gives back a proxy that was handed out but never used
    ///
    /// Only matters for a Cooling probe, whose slot is freed.
    pub fn release_unused(&self, lease: &ProxyRecord) {
        if let Some(mut entry) = self.entries.get_mut(&lease.id) {
            if entry.record.status == ProxyStatus::Cooling && entry.probe_lease == Some(lease.lease) {
                entry.probe_lease = None;
            }
        }
    }

    /// Records the result of an attempt made with `lease`
    ///
    /// Returns the proxy's status afterwards, or None for an unknown id.
    pub fn report_outcome(
        &self,
        lease: &ProxyRecord,
        outcome: ProxyOutcome,
        latency_ms: u64,
    ) -> Option<ProxyStatus> {
        self.report_outcome_at(lease, outcome, latency_ms, Instant::now())
    }

    pub fn report_outcome_at(
        &self,
        lease: &ProxyRecord,
        outcome: ProxyOutcome,
        latency_ms: u64,
        now: Instant,
    ) -> Option<ProxyStatus> {
        let mut entry = self.entries.get_mut(&lease.id)?;
        let entry = &mut *entry;

        match outcome {
            ProxyOutcome::Success => entry.record.success_count += 1,
            ProxyOutcome::Failure => entry.record.failure_count += 1,
            ProxyOutcome::Neutral => {}
        }

        let latency = latency_ms as f64;
        entry.record.avg_latency_ms = Some(match entry.record.avg_latency_ms {
            Some(avg) => LATENCY_ALPHA * latency + (1.0 - LATENCY_ALPHA) * avg,
            None => latency,
        });

        match entry.record.status {
            ProxyStatus::Cooling if entry.probe_lease == Some(lease.lease) => {
                entry.probe_lease = None;
                match outcome {
                    ProxyOutcome::Success => {
                        entry.record.status = ProxyStatus::Active;
                        entry.record.banned_until = None;
                        entry.record.consecutive_bans = 0;
                        entry.window.clear();
                        info!("Proxy {} reinstated after probe", lease.id);
                    }
                    ProxyOutcome::Failure => entry.ban(&self.settings, now, self.next_lease()),
                    // Stays Cooling; the next hand-out probes again
                    ProxyOutcome::Neutral => {}
                }
            }
            ProxyStatus::Active if lease.lease >= entry.epoch => {
                let success = match outcome {
                    ProxyOutcome::Success => true,
                    ProxyOutcome::Failure => false,
                    ProxyOutcome::Neutral => return Some(entry.record.status),
                };
                entry.window.push_back((now, success));
                entry.trim_window(&self.settings, now);

                let failures = entry.window.iter().filter(|(_, ok)| !ok).count();
                if failures >= self.settings.ban_threshold as usize {
                    entry.ban(&self.settings, now, self.next_lease());
                }
            }
            // Late result from an attempt dispatched before the latest ban
            _ => debug!("Stale result for proxy {} (lease {})", lease.id, lease.lease),
        }

        Some(entry.record.status)
    }

    /// Earliest time a Banned proxy becomes eligible for a probe
    pub fn next_unban_at(&self, now: Instant) -> Option<Instant> {
        self.entries
            .iter()
            .filter(|e| e.record.status == ProxyStatus::Banned)
            .filter_map(|e| e.record.banned_until)
            .map(|until| until.max(now))
            .min()
    }

    /// Copy of one record
    pub fn record(&self, proxy_id: &str) -> Option<ProxyRecord> {
        self.entries.get(proxy_id).map(|e| e.record.clone())
    }

    /// Copies of all records in registration order
    pub fn records(&self) -> Vec<ProxyRecord> {
        self.ids()
            .iter()
            .filter_map(|id| self.record(id))
            .collect()
    }

    pub fn health(&self) -> PoolHealth {
        let mut health = PoolHealth::default();
        for entry in self.entries.iter() {
            match entry.record.status {
                ProxyStatus::Active => health.active += 1,
                ProxyStatus::Cooling => health.cooling += 1,
                ProxyStatus::Banned => health.banned += 1,
            }
        }
        health
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> Vec<SavedProxy> {
        self.snapshot_at(Instant::now())
    }

    pub fn restore(&self, saved: Vec<SavedProxy>) {
        self.restore_at(saved, Instant::now())
    }

    /// Captures every record with its remaining ban time
    pub fn snapshot_at(&self, now: Instant) -> Vec<SavedProxy> {
        self.records()
            .into_iter()
            .map(|record| {
                let ban_remaining_ms = record
                    .banned_until
                    .map(|until| until.saturating_duration_since(now).as_millis() as u64);
                SavedProxy {
                    record,
                    ban_remaining_ms,
                }
            })
            .collect()
    }

    /// Loads saved records, replacing any registered under the same id
    pub fn restore_at(&self, saved: Vec<SavedProxy>, now: Instant) {
        for SavedProxy {
            mut record,
            ban_remaining_ms,
        } in saved
        {
            record.last_used = None;
            record.banned_until = match record.status {
                ProxyStatus::Banned => {
                    Some(now + Duration::from_millis(ban_remaining_ms.unwrap_or(0)))
                }
                _ => None,
            };

            if let Some(mut entry) = self.entries.get_mut(&record.id) {
                entry.record = record;
                entry.window.clear();
                entry.probe_lease = None;
                entry.epoch = self.next_lease();
                continue;
            }
            self.insert(record);
        }
    }

    fn next_lease(&self) -> u64 {
        self.leases.fetch_add(1, Ordering::Relaxed)
    }

    fn ids(&self) -> Vec<String> {
        self.order
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn promote_expired(&self, ids: &[String], now: Instant) {
        for id in ids {
            if let Some(mut entry) = self.entries.get_mut(id) {
                let expired = entry.record.status == ProxyStatus::Banned
                    && entry.record.banned_until.map_or(true, |until| until <= now);
                if expired {
                    entry.record.status = ProxyStatus::Cooling;
                    entry.probe_lease = None;
                    info!("Proxy {} cooling, awaiting probe", id);
                }
            }
        }
    }

    fn take_probe(
        &self,
        ids: &[String],
        constraints: &ProxyConstraints,
        now: Instant,
    ) -> Option<ProxyRecord> {
        for id in ids {
            let Some(mut entry) = self.entries.get_mut(id) else {
                continue;
            };
            if entry.record.status == ProxyStatus::Cooling
                && entry.probe_lease.is_none()
                && constraints.admits(&entry.record)
            {
                let lease = self.next_lease();
                entry.probe_lease = Some(lease);
                entry.record.last_used = Some(now);
                debug!("Probing cooling proxy {} (lease {})", id, lease);
                let mut handed = entry.record.clone();
                handed.lease = lease;
                return Some(handed);
            }
        }
        None
    }

    fn active_candidates(&self, ids: &[String], constraints: &ProxyConstraints) -> Vec<Candidate> {
        ids.iter()
            .filter_map(|id| {
                let entry = self.entries.get(id)?;
                if entry.record.status != ProxyStatus::Active || !constraints.admits(&entry.record) {
                    return None;
                }
                Some(Candidate {
                    id: id.clone(),
                    success_rate: entry.success_rate(),
                    last_used: entry.record.last_used,
                })
            })
            .collect()
    }
}
