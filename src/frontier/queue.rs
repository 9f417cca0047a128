use crate::url::Fingerprint;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

/// Order in which pending tasks leave the frontier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CrawlStrategy {
    /// Lowest depth first, FIFO within a depth
    #[default]
    Bfs,

    /// Highest depth first, most recently added first
    Dfs,

    /// Highest priority first, ties by insertion order
    Priority,
}

impl CrawlStrategy {
    /// Sort key for a task; smaller keys are dispatched first
    ///
    /// `seq` is unique per task, so keys never collide.
    pub(crate) fn order_key(&self, depth: u32, priority: i32, seq: u64) -> OrderKey {
        let depth = i64::from(depth);
        let seq = seq as i128;
        match self {
            Self::Bfs => OrderKey(depth, seq),
            Self::Dfs => OrderKey(-depth, -seq),
            Self::Priority => OrderKey(-i64::from(priority), seq),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct OrderKey(i64, i128);

#[derive(Debug, Clone)]
pub(crate) struct ReadyEntry {
    pub fingerprint: Fingerprint,
    pub host: String,
    pub not_before: Option<Instant>,
}

/// Pending tasks in dispatch order, indexed by host
///
/// Entries past their retry time sit in their host's ordered key set, so
/// picking the next task costs one lookup per host with ready work rather
/// than a scan of every pending task. Entries still backing off wait in a
/// set ordered by retry time and move over as their time passes.
#[derive(Debug, Default)]
pub(crate) struct ReadyQueue {
    entries: HashMap<OrderKey, ReadyEntry>,
    ready: HashMap<String, BTreeSet<OrderKey>>,
    waiting: BTreeSet<(Instant, OrderKey)>,
    /// Pending entries per host, ready or waiting
    hosts: HashMap<String, usize>,
}

impl ReadyQueue {
    pub fn push(&mut self, key: OrderKey, entry: ReadyEntry) {
        *self.hosts.entry(entry.host.clone()).or_insert(0) += 1;
        match entry.not_before {
            Some(at) => {
                self.waiting.insert((at, key));
            }
            None => {
                self.ready.entry(entry.host.clone()).or_default().insert(key);
            }
        }
        self.entries.insert(key, entry);
    }

    /// Removes and returns the first entry whose host passes `eligible`
    /// and whose retry time has passed
    pub fn pop_first_matching<F>(&mut self, now: Instant, eligible: F) -> Option<ReadyEntry>
    where
        F: Fn(&str) -> bool,
    {
        self.promote(now);

        let (host, key) = self
            .ready
            .iter()
            .filter(|(host, _)| eligible(host))
            .filter_map(|(host, keys)| keys.first().map(|key| (host, *key)))
            .min_by_key(|(_, key)| *key)?;
        let host = host.clone();

        if let Some(keys) = self.ready.get_mut(&host) {
            keys.remove(&key);
            if keys.is_empty() {
                self.ready.remove(&host);
            }
        }
        if let Some(count) = self.hosts.get_mut(&host) {
            *count -= 1;
            if *count == 0 {
                self.hosts.remove(&host);
            }
        }
        self.entries.remove(&key)
    }

    /// Moves entries whose retry time has passed into their host's set
    fn promote(&mut self, now: Instant) {
        while let Some(&(at, key)) = self.waiting.first() {
            if at > now {
                break;
            }
            self.waiting.pop_first();
            if let Some(entry) = self.entries.get(&key) {
                self.ready.entry(entry.host.clone()).or_default().insert(key);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Hosts with at least one pending task
    pub fn hosts(&self) -> Vec<String> {
        self.hosts.keys().cloned().collect()
    }

    /// Earliest retry time among pending tasks that are still backing off
    pub fn next_retry_at(&self, now: Instant) -> Option<Instant> {
        self.waiting
            .iter()
            .map(|(at, _)| *at)
            .find(|at| *at > now)
    }

    /// Whether some pending task can be dispatched right now, hosts permitting
    pub fn has_ready(&self, now: Instant) -> bool {
        !self.ready.is_empty() || self.waiting.first().map_or(false, |(at, _)| *at <= now)
    }
}
