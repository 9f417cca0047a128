use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Smallest weight an active proxy can have under weighted rotation
pub const MIN_WEIGHT: f64 = 0.05;

/// How an active proxy is chosen for the next attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RotationStrategy {
    #[default]
    RoundRobin,

    /// Random, weighted by rolling success rate
    WeightedRandom,

    LeastRecentlyUsed,
}

/// A selectable proxy, in registration order
#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    pub id: String,
    pub success_rate: f64,
    pub last_used: Option<Instant>,
}

impl RotationStrategy {
    /// Picks the index of one candidate
    ///
    /// `turn` is a monotonically increasing counter shared by all callers
    /// of the pool.
    pub(crate) fn pick<R: Rng + ?Sized>(
        &self,
        candidates: &[Candidate],
        turn: usize,
        rng: &mut R,
    ) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }

        match self {
            Self::RoundRobin => Some(turn % candidates.len()),
            Self::WeightedRandom => {
                let weights = candidates.iter().map(|c| c.success_rate.max(MIN_WEIGHT));
                match WeightedIndex::new(weights) {
                    Ok(dist) => Some(dist.sample(rng)),
                    Err(_) => Some(turn % candidates.len()),
                }
            }
            Self::LeastRecentlyUsed => candidates
                .iter()
                .enumerate()
                // Never-used sorts before any instant; ties keep registration order
                .min_by_key(|(i, c)| (c.last_used, *i))
                .map(|(i, _)| i),
        }
    }
}
