//! Proxy pool: upstream egress registry, health and rotation
//!
//! # Lifecycle
//!
//! ```text
//! Active --(failures in window >= threshold)--> Banned
//! Banned --(banned_until elapsed)-------------> Cooling
//! Cooling --(probe succeeds)------------------> Active
//! Cooling --(probe fails)---------------------> Banned (longer)
//! ```
//!
//! Every hand-out carries a lease number. Only the lease of the outstanding
//! probe can move a Cooling proxy, and results from leases issued before
//! the latest ban update the counters alone.

mod pool;
mod record;
mod rotation;

pub use pool::{PoolHealth, PoolSettings, ProxyConstraints, ProxyPool, DIRECT_PROXY_ID};
pub use record::{ProxyOutcome, ProxyProtocol, ProxyRecord, ProxyStatus, SavedProxy};
pub use rotation::RotationStrategy;
