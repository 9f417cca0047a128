use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// How requests reach the upstream proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    Http,
    Https,
    Socks5,
    /// No upstream proxy; requests leave from this machine
    Direct,
}

impl ProxyProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
            Self::Socks5 => "socks5",
            Self::Direct => "direct",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "http" => Some(Self::Http),
            "https" => Some(Self::Https),
            "socks5" => Some(Self::Socks5),
            "direct" => Some(Self::Direct),
            _ => None,
        }
    }
}

impl fmt::Display for ProxyProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health status of a proxy
///
/// `Active → Banned → Cooling → Active`. A Cooling proxy gets exactly one
/// probe request; failure sends it back to Banned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyStatus {
    Active,
    Cooling,
    Banned,
}

impl ProxyStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Cooling => "cooling",
            Self::Banned => "banned",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "cooling" => Some(Self::Cooling),
            "banned" => Some(Self::Banned),
            _ => None,
        }
    }
}

impl fmt::Display for ProxyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// What an attempt says about the proxy it went through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyOutcome {
    Success,
    Failure,
    /// The proxy carried the request but the answer says nothing about it
    Neutral,
}

/// An upstream egress and its health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyRecord {
    pub id: String,
    pub endpoint: String,
    pub protocol: ProxyProtocol,
    pub status: ProxyStatus,
    pub success_count: u64,
    pub failure_count: u64,
    /// Exponential moving average of reported latency
    pub avg_latency_ms: Option<f64>,
    /// Number of bans since the proxy was last reinstated
    pub consecutive_bans: u32,
    #[serde(skip)]
    pub banned_until: Option<Instant>,
    #[serde(skip)]
    pub last_used: Option<Instant>,
    /// Hand-out this copy came from; 0 if it was never handed out
    #[serde(skip)]
    pub lease: u64,
}

impl ProxyRecord {
    pub fn new(id: impl Into<String>, endpoint: impl Into<String>, protocol: ProxyProtocol) -> Self {
        Self {
            id: id.into(),
            endpoint: endpoint.into(),
            protocol,
            status: ProxyStatus::Active,
            success_count: 0,
            failure_count: 0,
            avg_latency_ms: None,
            consecutive_bans: 0,
            banned_until: None,
            last_used: None,
            lease: 0,
        }
    }

    pub fn is_direct(&self) -> bool {
        self.protocol == ProxyProtocol::Direct
    }
}

/// A proxy record as written to a snapshot
///
/// Instants cannot be serialized, so a ban is saved as the time it still
/// had to run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedProxy {
    pub record: ProxyRecord,
    pub ban_remaining_ms: Option<u64>,
}
