//! Configuration module for Sumi-Dispatch
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use sumi_dispatch::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("config.toml")).unwrap();
//! println!("Job will use max depth: {}", config.job.max_depth);
//! ```

mod parser;
mod types;
mod validation;

pub use types::{
    CanonicalConfig, Config, JobConfig, OutputConfig, PolitenessConfig, ProxyConfig,
    ProxyEndpointEntry, RateLimitPolicy, UserAgentConfig,
};

pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
pub use validation::GLOBAL_MAX_WORKERS;
