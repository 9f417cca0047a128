use crate::config::types::{
    CanonicalConfig, Config, JobConfig, OutputConfig, PolitenessConfig, ProxyConfig,
    UserAgentConfig,
};
use crate::proxy::ProxyProtocol;
use crate::ConfigError;
use std::collections::HashSet;
use url::Url;

/// Hard ceiling on worker slots regardless of configuration
pub const GLOBAL_MAX_WORKERS: usize = 64;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_job_config(&config.job)?;
    validate_politeness_config(&config.politeness)?;
    validate_canonical_config(&config.canonical)?;
    validate_proxy_config(&config.proxy)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_output_config(&config.output)?;
    validate_watchdog(&config.job, &config.proxy)?;
    Ok(())
}

/// The watchdog must outlast the longest proxy ban
fn validate_watchdog(job: &JobConfig, proxy: &ProxyConfig) -> Result<(), ConfigError> {
    if job.watchdog_timeout_ms <= proxy.ban_max_ms {
        return Err(ConfigError::Validation(format!(
            "watchdog_timeout_ms ({}) must be > ban_max_ms ({})",
            job.watchdog_timeout_ms, proxy.ban_max_ms
        )));
    }
    Ok(())
}

/// Validates job limits and seeds
fn validate_job_config(config: &JobConfig) -> Result<(), ConfigError> {
    if config.seeds.is_empty() {
        return Err(ConfigError::Validation(
            "job must have at least one seed URL".to_string(),
        ));
    }

    for seed in &config.seeds {
        let url = Url::parse(seed)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid seed URL '{}': {}", seed, e)))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::Validation(format!(
                "Seed URL '{}' must use http or https",
                seed
            )));
        }
    }

    if config.max_pages < 1 {
        return Err(ConfigError::Validation(format!(
            "max_pages must be >= 1, got {}",
            config.max_pages
        )));
    }

    if config.max_retries < 1 {
        return Err(ConfigError::Validation(format!(
            "max_retries must be >= 1, got {}",
            config.max_retries
        )));
    }

    if config.max_concurrency < 1 || config.max_concurrency > GLOBAL_MAX_WORKERS {
        return Err(ConfigError::Validation(format!(
            "max_concurrency must be between 1 and {}, got {}",
            GLOBAL_MAX_WORKERS, config.max_concurrency
        )));
    }

    if config.max_fetch_duration_ms < 1 {
        return Err(ConfigError::Validation(
            "max_fetch_duration_ms must be >= 1".to_string(),
        ));
    }

    if config.max_retry_backoff_ms < config.retry_backoff_ms {
        return Err(ConfigError::Validation(format!(
            "max_retry_backoff_ms ({}) must be >= retry_backoff_ms ({})",
            config.max_retry_backoff_ms, config.retry_backoff_ms
        )));
    }

    if config.watchdog_timeout_ms < 1 {
        return Err(ConfigError::Validation(
            "watchdog_timeout_ms must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates per-host limits
fn validate_politeness_config(config: &PolitenessConfig) -> Result<(), ConfigError> {
    if config.max_concurrency < 1 {
        return Err(ConfigError::Validation(format!(
            "politeness max_concurrency must be >= 1, got {}",
            config.max_concurrency
        )));
    }

    if config.max_host_backoff_ms < config.min_delay_ms {
        return Err(ConfigError::Validation(format!(
            "max_host_backoff_ms ({}) must be >= min_delay_ms ({})",
            config.max_host_backoff_ms, config.min_delay_ms
        )));
    }

    Ok(())
}

fn validate_canonical_config(config: &CanonicalConfig) -> Result<(), ConfigError> {
    let scheme = config.scheme.to_lowercase();
    if scheme != "http" && scheme != "https" {
        return Err(ConfigError::Validation(format!(
            "canonical scheme must be http or https, got '{}'",
            config.scheme
        )));
    }

    if config.tracking_params.iter().any(|p| p.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "tracking_params cannot contain empty names".to_string(),
        ));
    }

    Ok(())
}

/// Validates proxy pool settings and endpoints
fn validate_proxy_config(config: &ProxyConfig) -> Result<(), ConfigError> {
    if config.ban_threshold < 1 {
        return Err(ConfigError::Validation(format!(
            "ban_threshold must be >= 1, got {}",
            config.ban_threshold
        )));
    }

    if config.window_size < config.ban_threshold as usize {
        return Err(ConfigError::Validation(format!(
            "window_size ({}) must be >= ban_threshold ({})",
            config.window_size, config.ban_threshold
        )));
    }

    if config.ban_max_ms < config.ban_base_ms {
        return Err(ConfigError::Validation(format!(
            "ban_max_ms ({}) must be >= ban_base_ms ({})",
            config.ban_max_ms, config.ban_base_ms
        )));
    }

    if !config.direct && config.endpoints.is_empty() {
        return Err(ConfigError::Validation(
            "proxy pool needs at least one endpoint or direct = true".to_string(),
        ));
    }

    let mut ids = HashSet::new();
    for entry in &config.endpoints {
        if entry.id.is_empty() {
            return Err(ConfigError::Validation(
                "proxy id cannot be empty".to_string(),
            ));
        }

        if !ids.insert(entry.id.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate proxy id '{}'",
                entry.id
            )));
        }

        if entry.protocol == ProxyProtocol::Direct {
            continue;
        }

        Url::parse(&entry.endpoint).map_err(|e| {
            ConfigError::InvalidUrl(format!(
                "Invalid endpoint for proxy '{}': {}",
                entry.id, e
            ))
        })?;
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    // Validate crawler name: non-empty, alphanumeric + hyphens only
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    if config.summary_path.is_empty() {
        return Err(ConfigError::Validation(
            "summary_path cannot be empty".to_string(),
        ));
    }

    if matches!(&config.snapshot_path, Some(p) if p.is_empty()) {
        return Err(ConfigError::Validation(
            "snapshot_path cannot be empty when set".to_string(),
        ));
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    if email.is_empty() {
        return Err(ConfigError::Validation(
            "contact_email cannot be empty".to_string(),
        ));
    }

    let (local, domain) = email.split_once('@').ok_or_else(|| {
        ConfigError::Validation(format!("Invalid email format: '{}'", email))
    })?;

    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
