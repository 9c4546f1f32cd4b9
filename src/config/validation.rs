use crate::config::types::{
    Config, HarvestConfig, OutputConfig, RateLimitConfig, SourceConfig, SourceKind,
    UserAgentConfig,
};
use crate::ConfigError;
use url::Url;

/// Largest batch a single transaction is allowed to carry
const MAX_BATCH_SIZE: usize = 1000;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_harvest_config(&config.harvest)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_output_config(&config.output)?;
    validate_source_config(&config.source)?;
    Ok(())
}

/// Validates batching, retry and rate limit settings
fn validate_harvest_config(config: &HarvestConfig) -> Result<(), ConfigError> {
    validate_rate_limit(&config.rate_limit)?;

    if config.batch_size < 1 || config.batch_size > MAX_BATCH_SIZE {
        return Err(ConfigError::Validation(format!(
            "batch_size must be between 1 and {}, got {}",
            MAX_BATCH_SIZE, config.batch_size
        )));
    }

    if config.max_concurrency == Some(0) {
        return Err(ConfigError::Validation(
            "max_concurrency must be >= 1 when set".to_string(),
        ));
    }

    if config.max_retries_per_item > 5 {
        return Err(ConfigError::Validation(format!(
            "max_retries_per_item must be <= 5, got {}",
            config.max_retries_per_item
        )));
    }

    Ok(())
}

fn validate_rate_limit(config: &RateLimitConfig) -> Result<(), ConfigError> {
    if config.calls < 1 {
        return Err(ConfigError::Validation(format!(
            "rate_limit.calls must be >= 1, got {}",
            config.calls
        )));
    }

    if config.period_seconds < 1 {
        return Err(ConfigError::Validation(format!(
            "rate_limit.period_seconds must be >= 1, got {}",
            config.period_seconds
        )));
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

    Ok(())
}

/// Validates the discovery and fetch endpoints
fn validate_source_config(config: &SourceConfig) -> Result<(), ConfigError> {
    validate_http_url("sitemap_url", &config.sitemap_url)?;

    if let Some(filter) = &config.locator_filter {
        if filter.is_empty() {
            return Err(ConfigError::Validation(
                "locator_filter cannot be empty when set".to_string(),
            ));
        }
    }

    match (&config.kind, &config.api_base) {
        (SourceKind::Stats, None) => Err(ConfigError::Validation(
            "api_base is required when kind = \"stats\"".to_string(),
        )),
        (_, Some(api_base)) => validate_http_url("api_base", api_base),
        _ => Ok(()),
    }
}

fn validate_http_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {} '{}': {}", field, value, e)))?;

    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(ConfigError::Validation(format!(
            "{} '{}' must use HTTP or HTTPS",
            field, value
        )));
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

    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !parts[1].contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
