use crate::config::types::{Config, CrawlerConfig, HeadlessConfig, StorageConfig};
use crate::ConfigError;
use url::Url;

/// Upper bound on batch concurrency
const MAX_CONCURRENCY: usize = 64;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_storage_config(&config.storage)?;
    validate_crawler_config(&config.crawler)?;
    validate_headless_config(&config.headless)?;
    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_file.trim().is_empty() {
        return Err(ConfigError::Validation(
            "database-file cannot be empty".to_string(),
        ));
    }

    if config.database_file.contains(['/', '\\']) {
        return Err(ConfigError::Validation(format!(
            "database-file must be a file name, got '{}'",
            config.database_file
        )));
    }

    Ok(())
}

fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.concurrency < 1 || config.concurrency > MAX_CONCURRENCY {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and {}, got {}",
            MAX_CONCURRENCY, config.concurrency
        )));
    }

    if config.fetch_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "fetch-timeout-secs must be greater than 0".to_string(),
        ));
    }

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    if let Some(proxy) = &config.proxy {
        Url::parse(proxy)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid proxy '{}': {}", proxy, e)))?;
    }

    Ok(())
}

fn validate_headless_config(config: &HeadlessConfig) -> Result<(), ConfigError> {
    match (&config.endpoint, config.enabled) {
        (None, true) => Err(ConfigError::Validation(
            "headless.endpoint is required when headless rendering is enabled".to_string(),
        )),
        (Some(endpoint), _) => {
            let url = Url::parse(endpoint).map_err(|e| {
                ConfigError::InvalidUrl(format!("Invalid headless endpoint '{}': {}", endpoint, e))
            })?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(ConfigError::InvalidUrl(format!(
                    "Headless endpoint must use http or https, got '{}'",
                    endpoint
                )));
            }
            Ok(())
        }
        (None, false) => Ok(()),
    }
}
