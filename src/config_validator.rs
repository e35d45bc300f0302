use crate::config::Config;
use crate::error::RelayError;
use crate::interval::Granularity;

/// Validates configuration objects for consistency and correctness
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates a Redis URL
    pub fn validate_redis_url(url: &str) -> Result<(), RelayError> {
        if url.is_empty() {
            return Err(RelayError::Configuration(
                "Redis URL cannot be empty".to_string(),
            ));
        }

        if !url.starts_with("redis://") && !url.starts_with("rediss://") {
            return Err(RelayError::Configuration(
                "Redis URL must start with 'redis://' or 'rediss://'".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates the listening host and port
    pub fn validate_bind(host: &str, port: u16) -> Result<(), RelayError> {
        if host.is_empty() {
            return Err(RelayError::Configuration(
                "Server host cannot be empty".to_string(),
            ));
        }

        if port == 0 {
            return Err(RelayError::Configuration(
                "Server port must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn validate_granularity(minutes: u32) -> Result<Granularity, RelayError> {
        Granularity::minutes(minutes)
    }

    pub fn validate_cleanup_interval(secs: u64) -> Result<(), RelayError> {
        if secs == 0 {
            return Err(RelayError::Configuration(
                "Cleanup interval must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Validates everything the server needs before it starts
    pub fn validate(config: &Config) -> Result<(), RelayError> {
        Self::validate_bind(&config.host, config.port)?;
        Self::validate_cleanup_interval(config.cleanup_interval_secs)?;

        if config.stats {
            Self::validate_granularity(config.stats_granularity)?;
            if let Some(url) = &config.redis_url {
                Self::validate_redis_url(url)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_valid_redis_url() {
        assert!(ConfigValidator::validate_redis_url("redis://localhost:6379").is_ok());
        assert!(ConfigValidator::validate_redis_url("rediss://localhost:6379").is_ok());
    }

    #[test]
    fn test_invalid_redis_url() {
        assert!(ConfigValidator::validate_redis_url("").is_err());
        assert!(ConfigValidator::validate_redis_url("http://localhost:6379").is_err());
    }

    #[test]
    fn test_bind() {
        assert!(ConfigValidator::validate_bind("127.0.0.1", 9000).is_ok());
        assert!(ConfigValidator::validate_bind("", 9000).is_err());
        assert!(ConfigValidator::validate_bind("127.0.0.1", 0).is_err());
    }

    #[test]
    fn test_granularity() {
        assert_eq!(ConfigValidator::validate_granularity(15).unwrap().as_minutes(), 15);
        assert!(ConfigValidator::validate_granularity(0).is_err());
        assert!(ConfigValidator::validate_granularity(90).is_err());
    }

    #[test]
    fn test_validate_config() {
        let config = Config::parse_from(["courier"]);
        assert!(ConfigValidator::validate(&config).is_ok());

        let config = Config::parse_from(["courier", "--stats-granularity", "0"]);
        assert!(ConfigValidator::validate(&config).is_err());

        // Granularity only matters when stats are tracked
        let config = Config::parse_from(["courier", "--stats", "false", "--stats-granularity", "0"]);
        assert!(ConfigValidator::validate(&config).is_ok());

        let config = Config::parse_from(["courier", "--redis-url", "http://nope"]);
        assert!(ConfigValidator::validate(&config).is_err());
    }
}
