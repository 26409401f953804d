use super::models::Config;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("workers.count must be at least 1")]
    NoWorkers,

    #[error("cache.sweep_interval must be positive")]
    ZeroSweepInterval,

    #[error("viewer.formats must list at least one format")]
    NoViewableFormats,

    #[error("viewer.formats entry '{0}' must be upper case")]
    LowercaseFormat(String),

    #[error("server.max_payload_bytes must be positive")]
    ZeroPayloadLimit,
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_workers(config)?;
    validate_cache(config)?;
    validate_viewer(config)?;
    validate_server(config)?;
    Ok(())
}

fn validate_workers(config: &Config) -> Result<(), ValidationError> {
    if config.workers.count == 0 {
        return Err(ValidationError::NoWorkers);
    }
    Ok(())
}

fn validate_cache(config: &Config) -> Result<(), ValidationError> {
    if config.cache.sweep_interval.as_duration().is_zero() {
        return Err(ValidationError::ZeroSweepInterval);
    }
    Ok(())
}

fn validate_viewer(config: &Config) -> Result<(), ValidationError> {
    if config.viewer.formats.is_empty() {
        return Err(ValidationError::NoViewableFormats);
    }
    if let Some(format) = config
        .viewer
        .formats
        .iter()
        .find(|f| f.to_uppercase() != **f)
    {
        return Err(ValidationError::LowercaseFormat(format.clone()));
    }
    Ok(())
}

fn validate_server(config: &Config) -> Result<(), ValidationError> {
    if config.server.max_payload_bytes.as_u64() == 0 {
        return Err(ValidationError::ZeroPayloadLimit);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::humanize::{ByteSize, HumanDuration};
    use std::time::Duration;

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = Config::default();
        config.workers.count = 0;
        assert!(matches!(validate(&config), Err(ValidationError::NoWorkers)));
    }

    #[test]
    fn test_zero_sweep_interval_rejected() {
        let mut config = Config::default();
        config.cache.sweep_interval = HumanDuration(Duration::ZERO);
        assert!(matches!(validate(&config), Err(ValidationError::ZeroSweepInterval)));
    }

    #[test]
    fn test_formats_validated() {
        let mut config = Config::default();
        config.viewer.formats.clear();
        assert!(matches!(validate(&config), Err(ValidationError::NoViewableFormats)));

        config.viewer.formats = vec!["EPUB".into(), "pdf".into()];
        match validate(&config) {
            Err(ValidationError::LowercaseFormat(format)) => assert_eq!(format, "pdf"),
            other => panic!("expected LowercaseFormat, got {other:?}"),
        }
    }

    #[test]
    fn test_zero_payload_limit_rejected() {
        let mut config = Config::default();
        config.server.max_payload_bytes = ByteSize(0);
        assert!(matches!(validate(&config), Err(ValidationError::ZeroPayloadLimit)));
    }
}
