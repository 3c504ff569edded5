//! Config validation: bounds and enumerated values.

use crate::schema::TandemConfig;
use tandem_common::ConfigError;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validate a parsed config. Returns the first problem found.
pub fn validate(config: &TandemConfig) -> Result<(), ConfigError> {
    if config.session.max_guests == 0 {
        return Err(ConfigError::ValidationError(
            "session.max_guests must be at least 1".into(),
        ));
    }
    if config.session.max_guests > 100 {
        return Err(ConfigError::ValidationError(format!(
            "session.max_guests is {}, the cap is 100",
            config.session.max_guests
        )));
    }
    if config.signin.silent_timeout_secs == 0 || config.signin.silent_timeout_secs > 300 {
        return Err(ConfigError::ValidationError(format!(
            "signin.silent_timeout_secs must be within 1..=300, got {}",
            config.signin.silent_timeout_secs
        )));
    }
    // Allow full EnvFilter directives (contain '=' or ',') but check bare levels.
    let level = config.logging.level.as_str();
    if !level.contains('=') && !level.contains(',') && !LOG_LEVELS.contains(&level) {
        return Err(ConfigError::ValidationError(format!(
            "logging.level '{level}' is not one of {LOG_LEVELS:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate(&TandemConfig::default()).is_ok());
    }

    #[test]
    fn zero_max_guests_is_rejected() {
        let mut config = TandemConfig::default();
        config.session.max_guests = 0;
        let err = validate(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
        assert!(err.to_string().contains("max_guests"));
    }

    #[test]
    fn oversized_max_guests_is_rejected() {
        let mut config = TandemConfig::default();
        config.session.max_guests = 500;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn sign_in_timeout_bounds() {
        let mut config = TandemConfig::default();
        config.signin.silent_timeout_secs = 0;
        assert!(validate(&config).is_err());
        config.signin.silent_timeout_secs = 301;
        assert!(validate(&config).is_err());
        config.signin.silent_timeout_secs = 300;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn bare_log_level_is_checked() {
        let mut config = TandemConfig::default();
        config.logging.level = "verbose".into();
        assert!(validate(&config).is_err());
        config.logging.level = "debug".into();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn env_filter_directives_pass_through() {
        let mut config = TandemConfig::default();
        config.logging.level = "tandem_session=debug,info".into();
        assert!(validate(&config).is_ok());
    }
}
