use super::{AppConfig, ConfigError};

const VALID_LOG_LEVELS: &[&str] = &["DEBUG", "INFO", "WARNING", "WARN", "ERROR", "CRITICAL", "DISABLED"];

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_server_config(config)?;
    validate_upstream_config(config)?;
    validate_model_aliases(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_server_config(config: &AppConfig) -> Result<(), ConfigError> {
    let server = &config.server;
    if server.host.trim().is_empty() {
        return Err(validation_err("server.host cannot be empty"));
    }
    if server.port == 0 {
        return Err(validation_err("server.port must be greater than 0"));
    }
    if server.write_timeout_secs == 0 {
        return Err(validation_err(
            "server.write_timeout_secs must be greater than 0",
        ));
    }
    if server.stream_buffer_frames == 0 {
        return Err(validation_err(
            "server.stream_buffer_frames must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_upstream_config(config: &AppConfig) -> Result<(), ConfigError> {
    let upstream = &config.upstream;
    let base_url = upstream.base_url.trim();
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        return Err(validation_err(format!(
            "upstream.base_url must be an http(s) URL, got '{base_url}'"
        )));
    }
    if upstream.timeout_secs == 0 {
        return Err(validation_err("upstream.timeout_secs must be greater than 0"));
    }
    if upstream.connect_timeout_secs == 0 {
        return Err(validation_err(
            "upstream.connect_timeout_secs must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_model_aliases(config: &AppConfig) -> Result<(), ConfigError> {
    for (alias, target) in &config.model_aliases {
        if alias.trim().is_empty() {
            return Err(validation_err("model_aliases contains an empty alias"));
        }
        if target.trim().is_empty() {
            return Err(validation_err(format!(
                "model_aliases['{alias}'] maps to an empty model"
            )));
        }
    }
    Ok(())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let level = config.features.log_level.to_uppercase();
    if !VALID_LOG_LEVELS.contains(&level.as_str()) {
        return Err(validation_err(format!(
            "features.log_level must be one of {VALID_LOG_LEVELS:?}, got '{}'",
            config.features.log_level
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&AppConfig::default()).is_ok());
    }

    #[test]
    fn test_rejects_non_http_base_url() {
        let mut config = AppConfig::default();
        config.upstream.base_url = "openrouter.ai/api/v1".into();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("upstream.base_url"));
    }

    #[test]
    fn test_rejects_zero_timeouts() {
        let mut config = AppConfig::default();
        config.upstream.timeout_secs = 0;
        assert!(validate_config(&config).is_err());

        let mut config = AppConfig::default();
        config.server.write_timeout_secs = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_rejects_empty_alias_target() {
        let mut config = AppConfig::default();
        config.model_aliases.insert("old".into(), " ".into());
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("model_aliases['old']"));
    }

    #[test]
    fn test_log_level_case_insensitive() {
        let mut config = AppConfig::default();
        config.features.log_level = "warning".into();
        assert!(validate_config(&config).is_ok());
        config.features.log_level = "verbose".into();
        assert!(validate_config(&config).is_err());
    }
}
