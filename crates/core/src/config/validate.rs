use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Deploy poll intervals are non-zero
/// - The fleet join wait covers the individual monitor timeout
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    // Server validation
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    let deploy = &config.deploy;
    if deploy.bundle_prefix.is_empty() {
        return Err(ConfigError::ValidationError(
            "deploy.bundle_prefix cannot be empty".to_string(),
        ));
    }
    if deploy.address_poll_interval_secs == 0
        || deploy.monitor_poll_interval_secs == 0
        || deploy.image_poll_interval_secs == 0
    {
        return Err(ConfigError::ValidationError(
            "deploy poll intervals must be greater than 0".to_string(),
        ));
    }
    if deploy.fleet_join_wait_secs < deploy.server_monitor_timeout_secs {
        return Err(ConfigError::ValidationError(format!(
            "deploy.fleet_join_wait_secs ({}) must cover deploy.server_monitor_timeout_secs ({})",
            deploy.fleet_join_wait_secs, deploy.server_monitor_timeout_secs
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ServerConfig};
    use std::net::IpAddr;

    #[test]
    fn test_validate_valid_config() {
        let config = Config::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_port_zero_fails() {
        let config = Config {
            server: ServerConfig {
                host: "0.0.0.0".parse::<IpAddr>().unwrap(),
                port: 0,
            },
            ..Default::default()
        };
        let result = validate_config(&config);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_validate_join_wait_must_cover_monitor_timeout() {
        let mut config = Config::default();
        config.deploy.fleet_join_wait_secs = 10;
        config.deploy.server_monitor_timeout_secs = 600;
        let result = validate_config(&config);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validate_zero_poll_interval_fails() {
        let mut config = Config::default();
        config.deploy.monitor_poll_interval_secs = 0;
        assert!(validate_config(&config).is_err());
    }
}
