//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::FrontendConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Validation(_) => None,
        }
    }
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<FrontendConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<FrontendConfig, ConfigError> {
    let config: FrontendConfig = toml::from_str(content).map_err(ConfigError::Parse)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{ClientVerification, Protocol};

    #[test]
    fn test_minimal_config() {
        let config = parse_config(
            r#"
            [[endpoints]]
            address = "127.0.0.1:8080"
            "#,
        )
        .unwrap();

        assert_eq!(config.endpoints.len(), 1);
        assert_eq!(config.endpoints[0].protocol, Protocol::Http);
        assert!(!config.endpoints[0].is_secure());
        assert!(config.endpoints[0].strict_tls);
        assert_eq!(config.server.ticket_seed_generations, 1);
    }

    #[test]
    fn test_secure_endpoint() {
        let config = parse_config(
            r#"
            [server]
            worker_threads = 2

            [[endpoints]]
            address = "0.0.0.0:8443"
            protocol = "http2"
            allow_insecure_on_secure_port = true
            client_verification = "optional"
            client_ca_path = "certs/client_ca.pem"

            [[endpoints.certificates]]
            cert_path = "certs/a.pem"
            key_path = "certs/a.key"
            is_default = true

            [endpoints.ticket_seeds]
            current = ["68656c6c6f"]
            previous = ["676f6f64627965"]
            "#,
        )
        .unwrap();

        let endpoint = &config.endpoints[0];
        assert_eq!(config.server.worker_threads, 2);
        assert_eq!(endpoint.protocol, Protocol::Http2);
        assert_eq!(endpoint.client_verification, ClientVerification::Optional);
        assert!(endpoint.is_secure());
        assert!(endpoint.default_certificate().unwrap().is_default);
        let seeds = endpoint.ticket_seeds.as_ref().unwrap();
        assert_eq!(seeds.current, vec!["68656c6c6f".to_string()]);
        assert_eq!(seeds.previous.len(), 1);
    }

    #[test]
    fn test_parse_error() {
        let result = parse_config("endpoints = 3");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_validation_error_is_reported() {
        let result = parse_config("[server]\nworker_threads = 1\n");
        match result {
            Err(ConfigError::Validation(errors)) => assert!(!errors.is_empty()),
            other => panic!("expected validation failure, got {:?}", other),
        }
    }
}
