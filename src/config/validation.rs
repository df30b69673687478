use std::{net::SocketAddr, sync::Arc};

use eyre::Result;

use crate::{
    config::models::Config,
    core::{clock::SystemClock, deprecation::DeprecationEngine, routing::MountTable},
};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid bind address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Invalid deprecation configuration: {message}")]
    InvalidDeprecation { message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Gateway configuration validator. Collects every problem before failing.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the entire gateway configuration
    pub fn validate(config: &Config) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.bind_addr) {
            errors.push(e);
        }

        if let Err(e) = Self::validate_segment(&config.version, "version") {
            errors.push(e);
        }
        if config.identity_api_versions.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "identity_api_versions".to_string(),
            });
        }
        for version in &config.identity_api_versions {
            if let Err(e) = Self::validate_segment(version, "identity_api_versions") {
                errors.push(e);
            }
        }

        if let Err(e) = Self::validate_url(&config.environment_host, "environment_host") {
            errors.push(e);
        }
        if !config.context_url.is_empty() {
            if let Err(e) = Self::validate_url(&config.context_url, "context_url") {
                errors.push(e);
            }
        }
        for (field, url) in Self::upstream_urls(config) {
            if let Err(e) = Self::validate_url(url, field) {
                errors.push(e);
            }
        }

        errors.extend(Self::validate_origins(&config.allowed_origins));

        let durations = [
            ("graceful_shutdown", config.graceful_shutdown_timeout()),
            ("health_check_interval", config.health_check_interval()),
            (
                "health_check_critical_timeout",
                config.health_check_critical_timeout(),
            ),
            ("upstream_timeout", config.upstream_timeout()),
        ];
        for (field, parsed) in durations {
            match parsed {
                Ok(duration) if duration.is_zero() => errors.push(ValidationError::InvalidField {
                    field: field.to_string(),
                    message: "Duration must be greater than zero".to_string(),
                }),
                Ok(_) => {}
                Err(e) => errors.push(ValidationError::InvalidField {
                    field: field.to_string(),
                    message: e.to_string(),
                }),
            }
        }

        if config.audit_queue_size == 0 {
            errors.push(ValidationError::InvalidField {
                field: "audit_queue_size".to_string(),
                message: "Audit queue size must be greater than 0".to_string(),
            });
        }
        if config.audit_topic.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "audit_topic".to_string(),
            });
        }
        if config.brokers.iter().all(|b| b.trim().is_empty()) {
            errors.push(ValidationError::MissingField {
                field: "brokers".to_string(),
            });
        }

        if let Err(e) = MountTable::from_config(config) {
            errors.push(ValidationError::InvalidField {
                field: "mounts".to_string(),
                message: e.to_string(),
            });
        }

        if let Err(e) =
            DeprecationEngine::from_json(&config.deprecation_config, Arc::new(SystemClock))
        {
            errors.push(ValidationError::InvalidDeprecation {
                message: e.to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Every configured upstream URL with the field it came from.
    pub fn upstream_urls(config: &Config) -> [(&'static str, &str); 15] {
        [
            ("zebedee_url", config.zebedee_url.as_str()),
            ("code_list_api_url", config.code_list_api_url.as_str()),
            ("dataset_api_url", config.dataset_api_url.as_str()),
            ("filter_api_url", config.filter_api_url.as_str()),
            ("hierarchy_api_url", config.hierarchy_api_url.as_str()),
            ("search_api_url", config.search_api_url.as_str()),
            ("dimension_search_api_url", config.dimension_search_api_url.as_str()),
            ("image_api_url", config.image_api_url.as_str()),
            ("observation_api_url", config.observation_api_url.as_str()),
            ("articles_api_url", config.articles_api_url.as_str()),
            ("recipe_api_url", config.recipe_api_url.as_str()),
            ("import_api_url", config.import_api_url.as_str()),
            ("upload_service_api_url", config.upload_service_api_url.as_str()),
            ("identity_api_url", config.identity_api_url.as_str()),
            ("poc_api_url", config.poc_api_url.as_str()),
        ]
    }

    /// Validate listen address format
    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:3000' or '0.0.0.0:8080')"
                    .to_string(),
            });
        }
        Ok(())
    }

    /// A single path segment such as `v1`.
    fn validate_segment(segment: &str, field: &str) -> ValidationResult<()> {
        if segment.is_empty() || segment.contains('/') || segment.contains(char::is_whitespace) {
            return Err(ValidationError::InvalidField {
                field: field.to_string(),
                message: format!("'{segment}' must be a single non-empty path segment"),
            });
        }
        Ok(())
    }

    /// Validate URL format
    fn validate_url(url_str: &str, context: &str) -> ValidationResult<()> {
        match url::Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: format!(
                            "URL scheme must be 'http' or 'https', got '{}'",
                            url.scheme()
                        ),
                    });
                }

                if url.host().is_none() {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: "URL must have a valid host".to_string(),
                    });
                }

                Ok(())
            }
            Err(e) => Err(ValidationError::InvalidField {
                field: context.to_string(),
                message: format!("Invalid URL format: {e}"),
            }),
        }
    }

    fn validate_origins(origins: &[String]) -> Vec<ValidationError> {
        if origins.is_empty() {
            return vec![ValidationError::MissingField {
                field: "allowed_origins".to_string(),
            }];
        }
        origins
            .iter()
            .filter(|origin| origin.as_str() != "*")
            .filter_map(|origin| Self::validate_url(origin, "allowed_origins").err())
            .collect()
    }

    /// Format multiple validation errors into a readable message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}
