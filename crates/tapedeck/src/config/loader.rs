use std::path::Path;

use regex::Regex;

use crate::config::schema::{Config, StorageBackend};
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

/// Semantic checks the schema cannot express.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.queue.name.trim().is_empty() {
        return Err(invalid("queue.name must not be empty"));
    }

    if config.worker.count == 0 {
        return Err(invalid("worker.count must be at least 1"));
    }
    if config.worker.poll_interval_ms == 0 {
        return Err(invalid("worker.poll_interval_ms must be at least 1"));
    }
    if config.worker.claim_timeout_secs == Some(0) {
        return Err(invalid("worker.claim_timeout_secs must be at least 1 when set"));
    }

    if config.job_pool.workers == 0 {
        return Err(invalid("job_pool.workers must be at least 1"));
    }
    if config.job_pool.capacity == 0 {
        return Err(invalid("job_pool.capacity must be at least 1"));
    }

    let format_tag = Regex::new("^[a-z0-9]+$").map_err(|e| ConfigError::Validation {
        message: format!("Invalid format pattern: {}", e),
    })?;
    if !format_tag.is_match(&config.conversion.target_format) {
        return Err(ConfigError::Validation {
            message: format!(
                "conversion.target_format '{}' must be a lowercase extension such as 'wav'",
                config.conversion.target_format
            ),
        });
    }

    if config.storage.backend == StorageBackend::Local
        && config
            .storage
            .directory
            .as_deref()
            .map_or(true, |d| d.trim().is_empty())
    {
        return Err(invalid("storage.directory is required for the local backend"));
    }

    Ok(())
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Validation {
        message: message.to_string(),
    }
}
