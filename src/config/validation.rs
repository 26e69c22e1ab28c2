use std::collections::HashSet;

use super::{AppConfig, BackendKind, ConfigError};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_server_config(config)?;
    validate_backend_config(config)?;
    validate_generation_config(config)?;
    validate_log_level(config)?;
    Ok(())
}

/// Longest accepted reasoning marker. The splitter holds back at most
/// `marker.len() - 1` bytes, so this also caps its pending buffer.
pub const MAX_REASONING_MARKER_BYTES: usize = 64;

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_server_config(config: &AppConfig) -> Result<(), ConfigError> {
    let server = &config.server;
    if server.concurrent_request_limit == 0 {
        return Err(validation_err(
            "server.concurrent_request_limit must be greater than 0",
        ));
    }
    if server.max_body_bytes == 0 {
        return Err(validation_err("server.max_body_bytes must be greater than 0"));
    }
    if server.timeout == 0 {
        return Err(validation_err("server.timeout must be greater than 0"));
    }
    if let Some(worker_threads) = server.runtime_worker_threads {
        if worker_threads == 0 {
            return Err(validation_err(
                "server.runtime_worker_threads must be greater than 0 when set",
            ));
        }
    }
    let base_path = server.base_path.trim();
    if !base_path.is_empty() && !base_path.starts_with('/') {
        return Err(validation_err("server.base_path must start with '/' when set"));
    }
    Ok(())
}

fn validate_backend_config(config: &AppConfig) -> Result<(), ConfigError> {
    let backend = &config.backend;
    match backend.kind {
        BackendKind::Http => {
            let parsed = url::Url::parse(backend.base_url.trim()).map_err(|err| {
                validation_err(format!("backend.base_url is not a valid URL: {err}"))
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(validation_err(
                    "backend.base_url must start with http:// or https://",
                ));
            }
        }
        BackendKind::Mock => {
            let mock = &backend.mock;
            if mock.responses.is_empty() {
                return Err(validation_err("backend.mock.responses cannot be empty"));
            }
            let mut keys = HashSet::new();
            for entry in &mock.table {
                if entry.key.is_empty() {
                    return Err(validation_err("backend.mock.table contains an empty match key"));
                }
                if !keys.insert(entry.key.as_str()) {
                    return Err(validation_err(format!(
                        "backend.mock.table: duplicate match key '{}'",
                        entry.key
                    )));
                }
                match (&entry.reply, &entry.tool_call) {
                    (Some(_), None) => {}
                    (None, Some(call)) => {
                        if call.name.trim().is_empty() {
                            return Err(validation_err(format!(
                                "backend.mock.table '{}': tool_call.name cannot be empty",
                                entry.key
                            )));
                        }
                    }
                    _ => {
                        return Err(validation_err(format!(
                            "backend.mock.table '{}': exactly one of reply or tool_call is required",
                            entry.key
                        )));
                    }
                }
            }
        }
    }
    Ok(())
}

fn validate_generation_config(config: &AppConfig) -> Result<(), ConfigError> {
    let generation = &config.generation;
    if generation.reasoning_open_marker.is_empty() || generation.reasoning_close_marker.is_empty()
    {
        return Err(validation_err("generation reasoning markers cannot be empty"));
    }
    if generation.reasoning_open_marker == generation.reasoning_close_marker {
        return Err(validation_err(
            "generation.reasoning_open_marker and reasoning_close_marker must differ",
        ));
    }
    if generation.reasoning_open_marker.len() > MAX_REASONING_MARKER_BYTES
        || generation.reasoning_close_marker.len() > MAX_REASONING_MARKER_BYTES
    {
        return Err(validation_err(format!(
            "generation reasoning markers cannot exceed {MAX_REASONING_MARKER_BYTES} bytes"
        )));
    }
    if generation.max_image_bytes == 0 {
        return Err(validation_err("generation.max_image_bytes must be greater than 0"));
    }
    if let Some(model) = generation.default_model.as_deref() {
        if model.trim().is_empty() {
            return Err(validation_err(
                "generation.default_model cannot be empty when set",
            ));
        }
    }
    if let Some(model) = generation.built_in_model.as_deref() {
        if model.trim().is_empty() {
            return Err(validation_err(
                "generation.built_in_model cannot be empty when set",
            ));
        }
    }
    Ok(())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let valid_levels = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];
    if !valid_levels.contains(&config.features.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {valid_levels:?}"
        )));
    }
    Ok(())
}
