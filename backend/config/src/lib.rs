//! `afkwarden-config`: runtime configuration management.
//!
//! Provides:
//! - Typed config schema (discord, watchdog, progression, logging)
//! - YAML read/write with atomic backup rotation
//! - `${ENV_VAR}` substitution
//! - Default value application
//! - Validation

pub mod defaults;
pub mod env;
pub mod io;
pub mod schema;
pub mod validation;

pub use defaults::{apply_all_defaults, starter_config};
pub use env::{collect_referenced_vars, resolve_env_vars, resolve_env_vars_with, MissingEnvVarError};
pub use io::{config_dir, config_file_path, load_raw, resolve_relative, write_config};
pub use schema::{AfkWardenConfig, DiscordConfig, LoggingConfig, ProgressionConfig, WatchdogConfig};
pub use validation::{validate, ConfigValidationError, ValidationReport};

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::path::Path;

/// Load a config file, substitute env vars, apply defaults and validate.
///
/// Warnings are logged; any validation error fails the load.
pub async fn load_and_prepare(path: &Path) -> Result<AfkWardenConfig> {
    let value = load_raw(path).await?;
    prepare(value)
}

fn prepare(value: Value) -> Result<AfkWardenConfig> {
    let value = resolve_env_vars(&value).context("Failed to resolve env vars in config")?;

    let config: AfkWardenConfig =
        serde_json::from_value(value).context("Failed to deserialize config after processing")?;

    let config = apply_all_defaults(config);

    let report = validate(&config);
    for warning in &report.warnings {
        tracing::warn!(path = %warning.path, message = %warning.message, "Config warning");
    }
    for error in &report.errors {
        tracing::error!(path = %error.path, message = %error.message, "Config error");
    }
    if !report.is_valid() {
        bail!("config has {} error(s)", report.errors.len());
    }

    Ok(config)
}
