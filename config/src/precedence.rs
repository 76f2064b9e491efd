//! # Configuration Precedence
//!
//! Merges configuration from multiple sources with precedence rules.
//!
//! # Precedence Order
//! 1. Environment variables (highest priority)
//! 2. Configuration file
//! 3. Default values (lowest priority)
//!
//! A source only overrides a field it actually changed away from the
//! defaults; the applied changes are logged per source via `tracing`.

use crate::config::{Config, ObservabilityConfig, PostgresConfig};

/// Merge configuration sources, lowest priority first.
#[must_use]
pub fn merge_configs(defaults: Config, file_config: Config, env_config: Config) -> Config {
    let mut config = defaults;
    config = merge_with_logging(config, file_config, "file");
    config = merge_with_logging(config, env_config, "env");
    config
}

fn merge_with_logging(mut base: Config, override_config: Config, source_name: &str) -> Config {
    let mut changes = Vec::new();

    merge_postgres(
        &mut base.providers.postgres,
        &override_config.providers.postgres,
        &mut changes,
    );
    merge_observability(
        &mut base.observability,
        &override_config.observability,
        &mut changes,
    );

    if !changes.is_empty() {
        tracing::info!("Configuration from {}: {:?}", source_name, changes);
    }

    base
}

fn merge_postgres(base: &mut PostgresConfig, override_config: &PostgresConfig, changes: &mut Vec<String>) {
    let defaults = PostgresConfig::default();

    if override_config.host != defaults.host && override_config.host != base.host {
        changes.push(format!("providers.postgres.host = {}", override_config.host));
        base.host.clone_from(&override_config.host);
    }
    if override_config.port != defaults.port && override_config.port != base.port {
        changes.push(format!("providers.postgres.port = {}", override_config.port));
        base.port = override_config.port;
    }
    if override_config.database != defaults.database && override_config.database != base.database {
        changes.push(format!(
            "providers.postgres.database = {}",
            override_config.database
        ));
        base.database.clone_from(&override_config.database);
    }
    if override_config.username != defaults.username && override_config.username != base.username {
        changes.push(format!(
            "providers.postgres.username = {}",
            override_config.username
        ));
        base.username.clone_from(&override_config.username);
    }
    if !override_config.password.is_empty() && override_config.password != base.password {
        changes.push("providers.postgres.password = ***".to_string());
        base.password.clone_from(&override_config.password);
    }
    if override_config.pool_size != defaults.pool_size && override_config.pool_size != base.pool_size
    {
        changes.push(format!(
            "providers.postgres.pool_size = {}",
            override_config.pool_size
        ));
        base.pool_size = override_config.pool_size;
    }
    if override_config.timeout_seconds != defaults.timeout_seconds
        && override_config.timeout_seconds != base.timeout_seconds
    {
        changes.push(format!(
            "providers.postgres.timeout_seconds = {}",
            override_config.timeout_seconds
        ));
        base.timeout_seconds = override_config.timeout_seconds;
    }
}

fn merge_observability(
    base: &mut ObservabilityConfig,
    override_config: &ObservabilityConfig,
    changes: &mut Vec<String>,
) {
    let defaults = ObservabilityConfig::default();

    if override_config.logging_level != defaults.logging_level
        && override_config.logging_level != base.logging_level
    {
        changes.push(format!(
            "observability.logging_level = {}",
            override_config.logging_level
        ));
        base.logging_level.clone_from(&override_config.logging_level);
    }
    if override_config.tracing_enabled != base.tracing_enabled {
        changes.push(format!(
            "observability.tracing_enabled = {}",
            override_config.tracing_enabled
        ));
        base.tracing_enabled = override_config.tracing_enabled;
    }
}
