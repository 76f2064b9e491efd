//! # Configuration System
//!
//! Centralized configuration management for the Fleet Inventory system.
//!
//! This crate provides:
//! - Configuration structures for the storage backend and observability
//! - Environment variable loading (12-factor app principles)
//! - Configuration file loading (TOML)
//! - Configuration precedence (env > file > defaults)
//! - Configuration validation

pub mod config;
pub mod loader;
pub mod precedence;

pub use config::{Config, ObservabilityConfig, PostgresConfig, ProviderConfig};
pub use loader::{ConfigError, load_from_env, load_from_file};
pub use precedence::merge_configs;
pub use validator::Validate;
