//! Tandem configuration system.
//!
//! TOML-based configuration with serde defaults and validation. Every
//! section has sensible defaults, so partial configs work out of the box.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! let config = tandem_config::load_config().expect("failed to load config");
//! assert!(config.session.max_guests >= 1);
//! ```

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{create_default_config, default_config_path, load_from_path};
pub use schema::{
    AccessConfig, LoggingConfig, SessionConfig, SignInConfig, TandemConfig, TerminalConfig,
    CONFIG_SCHEMA_VERSION,
};

use tandem_common::ConfigError;

/// Load config from the platform default path and validate it.
///
/// A missing file is replaced by a freshly written default config; a file
/// with invalid values is an error here (unlike [`load_from_path`], which
/// only warns).
pub fn load_config() -> Result<TandemConfig, ConfigError> {
    let config = loader::load_default()?;
    validation::validate(&config)?;
    Ok(config)
}
