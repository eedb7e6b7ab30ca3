//! Configuration plumbing shared by the exporter crates.
//!
//! A configuration type implements [`Config`] to be parsed from a TOML
//! document and validated. [`ConfigManager`] holds the active snapshot and
//! swaps it atomically on reload, so a reader that grabbed a snapshot keeps a
//! consistent view until it lets go of it.

pub mod manager;

pub use manager::ConfigManager;

use serde::de::DeserializeOwned;

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// A configuration document.
pub trait Config: Sized + Send + Sync + 'static {
    /// Build the configuration from a parsed TOML value.
    fn from_toml(value: &toml::Value) -> Result<Self, ConfigError>;

    /// Check cross-field constraints. Called before a snapshot is installed.
    fn validate(&self) -> Result<(), ConfigError> {
        Ok(())
    }
}

/// Deserialize any serde type from a TOML value.
///
/// Most `Config` impls are a one-line call to this.
pub fn from_toml_value<T: DeserializeOwned>(value: &toml::Value) -> Result<T, ConfigError> {
    Ok(value.clone().try_into()?)
}

/// Parse a TOML document into a validated configuration.
pub fn parse_str<T: Config>(content: &str) -> Result<T, ConfigError> {
    let value: toml::Value = content.parse()?;
    let config = T::from_toml(&value)?;
    config.validate()?;
    Ok(config)
}
