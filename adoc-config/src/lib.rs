//! Shared configuration loader for the adoc toolchain.
//!
//! The built-in [`EngineConfig::default`] is serialized and used as the bottom
//! layer so that every key has a value. Applications layer the user file and
//! any explicit TOML files on top via [`Loader`] before deserializing back
//! into [`EngineConfig`].

use adoc_engine::EngineConfig;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, File, FileFormat, ValueKind};
use std::path::{Path, PathBuf};

/// Location of the per-user configuration file, relative to the platform
/// configuration directory.
pub const USER_CONFIG: &str = "adoc/adoc.toml";

/// `<config dir>/adoc/adoc.toml`, e.g. `~/.config/adoc/adoc.toml` on Linux.
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(USER_CONFIG))
}

/// Helper for layering user overrides over the built-in defaults.
#[derive(Debug, Clone)]
pub struct Loader {
    builder: ConfigBuilder<DefaultState>,
}

impl Loader {
    /// Start a loader seeded with the built-in defaults.
    pub fn new() -> Self {
        let defaults = serde_json::to_string(&EngineConfig::default())
            .expect("default configuration serializes");
        let builder = Config::builder().add_source(File::from_str(&defaults, FileFormat::Json));
        Self { builder }
    }

    /// Layer a configuration file. Missing files trigger an error.
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        let source = File::from(path.as_ref())
            .format(FileFormat::Toml)
            .required(true);
        self.builder = self.builder.add_source(source);
        self
    }

    /// Layer an optional configuration file (ignored if the file is absent).
    pub fn with_optional_file(mut self, path: impl AsRef<Path>) -> Self {
        let source = File::from(path.as_ref())
            .format(FileFormat::Toml)
            .required(false);
        self.builder = self.builder.add_source(source);
        self
    }

    /// Layer the user file from [`user_config_path`] when it exists.
    pub fn with_user_file(self) -> Self {
        match user_config_path() {
            Some(path) => self.with_optional_file(path),
            None => self,
        }
    }

    /// Layer TOML text, e.g. an embedded profile.
    pub fn with_toml(mut self, toml: &str) -> Self {
        self.builder = self.builder.add_source(File::from_str(toml, FileFormat::Toml));
        self
    }

    /// Apply a single key/value override (useful for CLI settings).
    pub fn set_override<I>(mut self, key: &str, value: I) -> Result<Self, ConfigError>
    where
        I: Into<ValueKind>,
    {
        self.builder = self.builder.set_override(key, value)?;
        Ok(self)
    }

    /// Finalize the builder and deserialize the resulting configuration.
    pub fn build(self) -> Result<EngineConfig, ConfigError> {
        self.builder.build()?.try_deserialize()
    }
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience helper for callers that only need the defaults.
pub fn load_defaults() -> Result<EngineConfig, ConfigError> {
    Loader::new().build()
}
