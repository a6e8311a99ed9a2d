//! Session configuration management for `hotview.toml`.
//!
//! # Module Structure
//!
//! ```text
//! config/
//! ├── section/       # Configuration section definitions
//! │   ├── serve      # [serve]
//! │   ├── device     # [device]
//! │   ├── synth      # [synth]
//! │   ├── style      # [style]
//! │   ├── session    # [session]
//! │   └── evaluator  # [evaluator]
//! ├── error          # ConfigError
//! └── mod.rs         # HotConfig (this file)
//! ```

mod error;
pub mod section;
mod util;

use util::find_config_file;

pub use error::ConfigError;
pub use section::{
    DeviceConfig, DeviceEndpoint, EvaluatorConfig, ReconnectPolicy, ServeConfig, SessionConfig,
    StyleConfig, SynthConfig,
};

use crate::{
    cli::{Cli, Commands},
    log,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

// ============================================================================
// root configuration
// ============================================================================

/// Root configuration structure representing hotview.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HotConfig {
    /// Absolute path to the config file (internal use only)
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Project root directory - parent of config file (internal use only)
    #[serde(skip)]
    pub root: PathBuf,

    /// Development-host listener
    #[serde(default)]
    pub serve: ServeConfig,

    /// Packaged device endpoint
    #[serde(default)]
    pub device: DeviceConfig,

    /// Class synthesis
    #[serde(default)]
    pub synth: SynthConfig,

    /// Stylesheet lookup
    #[serde(default)]
    pub style: StyleConfig,

    /// View registry bounds
    #[serde(default)]
    pub session: SessionConfig,

    /// Device-side evaluator
    #[serde(default)]
    pub evaluator: EvaluatorConfig,
}

impl HotConfig {
    /// Load configuration from CLI arguments.
    ///
    /// Searches upward from cwd for the config file. Without one, defaults
    /// apply and the project root is the working directory.
    pub fn load(cli: &Cli) -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to get current working directory")?;

        let mut config = match find_config_file(&cli.config, &cwd) {
            Some(path) => {
                let mut config = Self::from_path(&path)?;
                config.root = path.parent().map(Path::to_path_buf).unwrap_or_default();
                config.config_path = path;
                config
            }
            None => {
                crate::debug!("config"; "no {} found, using defaults", cli.config.display());
                Self {
                    root: cwd,
                    ..Self::default()
                }
            }
        };

        config.apply_command_options(cli);
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML string
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    /// Load configuration from file path with unknown field detection.
    fn from_path(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;

        let (config, ignored) = Self::parse_with_ignored(&content)?;
        if !ignored.is_empty() {
            Self::print_unknown_fields_warning(&ignored, path);
        }

        Ok(config)
    }

    /// Parse TOML content, collecting any unknown fields.
    fn parse_with_ignored(content: &str) -> Result<(Self, Vec<String>)> {
        let mut ignored = Vec::new();
        let deserializer = toml::Deserializer::new(content);
        let config = serde_ignored::deserialize(deserializer, |path: serde_ignored::Path| {
            ignored.push(path.to_string());
        })
        .map_err(ConfigError::Toml)?;
        Ok((config, ignored))
    }

    /// Print warning about unknown fields.
    fn print_unknown_fields_warning(fields: &[String], path: &Path) {
        let display_path = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_else(|| path.to_string_lossy());
        log!("warning"; "unknown fields in {} (ignored): {}", display_path, fields.join(", "));
    }

    /// Get the root directory path
    pub fn get_root(&self) -> &Path {
        &self.root
    }

    /// Set the root directory path
    pub fn set_root(&mut self, path: &Path) {
        self.root = path.to_path_buf();
    }

    // ========================================================================
    // cli configuration updates
    // ========================================================================

    /// Apply command-specific configuration options.
    fn apply_command_options(&mut self, cli: &Cli) {
        crate::logger::set_verbose(cli.verbose);

        if let Commands::Serve { interface, port } = &cli.command {
            Self::update_option(&mut self.serve.interface, interface.as_ref());
            Self::update_option(&mut self.serve.port, port.as_ref());
        }
    }

    /// Override a config value when the CLI provided one.
    fn update_option<T: Clone>(config_option: &mut T, cli_option: Option<&T>) {
        if let Some(option) = cli_option {
            *config_option = option.clone();
        }
    }

    // ========================================================================
    // validation
    // ========================================================================

    /// Validate values that would otherwise fail deep inside a session.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.capacity == 0 {
            return Err(ConfigError::Validation(
                "[session] capacity must be at least 1".into(),
            ));
        }
        if let Err(e) = regex::Regex::new(&self.synth.loader_pattern) {
            return Err(ConfigError::Validation(format!(
                "[synth] loader_pattern is not a valid regex: {e}"
            )));
        }
        if self.synth.markup_extension.is_empty() || self.synth.source_extension.is_empty() {
            return Err(ConfigError::Validation(
                "[synth] markup_extension and source_extension must be set".into(),
            ));
        }
        if self.style.extension.is_empty() {
            return Err(ConfigError::Validation("[style] extension must be set".into()));
        }
        Ok(())
    }
}

// ============================================================================
// Test Helpers (available to all modules via `use crate::config::test_*`)
// ============================================================================

/// Parse config, panicking on unknown fields to catch typos in tests.
#[cfg(test)]
pub fn test_parse_config(content: &str) -> HotConfig {
    let (parsed, ignored) = HotConfig::parse_with_ignored(content).unwrap();
    assert!(
        ignored.is_empty(),
        "test config has unknown fields: {:?}",
        ignored
    );
    parsed
}

// ============================================================================
// tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_str_invalid_toml() {
        let result = HotConfig::from_str("[serve\nport = 1");
        assert!(result.is_err());
    }

    #[test]
    fn test_set_root() {
        let mut config = HotConfig::default();
        config.set_root(Path::new("/custom/path"));
        assert_eq!(config.get_root(), Path::new("/custom/path"));
    }

    #[test]
    fn test_unknown_fields_detected() {
        let content = "[serve]\nport = 7000\n[unknown_section]\nfield = \"value\"";
        let (config, ignored) = HotConfig::parse_with_ignored(content).unwrap();

        assert_eq!(config.serve.port, 7000);
        assert!(ignored.iter().any(|f| f.contains("unknown_section")));
    }

    #[test]
    fn test_validate_defaults() {
        assert!(HotConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_zero_capacity() {
        let config = test_parse_config("[session]\ncapacity = 0");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_bad_loader_pattern() {
        let config = test_parse_config("[synth]\nloader_pattern = \"LoadFromXaml(\"");
        assert!(config.validate().is_err());
    }
}
