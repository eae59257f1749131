//! Configuration for the Xenos shader translator
//!
//! The `[features]` section is the capability descriptor handed to every
//! translator instance. It is read once when an instance is constructed and
//! never changes during a translation.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, TranslatorError};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct TranslatorConfig {
    pub features: Features,
    pub debug: DebugConfig,
}

/// Target SPIR-V version
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum SpirvVersion {
    #[default]
    #[serde(rename = "1.0")]
    V1_0,
    #[serde(rename = "1.1")]
    V1_1,
    #[serde(rename = "1.2")]
    V1_2,
    #[serde(rename = "1.3")]
    V1_3,
    #[serde(rename = "1.4")]
    V1_4,
    #[serde(rename = "1.5")]
    V1_5,
}

impl SpirvVersion {
    /// (major, minor) pair as written into the module header
    pub fn major_minor(self) -> (u8, u8) {
        match self {
            Self::V1_0 => (1, 0),
            Self::V1_1 => (1, 1),
            Self::V1_2 => (1, 2),
            Self::V1_3 => (1, 3),
            Self::V1_4 => (1, 4),
            Self::V1_5 => (1, 5),
        }
    }
}

bitflags! {
    /// Optional host capabilities the translated module may rely on
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FeatureFlags: u8 {
        const CLIP_DISTANCE = 0x01;
        const CULL_DISTANCE = 0x02;
        const FLOAT_CONTROLS = 0x04;
    }
}

/// Host capability descriptor
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Features {
    pub spirv_version: SpirvVersion,
    pub clip_distance: bool,
    pub cull_distance: bool,
    pub float_controls: bool,
}

impl Features {
    /// Everything supported, at the given SPIR-V version
    pub fn all(spirv_version: SpirvVersion) -> Self {
        Self {
            spirv_version,
            clip_distance: true,
            cull_distance: true,
            float_controls: true,
        }
    }

    pub fn flags(&self) -> FeatureFlags {
        let mut flags = FeatureFlags::empty();
        flags.set(FeatureFlags::CLIP_DISTANCE, self.clip_distance);
        flags.set(FeatureFlags::CULL_DISTANCE, self.cull_distance);
        flags.set(FeatureFlags::FLOAT_CONTROLS, self.float_controls);
        flags
    }
}

impl Default for Features {
    fn default() -> Self {
        Self {
            spirv_version: SpirvVersion::default(),
            clip_distance: false,
            cull_distance: false,
            float_controls: false,
        }
    }
}

/// Debug settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    pub log_level: LogLevel,
    /// Emit OpName for translator-owned variables
    pub emit_debug_names: bool,
    /// Run the structural self-check on every finished module
    pub validate_structure: bool,
}

/// Logging level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum LogLevel {
    Off,
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`
    pub fn as_filter(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            emit_debug_names: true,
            validate_structure: cfg!(debug_assertions),
        }
    }
}

impl TranslatorConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| TranslatorError::Config(e.to_string()))
    }

    /// Load configuration from a file, or the defaults if it doesn't exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No translator config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| TranslatorError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default path to the configuration file
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("xenos-translator")
            .join("translator.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TranslatorConfig::default();
        assert_eq!(config.features.spirv_version, SpirvVersion::V1_0);
        assert!(!config.features.clip_distance);
        assert!(config.features.flags().is_empty());
        assert!(config.debug.emit_debug_names);
    }

    #[test]
    fn test_config_serialization() {
        let mut config = TranslatorConfig::default();
        config.features = Features::all(SpirvVersion::V1_3);
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed = TranslatorConfig::from_toml_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_config() {
        let parsed = TranslatorConfig::from_toml_str(
            "[features]\nspirv_version = \"1.4\"\ncull_distance = true\n",
        )
        .unwrap();
        assert_eq!(parsed.features.spirv_version, SpirvVersion::V1_4);
        assert_eq!(parsed.features.flags(), FeatureFlags::CULL_DISTANCE);
        assert_eq!(parsed.debug, DebugConfig::default());
    }

    #[test]
    fn test_bad_config() {
        let err = TranslatorConfig::from_toml_str("[features]\nspirv_version = 7\n").unwrap_err();
        assert!(matches!(err, TranslatorError::Config(_)));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let path = std::env::temp_dir().join("xt-core-no-such-dir").join("missing.toml");
        let config = TranslatorConfig::load(&path).unwrap();
        assert_eq!(config, TranslatorConfig::default());
    }
}
