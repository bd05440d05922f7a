//! Bridge configuration
//!
//! Loaded from `hostbridge.toml` (or `.hostbridge.toml`) and overridable
//! through `HOSTBRIDGE_*` environment variables. Hooks are not part of the
//! file; they are set on the [`crate::bridge::BridgeBuilder`].

use crate::error::{BridgeError, BridgeResult};
use hostbridge_runtime::AbiRevision;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// File names searched by [`BridgeConfig::discover`]
pub const CONFIG_FILE_NAMES: &[&str] = &["hostbridge.toml", ".hostbridge.toml"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub finalizer: FinalizerConfig,

    #[serde(default)]
    pub runtime: RuntimeSection,

    /// `__module__` stamped on every produced type
    #[serde(default = "default_module_name")]
    pub module_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizerConfig {
    /// Throttled collections drain once this many requests accumulated
    #[serde(default = "default_threshold")]
    pub threshold: usize,

    /// When false, releases are dropped instead of queued
    #[serde(default = "default_true")]
    pub enable: bool,

    /// Compare queued releases against live reference counts before a drain
    #[serde(default = "default_false")]
    pub refcount_validation: bool,

    /// A violation nobody handled aborts the drain
    #[serde(default = "default_true")]
    pub throw_on_unhandled_refcount: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeSection {
    /// Type-object layout revision of the embedded runtime
    #[serde(default = "default_abi_revision")]
    pub abi_revision: u32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            finalizer: FinalizerConfig::default(),
            runtime: RuntimeSection::default(),
            module_name: default_module_name(),
        }
    }
}

impl Default for FinalizerConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            enable: true,
            refcount_validation: false,
            throw_on_unhandled_refcount: true,
        }
    }
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            abi_revision: default_abi_revision(),
        }
    }
}

fn default_true() -> bool { true }
fn default_false() -> bool { false }
fn default_threshold() -> usize { 200 }
fn default_abi_revision() -> u32 { AbiRevision::default().number() }
fn default_module_name() -> String { String::from("hostbridge") }

impl BridgeConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> BridgeResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| BridgeError::Config(format!("Failed to read config: {}", e)))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse(content: &str) -> BridgeResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| BridgeError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Find and load a configuration file from the current directory or parents
    pub fn discover() -> Self {
        let mut current = std::env::current_dir().ok();

        while let Some(dir) = current {
            for name in CONFIG_FILE_NAMES {
                let config_path = dir.join(name);
                if config_path.exists() {
                    if let Ok(config) = Self::load(&config_path) {
                        return config;
                    }
                }
            }
            current = dir.parent().map(|p| p.to_path_buf());
        }

        Self::default()
    }

    /// Apply `HOSTBRIDGE_*` overrides from the environment
    pub fn from_env(mut self) -> BridgeResult<Self> {
        if let Ok(value) = std::env::var("HOSTBRIDGE_FINALIZER_THRESHOLD") {
            self.finalizer.threshold = value.parse().map_err(|_| {
                BridgeError::Config(format!("HOSTBRIDGE_FINALIZER_THRESHOLD: '{}' is not a count", value))
            })?;
        }
        if let Ok(value) = std::env::var("HOSTBRIDGE_FINALIZER_ENABLE") {
            self.finalizer.enable = parse_flag("HOSTBRIDGE_FINALIZER_ENABLE", &value)?;
        }
        if let Ok(value) = std::env::var("HOSTBRIDGE_REFCOUNT_VALIDATION") {
            self.finalizer.refcount_validation = parse_flag("HOSTBRIDGE_REFCOUNT_VALIDATION", &value)?;
        }
        if let Ok(value) = std::env::var("HOSTBRIDGE_ABI_REVISION") {
            self.runtime.abi_revision = value.parse().map_err(|_| {
                BridgeError::Config(format!("HOSTBRIDGE_ABI_REVISION: '{}' is not a number", value))
            })?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Layout revision as the runtime understands it
    pub fn abi_revision(&self) -> BridgeResult<AbiRevision> {
        AbiRevision::from_number(self.runtime.abi_revision).ok_or_else(|| {
            BridgeError::Config(format!(
                "unsupported runtime ABI revision {}",
                self.runtime.abi_revision
            ))
        })
    }

    fn validate(&self) -> BridgeResult<()> {
        self.abi_revision()?;
        if self.finalizer.threshold == 0 {
            return Err(BridgeError::Config(String::from(
                "finalizer threshold must be at least 1",
            )));
        }
        Ok(())
    }

    /// Default configuration file contents
    pub fn generate_default() -> String {
        let header = "# hostbridge configuration\n\n";
        match toml::to_string_pretty(&Self::default()) {
            Ok(body) => format!("{}{}", header, body),
            Err(_) => String::from(header),
        }
    }
}

fn parse_flag(var: &str, value: &str) -> BridgeResult<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(BridgeError::Config(format!("{}: '{}' is not a flag", var, value))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.finalizer.threshold, 200);
        assert!(config.finalizer.enable);
        assert!(!config.finalizer.refcount_validation);
        assert_eq!(config.abi_revision().unwrap(), AbiRevision::V1);
    }

    #[test]
    fn test_parse_partial() {
        let config = BridgeConfig::parse(
            "[finalizer]\nthreshold = 5\nrefcount_validation = true\n",
        )
        .unwrap();
        assert_eq!(config.finalizer.threshold, 5);
        assert!(config.finalizer.refcount_validation);
        assert!(config.finalizer.throw_on_unhandled_refcount);
        assert_eq!(config.module_name, "hostbridge");
    }

    #[test]
    fn test_parse_rejects_bad_revision() {
        let err = BridgeConfig::parse("[runtime]\nabi_revision = 9\n").unwrap_err();
        assert!(err.to_string().contains("revision 9"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[runtime]\nabi_revision = 1\n[finalizer]\nenable = false").unwrap();
        let config = BridgeConfig::load(file.path()).unwrap();
        assert!(!config.finalizer.enable);
    }

    #[test]
    fn test_generate_default_round_trips() {
        let text = BridgeConfig::generate_default();
        assert!(text.starts_with("# hostbridge configuration"));
        assert_eq!(BridgeConfig::parse(&text).unwrap(), BridgeConfig::default());
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("X", "On").unwrap());
        assert!(!parse_flag("X", "0").unwrap());
        assert!(parse_flag("X", "maybe").is_err());
    }
}
