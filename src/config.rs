// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: TOML configuration for report generation and mount layout.
// Author: Lukas Bower

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable naming a default configuration file.
pub const CONFIG_ENV: &str = "CLOCK_TOPOLOGY_CONFIG";

/// Upper bound accepted for `report.max_clocks`.
pub const MAX_CLOCKS_LIMIT: usize = 1024;

/// Errors produced while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that failed to load.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid TOML for this schema.
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
    /// A value is outside its accepted range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Report generation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReportConfig {
    /// Clock inputs considered per node.
    pub max_clocks: usize,
    /// Resolve and report the current rate of every clock input.
    ///
    /// Off by default: deployed extractors only report parent names, and
    /// that output shape is kept unless rates are explicitly requested.
    pub resolve_frequencies: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            max_clocks: 64,
            resolve_frequencies: false,
        }
    }
}

/// Where the report file is registered in the diagnostic filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MountConfig {
    /// Directory created under the filesystem root.
    pub dir: String,
    /// Report file inside `dir`.
    pub file: String,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            dir: "autojail".to_owned(),
            file: "clocks".to_owned(),
        }
    }
}

/// Measured rate published for one provider output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateEntry {
    /// Absolute path of the provider node.
    pub provider: String,
    /// Output index at the provider.
    #[serde(default)]
    pub index: u32,
    /// Rate in hertz.
    pub hz: u64,
}

/// Top-level configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExtractConfig {
    /// Report settings.
    pub report: ReportConfig,
    /// Mount layout.
    pub mount: MountConfig,
    /// Rate table for providers the host framework cannot compute.
    pub rates: Vec<RateEntry>,
}

impl ExtractConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("loading configuration from {}", path.display());
        Self::from_toml_str(&text)
    }

    /// Load from `path`, else from `$CLOCK_TOPOLOGY_CONFIG`, else defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => match env::var_os(CONFIG_ENV) {
                Some(path) => Self::load(Path::new(&path)),
                None => Ok(Self::default()),
            },
        }
    }

    /// Check value ranges and mount names.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_CLOCKS_LIMIT).contains(&self.report.max_clocks) {
            return Err(ConfigError::Invalid(format!(
                "report.max_clocks must be within 1..={MAX_CLOCKS_LIMIT}, got {}",
                self.report.max_clocks
            )));
        }
        for (key, name) in [("mount.dir", &self.mount.dir), ("mount.file", &self.mount.file)] {
            if name.is_empty() || name.contains('/') {
                return Err(ConfigError::Invalid(format!(
                    "{key} must be a single path component, got '{name}'"
                )));
            }
        }
        Ok(())
    }
}
