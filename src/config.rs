use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::backend::Namespace;

/// Top-level configuration for metaflat.
///
/// Controls which namespaces a read collects and how the CLI prints them.
///
/// # Loading
///
/// ```rust,no_run
/// use metaflat::config::Config;
///
/// // From a JSON file
/// let config = Config::load(Some("config.json".as_ref())).unwrap();
///
/// // Or use defaults and customize
/// let mut config = Config::default();
/// config.read.xmp = false;
/// config.output.json = true;
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// What a read collects.
    pub read: ReadOptions,
    /// How results are printed.
    pub output: OutputConfig,
}

/// Selects the parts of an image a read collects.
///
/// A disabled namespace comes back as an empty sequence; with `dimensions`
/// off, width and height stay 0 and the pixel header is never read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadOptions {
    pub iptc: bool,
    pub exif: bool,
    pub xmp: bool,
    pub dimensions: bool,
}

/// Output behavior of the CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Print a JSON array instead of tables.
    pub json: bool,
    /// Number of payload bytes shown in the table preview column.
    pub preview_bytes: usize,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            iptc: true,
            exif: true,
            xmp: true,
            dimensions: true,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            json: false,
            preview_bytes: 32,
        }
    }
}

impl ReadOptions {
    /// Whether entries of `namespace` are collected.
    pub fn includes(&self, namespace: Namespace) -> bool {
        match namespace {
            Namespace::Iptc => self.iptc,
            Namespace::Exif => self.exif,
            Namespace::Xmp => self.xmp,
        }
    }

    /// Options collecting exactly one namespace, plus dimensions.
    pub fn only(namespace: Namespace) -> Self {
        Self {
            iptc: namespace == Namespace::Iptc,
            exif: namespace == Namespace::Exif,
            xmp: namespace == Namespace::Xmp,
            dimensions: true,
        }
    }
}

impl Config {
    /// Resolve the config file path, next to the executable.
    pub fn config_path() -> Result<PathBuf> {
        let exe_path = std::env::current_exe().context("Failed to get executable path")?;
        let exe_dir = exe_path
            .parent()
            .context("Failed to get executable directory")?;
        Ok(exe_dir.join("config.json"))
    }

    /// Load config from the given path, or from the default location.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        if !config_path.exists() {
            log::warn!(
                "Config file not found at {}. Using defaults.",
                config_path.display()
            );
            return Ok(Self::default());
        }

        let contents =
            std::fs::read_to_string(&config_path).context("Failed to read config file")?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Save config to the given path, or to the default location.
    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_path, contents).context("Failed to write config file")?;
        log::info!("Config saved to {}", config_path.display());
        Ok(())
    }
}
