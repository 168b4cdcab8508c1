use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Settings file looked up in the working directory when none is given.
pub const DEFAULT_SETTINGS_FILE: &str = "rowforge.toml";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings in {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Csv,
    Debug,
    Jsonl,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerateSettings {
    pub output_format: OutputFormat,
    pub output_dir: PathBuf,
    /// Parent directory for per-run artifacts; no run directory when unset.
    pub run_dir: Option<PathBuf>,
    pub seed: Option<u64>,
}

impl Default for GenerateSettings {
    fn default() -> Self {
        Self {
            output_format: OutputFormat::Debug,
            output_dir: PathBuf::from("out"),
            run_dir: None,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive for stderr logging; `RUST_LOG` wins when set.
    pub filter: String,
    /// Also write JSON logs into the run directory.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "warn".to_string(),
            json: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub generate: GenerateSettings,
    pub logging: LoggingSettings,
}

/// Load settings from `path`, or from `rowforge.toml` when present.
pub fn load_settings(path: Option<&Path>) -> Result<Settings, SettingsError> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => {
            let default = PathBuf::from(DEFAULT_SETTINGS_FILE);
            if !default.exists() {
                return Ok(Settings::default());
            }
            default
        }
    };

    let content = std::fs::read_to_string(&path).map_err(|source| SettingsError::Io {
        path: path.clone(),
        source,
    })?;
    parse_settings(&content).map_err(|source| SettingsError::Toml { path, source })
}

fn parse_settings(content: &str) -> Result<Settings, toml::de::Error> {
    toml::from_str(content)
}
