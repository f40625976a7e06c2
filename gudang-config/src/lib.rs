//! Typed settings for Gudang, loaded from `gudang.toml` plus `GUDANG_`
//! environment overrides.

use std::path::{Path, PathBuf};

use anyhow::Context;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

/// Top-level settings shared by the CLI and embedders.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GudangConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

impl Default for GudangConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Directory holding the SQLite files.
    pub data_dir: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
        }
    }
}

impl DatabaseConfig {
    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("ledger.db")
    }

    pub fn opname_path(&self) -> PathBuf {
        self.data_dir.join("opname.db")
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber` EnvFilter directive, e.g. "info" or
    /// "gudang_ledger=debug,info".
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".into(),
        }
    }
}

impl GudangConfig {
    /// Load settings: `gudang.toml` in the working directory (optional), an
    /// explicit file if given, then `GUDANG_` environment overrides
    /// (`GUDANG_DATABASE__DATA_DIR=...`).
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder =
            Config::builder().add_source(File::with_name("gudang").required(false));
        if let Some(path) = explicit {
            builder = builder.add_source(File::from(path));
        }
        let settings = builder
            .add_source(Environment::with_prefix("GUDANG").separator("__"))
            .build()
            .context("assembling configuration sources")?;
        settings
            .try_deserialize()
            .context("deserializing configuration")
    }

    /// Effective settings rendered back as TOML, for `config show`.
    pub fn render(&self) -> anyhow::Result<String> {
        toml::to_string_pretty(self).context("rendering configuration")
    }
}
