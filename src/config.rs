//! TOML configuration file support.
//!
//! Loads from (in order):
//! 1. An explicit `--config` path
//! 2. `air.toml` next to the executable
//! 3. `$HOME/.config/air/config.toml` (`%LOCALAPPDATA%\AIR\config.toml` on Windows)
//! 4. Environment variable overrides (e.g. `AIR_DB`)
//!
//! CLI arguments always take precedence over config file values.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, ResultExt as _};

// ---------------------------------------------------------------------------
// Config structs (map 1-to-1 with the TOML sections)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AirConfig {
    pub paths: PathsConfig,
    pub logging: LoggingConfig,
    pub operator: OperatorConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// The operational inventory database.
    pub operational_db: PathBuf,
    pub users_db: PathBuf,
    /// Operator-visible directory holding snapshot files.
    pub backups_dir: PathBuf,
    /// Where training sandboxes are created.
    pub training_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Path to a JSON-lines structured log file.  Empty string means no file
    /// logging.
    pub json_log_file: String,
    pub json_stdout: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    /// Recorded as the creator of backups.
    pub name: String,
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            operational_db: PathBuf::from("air_inventory.db"),
            users_db: PathBuf::from("air_users.db"),
            backups_dir: PathBuf::from("AIR_Backups"),
            training_dir: std::env::temp_dir(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_log_file: String::new(),
            json_stdout: false,
        }
    }
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            name: "admin".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl AirConfig {
    /// Try to load from a specific path.  Returns `Ok(default)` if the file
    /// does not exist; returns `Err` if the file exists but is malformed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .ctx_config(&format!("read config file {}", path.display()))?;
        let cfg: AirConfig = toml::from_str(&text).ctx_config("parse config TOML")?;
        Ok(cfg)
    }

    /// Load config using the standard search order, falling back to the
    /// built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(p) = explicit {
            return Self::load_from(p);
        }

        if let Ok(exe) = std::env::current_exe() {
            let candidate = exe.with_file_name("air.toml");
            if candidate.exists() {
                return Self::load_from(&candidate);
            }
        }

        #[cfg(windows)]
        {
            if let Ok(local) = std::env::var("LOCALAPPDATA") {
                let candidate = PathBuf::from(local).join("AIR").join("config.toml");
                if candidate.exists() {
                    return Self::load_from(&candidate);
                }
            }
        }

        #[cfg(not(windows))]
        {
            if let Some(home) = std::env::var_os("HOME") {
                let candidate = PathBuf::from(home)
                    .join(".config")
                    .join("air")
                    .join("config.toml");
                if candidate.exists() {
                    return Self::load_from(&candidate);
                }
            }
        }

        Ok(Self::default())
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(db) = lookup("AIR_DB") {
            self.paths.operational_db = PathBuf::from(db);
        }
        if let Some(dir) = lookup("AIR_BACKUP_DIR") {
            self.paths.backups_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("AIR_TRAINING_DIR") {
            self.paths.training_dir = PathBuf::from(dir);
        }
        if let Some(level) = lookup("AIR_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(name) = lookup("AIR_OPERATOR") {
            self.operator.name = name;
        }
    }

    /// Config rooted in `dir`: every path lives under it.  Used by tests and
    /// the `init` command's `--root`.
    pub fn rooted_at(dir: &Path) -> Self {
        let mut cfg = Self::default();
        cfg.paths.operational_db = dir.join("air_inventory.db");
        cfg.paths.users_db = dir.join("air_users.db");
        cfg.paths.backups_dir = dir.join("AIR_Backups");
        cfg.paths.training_dir = dir.join("training");
        cfg
    }
}
