//! User configuration, loaded once at startup from `~/.tapto/tapto.toml`.
//!
//! Every field has a default so a missing file (or a partial one) yields a
//! usable configuration. The session core only ever reads these values.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, TaptoError};

pub const APP_DIR_NAME: &str = ".tapto";
pub const CONFIG_FILE_NAME: &str = "tapto.toml";
const DISABLE_LAUNCH_FILE_NAME: &str = "disable_launch";
const DEFAULT_POLL_INTERVAL_MS: u64 = 250;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TaptoConfig {
    #[serde(default)]
    pub tapto: TaptoSection,
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub reader: ReaderConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TaptoSection {
    /// Explicit reader device. Empty means auto-detect.
    pub connection_string: String,
    pub probe_device: bool,
    pub exit_game: bool,
    pub exit_game_delay: u64,
    pub exit_game_blocklist: Vec<String>,
    pub disable_sounds: bool,
    pub disable_launcher: bool,
    pub debug: bool,
    pub disable_launch_file: Option<PathBuf>,
    pub mappings_file: Option<PathBuf>,
}

impl Default for TaptoSection {
    fn default() -> Self {
        Self {
            connection_string: String::new(),
            probe_device: true,
            exit_game: false,
            exit_game_delay: 0,
            exit_game_blocklist: Vec::new(),
            disable_sounds: false,
            disable_launcher: false,
            debug: false,
            disable_launch_file: None,
            mappings_file: None,
        }
    }
}

/// External commands backing [`CommandPlatform`](crate::CommandPlatform).
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct PlatformConfig {
    /// Runs with the launch text appended. Must return once the title has
    /// started (hand off to the platform's launcher or background the
    /// emulator); the launch worker waits for it and only then reports the
    /// software as loaded.
    pub launch_command: Vec<String>,
    pub kill_command: Vec<String>,
    pub active_launcher_command: Vec<String>,
    pub sound_command: Vec<String>,
    pub success_sound: Option<PathBuf>,
    pub fail_sound: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    pub detect_paths: Vec<PathBuf>,
    pub poll_interval_ms: u64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            detect_paths: Vec::new(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl ReaderConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl TaptoConfig {
    pub fn connection_string(&self) -> Option<&str> {
        let value = self.tapto.connection_string.trim();
        if value.is_empty() {
            None
        } else {
            Some(value)
        }
    }

    pub fn exit_game_delay(&self) -> Duration {
        Duration::from_secs(self.tapto.exit_game_delay)
    }

    pub fn in_exit_game_blocklist(&self, launcher_name: &str) -> bool {
        self.tapto
            .exit_game_blocklist
            .iter()
            .any(|entry| entry.trim().eq_ignore_ascii_case(launcher_name.trim()))
    }

    pub fn disable_launch_file(&self) -> Result<PathBuf> {
        match &self.tapto.disable_launch_file {
            Some(path) => Ok(path.clone()),
            None => Ok(data_dir()?.join(DISABLE_LAUNCH_FILE_NAME)),
        }
    }
}

pub fn data_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or(TaptoError::HomeDirNotFound)?;
    Ok(home.join(APP_DIR_NAME))
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(data_dir()?.join(CONFIG_FILE_NAME))
}

/// Loads the configuration at `path`, falling back to the default location.
/// A missing file yields defaults; a malformed file is an error.
pub fn load_config(path: Option<&Path>) -> Result<TaptoConfig> {
    let config_path = match path {
        Some(path) => path.to_path_buf(),
        None => default_config_path()?,
    };

    if !config_path.exists() {
        return Ok(TaptoConfig::default());
    }

    let content = fs_err::read_to_string(&config_path).map_err(|source| TaptoError::Io {
        context: format!("reading config {}", config_path.display()),
        source,
    })?;
    toml::from_str::<TaptoConfig>(&content).map_err(|err| TaptoError::ConfigMalformed {
        path: config_path,
        details: err.to_string(),
    })
}
