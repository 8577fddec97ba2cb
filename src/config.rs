use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::{AlarmError, Result};

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub timing: Timing,
    #[serde(default)]
    pub keep_alive: KeepAlive,
    #[serde(default)]
    pub background: Background,
    #[serde(default)]
    pub notifications: Notifications,
    #[serde(default)]
    pub assets: Assets,
}

/// Knobs for the trigger scheduler.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Timing {
    /// added to the device clock start so audio does not race the timer side effects
    #[serde(default = "Timing::default_fixed_slop_ms")]
    pub fixed_slop_ms: u64,
    /// volume an alarm with a fade starts at
    #[serde(default = "Timing::default_fade_floor")]
    pub fade_floor: f32,
    #[serde(default = "Timing::default_fade_step_ms")]
    pub fade_step_ms: u64,
    #[serde(default = "Timing::default_vibration_interval_ms")]
    pub vibration_interval_ms: u64,
}

impl Timing {
    const fn default_fixed_slop_ms() -> u64 {
        500
    }

    const fn default_fade_floor() -> f32 {
        0.01
    }

    const fn default_fade_step_ms() -> u64 {
        50
    }

    const fn default_vibration_interval_ms() -> u64 {
        1000
    }

    #[must_use]
    pub const fn fixed_slop(&self) -> Duration {
        Duration::from_millis(self.fixed_slop_ms)
    }

    #[must_use]
    pub fn fade_step(&self) -> Duration {
        Duration::from_millis(self.fade_step_ms.max(1))
    }

    #[must_use]
    pub fn vibration_interval(&self) -> Duration {
        Duration::from_millis(self.vibration_interval_ms.max(1))
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            fixed_slop_ms: Self::default_fixed_slop_ms(),
            fade_floor: Self::default_fade_floor(),
            fade_step_ms: Self::default_fade_step_ms(),
            vibration_interval_ms: Self::default_vibration_interval_ms(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct KeepAlive {
    #[serde(default = "KeepAlive::default_volume")]
    pub volume: f32,
}

impl KeepAlive {
    const fn default_volume() -> f32 {
        0.1
    }
}

impl Default for KeepAlive {
    fn default() -> Self {
        Self {
            volume: Self::default_volume(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Background {
    #[serde(default = "Background::default_task_identifier")]
    pub task_identifier: String,
    /// earliest begin of the next refresh grant, counted from submission
    #[serde(default = "Background::default_interval_secs")]
    pub interval_secs: u64,
}

impl Background {
    fn default_task_identifier() -> String {
        "com.roosty.alarm.fetch".to_string()
    }

    const fn default_interval_secs() -> u64 {
        15 * 60
    }

    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for Background {
    fn default() -> Self {
        Self {
            task_identifier: Self::default_task_identifier(),
            interval_secs: Self::default_interval_secs(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Notifications {
    #[serde(default = "Notifications::default_kill_delay_secs")]
    pub kill_delay_secs: u64,
}

impl Notifications {
    const fn default_kill_delay_secs() -> u64 {
        2
    }

    #[must_use]
    pub const fn kill_delay(&self) -> Duration {
        Duration::from_secs(self.kill_delay_secs)
    }
}

impl Default for Notifications {
    fn default() -> Self {
        Self {
            kill_delay_secs: Self::default_kill_delay_secs(),
        }
    }
}

/// Where audio references resolve to.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Assets {
    /// `assets/...` references are looked up here
    #[serde(default = "Assets::default_bundle_dir")]
    pub bundle_dir: PathBuf,
    /// every other reference is reduced to its file name and looked up here
    #[serde(default = "Assets::default_documents_dir")]
    pub documents_dir: PathBuf,
}

impl Assets {
    fn default_bundle_dir() -> PathBuf {
        Config::data_path().join("bundle")
    }

    fn default_documents_dir() -> PathBuf {
        Config::data_path().join("documents")
    }
}

impl Default for Assets {
    fn default() -> Self {
        Self {
            bundle_dir: Self::default_bundle_dir(),
            documents_dir: Self::default_documents_dir(),
        }
    }
}

impl Config {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: PathBuf) -> Result<Self> {
        let config = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&config)?)
    }

    /// Loads the config at `path`, falling back to the defaults if it is
    /// missing or unreadable.
    #[must_use]
    pub fn load_or_default(path: PathBuf) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("couldn't load config, using defaults: {e}");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: PathBuf) -> Result<()> {
        let config = toml::to_string(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, config)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let mut path = Self::project_dirs()
            .ok_or_else(|| AlarmError::Config("couldn't get config path".to_string()))?
            .config_dir()
            .to_path_buf();
        path.push("config.toml");
        Ok(path)
    }

    #[must_use]
    pub fn data_path() -> PathBuf {
        Self::project_dirs().map_or_else(
            || PathBuf::from(".roosty_alarm"),
            |dirs| dirs.data_dir().to_path_buf(),
        )
    }

    #[must_use]
    pub fn is_config_present() -> bool {
        Self::config_path().is_ok_and(|path| path.exists())
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("", "", "roosty_alarm")
    }
}
