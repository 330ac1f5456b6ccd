//! Configuration loading and management.

use anyhow::Result;
use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = ".taskdesk/config.yaml";

/// Backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub export: ExportConfig,

    #[serde(default)]
    pub deadlines: DeadlineConfig,

    #[serde(default)]
    pub survey: SurveyConfig,

    #[serde(default)]
    pub presence: PresenceConfig,

    #[serde(default)]
    pub calendar: CalendarConfig,
}

/// Storage locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Root directory for uploaded attachment files.
    #[serde(default = "default_media_dir")]
    pub media_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            media_dir: default_media_dir(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".taskdesk/taskdesk.db")
}

fn default_media_dir() -> PathBuf {
    PathBuf::from(".taskdesk/media")
}

/// Research export settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default = "default_export_dir")]
    pub dir: PathBuf,

    #[serde(default = "default_export_interval_hours")]
    pub interval_hours: u64,

    /// Run the batch export as soon as the scheduler starts.
    #[serde(default = "default_true")]
    pub run_on_start: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            dir: default_export_dir(),
            interval_hours: default_export_interval_hours(),
            run_on_start: true,
        }
    }
}

fn default_export_dir() -> PathBuf {
    PathBuf::from("research_exports")
}

fn default_export_interval_hours() -> u64 {
    24
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadlineConfig {
    /// How long before the due date the warning goes out.
    #[serde(default = "default_warning_window_minutes")]
    pub warning_window_minutes: i64,

    /// How often `serve` runs the sweep.
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
}

impl Default for DeadlineConfig {
    fn default() -> Self {
        Self {
            warning_window_minutes: default_warning_window_minutes(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
        }
    }
}

fn default_warning_window_minutes() -> i64 {
    60
}

fn default_sweep_interval_seconds() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurveyConfig {
    /// Minimum reading time per question character; faster answers are suspicious.
    #[serde(default = "default_ms_per_char")]
    pub ms_per_char: i64,
}

impl Default for SurveyConfig {
    fn default() -> Self {
        Self {
            ms_per_char: default_ms_per_char(),
        }
    }
}

fn default_ms_per_char() -> i64 {
    50
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    #[serde(default = "default_idle_timeout_seconds")]
    pub idle_timeout_seconds: i64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            idle_timeout_seconds: default_idle_timeout_seconds(),
        }
    }
}

fn default_idle_timeout_seconds() -> i64 {
    30
}

/// Local calendar used for "today" and period day boundaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarConfig {
    /// Offset of local time from UTC in minutes (Europe/Istanbul is +180).
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: default_utc_offset_minutes(),
        }
    }
}

fn default_utc_offset_minutes() -> i32 {
    180
}

impl Config {
    /// Load configuration from file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from the default location or return defaults
    /// overridden by environment variables.
    pub fn load_or_default() -> Self {
        if let Ok(config) = Self::load(DEFAULT_CONFIG_PATH) {
            return config;
        }

        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Apply `TASKDESK_*` overrides from `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(db_path) = lookup("TASKDESK_DB_PATH") {
            self.server.db_path = PathBuf::from(db_path);
        }

        if let Some(media_dir) = lookup("TASKDESK_MEDIA_DIR") {
            self.server.media_dir = PathBuf::from(media_dir);
        }

        if let Some(dir) = lookup("TASKDESK_EXPORT_DIR") {
            self.export.dir = PathBuf::from(dir);
        }

        if let Some(hours) = lookup("TASKDESK_EXPORT_INTERVAL_HOURS")
            && let Ok(hours) = hours.parse()
        {
            self.export.interval_hours = hours;
        }

        if let Some(secs) = lookup("TASKDESK_SWEEP_INTERVAL_SECONDS")
            && let Ok(secs) = secs.parse()
        {
            self.deadlines.sweep_interval_seconds = secs;
        }

        if let Some(minutes) = lookup("TASKDESK_UTC_OFFSET_MINUTES")
            && let Ok(minutes) = minutes.parse()
        {
            self.calendar.utc_offset_minutes = minutes;
        }
    }

    /// Ensure the database directory exists.
    pub fn ensure_db_dir(&self) -> Result<()> {
        if let Some(parent) = self.server.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    pub fn export_interval(&self) -> Duration {
        Duration::from_secs(self.export.interval_hours.max(1) * 3600)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.deadlines.sweep_interval_seconds.max(1))
    }

    pub fn warning_window_ms(&self) -> i64 {
        self.deadlines.warning_window_minutes * 60_000
    }

    pub fn idle_timeout_ms(&self) -> i64 {
        self.presence.idle_timeout_seconds * 1000
    }

    /// Falls back to UTC when the configured offset is out of range.
    pub fn utc_offset(&self) -> FixedOffset {
        self.calendar
            .utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| Utc.fix())
    }
}
