//! DVR configuration
//!
//! Loaded from a JSON file; every field falls back to its default when absent.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dvr::error::{DvrError, Result};
use crate::dvr::models::RecordingCapability;

/// Settings for the DVR subsystem
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DvrConfig {
    /// Recordings starting within this window are launched right away
    pub soon_window_ms: u64,
    /// How long before the next start the wake alarm fires
    pub ms_to_wake_before_start: u64,
    /// Lead time before the start boundary at which recording begins
    pub ms_before_start: u64,
    /// Trailing buffer after the end boundary before recording stops
    pub ms_after_end: u64,
    pub database_path: Option<PathBuf>,
    pub capabilities: Vec<RecordingCapability>,
    pub debug_logging: bool,
    pub log_dir: Option<PathBuf>,
}

impl Default for DvrConfig {
    fn default() -> Self {
        Self {
            soon_window_ms: 5 * 60 * 1000,
            ms_to_wake_before_start: 60 * 1000,
            ms_before_start: 5 * 1000,
            ms_after_end: 5 * 1000,
            database_path: None,
            capabilities: Vec::new(),
            debug_logging: false,
            log_dir: None,
        }
    }
}

impl DvrConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| DvrError::Config(format!("Failed to read {:?}: {}", path, e)))?;
        serde_json::from_str(&text)
            .map_err(|e| DvrError::Config(format!("Failed to parse {:?}: {}", path, e)))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| DvrError::Config(format!("Failed to create {:?}: {}", parent, e)))?;
        }
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| DvrError::Config(e.to_string()))?;
        std::fs::write(path, text)
            .map_err(|e| DvrError::Config(format!("Failed to write {:?}: {}", path, e)))
    }

    /// Database file, defaulting to the platform data directory
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => dirs::data_dir()
                .map(|dir| dir.join("livetv-dvr").join("dvr.db"))
                .ok_or_else(|| DvrError::Config("Failed to get data directory".to_string())),
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            soon_window: Duration::from_millis(self.soon_window_ms),
            wake_before_start: Duration::from_millis(self.ms_to_wake_before_start),
            task: self.task_config(),
        }
    }

    pub fn task_config(&self) -> RecordingTaskConfig {
        RecordingTaskConfig {
            before_start: Duration::from_millis(self.ms_before_start),
            after_end: Duration::from_millis(self.ms_after_end),
        }
    }
}

/// Timing used by the scheduler
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub soon_window: Duration,
    pub wake_before_start: Duration,
    pub task: RecordingTaskConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        DvrConfig::default().scheduler_config()
    }
}

/// Padding applied around each recording window
#[derive(Debug, Clone, Copy)]
pub struct RecordingTaskConfig {
    pub before_start: Duration,
    pub after_end: Duration,
}

impl Default for RecordingTaskConfig {
    fn default() -> Self {
        DvrConfig::default().task_config()
    }
}
