//! Global settings for audiomanager
//!
//! Handles loading, validating and saving the YAML settings file. The file is
//! re-read on every polling tick and written back after every toggle.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

mod store;

pub use store::{SettingsEdit, SettingsFile};

/// Delay before retrying a failed settings load when none is configured yet
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Root settings structure (`config.yaml`)
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct GlobalSettings {
    /// Master switch; when false no volume is ever written
    pub active: bool,
    /// Number of steps an increasing transition takes
    pub transition_length: u32,
    /// Force every managed application back to 100%
    pub reset_volume_sessions: bool,
    /// Only let playing, unmuted watchers lower a target
    pub check_watched_application_state: bool,
    /// Log every session on every tick
    pub list_active_audio_sessions: bool,
    /// Microphone routed to the output; always reset to false at startup
    pub hear_through: bool,
    /// Capture device used for hear-through
    pub microphone_name: String,
    pub microphone_gain: MicrophoneGainConfig,
    pub capture_card: CaptureCardConfig,
    /// Enabled state per profile group
    pub profiles: BTreeMap<String, bool>,
    /// Substring identifying the speaker output device
    pub speaker_name: String,
    /// Port of the HTTP control surface
    pub port: u16,
    pub notifications: NotificationConfig,
    pub backend: BackendKind,
    pub tools: ToolPaths,
    pub poll_interval_ms: u64,
    pub transition_step_ms: u64,
    pub retry_delay_ms: u64,
}

/// Microphone gain settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct MicrophoneGainConfig {
    /// Gain applied when no microphone profile lowers it; `None` disables gain control
    pub base: Option<f32>,
    /// Subtracted from the resolved gain while hear-through is on
    pub hear_through_offset: f32,
}

/// Capture card session driven to one of two fixed levels
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CaptureCardConfig {
    pub state: bool,
    /// Session name to match; empty disables the feature
    pub session: String,
    pub mode_on: f32,
    pub mode_off: f32,
}

/// URLs posted to when the output device class is detected
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct NotificationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headset: Option<String>,
}

/// External tools used by the command-line backends
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ToolPaths {
    pub pactl: String,
    pub playerctl: String,
    pub sound_volume_view: String,
    pub nircmd: String,
}

/// Audio backend selection
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// SoundVolumeView on Windows, pactl elsewhere
    #[default]
    Auto,
    Pulse,
    SoundVolumeView,
    Memory,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            active: true,
            transition_length: default_transition_length(),
            reset_volume_sessions: false,
            check_watched_application_state: true,
            list_active_audio_sessions: false,
            hear_through: false,
            microphone_name: String::new(),
            microphone_gain: MicrophoneGainConfig::default(),
            capture_card: CaptureCardConfig::default(),
            profiles: BTreeMap::new(),
            speaker_name: String::new(),
            port: default_port(),
            notifications: NotificationConfig::default(),
            backend: BackendKind::Auto,
            tools: ToolPaths::default(),
            poll_interval_ms: 1000,
            transition_step_ms: 50,
            retry_delay_ms: DEFAULT_RETRY_DELAY.as_millis() as u64,
        }
    }
}

impl Default for MicrophoneGainConfig {
    fn default() -> Self {
        Self {
            base: None,
            hear_through_offset: 0.0,
        }
    }
}

impl Default for CaptureCardConfig {
    fn default() -> Self {
        Self {
            state: false,
            session: String::new(),
            mode_on: 1.0,
            mode_off: 0.0,
        }
    }
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            pactl: "pactl".to_string(),
            playerctl: "playerctl".to_string(),
            sound_volume_view: "SoundVolumeView.exe".to_string(),
            nircmd: "nircmdc.exe".to_string(),
        }
    }
}

impl GlobalSettings {
    /// Load settings from file with validation
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let settings: GlobalSettings = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?;

        settings.validate()?;

        Ok(settings)
    }

    /// Save settings to file
    ///
    /// Written to a sibling temp file first and renamed over the target, so
    /// concurrent readers see either the old or the new contents.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;

        let tmp = temp_path(path);
        fs::write(&tmp, yaml)
            .await
            .with_context(|| format!("Failed to write config file: {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .await
            .with_context(|| format!("Failed to replace config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate settings for correctness
    pub fn validate(&self) -> Result<()> {
        if self.transition_length == 0 {
            anyhow::bail!("transition_length must be greater than 0");
        }
        if self.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be greater than 0");
        }

        for (name, value) in [
            ("capture_card.mode_on", self.capture_card.mode_on),
            ("capture_card.mode_off", self.capture_card.mode_off),
        ] {
            if !(0.0..=1.0).contains(&value) {
                anyhow::bail!("{} must be between 0 and 1 (got {})", name, value);
            }
        }

        if let Some(base) = self.microphone_gain.base {
            if !(0.0..=1.0).contains(&base) {
                anyhow::bail!("microphone_gain.base must be between 0 and 1 (got {})", base);
            }
        }

        Ok(())
    }

    /// Whether a profile group is enabled (unknown groups count as enabled)
    pub fn is_group_enabled(&self, group: &str) -> bool {
        self.profiles.get(group).copied().unwrap_or(true)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn transition_step(&self) -> Duration {
        Duration::from_millis(self.transition_step_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

fn default_transition_length() -> u32 {
    6
}

fn default_port() -> u16 {
    5000
}
