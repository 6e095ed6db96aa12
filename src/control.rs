//! Settings toggles issued by the tray menu and the HTTP surface
//!
//! Every command loads the settings file, flips one switch and writes the
//! file back; the poller picks the change up on its next reload.

use anyhow::{Context, Result};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::backend::AudioBackend;
use crate::config::{GlobalSettings, SettingsFile};

/// A toggle command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Master switch for all volume changes
    ToggleActive,
    /// Route the microphone to the output
    ToggleHearThrough,
    /// Switch the capture card between its two levels
    ToggleCaptureCard,
    /// Toggle `check_watched_application_state`
    ToggleApplicationCheck,
    /// Toggle `reset_volume_sessions`
    ToggleReset,
    /// Enable or disable a profile group
    ToggleProfile(String),
}

impl FromStr for Command {
    type Err = std::convert::Infallible;

    /// Known setting names map to their command; anything else names a profile group
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "active" => Command::ToggleActive,
            "hear_through" => Command::ToggleHearThrough,
            "capture_card" => Command::ToggleCaptureCard,
            "check_watched_application_state" => Command::ToggleApplicationCheck,
            "reset_volume_sessions" | "reset" => Command::ToggleReset,
            group => Command::ToggleProfile(group.to_string()),
        })
    }
}

/// Applies commands to the settings file
pub struct Controller {
    settings: Arc<SettingsFile>,
    backend: Arc<dyn AudioBackend>,
}

impl Controller {
    pub fn new(settings: Arc<SettingsFile>, backend: Arc<dyn AudioBackend>) -> Self {
        Self { settings, backend }
    }

    /// Apply a command and persist the settings, returning the new value
    pub async fn apply(&self, command: &Command) -> Result<bool> {
        let mut settings = self.settings.edit().await?;

        let (name, value) = match command {
            Command::ToggleActive => {
                settings.active = !settings.active;
                ("active", settings.active)
            }
            Command::ToggleHearThrough => {
                let enabled = !settings.hear_through;
                self.backend
                    .set_hear_through(&settings.microphone_name, enabled)
                    .await
                    .context("Could not toggle hear through")?;
                settings.hear_through = enabled;
                ("hear_through", enabled)
            }
            Command::ToggleCaptureCard => {
                settings.capture_card.state = !settings.capture_card.state;
                ("capture_card", settings.capture_card.state)
            }
            Command::ToggleApplicationCheck => {
                settings.check_watched_application_state =
                    !settings.check_watched_application_state;
                (
                    "check_watched_application_state",
                    settings.check_watched_application_state,
                )
            }
            Command::ToggleReset => {
                settings.reset_volume_sessions = !settings.reset_volume_sessions;
                ("reset_volume_sessions", settings.reset_volume_sessions)
            }
            Command::ToggleProfile(group) => {
                let Some(enabled) = settings.profiles.get_mut(group) else {
                    anyhow::bail!("Unknown setting or profile group '{}'", group);
                };
                *enabled = !*enabled;
                (group.as_str(), *enabled)
            }
        };

        info!("Set {} to: {}", name, value);
        settings.commit().await?;
        Ok(value)
    }

    /// Turn hear-through off on the device and in the settings
    ///
    /// Called at startup so the tool always begins from a known state.
    pub async fn reset_hear_through(&self) -> Result<()> {
        let mut settings = self.settings.edit().await?;

        if let Err(e) = self
            .backend
            .set_hear_through(&settings.microphone_name, false)
            .await
        {
            warn!("Could not turn hear through off: {}", e);
        }

        if settings.hear_through {
            settings.hear_through = false;
            settings.commit().await?;
        }
        Ok(())
    }

    /// Current settings as stored on disk
    pub async fn settings(&self) -> Result<GlobalSettings> {
        self.settings.load().await
    }

    pub fn backend(&self) -> &Arc<dyn AudioBackend> {
        &self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, Arc<MemoryBackend>, Controller) {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yaml");

        let mut settings = GlobalSettings::default();
        settings.profiles.insert("games".to_string(), true);
        settings.save(&path).await.unwrap();

        let backend = Arc::new(MemoryBackend::new());
        let controller = Controller::new(Arc::new(SettingsFile::new(path)), backend.clone());
        (temp_dir, backend, controller)
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!("active".parse::<Command>().unwrap(), Command::ToggleActive);
        assert_eq!("reset".parse::<Command>().unwrap(), Command::ToggleReset);
        assert_eq!(
            "games".parse::<Command>().unwrap(),
            Command::ToggleProfile("games".to_string())
        );
    }

    #[tokio::test]
    async fn test_toggles_are_persisted() {
        let (_dir, _backend, controller) = setup().await;

        assert!(!controller.apply(&Command::ToggleActive).await.unwrap());
        assert!(!controller.apply(&Command::ToggleApplicationCheck).await.unwrap());
        assert!(controller.apply(&Command::ToggleReset).await.unwrap());
        assert!(controller.apply(&Command::ToggleCaptureCard).await.unwrap());

        let settings = controller.settings().await.unwrap();
        assert!(!settings.active);
        assert!(!settings.check_watched_application_state);
        assert!(settings.reset_volume_sessions);
        assert!(settings.capture_card.state);

        assert!(controller.apply(&Command::ToggleActive).await.unwrap());
    }

    #[tokio::test]
    async fn test_toggle_profile_group() {
        let (_dir, _backend, controller) = setup().await;

        let command = Command::ToggleProfile("games".to_string());
        assert!(!controller.apply(&command).await.unwrap());
        assert!(!controller.settings().await.unwrap().is_group_enabled("games"));

        let unknown = Command::ToggleProfile("nope".to_string());
        assert!(controller.apply(&unknown).await.is_err());
    }

    #[tokio::test]
    async fn test_hear_through_drives_backend() {
        let (_dir, backend, controller) = setup().await;

        assert!(controller.apply(&Command::ToggleHearThrough).await.unwrap());
        assert!(backend.hear_through());
        assert!(controller.settings().await.unwrap().hear_through);

        controller.reset_hear_through().await.unwrap();
        assert!(!backend.hear_through());
        assert!(!controller.settings().await.unwrap().hear_through);
    }
}
