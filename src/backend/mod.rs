//! Audio backends (PulseAudio/PipeWire, Windows, in-memory)
//!
//! The engine and the transition scheduler only ever talk to [`AudioBackend`].
//! Each platform integration implements the trait on top of whatever the OS
//! exposes; the in-memory backend is used by tests and dry runs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{BackendKind, ToolPaths};

pub mod memory;
pub mod pulse;
pub mod sound_volume_view;

pub use memory::MemoryBackend;
pub use pulse::PulseBackend;
pub use sound_volume_view::SoundVolumeViewBackend;

/// Errors reported by an audio backend
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("failed to parse {what}: {message}")]
    Parse { what: &'static str, message: String },

    #[error("audio session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("{operation} is not supported by the {backend} backend")]
    Unsupported {
        operation: &'static str,
        backend: &'static str,
    },
}

/// Opaque, backend-specific handle for one audio session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// One audio session as seen during a single tick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioSession {
    pub id: SessionId,
    pub display_name: String,
    /// Executable name when the backend knows the owning process
    pub process_name: Option<String>,
    pub process_id: Option<u32>,
    /// Whether the session is currently playing audio
    pub is_active: bool,
    pub is_muted: bool,
    /// Current volume in [0, 1]
    pub volume: f32,
}

impl AudioSession {
    /// Name used for matching and logging: process name, else display name
    pub fn name(&self) -> &str {
        self.process_name.as_deref().unwrap_or(&self.display_name)
    }

    /// Case-insensitive substring match against process and display names
    ///
    /// `needle` must already be lowercase.
    pub fn matches(&self, needle: &str) -> bool {
        self.process_name
            .as_deref()
            .is_some_and(|name| name.to_lowercase().contains(needle))
            || self.display_name.to_lowercase().contains(needle)
    }
}

/// Audio capability consumed by the engine
///
/// All methods take `&self` so backends can be shared as `Arc<dyn AudioBackend>`
/// between the poller, transition tasks and the HTTP handlers.
#[async_trait]
pub trait AudioBackend: Send + Sync {
    /// Backend name for logs (e.g. "pulse", "soundvolumeview")
    fn name(&self) -> &'static str;

    /// Enumerate the current audio sessions
    async fn sessions(&self) -> Result<Vec<AudioSession>, BackendError>;

    /// Read the current volume of one session
    async fn volume(&self, session: &SessionId) -> Result<f32, BackendError>;

    /// Set the volume of one session
    async fn set_volume(&self, session: &SessionId, volume: f32) -> Result<(), BackendError>;

    /// Name of the current default output device
    async fn default_output_device(&self) -> Result<String, BackendError>;

    /// Toggle mute on the default output device, returning the new mute state
    async fn toggle_output_mute(&self) -> Result<bool, BackendError>;

    /// Send a media play/pause key event
    async fn play_pause(&self) -> Result<(), BackendError>;

    /// Set the default capture device gain (0..=1)
    async fn set_microphone_gain(&self, gain: f32) -> Result<(), BackendError>;

    /// Route (or stop routing) the named microphone to the output
    async fn set_hear_through(&self, microphone: &str, enabled: bool)
        -> Result<(), BackendError>;
}

/// Build the backend selected in the settings (or on the command line)
pub fn create_backend(kind: BackendKind, tools: &ToolPaths) -> Arc<dyn AudioBackend> {
    let kind = match kind {
        BackendKind::Auto if cfg!(windows) => BackendKind::SoundVolumeView,
        BackendKind::Auto => BackendKind::Pulse,
        other => other,
    };

    let backend: Arc<dyn AudioBackend> = match kind {
        BackendKind::SoundVolumeView => Arc::new(SoundVolumeViewBackend::new(
            tools.sound_volume_view.clone(),
            tools.nircmd.clone(),
        )),
        BackendKind::Memory => Arc::new(MemoryBackend::new()),
        BackendKind::Pulse | BackendKind::Auto => {
            Arc::new(PulseBackend::new(tools.pactl.clone(), tools.playerctl.clone()))
        }
    };

    info!("Using {} audio backend", backend.name());
    backend
}

/// Run an external tool and return its stdout
pub(crate) async fn run_tool(program: &str, args: &[&str]) -> Result<String, BackendError> {
    debug!(program = program, args = ?args, "Running audio tool");

    let output = tokio::process::Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|source| {
            if source.kind() == std::io::ErrorKind::PermissionDenied {
                BackendError::PermissionDenied(format!("{}: {}", program, source))
            } else {
                BackendError::Spawn {
                    program: program.to_string(),
                    source,
                }
            }
        })?;

    if !output.status.success() {
        return Err(BackendError::CommandFailed {
            program: program.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(process: Option<&str>, display: &str) -> AudioSession {
        AudioSession {
            id: SessionId::from("1"),
            display_name: display.to_string(),
            process_name: process.map(str::to_string),
            process_id: None,
            is_active: true,
            is_muted: false,
            volume: 1.0,
        }
    }

    #[test]
    fn test_session_name_prefers_process() {
        assert_eq!(session(Some("spotify.exe"), "Spotify").name(), "spotify.exe");
        assert_eq!(session(None, "System Sounds").name(), "System Sounds");
    }

    #[test]
    fn test_session_matches_either_name() {
        let s = session(Some("Discord.exe"), "Voice Chat");
        assert!(s.matches("discord"));
        assert!(s.matches("voice"));
        assert!(!s.matches("spotify"));
    }

    #[tokio::test]
    async fn test_create_memory_backend() {
        let backend = create_backend(BackendKind::Memory, &ToolPaths::default());
        assert_eq!(backend.name(), "memory");
        assert!(backend.sessions().await.unwrap().is_empty());
    }
}
