//! PulseAudio / PipeWire backend
//!
//! Drives `pactl` (JSON output, pactl >= 16) for sessions and devices, and
//! `playerctl` for the media key. Sink inputs are the audio sessions.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info};

use super::{run_tool, AudioBackend, AudioSession, BackendError, SessionId};

/// pactl volume value for 100%
const PA_VOLUME_NORM: f32 = 65536.0;

/// `pactl -f json list sink-inputs` entry
#[derive(Debug, Deserialize)]
struct SinkInput {
    index: u32,
    #[serde(default)]
    corked: bool,
    #[serde(default)]
    mute: bool,
    #[serde(default)]
    volume: HashMap<String, ChannelVolume>,
    #[serde(default)]
    properties: HashMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ChannelVolume {
    value: u32,
}

/// `pactl -f json list sinks` entry
#[derive(Debug, Deserialize)]
struct Sink {
    name: String,
    #[serde(default)]
    description: String,
}

/// PulseAudio backend using the `pactl` command-line tool
pub struct PulseBackend {
    pactl: String,
    playerctl: String,
    /// Module index of the loopback used for hear-through
    loopback_module: Mutex<Option<u32>>,
}

impl PulseBackend {
    pub fn new(pactl: String, playerctl: String) -> Self {
        Self {
            pactl,
            playerctl,
            loopback_module: Mutex::new(None),
        }
    }

    async fn pactl(&self, args: &[&str]) -> Result<String, BackendError> {
        run_tool(&self.pactl, args).await
    }

    fn raw_volume(volume: f32) -> String {
        ((volume.clamp(0.0, 1.0) * PA_VOLUME_NORM).round() as u32).to_string()
    }
}

/// Parse `pactl -f json list sink-inputs` output into sessions
pub fn parse_sink_inputs(json: &str) -> Result<Vec<AudioSession>, BackendError> {
    let inputs: Vec<SinkInput> = serde_json::from_str(json).map_err(|e| BackendError::Parse {
        what: "pactl sink-inputs",
        message: e.to_string(),
    })?;

    Ok(inputs.into_iter().map(SinkInput::into_session).collect())
}

impl SinkInput {
    fn property(&self, key: &str) -> Option<String> {
        self.properties.get(key).and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    }

    fn average_volume(&self) -> f32 {
        if self.volume.is_empty() {
            return 1.0;
        }
        let total: u64 = self.volume.values().map(|c| c.value as u64).sum();
        total as f32 / self.volume.len() as f32 / PA_VOLUME_NORM
    }

    fn into_session(self) -> AudioSession {
        let display_name = self
            .property("application.name")
            .or_else(|| self.property("media.name"))
            .unwrap_or_else(|| format!("sink-input #{}", self.index));

        AudioSession {
            id: SessionId(self.index.to_string()),
            display_name,
            process_name: self.property("application.process.binary"),
            process_id: self
                .property("application.process.id")
                .and_then(|pid| pid.parse().ok()),
            is_active: !self.corked,
            is_muted: self.mute,
            volume: self.average_volume(),
        }
    }
}

/// Find the human readable description of a sink by name
fn describe_sink(json: &str, name: &str) -> Result<String, BackendError> {
    let sinks: Vec<Sink> = serde_json::from_str(json).map_err(|e| BackendError::Parse {
        what: "pactl sinks",
        message: e.to_string(),
    })?;

    Ok(sinks
        .into_iter()
        .find(|s| s.name == name)
        .map(|s| format!("{} ({})", s.description, s.name))
        .unwrap_or_else(|| name.to_string()))
}

/// Parse `pactl get-sink-mute` output ("Mute: yes")
fn parse_mute(output: &str) -> Result<bool, BackendError> {
    match output.trim().strip_prefix("Mute:").map(str::trim) {
        Some("yes") => Ok(true),
        Some("no") => Ok(false),
        _ => Err(BackendError::Parse {
            what: "pactl mute state",
            message: output.trim().to_string(),
        }),
    }
}

#[async_trait]
impl AudioBackend for PulseBackend {
    fn name(&self) -> &'static str {
        "pulse"
    }

    async fn sessions(&self) -> Result<Vec<AudioSession>, BackendError> {
        let json = self.pactl(&["-f", "json", "list", "sink-inputs"]).await?;
        parse_sink_inputs(&json)
    }

    async fn volume(&self, session: &SessionId) -> Result<f32, BackendError> {
        self.sessions()
            .await?
            .into_iter()
            .find(|s| &s.id == session)
            .map(|s| s.volume)
            .ok_or_else(|| BackendError::SessionNotFound(session.clone()))
    }

    async fn set_volume(&self, session: &SessionId, volume: f32) -> Result<(), BackendError> {
        let raw = Self::raw_volume(volume);
        self.pactl(&["set-sink-input-volume", &session.0, &raw])
            .await
            .map(|_| ())
    }

    async fn default_output_device(&self) -> Result<String, BackendError> {
        let name = self.pactl(&["get-default-sink"]).await?;
        let name = name.trim();
        let sinks = self.pactl(&["-f", "json", "list", "sinks"]).await?;
        describe_sink(&sinks, name)
    }

    async fn toggle_output_mute(&self) -> Result<bool, BackendError> {
        self.pactl(&["set-sink-mute", "@DEFAULT_SINK@", "toggle"])
            .await?;
        let state = self.pactl(&["get-sink-mute", "@DEFAULT_SINK@"]).await?;
        parse_mute(&state)
    }

    async fn play_pause(&self) -> Result<(), BackendError> {
        run_tool(&self.playerctl, &["play-pause"]).await.map(|_| ())
    }

    async fn set_microphone_gain(&self, gain: f32) -> Result<(), BackendError> {
        let raw = Self::raw_volume(gain);
        self.pactl(&["set-source-volume", "@DEFAULT_SOURCE@", &raw])
            .await
            .map(|_| ())
    }

    async fn set_hear_through(
        &self,
        microphone: &str,
        enabled: bool,
    ) -> Result<(), BackendError> {
        let loaded = *self.loopback_module.lock();

        match (enabled, loaded) {
            (true, None) => {
                let source = if microphone.is_empty() {
                    "source=@DEFAULT_SOURCE@".to_string()
                } else {
                    format!("source={}", microphone)
                };
                let output = self
                    .pactl(&["load-module", "module-loopback", &source])
                    .await?;
                let index = output.trim().parse().map_err(|_| BackendError::Parse {
                    what: "pactl module index",
                    message: output.trim().to_string(),
                })?;
                *self.loopback_module.lock() = Some(index);
                info!("Hear-through loopback loaded (module {})", index);
            }
            (false, Some(index)) => {
                self.pactl(&["unload-module", &index.to_string()]).await?;
                *self.loopback_module.lock() = None;
                info!("Hear-through loopback unloaded (module {})", index);
            }
            _ => debug!("Hear-through already {}", if enabled { "on" } else { "off" }),
        }

        Ok(())
    }
}
