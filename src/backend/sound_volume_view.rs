//! Windows backend built on NirSoft's SoundVolumeView and nircmd
//!
//! Sessions are read from `SoundVolumeView /scomma ""` (CSV on stdout) and
//! written with `/SetVolume`. The media key is sent through the Win32 keyboard
//! API; microphone gain goes through `nircmdc setsysvolume`.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{run_tool, AudioBackend, AudioSession, BackendError, SessionId};

/// nircmd volume value for 100%
const NIRCMD_VOLUME_MAX: f32 = 65535.0;

/// One row of SoundVolumeView's CSV export
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SvvRow {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Type")]
    kind: String,
    #[serde(rename = "Direction")]
    direction: String,
    #[serde(rename = "Device Name")]
    device_name: String,
    #[serde(rename = "Default")]
    default: String,
    #[serde(rename = "Device State")]
    state: String,
    #[serde(rename = "Muted")]
    muted: String,
    #[serde(rename = "Volume Percent")]
    volume_percent: String,
    #[serde(rename = "Command-Line Friendly ID")]
    command_line_id: String,
    #[serde(rename = "Process Path")]
    process_path: String,
    #[serde(rename = "Process ID")]
    process_id: String,
}

impl SvvRow {
    fn is_render_application(&self) -> bool {
        self.kind.eq_ignore_ascii_case("Application") && self.direction.eq_ignore_ascii_case("Render")
    }

    fn is_default_render_device(&self) -> bool {
        self.kind.eq_ignore_ascii_case("Device")
            && self.direction.eq_ignore_ascii_case("Render")
            && self.default.eq_ignore_ascii_case("Render")
    }

    fn volume(&self) -> f32 {
        self.volume_percent
            .trim()
            .trim_end_matches('%')
            .parse::<f32>()
            .map(|p| p / 100.0)
            .unwrap_or(1.0)
    }

    fn process_name(&self) -> Option<String> {
        let path = self.process_path.trim();
        if path.is_empty() {
            return None;
        }
        path.rsplit(['\\', '/']).next().map(str::to_string)
    }

    fn into_session(self) -> AudioSession {
        AudioSession {
            process_name: self.process_name(),
            process_id: self.process_id.trim().parse().ok(),
            is_active: self.state.eq_ignore_ascii_case("Active"),
            is_muted: self.muted.eq_ignore_ascii_case("Yes"),
            volume: self.volume(),
            id: SessionId(self.command_line_id),
            display_name: self.name,
        }
    }
}

fn parse_rows(csv_text: &str) -> Result<Vec<SvvRow>, BackendError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(csv_text.as_bytes());

    reader
        .deserialize()
        .collect::<Result<Vec<SvvRow>, _>>()
        .map_err(|e| BackendError::Parse {
            what: "SoundVolumeView CSV",
            message: e.to_string(),
        })
}

/// Parse SoundVolumeView CSV into application render sessions
pub fn parse_sessions(csv_text: &str) -> Result<Vec<AudioSession>, BackendError> {
    Ok(parse_rows(csv_text)?
        .into_iter()
        .filter(SvvRow::is_render_application)
        .map(SvvRow::into_session)
        .collect())
}

/// Backend for Windows using SoundVolumeView and nircmd
pub struct SoundVolumeViewBackend {
    sound_volume_view: String,
    nircmd: String,
}

impl SoundVolumeViewBackend {
    pub fn new(sound_volume_view: String, nircmd: String) -> Self {
        Self {
            sound_volume_view,
            nircmd,
        }
    }

    async fn export(&self) -> Result<Vec<SvvRow>, BackendError> {
        let csv_text = run_tool(&self.sound_volume_view, &["/scomma", ""]).await?;
        parse_rows(&csv_text)
    }

    async fn svv(&self, args: &[&str]) -> Result<(), BackendError> {
        run_tool(&self.sound_volume_view, args).await.map(|_| ())
    }
}

#[async_trait]
impl AudioBackend for SoundVolumeViewBackend {
    fn name(&self) -> &'static str {
        "soundvolumeview"
    }

    async fn sessions(&self) -> Result<Vec<AudioSession>, BackendError> {
        let csv_text = run_tool(&self.sound_volume_view, &["/scomma", ""]).await?;
        parse_sessions(&csv_text)
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
        let percent = format!("{:.1}", volume.clamp(0.0, 1.0) * 100.0);
        self.svv(&["/SetVolume", &session.0, &percent]).await
    }

    async fn default_output_device(&self) -> Result<String, BackendError> {
        self.export()
            .await?
            .into_iter()
            .find(SvvRow::is_default_render_device)
            .map(|row| format!("{} ({})", row.name, row.device_name))
            .ok_or(BackendError::Parse {
                what: "SoundVolumeView CSV",
                message: "no default render device".to_string(),
            })
    }

    async fn toggle_output_mute(&self) -> Result<bool, BackendError> {
        self.svv(&["/Switch", "DefaultRenderDevice"]).await?;
        self.export()
            .await?
            .into_iter()
            .find(SvvRow::is_default_render_device)
            .map(|row| row.muted.eq_ignore_ascii_case("Yes"))
            .ok_or(BackendError::Parse {
                what: "SoundVolumeView CSV",
                message: "no default render device".to_string(),
            })
    }

    async fn play_pause(&self) -> Result<(), BackendError> {
        send_play_pause()
    }

    async fn set_microphone_gain(&self, gain: f32) -> Result<(), BackendError> {
        let raw = ((gain.clamp(0.0, 1.0) * NIRCMD_VOLUME_MAX).round() as u32).to_string();
        debug!("nircmd microphone gain -> {}", raw);
        run_tool(
            &self.nircmd,
            &["loop", "1", "250", "setsysvolume", &raw, "default_record"],
        )
        .await
        .map(|_| ())
    }

    async fn set_hear_through(
        &self,
        microphone: &str,
        enabled: bool,
    ) -> Result<(), BackendError> {
        let flag = if enabled { "1" } else { "0" };
        self.svv(&["/SetListenToThisDevice", microphone, flag]).await
    }
}

#[cfg(windows)]
fn send_play_pause() -> Result<(), BackendError> {
    use windows::Win32::UI::Input::KeyboardAndMouse::{
        keybd_event, KEYBD_EVENT_FLAGS, KEYEVENTF_KEYUP, VK_MEDIA_PLAY_PAUSE,
    };

    let key = VK_MEDIA_PLAY_PAUSE.0 as u8;
    unsafe {
        keybd_event(key, 0, KEYBD_EVENT_FLAGS(0), 0);
        keybd_event(key, 0, KEYEVENTF_KEYUP, 0);
    }
    Ok(())
}

#[cfg(not(windows))]
fn send_play_pause() -> Result<(), BackendError> {
    Err(BackendError::Unsupported {
        operation: "play/pause",
        backend: "soundvolumeview",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXPORT: &str = "\
Name,Type,Direction,Device Name,Default,Device State,Muted,Volume Percent,Command-Line Friendly ID,Process Path,Process ID
Speakers,Device,Render,Realtek Audio,Render,Active,No,80.0%,Realtek Audio\\Device\\Speakers\\Render,,
Spotify,Application,Render,Realtek Audio,,Active,No,45.5%,Realtek Audio\\Device\\Speakers\\Render\\Spotify.exe,C:\\Users\\me\\AppData\\Spotify\\Spotify.exe,9120
Discord,Application,Render,Realtek Audio,,Inactive,Yes,100.0%,Realtek Audio\\Device\\Speakers\\Render\\Discord.exe,C:\\Discord\\Discord.exe,3311
Microphone,Device,Capture,USB Mic,Capture,Active,No,70.0%,USB Mic\\Device\\Microphone\\Capture,,
";

    #[test]
    fn test_parse_sessions_keeps_render_applications() {
        let sessions = parse_sessions(EXPORT).unwrap();
        assert_eq!(sessions.len(), 2);

        assert_eq!(sessions[0].name(), "Spotify.exe");
        assert_eq!(sessions[0].process_id, Some(9120));
        assert!((sessions[0].volume - 0.455).abs() < 1e-6);
        assert!(sessions[0].is_active);

        assert_eq!(sessions[1].display_name, "Discord");
        assert!(!sessions[1].is_active);
        assert!(sessions[1].is_muted);
    }

    #[test]
    fn test_default_render_device_row() {
        let rows = parse_rows(EXPORT).unwrap();
        let device = rows.iter().find(|r| r.is_default_render_device()).unwrap();
        assert_eq!(device.name, "Speakers");
        assert_eq!(device.device_name, "Realtek Audio");
    }
}
