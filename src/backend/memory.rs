//! In-memory audio backend
//!
//! Holds a mutable list of fake sessions and records every write. Used by the
//! test suite and by `--backend memory` dry runs.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use tracing::debug;

use super::{AudioBackend, AudioSession, BackendError, SessionId};

#[derive(Default)]
struct MemoryState {
    sessions: Vec<AudioSession>,
    output_device: String,
    output_muted: bool,
    volume_writes: Vec<(SessionId, f32)>,
    microphone_gains: Vec<f32>,
    hear_through: bool,
    play_pause_count: usize,
    /// Sessions whose volume reads/writes fail
    failing: HashSet<SessionId>,
}

/// Audio backend backed by plain data
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend pre-populated with sessions
    pub fn with_sessions(sessions: Vec<AudioSession>) -> Self {
        let backend = Self::new();
        backend.state.lock().sessions = sessions;
        backend
    }

    pub fn push_session(&self, session: AudioSession) {
        self.state.lock().sessions.push(session);
    }

    pub fn remove_session(&self, id: &SessionId) {
        self.state.lock().sessions.retain(|s| &s.id != id);
    }

    pub fn set_output_device(&self, name: impl Into<String>) {
        self.state.lock().output_device = name.into();
    }

    /// Make volume reads and writes for a session fail
    pub fn fail_session(&self, id: &SessionId) {
        self.state.lock().failing.insert(id.clone());
    }

    /// Every volume written so far, in order
    pub fn volume_writes(&self) -> Vec<(SessionId, f32)> {
        self.state.lock().volume_writes.clone()
    }

    /// Volumes written to one session, in order
    pub fn writes_for(&self, id: &SessionId) -> Vec<f32> {
        self.state
            .lock()
            .volume_writes
            .iter()
            .filter(|(sid, _)| sid == id)
            .map(|(_, v)| *v)
            .collect()
    }

    pub fn microphone_gains(&self) -> Vec<f32> {
        self.state.lock().microphone_gains.clone()
    }

    pub fn hear_through(&self) -> bool {
        self.state.lock().hear_through
    }

    pub fn output_muted(&self) -> bool {
        self.state.lock().output_muted
    }

    pub fn play_pause_count(&self) -> usize {
        self.state.lock().play_pause_count
    }

    fn session_volume(state: &MemoryState, id: &SessionId) -> Result<f32, BackendError> {
        if state.failing.contains(id) {
            return Err(BackendError::SessionNotFound(id.clone()));
        }
        state
            .sessions
            .iter()
            .find(|s| &s.id == id)
            .map(|s| s.volume)
            .ok_or_else(|| BackendError::SessionNotFound(id.clone()))
    }
}

#[async_trait]
impl AudioBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn sessions(&self) -> Result<Vec<AudioSession>, BackendError> {
        Ok(self.state.lock().sessions.clone())
    }

    async fn volume(&self, session: &SessionId) -> Result<f32, BackendError> {
        Self::session_volume(&self.state.lock(), session)
    }

    async fn set_volume(&self, session: &SessionId, volume: f32) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        Self::session_volume(&state, session)?;

        if let Some(s) = state.sessions.iter_mut().find(|s| &s.id == session) {
            s.volume = volume;
        }
        state.volume_writes.push((session.clone(), volume));
        debug!("memory: {} -> {:.3}", session, volume);
        Ok(())
    }

    async fn default_output_device(&self) -> Result<String, BackendError> {
        Ok(self.state.lock().output_device.clone())
    }

    async fn toggle_output_mute(&self) -> Result<bool, BackendError> {
        let mut state = self.state.lock();
        state.output_muted = !state.output_muted;
        Ok(state.output_muted)
    }

    async fn play_pause(&self) -> Result<(), BackendError> {
        self.state.lock().play_pause_count += 1;
        Ok(())
    }

    async fn set_microphone_gain(&self, gain: f32) -> Result<(), BackendError> {
        self.state.lock().microphone_gains.push(gain);
        Ok(())
    }

    async fn set_hear_through(
        &self,
        _microphone: &str,
        enabled: bool,
    ) -> Result<(), BackendError> {
        self.state.lock().hear_through = enabled;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: &str, volume: f32) -> AudioSession {
        AudioSession {
            id: SessionId::from(id),
            display_name: id.to_string(),
            process_name: None,
            process_id: None,
            is_active: true,
            is_muted: false,
            volume,
        }
    }

    #[tokio::test]
    async fn test_set_volume_is_recorded() {
        let backend = MemoryBackend::with_sessions(vec![session("a", 0.5)]);
        let id = SessionId::from("a");

        backend.set_volume(&id, 0.25).await.unwrap();

        assert_eq!(backend.volume(&id).await.unwrap(), 0.25);
        assert_eq!(backend.writes_for(&id), vec![0.25]);
    }

    #[tokio::test]
    async fn test_missing_and_failing_sessions() {
        let backend = MemoryBackend::with_sessions(vec![session("a", 0.5)]);

        assert!(backend.volume(&SessionId::from("b")).await.is_err());

        backend.fail_session(&SessionId::from("a"));
        assert!(backend.set_volume(&SessionId::from("a"), 0.1).await.is_err());
        assert!(backend.volume_writes().is_empty());
    }

    #[tokio::test]
    async fn test_toggle_output_mute() {
        let backend = MemoryBackend::new();
        assert!(backend.toggle_output_mute().await.unwrap());
        assert!(!backend.toggle_output_mute().await.unwrap());
    }
}
