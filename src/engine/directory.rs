//! Session directory and process matching

use crate::backend::AudioSession;

/// Snapshot of the audio sessions seen by one tick
#[derive(Debug, Clone, Default)]
pub struct SessionDirectory {
    sessions: Vec<AudioSession>,
}

impl SessionDirectory {
    pub fn new(sessions: Vec<AudioSession>) -> Self {
        Self { sessions }
    }

    pub fn sessions(&self) -> &[AudioSession] {
        &self.sessions
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Resolve a profile application name to a live session
    ///
    /// Case-insensitive substring match on process and display names. With
    /// several candidates the first active one wins; when none is active, the
    /// loudest one wins (earliest in enumeration order on ties).
    pub fn find(&self, name: &str) -> Option<&AudioSession> {
        let needle = name.to_lowercase();
        let mut matches = self.sessions.iter().filter(|s| s.matches(&needle));

        let first = matches.next()?;
        if first.is_active {
            return Some(first);
        }

        let mut best = first;
        for candidate in matches {
            if candidate.is_active {
                return Some(candidate);
            }
            if candidate.volume > best.volume {
                best = candidate;
            }
        }
        Some(best)
    }
}
