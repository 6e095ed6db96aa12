//! Microphone gain resolution

use tracing::debug;

use super::directory::SessionDirectory;
use crate::config::GlobalSettings;
use crate::profiles::{clamp_volume, ProfileSet, MICROPHONE_GROUP};

/// Resolve the microphone gain for this tick
///
/// Starts from `microphone_gain.base`; every running microphone application
/// with a lower configured gain lowers it. The hear-through offset is
/// subtracted last. Returns `None` when gain control is disabled.
pub fn resolve_microphone_gain(
    directory: &SessionDirectory,
    profiles: &ProfileSet,
    settings: &GlobalSettings,
) -> Option<f32> {
    let mut gain = settings.microphone_gain.base?;

    if settings.is_group_enabled(MICROPHONE_GROUP) {
        for (application, configured) in &profiles.microphone.entries {
            if directory.find(application).is_none() {
                continue;
            }
            debug!("Mic-application found: {}", application);

            match configured {
                Some(value) if *value < gain => gain = *value,
                _ => {}
            }
        }
    }

    let offset = if settings.hear_through {
        settings.microphone_gain.hear_through_offset
    } else {
        0.0
    };

    Some(clamp_volume(gain - offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{AudioSession, SessionId};
    use crate::profiles::MicrophoneProfile;

    fn directory(names: &[&str]) -> SessionDirectory {
        SessionDirectory::new(
            names
                .iter()
                .map(|name| AudioSession {
                    id: SessionId::from(*name),
                    display_name: name.to_string(),
                    process_name: None,
                    process_id: None,
                    is_active: true,
                    is_muted: false,
                    volume: 1.0,
                })
                .collect(),
        )
    }

    fn profiles(entries: &[(&str, Option<f32>)]) -> ProfileSet {
        ProfileSet {
            microphone: MicrophoneProfile {
                entries: entries.iter().map(|(n, g)| (n.to_string(), *g)).collect(),
            },
            ..Default::default()
        }
    }

    fn settings(base: Option<f32>) -> GlobalSettings {
        let mut settings = GlobalSettings::default();
        settings.microphone_gain.base = base;
        settings.microphone_gain.hear_through_offset = 0.1;
        settings
    }

    #[test]
    fn test_disabled_without_base() {
        let set = profiles(&[("discord", Some(0.3))]);
        assert_eq!(
            resolve_microphone_gain(&directory(&["discord"]), &set, &settings(None)),
            None
        );
    }

    #[test]
    fn test_lowest_running_application_wins() {
        let set = profiles(&[("discord", Some(0.5)), ("zoom", Some(0.3)), ("obs", None)]);
        let dir = directory(&["discord", "obs"]);

        assert_eq!(resolve_microphone_gain(&dir, &set, &settings(Some(0.8))), Some(0.5));
    }

    #[test]
    fn test_null_entry_keeps_base() {
        let set = profiles(&[("obs", None)]);
        assert_eq!(
            resolve_microphone_gain(&directory(&["obs"]), &set, &settings(Some(0.8))),
            Some(0.8)
        );
    }

    #[test]
    fn test_hear_through_offset() {
        let set = profiles(&[]);
        let mut settings = settings(Some(0.8));
        settings.hear_through = true;

        let gain = resolve_microphone_gain(&directory(&[]), &set, &settings).unwrap();
        assert!((gain - 0.7).abs() < 1e-6);

        settings.microphone_gain.base = Some(0.05);
        assert_eq!(resolve_microphone_gain(&directory(&[]), &set, &settings), Some(0.0));
    }

    #[test]
    fn test_microphone_group_switch() {
        let set = profiles(&[("discord", Some(0.2))]);
        let mut settings = settings(Some(0.8));
        settings.profiles.insert(MICROPHONE_GROUP.to_string(), false);

        assert_eq!(
            resolve_microphone_gain(&directory(&["discord"]), &set, &settings),
            Some(0.8)
        );
    }
}
