//! Volume resolution
//!
//! Each target starts at its `standard` volume for the current device. Every
//! applicable watcher may only lower it: the quietest applicable watcher wins.

use tracing::{debug, trace};

use super::directory::SessionDirectory;
use crate::backend::AudioSession;
use crate::config::GlobalSettings;
use crate::profiles::{clamp_volume, DeviceClass, ProfileSet, VolumeProfile};

/// Watcher name that applies while hear-through is on, without a session
pub const HEAR_THROUGH: &str = "hear_through";

/// Resolved target volume for one target application
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub target: String,
    pub session: AudioSession,
    pub volume: f32,
    /// Session of the last evaluated watcher, for logging only
    pub watcher: Option<AudioSession>,
}

/// Resolve the target volume of every target with a live session
pub fn resolve_volumes(
    directory: &SessionDirectory,
    profiles: &ProfileSet,
    settings: &GlobalSettings,
    device: DeviceClass,
) -> Vec<Resolution> {
    profiles
        .volumes
        .iter()
        .filter_map(|(target, profile)| {
            let Some(session) = directory.find(target) else {
                trace!("Skipping {}: not running", target);
                return None;
            };

            let (volume, watcher) =
                resolve_target(target, profile, directory, profiles, settings, device);

            Some(Resolution {
                target: target.to_string(),
                session: session.clone(),
                volume,
                watcher: watcher.cloned(),
            })
        })
        .collect()
}

fn resolve_target<'a>(
    target: &str,
    profile: &VolumeProfile,
    directory: &'a SessionDirectory,
    profiles: &ProfileSet,
    settings: &GlobalSettings,
    device: DeviceClass,
) -> (f32, Option<&'a AudioSession>) {
    let baseline = clamp_volume(profile.standard.get(device));
    let mut volume = baseline;
    let mut last_watcher = None;

    for (watcher, volumes) in &profile.watchers {
        let session = directory.find(watcher);
        last_watcher = session;

        if watcher == HEAR_THROUGH && settings.hear_through {
            // present regardless of a session match
        } else if settings.reset_volume_sessions {
            volume = 1.0;
            break;
        } else if let Some(session) = session {
            if !profiles.groups.is_profile_active(watcher, settings) {
                trace!("Skipping {} for {}: profile group disabled", watcher, target);
                continue;
            }
            if settings.check_watched_application_state && (!session.is_active || session.is_muted)
            {
                trace!("Skipping {} for {}: idle or muted", watcher, target);
                continue;
            }
        } else {
            continue;
        }

        let candidate = clamp_volume(volumes.get(device));
        let zero_tie = candidate == 0.0 && volume == 0.0 && baseline == 0.0;
        if candidate < volume || zero_tie {
            debug!("{} lowered by {} to {:.2}", target, watcher, candidate);
            volume = candidate;
        } else {
            trace!("Skipping {}, {}", target, watcher);
        }
    }

    (volume, last_watcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SessionId;
    use crate::profiles::{DeviceVolumes, ProfileGroup, VolumeProfiles};
    use proptest::prelude::*;

    fn session(name: &str, active: bool, muted: bool) -> AudioSession {
        AudioSession {
            id: SessionId::from(name),
            display_name: name.to_string(),
            process_name: Some(format!("{}.exe", name)),
            process_id: None,
            is_active: active,
            is_muted: muted,
            volume: 1.0,
        }
    }

    fn profile_set(entries: Vec<(&str, VolumeProfile)>) -> ProfileSet {
        ProfileSet {
            volumes: entries
                .into_iter()
                .map(|(n, p)| (n.to_string(), p))
                .collect::<VolumeProfiles>(),
            ..Default::default()
        }
    }

    fn resolve_one(
        set: &ProfileSet,
        dir: &SessionDirectory,
        settings: &GlobalSettings,
        device: DeviceClass,
    ) -> Option<f32> {
        resolve_volumes(dir, set, settings, device)
            .first()
            .map(|r| r.volume)
    }

    #[test]
    fn test_target_without_session_is_skipped() {
        let set = profile_set(vec![("spotify", VolumeProfile::new(DeviceVolumes::uniform(0.8)))]);
        let dir = SessionDirectory::new(vec![session("discord", true, false)]);

        assert!(resolve_volumes(&dir, &set, &GlobalSettings::default(), DeviceClass::Headset)
            .is_empty());
    }

    #[test]
    fn test_baseline_per_device() {
        let set = profile_set(vec![("spotify", VolumeProfile::new(DeviceVolumes::new(0.8, 0.5)))]);
        let dir = SessionDirectory::new(vec![session("spotify", true, false)]);
        let settings = GlobalSettings::default();

        assert_eq!(resolve_one(&set, &dir, &settings, DeviceClass::Headset), Some(0.8));
        assert_eq!(resolve_one(&set, &dir, &settings, DeviceClass::Speaker), Some(0.5));
    }

    #[test]
    fn test_quietest_watcher_wins() {
        let set = profile_set(vec![(
            "spotify",
            VolumeProfile::new(DeviceVolumes::uniform(0.8))
                .with_watcher("discord", DeviceVolumes::uniform(0.5))
                .with_watcher("zoom", DeviceVolumes::uniform(0.3)),
        )]);
        let dir = SessionDirectory::new(vec![
            session("spotify", true, false),
            session("discord", true, false),
            session("zoom", true, false),
        ]);

        assert_eq!(
            resolve_one(&set, &dir, &GlobalSettings::default(), DeviceClass::Headset),
            Some(0.3)
        );
    }

    #[test]
    fn test_watcher_never_raises_volume() {
        let set = profile_set(vec![(
            "spotify",
            VolumeProfile::new(DeviceVolumes::uniform(0.4))
                .with_watcher("discord", DeviceVolumes::uniform(0.9)),
        )]);
        let dir = SessionDirectory::new(vec![
            session("spotify", true, false),
            session("discord", true, false),
        ]);

        assert_eq!(
            resolve_one(&set, &dir, &GlobalSettings::default(), DeviceClass::Headset),
            Some(0.4)
        );
    }

    #[test]
    fn test_idle_or_muted_watchers_are_ignored_when_checking_state() {
        let set = profile_set(vec![(
            "spotify",
            VolumeProfile::new(DeviceVolumes::uniform(0.8))
                .with_watcher("discord", DeviceVolumes::uniform(0.2))
                .with_watcher("zoom", DeviceVolumes::uniform(0.1)),
        )]);
        let dir = SessionDirectory::new(vec![
            session("spotify", true, false),
            session("discord", false, false),
            session("zoom", true, true),
        ]);

        let mut settings = GlobalSettings::default();
        assert_eq!(resolve_one(&set, &dir, &settings, DeviceClass::Headset), Some(0.8));

        settings.check_watched_application_state = false;
        assert_eq!(resolve_one(&set, &dir, &settings, DeviceClass::Headset), Some(0.1));
    }

    #[test]
    fn test_disabled_group_watcher_is_ignored() {
        let mut set = profile_set(vec![(
            "spotify",
            VolumeProfile::new(DeviceVolumes::uniform(0.8))
                .with_watcher("discord", DeviceVolumes::uniform(0.2)),
        )]);
        set.groups.push(ProfileGroup {
            id: "communication".to_string(),
            members: vec!["discord".to_string()],
        });
        let dir = SessionDirectory::new(vec![
            session("spotify", true, false),
            session("discord", true, false),
        ]);

        let mut settings = GlobalSettings::default();
        settings.profiles.insert("communication".to_string(), false);
        assert_eq!(resolve_one(&set, &dir, &settings, DeviceClass::Headset), Some(0.8));

        settings.profiles.insert("communication".to_string(), true);
        assert_eq!(resolve_one(&set, &dir, &settings, DeviceClass::Headset), Some(0.2));
    }

    #[test]
    fn test_reset_forces_full_volume() {
        let set = profile_set(vec![
            (
                "spotify",
                VolumeProfile::new(DeviceVolumes::uniform(0.3))
                    .with_watcher("absent", DeviceVolumes::uniform(0.1)),
            ),
            ("vlc", VolumeProfile::new(DeviceVolumes::uniform(0.2))),
        ]);
        let dir = SessionDirectory::new(vec![
            session("spotify", true, false),
            session("vlc", true, false),
        ]);
        let settings = GlobalSettings {
            reset_volume_sessions: true,
            ..Default::default()
        };

        let resolved = resolve_volumes(&dir, &set, &settings, DeviceClass::Headset);
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].volume, 1.0);
        // without watchers nothing triggers the reset branch
        assert_eq!(resolved[1].volume, 0.2);
    }

    #[test]
    fn test_hear_through_watcher_applies_without_session() {
        let set = profile_set(vec![(
            "spotify",
            VolumeProfile::new(DeviceVolumes::uniform(0.8))
                .with_watcher(HEAR_THROUGH, DeviceVolumes::uniform(0.25)),
        )]);
        let dir = SessionDirectory::new(vec![session("spotify", true, false)]);

        let mut settings = GlobalSettings::default();
        assert_eq!(resolve_one(&set, &dir, &settings, DeviceClass::Headset), Some(0.8));

        settings.hear_through = true;
        assert_eq!(resolve_one(&set, &dir, &settings, DeviceClass::Headset), Some(0.25));
    }

    #[test]
    fn test_zero_tie_keeps_zero() {
        let set = profile_set(vec![(
            "spotify",
            VolumeProfile::new(DeviceVolumes::uniform(0.0))
                .with_watcher("discord", DeviceVolumes::uniform(0.0)),
        )]);
        let dir = SessionDirectory::new(vec![
            session("spotify", true, false),
            session("discord", true, false),
        ]);

        let resolved = resolve_volumes(&dir, &set, &GlobalSettings::default(), DeviceClass::Speaker);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].volume, 0.0);
        assert_eq!(resolved[0].watcher.as_ref().unwrap().display_name, "discord");
    }

    proptest! {
        #[test]
        fn prop_resolution_is_order_independent(
            baseline in 0.0f32..=1.0,
            volumes in proptest::collection::vec(0.0f32..=1.0, 1..6),
        ) {
            let names: Vec<String> = (0..volumes.len()).map(|i| format!("watcher{}", i)).collect();
            let mut sessions = vec![session("target", true, false)];
            sessions.extend(names.iter().map(|n| session(n, true, false)));
            let dir = SessionDirectory::new(sessions);
            let settings = GlobalSettings::default();

            let build = |order: Vec<usize>| {
                let mut profile = VolumeProfile::new(DeviceVolumes::uniform(baseline));
                for i in order {
                    profile = profile.with_watcher(names[i].clone(), DeviceVolumes::uniform(volumes[i]));
                }
                profile_set(vec![("target", profile)])
            };

            let forward: Vec<usize> = (0..volumes.len()).collect();
            let backward: Vec<usize> = forward.iter().rev().copied().collect();

            let expected = volumes.iter().copied().fold(baseline, f32::min);
            let a = resolve_one(&build(forward), &dir, &settings, DeviceClass::Headset).unwrap();
            let b = resolve_one(&build(backward), &dir, &settings, DeviceClass::Headset).unwrap();

            prop_assert_eq!(a, expected);
            prop_assert_eq!(b, expected);
        }
    }
}
