//! Volume and microphone profiles
//!
//! Profiles live in a directory of YAML files:
//! - `profiles.yaml`: target application → `standard` volumes plus watchers
//! - `profiles_<group>.yaml`: members of a profile group → volume
//! - `profiles_microphone.yaml`: application → microphone gain (or `null`)
//!
//! Declaration order is significant, so the files are read through
//! `serde_yaml::Mapping` (which keeps insertion order) rather than a `HashMap`.

mod layering;

pub use layering::flatten_group;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::config::GlobalSettings;

/// Base profile file name
pub const BASE_FILE: &str = "profiles.yaml";
/// Microphone profile file name
pub const MICROPHONE_FILE: &str = "profiles_microphone.yaml";
/// Settings key gating the microphone profile
pub const MICROPHONE_GROUP: &str = "microphone";
/// Key holding a profile's baseline volumes
const STANDARD_KEY: &str = "standard";

/// Output device class selecting a profile column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Headset,
    Speaker,
}

impl std::fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceClass::Headset => f.write_str("headset"),
            DeviceClass::Speaker => f.write_str("speaker"),
        }
    }
}

/// One volume per device class
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceVolumes {
    pub headset: f32,
    pub speaker: f32,
}

impl DeviceVolumes {
    pub fn new(headset: f32, speaker: f32) -> Self {
        Self { headset, speaker }
    }

    /// Same volume on both devices
    pub fn uniform(volume: f32) -> Self {
        Self::new(volume, volume)
    }

    pub fn get(&self, device: DeviceClass) -> f32 {
        match device {
            DeviceClass::Headset => self.headset,
            DeviceClass::Speaker => self.speaker,
        }
    }

    fn clamped(self, context: &str) -> Self {
        Self::new(
            clamp_logged(self.headset, context),
            clamp_logged(self.speaker, context),
        )
    }
}

/// Clamp a volume or gain into [0, 1]; NaN becomes 0
pub fn clamp_volume(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn clamp_logged(value: f32, context: &str) -> f32 {
    let clamped = clamp_volume(value);
    if clamped != value {
        warn!("Volume {} for {} is outside 0..1, using {}", value, context, clamped);
    }
    clamped
}

/// Baseline and watcher overrides for one target application
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeProfile {
    pub standard: DeviceVolumes,
    /// Watcher applications in declaration order
    pub watchers: Vec<(String, DeviceVolumes)>,
}

impl VolumeProfile {
    pub fn new(standard: DeviceVolumes) -> Self {
        Self {
            standard,
            watchers: Vec::new(),
        }
    }

    pub fn with_watcher(mut self, name: impl Into<String>, volumes: DeviceVolumes) -> Self {
        self.watchers.push((name.into(), volumes));
        self
    }

    pub fn watcher(&self, name: &str) -> Option<DeviceVolumes> {
        self.watcher_index(name).map(|i| self.watchers[i].1)
    }

    pub(crate) fn watcher_index(&self, name: &str) -> Option<usize> {
        self.watchers.iter().position(|(w, _)| w == name)
    }
}

/// Target profiles in declaration order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VolumeProfiles {
    entries: Vec<(String, VolumeProfile)>,
}

impl VolumeProfiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&VolumeProfile> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, p)| p)
    }

    /// Insert a profile, replacing an existing one in place
    pub fn insert(&mut self, name: impl Into<String>, profile: VolumeProfile) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = profile,
            None => self.entries.push((name, profile)),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<VolumeProfile> {
        let index = self.entries.iter().position(|(n, _)| n == name)?;
        Some(self.entries.remove(index).1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &VolumeProfile)> {
        self.entries.iter().map(|(n, p)| (n.as_str(), p))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut VolumeProfile)> {
        self.entries.iter_mut().map(|(n, p)| (n.as_str(), p))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, VolumeProfile)> for VolumeProfiles {
    fn from_iter<I: IntoIterator<Item = (String, VolumeProfile)>>(iter: I) -> Self {
        let mut profiles = Self::new();
        for (name, profile) in iter {
            profiles.insert(name, profile);
        }
        profiles
    }
}

/// A profile group loaded from `profiles_<id>.yaml`
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileGroup {
    pub id: String,
    pub members: Vec<String>,
}

/// All profile groups of a tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileGroups {
    groups: Vec<ProfileGroup>,
}

impl ProfileGroups {
    pub fn push(&mut self, group: ProfileGroup) {
        self.groups.push(group);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProfileGroup> {
        self.groups.iter()
    }

    /// False when any group containing `watcher` is disabled
    pub fn is_profile_active(&self, watcher: &str, settings: &GlobalSettings) -> bool {
        !self.groups.iter().any(|group| {
            group.members.iter().any(|m| m == watcher) && !settings.is_group_enabled(&group.id)
        })
    }
}

/// Microphone gain per application; `None` only marks the application as present
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MicrophoneProfile {
    pub entries: Vec<(String, Option<f32>)>,
}

/// Effective profiles for one tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileSet {
    pub volumes: VolumeProfiles,
    pub groups: ProfileGroups,
    pub microphone: MicrophoneProfile,
}

impl ProfileSet {
    /// Add missing group switches (enabled) to the settings
    ///
    /// Returns true when the settings changed and should be persisted.
    pub fn register_groups(&self, settings: &mut GlobalSettings) -> bool {
        let mut changed = false;
        let ids = self
            .groups
            .iter()
            .map(|g| g.id.as_str())
            .chain(std::iter::once(MICROPHONE_GROUP));

        for id in ids {
            if !settings.profiles.contains_key(id) {
                debug!("Registering profile group '{}' (enabled)", id);
                settings.profiles.insert(id.to_string(), true);
                changed = true;
            }
        }
        changed
    }
}

/// Loads and layers the profile files of a directory
#[derive(Debug, Clone)]
pub struct ProfileStore {
    dir: PathBuf,
}

impl ProfileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Load all profile files and flatten the groups into concrete profiles
    pub async fn load(&self) -> Result<ProfileSet> {
        let mut volumes = parse_volume_profiles(&read_file(&self.dir.join(BASE_FILE)).await?)
            .with_context(|| format!("Invalid profile file: {}", BASE_FILE))?;

        let mut groups = ProfileGroups::default();
        for (id, path) in self.group_files().await? {
            let members = parse_group(&read_file(&path).await?)
                .with_context(|| format!("Invalid group file: {}", path.display()))?;

            flatten_group(&mut volumes, &id, &members);
            groups.push(ProfileGroup {
                id,
                members: members.into_iter().map(|(name, _)| name).collect(),
            });
        }

        let microphone = parse_microphone(&read_file(&self.dir.join(MICROPHONE_FILE)).await?)
            .with_context(|| format!("Invalid profile file: {}", MICROPHONE_FILE))?;

        debug!(
            "Loaded {} volume profiles, {} groups, {} microphone entries",
            volumes.len(),
            groups.groups.len(),
            microphone.entries.len()
        );

        Ok(ProfileSet {
            volumes,
            groups,
            microphone,
        })
    }

    /// Group files with their ids, sorted by file name
    async fn group_files(&self) -> Result<Vec<(String, PathBuf)>> {
        let mut entries = fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("Failed to read profile directory: {}", self.dir.display()))?;

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if let Some(id) = group_id(&file_name) {
                files.push((id.to_string(), entry.path()));
            }
        }
        files.sort_by(|a, b| a.1.cmp(&b.1));
        Ok(files)
    }
}

/// Group id encoded in a file name (`profiles_games.yaml` → `games`)
pub fn group_id(file_name: &str) -> Option<&str> {
    let id = file_name
        .strip_prefix("profiles_")?
        .strip_suffix(".yaml")?;
    if id.is_empty() || id.contains(MICROPHONE_GROUP) {
        None
    } else {
        Some(id)
    }
}

async fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read profile file: {}", path.display()))
}

fn top_level(text: &str) -> Result<Mapping> {
    let mapping: Option<Mapping> = serde_yaml::from_str(text)?;
    Ok(mapping.unwrap_or_default())
}

fn key_string(key: &Value) -> Result<String> {
    match key {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => anyhow::bail!("Unsupported profile key: {:?}", other),
    }
}

/// Parse the base profile file
pub fn parse_volume_profiles(text: &str) -> Result<VolumeProfiles> {
    let mut profiles = VolumeProfiles::new();

    for (key, value) in top_level(text)? {
        let target = key_string(&key)?;
        let entries: Mapping = serde_yaml::from_value(value)
            .with_context(|| format!("Profile '{}' must be a mapping", target))?;

        let mut standard = None;
        let mut watchers = Vec::new();
        for (key, value) in entries {
            let name = key_string(&key)?;
            let volumes: DeviceVolumes = serde_yaml::from_value(value)
                .with_context(|| format!("Invalid volumes for '{}' in profile '{}'", name, target))?;
            let volumes = volumes.clamped(&format!("{}/{}", target, name));

            if name == STANDARD_KEY {
                standard = Some(volumes);
            } else {
                watchers.push((name, volumes));
            }
        }

        let standard =
            standard.with_context(|| format!("Profile '{}' has no standard volume", target))?;
        profiles.insert(target, VolumeProfile { standard, watchers });
    }

    Ok(profiles)
}

/// Parse a group file (member → volume)
pub fn parse_group(text: &str) -> Result<Vec<(String, f32)>> {
    top_level(text)?
        .into_iter()
        .map(|(key, value)| {
            let name = key_string(&key)?;
            let volume: f32 = serde_yaml::from_value(value)
                .with_context(|| format!("Invalid volume for group member '{}'", name))?;
            let volume = clamp_logged(volume, &name);
            Ok((name, volume))
        })
        .collect()
}

/// Parse the microphone profile file (application → gain or null)
pub fn parse_microphone(text: &str) -> Result<MicrophoneProfile> {
    let entries = top_level(text)?
        .into_iter()
        .map(|(key, value)| {
            let name = key_string(&key)?;
            let gain: Option<f32> = serde_yaml::from_value(value)
                .with_context(|| format!("Invalid microphone gain for '{}'", name))?;
            let gain = gain.map(|g| clamp_logged(g, &name));
            Ok((name, gain))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(MicrophoneProfile { entries })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const BASE: &str = r#"
spotify:
  standard: {headset: 0.8, speaker: 0.6}
  discord: {headset: 0.5, speaker: 0.4}
  communication: {headset: 0.3, speaker: 0.2}
games:
  standard: {headset: 1.0, speaker: 1.0}
  discord: {headset: 0.6, speaker: 0.5}
"#;

    #[test]
    fn test_parse_keeps_declaration_order() {
        let profiles = parse_volume_profiles(BASE).unwrap();
        let names: Vec<&str> = profiles.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["spotify", "games"]);

        let spotify = profiles.get("spotify").unwrap();
        assert_eq!(spotify.standard, DeviceVolumes::new(0.8, 0.6));
        let watchers: Vec<&str> = spotify.watchers.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(watchers, vec!["discord", "communication"]);
    }

    #[test]
    fn test_parse_requires_standard() {
        let err = parse_volume_profiles("vlc:\n  discord: {headset: 0.1, speaker: 0.1}\n")
            .unwrap_err();
        assert!(format!("{:#}", err).contains("no standard volume"));
    }

    #[test]
    fn test_parse_clamps_out_of_range_volumes() {
        let profiles =
            parse_volume_profiles("vlc:\n  standard: {headset: 1.5, speaker: -0.2}\n").unwrap();
        assert_eq!(profiles.get("vlc").unwrap().standard, DeviceVolumes::new(1.0, 0.0));
    }

    #[test]
    fn test_parse_empty_file() {
        assert!(parse_volume_profiles("").unwrap().is_empty());
        assert!(parse_group("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_microphone_null_entries() {
        let mic = parse_microphone("discord: 0.6\nobs64: null\n").unwrap();
        assert_eq!(
            mic.entries,
            vec![("discord".to_string(), Some(0.6)), ("obs64".to_string(), None)]
        );
    }

    #[test]
    fn test_group_id_from_file_name() {
        assert_eq!(group_id("profiles_games.yaml"), Some("games"));
        assert_eq!(group_id("profiles_microphone.yaml"), None);
        assert_eq!(group_id("profiles.yaml"), None);
        assert_eq!(group_id("profiles_games.yml"), None);
    }

    #[test]
    fn test_is_profile_active() {
        let mut groups = ProfileGroups::default();
        groups.push(ProfileGroup {
            id: "communication".to_string(),
            members: vec!["discord".to_string(), "teams".to_string()],
        });

        let mut settings = GlobalSettings::default();
        assert!(groups.is_profile_active("discord", &settings));

        settings.profiles.insert("communication".to_string(), false);
        assert!(!groups.is_profile_active("discord", &settings));
        assert!(groups.is_profile_active("spotify", &settings));
    }

    #[test]
    fn test_register_groups() {
        let mut set = ProfileSet::default();
        set.groups.push(ProfileGroup {
            id: "games".to_string(),
            members: vec![],
        });

        let mut settings = GlobalSettings::default();
        settings.profiles.insert("games".to_string(), false);

        assert!(set.register_groups(&mut settings));
        assert_eq!(settings.profiles.get("games"), Some(&false));
        assert_eq!(settings.profiles.get(MICROPHONE_GROUP), Some(&true));
        assert!(!set.register_groups(&mut settings));
    }

    #[tokio::test]
    async fn test_store_loads_and_flattens() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let dir = temp_dir.path();
        std::fs::write(dir.join(BASE_FILE), BASE)?;
        std::fs::write(dir.join("profiles_games.yaml"), "factorio: 0.4\nhades: 0.7\n")?;
        std::fs::write(dir.join("profiles_communication.yaml"), "discord: 0.2\nteams: 0.2\n")?;
        std::fs::write(dir.join(MICROPHONE_FILE), "discord: 0.5\n")?;

        let set = ProfileStore::new(dir).load().await?;

        assert!(!set.volumes.contains("games"));
        let factorio = set.volumes.get("factorio").unwrap();
        assert_eq!(factorio.standard, DeviceVolumes::uniform(0.4));
        assert_eq!(factorio.watcher("discord"), Some(DeviceVolumes::new(0.6, 0.5)));

        let spotify = set.volumes.get("spotify").unwrap();
        assert_eq!(spotify.watcher("communication"), None);
        assert_eq!(spotify.watcher("teams"), Some(DeviceVolumes::new(0.3, 0.2)));
        // explicit watcher overridden by the group value
        assert_eq!(spotify.watcher("discord"), Some(DeviceVolumes::new(0.3, 0.2)));

        let ids: Vec<&str> = set.groups.iter().map(|g| g.id.as_str()).collect();
        assert_eq!(ids, vec!["communication", "games"]);
        assert_eq!(set.microphone.entries.len(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_store_missing_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        assert!(ProfileStore::new(temp_dir.path()).load().await.is_err());
    }
}
