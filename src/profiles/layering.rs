//! Profile group flattening
//!
//! A group file turns into concrete profiles before the engine sees it:
//! members become targets of their own (inheriting the group's watchers when
//! the group id is itself a target), and every watcher entry naming the group
//! is replaced by one entry per member.

use tracing::trace;

use super::{DeviceVolumes, VolumeProfile, VolumeProfiles};

/// Flatten one group into `profiles`
///
/// After this call no profile is named `group_id` and no profile lists
/// `group_id` as a watcher.
pub fn flatten_group(profiles: &mut VolumeProfiles, group_id: &str, members: &[(String, f32)]) {
    if let Some(template) = profiles.get(group_id).cloned() {
        for (member, volume) in members {
            trace!("Group '{}': adding member profile '{}'", group_id, member);
            profiles.insert(
                member.clone(),
                VolumeProfile {
                    standard: DeviceVolumes::uniform(*volume),
                    watchers: template.watchers.clone(),
                },
            );
        }
    }

    for (target, profile) in profiles.iter_mut() {
        let Some(index) = profile.watcher_index(group_id) else {
            continue;
        };

        trace!("Group '{}': expanding watcher on '{}'", group_id, target);
        let (_, setting) = profile.watchers.remove(index);

        // Members take the group's slot in declaration order
        let mut insert_at = index;
        for (member, _) in members {
            match profile.watcher_index(member) {
                Some(existing) => profile.watchers[existing].1 = setting,
                None => {
                    profile.watchers.insert(insert_at, (member.clone(), setting));
                    insert_at += 1;
                }
            }
        }
    }

    profiles.remove(group_id);
}
