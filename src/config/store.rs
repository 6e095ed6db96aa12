//! Shared handle on the settings file
//!
//! The poller and the control surface both rewrite `config.yaml`. Every
//! read-modify-write goes through [`SettingsFile::edit`], which holds one lock
//! from the load to the save so concurrent edits cannot overwrite each other.

use anyhow::Result;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::warn;

use super::GlobalSettings;

pub struct SettingsFile {
    path: PathBuf,
    lock: Mutex<()>,
}

impl SettingsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current settings
    pub async fn load(&self) -> Result<GlobalSettings> {
        GlobalSettings::load(&self.path).await
    }

    /// Read the settings, retrying every `delay` until the file is valid
    pub async fn load_with_retry(&self, delay: Duration) -> GlobalSettings {
        loop {
            match self.load().await {
                Ok(settings) => return settings,
                Err(e) => {
                    warn!("Failed to load settings, retrying in {:?}: {:#}", delay, e);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Load the settings for modification; the file stays locked until the
    /// returned edit is committed or dropped
    pub async fn edit(&self) -> Result<SettingsEdit<'_>> {
        let guard = self.lock.lock().await;
        let settings = self.load().await?;
        Ok(SettingsEdit {
            file: self,
            settings,
            _guard: guard,
        })
    }
}

/// Settings loaded under the file lock
pub struct SettingsEdit<'a> {
    file: &'a SettingsFile,
    settings: GlobalSettings,
    _guard: MutexGuard<'a, ()>,
}

impl SettingsEdit<'_> {
    /// Write the edited settings back and release the lock
    pub async fn commit(self) -> Result<GlobalSettings> {
        self.settings.save(&self.file.path).await?;
        Ok(self.settings)
    }

    /// Release the lock without writing
    pub fn into_inner(self) -> GlobalSettings {
        self.settings
    }
}

impl Deref for SettingsEdit<'_> {
    type Target = GlobalSettings;

    fn deref(&self) -> &GlobalSettings {
        &self.settings
    }
}

impl DerefMut for SettingsEdit<'_> {
    fn deref_mut(&mut self) -> &mut GlobalSettings {
        &mut self.settings
    }
}
