//! Application path management for portable and installed modes.
//!
//! ## Mode Detection
//!
//! - **Dev mode** (debug builds): `config.yaml` in the current working
//!   directory selects that directory.
//! - **Portable mode**: a `.portable` marker file next to the executable keeps
//!   all data files in the same directory.
//! - **Installed mode** (default): data is stored in the platform data
//!   directory (`%APPDATA%\audiomanager`, `~/.local/share/audiomanager`).
//!
//! First runs are seeded with the embedded templates under `assets/`.

use anyhow::Context;
use rust_embed::RustEmbed;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Application name used for directories in installed mode
const APP_NAME: &str = "audiomanager";

/// Default settings and profiles written on first run
#[derive(RustEmbed)]
#[folder = "assets/"]
struct Templates;

/// Application paths for settings, profiles and logs.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Path to the settings file
    pub config: PathBuf,
    /// Directory holding the profile files
    pub profiles_dir: PathBuf,
    /// Path to the logs directory
    pub logs_dir: PathBuf,
    /// Whether running in portable mode (config next to exe)
    pub is_portable: bool,
}

impl AppPaths {
    /// Detect the appropriate paths based on environment.
    ///
    /// Note: This is called before logging is initialized, so we use eprintln
    /// for early diagnostic output.
    pub fn detect() -> Self {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."));

        #[cfg(debug_assertions)]
        {
            let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            if cwd.join("config.yaml").exists() {
                eprintln!(
                    "[paths] Running in DEV mode (config.yaml found in cwd: {})",
                    cwd.display()
                );
                return Self::portable(&cwd);
            }
        }

        if exe_dir.join(".portable").exists() {
            #[cfg(debug_assertions)]
            eprintln!("[paths] Running in PORTABLE mode (.portable marker found)");
            return Self::portable(&exe_dir);
        }

        let app_data = dirs::data_dir()
            .unwrap_or_else(|| {
                eprintln!("[paths] WARNING: dirs::data_dir() returned None, falling back to exe dir");
                exe_dir.clone()
            })
            .join(APP_NAME);

        #[cfg(debug_assertions)]
        eprintln!(
            "[paths] Running in INSTALLED mode (data dir: {})",
            app_data.display()
        );

        Self {
            is_portable: false,
            ..Self::portable(&app_data)
        }
    }

    /// Paths rooted in one directory (used for portable mode and `--config-dir`)
    pub fn portable(dir: &Path) -> Self {
        Self {
            config: dir.join("config.yaml"),
            profiles_dir: dir.join("profiles"),
            logs_dir: dir.join("logs"),
            is_portable: true,
        }
    }

    /// Get the base directory (for displaying in logs)
    pub fn base_dir(&self) -> PathBuf {
        self.config
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Ensure all required directories exist and seed missing files.
    pub fn ensure_directories(&self) -> anyhow::Result<()> {
        for dir in [&self.base_dir(), &self.profiles_dir, &self.logs_dir] {
            if !dir.exists() {
                debug!("Creating directory: {}", dir.display());
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create {}", dir.display()))?;
            }
        }

        self.seed_templates()
    }

    /// Write embedded templates for every missing settings/profile file
    fn seed_templates(&self) -> anyhow::Result<()> {
        for name in Templates::iter() {
            let destination = match name.strip_prefix("profiles/") {
                Some(profile) => self.profiles_dir.join(profile),
                None if name == "config.yaml" => self.config.clone(),
                None => continue,
            };

            if destination.exists() {
                continue;
            }

            let Some(file) = Templates::get(&name) else {
                continue;
            };
            info!("Creating default {}", destination.display());
            std::fs::write(&destination, file.data.as_ref())
                .with_context(|| format!("Failed to write {}", destination.display()))?;
        }
        Ok(())
    }
}
