//! Polling loop
//!
//! Each tick reloads the settings and profiles, snapshots the audio sessions,
//! resolves the device class and microphone gain, and schedules one volume
//! transition per running target application.

use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::backend::AudioBackend;
use crate::config::{GlobalSettings, SettingsFile, DEFAULT_RETRY_DELAY};
use crate::device::DeviceResolver;
use crate::engine::{
    resolve_microphone_gain, resolve_volumes, SessionDirectory, TransitionRequest,
    TransitionScheduler, TransitionSettings,
};
use crate::paths::AppPaths;
use crate::profiles::{DeviceClass, ProfileSet, ProfileStore};

/// Dedup key of the capture card transition
pub const CAPTURE_CARD_TARGET: &str = "capture_card";

/// What one tick did
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub device: Option<DeviceClass>,
    pub microphone_gain: Option<f32>,
    /// Targets for which a new transition was started
    pub scheduled: Vec<String>,
    /// Targets resolved but dropped because a transition was still running
    pub skipped: Vec<String>,
}

/// Drives the tick loop
pub struct Poller {
    backend: Arc<dyn AudioBackend>,
    settings: Arc<SettingsFile>,
    store: ProfileStore,
    device: DeviceResolver,
    scheduler: TransitionScheduler,
    retry_delay: Duration,
}

impl Poller {
    pub fn new(
        paths: &AppPaths,
        settings: Arc<SettingsFile>,
        backend: Arc<dyn AudioBackend>,
    ) -> Self {
        Self {
            scheduler: TransitionScheduler::new(Arc::clone(&backend)),
            backend,
            settings,
            store: ProfileStore::new(&paths.profiles_dir),
            device: DeviceResolver::new(),
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn scheduler(&self) -> &TransitionScheduler {
        &self.scheduler
    }

    /// Load settings and profiles once
    ///
    /// Group switches missing from the settings are added (enabled) and the
    /// settings file is written back.
    pub async fn try_load(&self) -> Result<(GlobalSettings, ProfileSet)> {
        let profiles = self.store.load().await?;

        let mut edit = self.settings.edit().await?;
        let settings = if profiles.register_groups(&mut edit) {
            edit.commit().await?
        } else {
            edit.into_inner()
        };

        Ok((settings, profiles))
    }

    /// Load settings and profiles, retrying until it succeeds
    pub async fn load(&mut self) -> (GlobalSettings, ProfileSet) {
        loop {
            match self.try_load().await {
                Ok((settings, profiles)) => {
                    self.retry_delay = settings.retry_delay();
                    return (settings, profiles);
                }
                Err(e) => {
                    warn!(
                        "Failed to load configuration, retrying in {:?}: {:#}",
                        self.retry_delay, e
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }

    /// Run one tick against a settings/profiles snapshot
    pub async fn tick(&self, settings: &GlobalSettings, profiles: &ProfileSet) -> TickReport {
        let mut report = TickReport::default();

        let directory = match self.backend.sessions().await {
            Ok(sessions) => SessionDirectory::new(sessions),
            Err(e) => {
                warn!("Failed to enumerate audio sessions: {}", e);
                return report;
            }
        };

        if settings.list_active_audio_sessions {
            info!("Active Audio Sessions");
            for session in directory.sessions() {
                info!("{}", session.name());
            }
        }

        let device = self
            .device
            .current_device(self.backend.as_ref(), settings)
            .await;
        report.device = Some(device);

        report.microphone_gain = resolve_microphone_gain(&directory, profiles, settings);
        if let Some(gain) = report.microphone_gain {
            debug!("Setting mic gain to {:.2}", gain);
            if let Err(e) = self.backend.set_microphone_gain(gain).await {
                warn!("Microphone gain could not be set: {}", e);
            }
        }

        let transition_settings = TransitionSettings::from(settings);

        if let Some(request) = capture_card_request(&directory, settings) {
            self.schedule(request, transition_settings, &mut report);
        }

        for resolution in resolve_volumes(&directory, profiles, settings, device) {
            self.schedule(resolution.into(), transition_settings, &mut report);
        }

        report
    }

    fn schedule(
        &self,
        request: TransitionRequest,
        settings: TransitionSettings,
        report: &mut TickReport,
    ) {
        let target = request.target.clone();
        if self.scheduler.schedule(request, settings) {
            report.scheduled.push(target);
        } else {
            report.skipped.push(target);
        }
    }

    /// Run the tick loop until `shutdown` resolves
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        info!("Starting auto volume loop...");

        loop {
            let interval = tokio::select! {
                interval = self.cycle() => interval,
                _ = &mut shutdown => break,
            };

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = &mut shutdown => break,
            }
        }

        self.scheduler.shutdown();
        info!("Auto volume loop stopped");
    }

    /// Load, tick, and return the poll interval to wait
    async fn cycle(&mut self) -> Duration {
        let (settings, profiles) = self.load().await;
        let report = self.tick(&settings, &profiles).await;
        if !report.scheduled.is_empty() {
            debug!("Started transitions: {:?}", report.scheduled);
        }
        settings.poll_interval()
    }
}

/// Transition request driving the capture card to its configured level
fn capture_card_request(
    directory: &SessionDirectory,
    settings: &GlobalSettings,
) -> Option<TransitionRequest> {
    let card = &settings.capture_card;
    if card.session.is_empty() {
        return None;
    }

    let session = directory.find(&card.session)?;
    let volume = if card.state { card.mode_on } else { card.mode_off };

    Some(TransitionRequest {
        target: CAPTURE_CARD_TARGET.to_string(),
        session: session.clone(),
        volume,
        watcher: None,
    })
}
