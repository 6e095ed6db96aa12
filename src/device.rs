//! Output device classification
//!
//! The default output device is a speaker when its name contains the
//! configured `speaker_name`, a headset otherwise. Each resolution also posts
//! to the notification URL configured for that class (e.g. a Home Assistant
//! webhook); notification failures never fail the resolution.

use std::time::Duration;
use tracing::debug;

use crate::backend::AudioBackend;
use crate::config::GlobalSettings;
use crate::profiles::DeviceClass;

/// Timeout for notification requests
const NOTIFY_TIMEOUT: Duration = Duration::from_secs(1);

/// Resolves the current device class
pub struct DeviceResolver {
    client: reqwest::Client,
}

impl DeviceResolver {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(NOTIFY_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// Classify a device name against the configured speaker name
    pub fn classify(device_name: &str, speaker_name: &str) -> DeviceClass {
        if !speaker_name.is_empty()
            && device_name
                .to_lowercase()
                .contains(&speaker_name.to_lowercase())
        {
            DeviceClass::Speaker
        } else {
            DeviceClass::Headset
        }
    }

    /// Resolve the current device class, defaulting to headset on any failure
    pub async fn current_device(
        &self,
        backend: &dyn AudioBackend,
        settings: &GlobalSettings,
    ) -> DeviceClass {
        let device_name = match backend.default_output_device().await {
            Ok(name) => name,
            Err(e) => {
                debug!("Cannot query default output device: {}", e);
                return DeviceClass::Headset;
            }
        };

        let device = Self::classify(&device_name, &settings.speaker_name);
        let url = match device {
            DeviceClass::Speaker => settings.notifications.speaker.as_deref(),
            DeviceClass::Headset => settings.notifications.headset.as_deref(),
        };

        if let Some(url) = url {
            if let Err(e) = self.notify(url).await {
                debug!("Device notification to {} failed: {}", url, e);
                return DeviceClass::Headset;
            }
        }

        device
    }

    async fn notify(&self, url: &str) -> reqwest::Result<()> {
        self.client
            .post(url)
            .send()
            .await?
            .error_for_status()
            .map(|_| ())
    }
}

impl Default for DeviceResolver {
    fn default() -> Self {
        Self::new()
    }
}
