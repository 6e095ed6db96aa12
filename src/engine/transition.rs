//! Transition scheduler - smooth per-session volume changes
//!
//! Each transition runs as its own Tokio task and walks a session's volume to
//! its target in discrete steps. Only one transition per target name may be in
//! flight; a request for a busy target is dropped, and the next tick's
//! recomputation is the only retry.
//!
//! ## Step sizing
//! - step = (target - current) / transition_length
//! - decreasing steps are scaled by transition_length / 2, so lowering a
//!   volume settles faster than raising it
//! - the last write is always the exact target

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::backend::{AudioBackend, AudioSession};
use crate::profiles::clamp_volume;

/// Volumes closer than this are considered equal
const VOLUME_EPSILON: f32 = 1e-4;

/// Sequence of volumes written by one transition
///
/// Steps are produced on demand, so the plan has a fixed size whatever the
/// transition length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitionPlan {
    current: f32,
    target: f32,
    step: f32,
    count: u64,
}

impl TransitionPlan {
    /// Plan a transition, or `None` when `current` already equals `target`
    pub fn new(current: f32, target: f32, transition_length: u32) -> Option<Self> {
        let distance = target - current;
        if distance.abs() < VOLUME_EPSILON {
            return None;
        }

        let length = transition_length.max(1) as f32;
        let mut step = distance / length;
        if step < 0.0 {
            step *= length / 2.0;
        }

        // Counted arithmetically so float drift cannot add a step
        let count = ((distance / step).abs() - VOLUME_EPSILON).ceil().max(1.0) as u64;

        Some(Self {
            current,
            target,
            step,
            count,
        })
    }

    /// Signed volume change per step
    pub fn step(&self) -> f32 {
        self.step
    }

    /// Number of volume writes, the exact target included
    pub fn write_count(&self) -> u64 {
        self.count
    }

    /// Every volume to write, the last one being the exact target
    pub fn steps(&self) -> impl Iterator<Item = f32> {
        let Self {
            current,
            target,
            step,
            count,
        } = *self;

        (1..count)
            .map(move |i| clamp_volume(current + step * i as f32))
            .chain(std::iter::once(target))
    }
}

/// A volume change requested by the poller
#[derive(Debug, Clone)]
pub struct TransitionRequest {
    /// Dedup key (target application name)
    pub target: String,
    pub session: AudioSession,
    pub volume: f32,
    /// Watcher that caused the change, for logging only
    pub watcher: Option<AudioSession>,
}

/// Settings snapshot taken when a transition is scheduled
#[derive(Debug, Clone, Copy)]
pub struct TransitionSettings {
    pub active: bool,
    pub transition_length: u32,
    pub step_interval: Duration,
}

impl From<&crate::config::GlobalSettings> for TransitionSettings {
    fn from(settings: &crate::config::GlobalSettings) -> Self {
        Self {
            active: settings.active,
            transition_length: settings.transition_length,
            step_interval: settings.transition_step(),
        }
    }
}

/// Runs at most one transition per target name
pub struct TransitionScheduler {
    backend: Arc<dyn AudioBackend>,
    /// Key: target name, Value: task driving its transition
    in_flight: DashMap<String, JoinHandle<()>>,
}

impl TransitionScheduler {
    pub fn new(backend: Arc<dyn AudioBackend>) -> Self {
        Self {
            backend,
            in_flight: DashMap::new(),
        }
    }

    /// Start a transition unless one is already running for the same target
    ///
    /// Returns true when a new transition task was spawned. Must be called
    /// from within a Tokio runtime.
    pub fn schedule(&self, request: TransitionRequest, settings: TransitionSettings) -> bool {
        self.reap();

        match self.in_flight.entry(request.target.clone()) {
            Entry::Occupied(_) => {
                trace!("Transition for {} still running, dropping request", request.target);
                false
            }
            Entry::Vacant(slot) => {
                let backend = Arc::clone(&self.backend);
                slot.insert(tokio::spawn(run_transition(backend, request, settings)));
                true
            }
        }
    }

    /// Remove finished transitions from the registry
    pub fn reap(&self) -> usize {
        let before = self.in_flight.len();
        self.in_flight.retain(|_, handle| !handle.is_finished());
        before - self.in_flight.len()
    }

    /// Whether a transition for `target` is still running
    pub fn is_in_flight(&self, target: &str) -> bool {
        self.in_flight
            .get(target)
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight
            .iter()
            .filter(|entry| !entry.value().is_finished())
            .count()
    }

    /// Abort every running transition
    pub fn shutdown(&self) {
        let mut aborted = 0;
        self.in_flight.retain(|_, handle| {
            if !handle.is_finished() {
                handle.abort();
                aborted += 1;
            }
            false
        });
        if aborted > 0 {
            debug!("Aborted {} running transitions", aborted);
        }
    }
}

/// Round to three decimals, as session volumes are reported with jitter
fn round_volume(volume: f32) -> f32 {
    (volume * 1000.0).round() / 1000.0
}

async fn run_transition(
    backend: Arc<dyn AudioBackend>,
    request: TransitionRequest,
    settings: TransitionSettings,
) {
    let session = &request.session;

    let current = match backend.volume(&session.id).await {
        Ok(volume) => round_volume(volume),
        Err(e) => {
            debug!("Cannot read volume of {}: {}", session.name(), e);
            return;
        }
    };

    if !settings.active {
        return;
    }

    let target = clamp_volume(request.volume);
    let Some(plan) = TransitionPlan::new(current, target, settings.transition_length) else {
        return;
    };

    match &request.watcher {
        Some(watcher) => info!(
            "Setting volume for {} to {:.0}% ({}, active: {}, muted: {})",
            session.name(),
            target * 100.0,
            watcher.name(),
            watcher.is_active,
            watcher.is_muted
        ),
        None => info!("Setting volume for {} to {:.0}%", session.name(), target * 100.0),
    }

    for (index, volume) in plan.steps().enumerate() {
        if index > 0 {
            tokio::time::sleep(settings.step_interval).await;
        }
        if let Err(e) = backend.set_volume(&session.id, volume).await {
            debug!("Aborting transition for {}: {}", session.name(), e);
            return;
        }
    }
}
