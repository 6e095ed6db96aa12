//! Volume arbitration engine
//!
//! - [`SessionDirectory`]: per-tick session snapshot and process matching
//! - [`resolve_volumes`]: quietest-applicable-watcher resolution per target
//! - [`resolve_microphone_gain`]: the same idea for microphone gain
//! - [`TransitionScheduler`]: deduplicated, stepped volume transitions

mod directory;
mod microphone;
mod resolve;
mod transition;

pub use directory::SessionDirectory;
pub use microphone::resolve_microphone_gain;
pub use resolve::{resolve_volumes, Resolution, HEAR_THROUGH};
pub use transition::{
    TransitionPlan, TransitionRequest, TransitionScheduler, TransitionSettings,
};

impl From<Resolution> for TransitionRequest {
    fn from(resolution: Resolution) -> Self {
        Self {
            target: resolution.target,
            session: resolution.session,
            volume: resolution.volume,
            watcher: resolution.watcher,
        }
    }
}
