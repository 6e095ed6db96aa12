//! audiomanager - profile-driven per-application volume control
//!
//! Lowers or raises application volumes depending on which other
//! applications are currently playing audio, following YAML profiles.

pub mod api;
pub mod backend;
pub mod config;
pub mod control;
pub mod device;
pub mod engine;
pub mod paths;
pub mod poller;
pub mod profiles;
