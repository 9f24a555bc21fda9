//! Configuration file and effective settings

#[allow(clippy::module_inception)]
mod config;
mod settings;

pub use config::{Config, DeleteConfig, ResourcesConfig, TimeoutsConfig};
pub use settings::Settings;
