pub mod capture;
pub mod error;
pub mod pipeline;
pub mod rig;
pub mod utils;

use std::path::{Path, PathBuf};

use capture::params::AcquisitionConfig;
use capture::sim::SimCamera;
use capture::transport::TransportFilter;
use capture::PixelFormat;
use config::{Environment, File, FileFormat};
use pipeline::persist::NamingConfig;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Prefix for environment overrides, e.g. `MULTICAM__CAPTURE__RING_SLOTS=8`.
pub const ENV_PREFIX: &str = "MULTICAM";

/// System configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub acquisition: AcquisitionConfig,
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub save_dir: PathBuf,
    pub save_images: bool,
    pub naming: NamingConfig,
    /// Ring slots per camera; also the number of frames per trigger cycle.
    pub ring_slots: usize,
    pub reset_counter_on_stop: bool,
    /// Bound of the event queue shared by all cameras.
    pub event_capacity: usize,
    pub transports: TransportFilter,
    /// Serial numbers pinned to camera indices 0, 1, ...
    pub camera_order: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Empty means two Bayer GigE cameras.
    pub cameras: Vec<SimCamera>,
    /// Period of the simulated trigger line.
    pub trigger_interval_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            save_dir: PathBuf::from("./multi_cam_photos"),
            save_images: true,
            naming: NamingConfig::default(),
            ring_slots: 4,
            reset_counter_on_stop: false,
            event_capacity: 64,
            transports: TransportFilter::ALL,
            camera_order: Vec::new(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            cameras: Vec::new(),
            trigger_interval_ms: 1000,
        }
    }
}

impl SimulationConfig {
    // Filled in here so a configured list replaces the default one instead
    // of being layered over it.
    pub fn effective_cameras(&self) -> Vec<SimCamera> {
        if !self.cameras.is_empty() {
            return self.cameras.clone();
        }
        vec![
            SimCamera::new("SIM00001", PixelFormat::BayerRg8),
            SimCamera::new("SIM00002", PixelFormat::BayerRg8),
        ]
    }
}

impl Config {
    /// Build the configuration from defaults, an optional TOML file and
    /// `MULTICAM__SECTION__KEY` environment variables, in that order of
    /// precedence (lowest first), then validate it.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let defaults = config::Config::try_from(&Self::default())?;
        let mut builder = config::Config::builder().add_source(defaults);
        if let Some(path) = path {
            builder =
                builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }
        let config: Self = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let capture = &self.capture;
        if capture.ring_slots == 0 {
            return Err(ConfigError::Invalid(
                "capture.ring_slots must be at least 1".into(),
            ));
        }
        if capture.event_capacity == 0 {
            return Err(ConfigError::Invalid(
                "capture.event_capacity must be at least 1".into(),
            ));
        }

        let naming = &capture.naming;
        if naming.tag.is_empty() || naming.tag.contains('_') {
            return Err(ConfigError::Invalid(format!(
                "capture.naming.tag '{}' must be non-empty and contain no '_'",
                naming.tag
            )));
        }
        if !(1..=6).contains(&naming.subsecond_digits) {
            return Err(ConfigError::Invalid(format!(
                "capture.naming.subsecond_digits must be 1..=6, got {}",
                naming.subsecond_digits
            )));
        }

        if !capture.transports.gige && !capture.transports.usb {
            return Err(ConfigError::Invalid(
                "capture.transports must enable at least one transport".into(),
            ));
        }
        if let Some(n) = self.acquisition.burst_count {
            if n < 1 {
                return Err(ConfigError::Invalid(format!(
                    "acquisition.burst_count must be at least 1, got {n}"
                )));
            }
        }
        if self.simulation.trigger_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "simulation.trigger_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}
