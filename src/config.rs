use std::fs;
use std::path::Path;

use serde_derive::{Deserialize, Serialize};

use crate::collision::CollisionConfig;
use crate::error::Error;
use crate::quality::QualityConfig;
use crate::smoother::SmootherConfig;
use crate::speed::SpeedConfig;
use crate::store::DEFAULT_MAX_AGE;
use crate::zones::ZoneConfig;

/// Every knob of one analysis run. Missing sections take their defaults.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Tracker max-age; also the activity window of the trajectory store.
    pub max_age: u64,
    /// Video frame rate, overrides the per-component values.
    pub fps: f32,
    pub smoother: SmootherConfig,
    pub speed: SpeedConfig,
    pub zones: ZoneConfig,
    pub collision: CollisionConfig,
    pub quality: QualityConfig,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            max_age: DEFAULT_MAX_AGE,
            fps: 30.0,
            smoother: SmootherConfig::default(),
            speed: SpeedConfig::default(),
            zones: ZoneConfig::default(),
            collision: CollisionConfig::default(),
            quality: QualityConfig::default(),
        }
    }
}

impl AnalyticsConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let data = fs::read_to_string(path)?;

        Self::from_json(&data)
    }

    pub fn from_json(data: &str) -> Result<Self, Error> {
        let config: AnalyticsConfig = serde_json::from_str(data)?;
        config.validate()?;

        Ok(config)
    }

    /// Copy with the shared `fps` and `max_age` pushed down into every component.
    pub fn resolved(&self) -> Self {
        let mut config = self.clone();
        config.speed.fps = self.fps;
        config.collision.fps = self.fps;
        // a track lost for longer than max-age never comes back under its id
        config.quality.switch_max_gap_frames = self.max_age;

        config
    }

    pub fn validate(&self) -> Result<(), Error> {
        if !(self.fps.is_finite() && self.fps > 0.0) {
            return Err(Error::InvalidConfig(format!("fps must be positive, got {}", self.fps)));
        }

        let resolved = self.resolved();
        resolved.smoother.validate()?;
        resolved.speed.validate()?;
        resolved.zones.validate()?;
        resolved.collision.validate()?;

        Ok(())
    }
}
