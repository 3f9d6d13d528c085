use rayon::prelude::*;
use serde_derive::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::calibration::Calibration;
use crate::error::Error;
use crate::observation::SmoothedObservation;
use crate::smoother::SmoothedTrajectories;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpeedUnit {
    #[serde(alias = "m/s")]
    Mps,
    #[default]
    #[serde(alias = "km/h")]
    Kmh,
    Mph,
}

impl SpeedUnit {
    #[inline]
    pub fn convert(self, mps: f32) -> f32 {
        match self {
            SpeedUnit::Mps => mps,
            SpeedUnit::Kmh => mps * 3.6,
            SpeedUnit::Mph => mps * 2.236_936_3,
        }
    }

    #[inline]
    pub fn to_mps(self, value: f32) -> f32 {
        match self {
            SpeedUnit::Mps => value,
            SpeedUnit::Kmh => value / 3.6,
            SpeedUnit::Mph => value / 2.236_936_3,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SpeedConfig {
    /// Maximum span in frames between the endpoints of the windowed estimate.
    pub window_frames: u64,
    pub fps: f32,
    /// Unit speeds are reported in at the output boundary.
    pub units: SpeedUnit,
    /// Estimates above this cap are clamped, in m/s.
    pub max_speed_mps: Option<f32>,
}

impl Default for SpeedConfig {
    fn default() -> Self {
        Self {
            window_frames: 5,
            fps: 30.0,
            units: SpeedUnit::Kmh,
            max_speed_mps: Some(SpeedUnit::Kmh.to_mps(300.0)),
        }
    }
}

impl SpeedConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.window_frames == 0 {
            return Err(Error::InvalidConfig("speed window must be at least 1 frame".into()));
        }

        if !(self.fps.is_finite() && self.fps > 0.0) {
            return Err(Error::InvalidConfig(format!("fps must be positive, got {}", self.fps)));
        }

        if matches!(self.max_speed_mps, Some(cap) if !(cap > 0.0)) {
            return Err(Error::InvalidConfig("speed cap must be positive".into()));
        }

        Ok(())
    }
}

/// Speeds at one observed frame, in m/s; `None` means unknown, never zero.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct SpeedSample {
    pub frame: u64,
    pub instantaneous_mps: Option<f32>,
    pub windowed_mps: Option<f32>,
}

impl SpeedSample {
    #[inline]
    pub fn windowed_in(&self, unit: SpeedUnit) -> Option<f32> {
        self.windowed_mps.map(|v| unit.convert(v))
    }
}

/// Summary of the known windowed speeds of a track, in m/s unless converted.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct SpeedStats {
    pub count: usize,
    pub mean: f32,
    pub max: f32,
    pub min: f32,
}

impl SpeedStats {
    pub fn converted(&self, unit: SpeedUnit) -> SpeedStats {
        SpeedStats {
            count: self.count,
            mean: unit.convert(self.mean),
            max: unit.convert(self.max),
            min: unit.convert(self.min),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SpeedSeries {
    pub track_id: u32,
    pub samples: Vec<SpeedSample>,
}

impl SpeedSeries {
    /// `(frame, windowed speed)` pairs converted to `unit`.
    pub fn converted(&self, unit: SpeedUnit) -> Vec<(u64, Option<f32>)> {
        self.samples
            .iter()
            .map(|s| (s.frame, s.windowed_in(unit)))
            .collect()
    }

    /// Statistics over the known windowed speeds, `None` if there are none.
    pub fn stats(&self) -> Option<SpeedStats> {
        let known: Vec<f32> = self.samples.iter().filter_map(|s| s.windowed_mps).collect();

        if known.is_empty() {
            return None;
        }

        let sum: f32 = known.iter().sum();

        Some(SpeedStats {
            count: known.len(),
            mean: sum / known.len() as f32,
            max: known.iter().copied().fold(f32::MIN, f32::max),
            min: known.iter().copied().fold(f32::MAX, f32::min),
        })
    }
}

fn displacement_speed(
    calibration: &Calibration,
    from: &SmoothedObservation,
    to: &SmoothedObservation,
    config: &SpeedConfig,
) -> Option<f32> {
    let frames = to.frame.checked_sub(from.frame).filter(|f| *f > 0)?;
    let meters = calibration.world_distance(from.bbox.ground_contact(), to.bbox.ground_contact())?;
    let speed = meters / (frames as f32 / config.fps);

    match config.max_speed_mps {
        Some(cap) if speed > cap => {
            debug!(
                track_id = to.track_id,
                frame = to.frame,
                speed,
                "speed clamped to cap"
            );
            Some(cap)
        }
        _ => Some(speed),
    }
}

/// Speed series of one smoothed track; one sample per observation.
pub fn track_speeds(
    series: &[SmoothedObservation],
    calibration: &Calibration,
    config: &SpeedConfig,
) -> Vec<SpeedSample> {
    let mut samples = Vec::with_capacity(series.len());

    for (i, curr) in series.iter().enumerate() {
        let instantaneous_mps = i
            .checked_sub(1)
            .map(|j| &series[j])
            .filter(|prev| curr.frame - prev.frame <= config.window_frames)
            .and_then(|prev| displacement_speed(calibration, prev, curr, config));

        // earliest observation still inside the window
        let start = series[..i].partition_point(|o| curr.frame - o.frame > config.window_frames);
        let windowed_mps = if start < i {
            displacement_speed(calibration, &series[start], curr, config)
        } else {
            None
        };

        samples.push(SpeedSample {
            frame: curr.frame,
            instantaneous_mps,
            windowed_mps,
        });
    }

    samples
}

pub fn estimate_speeds(
    trajectories: &SmoothedTrajectories,
    calibration: &Calibration,
    config: &SpeedConfig,
) -> Result<Vec<SpeedSeries>, Error> {
    config.validate()?;

    let tracks: Vec<_> = trajectories.iter().collect();
    let out: Vec<SpeedSeries> = tracks
        .into_par_iter()
        .map(|(track_id, series)| SpeedSeries {
            track_id,
            samples: track_speeds(series, calibration, config),
        })
        .collect();

    info!(
        tracks = out.len(),
        known = out
            .iter()
            .flat_map(|s| s.samples.iter())
            .filter(|s| s.windowed_mps.is_some())
            .count(),
        "speed estimation done"
    );

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbox::BBox;
    use approx::assert_relative_eq;
    use nalgebra as na;

    fn at(frame: u64, y: f32) -> SmoothedObservation {
        SmoothedObservation {
            track_id: 1,
            frame,
            timestamp: frame as f32 / 10.0,
            bbox: BBox::ltrb(0.0, y - 20.0, 10.0, y),
        }
    }

    fn one_meter_per_10px() -> Calibration {
        Calibration::from_two_points(na::Point2::new(0.0, 0.0), na::Point2::new(0.0, 10.0), 1.0)
            .unwrap()
    }

    fn config() -> SpeedConfig {
        SpeedConfig {
            window_frames: 4,
            fps: 10.0,
            units: SpeedUnit::Mps,
            max_speed_mps: None,
        }
    }

    #[test]
    fn constant_motion_speed() {
        // 10 px per frame = 1 m per 0.1 s
        let series: Vec<_> = (0..6).map(|f| at(f, 100.0 + 10.0 * f as f32)).collect();
        let samples = track_speeds(&series, &one_meter_per_10px(), &config());

        assert!(samples[0].instantaneous_mps.is_none());
        assert!(samples[0].windowed_mps.is_none());

        for s in &samples[1..] {
            assert_relative_eq!(s.instantaneous_mps.unwrap(), 10.0, epsilon = 1e-3);
            assert_relative_eq!(s.windowed_mps.unwrap(), 10.0, epsilon = 1e-3);
        }
    }

    #[test]
    fn window_uses_endpoints() {
        let series = vec![at(0, 0.0), at(1, 30.0), at(2, 20.0)];
        let samples = track_speeds(&series, &one_meter_per_10px(), &config());

        // 2 m over 0.2 s, ignoring the 3 m jitter in between
        assert_relative_eq!(samples[2].windowed_mps.unwrap(), 10.0, epsilon = 1e-3);
        assert_relative_eq!(samples[2].instantaneous_mps.unwrap(), 10.0, epsilon = 1e-3);
        assert_relative_eq!(samples[1].instantaneous_mps.unwrap(), 30.0, epsilon = 1e-3);
    }

    #[test]
    fn gap_larger_than_window_is_unknown() {
        let series = vec![at(0, 0.0), at(10, 50.0), at(11, 60.0)];
        let samples = track_speeds(&series, &one_meter_per_10px(), &config());

        assert!(samples[1].windowed_mps.is_none());
        assert!(samples[1].instantaneous_mps.is_none());
        assert!(samples[2].windowed_mps.is_some());
    }

    #[test]
    fn point_on_horizon_is_unknown() {
        // the row y = 100 maps to infinity
        let calib = Calibration::Homography {
            matrix: na::Matrix3::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.5, -50.0),
        };
        let series = vec![at(0, 80.0), at(1, 100.0), at(2, 120.0)];
        let samples = track_speeds(&series, &calib, &config());

        assert!(calib.pixel_to_world(na::Point2::new(5.0, 100.0)).is_none());
        assert!(samples[1].instantaneous_mps.is_none());
        assert!(samples[1].windowed_mps.is_none());
        assert!(samples[2].instantaneous_mps.is_none());
        assert!(samples[2].windowed_mps.is_some());
    }

    #[test]
    fn stationary_is_zero_not_unknown() {
        let series = vec![at(0, 50.0), at(1, 50.0)];
        let samples = track_speeds(&series, &one_meter_per_10px(), &config());

        assert_eq!(samples[1].windowed_mps, Some(0.0));
    }

    #[test]
    fn cap_and_unit_conversion() {
        let cfg = SpeedConfig {
            max_speed_mps: Some(5.0),
            ..config()
        };
        let series = vec![at(0, 0.0), at(1, 10.0)];
        let samples = track_speeds(&series, &one_meter_per_10px(), &cfg);

        assert_relative_eq!(samples[1].windowed_mps.unwrap(), 5.0);
        assert_relative_eq!(samples[1].windowed_in(SpeedUnit::Kmh).unwrap(), 18.0, epsilon = 1e-4);
        assert_relative_eq!(SpeedUnit::Mph.to_mps(SpeedUnit::Mph.convert(7.0)), 7.0, epsilon = 1e-5);
    }

    #[test]
    fn stats_over_known_speeds() {
        let series = SpeedSeries {
            track_id: 4,
            samples: vec![
                SpeedSample {
                    frame: 0,
                    instantaneous_mps: None,
                    windowed_mps: None,
                },
                SpeedSample {
                    frame: 1,
                    instantaneous_mps: Some(2.0),
                    windowed_mps: Some(2.0),
                },
                SpeedSample {
                    frame: 2,
                    instantaneous_mps: Some(4.0),
                    windowed_mps: Some(4.0),
                },
            ],
        };
        let stats = series.stats().unwrap();

        assert_eq!(stats.count, 2);
        assert_relative_eq!(stats.mean, 3.0);
        assert_relative_eq!(stats.max, 4.0);
        assert_relative_eq!(stats.min, 2.0);
        assert_relative_eq!(stats.converted(SpeedUnit::Kmh).max, 14.4, epsilon = 1e-4);
        assert_eq!(series.converted(SpeedUnit::Mps)[0], (0, None));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let cfg = SpeedConfig {
            fps: 0.0,
            ..config()
        };

        assert!(estimate_speeds(&SmoothedTrajectories::default(), &one_meter_per_10px(), &cfg).is_err());
    }
}
