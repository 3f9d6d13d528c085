use std::collections::BTreeMap;

use rayon::prelude::*;
use serde_derive::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Error;
use crate::observation::{Observation, SmoothedObservation};
use crate::store::{frame_gap, Session};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SmootherConfig {
    /// Weight of the newest raw box, in `(0, 1]`. Larger is less smoothing.
    pub alpha: f32,
    /// Missing frames tolerated before the average restarts from the raw box.
    pub max_gap_frames: u64,
    pub adaptive: Option<AdaptiveAlpha>,
}

impl Default for SmootherConfig {
    fn default() -> Self {
        Self {
            alpha: 0.7,
            max_gap_frames: 10,
            adaptive: None,
        }
    }
}

/// Raises alpha with box motion so fast objects are not dragged behind.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AdaptiveAlpha {
    pub min_alpha: f32,
    pub max_alpha: f32,
    pub motion_threshold_px: f32,
}

impl Default for AdaptiveAlpha {
    fn default() -> Self {
        Self {
            min_alpha: 0.3,
            max_alpha: 0.9,
            motion_threshold_px: 20.0,
        }
    }
}

fn valid_alpha(alpha: f32) -> bool {
    alpha > 0.0 && alpha <= 1.0
}

impl SmootherConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if !valid_alpha(self.alpha) {
            return Err(Error::InvalidConfig(format!(
                "smoother alpha must be in (0, 1], got {}",
                self.alpha
            )));
        }

        if let Some(a) = &self.adaptive {
            if !valid_alpha(a.min_alpha) || !valid_alpha(a.max_alpha) || a.min_alpha > a.max_alpha
            {
                return Err(Error::InvalidConfig(format!(
                    "adaptive alpha range [{}, {}] must lie in (0, 1]",
                    a.min_alpha, a.max_alpha
                )));
            }

            if !(a.motion_threshold_px > 0.0) {
                return Err(Error::InvalidConfig(
                    "adaptive motion threshold must be positive".into(),
                ));
            }
        }

        Ok(())
    }

    fn alpha_for(&self, prev: &Observation, curr: &Observation) -> f32 {
        match &self.adaptive {
            Some(a) => {
                let motion = nalgebra::distance(&prev.bbox.center(), &curr.bbox.center());
                let ratio = (motion / a.motion_threshold_px).min(1.0);

                a.min_alpha + ratio * (a.max_alpha - a.min_alpha)
            }
            None => self.alpha,
        }
    }
}

/// Smoothed series keyed by track id.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
#[serde(transparent)]
pub struct SmoothedTrajectories {
    tracks: BTreeMap<u32, Vec<SmoothedObservation>>,
}

impl SmoothedTrajectories {
    #[inline]
    pub fn get(&self, track_id: u32) -> Option<&[SmoothedObservation]> {
        self.tracks.get(&track_id).map(Vec::as_slice)
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (u32, &[SmoothedObservation])> {
        self.tracks.iter().map(|(id, s)| (*id, s.as_slice()))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

impl FromIterator<(u32, Vec<SmoothedObservation>)> for SmoothedTrajectories {
    fn from_iter<I: IntoIterator<Item = (u32, Vec<SmoothedObservation>)>>(iter: I) -> Self {
        Self {
            tracks: iter.into_iter().collect(),
        }
    }
}

/// Recomputes the EMA over a whole history. The first observation of every
/// contiguous segment is passed through unchanged.
pub fn smooth_track(history: &[Observation], config: &SmootherConfig) -> Vec<SmoothedObservation> {
    let mut out: Vec<SmoothedObservation> = Vec::with_capacity(history.len());
    let mut prev_raw: Option<&Observation> = None;

    for obs in history {
        let bbox = match (prev_raw, out.last()) {
            (Some(prev), Some(last)) if frame_gap(prev.frame, obs.frame) <= config.max_gap_frames => {
                last.bbox.lerp(&obs.bbox, config.alpha_for(prev, obs))
            }
            (Some(prev), _) => {
                debug!(
                    track_id = obs.track_id,
                    from = prev.frame,
                    to = obs.frame,
                    "gap too long, smoothing restarted"
                );
                obs.bbox
            }
            _ => obs.bbox,
        };

        out.push(SmoothedObservation {
            track_id: obs.track_id,
            frame: obs.frame,
            timestamp: obs.timestamp,
            bbox,
        });
        prev_raw = Some(obs);
    }

    out
}

/// Smooths every track of the session in parallel.
pub fn smooth_session(
    session: &Session,
    config: &SmootherConfig,
) -> Result<SmoothedTrajectories, Error> {
    config.validate()?;

    let tracks: Vec<(u32, &[Observation])> = session.tracks().collect();

    Ok(tracks
        .into_par_iter()
        .map(|(id, history)| (id, smooth_track(history, config)))
        .collect::<Vec<_>>()
        .into_iter()
        .collect())
}
