//! Pairwise time-to-collision over every frame of a session.
//!
//! Cost is O(F · A²) for F frames with at least one active track and A
//! simultaneously active tracks; frames are independent and processed in parallel.

use std::collections::BTreeMap;

use nalgebra as na;
use rayon::prelude::*;
use serde_derive::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::calibration::Calibration;
use crate::error::Error;
use crate::observation::SmoothedObservation;
use crate::smoother::SmoothedTrajectories;
use crate::store::Session;

const COINCIDENT_DISTANCE: f32 = 1e-3;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct CollisionConfig {
    /// Seconds; TTC at or below is critical.
    pub critical_ttc: f32,
    /// Seconds; TTC at or below is a warning.
    pub warning_ttc: f32,
    /// Pairs further apart than this are skipped, in meters when calibrated, else pixels.
    pub proximity: f32,
    pub velocity_window_frames: u64,
    pub fps: f32,
    /// Records of one pair further apart than this start a new near-miss event.
    pub consolidation_gap_frames: u64,
}

impl Default for CollisionConfig {
    fn default() -> Self {
        Self {
            critical_ttc: 1.5,
            warning_ttc: 3.0,
            proximity: 200.0,
            velocity_window_frames: 3,
            fps: 30.0,
            consolidation_gap_frames: 30,
        }
    }
}

impl CollisionConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if !(self.critical_ttc > 0.0 && self.critical_ttc <= self.warning_ttc) {
            return Err(Error::InvalidConfig(format!(
                "ttc thresholds must satisfy 0 < critical ({}) <= warning ({})",
                self.critical_ttc, self.warning_ttc
            )));
        }

        if !(self.proximity > 0.0) {
            return Err(Error::InvalidConfig("proximity must be positive".into()));
        }

        if !(self.fps.is_finite() && self.fps > 0.0) {
            return Err(Error::InvalidConfig(format!("fps must be positive, got {}", self.fps)));
        }

        if self.velocity_window_frames == 0 || self.consolidation_gap_frames == 0 {
            return Err(Error::InvalidConfig(
                "velocity window and consolidation gap must be at least 1 frame".into(),
            ));
        }

        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    None,
    Warning,
    Critical,
}

impl Severity {
    pub fn classify(ttc: f32, config: &CollisionConfig) -> Self {
        if ttc <= config.critical_ttc {
            Severity::Critical
        } else if ttc <= config.warning_ttc {
            Severity::Warning
        } else {
            Severity::None
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CollisionRecord {
    pub track_a: u32,
    pub track_b: u32,
    pub frame: u64,
    pub ttc_seconds: f32,
    pub distance: f32,
    pub closing_speed: f32,
    pub severity: Severity,
}

/// Peak (minimum TTC) record of one consolidated cluster.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NearMissEvent {
    #[serde(flatten)]
    pub peak: CollisionRecord,
    pub first_frame: u64,
    pub last_frame: u64,
    pub record_count: usize,
}

/// TTC and closing speed along the line of sight, `None` when the pair is not closing.
pub fn closing_ttc(rel_pos: na::Vector2<f32>, rel_vel: na::Vector2<f32>) -> Option<(f32, f32)> {
    let distance = rel_pos.norm();

    if distance < COINCIDENT_DISTANCE {
        return Some((0.0, rel_vel.norm()));
    }

    let closing = -rel_pos.dot(&rel_vel) / distance;
    if closing <= 0.0 {
        return None;
    }

    Some((distance / closing, closing))
}

#[derive(Debug, Clone, Copy)]
struct Kinematics {
    position: na::Point2<f32>,
    velocity: na::Vector2<f32>,
}

fn project(obs: &SmoothedObservation, calibration: Option<&Calibration>) -> Option<na::Point2<f32>> {
    match calibration {
        Some(c) => c.ground_point(&obs.bbox),
        None => Some(obs.bbox.ground_contact()),
    }
}

/// Position at `frame`, dead-reckoned from the last observation when the track is occluded.
fn kinematics_at(
    series: &[SmoothedObservation],
    frame: u64,
    calibration: Option<&Calibration>,
    config: &CollisionConfig,
) -> Option<Kinematics> {
    let idx = series.partition_point(|o| o.frame <= frame).checked_sub(1)?;
    let last = &series[idx];

    let start = series[..idx].partition_point(|o| last.frame - o.frame > config.velocity_window_frames);
    if start == idx {
        return None;
    }

    let first = &series[start];
    let p1 = project(last, calibration)?;
    let p0 = project(first, calibration)?;

    let dt = (last.frame - first.frame) as f32 / config.fps;
    let velocity = (p1 - p0) / dt;
    let ahead = (frame - last.frame) as f32 / config.fps;

    Some(Kinematics {
        position: p1 + velocity * ahead,
        velocity,
    })
}

fn frame_records(
    session: &Session,
    trajectories: &SmoothedTrajectories,
    frame: u64,
    calibration: Option<&Calibration>,
    config: &CollisionConfig,
) -> Vec<CollisionRecord> {
    let states: Vec<(u32, Kinematics)> = session
        .active_tracks(frame)
        .into_iter()
        .filter_map(|id| {
            let series = trajectories.get(id)?;
            Some((id, kinematics_at(series, frame, calibration, config)?))
        })
        .collect();

    let mut records = Vec::new();

    for (i, (track_a, a)) in states.iter().enumerate() {
        for (track_b, b) in &states[i + 1..] {
            let rel_pos = b.position - a.position;

            let distance = rel_pos.norm();
            if distance > config.proximity {
                continue;
            }

            let Some((ttc_seconds, closing_speed)) = closing_ttc(rel_pos, b.velocity - a.velocity)
            else {
                continue;
            };

            let severity = Severity::classify(ttc_seconds, config);
            if severity == Severity::None {
                continue;
            }

            records.push(CollisionRecord {
                track_a: *track_a,
                track_b: *track_b,
                frame,
                ttc_seconds,
                distance,
                closing_speed,
                severity,
            });
        }
    }

    records
}

/// Warning and critical records for every co-active pair, ordered by `(frame, track_a, track_b)`.
pub fn detect_collisions(
    session: &Session,
    trajectories: &SmoothedTrajectories,
    calibration: Option<&Calibration>,
    config: &CollisionConfig,
) -> Result<Vec<CollisionRecord>, Error> {
    config.validate()?;

    if calibration.is_none() {
        warn!("no calibration, collision analysis runs in pixel space");
    }

    let Some(range) = session.frame_range() else {
        return Ok(Vec::new());
    };
    let last = *range.end();

    let frames: Vec<u64> = session
        .active_spans()
        .into_iter()
        .filter(|&(start, _)| start <= last)
        .flat_map(|(start, end)| start..=end.min(last))
        .collect();

    let mut records: Vec<CollisionRecord> = frames
        .into_par_iter()
        .flat_map_iter(|frame| frame_records(session, trajectories, frame, calibration, config))
        .collect();

    records.sort_by_key(|r| (r.frame, r.track_a, r.track_b));

    info!(
        records = records.len(),
        critical = records
            .iter()
            .filter(|r| r.severity == Severity::Critical)
            .count(),
        "collision analysis done"
    );

    Ok(records)
}

/// Groups records per pair into clusters separated by at least `gap` frames and
/// keeps the minimum-TTC record of each.
pub fn consolidate(records: &[CollisionRecord], gap: u64) -> Vec<NearMissEvent> {
    let mut pairs: BTreeMap<(u32, u32), Vec<&CollisionRecord>> = BTreeMap::new();
    for r in records {
        pairs.entry((r.track_a, r.track_b)).or_default().push(r);
    }

    let mut events = Vec::new();

    for group in pairs.values_mut() {
        group.sort_by_key(|r| r.frame);

        let mut cluster_start = 0;
        for i in 1..=group.len() {
            let split = i == group.len() || group[i].frame - group[i - 1].frame >= gap;
            if !split {
                continue;
            }

            let cluster = &group[cluster_start..i];
            let peak = cluster
                .iter()
                .copied()
                .reduce(|best, r| if r.ttc_seconds < best.ttc_seconds { r } else { best });

            if let Some(peak) = peak {
                events.push(NearMissEvent {
                    peak: peak.clone(),
                    first_frame: cluster[0].frame,
                    last_frame: cluster[cluster.len() - 1].frame,
                    record_count: cluster.len(),
                });
            }

            cluster_start = i;
        }
    }

    events.sort_by_key(|e| (e.peak.frame, e.peak.track_a, e.peak.track_b));
    events
}
