use nalgebra as na;
use rayon::prelude::*;
use serde_derive::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::bbox::{BBox, Ltrb};
use crate::error::Error;
use crate::geometry;
use crate::observation::SmoothedObservation;
use crate::smoother::SmoothedTrajectories;
use crate::store::frame_gap;

/// Frames held in the prior state at which an event reaches full confidence.
const FULL_CONFIDENCE_FRAMES: f32 = 10.0;

/// Named lane polygon in image coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct LaneZone {
    name: String,
    label: String,
    polygon: Vec<na::Point2<f32>>,
}

impl LaneZone {
    pub fn new(
        name: impl Into<String>,
        label: impl Into<String>,
        polygon: Vec<na::Point2<f32>>,
    ) -> Result<Self, Error> {
        let name = name.into();
        let invalid = |reason: String| Error::InvalidZoneGeometry {
            name: name.clone(),
            reason,
        };

        if polygon.len() < 3 {
            return Err(invalid(format!(
                "polygon needs at least 3 points, got {}",
                polygon.len()
            )));
        }

        if polygon.iter().any(|p| !(p.x.is_finite() && p.y.is_finite())) {
            return Err(invalid("polygon has non-finite points".into()));
        }

        if geometry::signed_area(&polygon).abs() <= f32::EPSILON {
            return Err(invalid("polygon has zero area".into()));
        }

        if let Some((i, j)) = geometry::find_self_intersection(&polygon) {
            return Err(invalid(format!("edges {} and {} intersect", i, j)));
        }

        Ok(Self {
            name,
            label: label.into(),
            polygon,
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[inline]
    pub fn contains(&self, p: na::Point2<f32>) -> bool {
        geometry::in_bounds(p, &self.polygon)
    }
}

/// Zone as drawn in the UI / zones file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LaneZoneSpec {
    pub name: String,
    #[serde(alias = "zone_type")]
    pub label: String,
    pub points: Vec<[f32; 2]>,
}

impl LaneZoneSpec {
    pub fn build(&self) -> Result<LaneZone, Error> {
        LaneZone::new(
            self.name.clone(),
            self.label.clone(),
            self.points
                .iter()
                .map(|p| na::Point2::new(p[0], p[1]))
                .collect(),
        )
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ZoneConfig {
    /// Consecutive observations a new membership must hold before it commits.
    pub dwell_frames: u32,
    /// A gap longer than this restarts every zone state of the track.
    pub reset_gap_frames: u64,
    /// Labels of the zones that produce cut-in / cut-out events.
    pub target_labels: Vec<String>,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            dwell_frames: 3,
            reset_gap_frames: 10,
            target_labels: vec!["ego".to_string()],
        }
    }
}

impl ZoneConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.dwell_frames == 0 {
            return Err(Error::InvalidConfig("dwell must be at least 1 frame".into()));
        }

        Ok(())
    }

    #[inline]
    fn is_target(&self, zone: &LaneZone) -> bool {
        self.target_labels.iter().any(|l| l == zone.label())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LaneEventKind {
    CutIn,
    CutOut,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LaneEvent {
    pub track_id: u32,
    #[serde(rename = "event_type")]
    pub kind: LaneEventKind,
    pub from_zone: Option<String>,
    pub to_zone: Option<String>,
    /// Frame at which the dwell requirement was met.
    pub frame: u64,
    pub confidence: f32,
    pub bbox: BBox<Ltrb>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Membership {
    Outside,
    Inside,
}

impl From<bool> for Membership {
    #[inline]
    fn from(inside: bool) -> Self {
        if inside {
            Membership::Inside
        } else {
            Membership::Outside
        }
    }
}

/// Hysteresis state of one (track, zone) pair.
#[derive(Debug, Clone, Copy)]
struct ZoneState {
    committed: Membership,
    held: u32,
    pending: u32,
}

impl ZoneState {
    fn seed(membership: Membership) -> Self {
        Self {
            committed: membership,
            held: 1,
            pending: 0,
        }
    }

    /// Feeds one observation, returns the observations held in the prior
    /// state when a transition commits.
    fn step(&mut self, membership: Membership, dwell: u32) -> Option<u32> {
        if membership == self.committed {
            self.pending = 0;
            self.held += 1;

            return None;
        }

        self.pending += 1;
        if self.pending < dwell {
            return None;
        }

        let held = self.held;
        self.committed = membership;
        self.held = self.pending;
        self.pending = 0;

        Some(held)
    }
}

/// Runs the lane state machines over one smoothed track.
pub fn track_lane_events(
    series: &[SmoothedObservation],
    zones: &[LaneZone],
    config: &ZoneConfig,
) -> Vec<LaneEvent> {
    let mut events = Vec::new();
    let mut states: Vec<ZoneState> = Vec::with_capacity(zones.len());
    // zone most recently committed as entered
    let mut last_zone: Option<usize> = None;
    let mut prev_frame: Option<u64> = None;

    for obs in series {
        let p = obs.bbox.ground_contact();
        let inside: Vec<bool> = zones.iter().map(|z| z.contains(p)).collect();

        let reseed = match prev_frame {
            Some(prev) => frame_gap(prev, obs.frame) > config.reset_gap_frames,
            None => true,
        };
        prev_frame = Some(obs.frame);

        if reseed {
            states = inside.iter().map(|&i| ZoneState::seed(i.into())).collect();
            last_zone = inside.iter().position(|&i| i);
            continue;
        }

        let mut exits = Vec::new();
        let mut entries = Vec::new();

        for (idx, state) in states.iter_mut().enumerate() {
            if let Some(held) = state.step(inside[idx].into(), config.dwell_frames) {
                let confidence = (held as f32 / FULL_CONFIDENCE_FRAMES).min(1.0);

                match state.committed {
                    Membership::Inside => entries.push((idx, confidence)),
                    Membership::Outside => exits.push((idx, confidence)),
                }
            }
        }

        // a zone left in this step still names where an entry came from
        let before = last_zone;
        if exits.iter().any(|&(idx, _)| last_zone == Some(idx)) {
            last_zone = (0..zones.len()).find(|&z| {
                states[z].committed == Membership::Inside && !entries.iter().any(|&(e, _)| e == z)
            });
        }

        for (idx, confidence) in exits {
            if !config.is_target(&zones[idx]) {
                continue;
            }

            let to_zone = (0..zones.len())
                .find(|&other| other != idx && inside[other])
                .map(|other| zones[other].name().to_string());

            events.push(LaneEvent {
                track_id: obs.track_id,
                kind: LaneEventKind::CutOut,
                from_zone: Some(zones[idx].name().to_string()),
                to_zone,
                frame: obs.frame,
                confidence,
                bbox: obs.bbox,
            });
        }

        for (idx, confidence) in entries {
            let previous = last_zone.replace(idx);

            if !config.is_target(&zones[idx]) {
                continue;
            }

            events.push(LaneEvent {
                track_id: obs.track_id,
                kind: LaneEventKind::CutIn,
                from_zone: previous.or(before).map(|z| zones[z].name().to_string()),
                to_zone: Some(zones[idx].name().to_string()),
                frame: obs.frame,
                confidence,
                bbox: obs.bbox,
            });
        }
    }

    events
}

/// Lane events of every track, ordered by `(frame, track_id)`.
pub fn detect_lane_events(
    trajectories: &SmoothedTrajectories,
    zones: &[LaneZone],
    config: &ZoneConfig,
) -> Result<Vec<LaneEvent>, Error> {
    config.validate()?;

    if !zones.iter().any(|z| config.is_target(z)) {
        warn!(
            targets = ?config.target_labels,
            "no target zone defined, lane events skipped"
        );
        return Ok(Vec::new());
    }

    let tracks: Vec<_> = trajectories.iter().collect();
    let mut events: Vec<LaneEvent> = tracks
        .into_par_iter()
        .flat_map_iter(|(_, series)| track_lane_events(series, zones, config))
        .collect();

    events.sort_by_key(|e| (e.frame, e.track_id));

    info!(
        zones = zones.len(),
        events = events.len(),
        "lane event detection done"
    );

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const IN: f32 = 50.0;
    const OUT: f32 = 150.0;

    fn rect(x0: f32, x1: f32) -> Vec<na::Point2<f32>> {
        vec![
            na::Point2::new(x0, 0.0),
            na::Point2::new(x1, 0.0),
            na::Point2::new(x1, 100.0),
            na::Point2::new(x0, 100.0),
        ]
    }

    fn ego() -> LaneZone {
        LaneZone::new("ego lane", "ego", rect(0.0, 100.0)).unwrap()
    }

    fn left() -> LaneZone {
        LaneZone::new("left lane", "left", rect(100.0, 200.0)).unwrap()
    }

    /// Track whose ground-contact point sits at `(x, 50)` on consecutive frames.
    fn track(xs: &[f32]) -> Vec<SmoothedObservation> {
        xs.iter()
            .enumerate()
            .map(|(f, &x)| SmoothedObservation {
                track_id: 7,
                frame: f as u64,
                timestamp: f as f32 / 30.0,
                bbox: BBox::ltrb(x - 5.0, 30.0, x + 5.0, 50.0),
            })
            .collect()
    }

    fn dwell(frames: u32) -> ZoneConfig {
        ZoneConfig {
            dwell_frames: frames,
            ..Default::default()
        }
    }

    #[test]
    fn single_frame_blip_is_suppressed() {
        let events = track_lane_events(&track(&[IN, IN, OUT, IN, IN, IN]), &[ego()], &dwell(2));

        assert!(events.is_empty());
    }

    #[test]
    fn held_exit_emits_one_cut_out() {
        let events = track_lane_events(&track(&[IN, IN, OUT, OUT, OUT, IN]), &[ego()], &dwell(2));

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, LaneEventKind::CutOut);
        assert_eq!(events[0].frame, 3);
        assert_eq!(events[0].from_zone.as_deref(), Some("ego lane"));
        assert_eq!(events[0].to_zone, None);
        assert_relative_eq!(events[0].confidence, 0.2);
    }

    #[test]
    fn entering_from_adjacent_lane_is_cut_in() {
        let zones = [ego(), left()];
        let events = track_lane_events(&track(&[OUT, OUT, OUT, IN, IN, IN]), &zones, &dwell(2));

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, LaneEventKind::CutIn);
        assert_eq!(events[0].frame, 4);
        assert_eq!(events[0].from_zone.as_deref(), Some("left lane"));
        assert_eq!(events[0].to_zone.as_deref(), Some("ego lane"));
        assert_relative_eq!(events[0].confidence, 0.3);
    }

    #[test]
    fn cut_out_reports_destination_zone() {
        let zones = [ego(), left()];
        let events = track_lane_events(&track(&[IN, IN, IN, OUT, OUT]), &zones, &dwell(2));

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, LaneEventKind::CutOut);
        assert_eq!(events[0].to_zone.as_deref(), Some("left lane"));
    }

    #[test]
    fn returning_to_lane_after_held_exit_is_cut_in() {
        let events = track_lane_events(
            &track(&[IN, IN, IN, OUT, OUT, OUT, IN, IN, IN]),
            &[ego()],
            &dwell(2),
        );

        let kinds: Vec<_> = events.iter().map(|e| (e.kind, e.frame)).collect();
        assert_eq!(kinds, vec![(LaneEventKind::CutOut, 4), (LaneEventKind::CutIn, 7)]);
        assert_eq!(events[1].from_zone, None);
        assert_eq!(events[1].to_zone.as_deref(), Some("ego lane"));
    }

    #[test]
    fn lane_change_in_one_step_keeps_origin() {
        let zones = [ego(), left()];
        let events = track_lane_events(&track(&[OUT, OUT, IN, IN, IN]), &zones, &dwell(2));

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, LaneEventKind::CutIn);
        assert_eq!(events[0].frame, 3);
        assert_eq!(events[0].from_zone.as_deref(), Some("left lane"));
    }

    #[test]
    fn seeding_observation_emits_nothing() {
        let events = track_lane_events(&track(&[IN, IN, IN]), &[ego()], &dwell(1));

        assert!(events.is_empty());
    }

    #[test]
    fn long_gap_reseeds_state() {
        let mut series = track(&[IN, IN, OUT, OUT]);
        series[2].frame = 40;
        series[3].frame = 41;

        let events = track_lane_events(&series, &[ego()], &dwell(1));

        assert!(events.is_empty());
    }

    #[test]
    fn invalid_zone_geometry() {
        let two = vec![na::Point2::new(0.0, 0.0), na::Point2::new(1.0, 1.0)];
        let flat = vec![
            na::Point2::new(0.0, 0.0),
            na::Point2::new(5.0, 0.0),
            na::Point2::new(10.0, 0.0),
        ];
        let bow_tie = vec![
            na::Point2::new(0.0, 0.0),
            na::Point2::new(10.0, 10.0),
            na::Point2::new(10.0, 0.0),
            na::Point2::new(0.0, 10.0),
        ];

        for poly in [two, flat, bow_tie] {
            assert!(matches!(
                LaneZone::new("bad", "ego", poly),
                Err(Error::InvalidZoneGeometry { .. })
            ));
        }
    }

    #[test]
    fn events_are_sorted_across_tracks() {
        let mut a = track(&[IN, IN, OUT, OUT]);
        let mut b = track(&[OUT, IN, IN, IN]);
        for o in a.iter_mut() {
            o.track_id = 2;
        }
        for o in b.iter_mut() {
            o.track_id = 1;
        }

        let trajectories: SmoothedTrajectories = vec![(2, a), (1, b)].into_iter().collect();
        let events = detect_lane_events(&trajectories, &[ego()], &dwell(2)).unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!((events[0].frame, events[0].track_id), (2, 1));
        assert_eq!((events[1].frame, events[1].track_id), (3, 2));
    }

    #[test]
    fn zone_from_json() {
        let spec: LaneZoneSpec = serde_json::from_str(
            r#"{"name":"ego","zone_type":"ego","points":[[0,0],[10,0],[10,10]]}"#,
        )
        .unwrap();
        let zone = spec.build().unwrap();

        assert_eq!(zone.label(), "ego");
        assert!(zone.contains(na::Point2::new(8.0, 2.0)));
    }
}
