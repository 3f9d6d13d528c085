use serde_derive::Serialize;
use tracing::{info, warn};

use crate::calibration::Calibration;
use crate::collision::{self, CollisionRecord, NearMissEvent};
use crate::config::AnalyticsConfig;
use crate::error::Error;
use crate::lines::{self, CountingLine, LineCount};
use crate::quality::{self, QualityReport};
use crate::smoother::{self, SmoothedTrajectories};
use crate::speed::{self, SpeedStats, SpeedUnit};
use crate::store::{Session, TrajectoryStore};
use crate::zones::{self, LaneEvent, LaneZone};
use crate::TrackSource;

/// Speed series of one track in the configured unit.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct TrackSpeed {
    pub track_id: u32,
    /// `(frame, windowed speed)`, `None` where the speed is unknown.
    pub series: Vec<(u64, Option<f32>)>,
    pub stats: Option<SpeedStats>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct AnalyticsReport {
    pub frame_range: Option<(u64, u64)>,
    pub track_count: usize,
    pub observation_count: usize,
    pub smoothed: SmoothedTrajectories,
    pub speed_unit: SpeedUnit,
    pub speeds: Vec<TrackSpeed>,
    pub lane_events: Vec<LaneEvent>,
    pub line_counts: Vec<LineCount>,
    pub collisions: Vec<CollisionRecord>,
    pub near_misses: Vec<NearMissEvent>,
    pub quality: QualityReport,
}

/// Drains `source` into a store using the configured activity window.
/// Returns the finalized session and the number of rejected observations.
pub fn ingest<S: TrackSource>(source: &mut S, config: &AnalyticsConfig) -> (Session, usize) {
    let mut store = TrajectoryStore::new(config.max_age);
    let rejected = store.ingest(source);

    (store.finalize(), rejected)
}

/// Runs every analytic over a finalized session. Without a calibration the
/// report carries no speeds and collision geometry stays in pixels.
pub fn analyze(
    session: &Session,
    calibration: Option<&Calibration>,
    zones: &[LaneZone],
    lines: &[CountingLine],
    config: &AnalyticsConfig,
) -> Result<AnalyticsReport, Error> {
    config.validate()?;
    let config = config.resolved();

    if session.max_age() != config.max_age {
        warn!(
            session = session.max_age(),
            configured = config.max_age,
            "session activity window differs from configured max age"
        );
    }

    let smoothed = smoother::smooth_session(session, &config.smoother)?;

    let speeds = match calibration {
        Some(calibration) => speed::estimate_speeds(&smoothed, calibration, &config.speed)?
            .iter()
            .map(|s| TrackSpeed {
                track_id: s.track_id,
                series: s.converted(config.speed.units),
                stats: s.stats().map(|st| st.converted(config.speed.units)),
            })
            .collect(),
        None => {
            warn!("no calibration supplied, speed estimation skipped");
            Vec::new()
        }
    };

    let lane_events = zones::detect_lane_events(&smoothed, zones, &config.zones)?;
    let line_counts = lines::count_crossings(&smoothed, lines);

    let collisions = collision::detect_collisions(session, &smoothed, calibration, &config.collision)?;
    let near_misses = collision::consolidate(&collisions, config.collision.consolidation_gap_frames);

    let quality = quality::assess(session, &config.quality);

    info!(
        tracks = session.track_count(),
        lane_events = lane_events.len(),
        near_misses = near_misses.len(),
        "analysis done"
    );

    Ok(AnalyticsReport {
        frame_range: session.frame_range().map(|r| (*r.start(), *r.end())),
        track_count: session.track_count(),
        observation_count: session.observation_count(),
        smoothed,
        speed_unit: config.speed.units,
        speeds,
        lane_events,
        line_counts,
        collisions,
        near_misses,
        quality,
    })
}
