use serde_derive::{Deserialize, Serialize};
use tracing::info;

use crate::observation::Observation;
use crate::store::{frame_gap, Session};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct QualityConfig {
    /// Longest hand-over gap still considered a possible ID switch.
    pub switch_max_gap_frames: u64,
    /// Maximum centre distance for a hand-over, as a fraction of the box diagonal.
    pub switch_max_distance_ratio: f32,
    /// Tracks with a gap longer than this count as fragmented.
    pub fragment_gap_frames: u64,
    /// Frame count of the video; coverage spans the observed range when unset.
    pub total_frames: Option<u64>,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            switch_max_gap_frames: 70,
            switch_max_distance_ratio: 0.5,
            fragment_gap_frames: 30,
            total_frames: None,
        }
    }
}

/// One track ending where another of the same class starts shortly after.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SuspectedSwitch {
    pub ended_track: u32,
    pub started_track: u32,
    pub ended_at: u64,
    pub started_at: u64,
    pub distance_ratio: f32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct QualityReport {
    pub id_switch_count: usize,
    pub gap_count: usize,
    pub covered_frame_count: u64,
    pub total_frame_count: u64,
    /// `None` when the session spans no frames.
    pub coverage: Option<f32>,
    pub track_count: usize,
    pub fragmented_track_count: usize,
    pub suspected_switches: Vec<SuspectedSwitch>,
}

/// Frame discontinuities within one history.
pub fn gap_count(history: &[Observation]) -> usize {
    history
        .windows(2)
        .filter(|w| frame_gap(w[0].frame, w[1].frame) > 0)
        .count()
}

fn is_fragmented(history: &[Observation], limit: u64) -> bool {
    history
        .windows(2)
        .any(|w| frame_gap(w[0].frame, w[1].frame) > limit)
}

/// Greedy one-to-one matching of track ends to later track starts,
/// smallest gap first, then smallest distance.
pub fn suspected_switches(session: &Session, config: &QualityConfig) -> Vec<SuspectedSwitch> {
    let bounds: Vec<(u32, &Observation, &Observation)> = session
        .tracks()
        .filter_map(|(id, h)| Some((id, h.first()?, h.last()?)))
        .collect();

    let mut candidates = Vec::new();

    for &(ended, _, end) in &bounds {
        let reach = end.bbox.diagonal() * config.switch_max_distance_ratio;

        for &(started, start, _) in &bounds {
            if started == ended || start.class_label != end.class_label {
                continue;
            }

            if start.frame <= end.frame || start.frame - end.frame > config.switch_max_gap_frames {
                continue;
            }

            let distance = nalgebra::distance(&end.bbox.center(), &start.bbox.center());
            if distance > reach {
                continue;
            }

            candidates.push((start.frame - end.frame, distance, ended, started, end, start));
        }
    }

    candidates.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.total_cmp(&b.1)));

    let mut used_ends = Vec::new();
    let mut used_starts = Vec::new();
    let mut out = Vec::new();

    for (_, distance, ended, started, end, start) in candidates {
        if used_ends.contains(&ended) || used_starts.contains(&started) {
            continue;
        }

        used_ends.push(ended);
        used_starts.push(started);

        let diagonal = end.bbox.diagonal();
        out.push(SuspectedSwitch {
            ended_track: ended,
            started_track: started,
            ended_at: end.frame,
            started_at: start.frame,
            distance_ratio: if diagonal > 0.0 { distance / diagonal } else { 0.0 },
        });
    }

    out.sort_by_key(|s| (s.started_at, s.ended_track));
    out
}

/// Counts frames of `[lo, hi]` with at least one active track.
fn covered_frames(session: &Session, lo: u64, hi: u64) -> u64 {
    session
        .active_spans()
        .into_iter()
        .filter_map(|(start, end)| {
            let (start, end) = (start.max(lo), end.min(hi));
            (start <= end).then(|| end - start + 1)
        })
        .sum()
}

/// Audits the session. Degrades to zero counters and unknown coverage on empty input.
pub fn assess(session: &Session, config: &QualityConfig) -> QualityReport {
    let switches = suspected_switches(session, config);

    let (range, total_frame_count) = match (config.total_frames, session.frame_range()) {
        (Some(0), _) | (None, None) => (None, 0),
        (Some(n), _) => (Some((0, n - 1)), n),
        (None, Some(r)) => (Some((*r.start(), *r.end())), r.end() - r.start() + 1),
    };

    let covered_frame_count = range.map_or(0, |(lo, hi)| covered_frames(session, lo, hi));

    let report = QualityReport {
        id_switch_count: switches.len(),
        gap_count: session.tracks().map(|(_, h)| gap_count(h)).sum(),
        covered_frame_count,
        total_frame_count,
        coverage: range.map(|_| covered_frame_count as f32 / total_frame_count as f32),
        track_count: session.track_count(),
        fragmented_track_count: session
            .tracks()
            .filter(|(_, h)| is_fragmented(h, config.fragment_gap_frames))
            .count(),
        suspected_switches: switches,
    };

    info!(
        switches = report.id_switch_count,
        gaps = report.gap_count,
        coverage = ?report.coverage,
        "quality audit done"
    );

    report
}
