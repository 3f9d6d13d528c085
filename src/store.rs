use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use tracing::{debug, warn};

use crate::error::Error;
use crate::frame::TrackedFrame;
use crate::observation::Observation;
use crate::TrackSource;

/// Matches the external tracker's default max-age.
pub const DEFAULT_MAX_AGE: u64 = 70;

/// Per-track ordered histories, filled while the session is being ingested.
#[derive(Debug, Clone)]
pub struct TrajectoryStore {
    max_age: u64,
    tracks: BTreeMap<u32, Vec<Observation>>,
}

impl Default for TrajectoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_AGE)
    }
}

impl TrajectoryStore {
    /// `max_age` is the activity window: a track stays active for that many
    /// frames after its last observation.
    pub fn new(max_age: u64) -> Self {
        Self {
            max_age,
            tracks: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, observation: Observation) -> Result<(), Error> {
        if !observation.bbox.is_finite() {
            return Err(Error::InvalidObservation {
                track_id: observation.track_id,
                frame: observation.frame,
                reason: format!("non-finite box {:?}", observation.bbox),
            });
        }

        let history = self.tracks.entry(observation.track_id).or_default();

        if let Some(last) = history.last() {
            if observation.frame <= last.frame {
                return Err(Error::OutOfOrderFrame {
                    track_id: observation.track_id,
                    frame: observation.frame,
                    last: last.frame,
                });
            }
        }

        history.push(observation);

        Ok(())
    }

    /// Records every observation of the frame, returns how many were rejected.
    pub fn record_frame(&mut self, frame: &TrackedFrame) -> usize {
        let mut rejected = 0;

        for obs in frame.iter() {
            if let Err(err) = self.record(obs.clone()) {
                warn!(frame = frame.index, "observation dropped: {}", err);
                rejected += 1;
            }
        }

        rejected
    }

    /// Drains a tracker source into the store. Malformed frames and out of
    /// order observations are logged and skipped.
    pub fn ingest<S: TrackSource>(&mut self, source: &mut S) -> usize {
        let mut rejected = 0;

        while let Some(item) = source.next_frame() {
            match item {
                Ok(frame) => rejected += self.record_frame(&frame),
                Err(err) => {
                    warn!("tracker source error: {}", err);
                    rejected += 1;
                }
            }
        }

        debug!(
            tracks = self.tracks.len(),
            rejected, "tracker source exhausted"
        );

        rejected
    }

    #[inline]
    pub fn history(&self, track_id: u32) -> Option<&[Observation]> {
        self.tracks.get(&track_id).map(Vec::as_slice)
    }

    pub fn active_tracks(&self, frame: u64) -> Vec<u32> {
        active_in(&self.tracks, self.max_age, frame)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Ends ingestion; the returned session can no longer be mutated.
    pub fn finalize(self) -> Session {
        let frame_range = self
            .tracks
            .values()
            .filter_map(|h| Some((h.first()?.frame, h.last()?.frame)))
            .reduce(|(lo, hi), (a, b)| (lo.min(a), hi.max(b)))
            .map(|(lo, hi)| lo..=hi);

        Session {
            max_age: self.max_age,
            tracks: self.tracks,
            frame_range,
        }
    }
}

/// Immutable trajectory set of one analysis session, shared read-only by all analytics.
#[derive(Debug, Clone)]
pub struct Session {
    max_age: u64,
    tracks: BTreeMap<u32, Vec<Observation>>,
    frame_range: Option<RangeInclusive<u64>>,
}

impl Session {
    #[inline]
    pub fn max_age(&self) -> u64 {
        self.max_age
    }

    #[inline]
    pub fn history(&self, track_id: u32) -> Option<&[Observation]> {
        self.tracks.get(&track_id).map(Vec::as_slice)
    }

    #[inline]
    pub fn track_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.tracks.keys().copied()
    }

    /// Tracks in ascending id order.
    #[inline]
    pub fn tracks(&self) -> impl Iterator<Item = (u32, &[Observation])> {
        self.tracks.iter().map(|(id, h)| (*id, h.as_slice()))
    }

    #[inline]
    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn observation_count(&self) -> usize {
        self.tracks.values().map(Vec::len).sum()
    }

    /// First and last frame observed by any track.
    #[inline]
    pub fn frame_range(&self) -> Option<RangeInclusive<u64>> {
        self.frame_range.clone()
    }

    pub fn active_tracks(&self, frame: u64) -> Vec<u32> {
        active_in(&self.tracks, self.max_age, frame)
    }

    /// Disjoint inclusive frame spans, ascending, in which at least one track is active.
    pub fn active_spans(&self) -> Vec<(u64, u64)> {
        let mut spans: Vec<(u64, u64)> = self
            .tracks
            .values()
            .flat_map(|h| h.iter().map(|o| (o.frame, o.frame.saturating_add(self.max_age))))
            .collect();

        spans.sort_unstable();

        let mut merged: Vec<(u64, u64)> = Vec::with_capacity(spans.len());
        for (start, end) in spans {
            match merged.last_mut() {
                Some(last) if start <= last.1.saturating_add(1) => last.1 = last.1.max(end),
                _ => merged.push((start, end)),
            }
        }

        merged
    }

    /// Latest observation of the track at or before `frame`.
    pub fn last_observation_at(&self, track_id: u32, frame: u64) -> Option<&Observation> {
        let history = self.tracks.get(&track_id)?;
        let idx = history.partition_point(|o| o.frame <= frame);

        idx.checked_sub(1).map(|i| &history[i])
    }
}

/// Number of frames missing between two consecutive observations.
#[inline]
pub fn frame_gap(prev: u64, next: u64) -> u64 {
    next.saturating_sub(prev).saturating_sub(1)
}

fn active_in(tracks: &BTreeMap<u32, Vec<Observation>>, max_age: u64, frame: u64) -> Vec<u32> {
    let since = frame.saturating_sub(max_age);

    tracks
        .iter()
        .filter(|(_, history)| {
            let idx = history.partition_point(|o| o.frame <= frame);
            idx > 0 && history[idx - 1].frame >= since
        })
        .map(|(id, _)| *id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbox::BBox;

    fn obs(track_id: u32, frame: u64) -> Observation {
        Observation::new(track_id, frame, frame as f32 / 30.0, BBox::ltrb(0.0, 0.0, 10.0, 10.0))
    }

    #[test]
    fn rejects_out_of_order_frames() {
        let mut store = TrajectoryStore::new(5);
        store.record(obs(1, 3)).unwrap();

        let err = store.record(obs(1, 3)).unwrap_err();
        assert!(matches!(
            err,
            Error::OutOfOrderFrame {
                track_id: 1,
                frame: 3,
                last: 3
            }
        ));
        assert!(store.record(obs(1, 2)).is_err());

        // rejection leaves the store usable
        store.record(obs(1, 4)).unwrap();
        assert_eq!(store.history(1).unwrap().len(), 2);
    }

    #[test]
    fn rejects_non_finite_boxes() {
        let mut store = TrajectoryStore::new(5);
        let bad = Observation::new(1, 0, 0.0, BBox::ltrb(0.0, f32::NAN, 10.0, 10.0));

        assert!(matches!(
            store.record(bad),
            Err(Error::InvalidObservation { track_id: 1, frame: 0, .. })
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn active_spans_skip_idle_frames() {
        let mut store = TrajectoryStore::new(3);
        store.record(obs(1, 0)).unwrap();
        store.record(obs(1, 2)).unwrap();
        store.record(obs(2, 1_000_000_000)).unwrap();

        assert_eq!(
            store.finalize().active_spans(),
            vec![(0, 5), (1_000_000_000, 1_000_000_003)]
        );
    }

    #[test]
    fn record_frame_counts_rejections() {
        let mut store = TrajectoryStore::new(5);
        store.record(obs(2, 10)).unwrap();

        let mut frame = TrackedFrame::new(9, 0.3);
        frame.observations = vec![obs(1, 9), obs(2, 9)];

        assert_eq!(store.record_frame(&frame), 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn active_window_keeps_occluded_tracks() {
        let mut store = TrajectoryStore::new(3);
        store.record(obs(1, 0)).unwrap();
        store.record(obs(1, 1)).unwrap();
        store.record(obs(2, 3)).unwrap();

        assert_eq!(store.active_tracks(1), vec![1]);
        assert_eq!(store.active_tracks(3), vec![1, 2]);
        assert_eq!(store.active_tracks(4), vec![1, 2]);
        assert_eq!(store.active_tracks(5), vec![2]);

        let session = store.finalize();
        assert_eq!(session.active_tracks(4), vec![1, 2]);
        assert_eq!(session.active_spans(), vec![(0, 6)]);
        assert_eq!(session.track_ids().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(session.frame_range(), Some(0..=3));
        assert_eq!(session.last_observation_at(1, 4).map(|o| o.frame), Some(1));
        assert!(session.last_observation_at(2, 2).is_none());
    }

    #[test]
    fn empty_session_has_no_range() {
        let session = TrajectoryStore::default().finalize();

        assert!(session.frame_range().is_none());
        assert_eq!(session.observation_count(), 0);
        assert_eq!(session.max_age(), DEFAULT_MAX_AGE);
    }
}
