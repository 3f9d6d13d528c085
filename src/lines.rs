use nalgebra as na;
use rayon::prelude::*;
use serde_derive::{Deserialize, Serialize};
use tracing::info;

use crate::error::Error;
use crate::geometry;
use crate::smoother::SmoothedTrajectories;

/// Directed counting line; its direction decides what counts as inbound.
#[derive(Debug, Clone, PartialEq)]
pub struct CountingLine {
    name: String,
    a: na::Point2<f32>,
    b: na::Point2<f32>,
}

impl CountingLine {
    pub fn new(name: impl Into<String>, a: na::Point2<f32>, b: na::Point2<f32>) -> Result<Self, Error> {
        let name = name.into();

        if na::distance(&a, &b) <= f32::EPSILON {
            return Err(Error::InvalidZoneGeometry {
                name,
                reason: "line endpoints coincide".into(),
            });
        }

        Ok(Self { name, a, b })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn endpoints(&self) -> (na::Point2<f32>, na::Point2<f32>) {
        (self.a, self.b)
    }

    /// Points exactly on the line belong to the inbound side.
    #[inline]
    fn inbound_side(&self, p: na::Point2<f32>) -> bool {
        geometry::cross(self.a, self.b, p) >= 0.0
    }

    /// Direction of a motion step `from -> to` across the line, `None` unless
    /// the step changes side within the line's extent.
    pub fn crossing(&self, from: na::Point2<f32>, to: na::Point2<f32>) -> Option<Direction> {
        if from == to {
            return None;
        }

        let (was_in, is_in) = (self.inbound_side(from), self.inbound_side(to));
        if was_in == is_in || !geometry::segments_intersect(from, to, self.a, self.b) {
            return None;
        }

        if is_in {
            Some(Direction::Inbound)
        } else {
            Some(Direction::Outbound)
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CountingLineSpec {
    pub name: String,
    pub points: [[f32; 2]; 2],
}

impl CountingLineSpec {
    pub fn build(&self) -> Result<CountingLine, Error> {
        let [a, b] = self.points;

        CountingLine::new(
            self.name.clone(),
            na::Point2::new(a[0], a[1]),
            na::Point2::new(b[0], b[1]),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct LineCount {
    pub name: String,
    #[serde(rename = "in")]
    pub inbound: u32,
    #[serde(rename = "out")]
    pub outbound: u32,
}

impl LineCount {
    #[inline]
    pub fn total(&self) -> u32 {
        self.inbound + self.outbound
    }
}

/// Counts every crossing of consecutive ground-contact points, one entry per line.
pub fn count_crossings(trajectories: &SmoothedTrajectories, lines: &[CountingLine]) -> Vec<LineCount> {
    let tracks: Vec<_> = trajectories.iter().collect();

    let per_track: Vec<Vec<(u32, u32)>> = tracks
        .into_par_iter()
        .map(|(_, series)| {
            let mut counts = vec![(0u32, 0u32); lines.len()];

            for step in series.windows(2) {
                let from = step[0].bbox.ground_contact();
                let to = step[1].bbox.ground_contact();

                for (line, count) in lines.iter().zip(counts.iter_mut()) {
                    match line.crossing(from, to) {
                        Some(Direction::Inbound) => count.0 += 1,
                        Some(Direction::Outbound) => count.1 += 1,
                        None => (),
                    }
                }
            }

            counts
        })
        .collect();

    let out: Vec<LineCount> = lines
        .iter()
        .enumerate()
        .map(|(i, line)| LineCount {
            name: line.name().to_string(),
            inbound: per_track.iter().map(|c| c[i].0).sum(),
            outbound: per_track.iter().map(|c| c[i].1).sum(),
        })
        .collect();

    info!(lines = out.len(), "line counting done");

    out
}
