use nalgebra as na;
use serde_derive::{Deserialize, Serialize};

use crate::bbox::{BBox, Ltrb};
use crate::error::Error;

const MIN_REFERENCE_PX: f32 = 1e-6;

// Triangle area relative to the squared longest side below which three
// points count as collinear.
const COLLINEAR_RATIO: f64 = 1e-3;

/// Pixel to world-plane mapping for one video viewpoint. Immutable once built;
/// recalibrating means building a new instance.
#[derive(Debug, Clone, PartialEq)]
pub enum Calibration {
    /// Fronto-parallel view, one scale factor for the whole image.
    Scale { meters_per_pixel: f32 },
    /// Planar homography from pixel to world meters.
    Homography { matrix: na::Matrix3<f64> },
}

impl Calibration {
    /// Builds a uniform scale from a reference segment of known length.
    pub fn from_two_points(
        a: na::Point2<f32>,
        b: na::Point2<f32>,
        meters: f32,
    ) -> Result<Self, Error> {
        let pixels = na::distance(&a, &b);

        if !pixels.is_finite() || pixels < MIN_REFERENCE_PX {
            return Err(Error::DegenerateCalibration(format!(
                "reference points {:?} and {:?} coincide",
                a, b
            )));
        }

        if !meters.is_finite() || meters <= 0.0 {
            return Err(Error::DegenerateCalibration(format!(
                "reference length must be positive, got {}",
                meters
            )));
        }

        Ok(Calibration::Scale {
            meters_per_pixel: meters / pixels,
        })
    }

    /// Solves the homography mapping four pixel points onto four world points (meters).
    pub fn from_correspondences(
        pixels: &[na::Point2<f32>; 4],
        world: &[na::Point2<f32>; 4],
    ) -> Result<Self, Error> {
        let src = pixels.map(|p| na::Point2::new(p.x as f64, p.y as f64));
        let dst = world.map(|p| na::Point2::new(p.x as f64, p.y as f64));

        check_general_position(&src, "pixel")?;
        check_general_position(&dst, "world")?;

        let mut a = na::SMatrix::<f64, 8, 8>::zeros();
        let mut b = na::SVector::<f64, 8>::zeros();

        for (i, (s, d)) in src.iter().zip(dst.iter()).enumerate() {
            let r = 2 * i;

            a[(r, 0)] = s.x;
            a[(r, 1)] = s.y;
            a[(r, 2)] = 1.0;
            a[(r, 6)] = -d.x * s.x;
            a[(r, 7)] = -d.x * s.y;
            b[r] = d.x;

            a[(r + 1, 3)] = s.x;
            a[(r + 1, 4)] = s.y;
            a[(r + 1, 5)] = 1.0;
            a[(r + 1, 6)] = -d.y * s.x;
            a[(r + 1, 7)] = -d.y * s.y;
            b[r + 1] = d.y;
        }

        let h = a.lu().solve(&b).ok_or_else(|| {
            Error::IllConditionedHomography("correspondence system is singular".into())
        })?;

        let matrix = na::Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0);

        if !matrix.iter().all(|v| v.is_finite()) || matrix.determinant().abs() < 1e-12 {
            return Err(Error::IllConditionedHomography(
                "solved matrix is not invertible".into(),
            ));
        }

        Ok(Calibration::Homography { matrix })
    }

    #[inline]
    pub fn meters_per_pixel(&self) -> Option<f32> {
        match self {
            Calibration::Scale { meters_per_pixel } => Some(*meters_per_pixel),
            Calibration::Homography { .. } => None,
        }
    }

    /// World-plane coordinate of an image point, `None` if the point maps to
    /// infinity (on or near the horizon of the calibrated plane).
    pub fn pixel_to_world(&self, p: na::Point2<f32>) -> Option<na::Point2<f32>> {
        match self {
            Calibration::Scale { meters_per_pixel } => {
                Some(na::Point2::from(p.coords * *meters_per_pixel))
            }
            Calibration::Homography { matrix } => {
                let v = matrix * na::Vector3::new(p.x as f64, p.y as f64, 1.0);

                if v.z.abs() < 1e-12 {
                    return None;
                }

                Some(na::Point2::new((v.x / v.z) as f32, (v.y / v.z) as f32))
            }
        }
    }

    pub fn world_distance(&self, a: na::Point2<f32>, b: na::Point2<f32>) -> Option<f32> {
        Some(na::distance(
            &self.pixel_to_world(a)?,
            &self.pixel_to_world(b)?,
        ))
    }

    /// World position of the box's ground-contact point.
    #[inline]
    pub fn ground_point(&self, bbox: &BBox<Ltrb>) -> Option<na::Point2<f32>> {
        self.pixel_to_world(bbox.ground_contact())
    }
}

fn check_general_position(points: &[na::Point2<f64>; 4], what: &str) -> Result<(), Error> {
    const TRIPLES: [(usize, usize, usize); 4] = [(0, 1, 2), (0, 1, 3), (0, 2, 3), (1, 2, 3)];

    for (i, j, k) in TRIPLES {
        let (p, q, r) = (points[i], points[j], points[k]);
        let area = ((q - p).perp(&(r - p)) * 0.5).abs();
        let longest = na::distance_squared(&p, &q)
            .max(na::distance_squared(&q, &r))
            .max(na::distance_squared(&p, &r));

        if !area.is_finite() || longest <= 0.0 || area / longest < COLLINEAR_RATIO {
            return Err(Error::IllConditionedHomography(format!(
                "{} points {}, {}, {} are near-collinear",
                what, i, j, k
            )));
        }
    }

    Ok(())
}

/// Serializable description of a calibration as drawn by the user.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CalibrationSpec {
    TwoPoint {
        a: [f32; 2],
        b: [f32; 2],
        meters: f32,
    },
    Homography {
        pixels: [[f32; 2]; 4],
        world: [[f32; 2]; 4],
    },
}

impl CalibrationSpec {
    pub fn build(&self) -> Result<Calibration, Error> {
        let pt = |p: &[f32; 2]| na::Point2::new(p[0], p[1]);

        match self {
            CalibrationSpec::TwoPoint { a, b, meters } => {
                Calibration::from_two_points(pt(a), pt(b), *meters)
            }
            CalibrationSpec::Homography { pixels, world } => {
                Calibration::from_correspondences(&pixels.map(|p| pt(&p)), &world.map(|p| pt(&p)))
            }
        }
    }
}
