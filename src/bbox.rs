use nalgebra as na;
use serde_derive::{Deserialize, Serialize};
use std::marker::PhantomData;

pub trait BBoxFormat: std::fmt::Debug + Copy + PartialEq {}

/// Left-top-right-bottom format, contains left top and right bottom corners
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct Ltrb;
impl BBoxFormat for Ltrb {}

/// Serialized as a plain `[f32; 4]` in the order of its format.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
#[serde(transparent)]
pub struct BBox<F: BBoxFormat>([f32; 4], #[serde(skip)] PhantomData<F>);

impl<F: BBoxFormat> BBox<F> {
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }
}

impl BBox<Ltrb> {
    #[inline]
    pub fn ltrb(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
        BBox([x_min, y_min, x_max, y_max], PhantomData)
    }

    #[inline(always)]
    pub fn left(&self) -> f32 {
        self.0[0]
    }

    #[inline(always)]
    pub fn top(&self) -> f32 {
        self.0[1]
    }

    #[inline(always)]
    pub fn right(&self) -> f32 {
        self.0[2]
    }

    #[inline(always)]
    pub fn bottom(&self) -> f32 {
        self.0[3]
    }

    #[inline(always)]
    pub fn width(&self) -> f32 {
        self.right() - self.left()
    }

    #[inline(always)]
    pub fn height(&self) -> f32 {
        self.bottom() - self.top()
    }

    #[inline]
    pub fn center(&self) -> na::Point2<f32> {
        na::Point2::new((self.left() + self.right()) * 0.5, (self.top() + self.bottom()) * 0.5)
    }

    /// Bottom-center of the box, where the object touches the road.
    #[inline]
    pub fn ground_contact(&self) -> na::Point2<f32> {
        na::Point2::new((self.left() + self.right()) * 0.5, self.bottom())
    }

    #[inline]
    pub fn diagonal(&self) -> f32 {
        self.width().hypot(self.height())
    }

    /// Per-coordinate blend `factor * next + (1 - factor) * self`.
    #[inline]
    pub fn lerp(&self, next: &BBox<Ltrb>, factor: f32) -> BBox<Ltrb> {
        let mut out = [0.0; 4];
        for (i, v) in out.iter_mut().enumerate() {
            *v = self.0[i] * (1.0 - factor) + next.0[i] * factor;
        }

        BBox(out, PhantomData)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn ground_contact_is_bottom_center() {
        let b = BBox::ltrb(10.0, 20.0, 30.0, 60.0);
        let p = b.ground_contact();

        assert_relative_eq!(p.x, 20.0);
        assert_relative_eq!(p.y, 60.0);
    }

    #[test]
    fn serializes_as_plain_array() {
        let b = BBox::ltrb(1.0, 2.0, 3.0, 4.0);
        let json = serde_json::to_string(&b).unwrap();
        assert_eq!(json, "[1.0,2.0,3.0,4.0]");

        let back: BBox<Ltrb> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, b);
    }
}
