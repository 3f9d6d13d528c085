use nalgebra as na;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Collinear,
    Clockwise,
    CounterClockwise,
}

/// Ray casting test, the polygon is closed implicitly.
pub fn in_bounds(p: na::Point2<f32>, poly: &[na::Point2<f32>]) -> bool {
    let n = poly.len();
    if n < 3 {
        return false;
    }

    let mut inside = false;
    let mut p1 = poly[0];
    let mut xints = 0.0;

    for i in 1..=n {
        let p2 = poly[i % n];

        if p.y > f32::min(p1.y, p2.y) && p.y <= f32::max(p1.y, p2.y) && p.x <= f32::max(p1.x, p2.x)
        {
            if (p1.y - p2.y).abs() > f32::EPSILON {
                xints = (p.y - p1.y) * (p2.x - p1.x) / (p2.y - p1.y) + p1.x;
            }

            if (p1.x - p2.x).abs() < f32::EPSILON || p.x <= xints {
                inside = !inside;
            }
        }

        p1 = p2;
    }

    inside
}

#[inline]
pub fn cross(o: na::Point2<f32>, a: na::Point2<f32>, b: na::Point2<f32>) -> f32 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

pub fn orientation(p: na::Point2<f32>, q: na::Point2<f32>, r: na::Point2<f32>) -> Orientation {
    let val = (q.y - p.y) * (r.x - q.x) - (q.x - p.x) * (r.y - q.y);

    if val.abs() <= f32::EPSILON {
        Orientation::Collinear
    } else if val > 0.0 {
        Orientation::Clockwise
    } else {
        Orientation::CounterClockwise
    }
}

/// `r` lies within the bounding rectangle of segment `p-q`; collinearity is checked by the caller.
#[inline]
fn on_segment(p: na::Point2<f32>, q: na::Point2<f32>, r: na::Point2<f32>) -> bool {
    r.x <= p.x.max(q.x) && r.x >= p.x.min(q.x) && r.y <= p.y.max(q.y) && r.y >= p.y.min(q.y)
}

pub fn segments_intersect(
    p1: na::Point2<f32>,
    q1: na::Point2<f32>,
    p2: na::Point2<f32>,
    q2: na::Point2<f32>,
) -> bool {
    let o1 = orientation(p1, q1, p2);
    let o2 = orientation(p1, q1, q2);
    let o3 = orientation(p2, q2, p1);
    let o4 = orientation(p2, q2, q1);

    if o1 != o2 && o3 != o4 {
        return true;
    }

    (o1 == Orientation::Collinear && on_segment(p1, q1, p2))
        || (o2 == Orientation::Collinear && on_segment(p1, q1, q2))
        || (o3 == Orientation::Collinear && on_segment(p2, q2, p1))
        || (o4 == Orientation::Collinear && on_segment(p2, q2, q1))
}

/// Shoelace formula; positive for counter-clockwise winding in a y-up frame.
pub fn signed_area(poly: &[na::Point2<f32>]) -> f32 {
    let n = poly.len();
    let mut sum = 0.0;

    for i in 0..n {
        let (a, b) = (poly[i], poly[(i + 1) % n]);
        sum += a.x * b.y - b.x * a.y;
    }

    sum * 0.5
}

/// Returns the first pair of non-adjacent edges that cross each other.
pub fn find_self_intersection(poly: &[na::Point2<f32>]) -> Option<(usize, usize)> {
    let n = poly.len();

    for i in 0..n {
        let (a1, a2) = (poly[i], poly[(i + 1) % n]);

        for j in (i + 1)..n {
            // edges sharing a vertex
            if j == i + 1 || (i == 0 && j == n - 1) {
                continue;
            }

            let (b1, b2) = (poly[j], poly[(j + 1) % n]);
            if segments_intersect(a1, a2, b1, b2) {
                return Some((i, j));
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<na::Point2<f32>> {
        vec![
            na::Point2::new(0.0, 0.0),
            na::Point2::new(10.0, 0.0),
            na::Point2::new(10.0, 10.0),
            na::Point2::new(0.0, 10.0),
        ]
    }

    #[test]
    fn point_in_square() {
        let poly = square();

        assert!(in_bounds(na::Point2::new(5.0, 5.0), &poly));
        assert!(!in_bounds(na::Point2::new(15.0, 5.0), &poly));
        assert!(!in_bounds(na::Point2::new(5.0, -1.0), &poly));
    }

    #[test]
    fn crossing_segments() {
        let a = na::Point2::new(0.0, 0.0);
        let b = na::Point2::new(10.0, 10.0);

        assert!(segments_intersect(
            a,
            b,
            na::Point2::new(0.0, 10.0),
            na::Point2::new(10.0, 0.0)
        ));
        assert!(!segments_intersect(
            a,
            b,
            na::Point2::new(20.0, 0.0),
            na::Point2::new(30.0, 0.0)
        ));
    }

    #[test]
    fn bow_tie_self_intersects() {
        let bow_tie = vec![
            na::Point2::new(0.0, 0.0),
            na::Point2::new(10.0, 10.0),
            na::Point2::new(10.0, 0.0),
            na::Point2::new(0.0, 10.0),
        ];

        assert!(find_self_intersection(&bow_tie).is_some());
        assert!(find_self_intersection(&square()).is_none());
        assert_eq!(signed_area(&square()), 100.0);
    }
}
