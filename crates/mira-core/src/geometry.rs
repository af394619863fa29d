//! Capsule geometry for torso and hand avoidance
//!
//! A capsule is a segment swept by a sphere. Only the queries the arm
//! solver needs are provided: closest points, point push-out and
//! capsule-vs-capsule penetration.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::math::{safe_normalize, EPSILON};

/// Closest point to `p` on the segment `[a, b]`
pub fn closest_point_on_segment(p: Vec3, a: Vec3, b: Vec3) -> Vec3 {
    let ab = b - a;
    let len_sq = ab.length_squared();
    if len_sq < EPSILON {
        return a;
    }
    let t = ((p - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    a + ab * t
}

/// Closest points between segments `[p1, q1]` and `[p2, q2]`.
///
/// Returns `(on_first, on_second)`. Degenerate (point-like) segments are
/// handled by collapsing to the point case.
pub fn closest_points_between_segments(p1: Vec3, q1: Vec3, p2: Vec3, q2: Vec3) -> (Vec3, Vec3) {
    let d1 = q1 - p1;
    let d2 = q2 - p2;
    let r = p1 - p2;
    let a = d1.length_squared();
    let e = d2.length_squared();
    let f = d2.dot(r);

    if a < EPSILON && e < EPSILON {
        return (p1, p2);
    }

    let (s, t) = if a < EPSILON {
        (0.0, (f / e).clamp(0.0, 1.0))
    } else {
        let c = d1.dot(r);
        if e < EPSILON {
            ((-c / a).clamp(0.0, 1.0), 0.0)
        } else {
            let b = d1.dot(d2);
            let denom = a * e - b * b;
            // Parallel segments: any s works, pick the start
            let mut s = if denom > EPSILON {
                ((b * f - c * e) / denom).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let mut t = (b * s + f) / e;
            if t < 0.0 {
                t = 0.0;
                s = (-c / a).clamp(0.0, 1.0);
            } else if t > 1.0 {
                t = 1.0;
                s = ((b - c) / a).clamp(0.0, 1.0);
            }
            (s, t)
        }
    };

    (p1 + d1 * s, p2 + d2 * t)
}

/// Segment with a radius
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Capsule {
    pub start: Vec3,
    pub end: Vec3,
    pub radius: f32,
}

impl Capsule {
    pub fn new(start: Vec3, end: Vec3, radius: f32) -> Self {
        Self {
            start,
            end,
            radius: radius.max(0.0),
        }
    }

    /// Axis direction, or `fallback` for a point-like capsule
    pub fn axis(&self, fallback: Vec3) -> Vec3 {
        safe_normalize(self.end - self.start, fallback)
    }

    /// Closest point on the capsule's core segment
    pub fn closest_point(&self, p: Vec3) -> Vec3 {
        closest_point_on_segment(p, self.start, self.end)
    }

    /// Distance from `p` to the capsule surface (negative inside)
    pub fn signed_distance(&self, p: Vec3) -> f32 {
        (p - self.closest_point(p)).length() - self.radius
    }

    /// True when `p` lies strictly inside the capsule
    pub fn contains(&self, p: Vec3) -> bool {
        self.signed_distance(p) < 0.0
    }

    /// Move `p` onto the capsule surface if it is inside, otherwise return it unchanged.
    ///
    /// A point sitting exactly on the core segment is pushed along `fallback`.
    pub fn push_out(&self, p: Vec3, fallback: Vec3) -> Vec3 {
        let core = self.closest_point(p);
        let offset = p - core;
        if offset.length_squared() >= self.radius * self.radius {
            return p;
        }
        core + safe_normalize(offset, fallback) * self.radius
    }

    /// Vector that moves `other` out of `self`, if the two overlap.
    ///
    /// The direction points from the closest point on `self` toward the
    /// closest point on `other`; coincident cores push along `fallback`.
    pub fn penetration(&self, other: &Capsule, fallback: Vec3) -> Option<Vec3> {
        let (on_self, on_other) =
            closest_points_between_segments(self.start, self.end, other.start, other.end);
        let delta = on_other - on_self;
        let distance = delta.length();
        let reach = self.radius + other.radius;
        if distance >= reach {
            return None;
        }
        Some(safe_normalize(delta, fallback) * (reach - distance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn approx_vec(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-4
    }

    #[test]
    fn test_closest_point_on_segment() {
        let p = closest_point_on_segment(Vec3::new(0.5, 1.0, 0.0), Vec3::ZERO, Vec3::X);
        assert!(approx_vec(p, Vec3::new(0.5, 0.0, 0.0)));
        let p = closest_point_on_segment(Vec3::new(2.0, 1.0, 0.0), Vec3::ZERO, Vec3::X);
        assert!(approx_vec(p, Vec3::X));
    }

    #[test]
    fn test_closest_points_crossing_segments() {
        let (a, b) = closest_points_between_segments(
            Vec3::new(-1.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, -1.0, 1.0),
            Vec3::new(0.0, 1.0, 1.0),
        );
        assert!(approx_vec(a, Vec3::ZERO));
        assert!(approx_vec(b, Vec3::new(0.0, 0.0, 1.0)));
    }

    #[test]
    fn test_closest_points_parallel_and_degenerate() {
        let (a, b) = closest_points_between_segments(
            Vec3::ZERO,
            Vec3::X,
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
        );
        assert!(((a - b).length() - 1.0).abs() < 1e-4);

        let (a, b) = closest_points_between_segments(Vec3::ZERO, Vec3::ZERO, Vec3::Y, Vec3::Y);
        assert_eq!((a, b), (Vec3::ZERO, Vec3::Y));
    }

    #[test]
    fn test_capsule_push_out() {
        let capsule = Capsule::new(Vec3::ZERO, Vec3::Y, 0.5);
        let pushed = capsule.push_out(Vec3::new(0.1, 0.5, 0.0), Vec3::Z);
        assert!(approx_vec(pushed, Vec3::new(0.5, 0.5, 0.0)));

        // Outside: unchanged
        let outside = Vec3::new(2.0, 0.5, 0.0);
        assert_eq!(capsule.push_out(outside, Vec3::Z), outside);

        // On the core segment: fallback direction
        let pushed = capsule.push_out(Vec3::new(0.0, 0.5, 0.0), Vec3::Z);
        assert!(approx_vec(pushed, Vec3::new(0.0, 0.5, 0.5)));
    }

    #[test]
    fn test_capsule_penetration() {
        let torso = Capsule::new(Vec3::ZERO, Vec3::Y, 0.3);
        let hand = Capsule::new(Vec3::new(0.4, 0.5, 0.0), Vec3::new(0.6, 0.5, 0.0), 0.2);
        let push = torso.penetration(&hand, Vec3::Z).expect("overlapping");
        assert!(approx_vec(push, Vec3::new(0.1, 0.0, 0.0)));

        let far = Capsule::new(Vec3::new(2.0, 0.5, 0.0), Vec3::new(3.0, 0.5, 0.0), 0.2);
        assert!(torso.penetration(&far, Vec3::Z).is_none());
    }

    fn point() -> impl Strategy<Value = Vec3> {
        (-3.0f32..3.0, -3.0f32..3.0, -3.0f32..3.0).prop_map(|(x, y, z)| Vec3::new(x, y, z))
    }

    proptest! {
        #[test]
        fn prop_segment_closest_points_beat_sampling(
            p1 in point(),
            q1 in point(),
            p2 in point(),
            q2 in point(),
        ) {
            let (a, b) = closest_points_between_segments(p1, q1, p2, q2);
            prop_assert!(approx_vec(closest_point_on_segment(a, p1, q1), a));
            prop_assert!(approx_vec(closest_point_on_segment(b, p2, q2), b));

            let found = a.distance(b);
            let steps = 16;
            for i in 0..=steps {
                let x = p1.lerp(q1, i as f32 / steps as f32);
                for j in 0..=steps {
                    let y = p2.lerp(q2, j as f32 / steps as f32);
                    prop_assert!(found <= x.distance(y) + 1e-3);
                }
            }
        }
    }
}
