//! Numerically guarded math helpers
//!
//! Every helper here is total: degenerate inputs (zero-length vectors,
//! near-zero denominators, non-finite scales) fall back to a safe default
//! instead of producing NaN or infinity.

use glam::{Mat4, Quat, Vec3};

/// Squared-length gate used by the axis fallback chains
pub const EPSILON: f32 = 1e-6;

/// Denominator guard used by scale divisions
pub const SCALE_EPSILON: f32 = 1e-5;

/// World up axis (right-handed, +Y up)
pub const UP: Vec3 = Vec3::Y;

/// Normalize `v`, or return `fallback` when `v` is too short to carry a direction
#[inline]
pub fn safe_normalize(v: Vec3, fallback: Vec3) -> Vec3 {
    let len_sq = v.length_squared();
    if len_sq < EPSILON || !len_sq.is_finite() {
        fallback
    } else {
        v / len_sq.sqrt()
    }
}

/// Replace a near-zero denominator by an epsilon carrying the same sign
#[inline]
pub fn guard_denominator(d: f32, epsilon: f32) -> f32 {
    if d.abs() < epsilon {
        if d.is_sign_negative() {
            -epsilon
        } else {
            epsilon
        }
    } else {
        d
    }
}

/// Division that never divides by (signed) zero
#[inline]
pub fn safe_divide(numerator: f32, denominator: f32) -> f32 {
    numerator / guard_denominator(denominator, SCALE_EPSILON)
}

/// Component-wise [`safe_divide`]
#[inline]
pub fn safe_divide_vec3(numerator: Vec3, denominator: Vec3) -> Vec3 {
    Vec3::new(
        safe_divide(numerator.x, denominator.x),
        safe_divide(numerator.y, denominator.y),
        safe_divide(numerator.z, denominator.z),
    )
}

/// `acos` with its argument clamped to [-1, 1]
#[inline]
pub fn clamped_acos(c: f32) -> f32 {
    c.clamp(-1.0, 1.0).acos()
}

/// Law of cosines: the angle between sides `a` and `b` of a triangle whose
/// third side (opposite the angle) has length `opposite`.
///
/// Returns 0 when either adjacent side is degenerate.
pub fn triangle_angle(opposite: f32, a: f32, b: f32) -> f32 {
    let denom = 2.0 * a * b;
    if denom.abs() < EPSILON {
        return 0.0;
    }
    clamped_acos((a * a + b * b - opposite * opposite) / denom)
}

/// Unsigned angle between two vectors, 0 if either is degenerate
pub fn angle_between(a: Vec3, b: Vec3) -> f32 {
    let denom = (a.length_squared() * b.length_squared()).sqrt();
    if denom < EPSILON {
        return 0.0;
    }
    clamped_acos(a.dot(b) / denom)
}

/// Signed angle from `from` to `to` around `axis` (both projected onto the axis plane)
pub fn signed_angle_about(from: Vec3, to: Vec3, axis: Vec3) -> f32 {
    let axis = safe_normalize(axis, UP);
    let a = project_on_plane(from, axis);
    let b = project_on_plane(to, axis);
    if a.length_squared() < EPSILON || b.length_squared() < EPSILON {
        return 0.0;
    }
    axis.dot(a.cross(b)).atan2(a.dot(b))
}

/// Remove the component of `v` along the unit vector `normal`
#[inline]
pub fn project_on_plane(v: Vec3, normal: Vec3) -> Vec3 {
    v - normal * v.dot(normal)
}

/// Shortest-arc rotation taking direction `from` onto direction `to`.
///
/// Identity when either direction is degenerate.
pub fn from_to_rotation(from: Vec3, to: Vec3) -> Quat {
    match (from.try_normalize(), to.try_normalize()) {
        (Some(f), Some(t)) => Quat::from_rotation_arc(f, t),
        _ => Quat::IDENTITY,
    }
}

/// Normalize a quaternion, falling back to identity for degenerate input
#[inline]
pub fn safe_quat(q: Quat) -> Quat {
    let len_sq = q.length_squared();
    if len_sq < EPSILON || !len_sq.is_finite() {
        Quat::IDENTITY
    } else {
        q / len_sq.sqrt()
    }
}

/// Angle of the relative rotation between two orientations
pub fn quat_angle(a: Quat, b: Quat) -> f32 {
    2.0 * clamped_acos(a.dot(b).abs())
}

/// Split `rotation` into `(swing, twist)` with `rotation = swing * twist` and
/// `twist` a rotation about `twist_axis`.
pub fn swing_twist(rotation: Quat, twist_axis: Vec3) -> (Quat, Quat) {
    let axis = safe_normalize(twist_axis, UP);
    let projected = axis * rotation.xyz().dot(axis);
    let twist = Quat::from_xyzw(projected.x, projected.y, projected.z, rotation.w);
    if twist.length_squared() < EPSILON {
        // 180 degree swing: no twist component is recoverable
        return (rotation, Quat::IDENTITY);
    }
    let twist = twist.normalize();
    (rotation * twist.inverse(), twist)
}

/// Limit `desired` to at most `max_angle` radians away from `reference`.
///
/// When the limit is exceeded the result keeps the direction of the delta
/// (via slerp) and sits exactly at the limit.
pub fn clamp_rotation_towards(desired: Quat, reference: Quat, max_angle: f32) -> Quat {
    let desired = if reference.dot(desired) < 0.0 {
        -desired
    } else {
        desired
    };
    let angle = quat_angle(reference, desired);
    if angle <= max_angle || angle < EPSILON {
        return desired;
    }
    reference.slerp(desired, (max_angle / angle).max(0.0))
}

/// Replace non-finite or non-positive components by 1
pub fn sanitize_scale(scale: Vec3) -> Vec3 {
    Vec3::new(
        sanitize_scalar(scale.x),
        sanitize_scalar(scale.y),
        sanitize_scalar(scale.z),
    )
}

/// Replace a non-finite or non-positive scale by 1
#[inline]
pub fn sanitize_scalar(s: f32) -> f32 {
    if s.is_finite() && s > 0.0 {
        s
    } else {
        1.0
    }
}

/// Approximate world scale of a local-to-world transform (column lengths)
pub fn approximate_world_scale(local_to_world: &Mat4) -> Vec3 {
    Vec3::new(
        local_to_world.x_axis.truncate().length(),
        local_to_world.y_axis.truncate().length(),
        local_to_world.z_axis.truncate().length(),
    )
}

/// Yaw-only rotation turning +Z at `from` toward `to`.
///
/// A zero-length horizontal offset yields yaw 0.
pub fn yaw_facing(from: Vec3, to: Vec3) -> Quat {
    let d = to - from;
    let horizontal_sq = d.x * d.x + d.z * d.z;
    let yaw = if horizontal_sq < EPSILON {
        0.0
    } else {
        d.x.atan2(d.z)
    };
    Quat::from_rotation_y(yaw)
}

/// True when every component of the vector is finite
#[inline]
pub fn vec_is_finite(v: Vec3) -> bool {
    v.x.is_finite() && v.y.is_finite() && v.z.is_finite()
}

/// True when every component of the quaternion is finite
#[inline]
pub fn quat_is_finite(q: Quat) -> bool {
    q.x.is_finite() && q.y.is_finite() && q.z.is_finite() && q.w.is_finite()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::f32::consts::{FRAC_PI_2, FRAC_PI_3, PI};

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn test_safe_normalize_fallback() {
        assert_eq!(safe_normalize(Vec3::ZERO, Vec3::X), Vec3::X);
        let n = safe_normalize(Vec3::new(0.0, 3.0, 4.0), Vec3::X);
        assert!(approx(n.length(), 1.0));
        assert!(approx(n.y, 0.6));
    }

    #[test]
    fn test_safe_divide_signed_epsilon() {
        assert!(safe_divide(1.0, 0.0) > 0.0);
        assert!(safe_divide(1.0, -0.0) < 0.0);
        assert!(safe_divide(1.0, 0.0).is_finite());
        assert!(approx(safe_divide(3.0, 2.0), 1.5));
    }

    #[test]
    fn test_triangle_angle_equilateral() {
        assert!(approx(triangle_angle(1.0, 1.0, 1.0), FRAC_PI_3));
    }

    #[test]
    fn test_triangle_angle_overshoot_is_clamped() {
        // Opposite side longer than a + b: fully open
        assert!(approx(triangle_angle(5.0, 1.0, 1.0), PI));
        // Opposite side zero: fully closed
        assert!(approx(triangle_angle(0.0, 1.0, 1.0), 0.0));
        // Degenerate adjacent side
        assert_eq!(triangle_angle(1.0, 0.0, 1.0), 0.0);
    }

    #[test]
    fn test_from_to_rotation_degenerate() {
        assert_eq!(from_to_rotation(Vec3::ZERO, Vec3::X), Quat::IDENTITY);
        let q = from_to_rotation(Vec3::X, Vec3::Y);
        assert!((q * Vec3::X - Vec3::Y).length() < 1e-5);
    }

    #[test]
    fn test_swing_twist_recomposes() {
        let rotation = Quat::from_rotation_y(0.7) * Quat::from_rotation_x(0.4);
        let (swing, twist) = swing_twist(rotation, Vec3::Y);
        let recomposed = swing * twist;
        assert!(quat_angle(recomposed, rotation) < 2e-3);
        // Twist is about Y only
        let axis = twist.xyz();
        assert!(axis.x.abs() < 1e-5 && axis.z.abs() < 1e-5);
    }

    #[test]
    fn test_clamp_rotation_caps_at_limit() {
        let reference = Quat::IDENTITY;
        let desired = Quat::from_rotation_z(FRAC_PI_2);
        let clamped = clamp_rotation_towards(desired, reference, 0.3);
        assert!(approx(quat_angle(reference, clamped), 0.3));

        // Direction preserved: still rotating about +Z
        let v = clamped * Vec3::X;
        assert!(v.y > 0.0 && v.z.abs() < 1e-5);

        // Within the limit: untouched
        let small = Quat::from_rotation_z(0.1);
        assert_eq!(clamp_rotation_towards(small, reference, 0.3), small);
    }

    #[test]
    fn test_sanitize_scale() {
        let s = sanitize_scale(Vec3::new(0.0, -2.0, f32::NAN));
        assert_eq!(s, Vec3::ONE);
        assert_eq!(sanitize_scale(Vec3::splat(2.0)), Vec3::splat(2.0));
    }

    #[test]
    fn test_approximate_world_scale() {
        let m = Mat4::from_scale_rotation_translation(
            Vec3::new(2.0, 3.0, 4.0),
            Quat::from_rotation_y(1.0),
            Vec3::new(5.0, 0.0, 0.0),
        );
        let s = approximate_world_scale(&m);
        assert!(approx(s.x, 2.0) && approx(s.y, 3.0) && approx(s.z, 4.0));
    }

    #[test]
    fn test_yaw_facing() {
        let q = yaw_facing(Vec3::ZERO, Vec3::new(1.0, 5.0, 0.0));
        assert!((q * Vec3::Z - Vec3::X).length() < 1e-5);

        // Camera straight above: yaw defaults to 0
        let q = yaw_facing(Vec3::ZERO, Vec3::new(0.0, 5.0, 0.0));
        assert_eq!(q, Quat::from_rotation_y(0.0));
    }

    #[test]
    fn test_signed_angle_about() {
        let a = signed_angle_about(Vec3::X, Vec3::Z, Vec3::Y);
        assert!(approx(a, -FRAC_PI_2));
        assert_eq!(signed_angle_about(Vec3::Y, Vec3::X, Vec3::Y), 0.0);
    }

    fn rotation() -> impl Strategy<Value = Quat> {
        (-1.0f32..1.0, -1.0f32..1.0, -1.0f32..1.0, -PI..PI).prop_map(|(x, y, z, angle)| {
            Quat::from_axis_angle(safe_normalize(Vec3::new(x, y, z), UP), angle)
        })
    }

    proptest! {
        #[test]
        fn prop_clamp_rotation_stays_within_limit(
            desired in rotation(),
            reference in rotation(),
            max_angle in 0.01f32..PI,
        ) {
            let clamped = clamp_rotation_towards(desired, reference, max_angle);
            prop_assert!((clamped.length() - 1.0).abs() < 1e-3);
            prop_assert!(quat_angle(clamped, reference) <= max_angle + 2e-3);
            if quat_angle(desired, reference) <= max_angle {
                prop_assert!(quat_angle(clamped, desired) < 2e-3);
            }
        }
    }
}
