//! Two-Bone IK - analytic root/mid/tip solve
//!
//! The mid joint's bend angle comes from the law of cosines, comparing the
//! current root→tip triangle with the desired root→target triangle. The root
//! then swings the chain onto the target and an optional hint rotates the
//! bend plane about the root→tip axis.

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use mira_core::{
    from_to_rotation, quat_is_finite, safe_quat, signed_angle_about, triangle_angle,
    vec_is_finite, IkTarget, JointPose, MiraError, MiraResult, EPSILON, UP,
};

/// Fraction of the squared reach the projected root→mid vector must exceed
/// before the hint pass is allowed to swing the bend plane.
const HINT_PLANE_FRACTION: f32 = 0.001;

/// Which candidate of the axis fallback chain drove the mid rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AxisSource {
    /// Configured bend normal
    BendNormal,
    /// Current bend plane (root→mid × mid→tip)
    BendPlane,
    /// Root→hint × mid→tip
    Hint,
    /// Root→target × mid→tip
    Target,
    /// World up
    Up,
}

/// Tuning for [`TwoBoneChain::solve`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TwoBoneSettings {
    /// World-space bend normal tried before the current bend plane.
    ///
    /// Its sign is aligned with the current bend plane when one exists so
    /// the solve never opens a joint it was asked to close.
    pub bend_normal: Option<Vec3>,
    /// Blend of the hint pass, 0 disables it
    pub hint_weight: f32,
    /// Squared-length gate for the axis candidates
    pub epsilon: f32,
}

impl Default for TwoBoneSettings {
    fn default() -> Self {
        Self {
            bend_normal: None,
            hint_weight: 1.0,
            epsilon: EPSILON,
        }
    }
}

impl TwoBoneSettings {
    pub fn with_bend_normal(mut self, normal: Vec3) -> Self {
        self.bend_normal = Some(normal);
        self
    }

    pub fn validate(&self) -> MiraResult<()> {
        if !(0.0..=1.0).contains(&self.hint_weight) {
            return Err(MiraError::config(format!(
                "hint_weight must be in [0, 1], got {}",
                self.hint_weight
            )));
        }
        if !(self.epsilon > 0.0 && self.epsilon.is_finite()) {
            return Err(MiraError::config("two-bone epsilon must be positive"));
        }
        Ok(())
    }
}

/// Result of one two-bone solve
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TwoBoneReport {
    /// Sum of both bone lengths
    pub reach: f32,
    /// Root→target distance requested
    pub target_distance: f32,
    /// Axis candidate used for the mid rotation
    pub axis_source: AxisSource,
}

impl TwoBoneReport {
    /// True when the target lies beyond the chain's reach
    pub fn is_saturated(&self) -> bool {
        self.target_distance > self.reach
    }
}

/// Three joint records forming a two-bone chain.
///
/// Rotating a joint carries every joint below it in the chain, matching how
/// a scene graph would propagate the change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TwoBoneChain {
    pub root: JointPose,
    pub mid: JointPose,
    pub tip: JointPose,
}

impl TwoBoneChain {
    pub fn new(root: JointPose, mid: JointPose, tip: JointPose) -> Self {
        Self { root, mid, tip }
    }

    pub fn upper_length(&self) -> f32 {
        self.root.position.distance(self.mid.position)
    }

    pub fn lower_length(&self) -> f32 {
        self.mid.position.distance(self.tip.position)
    }

    pub fn reach(&self) -> f32 {
        self.upper_length() + self.lower_length()
    }

    /// Rotate the mid joint in place, carrying the tip
    pub fn rotate_mid(&mut self, rotation: Quat) {
        let pivot = self.mid.position;
        self.mid.rotation = rotation * self.mid.rotation;
        self.tip.rotate_about(pivot, rotation);
    }

    /// Rotate the root in place, carrying mid and tip
    pub fn rotate_root(&mut self, rotation: Quat) {
        let pivot = self.root.position;
        self.root.rotation = rotation * self.root.rotation;
        self.mid.rotate_about(pivot, rotation);
        self.tip.rotate_about(pivot, rotation);
    }

    /// Rigidly swing the whole chain about `axis` through the root
    pub fn swing(&mut self, axis: Vec3, angle: f32) {
        match axis.try_normalize() {
            Some(axis) if angle.is_finite() => self.rotate_root(Quat::from_axis_angle(axis, angle)),
            _ => {}
        }
    }

    /// Solve the chain toward an [`IkTarget`], using its hint when present
    pub fn solve(
        &mut self,
        target: &IkTarget,
        tip_offset: Quat,
        settings: &TwoBoneSettings,
    ) -> TwoBoneReport {
        self.solve_towards(
            target.position,
            target.rotation,
            target.hint_position(),
            tip_offset,
            settings,
        )
    }

    /// Solve the chain toward `target_position`.
    ///
    /// The tip ends at the target when it is reachable, otherwise fully
    /// extended toward it. The tip orientation is set to
    /// `target_rotation * tip_offset` regardless of reach. Non-finite
    /// targets leave the chain untouched.
    pub fn solve_towards(
        &mut self,
        target_position: Vec3,
        target_rotation: Quat,
        hint: Option<Vec3>,
        tip_offset: Quat,
        settings: &TwoBoneSettings,
    ) -> TwoBoneReport {
        let a = self.root.position;
        let b = self.mid.position;
        let c = self.tip.position;

        let ab = b - a;
        let bc = c - b;
        let ac = c - a;
        let at = target_position - a;

        let ab_len = ab.length();
        let bc_len = bc.length();
        let at_len = at.length();
        let reach = ab_len + bc_len;

        if !vec_is_finite(target_position) {
            return TwoBoneReport {
                reach,
                target_distance: at_len,
                axis_source: AxisSource::Up,
            };
        }

        let hint = hint.filter(|h| vec_is_finite(*h));

        let current_angle = triangle_angle(ac.length(), ab_len, bc_len);
        let desired_angle = triangle_angle(at_len, ab_len, bc_len);

        let (axis, axis_source) = bend_axis(ab, bc, at, hint.map(|h| h - a), settings);
        self.rotate_mid(Quat::from_axis_angle(axis, current_angle - desired_angle));

        // Swing the root so root→tip points at the target
        let ac = self.tip.position - a;
        self.rotate_root(from_to_rotation(ac, at));

        if let Some(hint) = hint {
            self.apply_hint(hint, reach, settings.hint_weight);
        }

        let rotation = target_rotation * tip_offset;
        self.tip.rotation = if quat_is_finite(rotation) {
            safe_quat(rotation)
        } else {
            self.tip.rotation
        };

        TwoBoneReport {
            reach,
            target_distance: at_len,
            axis_source,
        }
    }

    /// Swing the bend plane about root→tip toward the hint
    fn apply_hint(&mut self, hint: Vec3, reach: f32, weight: f32) {
        if weight <= 0.0 {
            return;
        }
        let a = self.root.position;
        let ac = self.tip.position - a;
        let Some(axis) = ac.try_normalize() else {
            return;
        };

        let ab = self.mid.position - a;
        let ah = hint - a;
        let ab_proj = ab - axis * ab.dot(axis);
        let ah_proj = ah - axis * ah.dot(axis);

        if ab_proj.length_squared() > reach * reach * HINT_PLANE_FRACTION
            && ah_proj.length_squared() > EPSILON
        {
            let angle = signed_angle_about(ab_proj, ah_proj, axis) * weight.min(1.0);
            self.rotate_root(Quat::from_axis_angle(axis, angle));
        }
    }
}

/// Pick the mid rotation axis from the fallback chain
fn bend_axis(
    ab: Vec3,
    bc: Vec3,
    at: Vec3,
    ah: Option<Vec3>,
    settings: &TwoBoneSettings,
) -> (Vec3, AxisSource) {
    let gate = settings.epsilon;
    let plane = ab.cross(bc);

    if let Some(normal) = settings.bend_normal {
        if normal.length_squared() >= gate && vec_is_finite(normal) {
            let normal = normal.normalize();
            let aligned = if plane.length_squared() >= gate && normal.dot(plane) < 0.0 {
                -normal
            } else {
                normal
            };
            return (aligned, AxisSource::BendNormal);
        }
    }

    if plane.length_squared() >= gate {
        return (plane.normalize(), AxisSource::BendPlane);
    }

    if let Some(ah) = ah {
        let axis = ah.cross(bc);
        if axis.length_squared() >= gate {
            return (axis.normalize(), AxisSource::Hint);
        }
    }

    let axis = at.cross(bc);
    if axis.length_squared() >= gate {
        return (axis.normalize(), AxisSource::Target);
    }

    (UP, AxisSource::Up)
}
