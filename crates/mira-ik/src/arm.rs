//! Arm solve with torso avoidance
//!
//! Wraps the two-bone solve for shoulder→elbow→wrist chains. The hand target
//! is corrected against a torso capsule before solving, and the elbow is
//! swung out of the torso afterwards if it still penetrates.

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use mira_core::{
    project_on_plane, safe_normalize, signed_angle_about, Capsule, IkHint, IkTarget, MiraError,
    MiraResult, UP,
};

use crate::two_bone::{TwoBoneChain, TwoBoneReport, TwoBoneSettings};

/// How the hand target is kept out of the torso
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TorsoAvoidance {
    /// Hand capsule vs torso capsule; the hint takes a share of the push
    CapsulePenetration,
    /// Target point pushed out of the torso; the hint blends toward its own push-out
    PointPushOut,
}

/// Arm collision settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArmConfig {
    /// Enables target correction against the torso capsule
    pub avoid_torso: bool,
    pub avoidance: TorsoAvoidance,
    pub torso_radius: f32,
    /// Extra clearance added to the torso radius
    pub skin: f32,
    pub hand_radius: f32,
    /// Length of the hand capsule along the target's local `hand_axis`
    pub hand_length: f32,
    pub hand_axis: Vec3,
    /// Share of the capsule push applied to the hint
    pub hint_share: f32,
    /// Blend of the hint toward its pushed-out position
    pub hint_blend: f32,
    /// Swing the elbow out of the torso after solving
    pub elbow_protection: bool,
    pub two_bone: TwoBoneSettings,
}

impl Default for ArmConfig {
    fn default() -> Self {
        Self {
            avoid_torso: true,
            avoidance: TorsoAvoidance::CapsulePenetration,
            torso_radius: 0.12,
            skin: 0.02,
            hand_radius: 0.04,
            hand_length: 0.08,
            hand_axis: Vec3::Z,
            hint_share: 0.25,
            hint_blend: 0.6,
            elbow_protection: true,
            two_bone: TwoBoneSettings::default(),
        }
    }
}

impl ArmConfig {
    /// Torso avoidance and elbow protection switched off
    pub fn unconstrained() -> Self {
        Self {
            avoid_torso: false,
            elbow_protection: false,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> MiraResult<()> {
        for (name, value) in [
            ("torso_radius", self.torso_radius),
            ("skin", self.skin),
            ("hand_radius", self.hand_radius),
            ("hand_length", self.hand_length),
        ] {
            if !(value >= 0.0 && value.is_finite()) {
                return Err(MiraError::config(format!(
                    "{name} must be a non-negative finite length, got {value}"
                )));
            }
        }
        for (name, value) in [("hint_share", self.hint_share), ("hint_blend", self.hint_blend)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(MiraError::config(format!(
                    "{name} must be in [0, 1], got {value}"
                )));
            }
        }
        self.two_bone.validate()
    }
}

/// Outcome of one arm solve
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArmReport {
    pub two_bone: TwoBoneReport,
    /// The hand target was moved out of the torso
    pub target_corrected: bool,
    /// The elbow was swung out of the torso and the chain re-solved
    pub elbow_swung: bool,
}

/// Collision-aware arm solver
#[derive(Debug, Clone, Copy, Default)]
pub struct ArmSolver {
    config: ArmConfig,
}

impl ArmSolver {
    pub fn new(config: ArmConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ArmConfig {
        &self.config
    }

    /// Torso capsule from the chest and neck positions
    pub fn torso_capsule(&self, chest: Vec3, neck: Vec3) -> Capsule {
        Capsule::new(chest, neck, self.config.torso_radius + self.config.skin)
    }

    /// Solve an arm chain toward `target`.
    ///
    /// `chest` and `neck` span the torso capsule. The returned report tells
    /// which corrections were applied.
    pub fn solve(
        &self,
        chain: &mut TwoBoneChain,
        target: &IkTarget,
        tip_offset: Quat,
        chest: Vec3,
        neck: Vec3,
    ) -> ArmReport {
        let torso = self.torso_capsule(chest, neck);
        let outward = outward_direction(&torso, chain.root.position);

        let (target, target_corrected) = if self.config.avoid_torso {
            self.avoid_torso(&torso, target, outward)
        } else {
            (*target, false)
        };

        let mut report = chain.solve(&target, tip_offset, &self.config.two_bone);
        let mut elbow_swung = false;

        if self.config.elbow_protection && torso.contains(chain.mid.position) {
            let axis = chain.tip.position - chain.root.position;
            if axis.length_squared() > mira_core::EPSILON {
                let root = chain.root.position;
                let pushed = torso.push_out(chain.mid.position, outward);
                let angle = signed_angle_about(chain.mid.position - root, pushed - root, axis);
                chain.swing(axis, angle);

                // Re-solve to restore the wrist lock, keeping the swung elbow plane
                let relock = IkTarget {
                    hint: Some(IkHint {
                        position: chain.mid.position,
                        rotation: Quat::IDENTITY,
                    }),
                    ..target
                };
                report = chain.solve(&relock, tip_offset, &self.config.two_bone);
                elbow_swung = true;
            }
        }

        ArmReport {
            two_bone: report,
            target_corrected,
            elbow_swung,
        }
    }

    /// Move the hand target (and its hint) out of the torso
    fn avoid_torso(&self, torso: &Capsule, target: &IkTarget, outward: Vec3) -> (IkTarget, bool) {
        let mut corrected = *target;
        match self.config.avoidance {
            TorsoAvoidance::CapsulePenetration => {
                let tip = target.position
                    + target.rotation * (safe_normalize(self.config.hand_axis, Vec3::Z))
                        * self.config.hand_length;
                let hand = Capsule::new(target.position, tip, self.config.hand_radius);
                let Some(push) = torso.penetration(&hand, outward) else {
                    return (corrected, false);
                };
                corrected.position += push;
                if let Some(hint) = corrected.hint.as_mut() {
                    hint.position += push * self.config.hint_share;
                }
            }
            TorsoAvoidance::PointPushOut => {
                if !torso.contains(target.position) {
                    return (corrected, false);
                }
                corrected.position = torso.push_out(target.position, outward);
                if let Some(hint) = corrected.hint.as_mut() {
                    let pushed = torso.push_out(hint.position, outward);
                    hint.position = hint.position.lerp(pushed, self.config.hint_blend);
                }
            }
        }
        (corrected, true)
    }
}

/// Horizontal direction from the torso axis toward the shoulder.
///
/// Used when a point sits exactly on the torso's core segment.
fn outward_direction(torso: &Capsule, shoulder: Vec3) -> Vec3 {
    let axis = torso.axis(UP);
    let lateral = project_on_plane(shoulder - torso.closest_point(shoulder), axis);
    safe_normalize(lateral, Vec3::X)
}
