//! Full-body rig
//!
//! Drives one character from sparse anchors: spine, shoulders, arms, legs,
//! toes, in that order. [`solve_batch`] runs many rigs in parallel against a
//! read-only arena; applying the frames is sequential.

use glam::{Quat, Vec3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use mira_core::{
    clamp_rotation_towards, from_to_rotation, safe_normalize, CalibrationPose, HumanoidJoint,
    IkHint, IkTarget, JointArena, MiraError, MiraResult, SkeletonReference,
};

use crate::apply::{PoseFrame, SlotFlags};
use crate::arm::{ArmConfig, ArmSolver};
use crate::body::BodyPose;
use crate::spine::{SpineConfig, SpineSolver, SpineTargets};
use crate::two_bone::{TwoBoneChain, TwoBoneSettings};

/// Anchors tracked for one character in one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackedAnchors {
    pub head: IkTarget,
    pub hips: IkTarget,
    pub chest: Option<IkTarget>,
    pub left_hand: Option<IkTarget>,
    pub right_hand: Option<IkTarget>,
    pub left_foot: Option<IkTarget>,
    pub right_foot: Option<IkTarget>,
    pub left_elbow_hint: Option<Vec3>,
    pub right_elbow_hint: Option<Vec3>,
    pub left_knee_hint: Option<Vec3>,
    pub right_knee_hint: Option<Vec3>,
}

impl TrackedAnchors {
    /// Head and hips only
    pub fn new(head: IkTarget, hips: IkTarget) -> Self {
        Self {
            head,
            hips,
            chest: None,
            left_hand: None,
            right_hand: None,
            left_foot: None,
            right_foot: None,
            left_elbow_hint: None,
            right_elbow_hint: None,
            left_knee_hint: None,
            right_knee_hint: None,
        }
    }

    pub fn with_chest(mut self, chest: IkTarget) -> Self {
        self.chest = Some(chest);
        self
    }

    pub fn with_hands(mut self, left: IkTarget, right: IkTarget) -> Self {
        self.left_hand = Some(left);
        self.right_hand = Some(right);
        self
    }

    pub fn with_feet(mut self, left: IkTarget, right: IkTarget) -> Self {
        self.left_foot = Some(left);
        self.right_foot = Some(right);
        self
    }

    fn hand(&self, side: Side) -> Option<IkTarget> {
        let (target, hint) = match side {
            Side::Left => (self.left_hand, self.left_elbow_hint),
            Side::Right => (self.right_hand, self.right_elbow_hint),
        };
        target.map(|t| with_hint_override(t, hint))
    }

    fn foot(&self, side: Side) -> Option<(IkTarget, Option<Vec3>)> {
        match side {
            Side::Left => self.left_foot.map(|t| (t, self.left_knee_hint)),
            Side::Right => self.right_foot.map(|t| (t, self.right_knee_hint)),
        }
    }
}

fn with_hint_override(target: IkTarget, hint: Option<Vec3>) -> IkTarget {
    match hint {
        Some(position) => IkTarget {
            hint: Some(IkHint {
                position,
                rotation: Quat::IDENTITY,
            }),
            ..target
        },
        None => target,
    }
}

/// Full-body rig settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    pub spine: SpineConfig,
    pub arm: ArmConfig,
    pub leg: TwoBoneSettings,
    /// Fraction of the shoulder→hand swing applied to the shoulder
    pub shoulder_follow: f32,
    /// Cap on the shoulder's deviation from its carried pose (radians)
    pub max_shoulder_angle: f32,
    /// Forward distance of the default knee hint
    pub knee_hint_distance: f32,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            spine: SpineConfig::default(),
            arm: ArmConfig::default(),
            leg: TwoBoneSettings::default(),
            shoulder_follow: 0.25,
            max_shoulder_angle: 20f32.to_radians(),
            knee_hint_distance: 0.3,
        }
    }
}

impl RigConfig {
    pub fn validate(&self) -> MiraResult<()> {
        self.spine.validate()?;
        self.arm.validate()?;
        self.leg.validate()?;
        if !(0.0..=1.0).contains(&self.shoulder_follow) {
            return Err(MiraError::config(format!(
                "shoulder_follow must be in [0, 1], got {}",
                self.shoulder_follow
            )));
        }
        if self.max_shoulder_angle < 0.0 || self.knee_hint_distance < 0.0 {
            return Err(MiraError::config("rig limits must be non-negative"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

impl Side {
    const BOTH: [Side; 2] = [Side::Left, Side::Right];

    /// Shoulder, upper arm, lower arm, hand
    fn arm(self) -> [HumanoidJoint; 4] {
        use HumanoidJoint::*;
        match self {
            Side::Left => [LeftShoulder, LeftUpperArm, LeftLowerArm, LeftHand],
            Side::Right => [RightShoulder, RightUpperArm, RightLowerArm, RightHand],
        }
    }

    /// Upper leg, lower leg, foot, toes
    fn leg(self) -> [HumanoidJoint; 4] {
        use HumanoidJoint::*;
        match self {
            Side::Left => [LeftUpperLeg, LeftLowerLeg, LeftFoot, LeftToes],
            Side::Right => [RightUpperLeg, RightLowerLeg, RightFoot, RightToes],
        }
    }
}

/// Solver state for one character
#[derive(Debug, Clone)]
pub struct BodyRig {
    skeleton: SkeletonReference,
    calibration: CalibrationPose,
    config: RigConfig,
    spine: SpineSolver,
    arm: ArmSolver,
    flags: [SlotFlags; HumanoidJoint::COUNT],
}

impl BodyRig {
    pub fn new(
        skeleton: SkeletonReference,
        calibration: CalibrationPose,
        config: RigConfig,
    ) -> MiraResult<Self> {
        config.validate()?;
        Ok(Self {
            skeleton,
            calibration,
            config,
            spine: SpineSolver::new(config.spine),
            arm: ArmSolver::new(config.arm),
            flags: [SlotFlags::default(); HumanoidJoint::COUNT],
        })
    }

    /// Capture the calibration from the arena's current (bind) pose
    pub fn calibrate(
        skeleton: SkeletonReference,
        arena: &JointArena,
        config: RigConfig,
    ) -> MiraResult<Self> {
        skeleton.validate(arena)?;
        let calibration = CalibrationPose::capture_bind(&skeleton, arena);
        debug!(bound = skeleton.bound().count(), "body rig calibrated");
        Self::new(skeleton, calibration, config)
    }

    pub fn skeleton(&self) -> &SkeletonReference {
        &self.skeleton
    }

    pub fn calibration(&self) -> &CalibrationPose {
        &self.calibration
    }

    /// Replace the calibration, e.g. after a user re-poses for recalibration
    pub fn set_calibration(&mut self, calibration: CalibrationPose) {
        self.calibration = calibration;
    }

    pub fn config(&self) -> &RigConfig {
        &self.config
    }

    pub fn slot_flags(&self, joint: HumanoidJoint) -> SlotFlags {
        self.flags[joint.index()]
    }

    pub fn set_slot_flags(&mut self, joint: HumanoidJoint, flags: SlotFlags) {
        self.flags[joint.index()] = flags;
    }

    /// Solve one frame without touching the arena
    pub fn solve(&self, anchors: &TrackedAnchors, arena: &JointArena) -> PoseFrame {
        let mut body = BodyPose::capture(&self.skeleton, arena);

        let targets = SpineTargets {
            head: anchors.head,
            hips: anchors.hips,
            chest: anchors.chest,
        };
        self.spine.solve(&mut body, &targets, &self.calibration);

        for side in Side::BOTH {
            if let Some(hand) = anchors.hand(side) {
                self.drive_shoulder(&mut body, side, &hand);
                self.solve_arm(&mut body, side, &hand);
            }
        }

        let hips_forward = safe_normalize(anchors.hips.rotation * Vec3::Z, Vec3::Z);
        for side in Side::BOTH {
            if let Some((foot, knee_hint)) = anchors.foot(side) {
                self.solve_leg(&mut body, side, &foot, knee_hint, hips_forward);
            }
        }

        body.drives(&self.calibration, &self.flags)
    }

    /// Write a solved frame into the arena; returns the slots written
    pub fn apply(&self, frame: &PoseFrame, arena: &mut JointArena) -> usize {
        frame.apply(&self.skeleton, &self.calibration, arena)
    }

    pub fn solve_and_apply(&self, anchors: &TrackedAnchors, arena: &mut JointArena) -> usize {
        let frame = self.solve(anchors, arena);
        self.apply(&frame, arena)
    }

    /// Rotate the shoulder part of the way toward the hand
    fn drive_shoulder(&self, body: &mut BodyPose, side: Side, hand: &IkTarget) {
        let [shoulder, upper, ..] = side.arm();
        if !body.all_bound(&[shoulder, upper]) {
            return;
        }
        let pivot = body.position(shoulder);
        let current = body.rotation(shoulder);
        let swing = from_to_rotation(body.position(upper) - pivot, hand.position - pivot);
        let follow = Quat::IDENTITY.slerp(swing, self.config.shoulder_follow) * current;
        let rotation = clamp_rotation_towards(follow, current, self.config.max_shoulder_angle);
        body.set_rotation(shoulder, rotation.normalize());
    }

    fn solve_arm(&self, body: &mut BodyPose, side: Side, hand: &IkTarget) {
        let [_, upper, lower, tip] = side.arm();
        if !body.all_bound(&[upper, lower, tip]) {
            return;
        }
        let mut chain = TwoBoneChain::new(body.get(upper), body.get(lower), body.get(tip));
        let offset = self.calibration.offset(tip);

        let chest = if body.is_bound(HumanoidJoint::UpperChest) {
            Some(HumanoidJoint::UpperChest)
        } else {
            body.is_bound(HumanoidJoint::Chest)
                .then_some(HumanoidJoint::Chest)
        };
        match chest {
            Some(chest) if body.is_bound(HumanoidJoint::Neck) => {
                let (chest, neck) = (body.position(chest), body.position(HumanoidJoint::Neck));
                self.arm.solve(&mut chain, hand, offset, chest, neck);
            }
            _ => {
                chain.solve(hand, offset, &self.config.arm.two_bone);
            }
        }

        body.set_chain(&[(upper, chain.root), (lower, chain.mid), (tip, chain.tip)]);
    }

    fn solve_leg(
        &self,
        body: &mut BodyPose,
        side: Side,
        foot: &IkTarget,
        knee_hint: Option<Vec3>,
        hips_forward: Vec3,
    ) {
        let [upper, lower, tip, toes] = side.leg();
        if !body.all_bound(&[upper, lower, tip]) {
            return;
        }
        let hint = knee_hint
            .or_else(|| foot.hint_position())
            .unwrap_or_else(|| body.position(lower) + hips_forward * self.config.knee_hint_distance);

        let mut chain = TwoBoneChain::new(body.get(upper), body.get(lower), body.get(tip));
        chain.solve_towards(
            foot.position,
            foot.rotation,
            Some(hint),
            self.calibration.offset(tip),
            &self.config.leg,
        );
        body.set_chain(&[(upper, chain.root), (lower, chain.mid), (tip, chain.tip)]);

        if body.is_bound(toes) {
            body.set_rotation_local(toes, self.calibration.compose(toes, foot.rotation));
        }
    }
}

/// Solve many rigs in parallel against a shared read-only arena.
///
/// Frames come back in rig order. Extra anchors (or rigs) are ignored.
pub fn solve_batch(
    rigs: &[BodyRig],
    anchors: &[TrackedAnchors],
    arena: &JointArena,
) -> Vec<PoseFrame> {
    rigs.par_iter()
        .zip(anchors.par_iter())
        .map(|(rig, anchors)| rig.solve(anchors, arena))
        .collect()
}

/// [`solve_batch`] followed by a sequential apply; returns the slots written
pub fn solve_and_apply_batch(
    rigs: &[BodyRig],
    anchors: &[TrackedAnchors],
    arena: &mut JointArena,
) -> usize {
    let frames = solve_batch(rigs, anchors, arena);
    rigs.iter()
        .zip(&frames)
        .map(|(rig, frame)| rig.apply(frame, arena))
        .sum()
}
