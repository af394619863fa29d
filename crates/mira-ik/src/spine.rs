//! Spine solve
//!
//! Stateless per frame. Order matters:
//! 1. Bend limit on the head→hips vector against world up
//! 2. Hip clamp along the head→hips direction
//! 3. Hip placement (`target * offset`), carrying the whole body
//! 4. Upper spine solve (two-bone or iterative chain)
//! 5. Chest clamp when a chest tracker is present

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use mira_core::{
    clamp_rotation_towards, quat_angle, safe_normalize, vec_is_finite, CalibrationPose,
    HumanoidJoint, IkTarget, JointPose, MiraError, MiraResult, EPSILON, UP,
};

use crate::body::BodyPose;
use crate::chain::{swing_rotations, ChainConfig, ChainOutcome, ChainSolver};
use crate::two_bone::{TwoBoneChain, TwoBoneSettings};

use HumanoidJoint::{Chest, Head, Hips, Neck, Spine};

/// Upper spine strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpineMode {
    /// Analytic chest→neck→head solve
    TwoBone,
    /// Iterative chest→neck→head chain
    ChestChain,
    /// Iterative head→neck→chest→spine→hips chain anchored at the head target
    HeadAnchoredChain,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpineConfig {
    pub mode: SpineMode,
    /// World up used by the bend limit
    pub up: Vec3,
    /// Maximum lean of the head→hips vector away from vertical (radians)
    pub max_bend: f32,
    /// Lower bound of the head→hips distance, as a fraction of rest
    pub min_hip_factor: f32,
    /// Upper bound of the head→hips distance, as a fraction of rest
    pub max_hip_factor: f32,
    /// Lateral hip offset bound, as a fraction of rest
    pub lateral_factor: f32,
    /// Reference axis for the hip clamp; `None` decomposes along head→hips itself
    pub hip_axis: Option<Vec3>,
    /// Chest-local bend normal of the upper spine solve
    pub bend_normal: Vec3,
    /// Maximum chest deviation from the neck and spine (radians)
    pub max_chest_angle: f32,
    pub chain: ChainConfig,
}

impl Default for SpineConfig {
    fn default() -> Self {
        Self {
            mode: SpineMode::TwoBone,
            up: UP,
            max_bend: 45f32.to_radians(),
            min_hip_factor: 0.85,
            max_hip_factor: 1.05,
            lateral_factor: 0.35,
            hip_axis: None,
            bend_normal: Vec3::X,
            max_chest_angle: 30f32.to_radians(),
            chain: ChainConfig::default(),
        }
    }
}

impl SpineConfig {
    /// Iterative chain anchored at the head, for setups without a chest tracker
    pub fn head_anchored() -> Self {
        Self {
            mode: SpineMode::HeadAnchoredChain,
            chain: ChainConfig {
                max_iterations: 20,
                ..ChainConfig::default()
            },
            ..Self::default()
        }
    }

    pub fn with_max_bend_degrees(mut self, degrees: f32) -> Self {
        self.max_bend = degrees.to_radians();
        self
    }

    pub fn with_max_chest_degrees(mut self, degrees: f32) -> Self {
        self.max_chest_angle = degrees.to_radians();
        self
    }

    pub fn validate(&self) -> MiraResult<()> {
        if self.up.length_squared() < EPSILON {
            return Err(MiraError::config("spine up axis must be non-zero"));
        }
        if !(self.max_bend > 0.0 && self.max_bend < std::f32::consts::FRAC_PI_2) {
            return Err(MiraError::config(format!(
                "max_bend must be in (0, 90) degrees, got {}",
                self.max_bend.to_degrees()
            )));
        }
        if !(self.min_hip_factor > 0.0 && self.min_hip_factor <= self.max_hip_factor) {
            return Err(MiraError::config(format!(
                "hip factors must satisfy 0 < min <= max, got [{}, {}]",
                self.min_hip_factor, self.max_hip_factor
            )));
        }
        if self.lateral_factor < 0.0 || self.max_chest_angle < 0.0 {
            return Err(MiraError::config("spine limits must be non-negative"));
        }
        self.chain.validate()
    }
}

/// Anchors consumed by the spine solve
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpineTargets {
    pub head: IkTarget,
    pub hips: IkTarget,
    pub chest: Option<IkTarget>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpineReport {
    /// Final hip position after bend limit and clamp
    pub hips_position: Vec3,
    pub bend_limited: bool,
    /// Iterative chain outcome when a chain mode ran
    pub chain: Option<ChainOutcome>,
    pub chest_clamped: bool,
}

/// Push `hips` down along `-up` until the head→hips lean is at most `max_bend`.
///
/// The lateral offset is preserved. Hips directly above the head keep their
/// distance but are moved below it.
pub fn limit_bend(head: Vec3, hips: Vec3, up: Vec3, max_bend: f32) -> Vec3 {
    let down = -safe_normalize(up, UP);
    let offset = hips - head;
    let vertical = offset.dot(down);
    let lateral = offset - down * vertical;
    let lateral_len = lateral.length();
    if lateral_len * lateral_len < EPSILON {
        // Hips straight above the head are a full inversion: mirror them below
        return if vertical >= 0.0 {
            hips
        } else {
            head - down * vertical
        };
    }

    let tan_max = max_bend.tan();
    if vertical > 0.0 && lateral_len <= vertical * tan_max {
        return hips;
    }
    head + lateral + down * (lateral_len / tan_max.max(EPSILON))
}

/// Clamp the hip position relative to the head.
///
/// The offset is decomposed along `axis` (or its own direction): the
/// vertical part is clamped to `[rest * min_factor, rest * max_factor]` and
/// the lateral part to `rest * lateral_factor`. A degenerate offset falls
/// back to the clamped rest distance straight down the axis.
pub fn clamp_hips(
    head: Vec3,
    hips: Vec3,
    rest_distance: f32,
    config: &SpineConfig,
    axis: Option<Vec3>,
) -> Vec3 {
    if !(rest_distance > 0.0 && rest_distance.is_finite()) {
        return hips;
    }
    let lo = rest_distance * config.min_hip_factor.min(config.max_hip_factor);
    let hi = rest_distance * config.max_hip_factor.max(config.min_hip_factor);

    let down = -safe_normalize(config.up, UP);
    let offset = hips - head;
    let length = offset.length();
    let axis = match axis {
        Some(axis) => safe_normalize(axis, down),
        None if length >= 1e-4 => offset / length,
        None => down,
    };

    if length < 1e-4 {
        return head + axis * rest_distance.clamp(lo, hi);
    }

    let vertical = offset.dot(axis).clamp(lo, hi);
    let lateral = (offset - axis * offset.dot(axis))
        .clamp_length_max(rest_distance * config.lateral_factor);
    head + axis * vertical + lateral
}

/// Spine solver for one character
#[derive(Debug, Clone, Copy, Default)]
pub struct SpineSolver {
    config: SpineConfig,
    chain: ChainSolver,
}

impl SpineSolver {
    pub fn new(config: SpineConfig) -> Self {
        Self {
            config,
            chain: ChainSolver::new(config.chain),
        }
    }

    pub fn config(&self) -> &SpineConfig {
        &self.config
    }

    /// Rest head→hips distance, falling back to the current pose when uncalibrated
    fn rest_distance(&self, body: &BodyPose, calibration: &CalibrationPose) -> f32 {
        let rest = calibration.rest_distance(Head, Hips);
        if rest > EPSILON {
            rest
        } else if body.all_bound(&[Head, Hips]) {
            body.position(Head).distance(body.position(Hips))
        } else {
            0.0
        }
    }

    pub fn solve(
        &self,
        body: &mut BodyPose,
        targets: &SpineTargets,
        calibration: &CalibrationPose,
    ) -> SpineReport {
        let head = targets.head;
        let config = &self.config;

        let (hips_position, bend_limited) = if vec_is_finite(targets.hips.position)
            && vec_is_finite(head.position)
        {
            let bent = limit_bend(head.position, targets.hips.position, config.up, config.max_bend);
            let rest = self.rest_distance(body, calibration);
            (
                clamp_hips(head.position, bent, rest, config, config.hip_axis),
                bent != targets.hips.position,
            )
        } else {
            (body.position(Hips), false)
        };
        let hips_rotation = calibration.compose(Hips, targets.hips.rotation);

        if body.is_bound(Hips) {
            let scale = body.get(Hips).scale;
            body.set_pose(
                Hips,
                JointPose {
                    position: hips_position,
                    rotation: hips_rotation,
                    scale,
                },
            );
        }

        let chain = match config.mode {
            SpineMode::TwoBone => {
                self.solve_two_bone(body, &head, calibration);
                None
            }
            SpineMode::ChestChain => self.solve_chest_chain(body, &head, calibration),
            SpineMode::HeadAnchoredChain => {
                self.solve_head_anchored(body, &head, hips_position, hips_rotation, calibration)
            }
        };

        let chest_clamped = match targets.chest {
            Some(chest) => self.clamp_chest(body, &chest, calibration),
            None => false,
        };

        SpineReport {
            hips_position,
            bend_limited,
            chain,
            chest_clamped,
        }
    }

    /// Head pose without an upper spine solve
    fn place_head(&self, body: &mut BodyPose, head: &IkTarget, calibration: &CalibrationPose) {
        if body.is_bound(Head) {
            let pose = JointPose {
                position: head.position,
                rotation: calibration.compose(Head, head.rotation),
                scale: body.get(Head).scale,
            };
            body.set_pose(Head, pose);
        }
    }

    fn solve_two_bone(&self, body: &mut BodyPose, head: &IkTarget, calibration: &CalibrationPose) {
        if !body.all_bound(&[Chest, Neck, Head]) {
            self.place_head(body, head, calibration);
            return;
        }

        let mut chain = TwoBoneChain::new(body.get(Chest), body.get(Neck), body.get(Head));
        let settings = TwoBoneSettings {
            bend_normal: Some(body.rotation(Chest) * self.config.bend_normal),
            ..TwoBoneSettings::default()
        };
        chain.solve(head, calibration.offset(Head), &settings);
        body.set_chain(&[(Chest, chain.root), (Neck, chain.mid), (Head, chain.tip)]);
    }

    fn solve_chest_chain(
        &self,
        body: &mut BodyPose,
        head: &IkTarget,
        calibration: &CalibrationPose,
    ) -> Option<ChainOutcome> {
        const JOINTS: [HumanoidJoint; 3] = [Chest, Neck, Head];
        if !body.all_bound(&JOINTS) {
            self.place_head(body, head, calibration);
            return None;
        }

        let old = JOINTS.map(|j| body.position(j));
        let mut new = old;
        let outcome = self.chain.solve(&mut new, head.position);

        let mut rotations = JOINTS.map(|j| body.rotation(j));
        swing_rotations(&old, &new, &mut rotations);
        rotations[2] = calibration.compose(Head, head.rotation);

        let entries = chain_entries(body, &JOINTS, &new, &rotations);
        body.set_chain(&entries);
        Some(outcome)
    }

    fn solve_head_anchored(
        &self,
        body: &mut BodyPose,
        head: &IkTarget,
        hips_position: Vec3,
        hips_rotation: Quat,
        calibration: &CalibrationPose,
    ) -> Option<ChainOutcome> {
        // Ordered hips first so each segment's rotation belongs to its lower joint
        const JOINTS: [HumanoidJoint; 5] = [Hips, Spine, Chest, Neck, Head];
        if !body.all_bound(&JOINTS) || !vec_is_finite(head.position) {
            self.place_head(body, head, calibration);
            return None;
        }

        // Anchor the chain at the head target, keeping segment lengths
        let shift = head.position - body.position(Head);
        let old = JOINTS.map(|j| body.position(j));
        let mut solved: Vec<Vec3> = old.iter().rev().map(|p| *p + shift).collect();
        solved[0] = head.position;
        let outcome = self.chain.solve(&mut solved, hips_position);
        solved.reverse();
        let mut new = old;
        new.copy_from_slice(&solved);

        let mut rotations = JOINTS.map(|j| body.rotation(j));
        swing_rotations(&old, &new, &mut rotations);
        rotations[0] = hips_rotation;
        rotations[4] = calibration.compose(Head, head.rotation);

        let entries = chain_entries(body, &JOINTS, &new, &rotations);
        body.set_chain(&entries);
        Some(outcome)
    }

    /// Clamp the chest toward the solved neck, then toward the spine
    fn clamp_chest(
        &self,
        body: &mut BodyPose,
        chest: &IkTarget,
        calibration: &CalibrationPose,
    ) -> bool {
        if !body.is_bound(Chest) {
            return false;
        }
        let desired = calibration.compose(Chest, chest.rotation);
        let max = self.config.max_chest_angle;

        let mut rotation = desired;
        if body.is_bound(Neck) {
            rotation = clamp_rotation_towards(rotation, body.rotation(Neck), max);
        }
        if body.is_bound(Spine) {
            rotation = clamp_rotation_towards(rotation, body.rotation(Spine), max);
        }
        body.set_rotation_local(Chest, rotation);
        quat_angle(rotation, desired) > 1e-4
    }
}

fn chain_entries(
    body: &BodyPose,
    joints: &[HumanoidJoint],
    positions: &[Vec3],
    rotations: &[Quat],
) -> Vec<(HumanoidJoint, JointPose)> {
    joints
        .iter()
        .zip(positions.iter().zip(rotations))
        .map(|(&joint, (&position, &rotation))| {
            (
                joint,
                JointPose {
                    position,
                    rotation,
                    scale: body.get(joint).scale,
                },
            )
        })
        .collect()
}
