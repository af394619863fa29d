//! Working body pose
//!
//! A per-character snapshot of every humanoid slot. Setting a slot rigidly
//! carries all of its descendants, which is how a scene graph would react to
//! the same write. Solvers work on the snapshot; the arena is only touched
//! when the resulting [`PoseFrame`] is applied.

use glam::{Quat, Vec3};

use mira_core::{CalibrationPose, HumanoidJoint, JointArena, JointPose, SkeletonReference};

use crate::apply::{PoseFrame, SlotFlags};

/// Snapshot of all humanoid slots
#[derive(Debug, Clone, PartialEq)]
pub struct BodyPose {
    poses: [JointPose; HumanoidJoint::COUNT],
    bound: [bool; HumanoidJoint::COUNT],
    touched: [bool; HumanoidJoint::COUNT],
}

impl BodyPose {
    /// Read every bound slot from the arena
    pub fn capture(skeleton: &SkeletonReference, arena: &JointArena) -> Self {
        let mut body = Self {
            poses: [JointPose::default(); HumanoidJoint::COUNT],
            bound: [false; HumanoidJoint::COUNT],
            touched: [false; HumanoidJoint::COUNT],
        };
        for (joint, handle) in skeleton.bound() {
            if let Some(pose) = arena.get(handle) {
                body.poses[joint.index()] = *pose;
                body.bound[joint.index()] = true;
            }
        }
        body
    }

    pub fn is_bound(&self, joint: HumanoidJoint) -> bool {
        self.bound[joint.index()]
    }

    /// True when every listed slot is bound
    pub fn all_bound(&self, joints: &[HumanoidJoint]) -> bool {
        joints.iter().all(|&j| self.is_bound(j))
    }

    pub fn is_touched(&self, joint: HumanoidJoint) -> bool {
        self.touched[joint.index()]
    }

    pub fn get(&self, joint: HumanoidJoint) -> JointPose {
        self.poses[joint.index()]
    }

    pub fn position(&self, joint: HumanoidJoint) -> Vec3 {
        self.poses[joint.index()].position
    }

    pub fn rotation(&self, joint: HumanoidJoint) -> Quat {
        self.poses[joint.index()].rotation
    }

    /// Set a slot's world pose and rigidly carry its descendants
    pub fn set_pose(&mut self, joint: HumanoidJoint, pose: JointPose) {
        let old = self.poses[joint.index()];
        let delta = pose.rotation * old.rotation.inverse();

        for &child in HumanoidJoint::all() {
            if !child.is_descendant_of(joint) {
                continue;
            }
            let slot = &mut self.poses[child.index()];
            slot.position = pose.position + delta * (slot.position - old.position);
            slot.rotation = (delta * slot.rotation).normalize();
            self.touched[child.index()] = true;
        }

        self.poses[joint.index()] = pose;
        self.touched[joint.index()] = true;
    }

    /// Rotate a slot in place, carrying its descendants
    pub fn set_rotation(&mut self, joint: HumanoidJoint, rotation: Quat) {
        let pose = JointPose {
            rotation,
            ..self.get(joint)
        };
        self.set_pose(joint, pose);
    }

    /// Overwrite a slot's rotation without moving anything below it
    pub fn set_rotation_local(&mut self, joint: HumanoidJoint, rotation: Quat) {
        self.poses[joint.index()].rotation = rotation;
        self.touched[joint.index()] = true;
    }

    /// Write a set of solved slots, parents first.
    ///
    /// Each write carries the slots below it, and later writes overwrite
    /// the carried result for the slots they name.
    pub fn set_chain(&mut self, entries: &[(HumanoidJoint, JointPose)]) {
        let mut ordered = entries.to_vec();
        ordered.sort_by_key(|(joint, _)| depth(*joint));
        for (joint, pose) in ordered {
            self.set_pose(joint, pose);
        }
    }

    /// Convert every touched, bound slot into a drive for the apply layer.
    ///
    /// Drives carry the target orientation (`rotation * inverse(offset)`) so
    /// that the apply layer's `target * offset` reproduces the solved pose.
    pub fn drives(
        &self,
        calibration: &CalibrationPose,
        flags: &[SlotFlags; HumanoidJoint::COUNT],
    ) -> PoseFrame {
        let mut frame = PoseFrame::with_flags(*flags);
        for &joint in HumanoidJoint::all() {
            if !(self.is_bound(joint) && self.is_touched(joint)) {
                continue;
            }
            let pose = self.get(joint);
            let target = pose.rotation * calibration.offset(joint).inverse();
            frame.set(joint, pose.position, target);
        }
        frame
    }
}

/// Number of ancestors above a slot
pub fn depth(joint: HumanoidJoint) -> usize {
    let mut depth = 0;
    let mut current = joint.parent();
    while let Some(parent) = current {
        depth += 1;
        current = parent.parent();
    }
    depth
}
