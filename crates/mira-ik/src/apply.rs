//! Apply layer - writes solved poses into the joint arena
//!
//! Every slot is independent: a slot is written only when it is enabled and
//! bound. The written orientation is always `target * offset`. Rotation-only
//! slots still receive the world position carried by their parent, since the
//! arena has no hierarchy to move them.

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use mira_core::{CalibrationPose, HumanoidJoint, JointArena, SkeletonReference};

/// Per-slot enable flag and blend weight
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlotFlags {
    pub enabled: bool,
    pub weight: f32,
}

impl Default for SlotFlags {
    fn default() -> Self {
        Self {
            enabled: true,
            weight: 1.0,
        }
    }
}

impl SlotFlags {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            weight: 0.0,
        }
    }

    pub fn weighted(weight: f32) -> Self {
        Self {
            enabled: true,
            weight: weight.clamp(0.0, 1.0),
        }
    }
}

/// Solved target for one slot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointDrive {
    /// World position, `None` when only the orientation is driven
    pub position: Option<Vec3>,
    /// Target orientation before the calibration offset
    pub rotation: Quat,
}

/// Solved targets for every slot of one character
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoseFrame {
    drives: [Option<JointDrive>; HumanoidJoint::COUNT],
    flags: [SlotFlags; HumanoidJoint::COUNT],
}

impl PoseFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flags(flags: [SlotFlags; HumanoidJoint::COUNT]) -> Self {
        Self {
            drives: [None; HumanoidJoint::COUNT],
            flags,
        }
    }

    pub fn set(&mut self, joint: HumanoidJoint, position: Vec3, rotation: Quat) {
        self.drives[joint.index()] = Some(JointDrive {
            position: Some(position),
            rotation,
        });
    }

    pub fn set_rotation(&mut self, joint: HumanoidJoint, rotation: Quat) {
        self.drives[joint.index()] = Some(JointDrive {
            position: None,
            rotation,
        });
    }

    pub fn clear(&mut self, joint: HumanoidJoint) {
        self.drives[joint.index()] = None;
    }

    pub fn drive(&self, joint: HumanoidJoint) -> Option<&JointDrive> {
        self.drives[joint.index()].as_ref()
    }

    pub fn flags(&self, joint: HumanoidJoint) -> SlotFlags {
        self.flags[joint.index()]
    }

    pub fn set_flags(&mut self, joint: HumanoidJoint, flags: SlotFlags) {
        self.flags[joint.index()] = flags;
    }

    /// Number of slots carrying a drive
    pub fn len(&self) -> usize {
        self.drives.iter().filter(|d| d.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write every enabled, bound slot into the arena; returns the slots written
    pub fn apply(
        &self,
        skeleton: &SkeletonReference,
        calibration: &CalibrationPose,
        arena: &mut JointArena,
    ) -> usize {
        let mut written = 0;
        for &joint in HumanoidJoint::all() {
            let Some(drive) = self.drives[joint.index()] else {
                continue;
            };
            let flags = self.flags[joint.index()];
            if !flags.enabled {
                continue;
            }
            let Some(pose) = skeleton.handle(joint).and_then(|h| arena.get_mut(h)) else {
                continue;
            };

            let rotation = calibration.compose(joint, drive.rotation);
            let weight = flags.weight.clamp(0.0, 1.0);
            if weight >= 1.0 {
                if let Some(position) = drive.position {
                    pose.position = position;
                }
                pose.rotation = rotation;
            } else {
                if let Some(position) = drive.position {
                    pose.position = pose.position.lerp(position, weight);
                }
                pose.rotation = pose.rotation.slerp(rotation, weight);
            }
            written += 1;
        }
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mira_core::JointPose;

    fn rig() -> (JointArena, SkeletonReference) {
        let mut arena = JointArena::new();
        let head = arena.insert(JointPose::at(Vec3::new(0.0, 1.7, 0.0)));
        let toes = arena.insert(JointPose::at(Vec3::new(0.1, 0.0, 0.15)));
        let skeleton = SkeletonReference::new()
            .with(HumanoidJoint::Head, head)
            .with(HumanoidJoint::LeftToes, toes);
        (arena, skeleton)
    }

    #[test]
    fn test_apply_composes_offset() {
        let (mut arena, skeleton) = rig();
        let mut calibration = CalibrationPose::identity();
        let offset = Quat::from_rotation_y(0.5);
        calibration.set_offset(HumanoidJoint::Head, offset);

        let mut frame = PoseFrame::new();
        let target = Quat::from_rotation_x(0.2);
        frame.set(HumanoidJoint::Head, Vec3::new(0.0, 1.8, 0.0), target);

        assert_eq!(frame.apply(&skeleton, &calibration, &mut arena), 1);
        let head = arena.get(skeleton.handle(HumanoidJoint::Head).unwrap()).unwrap();
        assert_eq!(head.position, Vec3::new(0.0, 1.8, 0.0));
        assert_eq!(head.rotation, target * offset);
    }

    #[test]
    fn test_rotation_only_slot_takes_carried_position() {
        let (mut arena, skeleton) = rig();
        let mut frame = PoseFrame::new();
        frame.set(HumanoidJoint::LeftToes, Vec3::new(1.1, 0.0, 0.15), Quat::from_rotation_x(0.3));
        frame.apply(&skeleton, &CalibrationPose::identity(), &mut arena);

        let toes = arena.get(skeleton.handle(HumanoidJoint::LeftToes).unwrap()).unwrap();
        assert_eq!(toes.position, Vec3::new(1.1, 0.0, 0.15));
        assert_eq!(toes.rotation, Quat::from_rotation_x(0.3));
    }

    #[test]
    fn test_rotation_drive_keeps_position() {
        let (mut arena, skeleton) = rig();
        let mut frame = PoseFrame::new();
        frame.set_rotation(HumanoidJoint::LeftToes, Quat::from_rotation_x(0.3));
        frame.apply(&skeleton, &CalibrationPose::identity(), &mut arena);

        let toes = arena.get(skeleton.handle(HumanoidJoint::LeftToes).unwrap()).unwrap();
        assert_eq!(toes.position, Vec3::new(0.1, 0.0, 0.15));
    }

    #[test]
    fn test_disabled_and_unbound_slots_untouched() {
        let (mut arena, skeleton) = rig();
        let before = arena.clone();
        let mut frame = PoseFrame::new();
        frame.set(HumanoidJoint::Head, Vec3::ZERO, Quat::from_rotation_z(1.0));
        frame.set(HumanoidJoint::Hips, Vec3::ZERO, Quat::IDENTITY);
        frame.set_flags(HumanoidJoint::Head, SlotFlags::disabled());

        assert_eq!(frame.apply(&skeleton, &CalibrationPose::identity(), &mut arena), 0);
        for ((_, a), (_, b)) in arena.iter().zip(before.iter()) {
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_weight_blends_position() {
        let (mut arena, skeleton) = rig();
        let mut frame = PoseFrame::new();
        frame.set(HumanoidJoint::Head, Vec3::new(0.0, 1.9, 0.0), Quat::IDENTITY);
        frame.set_flags(HumanoidJoint::Head, SlotFlags::weighted(0.5));
        frame.apply(&skeleton, &CalibrationPose::identity(), &mut arena);

        let head = arena.get(skeleton.handle(HumanoidJoint::Head).unwrap()).unwrap();
        assert!((head.position.y - 1.8).abs() < 1e-5);
    }
}
