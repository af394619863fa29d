//! Humanoid fixtures
//!
//! A T-pose humanoid with a 1.62 m head height, placed anywhere in an arena,
//! and a matching set of reachable tracking anchors.

use glam::{Quat, Vec3};

use mira_core::{HumanoidJoint, IkTarget, JointArena, JointPose, SkeletonReference};
use mira_ik::TrackedAnchors;

use HumanoidJoint::*;

/// Bind positions of the T-pose, relative to the character origin
pub const T_POSE: [(HumanoidJoint, Vec3); HumanoidJoint::COUNT] = [
    (Hips, Vec3::new(0.0, 1.0, 0.0)),
    (Spine, Vec3::new(0.0, 1.1, 0.0)),
    (Chest, Vec3::new(0.0, 1.25, 0.0)),
    (UpperChest, Vec3::new(0.0, 1.35, 0.0)),
    (Neck, Vec3::new(0.0, 1.5, 0.0)),
    (Head, Vec3::new(0.0, 1.62, 0.0)),
    (LeftShoulder, Vec3::new(0.05, 1.45, 0.0)),
    (LeftUpperArm, Vec3::new(0.18, 1.45, 0.0)),
    (LeftLowerArm, Vec3::new(0.45, 1.45, 0.0)),
    (LeftHand, Vec3::new(0.7, 1.45, 0.0)),
    (RightShoulder, Vec3::new(-0.05, 1.45, 0.0)),
    (RightUpperArm, Vec3::new(-0.18, 1.45, 0.0)),
    (RightLowerArm, Vec3::new(-0.45, 1.45, 0.0)),
    (RightHand, Vec3::new(-0.7, 1.45, 0.0)),
    (LeftUpperLeg, Vec3::new(0.1, 0.95, 0.0)),
    (LeftLowerLeg, Vec3::new(0.1, 0.52, 0.0)),
    (LeftFoot, Vec3::new(0.1, 0.1, 0.0)),
    (LeftToes, Vec3::new(0.1, 0.02, 0.12)),
    (RightUpperLeg, Vec3::new(-0.1, 0.95, 0.0)),
    (RightLowerLeg, Vec3::new(-0.1, 0.52, 0.0)),
    (RightFoot, Vec3::new(-0.1, 0.1, 0.0)),
    (RightToes, Vec3::new(-0.1, 0.02, 0.12)),
];

/// Insert a T-pose humanoid at `origin` and bind every slot
pub fn spawn_humanoid(arena: &mut JointArena, origin: Vec3) -> SkeletonReference {
    let mut skeleton = SkeletonReference::new();
    for (joint, position) in T_POSE {
        let handle = arena.insert(JointPose::at(origin + position));
        skeleton.bind(joint, handle);
    }
    skeleton
}

/// Bind position of `joint` for a humanoid spawned at `origin`
pub fn bind_position(joint: HumanoidJoint, origin: Vec3) -> Vec3 {
    origin + T_POSE[joint.index()].1
}

/// Reachable anchors: head slightly forward, hands in front, feet planted.
///
/// `phase` sweeps the hands and nods the head so consecutive frames differ.
pub fn reach_anchors(origin: Vec3, phase: f32) -> TrackedAnchors {
    let sway = 0.05 * phase.sin();
    TrackedAnchors::new(
        IkTarget::new(
            origin + Vec3::new(0.0, 1.58, 0.06),
            Quat::from_rotation_x(0.1 * phase.cos()),
        ),
        IkTarget::at(origin + Vec3::new(0.0, 1.0, 0.0)),
    )
    .with_hands(
        IkTarget::at(origin + Vec3::new(0.45, 1.2 + sway, 0.3)),
        IkTarget::at(origin + Vec3::new(-0.5, 1.3 - sway, 0.2)),
    )
    .with_feet(
        IkTarget::at(origin + Vec3::new(0.1, 0.1, 0.0)),
        IkTarget::at(origin + Vec3::new(-0.1, 0.12, 0.05)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_t_pose_is_index_ordered() {
        for (i, (joint, _)) in T_POSE.iter().enumerate() {
            assert_eq!(joint.index(), i);
        }
    }

    #[test]
    fn test_spawn_binds_every_slot() {
        let mut arena = JointArena::new();
        let origin = Vec3::new(3.0, 0.0, 1.0);
        let skeleton = spawn_humanoid(&mut arena, origin);
        assert_eq!(skeleton.bound().count(), HumanoidJoint::COUNT);
        assert!(skeleton.validate(&arena).is_ok());
        let head = arena.get(skeleton.handle(Head).unwrap()).unwrap();
        assert_eq!(head.position, bind_position(Head, origin));
    }
}
