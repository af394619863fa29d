//! Pose State - joint records, humanoid slots and calibration
//!
//! Joints are plain world-space pose records kept in a [`JointArena`] and
//! addressed by [`JointHandle`]. Solvers write into the arena; nothing here
//! knows about a renderer or scene graph.

use glam::{Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::{JointHandle, MiraError, MiraResult};

/// Named joint slot of a humanoid skeleton
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HumanoidJoint {
    // Torso
    Hips,
    Spine,
    Chest,
    UpperChest,
    Neck,
    Head,

    // Left arm
    LeftShoulder,
    LeftUpperArm,
    LeftLowerArm,
    LeftHand,

    // Right arm
    RightShoulder,
    RightUpperArm,
    RightLowerArm,
    RightHand,

    // Left leg
    LeftUpperLeg,
    LeftLowerLeg,
    LeftFoot,
    LeftToes,

    // Right leg
    RightUpperLeg,
    RightLowerLeg,
    RightFoot,
    RightToes,
}

impl HumanoidJoint {
    /// Number of slots
    pub const COUNT: usize = 22;

    /// All slots in index order
    pub fn all() -> &'static [HumanoidJoint; HumanoidJoint::COUNT] {
        use HumanoidJoint::*;
        &[
            Hips,
            Spine,
            Chest,
            UpperChest,
            Neck,
            Head,
            LeftShoulder,
            LeftUpperArm,
            LeftLowerArm,
            LeftHand,
            RightShoulder,
            RightUpperArm,
            RightLowerArm,
            RightHand,
            LeftUpperLeg,
            LeftLowerLeg,
            LeftFoot,
            LeftToes,
            RightUpperLeg,
            RightLowerLeg,
            RightFoot,
            RightToes,
        ]
    }

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Parent slot in the humanoid hierarchy (`None` for the hips)
    pub fn parent(self) -> Option<HumanoidJoint> {
        use HumanoidJoint::*;
        match self {
            Hips => None,
            Spine => Some(Hips),
            Chest => Some(Spine),
            UpperChest => Some(Chest),
            Neck => Some(UpperChest),
            Head => Some(Neck),
            LeftShoulder | RightShoulder => Some(UpperChest),
            LeftUpperArm => Some(LeftShoulder),
            LeftLowerArm => Some(LeftUpperArm),
            LeftHand => Some(LeftLowerArm),
            RightUpperArm => Some(RightShoulder),
            RightLowerArm => Some(RightUpperArm),
            RightHand => Some(RightLowerArm),
            LeftUpperLeg | RightUpperLeg => Some(Hips),
            LeftLowerLeg => Some(LeftUpperLeg),
            LeftFoot => Some(LeftLowerLeg),
            LeftToes => Some(LeftFoot),
            RightLowerLeg => Some(RightUpperLeg),
            RightFoot => Some(RightLowerLeg),
            RightToes => Some(RightFoot),
        }
    }

    /// True when `self` sits strictly below `ancestor` in the hierarchy
    pub fn is_descendant_of(self, ancestor: HumanoidJoint) -> bool {
        let mut current = self.parent();
        while let Some(joint) = current {
            if joint == ancestor {
                return true;
            }
            current = joint.parent();
        }
        false
    }
}

/// World-space pose record of a single joint
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointPose {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for JointPose {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl JointPose {
    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self {
            position,
            rotation,
            scale: Vec3::ONE,
        }
    }

    pub fn at(position: Vec3) -> Self {
        Self::new(position, Quat::IDENTITY)
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    /// Local-to-world matrix of this record
    pub fn local_to_world(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }

    /// Rotate this record about `pivot`
    pub fn rotate_about(&mut self, pivot: Vec3, rotation: Quat) {
        self.position = pivot + rotation * (self.position - pivot);
        self.rotation = rotation * self.rotation;
    }
}

/// Arena of joint pose records addressed by stable handles.
///
/// Handles are never invalidated; the arena only grows.
#[derive(Debug, Clone, Default)]
pub struct JointArena {
    poses: Vec<JointPose>,
}

impl JointArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            poses: Vec::with_capacity(capacity),
        }
    }

    /// Add a record and return its handle
    pub fn insert(&mut self, pose: JointPose) -> JointHandle {
        let handle = JointHandle::new(self.poses.len() as u32);
        self.poses.push(pose);
        handle
    }

    pub fn get(&self, handle: JointHandle) -> Option<&JointPose> {
        self.poses.get(handle.index())
    }

    pub fn get_mut(&mut self, handle: JointHandle) -> Option<&mut JointPose> {
        self.poses.get_mut(handle.index())
    }

    pub fn contains(&self, handle: JointHandle) -> bool {
        handle.index() < self.poses.len()
    }

    /// Fail with [`MiraError::InvalidJoint`] for a handle outside the arena
    pub fn check(&self, handle: JointHandle) -> MiraResult<()> {
        if self.contains(handle) {
            Ok(())
        } else {
            Err(MiraError::InvalidJoint(handle))
        }
    }

    pub fn set_pose(&mut self, handle: JointHandle, pose: JointPose) -> bool {
        match self.get_mut(handle) {
            Some(slot) => {
                *slot = pose;
                true
            }
            None => false,
        }
    }

    pub fn set_position(&mut self, handle: JointHandle, position: Vec3) -> bool {
        match self.get_mut(handle) {
            Some(slot) => {
                slot.position = position;
                true
            }
            None => false,
        }
    }

    pub fn set_rotation(&mut self, handle: JointHandle, rotation: Quat) -> bool {
        match self.get_mut(handle) {
            Some(slot) => {
                slot.rotation = rotation;
                true
            }
            None => false,
        }
    }

    /// Local-to-world matrix of a record, identity for unknown handles
    pub fn local_to_world(&self, handle: JointHandle) -> Mat4 {
        self.get(handle)
            .map(JointPose::local_to_world)
            .unwrap_or(Mat4::IDENTITY)
    }

    pub fn len(&self) -> usize {
        self.poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (JointHandle, &JointPose)> {
        self.poses
            .iter()
            .enumerate()
            .map(|(i, pose)| (JointHandle::new(i as u32), pose))
    }
}

/// Mapping from humanoid slots to joint handles. Unbound slots are skipped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkeletonReference {
    slots: [Option<JointHandle>; HumanoidJoint::COUNT],
}

impl SkeletonReference {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, joint: HumanoidJoint, handle: JointHandle) {
        self.slots[joint.index()] = Some(handle);
    }

    pub fn with(mut self, joint: HumanoidJoint, handle: JointHandle) -> Self {
        self.bind(joint, handle);
        self
    }

    pub fn unbind(&mut self, joint: HumanoidJoint) -> Option<JointHandle> {
        self.slots[joint.index()].take()
    }

    pub fn handle(&self, joint: HumanoidJoint) -> Option<JointHandle> {
        self.slots[joint.index()]
    }

    pub fn is_bound(&self, joint: HumanoidJoint) -> bool {
        self.slots[joint.index()].is_some()
    }

    /// Bound slots with their handles
    pub fn bound(&self) -> impl Iterator<Item = (HumanoidJoint, JointHandle)> + '_ {
        HumanoidJoint::all()
            .iter()
            .filter_map(move |&joint| self.handle(joint).map(|h| (joint, h)))
    }

    /// Check every bound handle against the arena
    pub fn validate(&self, arena: &JointArena) -> MiraResult<()> {
        for (_, handle) in self.bound() {
            arena.check(handle)?;
        }
        Ok(())
    }
}

/// Per-joint authored offsets captured at calibration time.
///
/// The final orientation written for a slot is `target * offset`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPose {
    offsets: [Quat; HumanoidJoint::COUNT],
    rest_positions: [Vec3; HumanoidJoint::COUNT],
}

impl Default for CalibrationPose {
    fn default() -> Self {
        Self {
            offsets: [Quat::IDENTITY; HumanoidJoint::COUNT],
            rest_positions: [Vec3::ZERO; HumanoidJoint::COUNT],
        }
    }
}

impl CalibrationPose {
    /// Identity offsets, zero rest positions
    pub fn identity() -> Self {
        Self::default()
    }

    /// Capture offsets so that `reference(slot) * offset == current bone rotation`
    pub fn capture<F>(skeleton: &SkeletonReference, arena: &JointArena, reference: F) -> Self
    where
        F: Fn(HumanoidJoint) -> Quat,
    {
        let mut pose = Self::default();
        pose.recalibrate(skeleton, arena, reference);
        pose
    }

    /// Capture with identity references: the offset is the bind rotation itself
    pub fn capture_bind(skeleton: &SkeletonReference, arena: &JointArena) -> Self {
        Self::capture(skeleton, arena, |_| Quat::IDENTITY)
    }

    /// Replace every offset from the current arena state
    pub fn recalibrate<F>(&mut self, skeleton: &SkeletonReference, arena: &JointArena, reference: F)
    where
        F: Fn(HumanoidJoint) -> Quat,
    {
        for (joint, handle) in skeleton.bound() {
            let Some(bone) = arena.get(handle) else {
                continue;
            };
            let i = joint.index();
            self.offsets[i] = (reference(joint).inverse() * bone.rotation).normalize();
            self.rest_positions[i] = bone.position;
        }
    }

    pub fn offset(&self, joint: HumanoidJoint) -> Quat {
        self.offsets[joint.index()]
    }

    pub fn set_offset(&mut self, joint: HumanoidJoint, offset: Quat) {
        self.offsets[joint.index()] = offset;
    }

    pub fn rest_position(&self, joint: HumanoidJoint) -> Vec3 {
        self.rest_positions[joint.index()]
    }

    pub fn set_rest_position(&mut self, joint: HumanoidJoint, position: Vec3) {
        self.rest_positions[joint.index()] = position;
    }

    /// Rest-pose distance between two slots
    pub fn rest_distance(&self, a: HumanoidJoint, b: HumanoidJoint) -> f32 {
        self.rest_position(a).distance(self.rest_position(b))
    }

    /// `target * offset(joint)`
    #[inline]
    pub fn compose(&self, joint: HumanoidJoint, target: Quat) -> Quat {
        target * self.offset(joint)
    }
}

/// Secondary aim point of an IK target
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IkHint {
    pub position: Vec3,
    pub rotation: Quat,
}

/// Target pose for an IK chain tip
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IkTarget {
    pub position: Vec3,
    pub rotation: Quat,
    pub hint: Option<IkHint>,
}

impl IkTarget {
    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self {
            position,
            rotation,
            hint: None,
        }
    }

    pub fn at(position: Vec3) -> Self {
        Self::new(position, Quat::IDENTITY)
    }

    pub fn with_hint(mut self, position: Vec3) -> Self {
        self.hint = Some(IkHint {
            position,
            rotation: Quat::IDENTITY,
        });
        self
    }

    pub fn with_hint_pose(mut self, position: Vec3, rotation: Quat) -> Self {
        self.hint = Some(IkHint { position, rotation });
        self
    }

    #[inline]
    pub fn has_hint(&self) -> bool {
        self.hint.is_some()
    }

    pub fn hint_position(&self) -> Option<Vec3> {
        self.hint.map(|h| h.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_joint_table() {
        assert_eq!(HumanoidJoint::all().len(), HumanoidJoint::COUNT);
        for (i, joint) in HumanoidJoint::all().iter().enumerate() {
            assert_eq!(joint.index(), i);
        }
        assert!(HumanoidJoint::LeftHand.is_descendant_of(HumanoidJoint::Hips));
        assert!(HumanoidJoint::LeftHand.is_descendant_of(HumanoidJoint::UpperChest));
        assert!(!HumanoidJoint::LeftFoot.is_descendant_of(HumanoidJoint::Chest));
    }

    #[test]
    fn test_arena_handles() {
        let mut arena = JointArena::new();
        let a = arena.insert(JointPose::at(Vec3::X));
        let b = arena.insert(JointPose::default());
        assert_eq!(arena.len(), 2);
        assert!(arena.set_position(b, Vec3::Y));
        assert_eq!(arena.get(a).unwrap().position, Vec3::X);
        assert_eq!(arena.get(b).unwrap().position, Vec3::Y);

        let missing = JointHandle::new(9);
        assert!(!arena.set_rotation(missing, Quat::IDENTITY));
        assert_eq!(arena.check(missing), Err(MiraError::InvalidJoint(missing)));
    }

    #[test]
    fn test_skeleton_bound_iteration() {
        let mut arena = JointArena::new();
        let hips = arena.insert(JointPose::default());
        let head = arena.insert(JointPose::default());
        let skeleton = SkeletonReference::new()
            .with(HumanoidJoint::Hips, hips)
            .with(HumanoidJoint::Head, head);

        let bound: Vec<_> = skeleton.bound().collect();
        assert_eq!(
            bound,
            vec![(HumanoidJoint::Hips, hips), (HumanoidJoint::Head, head)]
        );
        assert!(skeleton.validate(&arena).is_ok());

        let broken = skeleton.with(HumanoidJoint::Neck, JointHandle::new(50));
        assert!(broken.validate(&arena).is_err());
    }

    #[test]
    fn test_calibration_compose_restores_bind() {
        let mut arena = JointArena::new();
        let bind = Quat::from_rotation_y(0.8);
        let hand = arena.insert(JointPose::new(Vec3::new(0.5, 1.2, 0.0), bind));
        let skeleton = SkeletonReference::new().with(HumanoidJoint::LeftHand, hand);

        let reference = Quat::from_rotation_x(0.3);
        let calibration = CalibrationPose::capture(&skeleton, &arena, |_| reference);

        // Feeding the calibration reference back reproduces the bind rotation
        let composed = calibration.compose(HumanoidJoint::LeftHand, reference);
        assert!(crate::quat_angle(composed, bind) < 2e-3);
        assert_eq!(
            calibration.rest_position(HumanoidJoint::LeftHand),
            Vec3::new(0.5, 1.2, 0.0)
        );
        // Unbound slots keep identity
        assert_eq!(calibration.offset(HumanoidJoint::Head), Quat::IDENTITY);
    }

    #[test]
    fn test_rotate_about_pivot() {
        let mut pose = JointPose::at(Vec3::new(1.0, 0.0, 0.0));
        pose.rotate_about(Vec3::ZERO, Quat::from_rotation_z(std::f32::consts::FRAC_PI_2));
        assert!((pose.position - Vec3::Y).length() < 1e-5);
    }

    #[test]
    fn test_target_hint() {
        let target = IkTarget::at(Vec3::X);
        assert!(!target.has_hint());
        let target = target.with_hint(Vec3::Z);
        assert_eq!(target.hint_position(), Some(Vec3::Z));
    }
}
