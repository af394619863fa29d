//! Remote avatar records
//!
//! Registration captures head-local offsets once; every frame re-samples the
//! root, head and hips and rebuilds the rest of the chain from those offsets.

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use mira_core::{
    safe_divide_vec3, sanitize_scale, AvatarKey, JointArena, JointHandle, MiraResult,
};

/// World positions of the intermediate spine joints at registration time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpineAnchors {
    pub neck: Vec3,
    pub chest: Vec3,
    pub spine: Vec3,
}

/// Everything needed to register one remote participant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegistrationParams {
    pub key: AvatarKey,
    pub root: JointHandle,
    pub head: JointHandle,
    pub hips: JointHandle,
    /// Joint whose world matrix gives the avatar's current scale
    pub scale_ref: JointHandle,
    pub head_bind: Quat,
    pub hips_bind: Quat,
    /// Authored eye position in world space at registration
    pub eye_world: Vec3,
    /// Authored mouth position in world space at registration
    pub mouth_world: Vec3,
    pub mouth: Option<JointHandle>,
    pub name_plate: Option<JointHandle>,
    pub bind_scale: Vec3,
    /// `None` keeps neck/chest/spine collapsed onto the head
    pub spine: Option<SpineAnchors>,
}

impl RegistrationParams {
    pub fn new(
        key: AvatarKey,
        root: JointHandle,
        head: JointHandle,
        hips: JointHandle,
        scale_ref: JointHandle,
    ) -> Self {
        Self {
            key,
            root,
            head,
            hips,
            scale_ref,
            head_bind: Quat::IDENTITY,
            hips_bind: Quat::IDENTITY,
            eye_world: Vec3::ZERO,
            mouth_world: Vec3::ZERO,
            mouth: None,
            name_plate: None,
            bind_scale: Vec3::ONE,
            spine: None,
        }
    }

    pub fn with_bind_orientations(mut self, head: Quat, hips: Quat) -> Self {
        self.head_bind = head;
        self.hips_bind = hips;
        self
    }

    pub fn with_face(mut self, eye_world: Vec3, mouth_world: Vec3) -> Self {
        self.eye_world = eye_world;
        self.mouth_world = mouth_world;
        self
    }

    pub fn with_mouth_joint(mut self, mouth: JointHandle) -> Self {
        self.mouth = Some(mouth);
        self
    }

    pub fn with_name_plate(mut self, name_plate: JointHandle) -> Self {
        self.name_plate = Some(name_plate);
        self
    }

    pub fn with_bind_scale(mut self, scale: Vec3) -> Self {
        self.bind_scale = scale;
        self
    }

    /// Derive real neck/chest/spine offsets instead of collapsing them onto the head
    pub fn with_spine_offsets(mut self, anchors: SpineAnchors) -> Self {
        self.spine = Some(anchors);
        self
    }

    /// Handles that must exist in the arena
    pub fn handles(&self) -> impl Iterator<Item = JointHandle> {
        [self.root, self.head, self.hips, self.scale_ref]
            .into_iter()
            .chain(self.mouth)
            .chain(self.name_plate)
    }
}

/// Unscaled head-local offsets captured at registration
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AuthoredOffsets {
    pub neck: Vec3,
    pub chest: Vec3,
    pub spine: Vec3,
    pub eye: Vec3,
    pub mouth: Vec3,
    pub bind_scale: Vec3,
}

impl AuthoredOffsets {
    /// Capture offsets relative to the head's world pose.
    ///
    /// `offset = inverse(headWorld * headBind) * ((point - head) / bindScale)`,
    /// so that composing back at bind scale reproduces `point`. Neck, chest
    /// and spine are chained: each is relative to the previous joint.
    pub fn capture(
        head_position: Vec3,
        head_rotation: Quat,
        params: &RegistrationParams,
    ) -> Self {
        let bind_scale = sanitize_scale(params.bind_scale);
        let inverse = (head_rotation * params.head_bind).normalize().inverse();
        let local = |from: Vec3, to: Vec3| inverse * safe_divide_vec3(to - from, bind_scale);

        let (neck, chest, spine) = match params.spine {
            Some(anchors) => (
                local(head_position, anchors.neck),
                local(anchors.neck, anchors.chest),
                local(anchors.chest, anchors.spine),
            ),
            None => (Vec3::ZERO, Vec3::ZERO, Vec3::ZERO),
        };

        Self {
            neck,
            chest,
            spine,
            eye: local(head_position, params.eye_world),
            mouth: local(head_position, params.mouth_world),
            bind_scale,
        }
    }
}

/// Per-avatar data stored densely in the registry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AvatarRecord {
    pub key: AvatarKey,
    pub root: JointHandle,
    pub head: JointHandle,
    pub hips: JointHandle,
    pub scale_ref: JointHandle,
    pub mouth: Option<JointHandle>,
    pub name_plate: Option<JointHandle>,
    pub head_bind: Quat,
    pub hips_bind: Quat,
    pub offsets: AuthoredOffsets,
}

impl AvatarRecord {
    /// Validate the handles and capture offsets from the arena's current head pose
    pub fn register(params: &RegistrationParams, arena: &JointArena) -> MiraResult<Self> {
        for handle in params.handles() {
            arena.check(handle)?;
        }
        let head = arena.get(params.head).copied().unwrap_or_default();
        Ok(Self {
            key: params.key,
            root: params.root,
            head: params.head,
            hips: params.hips,
            scale_ref: params.scale_ref,
            mouth: params.mouth,
            name_plate: params.name_plate,
            head_bind: params.head_bind,
            hips_bind: params.hips_bind,
            offsets: AuthoredOffsets::capture(head.position, head.rotation, params),
        })
    }
}

/// Position and orientation sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseSample {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Default for PoseSample {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }
}

/// Root position and approximate world scale
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RootSample {
    pub position: Vec3,
    pub scale: Vec3,
}

impl Default for RootSample {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            scale: Vec3::ONE,
        }
    }
}

/// Aggregated per-avatar input of the solve stage
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoneInput {
    pub root: RootSample,
    pub head: PoseSample,
    pub hips: PoseSample,
    pub head_bind: Quat,
    pub hips_bind: Quat,
}

/// Solved remote pose; positions are relative to the root
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoneOutput {
    /// Root world position the local positions are relative to
    pub root: Vec3,
    pub head: PoseSample,
    pub neck: PoseSample,
    pub chest: PoseSample,
    pub spine: PoseSample,
    pub hips: PoseSample,
    pub eye: PoseSample,
    pub mouth: PoseSample,
    /// Hip-to-nameplate height delta
    pub height_offset: f32,
}

impl BoneOutput {
    /// World position of a root-relative point
    #[inline]
    pub fn to_world(&self, local: Vec3) -> Vec3 {
        self.root + local
    }

    pub fn mouth_world(&self) -> Vec3 {
        self.to_world(self.mouth.position)
    }

    pub fn hips_world(&self) -> Vec3 {
        self.to_world(self.hips.position)
    }
}
