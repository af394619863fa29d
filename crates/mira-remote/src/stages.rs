//! Frame stages
//!
//! Each stage is a pure function of its inputs. The slice variants run the
//! per-avatar function in parallel batches; every batch writes only its own
//! output elements.

use glam::{Quat, Vec3};
use rayon::prelude::*;

use mira_core::{
    approximate_world_scale, guard_denominator, safe_quat, sanitize_scale, yaw_facing,
    JointArena, JointHandle, SCALE_EPSILON,
};

use crate::avatar::{AuthoredOffsets, AvatarRecord, BoneInput, BoneOutput, PoseSample, RootSample};

/// Constants of the bone solve stage
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveParams {
    /// Multiplier applied to the scale ratio to place the nameplate
    pub height_factor: f32,
    /// Smallest bind-scale magnitude used as a divisor
    pub scale_epsilon: f32,
}

impl Default for SolveParams {
    fn default() -> Self {
        Self {
            height_factor: 1.2,
            scale_epsilon: SCALE_EPSILON,
        }
    }
}

/// Root world position and approximate world scale
pub fn gather_root(arena: &JointArena, record: &AvatarRecord) -> RootSample {
    let position = arena
        .get(record.root)
        .map(|pose| pose.position)
        .unwrap_or(Vec3::ZERO);
    let scale = sanitize_scale(approximate_world_scale(
        &arena.local_to_world(record.scale_ref),
    ));
    RootSample { position, scale }
}

/// World position and orientation of one joint
pub fn gather_pose(arena: &JointArena, handle: JointHandle) -> PoseSample {
    arena
        .get(handle)
        .map(|pose| PoseSample {
            position: pose.position,
            rotation: pose.rotation,
        })
        .unwrap_or_default()
}

/// Pack gathered samples with the cached bind orientations
pub fn aggregate(
    record: &AvatarRecord,
    root: RootSample,
    head: PoseSample,
    hips: PoseSample,
) -> BoneInput {
    BoneInput {
        root,
        head,
        hips,
        head_bind: record.head_bind,
        hips_bind: record.hips_bind,
    }
}

/// Forward approximation of the upper body from head and hips samples.
///
/// Every joint below the head inherits the head orientation; the hips keep
/// their own. Positions come out relative to the root.
pub fn solve_bones(input: &BoneInput, offsets: &AuthoredOffsets, params: &SolveParams) -> BoneOutput {
    let scale = input.root.scale;
    let head_rotation = safe_quat(input.head.rotation * input.head_bind);
    let hips_rotation = safe_quat(input.hips_bind * input.hips.rotation);

    let head = input.head.position - input.root.position;
    let hips = input.hips.position - input.root.position;
    let step = |from: Vec3, offset: Vec3| from + head_rotation * (offset * scale);

    let neck = step(head, offsets.neck);
    let chest = step(neck, offsets.chest);
    let spine = step(chest, offsets.spine);
    let sample = |position| PoseSample {
        position,
        rotation: head_rotation,
    };

    let ratio = scale.y / guard_denominator(offsets.bind_scale.y, params.scale_epsilon);

    BoneOutput {
        root: input.root.position,
        head: sample(head),
        neck: sample(neck),
        chest: sample(chest),
        spine: sample(spine),
        hips: PoseSample {
            position: hips,
            rotation: hips_rotation,
        },
        eye: sample(step(head, offsets.eye)),
        mouth: sample(step(head, offsets.mouth)),
        height_offset: ratio * params.height_factor,
    }
}

/// Nameplate world pose: above the hips, yawed toward the camera
pub fn name_plate_pose(output: &BoneOutput, camera: Vec3) -> (Vec3, Quat) {
    let hips = output.hips_world();
    let position = Vec3::new(hips.x, hips.y + output.height_offset, hips.z);
    (position, yaw_facing(position, camera))
}

/// Write one avatar's solved mouth and nameplate poses into the arena
pub fn apply_output(arena: &mut JointArena, record: &AvatarRecord, output: &BoneOutput, camera: Vec3) {
    if let Some(mouth) = record.mouth {
        arena.set_position(mouth, output.mouth_world());
        arena.set_rotation(mouth, output.mouth.rotation);
    }
    if let Some(plate) = record.name_plate {
        let (position, rotation) = name_plate_pose(output, camera);
        arena.set_position(plate, position);
        arena.set_rotation(plate, rotation);
    }
}

pub fn gather_roots(
    arena: &JointArena,
    records: &[AvatarRecord],
    out: &mut [RootSample],
    min_len: usize,
) {
    out.par_iter_mut()
        .zip(records.par_iter())
        .with_min_len(min_len)
        .for_each(|(sample, record)| *sample = gather_root(arena, record));
}

/// Gather the joint picked by `select` for every avatar
pub fn gather_poses<F>(
    arena: &JointArena,
    records: &[AvatarRecord],
    out: &mut [PoseSample],
    min_len: usize,
    select: F,
) where
    F: Fn(&AvatarRecord) -> JointHandle + Sync,
{
    out.par_iter_mut()
        .zip(records.par_iter())
        .with_min_len(min_len)
        .for_each(|(sample, record)| *sample = gather_pose(arena, select(record)));
}

pub fn aggregate_all(
    records: &[AvatarRecord],
    roots: &[RootSample],
    heads: &[PoseSample],
    hips: &[PoseSample],
    out: &mut [BoneInput],
    min_len: usize,
) {
    out.par_iter_mut()
        .enumerate()
        .with_min_len(min_len)
        .for_each(|(i, input)| {
            *input = aggregate(&records[i], roots[i], heads[i], hips[i]);
        });
}

pub fn solve_all(
    records: &[AvatarRecord],
    inputs: &[BoneInput],
    out: &mut [BoneOutput],
    params: &SolveParams,
    min_len: usize,
) {
    out.par_iter_mut()
        .zip(inputs.par_iter().zip(records.par_iter()))
        .with_min_len(min_len)
        .for_each(|(output, (input, record))| {
            *output = solve_bones(input, &record.offsets, params);
        });
}

/// Sequential: the arena is a single mutable store
pub fn apply_all(arena: &mut JointArena, records: &[AvatarRecord], outputs: &[BoneOutput], camera: Vec3) {
    for (record, output) in records.iter().zip(outputs) {
        apply_output(arena, record, output, camera);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avatar::RegistrationParams;
    use mira_core::{AvatarKey, JointPose};
    use std::f32::consts::FRAC_PI_2;

    struct Fixture {
        arena: JointArena,
        record: AvatarRecord,
    }

    fn fixture() -> Fixture {
        let mut arena = JointArena::new();
        let root = arena.insert(JointPose::at(Vec3::ZERO));
        let head = arena.insert(JointPose::at(Vec3::new(0.0, 1.7, 0.0)));
        let hips = arena.insert(JointPose::at(Vec3::new(0.0, 1.0, 0.0)));
        let mouth = arena.insert(JointPose::default());
        let plate = arena.insert(JointPose::default());
        let params = RegistrationParams::new(AvatarKey::new(1), root, head, hips, root)
            .with_face(Vec3::new(0.0, 1.75, 0.08), Vec3::new(0.0, 1.62, 0.09))
            .with_mouth_joint(mouth)
            .with_name_plate(plate);
        let record = AvatarRecord::register(&params, &arena).unwrap();
        Fixture { arena, record }
    }

    fn run(arena: &JointArena, record: &AvatarRecord) -> BoneOutput {
        let input = aggregate(
            record,
            gather_root(arena, record),
            gather_pose(arena, record.head),
            gather_pose(arena, record.hips),
        );
        solve_bones(&input, &record.offsets, &SolveParams::default())
    }

    #[test]
    fn test_head_moves_chain_follows() {
        let mut f = fixture();
        f.arena.set_position(f.record.head, Vec3::new(0.0, 1.8, 0.0));
        let out = run(&f.arena, &f.record);

        assert_eq!(out.head.position, Vec3::new(0.0, 1.8, 0.0));
        assert_eq!(out.neck.position, out.head.position);
        assert_eq!(out.chest.position, out.head.position);
        assert_eq!(out.spine.position, out.head.position);
        let mouth_offset = out.mouth.position - out.head.position;
        assert!((mouth_offset - Vec3::new(0.0, -0.08, 0.09)).length() < 1e-5);
    }

    #[test]
    fn test_positions_are_root_relative() {
        let mut f = fixture();
        let shift = Vec3::new(5.0, 0.0, -3.0);
        for handle in [f.record.root, f.record.head, f.record.hips] {
            let position = f.arena.get(handle).unwrap().position;
            f.arena.set_position(handle, position + shift);
        }
        let out = run(&f.arena, &f.record);
        assert!((out.head.position - Vec3::new(0.0, 1.7, 0.0)).length() < 1e-5);
        assert!((out.mouth_world() - (Vec3::new(0.0, 1.62, 0.09) + shift)).length() < 1e-5);
    }

    #[test]
    fn test_scaled_avatar_scales_offsets_and_height() {
        let mut f = fixture();
        f.arena
            .set_pose(f.record.root, JointPose::default().with_scale(Vec3::splat(2.0)));
        let out = run(&f.arena, &f.record);
        let mouth_offset = out.mouth.position - out.head.position;
        assert!((mouth_offset - Vec3::new(0.0, -0.16, 0.18)).length() < 1e-5);
        assert!((out.height_offset - 2.4).abs() < 1e-5);
    }

    #[test]
    fn test_orientation_composition_order() {
        let mut f = fixture();
        let head_world = Quat::from_rotation_y(FRAC_PI_2);
        let hips_world = Quat::from_rotation_x(0.3);
        f.record.head_bind = Quat::from_rotation_z(0.2);
        f.record.hips_bind = Quat::from_rotation_z(-0.4);
        f.arena.set_rotation(f.record.head, head_world);
        f.arena.set_rotation(f.record.hips, hips_world);

        let out = run(&f.arena, &f.record);
        assert!(out.head.rotation.angle_between(head_world * f.record.head_bind) < 1e-4);
        assert!(out.hips.rotation.angle_between(f.record.hips_bind * hips_world) < 1e-4);
        assert_eq!(out.eye.rotation, out.head.rotation);
    }

    #[test]
    fn test_apply_places_mouth_and_plate() {
        let mut f = fixture();
        let out = run(&f.arena, &f.record);
        let camera = Vec3::new(3.0, 1.6, 0.0);
        apply_output(&mut f.arena, &f.record, &out, camera);

        let mouth = f.arena.get(f.record.mouth.unwrap()).unwrap();
        assert!((mouth.position - Vec3::new(0.0, 1.62, 0.09)).length() < 1e-5);

        let plate = f.arena.get(f.record.name_plate.unwrap()).unwrap();
        assert!((plate.position - Vec3::new(0.0, 2.2, 0.0)).length() < 1e-5);
        let facing = plate.rotation * Vec3::Z;
        assert!((facing - Vec3::X).length() < 1e-5);
    }

    #[test]
    fn test_plate_with_camera_overhead_has_zero_yaw() {
        let f = fixture();
        let out = run(&f.arena, &f.record);
        let (position, rotation) = name_plate_pose(&out, Vec3::new(0.0, 10.0, 0.0));
        assert_eq!(position.x, 0.0);
        assert_eq!(rotation, Quat::IDENTITY);
    }

    #[test]
    fn test_degenerate_bind_scale_is_guarded() {
        let mut f = fixture();
        f.record.offsets.bind_scale = Vec3::new(1.0, 0.0, 1.0);
        let out = run(&f.arena, &f.record);
        assert!(out.height_offset.is_finite());
    }

    #[test]
    fn test_slice_stages_match_single() {
        let f = fixture();
        let records = vec![f.record; 7];
        let mut roots = vec![RootSample::default(); 7];
        let mut heads = vec![PoseSample::default(); 7];
        let mut hips = vec![PoseSample::default(); 7];
        let mut inputs = vec![BoneInput::default(); 7];
        let mut outputs = vec![BoneOutput::default(); 7];

        gather_roots(&f.arena, &records, &mut roots, 2);
        gather_poses(&f.arena, &records, &mut heads, 2, |r| r.head);
        gather_poses(&f.arena, &records, &mut hips, 2, |r| r.hips);
        aggregate_all(&records, &roots, &heads, &hips, &mut inputs, 2);
        solve_all(&records, &inputs, &mut outputs, &SolveParams::default(), 2);

        let expected = run(&f.arena, &f.record);
        assert!(outputs.iter().all(|out| *out == expected));
    }
}
