//! Remote avatar system
//!
//! Owns the dense per-avatar arrays, the worker pool and the double-buffered
//! outputs. The caller owns the joint arena and shares it through
//! [`SharedArena`]; it must not hold the arena lock across [`RemoteAvatarSystem::complete`].

use std::sync::Arc;

use glam::Vec3;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use mira_core::{AvatarKey, JointArena, MiraError, MiraResult, SCALE_EPSILON};

use crate::avatar::{AvatarRecord, BoneInput, BoneOutput, PoseSample, RegistrationParams, RootSample};
use crate::buffer::PingPong;
use crate::registry::{reserve_to, KeyedRegistry};
use crate::scheduler::{JobHandle, JobScheduler};
use crate::stages::{
    aggregate, aggregate_all, apply_all, gather_pose, gather_poses, gather_root, gather_roots,
    solve_all, solve_bones, SolveParams,
};

/// Joint arena shared between the caller and the pipeline jobs
pub type SharedArena = Arc<RwLock<JointArena>>;

/// Remote pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Slots reserved up front in every per-avatar array
    pub initial_capacity: usize,
    /// Worker threads (0 = one per core)
    pub worker_threads: usize,
    /// Minimum avatars handled by one parallel batch
    pub batch_size: usize,
    /// Nameplate height per unit of scale ratio
    pub name_plate_height_factor: f32,
    pub scale_epsilon: f32,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 16,
            worker_threads: 0,
            batch_size: 32,
            name_plate_height_factor: 1.2,
            scale_epsilon: SCALE_EPSILON,
        }
    }
}

impl RemoteConfig {
    /// Settings for hundreds of concurrent participants
    pub fn large_crowd() -> Self {
        Self {
            initial_capacity: 512,
            batch_size: 64,
            ..Default::default()
        }
    }

    /// One worker; useful for deterministic tests and tiny sessions
    pub fn single_threaded() -> Self {
        Self {
            worker_threads: 1,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> MiraResult<()> {
        if self.batch_size == 0 {
            return Err(MiraError::config("batch_size must be at least 1"));
        }
        if !self.name_plate_height_factor.is_finite() {
            return Err(MiraError::config(format!(
                "name_plate_height_factor must be finite, got {}",
                self.name_plate_height_factor
            )));
        }
        if !(self.scale_epsilon.is_finite() && self.scale_epsilon > 0.0) {
            return Err(MiraError::config(format!(
                "scale_epsilon must be positive, got {}",
                self.scale_epsilon
            )));
        }
        Ok(())
    }

    fn solve_params(&self) -> SolveParams {
        SolveParams {
            height_factor: self.name_plate_height_factor,
            scale_epsilon: self.scale_epsilon,
        }
    }
}

/// Per-avatar arrays, all indexed by the registry's dense index
#[derive(Debug, Default)]
struct FrameData {
    records: RwLock<Vec<AvatarRecord>>,
    roots: RwLock<Vec<RootSample>>,
    heads: RwLock<Vec<PoseSample>>,
    hips: RwLock<Vec<PoseSample>>,
    inputs: RwLock<Vec<BoneInput>>,
    outputs: PingPong<Vec<BoneOutput>>,
}

impl FrameData {
    fn reserve(&self, capacity: usize) {
        reserve_to(&mut self.records.write(), capacity);
        reserve_to(&mut self.roots.write(), capacity);
        reserve_to(&mut self.heads.write(), capacity);
        reserve_to(&mut self.hips.write(), capacity);
        reserve_to(&mut self.inputs.write(), capacity);
        let (mut front, mut back) = self.outputs.write_both();
        reserve_to(&mut front, capacity);
        reserve_to(&mut back, capacity);
    }

    fn push(&self, record: AvatarRecord, input: BoneInput, output: BoneOutput) {
        self.records.write().push(record);
        self.roots.write().push(input.root);
        self.heads.write().push(input.head);
        self.hips.write().push(input.hips);
        self.inputs.write().push(input);
        let (mut front, mut back) = self.outputs.write_both();
        front.push(output);
        back.push(output);
    }

    fn swap_remove(&self, index: usize) {
        self.records.write().swap_remove(index);
        self.roots.write().swap_remove(index);
        self.heads.write().swap_remove(index);
        self.hips.write().swap_remove(index);
        self.inputs.write().swap_remove(index);
        let (mut front, mut back) = self.outputs.write_both();
        front.swap_remove(index);
        back.swap_remove(index);
    }
}

/// Bone pipeline for every registered remote participant
pub struct RemoteAvatarSystem {
    config: RemoteConfig,
    scheduler: JobScheduler,
    arena: SharedArena,
    registry: KeyedRegistry,
    data: Arc<FrameData>,
    last_frame: JobHandle,
    frames: u64,
    shut_down: bool,
}

impl std::fmt::Debug for RemoteAvatarSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteAvatarSystem")
            .field("avatars", &self.registry.len())
            .field("capacity", &self.registry.capacity())
            .field("frames", &self.frames)
            .field("shut_down", &self.shut_down)
            .finish()
    }
}

impl RemoteAvatarSystem {
    pub fn init(config: RemoteConfig, arena: SharedArena) -> MiraResult<Self> {
        config.validate()?;
        let scheduler = JobScheduler::new(config.worker_threads)?;
        let registry = KeyedRegistry::with_capacity(config.initial_capacity);
        let data = Arc::new(FrameData::default());
        data.reserve(registry.capacity());

        info!(
            threads = scheduler.threads(),
            capacity = registry.capacity(),
            batch_size = config.batch_size,
            "remote avatar system started"
        );

        Ok(Self {
            config,
            scheduler,
            arena,
            registry,
            data,
            last_frame: JobHandle::completed(),
            frames: 0,
            shut_down: false,
        })
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    pub fn arena(&self) -> &SharedArena {
        &self.arena
    }

    /// Register a participant under `params.key`.
    ///
    /// Blocks on any in-flight frame. The avatar's outputs are seeded from
    /// the arena's current pose, so queries answer before its first frame.
    pub fn add(&mut self, params: RegistrationParams) -> MiraResult<AvatarKey> {
        if self.shut_down {
            return Err(MiraError::ShutDown);
        }
        self.complete();
        if self.registry.contains(params.key) {
            return Err(MiraError::DuplicateAvatar(params.key));
        }

        let (record, input, output) = {
            let arena = self.arena.read();
            let record = AvatarRecord::register(&params, &arena)?;
            let input = aggregate(
                &record,
                gather_root(&arena, &record),
                gather_pose(&arena, record.head),
                gather_pose(&arena, record.hips),
            );
            let output = solve_bones(&input, &record.offsets, &self.config.solve_params());
            (record, input, output)
        };

        let capacity = self.registry.capacity();
        let index = self.registry.insert(params.key);
        if self.registry.capacity() != capacity {
            self.data.reserve(self.registry.capacity());
        }
        self.data.push(record, input, output);

        debug!(key = %params.key, index, len = self.registry.len(), "remote avatar added");
        Ok(params.key)
    }

    /// Swap-back removal; false for unknown keys
    pub fn remove(&mut self, key: AvatarKey) -> bool {
        self.complete();
        match self.registry.remove(key) {
            Some((index, moved)) => {
                self.data.swap_remove(index);
                debug!(%key, index, ?moved, len = self.registry.len(), "remote avatar removed");
                true
            }
            None => false,
        }
    }

    pub fn try_remove(&mut self, key: AvatarKey) -> MiraResult<()> {
        if self.remove(key) {
            Ok(())
        } else {
            Err(MiraError::UnknownAvatar(key))
        }
    }

    pub fn contains(&self, key: AvatarKey) -> bool {
        self.registry.contains(key)
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    pub fn index_of(&self, key: AvatarKey) -> Option<usize> {
        self.registry.index_of(key)
    }

    pub fn capacity(&self) -> usize {
        self.registry.capacity()
    }

    /// Registered keys in dense order
    pub fn keys(&self) -> &[AvatarKey] {
        self.registry.keys()
    }

    /// Frames scheduled so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Schedule gather → aggregate → solve → apply for every avatar.
    ///
    /// The frame starts once the previous one has finished. The returned
    /// handle completes after the outputs have been published.
    pub fn schedule_frame(&mut self, camera: Vec3) -> JobHandle {
        if self.shut_down {
            warn!("frame scheduled after shutdown");
            return JobHandle::completed();
        }
        let min_len = self.config.batch_size;
        let params = self.config.solve_params();
        let previous = [self.last_frame.clone()];

        let roots = {
            let data = Arc::clone(&self.data);
            let arena = Arc::clone(&self.arena);
            self.scheduler.schedule("gather-root", &previous, move || {
                let arena = arena.read();
                let records = data.records.read();
                gather_roots(&arena, &records, &mut data.roots.write(), min_len);
            })
        };
        let heads = {
            let data = Arc::clone(&self.data);
            let arena = Arc::clone(&self.arena);
            self.scheduler.schedule("gather-head", &previous, move || {
                let arena = arena.read();
                let records = data.records.read();
                gather_poses(&arena, &records, &mut data.heads.write(), min_len, |r| r.head);
            })
        };
        let hips = {
            let data = Arc::clone(&self.data);
            let arena = Arc::clone(&self.arena);
            self.scheduler.schedule("gather-hips", &previous, move || {
                let arena = arena.read();
                let records = data.records.read();
                gather_poses(&arena, &records, &mut data.hips.write(), min_len, |r| r.hips);
            })
        };

        let gathered = self.scheduler.combine(&[roots, heads, hips]);

        let aggregated = {
            let data = Arc::clone(&self.data);
            self.scheduler.schedule("aggregate", &[gathered], move || {
                let records = data.records.read();
                let roots = data.roots.read();
                let heads = data.heads.read();
                let hips = data.hips.read();
                aggregate_all(
                    &records,
                    &roots,
                    &heads,
                    &hips,
                    &mut data.inputs.write(),
                    min_len,
                );
            })
        };

        let solved = {
            let data = Arc::clone(&self.data);
            self.scheduler.schedule("solve", &[aggregated], move || {
                let records = data.records.read();
                let inputs = data.inputs.read();
                solve_all(&records, &inputs, &mut data.outputs.write_back(), &params, min_len);
            })
        };

        let frame = self.frames + 1;
        let applied = {
            let data = Arc::clone(&self.data);
            let arena = Arc::clone(&self.arena);
            self.scheduler.schedule("apply", &[solved], move || {
                {
                    let mut arena = arena.write();
                    let records = data.records.read();
                    let outputs = data.outputs.read_back();
                    apply_all(&mut arena, &records, &outputs, camera);
                }
                data.outputs.flip();
                trace!(frame, "remote frame published");
            })
        };

        self.frames = frame;
        self.last_frame = applied.clone();
        applied
    }

    /// Block until the last scheduled frame has finished
    pub fn complete(&self) {
        self.scheduler.wait(&self.last_frame);
    }

    /// Schedule a frame and wait for it
    pub fn update(&mut self, camera: Vec3) {
        let frame = self.schedule_frame(camera);
        frame.wait();
    }

    /// Solved pose of `key` from the last completed frame
    pub fn frame_output(&self, key: AvatarKey) -> Option<BoneOutput> {
        let index = self.registry.index_of(key)?;
        self.data.outputs.read_front().get(index).copied()
    }

    pub fn try_frame_output(&self, key: AvatarKey) -> MiraResult<BoneOutput> {
        self.frame_output(key).ok_or(MiraError::UnknownAvatar(key))
    }

    /// World-space mouth position from the last completed frame
    pub fn mouth_position(&self, key: AvatarKey) -> Option<Vec3> {
        self.frame_output(key).map(|output| output.mouth_world())
    }

    /// Hip-to-nameplate height from the last completed frame
    pub fn height_offset(&self, key: AvatarKey) -> Option<f32> {
        self.frame_output(key).map(|output| output.height_offset)
    }

    /// Finish outstanding work and refuse further registrations
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.complete();
        self.shut_down = true;
        info!(frames = self.frames, avatars = self.registry.len(), "remote avatar system shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }
}

impl Drop for RemoteAvatarSystem {
    fn drop(&mut self) {
        self.complete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mira_core::{JointHandle, JointPose};

    fn system() -> RemoteAvatarSystem {
        let arena = Arc::new(RwLock::new(JointArena::new()));
        RemoteAvatarSystem::init(RemoteConfig::single_threaded(), arena).unwrap()
    }

    fn params(system: &RemoteAvatarSystem, key: u64) -> RegistrationParams {
        let mut arena = system.arena().write();
        let root = arena.insert(JointPose::default());
        let head = arena.insert(JointPose::at(Vec3::new(0.0, 1.7, 0.0)));
        let hips = arena.insert(JointPose::at(Vec3::new(0.0, 1.0, 0.0)));
        RegistrationParams::new(AvatarKey::new(key), root, head, hips, root)
    }

    #[test]
    fn test_config_validation() {
        assert!(RemoteConfig::default().validate().is_ok());
        assert!(RemoteConfig::large_crowd().validate().is_ok());
        let bad = RemoteConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = RemoteConfig {
            scale_epsilon: 0.0,
            ..Default::default()
        };
        let arena = Arc::new(RwLock::new(JointArena::new()));
        assert!(matches!(
            RemoteAvatarSystem::init(bad, arena),
            Err(MiraError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_config_from_partial_json() {
        let config: RemoteConfig =
            serde_json::from_str(r#"{ "batch_size": 8, "worker_threads": 2 }"#).unwrap();
        assert_eq!(config.batch_size, 8);
        assert_eq!(config.worker_threads, 2);
        assert_eq!(config.name_plate_height_factor, 1.2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_add_rejects_bad_handles_and_duplicates() {
        let mut system = system();
        let p = params(&system, 1);
        assert_eq!(system.add(p).unwrap(), AvatarKey::new(1));
        assert_eq!(system.add(p), Err(MiraError::DuplicateAvatar(AvatarKey::new(1))));

        let missing = JointHandle::new(999);
        let bad = RegistrationParams::new(AvatarKey::new(2), missing, p.head, p.hips, p.root);
        assert_eq!(system.add(bad), Err(MiraError::InvalidJoint(missing)));
        assert_eq!(system.len(), 1);
    }

    #[test]
    fn test_remove_unknown_is_false() {
        let mut system = system();
        assert!(!system.remove(AvatarKey::new(5)));
        assert_eq!(
            system.try_remove(AvatarKey::new(5)),
            Err(MiraError::UnknownAvatar(AvatarKey::new(5)))
        );
    }

    #[test]
    fn test_outputs_seeded_at_registration() {
        let mut system = system();
        let p = params(&system, 7).with_face(Vec3::ZERO, Vec3::new(0.0, 1.6, 0.1));
        system.add(p).unwrap();
        let mouth = system.mouth_position(AvatarKey::new(7)).unwrap();
        assert!((mouth - Vec3::new(0.0, 1.6, 0.1)).length() < 1e-5);
        assert!((system.height_offset(AvatarKey::new(7)).unwrap() - 1.2).abs() < 1e-6);
    }

    #[test]
    fn test_capacity_doubles() {
        let arena = Arc::new(RwLock::new(JointArena::new()));
        let config = RemoteConfig {
            initial_capacity: 0,
            ..RemoteConfig::single_threaded()
        };
        let mut system = RemoteAvatarSystem::init(config, arena).unwrap();
        for key in 0..5 {
            let p = params(&system, key);
            system.add(p).unwrap();
        }
        assert_eq!(system.capacity(), 8);
    }

    #[test]
    fn test_shutdown_refuses_new_work() {
        let mut system = system();
        let p = params(&system, 1);
        system.add(p).unwrap();
        system.update(Vec3::ZERO);
        system.shutdown();
        assert!(system.is_shut_down());

        let p = params(&system, 2);
        assert_eq!(system.add(p), Err(MiraError::ShutDown));
        assert!(system.schedule_frame(Vec3::ZERO).is_complete());
        assert!(system.frame_output(AvatarKey::new(1)).is_some());
        assert!(system.try_frame_output(AvatarKey::new(2)).is_err());
    }
}
