//! Crowd simulator for the remote avatar pipeline
//!
//! Builds an arena of remote participants, animates their head and hips with
//! bounded noise and churns registrations between frames. Seeded, so every
//! run with the same configuration produces the same poses.

use std::sync::Arc;

use glam::{Quat, Vec3};
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use mira_core::{vec_is_finite, AvatarKey, JointArena, JointHandle, JointPose, MiraResult};
use mira_remote::{RegistrationParams, RemoteAvatarSystem, RemoteConfig, SharedArena};

const HEAD_HEIGHT: f32 = 1.7;
const HIPS_HEIGHT: f32 = 1.0;
const MOUTH_OFFSET: Vec3 = Vec3::new(0.0, -0.08, 0.09);
const EYE_OFFSET: Vec3 = Vec3::new(0.03, 0.05, 0.08);

/// Crowd simulation settings
#[derive(Debug, Clone, PartialEq)]
pub struct CrowdConfig {
    /// Participants spawned by [`CrowdSimulator::populate`]
    pub avatars: usize,
    pub seed: u64,
    /// Distance between neighbouring participants on the spawn grid
    pub spacing: f32,
    /// Maximum head/hips displacement from rest per axis (metres)
    pub position_noise: f32,
    /// Maximum head yaw from rest (radians)
    pub yaw_noise: f32,
    /// Probability that one participant leaves and another joins per frame
    pub churn: f64,
    /// Uniform scale range of spawned participants
    pub scale_range: (f32, f32),
}

impl Default for CrowdConfig {
    fn default() -> Self {
        Self {
            avatars: 32,
            seed: 0x5eed,
            spacing: 1.5,
            position_noise: 0.05,
            yaw_noise: 0.6,
            churn: 0.0,
            scale_range: (1.0, 1.0),
        }
    }
}

impl CrowdConfig {
    /// Handful of static-sized participants, no churn
    pub fn small() -> Self {
        Self {
            avatars: 4,
            ..Default::default()
        }
    }

    /// Large session with mixed avatar sizes
    pub fn large() -> Self {
        Self {
            avatars: 512,
            scale_range: (0.8, 1.25),
            ..Default::default()
        }
    }

    /// Participants constantly joining and leaving
    pub fn churning() -> Self {
        Self {
            avatars: 64,
            churn: 0.5,
            scale_range: (0.9, 1.1),
            ..Default::default()
        }
    }
}

/// Joints of one simulated participant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatedAvatar {
    pub key: AvatarKey,
    pub origin: Vec3,
    pub scale: f32,
    pub root: JointHandle,
    pub head: JointHandle,
    pub hips: JointHandle,
    pub mouth: JointHandle,
    pub name_plate: JointHandle,
}

/// Counters of a simulation run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrowdStats {
    pub frames: u64,
    pub added: u64,
    pub removed: u64,
    pub peak: usize,
}

pub struct CrowdSimulator {
    config: CrowdConfig,
    rng: StdRng,
    arena: SharedArena,
    active: Vec<SimulatedAvatar>,
    next_key: u64,
    spawned: usize,
    stats: CrowdStats,
}

impl CrowdSimulator {
    pub fn new(config: CrowdConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            rng,
            arena: Arc::new(RwLock::new(JointArena::new())),
            active: Vec::new(),
            next_key: 0,
            spawned: 0,
            stats: CrowdStats::default(),
        }
    }

    pub fn config(&self) -> &CrowdConfig {
        &self.config
    }

    pub fn arena(&self) -> &SharedArena {
        &self.arena
    }

    /// Participants currently registered
    pub fn active(&self) -> &[SimulatedAvatar] {
        &self.active
    }

    pub fn stats(&self) -> CrowdStats {
        self.stats
    }

    /// Start a remote system over this simulator's arena
    pub fn start_system(&self, config: RemoteConfig) -> MiraResult<RemoteAvatarSystem> {
        RemoteAvatarSystem::init(config, Arc::clone(&self.arena))
    }

    /// Spawn and register the configured number of participants
    pub fn populate(&mut self, system: &mut RemoteAvatarSystem) -> MiraResult<()> {
        for _ in 0..self.config.avatars {
            self.join(system)?;
        }
        debug!(avatars = self.active.len(), "crowd populated");
        Ok(())
    }

    /// Spawn one participant on the next grid cell and register it
    pub fn join(&mut self, system: &mut RemoteAvatarSystem) -> MiraResult<AvatarKey> {
        let (low, high) = self.config.scale_range;
        let scale = if high > low {
            self.rng.gen_range(low..=high)
        } else {
            low
        };
        let avatar = self.spawn(scale);
        let params = RegistrationParams::new(
            avatar.key,
            avatar.root,
            avatar.head,
            avatar.hips,
            avatar.root,
        )
        .with_bind_scale(Vec3::splat(scale))
        .with_face(
            avatar.origin + (Vec3::Y * HEAD_HEIGHT + EYE_OFFSET) * scale,
            avatar.origin + (Vec3::Y * HEAD_HEIGHT + MOUTH_OFFSET) * scale,
        )
        .with_mouth_joint(avatar.mouth)
        .with_name_plate(avatar.name_plate);

        let key = system.add(params)?;
        self.active.push(avatar);
        self.stats.added += 1;
        self.stats.peak = self.stats.peak.max(self.active.len());
        Ok(key)
    }

    /// Remove a random participant; returns its key
    pub fn leave(&mut self, system: &mut RemoteAvatarSystem) -> Option<AvatarKey> {
        if self.active.is_empty() {
            return None;
        }
        let index = self.rng.gen_range(0..self.active.len());
        let avatar = self.active.swap_remove(index);
        system.remove(avatar.key).then(|| {
            self.stats.removed += 1;
            avatar.key
        })
    }

    /// Apply this frame's churn: at most one leave followed by one join
    pub fn churn(&mut self, system: &mut RemoteAvatarSystem) -> MiraResult<()> {
        if self.config.churn > 0.0 && self.rng.gen_bool(self.config.churn.min(1.0)) {
            self.leave(system);
            self.join(system)?;
        }
        Ok(())
    }

    /// Move every head and hips sample to a new bounded offset from rest
    pub fn animate(&mut self) {
        let noise = self.config.position_noise.abs();
        let yaw_noise = self.config.yaw_noise.abs();
        let mut arena = self.arena.write();
        for avatar in &self.active {
            let jitter = Vec3::new(
                self.rng.gen_range(-noise..=noise),
                self.rng.gen_range(-noise..=noise),
                self.rng.gen_range(-noise..=noise),
            );
            let yaw = self.rng.gen_range(-yaw_noise..=yaw_noise);
            let rest_head = avatar.origin + Vec3::Y * HEAD_HEIGHT * avatar.scale;
            let rest_hips = avatar.origin + Vec3::Y * HIPS_HEIGHT * avatar.scale;
            arena.set_pose(
                avatar.head,
                JointPose::new(rest_head + jitter, Quat::from_rotation_y(yaw)),
            );
            arena.set_pose(
                avatar.hips,
                JointPose::new(rest_hips + jitter * 0.5, Quat::from_rotation_y(yaw * 0.5)),
            );
        }
    }

    /// Churn, animate and run one pipeline frame
    pub fn step(&mut self, system: &mut RemoteAvatarSystem, camera: Vec3) -> MiraResult<()> {
        self.churn(system)?;
        self.animate();
        system.update(camera);
        self.stats.frames += 1;
        Ok(())
    }

    /// Describe every mismatch between the simulator and the system
    pub fn check_invariants(&self, system: &RemoteAvatarSystem) -> Vec<String> {
        let mut violations = Vec::new();
        if system.len() != self.active.len() {
            violations.push(format!(
                "system holds {} avatars, simulator {}",
                system.len(),
                self.active.len()
            ));
        }

        let arena = self.arena.read();
        for avatar in &self.active {
            let Some(index) = system.index_of(avatar.key) else {
                violations.push(format!("avatar {} not registered", avatar.key));
                continue;
            };
            if system.keys().get(index) != Some(&avatar.key) {
                violations.push(format!("avatar {} maps to foreign index {index}", avatar.key));
            }
            let Some(output) = system.frame_output(avatar.key) else {
                violations.push(format!("avatar {} has no output", avatar.key));
                continue;
            };
            let positions = [
                output.head.position,
                output.neck.position,
                output.spine.position,
                output.hips.position,
                output.mouth.position,
            ];
            if !positions.iter().all(|p| vec_is_finite(*p)) || !output.height_offset.is_finite() {
                violations.push(format!("avatar {} has non-finite output", avatar.key));
            }
            if output.neck.position != output.head.position {
                violations.push(format!("avatar {} neck detached from head", avatar.key));
            }
            if let (Some(head), Some(root)) = (arena.get(avatar.head), arena.get(avatar.root)) {
                let expected = head.position - root.position;
                if (output.head.position - expected).length() > 1e-4 {
                    violations.push(format!("avatar {} head out of date", avatar.key));
                }
            }
            if let Some(mouth) = arena.get(avatar.mouth) {
                if (mouth.position - output.mouth_world()).length() > 1e-4 {
                    violations.push(format!("avatar {} mouth joint not applied", avatar.key));
                }
            }
        }
        violations
    }

    fn spawn(&mut self, scale: f32) -> SimulatedAvatar {
        let columns = (self.config.avatars.max(1) as f32).sqrt().ceil() as usize;
        let cell = self.spawned;
        self.spawned += 1;
        let origin = Vec3::new(
            (cell % columns) as f32 * self.config.spacing,
            0.0,
            (cell / columns) as f32 * self.config.spacing,
        );

        let key = AvatarKey::new(self.next_key);
        self.next_key += 1;

        let mut arena = self.arena.write();
        let root = arena.insert(JointPose::at(origin).with_scale(Vec3::splat(scale)));
        let head = arena.insert(JointPose::at(origin + Vec3::Y * HEAD_HEIGHT * scale));
        let hips = arena.insert(JointPose::at(origin + Vec3::Y * HIPS_HEIGHT * scale));
        let mouth = arena.insert(JointPose::default());
        let name_plate = arena.insert(JointPose::default());

        SimulatedAvatar {
            key,
            origin,
            scale,
            root,
            head,
            hips,
            mouth,
            name_plate,
        }
    }
}
