//! MIRA Core - Fundamental types and primitives
//!
//! This crate defines the types shared by every MIRA solver:
//! - Identifiers (AvatarKey, JointHandle)
//! - Numerically guarded math helpers (safe normalize/divide, law of cosines, swing/twist)
//! - Capsule geometry for torso and hand avoidance
//! - Joint arena, humanoid slots, skeleton reference and calibration pose

pub mod error;
pub mod geometry;
pub mod id;
pub mod math;
pub mod pose;

pub use error::*;
pub use geometry::*;
pub use id::*;
pub use math::*;
pub use pose::*;

pub use glam::{Mat4, Quat, Vec3};
