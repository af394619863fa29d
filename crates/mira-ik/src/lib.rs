//! MIRA IK - Full-body pose solving from sparse anchors
//!
//! Solving order for one character per frame:
//! 1. Spine: bend limit, hip clamp, hip placement, chest→neck→head solve, chest clamp
//! 2. Shoulders: rotation-only follow toward the hand targets
//! 3. Arms: two-bone solve with torso capsule avoidance and elbow protection
//! 4. Legs: two-bone solve with knee hints
//! 5. Toes: rotation-only follow of the foot targets
//! 6. Apply: `target * offset` written into the joint arena per enabled slot
//!
//! Every stage works on a [`BodyPose`] snapshot so many characters can be
//! solved in parallel against a shared read-only arena.

pub mod apply;
pub mod arm;
pub mod body;
pub mod chain;
pub mod rig;
pub mod spine;
pub mod two_bone;

pub use apply::*;
pub use arm::*;
pub use body::*;
pub use chain::*;
pub use rig::*;
pub use spine::*;
pub use two_bone::*;
