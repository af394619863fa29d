//! MIRA Remote - Bone pipeline for remote participants
//!
//! A cheap forward approximation of head/neck/chest/spine/hips/eye/mouth
//! poses for many remote avatars per frame. Each frame runs as a chain of
//! dependent jobs on a worker pool:
//!
//! ```text
//! gather root ─┐
//! gather head ─┼─> aggregate ─> solve ─> apply
//! gather hips ─┘
//! ```
//!
//! Registration and removal happen between frames and keep every per-avatar
//! array dense through swap-back removal.

pub mod avatar;
pub mod buffer;
pub mod registry;
pub mod scheduler;
pub mod stages;
pub mod system;

pub use avatar::*;
pub use buffer::*;
pub use registry::*;
pub use scheduler::*;
pub use stages::*;
pub use system::*;
