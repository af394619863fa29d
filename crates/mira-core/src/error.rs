//! Error types for MIRA
//!
//! Per-frame solves never fail; these errors only surface at lifecycle and
//! configuration boundaries.

use thiserror::Error;

use crate::{AvatarKey, JointHandle};

/// Core MIRA errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MiraError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid joint handle: {0:?}")]
    InvalidJoint(JointHandle),

    #[error("Unknown avatar: {0}")]
    UnknownAvatar(AvatarKey),

    #[error("Avatar already registered: {0}")]
    DuplicateAvatar(AvatarKey),

    #[error("System has been shut down")]
    ShutDown,

    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

/// Result type for MIRA operations
pub type MiraResult<T> = Result<T, MiraError>;

impl MiraError {
    /// Shorthand for configuration validation failures
    pub fn config(msg: impl Into<String>) -> Self {
        MiraError::InvalidConfig(msg.into())
    }
}
