//! Identity types for MIRA
//!
//! Avatar keys are chosen by the caller (typically a participant or network
//! object id). Joint handles index into a [`JointArena`](crate::JointArena).

use std::fmt;

use serde::{Deserialize, Serialize};

/// External key of a registered remote avatar
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct AvatarKey(pub u64);

impl AvatarKey {
    #[inline]
    pub fn new(id: u64) -> Self {
        AvatarKey(id)
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for AvatarKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Avatar({})", self.0)
    }
}

impl fmt::Display for AvatarKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable handle of a joint pose record inside a joint arena
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JointHandle(pub u32);

impl JointHandle {
    #[inline]
    pub fn new(index: u32) -> Self {
        JointHandle(index)
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for JointHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Joint(#{})", self.0)
    }
}
