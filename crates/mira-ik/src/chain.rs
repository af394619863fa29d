//! Iterative chain solve (FABRIK)
//!
//! Works on a slice of joint positions with fixed segment lengths. The first
//! position is the anchored root. Targets outside the reachable sphere are
//! clamped to `reach - slack` before iterating so the chain moves continuously
//! as a target crosses the reach boundary.

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use tracing::trace;

use mira_core::{from_to_rotation, safe_normalize, vec_is_finite, MiraError, MiraResult, UP};

/// Chain solve settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Tip-to-target distance considered converged
    pub tolerance: f32,
    pub max_iterations: u32,
    /// Distance kept between the clamped target and full extension
    pub reach_slack: f32,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-3,
            max_iterations: 10,
            reach_slack: 1e-3,
        }
    }
}

impl ChainConfig {
    pub fn validate(&self) -> MiraResult<()> {
        if !(self.tolerance > 0.0 && self.tolerance.is_finite()) {
            return Err(MiraError::config("chain tolerance must be positive"));
        }
        if !(self.reach_slack >= 0.0 && self.reach_slack.is_finite()) {
            return Err(MiraError::config("chain reach_slack must be non-negative"));
        }
        Ok(())
    }
}

/// How a chain solve ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainOutcome {
    Converged { iterations: u32 },
    /// Iteration budget exhausted; the chain was laid out straight toward the target
    Stretched,
}

impl ChainOutcome {
    pub fn converged(&self) -> bool {
        matches!(self, ChainOutcome::Converged { .. })
    }
}

/// FABRIK solver
#[derive(Debug, Clone, Copy, Default)]
pub struct ChainSolver {
    config: ChainConfig,
}

impl ChainSolver {
    pub fn new(config: ChainConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// Move `positions[1..]` so the last position reaches `target`.
    ///
    /// Segment lengths are taken from the incoming positions and preserved.
    pub fn solve(&self, positions: &mut [Vec3], target: Vec3) -> ChainOutcome {
        if positions.len() < 2 || !vec_is_finite(target) {
            return ChainOutcome::Converged { iterations: 0 };
        }

        let lengths: Vec<f32> = positions.windows(2).map(|w| w[0].distance(w[1])).collect();
        let reach: f32 = lengths.iter().sum();
        let root = positions[0];
        let last = positions.len() - 1;

        // Continuous reach handling: clamp before solving
        let tip_dir = safe_normalize(positions[last] - root, UP);
        let to_target = target - root;
        let limit = (reach - self.config.reach_slack).max(0.0);
        let target = if to_target.length() > limit {
            root + safe_normalize(to_target, tip_dir) * limit
        } else {
            target
        };

        let tolerance_sq = self.config.tolerance * self.config.tolerance;
        if positions[last].distance_squared(target) <= tolerance_sq {
            return ChainOutcome::Converged { iterations: 0 };
        }

        for iteration in 1..=self.config.max_iterations {
            // Backward: pin the tip to the target
            positions[last] = target;
            for i in (0..last).rev() {
                let dir = safe_normalize(positions[i] - positions[i + 1], segment_fallback(positions, i));
                positions[i] = positions[i + 1] + dir * lengths[i];
            }

            // Forward: pin the root back in place
            positions[0] = root;
            for i in 0..last {
                let dir = safe_normalize(positions[i + 1] - positions[i], segment_fallback(positions, i));
                positions[i + 1] = positions[i] + dir * lengths[i];
            }

            if positions[last].distance_squared(target) <= tolerance_sq {
                return ChainOutcome::Converged {
                    iterations: iteration,
                };
            }
        }

        trace!(
            joints = positions.len(),
            residual = positions[last].distance(target),
            "chain did not converge, stretching"
        );
        let dir = safe_normalize(target - root, tip_dir);
        let mut cursor = root;
        positions[0] = root;
        for (i, length) in lengths.iter().enumerate() {
            cursor += dir * *length;
            positions[i + 1] = cursor;
        }
        ChainOutcome::Stretched
    }
}

fn segment_fallback(positions: &[Vec3], i: usize) -> Vec3 {
    if i > 0 {
        safe_normalize(positions[i] - positions[i - 1], UP)
    } else {
        UP
    }
}

/// Swing each segment's rotation from its old direction to its new one.
///
/// `rotations[i]` belongs to the segment `positions[i] → positions[i + 1]`;
/// a trailing entry (the tip) is left unchanged.
pub fn swing_rotations(old: &[Vec3], new: &[Vec3], rotations: &mut [Quat]) {
    let segments = old.len().min(new.len()).saturating_sub(1).min(rotations.len());
    for i in 0..segments {
        let swing = from_to_rotation(old[i + 1] - old[i], new[i + 1] - new[i]);
        rotations[i] = (swing * rotations[i]).normalize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vertical_chain() -> Vec<Vec3> {
        vec![
            Vec3::ZERO,
            Vec3::new(0.0, 0.3, 0.0),
            Vec3::new(0.0, 0.5, 0.0),
            Vec3::new(0.0, 0.6, 0.0),
        ]
    }

    fn lengths(positions: &[Vec3]) -> Vec<f32> {
        positions.windows(2).map(|w| w[0].distance(w[1])).collect()
    }

    #[test]
    fn test_reachable_target_converges() {
        let solver = ChainSolver::default();
        let mut chain = vertical_chain();
        let before = lengths(&chain);
        let target = Vec3::new(0.2, 0.45, 0.1);

        let outcome = solver.solve(&mut chain, target);
        assert!(outcome.converged());
        assert!(chain[3].distance(target) <= 1e-3);
        assert_eq!(chain[0], Vec3::ZERO);
        for (a, b) in before.iter().zip(lengths(&chain)) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn test_unreachable_target_clamped_without_popping() {
        let solver = ChainSolver::default();
        let reach = 0.6;

        let mut near = vertical_chain();
        solver.solve(&mut near, Vec3::new(0.0, 0.0, 0.9));
        let mut far = vertical_chain();
        solver.solve(&mut far, Vec3::new(0.0, 0.0, 2.0));

        // Both land on the same clamped point just inside full extension
        assert!((near[3] - far[3]).length() < 1e-3);
        assert!((near[3].length() - (reach - 1e-3)).abs() < 2e-3);
    }

    #[test]
    fn test_budget_exhausted_stretches() {
        let solver = ChainSolver::new(ChainConfig {
            max_iterations: 0,
            ..ChainConfig::default()
        });
        let mut chain = vertical_chain();
        let outcome = solver.solve(&mut chain, Vec3::new(0.3, 0.0, 0.0));
        assert_eq!(outcome, ChainOutcome::Stretched);
        assert!((chain[1] - Vec3::new(0.3, 0.0, 0.0)).length() < 1e-5);
        assert!((chain[3] - Vec3::new(0.6, 0.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_degenerate_chain_stays_finite() {
        let solver = ChainSolver::default();
        let mut chain = vec![Vec3::ZERO; 4];
        solver.solve(&mut chain, Vec3::new(1.0, 2.0, 3.0));
        assert!(chain.iter().all(|p| vec_is_finite(*p)));

        let mut single = vec![Vec3::X];
        assert_eq!(
            solver.solve(&mut single, Vec3::Y),
            ChainOutcome::Converged { iterations: 0 }
        );
    }

    #[test]
    fn test_swing_rotations_follow_segments() {
        let old = [Vec3::ZERO, Vec3::Y, Vec3::new(0.0, 2.0, 0.0)];
        let new = [Vec3::ZERO, Vec3::X, Vec3::new(1.0, 1.0, 0.0)];
        let mut rotations = [Quat::IDENTITY; 3];
        swing_rotations(&old, &new, &mut rotations);

        assert!((rotations[0] * Vec3::Y - Vec3::X).length() < 1e-5);
        assert!((rotations[1] * Vec3::Y - Vec3::Y).length() < 1e-5);
        assert_eq!(rotations[2], Quat::IDENTITY);
    }
}
