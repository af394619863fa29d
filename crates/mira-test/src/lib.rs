//! MIRA Test Harness - Simulation and validation tooling
//!
//! This crate provides:
//! - Humanoid T-pose fixtures and reachable anchor sets
//! - A seeded crowd simulator for the remote avatar pipeline
//! - Invariant checks shared by the integration tests and benches

pub mod crowd;
pub mod fixture;

pub use crowd::*;
pub use fixture::*;
