//! MIRA Crowd Demo
//!
//! Drives one local full-body rig and a crowd of remote participants on a
//! fixed tick. Usage: `crowd-demo [config.json]`.

use std::time::{Duration, Instant};

use glam::Vec3;
use serde::Deserialize;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mira_core::HumanoidJoint;
use mira_ik::{BodyRig, RigConfig};
use mira_remote::RemoteConfig;
use mira_test::{reach_anchors, spawn_humanoid, CrowdConfig, CrowdSimulator};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct DemoConfig {
    avatars: usize,
    seed: u64,
    churn: f64,
    /// Frames to run; 0 runs until Ctrl-C
    frames: u64,
    tick_ms: u64,
    remote: RemoteConfig,
    rig: RigConfig,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            avatars: 64,
            seed: 1,
            churn: 0.05,
            frames: 300,
            tick_ms: 16,
            remote: RemoteConfig::default(),
            rig: RigConfig::default(),
        }
    }
}

fn load_config() -> Result<DemoConfig, Box<dyn std::error::Error>> {
    match std::env::args().nth(1) {
        Some(path) => {
            let text = std::fs::read_to_string(&path)?;
            let config = serde_json::from_str(&text)?;
            info!(%path, "loaded demo config");
            Ok(config)
        }
        None => Ok(DemoConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    let config = load_config()?;

    let mut sim = CrowdSimulator::new(CrowdConfig {
        avatars: config.avatars,
        seed: config.seed,
        churn: config.churn,
        scale_range: (0.85, 1.15),
        ..Default::default()
    });
    let mut system = sim.start_system(config.remote.clone())?;
    sim.populate(&mut system)?;

    let origin = Vec3::new(0.0, 0.0, -4.0);
    let rig = {
        let mut arena = sim.arena().write();
        let skeleton = spawn_humanoid(&mut arena, origin);
        BodyRig::calibrate(skeleton, &arena, config.rig)?
    };
    let local_head = rig
        .skeleton()
        .handle(HumanoidJoint::Head)
        .ok_or("local rig has no head")?;

    info!(
        remote = system.len(),
        threads = system.config().worker_threads,
        tick_ms = config.tick_ms,
        "crowd demo running"
    );

    let mut ticker = interval(Duration::from_millis(config.tick_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut frame = 0u64;
    let mut busy = Duration::ZERO;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }

        let started = Instant::now();
        let phase = frame as f32 * 0.05;
        let camera = {
            let mut arena = sim.arena().write();
            rig.solve_and_apply(&reach_anchors(origin, phase), &mut arena);
            arena.get(local_head).map(|pose| pose.position).unwrap_or(origin)
        };
        tokio::task::block_in_place(|| sim.step(&mut system, camera))?;
        busy += started.elapsed();
        frame += 1;

        if frame % 60 == 0 {
            let stats = sim.stats();
            info!(
                frame,
                remote = system.len(),
                joined = stats.added,
                left = stats.removed,
                avg_us = (busy.as_micros() / 60) as u64,
                "frame stats"
            );
            busy = Duration::ZERO;

            let violations = sim.check_invariants(&system);
            if !violations.is_empty() {
                warn!(count = violations.len(), first = %violations[0], "pipeline invariants violated");
            }
        }

        if config.frames != 0 && frame >= config.frames {
            break;
        }
    }

    system.shutdown();
    let stats = sim.stats();
    info!(frames = stats.frames, peak = stats.peak, "crowd demo finished");
    Ok(())
}
