//! Benchmarks for the remote avatar pipeline

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use glam::Vec3;

use mira_remote::RemoteConfig;
use mira_test::{CrowdConfig, CrowdSimulator};

fn bench_remote_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("remote_frame");
    group.sample_size(30);
    for avatars in [16usize, 256, 1024] {
        let mut sim = CrowdSimulator::new(CrowdConfig {
            avatars,
            ..CrowdConfig::large()
        });
        let mut system = sim.start_system(RemoteConfig::large_crowd()).unwrap();
        sim.populate(&mut system).unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(avatars), &avatars, |b, _| {
            b.iter(|| system.update(Vec3::new(0.0, 1.6, -10.0)))
        });
    }
    group.finish();
}

fn bench_registration_churn(c: &mut Criterion) {
    let mut sim = CrowdSimulator::new(CrowdConfig::churning());
    let mut system = sim.start_system(RemoteConfig::default()).unwrap();
    sim.populate(&mut system).unwrap();

    c.bench_function("remote_leave_join", |b| {
        b.iter(|| {
            sim.leave(&mut system);
            sim.join(&mut system).unwrap();
        })
    });
}

criterion_group!(benches, bench_remote_frame, bench_registration_churn);
criterion_main!(benches);
