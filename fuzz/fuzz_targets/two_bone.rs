#![no_main]

use arbitrary::Arbitrary;
use glam::{Quat, Vec3};
use libfuzzer_sys::fuzz_target;

use mira_core::{vec_is_finite, IkTarget, JointPose};
use mira_ik::{ArmConfig, ArmSolver, TwoBoneChain, TwoBoneSettings};

#[derive(Debug, Arbitrary)]
struct Input {
    root: [f32; 3],
    mid: [f32; 3],
    tip: [f32; 3],
    target: [f32; 3],
    hint: Option<[f32; 3]>,
    rotation: [f32; 4],
    bend_normal: Option<[f32; 3]>,
    arm: bool,
}

fn finite(v: [f32; 3]) -> Option<Vec3> {
    let v = Vec3::from_array(v);
    vec_is_finite(v).then_some(v)
}

fuzz_target!(|input: Input| {
    // Joint positions come from a sane skeleton; targets may be anything
    let (Some(root), Some(mid), Some(tip)) = (finite(input.root), finite(input.mid), finite(input.tip))
    else {
        return;
    };
    let mut chain = TwoBoneChain::new(JointPose::at(root), JointPose::at(mid), JointPose::at(tip));
    let reach = chain.reach();

    let mut target = IkTarget::new(Vec3::from_array(input.target), Quat::from_array(input.rotation));
    if let Some(hint) = input.hint {
        target = target.with_hint(Vec3::from_array(hint));
    }
    let mut settings = TwoBoneSettings::default();
    if let Some(normal) = input.bend_normal {
        settings = settings.with_bend_normal(Vec3::from_array(normal));
    }

    if input.arm {
        let solver = ArmSolver::new(ArmConfig::default());
        solver.solve(&mut chain, &target, Quat::IDENTITY, Vec3::new(0.0, 1.25, 0.0), Vec3::new(0.0, 1.5, 0.0));
    } else {
        chain.solve(&target, Quat::IDENTITY, &settings);
    }

    let bounded = |v: Vec3| v.abs().max_element() < 1e6;
    let target_bounded = bounded(target.position) && target.hint_position().map_or(true, bounded);
    if reach < 1e6 && bounded(root) && target_bounded {
        assert!(vec_is_finite(chain.mid.position));
        assert!(vec_is_finite(chain.tip.position));
    }
});
