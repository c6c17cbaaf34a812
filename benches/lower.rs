//! Criterion-based benchmark target that computes permutations
//! lowered per second on generated scenarios.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use permlower::fuzzing::perm::{random_scenario, PermScenario};
use permlower::liveness::LiveSets;
use permlower::lower_nodes_after_ra;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn scenarios(seed: u64, count: usize) -> Vec<PermScenario> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..count)
        .map(|_| random_scenario(rng.gen::<u64>()))
        .collect()
}

fn run_lowering(c: &mut Criterion) {
    const COUNT: usize = 1000;
    env_logger::init();
    let mut group = c.benchmark_group("benches");
    for iter in 0..3u64 {
        let cases = scenarios(iter, COUNT);
        group.throughput(Throughput::Elements(COUNT as u64));
        group.bench_with_input(BenchmarkId::from_parameter(iter), &iter, |b, _| {
            b.iter(|| {
                for scenario in &cases {
                    let mut built = scenario.build();
                    let live = LiveSets::compute(&built.graph, &built.sched);
                    lower_nodes_after_ra(
                        &mut built.graph,
                        &mut built.sched,
                        &built.reginfo,
                        &built.allocatable,
                        live,
                    );
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, run_lowering);
criterion_main!(benches);
