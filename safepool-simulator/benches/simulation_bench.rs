#[macro_use]
extern crate criterion;

use criterion::{black_box, Criterion};
use safepool_config::PoolConfig;
use safepool_simulator::Simulator;

/// Simulation throughput for a fixed operation count, with and without
/// the per-step validator.
fn benchmark_simulation_throughput(c: &mut Criterion) {
    let operations = 10_000;
    let seed = 42;
    let pool = PoolConfig {
        pool_size: 256 * 1024,
        granularity: 8,
    };

    c.bench_function("simulation_throughput", |b| {
        b.iter(|| {
            let mut simulator = Simulator::new(seed, pool.clone()).unwrap();
            black_box(simulator.run(operations).unwrap());
        })
    });

    c.bench_function("simulation_validated", |b| {
        b.iter(|| {
            let mut simulator = Simulator::new(seed, pool.clone())
                .unwrap()
                .with_validation(true);
            black_box(simulator.run(operations / 10).unwrap());
        })
    });
}

criterion_group!(benches, benchmark_simulation_throughput);
criterion_main!(benches);
