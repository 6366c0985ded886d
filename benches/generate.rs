/// DRNG generate-path benchmarks.
///
/// Measures raw DRBG output, the full instance generate path (reseed
/// bookkeeping included), and one seeding round.
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use esdm::config::{Config, ForceFips};
use esdm::crypto::{DrngState, HmacDrbg};
use esdm::drng::seeder;
use esdm::EsdmContext;
use std::sync::Arc;

fn ready_context() -> Arc<EsdmContext> {
    let config = Config::default();
    config.set_force_fips(ForceFips::Disabled);
    let ctx = EsdmContext::new(config);
    ctx.initialise().expect("initialise");
    seeder::seed_work(&ctx).expect("seed");
    ctx
}

fn bench_drbg_generate(c: &mut Criterion) {
    let mut group = c.benchmark_group("drbg_generate");
    let mut drbg = HmacDrbg::new();
    drbg.seed(b"bench seed material").unwrap();

    for size in [32usize, 4096, 65536] {
        let mut out = vec![0u8; size];
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                drbg.generate(black_box(&mut out)).unwrap();
            });
        });
    }
    group.finish();
}

fn bench_instance_generate(c: &mut Criterion) {
    let mut group = c.benchmark_group("instance_generate");
    let ctx = ready_context();
    let init = ctx.manager.init_instance().unwrap();

    for size in [32usize, 4096, 65500] {
        let mut out = vec![0u8; size];
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                init.generate(black_box(&ctx), black_box(&mut out)).unwrap();
            });
        });
    }
    group.finish();
}

fn bench_seeding_round(c: &mut Criterion) {
    let ctx = ready_context();
    let init = ctx.manager.init_instance().unwrap();

    c.bench_function("seed_round", |b| {
        b.iter(|| {
            let _pool = ctx.manager.pool_try_lock().unwrap();
            seeder::seed_drng(black_box(&ctx), black_box(&init)).unwrap();
        });
    });
}

criterion_group!(
    benches,
    bench_drbg_generate,
    bench_instance_generate,
    bench_seeding_round
);
criterion_main!(benches);
