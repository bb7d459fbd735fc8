//! Training benchmarks: Fisher fit and BDT boosting on synthetic samples.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use fisher_mva::model::{
    BoostedTrees, ClassSample, FisherDiscriminant, Method, MethodOptions,
};

fn synthetic_class(rng: &mut StdRng, n_events: usize, n_features: usize, center: f64) -> ClassSample {
    let x = Array2::from_shape_fn((n_events, n_features), |_| {
        center + rng.gen_range(-1.0..1.0)
    });
    let w = (0..n_events).map(|_| rng.gen_range(0.5..1.5)).collect();
    ClassSample { x, w }
}

fn bench_fisher_fit(c: &mut Criterion) {
    let mut group = c.benchmark_group("fisher_fit");
    for n_events in [1_000usize, 10_000, 100_000] {
        let mut rng = StdRng::seed_from_u64(11);
        let signal = synthetic_class(&mut rng, n_events, 6, 1.0);
        let background = synthetic_class(&mut rng, n_events, 6, -1.0);
        group.bench_with_input(
            BenchmarkId::from_parameter(n_events),
            &n_events,
            |b, _| {
                b.iter(|| {
                    let mut method = FisherDiscriminant::new(
                        "Fisher",
                        &MethodOptions::parse("").unwrap(),
                    )
                    .unwrap();
                    method.train(&signal, &background).unwrap();
                    method
                });
            },
        );
    }
    group.finish();
}

fn bench_bdt_fit(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(13);
    let signal = synthetic_class(&mut rng, 2_000, 6, 0.5);
    let background = synthetic_class(&mut rng, 2_000, 6, -0.5);
    c.bench_function("bdt_fit_2k_10trees", |b| {
        b.iter(|| {
            let mut method = BoostedTrees::new(
                "BDT",
                &MethodOptions::parse("NTrees=10:MaxDepth=1").unwrap(),
            )
            .unwrap();
            method.train(&signal, &background).unwrap();
            method
        });
    });
}

criterion_group!(benches, bench_fisher_fit, bench_bdt_fit);
criterion_main!(benches);
