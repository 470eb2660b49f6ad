use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::SeedableRng;

use astrofit::{
    astrometric_model::{periodogram::FrequencyGrid, AstrometricModel},
    orbit_type::campbell_element::CampbellElements,
    simulation::{SimulatedCompanion, SyntheticStar},
};

fn fitted_model(n_obs: usize) -> AstrometricModel {
    let companion = SimulatedCompanion::new(
        480.0,
        0.3,
        0.2,
        CampbellElements::new(1.5, 0.9, 0.6, 2.1).unwrap(),
    )
    .unwrap();
    let star = SyntheticStar::builder()
        .n_obs(n_obs)
        .companion(companion)
        .build()
        .unwrap();
    let observations = star.simulate(&mut StdRng::seed_from_u64(0xC0FFEE)).unwrap();
    let mut model = AstrometricModel::new(observations).unwrap();
    model.fit().unwrap();
    model
}

fn bench_periodogram(c: &mut Criterion) {
    let mut group = c.benchmark_group("periodogram");
    group.sample_size(20);

    for n_obs in [100usize, 400] {
        let model = fitted_model(n_obs);
        let span = model.observations().time_span();
        let grid = FrequencyGrid::from_periods(10.0, span, span, 10.0).unwrap();

        group.bench_with_input(BenchmarkId::new("n_obs", n_obs), &grid, |b, grid| {
            b.iter(|| {
                let pgram = model.periodogram_on(black_box(grid)).unwrap();
                black_box(pgram.peak());
            })
        });
    }
    group.finish();
}

fn bench_fap(c: &mut Criterion) {
    let model = fitted_model(100);
    c.bench_function("fap/1000_powers", |b| {
        b.iter(|| {
            for k in 0..1000 {
                black_box(model.fap(black_box(k as f64 / 1000.0), 0.6).unwrap());
            }
        })
    });
}

criterion_group!(benches, bench_periodogram, bench_fap);
criterion_main!(benches);
