use std::f64::consts::PI;

use criterion::{black_box, Criterion};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use vmtuning::model::CircularModel;
use vmtuning::{
    angle_grid, AngularSmoother, DoubleVonMises, DoubleVonMisesFitter, FitConfig,
    ResponseMatrix, TuningCurve, TuningPipeline,
};

fn population(n_neurons: usize, angles: &[f64]) -> ResponseMatrix {
    let mut rng = StdRng::seed_from_u64(7);
    let noise = Normal::new(0.0, 0.05).unwrap();
    let rows: Vec<Vec<f64>> = (0..n_neurons)
        .map(|i| {
            let mu = i as f64 * 0.37;
            let truth = DoubleVonMises::new(1.0, 0.6, mu, mu + PI, 3.0, 2.0).unwrap();
            angles
                .iter()
                .map(|t| truth.density(*t) + noise.sample(&mut rng))
                .collect()
        })
        .collect();
    ResponseMatrix::from_rows(&rows).unwrap()
}

fn single_neuron(c: &mut Criterion) {
    let angles = angle_grid(144);
    let matrix = population(1, &angles);
    let curve = TuningCurve::from((angles.as_slice(), matrix.row(0)));

    let smoother = AngularSmoother::default();
    c.bench_function("smooth_144", |b| b.iter(|| smoother.smooth(black_box(&curve))));

    let smoothed = curve.with_response(smoother.smooth(&curve).unwrap());
    let config = FitConfig::default();
    c.bench_function("fit_144", |b| {
        b.iter(|| {
            let mut fitter = DoubleVonMisesFitter::new(smoothed.borrow());
            fitter.fit_with(black_box(&config))
        })
    });
}

fn population_fit(c: &mut Criterion) {
    let angles = angle_grid(144);
    let matrix = population(64, &angles);
    let pipeline = TuningPipeline::default();
    c.bench_function("pipeline_64_neurons", |b| {
        b.iter(|| pipeline.fit_all(black_box(&matrix), &angles))
    });
}

fn fitting(c: &mut Criterion) {
    single_neuron(c);
    population_fit(c);
}

criterion::criterion_group!(benches, fitting);
criterion::criterion_main!(benches);
