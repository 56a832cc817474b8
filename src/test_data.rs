use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use crate::curve::TuningCurve;
use crate::model::DoubleVonMises;

/// Sample `truth` at `angles` and add gaussian noise with standard deviation `sd`
pub fn noisy_curve(
    truth: &DoubleVonMises,
    angles: &[f64],
    sd: f64,
    seed: u64,
) -> TuningCurve<'static, 'static> {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, sd).unwrap();
    let response = angles
        .iter()
        .map(|t| truth.density(*t) + noise.sample(&mut rng))
        .collect();
    TuningCurve::from((angles.to_vec(), response))
}

/// Draw `n` stimulus angles uniformly from $`[0, 2\pi)`$, in presentation order
pub fn random_angles(n: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| rng.gen_range(0.0..std::f64::consts::TAU))
        .collect()
}

/// Present each angle of `grid` `repeats` times in a shuffled order
pub fn shuffled_trials(grid: &[f64], repeats: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut trials: Vec<f64> = (0..repeats).flat_map(|_| grid.iter().copied()).collect();
    trials.shuffle(&mut rng);
    trials
}
