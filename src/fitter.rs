//! Nonlinear least squares estimation of [`DoubleVonMises`] parameters.
//!
//! The optimizer is a bounded Levenberg-Marquardt method. Trial steps are
//! projected back onto the feasible region (non-negative amplitudes and
//! concentrations) before their cost is evaluated, and a step is only taken
//! when it reduces the sum of squared residuals.
//!
//! Because the objective is highly non-convex in the preferred angles and
//! concentrations, the starting point matters. [`DoubleVonMisesFitter::guess`]
//! seeds the primary lobe at the global maximum and the secondary lobe at the
//! highest local maximum roughly opposite it. A seed with equal lobes and equal
//! concentrations can never leave the symmetric subspace, so
//! [`DoubleVonMisesFitter::fit_with`] also restarts from seeds with unequal
//! concentrations and keeps the lowest loss.
use std::f64::consts::PI;
use std::time::{Duration, Instant};

use nalgebra::{Matrix6, Vector6};
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::arrayops::{circular_distance, wrap_angle};
use crate::curve::TuningCurve;
use crate::model::DoubleVonMises;

const MIN_DAMPING: f64 = 1e-12;
const MAX_DAMPING: f64 = 1e16;
const DIAGONAL_FLOOR: f64 = 1e-12;
const COST_FLOOR: f64 = 1e-28;

/// The number of free parameters in the model
const N_PARAMS: usize = 6;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    #[error("Insufficient signal to fit a tuning curve: {0}")]
    InsufficientSignal(&'static str),
    #[error("Failed to converge within {iterations} iterations, loss = {loss}")]
    NotConverged { iterations: usize, loss: f64 },
    #[error("Exceeded the time budget of {budget:?} after {iterations} iterations")]
    TimedOut { iterations: usize, budget: Duration },
    #[error("The loss became non-finite at iteration {0}")]
    NonFiniteLoss(usize),
}

impl FitError {
    /// Whether the neuron was skipped before optimization began
    pub fn is_insufficient_signal(&self) -> bool {
        matches!(self, Self::InsufficientSignal(_))
    }
}

/// Hyperparameters for fitting a [`DoubleVonMises`] model
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FitConfig {
    /// The maximum number of accepted-or-rejected outer iterations
    pub max_iter: usize,
    /// Converge when the relative reduction in loss of an accepted step falls below this
    pub ftol: f64,
    /// Converge when the relative size of an accepted step falls below this
    pub xtol: f64,
    /// Converge when the largest gradient component falls below this
    pub gtol: f64,
    /// The starting Levenberg-Marquardt damping factor
    pub initial_damping: f64,
    /// The starting concentration for both lobes
    pub initial_kappa: f64,
    /// When set, also start from each lobe in turn at this concentration with
    /// the other at `initial_kappa`
    pub restart_kappa: Option<f64>,
    /// The minimum angular distance from the primary peak for a local maximum
    /// to seed the secondary lobe
    pub min_peak_separation: f64,
    /// An optional wall clock limit on a single fit, shared by all of its starts
    pub time_budget: Option<Duration>,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            max_iter: 500,
            ftol: 1e-10,
            xtol: 1e-10,
            gtol: 1e-12,
            initial_damping: 1e-3,
            initial_kappa: 1.0,
            restart_kappa: Some(8.0),
            min_peak_separation: 0.75 * PI,
            time_budget: None,
        }
    }
}

impl FitConfig {
    pub fn max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn ftol(mut self, ftol: f64) -> Self {
        self.ftol = ftol;
        self
    }

    pub fn xtol(mut self, xtol: f64) -> Self {
        self.xtol = xtol;
        self
    }

    pub fn gtol(mut self, gtol: f64) -> Self {
        self.gtol = gtol;
        self
    }

    pub fn initial_damping(mut self, initial_damping: f64) -> Self {
        self.initial_damping = initial_damping;
        self
    }

    pub fn initial_kappa(mut self, initial_kappa: f64) -> Self {
        self.initial_kappa = initial_kappa;
        self
    }

    pub fn restart_kappa(mut self, restart_kappa: Option<f64>) -> Self {
        self.restart_kappa = restart_kappa;
        self
    }

    /// The `(kappa0, kappa1)` pairs each fit starts from, in the order they are tried
    pub fn kappa_starts(&self) -> Vec<(f64, f64)> {
        let k = self.initial_kappa;
        let mut starts = vec![(k, k)];
        if let Some(r) = self.restart_kappa {
            starts.push((r, k));
            starts.push((k, r));
        }
        starts
    }

    pub fn min_peak_separation(mut self, min_peak_separation: f64) -> Self {
        self.min_peak_separation = min_peak_separation;
        self
    }

    pub fn time_budget(mut self, time_budget: Option<Duration>) -> Self {
        self.time_budget = time_budget;
        self
    }
}

/// Describe a model fitting procedure's output
#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ModelFitResult {
    /// The mean squared error against the fitted data at the end of the run
    pub loss: f64,
    /// The number of iterations run
    pub iterations: usize,
    /// Whether the optimizer reached a convergence criterion
    pub converged: bool,
}

impl ModelFitResult {
    pub fn new(loss: f64, iterations: usize, converged: bool) -> Self {
        Self {
            loss,
            iterations,
            converged,
        }
    }
}

/// Fit a [`DoubleVonMises`] model to a single (usually smoothed) tuning curve
#[derive(Debug, Clone)]
pub struct DoubleVonMisesFitter<'a, 'b> {
    pub data: TuningCurve<'a, 'b>,
    pub model: Option<DoubleVonMises>,
}

impl<'a, 'b> DoubleVonMisesFitter<'a, 'b> {
    pub fn new(data: TuningCurve<'a, 'b>) -> Self {
        Self { data, model: None }
    }

    /// Given the enclosed data, compute initial parameters.
    ///
    /// Fails with [`FitError::InsufficientSignal`] when the curve cannot support
    /// a meaningful fit: too few samples, no variation, or no positive response.
    pub fn guess(&self, config: &FitConfig) -> Result<DoubleVonMises, FitError> {
        let data = &self.data;
        if data.len() < N_PARAMS {
            return Err(FitError::InsufficientSignal(
                "fewer samples than model parameters",
            ));
        }
        if !data.has_signal() {
            return Err(FitError::InsufficientSignal("the response does not vary"));
        }

        let i0 = data.argmax();
        let a0 = data.response[i0];
        if !(a0 > 0.0) {
            return Err(FitError::InsufficientSignal("no positive response"));
        }
        let mu0 = wrap_angle(data.angle[i0]);

        let mut secondary: Option<usize> = None;
        for i in data.peak_indices() {
            if circular_distance(data.angle[i], mu0) < config.min_peak_separation {
                continue;
            }
            match secondary {
                Some(j) if data.response[j] >= data.response[i] => {}
                _ => secondary = Some(i),
            }
        }
        let (a1, mu1) = match secondary {
            Some(i1) => (data.response[i1], wrap_angle(data.angle[i1])),
            None => {
                let mu1 = wrap_angle(mu0 + PI);
                let a1 = data
                    .nearest_index(mu1)
                    .map(|i| data.response[i])
                    .unwrap_or_default();
                (a1, mu1)
            }
        };

        DoubleVonMises::new(
            a0,
            a1.max(0.0),
            mu0,
            mu1,
            config.initial_kappa,
            config.initial_kappa,
        )
        .map_err(|_| FitError::InsufficientSignal("could not form initial parameters"))
    }

    /// Half the sum of squared residuals
    pub fn cost(&self, params: &DoubleVonMises) -> f64 {
        0.5 * self
            .data
            .iter()
            .map(|(t, y)| (params.density(t) - y).powi(2))
            .sum::<f64>()
    }

    /// Accumulate $`J^TJ`$ and the gradient $`J^Tr`$
    fn normal_equations(&self, params: &DoubleVonMises) -> (Matrix6<f64>, Vector6<f64>) {
        let mut jtj = Matrix6::zeros();
        let mut gradient = Vector6::zeros();
        for (t, y) in self.data.iter() {
            let j = params.jacobian(t);
            let r = params.density(t) - y;
            jtj += j * j.transpose();
            gradient += j * r;
        }
        (jtj, gradient)
    }

    fn solve_step(
        jtj: &Matrix6<f64>,
        gradient: &Vector6<f64>,
        damping: f64,
    ) -> Option<Vector6<f64>> {
        let mut system = *jtj;
        for k in 0..N_PARAMS {
            system[(k, k)] += damping * jtj[(k, k)].max(DIAGONAL_FLOOR);
        }
        let rhs = -gradient;
        match system.cholesky() {
            Some(decomp) => Some(decomp.solve(&rhs)),
            None => system.lu().solve(&rhs),
        }
    }

    fn mse_of_cost(&self, cost: f64) -> f64 {
        2.0 * cost / self.data.len() as f64
    }

    /// Optimize `model_params` against the enclosed data, starting from its current value.
    ///
    /// On success `model_params` holds the fitted parameters, unwrapped. On failure it
    /// is left untouched.
    pub fn fit_model(
        &mut self,
        model_params: &mut DoubleVonMises,
        config: &FitConfig,
    ) -> Result<ModelFitResult, FitError> {
        self.optimize(model_params, config, Instant::now())
    }

    fn optimize(
        &mut self,
        model_params: &mut DoubleVonMises,
        config: &FitConfig,
        started: Instant,
    ) -> Result<ModelFitResult, FitError> {
        let energy: f64 = 0.5 * self.data.response.iter().map(|y| y * y).sum::<f64>();

        let mut params = *model_params;
        let mut cost = self.cost(&params);
        if !cost.is_finite() {
            return Err(FitError::NonFiniteLoss(0));
        }
        let mut damping = config.initial_damping;

        for it in 0..config.max_iter {
            if let Some(budget) = config.time_budget {
                if started.elapsed() >= budget {
                    return Err(FitError::TimedOut {
                        iterations: it,
                        budget,
                    });
                }
            }

            let (jtj, gradient) = self.normal_equations(&params);
            if gradient.amax() <= config.gtol {
                log::trace!("{it}: Gradient vanished, loss = {cost:0.3e}");
                return Ok(self.finish(model_params, params, cost, it, true));
            }

            loop {
                if let Some(step) = Self::solve_step(&jtj, &gradient, damping) {
                    let current = params.to_vector();
                    let trial = DoubleVonMises::from_vector_projected(&(current + step));
                    let trial_cost = self.cost(&trial);

                    if trial_cost.is_finite() && trial_cost < cost {
                        let step_norm = (trial.to_vector() - current).norm();
                        let reduction = (cost - trial_cost) / cost;
                        log::trace!(
                            "{it}: Accepted step, loss {cost:0.3e} -> {trial_cost:0.3e}, damping = {damping:0.1e}"
                        );
                        params = trial;
                        cost = trial_cost;
                        damping = (damping * 0.1).max(MIN_DAMPING);

                        if reduction < config.ftol
                            || step_norm <= config.xtol * (current.norm() + config.xtol)
                            || cost <= COST_FLOOR * energy
                        {
                            return Ok(self.finish(model_params, params, cost, it + 1, true));
                        }
                        break;
                    }
                }
                damping *= 10.0;
                if damping > MAX_DAMPING {
                    log::trace!("{it}: No descent direction remains, loss = {cost:0.3e}");
                    return Ok(self.finish(model_params, params, cost, it + 1, true));
                }
            }
        }

        log::debug!(
            "Failed to converge after {} iterations, loss = {:0.3e}",
            config.max_iter,
            self.mse_of_cost(cost)
        );
        Err(FitError::NotConverged {
            iterations: config.max_iter,
            loss: self.mse_of_cost(cost),
        })
    }

    fn finish(
        &mut self,
        model_params: &mut DoubleVonMises,
        params: DoubleVonMises,
        cost: f64,
        iterations: usize,
        converged: bool,
    ) -> ModelFitResult {
        self.model = Some(params);
        *model_params = params;
        ModelFitResult::new(self.mse_of_cost(cost), iterations, converged)
    }

    /// Guess initial parameters, optimize them from each of
    /// [`FitConfig::kappa_starts`], and report the lowest loss solution with
    /// wrapped angles and the larger lobe first.
    ///
    /// Ties keep the earlier start. If no start converges, the error of the
    /// first start is returned.
    pub fn fit_with(
        &mut self,
        config: &FitConfig,
    ) -> Result<(DoubleVonMises, ModelFitResult), FitError> {
        let seed = self.guess(config)?;
        let started = Instant::now();
        let mut best: Option<(DoubleVonMises, ModelFitResult)> = None;
        let mut first_error = None;
        for (kappa0, kappa1) in config.kappa_starts() {
            let mut params = seed
                .with_concentrations(kappa0, kappa1)
                .map_err(|_| FitError::InsufficientSignal("could not form initial parameters"))?;
            log::trace!("Initial parameters {params:?}");
            match self.optimize(&mut params, config, started) {
                Ok(result) => {
                    if best.map_or(true, |(_, b)| result.loss < b.loss) {
                        best = Some((params, result));
                    }
                }
                Err(err) => {
                    log::trace!("Start ({kappa0}, {kappa1}) failed: {err}");
                    first_error.get_or_insert(err);
                }
            }
        }
        match (best, first_error) {
            (Some((params, result)), _) => {
                let params = params.canonical();
                self.model = Some(params);
                Ok((params, result))
            }
            (None, Some(err)) => Err(err),
            (None, None) => Err(FitError::NotConverged {
                iterations: 0,
                loss: f64::NAN,
            }),
        }
    }

    /// Fit with the default [`FitConfig`]
    pub fn fit(&mut self) -> Result<(DoubleVonMises, ModelFitResult), FitError> {
        self.fit_with(&FitConfig::default())
    }
}
