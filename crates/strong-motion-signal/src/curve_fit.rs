//! Levenberg-Marquardt nonlinear least squares.
//!
//! Fits the parameters `p` of a scalar model `f(x; p)` to observations
//! `(x_i, y_i)` by minimising `Σ (y_i - f(x_i; p))²`. Each iteration solves
//! the damped normal equations
//!
//! ```text
//! (JᵀJ + λ·diag(JᵀJ)) δ = Jᵀr
//! ```
//!
//! with a Cholesky factorisation, accepting the step when it lowers the cost
//! and raising `λ` when it does not (Marquardt's diagonal scaling keeps the
//! step invariant to the scale of each parameter).
//!
//! # References
//! - Levenberg (1944), "A Method for the Solution of Certain Non-Linear
//!   Problems in Least Squares"
//! - Marquardt (1963), "An Algorithm for Least-Squares Estimation of
//!   Nonlinear Parameters"

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

/// Default tolerance for `ftol`, `xtol` and `gtol` (√ε for f64).
pub const DEFAULT_TOLERANCE: f64 = 1.49012e-8;

/// Smallest damping value reached by repeated successful steps.
const MIN_DAMPING: f64 = 1e-15;

/// Errors that can occur while fitting a model.
#[derive(Debug, Error)]
pub enum CurveFitError {
    /// Invalid configuration parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Fewer observations than free parameters
    #[error("{points} data points cannot determine {params} parameters")]
    InsufficientData {
        /// Number of observations supplied.
        points: usize,
        /// Number of free model parameters.
        params: usize,
    },

    /// `x` and `y` differ in length
    #[error("x has {x_len} points but y has {y_len}")]
    LengthMismatch {
        /// Length of the abscissa.
        x_len: usize,
        /// Length of the observations.
        y_len: usize,
    },

    /// Initial guess does not match the model's parameter count
    #[error("Initial guess has {got} values, model expects {expected}")]
    InitialGuessLength {
        /// Parameter count of the model.
        expected: usize,
        /// Length of the supplied guess.
        got: usize,
    },

    /// NaN or infinity in `x`, `y` or the initial guess
    #[error("Input contains non-finite values")]
    NonFiniteInput,

    /// The model or its Jacobian overflowed
    #[error("Model produced non-finite values after {evaluations} evaluations")]
    NonFiniteModel {
        /// Function evaluations performed so far.
        evaluations: usize,
    },

    /// The damped normal equations could not be factorised
    #[error("Normal equations are singular (damping reached {damping:e})")]
    Singular {
        /// Damping at which the solver gave up.
        damping: f64,
    },

    /// Evaluation budget exhausted before convergence
    #[error("Optimal parameters not found: number of function evaluations reached {evaluations}")]
    MaxEvaluations {
        /// Function evaluations performed.
        evaluations: usize,
    },

    /// No step lowered the cost before damping hit its ceiling
    #[error("Fit stalled: damping reached {damping:e} without reducing the cost")]
    Stalled {
        /// Damping at which the solver gave up.
        damping: f64,
    },
}

/// A model that can be fitted with [`CurveFitter`].
pub trait FitModel {
    /// Number of free parameters.
    fn n_params(&self) -> usize;

    /// Evaluate the model at `x`.
    fn evaluate(&self, x: f64, params: &[f64]) -> f64;

    /// Partial derivatives of the model with respect to each parameter at `x`.
    ///
    /// The default is a forward difference with step `√ε · max(|p_j|, 1)`.
    /// Models with a closed-form gradient should override this.
    fn gradient(&self, x: f64, params: &[f64], out: &mut [f64]) {
        let base = self.evaluate(x, params);
        let mut shifted = params.to_vec();
        for (j, slot) in out.iter_mut().enumerate().take(params.len()) {
            let h = f64::EPSILON.sqrt() * params[j].abs().max(1.0);
            shifted[j] = params[j] + h;
            *slot = (self.evaluate(x, &shifted) - base) / h;
            shifted[j] = params[j];
        }
    }
}

/// Configuration for the Levenberg-Marquardt solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurveFitConfig {
    /// Maximum residual evaluations. `None` means `200 * (n_params + 1)`.
    pub max_evaluations: Option<usize>,

    /// Relative reduction of the cost below which the fit has converged.
    pub ftol: f64,

    /// Relative step size below which the fit has converged.
    pub xtol: f64,

    /// Largest cosine between the residual vector and any Jacobian column
    /// accepted as stationary.
    pub gtol: f64,

    /// Starting damping λ.
    pub initial_damping: f64,

    /// Factor λ is multiplied by on a rejected step and divided by on an
    /// accepted one.
    pub damping_factor: f64,

    /// Damping ceiling; exceeding it aborts the fit.
    pub max_damping: f64,
}

impl Default for CurveFitConfig {
    fn default() -> Self {
        Self {
            max_evaluations: None,
            ftol: DEFAULT_TOLERANCE,
            xtol: DEFAULT_TOLERANCE,
            gtol: DEFAULT_TOLERANCE,
            initial_damping: 1e-3,
            damping_factor: 10.0,
            max_damping: 1e16,
        }
    }
}

impl CurveFitConfig {
    /// Create a new config builder
    pub fn builder() -> CurveFitConfigBuilder {
        CurveFitConfigBuilder::new()
    }

    /// Evaluation budget for a model with `n_params` parameters.
    pub fn max_evaluations_for(&self, n_params: usize) -> usize {
        self.max_evaluations.unwrap_or(200 * (n_params + 1))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), CurveFitError> {
        if self.max_evaluations == Some(0) {
            return Err(CurveFitError::InvalidConfig(
                "max_evaluations must be positive".into(),
            ));
        }

        for (name, tol) in [("ftol", self.ftol), ("xtol", self.xtol), ("gtol", self.gtol)] {
            if !(tol.is_finite() && tol >= 0.0) {
                return Err(CurveFitError::InvalidConfig(format!(
                    "{name} must be finite and non-negative"
                )));
            }
        }

        if !(self.initial_damping.is_finite() && self.initial_damping > 0.0) {
            return Err(CurveFitError::InvalidConfig(
                "initial_damping must be positive".into(),
            ));
        }

        if !(self.damping_factor.is_finite() && self.damping_factor > 1.0) {
            return Err(CurveFitError::InvalidConfig(
                "damping_factor must be greater than 1".into(),
            ));
        }

        if !(self.max_damping > self.initial_damping) {
            return Err(CurveFitError::InvalidConfig(
                "max_damping must exceed initial_damping".into(),
            ));
        }

        Ok(())
    }
}

/// Builder for CurveFitConfig
#[derive(Debug, Default)]
pub struct CurveFitConfigBuilder {
    config: CurveFitConfig,
}

impl CurveFitConfigBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self {
            config: CurveFitConfig::default(),
        }
    }

    /// Set the evaluation budget
    pub fn max_evaluations(mut self, max: usize) -> Self {
        self.config.max_evaluations = Some(max);
        self
    }

    /// Set the cost-reduction tolerance
    pub fn ftol(mut self, tol: f64) -> Self {
        self.config.ftol = tol;
        self
    }

    /// Set the step-size tolerance
    pub fn xtol(mut self, tol: f64) -> Self {
        self.config.xtol = tol;
        self
    }

    /// Set the gradient tolerance
    pub fn gtol(mut self, tol: f64) -> Self {
        self.config.gtol = tol;
        self
    }

    /// Set the starting damping
    pub fn initial_damping(mut self, damping: f64) -> Self {
        self.config.initial_damping = damping;
        self
    }

    /// Set the damping update factor
    pub fn damping_factor(mut self, factor: f64) -> Self {
        self.config.damping_factor = factor;
        self
    }

    /// Set the damping ceiling
    pub fn max_damping(mut self, damping: f64) -> Self {
        self.config.max_damping = damping;
        self
    }

    /// Build the configuration
    pub fn build(self) -> CurveFitConfig {
        self.config
    }
}

/// Why the solver stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    /// Residuals are exactly zero.
    ExactFit,
    /// Residuals became orthogonal to the Jacobian columns (`gtol`).
    Gradient,
    /// Relative cost reduction fell below `ftol`.
    CostReduction,
    /// Step size fell below `xtol`.
    StepSize,
}

/// Outcome of a successful fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurveFitResult {
    /// Fitted parameters.
    pub params: Vec<f64>,
    /// Sum of squared residuals at `params`.
    pub cost: f64,
    /// Outer iterations (Jacobian evaluations).
    pub iterations: usize,
    /// Residual evaluations, including rejected steps.
    pub evaluations: usize,
    /// Convergence criterion that ended the fit.
    pub termination: Termination,
}

/// Levenberg-Marquardt least-squares solver.
#[derive(Debug, Clone)]
pub struct CurveFitter {
    config: CurveFitConfig,
}

impl CurveFitter {
    /// Create a new solver
    pub fn new(config: CurveFitConfig) -> Result<Self, CurveFitError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Get the configuration
    pub fn config(&self) -> &CurveFitConfig {
        &self.config
    }

    /// Fit `model` to the observations starting from `initial`.
    pub fn fit<M: FitModel + ?Sized>(
        &self,
        model: &M,
        x: &[f64],
        y: &[f64],
        initial: &[f64],
    ) -> Result<CurveFitResult, CurveFitError> {
        let n = model.n_params();
        let m = x.len();

        if m != y.len() {
            return Err(CurveFitError::LengthMismatch {
                x_len: m,
                y_len: y.len(),
            });
        }
        if initial.len() != n {
            return Err(CurveFitError::InitialGuessLength {
                expected: n,
                got: initial.len(),
            });
        }
        if m < n {
            return Err(CurveFitError::InsufficientData { points: m, params: n });
        }
        if x.iter().chain(y).chain(initial).any(|v| !v.is_finite()) {
            return Err(CurveFitError::NonFiniteInput);
        }

        let cfg = &self.config;
        let max_evaluations = cfg.max_evaluations_for(n);

        let mut params = DVector::from_column_slice(initial);
        let mut residuals = DVector::zeros(m);
        let mut trial_residuals = DVector::zeros(m);
        let mut jacobian = DMatrix::zeros(m, n);
        let mut gradient_row = vec![0.0; n];

        let mut evaluations = 1;
        let mut cost = Self::sum_of_squares(model, x, y, params.as_slice(), &mut residuals)
            .ok_or(CurveFitError::NonFiniteModel { evaluations })?;

        let mut damping = cfg.initial_damping;
        let mut iterations = 0;

        loop {
            if cost == 0.0 {
                return Self::finish(&params, cost, iterations, evaluations, Termination::ExactFit);
            }

            for (i, &xi) in x.iter().enumerate() {
                model.gradient(xi, params.as_slice(), &mut gradient_row);
                for (j, &g) in gradient_row.iter().enumerate() {
                    jacobian[(i, j)] = g;
                }
            }
            if jacobian.iter().any(|v| !v.is_finite()) {
                return Err(CurveFitError::NonFiniteModel { evaluations });
            }

            let jtj = jacobian.tr_mul(&jacobian);
            let jtr = jacobian.tr_mul(&residuals);

            if Self::gradient_cosine(&jacobian, &jtr, residuals.norm()) <= cfg.gtol {
                return Self::finish(&params, cost, iterations, evaluations, Termination::Gradient);
            }

            iterations += 1;
            let mut overflowed = false;

            // Inner loop: raise damping until a step lowers the cost.
            loop {
                let mut damped = jtj.clone();
                for j in 0..n {
                    let scale = if jtj[(j, j)] > 0.0 { jtj[(j, j)] } else { 1.0 };
                    damped[(j, j)] += damping * scale;
                }

                let step = match damped.cholesky() {
                    Some(factor) => factor.solve(&jtr),
                    None => {
                        damping *= cfg.damping_factor;
                        if damping > cfg.max_damping {
                            return Err(CurveFitError::Singular { damping });
                        }
                        continue;
                    }
                };

                if evaluations >= max_evaluations {
                    return Err(CurveFitError::MaxEvaluations { evaluations });
                }

                let candidate = &params + &step;
                let step_norm = step.norm();
                let step_negligible = step_norm <= cfg.xtol * (params.norm() + cfg.xtol);

                evaluations += 1;
                let candidate_cost =
                    Self::sum_of_squares(model, x, y, candidate.as_slice(), &mut trial_residuals);
                overflowed |= candidate_cost.is_none();

                match candidate_cost {
                    Some(new_cost) if new_cost < cost => {
                        let reduction = cost - new_cost;
                        let previous = cost;

                        params = candidate;
                        std::mem::swap(&mut residuals, &mut trial_residuals);
                        cost = new_cost;
                        damping = (damping / cfg.damping_factor).max(MIN_DAMPING);

                        trace!(
                            iteration = iterations,
                            cost,
                            damping,
                            step_norm,
                            "accepted Levenberg-Marquardt step"
                        );

                        if cost == 0.0 {
                            return Self::finish(
                                &params,
                                cost,
                                iterations,
                                evaluations,
                                Termination::ExactFit,
                            );
                        }
                        if reduction <= cfg.ftol * previous {
                            return Self::finish(
                                &params,
                                cost,
                                iterations,
                                evaluations,
                                Termination::CostReduction,
                            );
                        }
                        if step_negligible {
                            return Self::finish(
                                &params,
                                cost,
                                iterations,
                                evaluations,
                                Termination::StepSize,
                            );
                        }
                        break;
                    }
                    _ => {
                        if step_negligible && !overflowed {
                            return Self::finish(
                                &params,
                                cost,
                                iterations,
                                evaluations,
                                Termination::StepSize,
                            );
                        }

                        damping *= cfg.damping_factor;
                        if damping > cfg.max_damping {
                            if overflowed {
                                return Err(CurveFitError::NonFiniteModel { evaluations });
                            }
                            return Err(CurveFitError::Stalled { damping });
                        }
                    }
                }
            }
        }
    }

    fn finish(
        params: &DVector<f64>,
        cost: f64,
        iterations: usize,
        evaluations: usize,
        termination: Termination,
    ) -> Result<CurveFitResult, CurveFitError> {
        Ok(CurveFitResult {
            params: params.as_slice().to_vec(),
            cost,
            iterations,
            evaluations,
            termination,
        })
    }

    /// `max_j |J_jᵀr| / (‖J_j‖·‖r‖)`, zero for columns with no influence.
    fn gradient_cosine(jacobian: &DMatrix<f64>, jtr: &DVector<f64>, residual_norm: f64) -> f64 {
        jacobian
            .column_iter()
            .zip(jtr.iter())
            .map(|(column, g)| {
                let column_norm = column.norm();
                if column_norm > 0.0 {
                    g.abs() / (column_norm * residual_norm)
                } else {
                    0.0
                }
            })
            .fold(0.0, f64::max)
    }

    /// Fill `out` with `y - f(x; params)` and return the sum of squares, or
    /// `None` if any residual is non-finite.
    fn sum_of_squares<M: FitModel + ?Sized>(
        model: &M,
        x: &[f64],
        y: &[f64],
        params: &[f64],
        out: &mut DVector<f64>,
    ) -> Option<f64> {
        let mut total = 0.0;
        for (i, (&xi, &yi)) in x.iter().zip(y).enumerate() {
            let r = yi - model.evaluate(xi, params);
            if !r.is_finite() {
                return None;
            }
            out[i] = r;
            total += r * r;
        }
        total.is_finite().then_some(total)
    }
}

impl Default for CurveFitter {
    fn default() -> Self {
        Self {
            config: CurveFitConfig::default(),
        }
    }
}
