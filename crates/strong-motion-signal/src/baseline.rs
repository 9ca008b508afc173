//! Polynomial baseline correction of acceleration records.
//!
//! Implements the baseline correction of Ancheta et al. (2013): the record is
//! integrated twice to displacement, a sixth-order polynomial with zero
//! linear and constant terms is fitted to that displacement, and the
//! polynomial's second derivative is subtracted from the acceleration. The
//! linear and constant terms are held at zero so offsets and constant
//! velocities are never treated as drift.
//!
//! The fitted coefficients are recorded on the trace under the `"baseline"`
//! parameter as `{"polynomial_coefs": [c6, c5, c4, c3, c2, c1, c0]}`.
//!
//! # References
//! - Ancheta et al. (2013), "PEER NGA-West2 Database", PEER Report 2013/03

use crate::curve_fit::{CurveFitConfig, CurveFitError, CurveFitter, FitModel, Termination};
use crate::integrate::{double_integrate, IntegrationError};
use crate::polynomial::Polynomial;
use crate::trace::{StationTrace, Waveform};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Parameter key the coefficients are recorded under.
pub const BASELINE_PARAMETER_KEY: &str = "baseline";

/// Degree of the displacement polynomial.
pub const POLYNOMIAL_ORDER: usize = 6;

/// Fitted coefficients (t⁶ through t²).
pub const FREE_PARAMETERS: usize = 5;

/// The sample at t = 0 carries no information about any free coefficient,
/// so one sample beyond the parameter count is needed.
pub const MIN_SAMPLES: usize = FREE_PARAMETERS + 1;

/// Errors that can occur during baseline correction
#[derive(Debug, Error)]
pub enum BaselineError {
    /// The signal cannot be corrected as given
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The least-squares fit failed
    #[error("Baseline fit did not converge: {0}")]
    FitDidNotConverge(#[source] CurveFitError),

    /// Invalid configuration parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The coefficient record could not be encoded
    #[error("Failed to encode baseline parameters: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl From<IntegrationError> for BaselineError {
    fn from(err: IntegrationError) -> Self {
        BaselineError::InvalidInput(err.to_string())
    }
}

/// Configuration for baseline correction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineConfig {
    /// Solver settings
    pub fit: CurveFitConfig,

    /// Fit against `t / t_max` and rescale the coefficients afterwards.
    /// Keeps every basis term in `[0, 1]` regardless of record length.
    pub normalize_time: bool,

    /// Starting value for every free coefficient (in the fitted time axis)
    pub initial_guess: f64,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            fit: CurveFitConfig::default(),
            normalize_time: true,
            initial_guess: 1.0,
        }
    }
}

impl BaselineConfig {
    /// Create a new config builder
    pub fn builder() -> BaselineConfigBuilder {
        BaselineConfigBuilder::new()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), BaselineError> {
        self.fit
            .validate()
            .map_err(|e| BaselineError::InvalidConfig(e.to_string()))?;

        if !self.initial_guess.is_finite() {
            return Err(BaselineError::InvalidConfig(
                "initial_guess must be finite".into(),
            ));
        }

        Ok(())
    }
}

/// Builder for BaselineConfig
#[derive(Debug, Default)]
pub struct BaselineConfigBuilder {
    config: BaselineConfig,
}

impl BaselineConfigBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self {
            config: BaselineConfig::default(),
        }
    }

    /// Set solver settings
    pub fn fit(mut self, fit: CurveFitConfig) -> Self {
        self.config.fit = fit;
        self
    }

    /// Enable/disable time-axis normalisation
    pub fn normalize_time(mut self, enable: bool) -> Self {
        self.config.normalize_time = enable;
        self
    }

    /// Set the starting coefficient value
    pub fn initial_guess(mut self, guess: f64) -> Self {
        self.config.initial_guess = guess;
        self
    }

    /// Build the configuration
    pub fn build(self) -> BaselineConfig {
        self.config
    }
}

/// `a·t⁶ + b·t⁵ + c·t⁴ + d·t³ + e·t²`
#[derive(Debug, Clone, Copy, Default)]
struct ConstrainedSextic;

impl FitModel for ConstrainedSextic {
    fn n_params(&self) -> usize {
        FREE_PARAMETERS
    }

    fn evaluate(&self, t: f64, p: &[f64]) -> f64 {
        ((((p[0] * t + p[1]) * t + p[2]) * t + p[3]) * t + p[4]) * t * t
    }

    fn gradient(&self, t: f64, _params: &[f64], out: &mut [f64]) {
        let t2 = t * t;
        let t3 = t2 * t;
        let t4 = t3 * t;
        out[0] = t4 * t2;
        out[1] = t4 * t;
        out[2] = t4;
        out[3] = t3;
        out[4] = t2;
    }
}

/// A fitted baseline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineFit {
    /// Displacement polynomial, `[a, b, c, d, e, 0, 0]`
    pub polynomial: Polynomial,

    /// Second derivative of `polynomial` (acceleration units)
    pub correction: Polynomial,

    /// Sum of squared displacement residuals
    pub cost: f64,

    /// Solver iterations
    pub iterations: usize,

    /// Solver function evaluations
    pub evaluations: usize,

    /// Convergence criterion that ended the fit
    pub termination: Termination,
}

impl BaselineFit {
    /// The seven coefficients, highest power first
    pub fn coefficients(&self) -> &[f64] {
        self.polynomial.coefficients()
    }

    /// Acceleration drift at each of `times`
    pub fn drift(&self, times: &Array1<f64>) -> Array1<f64> {
        self.correction.evaluate_many(times)
    }
}

/// The record stored under [`BASELINE_PARAMETER_KEY`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineParameters {
    /// `[c6, c5, c4, c3, c2, c1, c0]`
    pub polynomial_coefs: Vec<f64>,
}

impl BaselineParameters {
    /// Record for a fitted baseline
    pub fn from_fit(fit: &BaselineFit) -> Self {
        Self {
            polynomial_coefs: fit.coefficients().to_vec(),
        }
    }

    /// Encode as a parameter value
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Decode a parameter value
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(value)
    }

    /// Read the record back from a corrected trace, `None` if the trace was
    /// never baseline-corrected
    pub fn from_trace(trace: &StationTrace) -> Result<Option<Self>, serde_json::Error> {
        trace
            .get_parameter(BASELINE_PARAMETER_KEY)
            .map(Self::from_value)
            .transpose()
    }

    /// The recorded displacement polynomial
    pub fn polynomial(&self) -> Polynomial {
        Polynomial::new(self.polynomial_coefs.clone())
    }
}

/// Removes polynomial baseline drift from acceleration records.
#[derive(Debug, Clone)]
pub struct BaselineCorrector {
    config: BaselineConfig,
    fitter: CurveFitter,
}

impl BaselineCorrector {
    /// Create a new corrector
    pub fn new(config: BaselineConfig) -> Result<Self, BaselineError> {
        config.validate()?;
        let fitter = CurveFitter::new(config.fit.clone())
            .map_err(|e| BaselineError::InvalidConfig(e.to_string()))?;

        Ok(Self { config, fitter })
    }

    /// Get the configuration
    pub fn config(&self) -> &BaselineConfig {
        &self.config
    }

    /// Correct `signal` in place and record the coefficients on it.
    ///
    /// On error the signal is left untouched.
    #[instrument(skip_all, fields(npts = signal.npts(), delta = signal.delta()))]
    pub fn correct<'a, S: Waveform + ?Sized>(
        &self,
        signal: &'a mut S,
    ) -> Result<&'a mut S, BaselineError> {
        let dt = signal.delta();
        let npts = signal.npts();
        validate_sampling(npts, dt)?;

        if signal.samples().iter().any(|v| !v.is_finite()) {
            return Err(BaselineError::InvalidInput(
                "signal contains non-finite samples".into(),
            ));
        }

        let displacement = double_integrate(signal.samples(), dt)?;
        if displacement.iter().any(|v| !v.is_finite()) {
            warn!("displacement overflowed during integration");
            return Err(BaselineError::FitDidNotConverge(CurveFitError::NonFiniteInput));
        }

        let fit = self.fit_displacement(&displacement, dt)?;

        let times = Array1::from_shape_fn(npts, |i| i as f64 * dt);
        let drift = fit.drift(&times);
        if drift.iter().any(|v| !v.is_finite()) {
            return Err(BaselineError::FitDidNotConverge(CurveFitError::NonFiniteModel {
                evaluations: fit.evaluations,
            }));
        }

        let record = BaselineParameters::from_fit(&fit).to_value()?;

        for (sample, d) in signal.samples_mut().iter_mut().zip(drift.iter()) {
            *sample -= d;
        }
        signal.set_parameter(BASELINE_PARAMETER_KEY, record);

        Ok(signal)
    }

    /// Fit the constrained sextic to a displacement series sampled every `dt`.
    pub fn fit_displacement(
        &self,
        displacement: &[f64],
        dt: f64,
    ) -> Result<BaselineFit, BaselineError> {
        let npts = displacement.len();
        validate_sampling(npts, dt)?;

        if displacement.iter().any(|v| !v.is_finite()) {
            return Err(BaselineError::InvalidInput(
                "displacement contains non-finite values".into(),
            ));
        }

        let scale = if self.config.normalize_time {
            (npts - 1) as f64 * dt
        } else {
            1.0
        };
        if !scale.powi(POLYNOMIAL_ORDER as i32).is_finite() {
            return Err(BaselineError::FitDidNotConverge(CurveFitError::NonFiniteModel {
                evaluations: 0,
            }));
        }

        let x: Vec<f64> = (0..npts).map(|i| i as f64 * dt / scale).collect();
        let initial = [self.config.initial_guess; FREE_PARAMETERS];

        let result = self
            .fitter
            .fit(&ConstrainedSextic, &x, displacement, &initial)
            .map_err(|e| {
                warn!(error = %e, "baseline polynomial fit failed");
                BaselineError::FitDidNotConverge(e)
            })?;

        // params[k] multiplies t^(6 - k)
        let mut coefficients: Vec<f64> = result
            .params
            .iter()
            .enumerate()
            .map(|(k, &p)| p / scale.powi((POLYNOMIAL_ORDER - k) as i32))
            .collect();
        if coefficients.iter().any(|c| !c.is_finite()) {
            return Err(BaselineError::FitDidNotConverge(CurveFitError::NonFiniteModel {
                evaluations: result.evaluations,
            }));
        }
        coefficients.extend([0.0, 0.0]);

        let polynomial = Polynomial::new(coefficients);
        let correction = polynomial.nth_derivative(2);

        debug!(
            iterations = result.iterations,
            evaluations = result.evaluations,
            cost = result.cost,
            termination = ?result.termination,
            "baseline polynomial fitted"
        );

        Ok(BaselineFit {
            polynomial,
            correction,
            cost: result.cost,
            iterations: result.iterations,
            evaluations: result.evaluations,
            termination: result.termination,
        })
    }
}

impl Default for BaselineCorrector {
    fn default() -> Self {
        Self {
            config: BaselineConfig::default(),
            fitter: CurveFitter::default(),
        }
    }
}

/// Baseline-correct `signal` with the default configuration.
pub fn correct_baseline<S: Waveform + ?Sized>(signal: &mut S) -> Result<&mut S, BaselineError> {
    BaselineCorrector::default().correct(signal)
}

fn validate_sampling(npts: usize, dt: f64) -> Result<(), BaselineError> {
    if !(dt.is_finite() && dt > 0.0) {
        return Err(BaselineError::InvalidInput(format!(
            "sample spacing must be finite and > 0, got {dt}"
        )));
    }
    if npts < MIN_SAMPLES {
        return Err(BaselineError::InvalidInput(format!(
            "{npts} samples cannot constrain {FREE_PARAMETERS} polynomial coefficients \
             (at least {MIN_SAMPLES} required)"
        )));
    }
    Ok(())
}
