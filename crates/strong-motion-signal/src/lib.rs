//! Strong-Motion Signal Processing Library
//!
//! This crate provides baseline correction for strong-motion acceleration
//! records together with the numerical pieces it is built from: cumulative
//! trapezoidal integration, dense polynomials and a Levenberg-Marquardt
//! least-squares solver.
//!
//! # Features
//!
//! - **Baseline Correction**: Ancheta et al. (2013) sixth-order polynomial
//!   drift removal with zero linear and constant terms
//! - **Integration**: Cumulative trapezoidal integration (acceleration to
//!   velocity to displacement)
//! - **Curve Fitting**: Levenberg-Marquardt nonlinear least squares for any
//!   [`FitModel`]
//! - **Traces**: A minimal [`StationTrace`] and the [`Waveform`] trait for
//!   plugging in other trace types
//!
//! # Example
//!
//! ```rust
//! use strong_motion_signal::{correct_baseline, BaselineParameters, StationTrace};
//!
//! let dt = 0.01;
//! let data: Vec<f64> = (0..1000)
//!     .map(|i| {
//!         let t = i as f64 * dt;
//!         (4.0 * t).sin() + 0.002 * t * t
//!     })
//!     .collect();
//!
//! let mut trace = StationTrace::builder()
//!     .data(data)
//!     .delta(dt)
//!     .network("CI")
//!     .station("PAS")
//!     .channel("HNE")
//!     .build()?;
//!
//! correct_baseline(&mut trace)?;
//!
//! let record = BaselineParameters::from_trace(&trace)?.expect("baseline recorded");
//! assert_eq!(record.polynomial_coefs.len(), 7);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod baseline;
pub mod curve_fit;
pub mod integrate;
pub mod polynomial;
pub mod trace;

// Re-export main types for convenience
pub use baseline::{
    correct_baseline, BaselineConfig, BaselineConfigBuilder, BaselineCorrector, BaselineError,
    BaselineFit, BaselineParameters, BASELINE_PARAMETER_KEY,
};
pub use curve_fit::{
    CurveFitConfig, CurveFitConfigBuilder, CurveFitError, CurveFitResult, CurveFitter, FitModel,
    Termination,
};
pub use integrate::{cumulative_trapezoid, double_integrate, IntegrationError};
pub use polynomial::Polynomial;
pub use trace::{StationTrace, StationTraceBuilder, TraceError, TraceStats, Waveform};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common result type for signal processing operations
pub type Result<T> = std::result::Result<T, SignalError>;

/// Unified error type for signal processing operations
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// Baseline correction error
    #[error("Baseline correction error: {0}")]
    Baseline(#[from] BaselineError),

    /// Curve fitting error
    #[error("Curve fitting error: {0}")]
    CurveFit(#[from] CurveFitError),

    /// Integration error
    #[error("Integration error: {0}")]
    Integration(#[from] IntegrationError),

    /// Trace construction error
    #[error("Trace error: {0}")]
    Trace(#[from] TraceError),

    /// Parameter (de)serialization error
    #[error("Parameter encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::baseline::{correct_baseline, BaselineConfig, BaselineCorrector};
    pub use crate::trace::{StationTrace, Waveform};
    pub use crate::{Result, SignalError};
}
