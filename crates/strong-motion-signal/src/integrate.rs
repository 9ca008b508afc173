//! Cumulative trapezoidal integration.
//!
//! Strong-motion records are integrated sample by sample to move from
//! acceleration to velocity and from velocity to displacement. Every output
//! has the same length as its input and starts at a caller-supplied initial
//! value, so the `i`-th output is the running integral up to `t_i = i * dx`.

/// Errors from cumulative integration.
#[derive(Debug, thiserror::Error)]
pub enum IntegrationError {
    /// No samples to integrate
    #[error("Signal is empty")]
    EmptySignal,

    /// Sample spacing non-positive or non-finite
    #[error("Sample spacing must be finite and > 0, got {0}")]
    InvalidSpacing(f64),
}

/// Cumulatively integrate `y` with the trapezoidal rule.
///
/// `out[0] = initial` and `out[i] = out[i - 1] + dx * (y[i - 1] + y[i]) / 2`.
pub fn cumulative_trapezoid(
    y: &[f64],
    dx: f64,
    initial: f64,
) -> Result<Vec<f64>, IntegrationError> {
    if y.is_empty() {
        return Err(IntegrationError::EmptySignal);
    }
    if !(dx.is_finite() && dx > 0.0) {
        return Err(IntegrationError::InvalidSpacing(dx));
    }

    let half_dx = 0.5 * dx;
    let mut out = Vec::with_capacity(y.len());
    let mut running = initial;
    out.push(running);

    for pair in y.windows(2) {
        running += half_dx * (pair[0] + pair[1]);
        out.push(running);
    }

    Ok(out)
}

/// Integrate twice with zero initial conditions (acceleration to displacement).
pub fn double_integrate(y: &[f64], dx: f64) -> Result<Vec<f64>, IntegrationError> {
    let first = cumulative_trapezoid(y, dx, 0.0)?;
    cumulative_trapezoid(&first, dx, 0.0)
}
