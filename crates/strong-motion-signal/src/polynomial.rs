//! Dense univariate polynomials.
//!
//! Coefficients are stored from the highest power down to the constant term,
//! so `[2.0, 0.0, -1.0]` is `2x² - 1`. This is the ordering used for the
//! baseline coefficients recorded on corrected traces.

use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// A polynomial with real coefficients, highest power first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polynomial {
    coefficients: Vec<f64>,
}

impl Polynomial {
    /// Create a polynomial from coefficients ordered highest power first.
    ///
    /// An empty coefficient list is the zero polynomial.
    pub fn new(coefficients: Vec<f64>) -> Self {
        if coefficients.is_empty() {
            return Self::zero();
        }
        Self { coefficients }
    }

    /// The zero polynomial.
    pub fn zero() -> Self {
        Self {
            coefficients: vec![0.0],
        }
    }

    /// Coefficients, highest power first.
    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    /// Nominal degree (`len - 1`); leading zero coefficients are kept.
    pub fn degree(&self) -> usize {
        self.coefficients.len() - 1
    }

    /// Evaluate at `x` using Horner's scheme.
    pub fn evaluate(&self, x: f64) -> f64 {
        self.coefficients.iter().fold(0.0, |acc, &c| acc * x + c)
    }

    /// Evaluate at every point of `x`.
    pub fn evaluate_many(&self, x: &Array1<f64>) -> Array1<f64> {
        x.mapv(|v| self.evaluate(v))
    }

    /// First derivative by the power rule.
    pub fn derivative(&self) -> Self {
        let degree = self.degree();
        if degree == 0 {
            return Self::zero();
        }

        let coefficients = self.coefficients[..degree]
            .iter()
            .enumerate()
            .map(|(i, &c)| c * (degree - i) as f64)
            .collect();

        Self { coefficients }
    }

    /// The `order`-th derivative. `order == 0` returns a copy.
    pub fn nth_derivative(&self, order: usize) -> Self {
        (0..order).fold(self.clone(), |poly, _| poly.derivative())
    }
}

impl Default for Polynomial {
    fn default() -> Self {
        Self::zero()
    }
}
