//! Validation tests to prove correctness of the baseline correction
//!
//! These tests compare the corrector against signals whose drift is known
//! analytically.

use approx::assert_abs_diff_eq;
use serde_json::Value;
use std::collections::BTreeMap;
use std::f64::consts::PI;
use strong_motion_signal::{
    correct_baseline, BaselineConfig, BaselineCorrector, BaselineError, BaselineParameters,
    Polynomial, StationTrace, Waveform, BASELINE_PARAMETER_KEY,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("strong_motion_signal=debug")
        .with_test_writer()
        .try_init();
}

fn trace_from(data: Vec<f64>, dt: f64) -> StationTrace {
    StationTrace::builder()
        .data(data)
        .delta(dt)
        .network("CE")
        .station("24865")
        .channel("HNN")
        .build()
        .unwrap()
}

fn recorded_coefficients(trace: &StationTrace) -> Vec<f64> {
    BaselineParameters::from_trace(trace)
        .unwrap()
        .expect("baseline parameter recorded")
        .polynomial_coefs
}

/// Acceleration that is exactly the second derivative of a degree 6..2
/// displacement polynomial is removed completely.
#[test]
fn validate_sextic_drift_round_trip() {
    init_tracing();

    let generating = [2e-6, -5e-5, 4e-4, -2e-3, 5e-3, 0.0, 0.0];
    let drift = Polynomial::new(generating.to_vec()).nth_derivative(2);

    let dt = 0.01;
    let data: Vec<f64> = (0..1000).map(|i| drift.evaluate(i as f64 * dt)).collect();
    let peak = data.iter().fold(0.0f64, |m, v| m.max(v.abs()));
    let mut trace = trace_from(data, dt);

    correct_baseline(&mut trace).unwrap();

    let residual_peak = trace.data.iter().fold(0.0f64, |m, v| m.max(v.abs()));
    println!("Residual peak {:.3e} vs signal peak {:.3e}", residual_peak, peak);
    assert!(residual_peak < 1e-5, "residual too large: {}", residual_peak);

    let recovered = recorded_coefficients(&trace);
    for (got, want) in recovered.iter().zip(&generating[..5]) {
        let rel = (got - want).abs() / want.abs();
        assert!(rel < 1e-3, "coefficient {} recovered as {}", want, got);
    }
}

/// dt = 0.02 s, 500 samples, displacement 0.001·t⁴.
#[test]
fn validate_quartic_example() {
    let dt = 0.02;
    let t: Vec<f64> = (0..500).map(|i| i as f64 * dt).collect();

    let displacement: Vec<f64> = t.iter().map(|t| 0.001 * t.powi(4)).collect();
    let fit = BaselineCorrector::default()
        .fit_displacement(&displacement, dt)
        .unwrap();
    let c = fit.coefficients();
    assert_abs_diff_eq!(c[0], 0.0, epsilon = 1e-6);
    assert_abs_diff_eq!(c[1], 0.0, epsilon = 1e-6);
    assert_abs_diff_eq!(c[2], 0.001, epsilon = 1e-6);
    assert_abs_diff_eq!(c[3], 0.0, epsilon = 1e-6);
    assert_abs_diff_eq!(c[4], 0.0, epsilon = 1e-6);

    // Same drift supplied as acceleration: trapezoidal integration adds a
    // small t² term (0.002·dt²), everything else is removed.
    let acceleration: Vec<f64> = t.iter().map(|t| 0.012 * t * t).collect();
    let mut trace = trace_from(acceleration, dt);
    correct_baseline(&mut trace).unwrap();

    let c = recorded_coefficients(&trace);
    assert_abs_diff_eq!(c[2], 0.001, epsilon = 1e-6);
    assert_abs_diff_eq!(c[4], 0.002 * dt * dt, epsilon = 1e-8);
    for v in &trace.data {
        assert_abs_diff_eq!(*v, 0.0, epsilon = 1e-5);
    }
}

/// A second pass over a corrected record finds almost nothing left to remove.
#[test]
fn validate_second_pass_is_near_zero() {
    init_tracing();

    let dt = 0.005;
    let data: Vec<f64> = (0..4000)
        .map(|i| {
            let t = i as f64 * dt;
            let motion = (2.0 * PI * 1.5 * t).sin() * (-0.3 * t).exp();
            // Drift from displacement 2e-5·t³ + 3e-4·t²
            motion + 1.2e-4 * t + 6e-4
        })
        .collect();
    let mut trace = trace_from(data, dt);

    correct_baseline(&mut trace).unwrap();
    let first = recorded_coefficients(&trace);
    let once = trace.data.clone();

    correct_baseline(&mut trace).unwrap();
    let second = recorded_coefficients(&trace);

    println!("First pass:  {:?}", first);
    println!("Second pass: {:?}", second);
    for c in &second {
        assert!(c.abs() < 1e-6, "second pass coefficient {}", c);
    }
    assert!(first.iter().any(|c| c.abs() > 1e-3));

    let change = once
        .iter()
        .zip(&trace.data)
        .fold(0.0f64, |m, (a, b)| m.max((a - b).abs()));
    assert!(change < 1e-5, "second pass changed the record by {}", change);
}

#[test]
fn validate_flat_zero_signal() {
    let mut trace = trace_from(vec![0.0; 100], 0.01);
    correct_baseline(&mut trace).unwrap();

    assert!(trace.data.iter().all(|v| v.abs() < 1e-12));
    let coefs = recorded_coefficients(&trace);
    assert_eq!(coefs.len(), 7);
    assert!(coefs.iter().all(|c| c.abs() < 1e-12));
}

#[test]
fn validate_two_samples_rejected() {
    let mut trace = trace_from(vec![0.5, -0.5], 0.01);
    let err = correct_baseline(&mut trace).unwrap_err();

    println!("{}", err);
    assert!(matches!(err, BaselineError::InvalidInput(_)));
    assert_eq!(trace.data, vec![0.5, -0.5]);
    assert!(trace.parameters.is_empty());
}

#[test]
fn validate_metadata_contract() {
    let dt = 0.01;
    let data: Vec<f64> = (0..500).map(|i| (i as f64 * 0.07).sin()).collect();
    let mut trace = trace_from(data, dt);

    correct_baseline(&mut trace).unwrap();

    let value = trace.get_parameter(BASELINE_PARAMETER_KEY).unwrap();
    let coefs = value["polynomial_coefs"].as_array().unwrap();
    assert_eq!(coefs.len(), 7);
    assert_eq!(coefs[5], Value::from(0.0));
    assert_eq!(coefs[6], Value::from(0.0));
    assert_eq!(trace.npts(), 500);
    assert_eq!(trace.delta(), dt);
}

/// A caller-owned record type only needs to implement [`Waveform`].
#[derive(Debug, Default)]
struct Channel {
    samples: Vec<f64>,
    sampling_rate: f64,
    annotations: BTreeMap<String, Value>,
}

impl Waveform for Channel {
    fn samples(&self) -> &[f64] {
        &self.samples
    }

    fn samples_mut(&mut self) -> &mut [f64] {
        &mut self.samples
    }

    fn delta(&self) -> f64 {
        1.0 / self.sampling_rate
    }

    fn set_parameter(&mut self, key: &str, value: Value) {
        self.annotations.insert(key.to_string(), value);
    }
}

#[test]
fn validate_custom_waveform() {
    let mut channel = Channel {
        samples: (0..200).map(|i| 0.3 + (i as f64 * 0.1).cos()).collect(),
        sampling_rate: 100.0,
        ..Default::default()
    };

    let corrector = BaselineCorrector::new(BaselineConfig::default()).unwrap();
    let returned = corrector.correct(&mut channel).unwrap();
    assert_eq!(returned.npts(), 200);

    let record = BaselineParameters::from_value(&channel.annotations["baseline"]).unwrap();
    assert_eq!(record.polynomial_coefs.len(), 7);
}

#[test]
fn validate_correction_is_deterministic() {
    let dt = 0.01;
    let data: Vec<f64> = (0..800)
        .map(|i| {
            let t = i as f64 * dt;
            (3.0 * t).sin() + 0.01 * t * t
        })
        .collect();

    let mut a = trace_from(data.clone(), dt);
    let mut b = trace_from(data, dt);
    correct_baseline(&mut a).unwrap();
    correct_baseline(&mut b).unwrap();

    assert_eq!(a.data, b.data);
    assert_eq!(recorded_coefficients(&a), recorded_coefficients(&b));
}
