//! Strong-motion trace representation.
//!
//! A [`StationTrace`] holds one channel of uniformly sampled data together
//! with its station identifiers and a free-form parameter map that
//! processing steps use to record what they did (for example the baseline
//! polynomial). Processing steps are written against the [`Waveform`] trait
//! so callers with their own trace type only need to implement that.

use chrono::{DateTime, Utc};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur when building a trace
#[derive(Debug, Error)]
pub enum TraceError {
    /// No samples supplied
    #[error("Trace data is required and must not be empty")]
    EmptyData,

    /// Sample spacing missing, non-positive or non-finite
    #[error("Sample spacing must be finite and > 0, got {0}")]
    InvalidDelta(f64),
}

/// Minimal interface a processing step needs from a trace.
pub trait Waveform {
    /// Sample values.
    fn samples(&self) -> &[f64];

    /// Mutable sample values.
    fn samples_mut(&mut self) -> &mut [f64];

    /// Sample spacing in seconds.
    fn delta(&self) -> f64;

    /// Number of samples.
    fn npts(&self) -> usize {
        self.samples().len()
    }

    /// Attach a named parameter, replacing any previous value for `key`.
    fn set_parameter(&mut self, key: &str, value: Value);
}

/// Station identifiers and timing for a trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceStats {
    /// Network code
    pub network: String,

    /// Station code
    pub station: String,

    /// Location code
    pub location: String,

    /// Channel code
    pub channel: String,

    /// Time of the first sample
    pub starttime: DateTime<Utc>,

    /// Sample spacing in seconds
    pub delta: f64,
}

impl TraceStats {
    /// Sampling rate in Hz
    pub fn sampling_rate(&self) -> f64 {
        1.0 / self.delta
    }
}

/// One channel of strong-motion data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationTrace {
    /// Sample values
    pub data: Vec<f64>,

    /// Identifiers and timing
    pub stats: TraceStats,

    /// Parameters recorded by processing steps
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
}

/// Builder for StationTrace
#[derive(Debug, Default)]
pub struct StationTraceBuilder {
    data: Option<Vec<f64>>,
    delta: Option<f64>,
    network: Option<String>,
    station: Option<String>,
    location: Option<String>,
    channel: Option<String>,
    starttime: Option<DateTime<Utc>>,
}

impl StationTraceBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the samples
    pub fn data(mut self, data: Vec<f64>) -> Self {
        self.data = Some(data);
        self
    }

    /// Set the sample spacing in seconds
    pub fn delta(mut self, delta: f64) -> Self {
        self.delta = Some(delta);
        self
    }

    /// Set the network code
    pub fn network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(network.into());
        self
    }

    /// Set the station code
    pub fn station(mut self, station: impl Into<String>) -> Self {
        self.station = Some(station.into());
        self
    }

    /// Set the location code
    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Set the channel code
    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Set the time of the first sample (defaults to the Unix epoch)
    pub fn starttime(mut self, starttime: DateTime<Utc>) -> Self {
        self.starttime = Some(starttime);
        self
    }

    /// Build the trace
    pub fn build(self) -> Result<StationTrace, TraceError> {
        let data = self.data.filter(|d| !d.is_empty()).ok_or(TraceError::EmptyData)?;

        let delta = self.delta.unwrap_or(f64::NAN);
        if !(delta.is_finite() && delta > 0.0) {
            return Err(TraceError::InvalidDelta(delta));
        }

        Ok(StationTrace {
            data,
            stats: TraceStats {
                network: self.network.unwrap_or_default(),
                station: self.station.unwrap_or_default(),
                location: self.location.unwrap_or_default(),
                channel: self.channel.unwrap_or_default(),
                starttime: self.starttime.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
                delta,
            },
            parameters: HashMap::new(),
        })
    }
}

impl StationTrace {
    /// Create a new StationTrace builder
    pub fn builder() -> StationTraceBuilder {
        StationTraceBuilder::new()
    }

    /// Number of samples
    pub fn npts(&self) -> usize {
        self.data.len()
    }

    /// Sample spacing in seconds
    pub fn delta(&self) -> f64 {
        self.stats.delta
    }

    /// Seconds since the first sample, `i * delta`
    pub fn times(&self) -> Array1<f64> {
        let delta = self.stats.delta;
        Array1::from_shape_fn(self.npts(), |i| i as f64 * delta)
    }

    /// `NET.STA.LOC.CHA`
    pub fn id(&self) -> String {
        format!(
            "{}.{}.{}.{}",
            self.stats.network, self.stats.station, self.stats.location, self.stats.channel
        )
    }

    /// Record a parameter, replacing any previous value for `key`
    pub fn set_parameter(&mut self, key: impl Into<String>, value: Value) {
        self.parameters.insert(key.into(), value);
    }

    /// Look up a recorded parameter
    pub fn get_parameter(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key)
    }

    /// Whether a parameter has been recorded under `key`
    pub fn has_parameter(&self, key: &str) -> bool {
        self.parameters.contains_key(key)
    }

    /// Recorded parameter names, sorted
    pub fn parameter_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.parameters.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}

impl Waveform for StationTrace {
    fn samples(&self) -> &[f64] {
        &self.data
    }

    fn samples_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    fn delta(&self) -> f64 {
        self.stats.delta
    }

    fn set_parameter(&mut self, key: &str, value: Value) {
        StationTrace::set_parameter(self, key, value);
    }
}
