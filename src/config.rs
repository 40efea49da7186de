//! Pipeline configuration
//!
//! Every knob of a synchronization run lives here: the shared bin width, the
//! spike quality-control thresholds and the kinematic resampling parameters.
//! All fields default to the values the lab pipeline has always used, so an
//! empty JSON object is a valid configuration.

use crate::error::{ExtractError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const NANOS_PER_MICRO: f64 = 1_000.0;
const NANOS_PER_MILLI: f64 = 1_000_000.0;
const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// A strictly positive, integer-nanosecond time span.
///
/// Used both as the width of the shared time grid and as a window length.
/// Parses from duration strings such as `"10ms"`, `"1 ms"`, `"0.5s"` or `"250us"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BinWidth {
    nanos: i64,
}

impl BinWidth {
    /// Create a bin width from nanoseconds
    pub fn from_nanos(nanos: i64) -> Result<Self> {
        if nanos <= 0 {
            return Err(ExtractError::InvalidConfig(format!(
                "bin width must be positive, got {nanos}ns"
            )));
        }
        Ok(Self { nanos })
    }

    /// Create a bin width from whole milliseconds
    pub fn from_millis(millis: i64) -> Result<Self> {
        Self::from_nanos(millis.saturating_mul(1_000_000))
    }

    pub fn nanos(&self) -> i64 {
        self.nanos
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.nanos as f64 / NANOS_PER_SEC
    }

    /// Sampling rate of a grid with this spacing (Hz)
    pub fn rate_hz(&self) -> f64 {
        NANOS_PER_SEC / self.nanos as f64
    }

    /// Zero-origin bin containing `time_ns`, or `None` for times before zero
    pub fn bin_of(&self, time_ns: i64) -> Option<usize> {
        if time_ns < 0 {
            None
        } else {
            Some((time_ns / self.nanos) as usize)
        }
    }

    /// Start of bin `bin` in nanoseconds from trial zero
    pub fn bin_start_ns(&self, bin: usize) -> i64 {
        bin as i64 * self.nanos
    }
}

impl Default for BinWidth {
    fn default() -> Self {
        Self {
            nanos: 10 * NANOS_PER_MILLI as i64,
        }
    }
}

impl FromStr for BinWidth {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let split = trimmed
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| {
                ExtractError::InvalidConfig(format!("duration {s:?} has no unit"))
            })?;
        let (number, unit) = trimmed.split_at(split);
        let value: f64 = number.parse().map_err(|_| {
            ExtractError::InvalidConfig(format!("duration {s:?} has no numeric magnitude"))
        })?;

        let scale = match unit.trim() {
            "ns" => 1.0,
            "us" | "µs" => NANOS_PER_MICRO,
            "ms" => NANOS_PER_MILLI,
            "s" => NANOS_PER_SEC,
            "min" => 60.0 * NANOS_PER_SEC,
            other => {
                return Err(ExtractError::InvalidConfig(format!(
                    "unknown duration unit {other:?} in {s:?}"
                )))
            }
        };

        let nanos = value * scale;
        if (nanos - nanos.round()).abs() > 1e-6 {
            return Err(ExtractError::InvalidConfig(format!(
                "duration {s:?} is not a whole number of nanoseconds"
            )));
        }
        Self::from_nanos(nanos.round() as i64)
    }
}

impl TryFrom<String> for BinWidth {
    type Error = ExtractError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<BinWidth> for String {
    fn from(value: BinWidth) -> Self {
        value.to_string()
    }
}

impl fmt::Display for BinWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nanos = self.nanos;
        if nanos % 1_000_000_000 == 0 {
            write!(f, "{}s", nanos / 1_000_000_000)
        } else if nanos % 1_000_000 == 0 {
            write!(f, "{}ms", nanos / 1_000_000)
        } else if nanos % 1_000 == 0 {
            write!(f, "{}us", nanos / 1_000)
        } else {
            write!(f, "{nanos}ns")
        }
    }
}

/// Window applied to the windowed-sinc anti-aliasing filter of the resampler
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "window", rename_all = "snake_case")]
pub enum ResampleWindow {
    Kaiser { beta: f64 },
    Hann,
    Hamming,
    Boxcar,
}

impl Default for ResampleWindow {
    fn default() -> Self {
        ResampleWindow::Kaiser { beta: 20.0 }
    }
}

/// Spike quality-control thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpikeFilterConfig {
    /// Keep only sorted units (ids 1..=30)
    pub keep_sorted_only: bool,
    /// Units at or below this population-average rate are removed (Hz)
    pub min_firing_rate_hz: f64,
    /// Trials whose mean per-unit rate in any window exceeds this are excluded (Hz)
    pub rate_artifact_threshold_hz: f64,
    /// Window used to measure the per-trial artifact rate
    pub artifact_window: BinWidth,
    /// Pairwise 1 ms count correlation above which the later unit is removed
    pub max_spike_coincidence: f64,
}

impl Default for SpikeFilterConfig {
    fn default() -> Self {
        Self {
            keep_sorted_only: true,
            min_firing_rate_hz: 0.1,
            rate_artifact_threshold_hz: 350.0,
            artifact_window: BinWidth::default(),
            max_spike_coincidence: 0.2,
        }
    }
}

/// Kinematic resampling parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResampleConfig {
    /// Subtracted from every raw marker position
    pub reference_origin: [f64; 3],
    pub window: ResampleWindow,
    /// Largest denominator allowed when reducing the rate ratio to a fraction
    pub max_denominator: u64,
}

impl Default for ResampleConfig {
    fn default() -> Self {
        Self {
            reference_origin: [0.0; 3],
            window: ResampleWindow::default(),
            max_denominator: 1_000_000,
        }
    }
}

/// Full configuration of one synchronization run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    /// Width of the shared time grid
    pub bin_width: BinWidth,
    /// Block label broadcast to every trial's metadata
    pub block: String,
    pub spikes: SpikeFilterConfig,
    pub kinematics: ResampleConfig,
}

impl ExtractConfig {
    /// Load configuration from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        let config: ExtractConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every threshold is usable
    pub fn validate(&self) -> Result<()> {
        let spikes = &self.spikes;
        if !spikes.min_firing_rate_hz.is_finite() || spikes.min_firing_rate_hz < 0.0 {
            return Err(ExtractError::InvalidConfig(format!(
                "min_firing_rate_hz must be a non-negative number, got {}",
                spikes.min_firing_rate_hz
            )));
        }
        if !spikes.rate_artifact_threshold_hz.is_finite() || spikes.rate_artifact_threshold_hz <= 0.0 {
            return Err(ExtractError::InvalidConfig(format!(
                "rate_artifact_threshold_hz must be positive, got {}",
                spikes.rate_artifact_threshold_hz
            )));
        }
        if spikes.max_spike_coincidence.is_nan() {
            return Err(ExtractError::InvalidConfig(
                "max_spike_coincidence must be a number".to_string(),
            ));
        }
        if self.kinematics.max_denominator == 0 {
            return Err(ExtractError::InvalidConfig(
                "max_denominator must be at least 1".to_string(),
            ));
        }
        if self.kinematics.reference_origin.iter().any(|v| !v.is_finite()) {
            return Err(ExtractError::InvalidConfig(
                "reference_origin must be finite".to_string(),
            ));
        }
        if let ResampleWindow::Kaiser { beta } = self.kinematics.window {
            if !beta.is_finite() || beta < 0.0 {
                return Err(ExtractError::InvalidConfig(format!(
                    "kaiser beta must be non-negative, got {beta}"
                )));
            }
        }
        Ok(())
    }
}
