//! Hand kinematics onto the shared time grid
//!
//! Marker positions arrive at the tracking system's own frame rate with
//! occasional dropped frames. Each trial goes through:
//! - Gap fill: reindex onto the contiguous frame range, linear interpolation
//! - Frame clock: map frames to trial time through the sync parameters
//! - Polyphase resampling to the grid rate
//! - Exact-grid reindex: linear interpolation onto bins `0..=last`

pub mod resample;

pub use resample::{limit_denominator, resample_poly, FilterCache, PolyphaseFilter};

use crate::config::{BinWidth, ResampleConfig};
use crate::error::{ExtractError, Result};
use crate::trial::{MarkerRecording, SyncParameters, Trial};
use crate::types::ContinuousSignal;
use ndarray::{Array2, ArrayView2};
use tracing::debug;

const NANOS_PER_SEC: f64 = 1_000_000_000.0;
const NANOS_PER_MILLI: f64 = 1_000_000.0;

/// Maps tracking-system frames to trial time
#[derive(Debug, Clone, Copy)]
pub struct FrameClock {
    sync_frame: f64,
    frequency: f64,
    start_ms: f64,
}

impl FrameClock {
    pub fn new(frequency: f64, sync: &SyncParameters) -> Self {
        Self {
            sync_frame: sync.phasespace_frame,
            frequency,
            start_ms: sync.start_time_ms,
        }
    }

    /// `(frame - sync_frame) / frequency + start_time`, rounded to whole ns
    pub fn time_ns(&self, frame: i64) -> i64 {
        let offset = (frame as f64 - self.sync_frame) * NANOS_PER_SEC / self.frequency;
        (offset + self.start_ms * NANOS_PER_MILLI).round() as i64
    }
}

/// Gap-filled positions over a contiguous frame range
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FrameSeries {
    pub first_frame: i64,
    /// One row per frame from `first_frame`, columns (x, y, z)
    pub positions: Array2<f64>,
}

/// Reindex usable samples onto every frame between the first and last
///
/// `samples` must be sorted by frame with unique frames and finite positions.
pub(crate) fn fill_gaps(samples: &[(i64, [f64; 3])]) -> Option<FrameSeries> {
    let (&(first_frame, _), &(last_frame, last_pos)) = (samples.first()?, samples.last()?);
    let rows = usize::try_from(last_frame - first_frame).ok()? + 1;
    let mut positions = Array2::zeros((rows, 3));

    for pair in samples.windows(2) {
        let [(f0, p0), (f1, p1)] = [pair[0], pair[1]];
        let span = (f1 - f0) as f64;
        for frame in f0..f1 {
            let t = (frame - f0) as f64 / span;
            let row = (frame - first_frame) as usize;
            for c in 0..3 {
                positions[[row, c]] = p0[c] + t * (p1[c] - p0[c]);
            }
        }
    }
    for c in 0..3 {
        positions[[rows - 1, c]] = last_pos[c];
    }

    Some(FrameSeries {
        first_frame,
        positions,
    })
}

/// Linear interpolation of every column of `fp` (sampled at `xp`) onto `x`
///
/// `xp` must be increasing. Points outside `xp` take the nearest edge value.
pub fn interpolating_reindex(x: &[f64], xp: &[f64], fp: ArrayView2<f64>) -> Array2<f64> {
    let mut out = Array2::zeros((x.len(), fp.ncols()));
    if xp.is_empty() {
        return out;
    }
    let last = xp.len() - 1;
    for (row, &t) in x.iter().enumerate() {
        // First sample strictly after t
        let upper = xp.partition_point(|&p| p <= t);
        for c in 0..fp.ncols() {
            out[[row, c]] = if upper == 0 {
                fp[[0, c]]
            } else if upper > last {
                fp[[last, c]]
            } else {
                let lo = upper - 1;
                let slope = (fp[[upper, c]] - fp[[lo, c]]) / (xp[upper] - xp[lo]);
                fp[[lo, c]] + (t - xp[lo]) * slope
            };
        }
    }
    out
}

/// Hand position resampler
pub struct KinematicResampler {
    config: ResampleConfig,
    filters: FilterCache,
}

impl Default for KinematicResampler {
    fn default() -> Self {
        Self::new(ResampleConfig::default())
    }
}

impl KinematicResampler {
    pub fn new(config: ResampleConfig) -> Self {
        Self {
            config,
            filters: FilterCache::new(),
        }
    }

    pub fn filters(&self) -> &FilterCache {
        &self.filters
    }

    /// Hand position of one trial on the `bin_width` grid
    pub fn resample(&self, trial: &Trial, bin_width: BinWidth) -> Result<ContinuousSignal> {
        let trial_id = trial.trial_id;
        let marker = match &trial.marker {
            Some(marker) if !marker.samples.is_empty() => marker,
            _ => return Ok(ContinuousSignal::empty(trial_id, bin_width)),
        };
        let sync = marker
            .sync
            .as_ref()
            .ok_or_else(|| ExtractError::missing(trial_id, "TrialData.Marker.SyncParameters"))?;
        if !marker.frequency.is_finite() || marker.frequency <= 0.0 {
            return Err(ExtractError::degenerate(
                trial_id,
                format!("marker frequency {} Hz", marker.frequency),
            ));
        }
        let clock = FrameClock::new(marker.frequency, sync);

        let (samples, last_frame) = self.usable_samples(marker);
        if samples.len() < 2 {
            return Err(ExtractError::degenerate(
                trial_id,
                format!("{} usable marker samples", samples.len()),
            ));
        }
        let series = fill_gaps(&samples)
            .ok_or_else(|| ExtractError::degenerate(trial_id, "marker frames out of order"))?;

        let target_rate = bin_width.rate_hz();
        let (up, down) = limit_denominator(target_rate / marker.frequency, self.config.max_denominator)
            .filter(|&(up, _)| up > 0)
            .ok_or_else(|| {
                ExtractError::degenerate(
                    trial_id,
                    format!("cannot resample {} Hz to {} Hz", marker.frequency, target_rate),
                )
            })?;
        debug!(trial_id, up, down, "Resampling hand position");

        let resampled = resample_poly(
            &series.positions,
            up as usize,
            down as usize,
            self.config.window,
            &self.filters,
        );
        let start_ns = clock.time_ns(series.first_frame);
        let resampled_ns: Vec<f64> = (0..resampled.nrows())
            .map(|i| (start_ns + i as i64 * bin_width.nanos()) as f64)
            .collect();

        let bins: Vec<usize> = bin_width
            .bin_of(clock.time_ns(last_frame))
            .map_or_else(Vec::new, |last| (0..=last).collect());
        let grid_ns: Vec<f64> = bins
            .iter()
            .map(|&bin| bin_width.bin_start_ns(bin) as f64)
            .collect();

        Ok(ContinuousSignal {
            trial_id,
            bin_width,
            samples: interpolating_reindex(&grid_ns, &resampled_ns, resampled.view()),
            bins,
        })
    }

    /// Origin-corrected samples sorted by frame, plus the last recorded frame
    ///
    /// Duplicate frames keep their first sample. Samples with a non-finite
    /// coordinate are dropped so the gap fill interpolates over them.
    fn usable_samples(&self, marker: &MarkerRecording) -> (Vec<(i64, [f64; 3])>, i64) {
        let origin = self.config.reference_origin;
        let mut samples: Vec<(i64, [f64; 3])> = marker
            .samples
            .iter()
            .map(|s| {
                let p = s.position;
                (s.frame, [p[0] - origin[0], p[1] - origin[1], p[2] - origin[2]])
            })
            .collect();
        samples.sort_by_key(|&(frame, _)| frame);
        samples.dedup_by_key(|s| s.0);

        let last_frame = samples.last().map_or(0, |&(frame, _)| frame);
        samples.retain(|(_, p)| p.iter().all(|v| v.is_finite()));
        (samples, last_frame)
    }
}
