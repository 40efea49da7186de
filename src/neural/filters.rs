//! Population-level spike quality control
//!
//! Each filter looks at the whole trial collection at once and returns the
//! set of units (or trials) to exclude. The sets are computed before any
//! per-trial binning happens.

use crate::config::BinWidth;
use crate::neural::events::SpikeTable;
use crate::types::UnitIdentity;
use ndarray::Array2;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info, warn};

const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// Resolution of the coincidence count matrix (1 ms)
pub const COINCIDENCE_BIN_NS: i64 = 1_000_000;

/// Average firing rate per unit over the whole collection (Hz)
///
/// Rate = unit spike count / Σ per-trial spike-time span, where a trial's span
/// is the distance between its first and last event over all units. Returns
/// `None` when the summed span is zero and no rate is defined.
pub fn average_firing_rates(table: &SpikeTable) -> Option<BTreeMap<UnitIdentity, f64>> {
    let duration_ns: i64 = table.trials.iter().map(|t| t.span_ns()).sum();
    if duration_ns <= 0 {
        return None;
    }
    let duration_s = duration_ns as f64 / NANOS_PER_SEC;

    let mut counts: BTreeMap<UnitIdentity, u64> = BTreeMap::new();
    for event in table.events() {
        *counts.entry(event.unit).or_default() += 1;
    }

    Some(
        counts
            .into_iter()
            .map(|(unit, count)| (unit, count as f64 / duration_s))
            .collect(),
    )
}

/// Units whose average firing rate is at or below `min_firing_rate_hz`
pub fn low_firing_units(table: &SpikeTable, min_firing_rate_hz: f64) -> BTreeSet<UnitIdentity> {
    let Some(rates) = average_firing_rates(table) else {
        if !table.is_empty() {
            warn!("Recording duration is zero; skipping low firing rate filter");
        }
        return BTreeSet::new();
    };

    let removed: BTreeSet<UnitIdentity> = rates
        .iter()
        .filter(|(_, &rate)| rate <= min_firing_rate_hz)
        .map(|(&unit, _)| unit)
        .collect();

    info!(
        "Removing {} of {} units with average firing rate less than {} Hz",
        removed.len(),
        rates.len(),
        min_firing_rate_hz
    );
    debug!(units = ?removed, "Low firing units removed");

    removed
}

/// Trials whose population activity looks like an artifact
///
/// Each trial's spikes are counted in consecutive zero-origin windows across
/// all units. A window's rate is its count divided by the window length and
/// by the number of units in the population, i.e. the mean per-unit rate. A
/// trial is flagged when any window's rate exceeds `threshold_hz`.
pub fn artifact_trials(table: &SpikeTable, window: BinWidth, threshold_hz: f64) -> BTreeSet<i64> {
    let unit_count = table.units().len();
    if unit_count == 0 {
        return BTreeSet::new();
    }
    let window_s = window.as_secs_f64();

    let flagged: BTreeSet<i64> = table
        .trials
        .iter()
        .filter(|trial| {
            let mut window_counts: HashMap<i64, u32> = HashMap::new();
            for event in &trial.events {
                *window_counts
                    .entry(event.time_ns.div_euclid(window.nanos()))
                    .or_default() += 1;
            }
            let peak = window_counts.values().copied().max().unwrap_or(0);
            let peak_rate = peak as f64 / (window_s * unit_count as f64);
            peak_rate > threshold_hz
        })
        .map(|trial| trial.trial_id)
        .collect();

    info!(
        "Removing {} of {} trials with population firing rate above {} Hz",
        flagged.len(),
        table.trials.len(),
        threshold_hz
    );
    debug!(trials = ?flagged, "Artifact trials removed");

    flagged
}

/// Streaming Pearson correlation of 1 ms spike counts across units
///
/// Only nonzero bins are visited: the cross-product of two units is nonzero
/// only where both fire, so the accumulator never materializes the dense
/// time × unit matrix.
pub struct CoincidenceAccumulator {
    units: Vec<UnitIdentity>,
    index: HashMap<UnitIdentity, usize>,
    bin_count: u64,
    sum: Vec<f64>,
    sum_sq: Vec<f64>,
    /// Lower triangle (row > column) of Σ x_i x_j
    cross: Array2<f64>,
}

impl CoincidenceAccumulator {
    /// Accumulator over `units`, which must be in canonical order
    pub fn new(units: Vec<UnitIdentity>) -> Self {
        let n = units.len();
        let index = units.iter().enumerate().map(|(i, &u)| (u, i)).collect();
        Self {
            units,
            index,
            bin_count: 0,
            sum: vec![0.0; n],
            sum_sq: vec![0.0; n],
            cross: Array2::zeros((n, n)),
        }
    }

    /// Add one trial's counts: `bins` zero-origin bins, `spikes` as (unit, bin)
    pub fn add_trial(&mut self, bins: usize, spikes: impl IntoIterator<Item = (UnitIdentity, usize)>) {
        let mut by_bin: HashMap<usize, BTreeMap<usize, u32>> = HashMap::new();
        for (unit, bin) in spikes {
            if bin >= bins {
                continue;
            }
            if let Some(&col) = self.index.get(&unit) {
                *by_bin.entry(bin).or_default().entry(col).or_default() += 1;
            }
        }

        for counts in by_bin.values() {
            let counts: Vec<(usize, f64)> = counts.iter().map(|(&c, &n)| (c, n as f64)).collect();
            for (a, &(i, ci)) in counts.iter().enumerate() {
                self.sum[i] += ci;
                self.sum_sq[i] += ci * ci;
                for &(j, cj) in &counts[..a] {
                    self.cross[[i, j]] += ci * cj;
                }
            }
        }
        self.bin_count += bins as u64;
    }

    pub fn units(&self) -> &[UnitIdentity] {
        &self.units
    }

    /// Pearson correlation of units `i` and `j` (`i > j`); `None` when either is constant
    pub fn correlation(&self, i: usize, j: usize) -> Option<f64> {
        let (i, j) = if i > j { (i, j) } else { (j, i) };
        if i == j {
            return Some(1.0);
        }
        let n = self.bin_count as f64;
        let num = n * self.cross[[i, j]] - self.sum[i] * self.sum[j];
        let var_i = n * self.sum_sq[i] - self.sum[i] * self.sum[i];
        let var_j = n * self.sum_sq[j] - self.sum[j] * self.sum[j];
        if var_i <= 0.0 || var_j <= 0.0 {
            return None;
        }
        let r = num / (var_i * var_j).sqrt();
        r.is_finite().then_some(r)
    }

    /// Units correlated above `max_coincidence` with any earlier unit
    ///
    /// Only the lower triangle is consulted, so of a correlated pair the unit
    /// later in canonical order is removed and the earlier one is kept.
    pub fn coincident_units(&self, max_coincidence: f64) -> BTreeSet<UnitIdentity> {
        (0..self.units.len())
            .filter(|&i| {
                (0..i).any(|j| {
                    self.correlation(i, j)
                        .map_or(false, |r| r > max_coincidence)
                })
            })
            .map(|i| self.units[i])
            .collect()
    }
}

/// Units whose 1 ms count trains duplicate an earlier unit
///
/// Each trial contributes the 1 ms bins from its first to its last
/// non-negative spike.
pub fn correlated_units(table: &SpikeTable, max_coincidence: f64) -> BTreeSet<UnitIdentity> {
    let units: Vec<UnitIdentity> = table.units().into_iter().collect();
    let total = units.len();
    let mut accumulator = CoincidenceAccumulator::new(units);

    for trial in &table.trials {
        let spikes: Vec<(UnitIdentity, i64)> = trial
            .events
            .iter()
            .filter(|e| e.time_ns >= 0)
            .map(|e| (e.unit, e.time_ns / COINCIDENCE_BIN_NS))
            .collect();
        let (Some(first), Some(last)) = (
            spikes.iter().map(|&(_, bin)| bin).min(),
            spikes.iter().map(|&(_, bin)| bin).max(),
        ) else {
            continue;
        };
        accumulator.add_trial(
            (last - first) as usize + 1,
            spikes
                .into_iter()
                .map(|(unit, bin)| (unit, (bin - first) as usize)),
        );
    }

    let removed = accumulator.coincident_units(max_coincidence);
    info!(
        "Removing {} of {} units with spike coincidence greater than {}",
        removed.len(),
        total,
        max_coincidence
    );
    debug!(units = ?removed, "Coincident units removed");

    removed
}
