//! Spike quality control and binning
//!
//! The spike binner is a two-phase computation:
//!
//! 1. [`SpikeBinner::fit`] aggregates over every trial's spikes and decides,
//!    once, which units and trials to exclude ([`PopulationFilter`]).
//! 2. [`PopulationFilter::bin`] applies those decisions to each trial and
//!    counts the surviving spikes into the shared time grid.
//!
//! Pipeline: parse → low firing rate → artifact trials → coincident units → bin

pub mod binning;
pub mod events;
pub mod filters;
pub mod waveforms;

pub use binning::SpikeSchema;
pub use events::{SpikeEvent, SpikeTable, TrialSpikes};
pub use waveforms::{array_channels, trial_waveforms, ArrayMap, ArrayRegion, SnippetWaveform};

use crate::config::{BinWidth, SpikeFilterConfig};
use crate::trial::Trial;
use crate::types::{BinnedSpikeMatrix, UnitIdentity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Record of every population-level filtering decision
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterReport {
    /// Units present after the sort-validity filter
    pub initial_units: usize,
    pub low_rate_units: Vec<UnitIdentity>,
    pub artifact_trials: Vec<i64>,
    pub coincident_units: Vec<UnitIdentity>,
    pub retained_units: usize,
}

/// Exclusion decisions computed once over the whole collection
#[derive(Debug, Clone)]
pub struct PopulationFilter {
    schema: SpikeSchema,
    excluded_units: BTreeSet<UnitIdentity>,
    artifact_trials: BTreeSet<i64>,
    report: FilterReport,
}

impl PopulationFilter {
    pub fn schema(&self) -> &SpikeSchema {
        &self.schema
    }

    pub fn excluded_units(&self) -> &BTreeSet<UnitIdentity> {
        &self.excluded_units
    }

    pub fn artifact_trials(&self) -> &BTreeSet<i64> {
        &self.artifact_trials
    }

    pub fn report(&self) -> &FilterReport {
        &self.report
    }

    /// Bin every non-artifact trial over the surviving unit schema
    pub fn bin(&self, table: &SpikeTable, bin_width: BinWidth) -> SpikeExtraction {
        let matrices = if self.schema.is_empty() {
            warn!("No spike events survive filtering; spike matrices are empty");
            Vec::new()
        } else {
            table
                .trials
                .iter()
                .filter(|t| !self.artifact_trials.contains(&t.trial_id))
                .map(|t| self.schema.bin_trial(t, bin_width))
                .collect()
        };

        SpikeExtraction {
            columns: Arc::clone(self.schema.columns()),
            matrices,
            report: self.report.clone(),
        }
    }
}

/// Binned spikes of a trial collection
#[derive(Debug, Clone, PartialEq)]
pub struct SpikeExtraction {
    pub columns: Arc<[UnitIdentity]>,
    /// One matrix per retained trial, in input order
    pub matrices: Vec<BinnedSpikeMatrix>,
    pub report: FilterReport,
}

impl SpikeExtraction {
    pub fn signal_ids(&self) -> Vec<String> {
        self.columns.iter().map(UnitIdentity::signal_id).collect()
    }

    pub fn matrix(&self, trial_id: i64) -> Option<&BinnedSpikeMatrix> {
        self.matrices.iter().find(|m| m.trial_id == trial_id)
    }
}

/// Spike binner for a trial collection
pub struct SpikeBinner {
    config: SpikeFilterConfig,
}

impl Default for SpikeBinner {
    fn default() -> Self {
        Self::new(SpikeFilterConfig::default())
    }
}

impl SpikeBinner {
    pub fn new(config: SpikeFilterConfig) -> Self {
        Self { config }
    }

    /// Filter and bin the spikes of every trial
    pub fn extract(&self, trials: &[Trial], bin_width: BinWidth) -> SpikeExtraction {
        let table = SpikeTable::from_trials(trials, self.config.keep_sorted_only);
        let filter = self.fit(&table);
        filter.bin(&table, bin_width)
    }

    /// Phase 1: decide which units and trials to exclude
    pub fn fit(&self, table: &SpikeTable) -> PopulationFilter {
        let mut working = table.clone();
        let initial_units = working.units().len();

        let low_rate = filters::low_firing_units(&working, self.config.min_firing_rate_hz);
        working.remove_units(&low_rate);

        let artifact_trials = filters::artifact_trials(
            &working,
            self.config.artifact_window,
            self.config.rate_artifact_threshold_hz,
        );
        working.clear_trials(&artifact_trials);

        let coincident = filters::correlated_units(&working, self.config.max_spike_coincidence);
        working.remove_units(&coincident);

        let schema = SpikeSchema::new(working.units());
        info!(
            "Retaining {} of {} units across {} trials",
            schema.len(),
            initial_units,
            table.trials.len() - artifact_trials.len()
        );

        let report = FilterReport {
            initial_units,
            low_rate_units: low_rate.iter().copied().collect(),
            artifact_trials: artifact_trials.iter().copied().collect(),
            coincident_units: coincident.iter().copied().collect(),
            retained_units: schema.len(),
        };

        PopulationFilter {
            schema,
            excluded_units: low_rate.union(&coincident).copied().collect(),
            artifact_trials,
            report,
        }
    }
}
