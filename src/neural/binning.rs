//! Per-trial spike binning

use crate::config::BinWidth;
use crate::neural::events::TrialSpikes;
use crate::types::{BinnedSpikeMatrix, UnitIdentity};
use ndarray::Array2;
use std::collections::HashMap;
use std::sync::Arc;

/// Column schema shared by every trial's spike matrix
#[derive(Debug, Clone)]
pub struct SpikeSchema {
    columns: Arc<[UnitIdentity]>,
    index: HashMap<UnitIdentity, usize>,
}

impl SpikeSchema {
    /// Schema over `units`, sorted canonically by (channel, unit)
    pub fn new(units: impl IntoIterator<Item = UnitIdentity>) -> Self {
        let mut units: Vec<UnitIdentity> = units.into_iter().collect();
        units.sort();
        units.dedup();
        let index = units.iter().enumerate().map(|(i, &u)| (u, i)).collect();
        Self {
            columns: units.into(),
            index,
        }
    }

    pub fn columns(&self) -> &Arc<[UnitIdentity]> {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Count one trial's spikes into zero-origin bins of `bin_width`
    ///
    /// Rows run from bin 0 through the bin holding the trial extent. Spikes
    /// before trial zero and spikes of units outside the schema are ignored.
    pub fn bin_trial(&self, spikes: &TrialSpikes, bin_width: BinWidth) -> BinnedSpikeMatrix {
        let rows = spikes
            .extent_ns
            .and_then(|extent| bin_width.bin_of(extent))
            .map_or(0, |last| last + 1);

        let mut counts = Array2::<u32>::zeros((rows, self.columns.len()));
        for event in &spikes.events {
            let (Some(bin), Some(&col)) = (bin_width.bin_of(event.time_ns), self.index.get(&event.unit))
            else {
                continue;
            };
            if bin < rows {
                counts[[bin, col]] += 1;
            }
        }

        BinnedSpikeMatrix {
            trial_id: spikes.trial_id,
            bin_width,
            bins: (0..rows).collect(),
            columns: Arc::clone(&self.columns),
            counts,
        }
    }
}
