//! Core types for the synchronization pipeline
//!
//! This module defines the per-modality tables produced by each stage and the
//! joined session frame. Every table indexes its rows by zero-origin bin number
//! on a grid of one shared [`BinWidth`], so rows from different modalities line
//! up by integer equality.

use crate::config::BinWidth;
use crate::metadata::{TaskLabel, TrialResult};
use chrono::{NaiveDate, NaiveDateTime};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Column group names of the session frame, in output order
pub const STATE_GROUP: &str = "state";
pub const HAND_POSITION_GROUP: &str = "hand position";
pub const MOTOR_CORTEX_GROUP: &str = "motor cortex";

/// Flat metadata columns of the session frame, in output order
pub const META_COLUMNS: [&str; 6] = [
    "monkey",
    "session date",
    "block",
    "trial datetime",
    "task",
    "result",
];

/// Hand position channels
pub const HAND_POSITION_COLUMNS: [&str; 3] = ["x", "y", "z"];

/// A putative neuron: one sorted unit on one recording channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitIdentity {
    pub channel: u32,
    pub unit: u32,
}

impl UnitIdentity {
    pub fn new(channel: u32, unit: u32) -> Self {
        Self { channel, unit }
    }

    /// Flat signal identifier, e.g. `ch12u1`
    pub fn signal_id(&self) -> String {
        format!("ch{}u{}", self.channel, self.unit)
    }
}

impl fmt::Display for UnitIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch{}u{}", self.channel, self.unit)
    }
}

/// Spike counts of one trial: rows are bins, columns are units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinnedSpikeMatrix {
    pub trial_id: i64,
    pub bin_width: BinWidth,
    /// Bin number of each row, strictly increasing
    pub bins: Vec<usize>,
    /// Shared column schema, sorted by (channel, unit)
    pub columns: Arc<[UnitIdentity]>,
    pub counts: Array2<u32>,
}

impl BinnedSpikeMatrix {
    /// Flat column ids (`ch{channel}u{unit}`)
    pub fn signal_ids(&self) -> Vec<String> {
        self.columns.iter().map(UnitIdentity::signal_id).collect()
    }

    /// Total spikes recorded for `unit`, if it is a column
    pub fn unit_total(&self, unit: UnitIdentity) -> Option<u64> {
        let col = self.columns.iter().position(|c| *c == unit)?;
        Some(self.counts.column(col).iter().map(|&c| c as u64).sum())
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }
}

/// Hand position of one trial on the shared grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuousSignal {
    pub trial_id: i64,
    pub bin_width: BinWidth,
    pub bins: Vec<usize>,
    /// Rows × (x, y, z)
    pub samples: Array2<f64>,
}

impl ContinuousSignal {
    /// Signal with no rows, for trials without marker data
    pub fn empty(trial_id: i64, bin_width: BinWidth) -> Self {
        Self {
            trial_id,
            bin_width,
            bins: Vec::new(),
            samples: Array2::zeros((0, 3)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }
}

/// Active task state of one trial on the shared grid
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSeries {
    pub trial_id: i64,
    pub bin_width: BinWidth,
    pub bins: Vec<usize>,
    /// `None` before the first transition
    pub states: Vec<Option<String>>,
}

impl StateSeries {
    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }
}

/// One synchronized (trial, bin) row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRow {
    pub trial_id: i64,
    pub bin: usize,
    /// Bin start relative to trial zero (ns)
    pub time_ns: i64,
    pub monkey: String,
    pub session_date: NaiveDate,
    pub block: String,
    pub trial_datetime: NaiveDateTime,
    pub task: TaskLabel,
    pub result: TrialResult,
    pub state: String,
    pub hand_position: [f64; 3],
    pub motor_cortex: Vec<u32>,
}

/// A named group of columns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnGroup {
    pub name: String,
    pub columns: Vec<String>,
}

/// The joined, metadata-annotated feature table of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionFrame {
    pub bin_width: BinWidth,
    /// Flat ids of the `motor cortex` columns, parallel to `SessionRow::motor_cortex`
    pub motor_cortex_columns: Vec<String>,
    /// Rows ordered by (trial id, bin)
    pub rows: Vec<SessionRow>,
}

impl SessionFrame {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Grouped modality columns: `state`, `hand position`, `motor cortex`
    pub fn column_groups(&self) -> Vec<ColumnGroup> {
        vec![
            ColumnGroup {
                name: STATE_GROUP.to_string(),
                columns: vec![String::new()],
            },
            ColumnGroup {
                name: HAND_POSITION_GROUP.to_string(),
                columns: HAND_POSITION_COLUMNS.iter().map(|c| c.to_string()).collect(),
            },
            ColumnGroup {
                name: MOTOR_CORTEX_GROUP.to_string(),
                columns: self.motor_cortex_columns.clone(),
            },
        ]
    }

    /// Full column layout as (group, signal) pairs; metadata columns have an empty signal
    pub fn columns(&self) -> Vec<(String, String)> {
        let meta = META_COLUMNS
            .iter()
            .map(|name| (name.to_string(), String::new()));
        let grouped = self.column_groups().into_iter().flat_map(|group| {
            let name = group.name;
            group
                .columns
                .into_iter()
                .map(move |signal| (name.clone(), signal))
        });
        meta.chain(grouped).collect()
    }

    /// Distinct trial ids in row order
    pub fn trial_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.rows.iter().map(|r| r.trial_id).collect();
        ids.dedup();
        ids
    }

    /// Rows of one trial
    pub fn trial_rows(&self, trial_id: i64) -> impl Iterator<Item = &SessionRow> {
        self.rows.iter().filter(move |r| r.trial_id == trial_id)
    }
}
