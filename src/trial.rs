//! Typed trial records
//!
//! A [`Trial`] is the read-only contract between the loader and the core. The
//! lab's container format drifts between encodings (scalars vs. one-element
//! arrays, matrix orientation, structure-of-fields vs. list of records); all of
//! that is resolved by the loader so the core only ever sees this shape.

use serde::{Deserialize, Serialize};

/// Trial overview fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialOverview {
    /// Declared trial number, e.g. `"Trial0012"`
    pub trial_number: String,
    /// Trial start encoded as `YYYYMMDDHHMMSS`
    pub date: i64,
    pub subject_name: String,
    /// Declared task name, e.g. `"RandomTargetTask_20220630"`
    pub trial_name: String,
    /// Raw result code (0 failure, 1 success, 2 abort)
    pub trial_status: i64,
}

/// One sorted-spike snippet header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snippet {
    pub channel: u32,
    /// Sort code: 0 unsorted, 1..=30 sorted units
    pub unit: i64,
    /// 1-based millisecond frame relative to trial start
    pub frame: i64,
}

/// One motion-capture sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarkerSample {
    pub position: [f64; 3],
    /// Native device frame index
    pub frame: i64,
}

/// Marker clock synchronization parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SyncParameters {
    /// Device frame captured at the sync pulse
    pub phasespace_frame: f64,
    /// Trial time of the sync pulse (ms)
    pub start_time_ms: f64,
}

/// Motion-capture recording of one trial
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerRecording {
    pub samples: Vec<MarkerSample>,
    /// Device sampling frequency (Hz)
    pub frequency: f64,
    pub sync: Option<SyncParameters>,
}

/// A state-machine transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    /// 1-based index into the state table, `-1` for the terminal transition
    pub state_id: i64,
    /// 1-based millisecond frame relative to trial start
    pub frame: i64,
}

/// Declared state name; some encodings wrap the scalar in a one-element list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateName {
    Scalar(String),
    Sequence(Vec<String>),
}

/// Entry of the task state table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTableEntry {
    pub state_name: StateName,
}

/// One behavioral trial with every modality the core consumes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    /// Numeric trial id parsed from the overview trial number
    pub trial_id: i64,
    pub overview: TrialOverview,
    pub snippets: Vec<Snippet>,
    /// Waveform samples per snippet, parallel to `snippets`
    pub waveforms: Option<Vec<Vec<f64>>>,
    pub marker: Option<MarkerRecording>,
    pub transitions: Vec<StateTransition>,
    pub state_table: Option<Vec<StateTableEntry>>,
}

impl Trial {
    /// Time of the last state transition (ns from trial zero), if any
    pub fn last_transition_ns(&self) -> Option<i64> {
        self.transitions
            .iter()
            .map(|t| frame_to_ns(t.frame))
            .max()
    }
}

/// Convert a 1-based millisecond frame to nanoseconds from trial zero
pub(crate) fn frame_to_ns(frame: i64) -> i64 {
    (frame - 1) * 1_000_000
}
