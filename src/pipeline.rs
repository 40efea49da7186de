//! Pipeline orchestration
//!
//! This module provides the public API for smile-sync.
//! It orchestrates the full pipeline from a trial collection to the joined
//! session frame.

use crate::config::{BinWidth, ExtractConfig};
use crate::error::{ExtractError, Result};
use crate::kinematics::KinematicResampler;
use crate::loader::{JsonTrialLoader, TrialCollectionLoader};
use crate::metadata::TrialMeta;
use crate::neural::{SpikeBinner, SpikeExtraction};
use crate::states::StateProjector;
use crate::trial::Trial;
use crate::types::{ContinuousSignal, SessionFrame, SessionRow, StateSeries};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Synchronize a trial collection into one session frame.
///
/// # Arguments
/// * `trials` - Loaded trial records
/// * `config` - Bin width, block label and per-modality parameters
///
/// # Returns
/// One row per (trial, bin) present in every modality, ordered by trial id
/// then bin
///
/// # Example
/// ```ignore
/// let trials = JsonTrialLoader.load_file(Path::new("session.json"))?;
/// let frame = compose_session_frame(&trials, &ExtractConfig::default())?;
/// ```
pub fn compose_session_frame(trials: &[Trial], config: &ExtractConfig) -> Result<SessionFrame> {
    SessionComposer::new(config.clone()).compose(trials)
}

/// Load a JSON trial container and synchronize it.
///
/// # Arguments
/// * `raw_json` - Serialized trial container
/// * `config` - Run configuration
///
/// # Example
/// ```ignore
/// let frame = compose_session_json(&raw, &ExtractConfig::default())?;
/// ```
pub fn compose_session_json(raw_json: &str, config: &ExtractConfig) -> Result<SessionFrame> {
    let trials = JsonTrialLoader.load_str(raw_json)?;
    compose_session_frame(&trials, config)
}

/// Session composer holding the run configuration and stage state.
///
/// Pipeline stages:
/// 1. TrialMeta - Per-trial metadata
/// 2. StateProjector / KinematicResampler - Per-trial, in parallel
/// 3. SpikeBinner - Once over the whole collection
/// 4. join_modalities - Inner join on (trial, bin)
///
/// Resampling filters are cached, so reusing one composer across sessions
/// recorded at the same marker rate skips filter design.
pub struct SessionComposer {
    config: ExtractConfig,
    spikes: SpikeBinner,
    kinematics: KinematicResampler,
}

impl Default for SessionComposer {
    fn default() -> Self {
        Self::new(ExtractConfig::default())
    }
}

impl SessionComposer {
    pub fn new(config: ExtractConfig) -> Self {
        Self {
            spikes: SpikeBinner::new(config.spikes.clone()),
            kinematics: KinematicResampler::new(config.kinematics.clone()),
            config,
        }
    }

    pub fn config(&self) -> &ExtractConfig {
        &self.config
    }

    /// Compose the session frame of a trial collection
    pub fn compose(&self, trials: &[Trial]) -> Result<SessionFrame> {
        self.config.validate()?;
        let bin_width = self.config.bin_width;

        // Stage 1: metadata, rejecting duplicate trial ids
        let metas = trials
            .iter()
            .map(|trial| TrialMeta::extract(trial, &self.config.block))
            .collect::<Result<Vec<_>>>()?;
        let mut seen = HashSet::new();
        for meta in &metas {
            if !seen.insert(meta.trial_id) {
                return Err(ExtractError::DuplicateTrial(meta.trial_id));
            }
        }

        // Stage 2: per-trial modalities; the first failure in input order is reported
        let per_trial = trials
            .par_iter()
            .map(|trial| -> Result<(StateSeries, ContinuousSignal)> {
                let states = StateProjector::project(trial, bin_width)?;
                let hand = self.kinematics.resample(trial, bin_width)?;
                Ok((states, hand))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .collect::<Result<Vec<_>>>()?;
        let (states, hands): (Vec<_>, Vec<_>) = per_trial.into_iter().unzip();

        // Stage 3: population-level spikes
        let spikes = self.spikes.extract(trials, bin_width);

        // Stage 4: join
        let frame = join_modalities(&metas, &states, &hands, &spikes, bin_width);
        info!(
            "Composed {} rows from {} trials ({} units)",
            frame.len(),
            frame.trial_ids().len(),
            frame.motor_cortex_columns.len()
        );
        Ok(frame)
    }
}

/// Inner join of the per-trial modality tables on (trial, bin)
///
/// A bin is kept when it is present in the state series with a defined state,
/// in the hand position table and in the spike matrix of the same trial.
/// Trials missing from any modality contribute no rows.
pub fn join_modalities(
    metas: &[TrialMeta],
    states: &[StateSeries],
    hands: &[ContinuousSignal],
    spikes: &SpikeExtraction,
    bin_width: BinWidth,
) -> SessionFrame {
    let states: HashMap<i64, &StateSeries> = states.iter().map(|s| (s.trial_id, s)).collect();
    let hands: HashMap<i64, &ContinuousSignal> = hands.iter().map(|h| (h.trial_id, h)).collect();
    let matrices: HashMap<i64, _> = spikes.matrices.iter().map(|m| (m.trial_id, m)).collect();

    let mut ordered: Vec<&TrialMeta> = metas.iter().collect();
    ordered.sort_by_key(|meta| meta.trial_id);

    let mut rows = Vec::new();
    for meta in ordered {
        let trial_id = meta.trial_id;
        let (Some(series), Some(hand), Some(matrix)) =
            (states.get(&trial_id), hands.get(&trial_id), matrices.get(&trial_id))
        else {
            debug!(trial_id, "Trial missing from at least one modality");
            continue;
        };

        let before = rows.len();
        for (bin, state) in series.bins.iter().zip(&series.states) {
            let Some(state) = state else {
                continue;
            };
            let (Ok(hand_row), Ok(spike_row)) =
                (hand.bins.binary_search(bin), matrix.bins.binary_search(bin))
            else {
                continue;
            };
            let position = hand.samples.row(hand_row);
            rows.push(SessionRow {
                trial_id,
                bin: *bin,
                time_ns: bin_width.bin_start_ns(*bin),
                monkey: meta.monkey.clone(),
                session_date: meta.session_date,
                block: meta.block.clone(),
                trial_datetime: meta.trial_datetime,
                task: meta.task.clone(),
                result: meta.result,
                state: state.clone(),
                hand_position: [position[0], position[1], position[2]],
                motor_cortex: matrix.counts.row(spike_row).to_vec(),
            });
        }
        debug!(trial_id, rows = rows.len() - before, "Joined trial");
    }

    SessionFrame {
        bin_width,
        motor_cortex_columns: spikes.signal_ids(),
        rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{TaskLabel, TrialResult};
    use crate::neural::FilterReport;
    use crate::trial::fixtures::{empty_trial, state_table, unit_spikes};
    use crate::trial::{MarkerRecording, MarkerSample, StateTransition, SyncParameters};
    use crate::types::{BinnedSpikeMatrix, UnitIdentity};
    use ndarray::Array2;
    use std::sync::Arc;

    fn ten_ms() -> BinWidth {
        BinWidth::from_millis(10).unwrap()
    }

    fn meta(trial_id: i64) -> TrialMeta {
        TrialMeta::extract(&empty_trial(trial_id), "B1").unwrap()
    }

    fn series(trial_id: i64, states: Vec<Option<&str>>) -> StateSeries {
        StateSeries {
            trial_id,
            bin_width: ten_ms(),
            bins: (0..states.len()).collect(),
            states: states.into_iter().map(|s| s.map(str::to_string)).collect(),
        }
    }

    fn hand(trial_id: i64, rows: usize) -> ContinuousSignal {
        ContinuousSignal {
            trial_id,
            bin_width: ten_ms(),
            bins: (0..rows).collect(),
            samples: Array2::from_shape_fn((rows, 3), |(r, c)| (r * 10 + c) as f64),
        }
    }

    fn extraction(matrices: Vec<(i64, usize)>) -> SpikeExtraction {
        let columns: Arc<[UnitIdentity]> = vec![UnitIdentity::new(1, 1)].into();
        SpikeExtraction {
            columns: Arc::clone(&columns),
            matrices: matrices
                .into_iter()
                .map(|(trial_id, rows)| BinnedSpikeMatrix {
                    trial_id,
                    bin_width: ten_ms(),
                    bins: (0..rows).collect(),
                    columns: Arc::clone(&columns),
                    counts: Array2::from_shape_fn((rows, 1), |(r, _)| r as u32),
                })
                .collect(),
            report: FilterReport::default(),
        }
    }

    #[test]
    fn test_join_keeps_bins_present_everywhere() {
        let frame = join_modalities(
            &[meta(1)],
            &[series(1, vec![None, Some("A"), Some("A"), Some("B"), Some("end")])],
            &[hand(1, 4)],
            &extraction(vec![(1, 5)]),
            ten_ms(),
        );

        let bins: Vec<usize> = frame.rows.iter().map(|r| r.bin).collect();
        assert_eq!(bins, vec![1, 2, 3]);
        assert_eq!(frame.rows[2].state, "B");
        assert_eq!(frame.rows[2].hand_position, [30.0, 31.0, 32.0]);
        assert_eq!(frame.rows[2].motor_cortex, vec![3]);
        assert_eq!(frame.rows[0].time_ns, 10_000_000);
        assert_eq!(frame.motor_cortex_columns, vec!["ch1u1"]);
    }

    #[test]
    fn test_join_drops_trials_missing_a_modality() {
        let frame = join_modalities(
            &[meta(2), meta(1), meta(3)],
            &[series(1, vec![Some("A"); 2]), series(2, vec![Some("A"); 2]), series(3, vec![Some("A"); 2])],
            &[hand(1, 2), hand(2, 2), hand(3, 0)],
            &extraction(vec![(2, 2), (3, 2)]),
            ten_ms(),
        );

        // Trial 1 has no spikes, trial 3 has no hand data
        assert_eq!(frame.trial_ids(), vec![2]);
        assert_eq!(frame.len(), 2);
    }

    #[test]
    fn test_join_orders_rows_by_trial_id() {
        let frame = join_modalities(
            &[meta(7), meta(3)],
            &[series(7, vec![Some("A")]), series(3, vec![Some("A")])],
            &[hand(7, 1), hand(3, 1)],
            &extraction(vec![(7, 1), (3, 1)]),
            ten_ms(),
        );
        assert_eq!(frame.trial_ids(), vec![3, 7]);
    }

    fn full_trial(trial_id: i64) -> Trial {
        let mut trial = empty_trial(trial_id);
        trial.state_table = Some(state_table(&["Reach to Center", "Hold"]));
        // 0 ms, 100 ms, 300 ms
        trial.transitions = vec![
            StateTransition { state_id: 1, frame: 1 },
            StateTransition { state_id: 2, frame: 101 },
            StateTransition { state_id: -1, frame: 301 },
        ];
        // Unit at 50 Hz, shifted per trial
        trial.snippets = unit_spikes(5, 1, (0..15).map(|k| k * 20 + 1 + trial_id));
        trial.marker = Some(MarkerRecording {
            samples: (1..=301)
                .map(|frame| MarkerSample {
                    position: [frame as f64, 0.0, 1.0],
                    frame,
                })
                .collect(),
            frequency: 1000.0,
            sync: Some(SyncParameters {
                phasespace_frame: 1.0,
                start_time_ms: 0.0,
            }),
        });
        trial
    }

    #[test]
    fn test_compose_two_trials() {
        let trials = vec![full_trial(2), full_trial(1)];
        let config = ExtractConfig {
            block: "B1".to_string(),
            ..ExtractConfig::default()
        };
        let frame = compose_session_frame(&trials, &config).unwrap();

        assert_eq!(frame.trial_ids(), vec![1, 2]);
        // Bins 0..=30 on every modality
        assert_eq!(frame.trial_rows(1).count(), 31);
        assert_eq!(frame.motor_cortex_columns, vec!["ch5u1"]);

        let row = frame.trial_rows(1).find(|r| r.bin == 10).unwrap();
        assert_eq!(row.state, "Hold");
        assert_eq!(row.block, "B1");
        assert_eq!(row.task, TaskLabel::Rtt);
        assert_eq!(row.result, TrialResult::Success);
        assert!((row.hand_position[0] - 101.0).abs() < 1e-6);

        let last = frame.trial_rows(2).last().unwrap();
        assert_eq!(last.state, "end");
        let spikes: u32 = frame.trial_rows(2).map(|r| r.motor_cortex[0]).sum();
        assert_eq!(spikes, 15);
    }

    #[test]
    fn test_duplicate_trial_ids_rejected() {
        let trials = vec![full_trial(4), full_trial(4)];
        assert!(matches!(
            compose_session_frame(&trials, &ExtractConfig::default()),
            Err(ExtractError::DuplicateTrial(4))
        ));
    }

    #[test]
    fn test_unsupported_result_code_propagates() {
        let mut trial = full_trial(1);
        trial.overview.trial_status = 7;
        assert!(matches!(
            compose_session_frame(&[trial], &ExtractConfig::default()),
            Err(ExtractError::UnsupportedResultCode { trial_id: 1, code: 7 })
        ));
    }

    #[test]
    fn test_first_failing_trial_in_input_order_is_reported() {
        let mut trials: Vec<Trial> = (1..=16).map(full_trial).collect();
        for trial_id in [9, 3, 14] {
            trial_id_mut(&mut trials, trial_id).state_table = None;
        }

        for _ in 0..8 {
            assert!(matches!(
                compose_session_frame(&trials, &ExtractConfig::default()),
                Err(ExtractError::MissingField { trial_id: 3, .. })
            ));
        }

        trials.swap(2, 8);
        assert!(matches!(
            compose_session_frame(&trials, &ExtractConfig::default()),
            Err(ExtractError::MissingField { trial_id: 9, .. })
        ));
    }

    fn trial_id_mut(trials: &mut [Trial], trial_id: i64) -> &mut Trial {
        trials.iter_mut().find(|t| t.trial_id == trial_id).unwrap()
    }

    #[test]
    fn test_composer_reuses_filters() {
        let composer = SessionComposer::new(ExtractConfig::default());
        let mut trial = full_trial(1);
        if let Some(marker) = trial.marker.as_mut() {
            marker.frequency = 480.0;
        }
        composer.compose(&[trial.clone()]).unwrap();
        composer.compose(&[trial]).unwrap();
        assert_eq!(composer.kinematics.filters().len(), 1);
    }
}
