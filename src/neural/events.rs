//! Spike event parsing
//!
//! Flattens every trial's snippet headers into one population-wide table of
//! spike events, optionally keeping sorted units only.

use crate::trial::{frame_to_ns, Trial};
use crate::types::UnitIdentity;
use std::collections::BTreeSet;

/// Largest sort code that denotes a sorted unit
pub const MAX_SORTED_UNIT: i64 = 30;

/// One detected spike
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpikeEvent {
    pub trial_id: i64,
    pub unit: UnitIdentity,
    /// Time relative to trial zero (ns)
    pub time_ns: i64,
}

/// Spike events of one trial
#[derive(Debug, Clone, PartialEq)]
pub struct TrialSpikes {
    pub trial_id: i64,
    /// Last observed time of the trial (latest parsed spike or state transition)
    pub extent_ns: Option<i64>,
    pub events: Vec<SpikeEvent>,
}

impl TrialSpikes {
    /// Spike-time span of the trial's remaining events (ns)
    pub fn span_ns(&self) -> i64 {
        let min = self.events.iter().map(|e| e.time_ns).min();
        let max = self.events.iter().map(|e| e.time_ns).max();
        match (min, max) {
            (Some(min), Some(max)) => max - min,
            _ => 0,
        }
    }
}

/// Spike events of a whole trial collection, in trial order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpikeTable {
    pub trials: Vec<TrialSpikes>,
}

impl SpikeTable {
    /// Parse every trial's snippets
    pub fn from_trials(trials: &[Trial], keep_sorted_only: bool) -> Self {
        Self {
            trials: trials
                .iter()
                .map(|trial| parse_trial_spikes(trial, keep_sorted_only))
                .collect(),
        }
    }

    pub fn event_count(&self) -> usize {
        self.trials.iter().map(|t| t.events.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.event_count() == 0
    }

    /// Distinct units present, in canonical order
    pub fn units(&self) -> BTreeSet<UnitIdentity> {
        self.events().map(|e| e.unit).collect()
    }

    pub fn events(&self) -> impl Iterator<Item = &SpikeEvent> {
        self.trials.iter().flat_map(|t| t.events.iter())
    }

    /// Drop every event of the given units
    pub fn remove_units(&mut self, units: &BTreeSet<UnitIdentity>) {
        if units.is_empty() {
            return;
        }
        for trial in &mut self.trials {
            trial.events.retain(|e| !units.contains(&e.unit));
        }
    }

    /// Drop every event of the given trials
    pub fn clear_trials(&mut self, trial_ids: &BTreeSet<i64>) {
        for trial in &mut self.trials {
            if trial_ids.contains(&trial.trial_id) {
                trial.events.clear();
            }
        }
    }
}

/// Parse one trial's snippets into spike events
///
/// Timestamps are `(frame - 1)` milliseconds. With `keep_sorted_only`, sort codes
/// outside `1..=30` are dropped; negative sort codes are never valid units.
pub fn parse_trial_spikes(trial: &Trial, keep_sorted_only: bool) -> TrialSpikes {
    let events: Vec<SpikeEvent> = trial
        .snippets
        .iter()
        .filter(|s| !keep_sorted_only || (s.unit > 0 && s.unit <= MAX_SORTED_UNIT))
        .filter_map(|s| {
            let unit = u32::try_from(s.unit).ok()?;
            Some(SpikeEvent {
                trial_id: trial.trial_id,
                unit: UnitIdentity::new(s.channel, unit),
                time_ns: frame_to_ns(s.frame),
            })
        })
        .collect();

    let last_spike = events.iter().map(|e| e.time_ns).max();
    let extent_ns = last_spike.max(trial.last_transition_ns());

    TrialSpikes {
        trial_id: trial.trial_id,
        extent_ns,
        events,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trial::fixtures::{empty_trial, unit_spikes};
    use crate::trial::{Snippet, StateTransition};

    #[test]
    fn test_keep_sorted_only_drops_noise_and_invalid() {
        let mut trial = empty_trial(1);
        trial.snippets = vec![
            Snippet { channel: 1, unit: 0, frame: 1 },
            Snippet { channel: 1, unit: 1, frame: 2 },
            Snippet { channel: 1, unit: 30, frame: 3 },
            Snippet { channel: 1, unit: 31, frame: 4 },
            Snippet { channel: 1, unit: 255, frame: 5 },
        ];

        let sorted = parse_trial_spikes(&trial, true);
        let units: Vec<u32> = sorted.events.iter().map(|e| e.unit.unit).collect();
        assert_eq!(units, vec![1, 30]);

        let all = parse_trial_spikes(&trial, false);
        assert_eq!(all.events.len(), 5);
    }

    #[test]
    fn test_timestamps_are_frame_minus_one_ms() {
        let mut trial = empty_trial(4);
        trial.snippets = unit_spikes(2, 1, [1, 101]);
        let spikes = parse_trial_spikes(&trial, true);
        assert_eq!(spikes.events[0].time_ns, 0);
        assert_eq!(spikes.events[1].time_ns, 100_000_000);
        assert_eq!(spikes.events[1].trial_id, 4);
        assert_eq!(spikes.span_ns(), 100_000_000);
    }

    #[test]
    fn test_extent_covers_transitions() {
        let mut trial = empty_trial(1);
        trial.snippets = unit_spikes(2, 1, [11]);
        trial.transitions = vec![StateTransition { state_id: -1, frame: 1001 }];
        let spikes = parse_trial_spikes(&trial, true);
        assert_eq!(spikes.extent_ns, Some(1_000_000_000));

        let silent = parse_trial_spikes(&empty_trial(2), true);
        assert_eq!(silent.extent_ns, None);
    }
}
