//! Task state projection
//!
//! Converts a trial's state transitions into the active state name at every
//! bin of the shared grid by forward fill.

use crate::config::BinWidth;
use crate::error::{ExtractError, Result};
use crate::trial::{frame_to_ns, StateName, Trial};
use crate::types::StateSeries;

/// State name of the terminal transition
pub const END_STATE: &str = "end";

/// Terminal transition id
pub const END_STATE_ID: i64 = -1;

/// A named state transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateEvent {
    pub name: String,
    /// Time from trial zero (ns)
    pub time_ns: i64,
}

/// Projector from transitions to a per-bin state series
pub struct StateProjector;

impl StateProjector {
    /// Named transitions of a trial, in event order
    pub fn events(trial: &Trial) -> Result<Vec<StateEvent>> {
        trial
            .transitions
            .iter()
            .map(|t| {
                Ok(StateEvent {
                    name: state_name(trial, t.state_id)?,
                    time_ns: frame_to_ns(t.frame),
                })
            })
            .collect()
    }

    /// Active state at every bin from 0 through the last transition
    pub fn project(trial: &Trial, bin_width: BinWidth) -> Result<StateSeries> {
        let events = Self::events(trial)?;

        let last_bin = events.iter().map(|e| e.time_ns).max().and_then(|t| bin_width.bin_of(t));
        let Some(last_bin) = last_bin else {
            return Ok(StateSeries {
                trial_id: trial.trial_id,
                bin_width,
                bins: Vec::new(),
                states: Vec::new(),
            });
        };

        // Stable sort keeps event order among equal times, so the later event wins
        let mut ordered: Vec<&StateEvent> = events.iter().collect();
        ordered.sort_by_key(|e| e.time_ns);

        let mut states = Vec::with_capacity(last_bin + 1);
        let mut next = 0;
        let mut current: Option<&str> = None;
        for bin in 0..=last_bin {
            let bin_start = bin_width.bin_start_ns(bin);
            while next < ordered.len() && ordered[next].time_ns <= bin_start {
                current = Some(ordered[next].name.as_str());
                next += 1;
            }
            states.push(current.map(str::to_string));
        }

        Ok(StateSeries {
            trial_id: trial.trial_id,
            bin_width,
            bins: (0..=last_bin).collect(),
            states,
        })
    }
}

fn state_name(trial: &Trial, state_id: i64) -> Result<String> {
    if state_id == END_STATE_ID {
        return Ok(END_STATE.to_string());
    }
    let table = trial
        .state_table
        .as_ref()
        .ok_or_else(|| ExtractError::missing(trial.trial_id, "Parameters.StateTable"))?;
    let entry = usize::try_from(state_id - 1)
        .ok()
        .and_then(|index| table.get(index))
        .ok_or(ExtractError::UnknownState {
            trial_id: trial.trial_id,
            state_id,
        })?;

    match &entry.state_name {
        StateName::Scalar(name) => Ok(name.clone()),
        StateName::Sequence(names) if names.len() == 1 => Ok(names[0].clone()),
        StateName::Sequence(names) => Err(ExtractError::ParseError(format!(
            "trial {}: state {} has {} names",
            trial.trial_id,
            state_id,
            names.len()
        ))),
    }
}
