//! Trial metadata extraction
//!
//! Maps a [`Trial`] overview to the flat per-trial columns of the session frame:
//! subject, session date, trial datetime, task label, trial result and block.

use crate::error::{ExtractError, Result};
use crate::trial::Trial;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Task label inferred from the declared trial name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskLabel {
    /// Random target task
    Rtt,
    /// Critical stability task
    Cst,
    /// Center-out reaching
    Co,
    /// Delayed center-out
    Dco,
    /// Delayed center-out catch trial
    DcoCatch,
    /// Unrecognized names pass through verbatim
    Other(String),
}

impl TaskLabel {
    /// Infer the task from a declared trial name
    ///
    /// `RandomTargetTask*` → RTT, `CST*` → CST, `CenterOut*` → CO, `R?T?` → DCO,
    /// `R?T?C` → DCO-catch, where `?` is any single character.
    pub fn from_trial_name(name: &str) -> Self {
        if name.starts_with("RandomTargetTask") {
            return TaskLabel::Rtt;
        }
        if name.starts_with("CST") {
            return TaskLabel::Cst;
        }
        if name.starts_with("CenterOut") {
            return TaskLabel::Co;
        }

        let chars: Vec<char> = name.chars().collect();
        let delayed_prefix = chars.len() >= 4 && chars[0] == 'R' && chars[2] == 'T';
        match chars.len() {
            4 if delayed_prefix => TaskLabel::Dco,
            5 if delayed_prefix && chars[4] == 'C' => TaskLabel::DcoCatch,
            _ => TaskLabel::Other(name.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            TaskLabel::Rtt => "RTT",
            TaskLabel::Cst => "CST",
            TaskLabel::Co => "CO",
            TaskLabel::Dco => "DCO",
            TaskLabel::DcoCatch => "DCO-catch",
            TaskLabel::Other(name) => name.as_str(),
        }
    }
}

impl fmt::Display for TaskLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trial outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrialResult {
    Failure,
    Success,
    Abort,
}

impl TrialResult {
    pub fn from_code(trial_id: i64, code: i64) -> Result<Self> {
        match code {
            0 => Ok(TrialResult::Failure),
            1 => Ok(TrialResult::Success),
            2 => Ok(TrialResult::Abort),
            code => Err(ExtractError::UnsupportedResultCode { trial_id, code }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrialResult::Failure => "failure",
            TrialResult::Success => "success",
            TrialResult::Abort => "abort",
        }
    }
}

/// Flat metadata broadcast to every row of a trial
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialMeta {
    pub trial_id: i64,
    pub monkey: String,
    pub session_date: NaiveDate,
    pub block: String,
    pub trial_datetime: NaiveDateTime,
    pub task: TaskLabel,
    pub result: TrialResult,
}

impl TrialMeta {
    /// Extract metadata for one trial
    pub fn extract(trial: &Trial, block: &str) -> Result<Self> {
        let overview = &trial.overview;
        let trial_datetime = parse_trial_datetime(overview.date)?;

        Ok(TrialMeta {
            trial_id: trial.trial_id,
            monkey: overview.subject_name.clone(),
            session_date: trial_datetime.date(),
            block: block.to_string(),
            trial_datetime,
            task: TaskLabel::from_trial_name(&overview.trial_name),
            result: TrialResult::from_code(trial.trial_id, overview.trial_status)?,
        })
    }
}

/// Parse a trial number of the form `"Trial0012"` to its numeric id
pub fn parse_trial_id(trial_number: &str) -> Result<i64> {
    trial_number
        .replace("Trial", "")
        .trim()
        .parse()
        .map_err(|_| ExtractError::ParseError(format!("invalid trial number {trial_number:?}")))
}

/// Parse a `YYYYMMDDHHMMSS` encoded trial start
pub fn parse_trial_datetime(date: i64) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(&date.to_string(), "%Y%m%d%H%M%S")
        .map_err(|e| ExtractError::ParseError(format!("invalid trial date {date}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trial::fixtures::empty_trial;

    #[test]
    fn test_task_label_mapping() {
        assert_eq!(TaskLabel::from_trial_name("RandomTargetTask_x").as_str(), "RTT");
        assert_eq!(TaskLabel::from_trial_name("CST_y").as_str(), "CST");
        assert_eq!(TaskLabel::from_trial_name("CenterOut_z").as_str(), "CO");
        assert_eq!(TaskLabel::from_trial_name("R1T2").as_str(), "DCO");
        assert_eq!(TaskLabel::from_trial_name("R1T2C").as_str(), "DCO-catch");
        assert_eq!(TaskLabel::from_trial_name("Fixation").as_str(), "Fixation");
    }

    #[test]
    fn test_task_label_delayed_pattern_is_exact() {
        assert_eq!(TaskLabel::from_trial_name("R1T"), TaskLabel::Other("R1T".to_string()));
        assert_eq!(TaskLabel::from_trial_name("R1T2X"), TaskLabel::Other("R1T2X".to_string()));
        assert_eq!(TaskLabel::from_trial_name("R1T2CC"), TaskLabel::Other("R1T2CC".to_string()));
        assert_eq!(TaskLabel::from_trial_name("X1T2"), TaskLabel::Other("X1T2".to_string()));
        assert_eq!(TaskLabel::from_trial_name("RxTy"), TaskLabel::Dco);
    }

    #[test]
    fn test_result_codes() {
        assert_eq!(TrialResult::from_code(1, 0).unwrap(), TrialResult::Failure);
        assert_eq!(TrialResult::from_code(1, 1).unwrap(), TrialResult::Success);
        assert_eq!(TrialResult::from_code(1, 2).unwrap(), TrialResult::Abort);
        assert!(matches!(
            TrialResult::from_code(7, 3),
            Err(ExtractError::UnsupportedResultCode { trial_id: 7, code: 3 })
        ));
    }

    #[test]
    fn test_parse_trial_id() {
        assert_eq!(parse_trial_id("Trial0012").unwrap(), 12);
        assert_eq!(parse_trial_id("Trial7").unwrap(), 7);
        assert!(parse_trial_id("TrialX").is_err());
    }

    #[test]
    fn test_extract_meta() {
        let trial = empty_trial(12);
        let meta = TrialMeta::extract(&trial, "reward-type").unwrap();

        assert_eq!(meta.trial_id, 12);
        assert_eq!(meta.monkey, "Dwight");
        assert_eq!(meta.session_date, NaiveDate::from_ymd_opt(2025, 1, 7).unwrap());
        assert_eq!(
            meta.trial_datetime.format("%Y-%m-%d %H:%M:%S").to_string(),
            "2025-01-07 12:34:56"
        );
        assert_eq!(meta.task, TaskLabel::Rtt);
        assert_eq!(meta.result, TrialResult::Success);
        assert_eq!(meta.block, "reward-type");
    }

    #[test]
    fn test_invalid_date_is_parse_error() {
        let mut trial = empty_trial(1);
        trial.overview.date = 20251399000000;
        assert!(matches!(
            TrialMeta::extract(&trial, ""),
            Err(ExtractError::ParseError(_))
        ));
    }
}
