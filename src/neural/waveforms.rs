//! Snippet waveforms and electrode array layout

use crate::error::{ExtractError, Result};
use crate::trial::Trial;
use crate::types::UnitIdentity;
use serde::{Deserialize, Serialize};

/// Waveform of one detected snippet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnippetWaveform {
    pub snippet_id: usize,
    pub channel: u32,
    /// Raw sort code, including unsorted (0)
    pub unit: i64,
    pub samples: Vec<f64>,
}

impl SnippetWaveform {
    /// The snippet's unit identity, if its sort code is a valid unit
    pub fn unit_identity(&self) -> Option<UnitIdentity> {
        u32::try_from(self.unit)
            .ok()
            .map(|unit| UnitIdentity::new(self.channel, unit))
    }
}

/// Every snippet's waveform with its (channel, unit), unfiltered
pub fn trial_waveforms(trial: &Trial) -> Result<Vec<SnippetWaveform>> {
    let waveforms = trial.waveforms.as_ref().ok_or_else(|| {
        ExtractError::missing(trial.trial_id, "TrialData.TDT.snippetWaveforms")
    })?;
    if waveforms.len() != trial.snippets.len() {
        return Err(ExtractError::ParseError(format!(
            "trial {}: {} waveforms for {} snippets",
            trial.trial_id,
            waveforms.len(),
            trial.snippets.len()
        )));
    }

    Ok(trial
        .snippets
        .iter()
        .zip(waveforms)
        .enumerate()
        .map(|(snippet_id, (snippet, samples))| SnippetWaveform {
            snippet_id,
            channel: snippet.channel,
            unit: snippet.unit,
            samples: samples.clone(),
        })
        .collect())
}

/// Cortical region of an electrode array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArrayRegion {
    M1,
    PMd,
}

/// Channel assignment of a subject's implanted arrays
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayMap {
    pub m1: Vec<u32>,
    pub pmd: Vec<u32>,
}

impl ArrayMap {
    pub fn region_of(&self, channel: u32) -> Option<ArrayRegion> {
        if self.m1.contains(&channel) {
            Some(ArrayRegion::M1)
        } else if self.pmd.contains(&channel) {
            Some(ArrayRegion::PMd)
        } else {
            None
        }
    }
}

/// Array channel map for a known subject
pub fn array_channels(subject: &str) -> Option<ArrayMap> {
    let middle: Vec<u32> = (33..96).collect();
    let outer: Vec<u32> = (1..33).chain(96..129).collect();
    match subject {
        "Prez" => Some(ArrayMap {
            m1: middle,
            pmd: outer,
        }),
        "Dwight" => Some(ArrayMap {
            m1: outer,
            pmd: middle,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trial::fixtures::empty_trial;
    use crate::trial::Snippet;

    #[test]
    fn test_waveforms_align_with_snippets() {
        let mut trial = empty_trial(2);
        trial.snippets = vec![
            Snippet { channel: 4, unit: 0, frame: 3 },
            Snippet { channel: 9, unit: 2, frame: 8 },
        ];
        trial.waveforms = Some(vec![vec![0.1, 0.2], vec![0.5, 0.4]]);

        let waveforms = trial_waveforms(&trial).unwrap();
        assert_eq!(waveforms.len(), 2);
        assert_eq!(waveforms[1].snippet_id, 1);
        assert_eq!(waveforms[1].unit_identity(), Some(UnitIdentity::new(9, 2)));
        assert_eq!(waveforms[0].unit, 0);
        assert_eq!(waveforms[1].samples, vec![0.5, 0.4]);
    }

    #[test]
    fn test_missing_waveforms() {
        let trial = empty_trial(2);
        assert!(matches!(
            trial_waveforms(&trial),
            Err(ExtractError::MissingField { trial_id: 2, .. })
        ));
    }

    #[test]
    fn test_array_channels() {
        let prez = array_channels("Prez").unwrap();
        assert_eq!(prez.region_of(33), Some(ArrayRegion::M1));
        assert_eq!(prez.region_of(96), Some(ArrayRegion::PMd));
        assert_eq!(prez.m1.len() + prez.pmd.len(), 128);

        let dwight = array_channels("Dwight").unwrap();
        assert_eq!(dwight.region_of(1), Some(ArrayRegion::M1));
        assert_eq!(dwight.region_of(95), Some(ArrayRegion::PMd));
        assert_eq!(dwight.region_of(200), None);

        assert!(array_channels("Unknown").is_none());
    }
}
