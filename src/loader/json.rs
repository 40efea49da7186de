//! JSON trial-collection loader
//!
//! Reads a JSON export of the lab's trial container. The document holds exactly
//! one named record (dunder keys such as `__header__` are ignored) which is
//! either a list of trial objects or a structure of parallel per-trial field
//! arrays. Newline-delimited trial objects are accepted as a fallback decoder.

use crate::error::{ExtractError, Result};
use crate::metadata::parse_trial_id;
use crate::trial::{
    MarkerRecording, MarkerSample, Snippet, StateName, StateTableEntry, StateTransition,
    SyncParameters, Trial, TrialOverview,
};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::TrialCollectionLoader;

/// Loader for JSON trial containers
pub struct JsonTrialLoader;

impl TrialCollectionLoader for JsonTrialLoader {
    fn load_str(&self, raw: &str) -> Result<Vec<Trial>> {
        let records = match serde_json::from_str::<Value>(raw) {
            Ok(document) => container_records(document)?,
            Err(document_err) => parse_ndjson(raw).map_err(|line_err| {
                ExtractError::FormatLoad(format!(
                    "not a JSON container ({document_err}) nor a trial stream ({line_err})"
                ))
            })?,
        };

        records.into_iter().map(convert_record).collect()
    }
}

fn is_dunder(key: &str) -> bool {
    key.len() > 4 && key.starts_with("__") && key.ends_with("__")
}

/// A single trial carries its `Overview` as an object; a structure of fields
/// carries it as a per-trial array
fn is_trial_record(map: &Map<String, Value>) -> bool {
    matches!(map.get("Overview"), Some(Value::Object(_)))
}

/// Locate the single trial collection in a parsed document
fn container_records(document: Value) -> Result<Vec<Value>> {
    match document {
        Value::Array(items) => Ok(items),
        Value::Object(map) if is_trial_record(&map) => Ok(vec![Value::Object(map)]),
        Value::Object(mut map) => {
            let keys: Vec<String> = map.keys().filter(|k| !is_dunder(k)).cloned().collect();
            if keys.len() != 1 {
                return Err(ExtractError::AmbiguousSourceContent { keys });
            }
            let collection = map
                .remove(&keys[0])
                .ok_or_else(|| ExtractError::FormatLoad("empty container".to_string()))?;
            collection_records(collection)
        }
        other => Err(ExtractError::FormatLoad(format!(
            "expected a top-level object, found {}",
            value_kind(&other)
        ))),
    }
}

fn collection_records(collection: Value) -> Result<Vec<Value>> {
    match collection {
        Value::Array(items) => Ok(items),
        Value::Object(map) if is_trial_record(&map) => Ok(vec![Value::Object(map)]),
        Value::Object(map) => transpose_fields(map),
        other => Err(ExtractError::FormatLoad(format!(
            "trial collection must be a list or a structure of fields, found {}",
            value_kind(&other)
        ))),
    }
}

/// Turn a structure of parallel per-trial arrays into one record per trial
fn transpose_fields(fields: Map<String, Value>) -> Result<Vec<Value>> {
    let mut columns = Vec::with_capacity(fields.len());
    let mut trial_count = None;

    for (name, value) in fields {
        let Value::Array(values) = value else {
            return Err(ExtractError::FormatLoad(format!(
                "field {name} is not a per-trial array"
            )));
        };
        match trial_count {
            None => trial_count = Some(values.len()),
            Some(n) if n != values.len() => {
                return Err(ExtractError::FormatLoad(format!(
                    "field {name} has {} entries, expected {n}",
                    values.len()
                )))
            }
            Some(_) => {}
        }
        columns.push((name, values));
    }

    let mut records: Vec<Map<String, Value>> =
        (0..trial_count.unwrap_or(0)).map(|_| Map::new()).collect();
    for (name, values) in columns {
        for (record, value) in records.iter_mut().zip(values) {
            record.insert(name.clone(), value);
        }
    }

    Ok(records.into_iter().map(Value::Object).collect())
}

fn parse_ndjson(raw: &str) -> std::result::Result<Vec<Value>, String> {
    let mut records = Vec::new();
    for (line_num, line) in raw.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(record @ Value::Object(_)) => records.push(record),
            Ok(other) => {
                return Err(format!(
                    "line {} is {}, expected a trial object",
                    line_num + 1,
                    value_kind(&other)
                ))
            }
            Err(e) => return Err(format!("line {}: {}", line_num + 1, e)),
        }
    }
    if records.is_empty() {
        return Err("no records".to_string());
    }
    Ok(records)
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn convert_record(record: Value) -> Result<Trial> {
    let raw: RawTrial =
        serde_json::from_value(record).map_err(|e| ExtractError::FormatLoad(e.to_string()))?;

    let trial_id = parse_trial_id(&raw.overview.trial_number)?;
    let overview = TrialOverview {
        date: as_int(single(raw.overview.date, trial_id, "Overview.date")?, trial_id, "Overview.date")?,
        trial_status: as_int(
            single(raw.overview.trial_status, trial_id, "Overview.trialStatus")?,
            trial_id,
            "Overview.trialStatus",
        )?,
        trial_number: raw.overview.trial_number,
        subject_name: raw.overview.subject_name,
        trial_name: raw.overview.trial_name,
    };

    let trial_data = raw
        .trial_data
        .ok_or_else(|| ExtractError::missing(trial_id, "TrialData"))?;
    let tdt = trial_data
        .tdt
        .ok_or_else(|| ExtractError::missing(trial_id, "TrialData.TDT"))?;

    let snippet_info = tdt
        .snippet_info
        .ok_or_else(|| ExtractError::missing(trial_id, "TrialData.TDT.snippetInfo"))?;
    let snippets = snippet_info
        .columns(3, trial_id, "TrialData.TDT.snippetInfo")?
        .into_iter()
        .map(|column| {
            let channel = as_int(column[0], trial_id, "snippetInfo channel")?;
            Ok(Snippet {
                channel: u32::try_from(channel).map_err(|_| {
                    ExtractError::ParseError(format!("trial {trial_id}: invalid channel {channel}"))
                })?,
                unit: as_int(column[1], trial_id, "snippetInfo unit")?,
                frame: as_int(column[2], trial_id, "snippetInfo frame")?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let waveforms = tdt
        .snippet_waveforms
        .map(|matrix| matrix.waveforms(snippets.len(), trial_id))
        .transpose()?;

    let transitions = trial_data
        .state_transitions
        .ok_or_else(|| ExtractError::missing(trial_id, "TrialData.stateTransitions"))?
        .columns(2, trial_id, "TrialData.stateTransitions")?
        .into_iter()
        .map(|column| {
            Ok(StateTransition {
                state_id: as_int(column[0], trial_id, "stateTransitions state")?,
                frame: as_int(column[1], trial_id, "stateTransitions frame")?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let marker = trial_data
        .marker
        .map(|marker| convert_marker(marker, trial_id))
        .transpose()?
        .flatten();

    let state_table = raw
        .parameters
        .and_then(|p| p.state_table)
        .map(|table| {
            table
                .into_vec()
                .into_iter()
                .map(|entry| StateTableEntry {
                    state_name: entry.state_name,
                })
                .collect()
        });

    Ok(Trial {
        trial_id,
        overview,
        snippets,
        waveforms,
        marker,
        transitions,
        state_table,
    })
}

fn convert_marker(marker: RawMarker, trial_id: i64) -> Result<Option<MarkerRecording>> {
    let rows = match marker.raw_positions {
        Some(matrix) => matrix.rows(5, trial_id, "TrialData.Marker.rawPositions")?,
        None => Vec::new(),
    };
    if rows.is_empty() {
        return Ok(None);
    }

    let samples = rows
        .into_iter()
        .map(|row| {
            Ok(MarkerSample {
                position: [row[1], row[2], row[3]],
                frame: as_int(row[4], trial_id, "rawPositions frame")?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let frequency = marker
        .frequency
        .ok_or_else(|| ExtractError::missing(trial_id, "TrialData.Marker.frequency"))?;
    let frequency = single(frequency, trial_id, "TrialData.Marker.frequency")?;

    let sync = marker
        .sync_parameters
        .map(|sync| {
            Ok::<_, ExtractError>(SyncParameters {
                phasespace_frame: single(
                    sync.phasespace_frame,
                    trial_id,
                    "SyncParameters.phasespaceFrame",
                )?,
                start_time_ms: single(sync.start_time, trial_id, "SyncParameters.startTime")?,
            })
        })
        .transpose()?;

    Ok(Some(MarkerRecording {
        samples,
        frequency,
        sync,
    }))
}

fn single<T>(value: OneOrMany<T>, trial_id: i64, field: &str) -> Result<T> {
    value.into_single().ok_or_else(|| {
        ExtractError::ParseError(format!("trial {trial_id}: {field} is not a scalar"))
    })
}

fn as_int(value: f64, trial_id: i64, field: &str) -> Result<i64> {
    if !value.is_finite() || value.fract() != 0.0 {
        return Err(ExtractError::ParseError(format!(
            "trial {trial_id}: {field} value {value} is not an integer"
        )));
    }
    Ok(value as i64)
}

fn transpose(rows: Vec<Vec<f64>>, trial_id: i64, field: &str) -> Result<Vec<Vec<f64>>> {
    let width = rows.first().map_or(0, Vec::len);
    if rows.iter().any(|row| row.len() != width) {
        return Err(ExtractError::ParseError(format!(
            "trial {trial_id}: {field} is not rectangular"
        )));
    }
    Ok((0..width)
        .map(|col| rows.iter().map(|row| row[col]).collect())
        .collect())
}

/// A value encoded either as a scalar or as a list
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn into_single(self) -> Option<T> {
        match self {
            OneOrMany::One(value) => Some(value),
            OneOrMany::Many(mut values) if values.len() == 1 => values.pop(),
            OneOrMany::Many(_) => None,
        }
    }

    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(value) => vec![value],
            OneOrMany::Many(values) => values,
        }
    }
}

/// A numeric matrix; single-row or single-column matrices may arrive squeezed
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Matrix {
    Rows(Vec<Vec<f64>>),
    Vector(Vec<f64>),
}

impl Matrix {
    /// Rows of an N×`width` matrix
    fn rows(self, width: usize, trial_id: i64, field: &str) -> Result<Vec<Vec<f64>>> {
        let rows = match self {
            Matrix::Rows(rows) => rows,
            Matrix::Vector(v) if v.is_empty() => Vec::new(),
            Matrix::Vector(v) if v.len() == width => vec![v],
            Matrix::Vector(v) => {
                return Err(ExtractError::ParseError(format!(
                    "trial {trial_id}: {field} has {} values, expected rows of {width}",
                    v.len()
                )))
            }
        };
        if let Some(row) = rows.iter().find(|row| row.len() < width) {
            return Err(ExtractError::ParseError(format!(
                "trial {trial_id}: {field} row has {} values, expected {width}",
                row.len()
            )));
        }
        Ok(rows)
    }

    /// Columns of a `height`×N matrix
    fn columns(self, height: usize, trial_id: i64, field: &str) -> Result<Vec<Vec<f64>>> {
        match self {
            Matrix::Rows(rows) if rows.is_empty() => Ok(Vec::new()),
            Matrix::Rows(rows) if rows.len() == height => transpose(rows, trial_id, field),
            Matrix::Vector(v) if v.is_empty() => Ok(Vec::new()),
            Matrix::Vector(v) if v.len() == height => Ok(vec![v]),
            Matrix::Rows(rows) => Err(ExtractError::ParseError(format!(
                "trial {trial_id}: {field} has {} rows, expected {height}",
                rows.len()
            ))),
            Matrix::Vector(v) => Err(ExtractError::ParseError(format!(
                "trial {trial_id}: {field} has {} values, expected {height}",
                v.len()
            ))),
        }
    }

    /// Per-snippet waveforms of a samples×N matrix
    fn waveforms(self, snippet_count: usize, trial_id: i64) -> Result<Vec<Vec<f64>>> {
        let field = "TrialData.TDT.snippetWaveforms";
        let waveforms = match self {
            Matrix::Rows(rows) => transpose(rows, trial_id, field)?,
            Matrix::Vector(v) if v.is_empty() => Vec::new(),
            Matrix::Vector(v) => vec![v],
        };
        if waveforms.len() != snippet_count {
            return Err(ExtractError::ParseError(format!(
                "trial {trial_id}: {field} has {} waveforms for {snippet_count} snippets",
                waveforms.len()
            )));
        }
        Ok(waveforms)
    }
}

// Container record structures

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawTrial {
    overview: RawOverview,
    trial_data: Option<RawTrialData>,
    #[serde(default)]
    parameters: Option<RawParameters>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOverview {
    trial_number: String,
    date: OneOrMany<f64>,
    subject_name: String,
    trial_name: String,
    trial_status: OneOrMany<f64>,
}

#[derive(Debug, Deserialize)]
struct RawTrialData {
    #[serde(rename = "TDT")]
    tdt: Option<RawTdt>,
    #[serde(rename = "Marker")]
    marker: Option<RawMarker>,
    #[serde(rename = "stateTransitions")]
    state_transitions: Option<Matrix>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTdt {
    snippet_info: Option<Matrix>,
    snippet_waveforms: Option<Matrix>,
}

#[derive(Debug, Deserialize)]
struct RawMarker {
    #[serde(rename = "rawPositions")]
    raw_positions: Option<Matrix>,
    frequency: Option<OneOrMany<f64>>,
    #[serde(rename = "SyncParameters")]
    sync_parameters: Option<RawSync>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSync {
    phasespace_frame: OneOrMany<f64>,
    start_time: OneOrMany<f64>,
}

#[derive(Debug, Deserialize)]
struct RawParameters {
    #[serde(rename = "StateTable")]
    state_table: Option<OneOrMany<RawStateEntry>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStateEntry {
    state_name: StateName,
}
