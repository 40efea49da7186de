use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use smile_sync::neural::{array_channels, trial_waveforms, ArrayRegion};
use smile_sync::{
    compose_session_json, ExtractConfig, JsonTrialLoader, SessionComposer, TaskLabel,
    TrialCollectionLoader, TrialResult,
};

/// Spike trains as (channel, unit, frames)
type Units = Vec<(u32, u32, Vec<i64>)>;

fn trial_record(number: u32, trial_name: &str, status: i64, units: &Units) -> Value {
    let mut channels = Vec::new();
    let mut sort_codes = Vec::new();
    let mut frames = Vec::new();
    for (channel, unit, unit_frames) in units {
        for frame in unit_frames {
            channels.push(*channel);
            sort_codes.push(*unit);
            frames.push(*frame);
        }
    }
    let count = frames.len();
    let date = 20220701101500i64 + i64::from(number);

    // 480 Hz marker, x equal to the marker frame number
    let positions: Vec<Value> = (1..=145)
        .map(|frame| {
            let x = frame as f64;
            json!([1, x, 2.0, -1.0, frame])
        })
        .collect();

    json!({
        "Overview": {
            "trialNumber": format!("Trial{number:04}"),
            "date": date,
            "subjectName": "Prez",
            "trialName": trial_name,
            "trialStatus": status
        },
        "TrialData": {
            "TDT": {
                "snippetInfo": [channels, sort_codes, frames],
                "snippetWaveforms": [vec![0.0; count], vec![1.0; count]]
            },
            "Marker": {
                "rawPositions": positions,
                "frequency": 480.0,
                "SyncParameters": {"phasespaceFrame": 1, "startTime": 0.0}
            },
            "stateTransitions": [[1, 2, -1], [1, 101, 301]]
        },
        "Parameters": {
            "StateTable": [{"stateName": "Reach to Center"}, {"stateName": ["Hold"]}]
        }
    })
}

/// One 50 Hz unit, its duplicate, and a unit that fires once
fn session_units(shift: i64) -> Units {
    let train: Vec<i64> = (0..15).map(|k| k * 20 + 2 + shift).collect();
    vec![
        (5, 1, train.clone()),
        (5, 2, train),
        (7, 1, vec![150]),
        (9, 0, vec![40, 41, 42]),
    ]
}

fn session_json(trials: Vec<Value>) -> String {
    json!({"__header__": "exported session", "smile_data": trials}).to_string()
}

fn config() -> ExtractConfig {
    ExtractConfig::from_json(
        r#"{"bin_width": "10ms", "block": "B2", "spikes": {"min_firing_rate_hz": 5.0}}"#,
    )
    .unwrap()
}

#[test]
fn test_two_trial_session() {
    let raw = session_json(vec![
        trial_record(2, "CST_20220701", 0, &session_units(3)),
        trial_record(1, "RandomTargetTask_20220630", 1, &session_units(0)),
    ]);
    let frame = compose_session_json(&raw, &config()).unwrap();

    assert_eq!(frame.trial_ids(), vec![1, 2]);
    assert_eq!(frame.motor_cortex_columns, vec!["ch5u1".to_string()]);
    assert_eq!(frame.trial_rows(1).count(), 31);
    assert_eq!(frame.trial_rows(2).count(), 31);

    let first = &frame.rows[0];
    assert_eq!(first.monkey, "Prez");
    assert_eq!(first.block, "B2");
    assert_eq!(first.task, TaskLabel::Rtt);
    assert_eq!(first.result, TrialResult::Success);
    assert_eq!(first.session_date.to_string(), "2022-07-01");
    assert_eq!(first.state, "Reach to Center");

    let second = frame.trial_rows(2).next().unwrap();
    assert_eq!(second.task, TaskLabel::Cst);
    assert_eq!(second.result, TrialResult::Failure);
    assert_eq!(second.trial_datetime.to_string(), "2022-07-01 10:15:02");

    let hold = frame.trial_rows(1).find(|r| r.bin == 10).unwrap();
    assert_eq!(hold.state, "Hold");
    assert_eq!(hold.time_ns, 100_000_000);
    assert!((hold.hand_position[0] - 49.0).abs() < 1e-3);
    assert!((hold.hand_position[1] - 2.0).abs() < 1e-6);

    let end = frame.trial_rows(2).last().unwrap();
    assert_eq!(end.bin, 30);
    assert_eq!(end.state, "end");

    for trial_id in [1, 2] {
        let total: u32 = frame.trial_rows(trial_id).map(|r| r.motor_cortex[0]).sum();
        assert_eq!(total, 15);
    }
}

#[test]
fn test_column_layout() {
    let raw = session_json(vec![trial_record(1, "R1T2", 2, &session_units(0))]);
    let frame = compose_session_json(&raw, &config()).unwrap();

    let mut order: Vec<String> = frame.columns().into_iter().map(|(group, _)| group).collect();
    order.dedup();
    assert_eq!(
        order,
        vec![
            "monkey",
            "session date",
            "block",
            "trial datetime",
            "task",
            "result",
            "state",
            "hand position",
            "motor cortex"
        ]
    );
    assert_eq!(frame.rows[0].task, TaskLabel::Dco);
    assert_eq!(frame.rows[0].result, TrialResult::Abort);
}

#[test]
fn test_artifact_trial_is_dropped() {
    let mut burst = session_units(1);
    let spikes: Vec<i64> = (0..20).map(|k| 200 + k / 4).collect();
    burst[0].2.extend(spikes.iter().copied());
    burst[1].2.extend(spikes);

    let raw = session_json(vec![
        trial_record(1, "CenterOut_1", 1, &session_units(0)),
        trial_record(2, "CenterOut_1", 1, &burst),
    ]);
    let trials = JsonTrialLoader.load_str(&raw).unwrap();
    let composer = SessionComposer::new(config());
    let frame = composer.compose(&trials).unwrap();

    assert_eq!(frame.trial_ids(), vec![1]);
    assert_eq!(frame.rows[0].task, TaskLabel::Co);
}

#[test]
fn test_no_surviving_units_yields_empty_frame() {
    let units: Units = vec![(3, 0, vec![10, 20, 30])];
    let raw = session_json(vec![trial_record(1, "RandomTargetTask_1", 1, &units)]);
    let frame = compose_session_json(&raw, &config()).unwrap();

    assert!(frame.is_empty());
    assert!(frame.motor_cortex_columns.is_empty());
}

#[test]
fn test_waveforms_and_arrays() {
    let raw = session_json(vec![trial_record(1, "RandomTargetTask_1", 1, &session_units(0))]);
    let trials = JsonTrialLoader.load_str(&raw).unwrap();

    let waveforms = trial_waveforms(&trials[0]).unwrap();
    assert_eq!(waveforms.len(), trials[0].snippets.len());
    assert_eq!(waveforms[0].samples, vec![0.0, 1.0]);
    // Unsorted snippets are kept
    assert!(waveforms.iter().any(|w| w.unit == 0));

    let arrays = array_channels(&trials[0].overview.subject_name).unwrap();
    assert_eq!(arrays.region_of(5), Some(ArrayRegion::PMd));
    assert_eq!(arrays.region_of(40), Some(ArrayRegion::M1));
}

#[test]
fn test_invalid_status_fails_run() {
    let raw = session_json(vec![trial_record(1, "RandomTargetTask_1", 4, &session_units(0))]);
    assert!(compose_session_json(&raw, &config()).is_err());
}
