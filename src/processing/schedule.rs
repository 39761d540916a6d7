use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use super::alignment::TrialSchedule;
use crate::error::{Result, SpikeError};

/// One row of the behaviour log: a presented stimulus and whether the
/// subject held fixation through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehaviourRecord {
    pub stimulus_id: u32,
    #[serde(deserialize_with = "flag")]
    pub fixation_correct: bool,
}

// Accepts 1/0 as well as true/false
fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    let raw = String::deserialize(deserializer)?;
    match raw.trim() {
        "1" | "true" | "True" => Ok(true),
        "0" | "false" | "False" => Ok(false),
        other => Err(serde::de::Error::custom(format!(
            "invalid fixation flag {:?}",
            other
        ))),
    }
}

pub fn read_behaviour_log<P: AsRef<Path>>(path: P) -> Result<Vec<BehaviourRecord>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)?;
    let records = reader
        .deserialize()
        .collect::<std::result::Result<Vec<BehaviourRecord>, _>>()?;
    Ok(records)
}

pub fn write_behaviour_log<P: AsRef<Path>>(path: P, records: &[BehaviourRecord]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path.as_ref())?;
    for record in records {
        writer.serialize(record)?;
    }
    writer
        .flush()
        .map_err(|e| SpikeError::io(path.as_ref(), e))
}

/// Builds the trial schedule for a session.
///
/// Row `i` of the behaviour log is the presentation whose onset is
/// `onsets[i]`. Only correctly fixated presentations become trials. The
/// trial count is the most common number of correct presentations across
/// stimuli (the smaller count on ties); trial `k` of a stimulus is its `k`-th
/// correct presentation.
pub fn build_schedule(records: &[BehaviourRecord], onsets: &[f64]) -> Result<TrialSchedule> {
    if records.len() > onsets.len() {
        return Err(SpikeError::TrialCountMismatch {
            trials: records.len(),
            onsets: onsets.len(),
        });
    }

    let mut correct: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
    for (record, &onset) in records.iter().zip(onsets) {
        let presentations = correct.entry(record.stimulus_id).or_default();
        if record.fixation_correct {
            presentations.push(onset);
        }
    }

    let n_trials = most_frequent_count(correct.values().map(Vec::len));

    let mut schedule = TrialSchedule::new(n_trials as u32);
    for (&stimulus_id, presentations) in &correct {
        if presentations.len() < n_trials {
            return Err(SpikeError::MissingTrial {
                stimulus: stimulus_id,
                trial: presentations.len() as u32 + 1,
            });
        }
        schedule.add_stimulus(stimulus_id);
        for (k, &onset) in presentations.iter().take(n_trials).enumerate() {
            schedule.insert(stimulus_id, k as u32 + 1, onset)?;
        }
    }

    Ok(schedule)
}

fn most_frequent_count(counts: impl Iterator<Item = usize>) -> usize {
    let mut histogram: BTreeMap<usize, usize> = BTreeMap::new();
    for count in counts {
        *histogram.entry(count).or_default() += 1;
    }
    // Ascending keys: the first maximum wins
    histogram
        .into_iter()
        .fold((0, 0), |(best, best_freq), (count, freq)| {
            if freq > best_freq {
                (count, freq)
            } else {
                (best, best_freq)
            }
        })
        .0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(stimulus_id: u32, fixation_correct: bool) -> BehaviourRecord {
        BehaviourRecord {
            stimulus_id,
            fixation_correct,
        }
    }

    #[test]
    fn trials_follow_correct_presentations() {
        let records = [
            record(1, true),
            record(2, true),
            record(1, false),
            record(2, true),
            record(1, true),
            record(3, true),
            record(3, true),
            record(1, true),
        ];
        let onsets: Vec<f64> = (0..records.len()).map(|i| i as f64).collect();
        let schedule = build_schedule(&records, &onsets).unwrap();

        assert_eq!(schedule.n_trials(), 2);
        assert_eq!(schedule.stimuli().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(schedule.onset(1, 1), Some(0.0));
        assert_eq!(schedule.onset(1, 2), Some(4.0));
        // Extra presentations past the trial count are dropped
        assert_eq!(schedule.onset(1, 3), None);
        assert_eq!(schedule.onset(2, 2), Some(3.0));
        assert_eq!(schedule.onset(3, 1), Some(5.0));
        assert_eq!(schedule.windows().unwrap().len(), 6);
    }

    #[test]
    fn too_few_correct_presentations_is_missing_trial() {
        let records = [
            record(1, true),
            record(1, true),
            record(2, true),
            record(2, true),
            record(3, true),
            record(3, false),
        ];
        let onsets = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        match build_schedule(&records, &onsets) {
            Err(SpikeError::MissingTrial { stimulus, trial }) => assert_eq!((stimulus, trial), (3, 2)),
            other => panic!("expected missing trial, got {:?}", other),
        }
    }

    #[test]
    fn ties_resolve_to_smaller_count() {
        assert_eq!(most_frequent_count([3, 2, 3, 2, 5].into_iter()), 2);
        assert_eq!(most_frequent_count(std::iter::empty()), 0);
    }

    #[test]
    fn more_rows_than_onsets_is_rejected() {
        let records = [record(1, true), record(1, true)];
        assert!(matches!(
            build_schedule(&records, &[0.5]),
            Err(SpikeError::TrialCountMismatch { trials: 2, onsets: 1 })
        ));
    }

    #[test]
    fn behaviour_log_reads_numeric_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("behaviour.csv");
        std::fs::write(&path, "stimulus_id,fixation_correct\n4,1\n9,0\n4,true\n").unwrap();

        let records = read_behaviour_log(&path).unwrap();
        assert_eq!(records, vec![record(4, true), record(9, false), record(4, true)]);

        let copy = dir.path().join("copy.csv");
        write_behaviour_log(&copy, &records).unwrap();
        assert_eq!(read_behaviour_log(&copy).unwrap(), records);
    }
}
