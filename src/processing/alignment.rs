use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::detectors::SpikeTimestampSet;
use crate::error::{Result, SpikeError};

/// One presentation: stimulus, 1-based trial index and onset in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrialWindow {
    pub stimulus_id: u32,
    pub trial: u32,
    pub onset: f64,
}

/// Stimulus onsets keyed by stimulus then trial, with the number of trials
/// every stimulus is expected to have.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrialSchedule {
    n_trials: u32,
    onsets: BTreeMap<u32, BTreeMap<u32, f64>>,
}

impl TrialSchedule {
    pub fn new(n_trials: u32) -> Self {
        Self {
            n_trials,
            onsets: BTreeMap::new(),
        }
    }

    /// Declares a stimulus without any trials yet.
    pub fn add_stimulus(&mut self, stimulus_id: u32) {
        self.onsets.entry(stimulus_id).or_default();
    }

    /// Sets the onset of a trial. `trial` is 1-based and at most `n_trials`.
    pub fn insert(&mut self, stimulus_id: u32, trial: u32, onset: f64) -> Result<()> {
        self.check_trial(stimulus_id, trial)?;
        self.onsets.entry(stimulus_id).or_default().insert(trial, onset);
        Ok(())
    }

    fn check_trial(&self, stimulus_id: u32, trial: u32) -> Result<()> {
        if trial == 0 || trial > self.n_trials {
            return Err(SpikeError::TrialOutOfRange {
                stimulus: stimulus_id,
                trial,
                n_trials: self.n_trials,
            });
        }
        Ok(())
    }

    pub fn n_trials(&self) -> u32 {
        self.n_trials
    }

    pub fn stimuli(&self) -> impl Iterator<Item = u32> + '_ {
        self.onsets.keys().copied()
    }

    pub fn onset(&self, stimulus_id: u32, trial: u32) -> Option<f64> {
        self.onsets.get(&stimulus_id)?.get(&trial).copied()
    }

    /// Every declared (stimulus, trial) pair in order. Fails on the first
    /// trial without an onset, or on an entry outside `1..=n_trials` (a
    /// deserialized schedule skips `insert`).
    pub fn windows(&self) -> Result<Vec<TrialWindow>> {
        let mut windows = Vec::new();
        for (&stimulus_id, trials) in &self.onsets {
            for &trial in trials.keys() {
                self.check_trial(stimulus_id, trial)?;
            }
            for trial in 1..=self.n_trials {
                let onset = trials.get(&trial).copied().ok_or(SpikeError::MissingTrial {
                    stimulus: stimulus_id,
                    trial,
                })?;
                windows.push(TrialWindow {
                    stimulus_id,
                    trial,
                    onset,
                });
            }
        }
        Ok(windows)
    }
}

/// Onset-relative spike times: stimulus → trial → times in seconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlignedSpikeTrain(BTreeMap<u32, BTreeMap<u32, Vec<f64>>>);

impl AlignedSpikeTrain {
    pub fn trial(&self, stimulus_id: u32, trial: u32) -> Option<&[f64]> {
        self.0.get(&stimulus_id)?.get(&trial).map(Vec::as_slice)
    }

    pub fn stimuli(&self) -> &BTreeMap<u32, BTreeMap<u32, Vec<f64>>> {
        &self.0
    }

    pub fn spike_count(&self) -> usize {
        self.0.values().flat_map(|t| t.values()).map(Vec::len).sum()
    }

    /// Flattened `(stimulus, trial, relative time)` rows.
    pub fn rows(&self) -> impl Iterator<Item = (u32, u32, f64)> + '_ {
        self.0.iter().flat_map(|(&stimulus, trials)| {
            trials
                .iter()
                .flat_map(move |(&trial, times)| times.iter().map(move |&t| (stimulus, trial, t)))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrialAligner {
    window_start: f64,
    window_stop: f64,
}

impl TrialAligner {
    /// `window_start` and `window_stop` are signed offsets from onset in
    /// seconds, e.g. -0.1 and 0.4.
    pub fn new(window_start: f64, window_stop: f64) -> Result<Self> {
        if !(window_start <= window_stop) {
            return Err(SpikeError::Config(format!(
                "window start {} is after window stop {}",
                window_start, window_stop
            )));
        }
        Ok(Self {
            window_start,
            window_stop,
        })
    }

    pub fn align(&self, spikes: &SpikeTimestampSet, schedule: &TrialSchedule) -> Result<AlignedSpikeTrain> {
        let times = spikes.as_slice();
        let mut aligned: BTreeMap<u32, BTreeMap<u32, Vec<f64>>> = BTreeMap::new();

        for window in schedule.windows()? {
            let onset = window.onset;
            // Relative time is monotone in t, so both bounds are partition points
            let lo = times.partition_point(|&t| t - onset < self.window_start);
            let hi = times.partition_point(|&t| t - onset <= self.window_stop);
            let relative = times[lo..hi.max(lo)].iter().map(|&t| t - onset).collect();

            aligned
                .entry(window.stimulus_id)
                .or_default()
                .insert(window.trial, relative);
        }

        Ok(AlignedSpikeTrain(aligned))
    }
}
