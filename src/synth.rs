// -----------------------------------------------------------------------------
// SYNTHETIC RECORDING SESSIONS
// -----------------------------------------------------------------------------
//
// Writes a complete session directory: header, amplifier traces with injected
// spikes over Gaussian noise, a digital stimulus line, the behaviour log, the
// array metadata and a config that points at all of it.

use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::acquisition::header::{
    ChannelDescriptor, ChannelRoster, FormatVersion, FrequencyParameters, Notes, SessionHeader,
    SignalGroup, SignalKind, SpikeTrigger,
};
use crate::acquisition::traces::MICROVOLTS_PER_BIT;
use crate::acquisition::writer::{write_amplifier_trace, write_digital_trace, write_header};
use crate::config::{
    save_config, DetectionConfig, LoggingConfig, PipelineConfig, SessionConfig,
    DEFAULT_DIGITAL_INPUT,
};
use crate::error::{Result, SpikeError};
use crate::pipeline::{write_array_metadata, ArrayMetadata, HEADER_FILE};
use crate::processing::detectors::SpikeDetectorConfig;
use crate::processing::filters::BandPassFilterConfig;
use crate::processing::schedule::{write_behaviour_log, BehaviourRecord};

pub const CONFIG_FILE: &str = "config.yaml";
pub const BEHAVIOUR_FILE: &str = "behaviour.csv";
pub const ARRAY_METADATA_FILE: &str = "array_metadata.json";

/// Length of a stimulus pulse on the digital line, seconds.
const PULSE_WIDTH: f64 = 0.1;
/// Injected spikes stay this many samples apart, and this far from the edges
/// of threshold segments.
const MIN_SPIKE_GAP: usize = 100;
const SPIKE_WIDTH: usize = 3;

#[derive(Debug, Clone)]
pub struct SyntheticSession {
    pub sample_rate: f64,
    pub channels: usize,
    pub stimuli: u32,
    pub repetitions: u32,
    /// Presentations with broken fixation added on top of the correct ones.
    pub aborted_presentations: usize,
    /// Seconds between presentation onsets.
    pub presentation_interval: f64,
    /// Onset to evoked spike, seconds.
    pub response_latency: f64,
    /// Background firing, spikes per second.
    pub background_rate: f64,
    pub spike_amplitude: f64,
    pub noise_sd: f64,
    pub chunks_for_threshold: usize,
    pub seed: u64,
}

impl Default for SyntheticSession {
    fn default() -> Self {
        Self {
            sample_rate: 20000.0,
            channels: 4,
            stimuli: 3,
            repetitions: 4,
            aborted_presentations: 2,
            presentation_interval: 0.5,
            response_latency: 0.05,
            background_rate: 4.0,
            spike_amplitude: -150.0,
            noise_sd: 10.0,
            chunks_for_threshold: 4,
            seed: 7,
        }
    }
}

/// What was written, for checking extraction against.
#[derive(Debug, Clone)]
pub struct SyntheticOutput {
    pub config_path: PathBuf,
    pub channel_names: Vec<String>,
    /// Sample index of every injected spike, per channel.
    pub spikes: Vec<Vec<usize>>,
    /// Onset sample of every presentation, in behaviour log order.
    pub onsets: Vec<usize>,
    pub behaviour: Vec<BehaviourRecord>,
    pub n_samples: usize,
}

pub fn amplifier_channel(prefix: &str, port_number: i16, native_order: i16) -> ChannelDescriptor {
    let name = format!("{}-{:03}", prefix, native_order);
    ChannelDescriptor {
        port_name: format!("Port {}", prefix),
        port_prefix: prefix.to_string(),
        port_number,
        native_name: name.clone(),
        custom_name: name,
        native_order,
        custom_order: native_order,
        kind: SignalKind::Amplifier,
        chip_channel: native_order,
        board_stream: 0,
        trigger: SpikeTrigger::default(),
        impedance_magnitude: 0.0,
        impedance_phase: 0.0,
    }
}

pub fn digital_in_channel(port_number: i16, native_order: i16) -> ChannelDescriptor {
    let name = format!("DIGITAL-IN-{:02}", native_order + 1);
    ChannelDescriptor {
        port_name: "Board Digital Inputs".to_string(),
        port_prefix: "DIN".to_string(),
        port_number,
        native_name: name.clone(),
        custom_name: name,
        native_order,
        custom_order: native_order,
        kind: SignalKind::DigitalIn,
        chip_channel: 0,
        board_stream: 0,
        trigger: SpikeTrigger::default(),
        impedance_magnitude: 0.0,
        impedance_phase: 0.0,
    }
}

/// A v3.0 header holding the given channels, one signal group per port.
pub fn session_header(
    sample_rate: f32,
    amplifiers: Vec<ChannelDescriptor>,
    digital_inputs: Vec<ChannelDescriptor>,
) -> SessionHeader {
    let mut channels = ChannelRoster::default();
    amplifiers
        .into_iter()
        .chain(digital_inputs)
        .for_each(|c| channels.push(c));

    let ports = channels.iter().map(|c| c.port_number).max().unwrap_or(0);
    let signal_groups = (1..=ports)
        .map(|port| {
            let members: Vec<&ChannelDescriptor> =
                channels.iter().filter(|c| c.port_number == port).collect();
            match members.first() {
                Some(first) => SignalGroup {
                    name: first.port_name.clone(),
                    prefix: first.port_prefix.clone(),
                    enabled: 1,
                    num_channels: members.len() as i16,
                    num_amp_channels: members
                        .iter()
                        .filter(|c| c.kind == SignalKind::Amplifier)
                        .count() as i16,
                },
                None => SignalGroup {
                    name: format!("Port {}", port),
                    prefix: String::new(),
                    enabled: 0,
                    num_channels: 0,
                    num_amp_channels: 0,
                },
            }
        })
        .collect();

    SessionHeader {
        version: FormatVersion { major: 3, minor: 0 },
        sample_rate,
        frequency: FrequencyParameters {
            dsp_enabled: 1,
            actual_dsp_cutoff_frequency: 1.0,
            actual_lower_bandwidth: 0.1,
            actual_upper_bandwidth: 7500.0,
            desired_dsp_cutoff_frequency: 1.0,
            desired_lower_bandwidth: 0.1,
            desired_upper_bandwidth: 7500.0,
            notch_filter_frequency: 0,
            desired_impedance_test_frequency: 1000.0,
            actual_impedance_test_frequency: 1000.0,
        },
        notes: Notes::default(),
        num_temp_sensor_channels: 0,
        eval_board_mode: 0,
        reference_channel: Some(String::new()),
        samples_per_data_block: 128,
        signal_groups,
        channels,
    }
}

/// Standard normal sample by Box-Muller.
fn gaussian(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

impl SyntheticSession {
    fn n_presentations(&self) -> usize {
        (self.stimuli * self.repetitions) as usize + self.aborted_presentations
    }

    fn n_samples(&self) -> usize {
        let duration = (self.n_presentations() + 2) as f64 * self.presentation_interval;
        (duration * self.sample_rate).ceil() as usize
    }

    /// Presentation order: every stimulus `repetitions` times with correct
    /// fixation, with aborted presentations mixed in.
    fn behaviour(&self, rng: &mut StdRng) -> Vec<BehaviourRecord> {
        let mut records: Vec<BehaviourRecord> = (1..=self.stimuli)
            .flat_map(|stimulus_id| {
                (0..self.repetitions).map(move |_| BehaviourRecord {
                    stimulus_id,
                    fixation_correct: true,
                })
            })
            .collect();
        for _ in 0..self.aborted_presentations {
            records.push(BehaviourRecord {
                stimulus_id: rng.gen_range(1..=self.stimuli.max(1)),
                fixation_correct: false,
            });
        }
        records.shuffle(rng);
        records
    }

    fn spike_train(&self, rng: &mut StdRng, channel: usize, correct_onsets: &[usize], n: usize) -> Vec<usize> {
        let latency = self.response_latency + channel as f64 * 0.005;
        let mut candidates: Vec<usize> = correct_onsets
            .iter()
            .map(|&onset| onset + (latency * self.sample_rate) as usize)
            .collect();

        let background = (self.background_rate * n as f64 / self.sample_rate).round() as usize;
        candidates.extend((0..background).map(|_| rng.gen_range(0..n)));
        candidates.sort_unstable();

        let segment = n.div_ceil(self.chunks_for_threshold.max(1));
        let near_edge = |s: usize| {
            (0..=self.chunks_for_threshold).any(|k| (k * segment).abs_diff(s) < MIN_SPIKE_GAP)
        };

        let mut spikes: Vec<usize> = Vec::new();
        for s in candidates {
            if s + SPIKE_WIDTH + MIN_SPIKE_GAP > n || near_edge(s) {
                continue;
            }
            if spikes.last().map_or(true, |&last| s - last >= MIN_SPIKE_GAP) {
                spikes.push(s);
            }
        }
        spikes
    }

    fn amplifier_codes(&self, rng: &mut StdRng, spikes: &[usize], n: usize) -> Vec<i16> {
        let mut microvolts: Vec<f64> = (0..n).map(|_| self.noise_sd * gaussian(rng)).collect();
        for &s in spikes {
            microvolts[s..s + SPIKE_WIDTH]
                .iter_mut()
                .for_each(|v| *v += self.spike_amplitude);
        }
        microvolts
            .into_iter()
            .map(|v| (v / MICROVOLTS_PER_BIT).round().clamp(i16::MIN as f64, i16::MAX as f64) as i16)
            .collect()
    }

    /// Writes the session into `dir` and returns what was injected.
    pub fn write<P: AsRef<Path>>(&self, dir: P) -> Result<SyntheticOutput> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|e| SpikeError::io(dir, e))?;
        let mut rng = StdRng::seed_from_u64(self.seed);
        let n = self.n_samples();

        let amplifiers: Vec<ChannelDescriptor> = (0..self.channels)
            .map(|i| amplifier_channel("A", 1, i as i16))
            .collect();
        let channel_names: Vec<String> = amplifiers.iter().map(|c| c.native_name.clone()).collect();
        let header = session_header(
            self.sample_rate as f32,
            amplifiers,
            vec![digital_in_channel(2, 0), digital_in_channel(2, 1)],
        );
        write_header(dir.join(HEADER_FILE), &header)?;

        let behaviour = self.behaviour(&mut rng);
        let interval = (self.presentation_interval * self.sample_rate) as usize;
        let pulse = (PULSE_WIDTH * self.sample_rate) as usize;
        let onsets: Vec<usize> = (0..behaviour.len()).map(|i| (i + 1) * interval).collect();

        let mut line = vec![0u16; n];
        for &onset in &onsets {
            line[onset..(onset + pulse).min(n)].iter_mut().for_each(|s| *s = 1);
        }
        write_digital_trace(dir.join(DEFAULT_DIGITAL_INPUT), &line)?;
        write_behaviour_log(dir.join(BEHAVIOUR_FILE), &behaviour)?;

        let correct_onsets: Vec<usize> = onsets
            .iter()
            .zip(&behaviour)
            .filter(|(_, record)| record.fixation_correct)
            .map(|(&onset, _)| onset)
            .collect();

        let mut spikes = Vec::with_capacity(self.channels);
        for (channel, name) in channel_names.iter().enumerate() {
            let train = self.spike_train(&mut rng, channel, &correct_onsets, n);
            let codes = self.amplifier_codes(&mut rng, &train, n);
            write_amplifier_trace(dir.join(format!("amp-{}.dat", name)), &codes)?;
            spikes.push(train);
        }

        write_array_metadata(
            dir.join(ARRAY_METADATA_FILE),
            &ArrayMetadata {
                neuroid_id: channel_names.clone(),
            },
        )?;

        let config = PipelineConfig {
            session: SessionConfig {
                directory: PathBuf::from("."),
                array_metadata: PathBuf::from(ARRAY_METADATA_FILE),
                behaviour_log: PathBuf::from(BEHAVIOUR_FILE),
                output_dir: PathBuf::from("spikes"),
                digital_input: DEFAULT_DIGITAL_INPUT.to_string(),
            },
            thresholding: SpikeDetectorConfig {
                threshold_sd: 4.0,
                chunks_for_threshold: self.chunks_for_threshold,
            },
            filtering: BandPassFilterConfig {
                f_low: 300.0,
                f_high: 6000.0,
                order: 2,
            },
            detection: DetectionConfig {
                window_start: -0.1,
                window_stop: 0.3,
            },
            logging: LoggingConfig::default(),
        };
        let config_path = dir.join(CONFIG_FILE);
        save_config(&config, &config_path)?;

        Ok(SyntheticOutput {
            config_path,
            channel_names,
            spikes,
            onsets,
            behaviour,
            n_samples: n,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::{read_digital_trace, read_header, rising_edge_indices};

    #[test]
    fn same_seed_same_session() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let session = SyntheticSession::default();

        let first = session.write(a.path()).unwrap();
        let second = session.write(b.path()).unwrap();
        assert_eq!(first.spikes, second.spikes);
        assert_eq!(first.behaviour, second.behaviour);
        assert_eq!(
            std::fs::read(a.path().join("amp-A-002.dat")).unwrap(),
            std::fs::read(b.path().join("amp-A-002.dat")).unwrap()
        );
    }

    #[test]
    fn written_files_are_consistent() {
        let dir = tempfile::tempdir().unwrap();
        let session = SyntheticSession::default();
        let out = session.write(dir.path()).unwrap();

        let header = read_header(dir.path().join(HEADER_FILE)).unwrap();
        assert_eq!(header.amplifier_channel_count(), session.channels);
        assert_eq!(header.digital_input_count(), 2);
        assert_eq!(header.sample_rate_hz(), session.sample_rate);

        let line = read_digital_trace(dir.path().join(DEFAULT_DIGITAL_INPUT)).unwrap();
        assert_eq!(line.len(), out.n_samples);
        assert_eq!(rising_edge_indices(&line), out.onsets);
        assert_eq!(out.behaviour.len(), 14);
        assert_eq!(out.behaviour.iter().filter(|r| r.fixation_correct).count(), 12);

        for train in &out.spikes {
            assert!(train.len() >= 12);
            assert!(train.windows(2).all(|w| w[1] - w[0] >= MIN_SPIKE_GAP));
        }
    }
}
