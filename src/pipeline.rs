use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::acquisition::{read_amplifier_trace, read_header, read_stimulus_onsets, SessionHeader};
use crate::config::{DetectionConfig, PipelineConfig};
use crate::error::{Result, SpikeError};
use crate::processing::{
    build_schedule, read_behaviour_log, AlignedSpikeTrain, BandPassFilterConfig, SpikeDetector,
    SpikeDetectorConfig, TrialAligner, TrialSchedule,
};
use crate::utils::log::{log_csv, log_with_header};

pub const HEADER_FILE: &str = "info.rhd";
pub const SESSION_SPIKES_FILE: &str = "spikes.json";
pub const SESSION_CSV_FILE: &str = "spikes.csv";
pub const PARAMETERS_FILE: &str = "parameters.json";

const LOG_FILE: &str = "extraction.log";
const SUMMARY_FILE: &str = "extraction_summary.csv";

/// Channel identifiers of the recording array, in acquisition order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayMetadata {
    pub neuroid_id: Vec<String>,
}

pub fn read_array_metadata<P: AsRef<Path>>(path: P) -> Result<ArrayMetadata> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|e| SpikeError::io(path, e))?;
    Ok(serde_json::from_str(&text)?)
}

pub fn write_array_metadata<P: AsRef<Path>>(path: P, metadata: &ArrayMetadata) -> Result<()> {
    write_json(path.as_ref(), metadata)
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    fs::write(path, text).map_err(|e| SpikeError::io(path, e))
}

/// Where a session's inputs live and where its outputs go.
#[derive(Debug, Clone)]
pub struct SessionLayout {
    pub directory: PathBuf,
    pub digital_input: String,
    pub output_dir: PathBuf,
}

impl SessionLayout {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            directory: config.session.directory.clone(),
            digital_input: config.session.digital_input.clone(),
            output_dir: config.session.output_dir.clone(),
        }
    }

    pub fn header_path(&self) -> PathBuf {
        self.directory.join(HEADER_FILE)
    }

    pub fn amplifier_path(&self, channel: &str) -> PathBuf {
        self.directory.join(format!("amp-{}.dat", channel))
    }

    pub fn digital_input_path(&self) -> PathBuf {
        self.directory.join(&self.digital_input)
    }

    pub fn channel_output_path(&self, channel: &str) -> PathBuf {
        self.output_dir.join(format!("spk_{}.json", channel))
    }
}

/// Extraction result for one channel.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelSpikes {
    pub index: usize,
    pub channel: String,
    pub spike_count: usize,
    pub thresholds: Vec<f64>,
    pub aligned: AlignedSpikeTrain,
}

#[derive(Debug)]
pub struct ChannelOutcome {
    pub index: usize,
    pub channel: String,
    pub result: Result<ChannelSpikes>,
}

#[derive(Debug)]
pub struct SessionReport {
    pub outcomes: Vec<ChannelOutcome>,
}

impl SessionReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &ChannelSpikes> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &SpikeError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.channel.as_str(), e)))
    }
}

#[derive(Serialize)]
struct SessionParameters<'a> {
    sample_rate: f64,
    n_channels: usize,
    n_trials: u32,
    channels: &'a [String],
    thresholding: &'a SpikeDetectorConfig,
    filtering: &'a BandPassFilterConfig,
    detection: &'a DetectionConfig,
    trial_times: &'a TrialSchedule,
}

#[derive(Serialize)]
struct SpikeRow<'a> {
    channel: &'a str,
    stimulus_id: u32,
    trial: u32,
    time: f64,
}

/// One decoded recording session, ready to extract channels from.
pub struct Session {
    config: PipelineConfig,
    layout: SessionLayout,
    header: SessionHeader,
    channels: Vec<String>,
    schedule: TrialSchedule,
    detector: SpikeDetector,
    aligner: TrialAligner,
}

impl Session {
    pub fn open(config: &PipelineConfig) -> Result<Self> {
        config.validate()?;
        let layout = SessionLayout::from_config(config);

        let header = read_header(layout.header_path())?;
        let metadata = read_array_metadata(&config.session.array_metadata)?;
        header.check_channel_count(metadata.neuroid_id.len())?;

        let sample_rate = header.sample_rate_hz();
        let onsets = read_stimulus_onsets(layout.digital_input_path(), sample_rate)?;
        let records = read_behaviour_log(&config.session.behaviour_log)?;
        let schedule = build_schedule(&records, &onsets)?;

        let detector = SpikeDetector::new(
            config.thresholding.clone(),
            config.filtering.clone(),
            sample_rate,
        )?;
        let aligner = TrialAligner::new(config.detection.window_start, config.detection.window_stop)?;

        Ok(Self {
            config: config.clone(),
            layout,
            header,
            channels: metadata.neuroid_id,
            schedule,
            detector,
            aligner,
        })
    }

    pub fn header(&self) -> &SessionHeader {
        &self.header
    }

    pub fn schedule(&self) -> &TrialSchedule {
        &self.schedule
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    pub fn layout(&self) -> &SessionLayout {
        &self.layout
    }

    pub fn extract_channel(&self, index: usize) -> Result<ChannelSpikes> {
        let channel = self.channels.get(index).ok_or_else(|| {
            SpikeError::Config(format!(
                "channel {} out of range, session has {} channels",
                index,
                self.channels.len()
            ))
        })?;

        let trace = read_amplifier_trace(self.layout.amplifier_path(channel))?;
        let detection = self.detector.detect(&trace)?;
        let aligned = self.aligner.align(&detection.spikes, &self.schedule)?;

        Ok(ChannelSpikes {
            index,
            channel: channel.clone(),
            spike_count: detection.spikes.len(),
            thresholds: detection.thresholds(),
            aligned,
        })
    }

    /// All channels in parallel. A failing channel does not stop the others.
    pub fn extract_all(&self) -> Vec<ChannelOutcome> {
        (0..self.channels.len())
            .into_par_iter()
            .map(|index| self.outcome(index))
            .collect()
    }

    fn outcome(&self, index: usize) -> ChannelOutcome {
        ChannelOutcome {
            index,
            channel: self.channels[index].clone(),
            result: self.extract_channel(index),
        }
    }

    /// Writes `spk_<channel>.json` as `{channel: {stimulus: {trial: [..]}}}`.
    pub fn write_channel(&self, spikes: &ChannelSpikes) -> Result<PathBuf> {
        let path = self.layout.channel_output_path(&spikes.channel);
        let mut document = BTreeMap::new();
        document.insert(spikes.channel.as_str(), &spikes.aligned);
        write_json(&path, &document)?;
        Ok(path)
    }

    /// Session-wide JSON and CSV for every channel that succeeded.
    pub fn write_session(&self, report: &SessionReport) -> Result<()> {
        let merged: BTreeMap<&str, &AlignedSpikeTrain> = report
            .succeeded()
            .map(|s| (s.channel.as_str(), &s.aligned))
            .collect();
        self.write_merged(&merged)
    }

    fn write_merged(&self, merged: &BTreeMap<&str, &AlignedSpikeTrain>) -> Result<()> {
        let out = &self.layout.output_dir;
        write_json(&out.join(SESSION_SPIKES_FILE), merged)?;

        let csv_path = out.join(SESSION_CSV_FILE);
        let mut writer = csv::Writer::from_path(&csv_path)?;
        // Metadata order, so the CSV reads the same however it was produced
        for channel in &self.channels {
            let Some(aligned) = merged.get(channel.as_str()) else {
                continue;
            };
            for (stimulus_id, trial, time) in aligned.rows() {
                writer.serialize(SpikeRow {
                    channel: channel.as_str(),
                    stimulus_id,
                    trial,
                    time,
                })?;
            }
        }
        writer.flush().map_err(|e| SpikeError::io(&csv_path, e))
    }

    /// Sample rate, configuration and trial onsets used for the run.
    pub fn write_parameters(&self) -> Result<()> {
        let parameters = SessionParameters {
            sample_rate: self.header.sample_rate_hz(),
            n_channels: self.channels.len(),
            n_trials: self.schedule.n_trials(),
            channels: &self.channels,
            thresholding: &self.config.thresholding,
            filtering: &self.config.filtering,
            detection: &self.config.detection,
            trial_times: &self.schedule,
        };
        write_json(&self.layout.output_dir.join(PARAMETERS_FILE), &parameters)
    }

    /// Reads back every `spk_<channel>.json` in the output directory, as
    /// written by single-channel runs, and writes the session files from
    /// them. Channels without a file are returned as missing.
    pub fn collect(&self) -> Result<Vec<String>> {
        let mut trains: Vec<(&str, AlignedSpikeTrain)> = Vec::new();
        let mut missing = Vec::new();

        for channel in &self.channels {
            let path = self.layout.channel_output_path(channel);
            if !path.exists() {
                missing.push(channel.clone());
                continue;
            }
            let text = fs::read_to_string(&path).map_err(|e| SpikeError::io(&path, e))?;
            let mut document: BTreeMap<String, AlignedSpikeTrain> = serde_json::from_str(&text)?;
            let aligned = document.remove(channel).ok_or_else(|| {
                SpikeError::Config(format!(
                    "{} does not hold channel {}",
                    path.display(),
                    channel
                ))
            })?;
            trains.push((channel.as_str(), aligned));
        }

        let merged: BTreeMap<&str, &AlignedSpikeTrain> =
            trains.iter().map(|(channel, aligned)| (*channel, aligned)).collect();
        self.write_merged(&merged)?;
        self.write_parameters()?;
        Ok(missing)
    }

    fn log_report(&self, report: &SessionReport) -> Result<()> {
        let logging = &self.config.logging;
        if !logging.enabled {
            return Ok(());
        }
        let dir = logging.directory.as_path();
        let to_err = |e| SpikeError::io(dir, e);

        for outcome in &report.outcomes {
            let index = outcome.index.to_string();
            let (status, count, thresholds) = match &outcome.result {
                Ok(s) => (
                    "ok".to_string(),
                    s.spike_count.to_string(),
                    s.thresholds
                        .iter()
                        .map(|t| format!("{:.3}", t))
                        .collect::<Vec<_>>()
                        .join(";"),
                ),
                Err(e) => (format!("error: {}", e), String::new(), String::new()),
            };
            log_csv(
                dir,
                SUMMARY_FILE,
                &["channel", "index", "spike_count", "thresholds", "status"],
                &[
                    outcome.channel.as_str(),
                    index.as_str(),
                    count.as_str(),
                    thresholds.as_str(),
                    status.as_str(),
                ],
            )
            .map_err(to_err)?;
        }

        let unknown: Vec<&str> = self
            .channels
            .iter()
            .filter(|id| !self.header.amplifier_channels().iter().any(|c| &c.native_name == *id))
            .map(String::as_str)
            .collect();

        let mut message = format!(
            "directory: {}\nsample rate: {} Hz\nchannels: {}\nstimuli: {}\ntrials per stimulus: {}\nfilter: {}\nsucceeded: {}\nfailed: {}",
            self.layout.directory.display(),
            self.header.sample_rate_hz(),
            self.channels.len(),
            self.schedule.stimuli().count(),
            self.schedule.n_trials(),
            self.detector.filter_id(),
            report.succeeded().count(),
            report.failures().count(),
        );
        if !unknown.is_empty() {
            message.push_str(&format!(
                "\nchannels not named in header: {}",
                unknown.join(", ")
            ));
        }
        for (channel, err) in report.failures() {
            message.push_str(&format!("\n{}: {}", channel, err));
        }
        log_with_header(dir, LOG_FILE, "Spike extraction", &message).map_err(to_err)
    }
}

/// Runs one session: every channel, or just `channel` for per-channel batch
/// jobs. Channel failures are in the report; session-level failures (bad
/// header, behaviour log, configuration) are returned as errors.
pub fn run(config: &PipelineConfig, channel: Option<usize>) -> Result<SessionReport> {
    let session = Session::open(config)?;
    let out = &session.layout.output_dir;
    fs::create_dir_all(out).map_err(|e| SpikeError::io(out, e))?;

    let outcomes = match channel {
        Some(index) if index >= session.channels.len() => {
            return Err(SpikeError::Config(format!(
                "channel {} out of range, session has {} channels",
                index,
                session.channels.len()
            )))
        }
        Some(index) => vec![session.outcome(index)],
        None => session.extract_all(),
    };
    let report = SessionReport { outcomes };

    for spikes in report.succeeded() {
        session.write_channel(spikes)?;
    }
    if channel.is_none() {
        session.write_session(&report)?;
    }
    session.write_parameters()?;
    session.log_report(&report)?;

    Ok(report)
}

/// Merges the per-channel files of earlier single-channel runs into the
/// session-wide outputs. Returns the channels that had no file.
pub fn collect(config: &PipelineConfig) -> Result<Vec<String>> {
    let session = Session::open(config)?;
    let out = &session.layout.output_dir;
    fs::create_dir_all(out).map_err(|e| SpikeError::io(out, e))?;
    session.collect()
}
