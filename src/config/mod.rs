// src/config/mod.rs
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, SpikeError};
use crate::processing::detectors::SpikeDetectorConfig;
use crate::processing::filters::BandPassFilterConfig;

pub const DEFAULT_DIGITAL_INPUT: &str = "board-DIGITAL-IN-02.dat";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PipelineConfig {
    pub session: SessionConfig,
    pub thresholding: SpikeDetectorConfig,
    pub filtering: BandPassFilterConfig,
    pub detection: DetectionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SessionConfig {
    /// Directory holding `info.rhd` and the per-channel `.dat` files.
    pub directory: PathBuf,
    /// JSON file listing channel identifiers in acquisition order.
    pub array_metadata: PathBuf,
    /// CSV behaviour log, one row per presentation.
    pub behaviour_log: PathBuf,
    pub output_dir: PathBuf,
    #[serde(default = "default_digital_input")]
    pub digital_input: String,
}

fn default_digital_input() -> String {
    DEFAULT_DIGITAL_INPUT.to_string()
}

/// Trial window around stimulus onset, seconds. Negative start reaches
/// before onset.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct DetectionConfig {
    pub window_start: f64,
    pub window_stop: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub directory: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: PathBuf::from("logs"),
        }
    }
}

impl PipelineConfig {
    /// Semantic checks that do not need the recording. Filter cutoffs are
    /// checked against the header sample rate when the filter is built.
    pub fn validate(&self) -> Result<()> {
        let t = &self.thresholding;
        if !(t.threshold_sd > 0.0) {
            return Err(SpikeError::Config(format!(
                "threshold_sd must be positive, got {}",
                t.threshold_sd
            )));
        }
        if t.chunks_for_threshold == 0 {
            return Err(SpikeError::InvalidSegmentation(
                "chunks_for_threshold must be at least 1".to_string(),
            ));
        }

        let f = &self.filtering;
        if !(f.f_low > 0.0 && f.f_low < f.f_high) {
            return Err(SpikeError::InvalidFilterParameters(format!(
                "filter cutoffs must satisfy 0 < f_low < f_high, got {} and {}",
                f.f_low, f.f_high
            )));
        }
        if f.order == 0 {
            return Err(SpikeError::InvalidFilterParameters(
                "ellip_order must be at least 1".to_string(),
            ));
        }

        let d = &self.detection;
        if !(d.window_start <= d.window_stop) {
            return Err(SpikeError::Config(format!(
                "window_start {} is after window_stop {}",
                d.window_start, d.window_stop
            )));
        }

        if self.session.digital_input.is_empty() {
            return Err(SpikeError::Config("digital_input must name a file".to_string()));
        }
        Ok(())
    }

    /// Makes relative paths relative to `base` instead of the working
    /// directory.
    pub fn resolve_paths(&mut self, base: &Path) {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        resolve(&mut self.session.directory);
        resolve(&mut self.session.array_metadata);
        resolve(&mut self.session.behaviour_log);
        resolve(&mut self.session.output_dir);
        resolve(&mut self.logging.directory);
    }
}

/// Loads and validates a YAML config. Relative paths are taken relative to
/// the config file's directory.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<PipelineConfig> {
    let path = path.as_ref();
    let config_str = fs::read_to_string(path).map_err(|e| SpikeError::io(path, e))?;

    let mut config: PipelineConfig = serde_yaml::from_str(&config_str)?;
    if let Some(base) = path.parent() {
        config.resolve_paths(base);
    }
    config.validate()?;
    Ok(config)
}

pub fn save_config<P: AsRef<Path>>(config: &PipelineConfig, path: P) -> Result<()> {
    let path = path.as_ref();
    let yaml = serde_yaml::to_string(config)?;
    fs::write(path, yaml).map_err(|e| SpikeError::io(path, e))
}
