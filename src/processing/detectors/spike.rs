use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{median, nan_mean, rising_edges};
use crate::error::{Result, SpikeError};
use crate::processing::filters::{BandPassFilter, BandPassFilterConfig, FilterInstance};

/// Median absolute deviation to standard deviation for Gaussian noise.
const MAD_TO_SD: f64 = 0.6745;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpikeDetectorConfig {
    /// Threshold in noise standard deviations below zero.
    pub threshold_sd: f64,
    /// Segments the trace is split into, each with its own threshold.
    pub chunks_for_threshold: usize,
}

impl Default for SpikeDetectorConfig {
    fn default() -> Self {
        Self {
            threshold_sd: 4.0,
            chunks_for_threshold: 1,
        }
    }
}

/// Spike times in seconds for one channel, non-decreasing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpikeTimestampSet(Vec<f64>);

impl SpikeTimestampSet {
    pub fn from_indices(indices: &[usize], sample_rate: f64) -> Self {
        Self(indices.iter().map(|&i| i as f64 / sample_rate).collect())
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentReport {
    pub index: usize,
    pub offset: usize,
    pub len: usize,
    pub threshold: f64,
    pub spike_count: usize,
}

#[derive(Debug, Clone)]
pub struct Detection {
    /// Global sample index of each spike.
    pub indices: Vec<usize>,
    pub spikes: SpikeTimestampSet,
    pub segments: Vec<SegmentReport>,
}

impl Detection {
    pub fn thresholds(&self) -> Vec<f64> {
        self.segments.iter().map(|s| s.threshold).collect()
    }
}

/// Segmented adaptive threshold detector for negative-going spikes.
pub struct SpikeDetector {
    config: SpikeDetectorConfig,
    filter: Box<dyn FilterInstance>,
    sample_rate: f64,
}

impl SpikeDetector {
    pub fn new(
        config: SpikeDetectorConfig,
        filter_config: BandPassFilterConfig,
        sample_rate: f64,
    ) -> Result<Self> {
        let filter = BandPassFilter::new(filter_config, sample_rate)?;
        Self::with_filter(config, Box::new(filter), sample_rate)
    }

    pub fn with_filter(
        config: SpikeDetectorConfig,
        filter: Box<dyn FilterInstance>,
        sample_rate: f64,
    ) -> Result<Self> {
        if !(sample_rate > 0.0) {
            return Err(SpikeError::InvalidFilterParameters(format!(
                "sample rate must be positive, got {}",
                sample_rate
            )));
        }
        if config.chunks_for_threshold == 0 {
            return Err(SpikeError::InvalidSegmentation(
                "segment count must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            config,
            filter,
            sample_rate,
        })
    }

    pub fn config(&self) -> &SpikeDetectorConfig {
        &self.config
    }

    pub fn filter_id(&self) -> String {
        self.filter.id()
    }

    pub fn detect(&self, trace: &[f64]) -> Result<Detection> {
        if trace.is_empty() {
            return Err(SpikeError::InvalidSegmentation("empty trace".to_string()));
        }

        let segment_len = trace.len().div_ceil(self.config.chunks_for_threshold);

        // Collected in segment order, whatever order rayon finishes them in
        let segments = trace
            .par_chunks(segment_len)
            .enumerate()
            .map(|(index, segment)| self.detect_segment(index, index * segment_len, segment))
            .collect::<Result<Vec<_>>>()?;

        let mut indices = Vec::new();
        let mut reports = Vec::with_capacity(segments.len());
        for (report, segment_indices) in segments {
            indices.extend(segment_indices);
            reports.push(report);
        }

        Ok(Detection {
            spikes: SpikeTimestampSet::from_indices(&indices, self.sample_rate),
            indices,
            segments: reports,
        })
    }

    fn detect_segment(
        &self,
        index: usize,
        offset: usize,
        segment: &[f64],
    ) -> Result<(SegmentReport, Vec<usize>)> {
        let mut filtered = self.filter.apply(segment)?;
        let mean = nan_mean(&filtered);
        filtered.iter_mut().for_each(|v| *v -= mean);

        let magnitudes: Vec<f64> = filtered.iter().map(|v| v.abs()).collect();
        let threshold = -self.config.threshold_sd * median(&magnitudes) / MAD_TO_SD;

        let outside: Vec<bool> = filtered.iter().map(|&v| v < threshold).collect();
        let spikes: Vec<usize> = rising_edges(&outside, Some(&false))
            .into_iter()
            .map(|i| offset + i)
            .collect();

        let report = SegmentReport {
            index,
            offset,
            len: segment.len(),
            threshold,
            spike_count: spikes.len(),
        };
        Ok((report, spikes))
    }
}
