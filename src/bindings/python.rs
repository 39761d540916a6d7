use crate::acquisition::header::decode_header;
use crate::error::SpikeError;
use crate::processing::detectors::{SpikeDetector, SpikeDetectorConfig};
use crate::processing::filters::BandPassFilterConfig;

use pyo3::exceptions::{PyIOError, PyValueError};
use pyo3::prelude::*;

impl From<SpikeError> for PyErr {
    fn from(err: SpikeError) -> PyErr {
        match err {
            SpikeError::Io { .. } => PyIOError::new_err(err.to_string()),
            other => PyValueError::new_err(other.to_string()),
        }
    }
}

#[pyclass]
pub struct PySpikeDetector {
    detector: SpikeDetector,
}

#[pymethods]
impl PySpikeDetector {
    #[new]
    #[pyo3(signature = (fs, threshold_sd=4.0, chunks_for_threshold=1, f_low=300.0, f_high=6000.0, ellip_order=2))]
    pub fn new(
        fs: f64,
        threshold_sd: f64,
        chunks_for_threshold: usize,
        f_low: f64,
        f_high: f64,
        ellip_order: usize,
    ) -> PyResult<Self> {
        let config = SpikeDetectorConfig {
            threshold_sd,
            chunks_for_threshold,
        };
        let filter = BandPassFilterConfig {
            f_low,
            f_high,
            order: ellip_order,
        };
        Ok(PySpikeDetector {
            detector: SpikeDetector::new(config, filter, fs)?,
        })
    }

    /// Spike times in seconds for a trace in microvolts.
    pub fn detect(&self, py: Python<'_>, data: Vec<f64>) -> PyResult<Vec<f64>> {
        let detection = py.allow_threads(|| self.detector.detect(&data))?;
        Ok(detection.spikes.into_vec())
    }

    pub fn thresholds(&self, data: Vec<f64>) -> PyResult<Vec<f64>> {
        Ok(self.detector.detect(&data)?.thresholds())
    }
}

/// Decodes an `info.rhd` header and returns it as a JSON string.
#[pyfunction]
pub fn read_header_json(data: &[u8]) -> PyResult<String> {
    let header = decode_header(data)?;
    serde_json::to_string(&header).map_err(|e| PyValueError::new_err(e.to_string()))
}

/// A Python module implemented in Rust.
#[pymodule]
pub fn spike_extraction(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PySpikeDetector>()?;
    m.add_function(wrap_pyfunction!(read_header_json, m)?)?;
    Ok(())
}
