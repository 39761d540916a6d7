// src/acquisition/traces.rs

use std::fs;
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Result, SpikeError};
use crate::processing::detectors::rising_edges;

/// Amplifier ADC step in microvolts.
pub const MICROVOLTS_PER_BIT: f64 = 0.195;

fn sample_count(bytes: &[u8]) -> Result<usize> {
    if bytes.is_empty() {
        return Err(SpikeError::MalformedTrace("empty file".to_string()));
    }
    if bytes.len() % 2 != 0 {
        return Err(SpikeError::MalformedTrace("truncated sample".to_string()));
    }
    Ok(bytes.len() / 2)
}

pub fn decode_amplifier_samples(bytes: &[u8]) -> Result<Vec<f64>> {
    let mut codes = vec![0i16; sample_count(bytes)?];
    LittleEndian::read_i16_into(bytes, &mut codes);
    Ok(codes
        .into_iter()
        .map(|code| f64::from(code) * MICROVOLTS_PER_BIT)
        .collect())
}

pub fn decode_digital_samples(bytes: &[u8]) -> Result<Vec<u16>> {
    let mut samples = vec![0u16; sample_count(bytes)?];
    LittleEndian::read_u16_into(bytes, &mut samples);
    Ok(samples)
}

/// Loads an amplifier trace in microvolts. One bulk read per file.
pub fn read_amplifier_trace<P: AsRef<Path>>(path: P) -> Result<Vec<f64>> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|e| SpikeError::io(path, e))?;
    decode_amplifier_samples(&bytes).map_err(|e| with_path(e, path))
}

pub fn read_digital_trace<P: AsRef<Path>>(path: P) -> Result<Vec<u16>> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|e| SpikeError::io(path, e))?;
    decode_digital_samples(&bytes).map_err(|e| with_path(e, path))
}

fn with_path(err: SpikeError, path: &Path) -> SpikeError {
    match err {
        SpikeError::MalformedTrace(reason) => {
            SpikeError::MalformedTrace(format!("{}: {}", path.display(), reason))
        }
        other => other,
    }
}

/// Sample indices where the digital line steps up. Not debounced.
pub fn rising_edge_indices(samples: &[u16]) -> Vec<usize> {
    rising_edges(samples, None)
}

pub fn onset_times(samples: &[u16], sample_rate: f64) -> Vec<f64> {
    rising_edge_indices(samples)
        .into_iter()
        .map(|index| index as f64 / sample_rate)
        .collect()
}

/// Stimulus onsets in seconds from a digital input file.
pub fn read_stimulus_onsets<P: AsRef<Path>>(path: P, sample_rate: f64) -> Result<Vec<f64>> {
    let samples = read_digital_trace(path)?;
    Ok(onset_times(&samples, sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_bytes_per_sample() {
        let bytes = [0x01, 0x00, 0xFF, 0xFF, 0x00, 0x80];
        let samples = decode_amplifier_samples(&bytes).unwrap();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0], MICROVOLTS_PER_BIT);
        assert_eq!(samples[1], -MICROVOLTS_PER_BIT);
        assert_eq!(samples[2], -32768.0 * MICROVOLTS_PER_BIT);
    }

    #[test]
    fn odd_length_is_truncated_sample() {
        match decode_amplifier_samples(&[0x00, 0x01, 0x02]) {
            Err(SpikeError::MalformedTrace(reason)) => assert_eq!(reason, "truncated sample"),
            other => panic!("expected truncated sample, got {:?}", other),
        }
    }

    #[test]
    fn empty_trace_is_rejected() {
        assert!(matches!(
            decode_digital_samples(&[]),
            Err(SpikeError::MalformedTrace(_))
        ));
    }

    #[test]
    fn single_transition_gives_one_onset() {
        let mut samples = vec![0u16; 3000];
        samples[1000..].iter_mut().for_each(|s| *s = 1);

        assert_eq!(rising_edge_indices(&samples), vec![1000]);
        assert_eq!(onset_times(&samples, 30000.0), vec![1000.0 / 30000.0]);
    }

    #[test]
    fn high_first_sample_is_not_an_edge() {
        let samples = [1u16, 1, 0, 1, 1, 0, 0, 1];
        assert_eq!(rising_edge_indices(&samples), vec![3, 7]);
    }

    #[test]
    fn missing_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("amp-A-031.dat");
        match read_amplifier_trace(&path) {
            Err(SpikeError::Io { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected io error, got {:?}", other),
        }
    }
}
