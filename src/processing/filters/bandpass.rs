use super::ellip::{ellip_bandpass, TransferFunction};
use super::FilterInstance;
use crate::error::{Result, SpikeError};

use serde::{Deserialize, Serialize};

/// Passband ripple of the band-pass design, dB.
pub const PASSBAND_RIPPLE_DB: f64 = 0.1;
/// Minimum stopband attenuation, dB.
pub const STOPBAND_ATTENUATION_DB: f64 = 40.0;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BandPassFilterConfig {
    pub f_low: f64,
    pub f_high: f64,
    /// Prototype order; the digital filter has `2 * order` poles.
    #[serde(rename = "ellip_order")]
    pub order: usize,
}

impl Default for BandPassFilterConfig {
    fn default() -> Self {
        Self {
            f_low: 300.0,
            f_high: 6000.0,
            order: 2,
        }
    }
}

/// Zero-phase elliptic band-pass filter for one sampling rate.
#[derive(Debug, Clone)]
pub struct BandPassFilter {
    config: BandPassFilterConfig,
    coefficients: TransferFunction,
    initial_state: Vec<f64>,
}

impl BandPassFilter {
    pub fn new(config: BandPassFilterConfig, fs: f64) -> Result<Self> {
        if !(fs > 0.0) {
            return Err(SpikeError::InvalidFilterParameters(format!(
                "sample rate must be positive, got {}",
                fs
            )));
        }
        let nyquist = fs / 2.0;
        if !(config.f_low > 0.0 && config.f_low < config.f_high && config.f_high < nyquist) {
            return Err(SpikeError::InvalidFilterParameters(format!(
                "cutoffs {} Hz and {} Hz must be increasing and inside (0, {})",
                config.f_low, config.f_high, nyquist
            )));
        }

        let coefficients = ellip_bandpass(
            config.order,
            PASSBAND_RIPPLE_DB,
            STOPBAND_ATTENUATION_DB,
            config.f_low / nyquist,
            config.f_high / nyquist,
        )?;
        let initial_state = lfilter_zi(&coefficients.b, &coefficients.a)?;

        Ok(BandPassFilter {
            config,
            coefficients,
            initial_state,
        })
    }

    pub fn config(&self) -> &BandPassFilterConfig {
        &self.config
    }

    pub fn coefficients(&self) -> &TransferFunction {
        &self.coefficients
    }

    /// Edge samples added on each side before the forward-backward pass.
    pub fn pad_len(&self) -> usize {
        3 * (self.coefficients.a.len().max(self.coefficients.b.len()) - 1)
    }

    /// Forward-backward filtering with odd extension and steady-state
    /// initial conditions. Output has the input's length.
    pub fn filtfilt(&self, signal: &[f64]) -> Result<Vec<f64>> {
        let pad = self.pad_len();
        if signal.len() <= pad {
            return Err(SpikeError::InvalidSegmentation(format!(
                "segment of {} samples is not longer than the {} sample padding",
                signal.len(),
                pad
            )));
        }

        let (b, a) = (&self.coefficients.b, &self.coefficients.a);
        let extended = odd_ext(signal, pad);

        let zi = self.scaled_state(extended[0]);
        let mut forward = lfilter(b, a, &extended, zi);

        forward.reverse();
        let zi = self.scaled_state(forward[0]);
        let mut output = lfilter(b, a, &forward, zi);
        output.reverse();

        Ok(output[pad..pad + signal.len()].to_vec())
    }

    fn scaled_state(&self, x0: f64) -> Vec<f64> {
        self.initial_state.iter().map(|z| z * x0).collect()
    }
}

impl FilterInstance for BandPassFilter {
    fn id(&self) -> String {
        format!(
            "ellip{}:{}-{}Hz",
            self.config.order, self.config.f_low, self.config.f_high
        )
    }

    fn apply(&self, signal: &[f64]) -> Result<Vec<f64>> {
        self.filtfilt(signal)
    }
}

/// Odd extension by `n` samples at both ends, mirrored about the end values.
pub fn odd_ext(signal: &[f64], n: usize) -> Vec<f64> {
    let len = signal.len();
    let (first, last) = (signal[0], signal[len - 1]);

    let mut out = Vec::with_capacity(len + 2 * n);
    out.extend((1..=n).rev().map(|i| 2.0 * first - signal[i]));
    out.extend_from_slice(signal);
    out.extend((1..=n).map(|i| 2.0 * last - signal[len - 1 - i]));
    out
}

/// Direct form II transposed IIR filter with initial state `zi`.
/// `a[0]` must be 1.
pub fn lfilter(b: &[f64], a: &[f64], x: &[f64], mut zi: Vec<f64>) -> Vec<f64> {
    let n = b.len().max(a.len());
    let coeff = |c: &[f64], i: usize| c.get(i).copied().unwrap_or(0.0);
    zi.resize(n - 1, 0.0);

    let mut y = Vec::with_capacity(x.len());
    for &sample in x {
        let out = coeff(b, 0) * sample + zi.first().copied().unwrap_or(0.0);
        for i in 0..n.saturating_sub(2) {
            zi[i] = coeff(b, i + 1) * sample - coeff(a, i + 1) * out + zi[i + 1];
        }
        if n >= 2 {
            zi[n - 2] = coeff(b, n - 1) * sample - coeff(a, n - 1) * out;
        }
        y.push(out);
    }
    y
}

/// Initial state for a step response already at steady state, for unit
/// input. Solves `(I - A^T) zi = b[1..] - a[1..] * b[0]` where `A` is the
/// companion matrix of `a`.
pub fn lfilter_zi(b: &[f64], a: &[f64]) -> Result<Vec<f64>> {
    let n = b.len().max(a.len());
    if n < 2 {
        return Ok(Vec::new());
    }
    let coeff = |c: &[f64], i: usize| c.get(i).copied().unwrap_or(0.0);
    let size = n - 1;

    let mut matrix = vec![vec![0.0; size]; size];
    for (i, row) in matrix.iter_mut().enumerate() {
        row[i] = 1.0;
        row[0] += coeff(a, i + 1);
        if i + 1 < size {
            row[i + 1] = -1.0;
        }
    }
    let rhs: Vec<f64> = (1..n)
        .map(|i| coeff(b, i) - coeff(a, i) * coeff(b, 0))
        .collect();

    solve(matrix, rhs)
}

// Gaussian elimination with partial pivoting.
fn solve(mut m: Vec<Vec<f64>>, mut rhs: Vec<f64>) -> Result<Vec<f64>> {
    let size = rhs.len();
    for col in 0..size {
        let pivot = (col..size)
            .max_by(|&i, &j| m[i][col].abs().total_cmp(&m[j][col].abs()))
            .unwrap_or(col);
        if m[pivot][col] == 0.0 {
            return Err(SpikeError::InvalidFilterParameters(
                "filter has no steady state".to_string(),
            ));
        }
        m.swap(col, pivot);
        rhs.swap(col, pivot);

        for row in col + 1..size {
            let factor = m[row][col] / m[col][col];
            for k in col..size {
                m[row][k] -= factor * m[col][k];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut x = vec![0.0; size];
    for row in (0..size).rev() {
        let tail: f64 = (row + 1..size).map(|k| m[row][k] * x[k]).sum();
        x[row] = (rhs[row] - tail) / m[row][row];
    }
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn filter(order: usize, f_low: f64, f_high: f64) -> BandPassFilter {
        BandPassFilter::new(BandPassFilterConfig { f_low, f_high, order }, 20000.0).unwrap()
    }

    fn sine(freq: f64, fs: f64, n: usize) -> Vec<f64> {
        (0..n).map(|i| (2.0 * PI * freq * i as f64 / fs).sin()).collect()
    }

    fn rms(x: &[f64]) -> f64 {
        (x.iter().map(|v| v * v).sum::<f64>() / x.len() as f64).sqrt()
    }

    #[test]
    fn padding_follows_coefficient_count() {
        assert_eq!(filter(2, 300.0, 6000.0).pad_len(), 12);
        assert_eq!(filter(1, 800.0, 3000.0).pad_len(), 6);
    }

    #[test]
    fn output_keeps_input_length() {
        let f = filter(2, 300.0, 6000.0);
        let x = sine(1000.0, 20000.0, 2000);
        assert_eq!(f.filtfilt(&x).unwrap().len(), 2000);
        assert_eq!(f.filtfilt(&x[..13]).unwrap().len(), 13);
    }

    #[test]
    fn short_segment_is_rejected() {
        let f = filter(2, 300.0, 6000.0);
        assert!(matches!(
            f.filtfilt(&[0.0; 12]),
            Err(SpikeError::InvalidSegmentation(_))
        ));
    }

    #[test]
    fn passband_tone_survives_and_dc_is_attenuated() {
        let f = filter(2, 300.0, 6000.0);
        let tone = sine(1500.0, 20000.0, 4000);
        let out = f.filtfilt(&tone).unwrap();
        // Two passes: at most twice the ripple.
        let gain = rms(&out[500..3500]) / rms(&tone[500..3500]);
        assert!(gain > 0.97 && gain < 1.01, "gain {}", gain);

        // Even orders leave the stopband floor (-40 dB per pass) at DC.
        let dc = vec![100.0; 4000];
        let out = f.filtfilt(&dc).unwrap();
        assert!(out.iter().all(|v| v.abs() < 0.011));
    }

    #[test]
    fn steady_state_matches_constant_input() {
        let f = filter(2, 300.0, 6000.0);
        let (b, a) = (&f.coefficients().b, &f.coefficients().a);
        let zi = lfilter_zi(b, a).unwrap();
        let x = vec![1.0; 50];
        let y = lfilter(b, a, &x, zi);
        let dc_gain = b.iter().sum::<f64>() / a.iter().sum::<f64>();
        assert!(y.iter().all(|v| (v - dc_gain).abs() < 1e-9));
    }

    #[test]
    fn odd_extension_mirrors_about_endpoints() {
        let x = [1.0, 2.0, 4.0, 7.0];
        assert_eq!(
            odd_ext(&x, 2),
            vec![-2.0, 0.0, 1.0, 2.0, 4.0, 7.0, 10.0, 12.0]
        );
    }

    #[test]
    fn invalid_cutoffs_are_rejected() {
        let bad = [
            (0.0, 6000.0, 2, 20000.0),
            (6000.0, 300.0, 2, 20000.0),
            (300.0, 10000.0, 2, 20000.0),
            (300.0, 6000.0, 0, 20000.0),
            (300.0, 6000.0, 2, 0.0),
        ];
        for (f_low, f_high, order, fs) in bad {
            let result = BandPassFilter::new(BandPassFilterConfig { f_low, f_high, order }, fs);
            assert!(
                matches!(result, Err(SpikeError::InvalidFilterParameters(_))),
                "{} {} {} {}",
                f_low,
                f_high,
                order,
                fs
            );
        }
    }
}
