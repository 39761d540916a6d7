// src/processing/filters/ellip.rs
//
// Elliptic (Cauer) band-pass design: analog low-pass prototype, band-pass
// frequency transform, bilinear transform, then expansion to b/a polynomials.

use std::f64::consts::PI;

use num_complex::Complex64;

use crate::error::{Result, SpikeError};

const MACHEP: f64 = 1.110_223_024_625_156_5e-16;
const EPSILON: f64 = 2e-16;

/// Bilinear transform with fs = 2, i.e. `2 * fs`.
const FS2: f64 = 4.0;

/// Zeros, poles and gain of a rational transfer function.
#[derive(Debug, Clone)]
pub struct Zpk {
    pub zeros: Vec<Complex64>,
    pub poles: Vec<Complex64>,
    pub gain: f64,
}

/// Digital filter coefficients, `a[0] == 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferFunction {
    pub b: Vec<f64>,
    pub a: Vec<f64>,
}

impl TransferFunction {
    /// Magnitude response at `omega` radians per sample.
    pub fn magnitude_at(&self, omega: f64) -> f64 {
        let e = Complex64::from_polar(1.0, -omega);
        let eval = |coeffs: &[f64]| {
            coeffs
                .iter()
                .rev()
                .fold(Complex64::new(0.0, 0.0), |acc, &c| acc * e + c)
        };
        (eval(&self.b) / eval(&self.a)).norm()
    }

    pub fn magnitude_db_at(&self, omega: f64) -> f64 {
        20.0 * self.magnitude_at(omega).log10()
    }
}

/// Band-pass elliptic filter of the given prototype order. Edges are
/// normalized to Nyquist and must satisfy `0 < low < high < 1`.
pub fn ellip_bandpass(
    order: usize,
    ripple_db: f64,
    attenuation_db: f64,
    low: f64,
    high: f64,
) -> Result<TransferFunction> {
    if order == 0 {
        return Err(SpikeError::InvalidFilterParameters(
            "filter order must be at least 1".to_string(),
        ));
    }
    if !(low > 0.0 && low < high && high < 1.0) {
        return Err(SpikeError::InvalidFilterParameters(format!(
            "normalized band edges must satisfy 0 < {} < {} < 1",
            low, high
        )));
    }

    let prototype = ellipap(order, ripple_db, attenuation_db)?;

    let w1 = FS2 * (PI * low / 2.0).tan();
    let w2 = FS2 * (PI * high / 2.0).tan();
    let analog = lp2bp(prototype, (w1 * w2).sqrt(), w2 - w1);
    let digital = bilinear(analog);

    let b = poly(&digital.zeros)
        .into_iter()
        .map(|c| digital.gain * c.re)
        .collect();
    let a = poly(&digital.poles).into_iter().map(|c| c.re).collect();
    Ok(TransferFunction { b, a })
}

/// Analog elliptic low-pass prototype with unit passband edge.
pub fn ellipap(order: usize, ripple_db: f64, attenuation_db: f64) -> Result<Zpk> {
    if order == 1 {
        let p = -(1.0 / (10f64.powf(0.1 * ripple_db) - 1.0)).sqrt();
        return Ok(Zpk {
            zeros: Vec::new(),
            poles: vec![Complex64::new(p, 0.0)],
            gain: -p,
        });
    }

    let eps_sq = 10f64.powf(0.1 * ripple_db) - 1.0;
    let eps = eps_sq.sqrt();
    let ck1_sq = eps_sq / (10f64.powf(0.1 * attenuation_db) - 1.0);
    if ck1_sq == 0.0 {
        return Err(SpikeError::InvalidFilterParameters(
            "cannot design a filter with these ripple and attenuation values".to_string(),
        ));
    }

    let val0 = ellipk(ck1_sq);
    let m = ellipdeg(order, ck1_sq);
    let capk = ellipk(m);
    let n = order as f64;

    let jacobi: Vec<(f64, f64, f64)> = ((1 - order % 2)..order)
        .step_by(2)
        .map(|j| ellipj(j as f64 * capk / n, m))
        .collect();

    let mut zeros: Vec<Complex64> = jacobi
        .iter()
        .filter(|(s, _, _)| s.abs() > EPSILON)
        .map(|&(s, _, _)| Complex64::new(0.0, 1.0 / (m.sqrt() * s)))
        .collect();
    zeros.extend(zeros.clone().into_iter().map(|z| z.conj()));

    let r = arc_jac_sn(Complex64::new(0.0, 1.0 / eps), ck1_sq)?.im;
    let v0 = capk * r / (n * val0);
    let (sv, cv, dv) = ellipj(v0, 1.0 - m);

    let mut poles: Vec<Complex64> = jacobi
        .iter()
        .map(|&(s, c, d)| {
            -(Complex64::new(c * d * sv * cv, s * dv)) / (1.0 - (d * sv).powi(2))
        })
        .collect();

    if order % 2 == 1 {
        let magnitude = poles.iter().map(|p| p.norm_sqr()).sum::<f64>().sqrt();
        let complex_poles: Vec<Complex64> = poles
            .iter()
            .filter(|p| p.im.abs() > EPSILON * magnitude)
            .map(|p| p.conj())
            .collect();
        poles.extend(complex_poles);
    } else {
        poles.extend(poles.clone().into_iter().map(|p| p.conj()));
    }

    let num: Complex64 = poles.iter().map(|&p| -p).product();
    let den: Complex64 = zeros.iter().map(|&z| -z).product();
    let mut gain = (num / den).re;
    if order % 2 == 0 {
        gain /= (1.0 + eps_sq).sqrt();
    }

    Ok(Zpk { zeros, poles, gain })
}

/// Low-pass to band-pass transform around centre `wo` with width `bw`.
fn lp2bp(zpk: Zpk, wo: f64, bw: f64) -> Zpk {
    let degree = zpk.poles.len() - zpk.zeros.len();
    let wo_sq = Complex64::new(wo * wo, 0.0);

    let split = |roots: &[Complex64]| -> Vec<Complex64> {
        let scaled: Vec<Complex64> = roots.iter().map(|&r| r * (bw / 2.0)).collect();
        let upper = scaled.iter().map(|&r| r + (r * r - wo_sq).sqrt());
        let lower = scaled.iter().map(|&r| r - (r * r - wo_sq).sqrt());
        upper.chain(lower).collect()
    };

    let mut zeros = split(&zpk.zeros);
    zeros.extend(std::iter::repeat(Complex64::new(0.0, 0.0)).take(degree));

    Zpk {
        zeros,
        poles: split(&zpk.poles),
        gain: zpk.gain * bw.powi(degree as i32),
    }
}

fn bilinear(zpk: Zpk) -> Zpk {
    let degree = zpk.poles.len() - zpk.zeros.len();
    let map = |&r: &Complex64| (FS2 + r) / (FS2 - r);

    let mut zeros: Vec<Complex64> = zpk.zeros.iter().map(map).collect();
    zeros.extend(std::iter::repeat(Complex64::new(-1.0, 0.0)).take(degree));

    let num: Complex64 = zpk.zeros.iter().map(|&z| FS2 - z).product();
    let den: Complex64 = zpk.poles.iter().map(|&p| FS2 - p).product();

    Zpk {
        zeros,
        poles: zpk.poles.iter().map(map).collect(),
        gain: zpk.gain * (num / den).re,
    }
}

/// Monic polynomial coefficients (highest power first) with the given roots.
fn poly(roots: &[Complex64]) -> Vec<Complex64> {
    let mut coeffs = vec![Complex64::new(1.0, 0.0)];
    for root in roots {
        let mut next = vec![Complex64::new(0.0, 0.0); coeffs.len() + 1];
        for (i, c) in coeffs.iter().enumerate() {
            next[i] += *c;
            next[i + 1] -= *c * *root;
        }
        coeffs = next;
    }
    coeffs
}

/// Complete elliptic integral of the first kind, parameter `m = k^2`.
fn ellipk(m: f64) -> f64 {
    quarter_period((1.0 - m).sqrt())
}

/// `K(1 - p)`, accurate for small `p`.
fn ellipkm1(p: f64) -> f64 {
    quarter_period(p.sqrt())
}

// Arithmetic-geometric mean of 1 and `b`.
fn quarter_period(b: f64) -> f64 {
    let (mut a, mut b) = (1.0f64, b);
    for _ in 0..100 {
        if (a - b).abs() <= 1e-16 * a {
            break;
        }
        let mean = (a + b) / 2.0;
        b = (a * b).sqrt();
        a = mean;
    }
    PI / (2.0 * a)
}

/// Jacobi elliptic functions `(sn, cn, dn)` by descending Landen transform.
fn ellipj(u: f64, m: f64) -> (f64, f64, f64) {
    if m < 1e-9 {
        let t = u.sin();
        let b = u.cos();
        let ai = 0.25 * m * (u - t * b);
        return (t - ai * b, b + ai * t, 1.0 - 0.5 * m * t * t);
    }

    if m >= 0.999_999_999_9 {
        let ai = 0.25 * (1.0 - m);
        let b = u.cosh();
        let t = u.tanh();
        let phi = 1.0 / b;
        let twon = b * u.sinh();
        let sn = t + ai * (twon - u) / (b * b);
        let ai = ai * t * phi;
        return (sn, phi - ai * (twon - u), phi + ai * (twon + u));
    }

    let mut a = [0.0f64; 9];
    let mut c = [0.0f64; 9];
    a[0] = 1.0;
    c[0] = m.sqrt();
    let mut b = (1.0 - m).sqrt();
    let mut twon = 1.0;
    let mut i = 0;

    while (c[i] / a[i]).abs() > MACHEP && i < 8 {
        let ai = a[i];
        i += 1;
        c[i] = (ai - b) / 2.0;
        let t = (ai * b).sqrt();
        a[i] = (ai + b) / 2.0;
        b = t;
        twon *= 2.0;
    }

    let mut phi = twon * a[i] * u;
    let mut prev = phi;
    while i > 0 {
        let t = c[i] * phi.sin() / a[i];
        prev = phi;
        phi = (t.asin() + phi) / 2.0;
        i -= 1;
    }

    let cn = phi.cos();
    (phi.sin(), cn, cn / (phi - prev).cos())
}

/// Solves the degree equation for the modulus of an order-`n` filter.
fn ellipdeg(n: usize, m1: f64) -> f64 {
    let k1 = ellipk(m1);
    let k1p = ellipkm1(m1);
    let q1 = (-PI * k1p / k1).exp();
    let q = q1.powf(1.0 / n as f64);

    let num: f64 = (0..8).map(|k| q.powi(k * (k + 1))).sum();
    let den = 1.0 + 2.0 * (1..=8).map(|k| q.powi(k * k)).sum::<f64>();
    16.0 * q * (num / den).powi(4)
}

/// Inverse Jacobi `sn` for complex argument, parameter `m`.
fn arc_jac_sn(w: Complex64, m: f64) -> Result<Complex64> {
    let complement = |kx: Complex64| ((1.0 - kx) * (1.0 + kx)).sqrt();

    let mut ks = vec![m.sqrt()];
    while let Some(&kn) = ks.last().filter(|&&kn| kn != 0.0) {
        if ks.len() > 10 {
            return Err(SpikeError::InvalidFilterParameters(
                "Landen sequence did not converge".to_string(),
            ));
        }
        let kp = ((1.0 - kn) * (1.0 + kn)).sqrt();
        ks.push((1.0 - kp) / (1.0 + kp));
    }

    let big_k = PI / 2.0 * ks[1..].iter().map(|k| 1.0 + k).product::<f64>();

    let mut wn = w;
    for pair in ks.windows(2) {
        let (kn, knext) = (pair[0], pair[1]);
        wn = 2.0 * wn / ((1.0 + knext) * (1.0 + complement(wn * kn)));
    }

    Ok(big_k * (2.0 / PI) * wn.asin())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() <= tol
    }

    #[test]
    fn second_order_prototype() {
        let zpk = ellipap(2, 0.1, 40.0).unwrap();
        assert_eq!(zpk.zeros.len(), 2);
        assert_eq!(zpk.poles.len(), 2);
        assert!(close(zpk.zeros[0].im.abs(), 18.113359156229507, 1e-8));
        assert!(close(zpk.poles[0].re, -1.18012855792714, 1e-8));
        assert!(close(zpk.poles[0].im.abs(), 1.3878853897804904, 1e-8));
        assert!(close(zpk.gain, 0.01, 1e-12));
    }

    #[test]
    fn odd_order_prototype_has_real_pole() {
        let zpk = ellipap(3, 0.1, 40.0).unwrap();
        assert_eq!(zpk.zeros.len(), 2);
        assert_eq!(zpk.poles.len(), 3);
        assert!(zpk.poles.iter().any(|p| p.im == 0.0 && close(p.re, -1.0099818099716271, 1e-8)));
        assert!(close(zpk.gain, 0.10340328135135117, 1e-8));
    }

    #[test]
    fn coefficient_count_is_twice_the_order_plus_one() {
        for order in 1..=4 {
            let tf = ellip_bandpass(order, 0.1, 40.0, 0.03, 0.6).unwrap();
            assert_eq!(tf.b.len(), 2 * order + 1);
            assert_eq!(tf.a.len(), 2 * order + 1);
            assert!(close(tf.a[0], 1.0, 1e-12));
        }
    }

    #[test]
    fn ripple_is_met_at_band_edges() {
        let (low, high) = (300.0 / 10000.0, 6000.0 / 10000.0);
        let tf = ellip_bandpass(2, 0.1, 40.0, low, high).unwrap();

        assert!(close(tf.magnitude_db_at(PI * low), -0.1, 1e-6));
        assert!(close(tf.magnitude_db_at(PI * high), -0.1, 1e-6));

        let centre = tf.magnitude_db_at(PI * (low * high).sqrt());
        assert!(centre <= 1e-9 && centre >= -0.1 - 1e-9);
    }

    #[test]
    fn stopband_floor_matches_attenuation() {
        let tf = ellip_bandpass(2, 0.1, 40.0, 0.03, 0.6).unwrap();
        assert!(close(tf.magnitude_db_at(0.0), -40.0, 1e-6));
        assert!(close(tf.magnitude_db_at(PI), -40.0, 1e-6));

        let odd = ellip_bandpass(3, 0.1, 40.0, 0.03, 0.6).unwrap();
        assert!(odd.magnitude_db_at(0.0) < -100.0);
        assert!(odd.magnitude_db_at(PI * 0.005) < -40.0);
    }

    #[test]
    fn rejects_bad_edges_and_order() {
        assert!(matches!(
            ellip_bandpass(0, 0.1, 40.0, 0.1, 0.2),
            Err(SpikeError::InvalidFilterParameters(_))
        ));
        assert!(ellip_bandpass(2, 0.1, 40.0, 0.3, 0.2).is_err());
        assert!(ellip_bandpass(2, 0.1, 40.0, 0.0, 0.2).is_err());
        assert!(ellip_bandpass(2, 0.1, 40.0, 0.1, 1.0).is_err());
    }
}
