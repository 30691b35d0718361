use std::f64::consts::PI;
use rustfft::num_complex::Complex64;
use crate::drivers::ScanError;
/// Noise filter used on calibration sweeps before peak detection.
pub const SWEEP_SAMPLE_RATE_HZ: f64 = 100.0;
pub const SWEEP_CUTOFF_HZ: f64 = 2.0;
pub const SWEEP_FILTER_ORDER: usize = 3;
/// Digital transfer function `b(z) / a(z)` with `a[0] == 1`.
#[derive(Clone, Debug)]
pub struct TransferFunction {
    pub b: Vec<f64>,
    pub a: Vec<f64>,
}
impl TransferFunction {
    /// Butterworth low-pass of the given order, designed through the bilinear transform
    /// with frequency pre-warping (same coefficients as `scipy.signal.butter`).
    pub fn butterworth_lowpass(
        order: usize,
        cutoff_hz: f64,
        sample_rate_hz: f64,
    ) -> Result<Self, ScanError> {
        if order == 0 {
            return Err(ScanError::InvalidInput("filter order must be positive".into()));
        }
        let normal_cutoff = cutoff_hz / (sample_rate_hz * 0.5);
        if !(normal_cutoff > 0.0 && normal_cutoff < 1.0) {
            return Err(ScanError::InvalidInput(format!(
                "cutoff {cutoff_hz} Hz outside (0, nyquist) for {sample_rate_hz} Hz"
            )));
        }
        // Analog prototype poles on the unit circle, left half plane.
        let n = order as f64;
        let prototype: Vec<Complex64> = (0..order)
            .map(|k| {
                let m = -(n - 1.0) + 2.0 * k as f64;
                -Complex64::from_polar(1.0, PI * m / (2.0 * n))
            })
            .collect();
        // Pre-warp for a bilinear transform with fs = 2.
        let fs2 = 4.0;
        let warped = 4.0 * (PI * normal_cutoff / 2.0).tan();
        let analog: Vec<Complex64> = prototype.iter().map(|p| *p * warped).collect();
        let gain_analog = warped.powi(order as i32);
        let digital: Vec<Complex64> = analog
            .iter()
            .map(|p| (Complex64::new(fs2, 0.0) + *p) / (Complex64::new(fs2, 0.0) - *p))
            .collect();
        let denom = analog
            .iter()
            .fold(Complex64::new(1.0, 0.0), |acc, p| acc * (Complex64::new(fs2, 0.0) - *p));
        let gain = gain_analog * (Complex64::new(1.0, 0.0) / denom).re;
        let zeros = vec![Complex64::new(-1.0, 0.0); order];
        let b = poly(&zeros).into_iter().map(|c| c.re * gain).collect();
        let a = poly(&digital).into_iter().map(|c| c.re).collect();
        Ok(Self { b, a })
    }
    /// The low-pass applied to every calibration sweep.
    pub fn sweep_noise_filter() -> Result<Self, ScanError> {
        Self::butterworth_lowpass(SWEEP_FILTER_ORDER, SWEEP_CUTOFF_HZ, SWEEP_SAMPLE_RATE_HZ)
    }
    fn taps(&self) -> usize {
        self.a.len().max(self.b.len())
    }
    fn padded(&self) -> (Vec<f64>, Vec<f64>) {
        let n = self.taps();
        let mut b = self.b.clone();
        let mut a = self.a.clone();
        b.resize(n, 0.0);
        a.resize(n, 0.0);
        (b, a)
    }
    /// Filter state matching the steady state of a unit step input.
    pub fn step_initial_state(&self) -> Vec<f64> {
        let (b, a) = self.padded();
        let dc_gain = b.iter().sum::<f64>() / a.iter().sum::<f64>();
        let n = b.len();
        let mut state = vec![0.0; n.saturating_sub(1)];
        let mut acc = 0.0;
        for i in (0..n.saturating_sub(1)).rev() {
            acc += b[i + 1] - a[i + 1] * dc_gain;
            state[i] = acc;
        }
        state
    }
    /// Single pass through a transposed direct form II structure.
    pub fn lfilter(&self, input: &[f64], initial_state: &[f64]) -> Vec<f64> {
        let (b, a) = self.padded();
        let n = b.len();
        let mut z = initial_state.to_vec();
        z.resize(n.saturating_sub(1), 0.0);
        let mut out = Vec::with_capacity(input.len());
        for &x in input {
            let y = b[0] * x + z.first().copied().unwrap_or(0.0);
            for i in 0..n.saturating_sub(1) {
                let next = if i + 1 < n - 1 { z[i + 1] } else { 0.0 };
                z[i] = b[i + 1] * x + next - a[i + 1] * y;
            }
            out.push(y);
        }
        out
    }
    /// Zero-phase forward-backward filtering with odd-extension padding.
    pub fn filtfilt(&self, signal: &[f64]) -> Result<Vec<f64>, ScanError> {
        let padlen = 3 * self.taps();
        if signal.len() <= padlen {
            return Err(ScanError::InvalidInput(format!(
                "filtfilt needs more than {padlen} samples, got {}",
                signal.len()
            )));
        }
        let extended = odd_extension(signal, padlen);
        let zi = self.step_initial_state();
        let scaled = |x0: f64| zi.iter().map(|z| z * x0).collect::<Vec<_>>();
        let forward = self.lfilter(&extended, &scaled(extended[0]));
        let reversed: Vec<f64> = forward.iter().rev().copied().collect();
        let mut backward = self.lfilter(&reversed, &scaled(reversed[0]));
        backward.reverse();
        Ok(backward[padlen..backward.len() - padlen].to_vec())
    }
}
fn odd_extension(signal: &[f64], padlen: usize) -> Vec<f64> {
    let n = signal.len();
    let first = signal[0];
    let last = signal[n - 1];
    let mut out = Vec::with_capacity(n + 2 * padlen);
    out.extend((1..=padlen).rev().map(|i| 2.0 * first - signal[i]));
    out.extend_from_slice(signal);
    out.extend((1..=padlen).map(|i| 2.0 * last - signal[n - 1 - i]));
    out
}
/// Polynomial coefficients (highest power first) from its roots.
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
#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn butterworth_matches_reference_coefficients() {
        // scipy.signal.butter(3, 2 / 50)
        let tf = TransferFunction::sweep_noise_filter().unwrap();
        let b_ref = [
            0.000_219_606_211_225_362_14,
            0.000_658_818_633_676_086_5,
            0.000_658_818_633_676_086_5,
            0.000_219_606_211_225_362_14,
        ];
        let a_ref = [
            1.0,
            -2.748_835_809_214_675_4,
            2.528_231_219_142_558_7,
            -0.777_638_560_238_080_2,
        ];
        for (got, want) in tf.b.iter().zip(b_ref) {
            assert!((got - want).abs() < 1e-9, "b {got} vs {want}");
        }
        for (got, want) in tf.a.iter().zip(a_ref) {
            assert!((got - want).abs() < 1e-9, "a {got} vs {want}");
        }
    }
    #[test]
    fn unity_dc_gain_and_step_state() {
        let tf = TransferFunction::sweep_noise_filter().unwrap();
        let dc = tf.b.iter().sum::<f64>() / tf.a.iter().sum::<f64>();
        assert!((dc - 1.0).abs() < 1e-9);
        // Starting from the steady state, a constant input stays constant.
        let out = tf.lfilter(&[1.0; 50], &tf.step_initial_state());
        assert!(out.iter().all(|y| (y - 1.0).abs() < 1e-9));
    }
    #[test]
    fn filtfilt_keeps_constant_and_removes_fast_noise() {
        let tf = TransferFunction::sweep_noise_filter().unwrap();
        let flat = tf.filtfilt(&[3.5; 300]).unwrap();
        assert_eq!(flat.len(), 300);
        assert!(flat.iter().all(|y| (y - 3.5).abs() < 1e-9));
        // 25 Hz at 100 Hz sampling: alternating +1, 0, -1, 0
        let noisy: Vec<f64> = (0..400)
            .map(|i| (i as f64 * PI / 2.0).sin())
            .collect();
        let filtered = tf.filtfilt(&noisy).unwrap();
        let peak = filtered[150..250].iter().fold(0.0f64, |m, v| m.max(v.abs()));
        assert!(peak < 1e-3, "residual {peak}");
    }
    #[test]
    fn filtfilt_rejects_short_input() {
        let tf = TransferFunction::sweep_noise_filter().unwrap();
        assert!(matches!(
            tf.filtfilt(&[0.0; 12]),
            Err(ScanError::InvalidInput(_))
        ));
    }
    #[test]
    fn rejects_cutoff_above_nyquist() {
        assert!(TransferFunction::butterworth_lowpass(3, 60.0, 100.0).is_err());
    }
}
