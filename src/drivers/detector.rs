use log::{debug, info};
use crate::drivers::filter::TransferFunction;
use crate::drivers::peaks::{find_peaks, PeakCriteria};
use crate::drivers::ScanError;
/// Search band in volts; the cathodic spike outside it is ignored.
pub const SEARCH_WINDOW_V: (f64, f64) = (-0.4, -0.05);
/// Minimum prominence of the reduction peak, in amps.
pub const MIN_PROMINENCE: f64 = 5e-7;
/// Minimum distance between two candidate peaks, in samples.
pub const MIN_PEAK_DISTANCE: usize = 100;
/// Peak and left-base voltages located on a calibration sweep.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PeakBaseline {
    pub peak_v: f64,
    pub baseline_v: f64,
    /// Number of peaks that passed the criteria; more than one means the choice was ambiguous.
    pub candidates: usize,
}
impl PeakBaseline {
    pub fn is_ambiguous(&self) -> bool {
        self.candidates > 1
    }
}
/// Locates the reduction peak of an SWV sweep and the baseline voltage on its left.
pub struct PeakBaselineDetector {
    filter: TransferFunction,
    criteria: PeakCriteria,
    window_v: (f64, f64),
}
impl PeakBaselineDetector {
    pub fn new() -> Result<Self, ScanError> {
        Ok(Self {
            filter: TransferFunction::sweep_noise_filter()?,
            criteria: PeakCriteria {
                min_prominence: MIN_PROMINENCE,
                min_distance: MIN_PEAK_DISTANCE,
            },
            window_v: SEARCH_WINDOW_V,
        })
    }
    /// Fewest samples a sweep must carry to be analysed.
    pub fn min_samples(&self) -> usize {
        2 * self.criteria.min_distance
    }
    /// Validates the sweep and returns the zero-phase filtered currents, in acquisition order.
    pub fn filter(&self, potentials: &[f64], currents: &[f64]) -> Result<Vec<f64>, ScanError> {
        self.validate(potentials, currents)?;
        self.filter.filtfilt(currents)
    }
    /// Runs filtering and peak search in one go.
    #[cfg(test)]
    pub fn detect(&self, potentials: &[f64], currents: &[f64]) -> Result<PeakBaseline, ScanError> {
        let filtered = self.filter(potentials, currents)?;
        self.locate(potentials, &filtered)
    }
    /// Peak search on currents that were already filtered.
    pub fn locate(&self, potentials: &[f64], filtered: &[f64]) -> Result<PeakBaseline, ScanError> {
        self.validate(potentials, filtered)?;
        // Binary search needs ascending potentials.
        let (volts, amps): (Vec<f64>, Vec<f64>) = if potentials[0] > potentials[1] {
            potentials
                .iter()
                .rev()
                .copied()
                .zip(filtered.iter().rev().copied())
                .unzip()
        } else {
            (potentials.to_vec(), filtered.to_vec())
        };
        let start = volts.partition_point(|&v| v < self.window_v.0);
        let end = volts.partition_point(|&v| v < self.window_v.1);
        let window_v = &volts[start..end];
        let negated: Vec<f64> = amps[start..end].iter().map(|i| -i).collect();
        debug!(
            "peak search over {} samples between {:.3} V and {:.3} V",
            window_v.len(),
            self.window_v.0,
            self.window_v.1
        );
        let peaks = find_peaks(&negated, self.criteria);
        // Largest negated current is the most negative filtered current.
        let best = peaks
            .iter()
            .max_by(|a, b| negated[a.index].total_cmp(&negated[b.index]))
            .ok_or(ScanError::NoPeakFound)?;
        debug!(
            "selected peak at {:.4} V, bases {:.4} V .. {:.4} V",
            window_v[best.index],
            window_v[best.left_base],
            window_v[best.right_base]
        );
        if peaks.len() > 1 {
            info!(
                "{} peaks found, keeping the largest at {:.4} V",
                peaks.len(),
                window_v[best.index]
            );
        }
        Ok(PeakBaseline {
            peak_v: window_v[best.index],
            baseline_v: window_v[best.left_base],
            candidates: peaks.len(),
        })
    }
    fn validate(&self, potentials: &[f64], currents: &[f64]) -> Result<(), ScanError> {
        if potentials.len() != currents.len() {
            return Err(ScanError::InvalidInput(format!(
                "{} potentials but {} currents",
                potentials.len(),
                currents.len()
            )));
        }
        if potentials.len() < self.min_samples() {
            return Err(ScanError::InvalidInput(format!(
                "sweep has {} samples, need at least {}",
                potentials.len(),
                self.min_samples()
            )));
        }
        if potentials.iter().chain(currents).any(|v| !v.is_finite()) {
            return Err(ScanError::InvalidInput("sweep contains non-finite values".into()));
        }
        let ascending = potentials.windows(2).all(|w| w[0] < w[1]);
        let descending = potentials.windows(2).all(|w| w[0] > w[1]);
        if !ascending && !descending {
            return Err(ScanError::InvalidInput(
                "potentials are not strictly monotonic".into(),
            ));
        }
        Ok(())
    }
}
