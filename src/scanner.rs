use anyhow::{Context, Result};
use log::{info, warn};
use std::fs;

use crate::config::ScriptConfig;
use crate::drivers::{
    Column, Curve, Instrument, PeakBaseline, PeakBaselineDetector, ScanError, ScanWindow,
};
use crate::recorder::ScanRecorder;
use crate::tracker::{BaselinePeak, BaselinePeakCache, Position};

/// MethodSCRIPT sources read once at start-up.
#[derive(Clone, Debug)]
pub struct ScriptSet {
    pub calibration: String,
    /// `(scan name, template)` in execution order.
    pub partials: Vec<(String, String)>,
}

impl ScriptSet {
    pub fn load(config: &ScriptConfig) -> Result<Self> {
        let calibration = fs::read_to_string(&config.calibration).with_context(|| {
            format!("failed to read calibration script {}", config.calibration.display())
        })?;
        let partials = config
            .partial_scans
            .iter()
            .map(|scan| {
                let path = config.template_path(scan);
                fs::read_to_string(&path)
                    .with_context(|| format!("failed to read template {}", path.display()))
                    .map(|text| (scan.clone(), text))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            calibration,
            partials,
        })
    }
}

/// Full sweep of one calibration, with the filtered current appended as a column.
#[derive(Clone, Debug)]
pub struct Calibration {
    pub chip: usize,
    pub curve: Curve,
    pub raw: Vec<String>,
    /// `None` when no peak was found and the cache kept its previous entry.
    pub detected: Option<PeakBaseline>,
}

/// The partial scans of one electrode, individually and combined column-wise.
#[derive(Clone, Debug)]
pub struct PartialScans {
    pub window: ScanWindow,
    pub scans: Vec<Curve>,
    pub combined: Curve,
    pub raw: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct ScanOutcome {
    pub position: Position,
    pub calibration: Option<Calibration>,
    pub partial: PartialScans,
}

/// Runs the scans due at one electrode position.
pub struct ScanDriver<I: Instrument> {
    instrument: I,
    detector: PeakBaselineDetector,
    scripts: ScriptSet,
    recorder: Option<ScanRecorder>,
}

impl<I: Instrument> ScanDriver<I> {
    pub fn new(instrument: I, scripts: ScriptSet) -> Result<Self, ScanError> {
        Ok(Self {
            instrument,
            detector: PeakBaselineDetector::new()?,
            scripts,
            recorder: None,
        })
    }

    pub fn with_recorder(mut self, recorder: ScanRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn instrument(&self) -> &I {
        &self.instrument
    }

    pub fn run(
        &mut self,
        position: Position,
        cache: &mut BaselinePeakCache,
    ) -> Result<ScanOutcome, ScanError> {
        info!(
            "Starting partial SWV scan {}(cycle {}, counter {}, chip {}, WE {}).",
            if position.calibration_due { "including calibration scan " } else { "" },
            position.cycle(),
            position.counter,
            position.chip,
            position.electrode
        );
        let calibration = if position.calibration_due {
            Some(self.calibrate(position.counter, position.chip, cache)?)
        } else {
            None
        };
        let partial = self.partial(position.counter, position.chip, cache)?;
        Ok(ScanOutcome {
            position,
            calibration,
            partial,
        })
    }

    /// Full sweep, peak search and cache update for `chip`. `label` numbers the output files.
    pub fn calibrate(
        &mut self,
        label: usize,
        chip: usize,
        cache: &mut BaselinePeakCache,
    ) -> Result<Calibration, ScanError> {
        let run = self.instrument.execute(&self.scripts.calibration)?;
        let potentials = run.curve.potentials()?;
        let filtered = self.detector.filter(&potentials, &run.curve.currents()?)?;
        let detected = match self.detector.locate(&potentials, &filtered) {
            Ok(found) => {
                info!(
                    "chip {chip}: peak {:.4} V, baseline {:.4} V{}",
                    found.peak_v,
                    found.baseline_v,
                    if found.is_ambiguous() { " (ambiguous)" } else { "" }
                );
                cache.set(
                    chip,
                    BaselinePeak {
                        peak_v: found.peak_v,
                        baseline_v: found.baseline_v,
                    },
                );
                Some(found)
            }
            Err(e) if e.is_recoverable() => {
                warn!(
                    "chip {chip}: {e}, recalibrate; keeping {:?}",
                    cache.get(chip)
                );
                None
            }
            Err(e) => return Err(e),
        };
        let mut curve = run.curve;
        curve.tag_column(1, "raw");
        let curve = curve.with_column(Column::new("WE current filtered", "A"), &filtered)?;
        let calibration = Calibration {
            chip,
            curve,
            raw: run.raw,
            detected,
        };
        if let Some(recorder) = &self.recorder {
            if let Err(e) = recorder.record_calibration(label, &calibration) {
                warn!("failed to save calibration scan {label}: {e}");
            }
        }
        Ok(calibration)
    }

    /// Every partial scan around the cached entry of `chip`, in configured order.
    pub fn partial(
        &mut self,
        label: usize,
        chip: usize,
        cache: &BaselinePeakCache,
    ) -> Result<PartialScans, ScanError> {
        let entry = cache.get(chip);
        if !entry.is_calibrated() {
            warn!("chip {chip} has no calibration yet, scanning around 0 V");
        }
        let window = ScanWindow::from_entry(entry);
        let mut scans = Vec::with_capacity(self.scripts.partials.len());
        let mut raw = Vec::new();
        let mut combined: Option<Curve> = None;
        for (name, template) in &self.scripts.partials {
            let mut run = self.instrument.execute(&window.apply(template))?;
            run.curve.tag_column(1, name);
            combined = Some(match combined {
                None => run.curve.clone(),
                Some(previous) => {
                    if previous.len() != run.curve.len() {
                        warn!(
                            "{name} returned {} points, previous scans {}; padding with NaN",
                            run.curve.len(),
                            previous.len()
                        );
                    }
                    previous.append_scan(&run.curve)
                }
            });
            scans.push(run.curve);
            raw.extend(run.raw);
        }
        let combined = combined
            .ok_or_else(|| ScanError::InvalidInput("no partial scans configured".into()))?;
        let partial = PartialScans {
            window,
            scans,
            combined,
            raw,
        };
        if let Some(recorder) = &self.recorder {
            if let Err(e) = recorder.record_partial(label, &partial) {
                warn!("failed to save partial scans {label}: {e}");
            }
        }
        Ok(partial)
    }
}
