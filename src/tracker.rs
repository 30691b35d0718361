use std::fs;
use std::path::{Path, PathBuf};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use crate::drivers::ScanError;
pub const WE_PER_CHIP: usize = 4;
pub const NUM_CHIPS: usize = 16;
/// Full passes over all chips between two calibration passes.
pub const CALIBRATION_PERIOD: usize = 12;
pub const MAX_CYCLES: usize = 336;
pub const SCANS_PER_CYCLE: usize = WE_PER_CHIP * NUM_CHIPS;
pub const MAX_SCANS: usize = MAX_CYCLES * SCANS_PER_CYCLE;
/// Where the electrode counter points inside the campaign.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Position {
    pub counter: usize,
    pub chip: usize,
    pub electrode: usize,
    pub calibration_due: bool,
}
impl Position {
    /// Full passes over the 64 electrodes completed before this scan.
    pub fn cycle(&self) -> usize {
        self.counter / SCANS_PER_CYCLE
    }
}
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Scan(Position),
    Complete,
}
pub fn locate(counter: usize) -> Step {
    if counter >= MAX_SCANS {
        return Step::Complete;
    }
    let electrode = counter % WE_PER_CHIP;
    Step::Scan(Position {
        counter,
        chip: (counter / WE_PER_CHIP) % NUM_CHIPS,
        electrode,
        calibration_due: electrode == 0 && (counter / SCANS_PER_CYCLE) % CALIBRATION_PERIOD == 0,
    })
}
/// Last calibrated peak and left-base voltages of one chip. `(0, 0)` means uncalibrated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BaselinePeak {
    #[serde(rename = "peak")]
    pub peak_v: f64,
    #[serde(rename = "left_baseline")]
    pub baseline_v: f64,
}
impl BaselinePeak {
    pub fn is_calibrated(&self) -> bool {
        *self != BaselinePeak::default()
    }
}
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BaselinePeakCache([BaselinePeak; NUM_CHIPS]);
impl BaselinePeakCache {
    pub fn get(&self, chip: usize) -> BaselinePeak {
        self.0[chip % NUM_CHIPS]
    }
    pub fn set(&mut self, chip: usize, entry: BaselinePeak) {
        self.0[chip % NUM_CHIPS] = entry;
    }
}
/// Persisted campaign progress, compatible in spirit with `scan_tracker.json`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackerSnapshot {
    #[serde(rename = "num_scans")]
    pub counter: usize,
    #[serde(rename = "baseline_peaks", default)]
    pub cache: BaselinePeakCache,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}
pub struct StateStore {
    path: PathBuf,
}
impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
    pub fn path(&self) -> &Path {
        &self.path
    }
    /// `Ok(None)` when no campaign has been recorded yet.
    pub fn load(&self) -> Result<Option<TrackerSnapshot>, ScanError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&self.path)?;
        let snapshot: TrackerSnapshot = serde_json::from_str(&text)?;
        debug!("restored scan tracker at counter {}", snapshot.counter);
        Ok(Some(snapshot))
    }
    /// Snapshot a new run starts from. Only `resume` reads the file: the
    /// switching controller restarts at electrode 0, so a fresh run starts
    /// at counter 0 and overwrites whatever is saved.
    pub fn starting_point(&self, resume: bool) -> Result<Option<TrackerSnapshot>, ScanError> {
        if resume {
            let snapshot = self.load()?;
            match &snapshot {
                Some(s) => info!("resuming from {} at counter {}", self.path.display(), s.counter),
                None => info!("nothing to resume in {}, starting at 0", self.path.display()),
            }
            return Ok(snapshot);
        }
        if self.path.exists() {
            warn!(
                "{} exists but --resume was not given; starting at counter 0 and overwriting it",
                self.path.display()
            );
        }
        Ok(None)
    }
    /// Writes to a sibling file first so a crash never leaves a truncated tracker.
    pub fn save(&self, snapshot: &TrackerSnapshot) -> Result<(), ScanError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(snapshot)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn every_counter_maps_inside_bounds() {
        for c in 0..MAX_SCANS {
            let Step::Scan(pos) = locate(c) else {
                panic!("counter {c} reported complete");
            };
            assert!(pos.chip < NUM_CHIPS);
            assert!(pos.electrode < WE_PER_CHIP);
            assert_eq!(pos.calibration_due, c % 4 == 0 && (c / 64) % 12 == 0, "counter {c}");
        }
    }
    #[test]
    fn walks_chips_then_cycles() {
        let Step::Scan(pos) = locate(4 * 5 + 2) else { panic!() };
        assert_eq!((pos.chip, pos.electrode, pos.calibration_due), (5, 2, false));
        let Step::Scan(pos) = locate(64) else { panic!() };
        assert_eq!((pos.chip, pos.electrode, pos.cycle()), (0, 0, 1));
        assert!(!pos.calibration_due);
        let Step::Scan(pos) = locate(64 * 12 + 8) else { panic!() };
        assert_eq!(pos.chip, 2);
        assert!(pos.calibration_due);
    }
    #[test]
    fn campaign_ends_at_max_scans() {
        assert!(matches!(locate(MAX_SCANS - 1), Step::Scan(_)));
        assert_eq!(locate(MAX_SCANS), Step::Complete);
        assert_eq!(locate(MAX_SCANS + 7), Step::Complete);
        assert_eq!(MAX_SCANS, 21_504);
    }
    #[test]
    fn cache_defaults_to_uncalibrated() {
        let mut cache = BaselinePeakCache::default();
        assert!(!cache.get(3).is_calibrated());
        cache.set(
            3,
            BaselinePeak {
                peak_v: -0.2,
                baseline_v: -0.27,
            },
        );
        assert!(cache.get(3).is_calibrated());
        assert!(!cache.get(4).is_calibrated());
    }
    #[test]
    fn store_round_trips_and_reports_missing_file() {
        let dir = std::env::temp_dir().join(format!("swv-tracker-{}", std::process::id()));
        let store = StateStore::new(dir.join("scan_tracker.json"));
        assert!(store.load().unwrap().is_none());
        let mut snapshot = TrackerSnapshot {
            counter: 130,
            ..Default::default()
        };
        snapshot.cache.set(
            0,
            BaselinePeak {
                peak_v: -0.21,
                baseline_v: -0.3,
            },
        );
        store.save(&snapshot).unwrap();
        let text = fs::read_to_string(store.path()).unwrap();
        assert!(text.contains("\"num_scans\": 130"));
        assert!(text.contains("\"left_baseline\": -0.3"));
        assert_eq!(store.load().unwrap(), Some(snapshot));
        fs::remove_dir_all(&dir).unwrap();
    }
    #[test]
    fn saved_tracker_is_only_used_when_resuming() {
        let dir = std::env::temp_dir().join(format!("swv-resume-{}", std::process::id()));
        let store = StateStore::new(dir.join("scan_tracker.json"));
        assert!(store.starting_point(true).unwrap().is_none());
        let snapshot = TrackerSnapshot {
            counter: 21_504,
            ..Default::default()
        };
        store.save(&snapshot).unwrap();
        assert!(store.starting_point(false).unwrap().is_none());
        assert_eq!(store.starting_point(true).unwrap(), Some(snapshot));
        fs::remove_dir_all(&dir).unwrap();
    }
}
