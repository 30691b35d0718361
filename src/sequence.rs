//! Hand-written scan sequences for bench runs without the handshake lines.
//!
//! ```text
//! Repeat 1      # run the steps twice
//! (4, 2)        # switch to chip 4, working electrode 2
//! full          # calibration sweep; required before `partial` on that chip
//! partial
//! rest: 100     # seconds
//! ```
//!
//! Windows are kept per chip, so a `partial` only follows a `full` on the
//! same chip. Older sequence files that reuse the last full scan's peak on
//! another chip are rejected at parse time.
use log::info;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::drivers::{Instrument, ScanError};
use crate::scanner::ScanDriver;
use crate::shutdown::Shutdown;
use crate::teensy::ElectrodeSelector;
use crate::tracker::{BaselinePeakCache, NUM_CHIPS, WE_PER_CHIP};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SequenceStep {
    /// 1-based chip and electrode, as the controller numbers them.
    Select { chip: usize, electrode: usize },
    Full,
    Partial,
    Rest(Duration),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sequence {
    /// Extra passes after the first one.
    pub repeat: usize,
    /// Steps with their 1-based line numbers.
    pub steps: Vec<(usize, SequenceStep)>,
}

impl Sequence {
    pub fn load(path: &Path) -> Result<Self, ScanError> {
        Self::parse(&fs::read_to_string(path)?)
    }

    pub fn parse(text: &str) -> Result<Self, ScanError> {
        let mut repeat = 0;
        let mut steps = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }
            let err = |reason: String| ScanError::Sequence {
                line: line_no,
                reason,
            };
            let lower = line.to_ascii_lowercase();
            if let Some(count) = lower.strip_prefix("repeat") {
                if !steps.is_empty() {
                    return Err(err("Repeat must come before any step".into()));
                }
                repeat = count
                    .trim()
                    .parse()
                    .map_err(|_| err(format!("bad repeat count '{}'", count.trim())))?;
            } else if let Some(pair) = line.strip_prefix('(') {
                let pair = pair
                    .strip_suffix(')')
                    .ok_or_else(|| err(format!("unterminated selection '{line}'")))?;
                let numbers: Vec<usize> = pair
                    .split(',')
                    .map(|n| n.trim().parse())
                    .collect::<Result<_, _>>()
                    .map_err(|_| err(format!("expected (chip, we), got '{line}'")))?;
                let &[chip, electrode] = numbers.as_slice() else {
                    return Err(err(format!("expected (chip, we), got '{line}'")));
                };
                if !(1..=NUM_CHIPS).contains(&chip) || !(1..=WE_PER_CHIP).contains(&electrode) {
                    return Err(err(format!(
                        "chip must be 1..={NUM_CHIPS} and we 1..={WE_PER_CHIP}, got ({chip}, {electrode})"
                    )));
                }
                steps.push((line_no, SequenceStep::Select { chip, electrode }));
            } else if lower == "full" {
                steps.push((line_no, SequenceStep::Full));
            } else if lower == "partial" {
                steps.push((line_no, SequenceStep::Partial));
            } else if let Some(secs) = lower.strip_prefix("rest:") {
                let secs: f64 = secs
                    .trim()
                    .parse()
                    .map_err(|_| err(format!("bad rest duration '{}'", secs.trim())))?;
                if !(secs.is_finite() && secs >= 0.0) {
                    return Err(err(format!("bad rest duration '{secs}'")));
                }
                steps.push((line_no, SequenceStep::Rest(Duration::from_secs_f64(secs))));
            } else {
                return Err(err(format!("unknown step '{line}'")));
            }
        }
        let sequence = Self { repeat, steps };
        sequence.check_order()?;
        Ok(sequence)
    }

    /// Scans need a selected chip, and `partial` needs an earlier `full` on that chip.
    fn check_order(&self) -> Result<(), ScanError> {
        let mut selected = None;
        let mut calibrated = [false; NUM_CHIPS];
        for &(line, step) in &self.steps {
            match step {
                SequenceStep::Select { chip, .. } => selected = Some(chip - 1),
                SequenceStep::Full | SequenceStep::Partial => {
                    let chip = selected.ok_or_else(|| ScanError::Sequence {
                        line,
                        reason: "scan before any (chip, we) selection".into(),
                    })?;
                    if step == SequenceStep::Full {
                        calibrated[chip] = true;
                    } else if !calibrated[chip] {
                        return Err(ScanError::Sequence {
                            line,
                            reason: format!("partial on chip {} before any full scan", chip + 1),
                        });
                    }
                }
                SequenceStep::Rest(_) => {}
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SequenceSummary {
    pub passes: usize,
    pub full_scans: usize,
    pub partial_scans: usize,
    pub switches: usize,
    pub interrupted: bool,
}

/// Runs every pass of `sequence`; rests are cut short by shutdown.
pub fn run_sequence<I: Instrument, S: ElectrodeSelector>(
    sequence: &Sequence,
    driver: &mut ScanDriver<I>,
    selector: &mut S,
    shutdown: &Shutdown,
) -> Result<SequenceSummary, ScanError> {
    let mut cache = BaselinePeakCache::default();
    let mut summary = SequenceSummary::default();
    let mut chip = 0;
    let mut label = 0;
    for pass in 0..=sequence.repeat {
        info!("sequence pass {}/{}", pass + 1, sequence.repeat + 1);
        for &(_, step) in &sequence.steps {
            if shutdown.is_triggered() {
                summary.interrupted = true;
                return Ok(summary);
            }
            match step {
                SequenceStep::Select {
                    chip: selected,
                    electrode,
                } => {
                    let reply = selector.select(selected, electrode)?;
                    info!("switched to chip {selected} WE {electrode}: {reply}");
                    chip = selected - 1;
                    summary.switches += 1;
                }
                SequenceStep::Full => {
                    driver.calibrate(label, chip, &mut cache)?;
                    label += 1;
                    summary.full_scans += 1;
                }
                SequenceStep::Partial => {
                    driver.partial(label, chip, &cache)?;
                    label += 1;
                    summary.partial_scans += 1;
                }
                SequenceStep::Rest(duration) => {
                    info!("resting {} s", duration.as_secs_f64());
                    if shutdown.wait(duration) {
                        summary.interrupted = true;
                        return Ok(summary);
                    }
                }
            }
        }
        summary.passes += 1;
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::instrument::tests::ManualInstrument;
    use crate::scanner::tests::{responder, scripts, CALIBRATION};
    use crate::teensy::ManualSelector;

    #[test]
    fn parses_steps_comments_and_repeat() {
        let sequence = Sequence::parse(
            "Repeat 1 # twice\n(4,5)\n\n(4, 2)\nfull\npartial # narrow\nrest: 1.5\n",
        );
        assert!(matches!(sequence, Err(ScanError::Sequence { line: 2, .. })));
        let sequence =
            Sequence::parse("Repeat 1 # twice\n(4, 2)\nFULL\npartial # narrow\nrest: 1.5\n")
                .unwrap();
        assert_eq!(sequence.repeat, 1);
        assert_eq!(
            sequence.steps,
            vec![
                (2, SequenceStep::Select { chip: 4, electrode: 2 }),
                (3, SequenceStep::Full),
                (4, SequenceStep::Partial),
                (5, SequenceStep::Rest(Duration::from_millis(1500))),
            ]
        );
    }

    #[test]
    fn partial_needs_full_on_the_same_chip() {
        let err = Sequence::parse("(1, 1)\nfull\n(2, 1)\npartial\n").unwrap_err();
        assert!(matches!(err, ScanError::Sequence { line: 4, .. }));
        assert!(Sequence::parse("(1, 1)\nfull\n(1, 3)\npartial\n").is_ok());
        assert!(matches!(
            Sequence::parse("full\n"),
            Err(ScanError::Sequence { line: 1, .. })
        ));
    }

    #[test]
    fn rejects_unknown_steps() {
        assert!(matches!(
            Sequence::parse("(1, 1)\nsweep\n"),
            Err(ScanError::Sequence { line: 2, .. })
        ));
        assert!(Sequence::parse("rest: soon\n").is_err());
        assert!(Sequence::parse("(1 2)\n").is_err());
    }

    #[test]
    fn runs_each_pass_in_order() {
        let sequence =
            Sequence::parse("Repeat 1\n(3, 1)\nfull\npartial\n(3, 2)\npartial\nrest: 0\n")
                .unwrap();
        let mut driver = ScanDriver::new(ManualInstrument::new(responder), scripts()).unwrap();
        let mut selector = ManualSelector::new(|_, _| Some("OK".to_string()));
        let summary =
            run_sequence(&sequence, &mut driver, &mut selector, &Shutdown::new()).unwrap();
        assert_eq!(
            summary,
            SequenceSummary {
                passes: 2,
                full_scans: 2,
                partial_scans: 4,
                switches: 4,
                interrupted: false,
            }
        );
        assert_eq!(selector.commands, vec![(3, 1), (3, 2), (3, 1), (3, 2)]);
        let sent = &driver.instrument().sent;
        assert_eq!(sent.iter().filter(|s| s.as_str() == CALIBRATION).count(), 2);
        assert_eq!(sent.len(), 2 + 4 * 4);
    }

    #[test]
    fn failed_switch_stops_the_sequence() {
        let sequence = Sequence::parse("(3, 1)\nfull\n").unwrap();
        let mut driver = ScanDriver::new(ManualInstrument::new(responder), scripts()).unwrap();
        let mut selector = ManualSelector::new(|_, _| Some("ERROR bad chip".to_string()));
        assert!(matches!(
            run_sequence(&sequence, &mut driver, &mut selector, &Shutdown::new()),
            Err(ScanError::Switch(_))
        ));
        assert!(driver.instrument().sent.is_empty());
    }
}
