// src/engine.rs
use chrono::Local;
use log::{debug, info, warn};
use std::time::Instant;

use crate::config::TimingConfig;
use crate::drivers::{Instrument, ScanError};
use crate::gpio::SwitchLines;
use crate::scanner::ScanDriver;
use crate::shutdown::Shutdown;
use crate::tracker::{
    locate, BaselinePeakCache, StateStore, Step, TrackerSnapshot, SCANS_PER_CYCLE, WE_PER_CHIP,
};
use crate::types::{CycleState, Edge, LineEvent, SwitchLine};

/// Everything the control loop mutates between scans.
#[derive(Clone, Debug, Default)]
pub struct OrchestratorState {
    pub counter: usize,
    pub cache: BaselinePeakCache,
    pub cycle: CycleState,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunEnd {
    /// Every electrode of every cycle has been scanned.
    Complete,
    Shutdown,
}

/// Handshake state machine between the potentiostat and the switching controller.
pub struct Orchestrator<I: Instrument, L: SwitchLines> {
    state: OrchestratorState,
    driver: ScanDriver<I>,
    lines: L,
    store: Option<StateStore>,
    timing: TimingConfig,
    shutdown: Shutdown,
    cycle_started: Instant,
}

impl<I: Instrument, L: SwitchLines> Orchestrator<I, L> {
    pub fn new(driver: ScanDriver<I>, lines: L, timing: TimingConfig, shutdown: Shutdown) -> Self {
        Self {
            state: OrchestratorState::default(),
            driver,
            lines,
            store: None,
            timing,
            shutdown,
            cycle_started: Instant::now(),
        }
    }

    /// Saves counter and cache to `store` after every scan.
    pub fn with_store(mut self, store: StateStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn restore(&mut self, snapshot: TrackerSnapshot) {
        self.state.counter = snapshot.counter;
        self.state.cache = snapshot.cache;
        self.state.cycle = CycleState::Idle;
    }

    pub fn state(&self) -> &OrchestratorState {
        &self.state
    }

    pub fn driver(&self) -> &ScanDriver<I> {
        &self.driver
    }

    #[cfg(test)]
    pub fn lines(&self) -> &L {
        &self.lines
    }

    pub fn run(&mut self) -> Result<RunEnd, ScanError> {
        // 1. 启动时先扫一次当前电极
        if let Some(end) = self.advance()? {
            return Ok(end);
        }
        // 2. 等待控制器的确认边沿
        loop {
            if self.shutdown.is_triggered() {
                info!("shutdown requested at counter {}", self.state.counter);
                return Ok(RunEnd::Shutdown);
            }
            let events = self.lines.wait_events(self.timing.event_timeout())?;
            for event in events {
                if let Some(end) = self.handle(event)? {
                    return Ok(end);
                }
            }
        }
    }

    fn handle(&mut self, event: LineEvent) -> Result<Option<RunEnd>, ScanError> {
        match (event.line, event.edge) {
            (_, Edge::Falling) => Ok(None),
            (line @ SwitchLine::ElectrodeChanged, Edge::Rising)
            | (line @ SwitchLine::ChipChanged, Edge::Rising) => {
                self.acknowledge(line);
                self.advance()
            }
            (SwitchLine::CycleComplete, Edge::Rising) => {
                self.acknowledge(SwitchLine::CycleComplete);
                if locate(self.state.counter) == Step::Complete {
                    info!("Maximum number of cycles reached.");
                    return Ok(Some(RunEnd::Complete));
                }
                if !self.settle() {
                    return Ok(Some(RunEnd::Shutdown));
                }
                self.advance()
            }
        }
    }

    fn acknowledge(&mut self, line: SwitchLine) {
        match self.state.cycle.expected_line() {
            Some(expected) if expected == line => info!("Controller acknowledged {line}."),
            expected => warn!(
                "received {line} acknowledgement while waiting for {expected:?}, continuing"
            ),
        }
        self.state.cycle = CycleState::Idle;
    }

    /// Scans the electrode the counter points at, or reports the campaign complete.
    fn advance(&mut self) -> Result<Option<RunEnd>, ScanError> {
        let position = match locate(self.state.counter) {
            Step::Complete => return Ok(Some(RunEnd::Complete)),
            Step::Scan(position) => position,
        };
        let outcome = self.driver.run(position, &mut self.state.cache)?;
        if let Some(calibration) = outcome.calibration.as_ref().filter(|c| c.detected.is_none()) {
            warn!("chip {} scanned with its previous window", calibration.chip);
        }
        let window = &outcome.partial.window;
        info!(
            "counter {}: {} partial scan(s), baseline {}..{} mV, peak {}..{} mV",
            outcome.position.counter,
            outcome.partial.scans.len(),
            window.baseline_begin_mv,
            window.baseline_end_mv,
            window.peak_begin_mv,
            window.peak_end_mv
        );
        self.state.counter += 1;
        self.persist();
        self.lines.pulse_scan_complete()?;
        self.state.cycle = awaiting_after(self.state.counter);
        debug!(
            "counter {} done, now {:?}",
            self.state.counter, self.state.cycle
        );
        Ok(None)
    }

    fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let snapshot = TrackerSnapshot {
            counter: self.state.counter,
            cache: self.state.cache.clone(),
            device_type: Some(self.driver.instrument().device_type().to_string()),
            updated_at: Some(Local::now().to_rfc3339()),
        };
        if let Err(e) = store.save(&snapshot) {
            warn!("failed to save {}: {e}", store.path().display());
        }
    }

    /// Waits until the settle time has passed since the previous cycle started.
    /// Returns `false` when shutdown interrupted the wait.
    fn settle(&mut self) -> bool {
        let deadline = self.cycle_started + self.timing.settle();
        loop {
            let now = Instant::now();
            if now >= deadline {
                self.cycle_started = now;
                return true;
            }
            let remaining = deadline - now;
            info!("settling, {} s left", remaining.as_secs());
            if self.shutdown.wait(remaining.min(self.timing.settle_poll())) {
                return false;
            }
        }
    }
}

/// Which acknowledgement the controller sends once `counter` scans are done.
pub(crate) fn awaiting_after(counter: usize) -> CycleState {
    if counter % SCANS_PER_CYCLE == 0 {
        CycleState::AwaitingCycleAck
    } else if counter % WE_PER_CHIP == 0 {
        CycleState::AwaitingChipAck
    } else {
        CycleState::AwaitingElectrodeAck
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::instrument::tests::ManualInstrument;
    use crate::gpio::tests::ManualLines;
    use crate::scanner::tests::{responder, scripts, CALIBRATION};
    use crate::tracker::{BaselinePeak, MAX_SCANS};
    use std::thread;
    use std::time::Duration;

    type TestOrchestrator = Orchestrator<ManualInstrument<fn(&str) -> Vec<String>>, ManualLines>;

    fn timing(settle_minutes: u64) -> TimingConfig {
        TimingConfig {
            settle_minutes,
            settle_poll_secs: 1,
            event_timeout_secs: 1,
        }
    }

    fn orchestrator(
        script: Vec<Vec<LineEvent>>,
        settle_minutes: u64,
    ) -> (TestOrchestrator, Shutdown) {
        let shutdown = Shutdown::new();
        let instrument = ManualInstrument::new(responder as fn(&str) -> Vec<String>);
        let driver = ScanDriver::new(instrument, scripts()).unwrap();
        let lines = ManualLines::new(script).stop_when_drained(shutdown.clone());
        let orchestrator =
            Orchestrator::new(driver, lines, timing(settle_minutes), shutdown.clone());
        (orchestrator, shutdown)
    }

    fn rising(line: SwitchLine) -> Vec<LineEvent> {
        vec![LineEvent::rising(line)]
    }

    #[test]
    fn first_chip_calibrates_once_and_reuses_the_window() {
        let script = vec![rising(SwitchLine::ElectrodeChanged); 3];
        let (mut orch, _) = orchestrator(script, 0);
        assert_eq!(orch.run().unwrap(), RunEnd::Shutdown);
        assert_eq!(orch.state().counter, 4);
        assert_eq!(orch.state().cycle, CycleState::AwaitingChipAck);
        assert_eq!(orch.lines().pulses, 4);
        let sent = &orch.driver().instrument().sent;
        assert_eq!(sent.iter().filter(|s| s.as_str() == CALIBRATION).count(), 1);
        assert_eq!(sent[0], CALIBRATION);
        // 4 partial scripts per electrode, byte-identical across electrodes 0..3
        let partials: Vec<&String> = sent.iter().filter(|s| s.as_str() != CALIBRATION).collect();
        assert_eq!(partials.len(), 16);
        for electrode in 1..4 {
            assert_eq!(partials[0..4], partials[electrode * 4..electrode * 4 + 4]);
        }
        let entry = orch.state().cache.get(0);
        assert!((entry.peak_v + 0.2).abs() < 0.003);
        assert!(!orch.state().cache.get(1).is_calibrated());
    }

    #[test]
    fn falling_edges_are_ignored_and_wrong_line_still_scans() {
        let script = vec![vec![
            LineEvent::falling(SwitchLine::ElectrodeChanged),
            LineEvent::rising(SwitchLine::ChipChanged),
        ]];
        let (mut orch, _) = orchestrator(script, 0);
        assert_eq!(orch.run().unwrap(), RunEnd::Shutdown);
        assert_eq!(orch.state().counter, 2);
        assert_eq!(orch.lines().pulses, 2);
    }

    #[test]
    fn campaign_completes_at_max_scans() {
        let (mut orch, _) = orchestrator(vec![rising(SwitchLine::CycleComplete)], 0);
        orch.restore(TrackerSnapshot {
            counter: MAX_SCANS - 1,
            ..Default::default()
        });
        assert_eq!(orch.run().unwrap(), RunEnd::Complete);
        assert_eq!(orch.state().counter, MAX_SCANS);
        // only the last electrode's partial scans, nothing after the final acknowledgement
        assert_eq!(orch.driver().instrument().sent.len(), 4);
        assert_eq!(orch.lines().pulses, 1);
    }

    #[test]
    fn restored_complete_campaign_does_not_scan() {
        let (mut orch, _) = orchestrator(Vec::new(), 0);
        orch.restore(TrackerSnapshot {
            counter: MAX_SCANS,
            ..Default::default()
        });
        assert_eq!(orch.run().unwrap(), RunEnd::Complete);
        assert!(orch.driver().instrument().sent.is_empty());
    }

    #[test]
    fn cycle_ack_waits_for_settle_and_shutdown_interrupts_it() {
        let (mut orch, shutdown) = orchestrator(vec![rising(SwitchLine::CycleComplete)], 30);
        orch.restore(TrackerSnapshot {
            counter: SCANS_PER_CYCLE - 1,
            ..Default::default()
        });
        let remote = shutdown.clone();
        let trigger = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            remote.trigger();
        });
        let start = Instant::now();
        assert_eq!(orch.run().unwrap(), RunEnd::Shutdown);
        assert!(start.elapsed() < Duration::from_secs(10));
        // bootstrap scan only; the next cycle never started
        assert_eq!(orch.state().counter, SCANS_PER_CYCLE);
        assert_eq!(orch.driver().instrument().sent.len(), 4);
        trigger.join().unwrap();
    }

    #[test]
    fn new_cycle_starts_after_settle() {
        let (mut orch, _) = orchestrator(vec![rising(SwitchLine::CycleComplete)], 0);
        orch.restore(TrackerSnapshot {
            counter: SCANS_PER_CYCLE - 1,
            ..Default::default()
        });
        assert_eq!(orch.run().unwrap(), RunEnd::Shutdown);
        assert_eq!(orch.state().counter, SCANS_PER_CYCLE + 1);
        assert_eq!(orch.state().cycle, CycleState::AwaitingElectrodeAck);
    }

    #[test]
    fn progress_is_persisted_after_every_scan() {
        let dir = std::env::temp_dir().join(format!("swv-engine-{}", std::process::id()));
        let store = StateStore::new(dir.join("scan_tracker.json"));
        let (orch, _) = orchestrator(vec![rising(SwitchLine::ElectrodeChanged)], 0);
        let mut orch = orch.with_store(store);
        assert_eq!(orch.run().unwrap(), RunEnd::Shutdown);
        let store = StateStore::new(dir.join("scan_tracker.json"));
        let saved = store.load().unwrap().unwrap();
        assert_eq!(saved.counter, 2);
        assert_eq!(saved.device_type.as_deref(), Some("EmStat Pico"));
        assert!(saved.cache.get(0).is_calibrated());

        // a resumed run continues from the saved counter
        let (mut orch, _) = orchestrator(Vec::new(), 0);
        orch.restore(store.starting_point(true).unwrap().unwrap());
        let orch = orch.with_store(store);
        assert_eq!(orch.state().counter, 2);
        assert_ne!(orch.state().cache.get(0), BaselinePeak::default());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn fresh_run_ignores_a_finished_tracker() {
        let dir = std::env::temp_dir().join(format!("swv-fresh-{}", std::process::id()));
        let store = StateStore::new(dir.join("scan_tracker.json"));
        store
            .save(&TrackerSnapshot {
                counter: MAX_SCANS,
                ..Default::default()
            })
            .unwrap();
        let (mut orch, _) = orchestrator(Vec::new(), 0);
        if let Some(snapshot) = store.starting_point(false).unwrap() {
            orch.restore(snapshot);
        }
        let mut orch = orch.with_store(store);
        assert_eq!(orch.state().counter, 0);
        assert_eq!(orch.run().unwrap(), RunEnd::Shutdown);
        assert_eq!(orch.driver().instrument().sent[0], CALIBRATION);
        let saved = StateStore::new(dir.join("scan_tracker.json")).load().unwrap().unwrap();
        assert_eq!(saved.counter, 1);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn expected_acknowledgement_follows_the_counter() {
        assert_eq!(awaiting_after(1), CycleState::AwaitingElectrodeAck);
        assert_eq!(awaiting_after(4), CycleState::AwaitingChipAck);
        assert_eq!(awaiting_after(64), CycleState::AwaitingCycleAck);
        assert_eq!(awaiting_after(65), CycleState::AwaitingElectrodeAck);
    }
}
