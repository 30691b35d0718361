// src/simulator.rs
// 没有硬件时的替身：假的电位仪和假的切换控制器
use log::{debug, info};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::VecDeque;
use std::time::Duration;

use crate::config::SimulationConfig;
use crate::drivers::mscript::{format_package, parse_si_value, APPLIED_POTENTIAL, WE_CURRENT};
use crate::drivers::{DeviceType, Instrument, ScanError};
use crate::engine::awaiting_after;
use crate::gpio::SwitchLines;
use crate::shutdown::Shutdown;
use crate::types::LineEvent;

const MAX_POINTS: usize = 20_000;
const PEAK_CENTER_V: f64 = -0.2;
const PEAK_WIDTH_V: f64 = 0.025;
const PEAK_DEPTH_A: f64 = 2e-6;

/// Answers every `meas_loop_swv` of a script with a synthetic reduction peak.
pub struct SimulatedInstrument {
    device: DeviceType,
    rng: StdRng,
    noise: f64,
    pending: Option<Vec<String>>,
}

impl SimulatedInstrument {
    pub fn new(config: &SimulationConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            device: DeviceType::EmStatPico,
            rng,
            noise: config.noise_amps.abs(),
            pending: None,
        }
    }

    fn current(&mut self, v: f64, center: f64) -> f64 {
        let peak = -PEAK_DEPTH_A * (-0.5 * ((v - center) / PEAK_WIDTH_V).powi(2)).exp();
        let noise = if self.noise > 0.0 {
            self.rng.gen_range(-self.noise..self.noise)
        } else {
            0.0
        };
        -2e-7 + 1e-7 * v + peak + noise
    }

    fn answer(&mut self, script: &str) -> Vec<String> {
        let mut lines = vec!["e".to_owned()];
        // 每次扫描峰位置有几毫伏的漂移
        let center = PEAK_CENTER_V + self.rng.gen_range(-0.005..0.005);
        for (idx, line) in script.lines().enumerate() {
            let line = line.trim();
            if !line.starts_with("meas_loop_swv") {
                continue;
            }
            let Some((begin, end, step)) = sweep_range(line) else {
                // 固件遇到无法解析的参数时的回复
                lines.push(format!("!0004: Line {}", idx + 1));
                return lines;
            };
            lines.push("M0000".to_owned());
            let count = (((end - begin) / step).abs().round() as usize + 1).min(MAX_POINTS);
            let direction = if end >= begin { 1.0 } else { -1.0 };
            for k in 0..count {
                let v = begin + direction * step * k as f64;
                let i = self.current(v, center);
                lines.push(format_package(&[(APPLIED_POTENTIAL, v), (WE_CURRENT, i)]));
            }
            lines.push("*".to_owned());
        }
        lines.push(String::new());
        lines
    }
}

/// `meas_loop_swv p c f g <begin> <end> <step> <amplitude> <frequency>`
fn sweep_range(line: &str) -> Option<(f64, f64, f64)> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let begin = parse_si_value(tokens.get(5)?)?;
    let end = parse_si_value(tokens.get(6)?)?;
    let step = parse_si_value(tokens.get(7)?)?.abs();
    (step > 0.0).then_some((begin, end, step))
}

impl Instrument for SimulatedInstrument {
    fn device_type(&self) -> &DeviceType {
        &self.device
    }

    fn send_script(&mut self, script: &str) -> Result<(), ScanError> {
        self.pending = Some(self.answer(script));
        Ok(())
    }

    fn read_results(&mut self) -> Result<Vec<String>, ScanError> {
        self.pending
            .take()
            .ok_or_else(|| ScanError::InstrumentCommunication("no script pending".into()))
    }
}

/// Switching controller stand-in: acknowledges every scan-complete pulse
/// with the line a real controller would raise at that counter.
pub struct SimulatedLines {
    counter: usize,
    ack_delay: Duration,
    ready: VecDeque<LineEvent>,
    shutdown: Shutdown,
}

impl SimulatedLines {
    /// `counter` is the number of scans already done when the run starts.
    pub fn new(counter: usize, config: &SimulationConfig, shutdown: Shutdown) -> Self {
        info!("simulated controller starting at counter {counter}");
        Self {
            counter,
            ack_delay: Duration::from_millis(config.ack_delay_ms),
            ready: VecDeque::new(),
            shutdown,
        }
    }
}

impl SwitchLines for SimulatedLines {
    fn wait_events(&mut self, timeout: Duration) -> Result<Vec<LineEvent>, ScanError> {
        if self.ready.is_empty() {
            self.shutdown.wait(timeout);
            return Ok(Vec::new());
        }
        self.shutdown.wait(self.ack_delay);
        Ok(self.ready.drain(..).collect())
    }

    fn pulse_scan_complete(&mut self) -> Result<(), ScanError> {
        self.counter += 1;
        if let Some(line) = awaiting_after(self.counter).expected_line() {
            debug!("simulated controller raises {line}");
            self.ready.push_back(LineEvent::rising(line));
            self.ready.push_back(LineEvent::falling(line));
        }
        Ok(())
    }
}
