// src/config.rs
use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::ConnectionMode;

pub const DEFAULT_CONFIG_PATH: &str = "orchestrator.json";

// 运行参数，全部带默认值，配置文件里只写需要改的字段即可
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub mode: ConnectionMode,
    pub device: DeviceConfig,
    pub scripts: ScriptConfig,
    pub output_dir: PathBuf,
    /// Counter and cache are saved here after every scan; `--resume` restores them.
    pub state_file: PathBuf,
    pub gpio: GpioConfig,
    pub teensy: TeensyConfig,
    pub timing: TimingConfig,
    pub simulation: SimulationConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            mode: ConnectionMode::Simulation,
            device: DeviceConfig::default(),
            scripts: ScriptConfig::default(),
            output_dir: PathBuf::from("output"),
            state_file: PathBuf::from("scan_tracker.json"),
            gpio: GpioConfig::default(),
            teensy: TeensyConfig::default(),
            timing: TimingConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Reads the JSON file; a missing file means "all defaults".
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("config {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        Ok(config)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// `None` = auto detect.
    pub port: Option<String>,
    pub baud_rate: u32,
    /// Longest a single script may take before the session gives up.
    pub scan_timeout_secs: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 230_400,
            scan_timeout_secs: 600,
        }
    }
}

impl DeviceConfig {
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    pub calibration: PathBuf,
    /// Templates live at `<partial_prefix><scan>_template.mscr`.
    pub partial_prefix: String,
    pub partial_scans: Vec<String>,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            calibration: PathBuf::from("methodscripts/swv_calibration.mscr"),
            partial_prefix: "methodscripts/partial_swv_".to_owned(),
            partial_scans: ["baseline_5hz", "baseline_100hz", "peak_5hz", "peak_100hz"]
                .map(String::from)
                .to_vec(),
        }
    }
}

impl ScriptConfig {
    pub fn template_path(&self, scan: &str) -> PathBuf {
        PathBuf::from(format!("{}{}_template.mscr", self.partial_prefix, scan))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GpioConfig {
    pub chip: String,
    pub consumer: String,
    pub scan_complete_pin: u32,
    pub electrode_ack_pin: u32,
    pub chip_ack_pin: u32,
    pub cycle_ack_pin: u32,
    pub pulse_ms: u64,
}

impl Default for GpioConfig {
    fn default() -> Self {
        // 树莓派 5 上的引脚编号
        Self {
            chip: "gpiochip4".to_owned(),
            consumer: "RPi-Teensy".to_owned(),
            scan_complete_pin: 11,
            electrode_ack_pin: 25,
            chip_ack_pin: 8,
            cycle_ack_pin: 7,
            pulse_ms: 1000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TeensyConfig {
    pub port: Option<String>,
    pub baud_rate: u32,
    pub reply_timeout_ms: u64,
    /// The board resets when the port opens.
    pub boot_delay_ms: u64,
}

impl Default for TeensyConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 115_200,
            reply_timeout_ms: 1000,
            boot_delay_ms: 2000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub settle_minutes: u64,
    pub settle_poll_secs: u64,
    pub event_timeout_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            settle_minutes: 30,
            settle_poll_secs: 60,
            event_timeout_secs: 10,
        }
    }
}

impl TimingConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_minutes * 60)
    }
    pub fn settle_poll(&self) -> Duration {
        Duration::from_secs(self.settle_poll_secs.max(1))
    }
    pub fn event_timeout(&self) -> Duration {
        Duration::from_secs(self.event_timeout_secs.max(1))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Delay before the simulated controller acknowledges a pulse.
    pub ack_delay_ms: u64,
    /// Amplitude of the uniform synthetic current noise, in amps.
    pub noise_amps: f64,
    /// Fixed seed for reproducible dry runs.
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            ack_delay_ms: 20,
            noise_amps: 2e-8,
            seed: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config: OrchestratorConfig = serde_json::from_str(
            r#"{ "mode": "hardware", "timing": { "settle_minutes": 5 }, "gpio": { "chip": "gpiochip0" } }"#,
        )
        .unwrap();
        assert_eq!(config.mode, ConnectionMode::Hardware);
        assert_eq!(config.timing.settle_minutes, 5);
        assert_eq!(config.timing.settle_poll_secs, 60);
        assert_eq!(config.gpio.chip, "gpiochip0");
        assert_eq!(config.gpio.cycle_ack_pin, 7);
        assert_eq!(config.scripts.partial_scans.len(), 4);
        assert_eq!(config.device.baud_rate, 230_400);
    }

    #[test]
    fn template_paths_follow_prefix() {
        let scripts = ScriptConfig::default();
        assert_eq!(
            scripts.template_path("peak_5hz"),
            PathBuf::from("methodscripts/partial_swv_peak_5hz_template.mscr")
        );
    }

    #[test]
    fn missing_file_means_defaults() {
        let config = OrchestratorConfig::load(Path::new("/nonexistent/orchestrator.json")).unwrap();
        assert_eq!(config.mode, ConnectionMode::Simulation);
        assert_eq!(config.timing.settle(), Duration::from_secs(1800));
    }
}
