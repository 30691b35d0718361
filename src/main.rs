// src/main.rs
mod config;
mod drivers;
mod emstat;
mod engine;
mod gpio;
mod recorder;
mod scanner;
mod sequence;
mod shutdown;
mod simulator;
mod teensy;
mod tracker;
mod types;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::path::PathBuf;

use crate::config::{OrchestratorConfig, DEFAULT_CONFIG_PATH};
use crate::drivers::Instrument;
use crate::emstat::EmStatSession;
use crate::engine::{Orchestrator, RunEnd};
use crate::gpio::{GpiodLines, SwitchLines};
use crate::recorder::ScanRecorder;
use crate::scanner::{ScanDriver, ScriptSet};
use crate::sequence::{run_sequence, Sequence};
use crate::shutdown::Shutdown;
use crate::simulator::{SimulatedInstrument, SimulatedLines};
use crate::teensy::{ElectrodeSelector, ManualSelector, TeensyLink};
use crate::tracker::{StateStore, TrackerSnapshot};
use crate::types::ConnectionMode;

#[derive(Parser, Debug)]
#[command(author, version, about = "Square wave voltammetry scan orchestrator")]
struct Cli {
    /// JSON configuration file
    #[arg(default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Continue from the counter and cache saved in the state file
    #[arg(long)]
    resume: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Run a scan sequence file, selecting electrodes through the Teensy link
    Sequence {
        /// Sequence file, e.g. scan_sequence.txt
        file: PathBuf,

        /// JSON configuration file
        #[arg(default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
}

impl Cli {
    fn config_path(&self) -> &PathBuf {
        match &self.command {
            Some(Command::Sequence { config, .. }) => config,
            None => &self.config,
        }
    }
}

// 入口函数
fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(e) = run() {
        error!("{e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = OrchestratorConfig::load(cli.config_path())?;
    info!("mode {:?}, output to {}", config.mode, config.output_dir.display());

    // Ctrl-C 只设置标志，由主循环在安全的地方退出
    let shutdown = Shutdown::new();
    let handler = shutdown.clone();
    ctrlc::set_handler(move || {
        warn!("Ctrl-C received, stopping after the current step");
        handler.trigger();
    })
    .context("failed to install Ctrl-C handler")?;

    let scripts = ScriptSet::load(&config.scripts)?;
    let recorder = ScanRecorder::new(&config.output_dir);

    match (config.mode, cli.command) {
        (ConnectionMode::Hardware, None) => {
            let store = StateStore::new(&config.state_file);
            let start = store.starting_point(cli.resume)?;
            let instrument = EmStatSession::connect(&config.device)?;
            let lines = GpiodLines::open(&config.gpio)?;
            campaign(instrument, lines, scripts, recorder, &config, store, start, shutdown)
        }
        (ConnectionMode::Simulation, None) => {
            let store = StateStore::new(&config.state_file);
            let start = store.starting_point(cli.resume)?;
            let counter = start.as_ref().map_or(0, |snapshot| snapshot.counter);
            let instrument = SimulatedInstrument::new(&config.simulation);
            let lines = SimulatedLines::new(counter, &config.simulation, shutdown.clone());
            campaign(instrument, lines, scripts, recorder, &config, store, start, shutdown)
        }
        (ConnectionMode::Hardware, Some(Command::Sequence { file, .. })) => {
            let sequence = Sequence::load(&file)
                .with_context(|| format!("failed to load sequence {}", file.display()))?;
            let instrument = EmStatSession::connect(&config.device)?;
            let selector = TeensyLink::connect(&config.teensy)?;
            sequence_run(&sequence, instrument, selector, scripts, recorder, &shutdown)
        }
        (ConnectionMode::Simulation, Some(Command::Sequence { file, .. })) => {
            let sequence = Sequence::load(&file)
                .with_context(|| format!("failed to load sequence {}", file.display()))?;
            let instrument = SimulatedInstrument::new(&config.simulation);
            let selector = ManualSelector::new(|chip, we| Some(format!("OK chip {chip} we {we}")));
            sequence_run(&sequence, instrument, selector, scripts, recorder, &shutdown)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn campaign<I: Instrument, L: SwitchLines>(
    instrument: I,
    lines: L,
    scripts: ScriptSet,
    recorder: ScanRecorder,
    config: &OrchestratorConfig,
    store: StateStore,
    start: Option<TrackerSnapshot>,
    shutdown: Shutdown,
) -> Result<()> {
    let driver = ScanDriver::new(instrument, scripts)?.with_recorder(recorder);
    let mut orchestrator = Orchestrator::new(driver, lines, config.timing.clone(), shutdown);
    if let Some(snapshot) = start {
        orchestrator.restore(snapshot);
    }
    let mut orchestrator = orchestrator.with_store(store);
    info!(
        "connected to {}, starting at counter {}",
        orchestrator.driver().instrument().device_type(),
        orchestrator.state().counter
    );
    let end = orchestrator.run()?;
    let counter = orchestrator.state().counter;
    match end {
        RunEnd::Complete => info!("campaign complete after {counter} scans"),
        RunEnd::Shutdown => info!("stopped at counter {counter}, progress saved"),
    }
    Ok(())
}

fn sequence_run<I: Instrument, S: ElectrodeSelector>(
    sequence: &Sequence,
    instrument: I,
    mut selector: S,
    scripts: ScriptSet,
    recorder: ScanRecorder,
    shutdown: &Shutdown,
) -> Result<()> {
    let mut driver = ScanDriver::new(instrument, scripts)?.with_recorder(recorder);
    info!(
        "running {} step(s) x {} pass(es) on {}",
        sequence.steps.len(),
        sequence.repeat + 1,
        driver.instrument().device_type()
    );
    let summary = run_sequence(sequence, &mut driver, &mut selector, shutdown)?;
    info!(
        "sequence {}: {} pass(es), {} full and {} partial scan(s), {} switch(es)",
        if summary.interrupted { "interrupted" } else { "finished" },
        summary.passes,
        summary.full_scans,
        summary.partial_scans,
        summary.switches
    );
    Ok(())
}
