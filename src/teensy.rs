use anyhow::{anyhow, Context, Result};
use log::{debug, info};
use serialport::SerialPort;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::TeensyConfig;
use crate::drivers::ScanError;

const COMMON_PORTS: [&str; 3] = ["/dev/ttyACM0", "/dev/ttyACM1", "/dev/ttyUSB0"];

/// Routes the potentiostat to one working electrode. Chips are 1..=16, electrodes 1..=4.
pub trait ElectrodeSelector {
    /// Returns the controller's reply on success.
    fn select(&mut self, chip: usize, electrode: usize) -> Result<String, ScanError>;
}

/// Text command channel to the Teensy multiplexer.
pub struct TeensyLink {
    reader: BufReader<Box<dyn SerialPort>>,
    reply_timeout: Duration,
}

impl TeensyLink {
    pub fn connect(config: &TeensyConfig) -> Result<Self> {
        let port_name = match &config.port {
            Some(name) => name.clone(),
            None => COMMON_PORTS
                .iter()
                .find(|p| Path::new(p).exists())
                .map(|p| p.to_string())
                .ok_or_else(|| anyhow!("no Teensy port found in {COMMON_PORTS:?}"))?,
        };
        let port = serialport::new(&port_name, config.baud_rate)
            .timeout(Duration::from_millis(50))
            .open()
            .with_context(|| format!("failed to open Teensy port {port_name}"))?;
        // 板子开串口时会复位，等它启动完再清缓冲
        thread::sleep(Duration::from_millis(config.boot_delay_ms));
        port.clear(serialport::ClearBuffer::Input)?;
        info!("Connected to Teensy on {port_name}.");
        Ok(Self {
            reader: BufReader::new(port),
            reply_timeout: Duration::from_millis(config.reply_timeout_ms),
        })
    }

    fn receive(&mut self) -> Result<Option<String>, ScanError> {
        let deadline = Instant::now() + self.reply_timeout;
        let mut pending = Vec::new();
        while Instant::now() < deadline {
            match self.reader.read_until(b'\n', &mut pending) {
                Ok(_) if pending.ends_with(b"\n") => break,
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {}
                Err(e) => return Err(e.into()),
            }
        }
        let reply = String::from_utf8_lossy(&pending).trim().to_owned();
        Ok((!reply.is_empty()).then_some(reply))
    }
}

impl ElectrodeSelector for TeensyLink {
    fn select(&mut self, chip: usize, electrode: usize) -> Result<String, ScanError> {
        let port = self.reader.get_mut();
        port.write_all(format!("{chip} {electrode}\n").as_bytes())?;
        port.flush()?;
        let reply = self
            .receive()?
            .ok_or_else(|| ScanError::Switch("no response from Teensy".into()))?;
        debug!("Teensy replied '{reply}' to {chip} {electrode}");
        check_reply(reply)
    }
}

fn check_reply(reply: String) -> Result<String, ScanError> {
    if reply.contains("ERROR") {
        Err(ScanError::Switch(reply))
    } else {
        Ok(reply)
    }
}

/// Records commands instead of talking to hardware; replies come from a closure.
pub struct ManualSelector<F>
where
    F: FnMut(usize, usize) -> Option<String>,
{
    reply: F,
    pub commands: Vec<(usize, usize)>,
}

impl<F> ManualSelector<F>
where
    F: FnMut(usize, usize) -> Option<String>,
{
    pub fn new(reply: F) -> Self {
        Self {
            reply,
            commands: Vec::new(),
        }
    }
}

impl<F> ElectrodeSelector for ManualSelector<F>
where
    F: FnMut(usize, usize) -> Option<String>,
{
    fn select(&mut self, chip: usize, electrode: usize) -> Result<String, ScanError> {
        self.commands.push((chip, electrode));
        let reply = (self.reply)(chip, electrode)
            .ok_or_else(|| ScanError::Switch("no response from Teensy".into()))?;
        check_reply(reply)
    }
}
