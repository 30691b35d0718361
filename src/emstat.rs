use anyhow::{anyhow, Context, Result};
use log::{debug, info};
use serialport::{SerialPort, SerialPortType};
use std::io::{self, BufRead, BufReader, Write};
use std::time::{Duration, Instant};

use crate::config::DeviceConfig;
use crate::drivers::{DeviceType, Instrument, ScanError};

const READ_TIMEOUT: Duration = Duration::from_secs(1);
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(3);

/// MethodSCRIPT session with an EmStat Pico or EmStat4 over USB serial.
pub struct EmStatSession {
    reader: BufReader<Box<dyn SerialPort>>,
    device: DeviceType,
    scan_timeout: Duration,
}

impl EmStatSession {
    pub fn connect(config: &DeviceConfig) -> Result<Self> {
        let port_name = match &config.port {
            Some(name) => name.clone(),
            None => auto_detect_port()?,
        };
        let port = serialport::new(&port_name, config.baud_rate)
            .timeout(READ_TIMEOUT)
            .open()
            .with_context(|| format!("failed to open instrument port {port_name}"))?;
        let mut reader = BufReader::new(port);
        // 丢掉上电时残留的输出
        reader.get_mut().clear(serialport::ClearBuffer::All)?;
        write_line(reader.get_mut(), "t")?;
        let firmware = read_line(&mut reader, Instant::now() + IDENTIFY_TIMEOUT)?;
        let device = DeviceType::identify(&firmware)?;
        info!("Connected to {device} on {port_name}.");
        Ok(Self {
            reader,
            device,
            scan_timeout: config.scan_timeout(),
        })
    }
}

impl Instrument for EmStatSession {
    fn device_type(&self) -> &DeviceType {
        &self.device
    }

    fn send_script(&mut self, script: &str) -> Result<(), ScanError> {
        info!("Sending MethodSCRIPT.");
        let port = self.reader.get_mut();
        for line in script.lines() {
            write_line(port, line)?;
        }
        port.flush()?;
        Ok(())
    }

    fn read_results(&mut self) -> Result<Vec<String>, ScanError> {
        info!("Waiting for results.");
        let deadline = Instant::now() + self.scan_timeout;
        let mut lines = Vec::new();
        loop {
            let line = read_line(&mut self.reader, deadline)?;
            if line.starts_with('!') {
                return Err(ScanError::InstrumentCommunication(format!(
                    "instrument reported error '{}'",
                    line.trim_end()
                )));
            }
            let done = line.trim_end_matches(['\r', '\n']).is_empty();
            lines.push(line);
            if done {
                debug!("received {} result lines", lines.len());
                return Ok(lines);
            }
        }
    }
}

fn write_line(port: &mut Box<dyn SerialPort>, line: &str) -> Result<(), ScanError> {
    port.write_all(line.as_bytes())?;
    port.write_all(b"\n")?;
    Ok(())
}

/// One `\n`-terminated line; read timeouts are retried until `deadline`.
fn read_line(
    reader: &mut BufReader<Box<dyn SerialPort>>,
    deadline: Instant,
) -> Result<String, ScanError> {
    let mut pending = Vec::new();
    loop {
        match reader.read_until(b'\n', &mut pending) {
            Ok(0) => {
                return Err(ScanError::InstrumentCommunication(
                    "instrument port closed".into(),
                ))
            }
            Ok(_) if pending.ends_with(b"\n") => {
                return Ok(String::from_utf8_lossy(&pending).into_owned());
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {}
            Err(e) => return Err(e.into()),
        }
        if Instant::now() >= deadline {
            return Err(ScanError::InstrumentCommunication(format!(
                "timed out waiting for instrument (partial line {:?})",
                String::from_utf8_lossy(&pending)
            )));
        }
    }
}

/// First USB serial port that names a PalmSens device, else the only USB port present.
fn auto_detect_port() -> Result<String> {
    let ports = serialport::available_ports().context("failed to list serial ports")?;
    let usb: Vec<_> = ports
        .iter()
        .filter_map(|p| match &p.port_type {
            SerialPortType::UsbPort(info) => Some((p.port_name.clone(), info.product.clone())),
            _ => None,
        })
        .collect();
    let named = usb.iter().find(|(_, product)| {
        product
            .as_deref()
            .map(|name| name.contains("EmStat") || name.contains("ESPico"))
            .unwrap_or(false)
    });
    match (named, usb.as_slice()) {
        (Some((name, _)), _) => Ok(name.clone()),
        (None, [(name, _)]) => Ok(name.clone()),
        (None, []) => Err(anyhow!("no USB serial port found for the instrument")),
        (None, _) => Err(anyhow!(
            "several USB serial ports found, set device.port in the config"
        )),
    }
}
