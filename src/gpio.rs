use anyhow::{anyhow, Context, Result};
use libloading::Library;
use log::{debug, info};
use once_cell::sync::OnceCell;
use std::ffi::CString;
use std::os::raw::{c_char, c_int, c_long, c_uint};
use std::thread;
use std::time::Duration;

use crate::config::GpioConfig;
use crate::drivers::ScanError;
use crate::types::{Edge, LineEvent, SwitchLine};

/// Handshake lines shared with the switching controller.
pub trait SwitchLines {
    /// Blocks until at least one edge arrives or `timeout` elapses (empty result).
    fn wait_events(&mut self, timeout: Duration) -> Result<Vec<LineEvent>, ScanError>;
    /// Rising-then-falling pulse telling the controller the scan is done.
    fn pulse_scan_complete(&mut self) -> Result<(), ScanError>;
}

// ---- libgpiod v1 C API ----

const GPIOD_LINE_BULK_MAX_LINES: usize = 64;
const GPIOD_LINE_EVENT_RISING_EDGE: c_int = 1;
const GPIOD_LINE_EVENT_FALLING_EDGE: c_int = 2;

#[repr(C)]
struct GpiodChip {
    _private: [u8; 0],
}

#[repr(C)]
struct GpiodLine {
    _private: [u8; 0],
}

#[repr(C)]
struct GpiodLineBulk {
    lines: [*mut GpiodLine; GPIOD_LINE_BULK_MAX_LINES],
    num_lines: c_uint,
}

impl GpiodLineBulk {
    fn empty() -> Self {
        Self {
            lines: [std::ptr::null_mut(); GPIOD_LINE_BULK_MAX_LINES],
            num_lines: 0,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct Timespec {
    tv_sec: c_long,
    tv_nsec: c_long,
}

impl From<Duration> for Timespec {
    fn from(value: Duration) -> Self {
        Self {
            tv_sec: value.as_secs() as c_long,
            tv_nsec: value.subsec_nanos() as c_long,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct GpiodLineEvent {
    ts: Timespec,
    event_type: c_int,
}

struct GpiodApi {
    #[allow(dead_code)]
    lib: Library,
    chip_open_by_name: unsafe extern "C" fn(*const c_char) -> *mut GpiodChip,
    chip_close: unsafe extern "C" fn(*mut GpiodChip),
    chip_get_line: unsafe extern "C" fn(*mut GpiodChip, c_uint) -> *mut GpiodLine,
    line_request_output: unsafe extern "C" fn(*mut GpiodLine, *const c_char, c_int) -> c_int,
    line_request_both_edges_events: unsafe extern "C" fn(*mut GpiodLine, *const c_char) -> c_int,
    line_set_value: unsafe extern "C" fn(*mut GpiodLine, c_int) -> c_int,
    line_event_wait_bulk:
        unsafe extern "C" fn(*mut GpiodLineBulk, *const Timespec, *mut GpiodLineBulk) -> c_int,
    line_event_read: unsafe extern "C" fn(*mut GpiodLine, *mut GpiodLineEvent) -> c_int,
    line_offset: unsafe extern "C" fn(*mut GpiodLine) -> c_uint,
    line_release: unsafe extern "C" fn(*mut GpiodLine),
}

impl GpiodApi {
    fn load() -> Result<Self> {
        let lib = unsafe { Library::new("libgpiod.so.2").or_else(|_| Library::new("libgpiod.so")) }
            .context("libgpiod (v1) not found; install libgpiod2")?;
        // Safety: signatures follow gpiod.h of libgpiod 1.x.
        unsafe {
            Ok(Self {
                chip_open_by_name: *lib.get(b"gpiod_chip_open_by_name\0")?,
                chip_close: *lib.get(b"gpiod_chip_close\0")?,
                chip_get_line: *lib.get(b"gpiod_chip_get_line\0")?,
                line_request_output: *lib.get(b"gpiod_line_request_output\0")?,
                line_request_both_edges_events: *lib
                    .get(b"gpiod_line_request_both_edges_events\0")?,
                line_set_value: *lib.get(b"gpiod_line_set_value\0")?,
                line_event_wait_bulk: *lib.get(b"gpiod_line_event_wait_bulk\0")?,
                line_event_read: *lib.get(b"gpiod_line_event_read\0")?,
                line_offset: *lib.get(b"gpiod_line_offset\0")?,
                line_release: *lib.get(b"gpiod_line_release\0")?,
                lib,
            })
        }
    }

    fn instance() -> Result<&'static GpiodApi> {
        static API: OnceCell<GpiodApi> = OnceCell::new();
        API.get_or_try_init(Self::load)
    }

    fn check(code: c_int, ctx: &str) -> Result<(), ScanError> {
        if code < 0 {
            Err(ScanError::Gpio(format!(
                "{ctx} failed: {}",
                std::io::Error::last_os_error()
            )))
        } else {
            Ok(())
        }
    }
}

/// `true` when `gpiod_line_event_wait_bulk` reported ready lines.
/// The wait sits in `ppoll`, which a signal always interrupts; EINTR reads as a
/// timeout so the caller gets to look at its shutdown token.
fn wait_ready(rc: c_int, os_error: std::io::Error) -> Result<bool, ScanError> {
    match rc {
        0 => Ok(false),
        rc if rc > 0 => Ok(true),
        _ if os_error.kind() == std::io::ErrorKind::Interrupted => {
            debug!("line wait interrupted by a signal");
            Ok(false)
        }
        _ => Err(ScanError::Gpio(format!("wait for line events failed: {os_error}"))),
    }
}

/// Output and input lines requested from one gpiochip through libgpiod.
pub struct GpiodLines {
    api: &'static GpiodApi,
    chip: *mut GpiodChip,
    output: *mut GpiodLine,
    inputs: Vec<(*mut GpiodLine, u32, SwitchLine)>,
    pulse: Duration,
}

impl GpiodLines {
    pub fn open(config: &GpioConfig) -> Result<Self> {
        let api = GpiodApi::instance()?;
        let name = CString::new(config.chip.as_str())?;
        let consumer = CString::new(config.consumer.as_str())?;
        let chip = unsafe { (api.chip_open_by_name)(name.as_ptr()) };
        if chip.is_null() {
            return Err(anyhow!(
                "failed to open {}: {}",
                config.chip,
                std::io::Error::last_os_error()
            ));
        }
        // From here on Drop releases whatever was requested.
        let mut lines = Self {
            api,
            chip,
            output: std::ptr::null_mut(),
            inputs: Vec::new(),
            pulse: Duration::from_millis(config.pulse_ms),
        };
        let output = lines.line(config.scan_complete_pin)?;
        GpiodApi::check(
            unsafe { (api.line_request_output)(output, consumer.as_ptr(), 0) },
            "request scan-complete line",
        )?;
        lines.output = output;
        for (pin, role) in [
            (config.electrode_ack_pin, SwitchLine::ElectrodeChanged),
            (config.chip_ack_pin, SwitchLine::ChipChanged),
            (config.cycle_ack_pin, SwitchLine::CycleComplete),
        ] {
            let line = lines.line(pin)?;
            GpiodApi::check(
                unsafe { (api.line_request_both_edges_events)(line, consumer.as_ptr()) },
                &format!("request {role} line {pin}"),
            )?;
            lines.inputs.push((line, pin, role));
        }
        info!(
            "GPIO ready on {}: output {}, inputs {:?}",
            config.chip,
            config.scan_complete_pin,
            lines.inputs.iter().map(|(_, pin, _)| *pin).collect::<Vec<_>>()
        );
        Ok(lines)
    }

    fn line(&self, pin: u32) -> Result<*mut GpiodLine> {
        let line = unsafe { (self.api.chip_get_line)(self.chip, pin) };
        if line.is_null() {
            return Err(anyhow!("line {pin} not available on this chip"));
        }
        Ok(line)
    }

    fn role_of(&self, offset: u32) -> Option<SwitchLine> {
        self.inputs
            .iter()
            .find(|(_, pin, _)| *pin == offset)
            .map(|(_, _, role)| *role)
    }

    fn set_output(&self, value: c_int) -> Result<(), ScanError> {
        GpiodApi::check(
            unsafe { (self.api.line_set_value)(self.output, value) },
            "set scan-complete line",
        )
    }
}

impl SwitchLines for GpiodLines {
    fn wait_events(&mut self, timeout: Duration) -> Result<Vec<LineEvent>, ScanError> {
        let mut bulk = GpiodLineBulk::empty();
        for (slot, (line, _, _)) in bulk.lines.iter_mut().zip(&self.inputs) {
            *slot = *line;
        }
        bulk.num_lines = self.inputs.len() as c_uint;
        let mut ready = GpiodLineBulk::empty();
        let ts = Timespec::from(timeout);
        let rc = unsafe { (self.api.line_event_wait_bulk)(&mut bulk, &ts, &mut ready) };
        if !wait_ready(rc, std::io::Error::last_os_error())? {
            return Ok(Vec::new());
        }
        let mut events = Vec::new();
        for &line in ready.lines.iter().take(ready.num_lines as usize) {
            let mut raw = GpiodLineEvent::default();
            GpiodApi::check(
                unsafe { (self.api.line_event_read)(line, &mut raw) },
                "read line event",
            )?;
            let offset = unsafe { (self.api.line_offset)(line) };
            let edge = match raw.event_type {
                GPIOD_LINE_EVENT_RISING_EDGE => Edge::Rising,
                GPIOD_LINE_EVENT_FALLING_EDGE => Edge::Falling,
                other => {
                    debug!("ignoring event type {other} on line {offset}");
                    continue;
                }
            };
            match self.role_of(offset) {
                Some(role) => events.push(LineEvent { line: role, edge }),
                None => debug!("event on unrequested line {offset}"),
            }
        }
        Ok(events)
    }

    fn pulse_scan_complete(&mut self) -> Result<(), ScanError> {
        debug!("scan complete, pulsing controller");
        self.set_output(1)?;
        thread::sleep(self.pulse);
        self.set_output(0)
    }
}

impl Drop for GpiodLines {
    fn drop(&mut self) {
        unsafe {
            for (line, _, _) in self.inputs.drain(..) {
                (self.api.line_release)(line);
            }
            if !self.output.is_null() {
                (self.api.line_release)(self.output);
            }
            (self.api.chip_close)(self.chip);
        }
        debug!("GPIO lines released");
    }
}
