use std::fmt;
use crate::drivers::curve::Curve;
use crate::drivers::mscript::parse_result_lines;
use crate::drivers::ScanError;
/// Potentiostats the orchestrator knows how to drive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceType {
    EmStatPico,
    /// EmStat4 variants report their own name (`EmStat4 LR`, `EmStat4 HR`, ...).
    EmStat4(String),
}
impl DeviceType {
    /// Maps the firmware's answer to the `t` command onto a supported device.
    pub fn identify(firmware: &str) -> Result<Self, ScanError> {
        let name = firmware.lines().next().unwrap_or_default().trim();
        if name.starts_with("tespico") || name == "espico" {
            Ok(DeviceType::EmStatPico)
        } else if name.contains("EmStat4") || name.starts_with("tes4") || name.starts_with("es4") {
            Ok(DeviceType::EmStat4(name.trim_start_matches('t').to_owned()))
        } else {
            Err(ScanError::DeviceTypeMismatch {
                found: name.to_owned(),
            })
        }
    }
}
impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceType::EmStatPico => write!(f, "EmStat Pico"),
            DeviceType::EmStat4(name) => write!(f, "{name}"),
        }
    }
}
/// Script execution on a connected potentiostat.
pub trait Instrument {
    fn device_type(&self) -> &DeviceType;
    fn send_script(&mut self, script: &str) -> Result<(), ScanError>;
    /// Result lines of the last script, up to and including the empty end line.
    fn read_results(&mut self) -> Result<Vec<String>, ScanError>;
    /// Sends a script and returns the first curve it produced with the raw answer.
    fn execute(&mut self, script: &str) -> Result<ScriptRun, ScanError> {
        self.send_script(script)?;
        let raw = self.read_results()?;
        let curve = parse_result_lines(&raw)?
            .into_iter()
            .next()
            .ok_or_else(|| ScanError::InstrumentCommunication("script produced no curve".into()))?;
        Ok(ScriptRun { curve, raw })
    }
}
/// Parsed curve of one script plus the lines it was parsed from.
#[derive(Clone, Debug)]
pub struct ScriptRun {
    pub curve: Curve,
    pub raw: Vec<String>,
}
#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::drivers::mscript::format_package;

    /// Scripted responder for tests: every sent script is recorded and answered by the closure.
    pub struct ManualInstrument<F>
    where
        F: FnMut(&str) -> Vec<String>,
    {
        device: DeviceType,
        responder: F,
        pending: Option<Vec<String>>,
        pub sent: Vec<String>,
    }
    impl<F> ManualInstrument<F>
    where
        F: FnMut(&str) -> Vec<String>,
    {
        pub fn new(responder: F) -> Self {
            Self {
                device: DeviceType::EmStatPico,
                responder,
                pending: None,
                sent: Vec::new(),
            }
        }
    }
    impl<F> Instrument for ManualInstrument<F>
    where
        F: FnMut(&str) -> Vec<String>,
    {
        fn device_type(&self) -> &DeviceType {
            &self.device
        }
        fn send_script(&mut self, script: &str) -> Result<(), ScanError> {
            self.sent.push(script.to_owned());
            self.pending = Some((self.responder)(script));
            Ok(())
        }
        fn read_results(&mut self) -> Result<Vec<String>, ScanError> {
            self.pending
                .take()
                .ok_or_else(|| ScanError::InstrumentCommunication("no script pending".into()))
        }
    }
    #[test]
    fn identifies_supported_devices() {
        assert_eq!(DeviceType::identify("tespico\n").unwrap(), DeviceType::EmStatPico);
        assert_eq!(
            DeviceType::identify("tEmStat4 LR #Jun  1 2023").unwrap(),
            DeviceType::EmStat4("EmStat4 LR #Jun  1 2023".into())
        );
        assert!(matches!(
            DeviceType::identify("tes3"),
            Err(ScanError::DeviceTypeMismatch { found }) if found == "tes3"
        ));
    }
    #[test]
    fn execute_returns_first_curve() {
        let mut device = ManualInstrument::new(|_| {
            vec![
                "e".to_string(),
                "M0000".to_string(),
                format_package(&[("da", -0.1), ("ba", 2e-7)]),
                "*".to_string(),
                String::new(),
            ]
        });
        let run = device.execute("e\nmeas_loop_swv\n").unwrap();
        assert_eq!(run.curve.len(), 1);
        assert_eq!(run.raw.len(), 5);
        assert_eq!(device.sent.len(), 1);
        assert!(device.read_results().is_err());
    }
    #[test]
    fn empty_answer_is_a_communication_error() {
        let mut device = ManualInstrument::new(|_| vec![String::new()]);
        assert!(matches!(
            device.execute("e\n"),
            Err(ScanError::InstrumentCommunication(_))
        ));
    }
}
