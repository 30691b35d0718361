use crate::tracker::BaselinePeak;
/// Width of the baseline window, ending at the baseline voltage.
pub const BASELINE_SPAN_MV: i64 = 30;
/// Half width of the peak window, centred on the peak voltage.
pub const PEAK_HALF_SPAN_MV: i64 = 15;
pub const E_BEGIN_BASELINE: &str = "<E_begin_baseline>";
pub const E_END_BASELINE: &str = "<E_end_baseline>";
pub const E_BEGIN_PEAK: &str = "<E_begin_peak>";
pub const E_END_PEAK: &str = "<E_end_peak>";
/// Partial scan bounds in integer millivolts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScanWindow {
    pub baseline_begin_mv: i64,
    pub baseline_end_mv: i64,
    pub peak_begin_mv: i64,
    pub peak_end_mv: i64,
}
impl ScanWindow {
    pub fn from_voltages(peak_v: f64, baseline_v: f64) -> Self {
        let baseline = to_millivolts(baseline_v);
        let peak = to_millivolts(peak_v);
        Self {
            baseline_begin_mv: baseline - BASELINE_SPAN_MV,
            baseline_end_mv: baseline,
            peak_begin_mv: peak - PEAK_HALF_SPAN_MV,
            peak_end_mv: peak + PEAK_HALF_SPAN_MV,
        }
    }
    pub fn from_entry(entry: BaselinePeak) -> Self {
        Self::from_voltages(entry.peak_v, entry.baseline_v)
    }
    /// Placeholder/value pairs in the order they appear in the templates.
    pub fn replacements(&self) -> [(&'static str, String); 4] {
        [
            (E_BEGIN_BASELINE, format_millivolts(self.baseline_begin_mv)),
            (E_END_BASELINE, format_millivolts(self.baseline_end_mv)),
            (E_BEGIN_PEAK, format_millivolts(self.peak_begin_mv)),
            (E_END_PEAK, format_millivolts(self.peak_end_mv)),
        ]
    }
    /// Substitutes every placeholder occurrence in a MethodSCRIPT template.
    pub fn apply(&self, template: &str) -> String {
        self.replacements()
            .iter()
            .fold(template.to_owned(), |text, (placeholder, value)| {
                text.replace(placeholder, value)
            })
    }
}
/// Rounds to the nearest millivolt; calibration voltages are float noise around
/// integer millivolt steps.
pub fn to_millivolts(volts: f64) -> i64 {
    (volts * 1000.0).round() as i64
}
pub fn format_millivolts(mv: i64) -> String {
    format!("{mv}m")
}
#[cfg(test)]
mod tests {
    use super::*;
    fn parse_mv(text: &str) -> i64 {
        text.strip_suffix('m').unwrap().parse().unwrap()
    }
    #[test]
    fn bounds_follow_peak_and_baseline() {
        let window = ScanWindow::from_voltages(-0.2, -0.267);
        assert_eq!(window.baseline_begin_mv, -297);
        assert_eq!(window.baseline_end_mv, -267);
        assert_eq!(window.peak_begin_mv, -215);
        assert_eq!(window.peak_end_mv, -185);
        assert_eq!(window.baseline_end_mv - window.baseline_begin_mv, BASELINE_SPAN_MV);
        assert_eq!(window.peak_end_mv - window.peak_begin_mv, 2 * PEAK_HALF_SPAN_MV);
    }
    #[test]
    fn same_input_gives_same_window() {
        let a = ScanWindow::from_voltages(-0.183, -0.311);
        let b = ScanWindow::from_voltages(-0.183, -0.311);
        assert_eq!(a, b);
        assert_eq!(a.replacements(), b.replacements());
    }
    #[test]
    fn millivolt_strings_parse_back_to_bounds() {
        // -0.57 * 1000 is -569.999... in binary floating point
        let window = ScanWindow::from_voltages(-0.57, -0.29);
        let values: Vec<i64> = window.replacements().iter().map(|(_, v)| parse_mv(v)).collect();
        assert_eq!(values, vec![-320, -290, -585, -555]);
    }
    #[test]
    fn uncalibrated_entry_centres_on_zero() {
        let window = ScanWindow::from_entry(BaselinePeak::default());
        assert_eq!(
            window.replacements().map(|(_, v)| v),
            ["-30m".to_string(), "0m".into(), "-15m".into(), "15m".into()]
        );
    }
    #[test]
    fn apply_replaces_every_placeholder() {
        let template = "e\nvar c\nmeas_loop_swv p c f g <E_begin_baseline> <E_end_baseline> 2m 25m 5\n\
                        meas_loop_swv p c f g <E_begin_peak> <E_end_peak> 2m 25m 5\n\
                        # again <E_end_peak>\n";
        let script = ScanWindow::from_voltages(-0.2, -0.267).apply(template);
        assert!(!script.contains('<'));
        assert!(script.contains("-297m -267m"));
        assert!(script.contains("-215m -185m"));
        assert!(script.ends_with("# again -185m\n"));
    }
}
