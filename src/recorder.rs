use chrono::{DateTime, Local};
use log::{debug, info};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::drivers::{render_sweeps_png, Curve, PlotStyle, ScanError, SweepSeries};
use crate::scanner::{Calibration, PartialScans};

/// Writes raw result lines, CSV and PNG for every scan under one output directory.
pub struct ScanRecorder {
    output_dir: PathBuf,
    style: PlotStyle,
}

impl ScanRecorder {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            style: PlotStyle::default(),
        }
    }

    /// `<output>/<counter>_<Mon>_<day>/`, created on demand.
    pub fn scan_dir(&self, label: usize, now: DateTime<Local>) -> Result<PathBuf, ScanError> {
        let dir = self.output_dir.join(format!("{label}_{}", formatted_date(now)));
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    pub fn record_calibration(
        &self,
        label: usize,
        calibration: &Calibration,
    ) -> Result<PathBuf, ScanError> {
        let now = Local::now();
        let base = self
            .scan_dir(label, now)?
            .join(format!("{label}_FULL_100Hz_{}", formatted_date(now)));
        write_raw(&base.with_extension("txt"), &calibration.raw)?;
        write_curve_csv(&base.with_extension("csv"), &calibration.curve)?;
        let title = file_stem(&base);
        let series = SweepSeries::from_curve(&calibration.curve);
        self.write_plot(&base.with_extension("png"), &title, &calibration.curve, series)?;
        info!("calibration scan saved to {}", base.display());
        Ok(base)
    }

    pub fn record_partial(
        &self,
        label: usize,
        partial: &PartialScans,
    ) -> Result<PathBuf, ScanError> {
        let now = Local::now();
        let base = self
            .scan_dir(label, now)?
            .join(format!("{label}_PARTIAL_5-100Hz_{}", formatted_date(now)));
        write_raw(&base.with_extension("txt"), &partial.raw)?;
        write_curve_csv(&base.with_extension("csv"), &partial.combined)?;
        // 每个窗口扫描画在自己的电位轴上
        let series: Vec<SweepSeries> = partial
            .scans
            .iter()
            .flat_map(SweepSeries::from_curve)
            .collect();
        let title = file_stem(&base);
        self.write_plot(&base.with_extension("png"), &title, &partial.combined, series)?;
        info!("partial scans saved to {}", base.display());
        Ok(base)
    }

    fn write_plot(
        &self,
        path: &Path,
        title: &str,
        curve: &Curve,
        series: Vec<SweepSeries>,
    ) -> Result<(), ScanError> {
        if curve.is_empty() {
            debug!("nothing to plot for {}", path.display());
            return Ok(());
        }
        let x_label = curve.columns.first().map(|c| c.header()).unwrap_or_default();
        let y_label = curve
            .columns
            .get(1)
            .map(|c| format!("WE current [{}]", c.unit))
            .unwrap_or_default();
        let png = render_sweeps_png(title, (&x_label, &y_label), &series, self.style.clone())?;
        fs::write(path, png)?;
        Ok(())
    }
}

/// `Mon_day`, e.g. `Mar_7`.
pub fn formatted_date(now: DateTime<Local>) -> String {
    now.format("%b_%-d").to_string()
}

fn file_stem(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn write_raw(path: &Path, lines: &[String]) -> Result<(), ScanError> {
    let mut w = BufWriter::new(File::create(path)?);
    for line in lines {
        writeln!(w, "{}", line.trim_end_matches(['\r', '\n']))?;
    }
    w.flush()?;
    Ok(())
}

/// Semicolon separated CSV with an Excel `sep=;` hint and `name [unit]` headers.
/// NaN padding is written as an empty cell.
pub fn write_curve_csv(path: &Path, curve: &Curve) -> Result<(), ScanError> {
    let mut w = BufWriter::new(File::create(path)?);
    write_curve(&mut w, curve)?;
    w.flush()?;
    Ok(())
}

fn write_curve(w: &mut impl Write, curve: &Curve) -> Result<(), ScanError> {
    writeln!(w, "sep=;")?;
    let header: Vec<String> = curve.columns.iter().map(|c| c.header()).collect();
    writeln!(w, "{}", header.join(";"))?;
    for row in curve.data.rows() {
        let cells: Vec<String> = row
            .iter()
            .map(|v| if v.is_nan() { String::new() } else { v.to_string() })
            .collect();
        writeln!(w, "{}", cells.join(";"))?;
    }
    Ok(())
}
