use std::io::Cursor;
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use plotters::prelude::*;
use crate::drivers::curve::Curve;
use crate::drivers::ScanError;
#[derive(Clone, Debug)]
pub struct PlotStyle {
    pub width: u32,
    pub height: u32,
    pub background: RGBColor,
    pub palette: Vec<RGBColor>,
}
impl Default for PlotStyle {
    fn default() -> Self {
        Self {
            width: 1000,
            height: 600,
            background: WHITE,
            palette: vec![BLUE, RED, GREEN, MAGENTA, CYAN, BLACK, RGBColor(255, 140, 0)],
        }
    }
}
/// One labelled line of a voltammogram.
#[derive(Clone, Debug)]
pub struct SweepSeries {
    pub label: String,
    pub points: Vec<(f64, f64)>,
}
impl SweepSeries {
    /// Every value column of a curve plotted against its potential column.
    pub fn from_curve(curve: &Curve) -> Vec<SweepSeries> {
        (1..curve.columns.len())
            .map(|idx| SweepSeries {
                label: curve.columns[idx].name.clone(),
                points: curve.points(idx),
            })
            .filter(|s| !s.points.is_empty())
            .collect()
    }
}
pub fn render_sweeps_png(
    title: &str,
    axis_labels: (&str, &str),
    series: &[SweepSeries],
    style: PlotStyle,
) -> Result<Vec<u8>, ScanError> {
    let all = || series.iter().flat_map(|s| s.points.iter().copied());
    if all().next().is_none() {
        return Err(ScanError::Plot(format!("'{title}' has no points to draw")));
    }
    let (x_min, x_max) = bounds(all().map(|(x, _)| x));
    let (y_min, y_max) = bounds(all().map(|(_, y)| y));
    let mut buffer = vec![0u8; (style.width * style.height * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (style.width, style.height))
            .into_drawing_area();
        root.fill(&style.background)?;
        let mut chart = ChartBuilder::on(&root)
            .margin(15)
            .caption(title, ("sans-serif", 22).into_font().color(&BLACK))
            .set_label_area_size(LabelAreaPosition::Left, 80)
            .set_label_area_size(LabelAreaPosition::Bottom, 50)
            .build_cartesian_2d(x_min..x_max, y_min..y_max)?;
        chart
            .configure_mesh()
            .x_desc(axis_labels.0)
            .y_desc(axis_labels.1)
            .y_label_formatter(&|v| format!("{v:.2e}"))
            .light_line_style(&BLACK.mix(0.05))
            .bold_line_style(&BLACK.mix(0.2))
            .draw()?;
        for (idx, line) in series.iter().enumerate() {
            let color = style.palette[idx % style.palette.len()];
            chart
                .draw_series(LineSeries::new(line.points.iter().copied(), &color))?
                .label(line.label.clone())
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &color));
        }
        chart
            .configure_series_labels()
            .border_style(&BLACK.mix(0.4))
            .background_style(&style.background.mix(0.9))
            .draw()?;
        root.present()?;
    }
    encode_png(&buffer, style.width, style.height)
}
/// Axis range with a small margin; a flat series gets a unit-free span around its value.
fn bounds(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    let span = hi - lo;
    if span <= f64::EPSILON * hi.abs().max(1e-300) {
        let pad = if hi == 0.0 { 1.0 } else { hi.abs() * 0.1 };
        (lo - pad, hi + pad)
    } else {
        (lo - span * 0.05, hi + span * 0.05)
    }
}
fn encode_png(buffer: &[u8], width: u32, height: u32) -> Result<Vec<u8>, ScanError> {
    let image = ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, buffer.to_vec())
        .ok_or_else(|| ScanError::Plot("failed to allocate image buffer".into()))?;
    let mut output = Vec::new();
    let dynamic = DynamicImage::ImageRgb8(image);
    dynamic.write_to(&mut Cursor::new(&mut output), ImageFormat::Png)?;
    Ok(output)
}
#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn flat_series_gets_a_visible_range() {
        let (lo, hi) = bounds([2e-7, 2e-7].into_iter());
        assert!(lo < 2e-7 && hi > 2e-7);
        let (lo, hi) = bounds([0.0].into_iter());
        assert_eq!((lo, hi), (-1.0, 1.0));
    }
    #[test]
    fn empty_plot_is_rejected() {
        let series = vec![SweepSeries {
            label: "WE current".into(),
            points: Vec::new(),
        }];
        assert!(matches!(
            render_sweeps_png("empty", ("V", "A"), &series, PlotStyle::default()),
            Err(ScanError::Plot(_))
        ));
    }
}
