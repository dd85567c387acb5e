//! Glucose trace chart: one panel, line plus point markers.

use std::any::Any;
use std::fmt::Display;
use std::fs;
use std::panic;
use std::path::Path;

use chrono::{DateTime, Utc};
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::{FontDesc, FontFamily, FontStyle};

use crate::font::{quietly, FontSafeBackend};
use crate::{CgmError, ParticipantMeta, Timeseries};

/// Figure size in inches, rendered at [`DPI`].
pub const FIGURE_SIZE_IN: (f64, f64) = (10.0, 3.5);
pub const DPI: f64 = 150.0;

pub const X_LABEL: &str = "Time";
pub const Y_LABEL: &str = "Glucose (mg/dL)";

const TIME_TICK_FORMAT: &str = "%m-%d %H:%M";
const TRACE_COLOR: RGBColor = RGBColor(31, 119, 180);
const LINE_WIDTH: u32 = 1;
const MARKER_RADIUS: u32 = 2;
// Fractional padding around the data on both axes.
const MARGIN_FRAC: f64 = 0.05;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChartKind {
    #[default]
    Png,
    Svg,
}

impl ChartKind {
    pub fn extension(self) -> &'static str {
        match self {
            ChartKind::Png => "png",
            ChartKind::Svg => "svg",
        }
    }
}

/// Canvas size in pixels.
pub fn canvas_size() -> (u32, u32) {
    (
        (FIGURE_SIZE_IN.0 * DPI).round() as u32,
        (FIGURE_SIZE_IN.1 * DPI).round() as u32,
    )
}

pub fn plot_title(participant_id: &str, meta: &ParticipantMeta) -> String {
    format!(
        "ID: {}  |  Age: {}  |  Group: {}",
        participant_id, meta.age, meta.study_group
    )
}

/// Render `series` to `out_path`, creating parent directories as needed.
///
/// The backend is presented and dropped before this returns. Backend errors
/// and panics come back as [`CgmError::Render`].
pub fn render_participant(
    series: &Timeseries,
    participant_id: &str,
    meta: &ParticipantMeta,
    out_path: &Path,
    kind: ChartKind,
) -> Result<(), CgmError> {
    if series.is_empty() {
        return Err(CgmError::InsufficientData);
    }
    if let Some(parent) = out_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| CgmError::io(parent, e))?;
    }

    let title = plot_title(participant_id, meta);
    let size = canvas_size();
    let render = || -> Result<(), CgmError> {
        match kind {
            ChartKind::Png => {
                let backend = BitMapBackend::new(out_path, size);
                draw_chart(FontSafeBackend::new(backend).into_drawing_area(), series, &title)
            }
            ChartKind::Svg => {
                let backend = SVGBackend::new(out_path, size);
                draw_chart(FontSafeBackend::new(backend).into_drawing_area(), series, &title)
            }
        }
    };

    guarded(render)
}

/// Run a drawing closure, turning a panic into [`CgmError::Render`] that
/// carries the panic message.
fn guarded(render: impl FnOnce() -> Result<(), CgmError>) -> Result<(), CgmError> {
    match quietly(|| panic::catch_unwind(panic::AssertUnwindSafe(render))) {
        Ok(result) => result,
        Err(payload) => Err(CgmError::Render(format!(
            "plotting backend panicked: {}",
            panic_message(payload.as_ref())
        ))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn draw_chart<DB>(
    root: DrawingArea<DB, Shift>,
    series: &Timeseries,
    title: &str,
) -> Result<(), CgmError>
where
    DB: DrawingBackend,
{
    let points: Vec<(f64, f64)> = series
        .readings()
        .iter()
        .map(|r| (epoch_seconds(r.timestamp()), r.glucose_mg_dl()))
        .collect();
    let (x_range, y_range) = axis_ranges(&points);

    root.fill(&WHITE).map_err(plot_err)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 18))
        .margin(12)
        .set_label_area_size(LabelAreaPosition::Left, 70)
        .set_label_area_size(LabelAreaPosition::Bottom, 55)
        .build_cartesian_2d(x_range, y_range)
        .map_err(plot_err)?;

    let axis_font = FontDesc::new(FontFamily::SansSerif, 14.0, FontStyle::Normal);
    chart
        .configure_mesh()
        .light_line_style(&TRANSPARENT)
        .bold_line_style(&TRANSPARENT)
        .x_desc(X_LABEL)
        .y_desc(Y_LABEL)
        .x_labels(8)
        .y_labels(6)
        .x_label_formatter(&|v| format_time_tick(*v))
        .y_label_formatter(&|v| format!("{:.0}", v))
        .label_style(axis_font.clone())
        .axis_desc_style(axis_font)
        .draw()
        .map_err(plot_err)?;

    let line_style = ShapeStyle {
        color: TRACE_COLOR.to_rgba(),
        filled: false,
        stroke_width: LINE_WIDTH,
    };
    chart
        .draw_series(LineSeries::new(points.iter().copied(), line_style))
        .map_err(plot_err)?;
    chart
        .draw_series(
            points
                .iter()
                .map(|&p| Circle::new(p, MARKER_RADIUS, TRACE_COLOR.filled())),
        )
        .map_err(plot_err)?;

    root.present().map_err(plot_err)?;
    Ok(())
}

fn plot_err<E: Display>(err: E) -> CgmError {
    CgmError::Render(err.to_string())
}

fn epoch_seconds(ts: DateTime<Utc>) -> f64 {
    ts.timestamp() as f64 + ts.timestamp_subsec_millis() as f64 / 1000.0
}

fn format_time_tick(seconds: f64) -> String {
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1e9) as u32;
    DateTime::<Utc>::from_timestamp(whole as i64, nanos)
        .map(|ts| ts.format(TIME_TICK_FORMAT).to_string())
        .unwrap_or_default()
}

/// Padded x (epoch seconds) and y (mg/dL) ranges. Degenerate spans are
/// widened so the coordinate system is never empty.
fn axis_ranges(points: &[(f64, f64)]) -> (std::ops::Range<f64>, std::ops::Range<f64>) {
    let (mut x_min, mut x_max) = (f64::INFINITY, f64::NEG_INFINITY);
    let (mut y_min, mut y_max) = (f64::INFINITY, f64::NEG_INFINITY);
    for &(x, y) in points {
        x_min = x_min.min(x);
        x_max = x_max.max(x);
        y_min = y_min.min(y);
        y_max = y_max.max(y);
    }
    (pad_range(x_min, x_max, 1800.0), pad_range(y_min, y_max, 10.0))
}

fn pad_range(lo: f64, hi: f64, flat_pad: f64) -> std::ops::Range<f64> {
    if !lo.is_finite() || !hi.is_finite() {
        return 0.0..1.0;
    }
    let span = hi - lo;
    if span <= f64::EPSILON * lo.abs().max(1.0) {
        return (lo - flat_pad)..(hi + flat_pad);
    }
    let pad = span * MARGIN_FRAC;
    (lo - pad)..(hi + pad)
}
