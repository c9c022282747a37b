//! ### Graph
//! Renders results from the `compute` and `boundary` modules as PNG charts.

use anyhow::{anyhow, bail};
use plotters::backend::BitMapBackend;
use plotters::chart::ChartBuilder;
use plotters::drawing::IntoDrawingArea;
use plotters::element::PathElement;
use plotters::element::Polygon;
use plotters::element::Text;
use plotters::prelude::IntoSegmentedCoord;
use plotters::prelude::SegmentValue;
use plotters::series::Histogram;
use plotters::series::LineSeries;
use plotters::style::full_palette::BLUE_600;
use plotters::style::full_palette::GREY_300;
use plotters::style::Color;
use plotters::style::IntoFont;
use plotters::style::RGBColor;
use plotters::style::BLACK;
use plotters::style::RED;
use plotters::style::WHITE;
use std::path::Path;

use crate::boundary::{BoundarySet, GeoJoin};
use crate::compute::{DistrictDecrease, EstimateRow};
use crate::model::Period;

pub struct Graphing<'a> {
    path: &'a Path,
}

/// Blends from white toward red for positive values and toward blue for
/// negative ones, saturating at `max_abs`.
fn diverging(value: f64, max_abs: f64) -> RGBColor {
    let t = (value / max_abs).clamp(-1., 1.);
    let (r, g, b) = if t >= 0. { (178., 24., 43.) } else { (33., 102., 172.) };
    let t = t.abs();
    let blend = |channel: f64| (255. + (channel - 255.) * t).round() as u8;
    RGBColor(blend(r), blend(g), blend(b))
}

/// Canvas size for a map of `bounds` (lon/lat degrees). Longitude is
/// scaled by the cosine of the middle latitude so shapes keep their
/// proportions; the longer side of the plot area is `MAP_SIDE` pixels.
fn map_canvas(((min_x, min_y), (max_x, max_y)): ((f64, f64), (f64, f64))) -> (u32, u32) {
    const MAP_SIDE: f64 = 1000.;
    const MARGIN: u32 = 40;
    const CAPTION: u32 = 60;

    let mid_lat = ((min_y + max_y) / 2.).to_radians();
    let width = (max_x - min_x) * mid_lat.cos();
    let height = max_y - min_y;
    if !(width > 0. && height > 0.) {
        return (MAP_SIDE as u32 + MARGIN, MAP_SIDE as u32 + MARGIN + CAPTION);
    }
    let scale = MAP_SIDE / width.max(height);
    let side = |extent: f64| (extent * scale).round().max(200.) as u32;
    (side(width) + MARGIN, side(height) + MARGIN + CAPTION)
}

fn centroid(ring: &[(f64, f64)]) -> (f64, f64) {
    let n = ring.len().max(1) as f64;
    let (sx, sy) = ring.iter().fold((0., 0.), |(sx, sy), (x, y)| (sx + x, sy + y));
    (sx / n, sy / n)
}

impl<'a> Graphing<'a> {
    const CHART_COLOR: RGBColor = WHITE;
    const UNMATCHED: RGBColor = GREY_300;

    pub fn new(path: &'a Path) -> Self {
        Graphing { path }
    }

    /// Line chart of gas-range totals per billing month.
    pub fn monthly_trend(&self, totals: &[(Period, u64)], title: &str) -> anyhow::Result<()> {
        if totals.is_empty() {
            bail!("no records match the selected filters");
        }
        let root = BitMapBackend::new(self.path, (1080, 720)).into_drawing_area();
        root.fill(&Self::CHART_COLOR)?;

        let max_total = totals.iter().map(|(_, total)| *total).max().unwrap_or(0) as f64;
        let mut chart = ChartBuilder::on(&root)
            .x_label_area_size(72)
            .y_label_area_size(96)
            .margin(20)
            .caption(title, ("sans-serif", 40.))
            .build_cartesian_2d(0..totals.len(), 0f64..(max_total * 1.1).max(1.))?;

        chart
            .configure_mesh()
            .disable_x_mesh()
            .bold_line_style(WHITE.mix(0.3))
            .y_desc("Gas ranges")
            .x_desc("Billing month")
            .axis_desc_style(("sans-serif", 30))
            .x_label_formatter(&|&idx| {
                totals
                    .get(idx)
                    .and_then(|(period, _)| period.first_day())
                    .map(|day| day.format("%Y-%m").to_string())
                    .unwrap_or_default()
            })
            .y_label_formatter(&|total| format!("{total:.0}"))
            .x_labels(12)
            .y_labels(10)
            .x_label_style(("sans-serif", 16))
            .y_label_style(("sans-serif", 16))
            .draw()?;

        chart.draw_series(LineSeries::new(
            totals
                .iter()
                .enumerate()
                .map(|(idx, (_, total))| (idx, *total as f64)),
            BLUE_600.stroke_width(3),
        ))?;

        root.present()?;

        Ok(())
    }

    /// Bar per target district: red for a decrease, blue for growth.
    pub fn district_decrease(&self, rows: &[DistrictDecrease], title: &str) -> anyhow::Result<()> {
        if rows.is_empty() {
            bail!("no target districts configured");
        }
        let root = BitMapBackend::new(self.path, (1080, 720)).into_drawing_area();
        root.fill(&Self::CHART_COLOR)?;

        let amounts: Vec<f64> = rows.iter().map(|row| row.decrease_amount as f64).collect();
        let low = amounts.iter().copied().fold(0f64, f64::min);
        let high = amounts.iter().copied().fold(0f64, f64::max);
        let pad = ((high - low) * 0.1).max(1.);

        let mut chart = ChartBuilder::on(&root)
            .x_label_area_size(72)
            .y_label_area_size(96)
            .margin(20)
            .caption(title, ("sans-serif", 40.))
            .build_cartesian_2d((0..rows.len()).into_segmented(), (low - pad)..(high + pad))?;

        chart
            .configure_mesh()
            .disable_x_mesh()
            .y_desc("Decrease (base - compare)")
            .x_desc("District")
            .axis_desc_style(("sans-serif", 30))
            .x_label_formatter(&|seg| match seg {
                SegmentValue::Last | SegmentValue::Exact(_) => "".to_string(),
                SegmentValue::CenterOf(idx) => rows
                    .get(*idx)
                    .map(|row| row.district.clone())
                    .unwrap_or_default(),
            })
            .y_label_formatter(&|amount| format!("{amount:.0}"))
            .x_labels(rows.len() * 2)
            .y_labels(10)
            .x_label_style(("sans-serif", 16))
            .y_label_style(("sans-serif", 16))
            .draw()?;

        chart.draw_series(
            Histogram::vertical(&chart)
                .style_func(|_, &amount| {
                    if amount >= 0. {
                        RED.mix(0.7).filled()
                    } else {
                        BLUE_600.filled()
                    }
                })
                .data(amounts.iter().enumerate().map(|(idx, &val)| (idx, val))),
        )?;

        root.present()?;

        Ok(())
    }

    /// Estimated consumption decline per year. Expects year-level rows.
    pub fn estimated_decline(&self, rows: &[EstimateRow], unit: &str) -> anyhow::Result<()> {
        let declines: Vec<(i32, f64)> = rows
            .iter()
            .filter_map(|row| Some((row.year, row.estimated_consumption_decline?)))
            .collect();
        if declines.is_empty() {
            bail!("survey has no consumption and meter data to estimate from");
        }
        let root = BitMapBackend::new(self.path, (1080, 720)).into_drawing_area();
        root.fill(&Self::CHART_COLOR)?;

        let max_decline = declines.iter().fold(0f64, |acc, (_, val)| val.max(acc));
        let mut chart = ChartBuilder::on(&root)
            .x_label_area_size(72)
            .y_label_area_size(110)
            .margin(20)
            .caption("Estimated consumption decline", ("sans-serif", 40.))
            .build_cartesian_2d(
                (0..declines.len()).into_segmented(),
                0f64..(max_decline * 1.1).max(1.),
            )?;

        chart
            .configure_mesh()
            .disable_x_mesh()
            .y_desc(format!("Decline {unit}"))
            .x_desc("Year")
            .axis_desc_style(("sans-serif", 30))
            .x_label_formatter(&|seg| match seg {
                SegmentValue::Last | SegmentValue::Exact(_) => "".to_string(),
                SegmentValue::CenterOf(idx) => declines
                    .get(*idx)
                    .map(|(year, _)| year.to_string())
                    .unwrap_or_default(),
            })
            .y_label_formatter(&|val| format!("{val:.0}"))
            .x_labels(declines.len() * 2)
            .y_labels(10)
            .x_label_style(("sans-serif", 16))
            .y_label_style(("sans-serif", 16))
            .draw()?;

        chart.draw_series(
            Histogram::vertical(&chart)
                .style(BLUE_600.filled())
                .data(declines.iter().enumerate().map(|(idx, (_, val))| (idx, *val))),
        )?;

        root.present()?;

        Ok(())
    }

    /// Choropleth of decrease amount. Districts without a matching feature
    /// simply have no polygon; features without a district are grey.
    pub fn choropleth(
        &self,
        boundaries: &BoundarySet,
        join: &GeoJoin,
        rows: &[DistrictDecrease],
        title: &str,
    ) -> anyhow::Result<()> {
        let bounds = boundaries
            .bounds()
            .ok_or_else(|| anyhow!("boundary file has no polygons"))?;
        let ((min_x, min_y), (max_x, max_y)) = bounds;
        let max_abs = rows
            .iter()
            .map(|row| (row.decrease_amount as f64).abs())
            .fold(1f64, f64::max);

        let root = BitMapBackend::new(self.path, map_canvas(bounds)).into_drawing_area();
        root.fill(&Self::CHART_COLOR)?;

        let mut chart = ChartBuilder::on(&root)
            .margin(20)
            .caption(title, ("sans-serif", 32.))
            .build_cartesian_2d(min_x..max_x, min_y..max_y)?;

        for feature in &boundaries.features {
            let row = join
                .district_for(feature)
                .and_then(|district| rows.iter().find(|row| row.district == district));
            let fill = row.map_or(Self::UNMATCHED, |row| diverging(row.decrease_amount as f64, max_abs));

            let rings = feature.exterior_rings();
            for ring in &rings {
                chart.draw_series(std::iter::once(Polygon::new(ring.clone(), fill.filled())))?;
                chart.draw_series(std::iter::once(PathElement::new(ring.clone(), WHITE.stroke_width(2))))?;
            }

            let largest = rings.iter().max_by_key(|ring| ring.len());
            if let (Some(row), Some(ring)) = (row, largest) {
                chart.draw_series(std::iter::once(Text::new(
                    format!("{} {:+}", row.district, -row.decrease_amount),
                    centroid(ring),
                    ("sans-serif", 18).into_font().color(&BLACK),
                )))?;
            }
        }

        root.present()?;

        Ok(())
    }
}
