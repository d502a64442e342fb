//! Per-farm abortion-rate charts.
//!
//! Rendering is split in two: [`plan_charts`] turns the processed table into
//! one [`ChartPlan`] per farm (all the geometry and classification), and
//! [`draw_chart`] paints a plan with plotters' bitmap backend.

use crate::config::ChartConfig;
use crate::models::{ChartCounts, FarmDayRecord, FarmDayTable, OutbreakInterval, RiskBand, RiskTier};
use crate::models::{ELEVATED_THRESHOLD, HIGH_THRESHOLD};
use crate::progress;
use anyhow::{Context, Result};
use chrono::{Datelike, Duration, NaiveDate};
use plotters::prelude::*;
use plotters::series::DashedLineSeries;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info};

const PEER_BAND: RGBColor = RGBColor(0x8A, 0x2B, 0xE2);
const PEER_SCATTER: RGBColor = RGBColor(128, 128, 128);
const ELEVATED_LINE: RGBColor = RGBColor(0, 100, 0);
const HIGH_LINE: RGBColor = RGBColor(139, 0, 0);
const ORANGE: RGBColor = RGBColor(255, 165, 0);
const FONT: &str = "sans-serif";

/// One day of a farm's series.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartPoint {
    pub date: NaiveDate,
    pub rate: Option<f64>,
    pub peer_mean: Option<f64>,
    pub peer_stddev: Option<f64>,
    pub positivity: Option<f64>,
}

/// A line piece between two consecutive reported days.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub from: (NaiveDate, f64),
    pub to: (NaiveDate, f64),
    pub band: RiskBand,
}

/// An outbreak overlapping the chart, with its visible part.
#[derive(Debug, Clone, PartialEq)]
pub struct OutbreakWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub visible_start: NaiveDate,
    pub visible_end: NaiveDate,
}

/// Everything needed to draw one farm's chart.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartPlan {
    pub farm_id: String,
    pub farm_name: String,
    pub org_unit: String,
    pub tier: RiskTier,
    pub first: NaiveDate,
    pub last: NaiveDate,
    pub points: Vec<ChartPoint>,
    pub segments: Vec<Segment>,
    /// Rates of the other farms of the same unit on the charted days.
    pub peer_points: Vec<(NaiveDate, f64)>,
    pub outbreaks: Vec<OutbreakWindow>,
}

impl ChartPlan {
    pub fn day_span(&self) -> i64 {
        (self.last - self.first).num_days()
    }

    /// `<tier><farm>_abortion_rate.png`
    pub fn file_name(&self) -> String {
        let safe: String = self
            .farm_name
            .chars()
            .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
            .collect();
        format!("{}{}_abortion_rate.png", self.tier.prefix(), safe)
    }

    pub fn title(&self) -> String {
        let (start, end) = (self.first.year(), self.last.year());
        let years = if start == end {
            start.to_string()
        } else {
            format!("{}-{}", start, end)
        };
        format!("{} {} abortion rate and related indicators", years, self.farm_name)
    }

    /// Days between x-axis labels.
    pub fn tick_interval(&self) -> i64 {
        match self.day_span() {
            span if span <= 60 => 1,
            span if span <= 180 => 3,
            span if span <= 365 => 7,
            _ => 14,
        }
    }

    fn x(&self, date: NaiveDate) -> f64 {
        (date - self.first).num_days() as f64
    }

    fn date_label(&self, x: f64) -> String {
        (self.first + Duration::days(x.round() as i64))
            .format("%Y-%m-%d")
            .to_string()
    }
}

/// Risk-coloured segments between consecutive days; gaps are not bridged.
fn build_segments(points: &[ChartPoint]) -> Vec<Segment> {
    points
        .windows(2)
        .filter_map(|pair| {
            let (a, b) = (pair[0].rate?, pair[1].rate?);
            Some(Segment {
                from: (pair[0].date, a),
                to: (pair[1].date, b),
                band: RiskBand::from_rate(a.max(b)),
            })
        })
        .collect()
}

/// Plan one chart per farm (grouped by display name), in name order.
///
/// Farms whose abortion rate is missing on every day are skipped; the second
/// value is how many were skipped.
pub fn plan_charts(table: &FarmDayTable, outbreaks: &[OutbreakInterval]) -> (Vec<ChartPlan>, usize) {
    let mut farms: BTreeMap<&str, Vec<&FarmDayRecord>> = BTreeMap::new();
    let mut cohorts: HashMap<(NaiveDate, &str), Vec<&FarmDayRecord>> = HashMap::new();
    for record in &table.records {
        farms.entry(record.farm_name.as_str()).or_default().push(record);
        cohorts
            .entry((record.date, record.org_unit.as_str()))
            .or_default()
            .push(record);
    }

    let mut outbreaks_by_farm: HashMap<&str, Vec<&OutbreakInterval>> = HashMap::new();
    for outbreak in outbreaks {
        outbreaks_by_farm
            .entry(outbreak.farm_id.as_str())
            .or_default()
            .push(outbreak);
    }

    let mut plans = Vec::new();
    let mut skipped = 0;

    for (farm_name, mut rows) in farms {
        let peak = rows
            .iter()
            .filter_map(|r| r.abortion_rate)
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))));
        let Some(peak) = peak else {
            debug!("Skipping {}: no abortion rate reported", farm_name);
            skipped += 1;
            continue;
        };

        rows.sort_by_key(|r| r.date);
        let head: &FarmDayRecord = rows[0];
        let farm_id = head.farm_id.clone();
        let org_unit = head.org_unit.clone();
        let first = rows[0].date;
        let last = rows[rows.len() - 1].date;

        let points: Vec<ChartPoint> = rows
            .iter()
            .map(|r| ChartPoint {
                date: r.date,
                rate: r.abortion_rate,
                peer_mean: r.peer_mean,
                peer_stddev: r.peer_stddev,
                positivity: r.positivity_ratio,
            })
            .collect();

        let mut days: Vec<NaiveDate> = rows.iter().map(|r| r.date).collect();
        days.dedup();
        let peer_points = days
            .iter()
            .filter_map(|day| cohorts.get(&(*day, head.org_unit.as_str())))
            .flatten()
            .filter(|r| r.farm_id != farm_id)
            .filter_map(|r| r.abortion_rate.map(|rate| (r.date, rate)))
            .collect();

        let windows = outbreaks_by_farm
            .get(farm_id.as_str())
            .into_iter()
            .flatten()
            .filter_map(|o| {
                o.clip(first, last).map(|(visible_start, visible_end)| OutbreakWindow {
                    start: o.start,
                    end: o.end,
                    visible_start,
                    visible_end,
                })
            })
            .collect();

        plans.push(ChartPlan {
            farm_id,
            farm_name: farm_name.to_string(),
            org_unit,
            tier: RiskTier::from_peak(peak),
            first,
            last,
            segments: build_segments(&points),
            points,
            peer_points,
            outbreaks: windows,
        });
    }

    (plans, skipped)
}

/// Five-pointed star outline in backend pixels around the origin.
fn star(radius: i32) -> Vec<(i32, i32)> {
    (0..10)
        .map(|i| {
            let r = if i % 2 == 0 { radius as f64 } else { radius as f64 * 0.4 };
            let angle = std::f64::consts::PI / 5.0 * i as f64 - std::f64::consts::FRAC_PI_2;
            ((r * angle.cos()).round() as i32, (r * angle.sin()).round() as i32)
        })
        .collect()
}

/// Contiguous runs of points where `f` yields a value, keyed by x.
fn runs<T, F>(plan: &ChartPlan, f: F) -> Vec<Vec<(f64, T)>>
where
    F: Fn(&ChartPoint) -> Option<T>,
{
    let mut out: Vec<Vec<(f64, T)>> = vec![Vec::new()];
    for point in &plan.points {
        match f(point) {
            Some(value) => {
                if let Some(run) = out.last_mut() {
                    run.push((plan.x(point.date), value));
                }
            }
            None => out.push(Vec::new()),
        }
    }
    out.retain(|run| !run.is_empty());
    out
}

/// Paint `plan` into a PNG at `path`.
pub fn draw_chart(plan: &ChartPlan, path: &Path, config: &ChartConfig) -> Result<()> {
    let span = plan.day_span();
    let y_max = plan.tier.y_max();
    let y_step = plan.tier.y_step();

    let x_labels = (span / plan.tick_interval() + 2) as usize;
    let y_labels = (y_max / y_step).round() as usize + 1;

    let root = BitMapBackend::new(path, config.canvas_size(span)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(plan.title(), (FONT, 32))
        .margin(30)
        .x_label_area_size(110)
        .y_label_area_size(80)
        .build_cartesian_2d(-1.0..span as f64 + 1.0, 0.0..y_max)?;

    let x_label = |x: &f64| plan.date_label(*x);
    let y_label = |y: &f64| format!("{:.3}", y);
    chart
        .configure_mesh()
        .x_labels(x_labels)
        .y_labels(y_labels)
        .x_label_formatter(&x_label)
        .y_label_formatter(&y_label)
        .x_label_style((FONT, 14).into_font().transform(FontTransform::Rotate90))
        .y_label_style((FONT, 14))
        .x_desc("date")
        .y_desc("rate")
        .bold_line_style(BLACK.mix(0.12))
        .light_line_style(TRANSPARENT)
        .draw()?;

    // outbreak windows
    let label_style = (FONT, 14)
        .into_font()
        .transform(FontTransform::Rotate90)
        .color(&RED);
    for (i, window) in plan.outbreaks.iter().enumerate() {
        let (x0, x1) = (plan.x(window.visible_start), plan.x(window.visible_end));
        let shade = chart.draw_series(std::iter::once(Rectangle::new(
            [(x0, 0.0), (x1, y_max)],
            RED.mix(0.2).filled(),
        )))?;
        if i == 0 {
            shade
                .label("outbreak window")
                .legend(|(x, y)| Rectangle::new([(x, y - 6), (x + 20, y + 6)], RED.mix(0.2).filled()));
        }

        for x in [x0, x1] {
            chart.draw_series(DashedLineSeries::new(
                vec![(x, 0.0), (x, y_max)],
                8,
                5,
                RED.mix(0.7).stroke_width(1),
            ))?;
        }

        chart.draw_series([
            Text::new(window.start.format("%Y-%m-%d").to_string(), (x0, y_max * 0.95), label_style.clone()),
            Text::new(window.end.format("%Y-%m-%d").to_string(), (x1, y_max * 0.95), label_style.clone()),
        ])?;
    }

    // reference thresholds
    for (level, color) in [(ELEVATED_THRESHOLD, ELEVATED_LINE), (HIGH_THRESHOLD, HIGH_LINE)] {
        chart.draw_series(DashedLineSeries::new(
            vec![(-1.0, level), (span as f64 + 1.0, level)],
            10,
            6,
            color.mix(0.7).stroke_width(1),
        ))?;
    }

    // peer mean +/- one standard deviation
    let band_runs = runs(plan, |p| {
        p.peer_mean
            .zip(p.peer_stddev)
            .map(|(mean, sd)| ((mean - sd).max(0.0), mean + sd))
    });
    for (i, run) in band_runs.iter().enumerate() {
        let outline: Vec<(f64, f64)> = run
            .iter()
            .map(|(x, (_, upper))| (*x, *upper))
            .chain(run.iter().rev().map(|(x, (lower, _))| (*x, *lower)))
            .collect();
        let fill = chart.draw_series(std::iter::once(Polygon::new(outline, PEER_BAND.mix(0.1).filled())))?;
        if i == 0 {
            fill.label("peer mean ± stddev").legend(|(x, y)| {
                Rectangle::new([(x, y - 6), (x + 20, y + 6)], PEER_BAND.mix(0.1).filled())
            });
        }
        chart.draw_series(LineSeries::new(
            run.iter().map(|(x, (_, upper))| (*x, *upper)),
            PEER_BAND.mix(0.7).stroke_width(1),
        ))?;
        chart.draw_series(LineSeries::new(
            run.iter().map(|(x, (lower, _))| (*x, *lower)),
            PEER_BAND.mix(0.7).stroke_width(1),
        ))?;
    }

    for (i, run) in runs(plan, |p| p.peer_mean).into_iter().enumerate() {
        let line = chart.draw_series(LineSeries::new(run, BLUE.stroke_width(2)))?;
        if i == 0 {
            line.label("peer mean")
                .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE.stroke_width(2)));
        }
    }

    // other farms of the same unit
    chart
        .draw_series(
            plan.peer_points
                .iter()
                .map(|(date, rate)| Circle::new((plan.x(*date), *rate), 3, PEER_SCATTER.mix(0.3).filled())),
        )?
        .label("other farms in unit")
        .legend(|(x, y)| Circle::new((x + 10, y), 3, PEER_SCATTER.mix(0.3).filled()));

    // abortion-rate line coloured by risk band
    for segment in &plan.segments {
        let color = match segment.band {
            RiskBand::Low => GREEN,
            RiskBand::Elevated => ORANGE,
            RiskBand::High => RED,
        };
        chart.draw_series(LineSeries::new(
            [
                (plan.x(segment.from.0), segment.from.1),
                (plan.x(segment.to.0), segment.to.1),
            ],
            color.stroke_width(2),
        ))?;
    }
    for (label, color) in [
        ("rate < 2.5‰", GREEN),
        ("2.5‰ ≤ rate < 5‰", ORANGE),
        ("rate ≥ 5‰", RED),
    ] {
        chart
            .draw_series(std::iter::empty::<PathElement<(f64, f64)>>())?
            .label(label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));
    }

    // reported and missing observations
    chart
        .draw_series(plan.points.iter().filter_map(|p| {
            p.rate
                .map(|rate| Circle::new((plan.x(p.date), rate), 4, BLACK.filled()))
        }))?
        .label("abortion rate")
        .legend(|(x, y)| Circle::new((x + 10, y), 4, BLACK.filled()));
    chart
        .draw_series(plan.points.iter().filter(|p| p.rate.is_none()).map(|p| {
            Circle::new((plan.x(p.date), 0.0), 4, BLACK.stroke_width(2))
        }))?
        .label("abortion rate missing")
        .legend(|(x, y)| Circle::new((x + 10, y), 4, BLACK.stroke_width(2)));

    // positivity overlay
    chart
        .draw_series(plan.points.iter().filter_map(|p| {
            p.positivity.map(|ratio| {
                EmptyElement::at((plan.x(p.date), ratio)) + Polygon::new(star(9), RED.mix(0.7).filled())
            })
        }))?
        .label("PRRS positivity ratio")
        .legend(|(x, y)| EmptyElement::at((x + 10, y)) + Polygon::new(star(7), RED.mix(0.7).filled()));

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperRight)
        .label_font((FONT, 16))
        .background_style(WHITE.mix(0.85))
        .border_style(BLACK)
        .draw()?;

    root.present()
        .with_context(|| format!("Failed to write chart {}", path.display()))?;
    Ok(())
}

/// Plan and draw every farm chart of a division into `dir`.
pub fn render_division(
    table: &FarmDayTable,
    outbreaks: &[OutbreakInterval],
    dir: &Path,
    config: &ChartConfig,
    show_progress: bool,
) -> Result<ChartCounts> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create chart directory {}", dir.display()))?;

    let (plans, skipped) = plan_charts(table, outbreaks);
    let mut counts = ChartCounts {
        skipped,
        ..Default::default()
    };

    let pb = progress::bar(plans.len() as u64, "charts", show_progress);
    for plan in &plans {
        let path = dir.join(plan.file_name());
        draw_chart(plan, &path, config)
            .with_context(|| format!("Failed to render chart for farm {}", plan.farm_name))?;
        counts.record(plan.tier);
        pb.inc(1);
    }
    pb.finish_and_clear();

    info!(
        "Wrote {} charts to {} ({} farms skipped)",
        counts.total(),
        dir.display(),
        skipped
    );
    Ok(counts)
}
