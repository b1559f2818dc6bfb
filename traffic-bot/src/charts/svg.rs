use std::fmt::Write;

use chrono::{DateTime, Utc};
use maud::{Markup, html};

use crate::aggregate::SeriesView;
use crate::report::{TrafficReport, format_bps};
use crate::timezone::DisplayZone;

const WIDTH: f64 = 960.0;
const HEIGHT: f64 = 420.0;
const MARGIN_LEFT: f64 = 80.0;
const MARGIN_RIGHT: f64 = 20.0;
const MARGIN_TOP: f64 = 50.0;
const MARGIN_BOTTOM: f64 = 40.0;
const LEGEND_ROW: f64 = 16.0;

const TEXT_STYLE: &str = "fill: #222; font-family: sans-serif";
const PALETTE: [&str; 10] = [
    "#1f77b4", "#ff7f0e", "#2ca02c", "#d62728", "#9467bd", "#8c564b", "#e377c2", "#7f7f7f",
    "#bcbd22", "#17becf",
];

fn format_time(ts: DateTime<Utc>, zone: DisplayZone) -> String {
    zone.format(ts, "%d.%m %H:%M")
}

struct Scale {
    from: DateTime<Utc>,
    span_secs: f64,
    max_bps: f64,
    chart_w: f64,
    chart_h: f64,
}

impl Scale {
    fn x(&self, ts: DateTime<Utc>) -> f64 {
        let offset = (ts - self.from).num_seconds() as f64;
        MARGIN_LEFT + (offset / self.span_secs).clamp(0.0, 1.0) * self.chart_w
    }

    fn y(&self, bps: f64) -> f64 {
        MARGIN_TOP + self.chart_h - (bps / self.max_bps) * self.chart_h
    }
}

fn polyline_points(points: &[(DateTime<Utc>, f64)], scale: &Scale) -> String {
    let mut out = String::new();
    for (ts, bps) in points {
        if !out.is_empty() {
            out.push(' ');
        }
        let _ = write!(out, "{:.1},{:.1}", scale.x(*ts), scale.y(*bps));
    }
    out
}

fn series_colour(index: usize, view: &SeriesView<'_>) -> &'static str {
    if view.is_total() {
        "#000"
    } else {
        PALETTE[index % PALETTE.len()]
    }
}

/// Line chart of every interface plus the total, x axis in the viewer's
/// zone.
pub fn render_traffic_chart(report: &TrafficReport, zone: DisplayZone) -> Markup {
    let title = format!("External traffic, last {}", report.period.label());
    if report.aggregation.is_empty() {
        return empty_chart(&title);
    }

    let series: Vec<SeriesView<'_>> = report.aggregation.all_series().collect();
    let legend_h = LEGEND_ROW * series.len() as f64;
    let total_h = HEIGHT + legend_h;

    let max_bps = series
        .iter()
        .flat_map(|s| s.series.points.iter().map(|(_, v)| *v))
        .fold(0.0_f64, f64::max);
    let scale = Scale {
        from: report.from,
        span_secs: ((report.to - report.from).num_seconds() as f64).max(1.0),
        max_bps: if max_bps == 0.0 { 1.0 } else { max_bps },
        chart_w: WIDTH - MARGIN_LEFT - MARGIN_RIGHT,
        chart_h: HEIGHT - MARGIN_TOP - MARGIN_BOTTOM,
    };

    let label_y = HEIGHT - 15.0;
    let mid = report.from + (report.to - report.from) / 2;
    let tz = zone.label();

    html! {
        svg viewBox=(format!("0 0 {WIDTH} {total_h}")) xmlns="http://www.w3.org/2000/svg" width=(WIDTH) height=(total_h) {
            rect width=(WIDTH) height=(total_h) style="fill: #fff" {}
            text x=(MARGIN_LEFT) y="20" font-size="14" style=(TEXT_STYLE) { (title) }
            text x=(MARGIN_LEFT) y="38" font-size="11" style=(TEXT_STYLE) {
                (format_time(report.from, zone)) " - " (format_time(report.to, zone)) " " (tz)
            }
            text x=(MARGIN_LEFT - 5.0) y=(MARGIN_TOP + 10.0) font-size="10" text-anchor="end" style=(TEXT_STYLE) {
                (format_bps(scale.max_bps))
            }
            text x=(MARGIN_LEFT - 5.0) y=(MARGIN_TOP + scale.chart_h) font-size="10" text-anchor="end" style=(TEXT_STYLE) { "0" }
            line x1=(MARGIN_LEFT) y1=(MARGIN_TOP + scale.chart_h) x2=(MARGIN_LEFT + scale.chart_w) y2=(MARGIN_TOP + scale.chart_h) stroke="#999" {}
            @for (i, s) in series.iter().enumerate() {
                @let color = series_colour(i, s);
                @let width = if s.is_total() { "2" } else { "1.2" };
                @for run in super::contiguous_runs(&s.series.points, report.interval_seconds) {
                    @if run.len() == 1 {
                        circle cx=(scale.x(run[0].0)) cy=(scale.y(run[0].1)) r="2" style=(format!("fill: {color}")) {}
                    } @else {
                        polyline points=(polyline_points(run, &scale)) fill="none" stroke=(color) stroke-width=(width) {}
                    }
                }
                @let legend_y = HEIGHT + LEGEND_ROW * i as f64;
                rect x=(MARGIN_LEFT) y=(legend_y - 9.0) width="12" height="3" style=(format!("fill: {color}")) {}
                text x=(MARGIN_LEFT + 18.0) y=(legend_y) font-size="11" style=(TEXT_STYLE) { (s.display_label()) }
            }
            text x=(MARGIN_LEFT) y=(label_y) font-size="11" text-anchor="start" style=(TEXT_STYLE) {
                (format_time(report.from, zone))
            }
            text x=(MARGIN_LEFT + scale.chart_w / 2.0) y=(label_y) font-size="11" text-anchor="middle" style=(TEXT_STYLE) {
                (format_time(mid, zone))
            }
            text x=(MARGIN_LEFT + scale.chart_w) y=(label_y) font-size="11" text-anchor="end" style=(TEXT_STYLE) {
                (format_time(report.to, zone))
            }
        }
    }
}

fn empty_chart(label: &str) -> Markup {
    html! {
        svg viewBox=(format!("0 0 {WIDTH} {HEIGHT}")) xmlns="http://www.w3.org/2000/svg" width=(WIDTH) height=(HEIGHT) {
            rect width=(WIDTH) height=(HEIGHT) style="fill: #fff" {}
            text x=(WIDTH / 2.0) y=(HEIGHT / 2.0) font-size="14" text-anchor="middle" style=(TEXT_STYLE) {
                (label) ": no data"
            }
        }
    }
}
