use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::clickhouse::TimeSeriesPoint;

pub const TOTAL_LABEL: &str = "total";
const TOTAL_DISPLAY_LABEL: &str = "total (all interfaces)";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SummaryStats {
    pub min: f64,
    pub max: f64,
    pub last: f64,
    pub avg: f64,
    pub p95: f64,
}

/// Statistics for one series. An empty series has no average at all, which
/// is different from an average of zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Summary {
    NoData,
    Stats(SummaryStats),
}

impl Summary {
    pub fn of(points: &[(DateTime<Utc>, f64)]) -> Summary {
        let Some(&(_, last)) = points.last() else {
            return Summary::NoData;
        };

        let mut values: Vec<f64> = points.iter().map(|(_, v)| *v).collect();
        values.sort_by(f64::total_cmp);

        let n = values.len();
        let p95_idx = ((n - 1) as f64 * 0.95).floor() as usize;

        Summary::Stats(SummaryStats {
            min: values[0],
            max: values[n - 1],
            last,
            avg: values.iter().sum::<f64>() / n as f64,
            p95: values[p95_idx],
        })
    }
}

/// Bitrate series for one interface, ascending by timestamp. Missing buckets
/// stay missing.
#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceSeries {
    pub label: String,
    pub points: Vec<(DateTime<Utc>, f64)>,
    pub summary: Summary,
}

impl InterfaceSeries {
    fn new(label: String, points: Vec<(DateTime<Utc>, f64)>) -> Self {
        let summary = Summary::of(&points);
        Self {
            label,
            points,
            summary,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    pub interfaces: Vec<InterfaceSeries>,
    pub total: InterfaceSeries,
}

/// Where a series came from. Interface labels are free text from the data
/// source, so the synthesized total is told apart by role, not by label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesRole {
    Interface,
    Total,
}

#[derive(Debug, Clone, Copy)]
pub struct SeriesView<'a> {
    pub role: SeriesRole,
    pub series: &'a InterfaceSeries,
}

impl SeriesView<'_> {
    pub fn is_total(&self) -> bool {
        self.role == SeriesRole::Total
    }

    /// Label for captions and legends.
    pub fn display_label(&self) -> &str {
        match self.role {
            SeriesRole::Interface => &self.series.label,
            SeriesRole::Total => TOTAL_DISPLAY_LABEL,
        }
    }
}

impl Aggregation {
    pub fn is_empty(&self) -> bool {
        self.total.points.is_empty()
    }

    /// Interfaces in label order, then the total.
    pub fn all_series(&self) -> impl Iterator<Item = SeriesView<'_>> {
        let interfaces = self.interfaces.iter().map(|series| SeriesView {
            role: SeriesRole::Interface,
            series,
        });
        interfaces.chain(std::iter::once(SeriesView {
            role: SeriesRole::Total,
            series: &self.total,
        }))
    }
}

pub fn bytes_to_bps(bytes: f64, interval_seconds: u32) -> f64 {
    bytes * 8.0 / f64::from(interval_seconds)
}

/// Group rows per interface, convert bytes per bucket to bits per second and
/// synthesise the per-bucket total across interfaces.
pub fn aggregate(rows: &[TimeSeriesPoint], interval_seconds: u32) -> Aggregation {
    let mut per_interface: BTreeMap<&str, BTreeMap<DateTime<Utc>, f64>> = BTreeMap::new();
    let mut total: BTreeMap<DateTime<Utc>, f64> = BTreeMap::new();

    for row in rows {
        let bps = bytes_to_bps(row.bytes_total, interval_seconds);
        *per_interface
            .entry(row.interface_label.as_str())
            .or_default()
            .entry(row.timestamp)
            .or_default() += bps;
        *total.entry(row.timestamp).or_default() += bps;
    }

    let interfaces = per_interface
        .into_iter()
        .map(|(label, points)| InterfaceSeries::new(label.to_owned(), points.into_iter().collect()))
        .collect();

    Aggregation {
        interfaces,
        total: InterfaceSeries::new(TOTAL_LABEL.to_owned(), total.into_iter().collect()),
    }
}
