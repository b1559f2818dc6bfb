use std::fmt::Write;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::aggregate::{Aggregation, Summary, aggregate};
use crate::clickhouse::FlowSource;
use crate::error::{FetchError, ReportError};
use crate::period::{Bindings, Period};
use crate::query::{self, BytesExpression};
use crate::timezone::DisplayZone;

/// Aggregated traffic for one period, ready to render.
#[derive(Debug, Clone)]
pub struct TrafficReport {
    pub period: Period,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub interval_seconds: u32,
    pub aggregation: Aggregation,
}

/// Period resolution, query, fetch and aggregation in one place.
pub struct ReportPipeline<S> {
    source: S,
    bindings: Bindings,
    bytes: BytesExpression,
    boundary: String,
}

impl<S: FlowSource> ReportPipeline<S> {
    pub fn new(source: S, bindings: Bindings, bytes: BytesExpression, boundary: String) -> Self {
        Self {
            source,
            bindings,
            bytes,
            boundary,
        }
    }

    pub async fn build(&self, period: Period, now: DateTime<Utc>) -> Result<TrafficReport, ReportError> {
        let binding = self.bindings.get(period);
        let query = query::build(binding, now, &self.bytes, &self.boundary);

        let rows = self.source.fetch(&query).await.inspect_err(|e| match e {
            FetchError::Connection(_) => {
                warn!("Fetch for {period} from {} failed: {e}", binding.source_table)
            }
            _ => error!(
                "Fetch for {period} from {} failed: {e}; query: {}",
                binding.source_table, query.sql
            ),
        })?;

        let aggregation = aggregate(&rows, binding.bucket_interval_seconds);
        if aggregation.is_empty() {
            info!("No rows for {period} in {}", binding.source_table);
            return Err(ReportError::NoData);
        }

        info!(
            "Built {period} report: {} rows, {} interfaces",
            rows.len(),
            aggregation.interfaces.len()
        );

        Ok(TrafficReport {
            period,
            from: query.from,
            to: query.to,
            interval_seconds: binding.bucket_interval_seconds,
            aggregation,
        })
    }
}

/// `1.23 Gbps` at or above one gigabit, `456.00 Mbps` below.
pub fn format_bps(bps: f64) -> String {
    let gbps = bps / 1e9;
    if gbps >= 1.0 {
        format!("{gbps:.2} Gbps")
    } else {
        format!("{:.2} Mbps", bps / 1e6)
    }
}

fn format_summary(summary: &Summary) -> String {
    match summary {
        Summary::NoData => "no data".to_owned(),
        Summary::Stats(s) => format!(
            "min {}, max {}, last {}, avg {}, p95 {}",
            format_bps(s.min),
            format_bps(s.max),
            format_bps(s.last),
            format_bps(s.avg),
            format_bps(s.p95),
        ),
    }
}

/// Chart caption: period, time slice in the viewer's zone, and one stats
/// line per series.
pub fn caption(report: &TrafficReport, zone: DisplayZone) -> String {
    let from = zone.format(report.from, "%d.%m %H:%M");
    let to = zone.format(report.to, "%d.%m %H:%M");

    let mut out = format!(
        "Traffic, last {}\n{from} - {to} {}\n",
        report.period.label(),
        zone.label()
    );
    for view in report.aggregation.all_series() {
        let _ = write!(
            out,
            "\n{}: {}",
            view.display_label(),
            format_summary(&view.series.summary)
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::clickhouse::TimeSeriesPoint;
    use crate::period::PeriodOverrides;
    use crate::query::FlowQuery;

    struct FakeSource {
        rows: Vec<TimeSeriesPoint>,
        seen: Mutex<Vec<String>>,
    }

    impl FlowSource for FakeSource {
        async fn fetch(&self, query: &FlowQuery) -> Result<Vec<TimeSeriesPoint>, FetchError> {
            self.seen.lock().unwrap().push(query.sql.clone());
            Ok(self.rows.clone())
        }
    }

    fn pipeline(rows: Vec<TimeSeriesPoint>) -> ReportPipeline<FakeSource> {
        ReportPipeline::new(
            FakeSource {
                rows,
                seen: Mutex::new(Vec::new()),
            },
            Bindings::resolve_all(&PeriodOverrides::default()).unwrap(),
            BytesExpression::default(),
            "external".to_owned(),
        )
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn formats_units() {
        assert_eq!(format_bps(2_346_000_000.0), "2.35 Gbps");
        assert_eq!(format_bps(770_000_000.0), "770.00 Mbps");
        assert_eq!(format_bps(0.0), "0.00 Mbps");
    }

    #[tokio::test]
    async fn six_hour_report_end_to_end() {
        let start = now() - Duration::hours(6);
        let rows: Vec<_> = (0..360)
            .flat_map(|m| {
                [("edge / et0", 75_000_000.0), ("edge / et1", 150_000_000.0)].map(
                    |(label, bytes)| TimeSeriesPoint {
                        timestamp: start + Duration::minutes(m),
                        interface_label: label.to_owned(),
                        bytes_total: bytes,
                    },
                )
            })
            .collect();
        let pipeline = pipeline(rows);

        let report = pipeline.build(Period::SixHours, now()).await.unwrap();
        assert_eq!(report.interval_seconds, 60);
        assert_eq!(report.aggregation.interfaces.len(), 2);
        assert!(report.aggregation.interfaces.iter().all(|s| s.points.len() <= 360));
        assert_eq!(report.aggregation.total.points.len(), 360);
        assert_eq!(report.aggregation.total.points[0].1, 30_000_000.0);

        let seen = pipeline.source.seen.lock().unwrap();
        assert!(seen[0].contains("`flows_1m0s`"));
        drop(seen);

        let text = caption(&report, DisplayZone::from_hours(3).unwrap());
        assert!(text.contains("01.05 09:00 - 01.05 15:00 UTC+3"));
        let stats_lines: Vec<&str> = text.lines().filter(|l| l.contains("min ")).collect();
        assert_eq!(stats_lines.len(), 3);
        for line in stats_lines {
            for field in ["min ", "max ", "last ", "avg "] {
                assert!(line.contains(field), "{line} lacks {field}");
            }
        }
        assert!(text.contains("total (all interfaces): min 30.00 Mbps"));

        let berlin = DisplayZone::parse("Europe/Berlin").unwrap();
        assert!(caption(&report, berlin).contains("01.05 08:00 - 01.05 14:00 Europe/Berlin"));
    }

    #[tokio::test]
    async fn empty_result_is_no_data() {
        let err = pipeline(Vec::new()).build(Period::Day, now()).await.unwrap_err();
        assert!(matches!(err, ReportError::NoData));
    }

    #[test]
    fn no_data_series_is_not_zero() {
        assert_eq!(format_summary(&Summary::NoData), "no data");
    }
}
