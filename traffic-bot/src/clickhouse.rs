use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::{Client, header::CONTENT_TYPE};
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::query::FlowQuery;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const ERROR_BODY_LIMIT: usize = 300;

/// One `(bucket, interface)` row of the aggregation result.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub interface_label: String,
    pub bytes_total: f64,
}

/// Anything that can answer a [`FlowQuery`].
pub trait FlowSource {
    fn fetch(
        &self,
        query: &FlowQuery,
    ) -> impl Future<Output = Result<Vec<TimeSeriesPoint>, FetchError>> + Send;
}

/// Queries the ClickHouse HTTP interface.
pub struct ClickHouseClient {
    client: Client,
    url: String,
}

impl ClickHouseClient {
    pub fn new(url: &str, timeout: Duration) -> reqwest::Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            url: format!("{}/", url.trim_end_matches('/')),
        })
    }
}

impl FlowSource for ClickHouseClient {
    async fn fetch(&self, query: &FlowQuery) -> Result<Vec<TimeSeriesPoint>, FetchError> {
        debug!("Querying {} for {}", self.url, query.binding.source_table);

        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(query.sql.clone())
            .send()
            .await
            .map_err(FetchError::Connection)?;

        let status = response.status();
        let body = response.text().await.map_err(FetchError::Connection)?;

        if !status.is_success() {
            let body: String = body.trim().chars().take(ERROR_BODY_LIMIT).collect();
            return Err(FetchError::Http { status, body });
        }

        let rows = parse_tab_separated(&body)?;
        debug!("Fetched {} rows", rows.len());
        Ok(rows)
    }
}

fn interface_label(exporter: &str, interface: &str) -> String {
    if exporter.is_empty() {
        interface.to_owned()
    } else {
        format!("{exporter} / {interface}")
    }
}

/// Parse `ExporterName \t InIfName \t bucket \t bytes` rows. Any bad line
/// rejects the whole body.
pub fn parse_tab_separated(body: &str) -> Result<Vec<TimeSeriesPoint>, FetchError> {
    let mut rows = Vec::new();

    for (idx, line) in body.lines().enumerate() {
        let line_no = idx + 1;
        if line.trim().is_empty() {
            continue;
        }
        let malformed = |reason: String| {
            warn!("Malformed ClickHouse row {line_no}: {line:?}");
            FetchError::Malformed {
                line: line_no,
                reason,
            }
        };

        let columns: Vec<&str> = line.split('\t').collect();
        let [exporter, interface, bucket, bytes] = columns[..] else {
            return Err(malformed(format!(
                "expected 4 columns, got {}",
                columns.len()
            )));
        };

        let bucket = bucket.trim();
        let timestamp = bucket
            .get(..19)
            .and_then(|ts| NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT).ok())
            .ok_or_else(|| malformed(format!("bad timestamp {bucket:?}")))?
            .and_utc();

        let bytes_total: f64 = bytes
            .trim()
            .parse()
            .map_err(|_| malformed(format!("bad byte count {bytes:?}")))?;
        if !bytes_total.is_finite() || bytes_total < 0.0 {
            return Err(malformed(format!("byte count out of range {bytes_total}")));
        }

        rows.push(TimeSeriesPoint {
            timestamp,
            interface_label: interface_label(exporter.trim(), interface.trim()),
            bytes_total,
        });
    }

    Ok(rows)
}
