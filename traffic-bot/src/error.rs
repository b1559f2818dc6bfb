//! Error taxonomy for the reporting pipeline.
//!
//! `ConfigError` is fatal at startup. Everything else is recoverable and is
//! turned into exactly one chat reply by the interaction layer.

use thiserror::Error;

use crate::period::Period;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("period {period}: {field} must be positive")]
    NonPositive { period: Period, field: &'static str },

    #[error("period {period}: interval {interval}s exceeds lookback {lookback}s")]
    IntervalExceedsLookback {
        period: Period,
        interval: u32,
        lookback: u32,
    },

    #[error("period {period}: invalid table name {table:?}")]
    InvalidTable { period: Period, table: String },

    #[error("bytes_expression rejected: {0}")]
    BytesExpression(String),

    #[error("invalid display_timezone {0:?}: expected UTC±N, ±HH:MM or a zone name")]
    DisplayTimezone(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("timezone offset {0} is outside [-12, +14]")]
    OffsetOutOfRange(i32),

    #[error("{0:?} is not a timezone offset")]
    Unparsable(String),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("data source unreachable: {0}")]
    Connection(#[source] reqwest::Error),

    #[error("data source returned HTTP {status}: {body}")]
    Http {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("malformed response at line {line}: {reason}")]
    Malformed { line: usize, reason: String },
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("chart markup rejected: {0}")]
    Markup(#[from] resvg::usvg::Error),

    #[error("chart canvas {width}x{height} cannot be allocated")]
    Canvas { width: u32, height: u32 },

    #[error("PNG encoding failed: {0}")]
    Encode(String),

    #[error("render task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("no data for the requested period")]
    NoData,
}

impl ReportError {
    /// The single message shown to the chat for a failed report.
    pub fn user_message(&self) -> &'static str {
        match self {
            ReportError::Fetch(FetchError::Connection(_)) => {
                "The traffic database is unreachable right now. Please try again later."
            }
            ReportError::Fetch(_) | ReportError::Render(_) => {
                "Traffic data is unavailable at the moment."
            }
            ReportError::NoData => "No traffic data for the selected period.",
        }
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("settings file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("settings file {path} is not a valid timezone map: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_failure_reads_as_unavailable_data() {
        let err = ReportError::from(RenderError::Canvas { width: 0, height: 0 });
        assert_eq!(err.user_message(), "Traffic data is unavailable at the moment.");
    }
}
