//! Renders a resolved period into a ClickHouse aggregation query.
//!
//! `bytes_expression` is operator-supplied and spliced verbatim into the
//! `sum(..)` term. It only gets a shape check at startup; table names, the
//! time bounds and the boundary filter are always built from typed values.
//! Nothing typed into the chat ever reaches this module.

use chrono::{DateTime, Duration, Utc};

use crate::error::ConfigError;
use crate::period::TableBinding;

pub const DEFAULT_BYTES_EXPRESSION: &str = "Bytes * coalesce(SamplingRate, 1)";
pub const DEFAULT_BOUNDARY: &str = "external";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Operator-trusted value expression for the byte counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BytesExpression(String);

impl BytesExpression {
    pub fn parse(raw: Option<&str>) -> Result<Self, ConfigError> {
        let Some(raw) = raw else {
            return Ok(Self::default());
        };
        let expr = raw.trim();
        if expr.is_empty() {
            return Err(ConfigError::BytesExpression("expression is empty".into()));
        }
        if expr.contains(';') {
            return Err(ConfigError::BytesExpression(
                "statement separator ';' is not allowed".into(),
            ));
        }
        if expr.contains("--") || expr.contains("/*") {
            return Err(ConfigError::BytesExpression(
                "comments are not allowed".into(),
            ));
        }
        let has_select = expr
            .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .any(|word| word.eq_ignore_ascii_case("select"));
        if has_select {
            return Err(ConfigError::BytesExpression(
                "sub-selects are not allowed".into(),
            ));
        }
        Ok(Self(expr.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for BytesExpression {
    fn default() -> Self {
        Self(DEFAULT_BYTES_EXPRESSION.to_owned())
    }
}

/// A rendered query plus the parameters it was built from.
#[derive(Debug, Clone)]
pub struct FlowQuery {
    pub sql: String,
    pub binding: TableBinding,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

fn quote_string(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

fn bucket_expression(interval: u32) -> String {
    if interval == 60 {
        "toStartOfMinute(TimeReceived)".to_owned()
    } else {
        format!("toStartOfInterval(TimeReceived, INTERVAL {interval} SECOND)")
    }
}

/// Build the per-bucket, per-interface byte sum for `[now - lookback, now]`.
pub fn build(
    binding: &TableBinding,
    now: DateTime<Utc>,
    bytes: &BytesExpression,
    boundary: &str,
) -> FlowQuery {
    let from = now - Duration::seconds(i64::from(binding.lookback_seconds));
    let to = now;

    let sql = format!(
        "SELECT ExporterName, InIfName, {bucket} AS bucket, sum({bytes}) AS bytes \
         FROM {table} \
         WHERE InIfBoundary = {boundary} \
         AND TimeReceived >= toDateTime('{from}', 'UTC') AND TimeReceived < toDateTime('{to}', 'UTC') \
         GROUP BY ExporterName, InIfName, bucket \
         ORDER BY ExporterName, InIfName, bucket \
         FORMAT TabSeparated",
        bucket = bucket_expression(binding.bucket_interval_seconds),
        bytes = bytes.as_str(),
        table = binding.quoted_table(),
        boundary = quote_string(boundary),
        from = from.format(TIMESTAMP_FORMAT),
        to = to.format(TIMESTAMP_FORMAT),
    );

    FlowQuery {
        sql,
        binding: binding.clone(),
        from,
        to,
    }
}
