use std::fmt;

use crate::error::ConfigError;

/// Reporting windows offered in the chat menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Period {
    OneHour,
    SixHours,
    Day,
    Week,
}

impl Period {
    pub const ALL: [Period; 4] = [Period::OneHour, Period::SixHours, Period::Day, Period::Week];

    /// Token used in commands (`/graph_6h`) and button payloads.
    pub fn token(self) -> &'static str {
        match self {
            Period::OneHour => "1h",
            Period::SixHours => "6h",
            Period::Day => "24h",
            Period::Week => "7d",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Period::OneHour => "1 hour",
            Period::SixHours => "6 hours",
            Period::Day => "24 hours",
            Period::Week => "7 days",
        }
    }

    pub fn from_token(token: &str) -> Option<Period> {
        Period::ALL
            .into_iter()
            .find(|p| p.token().eq_ignore_ascii_case(token))
    }

    fn default_binding(self) -> TableBinding {
        let (table, interval, lookback) = match self {
            Period::OneHour => ("flows_1m0s", 60, 3_600),
            Period::SixHours => ("flows_1m0s", 60, 6 * 3_600),
            Period::Day => ("flows_5m0s", 300, 24 * 3_600),
            Period::Week => ("flows_5m0s", 300, 7 * 24 * 3_600),
        };
        TableBinding {
            source_table: table.to_owned(),
            bucket_interval_seconds: interval,
            lookback_seconds: lookback,
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Data source table and bucketing for one period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableBinding {
    pub source_table: String,
    pub bucket_interval_seconds: u32,
    pub lookback_seconds: u32,
}

impl TableBinding {
    /// Table name back-quoted for the query, `db.table` split into two
    /// identifiers. Only valid after [`validate_table_name`] accepted it.
    pub fn quoted_table(&self) -> String {
        self.source_table
            .split('.')
            .map(|part| format!("`{part}`"))
            .collect::<Vec<_>>()
            .join(".")
    }
}

/// Operator overrides for a single period. Unset fields keep the built-in
/// default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeriodOverride {
    pub table: Option<String>,
    pub interval_sec: Option<i64>,
    pub lookback_sec: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeriodOverrides {
    pub one_hour: PeriodOverride,
    pub six_hours: PeriodOverride,
    pub day: PeriodOverride,
    pub week: PeriodOverride,
}

impl PeriodOverrides {
    pub fn get(&self, period: Period) -> &PeriodOverride {
        match period {
            Period::OneHour => &self.one_hour,
            Period::SixHours => &self.six_hours,
            Period::Day => &self.day,
            Period::Week => &self.week,
        }
    }
}

fn positive(period: Period, field: &'static str, value: i64) -> Result<u32, ConfigError> {
    if value <= 0 {
        return Err(ConfigError::NonPositive { period, field });
    }
    u32::try_from(value).map_err(|_| ConfigError::NonPositive { period, field })
}

/// Accepts `table` or `db.table` where each part is `[A-Za-z0-9_]+`.
fn validate_table_name(period: Period, table: &str) -> Result<(), ConfigError> {
    let parts: Vec<&str> = table.split('.').collect();
    let valid = parts.len() <= 2
        && parts.iter().all(|part| {
            !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        });
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidTable {
            period,
            table: table.to_owned(),
        })
    }
}

/// Merge the built-in default for `period` with the operator override,
/// field by field.
pub fn resolve(period: Period, over: &PeriodOverride) -> Result<TableBinding, ConfigError> {
    let mut binding = period.default_binding();

    if let Some(table) = &over.table {
        binding.source_table = table.trim().to_owned();
    }
    if let Some(interval) = over.interval_sec {
        binding.bucket_interval_seconds = positive(period, "interval_sec", interval)?;
    }
    if let Some(lookback) = over.lookback_sec {
        binding.lookback_seconds = positive(period, "lookback_sec", lookback)?;
    }

    validate_table_name(period, &binding.source_table)?;
    if binding.bucket_interval_seconds > binding.lookback_seconds {
        return Err(ConfigError::IntervalExceedsLookback {
            period,
            interval: binding.bucket_interval_seconds,
            lookback: binding.lookback_seconds,
        });
    }

    Ok(binding)
}

/// Resolved bindings for every period, checked once at startup.
#[derive(Debug, Clone)]
pub struct Bindings {
    bindings: [TableBinding; 4],
}

impl Bindings {
    pub fn resolve_all(overrides: &PeriodOverrides) -> Result<Self, ConfigError> {
        let [a, b, c, d] = Period::ALL;
        Ok(Self {
            bindings: [
                resolve(a, overrides.get(a))?,
                resolve(b, overrides.get(b))?,
                resolve(c, overrides.get(c))?,
                resolve(d, overrides.get(d))?,
            ],
        })
    }

    pub fn get(&self, period: Period) -> &TableBinding {
        &self.bindings[period as usize]
    }
}
