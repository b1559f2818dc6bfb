use chrono::{DateTime, FixedOffset, Offset, Utc};
use chrono_tz::Tz;

use crate::error::ValidationError;

pub const MIN_OFFSET_HOURS: i32 = -12;
pub const MAX_OFFSET_HOURS: i32 = 14;

pub fn validate_offset(hours: i32) -> Result<i32, ValidationError> {
    if (MIN_OFFSET_HOURS..=MAX_OFFSET_HOURS).contains(&hours) {
        Ok(hours)
    } else {
        Err(ValidationError::OffsetOutOfRange(hours))
    }
}

/// Strip an optional `UTC`/`GMT` prefix.
fn offset_body(upper: &str) -> &str {
    upper
        .strip_prefix("UTC")
        .or_else(|| upper.strip_prefix("GMT"))
        .unwrap_or(upper)
        .trim()
}

/// Split one leading sign off. Returns `None` when another sign follows.
fn split_sign(body: &str) -> Option<(i32, &str)> {
    let (sign, rest) = match body.as_bytes().first() {
        Some(b'+') => (1, &body[1..]),
        Some(b'-') => (-1, &body[1..]),
        _ => (1, body),
    };
    if rest.starts_with(['+', '-']) {
        return None;
    }
    Some((sign, rest))
}

fn parse_digits(digits: &str, max_len: usize) -> Option<i32> {
    if digits.is_empty() || digits.len() > max_len || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Parse `5`, `+5`, `-3`, `UTC+5`, `GMT-3` or plain `UTC` into whole hours.
pub fn parse_offset(input: &str) -> Result<i32, ValidationError> {
    let trimmed = input.trim();
    let unparsable = || ValidationError::Unparsable(trimmed.to_owned());
    if trimmed.is_empty() {
        return Err(unparsable());
    }

    let upper = trimmed.to_ascii_uppercase();
    let body = offset_body(&upper);
    if body.is_empty() {
        return Ok(0);
    }

    let (sign, digits) = split_sign(body).ok_or_else(unparsable)?;
    let hours = parse_digits(digits, 3).ok_or_else(unparsable)?;
    validate_offset(sign * hours)
}

/// `+05:30`, `UTC-03:30` and the like, within the whole-hour range.
fn parse_hours_minutes(input: &str) -> Option<FixedOffset> {
    let upper = input.trim().to_ascii_uppercase();
    let (sign, rest) = split_sign(offset_body(&upper))?;
    let (hours, minutes) = rest.split_once(':')?;
    let hours = parse_digits(hours, 2)?;
    let minutes = parse_digits(minutes, 2)?;
    if minutes >= 60 {
        return None;
    }

    let seconds = sign * (hours * 3_600 + minutes * 60);
    let range = MIN_OFFSET_HOURS * 3_600..=MAX_OFFSET_HOURS * 3_600;
    range
        .contains(&seconds)
        .then(|| FixedOffset::east_opt(seconds))
        .flatten()
}

/// Zone used to render timestamps for one viewer.
///
/// Users pick whole-hour offsets; the operator default may also be a named
/// zone (`Asia/Almaty`) or carry minutes (`+05:30`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayZone {
    Fixed(FixedOffset),
    Named(Tz),
}

impl Default for DisplayZone {
    fn default() -> Self {
        DisplayZone::Fixed(Utc.fix())
    }
}

impl DisplayZone {
    /// Zone for a whole-hour offset. `None` outside `[-12, +14]`.
    pub fn from_hours(hours: i32) -> Option<DisplayZone> {
        let hours = validate_offset(hours).ok()?;
        hours
            .checked_mul(3_600)
            .and_then(FixedOffset::east_opt)
            .map(DisplayZone::Fixed)
    }

    /// Accepts every form [`parse_offset`] does, plus `±HH:MM` and IANA
    /// zone names.
    pub fn parse(input: &str) -> Result<DisplayZone, ValidationError> {
        match parse_offset(input) {
            Ok(hours) => {
                return DisplayZone::from_hours(hours)
                    .ok_or(ValidationError::OffsetOutOfRange(hours));
            }
            Err(e @ ValidationError::OffsetOutOfRange(_)) => return Err(e),
            Err(ValidationError::Unparsable(_)) => {}
        }

        if let Some(offset) = parse_hours_minutes(input) {
            return Ok(DisplayZone::Fixed(offset));
        }

        input
            .trim()
            .parse::<Tz>()
            .map(DisplayZone::Named)
            .map_err(|_| ValidationError::Unparsable(input.trim().to_owned()))
    }

    pub fn format(&self, ts: DateTime<Utc>, fmt: &str) -> String {
        match self {
            DisplayZone::Fixed(offset) => ts.with_timezone(offset).format(fmt).to_string(),
            DisplayZone::Named(tz) => ts.with_timezone(tz).format(fmt).to_string(),
        }
    }

    /// `UTC`, `UTC+5`, `UTC+5:30` or the zone name.
    pub fn label(&self) -> String {
        match self {
            DisplayZone::Fixed(offset) => {
                let secs = offset.local_minus_utc();
                let minutes = (secs.abs() % 3_600) / 60;
                match (secs / 3_600, minutes) {
                    (_, 0) => label(secs / 3_600),
                    (h, m) => {
                        let sign = if secs < 0 { '-' } else { '+' };
                        format!("UTC{sign}{}:{m:02}", h.abs())
                    }
                }
            }
            DisplayZone::Named(tz) => tz.name().to_owned(),
        }
    }
}

/// `UTC`, `UTC+5`, `UTC-3`.
pub fn label(hours: i32) -> String {
    match hours {
        0 => "UTC".to_owned(),
        h if h > 0 => format!("UTC+{h}"),
        h => format!("UTC{h}"),
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn parses_accepted_forms() {
        assert_eq!(parse_offset("5"), Ok(5));
        assert_eq!(parse_offset("+5"), Ok(5));
        assert_eq!(parse_offset(" -3 "), Ok(-3));
        assert_eq!(parse_offset("UTC+14"), Ok(14));
        assert_eq!(parse_offset("gmt-12"), Ok(-12));
        assert_eq!(parse_offset("UTC"), Ok(0));
    }

    #[test]
    fn rejects_out_of_range() {
        assert_eq!(parse_offset("15"), Err(ValidationError::OffsetOutOfRange(15)));
        assert_eq!(parse_offset("-13"), Err(ValidationError::OffsetOutOfRange(-13)));
    }

    #[test]
    fn rejects_garbage() {
        for input in ["", "five", "+", "UTC+", "5:30", "Asia/Almaty", "--5", "+-5", "-+5", "UTC+-3"] {
            assert!(parse_offset(input).is_err(), "{input:?} accepted");
        }
    }

    #[test]
    fn labels() {
        assert_eq!(label(0), "UTC");
        assert_eq!(label(5), "UTC+5");
        assert_eq!(label(-3), "UTC-3");
    }

    #[test]
    fn zone_from_hours_stays_in_range() {
        assert_eq!(DisplayZone::from_hours(5).map(|z| z.label()), Some("UTC+5".into()));
        assert_eq!(DisplayZone::from_hours(99), None);
        assert_eq!(DisplayZone::from_hours(i32::MAX), None);
        assert_eq!(DisplayZone::default().label(), "UTC");
    }

    #[test]
    fn display_zone_accepts_minutes_and_names() {
        let india = DisplayZone::parse("+05:30").unwrap();
        assert_eq!(india.label(), "UTC+5:30");
        assert_eq!(DisplayZone::parse("UTC-03:30").unwrap().label(), "UTC-3:30");
        assert_eq!(DisplayZone::parse("GMT+2").unwrap().label(), "UTC+2");

        let almaty = DisplayZone::parse("Asia/Almaty").unwrap();
        assert_eq!(almaty.label(), "Asia/Almaty");

        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert_eq!(india.format(ts, "%H:%M"), "17:30");
        assert_eq!(
            DisplayZone::parse("Europe/Berlin").unwrap().format(ts, "%H:%M"),
            "14:00"
        );
    }

    #[test]
    fn display_zone_rejects_bad_input() {
        assert_eq!(
            DisplayZone::parse("UTC+15"),
            Err(ValidationError::OffsetOutOfRange(15))
        );
        for input in ["Mars/Olympus", "+14:30", "+05:75", "+-05:00", ""] {
            assert!(DisplayZone::parse(input).is_err(), "{input:?} accepted");
        }
    }
}
