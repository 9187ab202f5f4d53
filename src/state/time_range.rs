//! Time window used to bound which items are emitted

use crate::ConfigError;
use chrono::{DateTime, Duration, Months, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// Optional `[min, max]` window over item timestamps
///
/// Bounds are inclusive. Construction always yields `min <= max`: inverted
/// input is swapped rather than rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeRange {
    min: Option<DateTime<Utc>>,
    max: Option<DateTime<Utc>>,
}

impl TimeRange {
    /// Creates a range, swapping the bounds if they are inverted
    pub fn new(min: Option<DateTime<Utc>>, max: Option<DateTime<Utc>>) -> Self {
        match (min, max) {
            (Some(lo), Some(hi)) if lo > hi => Self {
                min: Some(hi),
                max: Some(lo),
            },
            _ => Self { min, max },
        }
    }

    /// A range with no bounds; every timestamp is inside it
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Parses both bounds from their configuration strings
    ///
    /// # Arguments
    ///
    /// * `min` - Lower bound expression, if any
    /// * `max` - Upper bound expression, if any
    /// * `now` - Reference instant for relative expressions
    ///
    /// # Returns
    ///
    /// * `Ok(TimeRange)` - Normalized range
    /// * `Err(ConfigError)` - A bound could not be parsed
    pub fn parse(
        min: Option<&str>,
        max: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Self, ConfigError> {
        let min = min.map(|v| parse_bound(v, now)).transpose()?.flatten();
        let max = max.map(|v| parse_bound(v, now)).transpose()?.flatten();
        Ok(Self::new(min, max))
    }

    pub fn min(&self) -> Option<DateTime<Utc>> {
        self.min
    }

    pub fn max(&self) -> Option<DateTime<Utc>> {
        self.max
    }

    /// Returns true if at least one bound is configured
    pub fn is_set(&self) -> bool {
        self.min.is_some() || self.max.is_some()
    }

    /// Returns true if the timestamp lies inside the window (inclusive)
    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        self.min.map(|lo| lo <= timestamp).unwrap_or(true)
            && self.max.map(|hi| timestamp <= hi).unwrap_or(true)
    }
}

/// Parses one bound expression
///
/// Accepted forms:
/// - `today` / `yesterday` (start of the UTC day)
/// - `N unit` or `Nunit`, optionally plural, meaning N units before `now`;
///   units are second, minute, hour, day, week, month, year
/// - RFC 3339 timestamps, `YYYY-MM-DDTHH:MM:SS`, or `YYYY-MM-DD`
///
/// An empty string means "no bound".
pub fn parse_bound(value: &str, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, ConfigError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }

    let start_of_today = Utc.from_utc_datetime(&now.date_naive().and_time(chrono::NaiveTime::MIN));

    match value.to_lowercase().as_str() {
        "today" => return Ok(Some(start_of_today)),
        "yesterday" => return Ok(Some(start_of_today - Duration::days(1))),
        _ => {}
    }

    if let Some(relative) = parse_relative(value, now) {
        return relative
            .map(Some)
            .ok_or_else(|| ConfigError::InvalidTimeRange(value.to_string()));
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(Some(ts.with_timezone(&Utc)));
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Ok(Some(Utc.from_utc_datetime(&naive)));
    }

    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(Some(
            Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN)),
        ));
    }

    Err(ConfigError::InvalidTimeRange(value.to_string()))
}

/// Parses `N unit(s)` relative to `now`
///
/// Returns None if the shape doesn't match, and `Some(None)` if it does but
/// the instant falls outside the representable range.
fn parse_relative(value: &str, now: DateTime<Utc>) -> Option<Option<DateTime<Utc>>> {
    let digits_end = value
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)?;
    if digits_end == 0 {
        return None;
    }

    let amount: u32 = value[..digits_end].parse().ok()?;
    if amount == 0 {
        return None;
    }

    let unit = value[digits_end..].trim().to_lowercase();
    let unit = unit.strip_suffix('s').unwrap_or(&unit);
    let amount_i64 = i64::from(amount);

    let span = match unit {
        "second" => Duration::try_seconds(amount_i64),
        "minute" => Duration::try_minutes(amount_i64),
        "hour" => Duration::try_hours(amount_i64),
        "day" => Duration::try_days(amount_i64),
        "week" => Duration::try_weeks(amount_i64),
        "month" => return Some(now.checked_sub_months(Months::new(amount))),
        "year" => {
            return Some(
                amount
                    .checked_mul(12)
                    .and_then(|months| now.checked_sub_months(Months::new(months))),
            )
        }
        _ => return None,
    };

    // Outer None: not a relative expression. Inner None: out of range.
    Some(span.and_then(|span| now.checked_sub_signed(span)))
}
