//! Time tokens: instants, `start/end` periods and the result-time inherit marker.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result-time token meaning "same as the end of the phenomenon time".
pub const RESULT_TIME_INHERIT_MARKER: &str = "#phenomenonTime";

/// Separator between the two ends of a period token.
pub const PERIOD_SEPARATOR: char = '/';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeParseError {
    #[error("'{0}' is not an ISO-8601 instant")]
    Instant(String),

    #[error("period '{0}' ends before it starts")]
    ReversedPeriod(String),

    #[error("'{0}' is a period but an instant is required")]
    NotAnInstant(String),
}

/// Phenomenon time of an observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimeValue {
    Instant {
        at: DateTime<FixedOffset>,
    },
    Period {
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
    },
}

impl TimeValue {
    pub fn instant(at: DateTime<FixedOffset>) -> Self {
        TimeValue::Instant { at }
    }

    /// Parse an instant or a `start/end` period.
    pub fn parse(token: &str) -> Result<Self, TimeParseError> {
        let token = token.trim();
        match token.split_once(PERIOD_SEPARATOR) {
            Some((start, end)) => {
                let start = parse_instant(start)?;
                let end = parse_instant(end)?;
                if end < start {
                    return Err(TimeParseError::ReversedPeriod(token.to_string()));
                }
                Ok(TimeValue::Period { start, end })
            }
            None => Ok(TimeValue::Instant {
                at: parse_instant(token)?,
            }),
        }
    }

    pub fn start(&self) -> DateTime<FixedOffset> {
        match self {
            TimeValue::Instant { at } => *at,
            TimeValue::Period { start, .. } => *start,
        }
    }

    pub fn end(&self) -> DateTime<FixedOffset> {
        match self {
            TimeValue::Instant { at } => *at,
            TimeValue::Period { end, .. } => *end,
        }
    }

    /// True when this time shares at least one instant with `[from, to]`.
    pub fn overlaps(
        &self,
        from: Option<DateTime<FixedOffset>>,
        to: Option<DateTime<FixedOffset>>,
    ) -> bool {
        from.map_or(true, |from| self.end() >= from) && to.map_or(true, |to| self.start() <= to)
    }

    /// Render as the token form accepted by [`TimeValue::parse`].
    pub fn to_token(&self) -> String {
        match self {
            TimeValue::Instant { at } => format_instant(at),
            TimeValue::Period { start, end } => {
                format!("{}{}{}", format_instant(start), PERIOD_SEPARATOR, format_instant(end))
            }
        }
    }
}

impl std::fmt::Display for TimeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_token())
    }
}

/// Result time as written in a payload row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultTime {
    At(DateTime<FixedOffset>),
    /// The `#phenomenonTime` marker.
    Inherit,
}

impl ResultTime {
    pub fn parse(token: &str) -> Result<Self, TimeParseError> {
        let token = token.trim();
        if token == RESULT_TIME_INHERIT_MARKER {
            return Ok(ResultTime::Inherit);
        }
        match TimeValue::parse(token)? {
            TimeValue::Instant { at } => Ok(ResultTime::At(at)),
            TimeValue::Period { .. } => Err(TimeParseError::NotAnInstant(token.to_string())),
        }
    }

    pub fn to_token(&self) -> String {
        match self {
            ResultTime::At(at) => format_instant(at),
            ResultTime::Inherit => RESULT_TIME_INHERIT_MARKER.to_string(),
        }
    }
}

/// Parse one instant.
///
/// Accepts RFC 3339, a date-time without offset (read as UTC) and a bare
/// date (midnight UTC).
pub fn parse_instant(token: &str) -> Result<DateTime<FixedOffset>, TimeParseError> {
    let token = token.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(token) {
        return Ok(at);
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(token, format) {
            return Ok(Utc.from_utc_datetime(&naive).fixed_offset());
        }
    }
    NaiveDate::parse_from_str(token, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive).fixed_offset())
        .ok_or_else(|| TimeParseError::Instant(token.to_string()))
}

pub fn format_instant(at: &DateTime<FixedOffset>) -> String {
    at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rfc3339_instant() {
        let t = TimeValue::parse("2012-11-19T00:10:00Z").unwrap();
        assert_eq!(t.to_token(), "2012-11-19T00:10:00Z");
        assert_eq!(t.start(), t.end());
    }

    #[test]
    fn test_offset_is_preserved() {
        let t = TimeValue::parse("2012-11-19T02:10:00+02:00").unwrap();
        assert_eq!(t.to_token(), "2012-11-19T02:10:00+02:00");
        assert_eq!(t, TimeValue::parse("2012-11-19T00:10:00Z").unwrap());
    }

    #[test]
    fn test_naive_and_date_only_are_utc() {
        let naive = TimeValue::parse("2012-11-19T00:10:00").unwrap();
        assert_eq!(naive.to_token(), "2012-11-19T00:10:00Z");
        let date = TimeValue::parse("2012-11-19").unwrap();
        assert_eq!(date.to_token(), "2012-11-19T00:00:00Z");
    }

    #[test]
    fn test_period() {
        let t = TimeValue::parse("2012-11-19T00:00:00Z/2012-11-19T01:00:00Z").unwrap();
        assert!(matches!(t, TimeValue::Period { .. }));
        assert_eq!(t.end().to_rfc3339(), "2012-11-19T01:00:00+00:00");
        assert_eq!(
            t.to_token(),
            "2012-11-19T00:00:00Z/2012-11-19T01:00:00Z"
        );
    }

    #[test]
    fn test_reversed_period_rejected() {
        let err = TimeValue::parse("2012-11-19T01:00:00Z/2012-11-19T00:00:00Z").unwrap_err();
        assert!(matches!(err, TimeParseError::ReversedPeriod(_)));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(TimeValue::parse("yesterday").is_err());
        assert!(TimeValue::parse("").is_err());
    }

    #[test]
    fn test_result_time_marker() {
        assert_eq!(ResultTime::parse("#phenomenonTime").unwrap(), ResultTime::Inherit);
        assert!(matches!(
            ResultTime::parse("2012-11-19T00:00:00Z/2012-11-19T01:00:00Z"),
            Err(TimeParseError::NotAnInstant(_))
        ));
    }

    #[test]
    fn test_overlaps() {
        let t = TimeValue::parse("2012-11-19T00:00:00Z/2012-11-19T01:00:00Z").unwrap();
        let at = |s| parse_instant(s).unwrap();
        assert!(t.overlaps(None, None));
        assert!(t.overlaps(Some(at("2012-11-19T00:30:00Z")), None));
        assert!(!t.overlaps(Some(at("2012-11-19T02:00:00Z")), None));
        assert!(!t.overlaps(None, Some(at("2012-11-18T23:00:00Z"))));
    }
}
