//! Publish-date normalization.
//!
//! Feed producers disagree on how to write `pubDate`. A [`DateParser`] holds
//! an ordered list of candidate formats and returns the first one that
//! matches; an entry whose date matches none is skipped by the caller.

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc, Weekday};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const RFC1123_BODY: &str = "%d %b %Y %H:%M:%S";
const RFC1123Z_BODY: &str = "%d %b %Y %H:%M:%S %z";

/// No configured format accepted the publish date.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized publish date {input:?}")]
pub struct DateParseError {
    pub input: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DateFormatError {
    #[error("unknown date format {0:?}: expected rfc1123z, rfc1123, rfc2822, rfc3339 or a chrono pattern with %z")]
    Unknown(String),
    #[error("at least one date format is required")]
    Empty,
}

/// A candidate publish-date format.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum DateFormat {
    /// `Mon, 02 Jan 2006 15:04:05 -0700`
    Rfc1123Z,
    /// `Mon, 02 Jan 2006 15:04:05 MST`
    Rfc1123,
    /// Anything chrono's RFC 2822 parser accepts
    Rfc2822,
    /// `2006-01-02T15:04:05-07:00`
    Rfc3339,
    /// A chrono `strftime` pattern that includes a numeric offset
    Custom(String),
}

impl DateFormat {
    /// Parse `text` in this format, normalized to UTC
    pub fn parse(&self, text: &str) -> Option<DateTime<Utc>> {
        let parsed = match self {
            DateFormat::Rfc1123Z => {
                DateTime::parse_from_str(strip_weekday(text)?, RFC1123Z_BODY).ok()
            }
            DateFormat::Rfc1123 => parse_named_zone(strip_weekday(text)?),
            DateFormat::Rfc2822 => DateTime::parse_from_rfc2822(text).ok(),
            DateFormat::Rfc3339 => DateTime::parse_from_rfc3339(text).ok(),
            DateFormat::Custom(pattern) => DateTime::parse_from_str(text, pattern).ok(),
        };
        parsed.map(|dt| dt.with_timezone(&Utc))
    }
}

impl FromStr for DateFormat {
    type Err = DateFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rfc1123z" => Ok(DateFormat::Rfc1123Z),
            "rfc1123" => Ok(DateFormat::Rfc1123),
            "rfc2822" => Ok(DateFormat::Rfc2822),
            "rfc3339" => Ok(DateFormat::Rfc3339),
            _ if s.contains("%z") || s.contains("%:z") || s.contains("%#z") => {
                Ok(DateFormat::Custom(s.to_string()))
            }
            _ => Err(DateFormatError::Unknown(s.to_string())),
        }
    }
}

impl TryFrom<String> for DateFormat {
    type Error = DateFormatError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for DateFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DateFormat::Rfc1123Z => f.write_str("rfc1123z"),
            DateFormat::Rfc1123 => f.write_str("rfc1123"),
            DateFormat::Rfc2822 => f.write_str("rfc2822"),
            DateFormat::Rfc3339 => f.write_str("rfc3339"),
            DateFormat::Custom(pattern) => f.write_str(pattern),
        }
    }
}

/// `"Mon, 02 Jan ..."` -> `"02 Jan ..."`.
///
/// The weekday must be a day name but is not checked against the date.
fn strip_weekday(text: &str) -> Option<&str> {
    let (day, rest) = text.split_once(',')?;
    day.trim().parse::<Weekday>().ok()?;
    Some(rest.trim_start())
}

/// Parse `"02 Jan 2006 15:04:05 MST"`.
fn parse_named_zone(text: &str) -> Option<DateTime<FixedOffset>> {
    let (body, zone) = text.rsplit_once(' ')?;
    let offset = FixedOffset::east_opt(zone_offset_secs(zone)?)?;
    let naive = NaiveDateTime::parse_from_str(body.trim_end(), RFC1123_BODY).ok()?;
    offset.from_local_datetime(&naive).single()
}

/// UTC offset of an RFC 822 zone name.
///
/// Named US zones use their RFC 822 offsets. Go's `time.Parse` gives a zone
/// name unknown to the host a zero offset instead, so `MST` lands 7 hours
/// earlier here than in a Go reader on a UTC host. Unrecognized alphabetic
/// abbreviations are read as UTC rather than rejected.
fn zone_offset_secs(zone: &str) -> Option<i32> {
    const HOUR: i32 = 3600;
    if zone.is_empty() || zone.len() > 5 || !zone.bytes().all(|b| b.is_ascii_alphabetic()) {
        return None;
    }
    let hours = match zone.to_ascii_uppercase().as_str() {
        "UT" | "UTC" | "GMT" | "Z" => 0,
        "EST" => -5,
        "EDT" => -4,
        "CST" => -6,
        "CDT" => -5,
        "MST" => -7,
        "MDT" => -6,
        "PST" => -8,
        "PDT" => -7,
        _ => 0,
    };
    Some(hours * HOUR)
}

/// Ordered list of candidate publish-date formats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateParser {
    formats: Vec<DateFormat>,
}

impl Default for DateParser {
    /// RFC 1123 with a numeric zone, then RFC 1123 with a zone name.
    fn default() -> Self {
        Self {
            formats: vec![DateFormat::Rfc1123Z, DateFormat::Rfc1123],
        }
    }
}

impl DateParser {
    pub fn new(formats: Vec<DateFormat>) -> Result<Self, DateFormatError> {
        if formats.is_empty() {
            return Err(DateFormatError::Empty);
        }
        Ok(Self { formats })
    }

    pub fn formats(&self) -> &[DateFormat] {
        &self.formats
    }

    /// Normalize a publish date to UTC using the first format that accepts it.
    pub fn parse(&self, text: &str) -> Result<DateTime<Utc>, DateParseError> {
        self.parse_with_format(text).map(|(at, _)| at)
    }

    /// Like [`DateParser::parse`], also reporting which format matched.
    pub fn parse_with_format(
        &self,
        text: &str,
    ) -> Result<(DateTime<Utc>, &DateFormat), DateParseError> {
        let trimmed = text.trim();
        self.formats
            .iter()
            .find_map(|format| format.parse(trimmed).map(|at| (at, format)))
            .ok_or_else(|| DateParseError {
                input: text.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_numeric_zone_uses_primary_format() {
        let parser = DateParser::default();
        let (at, format) = parser
            .parse_with_format("Mon, 02 Jan 2006 15:04:05 -0700")
            .unwrap();
        assert_eq!(at, utc("2006-01-02T22:04:05Z"));
        assert_eq!(format, &DateFormat::Rfc1123Z);
    }

    #[test]
    fn test_named_zone_uses_fallback_format() {
        let parser = DateParser::default();
        let (at, format) = parser
            .parse_with_format("Mon, 02 Jan 2006 15:04:05 MST")
            .unwrap();
        assert_eq!(at, utc("2006-01-02T22:04:05Z"));
        assert_eq!(format, &DateFormat::Rfc1123);
    }

    #[test]
    fn test_gmt_and_unknown_abbreviation_read_as_utc() {
        let parser = DateParser::default();
        assert_eq!(
            parser.parse("Mon, 02 Jan 2006 15:04:05 GMT").unwrap(),
            utc("2006-01-02T15:04:05Z")
        );
        assert_eq!(
            parser.parse("Mon, 02 Jan 2006 15:04:05 CEST").unwrap(),
            utc("2006-01-02T15:04:05Z")
        );
    }

    #[test]
    fn test_garbage_is_rejected() {
        let err = DateParser::default().parse("not-a-date").unwrap_err();
        assert_eq!(err.input, "not-a-date");
    }

    #[test]
    fn test_empty_date_is_rejected() {
        assert!(DateParser::default().parse("").is_err());
    }

    #[test]
    fn test_surrounding_whitespace_ignored() {
        assert!(DateParser::default()
            .parse("  Mon, 02 Jan 2006 15:04:05 +0000\n")
            .is_ok());
    }

    #[test]
    fn test_wrong_weekday_is_tolerated() {
        // 2006-01-02 was a Monday
        assert_eq!(
            DateParser::default()
                .parse("Fri, 02 Jan 2006 15:04:05 +0000")
                .unwrap(),
            utc("2006-01-02T15:04:05Z")
        );
    }

    #[test]
    fn test_missing_weekday_needs_another_format() {
        let text = "02 Jan 2006 15:04:05 +0000";
        assert!(DateParser::default().parse(text).is_err());

        let parser = DateParser::new(vec![
            DateFormat::Rfc1123Z,
            DateFormat::Custom("%d %b %Y %H:%M:%S %z".to_string()),
        ])
        .unwrap();
        assert_eq!(parser.parse(text).unwrap(), utc("2006-01-02T15:04:05Z"));
    }

    #[test]
    fn test_rfc3339_only_when_configured() {
        let text = "2006-01-02T15:04:05-07:00";
        assert!(DateParser::default().parse(text).is_err());

        let parser = DateParser::new(vec![DateFormat::Rfc1123Z, DateFormat::Rfc3339]).unwrap();
        let (at, format) = parser.parse_with_format(text).unwrap();
        assert_eq!(at, utc("2006-01-02T22:04:05Z"));
        assert_eq!(format, &DateFormat::Rfc3339);
    }

    #[test]
    fn test_format_order_is_respected() {
        // Both formats accept this input; the first listed must win
        let parser = DateParser::new(vec![DateFormat::Rfc2822, DateFormat::Rfc1123Z]).unwrap();
        let (_, format) = parser
            .parse_with_format("Mon, 02 Jan 2006 15:04:05 -0700")
            .unwrap();
        assert_eq!(format, &DateFormat::Rfc2822);
    }

    #[test]
    fn test_empty_format_list_rejected() {
        assert_eq!(DateParser::new(vec![]), Err(DateFormatError::Empty));
    }

    #[test]
    fn test_format_names_parse() {
        assert_eq!("RFC1123Z".parse::<DateFormat>(), Ok(DateFormat::Rfc1123Z));
        assert_eq!("rfc1123".parse::<DateFormat>(), Ok(DateFormat::Rfc1123));
        assert_eq!(
            "%Y-%m-%d %H:%M %z".parse::<DateFormat>(),
            Ok(DateFormat::Custom("%Y-%m-%d %H:%M %z".to_string()))
        );
        assert!(matches!(
            "%Y-%m-%d".parse::<DateFormat>(),
            Err(DateFormatError::Unknown(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_parse_never_panics(text in "\\PC*") {
            let _ = DateParser::default().parse(&text);
        }

        #[test]
        fn prop_rfc1123z_output_is_accepted(
            secs in 0i64..4_102_444_800,
            offset_minutes in -(12 * 60i32)..=(14 * 60),
        ) {
            let offset = FixedOffset::east_opt(offset_minutes * 60).unwrap();
            let at = offset.timestamp_opt(secs, 0).unwrap();
            let text = at.format("%a, %d %b %Y %H:%M:%S %z").to_string();

            prop_assert_eq!(
                DateParser::default().parse(&text).unwrap(),
                at.with_timezone(&Utc)
            );
        }
    }
}
