/// Textual interval values.
///
/// The database renders intervals as `1 years 2 mons 3 days 04:05:06.5`;
/// the adapter writes them back in the verbose
/// `1 years 2 mons 3 days 4 hours 5 minutes 6.5 seconds` form. Both shapes
/// parse into the same structured [`Duration`]. ISO-8601 (`P1Y2M3DT4H5M6.5S`)
/// is accepted as the single fallback format.
use std::fmt;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::Serialize;

pub const SECONDS_PER_MINUTE: i64 = 60;
pub const SECONDS_PER_HOUR: i64 = 3_600;
pub const SECONDS_PER_DAY: i64 = 86_400;
/// 1/12 of a Gregorian year.
pub const SECONDS_PER_MONTH: i64 = 2_629_746;
/// 365.2425 days.
pub const SECONDS_PER_YEAR: i64 = 31_556_952;

/// Fractional digits kept for interval columns without an explicit precision.
pub const DEFAULT_PRECISION: u32 = 6;
/// Largest fractional-second precision an interval column accepts.
pub const MAX_PRECISION: u32 = 6;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid interval: {input:?}")]
pub struct IntervalParseError {
    pub input: String,
}

/// Structured interval with named parts.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Duration {
    pub years: i64,
    pub months: i64,
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
    pub seconds: f64,
}

fn postgres_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?x)
            ^\s*
            (?:(?P<years>[+-]?\d+)\s+years?)?\s*
            (?:(?P<months>[+-]?\d+)\s+mons?)?\s*
            (?:(?P<days>[+-]?\d+)\s+days?)?\s*
            (?:
                (?P<sign>[+-])?(?P<clock_h>\d+):(?P<clock_m>\d{2}):(?P<clock_s>\d{2}(?:\.\d+)?)
              |
                (?:(?P<hours>[+-]?\d+)\s+hours?)?\s*
                (?:(?P<minutes>[+-]?\d+)\s+minutes?)?\s*
                (?:(?P<seconds>[+-]?\d+(?:\.\d+)?)\s+seconds?)?
            )
            \s*$",
        )
        .expect("valid interval pattern")
    })
}

fn iso8601_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?x)
            ^(?P<sign>[+-])?P
            (?:(?P<years>-?\d+)Y)?
            (?:(?P<months>-?\d+)M)?
            (?:(?P<weeks>-?\d+)W)?
            (?:(?P<days>-?\d+)D)?
            (?:T
                (?:(?P<hours>-?\d+)H)?
                (?:(?P<minutes>-?\d+)M)?
                (?:(?P<seconds>-?\d+(?:[.,]\d+)?)S)?
            )?$",
        )
        .expect("valid ISO-8601 duration pattern")
    })
}

fn int_part(caps: &Captures<'_>, name: &str) -> Result<Option<i64>, ()> {
    match caps.name(name) {
        Some(m) => m.as_str().trim_start_matches('+').parse().map(Some).map_err(|_| ()),
        None => Ok(None),
    }
}

fn float_part(caps: &Captures<'_>, name: &str) -> Result<Option<f64>, ()> {
    match caps.name(name) {
        Some(m) => m.as_str().replace(',', ".").parse().map(Some).map_err(|_| ()),
        None => Ok(None),
    }
}

impl Duration {
    pub fn new(years: i64, months: i64, days: i64, hours: i64, minutes: i64, seconds: f64) -> Self {
        Self {
            years,
            months,
            days,
            hours,
            minutes,
            seconds,
        }
    }

    /// Split a number of seconds into calendar parts, largest unit first.
    pub fn from_seconds(total: f64) -> Self {
        let negative = total < 0.0;
        let mut remaining = total.abs();
        let mut take = |unit: i64| {
            let count = (remaining / unit as f64).floor();
            remaining -= count * unit as f64;
            count as i64
        };
        let years = take(SECONDS_PER_YEAR);
        let months = take(SECONDS_PER_MONTH);
        let days = take(SECONDS_PER_DAY);
        let hours = take(SECONDS_PER_HOUR);
        let minutes = take(SECONDS_PER_MINUTE);
        let d = Self::new(years, months, days, hours, minutes, remaining);
        if negative {
            d.negate()
        } else {
            d
        }
    }

    pub fn negate(&self) -> Self {
        Self::new(
            -self.years,
            -self.months,
            -self.days,
            -self.hours,
            -self.minutes,
            -self.seconds,
        )
    }

    /// Magnitude in seconds using the calendar constants.
    pub fn total_seconds(&self) -> f64 {
        [
            (self.years, SECONDS_PER_YEAR),
            (self.months, SECONDS_PER_MONTH),
            (self.days, SECONDS_PER_DAY),
            (self.hours, SECONDS_PER_HOUR),
            (self.minutes, SECONDS_PER_MINUTE),
        ]
        .iter()
        .map(|&(count, unit)| count as f64 * unit as f64)
        .sum::<f64>()
            + self.seconds
    }

    pub fn is_zero(&self) -> bool {
        self.total_seconds() == 0.0
    }

    /// Copy with the seconds part rounded half away from zero to `precision`
    /// fractional digits, capped at [`MAX_PRECISION`].
    pub fn round(&self, precision: u32) -> Self {
        let factor = 10f64.powi(precision.min(MAX_PRECISION) as i32);
        let mut seconds = (self.seconds * factor).round() / factor;
        if seconds == 0.0 {
            // drop the sign of -0.0
            seconds = 0.0;
        }
        Self { seconds, ..*self }
    }

    /// Parse database output, falling back to ISO-8601 once.
    pub fn parse(text: &str) -> Result<Self, IntervalParseError> {
        Self::parse_postgres(text).or_else(|_| Self::parse_iso8601(text))
    }

    /// Parse the database's textual interval format.
    pub fn parse_postgres(text: &str) -> Result<Self, IntervalParseError> {
        let err = || IntervalParseError {
            input: text.to_string(),
        };
        let caps = postgres_regex().captures(text).ok_or_else(err)?;

        // Every group is optional, so an all-blank input still matches.
        let any = [
            "years", "months", "days", "clock_h", "hours", "minutes", "seconds",
        ]
        .iter()
        .any(|name| caps.name(name).is_some());
        if !any {
            return Err(err());
        }

        let years = int_part(&caps, "years").map_err(|_| err())?.unwrap_or(0);
        let months = int_part(&caps, "months").map_err(|_| err())?.unwrap_or(0);
        let days = int_part(&caps, "days").map_err(|_| err())?.unwrap_or(0);

        let (hours, minutes, seconds) = if caps.name("clock_h").is_some() {
            let h = int_part(&caps, "clock_h").map_err(|_| err())?.unwrap_or(0);
            let m = int_part(&caps, "clock_m").map_err(|_| err())?.unwrap_or(0);
            let s = float_part(&caps, "clock_s").map_err(|_| err())?.unwrap_or(0.0);
            if caps.name("sign").map(|m| m.as_str()) == Some("-") {
                (-h, -m, -s)
            } else {
                (h, m, s)
            }
        } else {
            (
                int_part(&caps, "hours").map_err(|_| err())?.unwrap_or(0),
                int_part(&caps, "minutes").map_err(|_| err())?.unwrap_or(0),
                float_part(&caps, "seconds").map_err(|_| err())?.unwrap_or(0.0),
            )
        };

        Ok(Self::new(years, months, days, hours, minutes, seconds))
    }

    /// Parse an ISO-8601 duration such as `P1Y2M3DT4H5M6.5S`.
    pub fn parse_iso8601(text: &str) -> Result<Self, IntervalParseError> {
        let err = || IntervalParseError {
            input: text.to_string(),
        };
        let trimmed = text.trim();
        let caps = iso8601_regex().captures(trimmed).ok_or_else(err)?;
        let any = ["years", "months", "weeks", "days", "hours", "minutes", "seconds"]
            .iter()
            .any(|name| caps.name(name).is_some());
        // "P" and "PT" alone are not durations
        if !any || trimmed.ends_with('T') {
            return Err(err());
        }

        let weeks = int_part(&caps, "weeks").map_err(|_| err())?.unwrap_or(0);
        let d = Self::new(
            int_part(&caps, "years").map_err(|_| err())?.unwrap_or(0),
            int_part(&caps, "months").map_err(|_| err())?.unwrap_or(0),
            int_part(&caps, "days").map_err(|_| err())?.unwrap_or(0) + weeks * 7,
            int_part(&caps, "hours").map_err(|_| err())?.unwrap_or(0),
            int_part(&caps, "minutes").map_err(|_| err())?.unwrap_or(0),
            float_part(&caps, "seconds").map_err(|_| err())?.unwrap_or(0.0),
        );

        if caps.name("sign").map(|m| m.as_str()) == Some("-") {
            Ok(d.negate())
        } else {
            Ok(d)
        }
    }

    /// Render in the verbose form, every part present, seconds rounded to
    /// `precision` fractional digits (default 6, at most 6).
    pub fn to_sql_text(&self, precision: Option<u32>) -> String {
        let precision = precision.unwrap_or(DEFAULT_PRECISION).min(MAX_PRECISION);
        let rounded = self.round(precision);
        format!(
            "{} years {} mons {} days {} hours {} minutes {} seconds",
            rounded.years,
            rounded.months,
            rounded.days,
            rounded.hours,
            rounded.minutes,
            format_seconds(rounded.seconds, precision)
        )
    }
}

fn format_seconds(seconds: f64, precision: u32) -> String {
    let text = format!("{:.*}", precision as usize, seconds);
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        text
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sql_text(None))
    }
}

impl std::str::FromStr for Duration {
    type Err = IntervalParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<std::time::Duration> for Duration {
    fn from(value: std::time::Duration) -> Self {
        Self::from_seconds(value.as_secs_f64())
    }
}

impl From<chrono::TimeDelta> for Duration {
    fn from(value: chrono::TimeDelta) -> Self {
        let whole = value.num_seconds();
        let nanos = (value - chrono::TimeDelta::seconds(whole))
            .num_nanoseconds()
            .unwrap_or(0);
        Self::from_seconds(whole as f64 + nanos as f64 / 1e9)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_database_output() {
        let d = Duration::parse("1 years 2 mons 3 days 04:05:06.5").unwrap();
        assert_eq!(d, Duration::new(1, 2, 3, 4, 5, 6.5));
    }

    #[test]
    fn test_parse_singular_units_and_partial_forms() {
        assert_eq!(
            Duration::parse("1 year 1 mon 1 day").unwrap(),
            Duration::new(1, 1, 1, 0, 0, 0.0)
        );
        assert_eq!(
            Duration::parse("00:00:30").unwrap(),
            Duration::new(0, 0, 0, 0, 0, 30.0)
        );
        assert_eq!(
            Duration::parse("7 days").unwrap(),
            Duration::new(0, 0, 7, 0, 0, 0.0)
        );
    }

    #[test]
    fn test_parse_negative_parts() {
        let d = Duration::parse("-1 years +2 mons -3 days -04:05:06").unwrap();
        assert_eq!(d, Duration::new(-1, 2, -3, -4, -5, -6.0));
    }

    #[test]
    fn test_parse_verbose_form() {
        let d = Duration::parse("0 years 0 mons 2 days 3 hours 4 minutes 5.25 seconds").unwrap();
        assert_eq!(d, Duration::new(0, 0, 2, 3, 4, 5.25));
    }

    #[test]
    fn test_iso8601_fallback() {
        let d = Duration::parse("P1Y2M3DT4H5M6.5S").unwrap();
        assert_eq!(d, Duration::new(1, 2, 3, 4, 5, 6.5));

        let d = Duration::parse("P2W").unwrap();
        assert_eq!(d.days, 14);

        let d = Duration::parse("-PT1M").unwrap();
        assert_eq!(d.minutes, -1);
    }

    #[test]
    fn test_unparseable_input() {
        for input in ["", "   ", "soon", "P", "PT", "1 fortnight", "1:2:3"] {
            let err = Duration::parse(input).unwrap_err();
            assert_eq!(err.input, input);
        }
    }

    #[test]
    fn test_serialize_zero_fills() {
        assert_eq!(
            Duration::new(0, 0, 3, 0, 0, 0.0).to_sql_text(None),
            "0 years 0 mons 3 days 0 hours 0 minutes 0 seconds"
        );
    }

    #[test]
    fn test_serialize_rounds_instead_of_truncating() {
        let d = Duration::new(0, 0, 0, 0, 0, 1.23456789);
        assert_eq!(
            d.to_sql_text(Some(3)),
            "0 years 0 mons 0 days 0 hours 0 minutes 1.235 seconds"
        );
        assert_eq!(
            d.to_sql_text(None),
            "0 years 0 mons 0 days 0 hours 0 minutes 1.234568 seconds"
        );
        assert_eq!(
            Duration::new(0, 0, 0, 0, 0, 2.5).to_sql_text(Some(0)),
            "0 years 0 mons 0 days 0 hours 0 minutes 3 seconds"
        );
    }

    #[test]
    fn test_round_trip_keeps_rounded_seconds() {
        let samples = [
            Duration::new(1, 2, 3, 4, 5, 6.123456789),
            Duration::new(0, 0, 0, 0, 0, 0.0000004),
            Duration::new(-2, 0, 10, -1, 30, -59.999_999_7),
            Duration::new(0, 11, 0, 23, 59, 59.5),
        ];
        for d in samples {
            for precision in [0, 1, 3, 6] {
                let parsed = Duration::parse(&d.to_sql_text(Some(precision))).unwrap();
                let expected = d.round(precision);
                assert_eq!(parsed, expected, "precision {} for {:?}", precision, d);
            }
        }
    }

    #[test]
    fn test_from_host_durations() {
        let d = Duration::from(std::time::Duration::from_secs(90_061));
        assert_eq!(d, Duration::new(0, 0, 1, 1, 1, 1.0));

        let d = Duration::from(chrono::TimeDelta::milliseconds(-1_500));
        assert_eq!(d, Duration::new(0, 0, 0, 0, 0, -1.5));
    }

    #[test]
    fn test_total_seconds() {
        let d = Duration::new(1, 1, 1, 1, 1, 1.5);
        let expected = (31_556_952 + 2_629_746 + 86_400 + 3_600 + 60) as f64 + 1.5;
        assert_eq!(d.total_seconds(), expected);
        assert!(Duration::default().is_zero());
    }

    #[test]
    fn test_huge_parts_do_not_overflow() {
        let d = Duration::parse("300000000000 years").unwrap();
        assert!(!d.is_zero());
        assert_eq!(d.total_seconds(), 300_000_000_000f64 * 31_556_952f64);

        let d = Duration::new(0, 0, i64::MAX, 0, 0, 0.0);
        assert!(d.total_seconds().is_finite());
    }

    #[test]
    fn test_precision_is_capped() {
        let d = Duration::new(0, 0, 0, 0, 0, 0.0);
        assert_eq!(d.round(400), d);
        assert_eq!(
            d.to_sql_text(Some(400)),
            "0 years 0 mons 0 days 0 hours 0 minutes 0 seconds"
        );

        let d = Duration::new(0, 0, 0, 0, 0, 1.23456789);
        let text = d.to_sql_text(Some(u32::MAX));
        assert_eq!(text, "0 years 0 mons 0 days 0 hours 0 minutes 1.234568 seconds");
        assert_eq!(Duration::parse(&text).unwrap(), d.round(6));
    }
}
