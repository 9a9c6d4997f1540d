//! Date parsing and formatting for INTERNALDATE, ENVELOPE dates and search
//! criteria.
//!
//! Servers are loose about dates. Besides the INTERNALDATE form
//! (`DD-Mon-YYYY HH:MM:SS +ZZZZ`) and RFC 2822, this accepts dotted times
//! (`12.05.33`), trailing zone comments (`(PDT)`) and dates without a zone,
//! which are taken to be local time.

use std::fmt::Display;

use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, TimeZone};

use crate::{Error, Result};

const ZONED_FORMATS: &[&str] = &["%d-%b-%Y %H:%M:%S %z", "%d %b %Y %H:%M:%S %z"];

const UNZONED_FORMATS: &[&str] = &[
    "%d-%b-%Y %H:%M:%S",
    "%d %b %Y %H:%M:%S",
    "%a, %d %b %Y %H:%M:%S",
    "%d %b %Y %H:%M",
];

/// Parses a server timestamp.
///
/// With `normalise` the result is expressed in the local time zone, so that
/// `naive_local()` yields local wall-clock time. Without it the offset the
/// server sent is kept. Both forms denote the same instant.
///
/// # Errors
///
/// Returns [`Error::Protocol`] if the value is not a recognisable date.
pub fn parse_to_datetime(raw: &[u8], normalise: bool) -> Result<DateTime<FixedOffset>> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| Error::Protocol("timestamp is not ASCII".to_string()))?;
    let cleaned = clean(text);

    let parsed = parse_zoned(&cleaned)
        .or_else(|| parse_unzoned(&cleaned))
        .ok_or_else(|| Error::Protocol(format!("unrecognised timestamp: {text:?}")))?;

    Ok(if normalise {
        parsed.with_timezone(&Local).fixed_offset()
    } else {
        parsed
    })
}

/// Drops a trailing zone comment, collapses whitespace and rewrites dotted
/// times to use colons.
fn clean(text: &str) -> String {
    let mut text = text.trim();
    if text.ends_with(')')
        && let Some(open) = text.rfind('(')
    {
        text = text[..open].trim_end();
    }

    text.split_whitespace()
        .map(|word| {
            if is_dotted_time(word) {
                word.replace('.', ":")
            } else {
                word.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_dotted_time(word: &str) -> bool {
    let parts: Vec<&str> = word.split('.').collect();
    (2..=3).contains(&parts.len())
        && parts
            .iter()
            .all(|p| (1..=2).contains(&p.len()) && p.bytes().all(|b| b.is_ascii_digit()))
}

fn parse_zoned(text: &str) -> Option<DateTime<FixedOffset>> {
    ZONED_FORMATS
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(text, fmt).ok())
        .or_else(|| DateTime::parse_from_rfc2822(text).ok())
}

fn parse_unzoned(text: &str) -> Option<DateTime<FixedOffset>> {
    let naive = UNZONED_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.fixed_offset())
}

/// Formats a timestamp as an INTERNALDATE string, `DD-Mon-YYYY HH:MM:SS +ZZZZ`.
#[must_use]
pub fn datetime_to_internaldate<Tz>(dt: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    dt.format("%d-%b-%Y %H:%M:%S %z").to_string()
}

/// Formats a date for SEARCH criteria such as SINCE or BEFORE, `DD-Mon-YYYY`.
#[must_use]
pub fn format_criteria_date(date: NaiveDate) -> String {
    date.format("%d-%b-%Y").to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{Datelike, Timelike, Utc};

    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn internaldate() {
        let dt = parse_to_datetime(b"01-Jan-2020 00:00:00 +0000", false).unwrap();
        assert_eq!(dt, utc(2020, 1, 1, 0, 0, 0));
        assert_eq!(dt.offset().local_minus_utc(), 0);
    }

    #[test]
    fn internaldate_with_space_padded_day() {
        let dt = parse_to_datetime(b" 9-Feb-2007 17:08:08 -0800", false).unwrap();
        assert_eq!(dt.offset().local_minus_utc(), -8 * 3600);
        assert_eq!(dt, utc(2007, 2, 10, 1, 8, 8));
    }

    #[test]
    fn normalised_times_keep_the_instant() {
        let raw = b"20-Mar-2018 12:00:00 +0100";
        let zoned = parse_to_datetime(raw, false).unwrap();
        let local = parse_to_datetime(raw, true).unwrap();
        assert_eq!(zoned, local);
        assert_eq!(local.naive_local(), zoned.with_timezone(&Local).naive_local());
    }

    #[test]
    fn rfc2822_dates() {
        let dt = parse_to_datetime(b"Tue, 20 Mar 2018 12:00:00 +0100", false).unwrap();
        assert_eq!(dt, utc(2018, 3, 20, 11, 0, 0));
    }

    #[test]
    fn zone_comments_are_ignored() {
        let dt = parse_to_datetime(b"Tue, 20 Mar 2018 05:00:00 -0700 (PDT)", false).unwrap();
        assert_eq!(dt, utc(2018, 3, 20, 12, 0, 0));
    }

    #[test]
    fn dotted_times() {
        let dt = parse_to_datetime(b"Sun, 11 Jan 2015 12.05.33 +0000", false).unwrap();
        assert_eq!(dt, utc(2015, 1, 11, 12, 5, 33));
    }

    #[test]
    fn missing_zone_means_local_time() {
        let dt = parse_to_datetime(b"20 Mar 2018 12:00:00", false).unwrap();
        let naive = dt.naive_local();
        assert_eq!((naive.year(), naive.month(), naive.day()), (2018, 3, 20));
        assert_eq!((naive.hour(), naive.minute()), (12, 0));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse_to_datetime(b"yesterday", false).is_err());
        assert!(parse_to_datetime(b"", true).is_err());
    }

    #[test]
    fn internaldate_formatting() {
        let offset = FixedOffset::west_opt(8 * 3600).unwrap();
        let dt = offset.with_ymd_and_hms(2007, 2, 9, 17, 8, 8).unwrap();
        assert_eq!(datetime_to_internaldate(&dt), "09-Feb-2007 17:08:08 -0800");
        assert_eq!(
            datetime_to_internaldate(&utc(2020, 1, 1, 0, 0, 0)),
            "01-Jan-2020 00:00:00 +0000"
        );
    }

    #[test]
    fn formatted_internaldate_parses_back() {
        let dt = utc(2011, 1, 30, 13, 32, 9);
        let wire = datetime_to_internaldate(&dt);
        assert_eq!(parse_to_datetime(wire.as_bytes(), false).unwrap(), dt);
    }

    #[test]
    fn criteria_dates() {
        let date = NaiveDate::from_ymd_opt(2005, 4, 3).unwrap();
        assert_eq!(format_criteria_date(date), "03-Apr-2005");
    }
}
