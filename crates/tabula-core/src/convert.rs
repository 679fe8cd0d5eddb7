//! Coercion rules applied when a column switches mode.
//!
//! Conversion never fails as a whole: a value that cannot be represented in the target mode
//! becomes that mode's invalid sentinel (NaN, `0`, empty text, or an invalid date-time).
//! Day counts are measured from 1900-01-01 00:00.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use regex::Regex;
use std::fmt::Write;
use std::sync::OnceLock;

use crate::mode::ColumnMode;
use crate::value::ColumnData;

pub const DEFAULT_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Date formats tried, in order, when text does not match the column's own format
pub const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d.%m.%Y",
    "%d/%m/%Y",
    "%m/%d/%Y",
    "%d-%m-%Y",
    "%Y%m%d",
    "%d %b %Y",
    "%b %d %Y",
];

/// Time formats tried, in order, for the time part of a date-time text
pub const TIME_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H:%M:%S", "%H:%M", "%Hh%M"];

const MONTH_NAMES: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

const DAY_NAMES: [&str; 7] = [
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

const MS_PER_DAY: f64 = 86_400_000.0;

/// Options shared by every conversion of one column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionOptions {
    /// chrono format used for text <-> date-time
    pub datetime_format: String,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            datetime_format: DEFAULT_DATETIME_FORMAT.to_string(),
        }
    }
}

impl ConversionOptions {
    pub fn with_format(format: impl Into<String>) -> Self {
        Self {
            datetime_format: format.into(),
        }
    }
}

pub(crate) fn epoch_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1900, 1, 1).expect("1900-01-01 is a valid date")
}

fn epoch() -> NaiveDateTime {
    epoch_date().and_time(NaiveTime::MIN)
}

/// Fractional days since the epoch to a date-time
pub fn days_to_date_time(days: f64) -> Option<NaiveDateTime> {
    if !days.is_finite() {
        return None;
    }
    let ms = (days * MS_PER_DAY).round();
    if ms.abs() >= i64::MAX as f64 {
        return None;
    }
    epoch().checked_add_signed(TimeDelta::try_milliseconds(ms as i64)?)
}

/// Date-time to fractional days since the epoch
pub fn date_time_to_days(value: NaiveDateTime) -> f64 {
    (value - epoch()).num_milliseconds() as f64 / MS_PER_DAY
}

/// Date-time to whole days since the epoch, ignoring the time of day
pub fn date_time_to_whole_days(value: NaiveDateTime) -> i64 {
    (value.date() - epoch_date()).num_days()
}

fn month_date_time(month: i64) -> Option<NaiveDateTime> {
    let month = u32::try_from(month).ok().filter(|m| (1..=12).contains(m))?;
    NaiveDate::from_ymd_opt(1900, month, 1).map(|d| d.and_time(NaiveTime::MIN))
}

/// 1900-01-01 is a Monday, so day `n` of the week lands on 1900-01-n
fn weekday_date_time(day: i64) -> Option<NaiveDateTime> {
    let day = u32::try_from(day).ok().filter(|d| (1..=7).contains(d))?;
    NaiveDate::from_ymd_opt(1900, 1, day).map(|d| d.and_time(NaiveTime::MIN))
}

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\s*([A-Za-z]{3,})\.?\s*$").expect("valid name pattern"))
}

/// Index (1-based) of the name that `word` abbreviates, requiring at least three letters
fn match_name(text: &str, names: &[&str]) -> Option<i64> {
    let word = name_pattern().captures(text)?.get(1)?.as_str().to_lowercase();
    names
        .iter()
        .position(|name| name.starts_with(&word))
        .map(|i| i as i64 + 1)
}

/// Parse text into a date-time: first with `format`, then by splitting into a date part and a
/// time part and trying [`DATE_FORMATS`] and [`TIME_FORMATS`].
pub fn parse_date_time(text: &str, format: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(value) = NaiveDateTime::parse_from_str(text, format) {
        return Some(value);
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, format) {
        return Some(date.and_time(NaiveTime::MIN));
    }

    let simplified = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut parts: Vec<&str> = simplified
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if parts.len() == 1 {
        let only = parts[0];
        parts = only.split(' ').filter(|s| !s.is_empty()).collect();
    }

    let date_part = *parts.first()?;
    let time_part = parts.get(1).copied().unwrap_or(date_part);

    let date = DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(date_part, f).ok());
    let time = TIME_FORMATS
        .iter()
        .find_map(|f| NaiveTime::parse_from_str(time_part, f).ok());

    match (date, time) {
        (Some(date), Some(time)) => Some(date.and_time(time)),
        (Some(date), None) => Some(date.and_time(NaiveTime::MIN)),
        (None, Some(time)) => Some(epoch_date().and_time(time)),
        (None, None) => None,
    }
}

/// Format a date-time, falling back to the default format when `format` is not valid
pub fn format_date_time(value: NaiveDateTime, format: &str) -> String {
    let mut out = String::new();
    if write!(out, "{}", value.format(format)).is_ok() {
        return out;
    }
    out.clear();
    // the default format is always valid
    let _ = write!(out, "{}", value.format(DEFAULT_DATETIME_FORMAT));
    out
}

/// Render a double the way cells display it: integral values without a fraction
pub fn format_number(value: f64) -> String {
    if value.is_nan() {
        String::new()
    } else if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

pub fn parse_number(text: &str) -> f64 {
    text.trim().parse().unwrap_or(f64::NAN)
}

pub fn parse_integer(text: &str) -> i64 {
    let text = text.trim();
    text.parse::<i64>()
        .ok()
        .or_else(|| {
            text.parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(|v| v.round() as i64)
        })
        .unwrap_or(0)
}

/// Double to integer by rounding; NaN becomes 0
pub fn round_to_integer(value: f64) -> i64 {
    if value.is_nan() {
        0
    } else {
        value.round() as i64
    }
}

fn parse_month(text: &str, format: &str) -> Option<NaiveDateTime> {
    match_name(text, &MONTH_NAMES)
        .or_else(|| text.trim().parse::<i64>().ok())
        .and_then(month_date_time)
        .or_else(|| parse_date_time(text, format))
}

fn parse_weekday(text: &str, format: &str) -> Option<NaiveDateTime> {
    match_name(text, &DAY_NAMES)
        .or_else(|| text.trim().parse::<i64>().ok())
        .and_then(weekday_date_time)
        .or_else(|| parse_date_time(text, format))
}

/// Numeric reading of a date-time under the semantics of `mode`: month number for Month,
/// weekday number (Monday = 1) for Day, fractional days since the epoch otherwise
pub fn date_time_number(value: NaiveDateTime, mode: ColumnMode) -> f64 {
    match mode {
        ColumnMode::Month => f64::from(value.month()),
        ColumnMode::Day => f64::from(value.weekday().number_from_monday()),
        _ => date_time_to_days(value),
    }
}

fn date_time_integer(value: NaiveDateTime, mode: ColumnMode) -> i64 {
    match mode {
        ColumnMode::Month => i64::from(value.month()),
        ColumnMode::Day => i64::from(value.weekday().number_from_monday()),
        _ => date_time_to_whole_days(value),
    }
}

fn date_time_text(value: NaiveDateTime, mode: ColumnMode, format: &str) -> String {
    match mode {
        ColumnMode::Month => format_date_time(value, "%B"),
        ColumnMode::Day => format_date_time(value, "%A"),
        _ => format_date_time(value, format),
    }
}

/// Date-time for a double under the semantics of `mode`
fn number_date_time(value: f64, mode: ColumnMode) -> Option<NaiveDateTime> {
    if !value.is_finite() {
        return None;
    }
    match mode {
        ColumnMode::Month => month_date_time(value.round() as i64),
        ColumnMode::Day => weekday_date_time(value.round() as i64),
        _ => days_to_date_time(value),
    }
}

fn integer_date_time(value: i64, mode: ColumnMode) -> Option<NaiveDateTime> {
    match mode {
        ColumnMode::Month => month_date_time(value),
        ColumnMode::Day => weekday_date_time(value),
        _ => epoch().checked_add_signed(TimeDelta::try_days(value)?),
    }
}

/// Rewrite `data`, currently interpreted under `from`, into the representation of `to`.
///
/// The result always has exactly as many values as the input.
pub fn convert(
    data: &ColumnData,
    from: ColumnMode,
    to: ColumnMode,
    options: &ConversionOptions,
) -> ColumnData {
    let format = options.datetime_format.as_str();

    match (data, to) {
        (ColumnData::Numeric(v), ColumnMode::Numeric) => ColumnData::Numeric(v.clone()),
        (ColumnData::Numeric(v), ColumnMode::Integer) => {
            ColumnData::Integer(v.iter().map(|x| round_to_integer(*x)).collect())
        }
        (ColumnData::Numeric(v), ColumnMode::Text) => {
            ColumnData::Text(v.iter().map(|x| format_number(*x)).collect())
        }
        (ColumnData::Numeric(v), mode) => {
            ColumnData::DateTime(v.iter().map(|x| number_date_time(*x, mode)).collect())
        }

        (ColumnData::Integer(v), ColumnMode::Numeric) => {
            ColumnData::Numeric(v.iter().map(|x| *x as f64).collect())
        }
        (ColumnData::Integer(v), ColumnMode::Integer) => ColumnData::Integer(v.clone()),
        (ColumnData::Integer(v), ColumnMode::Text) => {
            ColumnData::Text(v.iter().map(|x| x.to_string()).collect())
        }
        (ColumnData::Integer(v), mode) => {
            ColumnData::DateTime(v.iter().map(|x| integer_date_time(*x, mode)).collect())
        }

        (ColumnData::Text(v), ColumnMode::Numeric) => {
            ColumnData::Numeric(v.iter().map(|s| parse_number(s)).collect())
        }
        (ColumnData::Text(v), ColumnMode::Integer) => {
            ColumnData::Integer(v.iter().map(|s| parse_integer(s)).collect())
        }
        (ColumnData::Text(v), ColumnMode::Text) => ColumnData::Text(v.clone()),
        (ColumnData::Text(v), ColumnMode::Month) => {
            ColumnData::DateTime(v.iter().map(|s| parse_month(s, format)).collect())
        }
        (ColumnData::Text(v), ColumnMode::Day) => {
            ColumnData::DateTime(v.iter().map(|s| parse_weekday(s, format)).collect())
        }
        (ColumnData::Text(v), ColumnMode::DateTime) => {
            ColumnData::DateTime(v.iter().map(|s| parse_date_time(s, format)).collect())
        }

        (ColumnData::DateTime(v), ColumnMode::Numeric) => ColumnData::Numeric(
            v.iter()
                .map(|x| x.map_or(f64::NAN, |d| date_time_number(d, from)))
                .collect(),
        ),
        (ColumnData::DateTime(v), ColumnMode::Integer) => ColumnData::Integer(
            v.iter()
                .map(|x| x.map_or(0, |d| date_time_integer(d, from)))
                .collect(),
        ),
        (ColumnData::DateTime(v), ColumnMode::Text) => ColumnData::Text(
            v.iter()
                .map(|x| x.map_or_else(String::new, |d| date_time_text(d, from, format)))
                .collect(),
        ),
        // Month, Day and DateTime share storage; only the interpretation changes
        (ColumnData::DateTime(v), _) => ColumnData::DateTime(v.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn dt(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, s)
            .unwrap()
    }

    fn opts() -> ConversionOptions {
        ConversionOptions::default()
    }

    #[test]
    fn test_numeric_to_integer_rounds() {
        let data = ColumnData::Numeric(vec![1.4, 1.6, -2.5, f64::NAN]);
        let out = convert(&data, ColumnMode::Numeric, ColumnMode::Integer, &opts());
        assert_eq!(out, ColumnData::Integer(vec![1, 2, -3, 0]));
    }

    #[test]
    fn test_text_to_numeric_marks_unparseable() {
        let data = ColumnData::Text(vec![" 2.5 ".into(), "abc".into(), "".into()]);
        match convert(&data, ColumnMode::Text, ColumnMode::Numeric, &opts()) {
            ColumnData::Numeric(v) => {
                assert_eq!(v[0], 2.5);
                assert!(v[1].is_nan());
                assert!(v[2].is_nan());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_text_to_integer() {
        let data = ColumnData::Text(vec!["42".into(), "2.6".into(), "x".into()]);
        let out = convert(&data, ColumnMode::Text, ColumnMode::Integer, &opts());
        assert_eq!(out, ColumnData::Integer(vec![42, 3, 0]));
    }

    #[test]
    fn test_text_to_date_time_patterns() {
        let format = "%Y-%m-%d %H:%M:%S";
        assert_eq!(
            parse_date_time("2024-03-05 10:20:30", format),
            Some(dt(2024, 3, 5, 10, 20, 30))
        );
        assert_eq!(
            parse_date_time("05.03.2024, 10:20", format),
            Some(dt(2024, 3, 5, 10, 20, 0))
        );
        assert_eq!(parse_date_time("2024/03/05", format), Some(dt(2024, 3, 5, 0, 0, 0)));
        assert_eq!(parse_date_time("10:20", format), Some(dt(1900, 1, 1, 10, 20, 0)));
        assert_eq!(parse_date_time("not a date", format), None);
        assert_eq!(parse_date_time("", format), None);
    }

    #[test]
    fn test_date_time_day_counts() {
        assert_eq!(days_to_date_time(0.0), Some(dt(1900, 1, 1, 0, 0, 0)));
        assert_eq!(days_to_date_time(1.5), Some(dt(1900, 1, 2, 12, 0, 0)));
        assert_eq!(date_time_to_days(dt(1900, 1, 2, 12, 0, 0)), 1.5);
        assert_eq!(date_time_to_whole_days(dt(1900, 1, 11, 23, 0, 0)), 10);
        assert_eq!(days_to_date_time(f64::NAN), None);
    }

    #[test]
    fn test_integer_and_date_time() {
        let data = ColumnData::Integer(vec![31]);
        let out = convert(&data, ColumnMode::Integer, ColumnMode::DateTime, &opts());
        assert_eq!(out, ColumnData::DateTime(vec![Some(dt(1900, 2, 1, 0, 0, 0))]));
        let back = convert(&out, ColumnMode::DateTime, ColumnMode::Integer, &opts());
        assert_eq!(back, data);
    }

    #[test]
    fn test_month_and_day_modes() {
        let names = ColumnData::Text(vec!["Mar".into(), "september".into(), "13".into()]);
        let months = convert(&names, ColumnMode::Text, ColumnMode::Month, &opts());
        let numbers = convert(&months, ColumnMode::Month, ColumnMode::Integer, &opts());
        assert_eq!(numbers, ColumnData::Integer(vec![3, 9, 0]));

        let text = convert(&months, ColumnMode::Month, ColumnMode::Text, &opts());
        assert_eq!(text, ColumnData::Text(vec!["March".into(), "September".into(), "".into()]));

        let days = convert(
            &ColumnData::Numeric(vec![1.0, 7.0, 8.0]),
            ColumnMode::Numeric,
            ColumnMode::Day,
            &opts(),
        );
        let text = convert(&days, ColumnMode::Day, ColumnMode::Text, &opts());
        assert_eq!(text, ColumnData::Text(vec!["Monday".into(), "Sunday".into(), "".into()]));
    }

    #[test]
    fn test_numeric_text_formatting() {
        let data = ColumnData::Numeric(vec![3.0, 2.25, f64::NAN]);
        let out = convert(&data, ColumnMode::Numeric, ColumnMode::Text, &opts());
        assert_eq!(out, ColumnData::Text(vec!["3".into(), "2.25".into(), "".into()]));
    }

    #[test]
    fn test_invalid_format_falls_back() {
        let text = format_date_time(dt(2020, 1, 2, 3, 4, 5), "%Q");
        assert_eq!(text, "2020-01-02 03:04:05");
    }

    fn any_data() -> impl Strategy<Value = (ColumnMode, ColumnData)> {
        prop_oneof![
            proptest::collection::vec(any::<f64>(), 0..20)
                .prop_map(|v| (ColumnMode::Numeric, ColumnData::Numeric(v))),
            proptest::collection::vec(any::<i64>(), 0..20)
                .prop_map(|v| (ColumnMode::Integer, ColumnData::Integer(v))),
            proptest::collection::vec(".{0,12}", 0..20)
                .prop_map(|v| (ColumnMode::Text, ColumnData::Text(v))),
        ]
    }

    proptest! {
        #[test]
        fn prop_conversion_preserves_length((from, data) in any_data(), to in 0usize..6) {
            let to = ColumnMode::ALL[to];
            let out = convert(&data, from, to, &opts());
            prop_assert_eq!(out.len(), data.len());
            prop_assert!(out.fits(to));
        }
    }
}
