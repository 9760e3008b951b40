//! # Calendar Clock
//!
//! Timestamps travel through XDR files in two shapes: packed integers of the
//! form `YYYYDDDHHMM` (year, day of year, hour, minute) inside the data arrays,
//! and ISO strings `YYYY-MM-DDThh:mm:ss-0000` in the headers. [`Timestamp`]
//! holds a validated, minute-precision UTC time and converts between both.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{XdrError, XdrResult};

pub const MIN_YEAR: i32 = 1900;
pub const MAX_YEAR: i32 = 9999;

const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S-0000";

/// A validated UTC timestamp with minute precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Timestamp {
    datetime: NaiveDateTime,
}

/// Returns true if `packed` is a valid `YYYYDDDHHMM` value.
///
/// ```
/// use xdrconvert::timestamp::is_valid_timestamp;
///
/// assert!(is_valid_timestamp(2005_238_0000));
/// assert!(is_valid_timestamp(2004_366_2359)); // leap year
/// assert!(!is_valid_timestamp(2005_366_0000));
/// assert!(!is_valid_timestamp(2005_238_2400));
/// ```
pub fn is_valid_timestamp(packed: i64) -> bool {
    unpack(packed).is_some()
}

fn unpack(packed: i64) -> Option<NaiveDateTime> {
    if packed < 0 {
        return None;
    }
    let year = packed / 10_000_000;
    let day = (packed / 10_000) % 1000;
    let hour = (packed / 100) % 100;
    let minute = packed % 100;
    if !(MIN_YEAR as i64..=MAX_YEAR as i64).contains(&year) {
        return None;
    }
    NaiveDate::from_yo_opt(year as i32, day as u32)?.and_hms_opt(hour as u32, minute as u32, 0)
}

fn in_supported_years(datetime: &NaiveDateTime) -> bool {
    (MIN_YEAR..=MAX_YEAR).contains(&datetime.year())
}

impl Timestamp {
    /// Builds a timestamp from its packed `YYYYDDDHHMM` form.
    pub fn from_packed(packed: i64) -> XdrResult<Self> {
        unpack(packed)
            .map(|datetime| Self { datetime })
            .ok_or_else(|| XdrError::range(format!("invalid timestamp {}", packed)))
    }

    /// Builds a timestamp from a packed value stored in a real-valued array.
    pub fn from_value(value: f64) -> XdrResult<Self> {
        if !value.is_finite() || value.fract() != 0.0 {
            return Err(XdrError::range(format!("invalid timestamp {}", value)));
        }
        Self::from_packed(value as i64)
    }

    pub fn from_datetime(datetime: NaiveDateTime) -> XdrResult<Self> {
        if !in_supported_years(&datetime) {
            return Err(XdrError::range(format!("timestamp {} outside supported years", datetime)));
        }
        let truncated = datetime
            .with_second(0)
            .and_then(|d| d.with_nanosecond(0))
            .ok_or_else(|| XdrError::range(format!("invalid timestamp {}", datetime)))?;
        Ok(Self { datetime: truncated })
    }

    /// Parses `YYYY-MM-DDThh:mm:ss-0000`.
    pub fn from_iso(text: &str) -> XdrResult<Self> {
        let datetime = NaiveDateTime::parse_from_str(text.trim(), ISO_FORMAT)
            .map_err(|e| XdrError::format(format!("invalid ISO timestamp '{}': {}", text, e)))?;
        Self::from_datetime(datetime)
    }

    pub fn to_iso(&self) -> String {
        self.datetime.format(ISO_FORMAT).to_string()
    }

    pub fn packed(&self) -> i64 {
        self.datetime.year() as i64 * 10_000_000
            + self.datetime.ordinal() as i64 * 10_000
            + self.datetime.hour() as i64 * 100
            + self.datetime.minute() as i64
    }

    /// IOAPI date `YYYYDDD`.
    pub fn yyyyddd(&self) -> i32 {
        self.datetime.year() * 1000 + self.datetime.ordinal() as i32
    }

    /// IOAPI time `HHMMSS`.
    pub fn hhmmss(&self) -> i32 {
        (self.datetime.hour() * 10_000 + self.datetime.minute() * 100) as i32
    }

    pub fn datetime(&self) -> NaiveDateTime {
        self.datetime
    }

    pub fn date(&self) -> NaiveDate {
        self.datetime.date()
    }

    pub fn floor_hour(&self) -> Self {
        Self {
            datetime: self.datetime.date().and_hms_opt(self.datetime.hour(), 0, 0).unwrap_or(self.datetime),
        }
    }

    pub fn increment_hours(&self, hours: i64) -> XdrResult<Self> {
        let next = self
            .datetime
            .checked_add_signed(Duration::hours(hours))
            .ok_or_else(|| XdrError::range(format!("cannot offset {} by {} hours", self, hours)))?;
        Self::from_datetime(next)
    }

    pub fn increment_hour(&self) -> XdrResult<Self> {
        self.increment_hours(1)
    }

    pub fn decrement_hour(&self) -> XdrResult<Self> {
        self.increment_hours(-1)
    }

    /// Whole hours from `self` to `later`, both floored to the hour.
    pub fn hours_until(&self, later: &Timestamp) -> i64 {
        (later.floor_hour().datetime - self.floor_hour().datetime).num_hours()
    }

    /// Number of hourly timesteps covering `[first, last]`.
    pub fn hours_in_range(first: &Timestamp, last: &Timestamp) -> usize {
        (first.hours_until(last) + 1).max(0) as usize
    }

    /// Number of calendar days covering `[first, last]`.
    pub fn days_in_range(first: &Timestamp, last: &Timestamp) -> usize {
        ((last.date() - first.date()).num_days() + 1).max(0) as usize
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_iso())
    }
}

impl TryFrom<i64> for Timestamp {
    type Error = XdrError;

    fn try_from(packed: i64) -> Result<Self, Self::Error> {
        Self::from_packed(packed)
    }
}

impl From<Timestamp> for i64 {
    fn from(timestamp: Timestamp) -> Self {
        timestamp.packed()
    }
}

/// First and last timestamps of a dataset, `first <= last`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub first: Timestamp,
    pub last: Timestamp,
}

impl TimeRange {
    pub fn new(first: Timestamp, last: Timestamp) -> XdrResult<Self> {
        if first > last {
            return Err(XdrError::range(format!("time range {} .. {} is not monotonic", first, last)));
        }
        Ok(Self { first, last })
    }

    pub fn hours(&self) -> usize {
        Timestamp::hours_in_range(&self.first, &self.last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed_round_trip() {
        let t = Timestamp::from_packed(2005_238_1430).unwrap();
        assert_eq!(t.packed(), 2005_238_1430);
        assert_eq!(t.to_iso(), "2005-08-26T14:30:00-0000");
        assert_eq!(t.yyyyddd(), 2005238);
        assert_eq!(t.hhmmss(), 143000);
    }

    #[test]
    fn test_iso_parsing() {
        let t = Timestamp::from_iso("2004-12-31T23:00:00-0000").unwrap();
        assert_eq!(t.packed(), 2004_366_2300);
        assert!(Timestamp::from_iso("2004-12-31 23:00:00").is_err());
        assert!(Timestamp::from_iso("1800-01-01T00:00:00-0000").is_err());
    }

    #[test]
    fn test_hour_arithmetic_crosses_year() {
        let t = Timestamp::from_packed(2004_366_2300).unwrap();
        let next = t.increment_hour().unwrap();
        assert_eq!(next.packed(), 2005_001_0000);
        assert_eq!(next.decrement_hour().unwrap(), t);
        assert!(Timestamp::from_packed(9999_365_2300).unwrap().increment_hour().is_err());
    }

    #[test]
    fn test_ranges() {
        let first = Timestamp::from_packed(2005_238_0010).unwrap();
        let last = Timestamp::from_packed(2005_239_2359).unwrap();
        assert_eq!(Timestamp::hours_in_range(&first, &last), 48);
        assert_eq!(Timestamp::days_in_range(&first, &last), 2);
        assert_eq!(first.floor_hour().packed(), 2005_238_0000);
        assert!(TimeRange::new(last, first).is_err());
    }

    #[test]
    fn test_from_value_rejects_fractions() {
        assert!(Timestamp::from_value(2005_238_0000.0).is_ok());
        assert!(Timestamp::from_value(2005_238_0000.5).is_err());
        assert!(Timestamp::from_value(f64::NAN).is_err());
    }
}
