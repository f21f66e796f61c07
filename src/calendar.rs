use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// The only textual date format accepted at the boundary.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Truncate an instant to its calendar day and pin it to UTC midnight.
///
/// The day is the one observed in `t`'s own offset: 23:30 at +07:00 and
/// 00:10 at -05:00 on the same wall-calendar date normalize identically.
/// Normalizing an already-normalized value returns it unchanged.
pub fn normalize<Tz: TimeZone>(t: &DateTime<Tz>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&t.date_naive().and_time(NaiveTime::MIN))
}

/// UTC midnight at the start of `date`.
pub fn start_of(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid date {0:?}: expected YYYY-MM-DD")]
pub struct InvalidDate(pub String);

/// Parse a strict `YYYY-MM-DD` date. Unpadded fields, signs, times and
/// offsets are all rejected.
pub fn parse_date(s: &str) -> Result<NaiveDate, InvalidDate> {
    let b = s.as_bytes();
    let shape_ok = b.len() == 10
        && b[4] == b'-'
        && b[7] == b'-'
        && b.iter()
            .enumerate()
            .all(|(i, c)| i == 4 || i == 7 || c.is_ascii_digit());
    if !shape_ok {
        return Err(InvalidDate(s.to_string()));
    }
    NaiveDate::parse_from_str(s, DATE_FORMAT).map_err(|_| InvalidDate(s.to_string()))
}

/// A calendar day. The only way to build one is through [`normalize`], so a
/// `Day` is always UTC midnight and two `Day`s compare equal exactly when
/// they name the same date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Day(DateTime<Utc>);

impl Day {
    pub fn of<Tz: TimeZone>(t: &DateTime<Tz>) -> Self {
        Self(normalize(t))
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self(start_of(date))
    }

    pub fn parse(s: &str) -> Result<Self, InvalidDate> {
        parse_date(s).map(Self::from_date)
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    pub fn date(&self) -> NaiveDate {
        self.0.date_naive()
    }
}

impl fmt::Display for Day {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(DATE_FORMAT))
    }
}
