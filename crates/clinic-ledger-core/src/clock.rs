//! Clock and civil time zone handling.
//!
//! The clinic runs on one fixed civil offset. Every "today", month boundary and
//! per-day grouping goes through [`CivilCalendar`], so that expiry checks,
//! forecasts and dashboards agree on where a day starts.

use std::sync::Mutex;

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, SecondsFormat, TimeZone,
    Utc,
};

/// Source of the current instant.
pub trait Clock: Send + Sync {
    /// Current instant in UTC.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A settable clock (for tests and replays).
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    /// Create a clock pinned at `at`.
    pub fn new(at: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(at) }
    }

    /// Create a clock pinned at a civil wall time in `calendar`'s zone.
    pub fn at_civil(calendar: &CivilCalendar, date: NaiveDate, hour: u32, minute: u32) -> Self {
        let offset = NaiveTime::from_hms_opt(hour, minute, 0)
            .map(|t| t - NaiveTime::MIN)
            .unwrap_or_else(Duration::zero);
        Self::new(calendar.start_of_day(date) + offset)
    }

    /// Move the clock to `at`.
    pub fn set(&self, at: DateTime<Utc>) {
        match self.now.lock() {
            Ok(mut guard) => *guard = at,
            Err(poisoned) => *poisoned.into_inner() = at,
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let next = self.now() + by;
        self.set(next);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Calendar arithmetic in the clinic's fixed civil zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CivilCalendar {
    offset: FixedOffset,
}

impl CivilCalendar {
    /// Calendar for a UTC offset given in minutes east of UTC.
    pub fn from_offset_minutes(minutes: i32) -> Option<Self> {
        FixedOffset::east_opt(minutes.checked_mul(60)?).map(|offset| Self { offset })
    }

    /// Calendar for UTC itself.
    pub fn utc() -> Self {
        Self {
            offset: FixedOffset::east_opt(0).unwrap_or_else(|| Utc.fix()),
        }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Civil date of an instant.
    pub fn civil_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.offset).date_naive()
    }

    /// Civil "today" according to `clock`.
    pub fn today(&self, clock: &dyn Clock) -> NaiveDate {
        self.civil_date(clock.now())
    }

    /// UTC instant at which a civil day begins.
    pub fn start_of_day(&self, date: NaiveDate) -> DateTime<Utc> {
        let local = date.and_time(NaiveTime::MIN);
        let shift = Duration::seconds(i64::from(self.offset.local_minus_utc()));
        Utc.from_utc_datetime(&(local - shift))
    }

    /// First day of the month containing `date`.
    pub fn month_start(date: NaiveDate) -> NaiveDate {
        date - Duration::days(i64::from(date.day0()))
    }

    /// First day of the month after the one containing `date`.
    pub fn next_month_start(date: NaiveDate) -> NaiveDate {
        let first = Self::month_start(date);
        first + Duration::days(i64::from(Self::days_in_month(first)))
    }

    /// Number of days in the month containing `date`.
    pub fn days_in_month(date: NaiveDate) -> u32 {
        let first = Self::month_start(date);
        let (year, month) = if first.month() == 12 {
            (first.year() + 1, 1)
        } else {
            (first.year(), first.month() + 1)
        };
        NaiveDate::from_ymd_opt(year, month, 1)
            .map(|next| (next - first).num_days() as u32)
            .unwrap_or(31)
    }

    /// `YYYY-MM` label of the month containing `date`.
    pub fn month_label(date: NaiveDate) -> String {
        date.format("%Y-%m").to_string()
    }
}

/// Canonical timestamp text stored in the database.
///
/// Fixed width with a `Z` suffix so that lexical order equals time order.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Canonical `YYYY-MM-DD` date text.
pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}
