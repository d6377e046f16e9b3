//! Exchange trading calendar.
//!
//! One session per working day between the open and close times, in the
//! exchange's fixed UTC offset. Weekends and recurring national holidays
//! are closed; explicit extra holidays and extra working days (swapped
//! days) override the defaults, with extra working days winning.

use chrono::{
    DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc, Weekday,
};
use serde::{Deserialize, Serialize};

/// Give up looking for an open day after this many calendar days.
const MAX_CLOSED_RUN_DAYS: u32 = 400;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CalendarError {
    #[error("invalid UTC offset: {0} hours")]
    InvalidOffset(i32),
    #[error("session open {open} is not before close {close}")]
    InvalidHours { open: NaiveTime, close: NaiveTime },
    #[error("invalid recurring holiday {month:02}-{day:02}")]
    InvalidHoliday { month: u32, day: u32 },
    #[error("no trading day found after {0}")]
    NoTradingDay(NaiveDate),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarConfig {
    pub utc_offset_hours: i32,
    pub open: NaiveTime,
    pub close: NaiveTime,
    /// (month, day) closed every year.
    pub recurring_holidays: Vec<(u32, u32)>,
    pub extra_holidays: Vec<NaiveDate>,
    /// Weekend days on which the exchange works.
    pub extra_workdays: Vec<NaiveDate>,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        let date = |y, m, d| NaiveDate::from_ymd_opt(y, m, d);
        Self {
            utc_offset_hours: 3,
            open: NaiveTime::from_hms_opt(9, 55, 0).unwrap_or_default(),
            close: NaiveTime::from_hms_opt(13, 15, 0).unwrap_or_default(),
            recurring_holidays: vec![
                (1, 1),
                (1, 7),
                (3, 8),
                (5, 1),
                (5, 9),
                (7, 3),
                (11, 7),
                (12, 25),
            ],
            extra_holidays: [
                date(2019, 5, 6),
                date(2019, 5, 7),
                date(2019, 5, 8),
                date(2019, 11, 8),
            ]
            .into_iter()
            .flatten()
            .collect(),
            extra_workdays: [date(2019, 5, 4), date(2019, 5, 11), date(2019, 11, 16)]
                .into_iter()
                .flatten()
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TradingCalendar {
    offset: FixedOffset,
    open: NaiveTime,
    close: NaiveTime,
    recurring_holidays: Vec<(u32, u32)>,
    extra_holidays: Vec<NaiveDate>,
    extra_workdays: Vec<NaiveDate>,
}

impl TradingCalendar {
    pub fn new(config: &CalendarConfig) -> Result<Self, CalendarError> {
        let offset = config
            .utc_offset_hours
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .ok_or(CalendarError::InvalidOffset(config.utc_offset_hours))?;

        if config.open >= config.close {
            return Err(CalendarError::InvalidHours {
                open: config.open,
                close: config.close,
            });
        }

        // 2000 is a leap year, so Feb 29 is accepted.
        for &(month, day) in &config.recurring_holidays {
            if NaiveDate::from_ymd_opt(2000, month, day).is_none() {
                return Err(CalendarError::InvalidHoliday { month, day });
            }
        }

        Ok(Self {
            offset,
            open: config.open,
            close: config.close,
            recurring_holidays: config.recurring_holidays.clone(),
            extra_holidays: config.extra_holidays.clone(),
            extra_workdays: config.extra_workdays.clone(),
        })
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        if self.extra_workdays.contains(&date) {
            return false;
        }
        if self.extra_holidays.contains(&date) {
            return true;
        }
        if self.recurring_holidays.contains(&(date.month(), date.day())) {
            return true;
        }
        matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
    }

    /// Whether a session is running at `at`. The close is exclusive.
    pub fn is_open(&self, at: DateTime<Utc>) -> bool {
        let local = self.local(at);
        if self.is_holiday(local.date()) {
            return false;
        }
        self.open <= local.time() && local.time() < self.close
    }

    /// Start of the closest session that has not yet closed.
    ///
    /// Meant to be called outside a session; during one it returns the
    /// current session's (past) open.
    pub fn next_open(&self, at: DateTime<Utc>) -> Result<DateTime<Utc>, CalendarError> {
        let local = self.local(at);
        let mut date = local.date();

        if local.time() >= self.close || self.is_holiday(date) {
            date = next_day(date)?;
        }

        for _ in 0..MAX_CLOSED_RUN_DAYS {
            if !self.is_holiday(date) {
                return Ok(self.session_open(date));
            }
            date = next_day(date)?;
        }
        Err(CalendarError::NoTradingDay(local.date()))
    }

    pub fn session_open(&self, date: NaiveDate) -> DateTime<Utc> {
        self.to_utc(date.and_time(self.open))
    }

    pub fn session_close(&self, date: NaiveDate) -> DateTime<Utc> {
        self.to_utc(date.and_time(self.close))
    }

    /// Local midnight starting `date`.
    pub fn day_start(&self, date: NaiveDate) -> DateTime<Utc> {
        self.to_utc(date.and_time(NaiveTime::MIN))
    }

    /// Exchange-local calendar date of `at`.
    pub fn date_of(&self, at: DateTime<Utc>) -> NaiveDate {
        self.local(at).date()
    }

    pub fn today(&self) -> NaiveDate {
        self.date_of(self.now())
    }

    pub fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn local(&self, at: DateTime<Utc>) -> NaiveDateTime {
        at.with_timezone(&self.offset).naive_local()
    }

    fn to_utc(&self, local: NaiveDateTime) -> DateTime<Utc> {
        Utc.from_utc_datetime(&(local - self.offset))
    }
}

fn next_day(date: NaiveDate) -> Result<NaiveDate, CalendarError> {
    date.succ_opt().ok_or(CalendarError::NoTradingDay(date))
}
