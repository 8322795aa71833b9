use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc,
};

use crate::models::WeekKey;

const MAX_OFFSET_MINUTES: u32 = 18 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum WeekStart {
    /// Weeks start on Sunday and take the year and week-of-year (1..=53) of
    /// that Sunday.
    #[default]
    Sunday,
    /// ISO-8601 weeks: start on Monday, numbered within the ISO week year.
    Monday,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calendar {
    offset: FixedOffset,
    week_start: WeekStart,
}

impl Default for Calendar {
    fn default() -> Self {
        Self::utc(WeekStart::default())
    }
}

impl Calendar {
    pub fn new(offset: FixedOffset, week_start: WeekStart) -> Self {
        Self { offset, week_start }
    }

    pub fn utc(week_start: WeekStart) -> Self {
        Self::new(Utc.fix(), week_start)
    }

    /// Returns `None` when the offset is outside ±18 hours.
    pub fn from_offset_minutes(minutes: i32, week_start: WeekStart) -> Option<Self> {
        if minutes.unsigned_abs() > MAX_OFFSET_MINUTES {
            return None;
        }
        FixedOffset::east_opt(minutes * 60).map(|offset| Self::new(offset, week_start))
    }

    pub fn offset_seconds(&self) -> i32 {
        self.offset.local_minus_utc()
    }

    pub fn week_start(&self) -> WeekStart {
        self.week_start
    }

    pub fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.offset).date_naive()
    }

    /// UTC instant of local midnight at the start of `date`.
    pub fn midnight(&self, date: NaiveDate) -> DateTime<Utc> {
        let local = date.and_time(NaiveTime::MIN);
        Utc.from_utc_datetime(&(local - Duration::seconds(i64::from(self.offset_seconds()))))
    }

    pub fn start_of_day(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        self.midnight(self.local_date(at))
    }

    pub fn end_of_day(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        inclusive_end(self.midnight(self.local_date(at) + Duration::days(1)))
    }

    pub fn first_day_of_week(&self, date: NaiveDate) -> NaiveDate {
        let back = match self.week_start {
            WeekStart::Sunday => date.weekday().num_days_from_sunday(),
            WeekStart::Monday => date.weekday().num_days_from_monday(),
        };
        date - Duration::days(i64::from(back))
    }

    pub fn start_of_week(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        self.midnight(self.first_day_of_week(self.local_date(at)))
    }

    pub fn end_of_week(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let next = self.first_day_of_week(self.local_date(at)) + Duration::weeks(1);
        inclusive_end(self.midnight(next))
    }

    pub fn start_of_month(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let date = self.local_date(at);
        self.midnight(date - Duration::days(i64::from(date.day0())))
    }

    pub fn start_of_year(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        self.midnight(first_of_year(self.local_date(at)))
    }

    pub fn end_of_year(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let first = first_of_year(self.local_date(at));
        let days = if first.leap_year() { 366 } else { 365 };
        inclusive_end(self.midnight(first + Duration::days(days)))
    }

    pub fn day_key(&self, at: DateTime<Utc>) -> NaiveDate {
        self.local_date(at)
    }

    pub fn week_key(&self, at: DateTime<Utc>) -> WeekKey {
        let date = self.local_date(at);
        match self.week_start {
            WeekStart::Sunday => {
                // Keyed by the week's Sunday so a week spanning New Year has one key.
                let sunday = self.first_day_of_week(date);
                WeekKey {
                    year: sunday.year(),
                    week: (sunday.ordinal0() + 7) / 7,
                }
            }
            WeekStart::Monday => {
                let iso = date.iso_week();
                WeekKey {
                    year: iso.year(),
                    week: iso.week(),
                }
            }
        }
    }

    pub fn month_key(&self, at: DateTime<Utc>) -> u32 {
        self.local_date(at).month()
    }
}

fn inclusive_end(next_start: DateTime<Utc>) -> DateTime<Utc> {
    next_start - Duration::nanoseconds(1)
}

fn first_of_year(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.ordinal0()))
}
