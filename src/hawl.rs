//! # Hawl (Lunar Year) Tracking
//!
//! Wealth must be held for one full lunar year (Hawl) before Zakat becomes
//! obligatory. The Hawl of a record ends on the same Hijri date one year after
//! it starts; on the civil Islamic calendar that is 354 or 355 days later.
//!
//! Dates are converted with `icu_calendar`'s `IslamicCivil` calendar. Time is
//! read through the [`Clock`] trait so schedules can be tested deterministically.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use icu_calendar::{Date, Iso, islamic::IslamicCivil};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::ZakatError;

/// Length of the lunar year used to approximate the Hawl.
pub const LUNAR_YEAR_DAYS: i64 = 354;
/// Allowed drift between the Hijri anniversary and `start + LUNAR_YEAR_DAYS`.
pub const HAWL_TOLERANCE_DAYS: i64 = 5;

/// A date on the civil Islamic calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, schemars::JsonSchema)]
pub struct HijriDate {
    pub year: i32,
    pub month: u8,
    pub day: u8,
}

impl HijriDate {
    pub fn new(year: i32, month: u8, day: u8) -> Self {
        Self { year, month, day }
    }
}

impl fmt::Display for HijriDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02} AH", self.year, self.month, self.day)
    }
}

impl FromStr for HijriDate {
    type Err = ZakatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_end_matches("AH").trim();
        let invalid = || ZakatError::validation("hijriDate", format!("expected YYYY-MM-DD, got '{}'", s));

        let mut parts = trimmed.splitn(3, '-');
        let year = parts.next().and_then(|p| p.parse::<i32>().ok()).ok_or_else(invalid)?;
        let month = parts.next().and_then(|p| p.parse::<u8>().ok()).ok_or_else(invalid)?;
        let day = parts.next().and_then(|p| p.parse::<u8>().ok()).ok_or_else(invalid)?;

        if !(1..=12).contains(&month) || !(1..=30).contains(&day) {
            return Err(invalid());
        }
        Ok(Self { year, month, day })
    }
}

/// Gregorian to Hijri conversion.
pub trait HijriCalendar: Send + Sync {
    fn to_hijri(&self, date: NaiveDate) -> Result<HijriDate, ZakatError>;

    fn from_hijri(&self, date: HijriDate) -> Result<NaiveDate, ZakatError>;

    /// Days in the given Hijri month.
    fn days_in_month(&self, year: i32, month: u8) -> Result<u8, ZakatError>;

    fn add_lunar_days(&self, date: NaiveDate, days: i64) -> NaiveDate {
        date + Duration::days(days)
    }
}

/// Tabular (civil) Islamic calendar backed by `icu_calendar`.
#[derive(Debug, Clone, Default)]
pub struct IslamicCivilCalendar;

impl IslamicCivilCalendar {
    pub fn new() -> Self {
        Self
    }

    fn iso(date: NaiveDate) -> Result<Date<Iso>, ZakatError> {
        let month = u8::try_from(date.month()).map_err(|_| invalid_date(date))?;
        let day = u8::try_from(date.day()).map_err(|_| invalid_date(date))?;
        Date::try_new_iso_date(date.year(), month, day).map_err(|_| invalid_date(date))
    }

    fn civil(date: HijriDate) -> Result<Date<IslamicCivil>, ZakatError> {
        Date::try_new_islamic_civil_date_with_calendar(date.year, date.month, date.day, IslamicCivil::new())
            .map_err(|e| ZakatError::validation("hijriDate", format!("{} is not a valid Hijri date: {}", date, e)))
    }
}

fn invalid_date(date: NaiveDate) -> ZakatError {
    ZakatError::validation("date", format!("{} cannot be converted to the Hijri calendar", date))
}

impl HijriCalendar for IslamicCivilCalendar {
    fn to_hijri(&self, date: NaiveDate) -> Result<HijriDate, ZakatError> {
        let hijri = Self::iso(date)?.to_calendar(IslamicCivil::new());
        Ok(HijriDate {
            year: hijri.year().number,
            month: hijri.month().ordinal as u8,
            day: hijri.day_of_month().0 as u8,
        })
    }

    fn from_hijri(&self, date: HijriDate) -> Result<NaiveDate, ZakatError> {
        let iso = Self::civil(date)?.to_iso();
        NaiveDate::from_ymd_opt(iso.year().number, iso.month().ordinal, iso.day_of_month().0)
            .ok_or_else(|| ZakatError::validation("hijriDate", format!("{} has no Gregorian equivalent", date)))
    }

    fn days_in_month(&self, year: i32, month: u8) -> Result<u8, ZakatError> {
        Ok(Self::civil(HijriDate::new(year, month, 1))?.days_in_month())
    }
}

/// Hawl length and tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HawlRules {
    pub lunar_year_days: i64,
    pub tolerance_days: i64,
}

impl Default for HawlRules {
    fn default() -> Self {
        Self {
            lunar_year_days: LUNAR_YEAR_DAYS,
            tolerance_days: HAWL_TOLERANCE_DAYS,
        }
    }
}

/// A computed Hawl window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HawlPeriod {
    pub start: NaiveDate,
    pub start_hijri: HijriDate,
    pub completion: NaiveDate,
    pub completion_hijri: HijriDate,
}

impl HawlPeriod {
    /// Hawl starting on `start`: completes on the same Hijri day one year later
    /// (clamped to the month's length), or at `start + lunar_year_days` when the
    /// anniversary falls outside the tolerance.
    pub fn starting<C: HijriCalendar + ?Sized>(
        calendar: &C,
        start: NaiveDate,
        rules: HawlRules,
    ) -> Result<Self, ZakatError> {
        let start_hijri = calendar.to_hijri(start)?;
        let approx = calendar.add_lunar_days(start, rules.lunar_year_days);

        let next_year = start_hijri.year + 1;
        let max_day = calendar.days_in_month(next_year, start_hijri.month)?;
        let anniversary = HijriDate::new(next_year, start_hijri.month, start_hijri.day.min(max_day));
        let anniversary_date = calendar.from_hijri(anniversary)?;

        let completion = if (anniversary_date - approx).num_days().abs() <= rules.tolerance_days {
            anniversary_date
        } else {
            tracing::warn!(
                %start,
                %anniversary_date,
                %approx,
                "hijri anniversary outside tolerance; using lunar-year approximation"
            );
            approx
        };

        Ok(Self {
            start,
            start_hijri,
            completion,
            completion_hijri: calendar.to_hijri(completion)?,
        })
    }

    pub fn is_complete(&self, today: NaiveDate) -> bool {
        today >= self.completion
    }

    pub fn days_remaining(&self, today: NaiveDate) -> i64 {
        (self.completion - today).num_days().max(0)
    }

    pub fn total_days(&self) -> i64 {
        (self.completion - self.start).num_days()
    }

    /// Fraction of the Hawl elapsed, clamped to `[0, 1]`.
    pub fn progress(&self, today: NaiveDate) -> Decimal {
        let total = self.total_days();
        if total <= 0 {
            return Decimal::ONE;
        }
        let elapsed = (today - self.start).num_days().clamp(0, total);
        Decimal::from(elapsed) / Decimal::from(total)
    }
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<RwLock<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Arc::new(RwLock::new(now)) }
    }

    /// Starts at midnight UTC of `date`.
    pub fn at_date(date: NaiveDate) -> Self {
        Self::new(date.and_time(chrono::NaiveTime::MIN).and_utc())
    }

    pub fn set(&self, now: DateTime<Utc>) {
        let mut guard = self.now.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
