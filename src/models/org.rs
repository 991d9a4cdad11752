//! # Org Environment
//!
//! Per-org settings that affect how queries are written and read: the date
//! format users type dates in and the timezone those dates are interpreted in.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ids::OrgId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateFormat {
    #[serde(rename = "DD-MM-YYYY")]
    DayMonthYear,
    #[serde(rename = "MM-DD-YYYY")]
    MonthDayYear,
    #[serde(rename = "YYYY-MM-DD")]
    YearMonthDay,
}

impl DateFormat {
    fn chrono_format(&self) -> &'static str {
        match self {
            Self::DayMonthYear => "%d-%m-%Y",
            Self::MonthDayYear => "%m-%d-%Y",
            Self::YearMonthDay => "%Y-%m-%d",
        }
    }
}

impl fmt::Display for DateFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DayMonthYear => write!(f, "DD-MM-YYYY"),
            Self::MonthDayYear => write!(f, "MM-DD-YYYY"),
            Self::YearMonthDay => write!(f, "YYYY-MM-DD"),
        }
    }
}

impl FromStr for DateFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DD-MM-YYYY" | "D" => Ok(Self::DayMonthYear),
            "MM-DD-YYYY" | "M" => Ok(Self::MonthDayYear),
            "YYYY-MM-DD" | "Y" => Ok(Self::YearMonthDay),
            _ => Err(format!("Invalid date format: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrgEnvironment {
    pub org_id: OrgId,
    pub date_format: DateFormat,
    pub timezone: Tz,
}

impl OrgEnvironment {
    pub fn new(org_id: OrgId, date_format: DateFormat, timezone: Tz) -> Self {
        Self {
            org_id,
            date_format,
            timezone,
        }
    }

    /// Formats the local date of `instant` the way users of this org write dates
    pub fn format_date(&self, instant: DateTime<Utc>) -> String {
        instant
            .with_timezone(&self.timezone)
            .format(self.date_format.chrono_format())
            .to_string()
    }

    /// Parses a user-entered date, accepting `-`, `/` and `.` as separators
    pub fn parse_date(&self, value: &str) -> Option<NaiveDate> {
        let normalized: String = value
            .trim()
            .chars()
            .map(|c| if c == '/' || c == '.' { '-' } else { c })
            .collect();
        NaiveDate::parse_from_str(&normalized, self.date_format.chrono_format()).ok()
    }

    /// UTC instant at which `date` begins in the org timezone
    pub fn start_of_day(&self, date: NaiveDate) -> DateTime<Utc> {
        let midnight = date.and_hms_opt(0, 0, 0).unwrap_or_default();
        self.timezone
            .from_local_datetime(&midnight)
            .earliest()
            .map(|local| local.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&midnight))
    }
}

impl Default for OrgEnvironment {
    fn default() -> Self {
        Self::new(OrgId(0), DateFormat::DayMonthYear, Tz::UTC)
    }
}
