//! Fixed period keyword vocabulary for the sales tools.
//!
//! Unrecognized period strings are rejected with an error naming the
//! accepted values; the agent loop surfaces that error back to the model
//! as an observation. An absent period means the whole table.

use chrono::{Datelike, Days, NaiveDate, Weekday};

use crate::core::errors::ApiError;

pub const PERIOD_KEYWORDS: [&str; 6] = [
    "today",
    "yesterday",
    "last_week",
    "this_month",
    "last_month",
    "all",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Today,
    Yesterday,
    LastWeek,
    ThisMonth,
    LastMonth,
    All,
}

impl Period {
    pub fn parse(value: &str) -> Result<Self, ApiError> {
        match value.trim() {
            "today" => Ok(Period::Today),
            "yesterday" => Ok(Period::Yesterday),
            "last_week" => Ok(Period::LastWeek),
            "this_month" => Ok(Period::ThisMonth),
            "last_month" => Ok(Period::LastMonth),
            "all" => Ok(Period::All),
            other => Err(ApiError::BadRequest(format!(
                "期間 '{}' は使用できません。{} のいずれかを指定してください。",
                other,
                PERIOD_KEYWORDS.join(", ")
            ))),
        }
    }

    /// `None` and the empty string mean the whole table.
    pub fn parse_opt(value: Option<&str>) -> Result<Self, ApiError> {
        match value.map(str::trim) {
            None | Some("") => Ok(Period::All),
            Some(v) => Self::parse(v),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Today => "today",
            Period::Yesterday => "yesterday",
            Period::LastWeek => "last_week",
            Period::ThisMonth => "this_month",
            Period::LastMonth => "last_month",
            Period::All => "all",
        }
    }

    pub fn label_ja(&self) -> &'static str {
        match self {
            Period::Today => "今日",
            Period::Yesterday => "昨日",
            Period::LastWeek => "先週",
            Period::ThisMonth => "今月",
            Period::LastMonth => "先月",
            Period::All => "全期間",
        }
    }

    /// Inclusive date range relative to `today`; `None` means no filter.
    ///
    /// Weeks run Monday through Sunday; months are calendar months.
    pub fn date_range(&self, today: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
        match self {
            Period::All => None,
            Period::Today => Some((today, today)),
            Period::Yesterday => {
                let yesterday = today - Days::new(1);
                Some((yesterday, yesterday))
            }
            Period::LastWeek => {
                let this_monday = today.week(Weekday::Mon).first_day();
                let last_monday = this_monday - Days::new(7);
                let last_sunday = this_monday - Days::new(1);
                Some((last_monday, last_sunday))
            }
            Period::ThisMonth => Some(month_range(today.year(), today.month())),
            Period::LastMonth => {
                let (year, month) = if today.month() == 1 {
                    (today.year() - 1, 12)
                } else {
                    (today.year(), today.month() - 1)
                };
                Some(month_range(year, month))
            }
        }
    }
}

fn month_range(year: i32, month: u32) -> (NaiveDate, NaiveDate) {
    let first = NaiveDate::from_ymd_opt(year, month, 1).expect("valid first of month");
    let next_first = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .expect("valid first of next month");
    (first, next_first - Days::new(1))
}
