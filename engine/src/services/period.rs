//! Calendar-month reporting periods
//!
//! A period is one calendar month, keyed as zero-padded "MM-YYYY".

use crate::config::MONTH_NAMES_ES;
use crate::error::{AppError, Result};
use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReportingPeriod {
    pub first_day: NaiveDate,
    pub last_day: NaiveDate,
}

impl ReportingPeriod {
    /// The calendar month `date` falls in
    pub fn containing(date: NaiveDate) -> Self {
        let first_day = date.with_day(1).unwrap_or(date);
        let (next_year, next_month) = if first_day.month() == 12 {
            (first_day.year() + 1, 1)
        } else {
            (first_day.year(), first_day.month() + 1)
        };

        let last_day = NaiveDate::from_ymd_opt(next_year, next_month, 1)
            .and_then(|next| next.pred_opt())
            .unwrap_or(NaiveDate::MAX);

        Self {
            first_day,
            last_day,
        }
    }

    /// Parse a "MM-YYYY" key
    pub fn from_key(key: &str) -> Result<Self> {
        let invalid = || AppError::Validation(format!("Invalid period key {:?}, expected MM-YYYY", key));

        let (month, year) = key.trim().split_once('-').ok_or_else(invalid)?;
        if month.len() != 2 || year.len() != 4 {
            return Err(invalid());
        }

        let month: u32 = month.parse().map_err(|_| invalid())?;
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let first_day = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;

        Ok(Self::containing(first_day))
    }

    pub fn key(&self) -> String {
        format!("{:02}-{:04}", self.first_day.month(), self.first_day.year())
    }

    /// Spanish month label, e.g. "marzo de 2024"
    pub fn label_es(&self) -> String {
        let name = MONTH_NAMES_ES[self.first_day.month0() as usize];
        format!("{} de {}", name, self.first_day.year())
    }
}

impl fmt::Display for ReportingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}
