//! Crew availability statuses and conflict rules.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// A crew member's status for one calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AvailabilityStatus {
    Available,
    Hold,
    Na,
}

impl AvailabilityStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AvailabilityStatus::Available => "available",
            AvailabilityStatus::Hold => "hold",
            AvailabilityStatus::Na => "na",
        }
    }

    /// Booking this day would clash with the crew member's calendar.
    pub fn conflicts(self) -> bool {
        !matches!(self, AvailabilityStatus::Available)
    }
}

impl FromStr for AvailabilityStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "available" => Ok(AvailabilityStatus::Available),
            "hold" => Ok(AvailabilityStatus::Hold),
            "na" | "n/a" => Ok(AvailabilityStatus::Na),
            other => Err(Error::Validation(format!(
                "Invalid availability status '{}'. Must be one of: available, hold, na",
                other
            ))),
        }
    }
}

impl fmt::Display for AvailabilityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse a `YYYY-MM-DD` date.
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| Error::Validation(format!("Invalid date '{}', expected YYYY-MM-DD", s)))
}

/// Conflict report for a single day; no entry means the day is free.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictCheck {
    pub date: NaiveDate,
    pub has_conflict: bool,
    pub status: Option<AvailabilityStatus>,
}

impl ConflictCheck {
    pub fn new(date: NaiveDate, status: Option<AvailabilityStatus>) -> Self {
        Self {
            date,
            has_conflict: status.is_some_and(AvailabilityStatus::conflicts),
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status() {
        assert_eq!("available".parse::<AvailabilityStatus>().unwrap(), AvailabilityStatus::Available);
        assert_eq!(" HOLD ".parse::<AvailabilityStatus>().unwrap(), AvailabilityStatus::Hold);
        assert_eq!("NA".parse::<AvailabilityStatus>().unwrap(), AvailabilityStatus::Na);
        assert!(matches!(
            "busy".parse::<AvailabilityStatus>(),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_conflicts() {
        let date = parse_date("2025-09-14").unwrap();
        assert!(!ConflictCheck::new(date, None).has_conflict);
        assert!(!ConflictCheck::new(date, Some(AvailabilityStatus::Available)).has_conflict);
        assert!(ConflictCheck::new(date, Some(AvailabilityStatus::Hold)).has_conflict);
        assert!(ConflictCheck::new(date, Some(AvailabilityStatus::Na)).has_conflict);
    }

    #[test]
    fn test_conflict_json() {
        let date = parse_date("2025-09-14").unwrap();
        let json = serde_json::to_value(ConflictCheck::new(date, Some(AvailabilityStatus::Hold))).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "date": "2025-09-14", "hasConflict": true, "status": "hold" })
        );
    }

    #[test]
    fn test_parse_date() {
        assert!(parse_date("2025-02-30").is_err());
        assert!(parse_date("14/09/2025").is_err());
    }
}
