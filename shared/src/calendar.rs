//! Day-range parsing and calendar grid math for gig dates and event schedules.
//!
//! Months are addressed by `(year, month_index)` with a zero-based month index
//! (January = 0), matching what the calendar widgets consume. Weeks start on
//! Monday.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Cells in a full calendar page (six weeks).
pub const GRID_CELLS: usize = 42;

const MONTH_NAMES: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

/// Parse `"1-5, 10, 15-20"` into sorted, de-duplicated day numbers.
///
/// Items that are not a day in `1..=31` or a forward range of such days are
/// ignored.
pub fn parse_day_ranges(text: &str) -> Vec<u32> {
    let mut days = BTreeSet::new();

    for item in text.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match item.split_once('-') {
            Some((start, end)) => {
                if let (Some(start), Some(end)) = (parse_day(start), parse_day(end)) {
                    if start <= end {
                        days.extend(start..=end);
                    }
                }
            }
            None => {
                if let Some(day) = parse_day(item) {
                    days.insert(day);
                }
            }
        }
    }

    days.into_iter().collect()
}

fn parse_day(s: &str) -> Option<u32> {
    s.trim().parse().ok().filter(|d| (1..=31).contains(d))
}

/// Compact sorted days back into range notation: `[1, 2, 3, 10]` → `"1-3, 10"`.
pub fn format_day_ranges(days: &[u32]) -> String {
    let mut sorted: Vec<u32> = days.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut parts = Vec::new();
    let mut iter = sorted.into_iter().peekable();
    while let Some(start) = iter.next() {
        let mut end = start;
        while iter.peek() == Some(&(end + 1)) {
            end += 1;
            iter.next();
        }
        if start == end {
            parts.push(start.to_string());
        } else {
            parts.push(format!("{}-{}", start, end));
        }
    }

    parts.join(", ")
}

/// Parse a label such as `"Sep 2025"` or `"September 2025"` into
/// `(year, month_index)`.
pub fn parse_month_label(label: &str) -> Option<(i32, u32)> {
    let mut parts = label.split_whitespace();
    let name = parts.next()?.trim_end_matches('.').to_lowercase();
    let year: i32 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || name.len() < 3 {
        return None;
    }

    let index = MONTH_NAMES
        .iter()
        .position(|full| *full == name || (full.starts_with(&name) && name.len() <= 4))?;

    Some((year, index as u32))
}

/// Label for `(year, month_index)`, e.g. `"Sep 2025"`.
pub fn month_label(year: i32, month_index: u32) -> Option<String> {
    let name = MONTH_NAMES.get(month_index as usize)?;
    let mut short: String = name[..3].to_string();
    short[..1].make_ascii_uppercase();
    Some(format!("{} {}", short, year))
}

/// Number of days in the month, or `None` for an invalid month.
pub fn days_in_month(year: i32, month_index: u32) -> Option<u32> {
    if month_index > 11 {
        return None;
    }
    let first = NaiveDate::from_ymd_opt(year, month_index + 1, 1)?;
    let next = if month_index == 11 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month_index + 2, 1)?
    };
    Some(next.signed_duration_since(first).num_days() as u32)
}

/// Blank cells before day 1 in a Monday-first week.
fn leading_blanks(year: i32, month_index: u32) -> Option<u32> {
    if month_index > 11 {
        return None;
    }
    let first = NaiveDate::from_ymd_opt(year, month_index + 1, 1)?;
    Some(first.weekday().num_days_from_monday())
}

/// Stored gig date entry: a month label and a range string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthDays {
    pub month: String,
    pub days: String,
}

/// A month with the days to highlight in the calendar widget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarMonth {
    pub month: u32,
    pub year: i32,
    pub highlighted_days: Vec<u32>,
}

/// Group entries by month, merging repeated months.
///
/// Months keep the order in which they first appear. Unparseable labels are
/// skipped, as are days past the end of their month.
pub fn transform_calendar_months(entries: &[MonthDays]) -> Vec<CalendarMonth> {
    let mut order: Vec<(i32, u32)> = Vec::new();
    let mut days_by_month: HashMap<(i32, u32), BTreeSet<u32>> = HashMap::new();

    for entry in entries {
        let Some(key) = parse_month_label(&entry.month) else {
            continue;
        };
        let days = days_by_month.entry(key).or_insert_with(|| {
            order.push(key);
            BTreeSet::new()
        });
        days.extend(parse_day_ranges(&entry.days));
    }

    order
        .into_iter()
        .map(|(year, month)| {
            let last = days_in_month(year, month).unwrap_or(31);
            let highlighted_days = days_by_month
                .remove(&(year, month))
                .unwrap_or_default()
                .into_iter()
                .filter(|d| *d <= last)
                .collect();
            CalendarMonth {
                month,
                year,
                highlighted_days,
            }
        })
        .collect()
}

/// Which month a grid cell belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CellKind {
    Prev,
    Current,
    Next,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CalendarCell {
    pub day: u32,
    #[serde(rename = "type")]
    pub kind: CellKind,
}

/// Full six-week page for the month, padded with neighbouring months.
pub fn build_calendar_cells(year: i32, month_index: u32) -> Option<Vec<CalendarCell>> {
    let shift = leading_blanks(year, month_index)?;
    let total = days_in_month(year, month_index)?;
    let prev_total = if month_index == 0 {
        days_in_month(year - 1, 11)?
    } else {
        days_in_month(year, month_index - 1)?
    };

    let cells = (0..GRID_CELLS as u32)
        .map(|index| {
            // day number relative to the 1st; zero or below is the previous month
            let offset = index as i64 - shift as i64 + 1;
            if offset < 1 {
                CalendarCell {
                    day: (prev_total as i64 + offset) as u32,
                    kind: CellKind::Prev,
                }
            } else if offset as u32 > total {
                CalendarCell {
                    day: offset as u32 - total,
                    kind: CellKind::Next,
                }
            } else {
                CalendarCell {
                    day: offset as u32,
                    kind: CellKind::Current,
                }
            }
        })
        .collect();

    Some(cells)
}

/// Compact grid: leading blanks then each day of the month.
pub fn month_grid(year: i32, month_index: u32) -> Option<Vec<Option<u32>>> {
    let blanks = leading_blanks(year, month_index)? as usize;
    let total = days_in_month(year, month_index)?;

    let mut grid = vec![None; blanks];
    grid.extend((1..=total).map(Some));
    Some(grid)
}

/// How a day renders given the selected ranges and single days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Highlight {
    None,
    Single,
    Range { starts: bool, ends: bool },
}

/// Singles win over ranges; range ends are where the run breaks.
pub fn highlight(day: u32, ranges: &BTreeSet<u32>, singles: &BTreeSet<u32>) -> Highlight {
    if singles.contains(&day) {
        return Highlight::Single;
    }
    if !ranges.contains(&day) {
        return Highlight::None;
    }
    Highlight::Range {
        starts: day == 0 || !ranges.contains(&(day - 1)),
        ends: !ranges.contains(&(day + 1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(month: &str, days: &str) -> MonthDays {
        MonthDays {
            month: month.to_string(),
            days: days.to_string(),
        }
    }

    #[test]
    fn test_parse_ranges_and_singles() {
        assert_eq!(
            parse_day_ranges("1-5, 10, 15-20"),
            vec![1, 2, 3, 4, 5, 10, 15, 16, 17, 18, 19, 20]
        );
    }

    #[test]
    fn test_parse_sorts_and_dedups() {
        assert_eq!(parse_day_ranges("20, 3-5, 4, 1"), vec![1, 3, 4, 5, 20]);
        assert_eq!(parse_day_ranges(" 7 - 9 ,8"), vec![7, 8, 9]);
    }

    #[test]
    fn test_parse_invalid_contributes_nothing() {
        assert!(parse_day_ranges("").is_empty());
        assert!(parse_day_ranges(" , ,").is_empty());
        assert!(parse_day_ranges("abc").is_empty());
        assert!(parse_day_ranges("9-3").is_empty());
        assert!(parse_day_ranges("0, 32, 40-45").is_empty());
        assert_eq!(parse_day_ranges("x, 2, 5-y, 1-2-3, 12"), vec![2, 12]);
    }

    #[test]
    fn test_format_ranges() {
        assert_eq!(format_day_ranges(&[1, 2, 3, 10]), "1-3, 10");
        assert_eq!(format_day_ranges(&[15, 14, 14, 1]), "1, 14-15");
        assert_eq!(format_day_ranges(&[]), "");
        assert_eq!(
            format_day_ranges(&parse_day_ranges("1-5, 10, 15-20")),
            "1-5, 10, 15-20"
        );
    }

    #[test]
    fn test_month_labels() {
        assert_eq!(parse_month_label("Sep 2025"), Some((2025, 8)));
        assert_eq!(parse_month_label("sept 2025"), Some((2025, 8)));
        assert_eq!(parse_month_label("January 2026"), Some((2026, 0)));
        assert_eq!(parse_month_label("Dec. 2024"), Some((2024, 11)));
        assert_eq!(parse_month_label("Ju 2025"), None);
        assert_eq!(parse_month_label("Sep"), None);
        assert_eq!(parse_month_label("Foo 2025"), None);
        assert_eq!(month_label(2025, 8).as_deref(), Some("Sep 2025"));
        assert_eq!(month_label(2025, 12), None);
    }

    #[test]
    fn test_days_in_month() {
        assert_eq!(days_in_month(2025, 8), Some(30));
        assert_eq!(days_in_month(2024, 1), Some(29));
        assert_eq!(days_in_month(2025, 1), Some(28));
        assert_eq!(days_in_month(2025, 11), Some(31));
        assert_eq!(days_in_month(2025, 12), None);
    }

    #[test]
    fn test_transform_merges_same_month() {
        let months = transform_calendar_months(&[
            entry("Sep 2025", "10-12"),
            entry("Oct 2025", "1"),
            entry("Sep 2025", "1-2, 11"),
        ]);

        assert_eq!(
            months,
            vec![
                CalendarMonth {
                    month: 8,
                    year: 2025,
                    highlighted_days: vec![1, 2, 10, 11, 12],
                },
                CalendarMonth {
                    month: 9,
                    year: 2025,
                    highlighted_days: vec![1],
                },
            ]
        );
    }

    #[test]
    fn test_transform_skips_bad_entries() {
        let months = transform_calendar_months(&[
            entry("Smarch 2025", "1-3"),
            entry("Sep 2025", "not days"),
            entry("Sep 2025", "29-31"),
        ]);

        assert_eq!(months.len(), 1);
        assert_eq!(months[0].highlighted_days, vec![29, 30]);
    }

    #[test]
    fn test_calendar_month_json() {
        let json = serde_json::to_value(CalendarMonth {
            month: 8,
            year: 2025,
            highlighted_days: vec![1],
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "month": 8, "year": 2025, "highlightedDays": [1] })
        );
    }

    #[test]
    fn test_cells_month_starting_monday() {
        // 1 September 2025 is a Monday
        let cells = build_calendar_cells(2025, 8).unwrap();
        assert_eq!(cells.len(), GRID_CELLS);
        assert_eq!(cells[0], CalendarCell { day: 1, kind: CellKind::Current });
        assert_eq!(cells[29], CalendarCell { day: 30, kind: CellKind::Current });
        assert_eq!(cells[30], CalendarCell { day: 1, kind: CellKind::Next });
        assert_eq!(cells[41], CalendarCell { day: 12, kind: CellKind::Next });
    }

    #[test]
    fn test_cells_pad_previous_month() {
        // 1 October 2025 is a Wednesday
        let cells = build_calendar_cells(2025, 9).unwrap();
        assert_eq!(cells[0], CalendarCell { day: 29, kind: CellKind::Prev });
        assert_eq!(cells[1], CalendarCell { day: 30, kind: CellKind::Prev });
        assert_eq!(cells[2], CalendarCell { day: 1, kind: CellKind::Current });
        let current = cells.iter().filter(|c| c.kind == CellKind::Current).count();
        assert_eq!(current, 31);
    }

    #[test]
    fn test_cells_january_pads_from_december() {
        // 1 January 2026 is a Thursday
        let cells = build_calendar_cells(2026, 0).unwrap();
        assert_eq!(cells[0], CalendarCell { day: 29, kind: CellKind::Prev });
        assert_eq!(cells[3], CalendarCell { day: 1, kind: CellKind::Current });
    }

    #[test]
    fn test_cells_invalid_month() {
        assert!(build_calendar_cells(2025, 12).is_none());
    }

    #[test]
    fn test_out_of_range_month_index() {
        assert!(build_calendar_cells(2025, u32::MAX).is_none());
        assert!(days_in_month(2025, u32::MAX).is_none());
        assert!(month_grid(2025, u32::MAX).is_none());
        assert!(month_label(2025, u32::MAX).is_none());
    }

    #[test]
    fn test_month_grid() {
        let grid = month_grid(2025, 9).unwrap();
        assert_eq!(&grid[..3], &[None, None, Some(1)]);
        assert_eq!(grid.len(), 2 + 31);
        assert_eq!(grid.last(), Some(&Some(31)));
    }

    #[test]
    fn test_highlight() {
        let ranges: BTreeSet<u32> = [4, 5, 6].into_iter().collect();
        let singles: BTreeSet<u32> = [5, 12].into_iter().collect();

        assert_eq!(highlight(1, &ranges, &singles), Highlight::None);
        assert_eq!(highlight(12, &ranges, &singles), Highlight::Single);
        assert_eq!(highlight(5, &ranges, &singles), Highlight::Single);
        assert_eq!(
            highlight(4, &ranges, &singles),
            Highlight::Range { starts: true, ends: false }
        );
        assert_eq!(
            highlight(6, &ranges, &singles),
            Highlight::Range { starts: false, ends: true }
        );
    }
}
