//! Date conversions between feed headings, the canonical ISO form, the
//! `MM/DD/YYYY` display form and the `Month D YYYY` phrase used in video searches.

use regex::Regex;
use std::sync::LazyLock;
use time::macros::format_description;
use time::{Date, Month, Time};
use tracing::warn;

static HEADING_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b((?:jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*)\.?\s+(\d{1,2}),\s+(\d{4})(?:\s+(\d{1,2}):(\d{2})\s*(am|pm))?",
    )
    .expect("heading date pattern is valid")
});

static SLASH_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,2})/(\d{1,2})/(\d{4})$").expect("slash date pattern is valid")
});

static WRITTEN_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z]+)\.?\s+(\d{1,2}),?\s+(\d{4})$").expect("written date pattern is valid")
});

/// Date (and optional start time) found in a feed heading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadingDate {
    pub date: Date,
    pub time: Option<Time>,
}

pub fn to_iso(date: Date) -> String {
    format!("{:04}-{:02}-{:02}", date.year(), u8::from(date.month()), date.day())
}

pub fn to_display(date: Date) -> String {
    format!("{:02}/{:02}/{:04}", u8::from(date.month()), date.day(), date.year())
}

/// `January 14 2025`: the phrasing council videos are usually titled with.
pub fn to_search_phrase(date: Date) -> String {
    format!("{} {} {}", date.month(), date.day(), date.year())
}

pub fn parse_iso(input: &str) -> Option<Date> {
    Date::parse(input.trim(), format_description!("[year]-[month]-[day]")).ok()
}

/// Accepts `2025-01-14`, `01/14/2025`, `1/14/2025`, `January 14, 2025` and `Jan 14 2025`.
pub fn parse_flexible(input: &str) -> Option<Date> {
    let input = input.trim();
    if let Some(date) = parse_iso(input) {
        return Some(date);
    }
    if let Some(caps) = SLASH_DATE.captures(input) {
        let month = caps[1].parse::<u8>().ok()?;
        let day = caps[2].parse::<u8>().ok()?;
        let year = caps[3].parse::<i32>().ok()?;
        return calendar_date(year, month, day);
    }
    if let Some(caps) = WRITTEN_DATE.captures(input) {
        let month = month_from_word(&caps[1])?;
        let day = caps[2].parse::<u8>().ok()?;
        let year = caps[3].parse::<i32>().ok()?;
        return Date::from_calendar_date(year, month, day).ok();
    }
    None
}

/// Best-effort ISO normalization; unparsable input comes back unchanged.
pub fn normalize_iso_lossy(input: &str) -> String {
    match parse_flexible(input) {
        Some(date) => to_iso(date),
        None => {
            warn!(target: "civic_core::dates", input, "date not recognised, leaving as is");
            input.to_string()
        }
    }
}

/// Best-effort search phrase; unparsable input comes back unchanged.
pub fn search_phrase_lossy(input: &str) -> String {
    match parse_flexible(input) {
        Some(date) => to_search_phrase(date),
        None => {
            warn!(target: "civic_core::dates", input, "date not recognised, searching with raw text");
            input.to_string()
        }
    }
}

/// Finds the first `Mon DD, YYYY [H:MM AM|PM]` token in a feed heading.
pub fn extract_heading_date(heading: &str) -> Option<HeadingDate> {
    HEADING_DATE
        .captures_iter(heading)
        .find_map(|caps| heading_date_from(&caps))
}

fn heading_date_from(caps: &regex::Captures<'_>) -> Option<HeadingDate> {
    let month = month_from_word(&caps[1])?;
    let day = caps[2].parse::<u8>().ok()?;
    let year = caps[3].parse::<i32>().ok()?;
    let date = Date::from_calendar_date(year, month, day).ok()?;

    let time = match (caps.get(4), caps.get(5), caps.get(6)) {
        (Some(hour), Some(minute), Some(meridiem)) => clock_time(
            hour.as_str(),
            minute.as_str(),
            meridiem.as_str().eq_ignore_ascii_case("pm"),
        ),
        _ => None,
    };

    Some(HeadingDate { date, time })
}

fn clock_time(hour: &str, minute: &str, pm: bool) -> Option<Time> {
    let hour = hour.parse::<u8>().ok()?;
    let minute = minute.parse::<u8>().ok()?;
    if !(1..=12).contains(&hour) {
        return None;
    }
    let hour24 = match (hour, pm) {
        (12, false) => 0,
        (12, true) => 12,
        (h, true) => h + 12,
        (h, false) => h,
    };
    Time::from_hms(hour24, minute, 0).ok()
}

fn calendar_date(year: i32, month: u8, day: u8) -> Option<Date> {
    let month = Month::try_from(month).ok()?;
    Date::from_calendar_date(year, month, day).ok()
}

const MONTHS: [(Month, &str); 12] = [
    (Month::January, "january"),
    (Month::February, "february"),
    (Month::March, "march"),
    (Month::April, "april"),
    (Month::May, "may"),
    (Month::June, "june"),
    (Month::July, "july"),
    (Month::August, "august"),
    (Month::September, "september"),
    (Month::October, "october"),
    (Month::November, "november"),
    (Month::December, "december"),
];

/// Full month name or its three-letter abbreviation ("Sept" too), any case.
fn month_from_word(word: &str) -> Option<Month> {
    let lowered = word.to_ascii_lowercase();
    if lowered == "sept" {
        return Some(Month::September);
    }
    MONTHS
        .iter()
        .find(|(_, name)| lowered == *name || (lowered.len() == 3 && name.starts_with(&lowered)))
        .map(|(month, _)| *month)
}

/// Serde adapter storing a [`Date`] as `YYYY-MM-DD`.
pub mod iso_date {
    use serde::{Deserialize, Deserializer, Serializer, de};
    use time::Date;

    pub fn serialize<S: Serializer>(date: &Date, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::to_iso(*date))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Date, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_iso(&raw).ok_or_else(|| de::Error::custom(format!("invalid ISO date '{raw}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, time};

    #[test]
    fn formats_all_three_forms() {
        let d = date!(2025 - 01 - 07);
        assert_eq!(to_iso(d), "2025-01-07");
        assert_eq!(to_display(d), "01/07/2025");
        assert_eq!(to_search_phrase(d), "January 7 2025");
    }

    #[test]
    fn parses_historical_input_formats() {
        let expected = Some(date!(2025 - 02 - 10));
        assert_eq!(parse_flexible("2025-02-10"), expected);
        assert_eq!(parse_flexible("02/10/2026").map(|d| d.year()), Some(2026));
        assert_eq!(parse_flexible("2/10/2025"), expected);
        assert_eq!(parse_flexible("February 10, 2025"), expected);
        assert_eq!(parse_flexible("Feb 10 2025"), expected);
        assert_eq!(parse_flexible(" feb. 10, 2025 "), expected);
    }

    #[test]
    fn rejects_impossible_dates() {
        assert_eq!(parse_flexible("02/30/2025"), None);
        assert_eq!(parse_flexible("13/01/2025"), None);
        assert_eq!(parse_flexible("Smarch 3, 2025"), None);
    }

    #[test]
    fn lossy_helpers_return_input_unchanged_on_failure() {
        assert_eq!(normalize_iso_lossy("next tuesday"), "next tuesday");
        assert_eq!(search_phrase_lossy("soon"), "soon");
        assert_eq!(normalize_iso_lossy("01/14/2025"), "2025-01-14");
        assert_eq!(search_phrase_lossy("2025-01-14"), "January 14 2025");
    }

    #[test]
    fn heading_date_with_time() {
        let found =
            extract_heading_date("City Council - Regular Meeting - Agenda - Jan 14, 2025 7:00 PM")
                .unwrap();
        assert_eq!(found.date, date!(2025 - 01 - 14));
        assert_eq!(found.time, Some(time!(19:00)));
    }

    #[test]
    fn heading_date_full_month_without_time() {
        let found = extract_heading_date("City Council - Minutes - September 9, 2025").unwrap();
        assert_eq!(found.date, date!(2025 - 09 - 09));
        assert_eq!(found.time, None);
    }

    #[test]
    fn heading_noon_and_midnight() {
        let noon = extract_heading_date("Council Dec 1, 2025 12:30 PM").unwrap();
        assert_eq!(noon.time, Some(time!(12:30)));
        let midnight = extract_heading_date("Council Dec 1, 2025 12:05 am").unwrap();
        assert_eq!(midnight.time, Some(time!(0:05)));
    }

    #[test]
    fn heading_without_date_token() {
        assert_eq!(extract_heading_date("City Council - Agenda - TBD"), None);
        assert_eq!(extract_heading_date("City Council - Janitorial 4, 2025"), None);
    }

    #[test]
    fn heading_skips_false_month_words() {
        let found = extract_heading_date("Marching 4, 2025 - City Council - Mar 4, 2025").unwrap();
        assert_eq!(found.date, date!(2025 - 03 - 04));
    }

    #[test]
    fn serde_adapter_round_trips() {
        #[derive(serde::Serialize, serde::Deserialize)]
        struct Holder {
            #[serde(with = "super::iso_date")]
            day: Date,
        }
        let json = serde_json::to_string(&Holder { day: date!(2024 - 12 - 31) }).unwrap();
        assert_eq!(json, r#"{"day":"2024-12-31"}"#);
        assert!(serde_json::from_str::<Holder>(r#"{"day":"12/31/2024"}"#).is_err());
    }
}
