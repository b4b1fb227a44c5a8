//! Publication date normalization.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

const BENGALI_MONTHS: &[(&str, &str)] = &[
    ("জানুয়ারি", "January"),
    ("জানুয়ারী", "January"),
    ("ফেব্রুয়ারি", "February"),
    ("ফেব্রুয়ারী", "February"),
    ("মার্চ", "March"),
    ("এপ্রিল", "April"),
    ("মে", "May"),
    ("জুন", "June"),
    ("জুলাই", "July"),
    ("আগস্ট", "August"),
    ("আগষ্ট", "August"),
    ("সেপ্টেম্বর", "September"),
    ("অক্টোবর", "October"),
    ("নভেম্বর", "November"),
    ("ডিসেম্বর", "December"),
];

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y/%m/%d %H:%M"];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%B %d, %Y", "%d %B %Y", "%d %B, %Y", "%b %d, %Y", "%Y/%m/%d"];

/// Replace Bengali digits and month names with their ASCII/English forms.
pub fn transliterate(raw: &str) -> String {
    let mut s: String = raw
        .chars()
        .map(|c| match c as u32 {
            0x09E6..=0x09EF => char::from_digit(c as u32 - 0x09E6, 10).unwrap_or(c),
            _ => c,
        })
        .collect();
    // Longest names first so "মে" does not clobber a longer match.
    let mut months = BENGALI_MONTHS.to_vec();
    months.sort_by_key(|(bn, _)| std::cmp::Reverse(bn.len()));
    for (bn, en) in months {
        if s.contains(bn) {
            s = s.replace(bn, en);
        }
    }
    s
}

/// Parse a date in any of the formats news pages use.
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let s = transliterate(raw.trim());
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return date.and_hms_opt(0, 0, 0).map(|n| Utc.from_utc_datetime(&n));
        }
    }
    None
}

/// RFC 3339 form when parseable, otherwise the trimmed input.
pub fn normalize_date(raw: &str) -> String {
    parse_date(raw)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| raw.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_formats() {
        assert_eq!(
            normalize_date("2024-03-05T10:30:00+06:00"),
            "2024-03-05T04:30:00+00:00"
        );
        assert_eq!(normalize_date("2024-03-05 10:30:00"), "2024-03-05T10:30:00+00:00");
        assert_eq!(normalize_date("2024-03-05"), "2024-03-05T00:00:00+00:00");
        assert_eq!(normalize_date("March 5, 2024"), "2024-03-05T00:00:00+00:00");
        assert_eq!(normalize_date("5 March 2024"), "2024-03-05T00:00:00+00:00");
    }

    #[test]
    fn test_bengali_dates() {
        assert_eq!(transliterate("০৫ মার্চ ২০২৪"), "05 March 2024");
        assert_eq!(normalize_date("০৫ মার্চ ২০২৪"), "2024-03-05T00:00:00+00:00");
        assert_eq!(normalize_date("১২ মে ২০২৩"), "2023-05-12T00:00:00+00:00");
    }

    #[test]
    fn test_unparseable_kept() {
        assert_eq!(normalize_date("  yesterday "), "yesterday");
        assert!(parse_date("").is_none());
    }
}
