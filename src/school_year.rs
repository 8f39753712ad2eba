use chrono::{Datelike, NaiveDate};

/// Month (1-12) on which a new school year starts.
pub const SCHOOL_YEAR_START_MONTH: u32 = 9;

/// School year label (`"2026-2027"`) containing `date`.
pub fn school_year_for(date: NaiveDate) -> String {
    let start = if date.month() >= SCHOOL_YEAR_START_MONTH {
        date.year()
    } else {
        date.year() - 1
    };
    format!("{}-{}", start, start + 1)
}

pub fn current_school_year() -> String {
    school_year_for(chrono::Local::now().date_naive())
}

/// Accepts `YYYY-YYYY` where the second year follows the first.
pub fn parse_school_year(raw: &str) -> Option<(i32, i32)> {
    let t = raw.trim();
    let (a, b) = t.split_once('-')?;
    let four_digits = |s: &str| s.len() == 4 && s.bytes().all(|c| c.is_ascii_digit());
    if !four_digits(a) || !four_digits(b) {
        return None;
    }
    let start: i32 = a.parse().ok()?;
    let end: i32 = b.parse().ok()?;
    if end != start + 1 {
        return None;
    }
    Some((start, end))
}

pub fn parse_date_ymd(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn september_starts_a_new_year() {
        let d = NaiveDate::from_ymd_opt(2026, 9, 1).expect("date");
        assert_eq!(school_year_for(d), "2026-2027");
        let d = NaiveDate::from_ymd_opt(2026, 8, 31).expect("date");
        assert_eq!(school_year_for(d), "2025-2026");
    }

    #[test]
    fn school_year_must_be_consecutive() {
        assert_eq!(parse_school_year(" 2025-2026 "), Some((2025, 2026)));
        assert_eq!(parse_school_year("2025-2027"), None);
        assert_eq!(parse_school_year("25-26"), None);
        assert_eq!(parse_school_year("2025/2026"), None);
        assert_eq!(parse_school_year("+202-+203"), None);
        assert_eq!(parse_school_year("2025- 026"), None);
    }
}
