//! Recall date parsing

use chrono::NaiveDate;

/// Separated layouts, tried after the compact `YYYYMMDD` source form.
const SEPARATED_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];

/// Parse a source date; anything unrecognized yields `None`.
///
/// A trailing time part (`2024-01-15T00:00:00`, `2024-01-15 08:30`) is
/// ignored.
pub fn parse_recall_date(raw: &str) -> Option<NaiveDate> {
    let date_part = raw.trim().split(['T', ' ']).next()?;

    // chrono accepts single-digit month and day fields, so the compact form
    // is only tried on exactly eight digits
    if date_part.len() == 8 && date_part.bytes().all(|b| b.is_ascii_digit()) {
        return NaiveDate::parse_from_str(date_part, "%Y%m%d").ok();
    }

    SEPARATED_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(date_part, format).ok())
}
