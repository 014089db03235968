use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static BOILERPLATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s*(\(read more\)|read more|learn more)\s*$").unwrap());
static DATE_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(announced|awarded|posted|issued|approved)\s+").unwrap());
static MONTH_YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z]{3,9})\.?\s+(\d{4})$").unwrap());
static YEAR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{4}$").unwrap());
static RANGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d\s*(?:-|–|—|to\s)\s*[$€£]?\d").unwrap());

/// Full-date formats tried in priority order. Chrono's `%B` accepts both full
/// and abbreviated month names when parsing, so "Mar 3, 2023" and
/// "March 3, 2023" both land on the second entry.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%B %d, %Y", "%d %B %Y", "%m/%d/%Y"];

/// Parse a textual announcement date into a calendar date.
///
/// Formats are tried in a fixed priority order; the first match wins. Strings
/// like "Announced Jan 2023" resolve to the first of the month, and a bare
/// year resolves to January 1st. Returns the warning message on no match.
pub fn normalize_date(raw: &str) -> Result<NaiveDate, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("empty date".to_string());
    }

    let stripped = DATE_PREFIX_RE.replace(trimmed, "");
    let stripped = stripped.trim();

    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(stripped, fmt) {
            return Ok(date);
        }
    }

    // Month-year ("Jan 2023", "January 2023") -> first of month
    if let Some(caps) = MONTH_YEAR_RE.captures(stripped) {
        let rewritten = format!("{} 1, {}", &caps[1], &caps[2]);
        if let Ok(date) = NaiveDate::parse_from_str(&rewritten, "%B %d, %Y") {
            return Ok(date);
        }
    }

    // Bare year -> January 1st
    if YEAR_RE.is_match(stripped) {
        if let Some(date) = stripped
            .parse::<i32>()
            .ok()
            .and_then(|y| NaiveDate::from_ymd_opt(y, 1, 1))
        {
            return Ok(date);
        }
    }

    Err(format!("unrecognized date format: {:?}", trimmed))
}

/// Parse a currency string ("$50,000", "1250000.50") into a plain decimal.
///
/// Ranges and non-numeric qualifiers are rejected rather than guessed at.
pub fn normalize_amount(raw: &str) -> Result<f64, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("empty amount".to_string());
    }

    let lower = trimmed.to_lowercase();
    for qualifier in ["approx", "tbd", "up to", "about", "estimated", "~"] {
        if lower.contains(qualifier) {
            return Err(format!("amount carries qualifier {:?}", qualifier));
        }
    }
    if RANGE_RE.is_match(trimmed) {
        return Err(format!("amount is a range: {:?}", trimmed));
    }

    let cleaned: String = trimmed
        .chars()
        .filter(|c| !matches!(c, '$' | '€' | '£' | ',') && !c.is_whitespace())
        .collect();

    match cleaned.parse::<f64>() {
        Ok(value) if value >= 0.0 => Ok(value),
        Ok(_) => Err(format!("negative amount: {:?}", trimmed)),
        Err(_) => Err(format!("unparseable amount: {:?}", trimmed)),
    }
}

/// Collapse whitespace and strip trailing boilerplate markers, preserving the
/// original casing.
pub fn clean_text(raw: &str) -> String {
    let collapsed = WS_RE.replace_all(raw.trim(), " ");
    let stripped = BOILERPLATE_RE.replace(&collapsed, "");
    stripped
        .trim_end_matches('…')
        .trim_end_matches("...")
        .trim()
        .to_string()
}
