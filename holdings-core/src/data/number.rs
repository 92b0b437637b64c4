//! Lenient numeric parsing for upstream holdings cells.
//!
//! Accepts the formats the feeds actually publish: thousands separators,
//! currency and percent signs, accounting-style negatives `(1,234.50)` and
//! magnitude suffixes (`1.2M`).

/// Parse a cell into a finite number. Returns `None` for blanks and garbage.
pub fn parse_number(text: &str) -> Option<f64> {
    let mut cleaned: String = text
        .trim()
        .chars()
        .filter(|c| !matches!(c, ',' | '$' | '%' | ' '))
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    if cleaned.starts_with('(') && cleaned.ends_with(')') && cleaned.len() > 2 {
        cleaned = format!("-{}", &cleaned[1..cleaned.len() - 1]);
    }

    let multiplier = match cleaned.chars().last().map(|c| c.to_ascii_lowercase()) {
        Some('k') => 1_000.0,
        Some('m') => 1_000_000.0,
        Some('b') => 1_000_000_000.0,
        Some('t') => 1_000_000_000_000.0,
        _ => 1.0,
    };
    if multiplier != 1.0 {
        cleaned.pop();
    }

    let value = cleaned.parse::<f64>().ok()? * multiplier;
    value.is_finite().then_some(value)
}
