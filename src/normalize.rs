//! Cell-level normalization for labels and measurement values.
//!
//! Every function here is total: any input string produces a value, never a
//! panic or an error. Labels end up ASCII-only, numbers end up finite.
//!
//! Vendor exports carry three kinds of noise this module absorbs:
//!
//! - placeholder text (`nan`, `#N/A`, `¿¿¿???` template markers),
//! - symbols the SPC store cannot index reliably (`Δ`, `°`, `±`, `Ø`),
//! - European decimals (`1.234,56`) mixed with Anglo ones (`1,234.56`).

use std::{str::FromStr, sync::LazyLock};

use regex::Regex;
use rust_decimal::Decimal;
use unicode_normalization::UnicodeNormalization;

/// Sentinel stored for labels that carry no usable content.
pub const NULL_LABEL: &str = "NULL";
/// Default substituted for unparsable numeric cells unless the caller says otherwise.
pub const DEFAULT_NUMERIC: f64 = 0.0;
/// Magnitudes at or above this are treated as corrupt (fits `numeric(15,6)`).
pub const MAX_ABS_VALUE: f64 = 1e9;

const INVALID_TOKENS: &[&str] = &[
    "", "nan", "none", "null", "#n/a", "n/a", "#error", "error", "unknown",
];

static SCIENTIFIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^-?\d+(?:\.\d+)?[eE][+-]?\d{1,3}$").expect("scientific pattern is valid")
});

const TEMPLATE_MARKERS: &[&str] = &["¿¿¿???", "¿¿¿", "???"];

const UNIT_NOISE: &[char] = &['°', '±', 'µ', 'μ'];

const SYMBOL_TABLE: &[(char, &str)] = &[
    ('Δ', "Delta"),
    ('δ', "delta"),
    ('α', "alpha"),
    ('β', "beta"),
    ('γ', "gamma"),
    ('Γ', "Gamma"),
    ('ε', "epsilon"),
    ('θ', "theta"),
    ('λ', "lambda"),
    ('μ', "mu"),
    ('µ', "mu"),
    ('π', "pi"),
    ('σ', "sigma"),
    ('Σ', "Sigma"),
    ('φ', "phi"),
    ('Φ', "Phi"),
    ('ω', "omega"),
    ('Ω', "Omega"),
    ('°', "deg"),
    ('º', "deg"),
    ('±', "+/-"),
    ('≤', "<="),
    ('≥', ">="),
    ('≠', "!="),
    ('≈', "~"),
    ('×', "x"),
    ('÷', "/"),
    ('–', "-"),
    ('—', "-"),
    ('\u{201C}', "\""),
    ('\u{201D}', "\""),
    ('\u{2018}', "'"),
    ('\u{2019}', "'"),
    ('…', "..."),
    ('€', "EUR"),
    ('£', "GBP"),
    ('Ø', "O"),
    ('ø', "o"),
    ('⌀', "O"),
    ('Æ', "AE"),
    ('æ', "ae"),
    ('ß', "ss"),
    ('²', "2"),
    ('³', "3"),
    ('¡', "!"),
    ('¿', "?"),
];

/// Folds text to printable ASCII: symbol table first, then NFKD with every
/// remaining non-ASCII or control character dropped.
pub fn fold_ascii(raw: &str) -> String {
    let mut substituted = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match SYMBOL_TABLE.iter().find(|(symbol, _)| *symbol == ch) {
            Some((_, replacement)) => substituted.push_str(replacement),
            None => substituted.push(ch),
        }
    }
    substituted
        .nfkd()
        .filter(|c| c.is_ascii() && !c.is_ascii_control())
        .collect::<String>()
        .trim()
        .to_string()
}

pub fn is_invalid_token(value: &str) -> bool {
    let lowered = value.trim().to_ascii_lowercase();
    INVALID_TOKENS.contains(&lowered.as_str())
}

pub fn has_template_marker(value: &str) -> bool {
    TEMPLATE_MARKERS.iter().any(|marker| value.contains(marker))
}

/// Removes template markers. Returns `None` when nothing but markers remains.
fn strip_template_markers(value: &str) -> Option<String> {
    let mut cleaned = value.to_string();
    for marker in TEMPLATE_MARKERS {
        cleaned = cleaned.replace(marker, "");
    }
    let cleaned = cleaned.trim();
    if cleaned.chars().all(|c| matches!(c, '¿' | '?')) {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// Free text for non-key columns and key parts; `None` means "store NULL".
pub fn normalize_text(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if is_invalid_token(trimmed) {
        return None;
    }
    let content = if has_template_marker(trimmed) {
        strip_template_markers(trimmed)?
    } else {
        trimmed.to_string()
    };
    let folded = fold_ascii(&content);
    if folded.is_empty() || is_invalid_token(&folded) {
        None
    } else {
        Some(folded)
    }
}

/// Element/property labels. Empty and placeholder labels become [`NULL_LABEL`].
pub fn normalize_label(raw: &str) -> String {
    normalize_text(raw).unwrap_or_else(|| NULL_LABEL.to_string())
}

/// Parses a measurement cell. `None` for placeholders, garbage and values
/// outside the finite range.
pub fn parse_measurement(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if is_invalid_token(trimmed) || has_template_marker(trimmed) {
        return None;
    }
    let canonical = canonical_decimal(trimmed)?;
    let decimal = match Decimal::from_str(&canonical) {
        Ok(decimal) => decimal,
        Err(_) if SCIENTIFIC.is_match(&canonical) => Decimal::from_scientific(&canonical).ok()?,
        Err(_) => return None,
    };
    // Decimal text round-trips through the correctly rounded f64 parser.
    let value = decimal.to_string().parse::<f64>().ok()?;
    if value.is_finite() && value.abs() < MAX_ABS_VALUE {
        Some(value)
    } else {
        None
    }
}

/// Keeps at most `max_chars` characters of `text`.
pub fn truncate_chars(text: String, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text,
    }
}

/// Parses a measurement cell, substituting `default` on any failure.
pub fn normalize_numeric(raw: &str, default: f64) -> f64 {
    parse_measurement(raw).unwrap_or(default)
}

/// Rewrites a locale-formatted number into `[-]digits[.digits]` form.
///
/// A lone comma is a decimal comma. With both separators present the rightmost
/// one is the decimal point and the other must group digits by three.
fn canonical_decimal(value: &str) -> Option<String> {
    let mut compact: String = value
        .replace("+/-", "")
        .chars()
        .filter(|c| !c.is_whitespace() && !UNIT_NOISE.contains(c))
        .collect();
    if compact.is_empty() {
        return None;
    }
    if let Some(rest) = compact.strip_prefix('+') {
        compact = rest.to_string();
    }

    let last_comma = compact.rfind(',');
    let last_dot = compact.rfind('.');
    let commas = compact.matches(',').count();
    let dots = compact.matches('.').count();

    match (last_comma, last_dot) {
        (None, None) => Some(compact),
        (Some(_), None) if commas == 1 => Some(compact.replacen(',', ".", 1)),
        (Some(_), None) => strip_grouping(&compact, ','),
        (None, Some(_)) if dots == 1 => Some(compact),
        (None, Some(_)) => strip_grouping(&compact, '.'),
        (Some(comma), Some(dot)) => {
            let (decimal_sep, group_sep, split_at) = if comma > dot {
                (',', '.', comma)
            } else {
                ('.', ',', dot)
            };
            let (integer, fraction) = compact.split_at(split_at);
            let fraction = &fraction[decimal_sep.len_utf8()..];
            if fraction.contains([',', '.']) {
                return None;
            }
            let integer = strip_grouping(integer, group_sep)?;
            Some(format!("{integer}.{fraction}"))
        }
    }
}

/// Removes thousands separators, insisting on groups of exactly three digits.
fn strip_grouping(value: &str, separator: char) -> Option<String> {
    let mut groups = value.split(separator);
    let head = groups.next()?;
    let digits_in_head = head.trim_start_matches('-');
    if digits_in_head.is_empty() || digits_in_head.len() > 3 {
        return None;
    }
    let mut joined = head.to_string();
    for group in groups {
        if group.len() != 3 || !group.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        joined.push_str(group);
    }
    Some(joined)
}
