//! Lot and timestamp extraction from GOMPC export filenames.
//!
//! Stations name their exports `<LOT and free text>_YYYY_MM_DD_HH_MM_SS.csv`,
//! but older firmware and hand-renamed files drop the year or shorten it to two
//! digits. [`FilenameMetadataExtractor`] walks a cascade of patterns from most to
//! least common and never fails: a name that matches nothing keeps its stem as
//! the lot and gets [`fallback_timestamp`].

use std::sync::LazyLock;

use chrono::{Datelike, Local, NaiveDate, NaiveDateTime};
use regex::{Captures, Regex};

/// Lots shorter than this are replaced by the first filename token.
pub const MIN_LOT_LEN: usize = 2;
/// Prepended to purely numeric fallback lots so they never look like row ids.
pub const NUMERIC_LOT_PREFIX: &str = "LOT_";

const LOT_TRAILING_SEPARATORS: &[char] = &['_', '-', '.', ' '];

static FULL_YEAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:(?P<lot>.*)_)?(?P<year>\d{4})_(?P<month>\d{2})_(?P<day>\d{2})_(?P<hour>\d{2})_(?P<minute>\d{2})_(?P<second>\d{2})$",
    )
    .expect("full-year filename pattern is valid")
});

static YEARLESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:(?P<lot>.*)_)?(?P<month>\d{2})_(?P<day>\d{2})_(?P<hour>\d{2})_(?P<minute>\d{2})_(?P<second>\d{2})$",
    )
    .expect("yearless filename pattern is valid")
});

static TWO_DIGIT_YEAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:(?P<lot>.*)_)?(?P<year>\d{2})_(?P<month>\d{2})_(?P<day>\d{2})_(?P<hour>\d{2})_(?P<minute>\d{2})_(?P<second>\d{2})$",
    )
    .expect("two-digit-year filename pattern is valid")
});

/// The timestamp assigned to files whose name carries no recognizable date.
pub fn fallback_timestamp() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1900, 1, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .unwrap_or(NaiveDateTime::MIN)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampPattern {
    FullYear,
    Yearless,
    TwoDigitYear,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenameMetadata {
    pub lot: String,
    pub timestamp: NaiveDateTime,
    pub pattern: TimestampPattern,
}

impl FilenameMetadata {
    pub fn is_fallback(&self) -> bool {
        self.pattern == TimestampPattern::Fallback
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FilenameMetadataExtractor {
    reference_year: i32,
}

impl Default for FilenameMetadataExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FilenameMetadataExtractor {
    /// Yearless names are stamped with the current local year.
    pub fn new() -> Self {
        Self {
            reference_year: Local::now().year(),
        }
    }

    pub fn with_reference_year(reference_year: i32) -> Self {
        Self { reference_year }
    }

    pub fn reference_year(&self) -> i32 {
        self.reference_year
    }

    /// Extract `(lot, timestamp)` from a filename. A trailing `.csv` is ignored.
    pub fn extract(&self, file_name: &str) -> FilenameMetadata {
        let stem = strip_csv_extension(file_name.trim());

        if let Some(caps) = FULL_YEAR.captures(stem) {
            let year = caps["year"].parse::<i32>().ok();
            if let Some(metadata) = self.build(stem, &caps, year, TimestampPattern::FullYear) {
                return metadata;
            }
        }

        if let Some(caps) = YEARLESS.captures(stem) {
            let prefix = caps.name("lot").map(|m| m.as_str()).unwrap_or("");
            if !ends_with_two_digit_token(prefix) {
                let year = Some(self.reference_year);
                if let Some(metadata) = self.build(stem, &caps, year, TimestampPattern::Yearless) {
                    return metadata;
                }
            }
        }

        if let Some(caps) = TWO_DIGIT_YEAR.captures(stem) {
            let year = caps["year"].parse::<i32>().ok().map(expand_two_digit_year);
            if let Some(metadata) = self.build(stem, &caps, year, TimestampPattern::TwoDigitYear)
            {
                return metadata;
            }
        }

        FilenameMetadata {
            lot: stem.to_string(),
            timestamp: fallback_timestamp(),
            pattern: TimestampPattern::Fallback,
        }
    }

    fn build(
        &self,
        stem: &str,
        caps: &Captures<'_>,
        year: Option<i32>,
        pattern: TimestampPattern,
    ) -> Option<FilenameMetadata> {
        let field = |name: &str| caps.name(name).and_then(|m| m.as_str().parse::<u32>().ok());
        let timestamp = NaiveDate::from_ymd_opt(year?, field("month")?, field("day")?)?
            .and_hms_opt(field("hour")?, field("minute")?, field("second")?)?;
        let prefix = caps.name("lot").map(|m| m.as_str());
        Some(FilenameMetadata {
            lot: resolve_lot(prefix, stem),
            timestamp,
            pattern,
        })
    }
}

/// `YY < 50` lands in the 2000s, anything else in the 1900s.
pub fn expand_two_digit_year(yy: i32) -> i32 {
    if yy < 50 { 2000 + yy } else { 1900 + yy }
}

fn strip_csv_extension(name: &str) -> &str {
    let len = name.len();
    if len > 4 && name.is_char_boundary(len - 4) && name[len - 4..].eq_ignore_ascii_case(".csv") {
        &name[..len - 4]
    } else {
        name
    }
}

fn ends_with_two_digit_token(prefix: &str) -> bool {
    let last = prefix.rsplit('_').next().unwrap_or("");
    last.len() == 2 && last.bytes().all(|b| b.is_ascii_digit())
}

fn resolve_lot(prefix: Option<&str>, stem: &str) -> String {
    let trimmed = prefix
        .unwrap_or("")
        .trim_end_matches(LOT_TRAILING_SEPARATORS)
        .trim();
    if trimmed.chars().count() >= MIN_LOT_LEN {
        return trimmed.to_string();
    }

    let token = stem.split('_').next().unwrap_or("").trim();
    if token.is_empty() {
        return stem.to_string();
    }
    if token.chars().all(|c| c.is_ascii_digit()) {
        format!("{NUMERIC_LOT_PREFIX}{token}")
    } else {
        token.to_string()
    }
}
