//! Reading one station export into a rectangular row set.
//!
//! Neither the encoding nor the separator is declared anywhere, so both are
//! found by trial: encodings in [`SourceEncoding::TRIAL_ORDER`] on the outside,
//! separators on the inside. The first pair that decodes cleanly and yields more
//! than one header column wins.

use std::path::Path;

use log::debug;

use crate::{
    error::IngestionIssue,
    filename::FilenameMetadata,
    io_utils::{SourceEncoding, open_csv_reader, read_file_bytes},
    walker::SourceFile,
};

pub const SEPARATORS: [u8; 3] = [b';', b',', b'\t'];

const COMBINED_OUT_ALIGNMENT: &str = "out,alignment";

/// Parsed cells of one file before any tagging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTable {
    pub encoding: SourceEncoding,
    pub delimiter: u8,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl ParsedTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers
            .iter()
            .position(|header| header.eq_ignore_ascii_case(name))
    }
}

/// Rows of one file tagged with where the file came from.
#[derive(Debug, Clone)]
pub struct RowSet {
    pub source: SourceFile,
    pub metadata: FilenameMetadata,
    pub table: ParsedTable,
}

impl RowSet {
    pub fn len(&self) -> usize {
        self.table.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.rows.is_empty()
    }
}

/// Parses `source` and attaches its location and filename metadata.
pub fn ingest(source: &SourceFile, metadata: FilenameMetadata) -> Result<RowSet, IngestionIssue> {
    let table = parse_file(&source.path).map_err(|message| IngestionIssue::Parse {
        path: source.path.clone(),
        message,
    })?;
    Ok(RowSet {
        source: source.clone(),
        metadata,
        table,
    })
}

pub fn parse_file(path: &Path) -> Result<ParsedTable, String> {
    let bytes = read_file_bytes(path).map_err(|err| err.to_string())?;
    parse_bytes(&bytes)
}

pub fn parse_bytes(bytes: &[u8]) -> Result<ParsedTable, String> {
    for encoding in SourceEncoding::TRIAL_ORDER {
        let Some(text) = encoding.decode(bytes) else {
            debug!("Decoding as {} failed", encoding.label());
            continue;
        };
        for delimiter in SEPARATORS {
            match read_table(&text, delimiter) {
                Some((headers, rows)) => {
                    debug!(
                        "Accepted {} with separator {:?} ({} column(s))",
                        encoding.label(),
                        delimiter as char,
                        headers.len()
                    );
                    if rows.is_empty() {
                        return Err("File has a header but no data rows".to_string());
                    }
                    return Ok(ParsedTable {
                        encoding,
                        delimiter,
                        headers,
                        rows,
                    });
                }
                None => debug!(
                    "Separator {:?} rejected under {}",
                    delimiter as char,
                    encoding.label()
                ),
            }
        }
    }
    Err("No encoding/separator combination produced more than one column".to_string())
}

/// `None` when the separator does not split the header into several columns.
fn read_table(text: &str, delimiter: u8) -> Option<(Vec<String>, Vec<Vec<String>>)> {
    let mut reader = open_csv_reader(text.as_bytes(), delimiter);
    let raw_headers = reader.headers().ok()?.clone();
    if raw_headers.len() <= 1 {
        return None;
    }

    let layout = column_layout(raw_headers.iter());
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.ok()?;
        let row = layout
            .iter()
            .map(|(_, source_idx)| record.get(*source_idx).unwrap_or("").trim().to_string())
            .collect::<Vec<_>>();
        if row.iter().all(String::is_empty) {
            continue;
        }
        rows.push(row);
    }
    let headers = layout.into_iter().map(|(name, _)| name).collect();
    Some((headers, rows))
}

/// Output column names paired with the raw cell index each one reads from.
///
/// Names are trimmed, blank names dropped, a combined `Out,Alignment` header
/// fans out to two columns, and later duplicates lose to the first occurrence.
fn column_layout<'a>(raw: impl Iterator<Item = &'a str>) -> Vec<(String, usize)> {
    fn push(name: &str, idx: usize, layout: &mut Vec<(String, usize)>) {
        if !layout.iter().any(|(existing, _)| existing == name) {
            layout.push((name.to_string(), idx));
        }
    }

    let mut layout: Vec<(String, usize)> = Vec::new();
    for (idx, header) in raw.enumerate() {
        let name = header.trim();
        if name.is_empty() {
            continue;
        }
        let compact: String = name.chars().filter(|c| !c.is_whitespace()).collect();
        if compact.eq_ignore_ascii_case(COMBINED_OUT_ALIGNMENT) {
            push("Out", idx, &mut layout);
            push("Alignment", idx, &mut layout);
        } else {
            push(name, idx, &mut layout);
        }
    }
    layout
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combined_header_fans_out() {
        let layout = column_layout(["Element", "Out,Alignment"].into_iter());
        assert_eq!(
            layout,
            vec![
                ("Element".to_string(), 0),
                ("Out".to_string(), 1),
                ("Alignment".to_string(), 1)
            ]
        );
    }

    #[test]
    fn duplicate_headers_keep_first() {
        let layout = column_layout([" Actual ", "Nominal", "Actual", ""].into_iter());
        assert_eq!(
            layout,
            vec![("Actual".to_string(), 0), ("Nominal".to_string(), 1)]
        );
    }

    #[test]
    fn single_column_is_rejected() {
        assert!(read_table("Element\nA\n", b';').is_none());
    }
}
