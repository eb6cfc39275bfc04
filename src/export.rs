use std::path::Path;

use anyhow::{Context, Result};
use encoding_rs::Encoding;

use crate::{
    record::{MeasurementRecord, RECORD_COLUMNS},
    store::SqlValue,
};

pub const EXPORT_DELIMITER: u8 = b';';

pub fn header() -> Vec<String> {
    RECORD_COLUMNS
        .iter()
        .map(|(name, _)| name.to_string())
        .collect()
}

pub fn render_record(record: &MeasurementRecord) -> Vec<String> {
    RECORD_COLUMNS
        .iter()
        .map(|(name, _)| {
            record
                .column_value(name)
                .unwrap_or(SqlValue::Text(None))
                .render()
        })
        .collect()
}

/// Writes records with the persisted column names as header. `-` or `None`
/// writes to stdout.
pub fn write_records(
    path: Option<&Path>,
    records: &[MeasurementRecord],
    encoding: &'static Encoding,
) -> Result<usize> {
    let mut writer = crate::io_utils::open_csv_writer(path, EXPORT_DELIMITER, encoding)?;
    writer
        .write_record(header())
        .context("Writing export header")?;
    for record in records {
        writer
            .write_record(render_record(record))
            .with_context(|| format!("Writing record {}/{}", record.reference_some, record.element_id))?;
    }
    writer.flush().context("Flushing export output")?;
    Ok(records.len())
}
