//! Mapping tagged CSV rows to persistence-ready measurement records.
//!
//! The persisted column set is fixed by [`RECORD_COLUMNS`]; the schema
//! synchronizer creates it and the upsert engine projects onto it. Header
//! lookup is case- and whitespace-insensitive and goes through [`ALIASES`] so
//! the export variants of different station firmware all land in the same
//! attribute.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::{
    csv_ingest::RowSet,
    normalize::{DEFAULT_NUMERIC, normalize_label, normalize_text, parse_measurement, truncate_chars},
    store::{ColumnType, SqlValue},
};

pub const DEFAULT_MACHINE: &str = "gompc";
pub const UNKNOWN_LABEL: &str = "UNKNOWN";
pub const KEY_COLUMNS: [&str; 2] = ["id_referencia_some", "id_element"];
pub const CREATED_AT: &str = "created_at";
pub const UPDATED_AT: &str = "updated_at";

/// Width of the key and general text columns, in characters.
pub const TEXT_WIDTH: usize = 255;
const TEXT: ColumnType = ColumnType::Text(TEXT_WIDTH as u32);

/// Persisted columns in table order.
pub const RECORD_COLUMNS: &[(&str, ColumnType)] = &[
    ("id_referencia_some", TEXT),
    ("id_element", TEXT),
    ("valor", ColumnType::Numeric),
    ("ok", ColumnType::Boolean),
    ("id_referencia_client", TEXT),
    ("id_lot", TEXT),
    ("client", TEXT),
    ("data_hora", ColumnType::Timestamp),
    ("maquina", ColumnType::Text(50)),
    ("fase", TEXT),
    ("rivets_type", TEXT),
    ("cavitat", TEXT),
    ("element", TEXT),
    ("pieza", TEXT),
    ("datum", TEXT),
    ("property", TEXT),
    ("nominal", ColumnType::Numeric),
    ("actual", ColumnType::Numeric),
    ("tolerancia_negativa", ColumnType::Numeric),
    ("tolerancia_positiva", ColumnType::Numeric),
    ("desviacio", ColumnType::Numeric),
    ("check_value", TEXT),
    ("out_value", TEXT),
    ("alignment", TEXT),
    (CREATED_AT, ColumnType::Timestamp),
    (UPDATED_AT, ColumnType::Timestamp),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Field {
    Element,
    Property,
    Piece,
    Datum,
    Nominal,
    Actual,
    TolNegative,
    TolPositive,
    Deviation,
    Check,
    Out,
    Alignment,
}

/// Header spellings per field, compared lower-cased with whitespace removed.
const ALIASES: &[(Field, &[&str])] = &[
    (Field::Element, &["element", "feature", "mesura"]),
    (Field::Property, &["property", "characteristic", "propietat"]),
    (Field::Piece, &["pieza", "piece", "peca"]),
    (Field::Datum, &["datum"]),
    (Field::Nominal, &["nominal", "target"]),
    (Field::Actual, &["actual", "value", "valor", "measured"]),
    (Field::TolNegative, &["tol-", "lowertol", "tolerancia_negativa"]),
    (Field::TolPositive, &["tol+", "uppertol", "tolerancia_positiva"]),
    (Field::Deviation, &["dev", "deviation", "desviacio"]),
    (Field::Check, &["check"]),
    (Field::Out, &["out"]),
    (Field::Alignment, &["alignment"]),
];

fn header_key(header: &str) -> String {
    header
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
}

fn resolve_fields(headers: &[String]) -> HashMap<Field, usize> {
    let mut resolved = HashMap::new();
    for (idx, header) in headers.iter().enumerate() {
        let key = header_key(header);
        for (field, aliases) in ALIASES {
            if aliases.contains(&key.as_str()) {
                resolved.entry(*field).or_insert(idx);
            }
        }
    }
    resolved
}

/// How the `ok` flag is derived from tolerances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OkPolicy {
    /// `nominal + tol- <= actual <= nominal + tol+`
    #[default]
    NominalRelative,
    /// `tol- <= actual <= tol+`
    AbsoluteBounds,
}

impl OkPolicy {
    pub fn evaluate(
        self,
        nominal: Option<f64>,
        actual: Option<f64>,
        tol_negative: Option<f64>,
        tol_positive: Option<f64>,
    ) -> Option<bool> {
        let actual = actual?;
        let (lower, upper) = match self {
            OkPolicy::NominalRelative => {
                let nominal = nominal?;
                (nominal + tol_negative?, nominal + tol_positive?)
            }
            OkPolicy::AbsoluteBounds => (tol_negative?, tol_positive?),
        };
        Some(lower <= actual && actual <= upper)
    }
}

/// Values substituted for numeric cells that fail to parse. `None` stores NULL.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelPolicy {
    /// Nominal and tolerances.
    pub specification_default: Option<f64>,
    /// Actual, deviation and the mirrored value.
    pub measurement_default: Option<f64>,
}

impl Default for SentinelPolicy {
    fn default() -> Self {
        Self {
            specification_default: Some(DEFAULT_NUMERIC),
            measurement_default: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasurementRecord {
    pub reference_some: String,
    pub element_id: String,
    pub client: String,
    pub client_reference: String,
    pub lot: String,
    pub timestamp: NaiveDateTime,
    pub machine: String,
    pub phase: Option<String>,
    pub rivet_type: Option<String>,
    pub cavity: Option<String>,
    pub element: String,
    pub piece: Option<String>,
    pub datum: Option<String>,
    pub property: String,
    pub nominal: Option<f64>,
    pub actual: Option<f64>,
    pub tolerance_negative: Option<f64>,
    pub tolerance_positive: Option<f64>,
    pub deviation: Option<f64>,
    pub check_value: Option<String>,
    pub out_value: Option<String>,
    pub alignment: Option<String>,
    pub value: Option<f64>,
    pub ok: Option<bool>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl MeasurementRecord {
    /// Value bound for a persisted column; `None` for names outside [`RECORD_COLUMNS`].
    pub fn column_value(&self, column: &str) -> Option<SqlValue> {
        let text = |v: &str| SqlValue::Text(Some(v.to_string()));
        let value = match column.to_ascii_lowercase().as_str() {
            "id_referencia_some" => text(&self.reference_some),
            "id_element" => text(&self.element_id),
            "valor" => SqlValue::Float(self.value),
            "ok" => SqlValue::Bool(self.ok),
            "id_referencia_client" => text(&self.client_reference),
            "id_lot" => text(&self.lot),
            "client" => text(&self.client),
            "data_hora" => SqlValue::Timestamp(Some(self.timestamp)),
            "maquina" => text(&self.machine),
            "fase" => SqlValue::Text(self.phase.clone()),
            "rivets_type" => SqlValue::Text(self.rivet_type.clone()),
            "cavitat" => SqlValue::Text(self.cavity.clone()),
            "element" => text(&self.element),
            "pieza" => SqlValue::Text(self.piece.clone()),
            "datum" => SqlValue::Text(self.datum.clone()),
            "property" => text(&self.property),
            "nominal" => SqlValue::Float(self.nominal),
            "actual" => SqlValue::Float(self.actual),
            "tolerancia_negativa" => SqlValue::Float(self.tolerance_negative),
            "tolerancia_positiva" => SqlValue::Float(self.tolerance_positive),
            "desviacio" => SqlValue::Float(self.deviation),
            "check_value" => SqlValue::Text(self.check_value.clone()),
            "out_value" => SqlValue::Text(self.out_value.clone()),
            "alignment" => SqlValue::Text(self.alignment.clone()),
            "created_at" => SqlValue::Timestamp(Some(self.created_at)),
            "updated_at" => SqlValue::Timestamp(Some(self.updated_at)),
            _ => return None,
        };
        Some(value)
    }
}

/// Records produced from one file, plus how many numeric cells were defaulted.
#[derive(Debug, Clone, Default)]
pub struct MappedRows {
    pub records: Vec<MeasurementRecord>,
    pub numeric_defaults: usize,
}

#[derive(Debug, Clone)]
pub struct RecordMapper {
    machine: String,
    ok_policy: OkPolicy,
    sentinels: SentinelPolicy,
    stamped_at: NaiveDateTime,
}

impl RecordMapper {
    pub fn new(
        machine: impl Into<String>,
        ok_policy: OkPolicy,
        sentinels: SentinelPolicy,
        stamped_at: NaiveDateTime,
    ) -> Self {
        Self {
            machine: machine.into(),
            ok_policy,
            sentinels,
            stamped_at,
        }
    }

    pub fn map(&self, rows: &RowSet) -> MappedRows {
        let fields = resolve_fields(&rows.table.headers);
        let source = &rows.source;

        let client = normalize_text(&source.client).unwrap_or_default();
        let client_reference = normalize_text(&source.reference).unwrap_or_default();
        let lot = normalize_text(&rows.metadata.lot).unwrap_or_default();
        // Keys are cut to the column width here so deduplication sees what gets stored.
        let reference_some = truncate_chars(format!("{client}_{client_reference}_{lot}"), TEXT_WIDTH);
        let phase = source.phase.as_deref().and_then(normalize_text);
        let rivet_type = source.rivet_type.as_deref().and_then(normalize_text);
        let cavity = source.cavity.as_deref().and_then(normalize_text);

        let mut mapped = MappedRows::default();
        for row in &rows.table.rows {
            let cell = |field: Field| fields.get(&field).map(|idx| row.get(*idx).map_or("", String::as_str));
            let label = |field: Field| {
                cell(field).map_or_else(|| UNKNOWN_LABEL.to_string(), normalize_label)
            };
            let mut numeric = |field: Field, default: Option<f64>| match cell(field) {
                Some(raw) => match parse_measurement(raw) {
                    Some(value) => Some(value),
                    None => {
                        mapped.numeric_defaults += 1;
                        default
                    }
                },
                None => default,
            };

            let spec_default = self.sentinels.specification_default;
            let measurement_default = self.sentinels.measurement_default;
            let nominal = numeric(Field::Nominal, spec_default);
            let tolerance_negative = numeric(Field::TolNegative, spec_default);
            let tolerance_positive = numeric(Field::TolPositive, spec_default);
            let actual = numeric(Field::Actual, measurement_default);
            let deviation = numeric(Field::Deviation, measurement_default);

            let element = label(Field::Element);
            let property = label(Field::Property);
            let text = |field: Field| cell(field).and_then(normalize_text);

            mapped.records.push(MeasurementRecord {
                reference_some: reference_some.clone(),
                element_id: truncate_chars(format!("{element}_{property}"), TEXT_WIDTH),
                client: client.clone(),
                client_reference: client_reference.clone(),
                lot: lot.clone(),
                timestamp: rows.metadata.timestamp,
                machine: self.machine.clone(),
                phase: phase.clone(),
                rivet_type: rivet_type.clone(),
                cavity: cavity.clone(),
                element,
                piece: text(Field::Piece),
                datum: text(Field::Datum),
                property,
                nominal,
                actual,
                tolerance_negative,
                tolerance_positive,
                deviation,
                check_value: text(Field::Check),
                out_value: text(Field::Out),
                alignment: text(Field::Alignment),
                value: actual,
                ok: self
                    .ok_policy
                    .evaluate(nominal, actual, tolerance_negative, tolerance_positive),
                created_at: self.stamped_at,
                updated_at: self.stamped_at,
            });
        }
        mapped
    }
}

/// Collapses records sharing a composite key to the last one seen, keeping the
/// position of the first. Returns the number of records dropped.
pub fn dedupe_by_key(records: Vec<MeasurementRecord>) -> (Vec<MeasurementRecord>, usize) {
    let mut slots: HashMap<(String, String), usize> = HashMap::with_capacity(records.len());
    let mut unique: Vec<MeasurementRecord> = Vec::with_capacity(records.len());
    let mut dropped = 0usize;
    for record in records {
        let key = (record.reference_some.clone(), record.element_id.clone());
        match slots.get(&key) {
            Some(&slot) => {
                unique[slot] = record;
                dropped += 1;
            }
            None => {
                slots.insert(key, unique.len());
                unique.push(record);
            }
        }
    }
    (unique, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_policies_disagree_on_relative_tolerances() {
        let nominal = Some(10.0);
        let actual = Some(10.05);
        let (neg, pos) = (Some(-0.1), Some(0.1));
        assert_eq!(
            OkPolicy::NominalRelative.evaluate(nominal, actual, neg, pos),
            Some(true)
        );
        assert_eq!(
            OkPolicy::AbsoluteBounds.evaluate(nominal, actual, neg, pos),
            Some(false)
        );
    }

    #[test]
    fn ok_is_null_when_an_operand_is_missing() {
        assert_eq!(
            OkPolicy::NominalRelative.evaluate(Some(1.0), None, Some(-0.1), Some(0.1)),
            None
        );
        assert_eq!(
            OkPolicy::AbsoluteBounds.evaluate(None, Some(1.0), None, Some(2.0)),
            None
        );
    }

    #[test]
    fn header_keys_ignore_case_and_spacing() {
        let headers = vec!["ELEMENT".to_string(), "Tol -".to_string(), "tol+".to_string()];
        let fields = resolve_fields(&headers);
        assert_eq!(fields.get(&Field::Element), Some(&0));
        assert_eq!(fields.get(&Field::TolNegative), Some(&1));
        assert_eq!(fields.get(&Field::TolPositive), Some(&2));
    }

    #[test]
    fn every_record_column_has_a_value() {
        let ts = crate::filename::fallback_timestamp();
        let record = MeasurementRecord {
            reference_some: "A_B_C".into(),
            element_id: "E_P".into(),
            client: "A".into(),
            client_reference: "B".into(),
            lot: "C".into(),
            timestamp: ts,
            machine: DEFAULT_MACHINE.into(),
            phase: None,
            rivet_type: None,
            cavity: None,
            element: "E".into(),
            piece: None,
            datum: None,
            property: "P".into(),
            nominal: Some(0.0),
            actual: None,
            tolerance_negative: Some(0.0),
            tolerance_positive: Some(0.0),
            deviation: None,
            check_value: None,
            out_value: None,
            alignment: None,
            value: None,
            ok: None,
            created_at: ts,
            updated_at: ts,
        };
        for (column, _) in RECORD_COLUMNS {
            assert!(record.column_value(column).is_some(), "{column}");
        }
        assert!(record.column_value("bogus").is_none());
    }
}
