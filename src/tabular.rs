//! CSV row decoding for tabular entity types.
//!
//! Every tabular file has a header row, which is always skipped. Rows are
//! decoded independently; a malformed row yields a [`RowError`] and the rest
//! of the file still goes through.

use csv::StringRecord;
use std::path::Path;
use thiserror::Error;

use crate::models::{
    DevelopmentalStage, MeasurementKind, MeasurementSubject, MetaMeasurement, Promoter,
    Timepoint,
};

const PROMOTER_COLUMNS: usize = 9;
const DEV_STAGE_COLUMNS: usize = 6;
const META_COLUMNS: usize = 2;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RowError {
    #[error("expected at least {expected} columns, found {found}")]
    TooFewColumns { expected: usize, found: usize },
    #[error("column '{column}': '{value}' is not an integer")]
    InvalidInteger { column: &'static str, value: String },
    #[error("column '{column}': '{value}' is not a number")]
    InvalidNumber { column: &'static str, value: String },
    #[error("column '{column}': '{value}' is not a boolean")]
    InvalidBool { column: &'static str, value: String },
    #[error("empty uid")]
    EmptyUid,
    #[error("unreadable row: {0}")]
    Unreadable(String),
}

/// One data row with its 1-based line number in the file.
#[derive(Debug)]
pub struct Row {
    pub line: u64,
    pub record: Result<StringRecord, RowError>,
}

/// Read every data row of a CSV file. Opening the file is the only failure
/// that aborts the whole file.
pub fn read_rows(path: &Path) -> Result<Vec<Row>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;

    let mut rows = Vec::new();
    for (i, result) in reader.records().enumerate() {
        let fallback_line = i as u64 + 2;
        let row = match result {
            Ok(record) => Row {
                line: record.position().map(|p| p.line()).unwrap_or(fallback_line),
                record: Ok(record),
            },
            Err(e) => Row {
                line: e.position().map(|p| p.line()).unwrap_or(fallback_line),
                record: Err(RowError::Unreadable(e.to_string())),
            },
        };
        rows.push(row);
    }
    Ok(rows)
}

fn require_columns(record: &StringRecord, expected: usize) -> Result<(), RowError> {
    if record.len() < expected {
        return Err(RowError::TooFewColumns {
            expected,
            found: record.len(),
        });
    }
    Ok(())
}

fn field(record: &StringRecord, index: usize) -> String {
    record.get(index).map(|s| s.trim().to_string()).unwrap_or_default()
}

fn uid_field(record: &StringRecord) -> Result<String, RowError> {
    let uid = field(record, 0);
    if uid.is_empty() {
        return Err(RowError::EmptyUid);
    }
    Ok(uid)
}

/// Empty cells are zero.
fn int_field(record: &StringRecord, index: usize, column: &'static str) -> Result<i64, RowError> {
    let value = field(record, index);
    if value.is_empty() {
        return Ok(0);
    }
    value
        .parse::<i64>()
        .map_err(|_| RowError::InvalidInteger { column, value })
}

/// Columns: uid, wormbase, cellular_expression_pattern, timepoint_start,
/// timepoint_end, cells_by_lineaging, expression_patterns, information,
/// other_cells.
pub fn parse_promoter(record: &StringRecord) -> Result<Promoter, RowError> {
    require_columns(record, PROMOTER_COLUMNS)?;
    Ok(Promoter {
        uid: uid_field(record)?,
        wormbase: field(record, 1),
        cellular_expression_pattern: field(record, 2),
        timepoint_start: int_field(record, 3, "timepoint_start")?,
        timepoint_end: int_field(record, 4, "timepoint_end")?,
        cells_by_lineaging: field(record, 5),
        expression_patterns: field(record, 6),
        information: field(record, 7),
        other_cells: field(record, 8),
    })
}

/// Columns: uid, begin, end, order, promoter_db, timepoints.
pub fn parse_dev_stage(record: &StringRecord) -> Result<DevelopmentalStage, RowError> {
    require_columns(record, DEV_STAGE_COLUMNS)?;
    Ok(DevelopmentalStage {
        uid: uid_field(record)?,
        begin: int_field(record, 1, "begin")?,
        end: int_field(record, 2, "end")?,
        order: int_field(record, 3, "order")?,
        promoter_db: parse_bool(&field(record, 4))?,
        timepoints: parse_timepoint_list(&field(record, 5))?,
    })
}

fn parse_bool(value: &str) -> Result<Option<bool>, RowError> {
    match value.to_ascii_lowercase().as_str() {
        "" => Ok(None),
        "true" | "t" | "1" | "yes" => Ok(Some(true)),
        "false" | "f" | "0" | "no" => Ok(Some(false)),
        _ => Err(RowError::InvalidBool {
            column: "promoter_db",
            value: value.to_string(),
        }),
    }
}

/// `{1,2,3}` with or without braces; empty means no timepoints.
pub fn parse_timepoint_list(value: &str) -> Result<Vec<Timepoint>, RowError> {
    value
        .trim()
        .trim_start_matches('{')
        .trim_end_matches('}')
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<Timepoint>().map_err(|_| RowError::InvalidInteger {
                column: "timepoints",
                value: s.to_string(),
            })
        })
        .collect()
}

/// Which measurement a meta file carries, from its filename.
pub fn meta_kind(filename: &str) -> Option<(MeasurementSubject, MeasurementKind)> {
    if filename.contains("cell_sa") {
        Some((MeasurementSubject::Neuron, MeasurementKind::SurfaceArea))
    } else if filename.contains("cell_vol") {
        Some((MeasurementSubject::Neuron, MeasurementKind::Volume))
    } else if filename.contains("patch_sa") {
        Some((MeasurementSubject::Contact, MeasurementKind::SurfaceArea))
    } else {
        None
    }
}

/// Columns: uid, value.
pub fn parse_meta(
    record: &StringRecord,
    subject: MeasurementSubject,
    kind: MeasurementKind,
    timepoint: Timepoint,
) -> Result<MetaMeasurement, RowError> {
    require_columns(record, META_COLUMNS)?;
    let raw = field(record, 1);
    let value = raw.parse::<f64>().map_err(|_| RowError::InvalidNumber {
        column: kind.column(),
        value: raw.clone(),
    })?;
    Ok(MetaMeasurement {
        subject,
        kind,
        uid: uid_field(record)?,
        timepoint,
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn record(fields: &[&str]) -> StringRecord {
        StringRecord::from(fields.to_vec())
    }

    #[test]
    fn header_is_skipped_and_short_rows_survive_reading() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cell_sa.csv");
        fs::write(&path, "uid,value\nADAL,12.5\nshort\nAVAL,3\n").unwrap();

        let rows = read_rows(&path).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].line, 2);
        let short = rows[1].record.as_ref().unwrap();
        assert!(matches!(
            parse_meta(short, MeasurementSubject::Neuron, MeasurementKind::SurfaceArea, 0),
            Err(RowError::TooFewColumns { expected: 2, found: 1 })
        ));
    }

    #[test]
    fn promoter_row() {
        let p = parse_promoter(&record(&[
            "ceh-36", "WBGene1", "AWC", "5", "", "ABpl", "neurons", "note", "none",
        ]))
        .unwrap();
        assert_eq!(p.uid, "ceh-36");
        assert_eq!(p.timepoint_start, 5);
        assert_eq!(p.timepoint_end, 0);
        assert_eq!(p.other_cells, "none");
    }

    #[test]
    fn promoter_row_errors() {
        assert!(matches!(
            parse_promoter(&record(&["ceh-36", "WBGene1"])),
            Err(RowError::TooFewColumns { .. })
        ));
        assert!(matches!(
            parse_promoter(&record(&["x", "", "", "five", "", "", "", "", ""])),
            Err(RowError::InvalidInteger { column: "timepoint_start", .. })
        ));
        assert_eq!(
            parse_promoter(&record(&[" ", "", "", "", "", "", "", "", ""])),
            Err(RowError::EmptyUid)
        );
    }

    #[test]
    fn dev_stage_row() {
        let s = parse_dev_stage(&record(&["L1", "0", "16", "1", "t", "{0,5,8}"])).unwrap();
        assert_eq!(s.uid, "L1");
        assert_eq!((s.begin, s.end, s.order), (0, 16, 1));
        assert_eq!(s.promoter_db, Some(true));
        assert_eq!(s.timepoints, vec![0, 5, 8]);

        let s = parse_dev_stage(&record(&["Adult", "45", "50", "5", "", ""])).unwrap();
        assert_eq!(s.promoter_db, None);
        assert!(s.timepoints.is_empty());
    }

    #[test]
    fn timepoint_lists() {
        assert_eq!(parse_timepoint_list("1, 2 ,3").unwrap(), vec![1, 2, 3]);
        assert_eq!(parse_timepoint_list("{}").unwrap(), Vec::<Timepoint>::new());
        assert!(parse_timepoint_list("{1,x}").is_err());
    }

    #[test]
    fn meta_file_kinds() {
        assert_eq!(
            meta_kind("L1_0_cell_sa.csv"),
            Some((MeasurementSubject::Neuron, MeasurementKind::SurfaceArea))
        );
        assert_eq!(
            meta_kind("cell_vol.csv"),
            Some((MeasurementSubject::Neuron, MeasurementKind::Volume))
        );
        assert_eq!(
            meta_kind("patch_sa_48.csv"),
            Some((MeasurementSubject::Contact, MeasurementKind::SurfaceArea))
        );
        assert_eq!(meta_kind("summary.csv"), None);
    }

    #[test]
    fn meta_row_value_must_be_numeric() {
        let err = parse_meta(
            &record(&["ADAL", "n/a"]),
            MeasurementSubject::Neuron,
            MeasurementKind::Volume,
            5,
        )
        .unwrap_err();
        assert!(matches!(err, RowError::InvalidNumber { column: "volume", .. }));
    }
}
