//! CSV loaders for the farm-day, disease-test and outbreak tables.
//!
//! Column names come from [`ColumnsConfig`](crate::config::ColumnsConfig).
//! Every loader is fail-fast: the first missing column, malformed date or
//! malformed number aborts the load with the file and line it came from.

use crate::config::{FarmDayColumns, OutbreakColumns, TestColumns};
use crate::models::{columns, FarmDayRecord, FarmDayTable, OutbreakInterval, TestResultRecord};
use chrono::NaiveDate;
use csv::StringRecord;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Cell values read as "no value".
const MISSING_MARKERS: [&str; 7] = ["", "nan", "NaN", "NA", "null", "NULL", "None"];

/// Accepted calendar date layouts (a trailing time component is ignored).
const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%Y%m%d"];

/// Errors raised while loading an input table.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to open {file}: {source}")]
    Open {
        file: String,
        source: std::io::Error,
    },

    #[error("{file}: missing required column '{column}'")]
    MissingColumn { file: String, column: String },

    #[error("{file}:{line}: malformed date '{value}' in column '{column}'")]
    BadDate {
        file: String,
        line: u64,
        column: String,
        value: String,
    },

    #[error("{file}:{line}: malformed number '{value}' in column '{column}'")]
    BadNumber {
        file: String,
        line: u64,
        column: String,
        value: String,
    },

    #[error("{file}:{line}: negative quantity {value} in column '{column}'")]
    NegativeQuantity {
        file: String,
        line: u64,
        column: String,
        value: f64,
    },

    #[error("{file}:{line}: outbreak ends {end} before it starts {start}")]
    InvertedInterval {
        file: String,
        line: u64,
        start: NaiveDate,
        end: NaiveDate,
    },

    #[error("{file}: {source}")]
    Csv { file: String, source: csv::Error },
}

/// Parse a calendar date, ignoring any time-of-day suffix.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let day_part = value
        .trim()
        .split(|c: char| c == ' ' || c == 'T')
        .next()
        .unwrap_or("");

    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(day_part, fmt).ok())
}

/// A numeric cell that is neither a number nor a missing marker.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("not a finite number: '{0}'")]
pub struct NumberError(pub String);

/// Parse a numeric cell; missing markers and NaN become `None`.
///
/// Infinities are rejected.
pub fn parse_optional_number(value: &str) -> Result<Option<f64>, NumberError> {
    let value = value.trim();
    if MISSING_MARKERS.contains(&value) {
        return Ok(None);
    }

    match value.parse::<f64>() {
        Ok(v) if v.is_nan() => Ok(None),
        Ok(v) if v.is_finite() => Ok(Some(v)),
        _ => Err(NumberError(value.to_string())),
    }
}

/// Header lookup and typed cell access for one open table.
struct TableReader<R: Read> {
    file: String,
    reader: csv::Reader<R>,
    header: Vec<String>,
    index: HashMap<String, usize>,
}

impl<R: Read> TableReader<R> {
    fn new(source: R, file: &str) -> Result<Self, LoadError> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(source);

        let header: Vec<String> = reader
            .headers()
            .map_err(|e| LoadError::Csv {
                file: file.to_string(),
                source: e,
            })?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').to_string())
            .collect();

        let index = header
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();

        Ok(Self {
            file: file.to_string(),
            reader,
            header,
            index,
        })
    }

    fn find(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    fn require(&self, name: &str) -> Result<usize, LoadError> {
        self.find(name).ok_or_else(|| LoadError::MissingColumn {
            file: self.file.clone(),
            column: name.to_string(),
        })
    }

    /// Reads every record, failing on the first CSV error.
    fn records(&mut self) -> Result<Vec<StringRecord>, LoadError> {
        let file = self.file.clone();
        self.reader
            .records()
            .map(|r| {
                r.map_err(|e| LoadError::Csv {
                    file: file.clone(),
                    source: e,
                })
            })
            .collect()
    }

    fn date(&self, record: &StringRecord, idx: usize) -> Result<NaiveDate, LoadError> {
        let value = record.get(idx).unwrap_or("");
        parse_date(value).ok_or_else(|| LoadError::BadDate {
            file: self.file.clone(),
            line: line_of(record),
            column: self.header[idx].clone(),
            value: value.to_string(),
        })
    }

    fn number(&self, record: &StringRecord, idx: usize) -> Result<Option<f64>, LoadError> {
        let value = record.get(idx).unwrap_or("");
        parse_optional_number(value).map_err(|_| LoadError::BadNumber {
            file: self.file.clone(),
            line: line_of(record),
            column: self.header[idx].clone(),
            value: value.to_string(),
        })
    }

    /// A non-negative quantity; an empty cell counts as zero.
    fn quantity(&self, record: &StringRecord, idx: usize) -> Result<f64, LoadError> {
        let value = self.number(record, idx)?.unwrap_or(0.0);
        if value < 0.0 {
            return Err(LoadError::NegativeQuantity {
                file: self.file.clone(),
                line: line_of(record),
                column: self.header[idx].clone(),
                value,
            });
        }
        Ok(value)
    }
}

fn line_of(record: &StringRecord) -> u64 {
    record.position().map(|p| p.line()).unwrap_or(0)
}

fn text(record: &StringRecord, idx: usize) -> String {
    record.get(idx).unwrap_or("").to_string()
}

fn open(path: &Path) -> Result<File, LoadError> {
    File::open(path).map_err(|e| LoadError::Open {
        file: path.display().to_string(),
        source: e,
    })
}

/// Load a raw or processed farm-day table from disk.
pub fn load_farm_days(path: &Path, cols: &FarmDayColumns) -> Result<FarmDayTable, LoadError> {
    let table = read_farm_days(open(path)?, &path.display().to_string(), cols)?;
    debug!("Loaded {} farm-day rows from {}", table.len(), path.display());
    Ok(table)
}

/// Read a farm-day table.
///
/// The date column is renamed to `date_code`. Derived columns of a processed
/// table are parsed into the typed fields and removed from the passthrough
/// columns, so augmenting a processed table again yields the same output.
pub fn read_farm_days<R: Read>(
    source: R,
    file: &str,
    cols: &FarmDayColumns,
) -> Result<FarmDayTable, LoadError> {
    let mut reader = TableReader::new(source, file)?;

    let farm_idx = reader.require(&cols.farm_id)?;
    let date_idx = match reader.find(&cols.date) {
        Some(idx) => idx,
        None => reader.require(columns::DATE)?,
    };
    let org_idx = reader.require(&cols.org_unit)?;
    let rate_idx = reader.require(&cols.abortion_rate)?;
    let name_idx = reader.find(&cols.farm_name);
    let mean_idx = reader.find(columns::PEER_MEAN);
    let stddev_idx = reader.find(columns::PEER_STDDEV);
    let positivity_idx = reader.find(columns::POSITIVITY);

    // Passthrough columns; derived values are carried by the typed fields.
    let kept: Vec<usize> = (0..reader.header.len())
        .filter(|&i| !columns::DERIVED.contains(&reader.header[i].as_str()))
        .collect();

    let table_columns = kept
        .iter()
        .map(|&i| {
            if i == date_idx {
                columns::DATE.to_string()
            } else {
                reader.header[i].clone()
            }
        })
        .collect();

    let mut table = FarmDayTable {
        columns: table_columns,
        ..Default::default()
    };

    for record in reader.records()? {
        let farm_id = text(&record, farm_idx);
        let farm_name = name_idx
            .map(|i| text(&record, i))
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| farm_id.clone());

        let date = reader.date(&record, date_idx)?;
        let derived = |idx: Option<usize>| match idx {
            Some(i) => reader.number(&record, i),
            None => Ok(None),
        };

        table.records.push(FarmDayRecord {
            farm_id,
            farm_name,
            date,
            org_unit: text(&record, org_idx),
            abortion_rate: reader.number(&record, rate_idx)?,
            peer_mean: derived(mean_idx)?,
            peer_stddev: derived(stddev_idx)?,
            positivity_ratio: derived(positivity_idx)?,
        });

        let mut raw: Vec<String> = kept.iter().map(|&i| text(&record, i)).collect();
        if let Some(pos) = kept.iter().position(|&i| i == date_idx) {
            // normalise to ISO so downstream readers need no format guessing
            raw[pos] = date.format("%Y-%m-%d").to_string();
        }
        table.raw_rows.push(raw);
    }

    Ok(table)
}

/// Load the disease-test table from disk.
pub fn load_tests(path: &Path, cols: &TestColumns) -> Result<Vec<TestResultRecord>, LoadError> {
    let tests = read_tests(open(path)?, &path.display().to_string(), cols)?;
    debug!("Loaded {} test records from {}", tests.len(), path.display());
    Ok(tests)
}

/// Read a disease-test table.
pub fn read_tests<R: Read>(
    source: R,
    file: &str,
    cols: &TestColumns,
) -> Result<Vec<TestResultRecord>, LoadError> {
    let mut reader = TableReader::new(source, file)?;

    let farm_idx = reader.require(&cols.farm_id)?;
    let date_idx = reader.require(&cols.date)?;
    let item_idx = reader.require(&cols.check_item)?;
    let index_idx = reader.require(&cols.index_item)?;
    let qty_idx = reader.require(&cols.check_qty)?;
    let out_idx = reader.require(&cols.check_out_qty)?;

    let mut tests = Vec::new();
    for record in reader.records()? {
        tests.push(TestResultRecord {
            farm_id: text(&record, farm_idx),
            date: reader.date(&record, date_idx)?,
            check_item: text(&record, item_idx),
            index_item: text(&record, index_idx),
            check_qty: reader.quantity(&record, qty_idx)?,
            check_out_qty: reader.quantity(&record, out_idx)?,
        });
    }

    Ok(tests)
}

/// Load the outbreak-interval table from disk.
pub fn load_outbreaks(
    path: &Path,
    cols: &OutbreakColumns,
) -> Result<Vec<OutbreakInterval>, LoadError> {
    let outbreaks = read_outbreaks(open(path)?, &path.display().to_string(), cols)?;
    debug!(
        "Loaded {} outbreak intervals from {}",
        outbreaks.len(),
        path.display()
    );
    Ok(outbreaks)
}

/// Read an outbreak-interval table.
pub fn read_outbreaks<R: Read>(
    source: R,
    file: &str,
    cols: &OutbreakColumns,
) -> Result<Vec<OutbreakInterval>, LoadError> {
    let mut reader = TableReader::new(source, file)?;

    let farm_idx = reader.require(&cols.farm_id)?;
    let start_idx = reader.require(&cols.start)?;
    let end_idx = reader.require(&cols.end)?;

    let mut outbreaks = Vec::new();
    for record in reader.records()? {
        let start = reader.date(&record, start_idx)?;
        let end = reader.date(&record, end_idx)?;
        if end < start {
            return Err(LoadError::InvertedInterval {
                file: file.to_string(),
                line: line_of(&record),
                start,
                end,
            });
        }

        outbreaks.push(OutbreakInterval {
            farm_id: text(&record, farm_idx),
            start,
            end,
        });
    }

    Ok(outbreaks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_parse_date_formats() {
        assert_eq!(parse_date("2024-03-05"), Some(date("2024-03-05")));
        assert_eq!(parse_date("2024/3/5"), Some(date("2024-03-05")));
        assert_eq!(parse_date("20240305"), Some(date("2024-03-05")));
        assert_eq!(parse_date("2024-03-05 00:00:00"), Some(date("2024-03-05")));
        assert_eq!(parse_date("2024-03-05T12:30:00"), Some(date("2024-03-05")));
        assert_eq!(parse_date(" 2024-03-05 "), Some(date("2024-03-05")));
        assert_eq!(parse_date("05.03.2024"), None);
        assert_eq!(parse_date(""), None);
        assert_eq!(parse_date("2024-02-30"), None);
    }

    #[test]
    fn test_parse_optional_number() {
        assert_eq!(parse_optional_number("0.015"), Ok(Some(0.015)));
        assert_eq!(parse_optional_number(" 3 "), Ok(Some(3.0)));
        assert_eq!(parse_optional_number(""), Ok(None));
        assert_eq!(parse_optional_number("NaN"), Ok(None));
        assert_eq!(parse_optional_number("nan"), Ok(None));
        assert_eq!(parse_optional_number("NULL"), Ok(None));
        assert_eq!(
            parse_optional_number("abc"),
            Err(NumberError("abc".to_string()))
        );
        assert!(parse_optional_number("inf").is_err());
        assert!(parse_optional_number("-inf").is_err());
        assert!(parse_optional_number("infinity").is_err());
    }

    #[test]
    fn test_read_farm_days() {
        let csv = "\u{feff}pigfarm_dk,stats_dt,l3_org_inv_nm,org_inv_nm,abortion_1_7,sows\n\
                   F1,2024/01/02,North,Farm One,0.01,120\n\
                   F2,2024-01-02 00:00:00,North,,,80\n";

        let table = read_farm_days(csv.as_bytes(), "farms.csv", &FarmDayColumns::default())
            .unwrap();

        assert_eq!(
            table.columns,
            vec!["pigfarm_dk", "date_code", "l3_org_inv_nm", "org_inv_nm", "abortion_1_7", "sows"]
        );
        assert_eq!(table.len(), 2);

        let first = &table.records[0];
        assert_eq!(first.farm_id, "F1");
        assert_eq!(first.farm_name, "Farm One");
        assert_eq!(first.date, date("2024-01-02"));
        assert_eq!(first.org_unit, "North");
        assert_eq!(first.abortion_rate, Some(0.01));
        assert_eq!(table.raw_rows[0][1], "2024-01-02");
        assert_eq!(table.raw_rows[0][5], "120");

        // empty name falls back to the farm id, empty rate is missing
        assert_eq!(table.records[1].farm_name, "F2");
        assert_eq!(table.records[1].abortion_rate, None);
    }

    #[test]
    fn test_read_processed_farm_days() {
        let csv = "pigfarm_dk,date_code,l3_org_inv_nm,abortion_1_7,abortion_1_7_l3_mean,abortion_1_7_l3_var,prrs_check_out_ratio\n\
                   F1,2024-01-02,North,0.01,0.02,,0.5\n";

        let table = read_farm_days(csv.as_bytes(), "processed.csv", &FarmDayColumns::default())
            .unwrap();

        assert_eq!(
            table.columns,
            vec!["pigfarm_dk", "date_code", "l3_org_inv_nm", "abortion_1_7"]
        );
        assert_eq!(table.raw_rows[0].len(), 4);

        let record = &table.records[0];
        assert_eq!(record.peer_mean, Some(0.02));
        assert_eq!(record.peer_stddev, None);
        assert_eq!(record.positivity_ratio, Some(0.5));
    }

    #[test]
    fn test_read_farm_days_missing_column() {
        let csv = "pigfarm_dk,stats_dt,abortion_1_7\nF1,2024-01-02,0.01\n";
        let err = read_farm_days(csv.as_bytes(), "farms.csv", &FarmDayColumns::default())
            .unwrap_err();

        assert!(matches!(
            err,
            LoadError::MissingColumn { ref column, .. } if column == "l3_org_inv_nm"
        ));
    }

    #[test]
    fn test_read_farm_days_bad_date_aborts() {
        let csv = "pigfarm_dk,stats_dt,l3_org_inv_nm,abortion_1_7\n\
                   F1,2024-01-02,North,0.01\n\
                   F1,yesterday,North,0.01\n";
        let err = read_farm_days(csv.as_bytes(), "farms.csv", &FarmDayColumns::default())
            .unwrap_err();

        match err {
            LoadError::BadDate { line, value, .. } => {
                assert_eq!(line, 3);
                assert_eq!(value, "yesterday");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_read_farm_days_bad_number_aborts() {
        let csv = "pigfarm_dk,stats_dt,l3_org_inv_nm,abortion_1_7\nF1,2024-01-02,North,high\n";
        let err = read_farm_days(csv.as_bytes(), "farms.csv", &FarmDayColumns::default())
            .unwrap_err();
        assert!(matches!(err, LoadError::BadNumber { .. }));
        assert!(err.to_string().contains("farms.csv:2"));
    }

    #[test]
    fn test_read_tests() {
        let csv = "org_inv_dk,receive_dt,check_item_dk,index_item_dk,check_qty,check_out_qty\n\
                   F1,2024-01-02,A,B,100,5\n\
                   F1,2024-01-03,A,B,50,\n";

        let tests = read_tests(csv.as_bytes(), "tests.csv", &TestColumns::default()).unwrap();
        assert_eq!(tests.len(), 2);
        assert_eq!(tests[0].check_qty, 100.0);
        assert_eq!(tests[0].check_out_qty, 5.0);
        assert_eq!(tests[1].check_out_qty, 0.0);
    }

    #[test]
    fn test_read_tests_rejects_negative_quantity() {
        let csv = "org_inv_dk,receive_dt,check_item_dk,index_item_dk,check_qty,check_out_qty\n\
                   F1,2024-01-02,A,B,-1,0\n";
        let err = read_tests(csv.as_bytes(), "tests.csv", &TestColumns::default()).unwrap_err();
        assert!(matches!(err, LoadError::NegativeQuantity { .. }));
    }

    #[test]
    fn test_read_tests_rejects_infinite_quantity() {
        let csv = "org_inv_dk,receive_dt,check_item_dk,index_item_dk,check_qty,check_out_qty\n\
                   F1,2024-01-02,A,B,inf,0\n";
        let err = read_tests(csv.as_bytes(), "tests.csv", &TestColumns::default()).unwrap_err();
        assert!(matches!(err, LoadError::BadNumber { .. }));
        assert!(err.to_string().contains("check_qty"));
    }

    #[test]
    fn test_read_outbreaks() {
        let csv = "org_inv_dk,start_dt,end_dt\nF1,2024-01-05,2024-02-01\n";
        let outbreaks =
            read_outbreaks(csv.as_bytes(), "onset.csv", &OutbreakColumns::default()).unwrap();
        assert_eq!(
            outbreaks,
            vec![OutbreakInterval {
                farm_id: "F1".to_string(),
                start: date("2024-01-05"),
                end: date("2024-02-01"),
            }]
        );

        let inverted = "org_inv_dk,start_dt,end_dt\nF1,2024-02-05,2024-02-01\n";
        let err = read_outbreaks(inverted.as_bytes(), "onset.csv", &OutbreakColumns::default())
            .unwrap_err();
        assert!(matches!(err, LoadError::InvertedInterval { .. }));
    }

    #[test]
    fn test_load_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "org_inv_dk,start_dt,end_dt").unwrap();
        writeln!(file, "F9,2023-12-30,2024-01-02").unwrap();

        let outbreaks = load_outbreaks(file.path(), &OutbreakColumns::default()).unwrap();
        assert_eq!(outbreaks.len(), 1);
        assert_eq!(outbreaks[0].farm_id, "F9");

        let missing = load_outbreaks(Path::new("/nonexistent/onset.csv"), &OutbreakColumns::default());
        assert!(matches!(missing, Err(LoadError::Open { .. })));
    }
}
