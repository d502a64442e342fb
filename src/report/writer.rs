//! Processed-table output.

use crate::models::{columns, FarmDayTable};
use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;

/// Missing values are written as empty cells.
fn format_value(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Write the table: every passthrough column, then the derived columns.
pub fn write_farm_days<W: Write>(table: &FarmDayTable, out: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);

    let header = table
        .columns
        .iter()
        .map(String::as_str)
        .chain(columns::DERIVED);
    writer.write_record(header)?;

    for (raw, record) in table.raw_rows.iter().zip(&table.records) {
        let derived = [
            format_value(record.peer_mean),
            format_value(record.peer_stddev),
            format_value(record.positivity_ratio),
        ];
        writer.write_record(raw.iter().map(String::as_str).chain(derived.iter().map(String::as_str)))?;
    }

    writer.flush()?;
    Ok(())
}

/// Write the table to `path`, creating parent directories as needed.
pub fn save_farm_days(table: &FarmDayTable, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    write_farm_days(table, std::io::BufWriter::new(file))
        .with_context(|| format!("Failed to write {}", path.display()))
}
