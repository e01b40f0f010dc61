//! Loading schema descriptions and row files from disk.

use crate::schema::SchemaDef;
use crate::value::Value;
use anyhow::{bail, Context, Result};
use csv::Reader;
use rustc_hash::FxHashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::debug;

/// One loaded input row, keyed by column name.
pub type RowRecord = FxHashMap<String, Value>;

const READ_BUFFER: usize = 128 * 1024;

pub fn load_schema(path: &Path) -> Result<SchemaDef> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open schema file: {:?}", path))?;
    let def: SchemaDef = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse schema file: {:?}", path))?;
    debug!(
        schema = def.name,
        entities = def.entities.len(),
        fields = def.fields.len(),
        "Schema loaded"
    );
    Ok(def)
}

/// Load rows from a `.csv` or `.json` file, picked by extension.
pub fn load_rows(path: &Path) -> Result<Vec<RowRecord>> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    let rows = match extension.as_deref() {
        Some("csv") => load_csv_rows(path)?,
        Some("json") => load_json_rows(path)?,
        _ => bail!("Unsupported row file (expected .csv or .json): {:?}", path),
    };
    debug!(rows = rows.len(), path = ?path, "Rows loaded");
    Ok(rows)
}

fn load_csv_rows(path: &Path) -> Result<Vec<RowRecord>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open row file: {:?}", path))?;
    let mut reader = Reader::from_reader(BufReader::with_capacity(READ_BUFFER, file));
    let headers = reader
        .headers()
        .with_context(|| format!("Failed to read CSV header: {:?}", path))?
        .clone();

    let mut rows = Vec::new();
    for (line, result) in reader.records().enumerate() {
        let record =
            result.with_context(|| format!("Bad CSV record {} in {:?}", line + 1, path))?;
        let row: RowRecord = headers
            .iter()
            .zip(record.iter())
            .map(|(column, cell)| (column.to_string(), Value::from_cell(cell)))
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

fn load_json_rows(path: &Path) -> Result<Vec<RowRecord>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open row file: {:?}", path))?;
    let objects: Vec<serde_json::Map<String, serde_json::Value>> =
        serde_json::from_reader(BufReader::with_capacity(READ_BUFFER, file))
            .with_context(|| format!("Expected a JSON array of objects: {:?}", path))?;

    Ok(objects
        .iter()
        .map(|object| {
            object
                .iter()
                .map(|(key, value)| (key.clone(), Value::from_json(value)))
                .collect()
        })
        .collect())
}
