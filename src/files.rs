//! # Bulk file readers
//!
//! Turns telemetry exports into [`RawRecord`]s for the normalizer. Supported layouts:
//!
//! | extension            | layout                                               |
//! |----------------------|------------------------------------------------------|
//! | `.csv`               | header row + one record per row                      |
//! | `.json`              | a JSON array of objects, or one object per line      |
//! | `.jsonl`, `.ndjson`  | one JSON object per line (blank lines ignored)       |
//!
//! ## CSV cell typing
//! -----------------
//! CSV carries no types, so every cell is inferred with [`parse_csv_cell`]: empty ⇒ `Null`,
//! `true`/`false` ⇒ `Bool`, integer ⇒ `Int`, finite float ⇒ `Float`, anything else ⇒ `Text`.
//! Identifiers that look numeric (`"123"`) become `Int`, which the normalizer renders back to
//! text for `device_id`.
use std::fs::File;
use std::io::{BufRead, BufReader, Read};

use camino::Utf8Path;

use crate::bhulan_errors::BhulanError;
use crate::mapping::MappingPlan;
use crate::record::{record_from_json, RawRecord, RawValue};

/// Layout of an input file, from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Csv,
    Json,
    Jsonl,
}

/// Map a file extension (case-insensitive) to a [`FileType`].
pub fn detect_file_type(path: &Utf8Path) -> Result<FileType, BhulanError> {
    let ext = path.extension().map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("csv") => Ok(FileType::Csv),
        Some("json") => Ok(FileType::Json),
        Some("jsonl") | Some("ndjson") => Ok(FileType::Jsonl),
        Some(other) => Err(BhulanError::UnsupportedFileType(format!(".{other}"))),
        None => Err(BhulanError::UnsupportedFileType(path.to_string())),
    }
}

/// Type a single CSV cell.
pub fn parse_csv_cell(cell: &str) -> RawValue {
    let cell = cell.trim();
    if cell.is_empty() {
        return RawValue::Null;
    }
    if cell.eq_ignore_ascii_case("true") {
        return RawValue::Bool(true);
    }
    if cell.eq_ignore_ascii_case("false") {
        return RawValue::Bool(false);
    }
    if let Ok(i) = cell.parse::<i64>() {
        return RawValue::Int(i);
    }
    match cell.parse::<f64>() {
        Ok(f) if f.is_finite() => RawValue::Float(f),
        _ => RawValue::Text(cell.to_string()),
    }
}

/// Stream of records read from a file.
pub type RecordIter = Box<dyn Iterator<Item = Result<RawRecord, BhulanError>>>;

/// Typed rows of a CSV source. The first row is the header.
pub fn csv_rows<R: Read>(
    reader: R,
) -> Result<impl Iterator<Item = Result<RawRecord, BhulanError>>, BhulanError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_reader(reader);
    let headers = rdr.headers()?.clone();

    Ok(rdr.into_records().map(move |row| {
        let row = row?;
        Ok(headers
            .iter()
            .zip(row.iter())
            .map(|(h, cell)| (h.to_string(), parse_csv_cell(cell)))
            .collect())
    }))
}

/// Read every CSV record from `reader`.
pub fn read_csv_records<R: Read>(reader: R) -> Result<Vec<RawRecord>, BhulanError> {
    csv_rows(reader)?.collect()
}

/// Header row of a CSV file.
pub fn read_csv_headers(path: &Utf8Path) -> Result<Vec<String>, BhulanError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_path(path)?;
    Ok(rdr.headers()?.iter().map(str::to_string).collect())
}

fn object_record(value: serde_json::Value, origin: &str, entry: usize) -> Result<RawRecord, BhulanError> {
    record_from_json(value).ok_or_else(|| BhulanError::InvalidInputFile {
        path: origin.to_string(),
        reason: format!("entry {entry} is not a JSON object"),
    })
}

/// Newline-delimited JSON objects; blank lines are skipped. Entries are numbered from 1.
pub fn ndjson_rows<R: BufRead>(
    reader: R,
    origin: String,
) -> impl Iterator<Item = Result<RawRecord, BhulanError>> {
    reader
        .lines()
        .enumerate()
        .filter(|(_, line)| !matches!(line, Ok(l) if l.trim().is_empty()))
        .map(move |(i, line)| object_record(serde_json::from_str(&line?)?, &origin, i + 1))
}

/// Read a JSON array of objects, or newline-delimited objects.
///
/// The layout is chosen from the first non-whitespace character: `[` means a single array,
/// anything else is read line by line.
pub fn read_json_records(path: &Utf8Path) -> Result<Vec<RawRecord>, BhulanError> {
    let mut content = String::new();
    File::open(path)?.read_to_string(&mut content)?;

    if content.trim_start().starts_with('[') {
        let values: Vec<serde_json::Value> = serde_json::from_str(&content)?;
        return values
            .into_iter()
            .enumerate()
            .map(|(i, value)| object_record(value, path.as_str(), i))
            .collect();
    }
    ndjson_rows(content.as_bytes(), path.to_string()).collect()
}

/// Lazily read the records of `path`, according to its detected [`FileType`].
///
/// CSV and NDJSON files are streamed; a `.json` file is parsed whole.
pub fn iter_records(path: &Utf8Path) -> Result<RecordIter, BhulanError> {
    let records: RecordIter = match detect_file_type(path)? {
        FileType::Csv => Box::new(csv_rows(File::open(path)?)?),
        FileType::Json => Box::new(read_json_records(path)?.into_iter().map(Ok)),
        FileType::Jsonl => Box::new(ndjson_rows(
            BufReader::new(File::open(path)?),
            path.to_string(),
        )),
    };
    Ok(records)
}

/// Every record of `path`.
pub fn read_records(path: &Utf8Path) -> Result<Vec<RawRecord>, BhulanError> {
    iter_records(path)?.collect()
}

/// Field names of a file: CSV header row, or the keys of the first JSON record.
pub fn read_headers(path: &Utf8Path) -> Result<Vec<String>, BhulanError> {
    match detect_file_type(path)? {
        FileType::Csv => read_csv_headers(path),
        FileType::Json | FileType::Jsonl => Ok(iter_records(path)?
            .next()
            .transpose()?
            .map(|first| first.into_keys().collect())
            .unwrap_or_default()),
    }
}

/// Build a mapping plan from the field names of `path` (see [`MappingPlan::inferred`]).
pub fn infer_plan_from_file(path: &Utf8Path) -> Result<MappingPlan, BhulanError> {
    Ok(MappingPlan::inferred(&read_headers(path)?))
}
