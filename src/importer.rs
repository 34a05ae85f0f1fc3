// 📥 Period Importer
// Semicolon-delimited exam export -> exam_results, at most once per (year, month)

use crate::db::{ExamResult, Store};
use anyhow::{Context, Result};
use csv::{ReaderBuilder, StringRecord};
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

// ============================================================================
// SOURCE LAYOUT
// ============================================================================

pub const COL_PROVINCE: &str = "DESC_PROVINCIA";
pub const COL_EXAM_CENTER: &str = "CENTRO_EXAMEN";
pub const COL_SCHOOL_CODE: &str = "CODIGO_AUTOESCUELA";
pub const COL_SECTION_CODE: &str = "CODIGO_SECCION";
pub const COL_MONTH: &str = "MES";
pub const COL_YEAR: &str = "ANYO";
pub const COL_EXAM_TYPE: &str = "TIPO_EXAMEN";
pub const COL_PERMIT_NAME: &str = "NOMBRE_PERMISO";
pub const COL_PASS_COUNT: &str = "NUM_APTOS";
pub const COL_FAIL_COUNT: &str = "NUM_NO_APTOS";

/// Header names every export must carry (any order, case-sensitive)
pub const REQUIRED_COLUMNS: [&str; 10] = [
    COL_PROVINCE,
    COL_EXAM_CENTER,
    COL_SCHOOL_CODE,
    COL_SECTION_CODE,
    COL_MONTH,
    COL_YEAR,
    COL_EXAM_TYPE,
    COL_PERMIT_NAME,
    COL_PASS_COUNT,
    COL_FAIL_COUNT,
];

pub const DELIMITER: u8 = b';';

// ============================================================================
// OUTCOME & ERRORS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    Imported { rows_inserted: usize },
    /// Period was already recorded; the file was not opened
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportError {
    InvalidPeriod { year: i32, month: u32 },
    MissingColumn(String),
    MissingField { line: u64, column: String },
    InvalidNumber { line: u64, column: String, value: String },
}

impl std::fmt::Display for ImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImportError::InvalidPeriod { year, month } => {
                write!(f, "invalid period {}-{:02}: month must be 1-12", year, month)
            }
            ImportError::MissingColumn(name) => write!(f, "missing required column {}", name),
            ImportError::MissingField { line, column } => {
                write!(f, "line {}: no value for {}", line, column)
            }
            ImportError::InvalidNumber { line, column, value } => {
                write!(f, "line {}: {} is not a valid number: {:?}", line, column, value)
            }
        }
    }
}

impl std::error::Error for ImportError {}

// ============================================================================
// HEADER MAPPING
// ============================================================================

/// Positional index of each required column in one file's header
#[derive(Debug, Clone)]
pub struct ColumnMap {
    indexes: HashMap<&'static str, usize>,
}

impl ColumnMap {
    pub fn from_header(header: &StringRecord) -> Result<Self, ImportError> {
        let positions: HashMap<&str, usize> = header
            .iter()
            .enumerate()
            .map(|(i, name)| (name.trim(), i))
            .collect();

        let mut indexes = HashMap::new();
        for column in REQUIRED_COLUMNS {
            let idx = positions
                .get(column)
                .ok_or_else(|| ImportError::MissingColumn(column.to_string()))?;
            indexes.insert(column, *idx);
        }

        Ok(ColumnMap { indexes })
    }

    pub fn index_of(&self, column: &str) -> Option<usize> {
        self.indexes.get(column).copied()
    }

    fn field<'r>(&self, record: &'r StringRecord, column: &'static str) -> Option<&'r str> {
        self.index_of(column).and_then(|i| record.get(i))
    }

    fn text(&self, record: &StringRecord, column: &'static str, line: u64) -> Result<String, ImportError> {
        self.field(record, column)
            .map(str::to_string)
            .ok_or_else(|| ImportError::MissingField {
                line,
                column: column.to_string(),
            })
    }

    fn number<T: std::str::FromStr>(
        &self,
        record: &StringRecord,
        column: &'static str,
        line: u64,
    ) -> Result<T, ImportError> {
        let raw = self.field(record, column).ok_or_else(|| ImportError::MissingField {
            line,
            column: column.to_string(),
        })?;

        raw.trim().parse().map_err(|_| ImportError::InvalidNumber {
            line,
            column: column.to_string(),
            value: raw.to_string(),
        })
    }

    /// `Ok(None)` for footer/sentinel lines whose province is blank
    pub fn parse_record(&self, record: &StringRecord, line: u64) -> Result<Option<ExamResult>, ImportError> {
        let province = self.field(record, COL_PROVINCE).unwrap_or("");
        if province.trim().is_empty() {
            return Ok(None);
        }

        Ok(Some(ExamResult {
            province: province.to_string(),
            exam_center: self.text(record, COL_EXAM_CENTER, line)?,
            school_code: self.text(record, COL_SCHOOL_CODE, line)?,
            section_code: self.text(record, COL_SECTION_CODE, line)?,
            month: self.number(record, COL_MONTH, line)?,
            year: self.number(record, COL_YEAR, line)?,
            exam_type: self.text(record, COL_EXAM_TYPE, line)?,
            permit_name: self.text(record, COL_PERMIT_NAME, line)?,
            pass_count: self.number(record, COL_PASS_COUNT, line)?,
            fail_count: self.number(record, COL_FAIL_COUNT, line)?,
        }))
    }
}

// ============================================================================
// DECODING & FILE NAMES
// ============================================================================

/// UTF-8 when valid, otherwise Windows-1252 (the exports ship as Latin-1)
pub fn decode_source(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.strip_prefix('\u{feff}').unwrap_or(text).to_string(),
        Err(_) => {
            let (text, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            text.into_owned()
        }
    }
}

/// `export_auto_20251201_20251231.txt` -> (2025, 12)
pub fn period_from_filename(path: &Path) -> Option<(i32, u32)> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"(\d{4})(\d{2})\d{2}_\d{8}").expect("static regex is valid")
    });

    let filename = path.file_name()?.to_str()?;
    let caps = pattern.captures(filename)?;
    let year: i32 = caps[1].parse().ok()?;
    let month: u32 = caps[2].parse().ok()?;

    (1..=12).contains(&month).then_some((year, month))
}

// ============================================================================
// IMPORTER
// ============================================================================

pub struct Importer<'a> {
    store: &'a Store,
}

impl<'a> Importer<'a> {
    pub fn new(store: &'a Store) -> Self {
        Importer { store }
    }

    /// Absorb one export for (year, month).
    ///
    /// Already-recorded periods short-circuit before any file I/O. Otherwise
    /// every row and the period marker are committed together, or nothing is.
    /// A different file under an already-recorded period is skipped as well.
    pub fn import_period(&self, file_path: &Path, year: i32, month: u32) -> Result<ImportOutcome> {
        if self.store.period_is_imported(year, month)? {
            warn!(year, month, file = %file_path.display(), "period already imported, skipping");
            return Ok(ImportOutcome::Skipped);
        }

        if !(1..=12).contains(&month) {
            return Err(ImportError::InvalidPeriod { year, month }.into());
        }

        let bytes = std::fs::read(file_path)
            .with_context(|| format!("Failed to open file: {}", file_path.display()))?;
        let text = decode_source(&bytes);

        let tx = self.store.begin()?;
        let rows_inserted = self
            .insert_rows(&text)
            .with_context(|| format!("Import of {} aborted", file_path.display()))?;
        self.store.mark_period_imported(year, month)?;
        tx.commit().context("Failed to commit import")?;

        info!(year, month, rows_inserted, file = %file_path.display(), "period imported");
        Ok(ImportOutcome::Imported { rows_inserted })
    }

    fn insert_rows(&self, text: &str) -> Result<usize> {
        let mut reader = ReaderBuilder::new()
            .delimiter(DELIMITER)
            .has_headers(true)
            .flexible(true)
            .from_reader(text.as_bytes());

        let header = reader.headers().context("Failed to read header line")?.clone();
        let columns = ColumnMap::from_header(&header)?;

        let mut inserted = 0;
        let mut skipped = 0;

        for result in reader.records() {
            let record = result.context("Failed to read data line")?;
            let line = record.position().map(|p| p.line()).unwrap_or(0);

            match columns.parse_record(&record, line)? {
                Some(exam) => {
                    self.store.insert_result(&exam)?;
                    inserted += 1;
                }
                None => skipped += 1,
            }
        }

        debug!(inserted, skipped, "data lines processed");
        Ok(inserted)
    }
}
