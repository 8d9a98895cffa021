//! CSV row source.
//!
//! Reads a headered CSV export and splits each record into the two column
//! roles of a [`SourceRow`]. Short records are allowed; missing cells count
//! as blank.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;
use tracing::{debug, instrument};

use crate::row::SourceRow;

/// Errors reading the row source.
#[derive(Debug, Error)]
pub enum InputError {
    /// The file could not be opened.
    #[error("cannot open input file '{path}': {source}")]
    Io {
        /// The input path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The CSV data is malformed.
    #[error("malformed CSV: {0}")]
    Csv(#[from] csv::Error),

    /// A requested column is not in the header.
    #[error("column {column} not found (available: {available})")]
    MissingColumn {
        /// The requested column as given.
        column: String,
        /// Comma-separated header names.
        available: String,
    },

    /// Neither a page column nor an image column was given.
    #[error("no input columns selected; pass a page column, an image column, or both")]
    NoColumns,
}

/// Selects a column by header name (case-insensitive) or zero-based index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnRef {
    /// Header name.
    Name(String),
    /// Zero-based position.
    Index(usize),
}

impl FromStr for ColumnRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("column reference must not be empty".to_string());
        }
        Ok(s.parse::<usize>()
            .map_or_else(|_| Self::Name(s.to_string()), Self::Index))
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => write!(f, "'{name}'"),
            Self::Index(index) => write!(f, "#{index}"),
        }
    }
}

impl ColumnRef {
    fn position(&self, headers: &csv::StringRecord) -> Result<usize, InputError> {
        let found = match self {
            Self::Index(index) => (*index < headers.len()).then_some(*index),
            Self::Name(name) => headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name.trim())),
        };
        found.ok_or_else(|| InputError::MissingColumn {
            column: self.to_string(),
            available: headers.iter().collect::<Vec<_>>().join(", "),
        })
    }
}

/// Spreadsheet row number for a data row index (header is row 1).
#[must_use]
pub fn sheet_row_number(index: usize) -> usize {
    index + 2
}

/// Reads rows from a CSV file.
///
/// # Errors
///
/// See [`read_rows_from`]; also [`InputError::Io`] if the file cannot be opened.
#[instrument(skip(page_column, image_column), fields(path = %path.display()))]
pub fn read_rows(
    path: &Path,
    page_column: Option<&ColumnRef>,
    image_column: Option<&ColumnRef>,
) -> Result<Vec<SourceRow>, InputError> {
    let file = File::open(path).map_err(|source| InputError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    read_rows_from(file, page_column, image_column)
}

/// Reads rows from any CSV reader.
///
/// # Errors
///
/// [`InputError::NoColumns`] when both roles are `None`,
/// [`InputError::MissingColumn`] when a role does not match the header, and
/// [`InputError::Csv`] for malformed data.
pub fn read_rows_from<R: Read>(
    reader: R,
    page_column: Option<&ColumnRef>,
    image_column: Option<&ColumnRef>,
) -> Result<Vec<SourceRow>, InputError> {
    if page_column.is_none() && image_column.is_none() {
        return Err(InputError::NoColumns);
    }

    let mut csv = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);
    let headers = csv.headers()?.clone();
    let page_at = page_column.map(|c| c.position(&headers)).transpose()?;
    let image_at = image_column.map(|c| c.position(&headers)).transpose()?;
    debug!(?page_at, ?image_at, "columns located");

    let mut rows = Vec::new();
    for (index, record) in csv.records().enumerate() {
        let record = record?;
        rows.push(SourceRow::new(
            index,
            page_at.and_then(|i| record.get(i)),
            image_at.and_then(|i| record.get(i)),
        ));
    }
    debug!(rows = rows.len(), "rows read");
    Ok(rows)
}
