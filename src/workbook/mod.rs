//! Minimal xlsx handling: ingest of uploaded row lists and generation of
//! report workbooks. Both sides work directly on the OOXML container — a zip
//! archive of XML parts — which keeps the dependency surface at `zip` +
//! `quick-xml`.

use thiserror::Error;

pub mod reader;
pub mod writer;

#[derive(Debug, Error)]
pub enum WorkbookError {
    #[error("not a readable workbook: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("workbook xml is malformed: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("workbook has no worksheet")]
    MissingSheet,
    #[error("article/brand columns not found in the first rows")]
    MissingColumns,
    #[error("no usable rows after normalization")]
    NoRows,
    #[error("workbook io: {0}")]
    Io(#[from] std::io::Error),
}

/// One report cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Number(f64),
    Empty,
}

impl Cell {
    pub fn text(value: impl Into<String>) -> Self {
        Cell::Text(value.into())
    }
}
