//! ### Error
//! Failures that abort ingestion of a whole input artifact. Anything
//! recoverable per cell or per district never reaches these types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("header row with sentinel {sentinel:?} not found in {rows} rows")]
    HeaderNotFound { sentinel: String, rows: usize },

    #[error("required column `{field}` not found (tried {tried})")]
    MissingColumn { field: &'static str, tried: String },
}

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("period code {code:?} does not start with a 4-digit year")]
    Year { code: String },

    #[error("period code {code:?} has no valid month")]
    Month { code: String },
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("row {row}: {source}")]
    Format {
        row: usize,
        #[source]
        source: FormatError,
    },

    #[error("unsupported survey file {0:?}; expected csv, xlsx, xls, xlsb or ods")]
    UnsupportedFile(String),

    #[error("survey sheet is empty")]
    EmptyWorkbook,

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Spreadsheet(#[from] calamine::Error),
}

#[derive(Debug, Error)]
pub enum BoundaryError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    GeoJson(#[from] geojson::Error),

    #[error("boundary file must be a GeoJSON FeatureCollection")]
    NotFeatureCollection,
}
