use std::fs::File;
use std::path::{Path, PathBuf};

use polars::io::parquet::write::{ParquetCompression, ParquetWriter, StatisticsOptions};
use polars::prelude::*;
use thiserror::Error;
use tracing::{debug, info};

use crate::columns::{LOCAL_SUFFIX, TIMESTAMP_COLUMNS};

#[derive(Debug, Error)]
pub enum TableIoError {
    #[error("file not found: {0}")]
    NotFound(PathBuf),
    #[error("unsupported file extension {extension:?} for {path}; expected .csv or .parquet")]
    UnsupportedFormat { path: PathBuf, extension: String },
    #[error("polars operation failed: {0}")]
    Polars(#[from] PolarsError),
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    Csv,
    Parquet,
}

impl TableFormat {
    /// Picks the format from the (case-insensitive) file extension.
    pub fn from_path(path: &Path) -> Result<Self, TableIoError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        match extension.as_str() {
            "csv" => Ok(Self::Csv),
            "parquet" => Ok(Self::Parquet),
            _ => Err(TableIoError::UnsupportedFormat {
                path: path.to_path_buf(),
                extension,
            }),
        }
    }
}

/// Reads a raw delivery export into memory.
///
/// Existence is checked before the extension so a missing `.txt` file reports
/// `NotFound` rather than `UnsupportedFormat`. Timestamp columns exported with
/// a `_local` suffix are renamed to their canonical names.
///
/// CSV columns are all read as strings; the stages coerce what they need, so a
/// stray non-numeric value deep in the file becomes null instead of failing
/// the read.
pub fn extract_table(path: impl AsRef<Path>) -> Result<DataFrame, TableIoError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(TableIoError::NotFound(path.to_path_buf()));
    }

    let mut df = match TableFormat::from_path(path)? {
        TableFormat::Csv => CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(0))
            .try_into_reader_with_file_path(Some(path.to_path_buf()))?
            .finish()?,
        TableFormat::Parquet => ParquetReader::new(File::open(path)?).finish()?,
    };

    canonicalize_timestamp_columns(&mut df)?;

    info!(
        path = %path.display(),
        rows = df.height(),
        columns = df.width(),
        "extracted delivery table"
    );
    Ok(df)
}

/// Renames `<timestamp>_local` to `<timestamp>` unless the canonical column is
/// already present.
pub fn canonicalize_timestamp_columns(df: &mut DataFrame) -> PolarsResult<()> {
    for canonical in TIMESTAMP_COLUMNS {
        let suffixed = format!("{canonical}{LOCAL_SUFFIX}");
        if df.column(canonical).is_err() && df.column(&suffixed).is_ok() {
            debug!(from = %suffixed, to = canonical, "renaming timestamp column");
            df.rename(&suffixed, canonical.into())?;
        }
    }
    Ok(())
}

/// Serializes a batch for warehouse loading; parquet output is zstd-compressed.
pub fn write_table(df: &DataFrame, path: impl AsRef<Path>) -> Result<(), TableIoError> {
    let path = path.as_ref();
    let format = TableFormat::from_path(path)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = File::create(path)?;
    let mut clone = df.clone();
    match format {
        TableFormat::Csv => {
            CsvWriter::new(&mut file)
                .include_header(true)
                .finish(&mut clone)?;
        }
        TableFormat::Parquet => {
            ParquetWriter::new(&mut file)
                .with_compression(ParquetCompression::Zstd(None))
                .with_statistics(StatisticsOptions::default())
                .finish(&mut clone)?;
        }
    }

    info!(path = %path.display(), rows = df.height(), "wrote enriched table");
    Ok(())
}
