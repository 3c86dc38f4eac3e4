use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use polars::prelude::*;
use thiserror::Error;
use tracing::debug;

use crate::columns::TIMESTAMP_COLUMNS;

#[derive(Debug, Error)]
pub enum TimestampError {
    #[error("polars operation failed: {0}")]
    Polars(#[from] PolarsError),
    #[error("{column} row {row}: cannot parse timestamp {value:?}")]
    Parse {
        column: String,
        row: usize,
        value: String,
    },
    #[error("{column} has dtype {dtype}, expected a string, date or datetime column")]
    UnsupportedType { column: String, dtype: DataType },
    #[error("{column} uses unknown time zone {time_zone}")]
    UnknownTimeZone { column: String, time_zone: String },
}

const NAIVE_FORMATS: [&str; 6] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M",
];

const OFFSET_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%z"];

/// Canonical in-memory timestamp type: naive local wall clock, microseconds.
pub fn canonical_dtype() -> DataType {
    DataType::Datetime(TimeUnit::Microseconds, None)
}

/// Replaces the three lifecycle timestamp columns with canonical datetimes.
///
/// Any present-but-unparsable value fails the whole batch. Ordering between
/// the three timestamps is not checked here.
pub fn normalize_timestamps(observations: &DataFrame) -> Result<DataFrame, TimestampError> {
    let mut output = observations.clone();
    for name in TIMESTAMP_COLUMNS {
        let series = observations.column(name)?.as_materialized_series();
        let normalized = normalize_column(name, series)?;
        debug!(
            column = name,
            nulls = normalized.null_count(),
            "normalized timestamp column"
        );
        output.with_column(normalized)?;
    }
    Ok(output)
}

fn normalize_column(name: &str, series: &Series) -> Result<Series, TimestampError> {
    match series.dtype() {
        DataType::String => {
            let values = series.str()?;
            let mut micros = Vec::with_capacity(values.len());
            for (row, value) in values.into_iter().enumerate() {
                let Some(raw) = value.map(str::trim).filter(|raw| !raw.is_empty()) else {
                    micros.push(None);
                    continue;
                };
                let parsed = parse_timestamp(raw).ok_or_else(|| TimestampError::Parse {
                    column: name.to_string(),
                    row,
                    value: raw.to_string(),
                })?;
                micros.push(Some(naive_to_micros(parsed)));
            }
            Ok(Series::new(name.into(), micros).cast(&canonical_dtype())?)
        }
        DataType::Datetime(_, Some(time_zone)) => {
            let zone: Tz = time_zone.as_str().parse().map_err(|_| {
                TimestampError::UnknownTimeZone {
                    column: name.to_string(),
                    time_zone: time_zone.as_str().to_string(),
                }
            })?;
            // Physical values of a zoned column are UTC instants.
            let utc = series
                .cast(&DataType::Datetime(
                    TimeUnit::Microseconds,
                    Some(time_zone.clone()),
                ))?
                .cast(&DataType::Int64)?;
            let micros: Vec<Option<i64>> = utc
                .i64()?
                .into_iter()
                .map(|value| {
                    value
                        .and_then(DateTime::<Utc>::from_timestamp_micros)
                        .map(|instant| naive_to_micros(instant.with_timezone(&zone).naive_local()))
                })
                .collect();
            Ok(Series::new(name.into(), micros).cast(&canonical_dtype())?)
        }
        DataType::Datetime(_, None) | DataType::Date | DataType::Null => {
            Ok(series.cast(&canonical_dtype())?)
        }
        other => Err(TimestampError::UnsupportedType {
            column: name.to_string(),
            dtype: other.clone(),
        }),
    }
}

/// Parses one raw timestamp string. Offsets, when present, are dropped and the
/// local wall clock is kept.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .or_else(|| {
                    OFFSET_FORMATS
                        .iter()
                        .find_map(|format| DateTime::parse_from_str(raw, format).ok())
                })
                .map(|dt| dt.naive_local())
        })
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

pub(crate) fn naive_to_micros(value: NaiveDateTime) -> i64 {
    value.and_utc().timestamp_micros()
}

pub(crate) fn naive_from_micros(value: i64) -> Option<NaiveDateTime> {
    DateTime::<Utc>::from_timestamp_micros(value).map(|dt| dt.naive_utc())
}

/// Reads a canonical timestamp column as naive datetimes.
pub(crate) fn column_datetimes(
    df: &DataFrame,
    name: &str,
) -> PolarsResult<Vec<Option<NaiveDateTime>>> {
    let physical = df
        .column(name)?
        .cast(&canonical_dtype())?
        .cast(&DataType::Int64)?;
    Ok(physical
        .i64()?
        .into_iter()
        .map(|value| value.and_then(naive_from_micros))
        .collect())
}
