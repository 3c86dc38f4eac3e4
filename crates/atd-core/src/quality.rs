use polars::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use crate::columns::ATD;
use crate::config::WinsorizeConfig;

/// Clip range applied to one column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WinsorBounds {
    pub column: String,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleaningSummary {
    pub input_rows: usize,
    pub dropped_invalid_atd: usize,
    pub bounds: Vec<WinsorBounds>,
    pub duplicates_removed: usize,
    pub output_rows: usize,
}

#[derive(Debug, Clone)]
pub struct CleaningResult {
    pub dataframe: DataFrame,
    pub summary: CleaningSummary,
}

/// Final data-quality pass: validity filter, winsorization, then exact-row
/// deduplication (first occurrence kept, order preserved).
///
/// Bounds are recomputed from every batch, so the same row can be clipped
/// differently depending on what it is processed with.
pub fn clean(observations: &DataFrame, config: &WinsorizeConfig) -> PolarsResult<CleaningResult> {
    let input_rows = observations.height();

    let filtered = drop_invalid_atd(observations)?;
    let dropped_invalid_atd = input_rows - filtered.height();
    info!(
        dropped = dropped_invalid_atd,
        remaining = filtered.height(),
        "dropped rows with null or non-positive ATD"
    );

    let (winsorized, bounds) = winsorize(&filtered, config)?;

    let before_dedup = winsorized.height();
    let deduplicated = drop_duplicate_rows(&winsorized)?;
    let duplicates_removed = before_dedup - deduplicated.height();
    info!(
        removed = duplicates_removed,
        rows = deduplicated.height(),
        "removed duplicate rows"
    );

    let summary = CleaningSummary {
        input_rows,
        dropped_invalid_atd,
        bounds,
        duplicates_removed,
        output_rows: deduplicated.height(),
    };

    Ok(CleaningResult {
        dataframe: deduplicated,
        summary,
    })
}

/// Keeps rows whose `ATD` is present and strictly positive. NaN counts as
/// missing. `ATD` is returned as `f64`.
pub fn drop_invalid_atd(observations: &DataFrame) -> PolarsResult<DataFrame> {
    let atd = observations.column(ATD)?.cast(&DataType::Float64)?;
    let atd = atd.as_materialized_series().clone();
    let mask: BooleanChunked = atd
        .f64()?
        .into_iter()
        .map(|value| Some(value.is_some_and(|minutes| minutes > 0.0)))
        .collect();

    let mut output = observations.clone();
    output.with_column(atd)?;
    output.filter(&mask)
}

/// Clips each configured column present in the batch to its low/high
/// quantiles (linear interpolation, nulls ignored). Nulls stay null. Columns
/// with no non-null values are left untouched and produce no bounds.
pub fn winsorize(
    observations: &DataFrame,
    config: &WinsorizeConfig,
) -> PolarsResult<(DataFrame, Vec<WinsorBounds>)> {
    let mut output = observations.clone();
    let mut applied = Vec::with_capacity(config.columns.len());

    for name in &config.columns {
        let Ok(column) = observations.column(name) else {
            debug!(column = %name, "winsorize column absent from batch");
            continue;
        };
        let values = column.cast(&DataType::Float64)?;
        let values = values.f64()?;

        let lower = values.quantile(config.quantile_low, QuantileMethod::Linear)?;
        let upper = values.quantile(config.quantile_high, QuantileMethod::Linear)?;
        let (Some(lower), Some(upper)) = (lower, upper) else {
            continue;
        };

        let clipped: Vec<Option<f64>> = values
            .into_iter()
            .map(|value| value.map(|v| v.max(lower).min(upper)))
            .collect();
        output.with_column(Series::new(name.as_str().into(), clipped))?;

        debug!(column = %name, lower, upper, "winsorized column");
        applied.push(WinsorBounds {
            column: name.clone(),
            lower,
            upper,
        });
    }

    Ok((output, applied))
}

/// Removes rows equal to an earlier row in every column.
pub fn drop_duplicate_rows(observations: &DataFrame) -> PolarsResult<DataFrame> {
    observations
        .clone()
        .lazy()
        .unique_stable(None, UniqueKeepStrategy::First)
        .collect()
}
