use polars::prelude::DataFrame;
use serde::Serialize;
use tracing::info;

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::features::{derive_features, CategoryEncoding};
use crate::quality::{clean, CleaningSummary};
use crate::timestamps::normalize_timestamps;
use crate::weather::{enrich_with_weather, WeatherTables};

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub dataframe: DataFrame,
    pub encodings: Vec<CategoryEncoding>,
    pub summary: PipelineSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineSummary {
    pub input_rows: usize,
    pub weather_matched_rows: usize,
    pub cleaning: CleaningSummary,
}

/// Runs normalize → features → weather → quality over one batch.
///
/// The result depends only on the arguments; nothing is cached between calls.
pub fn run_pipeline(
    raw: &DataFrame,
    weather: &WeatherTables,
    config: &PipelineConfig,
) -> Result<PipelineOutput> {
    config.validate()?;
    let input_rows = raw.height();
    info!(rows = input_rows, "starting delivery pipeline");

    let normalized = normalize_timestamps(raw)?;
    let features = derive_features(&normalized, config)?;
    let enriched = enrich_with_weather(&features.dataframe, weather)?;
    let cleaned = clean(&enriched.dataframe, &config.winsorize)?;

    let summary = PipelineSummary {
        input_rows,
        weather_matched_rows: enriched.matched_rows,
        cleaning: cleaned.summary,
    };
    info!(
        input = summary.input_rows,
        output = summary.cleaning.output_rows,
        "delivery pipeline finished"
    );

    Ok(PipelineOutput {
        dataframe: cleaned.dataframe,
        encodings: features.encodings,
        summary,
    })
}

/// Runs only the row-wise stages (normalize → features).
pub fn derive_only(raw: &DataFrame, config: &PipelineConfig) -> Result<PipelineOutput> {
    config.validate()?;
    let normalized = normalize_timestamps(raw)?;
    let features = derive_features(&normalized, config)?;
    let rows = features.dataframe.height();

    Ok(PipelineOutput {
        dataframe: features.dataframe,
        encodings: features.encodings,
        summary: PipelineSummary {
            input_rows: raw.height(),
            weather_matched_rows: 0,
            cleaning: CleaningSummary {
                input_rows: rows,
                output_rows: rows,
                ..CleaningSummary::default()
            },
        },
    })
}
