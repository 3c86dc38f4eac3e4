// crates/atd-core/src/error.rs

use polars::error::PolarsError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::table_io::TableIoError;
use crate::timestamps::TimestampError;
use crate::weather::WeatherError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Table(#[from] TableIoError),

    #[error(transparent)]
    Timestamp(#[from] TimestampError),

    #[error(transparent)]
    Weather(#[from] WeatherError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Polars operation failed: {0}")]
    Polars(#[from] PolarsError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
